//! The bootstrap action pipeline.
//!
//! Each action is one phase of turning freshly provisioned node containers
//! into a working cluster. `Pipeline` runs them strictly in order, tracks an
//! `ActionState` per action, and stops at the first failure, wrapping the
//! error with the phase it happened in. Rollback is the caller's job.

pub mod install_cni;
pub mod install_storage;
pub mod kubeadm_config;
pub mod kubeadm_init;
pub mod kubeadm_join;
pub mod loadbalancer;
pub mod wait_for_ready;

use crate::lifecycle::{validate_transition, ActionState, Phase};
use crate::status::{Status, StatusStep};
use crate::CoreError;
use kindling_config::ClusterConfig;
use kindling_runtime::node::NodesByRole;
use kindling_runtime::Provider;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Where kubeadm reads its config inside every node.
pub const KUBEADM_CONFIG_PATH: &str = "/kind/kubeadm.conf";
/// The admin kubeconfig `kubeadm init` writes on the bootstrap node.
pub const ADMIN_KUBECONFIG_PATH: &str = "/etc/kubernetes/admin.conf";

pub trait Action: Send + Sync {
    fn phase(&self) -> Phase;
    fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), CoreError>;
}

/// Everything an action may touch.
pub struct ActionContext<'a> {
    pub provider: &'a dyn Provider,
    pub cluster: &'a str,
    pub config: &'a ClusterConfig,
    pub status: &'a dyn Status,
    /// Kubeconfig file the cluster's credentials are merged into.
    pub kubeconfig_path: &'a Path,
    nodes: Mutex<Option<Arc<NodesByRole>>>,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        cluster: &'a str,
        config: &'a ClusterConfig,
        status: &'a dyn Status,
        kubeconfig_path: &'a Path,
    ) -> Self {
        Self {
            provider,
            cluster,
            config,
            status,
            kubeconfig_path,
            nodes: Mutex::new(None),
        }
    }

    /// The cluster's nodes grouped by role, looked up once per pipeline run.
    pub fn nodes(&self) -> Result<Arc<NodesByRole>, CoreError> {
        let mut cached = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(nodes) = cached.as_ref() {
            return Ok(Arc::clone(nodes));
        }
        let listed = self.provider.list_nodes(self.cluster)?;
        let by_role = Arc::new(NodesByRole::classify(&listed)?);
        debug!(
            "cluster {} has {} control-plane and {} worker nodes",
            self.cluster,
            by_role.control_planes.len(),
            by_role.workers.len()
        );
        *cached = Some(Arc::clone(&by_role));
        Ok(by_role)
    }
}

/// Ordered actions with their run state.
pub struct Pipeline {
    actions: Vec<Box<dyn Action>>,
    states: Vec<ActionState>,
}

impl Pipeline {
    pub fn new(actions: Vec<Box<dyn Action>>) -> Self {
        let states = vec![ActionState::Pending; actions.len()];
        Self { actions, states }
    }

    /// The standard bootstrap sequence for `cfg`.
    pub fn for_config(cfg: &ClusterConfig, wait: Duration) -> Self {
        let mut actions: Vec<Box<dyn Action>> = Vec::new();
        if cfg.has_implicit_load_balancer() {
            actions.push(Box::new(loadbalancer::ConfigureLoadBalancer));
        }
        actions.push(Box::new(kubeadm_config::WriteKubeadmConfig));
        actions.push(Box::new(kubeadm_init::KubeadmInit));
        if !cfg.networking.disable_default_cni {
            actions.push(Box::new(install_cni::InstallCni));
        }
        actions.push(Box::new(install_storage::InstallStorage));
        actions.push(Box::new(kubeadm_join::KubeadmJoin));
        if !wait.is_zero() {
            actions.push(Box::new(wait_for_ready::WaitForReady::new(wait)));
        }
        Self::new(actions)
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.actions.iter().map(|a| a.phase()).collect()
    }

    pub fn states(&self) -> Vec<(Phase, ActionState)> {
        self.actions
            .iter()
            .zip(&self.states)
            .map(|(a, s)| (a.phase(), *s))
            .collect()
    }

    fn transition(&mut self, index: usize, to: ActionState) -> Result<(), CoreError> {
        validate_transition(self.states[index], to)?;
        self.states[index] = to;
        Ok(())
    }

    /// Run every action in order. `interrupted` is polled before each one.
    pub fn run(
        &mut self,
        ctx: &ActionContext<'_>,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<(), CoreError> {
        for index in 0..self.actions.len() {
            let phase = self.actions[index].phase();
            if interrupted() {
                return Err(CoreError::Interrupted(phase));
            }

            self.transition(index, ActionState::Running)?;
            let step = StatusStep::start(ctx.status, &phase.title());
            match self.actions[index].execute(ctx) {
                Ok(()) => {
                    step.succeed();
                    self.transition(index, ActionState::Succeeded)?;
                }
                Err(e) => {
                    drop(step);
                    self.transition(index, ActionState::Failed)?;
                    return Err(CoreError::in_phase(phase, e));
                }
            }
        }
        Ok(())
    }
}

/// Major and minor of a `v1.27.3`-style Kubernetes version.
pub(crate) fn parse_kube_version(version: &str) -> Result<(u32, u32), CoreError> {
    let invalid = || CoreError::InvalidVersion(version.to_owned());
    let trimmed = version.trim();
    let core = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let core = core.split(['-', '+']).next().unwrap_or_default();
    let mut parts = core.split('.');
    let major = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    let minor = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    Ok((major, minor))
}
