use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// A step of cluster creation, in the order it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    EnsureImages,
    Provision,
    LoadBalancer,
    KubeadmConfig,
    KubeadmInit,
    InstallCni,
    InstallStorage,
    KubeadmJoin,
    WaitForReady,
}

impl Phase {
    fn description(self) -> &'static str {
        match self {
            Phase::EnsureImages => "ensuring node images",
            Phase::Provision => "preparing nodes",
            Phase::LoadBalancer => "configuring the external load balancer",
            Phase::KubeadmConfig => "writing kubeadm configuration",
            Phase::KubeadmInit => "starting the control-plane",
            Phase::InstallCni => "installing CNI",
            Phase::InstallStorage => "installing the StorageClass",
            Phase::KubeadmJoin => "joining nodes",
            Phase::WaitForReady => "waiting for the control-plane to be ready",
        }
    }

    /// The description with a leading capital, for status lines.
    pub fn title(self) -> String {
        let description = self.description();
        let mut chars = description.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Where a single pipeline action is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionState::Pending => write!(f, "pending"),
            ActionState::Running => write!(f, "running"),
            ActionState::Succeeded => write!(f, "succeeded"),
            ActionState::Failed => write!(f, "failed"),
        }
    }
}

pub fn validate_transition(from: ActionState, to: ActionState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (ActionState::Pending, ActionState::Running)
            | (ActionState::Running, ActionState::Succeeded | ActionState::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
