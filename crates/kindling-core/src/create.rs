use crate::actions::{ActionContext, Pipeline};
use crate::concurrency::shutdown_requested;
use crate::delete::delete_cluster;
use crate::lifecycle::{ActionState, Phase};
use crate::status::{Status, StatusStep};
use crate::{getenv, CoreError};
use kindling_config::{validate, ClusterConfig, MAX_CLUSTER_NAME_LEN};
use kindling_kubeconfig::{kind_cluster_key, path_for_merge};
use kindling_runtime::Provider;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub config: ClusterConfig,
    /// Overrides the name in the config.
    pub name: Option<String>,
    /// Overrides the image of every node.
    pub node_image: Option<String>,
    /// Keep the nodes around when creation fails.
    pub retain: bool,
    /// How long to wait for the control plane to become ready; zero skips.
    pub wait: Duration,
    /// Kubeconfig to merge into instead of the `KUBECONFIG` / home default.
    pub kubeconfig: Option<PathBuf>,
    /// Stop once the node containers exist, without bootstrapping Kubernetes.
    pub stop_before_kubernetes: bool,
}

/// Outcome of a successful create.
#[derive(Debug, Clone, Serialize)]
pub struct Created {
    pub name: String,
    /// The kubeconfig file the cluster was merged into.
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub phases: Vec<(Phase, ActionState)>,
}

/// Create a cluster, stopping between phases on Ctrl-C.
pub fn create_cluster(
    provider: &dyn Provider,
    opts: &CreateOptions,
    status: &dyn Status,
) -> Result<Created, CoreError> {
    create_cluster_with(provider, opts, status, &shutdown_requested)
}

/// Create a cluster. `interrupted` is polled between phases; once it returns
/// true the remaining phases are skipped and the cluster is rolled back.
///
/// Any failure after provisioning started deletes every node of the cluster
/// and its kubeconfig entry, unless `retain` is set.
pub fn create_cluster_with(
    provider: &dyn Provider,
    opts: &CreateOptions,
    status: &dyn Status,
    interrupted: &dyn Fn() -> bool,
) -> Result<Created, CoreError> {
    let cfg = resolve_config(opts)?;
    let name = cfg.cluster_name().to_owned();
    if name.len() > MAX_CLUSTER_NAME_LEN {
        warn!(
            "cluster name \"{name}\" is longer than {MAX_CLUSTER_NAME_LEN} characters, \
             node hostnames may be truncated"
        );
    }
    if !provider.list_nodes(&name)?.is_empty() {
        return Err(CoreError::ClusterExists(name));
    }
    info!("creating cluster {name} with the {} provider", provider.name());

    let step = StatusStep::start(status, &Phase::EnsureImages.title());
    provider
        .ensure_images(&cfg)
        .map_err(|e| CoreError::in_phase(Phase::EnsureImages, e))?;
    step.succeed();

    if interrupted() {
        return Err(CoreError::Interrupted(Phase::Provision));
    }
    let step = StatusStep::start(status, &Phase::Provision.title());
    if let Err(e) = provider.provision(&name, &cfg) {
        drop(step);
        rollback(provider, &name, opts);
        return Err(CoreError::in_phase(Phase::Provision, e));
    }
    step.succeed();

    if opts.stop_before_kubernetes {
        return Ok(Created {
            name,
            kubeconfig: None,
            context: None,
            phases: Vec::new(),
        });
    }

    let kubeconfig_path = path_for_merge(opts.kubeconfig.as_deref(), getenv);
    let ctx = ActionContext::new(provider, &name, &cfg, status, &kubeconfig_path);
    let mut pipeline = Pipeline::for_config(&cfg, opts.wait);
    if let Err(e) = pipeline.run(&ctx, interrupted) {
        rollback(provider, &name, opts);
        return Err(e);
    }

    Ok(Created {
        context: Some(kind_cluster_key(&name)),
        kubeconfig: Some(kubeconfig_path),
        phases: pipeline.states(),
        name,
    })
}

fn resolve_config(opts: &CreateOptions) -> Result<ClusterConfig, CoreError> {
    let mut cfg = opts.config.clone();
    if let Some(name) = opts.name.as_ref().filter(|n| !n.is_empty()) {
        cfg.name = Some(name.clone());
    }
    let mut cfg = cfg.with_defaults();
    if let Some(image) = opts.node_image.as_ref().filter(|i| !i.is_empty()) {
        for node in &mut cfg.nodes {
            node.image.clone_from(image);
        }
    }
    validate(&cfg)?;
    Ok(cfg)
}

fn rollback(provider: &dyn Provider, name: &str, opts: &CreateOptions) {
    if opts.retain {
        warn!("keeping the nodes of cluster {name} after failure, delete them when done");
        return;
    }
    info!("rolling back cluster {name}");
    if let Err(e) = delete_cluster(provider, name, kubeconfig_override(opts)) {
        warn!("failed to delete cluster {name} during rollback: {e}");
    }
}

fn kubeconfig_override(opts: &CreateOptions) -> Option<&Path> {
    opts.kubeconfig.as_deref()
}
