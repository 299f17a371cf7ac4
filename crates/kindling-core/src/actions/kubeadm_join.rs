use super::{Action, ActionContext, KUBEADM_CONFIG_PATH};
use crate::lifecycle::Phase;
use crate::CoreError;
use kindling_runtime::node::Node;
use kindling_runtime::{until_error_within, RuntimeError, Task};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Cluster-wide PKI every control-plane member must share, relative to
/// `/etc/kubernetes/pki`.
pub const SHARED_PKI_FILES: [&str; 8] = [
    "ca.crt",
    "ca.key",
    "front-proxy-ca.crt",
    "front-proxy-ca.key",
    "sa.key",
    "sa.pub",
    "etcd/ca.crt",
    "etcd/ca.key",
];

const PKI_DIR: &str = "/etc/kubernetes/pki";

/// Bound on the concurrent worker joins. Each join waits for the kubelet
/// TLS bootstrap, which is slow on loaded hosts.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Joins the remaining nodes: secondary control planes one at a time, then
/// all workers at once.
pub struct KubeadmJoin;

impl Action for KubeadmJoin {
    fn phase(&self) -> Phase {
        Phase::KubeadmJoin
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), CoreError> {
        let nodes = ctx.nodes()?;
        let secondary = nodes.secondary_control_planes();
        if !secondary.is_empty() {
            info!("joining {} more control-plane nodes", secondary.len());
            let bootstrap = nodes.bootstrap_control_plane()?;
            // etcd membership changes race when control planes join together.
            for node in secondary {
                join_control_plane(bootstrap, node)?;
            }
        }

        if !nodes.workers.is_empty() {
            info!("joining {} worker nodes", nodes.workers.len());
            let tasks: Vec<Task<RuntimeError>> = nodes
                .workers
                .iter()
                .cloned()
                .map(|node| -> Task<RuntimeError> { Box::new(move || run_join(&node)) })
                .collect();
            until_error_within(tasks, WORKER_JOIN_TIMEOUT).map_err(RuntimeError::from)?;
        }
        Ok(())
    }
}

fn join_control_plane(bootstrap: &Node, node: &Node) -> Result<(), CoreError> {
    let staging = tempfile::tempdir()?;
    copy_shared_pki(bootstrap, node, staging.path())?;
    run_join(node)?;
    Ok(())
}

/// Copy the shared PKI from `from` to `to` through a host directory.
fn copy_shared_pki(from: &Node, to: &Node, staging: &Path) -> Result<(), CoreError> {
    to.command("mkdir", ["-p", format!("{PKI_DIR}/etcd").as_str()])
        .run()?;
    for file in SHARED_PKI_FILES {
        let container_path = format!("{PKI_DIR}/{file}");
        let host_path = staging.join(file);
        if let Some(parent) = host_path.parent() {
            fs::create_dir_all(parent)?;
        }
        from.copy_from(&container_path, &host_path)?;
        to.copy_to(&host_path, &container_path)?;
    }
    debug!("copied shared PKI from {from} to {to}");
    Ok(())
}

fn run_join(node: &Node) -> Result<(), RuntimeError> {
    let lines = node
        .command(
            "kubeadm",
            [
                "join".to_owned(),
                format!("--config={KUBEADM_CONFIG_PATH}"),
                "--ignore-preflight-errors=all".to_owned(),
                "--v=6".to_owned(),
            ],
        )
        .combined_output_lines()?;
    debug!("kubeadm join on {node}:\n{}", lines.join("\n"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindling_runtime::DEFAULT_FANOUT_TIMEOUT;

    #[test]
    fn worker_joins_get_more_than_the_generic_fanout_bound() {
        assert!(WORKER_JOIN_TIMEOUT > DEFAULT_FANOUT_TIMEOUT);
    }
}
