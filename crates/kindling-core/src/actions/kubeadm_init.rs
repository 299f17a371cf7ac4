use super::{parse_kube_version, Action, ActionContext, ADMIN_KUBECONFIG_PATH, KUBEADM_CONFIG_PATH};
use crate::kubeconfig::kind_config_from_node;
use crate::lifecycle::Phase;
use crate::CoreError;
use kindling_kubeconfig::merge_file;
use tracing::{debug, info};

/// Control-plane taints to drop so workloads can run on a lone node.
pub fn control_plane_taints(minor: u32) -> &'static [&'static str] {
    match minor {
        0..=23 => &["node-role.kubernetes.io/master-"],
        24 => &[
            "node-role.kubernetes.io/control-plane-",
            "node-role.kubernetes.io/master-",
        ],
        _ => &["node-role.kubernetes.io/control-plane-"],
    }
}

/// Runs `kubeadm init` on the bootstrap control plane and merges the
/// resulting admin credentials into the user's kubeconfig.
pub struct KubeadmInit;

impl Action for KubeadmInit {
    fn phase(&self) -> Phase {
        Phase::KubeadmInit
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), CoreError> {
        let nodes = ctx.nodes()?;
        let node = nodes.bootstrap_control_plane()?;

        let lines = node
            .command(
                "kubeadm",
                [
                    "init".to_owned(),
                    format!("--config={KUBEADM_CONFIG_PATH}"),
                    // Swap and other container quirks trip the preflight checks.
                    "--ignore-preflight-errors=all".to_owned(),
                    "--skip-token-print".to_owned(),
                    "--v=6".to_owned(),
                ],
            )
            .combined_output_lines()?;
        debug!("kubeadm init on {node}:\n{}", lines.join("\n"));

        let kind = kind_config_from_node(ctx.provider, ctx.cluster, node, false)?;
        merge_file(ctx.kubeconfig_path, &kind)?;
        info!(
            "merged cluster {} into {}",
            ctx.cluster,
            ctx.kubeconfig_path.display()
        );

        if nodes.kubernetes_nodes().len() == 1 {
            let (_, minor) = parse_kube_version(&node.kubernetes_version()?)?;
            let mut args = vec![
                format!("--kubeconfig={ADMIN_KUBECONFIG_PATH}"),
                "taint".to_owned(),
                "nodes".to_owned(),
                "--all".to_owned(),
            ];
            args.extend(control_plane_taints(minor).iter().map(|t| (*t).to_owned()));
            node.command("kubectl", args).run()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taints_by_version() {
        assert_eq!(control_plane_taints(23), ["node-role.kubernetes.io/master-"]);
        assert_eq!(control_plane_taints(24).len(), 2);
        assert_eq!(
            control_plane_taints(27),
            ["node-role.kubernetes.io/control-plane-"]
        );
    }
}
