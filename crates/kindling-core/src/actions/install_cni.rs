use super::{Action, ActionContext, ADMIN_KUBECONFIG_PATH};
use crate::lifecycle::Phase;
use crate::CoreError;

/// The CNI manifest shipped in the node image.
pub const DEFAULT_CNI_MANIFEST_PATH: &str = "/kind/manifests/default-cni.yaml";

const POD_SUBNET_PLACEHOLDER: &str = "{{ .PodSubnet }}";

/// Fill the node image's CNI manifest template in.
pub fn render_cni_manifest(template: &str, pod_subnet: &str) -> String {
    template.replace(POD_SUBNET_PLACEHOLDER, pod_subnet)
}

/// Applies the node image's default CNI manifest from the bootstrap node.
pub struct InstallCni;

impl Action for InstallCni {
    fn phase(&self) -> Phase {
        Phase::InstallCni
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), CoreError> {
        let nodes = ctx.nodes()?;
        let node = nodes.bootstrap_control_plane()?;

        let template = node.read_file(DEFAULT_CNI_MANIFEST_PATH)?;
        let manifest = render_cni_manifest(
            &String::from_utf8_lossy(&template),
            &ctx.config.networking.pod_subnet,
        );

        node.command(
            "kubectl",
            [
                format!("--kubeconfig={ADMIN_KUBECONFIG_PATH}"),
                "apply".to_owned(),
                "-f".to_owned(),
                "-".to_owned(),
            ],
        )
        .stdin_bytes(manifest.into_bytes())
        .run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_subnet_is_substituted() {
        let rendered = render_cni_manifest(
            "env:\n- name: POD_SUBNET\n  value: {{ .PodSubnet }}\n",
            "10.244.0.0/16",
        );
        assert_eq!(rendered, "env:\n- name: POD_SUBNET\n  value: 10.244.0.0/16\n");
    }

    #[test]
    fn manifest_without_placeholder_is_unchanged() {
        assert_eq!(render_cni_manifest("kind: List\n", "x"), "kind: List\n");
    }
}
