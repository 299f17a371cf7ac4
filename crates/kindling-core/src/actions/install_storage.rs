use super::{Action, ActionContext, ADMIN_KUBECONFIG_PATH};
use crate::lifecycle::Phase;
use crate::CoreError;
use tracing::debug;

/// A StorageClass manifest some node images ship.
pub const DEFAULT_STORAGE_MANIFEST_PATH: &str = "/kind/manifests/default-storage.yaml";

/// Host-path StorageClass used when the image carries none.
pub const STANDARD_STORAGE_CLASS: &str = "apiVersion: storage.k8s.io/v1
kind: StorageClass
metadata:
  namespace: kube-system
  name: standard
  annotations:
    storageclass.kubernetes.io/is-default-class: \"true\"
  labels:
    addonmanager.kubernetes.io/mode: EnsureExists
provisioner: kubernetes.io/host-path
";

/// Installs the default StorageClass.
pub struct InstallStorage;

impl Action for InstallStorage {
    fn phase(&self) -> Phase {
        Phase::InstallStorage
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), CoreError> {
        let nodes = ctx.nodes()?;
        let node = nodes.bootstrap_control_plane()?;

        let manifest = match node.read_file(DEFAULT_STORAGE_MANIFEST_PATH) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => STANDARD_STORAGE_CLASS.as_bytes().to_vec(),
            Err(e) if e.run_error().is_some() => {
                debug!("no storage manifest in node image, using the built-in one");
                STANDARD_STORAGE_CLASS.as_bytes().to_vec()
            }
            Err(e) => return Err(e.into()),
        };

        node.command(
            "kubectl",
            [
                format!("--kubeconfig={ADMIN_KUBECONFIG_PATH}"),
                "apply".to_owned(),
                "-f".to_owned(),
                "-".to_owned(),
            ],
        )
        .stdin_bytes(manifest)
        .run()?;
        Ok(())
    }
}
