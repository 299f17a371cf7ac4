use crate::actions::ADMIN_KUBECONFIG_PATH;
use crate::{getenv, CoreError};
use kindling_kubeconfig::{encode, kind_from_raw_kubeadm, merge_file, path_for_merge, Config};
use kindling_runtime::node::{Node, NodesByRole};
use kindling_runtime::Provider;
use std::path::{Path, PathBuf};
use tracing::info;

/// The `kind-<cluster>` kubeconfig entry built from `node`'s admin.conf,
/// pointed at the host-published API server or, with `internal`, at the
/// endpoint reachable from inside the cluster network.
pub(crate) fn kind_config_from_node(
    provider: &dyn Provider,
    cluster: &str,
    node: &Node,
    internal: bool,
) -> Result<Config, CoreError> {
    let raw = node.read_file(ADMIN_KUBECONFIG_PATH)?;
    let endpoint = if internal {
        provider.api_server_internal_endpoint(cluster)?
    } else {
        provider.api_server_endpoint(cluster)?
    };
    Ok(kind_from_raw_kubeadm(
        &raw,
        cluster,
        &format!("https://{endpoint}"),
    )?)
}

fn bootstrap_node(provider: &dyn Provider, cluster: &str) -> Result<Node, CoreError> {
    let nodes = provider.list_nodes(cluster)?;
    if nodes.is_empty() {
        return Err(CoreError::ClusterNotFound(cluster.to_owned()));
    }
    let by_role = NodesByRole::classify(&nodes)?;
    Ok(by_role.bootstrap_control_plane()?.clone())
}

/// The cluster's kubeconfig as YAML.
pub fn get_kubeconfig(
    provider: &dyn Provider,
    cluster: &str,
    internal: bool,
) -> Result<Vec<u8>, CoreError> {
    let node = bootstrap_node(provider, cluster)?;
    let cfg = kind_config_from_node(provider, cluster, &node, internal)?;
    Ok(encode(&cfg)?)
}

/// Merge the cluster's kubeconfig into the user's and return the file
/// written.
pub fn export_kubeconfig(
    provider: &dyn Provider,
    cluster: &str,
    internal: bool,
    explicit_path: Option<&Path>,
) -> Result<PathBuf, CoreError> {
    let node = bootstrap_node(provider, cluster)?;
    let cfg = kind_config_from_node(provider, cluster, &node, internal)?;
    let path = path_for_merge(explicit_path, getenv);
    merge_file(&path, &cfg)?;
    info!("exported kubeconfig for {cluster} to {}", path.display());
    Ok(path)
}
