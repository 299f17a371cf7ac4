use crate::{getenv, CoreError};
use kindling_kubeconfig::{kind_cluster_key, paths, remove_file};
use kindling_runtime::Provider;
use std::path::Path;
use tracing::{info, warn};

/// Delete a cluster's nodes and its kubeconfig entries. Deleting a cluster
/// that has no nodes is not an error. Returns whether any node was removed.
pub fn delete_cluster(
    provider: &dyn Provider,
    cluster: &str,
    explicit_kubeconfig: Option<&Path>,
) -> Result<bool, CoreError> {
    let key = kind_cluster_key(cluster);
    for path in paths(explicit_kubeconfig, getenv) {
        match remove_file(&path, &key) {
            Ok(true) => info!("removed {key} from {}", path.display()),
            Ok(false) => {}
            Err(e) => warn!("failed to update kubeconfig {}: {e}", path.display()),
        }
    }

    let nodes = provider.list_nodes(cluster)?;
    if nodes.is_empty() {
        info!("no nodes found for cluster {cluster}");
        return Ok(false);
    }
    provider.delete_nodes(&nodes)?;
    info!("deleted {} nodes of cluster {cluster}", nodes.len());
    Ok(true)
}

/// Delete every cluster the provider knows about and return their names.
/// Failures are collected so one broken cluster does not stop the rest.
pub fn delete_all_clusters(
    provider: &dyn Provider,
    explicit_kubeconfig: Option<&Path>,
) -> Result<Vec<String>, CoreError> {
    let clusters = provider.list_clusters()?;
    let mut errors = Vec::new();
    let mut deleted = Vec::new();
    for cluster in clusters {
        match delete_cluster(provider, &cluster, explicit_kubeconfig) {
            Ok(_) => deleted.push(cluster),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(deleted)
    } else {
        Err(CoreError::Aggregate(errors))
    }
}
