use crate::CoreError;
use kindling_runtime::Provider;
use std::fs;
use std::path::Path;
use tracing::info;

/// Collect engine and per-node logs of `cluster` into `dir`.
pub fn export_logs(provider: &dyn Provider, cluster: &str, dir: &Path) -> Result<(), CoreError> {
    let nodes = provider.list_nodes(cluster)?;
    if nodes.is_empty() {
        return Err(CoreError::ClusterNotFound(cluster.to_owned()));
    }
    fs::create_dir_all(dir)?;
    fs::write(
        dir.join("kindling-version.txt"),
        format!("kindling {}\n", env!("CARGO_PKG_VERSION")),
    )?;
    provider.collect_logs(dir, &nodes)?;
    info!("exported logs of {} nodes to {}", nodes.len(), dir.display());
    Ok(())
}
