use super::{colorize_role, connect, describe, json_pretty, EXIT_SUCCESS};
use kindling_core::{get_kubeconfig, CoreError};
use std::io::Write;

fn runtime(e: kindling_runtime::RuntimeError) -> String {
    describe(&CoreError::from(e))
}

pub fn run_clusters(json: bool) -> Result<u8, String> {
    let provider = connect()?;
    let clusters = provider.list_clusters().map_err(runtime)?;
    if json {
        println!("{}", json_pretty(&clusters)?);
    } else if clusters.is_empty() {
        println!("No kind clusters found.");
    } else {
        for cluster in &clusters {
            println!("{cluster}");
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn run_nodes(cluster: &str, json: bool) -> Result<u8, String> {
    let provider = connect()?;
    let nodes = provider.list_nodes(cluster).map_err(runtime)?;
    let mut rows = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let role = node.role().map_err(runtime)?;
        rows.push((node.name().to_owned(), role.as_str()));
    }

    if json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(name, role)| serde_json::json!({ "name": name, "role": role }))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else if rows.is_empty() {
        println!("No kind nodes found for cluster \"{cluster}\".");
    } else {
        println!("{:<40} ROLE", "NAME");
        for (name, role) in &rows {
            println!("{name:<40} {}", colorize_role(role));
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Print the cluster's kubeconfig. It is YAML either way, so `--json` has
/// no effect here.
pub fn run_kubeconfig(cluster: &str, internal: bool) -> Result<u8, String> {
    let provider = connect()?;
    let bytes = get_kubeconfig(provider.as_ref(), cluster, internal).map_err(|e| describe(&e))?;
    std::io::stdout()
        .write_all(&bytes)
        .map_err(|e| format!("failed to write kubeconfig: {e}"))?;
    Ok(EXIT_SUCCESS)
}
