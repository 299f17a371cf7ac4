use super::{connect, describe, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use kindling_core::{export_kubeconfig, export_logs};
use std::path::{Path, PathBuf};

pub fn run_kubeconfig(
    cluster: &str,
    internal: bool,
    kubeconfig: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let provider = connect()?;
    let path = export_kubeconfig(provider.as_ref(), cluster, internal, kubeconfig)
        .map_err(|e| describe(&e))?;
    let context = format!("kind-{cluster}");
    if json {
        let payload = serde_json::json!({ "kubeconfig": path, "context": context });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("Set kubectl context to \"{context}\" in {}", path.display());
    }
    Ok(EXIT_SUCCESS)
}

/// Export logs into `dir`, or a fresh temporary directory that is kept.
pub fn run_logs(cluster: &str, dir: Option<&Path>, json: bool) -> Result<u8, String> {
    let dir: PathBuf = match dir {
        Some(dir) => dir.to_path_buf(),
        None => tempfile::Builder::new()
            .prefix("kindling-logs-")
            .tempdir()
            .map_err(|e| format!("failed to create log directory: {e}"))?
            .keep(),
    };
    let provider = connect()?;

    let pb = (!json).then(|| spinner(&format!("Exporting logs for cluster \"{cluster}\" ...")));
    if let Err(e) = export_logs(provider.as_ref(), cluster, &dir) {
        if let Some(pb) = &pb {
            spin_fail(pb, "Exporting logs");
        }
        return Err(describe(&e));
    }
    if let Some(pb) = &pb {
        spin_ok(pb, "Exported logs");
    }

    if json {
        let payload = serde_json::json!({ "cluster": cluster, "dir": dir });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", dir.display());
    }
    Ok(EXIT_SUCCESS)
}
