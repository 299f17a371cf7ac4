use super::{connect, describe, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use kindling_core::{delete_all_clusters, delete_cluster, CoreError};
use std::path::Path;

pub fn run_cluster(name: &str, kubeconfig: Option<&Path>, json: bool) -> Result<u8, String> {
    let provider = connect()?;
    let pb = (!json).then(|| spinner(&format!("Deleting cluster \"{name}\" ...")));
    let deleted = match delete_cluster(provider.as_ref(), name, kubeconfig) {
        Ok(deleted) => deleted,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, &format!("Deleting cluster \"{name}\""));
            }
            return Err(describe(&e));
        }
    };
    if let Some(pb) = &pb {
        if deleted {
            spin_ok(pb, &format!("Deleted cluster \"{name}\""));
        } else {
            spin_ok(pb, &format!("No nodes found for cluster \"{name}\""));
        }
    }
    if json {
        let payload = serde_json::json!({ "name": name, "deleted": deleted });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}

/// Delete the named clusters, or every cluster with `all`.
pub fn run_clusters(
    names: &[String],
    all: bool,
    kubeconfig: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    if !all && names.is_empty() {
        return Err("no cluster names given; pass names or --all".to_owned());
    }
    let provider = connect()?;

    let deleted = if all {
        delete_all_clusters(provider.as_ref(), kubeconfig).map_err(|e| describe(&e))?
    } else {
        let mut deleted = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            match delete_cluster(provider.as_ref(), name, kubeconfig) {
                Ok(true) => deleted.push(name.clone()),
                Ok(false) => {}
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Err(describe(&CoreError::Aggregate(errors)));
        }
        deleted
    };

    if json {
        println!("{}", json_pretty(&deleted)?);
    } else if deleted.is_empty() {
        println!("No clusters deleted");
    } else {
        println!("Deleted clusters: {deleted:?}");
    }
    Ok(EXIT_SUCCESS)
}
