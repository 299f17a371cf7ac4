use super::{connect, describe, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use kindling_core::load_images;
use kindling_runtime::Provider;
use std::sync::Arc;

pub fn run(cluster: &str, images: &[String], nodes: &[String], json: bool) -> Result<u8, String> {
    let provider: Arc<dyn Provider> = Arc::from(connect()?);

    let what = if images.len() == 1 {
        format!("image \"{}\"", images[0])
    } else {
        format!("{} images", images.len())
    };
    let pb = (!json).then(|| spinner(&format!("Loading {what} into \"{cluster}\" ...")));
    let loaded = match load_images(&provider, cluster, images, nodes) {
        Ok(loaded) => loaded,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, &format!("Loading {what}"));
            }
            return Err(describe(&e));
        }
    };
    if let Some(pb) = &pb {
        if loaded == 0 {
            spin_ok(pb, &format!("{what} already present on every node"));
        } else {
            spin_ok(pb, &format!("Loaded {what} ({loaded} imports)"));
        }
    }

    if json {
        let payload = serde_json::json!({
            "cluster": cluster,
            "images": images,
            "imports": loaded,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
