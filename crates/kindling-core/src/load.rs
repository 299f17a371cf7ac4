use crate::CoreError;
use kindling_runtime::node::{Node, NodesByRole};
use kindling_runtime::{until_error_within, Provider, RuntimeError, Task};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, info};

/// Bound on each of the save and import fan-outs. Multi-gigabyte images
/// take minutes to stream through the engine.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Side-load host images into a cluster's nodes.
///
/// Images already present on a node with the same ID are skipped. The rest
/// are saved from the host engine concurrently, then imported into every
/// node that lacks them concurrently. `selected_nodes` restricts the target
/// nodes by name; empty means every Kubernetes node. Returns the number of
/// imports performed.
pub fn load_images(
    provider: &Arc<dyn Provider>,
    cluster: &str,
    images: &[String],
    selected_nodes: &[String],
) -> Result<usize, CoreError> {
    load_images_within(provider, cluster, images, selected_nodes, DEFAULT_LOAD_TIMEOUT)
}

/// `load_images` with an explicit bound on the save and import fan-outs.
pub fn load_images_within(
    provider: &Arc<dyn Provider>,
    cluster: &str,
    images: &[String],
    selected_nodes: &[String],
    timeout: Duration,
) -> Result<usize, CoreError> {
    let mut ids = Vec::with_capacity(images.len());
    for image in images {
        ids.push((image.clone(), provider.image_id(image)?));
    }

    let listed = provider.list_nodes(cluster)?;
    if listed.is_empty() {
        return Err(CoreError::ClusterNotFound(cluster.to_owned()));
    }
    let candidates = NodesByRole::classify(&listed)?.kubernetes_nodes();
    let targets = select_nodes(cluster, candidates, selected_nodes)?;

    let mut wanted: Vec<(Node, Vec<usize>)> = Vec::new();
    for node in targets {
        let missing: Vec<usize> = ids
            .iter()
            .enumerate()
            .filter(|(_, (image, id))| !node_has_image(&node, image, id))
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            debug!("{node} already has every image");
        } else {
            wanted.push((node, missing));
        }
    }
    if wanted.is_empty() {
        info!("all images already present on the selected nodes");
        return Ok(0);
    }

    let needed: BTreeSet<usize> = wanted.iter().flat_map(|(_, m)| m.iter().copied()).collect();
    let staging = tempfile::tempdir()?;
    let (tx, rx) = mpsc::channel::<(usize, PathBuf)>();
    let saves: Vec<Task<RuntimeError>> = needed
        .iter()
        .map(|&i| -> Task<RuntimeError> {
            let provider = Arc::clone(provider);
            let image = ids[i].0.clone();
            let dest = staging.path().join(format!("image-{i}.tar"));
            let tx = tx.clone();
            Box::new(move || {
                provider.save_image(&image, &dest)?;
                let _ = tx.send((i, dest));
                Ok(())
            })
        })
        .collect();
    drop(tx);
    until_error_within(saves, timeout).map_err(RuntimeError::from)?;
    let archives: BTreeMap<usize, PathBuf> = rx.try_iter().collect();

    let mut imports: Vec<Task<RuntimeError>> = Vec::new();
    for (node, missing) in wanted {
        for i in missing {
            let archive = archives.get(&i).cloned().ok_or_else(|| {
                RuntimeError::ImageNotFound(format!("{} was not saved", ids[i].0))
            })?;
            let node = node.clone();
            imports.push(Box::new(move || import_archive(&node, &archive)));
        }
    }
    let count = imports.len();
    info!("loading {} images into {count} node slots", needed.len());
    until_error_within(imports, timeout).map_err(RuntimeError::from)?;
    Ok(count)
}

fn select_nodes(
    cluster: &str,
    candidates: Vec<Node>,
    selected: &[String],
) -> Result<Vec<Node>, CoreError> {
    if selected.is_empty() {
        return Ok(candidates);
    }
    selected
        .iter()
        .map(|name| {
            candidates
                .iter()
                .find(|n| n.name() == name.as_str())
                .cloned()
                .ok_or_else(|| CoreError::UnknownNode {
                    cluster: cluster.to_owned(),
                    node: name.clone(),
                })
        })
        .collect()
}

fn node_has_image(node: &Node, image: &str, id: &str) -> bool {
    node.command("crictl", ["inspecti", "-o", "jsonpath={.status.id}", image])
        .output_lines()
        .is_ok_and(|lines| lines.first().is_some_and(|l| l.trim() == id))
}

fn import_archive(node: &Node, archive: &Path) -> Result<(), RuntimeError> {
    let file = File::open(archive)?;
    node.command(
        "ctr",
        [
            "--namespace=k8s.io",
            "images",
            "import",
            "--all-platforms",
            "--digests",
            "-",
        ],
    )
    .stdin_reader(Box::new(file))
    .run()?;
    Ok(())
}
