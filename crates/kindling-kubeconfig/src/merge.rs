use crate::document::{parse, Config};
use crate::KubeconfigError;

/// The name a cluster's entries carry in every kubeconfig list.
pub fn kind_cluster_key(cluster: &str) -> String {
    format!("kind-{cluster}")
}

/// Turn a kubeadm `admin.conf` into the entry kindling merges: one cluster,
/// context and user, all named `kind-<cluster>`. A non-empty `server`
/// replaces the API server address kubeadm wrote.
pub fn kind_from_raw_kubeadm(
    raw: &[u8],
    cluster: &str,
    server: &str,
) -> Result<Config, KubeconfigError> {
    let mut cfg = parse(raw)?;
    check_single_entry(&cfg)?;

    let key = kind_cluster_key(cluster);
    cfg.clusters[0].name.clone_from(&key);
    if !server.is_empty() {
        cfg.clusters[0].cluster.server = server.to_owned();
    }
    cfg.users[0].name.clone_from(&key);
    cfg.contexts[0].name.clone_from(&key);
    cfg.contexts[0].context.cluster.clone_from(&key);
    cfg.contexts[0].context.user.clone_from(&key);
    cfg.current_context = key;
    Ok(cfg)
}

fn check_single_entry(cfg: &Config) -> Result<(), KubeconfigError> {
    let counts = [
        ("clusters", cfg.clusters.len()),
        ("contexts", cfg.contexts.len()),
        ("users", cfg.users.len()),
    ];
    for (what, count) in counts {
        if count != 1 {
            return Err(KubeconfigError::InvalidKindConfig(format!(
                "expected exactly one entry in {what}, found {count}"
            )));
        }
    }
    Ok(())
}

/// Merge a single-entry `kind` config into `existing`.
///
/// Entries whose name matches are replaced where they stand, others are
/// appended. Unrelated entries keep their position. The current context
/// becomes the merged one.
pub fn merge(existing: &mut Config, kind: &Config) -> Result<(), KubeconfigError> {
    check_single_entry(kind)?;

    upsert(&mut existing.clusters, &kind.clusters[0], |c| &c.name);
    upsert(&mut existing.contexts, &kind.contexts[0], |c| &c.name);
    upsert(&mut existing.users, &kind.users[0], |u| &u.name);
    existing.current_context.clone_from(&kind.contexts[0].name);
    existing.set_type_meta();
    Ok(())
}

fn upsert<T: Clone>(entries: &mut Vec<T>, entry: &T, name: impl Fn(&T) -> &String) {
    match entries.iter().position(|e| name(e) == name(entry)) {
        Some(i) => entries[i] = entry.clone(),
        None => entries.push(entry.clone()),
    }
}

/// Drop the entries named `key`. Returns whether anything changed.
pub fn remove(existing: &mut Config, key: &str) -> bool {
    let before = (
        existing.clusters.len(),
        existing.contexts.len(),
        existing.users.len(),
    );
    existing.clusters.retain(|c| c.name != key);
    existing.contexts.retain(|c| c.name != key);
    existing.users.retain(|u| u.name != key);
    let mut modified = before
        != (
            existing.clusters.len(),
            existing.contexts.len(),
            existing.users.len(),
        );

    if existing.current_context == key {
        existing.current_context.clear();
        modified = true;
    }
    modified
}
