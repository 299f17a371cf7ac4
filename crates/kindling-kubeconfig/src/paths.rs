use std::env;
use std::path::{Path, PathBuf};

pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Kubeconfig files in effect: the explicit path if given, else the
/// deduplicated `KUBECONFIG` list, else `$HOME/.kube/config`.
pub fn paths(explicit: Option<&Path>, getenv: impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        return vec![path.to_path_buf()];
    }

    if let Some(list) = getenv(KUBECONFIG_ENV).filter(|v| !v.is_empty()) {
        let mut out: Vec<PathBuf> = Vec::new();
        for path in env::split_paths(&list).filter(|p| !p.as_os_str().is_empty()) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
        if !out.is_empty() {
            return out;
        }
    }

    vec![home_dir(&getenv).join(".kube").join("config")]
}

/// The file a merge writes to: the first listed file that exists, else the
/// last one listed.
pub fn path_for_merge(
    explicit: Option<&Path>,
    getenv: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    let mut candidates = paths(explicit, getenv);
    if candidates.len() == 1 {
        return candidates.remove(0);
    }
    match candidates.iter().position(|p| p.exists()) {
        Some(i) => candidates.swap_remove(i),
        None => candidates.pop().unwrap_or_default(),
    }
}

fn home_dir(getenv: &impl Fn(&str) -> Option<String>) -> PathBuf {
    getenv("HOME")
        .filter(|h| !h.is_empty())
        .or_else(|| getenv("USERPROFILE").filter(|h| !h.is_empty()))
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
}
