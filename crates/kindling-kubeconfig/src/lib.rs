//! Kubeconfig handling for kindling clusters.
//!
//! Every cluster owns one `kind-<name>` entry in each of the `clusters`,
//! `contexts` and `users` lists of the user's kubeconfig. This crate turns the
//! kubeadm `admin.conf` of a bootstrap node into such an entry, merges it into
//! (or removes it from) a kubeconfig file that other tools may be writing at
//! the same time, and encodes the result with sorted keys so repeated merges
//! of the same content produce identical bytes. File updates hold a
//! best-effort `<path>.lock` and replace the file atomically.

pub mod document;
pub mod file;
pub mod lock;
pub mod merge;
pub mod paths;

pub use document::{
    encode, parse, ClusterEntry, Config, ContextEntry, NamedCluster, NamedContext, NamedUser,
};
pub use file::{merge_file, read_file, remove_file, write_file};
pub use lock::LockGuard;
pub use merge::{kind_cluster_key, kind_from_raw_kubeadm, merge, remove};
pub use paths::{path_for_merge, paths};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KubeconfigError {
    #[error("kubeconfig I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse kubeconfig {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("failed to decode kubeconfig: {0}")]
    Decode(#[from] serde_yaml::Error),
    #[error("failed to encode kubeconfig: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid kind kubeconfig: {0}")]
    InvalidKindConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_kind_config() {
        let e = KubeconfigError::InvalidKindConfig("expected exactly one cluster".to_owned());
        assert!(e.to_string().contains("exactly one cluster"));
    }

    #[test]
    fn error_display_parse_has_path() {
        let source = serde_yaml::from_str::<Config>("clusters: [").unwrap_err();
        let e = KubeconfigError::Parse {
            path: PathBuf::from("/home/u/.kube/config"),
            source,
        };
        assert!(e.to_string().contains("/home/u/.kube/config"));
    }
}
