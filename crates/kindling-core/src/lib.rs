//! Cluster orchestration for kindling.
//!
//! This crate drives a `Provider` through the full life of a cluster: it
//! validates the config, provisions node containers, runs the bootstrap
//! action pipeline (load balancer, kubeadm config, init, CNI, storage,
//! joins, readiness) with rollback on failure, and merges the resulting
//! credentials into the user's kubeconfig. It also deletes clusters, exports
//! kubeconfigs and logs, and side-loads images into running nodes.

pub mod actions;
pub mod concurrency;
pub mod create;
pub mod delete;
pub mod kubeconfig;
pub mod lifecycle;
pub mod load;
pub mod logs;
pub mod patch;
pub mod status;

pub use concurrency::{install_signal_handler, shutdown_requested};
pub use create::{create_cluster, CreateOptions, Created};
pub use delete::{delete_all_clusters, delete_cluster};
pub use kubeconfig::{export_kubeconfig, get_kubeconfig};
pub use lifecycle::{validate_transition, ActionState, Phase};
pub use load::{load_images, load_images_within, DEFAULT_LOAD_TIMEOUT};
pub use logs::export_logs;
pub use status::{LogStatus, Status};

use kindling_runtime::{RunError, RuntimeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] kindling_config::ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kindling_kubeconfig::KubeconfigError),
    #[error("failed while {phase}: {source}")]
    Bootstrap {
        phase: Phase,
        #[source]
        source: Box<CoreError>,
    },
    #[error("interrupted before {0}")]
    Interrupted(Phase),
    #[error("node(s) already exist for a cluster with the name \"{0}\"")]
    ClusterExists(String),
    #[error("no nodes found for cluster \"{0}\"")]
    ClusterNotFound(String),
    #[error("unknown node \"{node}\" in cluster \"{cluster}\"")]
    UnknownNode { cluster: String, node: String },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("unrecognized Kubernetes version \"{0}\"")]
    InvalidVersion(String),
    #[error("failed to apply kubeadm config patch: {0}")]
    Patch(String),
    #[error("failed to encode kubeadm config: {0}")]
    Encode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{} operations failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<CoreError>),
}

impl CoreError {
    pub(crate) fn in_phase(phase: Phase, source: impl Into<CoreError>) -> Self {
        CoreError::Bootstrap {
            phase,
            source: Box::new(source.into()),
        }
    }

    /// The first failed subprocess behind this error, with its captured output.
    pub fn run_error(&self) -> Option<&RunError> {
        match self {
            CoreError::Runtime(e) => e.run_error(),
            CoreError::Bootstrap { source, .. } => source.run_error(),
            CoreError::Aggregate(errors) => errors.iter().find_map(CoreError::run_error),
            _ => None,
        }
    }

    /// The bootstrap phase that failed, if the error came from the pipeline.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            CoreError::Bootstrap { phase, .. } | CoreError::Interrupted(phase) => Some(*phase),
            _ => None,
        }
    }

    pub fn is_config_error(&self) -> bool {
        match self {
            CoreError::Config(_) => true,
            CoreError::Bootstrap { source, .. } => source.is_config_error(),
            _ => false,
        }
    }
}

fn join_errors(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The process environment, as the kubeconfig path helpers expect it.
pub(crate) fn getenv(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_error() -> RunError {
        RunError {
            command: vec!["docker".to_owned(), "exec".to_owned()],
            output: b"kubeadm exploded".to_vec(),
            exit_code: Some(1),
        }
    }

    #[test]
    fn run_error_found_through_bootstrap_wrapper() {
        let err = CoreError::in_phase(
            Phase::KubeadmInit,
            RuntimeError::Run(run_error()),
        );
        assert_eq!(err.phase(), Some(Phase::KubeadmInit));
        assert_eq!(err.run_error().unwrap().output_str(), "kubeadm exploded");
    }

    #[test]
    fn bootstrap_error_names_phase() {
        let err = CoreError::in_phase(
            Phase::KubeadmJoin,
            CoreError::ClusterNotFound("kind".to_owned()),
        );
        assert_eq!(
            err.to_string(),
            "failed while joining nodes: no nodes found for cluster \"kind\""
        );
    }

    #[test]
    fn aggregate_without_run_error() {
        let err = CoreError::Aggregate(vec![CoreError::ClusterNotFound("a".to_owned())]);
        assert!(err.run_error().is_none());
        assert!(err.phase().is_none());
    }

    #[test]
    fn config_error_detected_inside_bootstrap() {
        let err = CoreError::in_phase(
            Phase::Provision,
            kindling_config::ConfigError::Invalid(vec!["bad".to_owned()]),
        );
        assert!(err.is_config_error());
    }
}
