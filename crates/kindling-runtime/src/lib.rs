//! Container engine layer for kindling clusters.
//!
//! Everything that touches the container engine lives here: the `CommandRunner`
//! seam every subprocess goes through, bounded fan-out primitives with
//! cancellation, the shared cluster network with its duplicate-collapsing
//! creation protocol, translation of a `ClusterConfig` into container plans,
//! `Node` handles over running node containers, and the `Provider` trait with
//! docker, podman and nerdctl implementations. `MockEngine` simulates an
//! engine in memory so the rest of the workspace can be tested without one.

pub mod engine;
pub mod exec;
pub mod fanout;
pub mod mock;
pub mod naming;
pub mod network;
pub mod node;
pub mod ports;
pub mod prereq;
pub mod provider;
pub mod provision;
pub mod proxy;

pub use engine::{EngineCli, EngineKind};
pub use exec::{CmdOutput, Cmd, CommandRunner, LocalRunner, Stdin};
pub use fanout::{
    coalesce, coalesce_within, until_error, until_error_within, CancelToken, FanOutError, Task,
    DEFAULT_FANOUT_TIMEOUT,
};
pub use naming::{NodeKind, NodeNamer, CLUSTER_LABEL_KEY, ROLE_LABEL_KEY};
pub use network::{ensure_network, generate_ula_subnet};
pub use node::Node;
pub use prereq::{check_engine_prereqs, format_missing, MissingPrereq};
pub use provider::{detect_provider, select_provider, EngineProvider, Provider};
pub use provision::{plan_creation, ContainerPlan};

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A subprocess exited unsuccessfully.
///
/// Carries the argv and the captured output so callers can match on known
/// engine error text and so the CLI can show it to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub command: Vec<String>,
    /// Captured stdout followed by captured stderr.
    pub output: Vec<u8>,
    pub exit_code: Option<i32>,
}

impl RunError {
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Case-insensitive substring match against the captured output.
    pub fn output_contains(&self, needle: &str) -> bool {
        self.output_str()
            .to_ascii_lowercase()
            .contains(&needle.to_ascii_lowercase())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = exec::pretty_command(&self.command);
        match self.exit_code {
            Some(code) => write!(f, "command \"{command}\" failed with exit code {code}"),
            None => write!(f, "command \"{command}\" was terminated by a signal"),
        }
    }
}

impl std::error::Error for RunError {}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container engine '{0}' is not available on this system")]
    EngineUnavailable(String),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("command cancelled: {0}")]
    Cancelled(String),
    #[error("timed out after {}s waiting for concurrent tasks", .0.as_secs())]
    Timeout(Duration),
    #[error("{} concurrent tasks failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<RuntimeError>),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected output from {what}: {detail}")]
    UnexpectedOutput { what: String, detail: String },
    #[error("failed to decode engine JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}

impl RuntimeError {
    /// The first subprocess failure inside this error, if any.
    pub fn run_error(&self) -> Option<&RunError> {
        match self {
            RuntimeError::Run(e) => Some(e),
            RuntimeError::Aggregate(errors) => errors.iter().find_map(RuntimeError::run_error),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RuntimeError::Cancelled(_))
    }
}

fn join_errors(errors: &[RuntimeError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<FanOutError<RuntimeError>> for RuntimeError {
    fn from(e: FanOutError<RuntimeError>) -> Self {
        match e {
            FanOutError::Timeout(waited) => RuntimeError::Timeout(waited),
            FanOutError::Failed(inner) => inner,
            FanOutError::Aggregate(errors) => RuntimeError::Aggregate(errors),
            FanOutError::Panicked => {
                RuntimeError::ExecFailed("a concurrent task panicked".to_owned())
            }
        }
    }
}
