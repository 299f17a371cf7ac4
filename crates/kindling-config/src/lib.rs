//! Cluster configuration for kindling.
//!
//! This crate defines the declarative `ClusterConfig` (nodes, roles, mounts,
//! port mappings, networking), parses it from YAML or TOML files in the
//! kind `v1alpha4` shape, fills in defaults, and validates the result. All
//! validation problems are collected into a single `ConfigError::Invalid`
//! so callers see every issue before any side effect happens.

pub mod cluster;
pub mod defaults;
pub mod types;
pub mod validate;

pub use cluster::{parse_config_file, parse_config_str, ConfigFormat};
pub use defaults::{
    DEFAULT_CLUSTER_NAME, DEFAULT_KUBE_PROXY_MODE, DEFAULT_NODE_IMAGE, MAX_CLUSTER_NAME_LEN,
};
pub use types::{
    ClusterConfig, IpFamily, Mount, MountPropagation, Networking, NodeRole, NodeSpec,
    PatchJson6902, PortMapping, PortProtocol,
};
pub use validate::{parse_cidr, validate};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read cluster config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse cluster config: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("failed to parse cluster config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported cluster config format '{0}', expected .yaml, .yml or .toml")]
    UnknownFormat(String),
    #[error("unsupported config kind '{0}', expected 'Cluster'")]
    UnsupportedKind(String),
    #[error("unsupported config apiVersion '{0}', expected 'kind.x-k8s.io/v1alpha4'")]
    UnsupportedApiVersion(String),
    #[error("invalid cluster config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// Individual validation problems, empty for parse and I/O failures.
    pub fn problems(&self) -> &[String] {
        match self {
            ConfigError::Invalid(problems) => problems,
            _ => &[],
        }
    }
}
