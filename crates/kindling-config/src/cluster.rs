use crate::types::ClusterConfig;
use crate::ConfigError;
use std::fs;
use std::path::Path;

const EXPECTED_KIND: &str = "Cluster";
const EXPECTED_API_VERSION: &str = "kind.x-k8s.io/v1alpha4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "toml" => Ok(ConfigFormat::Toml),
            _ => Err(ConfigError::UnknownFormat(path.display().to_string())),
        }
    }
}

pub fn parse_config_str(content: &str, format: ConfigFormat) -> Result<ClusterConfig, ConfigError> {
    let cfg: ClusterConfig = match format {
        // An empty YAML document is a valid "all defaults" config.
        ConfigFormat::Yaml if content.trim().is_empty() => ClusterConfig::default(),
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        ConfigFormat::Toml => toml::from_str(content)?,
    };
    check_type_meta(&cfg)?;
    Ok(cfg)
}

pub fn parse_config_file(path: &Path) -> Result<ClusterConfig, ConfigError> {
    let format = ConfigFormat::from_path(path)?;
    let content = fs::read_to_string(path)?;
    parse_config_str(&content, format)
}

fn check_type_meta(cfg: &ClusterConfig) -> Result<(), ConfigError> {
    if let Some(kind) = &cfg.kind {
        if kind != EXPECTED_KIND {
            return Err(ConfigError::UnsupportedKind(kind.clone()));
        }
    }
    if let Some(api_version) = &cfg.api_version {
        if api_version != EXPECTED_API_VERSION {
            return Err(ConfigError::UnsupportedApiVersion(api_version.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IpFamily, MountPropagation, NodeRole, PortProtocol};

    #[test]
    fn parse_full_yaml_config() {
        let cfg = parse_config_str(
            r"
kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
name: dev
nodes:
- role: control-plane
  extraPortMappings:
  - containerPort: 80
    hostPort: 8080
    protocol: UDP
- role: worker
  image: kindest/node:v1.26.6
  extraMounts:
  - hostPath: ./data
    containerPath: /data
    readOnly: true
    propagation: HostToContainer
networking:
  ipFamily: dual
  apiServerPort: 6443
  disableDefaultCNI: true
",
            ConfigFormat::Yaml,
        )
        .unwrap();

        assert_eq!(cfg.name.as_deref(), Some("dev"));
        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.nodes[0].role, NodeRole::ControlPlane);
        assert_eq!(cfg.nodes[0].extra_port_mappings[0].host_port, 8080);
        assert_eq!(
            cfg.nodes[0].extra_port_mappings[0].protocol,
            PortProtocol::Udp
        );
        assert_eq!(cfg.nodes[1].image, "kindest/node:v1.26.6");
        assert!(cfg.nodes[1].extra_mounts[0].read_only);
        assert_eq!(
            cfg.nodes[1].extra_mounts[0].propagation,
            MountPropagation::HostToContainer
        );
        assert_eq!(cfg.networking.ip_family, IpFamily::Dual);
        assert_eq!(cfg.networking.api_server_port, 6443);
        assert!(cfg.networking.disable_default_cni);
    }

    #[test]
    fn parse_kubeadm_patches() {
        let cfg = parse_config_str(
            r#"
kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
kubeadmConfigPatches:
- |
  kind: ClusterConfiguration
  apiServer:
    extraArgs:
      enable-admission-plugins: NodeRestriction
nodes:
- role: control-plane
  kubeadmConfigPatchesJSON6902:
  - group: kubeadm.k8s.io
    version: v1beta3
    kind: InitConfiguration
    patch: |
      - op: add
        path: /nodeRegistration/kubeletExtraArgs/node-labels
        value: "ingress-ready=true"
"#,
            ConfigFormat::Yaml,
        )
        .unwrap();

        assert_eq!(cfg.kubeadm_config_patches.len(), 1);
        assert!(cfg.kubeadm_config_patches[0].starts_with("kind: ClusterConfiguration\n"));
        let node_patch = &cfg.nodes[0].kubeadm_config_patches_json6902[0];
        assert_eq!(node_patch.api_version(), "kubeadm.k8s.io/v1beta3");
        assert_eq!(node_patch.kind, "InitConfiguration");
        assert!(node_patch.patch.contains("node-labels"));
    }

    #[test]
    fn parse_toml_config() {
        let cfg = parse_config_str(
            r#"
name = "ci"

[[nodes]]
role = "control-plane"

[[nodes]]
role = "worker"

[networking]
ipFamily = "ipv6"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(cfg.cluster_name(), "ci");
        assert_eq!(cfg.worker_count(), 1);
        assert_eq!(cfg.networking.ip_family, IpFamily::Ipv6);
    }

    #[test]
    fn empty_yaml_is_default_config() {
        let cfg = parse_config_str("  \n", ConfigFormat::Yaml).unwrap();
        assert_eq!(cfg, ClusterConfig::default());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = parse_config_str("nodes:\n- role: etcd\n", ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml(_)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = parse_config_str("nodez: []\n", ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml(_)));
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let err = parse_config_str("kind: Pod\n", ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedKind(k) if k == "Pod"));
    }

    #[test]
    fn wrong_api_version_is_rejected() {
        let err = parse_config_str("apiVersion: kind.x-k8s.io/v1alpha3\n", ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedApiVersion(_)));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("c.yml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("c.TOML")).unwrap(),
            ConfigFormat::Toml
        );
        assert!(ConfigFormat::from_path(Path::new("c.json")).is_err());
    }

    #[test]
    fn parse_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        fs::write(&path, "name: disk\nnodes:\n- role: control-plane\n").unwrap();
        let cfg = parse_config_file(&path).unwrap();
        assert_eq!(cfg.cluster_name(), "disk");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_config_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
