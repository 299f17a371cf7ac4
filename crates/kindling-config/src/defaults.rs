use crate::types::{ClusterConfig, IpFamily, NodeSpec};

pub const DEFAULT_CLUSTER_NAME: &str = "kind";
pub const DEFAULT_NODE_IMAGE: &str = "kindest/node:v1.27.3";
pub const DEFAULT_KUBE_PROXY_MODE: &str = "iptables";

/// Names longer than this still work but produce unwieldy hostnames.
pub const MAX_CLUSTER_NAME_LEN: usize = 50;

const DEFAULT_POD_SUBNET_V4: &str = "10.244.0.0/16";
const DEFAULT_POD_SUBNET_V6: &str = "fd00:10:244::/56";
const DEFAULT_SERVICE_SUBNET_V4: &str = "10.96.0.0/16";
const DEFAULT_SERVICE_SUBNET_V6: &str = "fd00:10:96::/112";

impl ClusterConfig {
    /// Returns a copy with every unset field filled in.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        set_defaults(&mut self);
        self
    }
}

pub fn set_defaults(cfg: &mut ClusterConfig) {
    if cfg.name.as_deref().unwrap_or_default().is_empty() {
        cfg.name = Some(DEFAULT_CLUSTER_NAME.to_owned());
    }

    if cfg.nodes.is_empty() {
        cfg.nodes.push(NodeSpec::control_plane());
    }
    for node in &mut cfg.nodes {
        if node.image.is_empty() {
            node.image = DEFAULT_NODE_IMAGE.to_owned();
        }
    }

    let net = &mut cfg.networking;
    if net.api_server_address.is_empty() {
        net.api_server_address = match net.ip_family {
            IpFamily::Ipv6 => "::1".to_owned(),
            IpFamily::Ipv4 | IpFamily::Dual => "127.0.0.1".to_owned(),
        };
    }
    if net.pod_subnet.is_empty() {
        net.pod_subnet = match net.ip_family {
            IpFamily::Ipv4 => DEFAULT_POD_SUBNET_V4.to_owned(),
            IpFamily::Ipv6 => DEFAULT_POD_SUBNET_V6.to_owned(),
            IpFamily::Dual => format!("{DEFAULT_POD_SUBNET_V4},{DEFAULT_POD_SUBNET_V6}"),
        };
    }
    if net.service_subnet.is_empty() {
        net.service_subnet = match net.ip_family {
            IpFamily::Ipv4 => DEFAULT_SERVICE_SUBNET_V4.to_owned(),
            IpFamily::Ipv6 => DEFAULT_SERVICE_SUBNET_V6.to_owned(),
            IpFamily::Dual => {
                format!("{DEFAULT_SERVICE_SUBNET_V4},{DEFAULT_SERVICE_SUBNET_V6}")
            }
        };
    }
    if net.kube_proxy_mode.is_empty() {
        net.kube_proxy_mode = DEFAULT_KUBE_PROXY_MODE.to_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRole;

    #[test]
    fn empty_config_gets_single_control_plane() {
        let cfg = ClusterConfig::default().with_defaults();
        assert_eq!(cfg.cluster_name(), DEFAULT_CLUSTER_NAME);
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].role, NodeRole::ControlPlane);
        assert_eq!(cfg.nodes[0].image, DEFAULT_NODE_IMAGE);
        assert_eq!(cfg.networking.api_server_address, "127.0.0.1");
        assert_eq!(cfg.networking.pod_subnet, "10.244.0.0/16");
        assert_eq!(cfg.networking.service_subnet, "10.96.0.0/16");
        assert_eq!(cfg.networking.kube_proxy_mode, "iptables");
    }

    #[test]
    fn ipv6_defaults() {
        let mut cfg = ClusterConfig::default();
        cfg.networking.ip_family = IpFamily::Ipv6;
        let cfg = cfg.with_defaults();
        assert_eq!(cfg.networking.api_server_address, "::1");
        assert_eq!(cfg.networking.pod_subnet, "fd00:10:244::/56");
        assert_eq!(cfg.networking.service_subnet, "fd00:10:96::/112");
    }

    #[test]
    fn dual_stack_defaults_join_both_families() {
        let mut cfg = ClusterConfig::default();
        cfg.networking.ip_family = IpFamily::Dual;
        let cfg = cfg.with_defaults();
        assert_eq!(
            cfg.networking.pod_subnet,
            "10.244.0.0/16,fd00:10:244::/56"
        );
        assert_eq!(
            cfg.networking.service_subnet,
            "10.96.0.0/16,fd00:10:96::/112"
        );
    }

    #[test]
    fn explicit_values_are_kept() {
        let mut cfg = ClusterConfig::default();
        cfg.name = Some("keep".to_owned());
        cfg.nodes.push(NodeSpec {
            image: "custom:v1".to_owned(),
            ..NodeSpec::worker()
        });
        cfg.networking.pod_subnet = "192.168.0.0/16".to_owned();
        let cfg = cfg.with_defaults();
        assert_eq!(cfg.cluster_name(), "keep");
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].image, "custom:v1");
        assert_eq!(cfg.networking.pod_subnet, "192.168.0.0/16");
    }

    #[test]
    fn defaulting_is_idempotent() {
        let once = ClusterConfig::default().with_defaults();
        let twice = once.clone().with_defaults();
        assert_eq!(once, twice);
    }
}
