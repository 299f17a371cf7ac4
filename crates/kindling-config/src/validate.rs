use crate::types::{ClusterConfig, IpFamily, NodeRole, NodeSpec, PatchJson6902};
use crate::ConfigError;
use std::net::IpAddr;

/// Validate a defaulted config. Every problem found is reported at once.
pub fn validate(cfg: &ClusterConfig) -> Result<(), ConfigError> {
    let mut problems = Vec::new();

    validate_name(cfg.cluster_name(), &mut problems);
    validate_networking(cfg, &mut problems);

    if cfg.nodes.iter().all(|n| n.role != NodeRole::ControlPlane) {
        problems.push("must have at least one control-plane node".to_owned());
    }
    validate_patches(
        "",
        &cfg.kubeadm_config_patches,
        &cfg.kubeadm_config_patches_json6902,
        &mut problems,
    );
    for (i, node) in cfg.nodes.iter().enumerate() {
        validate_node(i, node, &mut problems);
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems))
    }
}

fn validate_name(name: &str, problems: &mut Vec<String>) {
    if name.is_empty() {
        problems.push("cluster name must not be empty".to_owned());
        return;
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        problems.push(format!(
            "invalid cluster name '{name}': must match [a-z0-9.-]"
        ));
    }
}

fn validate_networking(cfg: &ClusterConfig, problems: &mut Vec<String>) {
    let net = &cfg.networking;

    if !valid_port(net.api_server_port) {
        problems.push(format!(
            "invalid apiServerPort {}: must be in 0..=65535",
            net.api_server_port
        ));
    }
    if net.api_server_address.parse::<IpAddr>().is_err() {
        problems.push(format!(
            "invalid apiServerAddress '{}'",
            net.api_server_address
        ));
    }

    if let Err(e) = validate_subnets(&net.pod_subnet, net.ip_family) {
        problems.push(format!("invalid podSubnet '{}': {e}", net.pod_subnet));
    }
    if let Err(e) = validate_subnets(&net.service_subnet, net.ip_family) {
        problems.push(format!(
            "invalid serviceSubnet '{}': {e}",
            net.service_subnet
        ));
    }

    if !matches!(net.kube_proxy_mode.as_str(), "iptables" | "ipvs" | "none") {
        problems.push(format!(
            "invalid kubeProxyMode '{}': expected iptables, ipvs or none",
            net.kube_proxy_mode
        ));
    }
}

fn validate_node(index: usize, node: &NodeSpec, problems: &mut Vec<String>) {
    if node.image.trim().is_empty() {
        problems.push(format!("nodes[{index}]: image must not be empty"));
    }
    validate_patches(
        &format!("nodes[{index}]: "),
        &node.kubeadm_config_patches,
        &node.kubeadm_config_patches_json6902,
        problems,
    );
    for mount in &node.extra_mounts {
        if mount.host_path.is_empty() || mount.container_path.is_empty() {
            problems.push(format!(
                "nodes[{index}]: extraMounts entries need hostPath and containerPath"
            ));
        }
    }
    for mapping in &node.extra_port_mappings {
        if !valid_port(mapping.container_port) {
            problems.push(format!(
                "nodes[{index}]: invalid containerPort {}",
                mapping.container_port
            ));
        }
        if !valid_port(mapping.host_port) {
            problems.push(format!(
                "nodes[{index}]: invalid hostPort {}",
                mapping.host_port
            ));
        }
        if !mapping.listen_address.is_empty()
            && mapping.listen_address.parse::<IpAddr>().is_err()
        {
            problems.push(format!(
                "nodes[{index}]: invalid listenAddress '{}'",
                mapping.listen_address
            ));
        }
    }
}

/// Merge patches must be YAML mappings naming the `kind` they target; JSON
/// 6902 patches need a version, a kind and an operation list.
fn validate_patches(
    prefix: &str,
    merge: &[String],
    json6902: &[PatchJson6902],
    problems: &mut Vec<String>,
) {
    for (i, raw) in merge.iter().enumerate() {
        match serde_yaml::from_str::<serde_yaml::Value>(raw) {
            Ok(serde_yaml::Value::Mapping(map)) => {
                let kind = map.get("kind").and_then(serde_yaml::Value::as_str);
                if !kind.is_some_and(|k| !k.is_empty()) {
                    problems.push(format!(
                        "{prefix}kubeadmConfigPatches[{i}]: patch must set kind"
                    ));
                }
            }
            Ok(_) => problems.push(format!(
                "{prefix}kubeadmConfigPatches[{i}]: patch must be a mapping"
            )),
            Err(e) => problems.push(format!(
                "{prefix}kubeadmConfigPatches[{i}]: invalid YAML: {e}"
            )),
        }
    }
    for (i, patch) in json6902.iter().enumerate() {
        if patch.version.is_empty() || patch.kind.is_empty() {
            problems.push(format!(
                "{prefix}kubeadmConfigPatchesJSON6902[{i}]: version and kind are required"
            ));
        }
        if !matches!(
            serde_yaml::from_str::<serde_yaml::Value>(&patch.patch),
            Ok(serde_yaml::Value::Sequence(_))
        ) {
            problems.push(format!(
                "{prefix}kubeadmConfigPatchesJSON6902[{i}]: patch must be a list of operations"
            ));
        }
    }
}

fn valid_port(port: i32) -> bool {
    (0..=65535).contains(&port)
}

fn validate_subnets(value: &str, family: IpFamily) -> Result<(), String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let mut parsed = Vec::with_capacity(parts.len());
    for part in &parts {
        let (addr, _) = parse_cidr(part).ok_or_else(|| format!("'{part}' is not a CIDR"))?;
        parsed.push(addr);
    }

    let v4 = parsed.iter().filter(|a| a.is_ipv4()).count();
    let v6 = parsed.len() - v4;
    match family {
        IpFamily::Ipv4 if parsed.len() == 1 && v4 == 1 => Ok(()),
        IpFamily::Ipv6 if parsed.len() == 1 && v6 == 1 => Ok(()),
        IpFamily::Dual if v4 == 1 && v6 == 1 => Ok(()),
        IpFamily::Dual => Err("dual-stack needs exactly one IPv4 and one IPv6 CIDR".to_owned()),
        _ => Err(format!("expected a single {family} CIDR")),
    }
}

/// Parse `addr/prefix`, checking the prefix fits the address family.
pub fn parse_cidr(s: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = s.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}
