//! The shared cluster network.
//!
//! Engines offer no atomic "create if absent", and several kindling processes
//! may create clusters on the same network at once. Creation is therefore
//! reconciled after the fact: whoever observes more than one network with
//! the name deletes all but a deterministically chosen survivor, so every
//! caller converges on the same instance.

use crate::engine::{EngineCli, EngineKind};
use crate::RuntimeError;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use tracing::{debug, info, warn};

pub const DEFAULT_NETWORK_NAME: &str = "kind";

const MAX_SUBNET_ATTEMPTS: i32 = 5;

/// Network name for `kind`, honouring the engine's override variable.
pub fn network_name(kind: EngineKind, lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(kind.network_env_var())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_NETWORK_NAME.to_owned())
}

/// Make sure exactly one network called `name` exists.
pub fn ensure_network(engine: &EngineCli, name: &str) -> Result<(), RuntimeError> {
    if network_exists(engine, name)? {
        debug!("network {name} already exists");
        return Ok(());
    }

    let subnet = generate_ula_subnet(name, 0);
    let err = match create_network(engine, name, Some(&subnet)) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if output_matches(&err, engine.kind().ipv6_unavailable_markers()) {
        warn!("IPv6 bridge networks are unavailable, creating {name} without an IPv6 subnet");
        return create_network(engine, name, None);
    }
    if !is_pool_overlap(engine.kind(), &err) {
        return Err(err);
    }

    for attempt in 1..MAX_SUBNET_ATTEMPTS {
        // The overlap may be a concurrent creator that already won.
        if network_exists(engine, name)? {
            return Ok(());
        }
        let subnet = generate_ula_subnet(name, attempt);
        debug!("subnet overlap, retrying network {name} with {subnet}");
        match create_network(engine, name, Some(&subnet)) {
            Ok(()) => return Ok(()),
            Err(e) if is_pool_overlap(engine.kind(), &e) => {}
            Err(e) => return Err(e),
        }
    }

    Err(RuntimeError::Network(format!(
        "exhausted attempts trying to find a non-overlapping subnet for network {name}"
    )))
}

/// Deterministic IPv6 ULA `/64` for a network name and probe attempt.
pub fn generate_ula_subnet(name: &str, attempt: i32) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&attempt.to_le_bytes());
    let digest = hasher.finalize();

    let mut ip = [0u8; 16];
    ip[0] = 0xfc;
    ip[1] = 0x00;
    ip[2..8].copy_from_slice(&digest.as_bytes()[..6]);
    format!("{}/64", Ipv6Addr::from(ip))
}

fn create_network(
    engine: &EngineCli,
    name: &str,
    ipv6_subnet: Option<&str>,
) -> Result<(), RuntimeError> {
    let mut args = vec!["network".to_owned(), "create".to_owned(), "-d=bridge".to_owned()];
    if engine.kind() == EngineKind::Docker {
        args.push("-o".to_owned());
        args.push("com.docker.network.bridge.enable_ip_masquerade=true".to_owned());
    }
    if let Some(subnet) = ipv6_subnet {
        args.push("--ipv6".to_owned());
        args.push("--subnet".to_owned());
        args.push(subnet.to_owned());
    }
    args.push(name.to_owned());

    match engine.run(args) {
        Ok(_) => info!("created network {name}"),
        // Lost the race to a concurrent creator; reconcile below.
        Err(e) if output_matches(&e, &["already exists"]) => {
            debug!("network {name} was created concurrently");
        }
        Err(e) => return Err(e),
    }
    collapse_duplicates(engine, name)?;
    Ok(())
}

fn network_exists(engine: &EngineCli, name: &str) -> Result<bool, RuntimeError> {
    Ok(collapse_duplicates(engine, name)? > 0)
}

#[derive(Debug, Clone, Deserialize)]
struct NetworkInspect {
    #[serde(rename = "Name", alias = "name")]
    name: String,
    #[serde(rename = "Id", alias = "ID", alias = "id")]
    id: String,
    #[serde(rename = "Created", alias = "created", default)]
    created: String,
    #[serde(rename = "Containers", alias = "containers", default)]
    containers: Option<HashMap<String, serde_json::Value>>,
}

impl NetworkInspect {
    fn container_count(&self) -> usize {
        self.containers.as_ref().map_or(0, HashMap::len)
    }

    fn created_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.created).ok()
    }
}

/// Survivor order: most attached containers first (those cannot be removed),
/// then oldest, then lowest ID.
fn sort_survivor_first(networks: &mut [NetworkInspect]) {
    networks.sort_by(|a, b| {
        b.container_count()
            .cmp(&a.container_count())
            .then_with(|| match (a.created_at(), b.created_at()) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Remove every network called `name` except the survivor. Returns how many
/// networks with that name were seen.
fn collapse_duplicates(engine: &EngineCli, name: &str) -> Result<usize, RuntimeError> {
    let mut networks = list_networks(engine, name)?;
    let seen = networks.len();
    if seen <= 1 {
        return Ok(seen);
    }

    sort_survivor_first(&mut networks);
    debug!(
        "found {seen} networks named {name}, keeping {}",
        networks[0].id
    );
    for dup in &networks[1..] {
        match engine.run(["network", "rm", dup.id.as_str()]) {
            Ok(_) => debug!("removed duplicate network {}", dup.id),
            Err(e) if is_no_such_network(&e) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(seen)
}

fn list_networks(engine: &EngineCli, name: &str) -> Result<Vec<NetworkInspect>, RuntimeError> {
    let ids = engine.output_lines([
        "network".to_owned(),
        "ls".to_owned(),
        format!("--filter=name=^{name}$"),
        "--format={{.ID}}".to_owned(),
    ])?;

    let mut networks = Vec::new();
    for id in ids.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        // A concurrent caller may delete it between ls and inspect.
        let out = match engine.run(["network", "inspect", id]) {
            Ok(out) => out,
            Err(e) if is_no_such_network(&e) => continue,
            Err(e) => return Err(e),
        };
        let parsed: Vec<NetworkInspect> = serde_json::from_slice(&out.stdout)?;
        networks.extend(parsed.into_iter().filter(|n| n.name == name));
    }
    Ok(networks)
}

fn output_matches(err: &RuntimeError, markers: &[&str]) -> bool {
    err.run_error()
        .is_some_and(|run| markers.iter().any(|m| run.output_contains(m)))
}

fn is_pool_overlap(kind: EngineKind, err: &RuntimeError) -> bool {
    output_matches(err, kind.pool_overlap_markers())
}

fn is_no_such_network(err: &RuntimeError) -> bool {
    output_matches(err, &["no such network", "network not found", "not found"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspect(id: &str, created: &str, containers: usize) -> NetworkInspect {
        NetworkInspect {
            name: "kind".to_owned(),
            id: id.to_owned(),
            created: created.to_owned(),
            containers: Some(
                (0..containers)
                    .map(|i| (format!("c{i}"), serde_json::Value::Null))
                    .collect(),
            ),
        }
    }

    #[test]
    fn ula_subnet_is_deterministic() {
        assert_eq!(generate_ula_subnet("kind", 0), generate_ula_subnet("kind", 0));
        assert_eq!(generate_ula_subnet("kind", 3), generate_ula_subnet("kind", 3));
    }

    #[test]
    fn ula_subnet_varies_with_attempt_and_name() {
        let subnets: std::collections::HashSet<String> =
            (0..MAX_SUBNET_ATTEMPTS).map(|a| generate_ula_subnet("kind", a)).collect();
        assert_eq!(subnets.len(), MAX_SUBNET_ATTEMPTS as usize);
        assert_ne!(generate_ula_subnet("kind", 0), generate_ula_subnet("other", 0));
    }

    #[test]
    fn ula_subnet_shape() {
        let subnet = generate_ula_subnet("kind", 0);
        assert!(subnet.starts_with("fc00:"), "{subnet}");
        assert!(subnet.ends_with("::/64"), "{subnet}");
        let (addr, prefix) = subnet.split_once('/').unwrap();
        assert_eq!(prefix, "64");
        let parsed: Ipv6Addr = addr.parse().unwrap();
        assert_eq!(parsed.segments()[4..], [0, 0, 0, 0]);
    }

    #[test]
    fn survivor_prefers_attached_containers() {
        let mut nets = vec![
            inspect("aaa", "2023-01-01T00:00:00Z", 0),
            inspect("bbb", "2023-06-01T00:00:00Z", 2),
        ];
        sort_survivor_first(&mut nets);
        assert_eq!(nets[0].id, "bbb");
    }

    #[test]
    fn survivor_then_oldest_then_lowest_id() {
        let mut nets = vec![
            inspect("ccc", "2023-06-01T00:00:00.5Z", 0),
            inspect("bbb", "2023-06-01T00:00:00.1Z", 0),
            inspect("aaa", "2023-06-01T00:00:00.1Z", 0),
        ];
        sort_survivor_first(&mut nets);
        let ids: Vec<&str> = nets.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "bbb", "ccc"]);
    }

    #[test]
    fn unparseable_created_sorts_last() {
        let mut nets = vec![
            inspect("aaa", "garbage", 0),
            inspect("zzz", "2023-06-01T00:00:00Z", 0),
        ];
        sort_survivor_first(&mut nets);
        assert_eq!(nets[0].id, "zzz");
    }

    #[test]
    fn inspect_json_accepts_podman_casing() {
        let docker: Vec<NetworkInspect> = serde_json::from_str(
            r#"[{"Name":"kind","Id":"abc","Created":"2023-06-01T00:00:00Z","Containers":{}}]"#,
        )
        .unwrap();
        assert_eq!(docker[0].id, "abc");
        let podman: Vec<NetworkInspect> =
            serde_json::from_str(r#"[{"name":"kind","id":"def","created":"2023-06-01T00:00:00Z"}]"#)
                .unwrap();
        assert_eq!(podman[0].id, "def");
        assert_eq!(podman[0].container_count(), 0);
    }

    #[test]
    fn network_name_override() {
        assert_eq!(network_name(EngineKind::Docker, |_| None), "kind");
        assert_eq!(
            network_name(EngineKind::Docker, |k| {
                (k == "KIND_EXPERIMENTAL_DOCKER_NETWORK").then(|| "ci-net".to_owned())
            }),
            "ci-net"
        );
    }
}
