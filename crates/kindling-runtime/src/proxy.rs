use crate::engine::{EngineCli, EngineKind};
use kindling_config::ClusterConfig;
use std::collections::BTreeMap;
use tracing::debug;

pub const HTTP_PROXY: &str = "HTTP_PROXY";
pub const HTTPS_PROXY: &str = "HTTPS_PROXY";
pub const NO_PROXY: &str = "NO_PROXY";

const PROXY_VARS: [&str; 3] = [HTTP_PROXY, HTTPS_PROXY, NO_PROXY];

/// Proxy variables to pass to node containers, in both letter cases.
///
/// Values come from `lookup` (upper case wins over lower case). When none are
/// set, `fallback` supplies them. If any proxy is configured, the cluster's
/// service and pod subnets are appended to `NO_PROXY` so in-cluster traffic
/// bypasses it.
pub fn proxy_env<L, F>(cfg: &ClusterConfig, lookup: L, fallback: F) -> BTreeMap<String, String>
where
    L: Fn(&str) -> Option<String>,
    F: FnOnce() -> BTreeMap<String, String>,
{
    let mut found = BTreeMap::new();
    for key in PROXY_VARS {
        let value = lookup(key)
            .filter(|v| !v.is_empty())
            .or_else(|| lookup(&key.to_ascii_lowercase()).filter(|v| !v.is_empty()));
        if let Some(value) = value {
            found.insert(key.to_owned(), value);
        }
    }
    if found.is_empty() {
        found = fallback()
            .into_iter()
            .filter(|(k, v)| PROXY_VARS.contains(&k.as_str()) && !v.is_empty())
            .collect();
    }
    if found.is_empty() {
        return BTreeMap::new();
    }

    let subnets = [
        cfg.networking.service_subnet.as_str(),
        cfg.networking.pod_subnet.as_str(),
    ];
    let no_proxy = found
        .get(NO_PROXY)
        .map(String::as_str)
        .into_iter()
        .chain(subnets)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    found.insert(NO_PROXY.to_owned(), no_proxy);

    let mut env = BTreeMap::new();
    for (key, value) in found {
        env.insert(key.to_ascii_lowercase(), value.clone());
        env.insert(key, value);
    }
    env
}

/// Proxy settings the engine daemon itself was configured with.
pub fn engine_proxy_env(engine: &EngineCli) -> BTreeMap<String, String> {
    if engine.kind() != EngineKind::Docker {
        return BTreeMap::new();
    }
    let format = "HTTP_PROXY={{.HTTPProxy}}\nHTTPS_PROXY={{.HTTPSProxy}}\nNO_PROXY={{.NoProxy}}";
    match engine.output_lines(["info", "--format", format]) {
        Ok(lines) => parse_env_lines(&lines),
        Err(e) => {
            debug!("could not read engine proxy settings: {e}");
            BTreeMap::new()
        }
    }
}

fn parse_env_lines(lines: &[String]) -> BTreeMap<String, String> {
    lines
        .iter()
        .filter_map(|line| line.split_once('='))
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect()
}

/// `-e KEY=VALUE` flags for the engine `run` command.
pub fn env_args(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter()
        .flat_map(|(k, v)| ["-e".to_owned(), format!("{k}={v}")])
        .collect()
}
