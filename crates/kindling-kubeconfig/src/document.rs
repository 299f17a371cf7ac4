use crate::KubeconfigError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// A kubeconfig document.
///
/// Only the fields kindling reads are typed; everything else is carried in
/// the flattened `other` maps and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preferences: BTreeMap<String, Value>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub clusters: Vec<NamedCluster>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub contexts: Vec<NamedContext>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub users: Vec<NamedUser>,
    #[serde(rename = "current-context", default, skip_serializing_if = "String::is_empty")]
    pub current_context: String,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: BTreeMap<String, Value>,
}

/// kubectl writes `null` for sections it has emptied.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Config {
    pub fn is_empty(&self) -> bool {
        *self == Config::default()
    }

    /// Fill in the type fields every written kubeconfig carries.
    pub fn set_type_meta(&mut self) {
        if self.api_version.is_empty() {
            self.api_version = "v1".to_owned();
        }
        if self.kind.is_empty() {
            self.kind = "Config".to_owned();
        }
    }

    pub fn cluster(&self, name: &str) -> Option<&NamedCluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn context(&self, name: &str) -> Option<&NamedContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn user(&self, name: &str) -> Option<&NamedUser> {
        self.users.iter().find(|u| u.name == name)
    }
}

/// Decode a kubeconfig. Empty input is an empty config.
pub fn parse(bytes: &[u8]) -> Result<Config, KubeconfigError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_slice(bytes)?)
}

/// Encode with every mapping's keys sorted, so equal documents encode to
/// equal bytes regardless of the key order they were read with. An empty
/// config encodes to nothing.
pub fn encode(cfg: &Config) -> Result<Vec<u8>, KubeconfigError> {
    if cfg.is_empty() {
        return Ok(Vec::new());
    }
    let sorted = serde_json::to_value(cfg)?;
    Ok(serde_yaml::to_string(&sorted)?.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN_CONF: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: definitelyacert
    server: https://192.168.9.4:6443
  name: kind-kind
contexts:
- context:
    cluster: kind-kind
    user: kind-kind
  name: kind-kind
current-context: kind-kind
kind: Config
preferences: {}
users:
- name: kind-kind
  user:
    client-certificate-data: seemslegit
    client-key-data: yup
";

    #[test]
    fn encode_round_trip_is_byte_identical() {
        let cfg = parse(ADMIN_CONF.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(encode(&cfg).unwrap()).unwrap(), ADMIN_CONF);
    }

    #[test]
    fn encode_empty_is_empty() {
        assert!(encode(&Config::default()).unwrap().is_empty());
    }

    #[test]
    fn null_sections_parse_as_empty() {
        let cfg = parse(
            b"apiVersion: v1\nkind: Config\npreferences: null\nclusters: null\ncontexts:\nusers:\n- name: kind-kind\n  user: null\ncurrent-context: \"\"\n",
        )
        .unwrap();
        assert!(cfg.preferences.is_empty());
        assert!(cfg.clusters.is_empty());
        assert!(cfg.contexts.is_empty());
        assert_eq!(cfg.users.len(), 1);
        assert!(cfg.users[0].user.is_empty());

        let cfg = parse(b"preferences:\n").unwrap();
        assert!(cfg.is_empty());
    }

    #[test]
    fn parse_empty_input() {
        assert!(parse(b"").unwrap().is_empty());
        assert!(parse(b"\n  \n").unwrap().is_empty());
    }

    #[test]
    fn encode_sorts_keys_read_out_of_order() {
        let shuffled = "users:
- user:
    client-key-data: yup
    client-certificate-data: seemslegit
  name: kind-kind
preferences: {}
kind: Config
current-context: kind-kind
contexts:
- name: kind-kind
  context:
    user: kind-kind
    cluster: kind-kind
clusters:
- name: kind-kind
  cluster:
    server: https://192.168.9.4:6443
    certificate-authority-data: definitelyacert
apiVersion: v1
";
        let cfg = parse(shuffled.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(encode(&cfg).unwrap()).unwrap(), ADMIN_CONF);
    }

    #[test]
    fn unknown_fields_survive() {
        let input = "apiVersion: v1
clusters:
- cluster:
    insecure-skip-tls-verify: true
    server: https://example:443
  name: other
extensions:
- name: x
kind: Config
preferences:
  colors: true
";
        let cfg = parse(input.as_bytes()).unwrap();
        assert!(cfg.other.contains_key("extensions"));
        assert_eq!(String::from_utf8(encode(&cfg).unwrap()).unwrap(), input);
    }

    #[test]
    fn lookup_by_name() {
        let cfg = parse(ADMIN_CONF.as_bytes()).unwrap();
        assert_eq!(
            cfg.cluster("kind-kind").unwrap().cluster.server,
            "https://192.168.9.4:6443"
        );
        assert!(cfg.context("kind-kind").is_some());
        assert!(cfg.user("nobody").is_none());
    }
}
