use kindling_config::NodeRole;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Label carrying the cluster name on every container kindling creates.
pub const CLUSTER_LABEL_KEY: &str = "io.x-k8s.kind.cluster";
/// Label carrying the node role on every container kindling creates.
pub const ROLE_LABEL_KEY: &str = "io.x-k8s.kind.role";

pub const LOAD_BALANCER_IMAGE: &str = "kindest/haproxy:v20230606-42a2262b";
pub const API_SERVER_PORT: u16 = 6443;

/// What a provisioned container is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    ControlPlane,
    Worker,
    ExternalLoadBalancer,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::ControlPlane => "control-plane",
            NodeKind::Worker => "worker",
            NodeKind::ExternalLoadBalancer => "external-load-balancer",
        }
    }
}

impl From<NodeRole> for NodeKind {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::ControlPlane => NodeKind::ControlPlane,
            NodeRole::Worker => NodeKind::Worker,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "control-plane" => Ok(NodeKind::ControlPlane),
            "worker" => Ok(NodeKind::Worker),
            "external-load-balancer" => Ok(NodeKind::ExternalLoadBalancer),
            other => Err(format!("unknown node role '{other}'")),
        }
    }
}

/// Hands out `<cluster>-<role>`, then `<cluster>-<role>2`, `<cluster>-<role>3`, ...
#[derive(Debug)]
pub struct NodeNamer {
    cluster: String,
    counters: HashMap<NodeKind, u32>,
}

impl NodeNamer {
    pub fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_owned(),
            counters: HashMap::new(),
        }
    }

    pub fn next(&mut self, kind: NodeKind) -> String {
        let count = self.counters.entry(kind).or_insert(0);
        *count += 1;
        if *count == 1 {
            format!("{}-{}", self.cluster, kind)
        } else {
            format!("{}-{}{}", self.cluster, kind, count)
        }
    }
}

/// Sort key that orders `x-worker`, `x-worker2`, ..., `x-worker10` by ordinal.
pub fn ordinal_sort_key(name: &str) -> (&str, u32) {
    let prefix = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let ordinal = name[prefix.len()..].parse().unwrap_or(1);
    (prefix, ordinal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namer_numbers_per_role() {
        let mut namer = NodeNamer::new("ab1");
        let names: Vec<String> = [
            NodeKind::ControlPlane,
            NodeKind::ControlPlane,
            NodeKind::ControlPlane,
            NodeKind::ExternalLoadBalancer,
            NodeKind::Worker,
            NodeKind::Worker,
            NodeKind::Worker,
        ]
        .into_iter()
        .map(|k| namer.next(k))
        .collect();
        assert_eq!(
            names,
            vec![
                "ab1-control-plane",
                "ab1-control-plane2",
                "ab1-control-plane3",
                "ab1-external-load-balancer",
                "ab1-worker",
                "ab1-worker2",
                "ab1-worker3",
            ]
        );
    }

    #[test]
    fn namer_interleaved_roles() {
        let mut namer = NodeNamer::new("kind");
        assert_eq!(namer.next(NodeKind::Worker), "kind-worker");
        assert_eq!(namer.next(NodeKind::ControlPlane), "kind-control-plane");
        assert_eq!(namer.next(NodeKind::Worker), "kind-worker2");
    }

    #[test]
    fn node_kind_parses_labels() {
        assert_eq!(
            "external-load-balancer\n".parse::<NodeKind>().unwrap(),
            NodeKind::ExternalLoadBalancer
        );
        assert!("etcd".parse::<NodeKind>().is_err());
    }

    #[test]
    fn ordinal_sort_handles_double_digits() {
        let mut names = vec!["c-worker10", "c-worker2", "c-worker", "c-worker3"];
        names.sort_by(|a, b| ordinal_sort_key(a).cmp(&ordinal_sort_key(b)));
        assert_eq!(names, vec!["c-worker", "c-worker2", "c-worker3", "c-worker10"]);
    }
}
