use crate::engine::{EngineCli, EngineKind};
use crate::fanout::Task;
use crate::naming::{
    NodeKind, NodeNamer, API_SERVER_PORT, CLUSTER_LABEL_KEY, LOAD_BALANCER_IMAGE, ROLE_LABEL_KEY,
};
use crate::ports::{join_host_port, port_or_free};
use crate::proxy::env_args;
use crate::RuntimeError;
use kindling_config::{
    ClusterConfig, IpFamily, Mount, MountPropagation, NodeRole, PortMapping, PortProtocol,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// One container to create, fully resolved except for random host ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPlan {
    pub name: String,
    pub kind: NodeKind,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub port_mappings: Vec<PortMapping>,
    /// Host port requested for the API server, zero meaning random.
    pub api_server_port: Option<i32>,
    engine: EngineKind,
    ip_family: IpFamily,
    common_args: Vec<String>,
}

/// Arguments shared by every container in the cluster.
pub fn common_args(
    cluster: &str,
    cfg: &ClusterConfig,
    network: &str,
    proxy_env: &BTreeMap<String, String>,
    storage_driver: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "--detach".to_owned(),
        "--tty".to_owned(),
        "--label".to_owned(),
        format!("{CLUSTER_LABEL_KEY}={cluster}"),
        "--net".to_owned(),
        network.to_owned(),
        // Come back after a host reboot, but do not mask a node that keeps dying.
        "--restart=on-failure:1".to_owned(),
    ];
    if matches!(cfg.networking.ip_family, IpFamily::Ipv6 | IpFamily::Dual) {
        args.push("--sysctl=net.ipv6.conf.all.disable_ipv6=0".to_owned());
        args.push("--sysctl=net.ipv6.conf.all.forwarding=1".to_owned());
    }
    args.extend(env_args(proxy_env));
    if matches!(storage_driver, Some("btrfs" | "zfs")) {
        args.push("--volume".to_owned());
        args.push("/dev/mapper:/dev/mapper".to_owned());
    }
    args
}

/// Translate a defaulted config into the containers to create: the load
/// balancer first when one is needed, then nodes in config order.
pub fn plan_creation(
    cluster: &str,
    cfg: &ClusterConfig,
    engine: EngineKind,
    common_args: &[String],
) -> Result<Vec<ContainerPlan>, RuntimeError> {
    let mut namer = NodeNamer::new(cluster);
    let mut plans = Vec::with_capacity(cfg.nodes.len() + 1);
    let family = cfg.networking.ip_family;

    let with_lb = cfg.has_implicit_load_balancer();
    if with_lb {
        plans.push(ContainerPlan {
            name: namer.next(NodeKind::ExternalLoadBalancer),
            kind: NodeKind::ExternalLoadBalancer,
            image: LOAD_BALANCER_IMAGE.to_owned(),
            mounts: Vec::new(),
            port_mappings: vec![api_server_mapping(
                &cfg.networking.api_server_address,
                cfg.networking.api_server_port,
            )],
            api_server_port: Some(cfg.networking.api_server_port),
            engine,
            ip_family: family,
            common_args: common_args.to_vec(),
        });
    }

    for node in &cfg.nodes {
        let kind = NodeKind::from(node.role);
        let mut port_mappings = node.extra_port_mappings.clone();
        let api_server_port = if node.role == NodeRole::ControlPlane {
            // Behind a load balancer only the balancer needs a stable port.
            let (address, port) = if with_lb {
                (loopback(family).to_owned(), 0)
            } else {
                (
                    cfg.networking.api_server_address.clone(),
                    cfg.networking.api_server_port,
                )
            };
            port_mappings.push(api_server_mapping(&address, port));
            Some(port)
        } else {
            None
        };

        plans.push(ContainerPlan {
            name: namer.next(kind),
            kind,
            image: node.image.clone(),
            mounts: absolute_mounts(&node.extra_mounts)?,
            port_mappings,
            api_server_port,
            engine,
            ip_family: family,
            common_args: common_args.to_vec(),
        });
    }
    Ok(plans)
}

impl ContainerPlan {
    /// Full `run` argv (without the engine binary). Random host ports are
    /// picked here, so call it right before creating the container.
    pub fn run_args(&self) -> Result<Vec<String>, RuntimeError> {
        let mut args = vec![
            "run".to_owned(),
            "--hostname".to_owned(),
            self.name.clone(),
            "--name".to_owned(),
            self.name.clone(),
            "--label".to_owned(),
            format!("{ROLE_LABEL_KEY}={}", self.kind),
        ];
        if self.kind != NodeKind::ExternalLoadBalancer {
            args.extend(node_container_args(self.engine, &self.name));
        }
        args.extend(self.common_args.iter().cloned());
        args.extend(self.mounts.iter().map(mount_arg));
        for mapping in &self.port_mappings {
            args.push(publish_arg(mapping, self.ip_family)?);
        }
        args.push(self.image.clone());
        Ok(args)
    }

    pub fn into_task(self, engine: EngineCli) -> Task<RuntimeError> {
        Box::new(move || {
            let args = self.run_args()?;
            engine.run(args)?;
            debug!("created container {}", self.name);
            Ok(())
        })
    }
}

fn api_server_mapping(listen_address: &str, host_port: i32) -> PortMapping {
    PortMapping {
        container_port: i32::from(API_SERVER_PORT),
        host_port,
        listen_address: listen_address.to_owned(),
        protocol: PortProtocol::Tcp,
    }
}

fn loopback(family: IpFamily) -> &'static str {
    match family {
        IpFamily::Ipv6 => "::1",
        IpFamily::Ipv4 | IpFamily::Dual => "127.0.0.1",
    }
}

fn node_container_args(engine: EngineKind, name: &str) -> Vec<String> {
    let mut args: Vec<String> = vec!["--privileged".to_owned()];
    match engine {
        EngineKind::Docker | EngineKind::Nerdctl => {
            args.extend(
                [
                    "--security-opt",
                    "seccomp=unconfined",
                    "--security-opt",
                    "apparmor=unconfined",
                    "--tmpfs",
                    "/tmp",
                    "--tmpfs",
                    "/run",
                    "--volume",
                    "/var",
                    "--volume",
                    "/lib/modules:/lib/modules:ro",
                ]
                .map(str::to_owned),
            );
        }
        EngineKind::Podman => {
            args.extend(["--tmpfs", "/tmp", "--tmpfs", "/run", "--volume"].map(str::to_owned));
            args.push(format!("{name}:/var:suid,exec,dev"));
            args.extend(
                [
                    "--volume",
                    "/lib/modules:/lib/modules:ro",
                    "--device",
                    "/dev/fuse",
                ]
                .map(str::to_owned),
            );
        }
    }
    args
}

fn absolute_mounts(mounts: &[Mount]) -> Result<Vec<Mount>, RuntimeError> {
    mounts
        .iter()
        .map(|m| {
            let mut m = m.clone();
            if Path::new(&m.host_path).is_relative() {
                m.host_path = std::env::current_dir()?
                    .join(&m.host_path)
                    .to_string_lossy()
                    .into_owned();
            }
            Ok(m)
        })
        .collect()
}

fn mount_arg(mount: &Mount) -> String {
    let mut opts = Vec::new();
    if mount.read_only {
        opts.push("ro");
    }
    if mount.selinux_relabel {
        opts.push("Z");
    }
    match mount.propagation {
        MountPropagation::None => {}
        MountPropagation::HostToContainer => opts.push("rslave"),
        MountPropagation::Bidirectional => opts.push("rshared"),
    }
    let mut arg = format!("--volume={}:{}", mount.host_path, mount.container_path);
    if !opts.is_empty() {
        arg.push(':');
        arg.push_str(&opts.join(","));
    }
    arg
}

fn publish_arg(mapping: &PortMapping, family: IpFamily) -> Result<String, RuntimeError> {
    let listen = if mapping.listen_address.is_empty() {
        match family {
            IpFamily::Ipv6 => "::",
            IpFamily::Ipv4 | IpFamily::Dual => "0.0.0.0",
        }
    } else {
        mapping.listen_address.as_str()
    };
    let host_port = port_or_free(mapping.host_port, listen)?;
    Ok(format!(
        "--publish={}:{}/{}",
        join_host_port(listen, host_port),
        mapping.container_port,
        mapping.protocol.as_engine_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindling_config::NodeSpec;

    fn ha_config() -> ClusterConfig {
        let mut cfg = ClusterConfig {
            name: Some("ha".to_owned()),
            nodes: vec![
                NodeSpec::control_plane(),
                NodeSpec::control_plane(),
                NodeSpec::control_plane(),
                NodeSpec::worker(),
                NodeSpec::worker(),
            ],
            ..ClusterConfig::default()
        };
        cfg.networking.api_server_port = 6443;
        cfg.with_defaults()
    }

    #[test]
    fn ha_plan_puts_load_balancer_first_with_fixed_port() {
        let cfg = ha_config();
        let plans = plan_creation("ha", &cfg, EngineKind::Docker, &[]).unwrap();
        let names: Vec<&str> = plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ha-external-load-balancer",
                "ha-control-plane",
                "ha-control-plane2",
                "ha-control-plane3",
                "ha-worker",
                "ha-worker2",
            ]
        );

        assert_eq!(plans[0].kind, NodeKind::ExternalLoadBalancer);
        assert_eq!(plans[0].api_server_port, Some(6443));
        assert_eq!(plans[0].port_mappings[0].host_port, 6443);
        assert_eq!(plans[0].port_mappings[0].container_port, 6443);

        for cp in &plans[1..4] {
            assert_eq!(cp.api_server_port, Some(0));
            let api = cp.port_mappings.last().unwrap();
            assert_eq!(api.host_port, 0);
            assert_eq!(api.listen_address, "127.0.0.1");
        }
        for worker in &plans[4..] {
            assert_eq!(worker.api_server_port, None);
            assert!(worker.port_mappings.is_empty());
        }
    }

    #[test]
    fn single_control_plane_gets_configured_port() {
        let mut cfg = ClusterConfig::default();
        cfg.networking.api_server_port = 7443;
        let cfg = cfg.with_defaults();
        let plans = plan_creation("solo", &cfg, EngineKind::Docker, &[]).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].name, "solo-control-plane");
        assert_eq!(plans[0].api_server_port, Some(7443));
    }

    #[test]
    fn node_run_args_shape() {
        let mut cfg = ClusterConfig::default().with_defaults();
        cfg.nodes[0].extra_mounts.push(Mount {
            host_path: "/srv/data".to_owned(),
            container_path: "/data".to_owned(),
            read_only: true,
            selinux_relabel: false,
            propagation: MountPropagation::Bidirectional,
        });
        cfg.nodes[0].extra_port_mappings.push(PortMapping {
            container_port: 80,
            host_port: 8080,
            listen_address: String::new(),
            protocol: PortProtocol::Udp,
        });
        cfg.networking.api_server_port = 6443;
        let common = common_args("c", &cfg, "kind", &BTreeMap::new(), None);
        let plans = plan_creation("c", &cfg, EngineKind::Docker, &common).unwrap();
        let args = plans[0].run_args().unwrap();

        assert_eq!(&args[..5], &["run", "--hostname", "c-control-plane", "--name", "c-control-plane"]);
        assert!(args.contains(&"io.x-k8s.kind.role=control-plane".to_owned()));
        assert!(args.contains(&"io.x-k8s.kind.cluster=c".to_owned()));
        assert!(args.contains(&"--privileged".to_owned()));
        assert!(args.contains(&"--restart=on-failure:1".to_owned()));
        assert!(args.contains(&"--volume=/srv/data:/data:ro,rshared".to_owned()));
        assert!(args.contains(&"--publish=0.0.0.0:8080:80/udp".to_owned()));
        assert!(args.contains(&"--publish=127.0.0.1:6443:6443/tcp".to_owned()));
        assert_eq!(args.last().unwrap(), kindling_config::DEFAULT_NODE_IMAGE);
    }

    #[test]
    fn load_balancer_is_not_privileged() {
        let cfg = ha_config();
        let plans = plan_creation("ha", &cfg, EngineKind::Docker, &[]).unwrap();
        let args = plans[0].run_args().unwrap();
        assert!(!args.contains(&"--privileged".to_owned()));
        assert_eq!(args.last().unwrap(), LOAD_BALANCER_IMAGE);
    }

    #[test]
    fn random_ports_resolved_at_run_time() {
        let cfg = ha_config();
        let plans = plan_creation("ha", &cfg, EngineKind::Docker, &[]).unwrap();
        let args = plans[1].run_args().unwrap();
        let publish = args
            .iter()
            .find(|a| a.starts_with("--publish=127.0.0.1:"))
            .unwrap();
        assert!(!publish.starts_with("--publish=127.0.0.1:0:"), "{publish}");
    }

    #[test]
    fn relative_mounts_become_absolute() {
        let mounts = absolute_mounts(&[Mount {
            host_path: "rel/dir".to_owned(),
            container_path: "/x".to_owned(),
            ..Mount::default()
        }])
        .unwrap();
        assert!(Path::new(&mounts[0].host_path).is_absolute());
        assert!(mounts[0].host_path.ends_with("rel/dir"));
    }

    #[test]
    fn ipv6_common_args_and_listen_default() {
        let mut cfg = ClusterConfig::default();
        cfg.networking.ip_family = IpFamily::Ipv6;
        let cfg = cfg.with_defaults();
        let common = common_args("v6", &cfg, "kind", &BTreeMap::new(), Some("btrfs"));
        assert!(common.contains(&"--sysctl=net.ipv6.conf.all.disable_ipv6=0".to_owned()));
        assert!(common.contains(&"/dev/mapper:/dev/mapper".to_owned()));

        let arg = publish_arg(
            &PortMapping {
                container_port: 80,
                host_port: 8080,
                ..PortMapping::default()
            },
            IpFamily::Ipv6,
        )
        .unwrap();
        assert_eq!(arg, "--publish=[::]:8080:80/tcp");
    }

    #[test]
    fn podman_nodes_get_named_var_volume() {
        let args = node_container_args(EngineKind::Podman, "p-worker");
        assert!(args.contains(&"p-worker:/var:suid,exec,dev".to_owned()));
        assert!(!args.contains(&"seccomp=unconfined".to_owned()));
    }
}
