use super::{Action, ActionContext};
use crate::lifecycle::Phase;
use crate::CoreError;
use kindling_config::IpFamily;
use kindling_runtime::naming::API_SERVER_PORT;
use kindling_runtime::ports::join_host_port;
use std::fmt::Write as _;
use tracing::debug;

/// Where the haproxy image reads its config.
pub const HAPROXY_CONFIG_PATH: &str = "/usr/local/etc/haproxy/haproxy.cfg";

/// One API server behind the load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub name: String,
    pub address: String,
}

/// Render the haproxy config fronting `backends` on the API server port.
pub fn haproxy_config(backends: &[Backend], ip_family: IpFamily) -> String {
    let mut cfg = String::from(
        "global
  log /dev/log local0
  log /dev/log local1 notice
  daemon

resolvers docker
  nameserver dns 127.0.0.11:53

defaults
  log global
  mode tcp
  option dontlognull
  timeout connect 5000
  timeout client 50000
  timeout server 50000
  default-server init-addr none

frontend control-plane
",
    );
    let _ = writeln!(cfg, "  bind *:{API_SERVER_PORT}");
    if ip_family != IpFamily::Ipv4 {
        let _ = writeln!(cfg, "  bind :::{API_SERVER_PORT}");
    }
    cfg.push_str(
        "  default_backend kube-apiservers

backend kube-apiservers
  option httpchk GET /healthz
",
    );
    let prefer = match ip_family {
        IpFamily::Ipv6 => "ipv6",
        IpFamily::Ipv4 | IpFamily::Dual => "ipv4",
    };
    for backend in backends {
        let _ = writeln!(
            cfg,
            "  server {} {} check check-ssl verify none resolvers docker resolve-prefer {prefer}",
            backend.name, backend.address
        );
    }
    cfg
}

/// Points the external load balancer at every control-plane node and
/// reloads it.
pub struct ConfigureLoadBalancer;

impl Action for ConfigureLoadBalancer {
    fn phase(&self) -> Phase {
        Phase::LoadBalancer
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), CoreError> {
        let nodes = ctx.nodes()?;
        let Some(lb) = &nodes.load_balancer else {
            debug!("cluster {} has no external load balancer", ctx.cluster);
            return Ok(());
        };

        let backends: Vec<Backend> = nodes
            .control_planes
            .iter()
            .map(|node| Backend {
                name: node.name().to_owned(),
                address: join_host_port(node.name(), API_SERVER_PORT),
            })
            .collect();
        let cfg = haproxy_config(&backends, ctx.config.networking.ip_family);
        lb.write_file(HAPROXY_CONFIG_PATH, cfg.as_bytes())?;
        lb.command("kill", ["-s", "HUP", "1"]).run()?;
        Ok(())
    }
}
