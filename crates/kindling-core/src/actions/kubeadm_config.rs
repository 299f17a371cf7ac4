use super::{parse_kube_version, Action, ActionContext, KUBEADM_CONFIG_PATH};
use crate::lifecycle::Phase;
use crate::patch::{self, KubeadmPatches};
use crate::CoreError;
use kindling_config::{ClusterConfig, IpFamily};
use kindling_runtime::naming::{NodeNamer, API_SERVER_PORT};
use kindling_runtime::node::Node;
use kindling_runtime::ports::join_host_port;
use kindling_runtime::{until_error, RuntimeError, Task};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Bootstrap token shared by every node of a cluster. Clusters are local and
/// short-lived, so a fixed value is enough.
pub const BOOTSTRAP_TOKEN: &str = "abcdef.0123456789abcdef";

const CRI_SOCKET: &str = "unix:///run/containerd/containerd.sock";

/// Inputs for one node's kubeadm config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeadmConfigData {
    pub cluster: String,
    pub provider: String,
    pub node_name: String,
    pub kubernetes_version: String,
    /// `host:port` every node reaches the API server through.
    pub control_plane_endpoint: String,
    pub advertise_address: String,
    /// Extra SAN so the host-side address is accepted by the serving cert.
    pub api_server_address: String,
    pub pod_subnet: String,
    pub service_subnet: String,
    pub kube_proxy_mode: String,
    pub ip_family: IpFamily,
    /// Joins as a control-plane member rather than as a worker.
    pub control_plane: bool,
    /// Applied in order: cluster-wide first, then the node's own.
    pub patches: Vec<KubeadmPatches>,
}

/// kubeadm API group version for a Kubernetes minor release.
pub fn kubeadm_api_version(minor: u32) -> &'static str {
    if minor < 23 {
        "kubeadm.k8s.io/v1beta2"
    } else {
        "kubeadm.k8s.io/v1beta3"
    }
}

type Args<'a> = BTreeMap<&'static str, &'a str>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterConfiguration<'a> {
    api_version: &'a str,
    kind: &'static str,
    api_server: ApiServer<'a>,
    cluster_name: &'a str,
    control_plane_endpoint: &'a str,
    controller_manager: ExtraArgs<'a>,
    kubernetes_version: &'a str,
    networking: ClusterNetworking<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiServer<'a> {
    #[serde(rename = "certSANs")]
    cert_sans: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtraArgs<'a> {
    extra_args: Args<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterNetworking<'a> {
    pod_subnet: &'a str,
    service_subnet: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitConfiguration<'a> {
    api_version: &'a str,
    kind: &'static str,
    bootstrap_tokens: Vec<BootstrapToken>,
    #[serde(rename = "localAPIEndpoint")]
    local_api_endpoint: ApiEndpoint<'a>,
    node_registration: NodeRegistration<'a>,
}

#[derive(Serialize)]
struct BootstrapToken {
    token: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiEndpoint<'a> {
    advertise_address: &'a str,
    bind_port: u16,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeRegistration<'a> {
    cri_socket: &'static str,
    kubelet_extra_args: Args<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinConfiguration<'a> {
    api_version: &'a str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    control_plane: Option<JoinControlPlane<'a>>,
    node_registration: NodeRegistration<'a>,
    discovery: Discovery<'a>,
}

#[derive(Serialize)]
struct JoinControlPlane<'a> {
    #[serde(rename = "localAPIEndpoint")]
    local_api_endpoint: ApiEndpoint<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Discovery<'a> {
    bootstrap_token: DiscoveryToken<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryToken<'a> {
    api_server_endpoint: &'a str,
    token: &'static str,
    unsafe_skip_ca_verification: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KubeletConfiguration {
    api_version: &'static str,
    kind: &'static str,
    cgroup_driver: &'static str,
    fail_swap_on: bool,
    #[serde(rename = "imageGCHighThresholdPercent")]
    image_gc_high_threshold_percent: u8,
    eviction_hard: BTreeMap<&'static str, &'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KubeProxyConfiguration<'a> {
    api_version: &'static str,
    kind: &'static str,
    mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address: Option<&'static str>,
}

fn to_value(doc: &impl Serialize) -> Result<serde_json::Value, CoreError> {
    serde_json::to_value(doc).map_err(|e| CoreError::Encode(e.to_string()))
}

/// The kubeadm, kubelet and kube-proxy documents for one node, unpatched.
pub fn documents(data: &KubeadmConfigData) -> Result<Vec<serde_json::Value>, CoreError> {
    let (_, minor) = parse_kube_version(&data.kubernetes_version)?;
    let api_version = kubeadm_api_version(minor);
    let node_ip = data.advertise_address.as_str();
    let provider_id = format!(
        "kind://{}/{}/{}",
        data.provider, data.cluster, data.node_name
    );
    let provider_id = provider_id.as_str();
    let node_registration = || NodeRegistration {
        cri_socket: CRI_SOCKET,
        kubelet_extra_args: Args::from([
            ("node-ip", node_ip),
            ("provider-id", provider_id),
            ("fail-swap-on", "false"),
        ]),
    };
    let endpoint = || ApiEndpoint {
        advertise_address: node_ip,
        bind_port: API_SERVER_PORT,
    };

    Ok(vec![
        to_value(&ClusterConfiguration {
            api_version,
            kind: "ClusterConfiguration",
            api_server: ApiServer {
                cert_sans: vec!["localhost", data.api_server_address.as_str()],
            },
            cluster_name: &data.cluster,
            control_plane_endpoint: &data.control_plane_endpoint,
            controller_manager: ExtraArgs {
                extra_args: Args::from([("enable-hostpath-provisioner", "true")]),
            },
            kubernetes_version: &data.kubernetes_version,
            networking: ClusterNetworking {
                pod_subnet: &data.pod_subnet,
                service_subnet: &data.service_subnet,
            },
        })?,
        to_value(&InitConfiguration {
            api_version,
            kind: "InitConfiguration",
            bootstrap_tokens: vec![BootstrapToken {
                token: BOOTSTRAP_TOKEN,
            }],
            local_api_endpoint: endpoint(),
            node_registration: node_registration(),
        })?,
        to_value(&JoinConfiguration {
            api_version,
            kind: "JoinConfiguration",
            control_plane: data.control_plane.then(|| JoinControlPlane {
                local_api_endpoint: endpoint(),
            }),
            node_registration: node_registration(),
            discovery: Discovery {
                bootstrap_token: DiscoveryToken {
                    api_server_endpoint: &data.control_plane_endpoint,
                    token: BOOTSTRAP_TOKEN,
                    unsafe_skip_ca_verification: true,
                },
            },
        })?,
        to_value(&KubeletConfiguration {
            api_version: "kubelet.config.k8s.io/v1beta1",
            kind: "KubeletConfiguration",
            cgroup_driver: "systemd",
            fail_swap_on: false,
            image_gc_high_threshold_percent: 100,
            eviction_hard: BTreeMap::from([
                ("nodefs.available", "0%"),
                ("nodefs.inodesFree", "0%"),
                ("imagefs.available", "0%"),
            ]),
        })?,
        to_value(&KubeProxyConfiguration {
            api_version: "kubeproxy.config.k8s.io/v1alpha1",
            kind: "KubeProxyConfiguration",
            mode: &data.kube_proxy_mode,
            bind_address: (data.ip_family == IpFamily::Ipv6).then_some("::"),
        })?,
    ])
}

/// Render the multi-document kubeadm config for one node, patches applied.
pub fn render(data: &KubeadmConfigData) -> Result<String, CoreError> {
    let mut docs = documents(data)?;
    for layer in &data.patches {
        patch::apply(&mut docs, layer)?;
    }
    let mut out = Vec::with_capacity(docs.len());
    for doc in &docs {
        out.push(serde_yaml::to_string(doc).map_err(|e| CoreError::Encode(e.to_string()))?);
    }
    Ok(out.join("---\n"))
}

/// Patch layers for every node container of `cfg`: the cluster-wide layer,
/// then the layer of the config entry the container was created from.
pub fn patches_by_node(cluster: &str, cfg: &ClusterConfig) -> HashMap<String, Vec<KubeadmPatches>> {
    let shared = KubeadmPatches {
        merge: cfg.kubeadm_config_patches.clone(),
        json6902: cfg.kubeadm_config_patches_json6902.clone(),
    };
    let mut namer = NodeNamer::new(cluster);
    cfg.nodes
        .iter()
        .map(|spec| {
            let own = KubeadmPatches {
                merge: spec.kubeadm_config_patches.clone(),
                json6902: spec.kubeadm_config_patches_json6902.clone(),
            };
            let layers = [shared.clone(), own]
                .into_iter()
                .filter(|layer| !layer.is_empty())
                .collect();
            (namer.next(spec.role.into()), layers)
        })
        .collect()
}

/// Writes `/kind/kubeadm.conf` to every Kubernetes node concurrently.
pub struct WriteKubeadmConfig;

impl Action for WriteKubeadmConfig {
    fn phase(&self) -> Phase {
        Phase::KubeadmConfig
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), CoreError> {
        let nodes = ctx.nodes()?;
        let bootstrap = nodes.bootstrap_control_plane()?;
        let kubernetes_version = bootstrap.kubernetes_version()?;
        parse_kube_version(&kubernetes_version)?;

        let endpoint_node = nodes.load_balancer.as_ref().unwrap_or(bootstrap);
        let control_plane_endpoint = join_host_port(endpoint_node.name(), API_SERVER_PORT);
        let net = &ctx.config.networking;
        let mut patches = patches_by_node(ctx.cluster, ctx.config);

        let mut tasks: Vec<Task<RuntimeError>> = Vec::new();
        for (node, control_plane) in nodes
            .control_planes
            .iter()
            .map(|n| (n, true))
            .chain(nodes.workers.iter().map(|n| (n, false)))
        {
            let mut data = KubeadmConfigData {
                cluster: ctx.cluster.to_owned(),
                provider: ctx.provider.name().to_owned(),
                node_name: node.name().to_owned(),
                kubernetes_version: kubernetes_version.clone(),
                control_plane_endpoint: control_plane_endpoint.clone(),
                advertise_address: String::new(),
                api_server_address: net.api_server_address.clone(),
                pod_subnet: net.pod_subnet.clone(),
                service_subnet: net.service_subnet.clone(),
                kube_proxy_mode: net.kube_proxy_mode.clone(),
                ip_family: net.ip_family,
                control_plane,
                patches: patches.remove(node.name()).unwrap_or_default(),
            };
            let node = node.clone();
            tasks.push(Box::new(move || write_node_config(&node, &mut data)));
        }
        until_error(tasks).map_err(RuntimeError::from)?;
        Ok(())
    }
}

fn write_node_config(node: &Node, data: &mut KubeadmConfigData) -> Result<(), RuntimeError> {
    let (v4, v6) = node.ip()?;
    data.advertise_address = match data.ip_family {
        IpFamily::Ipv6 => v6,
        IpFamily::Ipv4 | IpFamily::Dual => v4,
    };
    let rendered = render(data).map_err(|e| RuntimeError::ExecFailed(e.to_string()))?;
    node.write_file(KUBEADM_CONFIG_PATH, rendered.as_bytes())
}
