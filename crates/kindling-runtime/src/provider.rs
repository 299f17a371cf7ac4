use crate::engine::{EngineCli, EngineKind};
use crate::exec::CommandRunner;
use crate::fanout::{coalesce, until_error, Task};
use crate::naming::{API_SERVER_PORT, CLUSTER_LABEL_KEY, LOAD_BALANCER_IMAGE};
use crate::network::{ensure_network, network_name};
use crate::node::{sort_nodes, Node, NodesByRole, KUBE_VERSION_PATH};
use crate::ports::join_host_port;
use crate::provision::{common_args, plan_creation};
use crate::proxy::{engine_proxy_env, proxy_env};
use crate::RuntimeError;
use kindling_config::ClusterConfig;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Selects the engine instead of auto-detection.
pub const PROVIDER_ENV_VAR: &str = "KIND_EXPERIMENTAL_PROVIDER";

const PULL_ATTEMPTS: u32 = 4;

/// Reads an environment variable. Swappable so tests control the environment.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn process_env() -> EnvLookup {
    Arc::new(|key| std::env::var(key).ok())
}

/// Everything the cluster lifecycle needs from a container engine.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Make sure every image the cluster needs is present locally.
    fn ensure_images(&self, cfg: &ClusterConfig) -> Result<(), RuntimeError>;

    /// Create the network and every container of the cluster.
    fn provision(&self, cluster: &str, cfg: &ClusterConfig) -> Result<(), RuntimeError>;

    /// Names of all clusters with at least one container.
    fn list_clusters(&self) -> Result<Vec<String>, RuntimeError>;

    fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>, RuntimeError>;

    fn delete_nodes(&self, nodes: &[Node]) -> Result<(), RuntimeError>;

    /// API server address reachable from the host.
    fn api_server_endpoint(&self, cluster: &str) -> Result<String, RuntimeError>;

    /// API server address reachable from inside the cluster network.
    fn api_server_internal_endpoint(&self, cluster: &str) -> Result<String, RuntimeError>;

    fn collect_logs(&self, dir: &Path, nodes: &[Node]) -> Result<(), RuntimeError>;

    fn image_id(&self, image: &str) -> Result<String, RuntimeError>;

    /// Write `image` as an archive to `dest`.
    fn save_image(&self, image: &str, dest: &Path) -> Result<(), RuntimeError>;
}

/// A provider backed by a docker-compatible CLI.
pub struct EngineProvider {
    engine: EngineCli,
    env: EnvLookup,
}

impl EngineProvider {
    pub fn new(kind: EngineKind, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            engine: EngineCli::new(kind, runner),
            env: process_env(),
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn engine(&self) -> &EngineCli {
        &self.engine
    }

    fn lookup(&self, key: &str) -> Option<String> {
        (self.env)(key)
    }

    fn image_present(&self, image: &str) -> bool {
        self.engine.run(["image", "inspect", image]).is_ok()
    }

    fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let mut attempt = 1;
        loop {
            match self.engine.run(["pull", image]) {
                Ok(_) => return Ok(()),
                Err(e) if attempt < PULL_ATTEMPTS => {
                    warn!("pulling {image} failed (attempt {attempt}/{PULL_ATTEMPTS}): {e}");
                    thread::sleep(Duration::from_secs(u64::from(attempt)));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn storage_driver(&self) -> Option<String> {
        let format = match self.engine.kind() {
            EngineKind::Podman => "{{.Store.GraphDriverName}}",
            EngineKind::Docker | EngineKind::Nerdctl => "{{.Driver}}",
        };
        match self.engine.output_lines(["info", "--format", format]) {
            Ok(lines) => lines.into_iter().next().map(|l| l.trim().to_owned()),
            Err(e) => {
                debug!("could not read storage driver: {e}");
                None
            }
        }
    }

    fn classify(&self, cluster: &str) -> Result<NodesByRole, RuntimeError> {
        let nodes = self.list_nodes(cluster)?;
        if nodes.is_empty() {
            return Err(RuntimeError::NodeNotFound(format!(
                "no nodes found for cluster \"{cluster}\""
            )));
        }
        NodesByRole::classify(&nodes)
    }

    fn published_api_port(&self, node: &Node) -> Result<(String, String), RuntimeError> {
        let format = format!(
            "--format={{{{ with (index (index .NetworkSettings.Ports \"{API_SERVER_PORT}/tcp\") 0) }}}}{{{{ printf \"%s\\t%s\" .HostIp .HostPort }}}}{{{{ end }}}}"
        );
        let lines = self
            .engine
            .output_lines(["inspect".to_owned(), format, node.name().to_owned()])?;
        let line = lines.first().map(|l| l.trim()).unwrap_or_default();
        let (host, port) = line
            .split_once('\t')
            .ok_or_else(|| RuntimeError::UnexpectedOutput {
                what: format!("API server port lookup on {node}"),
                detail: line.to_owned(),
            })?;
        Ok((host.trim().to_owned(), port.trim().to_owned()))
    }
}

impl Provider for EngineProvider {
    fn name(&self) -> &str {
        self.engine.kind().binary()
    }

    fn available(&self) -> bool {
        self.engine.available()
    }

    fn ensure_images(&self, cfg: &ClusterConfig) -> Result<(), RuntimeError> {
        let mut images: BTreeSet<&str> = cfg.nodes.iter().map(|n| n.image.as_str()).collect();
        if cfg.has_implicit_load_balancer() {
            images.insert(LOAD_BALANCER_IMAGE);
        }
        for image in images {
            if self.image_present(image) {
                debug!("image {image} already present");
                continue;
            }
            info!("pulling image {image}");
            self.pull(image)?;
        }
        Ok(())
    }

    fn provision(&self, cluster: &str, cfg: &ClusterConfig) -> Result<(), RuntimeError> {
        let kind = self.engine.kind();
        let network = network_name(kind, |k| self.lookup(k));
        ensure_network(&self.engine, &network)?;

        let proxy = proxy_env(cfg, |k| self.lookup(k), || engine_proxy_env(&self.engine));
        let driver = self.storage_driver();
        let common = common_args(cluster, cfg, &network, &proxy, driver.as_deref());

        let plans = plan_creation(cluster, cfg, kind, &common)?;
        info!("creating {} containers for cluster {cluster}", plans.len());
        let tasks: Vec<Task<RuntimeError>> = plans
            .into_iter()
            .map(|plan| plan.into_task(self.engine.clone()))
            .collect();
        until_error(tasks)?;
        Ok(())
    }

    fn list_clusters(&self) -> Result<Vec<String>, RuntimeError> {
        let lines = self.engine.output_lines([
            "ps".to_owned(),
            "-a".to_owned(),
            "--filter".to_owned(),
            format!("label={CLUSTER_LABEL_KEY}"),
            format!("--format={{{{.Label \"{CLUSTER_LABEL_KEY}\"}}}}"),
        ])?;
        let clusters: BTreeSet<String> = lines
            .into_iter()
            .map(|l| l.trim().to_owned())
            .filter(|l| !l.is_empty())
            .collect();
        Ok(clusters.into_iter().collect())
    }

    fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>, RuntimeError> {
        let lines = self.engine.output_lines([
            "ps".to_owned(),
            "-a".to_owned(),
            "--filter".to_owned(),
            format!("label={CLUSTER_LABEL_KEY}={cluster}"),
            "--format={{.Names}}".to_owned(),
        ])?;
        let mut nodes: Vec<Node> = lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(|name| Node::new(name, self.engine.clone()))
            .collect();
        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    fn delete_nodes(&self, nodes: &[Node]) -> Result<(), RuntimeError> {
        if nodes.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = nodes.iter().map(|n| n.name().to_owned()).collect();
        let mut args = vec!["rm".to_owned(), "-f".to_owned(), "-v".to_owned()];
        args.extend(names.iter().cloned());
        self.engine.run(args)?;

        if self.engine.kind() == EngineKind::Podman {
            // Node /var lives in a named volume that rm -v leaves behind.
            let mut args = vec!["volume".to_owned(), "rm".to_owned(), "-f".to_owned()];
            args.extend(names);
            if let Err(e) = self.engine.run(args) {
                debug!("removing node volumes: {e}");
            }
        }
        Ok(())
    }

    fn api_server_endpoint(&self, cluster: &str) -> Result<String, RuntimeError> {
        let by_role = self.classify(cluster)?;
        let node = match &by_role.load_balancer {
            Some(lb) => lb,
            None => by_role.bootstrap_control_plane()?,
        };
        let (host, port) = self.published_api_port(node)?;
        let host = match host.as_str() {
            "" | "0.0.0.0" => "127.0.0.1",
            "::" => "::1",
            other => other,
        };
        Ok(join_host_port(host, port))
    }

    fn api_server_internal_endpoint(&self, cluster: &str) -> Result<String, RuntimeError> {
        let by_role = self.classify(cluster)?;
        let node = match &by_role.load_balancer {
            Some(lb) => lb,
            None => by_role.bootstrap_control_plane()?,
        };
        Ok(join_host_port(node.name(), API_SERVER_PORT))
    }

    fn collect_logs(&self, dir: &Path, nodes: &[Node]) -> Result<(), RuntimeError> {
        fs::create_dir_all(dir)?;
        let info = self.engine.run(["info"])?;
        fs::write(dir.join(format!("{}-info.txt", self.name())), info.combined())?;

        let mut tasks: Vec<Task<RuntimeError>> = Vec::new();
        for node in nodes {
            let node_dir = dir.join(node.name());
            fs::create_dir_all(&node_dir)?;
            tasks.extend(node_log_tasks(node, &node_dir));
        }
        coalesce(tasks)?;
        Ok(())
    }

    fn image_id(&self, image: &str) -> Result<String, RuntimeError> {
        let lines = match self.engine.output_lines(["image", "inspect", "-f", "{{ .Id }}", image])
        {
            Ok(lines) => lines,
            Err(e) if e.run_error().is_some() => {
                return Err(RuntimeError::ImageNotFound(image.to_owned()))
            }
            Err(e) => return Err(e),
        };
        match lines.as_slice() {
            [id] => Ok(id.trim().to_owned()),
            _ => Err(RuntimeError::UnexpectedOutput {
                what: format!("image inspect {image}"),
                detail: format!("expected one line, got {}", lines.len()),
            }),
        }
    }

    fn save_image(&self, image: &str, dest: &Path) -> Result<(), RuntimeError> {
        self.engine.run([
            "save".to_owned(),
            "-o".to_owned(),
            dest.to_string_lossy().into_owned(),
            image.to_owned(),
        ])?;
        Ok(())
    }
}

fn node_log_tasks(node: &Node, dir: &Path) -> Vec<Task<RuntimeError>> {
    let in_node: [(&str, &str, Vec<&str>); 4] = [
        ("journal.log", "journalctl", vec!["--no-pager"]),
        ("kubelet.log", "journalctl", vec!["--no-pager", "-u", "kubelet.service"]),
        ("containerd.log", "journalctl", vec!["--no-pager", "-u", "containerd.service"]),
        ("kubernetes-version.txt", "cat", vec![KUBE_VERSION_PATH]),
    ];

    let mut tasks: Vec<Task<RuntimeError>> = Vec::new();
    for (file, program, args) in in_node {
        let node = node.clone();
        let path = dir.join(file);
        let args: Vec<String> = args.into_iter().map(str::to_owned).collect();
        let program = program.to_owned();
        tasks.push(Box::new(move || {
            let out = File::create(&path)?;
            node.command(&program, args).stdout_to(Box::new(out)).run()?;
            Ok(())
        }));
    }

    let engine = node.engine().clone();
    let name = node.name().to_owned();
    let inspect_path = dir.join("inspect.json");
    tasks.push(Box::new(move || {
        let out = engine.run(["inspect", name.as_str()])?;
        fs::write(inspect_path, out.stdout)?;
        Ok(())
    }));

    let engine = node.engine().clone();
    let name = node.name().to_owned();
    let serial_path = dir.join("serial.log");
    tasks.push(Box::new(move || {
        let out = engine.run(["logs", name.as_str()])?;
        fs::write(serial_path, out.combined())?;
        Ok(())
    }));

    let node = node.clone();
    let pods_dir: PathBuf = dir.to_path_buf();
    tasks.push(Box::new(move || node.copy_from("/var/log/", &pods_dir)));

    tasks
}

/// Build a provider by engine name.
pub fn select_provider(
    name: &str,
    runner: Arc<dyn CommandRunner>,
) -> Result<Box<dyn Provider>, RuntimeError> {
    match EngineKind::from_name(name) {
        Some(kind) => Ok(Box::new(EngineProvider::new(kind, runner))),
        None => Err(RuntimeError::EngineUnavailable(name.to_owned())),
    }
}

/// Pick the engine named by `KIND_EXPERIMENTAL_PROVIDER`, else the first
/// engine whose CLI answers.
pub fn detect_provider(
    runner: Arc<dyn CommandRunner>,
    env: &EnvLookup,
) -> Result<Box<dyn Provider>, RuntimeError> {
    if let Some(name) = env(PROVIDER_ENV_VAR).filter(|v| !v.is_empty()) {
        info!("using {name} due to {PROVIDER_ENV_VAR}");
        let kind = EngineKind::from_name(&name).ok_or(RuntimeError::EngineUnavailable(name))?;
        return Ok(Box::new(EngineProvider::new(kind, runner).with_env(env.clone())));
    }
    for kind in EngineKind::ALL {
        let provider = EngineProvider::new(kind, runner.clone()).with_env(env.clone());
        if provider.available() {
            debug!("detected container engine {kind}");
            return Ok(Box::new(provider));
        }
    }
    Err(RuntimeError::EngineUnavailable(
        "none of docker, podman or nerdctl".to_owned(),
    ))
}
