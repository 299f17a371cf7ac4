//! An in-memory container engine for tests.
//!
//! `MockEngine` implements `CommandRunner` and answers the subset of the
//! docker CLI kindling uses: networks, containers, labels, published ports,
//! file copies, and `exec` of the in-node tools the bootstrap pipeline runs.
//! Network creation does not reject duplicate names, so concurrent callers
//! can race exactly as they do against a real daemon.

use crate::exec::{Cmd, CmdOutput, CommandRunner, Stdin};
use crate::fanout::current_token;
use crate::naming::{CLUSTER_LABEL_KEY, ROLE_LABEL_KEY};
use crate::node::KUBE_VERSION_PATH;
use crate::{RunError, RuntimeError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const MOCK_KUBE_VERSION: &str = "v1.27.3";

/// The default CNI manifest seeded into every node image.
pub const MOCK_CNI_MANIFEST: &str = "kind: DaemonSet\npodSubnet: {{ .PodSubnet }}\n";

/// PKI files `kubeadm init` leaves on the bootstrap node.
pub const MOCK_PKI_FILES: [&str; 8] = [
    "ca.crt",
    "ca.key",
    "front-proxy-ca.crt",
    "front-proxy-ca.key",
    "sa.key",
    "sa.pub",
    "etcd/ca.crt",
    "etcd/ca.key",
];

/// One command the engine received.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub argv: Vec<String>,
    pub started: Instant,
    pub finished: Instant,
}

impl MockCall {
    pub fn joined(&self) -> String {
        self.argv.join(" ")
    }

    /// Whether the two calls were running at the same time.
    pub fn overlaps(&self, other: &MockCall) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

#[derive(Debug, Clone)]
struct MockNetwork {
    id: String,
    name: String,
    created: String,
    subnet: Option<String>,
    containers: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct Published {
    listen: String,
    host_port: String,
    container_port: String,
}

#[derive(Debug, Clone, Default)]
struct MockContainer {
    image: String,
    labels: BTreeMap<String, String>,
    network: Option<String>,
    ip: String,
    published: Vec<Published>,
    files: BTreeMap<String, Vec<u8>>,
    applied: Vec<String>,
    images: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    networks: Vec<MockNetwork>,
    containers: BTreeMap<String, MockContainer>,
    images: BTreeSet<String>,
    calls: Vec<MockCall>,
    next_id: u64,
}

/// A scripted, in-memory docker.
#[derive(Debug)]
pub struct MockEngine {
    state: Mutex<State>,
    failures: Mutex<Vec<(String, String)>>,
    delays: Mutex<Vec<(String, Duration)>>,
    ipv6_unavailable: bool,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// An engine with the default node image already pulled.
    pub fn new() -> Self {
        let mut state = State::default();
        state
            .images
            .insert(kindling_config::DEFAULT_NODE_IMAGE.to_owned());
        Self {
            state: Mutex::new(state),
            failures: Mutex::new(Vec::new()),
            delays: Mutex::new(Vec::new()),
            ipv6_unavailable: false,
        }
    }

    /// Refuse `--ipv6` network creation the way hosts without IPv6 do.
    #[must_use]
    pub fn without_ipv6(mut self) -> Self {
        self.ipv6_unavailable = true;
        self
    }

    /// Fail every command whose argv contains `pattern` with `output`.
    pub fn fail_on(&self, pattern: &str, output: &str) {
        lock(&self.failures).push((pattern.to_owned(), output.to_owned()));
    }

    /// Make every command whose argv contains `pattern` take `delay`.
    pub fn delay_on(&self, pattern: &str, delay: Duration) {
        lock(&self.delays).push((pattern.to_owned(), delay));
    }

    /// Add a network directly, as if an earlier run had created it.
    pub fn add_network(&self, name: &str, subnet: Option<&str>) -> String {
        let mut state = lock(&self.state);
        create_network_locked(&mut state, name, subnet.map(str::to_owned))
    }

    pub fn network_names(&self) -> Vec<String> {
        lock(&self.state)
            .networks
            .iter()
            .map(|n| n.name.clone())
            .collect()
    }

    pub fn container_names(&self) -> Vec<String> {
        lock(&self.state).containers.keys().cloned().collect()
    }

    pub fn has_image(&self, image: &str) -> bool {
        lock(&self.state).images.contains(image)
    }

    pub fn add_image(&self, image: &str) {
        lock(&self.state).images.insert(image.to_owned());
    }

    pub fn remove_image(&self, image: &str) {
        lock(&self.state).images.remove(image);
    }

    /// Contents of a file inside a container.
    pub fn file(&self, container: &str, path: &str) -> Option<Vec<u8>> {
        lock(&self.state)
            .containers
            .get(container)
            .and_then(|c| c.files.get(path).cloned())
    }

    pub fn put_file(&self, container: &str, path: &str, contents: &[u8]) {
        if let Some(c) = lock(&self.state).containers.get_mut(container) {
            c.files.insert(path.to_owned(), contents.to_vec());
        }
    }

    pub fn remove_file(&self, container: &str, path: &str) {
        if let Some(c) = lock(&self.state).containers.get_mut(container) {
            c.files.remove(path);
        }
    }

    /// Manifests passed to `kubectl apply -f -` inside a container.
    pub fn applied_manifests(&self, container: &str) -> Vec<String> {
        lock(&self.state)
            .containers
            .get(container)
            .map(|c| c.applied.clone())
            .unwrap_or_default()
    }

    /// Images imported into a node's containerd.
    pub fn node_images(&self, container: &str) -> Vec<String> {
        lock(&self.state)
            .containers
            .get(container)
            .map(|c| c.images.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    /// Calls whose space-joined argv contains `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.joined().contains(pattern))
            .collect()
    }

    fn injected_failure(&self, joined: &str) -> Option<String> {
        lock(&self.failures)
            .iter()
            .find(|(pattern, _)| joined.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
    }

    fn delay_for(&self, joined: &str) -> Duration {
        lock(&self.delays)
            .iter()
            .filter(|(pattern, _)| joined.contains(pattern.as_str()))
            .map(|(_, d)| *d)
            .max()
            .unwrap_or_default()
    }

    fn dispatch(&self, argv: &[String], stdin: Vec<u8>) -> Result<Vec<u8>, String> {
        let args: Vec<&str> = argv.iter().skip(1).map(String::as_str).collect();
        let mut state = lock(&self.state);
        match args.as_slice() {
            ["-v"] => Ok(b"mock engine version 1.0\n".to_vec()),
            ["info", rest @ ..] => Ok(info(rest)),
            ["network", "create", rest @ ..] => self.network_create(&mut state, rest),
            ["network", "ls", rest @ ..] => Ok(network_ls(&state, rest)),
            ["network", "inspect", id] => network_inspect(&state, id),
            ["network", "rm", id] => network_rm(&mut state, id),
            ["run", rest @ ..] => container_run(&mut state, rest),
            ["ps", rest @ ..] => Ok(ps(&state, rest)),
            ["inspect", rest @ ..] => inspect(&state, rest),
            ["image", "inspect", rest @ ..] => image_inspect(&state, rest),
            ["pull", image] => {
                state.images.insert((*image).to_owned());
                Ok(format!("pulled {image}\n").into_bytes())
            }
            ["save", "-o", dest, image] => save(&state, dest, image),
            ["rm", rest @ ..] => Ok(container_rm(&mut state, rest)),
            ["volume", "rm", ..] => Ok(Vec::new()),
            ["logs", name] => state
                .containers
                .get(*name)
                .map(|_| b"serial console output\n".to_vec())
                .ok_or_else(|| no_such_container(name)),
            ["cp", src, dest] => copy(&mut state, src, dest, &stdin),
            ["exec", rest @ ..] => exec(&mut state, rest, stdin),
            other => Err(format!("mock engine: unsupported command {other:?}")),
        }
    }

    fn network_create(&self, state: &mut State, args: &[&str]) -> Result<Vec<u8>, String> {
        let name = args.last().ok_or("network name required")?;
        let ipv6 = args.contains(&"--ipv6");
        if ipv6 && self.ipv6_unavailable {
            return Err(
                "Error response from daemon: Cannot read IPv6 setup for bridge br-0".to_owned(),
            );
        }
        let subnet = args
            .iter()
            .position(|a| *a == "--subnet")
            .and_then(|i| args.get(i + 1))
            .map(|s| (*s).to_owned());
        if let Some(subnet) = &subnet {
            if state
                .networks
                .iter()
                .any(|n| n.subnet.as_deref() == Some(subnet.as_str()))
            {
                return Err(
                    "Error response from daemon: Pool overlaps with other one on this address space"
                        .to_owned(),
                );
            }
        }
        let id = create_network_locked(state, name, subnet);
        Ok(format!("{id}\n").into_bytes())
    }

    fn wait(&self, delay: Duration, command: &str) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + delay;
        let token = current_token();
        while Instant::now() < deadline {
            if token.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(RuntimeError::Cancelled(command.to_owned()));
            }
            thread::sleep(Duration::from_millis(5).min(delay));
        }
        Ok(())
    }
}

impl CommandRunner for MockEngine {
    fn run(&self, mut cmd: Cmd) -> Result<CmdOutput, RuntimeError> {
        let argv = cmd.argv();
        let joined = argv.join(" ");
        let started = Instant::now();

        let stdin = match cmd.take_stdin() {
            Stdin::Null => Vec::new(),
            Stdin::Bytes(bytes) => bytes,
            Stdin::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                buf
            }
        };

        let waited = self.wait(self.delay_for(&joined), &joined);
        let result = match waited {
            Ok(()) => match self.injected_failure(&joined) {
                Some(output) => Err(output),
                None => self.dispatch(&argv, stdin),
            },
            Err(e) => {
                self.record(argv, started);
                return Err(e);
            }
        };
        self.record(argv.clone(), started);

        let stdout = result.map_err(|output| {
            RuntimeError::Run(RunError {
                command: argv,
                output: output.into_bytes(),
                exit_code: Some(1),
            })
        })?;

        match cmd.take_stdout() {
            Some(mut sink) => {
                sink.write_all(&stdout)?;
                sink.flush()?;
                Ok(CmdOutput::default())
            }
            None => Ok(CmdOutput {
                stdout,
                stderr: Vec::new(),
            }),
        }
    }
}

impl MockEngine {
    fn record(&self, argv: Vec<String>, started: Instant) {
        lock(&self.state).calls.push(MockCall {
            argv,
            started,
            finished: Instant::now(),
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_network_locked(state: &mut State, name: &str, subnet: Option<String>) -> String {
    state.next_id += 1;
    let seq = state.next_id;
    let id = format!("{:012x}", 0xa000_0000_0000 + seq);
    state.networks.push(MockNetwork {
        id: id.clone(),
        name: name.to_owned(),
        created: format!("2024-01-01T00:00:00.{seq:09}Z"),
        subnet,
        containers: BTreeSet::new(),
    });
    id
}

fn no_such_container(name: &str) -> String {
    format!("Error: No such container: {name}")
}

fn flag_value<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    let prefix = format!("{flag}=");
    args.iter().enumerate().find_map(|(i, &a)| {
        if a == flag {
            args.get(i + 1).copied()
        } else {
            a.strip_prefix(prefix.as_str())
        }
    })
}

fn flag_values<'a>(args: &[&'a str], flag: &str) -> Vec<&'a str> {
    let prefix = format!("{flag}=");
    let mut values = Vec::new();
    let mut iter = args.iter();
    while let Some(&a) = iter.next() {
        if a == flag {
            if let Some(&v) = iter.next() {
                values.push(v);
            }
        } else if let Some(v) = a.strip_prefix(prefix.as_str()) {
            values.push(v);
        }
    }
    values
}

fn info(args: &[&str]) -> Vec<u8> {
    let format = flag_value(args, "--format").unwrap_or_default();
    if format.contains("GraphDriverName") || format.contains("Driver") {
        b"overlay2\n".to_vec()
    } else if format.contains("HTTPProxy") {
        b"HTTP_PROXY=\nHTTPS_PROXY=\nNO_PROXY=\n".to_vec()
    } else {
        b"Server Version: mock\nStorage Driver: overlay2\n".to_vec()
    }
}

fn network_ls(state: &State, args: &[&str]) -> Vec<u8> {
    let wanted = flag_value(args, "--filter")
        .and_then(|f| f.strip_prefix("name="))
        .map(|n| n.trim_start_matches('^').trim_end_matches('$'));
    state
        .networks
        .iter()
        .filter(|n| wanted.map_or(true, |w| n.name == w))
        .map(|n| format!("{}\n", n.id))
        .collect::<String>()
        .into_bytes()
}

fn network_inspect(state: &State, id: &str) -> Result<Vec<u8>, String> {
    let network = state
        .networks
        .iter()
        .find(|n| n.id == id || n.name == id)
        .ok_or_else(|| format!("Error: No such network: {id}"))?;
    let containers: serde_json::Map<String, serde_json::Value> = network
        .containers
        .iter()
        .map(|c| (c.clone(), serde_json::json!({ "Name": c })))
        .collect();
    let doc = serde_json::json!([{
        "Name": network.name,
        "Id": network.id,
        "Created": network.created,
        "Containers": containers,
    }]);
    Ok(doc.to_string().into_bytes())
}

fn network_rm(state: &mut State, id: &str) -> Result<Vec<u8>, String> {
    let index = state
        .networks
        .iter()
        .position(|n| n.id == id || n.name == id)
        .ok_or_else(|| format!("Error: No such network: {id}"))?;
    if !state.networks[index].containers.is_empty() {
        return Err(format!(
            "Error response from daemon: error while removing network: network {id} has active endpoints"
        ));
    }
    state.networks.remove(index);
    Ok(format!("{id}\n").into_bytes())
}

fn parse_publish(spec: &str) -> Option<Published> {
    let (addr, _proto) = spec.rsplit_once('/')?;
    let (host, container_port) = addr.rsplit_once(':')?;
    let (listen, host_port) = host.rsplit_once(':')?;
    Some(Published {
        listen: listen.trim_start_matches('[').trim_end_matches(']').to_owned(),
        host_port: host_port.to_owned(),
        container_port: container_port.to_owned(),
    })
}

fn container_run(state: &mut State, args: &[&str]) -> Result<Vec<u8>, String> {
    let name = flag_value(args, "--name").ok_or("container name required")?;
    if state.containers.contains_key(name) {
        return Err(format!(
            "Error response from daemon: Conflict. The container name \"/{name}\" is already in use"
        ));
    }
    let image = args.last().ok_or("image required")?;

    let mut container = MockContainer {
        image: (*image).to_owned(),
        ..MockContainer::default()
    };
    for label in flag_values(args, "--label") {
        let (k, v) = label.split_once('=').unwrap_or((label, ""));
        container.labels.insert(k.to_owned(), v.to_owned());
    }
    for spec in flag_values(args, "--publish") {
        let published = parse_publish(spec).ok_or_else(|| format!("invalid publish spec {spec}"))?;
        container.published.push(published);
    }

    if let Some(net) = flag_value(args, "--net") {
        let network = state
            .networks
            .iter_mut()
            .find(|n| n.name == net)
            .ok_or_else(|| format!("Error response from daemon: network {net} not found"))?;
        network.containers.insert(name.to_owned());
        container.network = Some(net.to_owned());
        container.ip = format!("172.18.0.{}", network.containers.len() + 1);
    }

    if container.labels.get(ROLE_LABEL_KEY).map(String::as_str) != Some("external-load-balancer") {
        container.files.insert(
            KUBE_VERSION_PATH.to_owned(),
            format!("{MOCK_KUBE_VERSION}\n").into_bytes(),
        );
        container.files.insert(
            "/kind/manifests/default-cni.yaml".to_owned(),
            MOCK_CNI_MANIFEST.as_bytes().to_vec(),
        );
        container
            .files
            .insert("/var/log/boot.log".to_owned(), b"booted\n".to_vec());
    }

    state.images.insert((*image).to_owned());
    state.containers.insert(name.to_owned(), container);
    Ok(format!("{name}\n").into_bytes())
}

fn ps(state: &State, args: &[&str]) -> Vec<u8> {
    let filters: Vec<(&str, Option<&str>)> = flag_values(args, "--filter")
        .into_iter()
        .filter_map(|f| f.strip_prefix("label="))
        .map(|l| match l.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (l, None),
        })
        .collect();
    let format = flag_value(args, "--format").unwrap_or("{{.Names}}");

    let mut out = String::new();
    for (name, c) in &state.containers {
        let matches = filters.iter().all(|(k, v)| match (c.labels.get(*k), v) {
            (Some(actual), Some(v)) => actual == v,
            (Some(_), None) => true,
            (None, _) => false,
        });
        if !matches {
            continue;
        }
        if let Some(key) = quoted(format) {
            out.push_str(c.labels.get(key).map(String::as_str).unwrap_or_default());
        } else {
            out.push_str(name);
        }
        out.push('\n');
    }
    out.into_bytes()
}

/// The first double-quoted string in a Go template.
fn quoted(format: &str) -> Option<&str> {
    let start = format.find('"')? + 1;
    let len = format[start..].find('"')?;
    Some(&format[start..start + len])
}

fn inspect(state: &State, args: &[&str]) -> Result<Vec<u8>, String> {
    let format = flag_value(args, "--format").or_else(|| flag_value(args, "-f"));
    let names: Vec<&str> = args
        .iter()
        .copied()
        .filter(|a| !a.starts_with('-') && Some(*a) != format)
        .collect();

    let mut out = String::new();
    for name in names {
        let c = state
            .containers
            .get(name)
            .ok_or_else(|| no_such_container(name))?;
        match format {
            Some(f) if f.contains(".NetworkSettings.Ports") => {
                if let Some(p) = c.published.iter().find(|p| p.container_port == "6443") {
                    let _ = write!(out, "{}\t{}", p.listen, p.host_port);
                }
            }
            Some(f) if f.contains(".NetworkSettings.Networks") => {
                let _ = write!(out, "{},", c.ip);
            }
            Some(f) if f.contains(".Config.Labels") => {
                let key = quoted(f).unwrap_or(CLUSTER_LABEL_KEY);
                out.push_str(c.labels.get(key).map(String::as_str).unwrap_or_default());
            }
            Some(f) => return Err(format!("mock engine: unsupported inspect format {f}")),
            None => {
                let mut networks = serde_json::Map::new();
                if let Some(net) = &c.network {
                    networks.insert(net.clone(), serde_json::json!({ "IPAddress": c.ip }));
                }
                let doc = serde_json::json!([{
                    "Name": format!("/{name}"),
                    "Config": { "Image": c.image, "Labels": c.labels },
                    "NetworkSettings": { "Networks": networks },
                }]);
                out.push_str(&doc.to_string());
            }
        }
        out.push('\n');
    }
    Ok(out.into_bytes())
}

fn image_id(image: &str) -> String {
    format!("sha256:{}", blake3::hash(image.as_bytes()).to_hex())
}

fn image_inspect(state: &State, args: &[&str]) -> Result<Vec<u8>, String> {
    let image = args.last().ok_or("image required")?;
    if !state.images.contains(*image) {
        return Err(format!("Error: No such image: {image}"));
    }
    if flag_value(args, "-f").is_some() {
        Ok(format!("{}\n", image_id(image)).into_bytes())
    } else {
        Ok(serde_json::json!([{ "Id": image_id(image), "RepoTags": [image] }])
            .to_string()
            .into_bytes())
    }
}

fn save(state: &State, dest: &str, image: &str) -> Result<Vec<u8>, String> {
    if !state.images.contains(image) {
        return Err(format!("Error response from daemon: reference does not exist: {image}"));
    }
    std::fs::write(dest, format!("mock-image\t{image}\t{}", image_id(image)))
        .map_err(|e| format!("open {dest}: {e}"))?;
    Ok(Vec::new())
}

fn container_rm(state: &mut State, args: &[&str]) -> Vec<u8> {
    let mut out = String::new();
    for name in args.iter().filter(|a| !a.starts_with('-')) {
        if let Some(c) = state.containers.remove(*name) {
            if let Some(net) = c.network {
                for n in state.networks.iter_mut().filter(|n| n.name == net) {
                    n.containers.remove(*name);
                }
            }
            out.push_str(name);
            out.push('\n');
        }
    }
    out.into_bytes()
}

fn copy(state: &mut State, src: &str, dest: &str, stdin: &[u8]) -> Result<Vec<u8>, String> {
    let container_side = |spec: &str| {
        spec.split_once(':')
            .filter(|(name, _)| state.containers.contains_key(*name))
            .map(|(name, path)| (name.to_owned(), path.to_owned()))
    };

    if src == "-" {
        let (name, dir) = container_side(dest).ok_or_else(|| no_such_container(dest))?;
        let entries = untar(stdin)?;
        let c = state.containers.get_mut(&name).ok_or_else(|| no_such_container(&name))?;
        for (path, contents) in entries {
            c.files.insert(join_path(&dir, &path), contents);
        }
        return Ok(Vec::new());
    }

    if let Some((name, path)) = container_side(src) {
        let c = &state.containers[&name];
        return copy_out(c, &name, &path, Path::new(dest));
    }

    let (name, path) = container_side(dest).ok_or_else(|| no_such_container(dest))?;
    let contents =
        std::fs::read(src).map_err(|e| format!("lstat {src}: {e}"))?;
    let c = state.containers.get_mut(&name).ok_or_else(|| no_such_container(&name))?;
    c.files.insert(path, contents);
    Ok(Vec::new())
}

fn copy_out(c: &MockContainer, name: &str, path: &str, dest: &Path) -> Result<Vec<u8>, String> {
    let write = |target: &Path, contents: &[u8]| -> Result<(), String> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(target, contents).map_err(|e| e.to_string())
    };

    if let Some(contents) = c.files.get(path) {
        let target = if dest.is_dir() {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            dest.join(file_name)
        } else {
            dest.to_path_buf()
        };
        write(&target, contents)?;
        return Ok(Vec::new());
    }

    let prefix = format!("{}/", path.trim_end_matches('/'));
    let mut found = false;
    for (file, contents) in c.files.iter().filter(|(f, _)| f.starts_with(&prefix)) {
        write(&dest.join(&file[prefix.len()..]), contents)?;
        found = true;
    }
    if found {
        Ok(Vec::new())
    } else {
        Err(format!(
            "Error response from daemon: Could not find the file {path} in container {name}"
        ))
    }
}

fn untar(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, String> {
    let mut archive = tar::Archive::new(bytes);
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let path = entry
            .path()
            .map_err(|e| e.to_string())?
            .to_string_lossy()
            .into_owned();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).map_err(|e| e.to_string())?;
        entries.push((path, contents));
    }
    Ok(entries)
}

fn join_path(dir: &str, file: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), file.trim_start_matches('/'))
}

fn exec(state: &mut State, args: &[&str], stdin: Vec<u8>) -> Result<Vec<u8>, String> {
    let mut rest = args;
    while let [flag, tail @ ..] = rest {
        match *flag {
            "-e" => rest = tail.get(1..).unwrap_or_default(),
            f if f.starts_with('-') => rest = tail,
            _ => break,
        }
    }
    let [name, argv @ ..] = rest else {
        return Err("exec requires a container".to_owned());
    };
    let c = state
        .containers
        .get_mut(*name)
        .ok_or_else(|| no_such_container(name))?;

    match argv {
        ["cat", path] => c
            .files
            .get(*path)
            .cloned()
            .ok_or_else(|| format!("cat: {path}: No such file or directory")),
        ["mkdir", ..] | ["kill", ..] | ["journalctl", ..] | ["sh", ..] => Ok(Vec::new()),
        ["kubeadm", "init", ..] => {
            kubeadm_init(c, name);
            Ok(b"Your Kubernetes control-plane has initialized successfully!\n".to_vec())
        }
        ["kubeadm", "join", ..] => kubeadm_join(c),
        ["kubectl", rest @ ..] => kubectl(c, rest, stdin),
        ["ctr", rest @ ..] if rest.contains(&"import") => {
            let text = String::from_utf8_lossy(&stdin).into_owned();
            let mut parts = text.split('\t');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("mock-image"), Some(image), Some(id)) => {
                    c.images.insert(image.to_owned(), id.to_owned());
                    Ok(format!("unpacking {image}...done\n").into_bytes())
                }
                _ => Err("ctr: unrecognized image format".to_owned()),
            }
        }
        ["crictl", "inspecti", rest @ ..] => {
            let image = rest.last().copied().unwrap_or_default();
            c.images
                .get(image)
                .map(|id| format!("{id}\n").into_bytes())
                .ok_or_else(|| format!("no such image \"{image}\" present"))
        }
        other => Err(format!("mock engine: unsupported exec {other:?}")),
    }
}

fn kubeadm_init(c: &mut MockContainer, name: &str) {
    let config = c
        .files
        .get("/kind/kubeadm.conf")
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    let endpoint = config
        .lines()
        .find_map(|l| l.trim().strip_prefix("controlPlaneEndpoint:"))
        .map(|e| e.trim().trim_matches(['"', '\'']).to_owned())
        .unwrap_or_else(|| format!("{name}:6443"));

    let admin = format!(
        "apiVersion: v1\nclusters:\n- cluster:\n    certificate-authority-data: TU9DSw==\n    server: https://{endpoint}\n  name: kubernetes\ncontexts:\n- context:\n    cluster: kubernetes\n    user: kubernetes-admin\n  name: kubernetes-admin@kubernetes\ncurrent-context: kubernetes-admin@kubernetes\nkind: Config\npreferences: {{}}\nusers:\n- name: kubernetes-admin\n  user:\n    client-certificate-data: TU9DSw==\n    client-key-data: TU9DSw==\n"
    );
    c.files
        .insert("/etc/kubernetes/admin.conf".to_owned(), admin.into_bytes());
    for file in MOCK_PKI_FILES {
        c.files.insert(
            format!("/etc/kubernetes/pki/{file}"),
            format!("pki {file}\n").into_bytes(),
        );
    }
}

fn kubeadm_join(c: &mut MockContainer) -> Result<Vec<u8>, String> {
    let config = c
        .files
        .get("/kind/kubeadm.conf")
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or("unable to read config from \"/kind/kubeadm.conf\"")?;
    let control_plane = config
        .lines()
        .any(|l| l.trim_start().starts_with("controlPlane:"));
    if control_plane {
        let missing: Vec<&str> = MOCK_PKI_FILES
            .iter()
            .copied()
            .filter(|f| !c.files.contains_key(&format!("/etc/kubernetes/pki/{f}")))
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "error execution phase control-plane-prepare/certs: missing certificates {missing:?}"
            ));
        }
    }
    Ok(b"This node has joined the cluster\n".to_vec())
}

fn kubectl(c: &mut MockContainer, args: &[&str], stdin: Vec<u8>) -> Result<Vec<u8>, String> {
    if args.contains(&"apply") {
        c.applied.push(String::from_utf8_lossy(&stdin).into_owned());
        return Ok(b"configured\n".to_vec());
    }
    if args.contains(&"get") && args.contains(&"nodes") {
        return Ok(b"True".to_vec());
    }
    if args.contains(&"get") && args.iter().any(|a| a.starts_with("storageclass")) {
        return Err("Error from server (NotFound): storageclasses.storage.k8s.io not found".to_owned());
    }
    Ok(Vec::new())
}
