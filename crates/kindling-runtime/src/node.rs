use crate::engine::EngineCli;
use crate::exec::{Cmd, CmdOutput};
use crate::naming::{ordinal_sort_key, NodeKind, ROLE_LABEL_KEY};
use crate::RuntimeError;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

/// Path inside node images holding the Kubernetes version they ship.
pub const KUBE_VERSION_PATH: &str = "/kind/version";

/// A handle to one node container.
///
/// Holds nothing but the container name and the engine; every call asks the
/// engine, so the handle never goes stale relative to the container.
#[derive(Clone)]
pub struct Node {
    name: String,
    engine: EngineCli,
}

impl Node {
    pub fn new(name: impl Into<String>, engine: EngineCli) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &EngineCli {
        &self.engine
    }

    /// A command that runs inside this node.
    pub fn command<I, S>(&self, program: &str, args: I) -> NodeCommand<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![program.to_owned()];
        argv.extend(args.into_iter().map(Into::into));
        NodeCommand {
            node: self,
            argv,
            env: Vec::new(),
            tty: false,
            stdin: None,
            stdout: None,
        }
    }

    pub fn role(&self) -> Result<NodeKind, RuntimeError> {
        let out = self.engine.run([
            "inspect".to_owned(),
            format!("--format={{{{ index .Config.Labels \"{ROLE_LABEL_KEY}\" }}}}"),
            self.name.clone(),
        ])?;
        let role = out.stdout_str();
        role.trim()
            .parse()
            .map_err(|detail| RuntimeError::UnexpectedOutput {
                what: format!("role lookup for {}", self.name),
                detail,
            })
    }

    /// IPv4 and IPv6 addresses on the cluster network; either may be empty.
    pub fn ip(&self) -> Result<(String, String), RuntimeError> {
        let out = self.engine.run([
            "inspect",
            "--format={{range .NetworkSettings.Networks}}{{.IPAddress}},{{.GlobalIPv6Address}}{{end}}",
            self.name.as_str(),
        ])?;
        let lines = out.stdout_lines();
        let [line] = lines.as_slice() else {
            return Err(RuntimeError::UnexpectedOutput {
                what: format!("IP lookup for {}", self.name),
                detail: format!("expected one line, got {}", lines.len()),
            });
        };
        let (v4, v6) = line
            .split_once(',')
            .ok_or_else(|| RuntimeError::UnexpectedOutput {
                what: format!("IP lookup for {}", self.name),
                detail: line.clone(),
            })?;
        Ok((v4.trim().to_owned(), v6.trim().to_owned()))
    }

    pub fn copy_to(&self, host_path: &Path, container_path: &str) -> Result<(), RuntimeError> {
        self.engine.run([
            "cp".to_owned(),
            host_path.to_string_lossy().into_owned(),
            format!("{}:{container_path}", self.name),
        ])?;
        Ok(())
    }

    pub fn copy_from(&self, container_path: &str, host_path: &Path) -> Result<(), RuntimeError> {
        self.engine.run([
            "cp".to_owned(),
            format!("{}:{container_path}", self.name),
            host_path.to_string_lossy().into_owned(),
        ])?;
        Ok(())
    }

    /// Write `contents` to `dest` inside the node, streamed as a tar archive.
    pub fn write_file(&self, dest: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        let (dir, file_name) = dest
            .rsplit_once('/')
            .filter(|(_, f)| !f.is_empty())
            .ok_or_else(|| RuntimeError::ExecFailed(format!("invalid node path: {dest}")))?;
        let dir = if dir.is_empty() { "/" } else { dir };

        self.command("mkdir", ["-p", dir]).run()?;

        let mut archive = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        archive.append_data(&mut header, file_name, contents)?;
        let bytes = archive.into_inner()?;

        self.engine.run_cmd(
            self.engine
                .command(["cp".to_owned(), "-".to_owned(), format!("{}:{dir}", self.name)])
                .stdin_bytes(bytes),
        )?;
        Ok(())
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        Ok(self.command("cat", [path]).run()?.stdout)
    }

    /// The Kubernetes version baked into the node image.
    pub fn kubernetes_version(&self) -> Result<String, RuntimeError> {
        let lines = self.command("cat", [KUBE_VERSION_PATH]).output_lines()?;
        match lines.as_slice() {
            [version] if !version.trim().is_empty() => Ok(version.trim().to_owned()),
            _ => Err(RuntimeError::UnexpectedOutput {
                what: format!("{KUBE_VERSION_PATH} on {}", self.name),
                detail: format!("expected one line, got {}", lines.len()),
            }),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("engine", &self.engine.kind())
            .finish()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

/// Sort nodes by name with numeric ordinals compared as numbers.
pub fn sort_nodes(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| ordinal_sort_key(&a.name).cmp(&ordinal_sort_key(&b.name)));
}

/// A cluster's nodes split by role, each group in ordinal order.
#[derive(Debug, Default)]
pub struct NodesByRole {
    pub load_balancer: Option<Node>,
    pub control_planes: Vec<Node>,
    pub workers: Vec<Node>,
}

impl NodesByRole {
    /// Look up every node's role label and group them.
    pub fn classify(nodes: &[Node]) -> Result<Self, RuntimeError> {
        let mut sorted = nodes.to_vec();
        sort_nodes(&mut sorted);
        let mut by_role = NodesByRole::default();
        for node in sorted {
            match node.role()? {
                NodeKind::ExternalLoadBalancer => {
                    if by_role.load_balancer.is_some() {
                        return Err(RuntimeError::UnexpectedOutput {
                            what: "node roles".to_owned(),
                            detail: "more than one external load balancer".to_owned(),
                        });
                    }
                    by_role.load_balancer = Some(node);
                }
                NodeKind::ControlPlane => by_role.control_planes.push(node),
                NodeKind::Worker => by_role.workers.push(node),
            }
        }
        Ok(by_role)
    }

    /// The control-plane node `kubeadm init` runs on.
    pub fn bootstrap_control_plane(&self) -> Result<&Node, RuntimeError> {
        self.control_planes
            .first()
            .ok_or_else(|| RuntimeError::NodeNotFound("bootstrap control-plane".to_owned()))
    }

    pub fn secondary_control_planes(&self) -> &[Node] {
        self.control_planes.get(1..).unwrap_or_default()
    }

    /// Every Kubernetes node, control planes first.
    pub fn kubernetes_nodes(&self) -> Vec<Node> {
        self.control_planes
            .iter()
            .chain(&self.workers)
            .cloned()
            .collect()
    }
}

/// A command inside a node, run through the engine's `exec`.
pub struct NodeCommand<'a> {
    node: &'a Node,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    tty: bool,
    stdin: Option<Box<dyn Read + Send>>,
    stdout: Option<Box<dyn Write + Send>>,
}

impl NodeCommand<'_> {
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_owned(), value.to_owned()));
        self
    }

    #[must_use]
    pub fn tty(mut self) -> Self {
        self.tty = true;
        self
    }

    #[must_use]
    pub fn stdin_bytes(self, bytes: Vec<u8>) -> Self {
        self.stdin_reader(Box::new(std::io::Cursor::new(bytes)))
    }

    #[must_use]
    pub fn stdin_reader(mut self, reader: Box<dyn Read + Send>) -> Self {
        self.stdin = Some(reader);
        self
    }

    #[must_use]
    pub fn stdout_to(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.stdout = Some(sink);
        self
    }

    fn into_cmd(self) -> Cmd {
        let mut args = vec!["exec".to_owned(), "--privileged".to_owned()];
        if self.stdin.is_some() {
            args.push("-i".to_owned());
        }
        if self.tty {
            args.push("-t".to_owned());
        }
        for (k, v) in &self.env {
            args.push("-e".to_owned());
            args.push(format!("{k}={v}"));
        }
        args.push(self.node.name.clone());
        args.extend(self.argv);

        let mut cmd = self.node.engine.command(args);
        if let Some(reader) = self.stdin {
            cmd = cmd.stdin_reader(reader);
        }
        if let Some(sink) = self.stdout {
            cmd = cmd.stdout_to(sink);
        }
        cmd
    }

    pub fn run(self) -> Result<CmdOutput, RuntimeError> {
        let engine = self.node.engine.clone();
        engine.run_cmd(self.into_cmd())
    }

    pub fn output_lines(self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.run()?.stdout_lines())
    }

    pub fn combined_output_lines(self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.run()?.combined_lines())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;
    use crate::exec::CommandRunner;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Vec<String>, Vec<u8>)>>,
        reply: Mutex<Vec<u8>>,
    }

    impl CommandRunner for Recorder {
        fn run(&self, mut cmd: Cmd) -> Result<CmdOutput, RuntimeError> {
            let stdin = match cmd.take_stdin() {
                crate::Stdin::Null => Vec::new(),
                crate::Stdin::Bytes(b) => b,
                crate::Stdin::Reader(mut r) => {
                    let mut buf = Vec::new();
                    r.read_to_end(&mut buf)?;
                    buf
                }
            };
            self.calls.lock().unwrap().push((cmd.argv(), stdin));
            Ok(CmdOutput {
                stdout: self.reply.lock().unwrap().clone(),
                stderr: Vec::new(),
            })
        }
    }

    fn node(recorder: &Arc<Recorder>) -> Node {
        let runner: Arc<dyn CommandRunner> = recorder.clone();
        Node::new("c-control-plane", EngineCli::new(EngineKind::Docker, runner))
    }

    #[test]
    fn command_wraps_exec() {
        let rec = Arc::new(Recorder::default());
        node(&rec)
            .command("kubectl", ["get", "nodes"])
            .env("A", "b")
            .run()
            .unwrap();
        let calls = rec.calls.lock().unwrap();
        assert_eq!(
            calls[0].0,
            vec![
                "docker",
                "exec",
                "--privileged",
                "-e",
                "A=b",
                "c-control-plane",
                "kubectl",
                "get",
                "nodes"
            ]
        );
    }

    #[test]
    fn stdin_adds_interactive_flag() {
        let rec = Arc::new(Recorder::default());
        node(&rec)
            .command("kubectl", ["apply", "-f", "-"])
            .stdin_bytes(b"manifest".to_vec())
            .run()
            .unwrap();
        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls[0].0[3], "-i");
        assert_eq!(calls[0].1, b"manifest");
    }

    #[test]
    fn write_file_streams_tar_archive() {
        let rec = Arc::new(Recorder::default());
        node(&rec)
            .write_file("/kind/kubeadm.conf", b"config: true\n")
            .unwrap();
        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].0.ends_with(&["mkdir".to_owned(), "-p".to_owned(), "/kind".to_owned()]));
        assert_eq!(calls[1].0, vec!["docker", "cp", "-", "c-control-plane:/kind"]);

        let mut archive = tar::Archive::new(calls[1].1.as_slice());
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_string_lossy(), "kubeadm.conf");
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "config: true\n");
    }

    #[test]
    fn write_file_rejects_directory_path() {
        let rec = Arc::new(Recorder::default());
        assert!(node(&rec).write_file("/kind/", b"x").is_err());
    }

    #[test]
    fn kubernetes_version_must_be_one_line() {
        let rec = Arc::new(Recorder::default());
        *rec.reply.lock().unwrap() = b"v1.27.3\n".to_vec();
        assert_eq!(node(&rec).kubernetes_version().unwrap(), "v1.27.3");

        *rec.reply.lock().unwrap() = b"v1.27.3\nextra\n".to_vec();
        assert!(node(&rec).kubernetes_version().is_err());
    }

    #[test]
    fn ip_parses_both_families() {
        let rec = Arc::new(Recorder::default());
        *rec.reply.lock().unwrap() = b"172.18.0.2,fc00::2\n".to_vec();
        assert_eq!(
            node(&rec).ip().unwrap(),
            ("172.18.0.2".to_owned(), "fc00::2".to_owned())
        );
    }

    #[test]
    fn role_parses_label() {
        let rec = Arc::new(Recorder::default());
        *rec.reply.lock().unwrap() = b"worker\n".to_vec();
        assert_eq!(node(&rec).role().unwrap(), NodeKind::Worker);
        let calls = rec.calls.lock().unwrap();
        assert_eq!(
            calls[0].0[2],
            "--format={{ index .Config.Labels \"io.x-k8s.kind.role\" }}"
        );
    }

    #[test]
    fn sort_nodes_by_ordinal() {
        let rec = Arc::new(Recorder::default());
        let engine = node(&rec).engine().clone();
        let mut nodes: Vec<Node> = ["c-worker10", "c-worker2", "c-worker"]
            .into_iter()
            .map(|n| Node::new(n, engine.clone()))
            .collect();
        sort_nodes(&mut nodes);
        let names: Vec<&str> = nodes.iter().map(Node::name).collect();
        assert_eq!(names, vec!["c-worker", "c-worker2", "c-worker10"]);
    }
}
