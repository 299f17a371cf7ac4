use crate::exec::{Cmd, CmdOutput, CommandRunner};
use crate::RuntimeError;
use std::fmt;
use std::sync::Arc;

/// The container engine CLIs kindling knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Docker,
    Podman,
    Nerdctl,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Docker, EngineKind::Podman, EngineKind::Nerdctl];

    pub fn binary(self) -> &'static str {
        match self {
            EngineKind::Docker => "docker",
            EngineKind::Podman => "podman",
            EngineKind::Nerdctl => "nerdctl",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "docker" => Some(EngineKind::Docker),
            "podman" => Some(EngineKind::Podman),
            "nerdctl" => Some(EngineKind::Nerdctl),
            _ => None,
        }
    }

    /// Environment variable that overrides the shared network name.
    pub fn network_env_var(self) -> &'static str {
        match self {
            EngineKind::Docker => "KIND_EXPERIMENTAL_DOCKER_NETWORK",
            EngineKind::Podman => "KIND_EXPERIMENTAL_PODMAN_NETWORK",
            EngineKind::Nerdctl => "KIND_EXPERIMENTAL_NERDCTL_NETWORK",
        }
    }

    /// Error output meaning the requested IPv6 subnet collides with another pool.
    pub(crate) fn pool_overlap_markers(self) -> &'static [&'static str] {
        match self {
            EngineKind::Docker => &["Pool overlaps with other one on this address space"],
            EngineKind::Podman => &[
                "is already used on the host or by another config",
                "is being used by a network interface",
                "is already being used by a cni configuration",
            ],
            EngineKind::Nerdctl => &["overlaps with", "Pool overlaps"],
        }
    }

    /// Error output meaning the host cannot create IPv6 bridge networks at all.
    pub(crate) fn ipv6_unavailable_markers(self) -> &'static [&'static str] {
        match self {
            EngineKind::Docker | EngineKind::Nerdctl => {
                &["Cannot read IPv6 setup for bridge", "IPv6 is disabled"]
            }
            EngineKind::Podman => &["unknown flag: --ipv6", "is ipv6 enabled in the kernel"],
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// A container engine CLI bound to the runner that executes it.
#[derive(Clone)]
pub struct EngineCli {
    kind: EngineKind,
    runner: Arc<dyn CommandRunner>,
}

impl EngineCli {
    pub fn new(kind: EngineKind, runner: Arc<dyn CommandRunner>) -> Self {
        Self { kind, runner }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn command<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new(self.kind.binary()).args(args)
    }

    pub fn run_cmd(&self, cmd: Cmd) -> Result<CmdOutput, RuntimeError> {
        self.runner.run(cmd)
    }

    pub fn run<I, S>(&self, args: I) -> Result<CmdOutput, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(self.command(args))
    }

    pub fn output_lines<I, S>(&self, args: I) -> Result<Vec<String>, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.run(args)?.stdout_lines())
    }

    /// Whether the engine CLI answers at all.
    pub fn available(&self) -> bool {
        self.run(["-v"]).is_ok()
    }
}

impl fmt::Debug for EngineCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCli")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in EngineKind::ALL {
            assert_eq!(EngineKind::from_name(kind.binary()), Some(kind));
        }
        assert_eq!(EngineKind::from_name("lxc"), None);
    }

    #[test]
    fn command_uses_engine_binary() {
        let engine = EngineCli::new(EngineKind::Podman, Arc::new(crate::LocalRunner));
        let cmd = engine.command(["ps", "-a"]);
        assert_eq!(cmd.argv(), vec!["podman", "ps", "-a"]);
    }
}
