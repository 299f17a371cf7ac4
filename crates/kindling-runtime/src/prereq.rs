use crate::engine::EngineKind;
use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn daemon_reachable(binary: &str) -> bool {
    Command::new(binary)
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[allow(unsafe_code)]
pub(crate) fn current_uid() -> u32 {
    // SAFETY: getuid() is always safe and has no preconditions.
    unsafe { libc::getuid() }
}

fn install_hint(kind: EngineKind) -> &'static str {
    match kind {
        EngineKind::Docker => "https://docs.docker.com/engine/install/",
        EngineKind::Podman => {
            "zypper install podman | apt install podman | dnf install podman | pacman -S podman"
        }
        EngineKind::Nerdctl => "https://github.com/containerd/nerdctl/releases",
    }
}

/// Check that the engine CLI is installed and its daemon answers.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_engine_prereqs(kind: EngineKind) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists(kind.binary()) {
        missing.push(MissingPrereq {
            name: kind.binary(),
            purpose: "running node containers",
            install_hint: install_hint(kind),
        });
    } else if !daemon_reachable(kind.binary()) {
        missing.push(MissingPrereq {
            name: "engine daemon",
            purpose: "answering container engine requests",
            install_hint: daemon_hint(kind),
        });
    }

    missing
}

fn daemon_hint(kind: EngineKind) -> &'static str {
    match kind {
        EngineKind::Docker if current_uid() != 0 => {
            "start dockerd, and add your user to the docker group or use rootless docker"
        }
        EngineKind::Docker => "systemctl start docker",
        EngineKind::Podman => "check `podman info`; rootless podman needs cgroup v2 delegation",
        EngineKind::Nerdctl if current_uid() != 0 => {
            "start containerd, or set up rootless containerd with containerd-rootless-setuptool.sh"
        }
        EngineKind::Nerdctl => "systemctl start containerd",
    }
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nkindling needs a working container engine to run cluster nodes.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "docker",
            purpose: "running node containers",
            install_hint: "https://docs.docker.com/engine/install/",
        };
        let s = format!("{m}");
        assert!(s.contains("docker"));
        assert!(s.contains("running node containers"));
        assert!(s.contains("docs.docker.com"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![
            MissingPrereq {
                name: "docker",
                purpose: "nodes",
                install_hint: "install docker",
            },
            MissingPrereq {
                name: "engine daemon",
                purpose: "requests",
                install_hint: "systemctl start docker",
            },
        ];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("docker"));
        assert!(output.contains("engine daemon"));
    }

    #[test]
    fn every_engine_has_hints() {
        for kind in EngineKind::ALL {
            assert!(!install_hint(kind).is_empty());
            assert!(!daemon_hint(kind).is_empty());
        }
    }
}
