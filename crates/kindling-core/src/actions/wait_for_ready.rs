use super::{parse_kube_version, Action, ActionContext, ADMIN_KUBECONFIG_PATH};
use crate::lifecycle::Phase;
use crate::CoreError;
use kindling_runtime::node::Node;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Label selecting control-plane nodes for a Kubernetes minor release.
pub fn control_plane_selector(minor: u32) -> &'static str {
    if minor < 24 {
        "node-role.kubernetes.io/master"
    } else {
        "node-role.kubernetes.io/control-plane"
    }
}

/// Polls until every control-plane node reports Ready. Running out of time
/// is a warning, not a failure.
pub struct WaitForReady {
    timeout: Duration,
}

impl WaitForReady {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Action for WaitForReady {
    fn phase(&self) -> Phase {
        Phase::WaitForReady
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), CoreError> {
        if self.timeout.is_zero() {
            return Ok(());
        }
        let nodes = ctx.nodes()?;
        let node = nodes.bootstrap_control_plane()?;
        let (_, minor) = parse_kube_version(&node.kubernetes_version()?)?;
        let selector = control_plane_selector(minor);

        let deadline = Instant::now() + self.timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if nodes_ready(node, selector, left) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(
                    "timed out after {}s waiting for cluster {} to be ready",
                    self.timeout.as_secs(),
                    ctx.cluster
                );
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// kubectl's own timeout for one readiness check: what is left of the
/// wait, rounded up to whole seconds.
fn request_timeout(left: Duration) -> u64 {
    left.as_secs() + u64::from(left.subsec_nanos() > 0 || left.is_zero())
}

fn nodes_ready(node: &Node, selector: &str, left: Duration) -> bool {
    let out = node
        .command(
            "kubectl",
            [
                format!("--kubeconfig={ADMIN_KUBECONFIG_PATH}"),
                "get".to_owned(),
                "nodes".to_owned(),
                format!("--selector={selector}"),
                format!("--request-timeout={}s", request_timeout(left)),
                // The last condition is the Ready one.
                "-o=jsonpath='{.items..status.conditions[-1:].status}'".to_owned(),
            ],
        )
        .run();
    match out {
        Ok(out) => all_true(&out.stdout_str()),
        Err(e) => {
            debug!("readiness check failed: {e}");
            false
        }
    }
}

fn all_true(status: &str) -> bool {
    let trimmed = status.trim().trim_matches('\'');
    !trimmed.is_empty() && trimmed.split_whitespace().all(|s| s == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_output() {
        assert!(all_true("'True True'"));
        assert!(all_true("True"));
        assert!(!all_true("'True False'"));
        assert!(!all_true("''"));
    }

    #[test]
    fn request_timeout_tracks_time_left() {
        assert_eq!(request_timeout(Duration::from_secs(30)), 30);
        assert_eq!(request_timeout(Duration::from_millis(1500)), 2);
        assert_eq!(request_timeout(Duration::from_millis(200)), 1);
        assert_eq!(request_timeout(Duration::ZERO), 1);
    }

    #[test]
    fn selector_by_version() {
        assert_eq!(control_plane_selector(23), "node-role.kubernetes.io/master");
        assert_eq!(
            control_plane_selector(24),
            "node-role.kubernetes.io/control-plane"
        );
    }
}
