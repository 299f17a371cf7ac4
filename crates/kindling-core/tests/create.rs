use kindling_config::{ClusterConfig, NodeSpec};
use kindling_core::create::create_cluster_with;
use kindling_core::{ActionState, CoreError, CreateOptions, Phase, Status};
use kindling_runtime::mock::MockEngine;
use kindling_runtime::{EngineKind, EngineProvider};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Status for Recorder {
    fn start(&self, message: &str) {
        self.0.lock().unwrap().push(format!("start {message}"));
    }

    fn end(&self, success: bool) {
        self.0
            .lock()
            .unwrap()
            .push(if success { "ok" } else { "failed" }.to_owned());
    }
}

fn provider(mock: &Arc<MockEngine>) -> EngineProvider {
    EngineProvider::new(EngineKind::Docker, mock.clone()).with_env(Arc::new(|_| None))
}

fn options(config: ClusterConfig, kubeconfig: &Path) -> CreateOptions {
    CreateOptions {
        config,
        kubeconfig: Some(kubeconfig.to_path_buf()),
        ..CreateOptions::default()
    }
}

fn ha_config() -> ClusterConfig {
    ClusterConfig {
        nodes: vec![
            NodeSpec::control_plane(),
            NodeSpec::control_plane(),
            NodeSpec::control_plane(),
            NodeSpec::worker(),
            NodeSpec::worker(),
        ],
        ..ClusterConfig::default()
    }
}

#[test]
fn single_node_cluster_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let kubeconfig = dir.path().join("config");
    let mock = Arc::new(MockEngine::new());
    let status = Recorder::default();

    let created = create_cluster_with(
        &provider(&mock),
        &options(ClusterConfig::default(), &kubeconfig),
        &status,
        &|| false,
    )
    .unwrap();

    assert_eq!(created.name, "kind");
    assert_eq!(created.context.as_deref(), Some("kind-kind"));
    assert_eq!(created.kubeconfig.as_deref(), Some(kubeconfig.as_path()));
    assert!(created
        .phases
        .iter()
        .all(|(_, state)| *state == ActionState::Succeeded));
    assert_eq!(mock.container_names(), vec!["kind-control-plane"]);

    let merged = kindling_kubeconfig::read_file(&kubeconfig).unwrap();
    assert_eq!(merged.current_context, "kind-kind");
    let server = &merged.cluster("kind-kind").unwrap().cluster.server;
    assert!(server.starts_with("https://127.0.0.1:"), "{server}");

    assert_eq!(mock.calls_matching("taint").len(), 1);
    let manifests = mock.applied_manifests("kind-control-plane");
    assert!(manifests
        .iter()
        .any(|m| m.contains("podSubnet: 10.244.0.0/16")));
    assert!(manifests.iter().any(|m| m.contains("StorageClass")));

    let lines = status.lines();
    assert_eq!(lines.first().map(String::as_str), Some("start Ensuring node images"));
    assert!(!lines.iter().any(|l| l == "failed"));
}

#[test]
fn ha_cluster_joins_control_planes_before_workers() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    mock.delay_on("kubeadm join", Duration::from_millis(150));

    create_cluster_with(
        &provider(&mock),
        &options(ha_config(), &dir.path().join("config")),
        &Recorder::default(),
        &|| false,
    )
    .unwrap();

    assert_eq!(mock.container_names().len(), 6);
    let haproxy = String::from_utf8(
        mock.file(
            "kind-external-load-balancer",
            "/usr/local/etc/haproxy/haproxy.cfg",
        )
        .unwrap(),
    )
    .unwrap();
    for cp in ["kind-control-plane", "kind-control-plane2", "kind-control-plane3"] {
        assert!(haproxy.contains(cp), "{cp} missing from {haproxy}");
    }

    let joins = mock.calls_matching("kubeadm join");
    let (cps, workers): (Vec<_>, Vec<_>) = joins
        .iter()
        .partition(|c| c.joined().contains("control-plane"));
    assert_eq!(cps.len(), 2);
    assert_eq!(workers.len(), 2);
    assert!(!cps[0].overlaps(cps[1]));
    for worker in &workers {
        for cp in &cps {
            assert!(cp.finished <= worker.started);
        }
    }
    assert!(workers[0].overlaps(workers[1]));
    assert!(mock.calls_matching("taint").is_empty());
}

#[test]
fn failed_bootstrap_rolls_back_nodes_and_kubeconfig() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    mock.fail_on("apply", "the server could not find the requested resource");

    let err = create_cluster_with(
        &provider(&mock),
        &options(ClusterConfig::default(), &dir.path().join("config")),
        &Recorder::default(),
        &|| false,
    )
    .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::InstallCni));
    assert!(err
        .run_error()
        .unwrap()
        .output_contains("could not find the requested resource"));
    assert!(mock.container_names().is_empty());
    let left = kindling_kubeconfig::read_file(&dir.path().join("config")).unwrap();
    assert!(left.cluster("kind-kind").is_none());
}

#[test]
fn retain_keeps_nodes_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    mock.fail_on("kubeadm init", "[preflight] some fatal error");

    let mut opts = options(ClusterConfig::default(), &dir.path().join("config"));
    opts.retain = true;
    let err = create_cluster_with(&provider(&mock), &opts, &Recorder::default(), &|| false)
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::KubeadmInit));
    assert_eq!(mock.container_names(), vec!["kind-control-plane"]);
}

#[test]
fn interruption_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    let polls = AtomicUsize::new(0);

    let err = create_cluster_with(
        &provider(&mock),
        &options(ClusterConfig::default(), &dir.path().join("config")),
        &Recorder::default(),
        &|| polls.fetch_add(1, Ordering::SeqCst) >= 2,
    )
    .unwrap_err();

    assert!(matches!(err, CoreError::Interrupted(Phase::KubeadmInit)));
    assert!(mock.calls_matching("kubeadm init").is_empty());
    assert!(mock.container_names().is_empty());
}

#[test]
fn existing_cluster_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    let provider = provider(&mock);
    let opts = options(ClusterConfig::default(), &dir.path().join("config"));
    create_cluster_with(&provider, &opts, &Recorder::default(), &|| false).unwrap();

    let err = create_cluster_with(&provider, &opts, &Recorder::default(), &|| false).unwrap_err();
    assert!(matches!(err, CoreError::ClusterExists(ref name) if name == "kind"));
    assert_eq!(mock.container_names(), vec!["kind-control-plane"]);
}

#[test]
fn invalid_config_fails_before_touching_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    let config = ClusterConfig {
        nodes: vec![NodeSpec::worker()],
        ..ClusterConfig::default()
    };

    let err = create_cluster_with(
        &provider(&mock),
        &options(config, &dir.path().join("config")),
        &Recorder::default(),
        &|| false,
    )
    .unwrap_err();

    assert!(err.is_config_error());
    assert!(mock.calls().is_empty());
}

#[test]
fn overrides_and_stop_before_kubernetes() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    mock.add_image("kindest/node:v1.25.0");

    let mut opts = options(ClusterConfig::default(), &dir.path().join("config"));
    opts.name = Some("dev".to_owned());
    opts.node_image = Some("kindest/node:v1.25.0".to_owned());
    opts.stop_before_kubernetes = true;
    let created =
        create_cluster_with(&provider(&mock), &opts, &Recorder::default(), &|| false).unwrap();

    assert_eq!(created.name, "dev");
    assert!(created.kubeconfig.is_none());
    assert!(created.phases.is_empty());
    assert_eq!(mock.container_names(), vec!["dev-control-plane"]);
    assert!(mock
        .calls_matching("run")
        .iter()
        .any(|c| c.joined().contains("kindest/node:v1.25.0")));
    assert!(mock.calls_matching("kubeadm").is_empty());
    assert!(!dir.path().join("config").exists());
}

#[test]
fn created_serializes_phase_names() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    let created = create_cluster_with(
        &provider(&mock),
        &options(ClusterConfig::default(), &dir.path().join("config")),
        &Recorder::default(),
        &|| false,
    )
    .unwrap();

    let json = serde_json::to_value(&created).unwrap();
    assert_eq!(json["name"], "kind");
    assert_eq!(json["phases"][0][0], "kubeadm-config");
}

#[test]
fn node_kubeadm_patch_changes_only_that_node() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    let config = ClusterConfig {
        kubeadm_config_patches: vec![
            "kind: ClusterConfiguration\napiServer:\n  extraArgs:\n    audit-log-maxage: \"30\"\n"
                .to_owned(),
        ],
        nodes: vec![
            NodeSpec::control_plane(),
            NodeSpec::worker(),
            NodeSpec {
                kubeadm_config_patches: vec![
                    "kind: JoinConfiguration\nnodeRegistration:\n  kubeletExtraArgs:\n    node-labels: ingress-ready=true\n"
                        .to_owned(),
                ],
                ..NodeSpec::worker()
            },
        ],
        ..ClusterConfig::default()
    };

    create_cluster_with(
        &provider(&mock),
        &options(config, &dir.path().join("config")),
        &Recorder::default(),
        &|| false,
    )
    .unwrap();

    let rendered = |node: &str| {
        String::from_utf8(mock.file(node, "/kind/kubeadm.conf").unwrap()).unwrap()
    };
    for node in ["kind-control-plane", "kind-worker", "kind-worker2"] {
        assert!(rendered(node).contains("audit-log-maxage"), "{node}: {}", rendered(node));
    }
    assert!(rendered("kind-worker2").contains("ingress-ready=true"));
    assert!(!rendered("kind-worker").contains("node-labels"));
    assert!(!rendered("kind-control-plane").contains("node-labels"));
}

#[test]
fn unmatched_kubeadm_patch_fails_config_phase() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockEngine::new());
    let config = ClusterConfig {
        kubeadm_config_patches: vec!["kind: KubeSchedulerConfiguration\n".to_owned()],
        ..ClusterConfig::default()
    };

    let err = create_cluster_with(
        &provider(&mock),
        &options(config, &dir.path().join("config")),
        &Recorder::default(),
        &|| false,
    )
    .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::KubeadmConfig));
    assert!(err.to_string().contains("KubeSchedulerConfiguration"), "{err}");
    assert!(mock.container_names().is_empty());
}
