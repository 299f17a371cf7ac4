use kindling_kubeconfig::{
    kind_from_raw_kubeadm, merge_file, read_file, remove_file, write_file, Config,
};
use std::fs;

const ADMIN_CONF: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: definitelyacert
    server: https://kind-control-plane:6443
  name: kubernetes
contexts:
- context:
    cluster: kubernetes
    user: kubernetes-admin
  name: kubernetes-admin@kubernetes
current-context: kubernetes-admin@kubernetes
kind: Config
preferences: {}
users:
- name: kubernetes-admin
  user:
    client-certificate-data: seemslegit
    client-key-data: yup
";

const FOREIGN: &str = "apiVersion: v1
clusters:
- cluster:
    server: https://kops.example:443
  name: kops-blah
contexts:
- context:
    cluster: kops-blah
    user: kops-blah
  name: kops-blah
current-context: kops-blah
kind: Config
preferences: {}
users:
- name: kops-blah
  user:
    token: abc
";

fn kind_entry(cluster: &str, port: u16) -> Config {
    kind_from_raw_kubeadm(
        ADMIN_CONF.as_bytes(),
        cluster,
        &format!("https://127.0.0.1:{port}"),
    )
    .unwrap()
}

#[test]
fn merge_then_remove_restores_foreign_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    fs::write(&path, FOREIGN).unwrap();

    merge_file(&path, &kind_entry("kind", 40001)).unwrap();
    let merged = read_file(&path).unwrap();
    let names: Vec<&str> = merged.clusters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["kops-blah", "kind-kind"]);
    assert_eq!(merged.current_context, "kind-kind");

    assert!(remove_file(&path, "kind-kind").unwrap());
    let after = fs::read_to_string(&path).unwrap();
    assert_eq!(after, FOREIGN.replace("current-context: kops-blah\n", ""));
}

#[test]
fn remove_last_cluster_leaves_minimal_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    merge_file(&path, &kind_entry("kind", 40001)).unwrap();

    assert!(remove_file(&path, "kind-kind").unwrap());
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "apiVersion: v1\nkind: Config\npreferences: {}\n"
    );
}

#[test]
fn remove_unknown_key_does_not_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    let unsorted = FOREIGN.replace("kind: Config\n", "") + "kind: Config\n";
    fs::write(&path, &unsorted).unwrap();

    assert!(!remove_file(&path, "kind-nope").unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), unsorted);
}

#[test]
fn repeated_merge_replaces_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    merge_file(&path, &kind_entry("a", 40001)).unwrap();
    merge_file(&path, &kind_entry("b", 40002)).unwrap();
    let first = fs::read(&path).unwrap();

    merge_file(&path, &kind_entry("a", 40003)).unwrap();
    let cfg = read_file(&path).unwrap();
    assert_eq!(cfg.clusters.len(), 2);
    assert_eq!(cfg.clusters[0].name, "kind-a");
    assert_eq!(cfg.clusters[0].cluster.server, "https://127.0.0.1:40003");
    assert_eq!(cfg.current_context, "kind-a");
    assert_ne!(first, fs::read(&path).unwrap());
}

#[test]
fn concurrent_merges_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");

    std::thread::scope(|s| {
        for i in 0..4u16 {
            let path = &path;
            s.spawn(move || {
                merge_file(path, &kind_entry(&format!("c{i}"), 40000 + i)).unwrap();
            });
        }
    });

    let cfg = read_file(&path).unwrap();
    assert_eq!(cfg.clusters.len(), 4);
    for i in 0..4 {
        assert!(cfg.cluster(&format!("kind-c{i}")).is_some());
    }
}

#[test]
fn write_empty_config_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    write_file(&path, &Config::default()).unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"");
}
