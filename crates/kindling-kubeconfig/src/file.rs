use crate::document::{encode, parse, Config};
use crate::lock::LockGuard;
use crate::merge::{merge, remove};
use crate::KubeconfigError;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Read a kubeconfig file. A missing file is an empty config.
pub fn read_file(path: &Path) -> Result<Config, KubeconfigError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(e.into()),
    };
    parse(&bytes).map_err(|e| match e {
        KubeconfigError::Decode(source) => KubeconfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Encode `cfg` and replace `path` with it atomically.
pub fn write_file(path: &Path, cfg: &Config) -> Result<(), KubeconfigError> {
    let encoded = encode(cfg)?;
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(&encoded)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| KubeconfigError::Io(e.error))?;
    debug!("wrote kubeconfig {}", path.display());
    Ok(())
}

/// Merge `kind` into the kubeconfig at `path` under its lock.
pub fn merge_file(path: &Path, kind: &Config) -> Result<(), KubeconfigError> {
    let _lock = LockGuard::acquire_best_effort(path);
    let mut existing = read_file(path)?;
    merge(&mut existing, kind)?;
    write_file(path, &existing)
}

/// Remove the entries named `key` from the kubeconfig at `path` under its
/// lock. The file is only rewritten when something was removed.
pub fn remove_file(path: &Path, key: &str) -> Result<bool, KubeconfigError> {
    if !path.exists() {
        return Ok(false);
    }
    let _lock = LockGuard::acquire_best_effort(path);
    let mut existing = read_file(path)?;
    if !remove(&mut existing, key) {
        return Ok(false);
    }
    existing.set_type_meta();
    write_file(path, &existing)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::lock_path;
    use crate::merge::kind_from_raw_kubeadm;

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

    fn kind_entry() -> Config {
        kind_from_raw_kubeadm(ADMIN_CONF.as_bytes(), "kind", "https://127.0.0.1:6443").unwrap()
    }

    #[test]
    fn merge_into_missing_file_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does").join("not").join("exist");
        merge_file(&path, &kind_entry()).unwrap();

        let expected = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: definitelyacert
    server: https://127.0.0.1:6443
  name: kind-kind
contexts:
- context:
    cluster: kind-kind
    user: kind-kind
  name: kind-kind
current-context: kind-kind
kind: Config
preferences: {}
users:
- name: kind-kind
  user:
    client-certificate-data: seemslegit
    client-key-data: yup
";
        assert_eq!(fs::read_to_string(&path).unwrap(), expected);
        assert!(!lock_path(&path).exists());
    }

    #[test]
    fn remove_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        assert!(!remove_file(&path, "kind-kind").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn merge_proceeds_despite_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(lock_path(&path), "").unwrap();
        merge_file(&path, &kind_entry()).unwrap();
        assert!(read_file(&path).unwrap().cluster("kind-kind").is_some());
        assert!(lock_path(&path).exists());
    }

    #[test]
    fn unparseable_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "clusters: [").unwrap();
        let err = read_file(&path).unwrap_err();
        assert!(matches!(err, KubeconfigError::Parse { .. }));
    }
}
