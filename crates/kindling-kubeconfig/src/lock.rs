use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const LOCK_ATTEMPTS: u32 = 5;
const LOCK_BACKOFF: Duration = Duration::from_millis(100);

/// Sibling lock file guarding a kubeconfig.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Holds `<path>.lock` until dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Create the lock file exclusively, retrying a few times.
    pub fn acquire(path: &Path) -> std::io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let lock = lock_path(path);
        let mut attempt = 1;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock) {
                Ok(_) => {
                    debug!("locked {}", lock.display());
                    return Ok(Self { path: lock });
                }
                Err(e) if attempt < LOCK_ATTEMPTS => {
                    debug!("lock {} busy (attempt {attempt}): {e}", lock.display());
                    thread::sleep(LOCK_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like `acquire`, but a lock that cannot be taken is only logged. A
    /// stale lock file left by a killed process must not block forever.
    pub fn acquire_best_effort(path: &Path) -> Option<Self> {
        match Self::acquire(path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(
                    "could not lock {}, continuing without it: {e}",
                    lock_path(path).display()
                );
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to remove lock file {}: {e}", self.path.display());
        }
    }
}
