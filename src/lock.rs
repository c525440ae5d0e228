use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, DeployResult};

/// Exclusive lock on a project directory, guarding `state.json` and the
/// Resource Ledger against concurrent orchestrator invocations. Backed
/// by `state.lock`, created with
/// `create_new` so acquisition is atomic without an extra crate.
pub struct ProjectLock {
    path: PathBuf,
}

impl ProjectLock {
    /// Acquires the lock or fails fast with `DeployError::LockHeld`.
    pub fn acquire(project_dir: &Path) -> DeployResult<Self> {
        fs::create_dir_all(project_dir)?;
        let path = project_dir.join("state.lock");

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DeployError::LockHeld);
            }
            Err(e) => return Err(e.into()),
        };

        writeln!(file, "{}", std::process::id())?;

        Ok(Self { path })
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = ProjectLock::acquire(dir.path()).unwrap();
            assert!(dir.path().join("state.lock").exists());
        }
        assert!(!dir.path().join("state.lock").exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = ProjectLock::acquire(dir.path()).unwrap();
        let second = ProjectLock::acquire(dir.path());
        assert!(matches!(second, Err(DeployError::LockHeld)));
    }

    #[test]
    fn acquire_again_after_drop_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = ProjectLock::acquire(dir.path()).unwrap();
        }
        assert!(ProjectLock::acquire(dir.path()).is_ok());
    }
}
