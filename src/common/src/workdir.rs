use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};

use crate::constants::{
    DAEMON_PID_FILE, DAEMON_STDERR_FILE, DAEMON_STDOUT_FILE, FALLBACK_WORK_DIR, LOCK_FILE,
    LOGS_DIR, REGISTRY_FILE, SNAPSHOT_FILE, WORK_DIR_ENV,
};

pub static SHEPD_WORK_DIR: LazyLock<Workdir> = LazyLock::new(Workdir::from_env);

/// Every well-known path the supervisor touches, resolved once. The binary
/// uses the `SHEPD_WORK_DIR` global; tests build their own with
/// `Workdir::at` over a temp directory.
#[derive(Clone, Debug)]
pub struct Workdir {
    pub path: PathBuf,
    pub registry_file: PathBuf,
    pub snapshot_file: PathBuf,
    pub lock_file: PathBuf,
    pub logs_dir: PathBuf,
    pub daemon_pid_file: PathBuf,
    pub daemon_stdout_file: PathBuf,
    pub daemon_stderr_file: PathBuf,
}

impl Workdir {
    pub fn at(base: impl Into<PathBuf>) -> Self {
        let path = base.into();
        Workdir {
            registry_file: path.join(REGISTRY_FILE),
            snapshot_file: path.join(SNAPSHOT_FILE),
            lock_file: path.join(LOCK_FILE),
            logs_dir: path.join(LOGS_DIR),
            daemon_pid_file: path.join(DAEMON_PID_FILE),
            daemon_stdout_file: path.join(DAEMON_STDOUT_FILE),
            daemon_stderr_file: path.join(DAEMON_STDERR_FILE),
            path,
        }
    }

    /// `$SHEPD_HOME`, else `~/.shepd`, else `/tmp/shepd`.
    pub fn from_env() -> Self {
        let base = std::env::var_os(WORK_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".shepd")))
            .unwrap_or_else(|| PathBuf::from(FALLBACK_WORK_DIR));
        Workdir::at(base)
    }

    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.logs_dir)
            .with_context(|| format!("failed to create working directory {:?}", self.path))?;
        Ok(())
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.logs_dir.join(format!("{name}.log"))
    }

    pub fn error_log_path(&self, name: &str) -> PathBuf {
        self.logs_dir.join(format!("{name}-error.log"))
    }

    /// Removes the daemon run files. Registry, snapshot and logs stay.
    pub fn cleanup_run(&self) -> Result<()> {
        [
            &self.daemon_pid_file,
            &self.daemon_stdout_file,
            &self.daemon_stderr_file,
        ]
        .iter()
        .try_for_each(|path| {
            if path.exists() {
                std::fs::remove_file(path)
            } else {
                Ok(())
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_base() {
        let workdir = Workdir::at("/tmp/shepd-test");
        assert_eq!(workdir.registry_file, PathBuf::from("/tmp/shepd-test/registry.json"));
        assert_eq!(workdir.lock_file, PathBuf::from("/tmp/shepd-test/registry.lock"));
        assert_eq!(workdir.log_path("api"), PathBuf::from("/tmp/shepd-test/logs/api.log"));
        assert_eq!(
            workdir.error_log_path("api"),
            PathBuf::from("/tmp/shepd-test/logs/api-error.log")
        );
    }

    #[test]
    fn init_creates_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = Workdir::at(dir.path().join("work"));
        workdir.init().unwrap();
        assert!(workdir.logs_dir.is_dir());
    }

    #[test]
    fn cleanup_run_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = Workdir::at(dir.path());
        workdir.init().unwrap();
        std::fs::write(&workdir.daemon_pid_file, "1234").unwrap();
        workdir.cleanup_run().unwrap();
        assert!(!workdir.daemon_pid_file.exists());
        // second run has nothing to do
        workdir.cleanup_run().unwrap();
    }
}
