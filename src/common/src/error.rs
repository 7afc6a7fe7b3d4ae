use std::path::PathBuf;

use thiserror::Error;

/// Failures the collaborator layer must be able to tell apart. Everything
/// else travels as `anyhow::Error` at the application seams.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no process matches '{0}'")]
    NotFound(String),

    #[error("a process named '{0}' is already online")]
    AlreadyRunning(String),

    #[error("script not found: {0}")]
    ScriptMissing(PathBuf),

    #[error("failed to spawn '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("registry at {path} is not valid JSON: {source}")]
    StoreCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("restart of '{0}' lost: {1}")]
    RestartLost(String, String),

    #[error("delete of '{0}' timed out waiting for the process to exit")]
    DeleteTimedOut(String),

    #[error("no snapshot found at {0}")]
    SnapshotMissing(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
