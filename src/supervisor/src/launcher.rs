use std::fs::{File, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use shepd_common::error::{Result, SupervisorError};
use shepd_common::types::ProcessRecord;
use tracing::{debug, info};

/// Interpreter that runs a script of the given extension. Anything not
/// listed is executed directly.
fn interpreter_for(script: &Path) -> Option<&'static str> {
    match script.extension().and_then(|ext| ext.to_str()) {
        Some("js") | Some("mjs") | Some("cjs") => Some("node"),
        Some("py") => Some("python3"),
        Some("sh") => Some("sh"),
        _ => None,
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

/// Starts the record's script detached from this process: new session via
/// `setsid`, stdin discarded, stdout/stderr appended to the per-app log
/// files, `env` overrides merged over the inherited environment. Returns
/// the OS-assigned pid; the child is never waited on here; the registry
/// record is its only handle.
pub fn launch(record: &ProcessRecord) -> Result<u32> {
    if !record.script_path.exists() {
        return Err(SupervisorError::ScriptMissing(record.script_path.clone()));
    }

    let stdout = open_append(&record.log_path)?;
    let stderr = open_append(&record.error_log_path)?;

    let mut command = match interpreter_for(&record.script_path) {
        Some(interpreter) => {
            let mut command = Command::new(interpreter);
            command.arg(&record.script_path);
            command
        }
        None => Command::new(&record.script_path),
    };

    command
        .envs(&record.env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }

    let mut child = command
        .spawn()
        .map_err(|source| SupervisorError::SpawnFailed {
            name: record.name.clone(),
            source,
        })?;
    let pid = child.id();
    debug!(name = %record.name, pid, script = %record.script_path.display(), "spawned");

    // Catch scripts that die at exec time (bad interpreter, unreadable
    // file) so no online record is persisted for a process that never ran.
    std::thread::sleep(Duration::from_millis(100));
    if let Ok(Some(status)) = child.try_wait() {
        if !status.success() {
            return Err(SupervisorError::SpawnFailed {
                name: record.name.clone(),
                source: std::io::Error::other(format!("exited at startup with {status}")),
            });
        }
    }

    // Reap the child if it dies while the spawning process is still
    // around; after the spawner exits, init inherits and reaps instead.
    std::thread::spawn(move || {
        let _ = child.wait();
    });

    info!(name = %record.name, pid, "process launched");
    Ok(pid)
}
