use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use daemonize::{Daemonize, Outcome};
use shepd_common::types::{Identifier, ProcessRecord, StartOptions};
use shepd_common::workdir::{Workdir, SHEPD_WORK_DIR};
use shepd_common::{error_message, info_message, success_message, warning_message};
use shepd_daemon::daemon;
use shepd_supervisor::poller;
use shepd_supervisor::{ConfigLoader, Supervisor};

use crate::commands::{Cli, Commands};
use crate::logging::{setup_foreground_logging, setup_logging};

pub fn process_cli() -> Result<()> {
    // has to stay sync: the daemon path forks before any runtime exists

    let cli = Cli::parse();
    let workdir = SHEPD_WORK_DIR.clone();
    workdir.init()?;

    let config = ConfigLoader::load(&workdir.path)?;
    let supervisor = Supervisor::new(workdir.clone(), config.clone());

    match cli.command {
        Commands::Daemon { no_daemonize } => {
            if no_daemonize {
                setup_foreground_logging()?;
            } else {
                match start_daemon(&workdir)? {
                    Outcome::Parent(Ok(_)) => {
                        success_message!(
                            "Daemon started; polling the registry every {} ms.",
                            config.poll_interval_ms
                        );
                        return Ok(());
                    }
                    Outcome::Parent(Err(e)) => {
                        error_message!("Failed to start daemon. Maybe one is already running? If it's not, run `shepd cleanup` to remove stale daemon files.");
                        error_message!("{e}");
                        return Ok(());
                    }
                    Outcome::Child(Err(e)) => {
                        anyhow::bail!(e);
                    }
                    Outcome::Child(Ok(_)) => {
                        setup_logging(&workdir)?;
                    }
                }
            }
            daemon::run(supervisor, config)
        }
        Commands::Kill => kill_daemon(&workdir),
        Commands::Cleanup => {
            workdir.cleanup_run()?;
            success_message!("Daemon files cleaned up successfully.");
            Ok(())
        }
        command => {
            let outcome = tokio::runtime::Runtime::new()?
                .block_on(run_async_command(command, &supervisor));
            if let Err(e) = outcome {
                error_message!("{e:#}");
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn start_daemon(workdir: &Workdir) -> Result<Outcome<()>> {
    let stdout =
        File::create(&workdir.daemon_stdout_file).context("Failed to create stdout file")?;
    let stderr =
        File::create(&workdir.daemon_stderr_file).context("Failed to create stderr file")?;

    Ok(Daemonize::new()
        .pid_file(&workdir.daemon_pid_file)
        .working_directory(&workdir.path)
        .stdout(stdout)
        .stderr(stderr)
        .umask(0o002)
        .execute())
}

fn kill_daemon(workdir: &Workdir) -> Result<()> {
    let raw = match std::fs::read_to_string(&workdir.daemon_pid_file) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warning_message!("No daemon pid file found. Is the daemon running?");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    let pid: u32 = raw
        .trim()
        .parse()
        .context("daemon pid file does not contain a pid")?;

    if !poller::process_alive(pid) {
        warning_message!("Daemon (pid {}) is not running; removing stale files.", pid);
        return workdir.cleanup_run();
    }

    info_message!("Stopping daemon (pid {})...", pid);
    if poller::terminate(pid).is_err() {
        poller::force_kill(pid);
    }
    for _ in 0..50 {
        if !poller::process_alive(pid) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    if poller::process_alive(pid) {
        warning_message!("Daemon did not exit in time; sending SIGKILL.");
        poller::force_kill(pid);
    }

    workdir.cleanup_run()?;
    success_message!("Daemon stopped.");
    Ok(())
}

async fn run_async_command(command: Commands, supervisor: &Supervisor) -> Result<()> {
    match command {
        Commands::Start {
            script,
            name,
            instances,
            env,
        } => {
            let name = match name {
                Some(name) => name,
                None => default_name(&script)?,
            };
            let opts = StartOptions {
                instances,
                env: env.into_iter().collect::<HashMap<_, _>>(),
                ..Default::default()
            };
            let record = supervisor.start(&name, &script, opts)?;
            success_message!(
                "Started '{}' (id {}, pid {}).",
                record.name,
                record.id,
                record.pid.unwrap_or_default()
            );
        }
        Commands::Stop { target } => {
            let record = supervisor.stop(&Identifier::parse(&target)).await?;
            success_message!("Stopped '{}' (id {}).", record.name, record.id);
        }
        Commands::Restart { target } => {
            let record = supervisor.restart(&Identifier::parse(&target)).await?;
            success_message!(
                "Restarted '{}' (id {}, pid {}, restarts {}).",
                record.name,
                record.id,
                record.pid.unwrap_or_default(),
                record.restarts
            );
        }
        Commands::Delete { target, no_stop } => {
            let record = supervisor
                .delete(&Identifier::parse(&target), !no_stop)
                .await?;
            success_message!("Deleted '{}' (id {}).", record.name, record.id);
        }
        Commands::List => {
            print_records(&supervisor.list()?);
        }
        Commands::Show { target } => {
            let record = supervisor.show(&Identifier::parse(&target))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Prune => {
            let removed = supervisor.prune()?;
            success_message!("Pruned {} record(s).", removed);
        }
        Commands::Save => {
            let count = supervisor.save_snapshot()?;
            success_message!("Snapshot saved ({} record(s)).", count);
        }
        Commands::Resurrect => {
            let report = supervisor.resurrect()?;
            for record in &report.started {
                success_message!(
                    "Resurrected '{}' (id {}, pid {}).",
                    record.name,
                    record.id,
                    record.pid.unwrap_or_default()
                );
            }
            for (name, err) in &report.skipped {
                warning_message!("Skipped '{}': {}", name, err);
            }
            if report.started.is_empty() && report.skipped.is_empty() {
                info_message!("Snapshot is empty; nothing to resurrect.");
            }
        }
        Commands::Logs { target, follow } => {
            let (log_path, error_log_path) = supervisor.logs(&Identifier::parse(&target))?;
            println!("{}", log_path.display());
            println!("{}", error_log_path.display());
            if follow {
                info_message!(
                    "Following is delegated to your pager: tail -f {}",
                    log_path.display()
                );
            }
        }
        Commands::Flush { target } => {
            let target = target.map(|raw| Identifier::parse(&raw));
            let flushed = supervisor.flush(target.as_ref())?;
            success_message!("Truncated {} log file(s).", flushed);
        }
        // handled synchronously before the runtime exists
        Commands::Daemon { .. } | Commands::Kill | Commands::Cleanup => unreachable!(),
    }

    Ok(())
}

fn default_name(script: &PathBuf) -> Result<String> {
    script
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .context("script path has no file name to derive a process name from")
}

fn print_records(records: &[ProcessRecord]) {
    if records.is_empty() {
        info_message!("No processes registered.");
        return;
    }
    println!(
        "{:<4} {:<20} {:<9} {:>8} {:>7} {:>7} {:>9}",
        "id", "name", "status", "pid", "cpu%", "mem%", "restarts"
    );
    for record in records {
        println!(
            "{:<4} {:<20} {:<9} {:>8} {:>7.1} {:>7.1} {:>9}",
            record.id,
            record.name,
            record.status.to_string(),
            record
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".into()),
            record.cpu_percent,
            record.memory_percent,
            record.restarts
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name_is_the_file_stem() {
        assert_eq!(default_name(&PathBuf::from("/srv/api/app.sh")).unwrap(), "app");
        assert!(default_name(&PathBuf::from("/")).is_err());
    }
}
