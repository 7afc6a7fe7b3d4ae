use anyhow::{Context, Result};
use shepd_common::constants::DAEMON_LOG_FILE;
use shepd_common::workdir::Workdir;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::SystemTime},
    prelude::*,
    EnvFilter,
};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// File-backed logging for the daemonized poller: everything goes to
/// `daemon.log` in the work directory.
pub fn setup_logging(workdir: &Workdir) -> Result<()> {
    let file_appender = RollingFileAppender::new(Rotation::NEVER, &workdir.path, DAEMON_LOG_FILE);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(SystemTime)
        .with_ansi(false)
        .with_writer(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    tracing::info!(
        "Logging system initialized. Writing to {}",
        workdir.path.join(DAEMON_LOG_FILE).display()
    );

    Ok(())
}

/// Stderr logging for a foreground daemon run.
pub fn setup_foreground_logging() -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_timer(SystemTime)
        .with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    Ok(())
}
