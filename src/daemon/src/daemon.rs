use anyhow::{Context, Result};
use shepd_supervisor::poller::HealthPoller;
use shepd_supervisor::{Config, Supervisor};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Entry point for the supervision loop. Blocks until an interrupt or
/// termination signal cancels it.
#[tokio::main]
pub async fn run(supervisor: Supervisor, config: Config) -> Result<()> {
    let cancellation_token = CancellationToken::new();

    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    {
        let token = cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("interrupt received"),
                _ = sigterm.recv() => info!("termination requested"),
            }
            token.cancel();
        });
    }

    run_with_token(supervisor, config, cancellation_token).await
}

/// The loop itself, cancellation injected so tests can drive it directly.
/// Each tick is one reconciliation pass under the registry lock; a pass
/// that fails is logged and the loop keeps going; the registry's
/// all-or-nothing save means nothing is left half-applied.
pub async fn run_with_token(
    supervisor: Supervisor,
    config: Config,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let mut poller = HealthPoller::new(config.grace_period());
    let mut interval = tokio::time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        interval_ms = config.poll_interval_ms,
        "supervision loop started"
    );

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("supervision loop shutting down");
                break;
            }
            _ = interval.tick() => {
                match supervisor.poll_registry(&mut poller) {
                    Ok(0) => debug!("poll pass: no transitions"),
                    Ok(transitions) => info!(transitions, "poll pass applied transitions"),
                    Err(err) => error!(%err, "poll pass failed"),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shepd_common::workdir::Workdir;

    use super::*;

    #[tokio::test]
    async fn loop_exits_promptly_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = Workdir::at(dir.path());
        workdir.init().unwrap();

        let config = Config {
            poll_interval_ms: 50,
            grace_period_secs: 1,
            settle_timeout_secs: 2,
        };
        let supervisor = Supervisor::new(workdir, config.clone());

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_with_token(supervisor, config, token.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not exit after cancellation");
        joined.unwrap().unwrap();
    }
}
