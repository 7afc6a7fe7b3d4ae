//! The poller daemon and command-style invocations sharing one registry.

use std::time::Duration;

use shepd_common::types::{Identifier, ProcessStatus, StartOptions};
use shepd_common::workdir::Workdir;
use shepd_daemon::daemon::run_with_token;
use shepd_supervisor::poller;
use shepd_supervisor::{Config, Supervisor};
use tokio_util::sync::CancellationToken;

fn config() -> Config {
    Config {
        poll_interval_ms: 100,
        grace_period_secs: 5,
        settle_timeout_secs: 10,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_reconciles_an_externally_killed_process() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = Workdir::at(dir.path().join("work"));
    workdir.init().unwrap();

    let script = workdir.path.join("app.sh");
    std::fs::write(&script, "sleep 60\n").unwrap();

    let supervisor = Supervisor::new(workdir.clone(), config());
    let record = supervisor
        .start("app", &script, StartOptions::default())
        .unwrap();
    let pid = record.pid.unwrap();

    let token = CancellationToken::new();
    let loop_handle = tokio::spawn(run_with_token(
        Supervisor::new(workdir.clone(), config()),
        config(),
        token.clone(),
    ));

    poller::force_kill(pid);

    // the loop should mark the record stopped within a few ticks
    let mut settled = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let record = supervisor.show(&Identifier::parse("app")).unwrap();
        if record.status == ProcessStatus::Stopped {
            settled = true;
            break;
        }
    }
    token.cancel();
    loop_handle.await.unwrap().unwrap();

    assert!(settled, "daemon never reconciled the killed process");
}
