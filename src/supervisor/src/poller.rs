use std::time::Duration;

use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid as UnixPid;
use shepd_common::types::{ProcessRecord, ProcessStatus};
use sysinfo::{Pid, ProcessRefreshKind, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::{debug, info, warn};

/// Reconciles registry records against the OS process table. Owns a
/// persistent `sysinfo::System` so per-process CPU figures are deltas
/// between real samples.
pub struct HealthPoller {
    system: System,
    grace_period: Duration,
}

impl HealthPoller {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            system: System::new(),
            grace_period,
        }
    }

    /// One synchronous pass over every online or stopping record. Returns
    /// the number of status transitions applied. Idempotent: with no
    /// OS-level change a second pass only refreshes metrics and timestamps.
    pub fn poll_once(&mut self, records: &mut [ProcessRecord]) -> usize {
        if !records
            .iter()
            .any(|r| matches!(r.status, ProcessStatus::Online | ProcessStatus::Stopping))
        {
            return 0;
        }

        let tracked: Vec<Pid> = records
            .iter()
            .filter(|r| matches!(r.status, ProcessStatus::Online | ProcessStatus::Stopping))
            .filter_map(|r| r.pid.map(Pid::from_u32))
            .collect();
        if !tracked.is_empty() {
            self.refresh(&tracked);
        }

        let total_memory = self.system.total_memory();
        let mut transitions = 0;
        for record in records.iter_mut() {
            transitions += match record.status {
                ProcessStatus::Online => self.poll_online(record, total_memory),
                ProcessStatus::Stopping => self.poll_stopping(record),
                ProcessStatus::Stopped => 0,
            };
        }
        transitions
    }

    fn refresh(&mut self, pids: &[Pid]) {
        self.system.refresh_memory();
        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();
        for pid in pids {
            self.system.refresh_process_specifics(*pid, refresh_kind);
        }
        // cpu_usage is a delta between samples; sysinfo documents the
        // minimum useful gap
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        for pid in pids {
            self.system.refresh_process_specifics(*pid, refresh_kind);
        }
    }

    fn poll_online(&mut self, record: &mut ProcessRecord, total_memory: u64) -> usize {
        let Some(pid) = record.pid else {
            // an online record always carries a pid when written by the
            // controller; repair anything else to stopped
            record.status = ProcessStatus::Stopped;
            record.touch();
            return 1;
        };

        if !process_alive(pid) {
            info!(name = %record.name, pid, "process exited outside the supervisor");
            record.status = ProcessStatus::Stopped;
            record.touch();
            return 1;
        }

        match self.system.process(Pid::from_u32(pid)) {
            Some(proc_info) => {
                record.cpu_percent = proc_info.cpu_usage();
                record.memory_percent = if total_memory > 0 {
                    proc_info.memory() as f32 / total_memory as f32 * 100.0
                } else {
                    0.0
                };
                record.touch();
            }
            // transient metrics miss for a live pid: keep the last numbers
            None => debug!(name = %record.name, pid, "metrics query missed; keeping previous values"),
        }
        0
    }

    fn poll_stopping(&mut self, record: &mut ProcessRecord) -> usize {
        let Some(pid) = record.pid else {
            record.status = ProcessStatus::Stopped;
            record.touch();
            return 1;
        };

        if !process_alive(pid) {
            debug!(name = %record.name, pid, "graceful shutdown confirmed");
            record.status = ProcessStatus::Stopped;
            record.touch();
            return 1;
        }

        // updated_at was stamped at the stopping transition and is not
        // touched while the record waits, so it measures the grace window
        let waited = Utc::now()
            .signed_duration_since(record.updated_at)
            .to_std()
            .unwrap_or_default();
        if waited > self.grace_period {
            warn!(name = %record.name, pid, "grace period expired; forcing termination");
            force_kill(pid);
            // the forced signal is authoritative
            record.status = ProcessStatus::Stopped;
            record.touch();
            return 1;
        }
        0
    }
}

/// Signal-0 probe. EPERM means the process exists but belongs to someone
/// else, which still counts as alive.
pub fn process_alive(pid: u32) -> bool {
    match kill(UnixPid::from_raw(pid as i32), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Polite termination request. Children run as their own session leader, so
/// the group id equals the pid; signal the group first to reach the whole
/// tree, then fall back to the pid alone.
pub fn terminate(pid: u32) -> std::result::Result<(), Errno> {
    signal_group_then_pid(pid, Signal::SIGTERM)
}

pub fn force_kill(pid: u32) {
    let _ = signal_group_then_pid(pid, Signal::SIGKILL);
}

fn signal_group_then_pid(pid: u32, signal: Signal) -> std::result::Result<(), Errno> {
    let group = UnixPid::from_raw(-(pid as i32));
    match kill(group, signal) {
        Ok(()) => Ok(()),
        Err(_) => kill(UnixPid::from_raw(pid as i32), signal),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::process::{Command, Stdio};

    use chrono::Duration as ChronoDuration;

    use super::*;

    fn sleeper() -> std::process::Child {
        Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    fn record(pid: Option<u32>, status: ProcessStatus) -> ProcessRecord {
        ProcessRecord {
            id: 0,
            name: "poll-test".into(),
            pid,
            script_path: "/bin/sleep".into(),
            log_path: "/tmp/poll-test.log".into(),
            error_log_path: "/tmp/poll-test-error.log".into(),
            status,
            instances: 1,
            restarts: 0,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            env: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn live_online_record_gets_metrics_not_a_transition() {
        let mut child = sleeper();
        let mut records = vec![record(Some(child.id()), ProcessStatus::Online)];

        let mut poller = HealthPoller::new(Duration::from_secs(30));
        assert_eq!(poller.poll_once(&mut records), 0);
        assert_eq!(records[0].status, ProcessStatus::Online);

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn dead_online_record_transitions_to_stopped() {
        let mut child = sleeper();
        let pid = child.id();
        child.kill().unwrap();
        child.wait().unwrap();

        let mut records = vec![record(Some(pid), ProcessStatus::Online)];
        let mut poller = HealthPoller::new(Duration::from_secs(30));

        assert_eq!(poller.poll_once(&mut records), 1);
        assert_eq!(records[0].status, ProcessStatus::Stopped);
        // the pid of the last run is kept for postmortem lookups
        assert_eq!(records[0].pid, Some(pid));
    }

    #[test]
    fn polling_is_idempotent() {
        let mut child = sleeper();
        let pid = child.id();
        child.kill().unwrap();
        child.wait().unwrap();

        let mut records = vec![record(Some(pid), ProcessStatus::Online)];
        let mut poller = HealthPoller::new(Duration::from_secs(30));
        assert_eq!(poller.poll_once(&mut records), 1);
        let settled = records[0].clone();

        // no OS-level change: the second pass must not alter anything
        assert_eq!(poller.poll_once(&mut records), 0);
        assert_eq!(records[0].status, settled.status);
        assert_eq!(records[0].pid, settled.pid);
        assert_eq!(records[0].updated_at, settled.updated_at);
    }

    #[test]
    fn stopping_record_within_grace_is_left_alone() {
        let mut child = sleeper();
        let mut records = vec![record(Some(child.id()), ProcessStatus::Stopping)];

        let mut poller = HealthPoller::new(Duration::from_secs(60));
        assert_eq!(poller.poll_once(&mut records), 0);
        assert_eq!(records[0].status, ProcessStatus::Stopping);

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn stopping_record_past_grace_is_force_killed() {
        let mut child = sleeper();
        let pid = child.id();
        let mut records = vec![record(Some(pid), ProcessStatus::Stopping)];
        // backdate the stopping transition beyond the grace window
        records[0].updated_at = Utc::now() - ChronoDuration::seconds(120);

        let mut poller = HealthPoller::new(Duration::from_secs(30));
        assert_eq!(poller.poll_once(&mut records), 1);
        assert_eq!(records[0].status, ProcessStatus::Stopped);

        // reap so the kill is observable beyond the zombie entry
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }

    #[test]
    fn stopping_record_whose_process_exited_settles() {
        let mut child = sleeper();
        let pid = child.id();
        child.kill().unwrap();
        child.wait().unwrap();

        let mut records = vec![record(Some(pid), ProcessStatus::Stopping)];
        let mut poller = HealthPoller::new(Duration::from_secs(30));
        assert_eq!(poller.poll_once(&mut records), 1);
        assert_eq!(records[0].status, ProcessStatus::Stopped);
    }
}
