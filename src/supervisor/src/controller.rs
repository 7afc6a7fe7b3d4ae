use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use shepd_common::constants::SETTLE_POLL_MS;
use shepd_common::error::{Result, SupervisorError};
use shepd_common::types::{Identifier, ProcessRecord, ProcessStatus, StartOptions};
use shepd_common::workdir::Workdir;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::launcher;
use crate::poller::{self, HealthPoller};
use crate::store::{allocate_id, read_records, write_records, RegistryStore};

/// Per-entry outcomes of a resurrect run. Entries never fail the whole
/// operation; each reports its own result.
#[derive(Debug)]
pub struct ResurrectReport {
    pub started: Vec<ProcessRecord>,
    pub skipped: Vec<(String, SupervisorError)>,
}

/// The orchestration layer: every lifecycle operation is a load-modify-save
/// over the registry store, with process side effects (spawn, signal)
/// sequenced around the lock. Stateless between invocations: the persisted
/// registry plus OS queries are the only inputs.
///
/// Concurrent operations against the same record resolve in
/// lock-acquisition order; the last successful acquirer wins. The stop
/// path's `updated_at` compare-and-set keeps a stale termination
/// confirmation from overwriting a record that has already moved on.
pub struct Supervisor {
    store: RegistryStore,
    workdir: Workdir,
    config: Config,
}

impl Supervisor {
    pub fn new(workdir: Workdir, config: Config) -> Self {
        let store = RegistryStore::new(
            workdir.registry_file.clone(),
            workdir.lock_file.clone(),
        );
        Self {
            store,
            workdir,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers and launches a new application. Rejects a name that is
    /// already online; stopped records with the same name are left in place
    /// as history.
    pub fn start(&self, name: &str, script: &Path, opts: StartOptions) -> Result<ProcessRecord> {
        let script = script
            .canonicalize()
            .map_err(|_| SupervisorError::ScriptMissing(script.to_path_buf()))?;
        self.store
            .with_lock(|records| self.start_locked(records, name, &script, &opts))
    }

    /// The shared start body, run under the registry lock so the duplicate
    /// check, id allocation, spawn and persist cannot interleave with other
    /// mutators.
    fn start_locked(
        &self,
        records: &mut Vec<ProcessRecord>,
        name: &str,
        script: &Path,
        opts: &StartOptions,
    ) -> Result<ProcessRecord> {
        if records.iter().any(|r| r.name == name && r.is_online()) {
            return Err(SupervisorError::AlreadyRunning(name.to_string()));
        }
        if !script.exists() {
            return Err(SupervisorError::ScriptMissing(script.to_path_buf()));
        }

        let id = opts.reuse_id.unwrap_or_else(|| allocate_id(records));
        let now = Utc::now();
        let mut record = ProcessRecord {
            id,
            name: name.to_string(),
            pid: None,
            script_path: script.to_path_buf(),
            log_path: self.workdir.log_path(name),
            error_log_path: self.workdir.error_log_path(name),
            status: ProcessStatus::Online,
            instances: opts.instances,
            restarts: opts.restarts,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            env: opts.env.clone(),
            created_at: opts.created_at.unwrap_or(now),
            updated_at: now,
        };

        let pid = launcher::launch(&record)?;
        record.pid = Some(pid);
        info!(name, id, pid, "started");
        records.push(record.clone());
        Ok(record)
    }

    /// Marks the record stopping, requests graceful termination, escalates
    /// to SIGKILL if the polite signal cannot be delivered or the grace
    /// period runs out, and settles the record to stopped. The terminal
    /// write is conditional on the `updated_at` stamped here, so whichever
    /// of this invocation and the health poller confirms first wins and the
    /// loser's write is dropped.
    pub async fn stop(&self, target: &Identifier) -> Result<ProcessRecord> {
        let (record, stamp) = self.store.with_lock(|records| {
            let idx = target
                .position(records)
                .ok_or_else(|| SupervisorError::NotFound(target.to_string()))?;
            let record = &mut records[idx];
            if record.status == ProcessStatus::Stopped {
                return Ok((record.clone(), None));
            }
            record.status = ProcessStatus::Stopping;
            record.touch();
            Ok((record.clone(), Some(record.updated_at)))
        })?;

        let Some(stamp) = stamp else {
            // already stopped; nothing to signal
            return Ok(record);
        };

        if let Some(pid) = record.pid {
            if let Err(err) = poller::terminate(pid) {
                warn!(name = %record.name, pid, %err, "graceful signal failed; escalating");
                poller::force_kill(pid);
            }

            let deadline = tokio::time::Instant::now() + self.config.grace_period();
            loop {
                if !poller::process_alive(pid) {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(name = %record.name, pid, "grace period expired; sending SIGKILL");
                    // the forced signal is authoritative
                    poller::force_kill(pid);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(SETTLE_POLL_MS)).await;
            }
        }

        let settled = self.store.with_lock(|records| {
            let Some(current) = records.iter_mut().find(|r| r.id == record.id) else {
                return Ok(None);
            };
            if current.status == ProcessStatus::Stopping && current.updated_at == stamp {
                current.status = ProcessStatus::Stopped;
                current.touch();
                debug!(name = %current.name, "settled to stopped");
            }
            Ok(Some(current.clone()))
        })?;

        match settled {
            Some(current) => Ok(current),
            // deleted concurrently; report the last state this invocation saw
            None => {
                let mut record = record;
                record.status = ProcessStatus::Stopped;
                Ok(record)
            }
        }
    }

    /// Stop, wait for the registry to confirm `stopped`, then relaunch
    /// under the same identity: `id`, `created_at`, `env` and `instances`
    /// carry over and `restarts` increments. The removal of the old record
    /// and the replacement start share one critical section so no
    /// concurrent start can claim the id in between.
    pub async fn restart(&self, target: &Identifier) -> Result<ProcessRecord> {
        let records = self.store.read()?;
        let record = target
            .find(&records)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(target.to_string()))?;

        if record.status != ProcessStatus::Stopped {
            self.stop(&Identifier::Numeric(record.id)).await?;
        }
        let old = self.wait_for_stopped(record.id, &record.name).await?;

        let opts = StartOptions {
            instances: old.instances,
            env: old.env.clone(),
            reuse_id: Some(old.id),
            restarts: old.restarts + 1,
            created_at: Some(old.created_at),
        };

        self.store.with_lock(|records| {
            let idx = records.iter().position(|r| r.id == old.id).ok_or_else(|| {
                SupervisorError::RestartLost(
                    old.name.clone(),
                    "record disappeared before relaunch".into(),
                )
            })?;
            records.remove(idx);
            self.start_locked(records, &old.name, &old.script_path, &opts)
        })
    }

    /// Removes a record. With `stop_first` (the default) an online process
    /// is stopped and its exit confirmed before the record goes away;
    /// without it the record is removed immediately and the OS process, if
    /// any, is deliberately left running.
    pub async fn delete(&self, target: &Identifier, stop_first: bool) -> Result<ProcessRecord> {
        let records = self.store.read()?;
        let record = target
            .find(&records)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(target.to_string()))?;

        if stop_first && record.status != ProcessStatus::Stopped {
            self.stop(&Identifier::Numeric(record.id)).await?;
            if let Some(pid) = record.pid {
                // SIGKILL has been sent by now if needed; an unkillable
                // process is an explicit failure, not a silent orphan
                let deadline = tokio::time::Instant::now() + self.config.settle_timeout();
                while poller::process_alive(pid) {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(SupervisorError::DeleteTimedOut(record.name.clone()));
                    }
                    tokio::time::sleep(Duration::from_millis(SETTLE_POLL_MS)).await;
                }
            }
        }

        self.store.with_lock(|records| {
            match records.iter().position(|r| r.id == record.id) {
                Some(idx) => {
                    let removed = records.remove(idx);
                    info!(name = %removed.name, id = removed.id, "deleted");
                    Ok(removed)
                }
                // removed concurrently; the goal state holds either way
                None => Ok(record.clone()),
            }
        })
    }

    /// Drops every record that is not online. Running it again with no
    /// intervening start removes nothing.
    pub fn prune(&self) -> Result<usize> {
        self.store.with_lock(|records| {
            let before = records.len();
            records.retain(|r| r.is_online());
            let removed = before - records.len();
            if removed > 0 {
                info!(removed, "pruned non-online records");
            }
            Ok(removed)
        })
    }

    /// Writes an immutable point-in-time copy of the registry to the
    /// snapshot file. Returns the number of records captured.
    pub fn save_snapshot(&self) -> Result<usize> {
        let records = self.store.read()?;
        write_records(&self.workdir.snapshot_file, &records)?;
        info!(count = records.len(), snapshot = %self.workdir.snapshot_file.display(), "snapshot saved");
        Ok(records.len())
    }

    /// Re-starts every snapshot entry whose script still exists. Fresh ids
    /// and `created_at`s are assigned and restart counters reset: a
    /// snapshot is a manifest for relaunching, not live state to restore.
    pub fn resurrect(&self) -> Result<ResurrectReport> {
        if !self.workdir.snapshot_file.exists() {
            return Err(SupervisorError::SnapshotMissing(
                self.workdir.snapshot_file.clone(),
            ));
        }
        let entries = read_records(&self.workdir.snapshot_file)?;

        let mut report = ResurrectReport {
            started: Vec::new(),
            skipped: Vec::new(),
        };
        for entry in entries {
            let opts = StartOptions {
                instances: entry.instances,
                env: entry.env.clone(),
                ..Default::default()
            };
            match self.start(&entry.name, &entry.script_path, opts) {
                Ok(record) => report.started.push(record),
                Err(err) => {
                    warn!(name = %entry.name, %err, "skipped during resurrect");
                    report.skipped.push((entry.name, err));
                }
            }
        }
        Ok(report)
    }

    /// Current records, after one reconciliation pass so liveness is fresh.
    pub fn list(&self) -> Result<Vec<ProcessRecord>> {
        let mut poller = HealthPoller::new(self.config.grace_period());
        self.store.with_lock(|records| {
            poller.poll_once(records);
            Ok(records.clone())
        })
    }

    pub fn show(&self, target: &Identifier) -> Result<ProcessRecord> {
        let records = self.store.read()?;
        target
            .find(&records)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(target.to_string()))
    }

    /// Log file locations for the external tailing collaborator.
    pub fn logs(&self, target: &Identifier) -> Result<(PathBuf, PathBuf)> {
        let record = self.show(target)?;
        Ok((record.log_path, record.error_log_path))
    }

    /// Truncates log files for one record, or for all of them. Best-effort:
    /// a child holding the file in append mode keeps writing at the new
    /// end, and files that do not exist yet are skipped.
    pub fn flush(&self, target: Option<&Identifier>) -> Result<usize> {
        let records = self.store.read()?;
        let selected: Vec<&ProcessRecord> = match target {
            Some(target) => {
                let record = target
                    .find(&records)
                    .ok_or_else(|| SupervisorError::NotFound(target.to_string()))?;
                vec![record]
            }
            None => records.iter().collect(),
        };

        let mut flushed = 0;
        for record in selected {
            for path in [&record.log_path, &record.error_log_path] {
                if path.exists() {
                    OpenOptions::new().write(true).truncate(true).open(path)?;
                    flushed += 1;
                }
            }
        }
        Ok(flushed)
    }

    /// One reconciliation pass under the registry lock; the daemon calls
    /// this on every tick with its long-lived poller.
    pub fn poll_registry(&self, poller: &mut HealthPoller) -> Result<usize> {
        self.store.with_lock(|records| Ok(poller.poll_once(records)))
    }

    /// Polls the registry until the record settles to stopped. Bounded by
    /// the settle timeout, since a fixed sleep would silently assume a bounded
    /// shutdown time.
    async fn wait_for_stopped(&self, id: u32, name: &str) -> Result<ProcessRecord> {
        let deadline = tokio::time::Instant::now() + self.config.settle_timeout();
        loop {
            let records = self.store.read()?;
            match records.iter().find(|r| r.id == id) {
                None => {
                    return Err(SupervisorError::RestartLost(
                        name.to_string(),
                        "record disappeared while stopping".into(),
                    ))
                }
                Some(record) if record.status == ProcessStatus::Stopped => {
                    return Ok(record.clone())
                }
                Some(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::RestartLost(
                    name.to_string(),
                    "did not settle to stopped within the timeout".into(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(SETTLE_POLL_MS)).await;
        }
    }
}
