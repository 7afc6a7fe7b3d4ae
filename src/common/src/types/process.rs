use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Online,
    Stopping,
    Stopped,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Online => write!(f, "online"),
            ProcessStatus::Stopping => write!(f, "stopping"),
            ProcessStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// The persisted representation of one supervised application. The record,
/// not any in-memory object, is the durable handle to the OS process: every
/// invocation rebuilds its knowledge from the registry plus OS queries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub script_path: PathBuf,
    pub log_path: PathBuf,
    pub error_log_path: PathBuf,
    pub status: ProcessStatus,
    pub instances: u32,
    pub restarts: u32,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessRecord {
    pub fn is_online(&self) -> bool {
        self.status == ProcessStatus::Online
    }

    /// Stamps `updated_at`. Every mutation goes through here so the
    /// compare-and-set guard in the stop path has a single value to watch.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Caller-tunable parts of a `start`. The `reuse_id`, `restarts` and
/// `created_at` carry-overs are for the internal restart path; a plain user
/// start leaves them at their defaults.
#[derive(Clone, Debug)]
pub struct StartOptions {
    pub instances: u32,
    pub env: HashMap<String, String>,
    pub reuse_id: Option<u32>,
    pub restarts: u32,
    pub created_at: Option<DateTime<Utc>>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            instances: 1,
            env: HashMap::new(),
            reuse_id: None,
            restarts: 0,
            created_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ProcessStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }

    #[test]
    fn record_roundtrips_with_absent_pid() {
        let record = ProcessRecord {
            id: 3,
            name: "api".into(),
            pid: None,
            script_path: "/srv/api/app.js".into(),
            log_path: "/tmp/shepd/logs/api.log".into(),
            error_log_path: "/tmp/shepd/logs/api-error.log".into(),
            status: ProcessStatus::Stopped,
            instances: 1,
            restarts: 2,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            env: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("\"pid\""));

        let back: ProcessRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 3);
        assert_eq!(back.pid, None);
        assert_eq!(back.restarts, 2);
        assert_eq!(back.created_at, record.created_at);
    }
}
