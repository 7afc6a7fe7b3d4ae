pub const REGISTRY_FILE: &str = "registry.json";
pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const LOCK_FILE: &str = "registry.lock";
pub const LOGS_DIR: &str = "logs";

pub const DAEMON_PID_FILE: &str = "shepd.pid";
pub const DAEMON_STDOUT_FILE: &str = "shepd.out";
pub const DAEMON_STDERR_FILE: &str = "shepd.err";
pub const DAEMON_LOG_FILE: &str = "daemon.log";
pub const CONFIG_FILE: &str = "config.toml";

pub const WORK_DIR_ENV: &str = "SHEPD_HOME";
pub const FALLBACK_WORK_DIR: &str = "/tmp/shepd";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;
pub const DEFAULT_SETTLE_TIMEOUT_SECS: u64 = 40;
pub const SETTLE_POLL_MS: u64 = 100;
