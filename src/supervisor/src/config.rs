use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::Config as RConfig;
use serde::{Deserialize, Serialize};
use shepd_common::constants::{
    CONFIG_FILE, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SETTLE_TIMEOUT_SECS,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub poll_interval_ms: u64,
    pub grace_period_secs: u64,
    pub settle_timeout_secs: u64,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            settle_timeout_secs: DEFAULT_SETTLE_TIMEOUT_SECS,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, overridden by `config.toml` in the work directory when one
    /// exists, overridden by `SHEPD_*` environment variables.
    pub fn load(work_dir: &Path) -> Result<Config> {
        let mut builder = RConfig::builder()
            .set_default("poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?
            .set_default("grace_period_secs", DEFAULT_GRACE_PERIOD_SECS)?
            .set_default("settle_timeout_secs", DEFAULT_SETTLE_TIMEOUT_SECS)?;

        let config_file = work_dir.join(CONFIG_FILE);
        if config_file.exists() {
            builder = builder.add_source(config::File::from(config_file));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SHEPD").try_parsing(true),
        );

        builder
            .build()?
            .try_deserialize()
            .context("failed to parse configuration")
    }
}
