use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(
    name = "shepd",
    about = "A lightweight supervisor for long-running local processes",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a script and register it with the supervisor
    Start {
        /// Path to the script or binary to run
        script: PathBuf,
        /// Registered name; defaults to the script's file stem
        #[clap(long, short)]
        name: Option<String>,
        /// Desired instance count (recorded, not yet scheduled)
        #[clap(long, default_value_t = 1)]
        instances: u32,
        /// Environment overrides, KEY=VALUE, repeatable
        #[clap(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },

    /// Gracefully stop a process by id, pid, or name
    Stop { target: String },

    /// Stop and relaunch a process, preserving its identity
    Restart { target: String },

    /// Remove a process from the registry
    Delete {
        target: String,
        /// Remove the record without stopping the OS process first
        #[clap(long)]
        no_stop: bool,
    },

    /// List every registered process, refreshing liveness first
    List,

    /// Show one record in full
    Show { target: String },

    /// Drop every record that is not currently online
    Prune,

    /// Write a snapshot of the registry for later resurrection
    Save,

    /// Relaunch every snapshot entry whose script still exists
    Resurrect,

    /// Print the log file locations for a process
    Logs {
        target: String,
        /// Follow the log output instead of just printing the paths
        #[clap(long, short)]
        follow: bool,
    },

    /// Truncate log files for one process, or for all of them
    Flush { target: Option<String> },

    /// Run the health-polling daemon
    Daemon {
        /// Stay in the foreground and log to stderr
        #[clap(long)]
        no_daemonize: bool,
    },

    /// Terminate a running daemon
    Kill,

    /// Remove stale daemon files left behind after a crash
    Cleanup,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}
