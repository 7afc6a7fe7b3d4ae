pub mod config;
pub mod controller;
pub mod launcher;
pub mod poller;
pub mod store;

pub use config::{Config, ConfigLoader};
pub use controller::{ResurrectReport, Supervisor};
