pub mod constants;
pub mod error;
pub mod message;
pub mod types;
pub mod workdir;
