pub mod identifier;
pub mod process;

pub use identifier::Identifier;
pub use process::{ProcessRecord, ProcessStatus, StartOptions};
