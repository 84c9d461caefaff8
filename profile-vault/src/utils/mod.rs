//! Utility modules for the profile vault.

pub mod errors;
pub mod logger;
pub mod output;

pub use errors::{Result, VaultError};
pub use output::OutputSink;
