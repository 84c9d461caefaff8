//! profile-vault library
//!
//! Backs up and restores an application's configuration directory and
//! credentials as named profiles in a private gist, with a watch mode that
//! saves changes as they happen.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod profile;
pub mod remote;
pub mod snapshot;
pub mod utils;
pub mod verify;
pub mod watch;

// Re-export commonly used types
pub use config::Config;
pub use executor::Vault;
pub use profile::ProfileName;
pub use utils::errors::{Result, VaultError};
