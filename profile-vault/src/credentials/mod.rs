//! Credential storage and schema conversion.
//!
//! Two platforms are recognised: one with a native secret store (the macOS
//! keychain) and one where credentials live in a JSON file under the
//! configuration root. Records come in a wrapped shape and a flat legacy
//! shape; both platforms converge on the wrapped shape.

pub mod bridge;
pub mod record;
pub mod store;

pub use bridge::CredentialBridge;
pub use record::{CredentialDefaults, CredentialRecord, CredentialShape, WRAPPER_KEY};
pub use store::{FileSecretStore, KeychainStore, MemorySecretStore, SecretStore};

/// Where credentials are kept on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Native secret store (macOS keychain)
    Keychain,
    /// JSON credential file
    File,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Keychain
        } else {
            Platform::File
        }
    }

    pub fn has_native_store(&self) -> bool {
        matches!(self, Platform::Keychain)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Platform::Keychain => "macOS Keychain",
            Platform::File => "credential file",
        }
    }
}
