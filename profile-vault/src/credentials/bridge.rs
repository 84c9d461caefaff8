//! Platform routing for credential reads and writes.

use super::record::{CredentialDefaults, CredentialRecord};
use super::store::{FileSecretStore, KeychainStore, SecretStore};
use super::Platform;
use crate::config::CredentialConfig;
use crate::fs::HomeResolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads, writes and converts credentials for one platform.
#[derive(Clone)]
pub struct CredentialBridge {
    platform: Platform,
    keychain: Arc<dyn SecretStore>,
    file: Arc<dyn SecretStore>,
    file_path: PathBuf,
    defaults: CredentialDefaults,
}

impl CredentialBridge {
    pub fn new(
        platform: Platform,
        keychain: Arc<dyn SecretStore>,
        file_path: impl Into<PathBuf>,
        defaults: CredentialDefaults,
    ) -> Self {
        let file_path = file_path.into();
        Self {
            platform,
            keychain,
            file: Arc::new(FileSecretStore::new(&file_path)),
            file_path,
            defaults,
        }
    }

    /// Bridge for the running machine.
    pub fn for_current_platform(config: &CredentialConfig, home: &HomeResolver) -> Self {
        Self::new(
            Platform::current(),
            Arc::new(KeychainStore::new(&config.keychain_service)),
            home.resolve(&config.credential_file),
            defaults_from(config),
        )
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn defaults(&self) -> &CredentialDefaults {
        &self.defaults
    }

    /// Current record from the platform's store, None if absent or not JSON.
    pub fn read(&self) -> Option<CredentialRecord> {
        let raw = self.store().read()?;
        match CredentialRecord::parse(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Stored credentials in {} are not valid JSON: {}", self.platform.description(), e);
                None
            }
        }
    }

    /// Raw serialized record exactly as stored, used for fingerprinting.
    pub fn read_raw(&self) -> Option<String> {
        self.store().read()
    }

    /// Convert to this platform's shape and store. Never fails loudly.
    pub fn write(&self, record: &CredentialRecord) -> bool {
        let converted = self.convert(record);
        let serialized = match self.platform {
            Platform::Keychain => Ok(converted.to_json()),
            Platform::File => converted.to_json_pretty(),
        };
        let serialized = match serialized {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize credentials: {}", e);
                return false;
            }
        };

        match self.store().write(&serialized) {
            Ok(()) => {
                debug!("Credentials written to {}", self.platform.description());
                true
            }
            Err(e) => {
                warn!("Failed to write credentials to {}: {}", self.platform.description(), e);
                false
            }
        }
    }

    pub fn convert(&self, record: &CredentialRecord) -> CredentialRecord {
        record.convert(self.platform, &self.defaults)
    }

    /// Usable record in the native store; always None on the file platform.
    pub fn native_usable(&self) -> Option<CredentialRecord> {
        if !self.platform.has_native_store() {
            return None;
        }
        self.read().filter(CredentialRecord::is_usable)
    }

    fn store(&self) -> &dyn SecretStore {
        match self.platform {
            Platform::Keychain => self.keychain.as_ref(),
            Platform::File => self.file.as_ref(),
        }
    }
}

pub fn defaults_from(config: &CredentialConfig) -> CredentialDefaults {
    CredentialDefaults {
        scope: config.default_scope.clone(),
        subscription_type: config.default_subscription_type.clone(),
    }
}
