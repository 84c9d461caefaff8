//! Configuration management for the profile vault.
//!
//! Defaults describe the reference deployment. An optional TOML file and
//! `PROFILE_VAULT__`-prefixed environment variables are layered on top.

use crate::utils::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sources: Vec<SourceEntry>,
    pub snapshot: SnapshotConfig,
    pub credentials: CredentialConfig,
    pub verify: VerifyConfig,
    pub remote: RemoteConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

/// One configured backup unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Local path, `~/` is resolved against the home directory
    pub source_path: String,

    /// Root entry name inside the archive
    pub archive_name: String,

    /// Whether `--skip-projects` may drop the excluded subtree from this entry
    #[serde(default)]
    pub can_exclude_subtree: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory name of the root container (nested copies are never archived)
    #[serde(default = "default_root_dir_name")]
    pub root_dir_name: String,

    /// Bulky subtree dropped by `--skip-projects`
    #[serde(default = "default_excluded_subtree")]
    pub excluded_subtree: String,

    /// Token treated as the home directory in relative paths
    #[serde(default = "default_home_alias")]
    pub home_alias: String,

    /// Archive-root name of the native secret store export
    #[serde(default = "default_keychain_export_name")]
    pub keychain_export_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Service name of the keychain item
    #[serde(default = "default_keychain_service")]
    pub keychain_service: String,

    /// Credential file used where no native secret store exists
    #[serde(default = "default_credential_file")]
    pub credential_file: String,

    /// Path of the credential file inside the archive
    #[serde(default = "default_credential_archive_path")]
    pub credential_archive_path: String,

    #[serde(default = "default_scope")]
    pub default_scope: String,

    #[serde(default = "default_subscription_type")]
    pub default_subscription_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    pub items: Vec<VerifyItem>,
}

/// A file the verifier expects to find, locally and inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyItem {
    pub label: String,
    pub local_path: String,
    pub archive_path: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Description tag identifying the collection
    #[serde(default = "default_collection_description")]
    pub collection_description: String,

    /// Suffix appended to profile names to form blob names
    #[serde(default = "default_blob_extension")]
    pub blob_extension: String,

    /// GitHub CLI executable
    #[serde(default = "default_gh_binary")]
    pub gh_binary: String,

    /// File created alongside the description when the collection is new
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Quiet period before a burst of changes triggers a save
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Minimum time between two successful saves
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    /// Keychain fingerprint poll period
    #[serde(default = "default_keychain_poll_secs")]
    pub keychain_poll_secs: u64,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// How long shutdown waits for an in-flight save
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Default file used by a bare `--log`
    #[serde(default = "default_log_file")]
    pub file: String,
}

// Default values
fn default_root_dir_name() -> String {
    ".claude".to_string()
}

fn default_excluded_subtree() -> String {
    "projects".to_string()
}

fn default_home_alias() -> String {
    "~".to_string()
}

fn default_keychain_export_name() -> String {
    "keychain-credentials.json".to_string()
}

fn default_keychain_service() -> String {
    "Claude Code-credentials".to_string()
}

fn default_credential_file() -> String {
    "~/.claude/.credentials.json".to_string()
}

fn default_credential_archive_path() -> String {
    ".claude/.credentials.json".to_string()
}

fn default_scope() -> String {
    "user:inference".to_string()
}

fn default_subscription_type() -> String {
    "max".to_string()
}

fn default_collection_description() -> String {
    "profile-vault: configuration profiles".to_string()
}

fn default_blob_extension() -> String {
    "tar.zst.b64".to_string()
}

fn default_gh_binary() -> String {
    "gh".to_string()
}

fn default_placeholder_name() -> String {
    "README.md".to_string()
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_min_interval_secs() -> u64 {
    30
}

fn default_keychain_poll_secs() -> u64 {
    5
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "~/.profile-vault.log".to_string()
}

impl Config {
    /// Layer defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())
            .map_err(|e| VaultError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            if !path.exists() {
                return Err(VaultError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("PROFILE_VAULT")
                .prefix_separator("__")
                .separator("__"),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(VaultError::Config("at least one source entry is required".into()));
        }
        if self.watch.debounce_ms == 0 {
            return Err(VaultError::Config("watch.debounce_ms must be positive".into()));
        }
        if self.remote.blob_extension.is_empty() {
            return Err(VaultError::Config("remote.blob_extension must not be empty".into()));
        }
        Ok(())
    }

    /// Create a default configuration
    pub fn default() -> Self {
        Config {
            sources: vec![
                SourceEntry {
                    source_path: "~/.claude".to_string(),
                    archive_name: ".claude".to_string(),
                    can_exclude_subtree: true,
                },
                SourceEntry {
                    source_path: "~/.claude.json".to_string(),
                    archive_name: ".claude.json".to_string(),
                    can_exclude_subtree: false,
                },
                SourceEntry {
                    source_path: "~/.claude.json.backup".to_string(),
                    archive_name: ".claude.json.backup".to_string(),
                    can_exclude_subtree: false,
                },
            ],
            snapshot: SnapshotConfig {
                root_dir_name: default_root_dir_name(),
                excluded_subtree: default_excluded_subtree(),
                home_alias: default_home_alias(),
                keychain_export_name: default_keychain_export_name(),
            },
            credentials: CredentialConfig {
                keychain_service: default_keychain_service(),
                credential_file: default_credential_file(),
                credential_archive_path: default_credential_archive_path(),
                default_scope: default_scope(),
                default_subscription_type: default_subscription_type(),
            },
            verify: VerifyConfig {
                items: vec![
                    VerifyItem {
                        label: "global settings".to_string(),
                        local_path: "~/.claude.json".to_string(),
                        archive_path: ".claude.json".to_string(),
                        required: true,
                    },
                    VerifyItem {
                        label: "user settings".to_string(),
                        local_path: "~/.claude/settings.json".to_string(),
                        archive_path: ".claude/settings.json".to_string(),
                        required: false,
                    },
                    VerifyItem {
                        label: "user memory".to_string(),
                        local_path: "~/.claude/CLAUDE.md".to_string(),
                        archive_path: ".claude/CLAUDE.md".to_string(),
                        required: false,
                    },
                ],
            },
            remote: RemoteConfig {
                collection_description: default_collection_description(),
                blob_extension: default_blob_extension(),
                gh_binary: default_gh_binary(),
                placeholder_name: default_placeholder_name(),
            },
            watch: WatchConfig {
                debounce_ms: default_debounce_ms(),
                min_interval_secs: default_min_interval_secs(),
                keychain_poll_secs: default_keychain_poll_secs(),
                backoff_base_secs: default_backoff_base_secs(),
                backoff_max_secs: default_backoff_max_secs(),
                shutdown_grace_secs: default_shutdown_grace_secs(),
            },
            log: LogConfig {
                level: default_log_level(),
                file: default_log_file(),
            },
        }
    }
}
