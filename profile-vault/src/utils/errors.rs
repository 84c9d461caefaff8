//! Custom error types for the profile vault.

use crate::remote::RemoteError;
use crate::snapshot::size::SizeLimit;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Remote store temporarily unavailable: {source}. {}", .source.remediation())]
    TransientRemote { source: RemoteError },

    #[error("Authentication error: {message}{}", format_diagnostics(.diagnostics))]
    Auth {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("{}", format_size_exceeded(.raw_bytes, .encoded_bytes, .limit, .subtree_excluded))]
    SizeExceeded {
        raw_bytes: u64,
        encoded_bytes: u64,
        limit: SizeLimit,
        subtree_excluded: bool,
    },

    #[error("Integrity check failed:\n{}", format_issues(.issues))]
    Integrity { issues: Vec<String> },

    #[error("Profile '{profile}' not found. {}", format_available(.available))]
    NotFound {
        profile: String,
        available: Vec<String>,
    },

    #[error("No configuration files found in any source path; nothing to snapshot")]
    IncompleteSource,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("File watcher error: {0}")]
    Watch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// Watch mode stops only when a save can never succeed without user action.
    pub fn is_fatal_for_watch(&self) -> bool {
        matches!(self, VaultError::SizeExceeded { .. })
    }

    /// Lift an adapter failure into the engine taxonomy.
    ///
    /// `TooLarge` carries no size information from the service, so callers
    /// that know the payload size should build `SizeExceeded` themselves.
    pub fn from_remote(err: RemoteError, diagnostics: Option<String>) -> Self {
        if let RemoteError::Auth(message) = &err {
            return VaultError::Auth {
                message: format!("{}. {}", message, err.remediation()),
                diagnostics,
            };
        }
        VaultError::TransientRemote { source: err }
    }
}

fn format_diagnostics(diagnostics: &Option<String>) -> String {
    match diagnostics {
        Some(d) if !d.trim().is_empty() => format!("\n\nCurrent authentication state:\n{}", d.trim_end()),
        _ => String::new(),
    }
}

fn format_issues(issues: &[String]) -> String {
    issues
        .iter()
        .map(|i| format!("  - {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        "No profiles are stored yet.".to_string()
    } else {
        format!("Available profiles: {}", available.join(", "))
    }
}

fn format_size_exceeded(raw: &u64, encoded: &u64, limit: &SizeLimit, subtree_excluded: &bool) -> String {
    let hint = if *subtree_excluded {
        "The snapshot is still too large with the project history excluded; remove large files from the configuration directory."
    } else {
        "Retry with --skip-projects to leave the project history out of the snapshot."
    };
    format!(
        "Snapshot too large: {} raw, {} encoded exceeds the {} ({}). {}",
        format_mib(*raw),
        format_mib(*encoded),
        limit.describe(),
        format_mib(limit.bytes()),
        hint
    )
}

pub(crate) fn format_mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
}

pub type Result<T> = std::result::Result<T, VaultError>;
