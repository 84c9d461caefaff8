//! Pre-flight and post-download verification of snapshot contents.
//!
//! The local check runs before every store, the packaged check against
//! every unpacked download.

use crate::config::{Config, VerifyItem};
use crate::credentials::{CredentialBridge, CredentialRecord, CredentialShape};
use crate::fs::HomeResolver;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub level: IssueLevel,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            IssueLevel::Error => write!(f, "error: {}", self.message),
            IssueLevel::Warning => write!(f, "warning: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub issues: Vec<Issue>,
}

impl VerifyReport {
    pub fn valid(&self) -> bool {
        self.issues.iter().all(|i| i.level == IssueLevel::Warning)
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages(IssueLevel::Error)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(IssueLevel::Warning)
    }

    fn messages(&self, level: IssueLevel) -> Vec<String> {
        self.issues
            .iter()
            .filter(|i| i.level == level)
            .map(|i| i.message.clone())
            .collect()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.issues.push(Issue {
            level: IssueLevel::Error,
            message: message.into(),
        });
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.issues.push(Issue {
            level: IssueLevel::Warning,
            message: message.into(),
        });
    }

    fn missing(&mut self, item: &VerifyItem, location: &Path) {
        let message = format!("{} not found at {}", item.label, location.display());
        if item.required {
            self.error(message);
        } else {
            self.warning(message);
        }
    }
}

/// Result of inspecting one credential document.
enum CredentialCheck {
    Absent,
    Unparseable(String),
    Unusable(String),
    Usable(CredentialRecord),
}

fn check_credential_file(path: &Path, label: &str) -> CredentialCheck {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CredentialCheck::Absent,
        Err(e) => return CredentialCheck::Unparseable(format!("{} could not be read: {}", label, e)),
    };

    let record = match CredentialRecord::parse(&text) {
        Ok(record) => record,
        Err(e) => {
            return CredentialCheck::Unparseable(format!("{} is not valid JSON: {}", label, e))
        }
    };

    if record.shape() == CredentialShape::Unknown {
        return CredentialCheck::Unusable(format!("{} has an unrecognized format", label));
    }
    if !record.is_usable() {
        return CredentialCheck::Unusable(format!(
            "{} is missing {}",
            label,
            record.missing_fields().join(" and ")
        ));
    }
    CredentialCheck::Usable(record)
}

#[derive(Clone)]
pub struct Verifier {
    items: Vec<VerifyItem>,
    home: HomeResolver,
    bridge: CredentialBridge,
    credential_archive_path: String,
    keychain_export_name: String,
}

impl Verifier {
    pub fn new(config: &Config, home: &HomeResolver, bridge: CredentialBridge) -> Self {
        Self {
            items: config.verify.items.clone(),
            home: home.clone(),
            bridge,
            credential_archive_path: config.credentials.credential_archive_path.clone(),
            keychain_export_name: config.snapshot.keychain_export_name.clone(),
        }
    }

    /// Check the live configuration before it is snapshotted.
    pub fn verify_local(&self) -> VerifyReport {
        let mut report = VerifyReport::default();

        for item in &self.items {
            let path = self.home.resolve(&item.local_path);
            if !path.exists() {
                report.missing(item, &path);
            }
        }

        // a usable native record makes the credential file optional
        if self.bridge.native_usable().is_some() {
            return report;
        }

        let path = self.bridge.file_path().to_path_buf();
        match check_credential_file(&path, "credential file") {
            CredentialCheck::Usable(_) => {}
            CredentialCheck::Absent => {
                let mut message = format!("credentials not found at {}", path.display());
                if self.bridge.platform().has_native_store() {
                    message.push_str(" and the keychain holds no usable record");
                }
                report.error(message);
            }
            CredentialCheck::Unparseable(message) | CredentialCheck::Unusable(message) => {
                report.error(message)
            }
        }

        report
    }

    /// Check an unpacked snapshot rooted at `root`.
    pub fn verify_packaged(&self, root: &Path) -> VerifyReport {
        let mut report = VerifyReport::default();

        for item in &self.items {
            let path = root.join(&item.archive_path);
            if !path.exists() {
                report.missing(item, Path::new(&item.archive_path));
            }
        }

        let mut usable = 0usize;
        let mut unusable = Vec::new();
        for (path, label) in self.credential_forms(root) {
            match check_credential_file(&path, &label) {
                CredentialCheck::Absent => {}
                CredentialCheck::Unparseable(message) => report.error(message),
                CredentialCheck::Unusable(message) => unusable.push(message),
                CredentialCheck::Usable(_) => usable += 1,
            }
        }

        if usable == 0 {
            if unusable.is_empty() {
                report.error(format!(
                    "no credentials in snapshot: expected {} or {}",
                    self.keychain_export_name, self.credential_archive_path
                ));
            }
            for message in unusable {
                report.error(message);
            }
        } else {
            for message in unusable {
                report.warning(message);
            }
        }

        report
    }

    /// First usable credential record in an unpacked snapshot, preferring
    /// the keychain export.
    pub fn packaged_credential(&self, root: &Path) -> Option<CredentialRecord> {
        self.credential_forms(root)
            .into_iter()
            .find_map(|(path, label)| match check_credential_file(&path, &label) {
                CredentialCheck::Usable(record) => Some(record),
                _ => None,
            })
    }

    fn credential_forms(&self, root: &Path) -> [(PathBuf, String); 2] {
        [
            (
                root.join(&self.keychain_export_name),
                format!("keychain export {}", self.keychain_export_name),
            ),
            (
                root.join(&self.credential_archive_path),
                format!("credential file {}", self.credential_archive_path),
            ),
        ]
    }
}
