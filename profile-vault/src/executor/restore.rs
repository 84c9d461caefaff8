//! Applying a downloaded snapshot to the local machine.
//!
//! The archive is unpacked into a staging directory, verified, and then
//! merged file by file into the configured sources. Local files that the
//! snapshot does not contain are left alone. The staging directory is
//! removed on every exit path when the `TempDir` drops.

use crate::config::SourceEntry;
use crate::credentials::CredentialBridge;
use crate::fs::walker::enumerate_files;
use crate::snapshot::archive;
use crate::utils::{Result, VaultError};
use crate::verify::{Verifier, VerifyReport};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a restore changed locally.
#[derive(Debug, Clone, Default)]
pub struct RestoreOutcome {
    pub files_written: usize,
    pub credentials_written: bool,
    pub warnings: Vec<String>,
}

/// Unpack `bytes` into a fresh staging directory and verify it.
pub fn stage_and_verify(bytes: &[u8], verifier: &Verifier) -> Result<(tempfile::TempDir, VerifyReport)> {
    let staging = tempfile::Builder::new().prefix("profile-vault-").tempdir()?;
    archive::unpack(bytes, staging.path())?;
    let report = verifier.verify_packaged(staging.path());
    debug!(
        "Staged snapshot in {} ({} issues)",
        staging.path().display(),
        report.issues.len()
    );
    Ok((staging, report))
}

/// Verify, merge and write credentials. Nothing is touched locally if the
/// snapshot fails verification.
pub fn apply_snapshot(
    bytes: &[u8],
    verifier: &Verifier,
    bridge: &CredentialBridge,
    sources: &[(SourceEntry, PathBuf)],
) -> Result<RestoreOutcome> {
    let (staging, report) = stage_and_verify(bytes, verifier)?;
    if !report.valid() {
        return Err(VaultError::Integrity {
            issues: report.errors(),
        });
    }

    let files_written = merge_sources(staging.path(), sources)?;

    // written after the merge so the converted record wins over the raw file
    let credentials_written = match verifier.packaged_credential(staging.path()) {
        Some(record) => bridge.write(&record),
        None => false,
    };

    info!(
        "Restored {} files, credentials {}",
        files_written,
        if credentials_written { "updated" } else { "unchanged" }
    );

    Ok(RestoreOutcome {
        files_written,
        credentials_written,
        warnings: report.warnings(),
    })
}

/// Copy every staged source entry over its local path.
pub fn merge_sources(staged_root: &Path, sources: &[(SourceEntry, PathBuf)]) -> Result<usize> {
    let mut written = 0usize;

    for (entry, local) in sources {
        let staged = staged_root.join(&entry.archive_name);
        let metadata = match fs::metadata(&staged) {
            Ok(m) => m,
            Err(_) => {
                debug!("{} not in snapshot, leaving local copy alone", entry.archive_name);
                continue;
            }
        };

        if metadata.is_dir() {
            for info in enumerate_files(&staged)? {
                copy_file(&info.path, &local.join(&info.relative_path))?;
                written += 1;
            }
        } else {
            copy_file(&staged, local)?;
            written += 1;
        }
    }

    Ok(written)
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::{CredentialDefaults, MemorySecretStore, Platform};
    use crate::fs::HomeResolver;
    use crate::snapshot::archive::ArchiveEntry;
    use std::sync::Arc;
    use tempfile::TempDir;

    const LEGACY: &str = r#"{"access_token":"a","refresh_token":"r","expiry_date":1}"#;

    fn sources(home: &Path) -> Vec<(SourceEntry, PathBuf)> {
        let resolver = HomeResolver::new(home);
        Config::default()
            .sources
            .iter()
            .map(|e| (e.clone(), resolver.resolve(&e.source_path)))
            .collect()
    }

    fn bridge(home: &Path, platform: Platform, keychain: MemorySecretStore) -> CredentialBridge {
        CredentialBridge::new(
            platform,
            Arc::new(keychain),
            home.join(".claude/.credentials.json"),
            CredentialDefaults::default(),
        )
    }

    fn packed(entries: &[(&str, &str)]) -> Vec<u8> {
        archive::pack(entries.iter().map(|&(path, contents)| ArchiveEntry {
            path,
            contents: contents.as_bytes(),
            mode: 0o644,
            mtime: 0,
        }))
        .unwrap()
    }

    #[test]
    fn test_merge_keeps_local_extras() {
        let home = TempDir::new().unwrap();
        fs::create_dir_all(home.path().join(".claude/commands")).unwrap();
        fs::write(home.path().join(".claude/commands/local.md"), "mine").unwrap();
        fs::write(home.path().join(".claude/settings.json"), "old").unwrap();

        let staged = TempDir::new().unwrap();
        fs::create_dir_all(staged.path().join(".claude/agents")).unwrap();
        fs::write(staged.path().join(".claude/settings.json"), "new").unwrap();
        fs::write(staged.path().join(".claude/agents/reviewer.md"), "agent").unwrap();
        fs::write(staged.path().join(".claude.json"), "{}").unwrap();

        let written = merge_sources(staged.path(), &sources(home.path())).unwrap();
        assert_eq!(written, 3);
        assert_eq!(fs::read_to_string(home.path().join(".claude/settings.json")).unwrap(), "new");
        assert_eq!(fs::read_to_string(home.path().join(".claude/agents/reviewer.md")).unwrap(), "agent");
        assert_eq!(fs::read_to_string(home.path().join(".claude/commands/local.md")).unwrap(), "mine");
        assert!(home.path().join(".claude.json").exists());
        assert!(!home.path().join(".claude.json.backup").exists());
    }

    #[test]
    fn test_apply_converts_legacy_credentials() {
        let home = TempDir::new().unwrap();
        let keychain = MemorySecretStore::new();
        let bytes = packed(&[(".claude.json", "{}"), ("keychain-credentials.json", LEGACY)]);
        let config = Config::default();
        let b = bridge(home.path(), Platform::Keychain, keychain.clone());
        let verifier = Verifier::new(&config, &HomeResolver::new(home.path()), b.clone());

        let outcome = apply_snapshot(&bytes, &verifier, &b, &sources(home.path())).unwrap();
        assert!(outcome.credentials_written);
        assert_eq!(outcome.files_written, 1);
        // the side-file is not a source and stays out of the home directory
        assert!(!home.path().join("keychain-credentials.json").exists());

        let stored = keychain.get().unwrap();
        assert!(stored.contains("claudeAiOauth"));
        assert!(stored.contains("\"accessToken\":\"a\""));
    }

    #[test]
    fn test_apply_rejects_invalid_snapshot_without_touching_home() {
        let home = TempDir::new().unwrap();
        let bytes = packed(&[(".claude/settings.json", "{}")]);
        let config = Config::default();
        let b = bridge(home.path(), Platform::File, MemorySecretStore::new());
        let verifier = Verifier::new(&config, &HomeResolver::new(home.path()), b.clone());

        let err = apply_snapshot(&bytes, &verifier, &b, &sources(home.path())).unwrap_err();
        match err {
            VaultError::Integrity { issues } => {
                assert!(issues.iter().any(|i| i.contains("global settings")));
                assert!(issues.iter().any(|i| i.contains("no credentials")));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!home.path().join(".claude").exists());
    }

    #[test]
    fn test_apply_writes_credential_file_pretty() {
        let home = TempDir::new().unwrap();
        let bytes = packed(&[(".claude.json", "{}"), (".claude/.credentials.json", LEGACY)]);
        let config = Config::default();
        let b = bridge(home.path(), Platform::File, MemorySecretStore::new());
        let verifier = Verifier::new(&config, &HomeResolver::new(home.path()), b.clone());

        let outcome = apply_snapshot(&bytes, &verifier, &b, &sources(home.path())).unwrap();
        assert!(outcome.credentials_written);
        let written = fs::read_to_string(home.path().join(".claude/.credentials.json")).unwrap();
        assert!(written.contains("\"claudeAiOauth\""));
        assert!(written.contains('\n'));
    }
}
