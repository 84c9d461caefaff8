//! Snapshot collection and packaging.
//!
//! Collection enumerates every configured source, filters the result with
//! [`PathFilter`], reads surviving files and (on the keychain platform) the
//! native credential record. Packaging turns the collected contents into a
//! single archive plus its fingerprint.

use super::archive::{self, ArchiveEntry};
use super::fingerprint::fingerprint;
use crate::config::{Config, SourceEntry};
use crate::credentials::CredentialBridge;
use crate::fs::walker::enumerate_files;
use crate::fs::{FilterOptions, HomeResolver, PathFilter};
use crate::utils::{Result, VaultError};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Options derived from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Drop the bulky subtree from entries that allow it
    pub exclude_subtree: bool,
}

impl SnapshotOptions {
    /// Subtree exclusion applies only if both the entry and the run agree.
    pub fn filter_for(&self, entry: &SourceEntry) -> FilterOptions {
        FilterOptions {
            exclude_subtree: self.exclude_subtree && entry.can_exclude_subtree,
        }
    }
}

/// A file accepted into the snapshot.
#[derive(Debug, Clone)]
pub struct CollectedFile {
    pub archive_path: String,
    pub contents: Vec<u8>,
    pub mode: u32,
    pub mtime: u64,
}

/// Everything a snapshot will contain, before packaging.
#[derive(Debug, Clone)]
pub struct SnapshotContents {
    /// Sorted by archive path
    pub files: Vec<CollectedFile>,

    /// Serialized native credential record
    pub credential_export: Option<String>,

    pub subtree_excluded: bool,
}

impl SnapshotContents {
    pub fn fingerprint(&self) -> String {
        fingerprint(
            self.files
                .iter()
                .map(|f| (f.archive_path.as_str(), f.contents.as_slice())),
            self.credential_export.as_deref(),
        )
    }

    pub fn content_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.contents.len() as u64).sum()
    }
}

/// A packaged snapshot, immutable once built.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
    pub fingerprint: String,
    pub file_count: usize,
    pub subtree_excluded: bool,
}

/// Walks the configured sources and produces snapshots.
#[derive(Clone)]
pub struct SnapshotBuilder {
    sources: Vec<(SourceEntry, PathBuf)>,
    filter: PathFilter,
    bridge: CredentialBridge,
    keychain_export_name: String,
}

impl SnapshotBuilder {
    pub fn new(config: &Config, home: &HomeResolver, bridge: CredentialBridge) -> Self {
        let sources = config
            .sources
            .iter()
            .map(|entry| (entry.clone(), home.resolve(&entry.source_path)))
            .collect();

        Self {
            sources,
            filter: PathFilter::from_config(&config.snapshot),
            bridge,
            keychain_export_name: config.snapshot.keychain_export_name.clone(),
        }
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Configured entries with their resolved local paths.
    pub fn sources(&self) -> &[(SourceEntry, PathBuf)] {
        &self.sources
    }

    /// Collect contents without packaging them.
    ///
    /// Missing sources and unreadable files are skipped; finding no files
    /// at all is an error.
    pub fn collect(&self, options: SnapshotOptions) -> Result<SnapshotContents> {
        let mut files = Vec::new();
        let mut subtree_excluded = false;

        for (entry, path) in &self.sources {
            let filter_options = options.filter_for(entry);
            subtree_excluded |= filter_options.exclude_subtree;

            let metadata = match std::fs::metadata(path) {
                Ok(m) => m,
                Err(_) => {
                    debug!("Source {} not present, skipping", path.display());
                    continue;
                }
            };

            if metadata.is_dir() {
                self.collect_directory(entry, path, filter_options, &mut files);
            } else if !self.filter.should_exclude(&entry.archive_name, filter_options) {
                if let Some(file) = read_file(path, entry.archive_name.clone()) {
                    files.push(file);
                }
            }
        }

        if files.is_empty() {
            return Err(VaultError::IncompleteSource);
        }

        files.sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
        files.dedup_by(|a, b| a.archive_path == b.archive_path);

        let credential_export = if self.bridge.platform().has_native_store() {
            self.bridge.read().map(|record| record.to_json())
        } else {
            None
        };

        Ok(SnapshotContents {
            files,
            credential_export,
            subtree_excluded,
        })
    }

    fn collect_directory(
        &self,
        entry: &SourceEntry,
        root: &Path,
        options: FilterOptions,
        files: &mut Vec<CollectedFile>,
    ) {
        let enumerated = match enumerate_files(root) {
            Ok(found) => found,
            Err(e) => {
                warn!("Cannot read {}: {}", root.display(), e);
                return;
            }
        };

        let mut skipped = 0usize;
        for info in enumerated {
            let archive_path = format!("{}/{}", entry.archive_name, info.relative_path);
            if self.filter.should_exclude(&archive_path, options) {
                skipped += 1;
                continue;
            }
            if let Some(file) = read_file(&info.path, archive_path) {
                files.push(file);
            }
        }

        if skipped > 0 {
            debug!("Filtered {} files from {}", skipped, root.display());
        }
    }

    /// Collect and package a snapshot.
    pub fn build(&self, options: SnapshotOptions) -> Result<Snapshot> {
        let contents = self.collect(options)?;
        self.package(&contents)
    }

    /// Package already collected contents.
    pub fn package(&self, contents: &SnapshotContents) -> Result<Snapshot> {
        let mut entries: Vec<ArchiveEntry<'_>> = contents
            .files
            .iter()
            .map(|f| ArchiveEntry {
                path: &f.archive_path,
                contents: &f.contents,
                mode: f.mode,
                mtime: f.mtime,
            })
            .collect();

        if let Some(export) = &contents.credential_export {
            entries.push(ArchiveEntry {
                path: &self.keychain_export_name,
                contents: export.as_bytes(),
                mode: 0o600,
                mtime: 0,
            });
        }

        let bytes = archive::pack(entries)?;
        Ok(Snapshot {
            size_bytes: bytes.len() as u64,
            bytes,
            fingerprint: contents.fingerprint(),
            file_count: contents.files.len(),
            subtree_excluded: contents.subtree_excluded,
        })
    }

    /// Fingerprint of the current local state.
    pub fn current_fingerprint(&self, options: SnapshotOptions) -> Result<String> {
        self.collect(options).map(|c| c.fingerprint())
    }
}

fn read_file(path: &Path, archive_path: String) -> Option<CollectedFile> {
    let contents = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Skipping unreadable file {}: {}", path.display(), e);
            return None;
        }
    };

    let metadata = std::fs::metadata(path).ok();
    let mtime = metadata
        .as_ref()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        metadata.map(|m| m.permissions().mode() & 0o777).unwrap_or(0o644)
    };

    #[cfg(not(unix))]
    let mode = 0o644;

    Some(CollectedFile {
        archive_path,
        contents,
        mode,
        mtime,
    })
}
