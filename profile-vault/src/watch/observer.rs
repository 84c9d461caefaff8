//! Filesystem change notifications for the configured sources.
//!
//! `notify` delivers events on its own thread; they are mapped to archive
//! paths, filtered and forwarded over an unbounded channel to the
//! scheduler. Dropping the [`ChangeObserver`] stops the OS watches.

use crate::config::SourceEntry;
use crate::fs::walker::to_slash_path;
use crate::fs::PathFilter;
use crate::snapshot::SnapshotOptions;
use crate::utils::{Result, VaultError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const KEYCHAIN_MARKER: &str = "<keychain>";

/// A change to something that belongs in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Archive path of the changed entry
    pub path: String,
}

impl ChangeEvent {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Synthesized when the native credential store changed.
    pub fn keychain() -> Self {
        Self::new(KEYCHAIN_MARKER)
    }
}

/// Maps local paths to archive paths and applies the snapshot filter.
#[derive(Debug, Clone)]
pub struct SourceMatcher {
    sources: Vec<(SourceEntry, PathBuf)>,
    filter: PathFilter,
    options: SnapshotOptions,
}

impl SourceMatcher {
    pub fn new(sources: &[(SourceEntry, PathBuf)], filter: PathFilter, options: SnapshotOptions) -> Self {
        Self {
            sources: sources.to_vec(),
            filter,
            options,
        }
    }

    /// Archive path for `path`, or None if it would not be snapshotted.
    pub fn archive_path(&self, path: &Path) -> Option<String> {
        for (entry, local) in &self.sources {
            let archive_path = if path == local {
                entry.archive_name.clone()
            } else if let Ok(rest) = path.strip_prefix(local) {
                format!("{}/{}", entry.archive_name, to_slash_path(rest))
            } else {
                continue;
            };

            if self.filter.should_exclude(&archive_path, self.options.filter_for(entry)) {
                return None;
            }
            return Some(archive_path);
        }
        None
    }

    /// Directories to register with the OS watcher.
    fn watch_targets(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut recursive = BTreeSet::new();
        let mut shallow = BTreeSet::new();

        for (_, local) in &self.sources {
            if local.is_dir() {
                recursive.insert(local.clone());
            } else if let Some(parent) = local.parent().filter(|p| p.is_dir()) {
                shallow.insert(parent.to_path_buf());
            } else {
                warn!("Not watching {}: parent directory missing", local.display());
            }
        }

        let recursive_targets = recursive.iter().map(|p| (p.clone(), RecursiveMode::Recursive));
        let shallow_targets = shallow
            .into_iter()
            .filter(|p| !recursive.contains(p))
            .map(|p| (p, RecursiveMode::NonRecursive));
        recursive_targets.chain(shallow_targets).collect()
    }

    fn map_event(&self, event: &Event) -> Vec<ChangeEvent> {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => event
                .paths
                .iter()
                .filter_map(|p| self.archive_path(p))
                .map(ChangeEvent::new)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Keeps the OS watches alive.
pub struct ChangeObserver {
    _watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl ChangeObserver {
    /// Watch every configured source and stream relevant changes.
    pub fn start(matcher: SourceMatcher) -> Result<(Self, mpsc::UnboundedReceiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let targets = matcher.watch_targets();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in matcher.map_event(&event) {
                    if tx.send(change).is_err() {
                        debug!("Change receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => error!("File watcher error: {}", e),
        })
        .map_err(|e| VaultError::Watch(e.to_string()))?;

        let mut watched = Vec::new();
        for (path, mode) in targets {
            watcher
                .watch(&path, mode)
                .map_err(|e| VaultError::Watch(format!("{}: {}", path.display(), e)))?;
            debug!("Watching {} ({:?})", path.display(), mode);
            watched.push(path);
        }

        if watched.is_empty() {
            return Err(VaultError::Watch("none of the configured sources exist".into()));
        }
        info!("Observing {} locations", watched.len());

        Ok((
            Self {
                _watcher: watcher,
                watched,
            },
            rx,
        ))
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}
