//! Resolution of `~/`-prefixed configuration paths.

use std::path::{Path, PathBuf};

/// Resolves configured paths against one home directory.
#[derive(Debug, Clone)]
pub struct HomeResolver {
    home: PathBuf,
}

impl HomeResolver {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolver for the current user, `None` when no home directory is known.
    pub fn current() -> Option<Self> {
        dirs::home_dir().map(Self::new)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Expand a leading `~` or `~/`; other paths are returned as given.
    pub fn resolve(&self, path: &str) -> PathBuf {
        if path == "~" {
            return self.home.clone();
        }
        match path.strip_prefix("~/") {
            Some(rest) => self.home.join(rest),
            None => PathBuf::from(path),
        }
    }
}
