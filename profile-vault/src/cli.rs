//! Command-line surface.
//!
//! Exactly one action per invocation, except that `--watch` may follow a
//! `--store` or `--restore` of the same profile.

use crate::utils::{Result, VaultError};
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "profile-vault",
    author,
    version,
    about = "Back up and restore configuration profiles to a private gist",
    long_about = None
)]
pub struct Args {
    /// List stored profiles
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Snapshot the local configuration into a profile
    #[arg(short = 's', long, visible_alias = "save", value_name = "NAME")]
    pub store: Option<String>,

    /// Apply a stored profile to this machine
    #[arg(short = 'r', long, value_name = "NAME")]
    pub restore: Option<String>,

    /// Delete a stored profile
    #[arg(short = 'd', long, value_name = "NAME")]
    pub delete: Option<String>,

    /// Check that a stored profile is complete
    #[arg(short = 'v', long, value_name = "NAME")]
    pub verify: Option<String>,

    /// Save local changes to a profile as they happen
    #[arg(short = 'w', long, value_name = "NAME")]
    pub watch: Option<String>,

    /// Debug-level output
    #[arg(long)]
    pub verbose: bool,

    /// Also log to a file (default path from the configuration)
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true)]
    pub log: Option<Option<PathBuf>>,

    /// Leave the project history out of the snapshot
    #[arg(long)]
    pub skip_projects: bool,

    /// Quiet period before a burst of changes is saved, in milliseconds
    #[arg(long, value_name = "MS")]
    pub debounce_delay: Option<u64>,

    /// Path to configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// What to run before watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstStep {
    Store,
    Restore,
}

/// The validated action of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    List,
    Store(String),
    Restore(String),
    Delete(String),
    Verify(String),
    Watch {
        profile: String,
        first: Option<FirstStep>,
    },
}

impl Args {
    pub fn plan(&self) -> Result<Plan> {
        if self.debounce_delay == Some(0) {
            return Err(VaultError::Validation("--debounce-delay must be positive".into()));
        }

        let given: Vec<&str> = [
            (self.list, "--list"),
            (self.store.is_some(), "--store"),
            (self.restore.is_some(), "--restore"),
            (self.delete.is_some(), "--delete"),
            (self.verify.is_some(), "--verify"),
            (self.watch.is_some(), "--watch"),
        ]
        .into_iter()
        .filter_map(|(set, flag)| set.then_some(flag))
        .collect();

        if let Some(watch) = &self.watch {
            let first = match (given.len(), &self.store, &self.restore) {
                (1, _, _) => None,
                (2, Some(name), None) => Some((FirstStep::Store, name)),
                (2, None, Some(name)) => Some((FirstStep::Restore, name)),
                _ => return Err(exclusive(&given)),
            };

            return match first {
                None => Ok(Plan::Watch {
                    profile: watch.clone(),
                    first: None,
                }),
                Some((step, name)) if name == watch => Ok(Plan::Watch {
                    profile: watch.clone(),
                    first: Some(step),
                }),
                Some((_, name)) => Err(VaultError::Validation(format!(
                    "--watch {} must name the same profile as '{}'",
                    watch, name
                ))),
            };
        }

        if given.len() > 1 {
            return Err(exclusive(&given));
        }

        if self.list {
            Ok(Plan::List)
        } else if let Some(name) = &self.store {
            Ok(Plan::Store(name.clone()))
        } else if let Some(name) = &self.restore {
            Ok(Plan::Restore(name.clone()))
        } else if let Some(name) = &self.delete {
            Ok(Plan::Delete(name.clone()))
        } else if let Some(name) = &self.verify {
            Ok(Plan::Verify(name.clone()))
        } else {
            Err(VaultError::Validation(
                "no action given: use one of --list, --store, --restore, --delete, --verify or --watch"
                    .into(),
            ))
        }
    }

    /// File sink requested with `--log`, falling back to `default`.
    pub fn log_file(&self, default: &Path) -> Option<PathBuf> {
        match &self.log {
            None => None,
            Some(None) => Some(default.to_path_buf()),
            Some(Some(path)) => Some(path.clone()),
        }
    }
}

fn exclusive(given: &[&str]) -> VaultError {
    VaultError::Validation(format!(
        "{} cannot be combined; only --watch may follow --store or --restore",
        given.join(", ")
    ))
}
