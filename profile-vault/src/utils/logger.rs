//! Logging configuration using tracing.
//!
//! Sinks are resolved once at startup: console output always, plus an
//! optional append-only log file.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Resolved logging sinks for one invocation.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Level used when RUST_LOG is unset
    pub level: String,

    /// Force debug output (`--verbose`)
    pub verbose: bool,

    /// Optional file sink
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Effective filter directive before RUST_LOG is consulted.
    pub fn directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }
}

/// Initialize logging with the configured sinks
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(settings.directive()))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    let file = match &settings.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let handle = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(handle))
                    .with_ansi(false)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file).try_init()?;

    Ok(())
}
