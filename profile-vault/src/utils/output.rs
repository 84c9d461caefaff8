//! User-facing output, kept apart from diagnostic logging.
//!
//! Interactive commands print progress to stdout. Saves scheduled by watch
//! mode run with [`OutputSink::Background`], which demotes the same messages
//! to debug-level log events.

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSink {
    Interactive,
    Background,
}

impl OutputSink {
    pub fn status(&self, message: impl AsRef<str>) {
        match self {
            OutputSink::Interactive => println!("{}", message.as_ref()),
            OutputSink::Background => debug!("{}", message.as_ref()),
        }
    }

    pub fn success(&self, message: impl AsRef<str>) {
        match self {
            OutputSink::Interactive => println!("✓ {}", message.as_ref()),
            OutputSink::Background => debug!("{}", message.as_ref()),
        }
    }

    /// Warnings reach the log in both modes; only interactive runs print them.
    pub fn warn(&self, message: impl AsRef<str>) {
        match self {
            OutputSink::Interactive => eprintln!("⚠ {}", message.as_ref()),
            OutputSink::Background => warn!("{}", message.as_ref()),
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, OutputSink::Interactive)
    }
}
