//! Watch mode: observe changes and save them in the background.

pub mod observer;
pub mod scheduler;
pub mod state;

pub use observer::{ChangeEvent, ChangeObserver, SourceMatcher};
pub use scheduler::{SaveOutcome, SchedulerSettings, SnapshotSaver, WatchScheduler, WatchSummary};
pub use state::{ExponentialBackoff, WatchPhase, WatchState};
