//! State owned by the watch scheduler.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Where the scheduler currently is in its save cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    DebounceWindowOpen,
    SaveInFlight,
    ThrottleWait,
    Stopped,
}

/// Exponential backoff for failed saves.
///
/// The first failure waits the base delay, each further one doubles it up
/// to the cap. Resets on success.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl ExponentialBackoff {
    pub fn with_config(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            current_delay: base_delay,
            max_delay,
            failure_count: 0,
            last_failure: None,
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        if self.failure_count > 1 {
            self.current_delay = (self.current_delay * 2).min(self.max_delay);
        }
        warn!(
            "Save failed (attempt {}), next save in {:?} at the earliest",
            self.failure_count, self.current_delay
        );
    }

    pub fn reset(&mut self) {
        if self.failure_count > 0 {
            info!("Save succeeded, resetting backoff");
        }
        self.failure_count = 0;
        self.current_delay = self.base_delay;
        self.last_failure = None;
    }

    /// Time remaining until the backoff expires, None if not backing off.
    pub fn time_until_retry(&self) -> Option<Duration> {
        let elapsed = self.last_failure?.elapsed();
        (elapsed < self.current_delay).then(|| self.current_delay - elapsed)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

/// Mutable state of one watch session.
#[derive(Debug)]
pub struct WatchState {
    pub last_save: Option<Instant>,
    pub last_fingerprint: Option<String>,
    pub save_in_progress: bool,
    pub pending_save_armed: bool,
    pub save_count: u64,
    pub phase: WatchPhase,
    pub backoff: ExponentialBackoff,
}

impl WatchState {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            last_save: None,
            last_fingerprint: None,
            save_in_progress: false,
            pending_save_armed: false,
            save_count: 0,
            phase: WatchPhase::Idle,
            backoff,
        }
    }

    /// How long a save must still wait given the minimum interval between
    /// saves and any active backoff. Zero means a save may start now.
    pub fn wait_before_save(&self, min_interval: Duration) -> Duration {
        let throttle = self
            .last_save
            .map(|at| min_interval.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO);
        let backoff = self.backoff.time_until_retry().unwrap_or(Duration::ZERO);
        throttle.max(backoff)
    }

    pub fn record_success(&mut self, fingerprint: String) {
        self.last_save = Some(Instant::now());
        self.last_fingerprint = Some(fingerprint);
        self.save_count += 1;
        self.backoff.reset();
    }
}
