//! Debounced, throttled save loop.
//!
//! A single task owns [`WatchState`] and multiplexes change events, the
//! debounce and throttle deadlines, the keychain poll and the one save
//! that may be in flight. Handlers run one at a time inside the loop, so
//! no locking is needed and two saves can never overlap.

use super::observer::ChangeEvent;
use super::state::{ExponentialBackoff, WatchPhase, WatchState};
use crate::config::WatchConfig;
use crate::utils::Result;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of a save attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A snapshot with this fingerprint was uploaded
    Saved { fingerprint: String },
    /// Local state matched the last saved fingerprint
    Unchanged,
}

/// The work the scheduler triggers.
#[async_trait]
pub trait SnapshotSaver: Send + Sync {
    /// Fingerprint of the current local state.
    async fn fingerprint(&self) -> Result<String>;

    /// Snapshot and upload unless the state still matches `last_fingerprint`.
    async fn save(&self, last_fingerprint: Option<String>) -> Result<SaveOutcome>;
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub debounce: Duration,
    pub min_interval: Duration,
    /// Set only where credential changes produce no file events
    pub keychain_poll: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub shutdown_grace: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &WatchConfig, poll_keychain: bool) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            min_interval: Duration::from_secs(config.min_interval_secs),
            keychain_poll: poll_keychain.then(|| Duration::from_secs(config.keychain_poll_secs)),
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_max: Duration::from_secs(config.backoff_max_secs),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }
}

/// How a watch session ended without a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSummary {
    pub save_count: u64,
}

type SaveFuture = Pin<Box<dyn Future<Output = Result<SaveOutcome>> + Send>>;

pub struct WatchScheduler {
    saver: Arc<dyn SnapshotSaver>,
    settings: SchedulerSettings,
    state: WatchState,
    debounce_at: Option<Instant>,
    throttle_at: Option<Instant>,
}

impl WatchScheduler {
    pub fn new(saver: Arc<dyn SnapshotSaver>, settings: SchedulerSettings) -> Self {
        let backoff = ExponentialBackoff::with_config(settings.backoff_base, settings.backoff_max);
        Self {
            saver,
            settings,
            state: WatchState::new(backoff),
            debounce_at: None,
            throttle_at: None,
        }
    }

    /// Start from a known fingerprint, e.g. right after a store.
    pub fn with_baseline(mut self, fingerprint: String) -> Self {
        self.state.last_fingerprint = Some(fingerprint);
        self
    }

    pub fn phase(&self) -> WatchPhase {
        self.state.phase
    }

    /// Run until `cancel` fires or a save fails fatally.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
        cancel: CancellationToken,
    ) -> Result<WatchSummary> {
        if self.state.last_fingerprint.is_none() {
            match self.saver.fingerprint().await {
                Ok(fp) => self.state.last_fingerprint = Some(fp),
                Err(e) => warn!("Could not compute initial fingerprint: {}", e),
            }
        }

        let mut poll = self.settings.keychain_poll.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut in_flight: Option<SaveFuture> = None;
        let mut events_open = true;

        info!(
            "Watching for changes (debounce {:?}, minimum interval {:?})",
            self.settings.debounce, self.settings.min_interval
        );

        loop {
            let debounce_at = self.debounce_at;
            let throttle_at = self.throttle_at;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                result = poll_save(&mut in_flight) => {
                    in_flight = None;
                    if let Err(e) = self.finish_save(result) {
                        self.state.phase = WatchPhase::Stopped;
                        error!("Watch stopped after {} saves: {}", self.state.save_count, e);
                        return Err(e);
                    }
                }

                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_change(event),
                    None => {
                        debug!("Change observer closed");
                        events_open = false;
                    }
                },

                _ = sleep_until(debounce_at), if debounce_at.is_some() => {
                    if let Some(save) = self.on_debounce_elapsed() {
                        in_flight = Some(save);
                    }
                }

                _ = sleep_until(throttle_at), if throttle_at.is_some() => {
                    if let Some(save) = self.on_throttle_elapsed() {
                        in_flight = Some(save);
                    }
                }

                _ = tick(&mut poll), if poll.is_some() => {
                    if self.poll_due() {
                        self.poll_fingerprint().await;
                    }
                }
            }
        }

        self.debounce_at = None;
        self.throttle_at = None;
        if let Some(save) = in_flight.take() {
            info!("Waiting for the in-flight save to finish");
            match time::timeout(self.settings.shutdown_grace, save).await {
                Ok(result) => {
                    if let Err(e) = self.finish_save(result) {
                        warn!("Final save failed: {}", e);
                    }
                }
                Err(_) => warn!("In-flight save abandoned after {:?}", self.settings.shutdown_grace),
            }
        }

        self.state.phase = WatchPhase::Stopped;
        info!("Watch stopped after {} saves", self.state.save_count);
        Ok(WatchSummary {
            save_count: self.state.save_count,
        })
    }

    fn on_change(&mut self, event: ChangeEvent) {
        debug!("Change detected: {}", event.path);
        self.debounce_at = Some(Instant::now() + self.settings.debounce);
        self.throttle_at = None;
        self.state.pending_save_armed = false;
        if !self.state.save_in_progress {
            self.state.phase = WatchPhase::DebounceWindowOpen;
        }
    }

    fn on_debounce_elapsed(&mut self) -> Option<SaveFuture> {
        self.debounce_at = None;
        if self.state.save_in_progress {
            debug!("Save already in flight, dropping this window");
            return None;
        }

        let wait = self.state.wait_before_save(self.settings.min_interval);
        if wait.is_zero() {
            return Some(self.start_save());
        }

        debug!("Throttling save for {:?}", wait);
        self.throttle_at = Some(Instant::now() + wait);
        self.state.pending_save_armed = true;
        self.state.phase = WatchPhase::ThrottleWait;
        None
    }

    fn on_throttle_elapsed(&mut self) -> Option<SaveFuture> {
        self.throttle_at = None;
        let armed = std::mem::take(&mut self.state.pending_save_armed);
        if armed && !self.state.save_in_progress {
            return Some(self.start_save());
        }
        if !self.state.save_in_progress {
            self.state.phase = WatchPhase::Idle;
        }
        None
    }

    fn start_save(&mut self) -> SaveFuture {
        self.state.save_in_progress = true;
        self.state.pending_save_armed = false;
        self.state.phase = WatchPhase::SaveInFlight;

        let saver = Arc::clone(&self.saver);
        let last = self.state.last_fingerprint.clone();
        Box::pin(async move { saver.save(last).await })
    }

    /// Apply a finished save. Only fatal failures are returned.
    fn finish_save(&mut self, result: Result<SaveOutcome>) -> Result<()> {
        self.state.save_in_progress = false;
        self.state.phase = if self.debounce_at.is_some() {
            WatchPhase::DebounceWindowOpen
        } else {
            WatchPhase::Idle
        };

        match result {
            Ok(SaveOutcome::Saved { fingerprint }) => {
                self.state.record_success(fingerprint);
                info!("Profile saved ({} this session)", self.state.save_count);
                Ok(())
            }
            Ok(SaveOutcome::Unchanged) => {
                debug!("No changes since the last save");
                Ok(())
            }
            Err(e) if e.is_fatal_for_watch() => Err(e),
            Err(e) => {
                warn!("Save failed, will retry on the next change: {}", e);
                self.state.backoff.record_failure();
                Ok(())
            }
        }
    }

    /// The poll only opens a window when nothing is pending. Comparing
    /// against a save in progress would race its upload, and re-arming an
    /// open window would keep pushing it past the next tick.
    fn poll_due(&self) -> bool {
        !self.state.save_in_progress && self.debounce_at.is_none() && self.throttle_at.is_none()
    }

    async fn poll_fingerprint(&mut self) {
        match self.saver.fingerprint().await {
            Ok(current) if self.state.last_fingerprint.as_deref() != Some(current.as_str()) => {
                self.on_change(ChangeEvent::keychain());
            }
            Ok(_) => {}
            Err(e) => debug!("Keychain poll failed: {}", e),
        }
    }
}

async fn poll_save(in_flight: &mut Option<SaveFuture>) -> Result<SaveOutcome> {
    match in_flight.as_mut() {
        Some(save) => save.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<time::Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use crate::snapshot::SizeLimit;
    use crate::utils::VaultError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockSaver {
        start: Instant,
        delay: Duration,
        unchanged: bool,
        fingerprint: Mutex<String>,
        failures: Mutex<VecDeque<VaultError>>,
        saves: Mutex<Vec<Duration>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fingerprint_calls: AtomicUsize,
        fingerprint_during_save: AtomicBool,
    }

    impl MockSaver {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                delay: Duration::ZERO,
                unchanged: false,
                fingerprint: Mutex::new("fp-0".to_string()),
                failures: Mutex::new(VecDeque::new()),
                saves: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                fingerprint_calls: AtomicUsize::new(0),
                fingerprint_during_save: AtomicBool::new(false),
            }
        }

        fn save_times(&self) -> Vec<Duration> {
            self.saves.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnapshotSaver for MockSaver {
        async fn fingerprint(&self) -> Result<String> {
            self.fingerprint_calls.fetch_add(1, Ordering::SeqCst);
            if self.active.load(Ordering::SeqCst) > 0 {
                self.fingerprint_during_save.store(true, Ordering::SeqCst);
            }
            Ok(self.fingerprint.lock().unwrap().clone())
        }

        async fn save(&self, _last: Option<String>) -> Result<SaveOutcome> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.saves.lock().unwrap().push(self.start.elapsed());

            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            if self.unchanged {
                return Ok(SaveOutcome::Unchanged);
            }
            Ok(SaveOutcome::Saved {
                fingerprint: self.fingerprint.lock().unwrap().clone(),
            })
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings::from_config(&crate::config::Config::default().watch, false)
    }

    struct Harness {
        saver: Arc<MockSaver>,
        tx: mpsc::UnboundedSender<ChangeEvent>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<Result<WatchSummary>>,
    }

    fn spawn(saver: MockSaver, settings: SchedulerSettings) -> Harness {
        let saver = Arc::new(saver);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let scheduler = WatchScheduler::new(saver.clone(), settings);
        let handle = tokio::spawn(scheduler.run(rx, cancel.clone()));
        Harness {
            saver,
            tx,
            cancel,
            handle,
        }
    }

    impl Harness {
        fn change(&self) {
            self.tx.send(ChangeEvent::new(".claude/settings.json")).unwrap();
        }

        async fn stop(self) -> (Arc<MockSaver>, Result<WatchSummary>) {
            self.cancel.cancel();
            let result = self.handle.await.unwrap();
            (self.saver, result)
        }
    }

    fn assert_near(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(50),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_save() {
        let h = spawn(MockSaver::new(), settings());
        for _ in 0..3 {
            h.change();
            time::sleep(Duration::from_millis(200)).await;
        }
        time::sleep(Duration::from_secs(10)).await;

        let (saver, result) = h.stop().await;
        let times = saver.save_times();
        assert_eq!(times.len(), 1);
        // third event at 400ms plus the 2s window
        assert_near(times[0], 2400);
        assert_eq!(result.unwrap().save_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_save_waits_for_minimum_interval() {
        let h = spawn(MockSaver::new(), settings());
        h.change();
        time::sleep(Duration::from_secs(3)).await;
        h.change();
        time::sleep(Duration::from_secs(60)).await;

        let (saver, result) = h.stop().await;
        let times = saver.save_times();
        assert_eq!(times.len(), 2);
        assert_near(times[0], 2000);
        // 30s after the first save, not at the end of the second window
        assert_near(times[1], 32000);
        assert_eq!(result.unwrap().save_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_during_throttle_yield_one_save() {
        let h = spawn(MockSaver::new(), settings());
        h.change();
        time::sleep(Duration::from_secs(3)).await;
        for _ in 0..3 {
            // each change closes a window inside the throttle period
            h.change();
            time::sleep(Duration::from_secs(7)).await;
        }
        time::sleep(Duration::from_secs(60)).await;

        let (saver, _) = h.stop().await;
        let times = saver.save_times();
        assert_eq!(times.len(), 2);
        assert_near(times[1], 32000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_closing_during_save_is_dropped() {
        let mut saver = MockSaver::new();
        saver.delay = Duration::from_secs(10);
        let h = spawn(saver, settings());

        h.change();
        time::sleep(Duration::from_secs(3)).await;
        h.change(); // window closes at 5s while the first save runs until 12s
        time::sleep(Duration::from_secs(60)).await;

        let (saver, result) = h.stop().await;
        assert_eq!(saver.save_times().len(), 1);
        assert_eq!(saver.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap().save_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saves_never_overlap() {
        let mut saver = MockSaver::new();
        saver.delay = Duration::from_secs(5);
        let mut s = settings();
        s.min_interval = Duration::ZERO;
        let h = spawn(saver, s);

        for _ in 0..20 {
            h.change();
            time::sleep(Duration::from_millis(2500)).await;
        }
        time::sleep(Duration::from_secs(10)).await;

        let (saver, _) = h.stop().await;
        assert!(saver.save_times().len() > 1);
        assert_eq!(saver.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_backs_off_and_continues() {
        let saver = MockSaver::new();
        saver.failures.lock().unwrap().push_back(VaultError::TransientRemote {
            source: RemoteError::RateLimited,
        });
        let h = spawn(saver, settings());

        h.change();
        time::sleep(Duration::from_secs(3)).await;
        h.change(); // window closes at 5s, backoff runs until 32s
        time::sleep(Duration::from_secs(60)).await;

        let (saver, result) = h.stop().await;
        let times = saver.save_times();
        assert_eq!(times.len(), 2);
        assert_near(times[0], 2000);
        assert_near(times[1], 32000);
        assert_eq!(result.unwrap().save_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_exceeded_stops_watch() {
        let saver = MockSaver::new();
        saver.failures.lock().unwrap().push_back(VaultError::SizeExceeded {
            raw_bytes: 31 * 1024 * 1024,
            encoded_bytes: 44 * 1024 * 1024,
            limit: SizeLimit::Api,
            subtree_excluded: true,
        });
        let h = spawn(saver, settings());
        h.change();

        let result = h.handle.await.unwrap();
        assert!(matches!(result, Err(VaultError::SizeExceeded { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_save_is_not_counted() {
        let mut saver = MockSaver::new();
        saver.unchanged = true;
        let h = spawn(saver, settings());
        h.change();
        time::sleep(Duration::from_secs(5)).await;

        let (saver, result) = h.stop().await;
        assert_eq!(saver.save_times().len(), 1);
        assert_eq!(result.unwrap().save_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keychain_poll_synthesizes_change() {
        let mut s = settings();
        s.keychain_poll = Some(Duration::from_secs(5));
        let h = spawn(MockSaver::new(), s);

        time::sleep(Duration::from_secs(1)).await;
        *h.saver.fingerprint.lock().unwrap() = "fp-1".to_string();
        time::sleep(Duration::from_secs(30)).await;

        let (saver, result) = h.stop().await;
        let times = saver.save_times();
        // detected by the poll at 5s, saved when the window closes
        assert_eq!(times.len(), 1);
        assert_near(times[0], 7000);
        assert_eq!(result.unwrap().save_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keychain_poll_with_debounce_longer_than_period() {
        let mut s = settings();
        s.keychain_poll = Some(Duration::from_secs(5));
        s.debounce = Duration::from_secs(6);
        let h = spawn(MockSaver::new(), s);

        time::sleep(Duration::from_secs(1)).await;
        *h.saver.fingerprint.lock().unwrap() = "fp-1".to_string();
        time::sleep(Duration::from_secs(300)).await;

        let (saver, result) = h.stop().await;
        let times = saver.save_times();
        // poll at 5s opens the window, the 10s poll leaves it alone
        assert_eq!(times.len(), 1);
        assert_near(times[0], 11000);
        assert_eq!(result.unwrap().save_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keychain_poll_skipped_while_saving() {
        let mut saver = MockSaver::new();
        saver.delay = Duration::from_secs(12);
        let mut s = settings();
        s.keychain_poll = Some(Duration::from_secs(5));
        let h = spawn(saver, s);

        h.change(); // save runs from 2s to 14s
        time::sleep(Duration::from_secs(13)).await;
        // only the baseline fingerprint at startup
        assert_eq!(h.saver.fingerprint_calls.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.saver.fingerprint_calls.load(Ordering::SeqCst), 2);

        let (saver, result) = h.stop().await;
        assert!(!saver.fingerprint_during_save.load(Ordering::SeqCst));
        assert_eq!(result.unwrap().save_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_save() {
        let mut saver = MockSaver::new();
        saver.delay = Duration::from_secs(3);
        let h = spawn(saver, settings());
        h.change();
        time::sleep(Duration::from_millis(2500)).await;

        let (saver, result) = h.stop().await;
        assert_eq!(saver.save_times().len(), 1);
        assert_eq!(result.unwrap().save_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_nothing_pending() {
        let h = spawn(MockSaver::new(), settings());
        time::sleep(Duration::from_secs(1)).await;
        let (saver, result) = h.stop().await;
        assert!(saver.save_times().is_empty());
        assert_eq!(result.unwrap(), WatchSummary { save_count: 0 });
    }
}
