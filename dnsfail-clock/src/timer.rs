//! The timer origin and the one operation allowed to change it.

use crate::common::{ResetSource, Timestamp};
use crate::components::notifier::Notifier;
use crate::events::SystemEvent;
use crate::metrics::ResetMetrics;
use crate::persistence::StateStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, warn};

/// Holds the origin from which elapsed time is measured.
///
/// The origin sits in a `watch` channel: replacing it is a single swap that
/// readers never observe half-done, and the render loop can await changes.
/// The sender is private, so [`TimerState::reset`] is the only way to move it.
pub struct TimerState {
    origin: watch::Sender<Timestamp>,
    /// Held for the whole reset so origins are taken, published and saved in order.
    reset_lock: Mutex<()>,
    store: Arc<StateStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<ResetMetrics>,
    events: Option<broadcast::Sender<SystemEvent>>,
}

impl TimerState {
    /// Builds the timer from whatever the store holds, falling back to now.
    pub fn initialize(
        store: StateStore,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<ResetMetrics>,
    ) -> Self {
        let origin = match store.load() {
            Some(origin) => origin,
            None => {
                let now = Utc::now();
                warn!("No usable saved state. Initializing with current time {}.", now);
                now
            }
        };
        info!("Counter initialized with start time: {}", origin);

        let (origin, _) = watch::channel(origin);
        Self {
            origin,
            reset_lock: Mutex::new(()),
            store: Arc::new(store),
            notifier,
            metrics,
            events: None,
        }
    }

    /// Publishes a [`SystemEvent::TimerReset`] on `events` after every reset.
    pub fn with_events(mut self, events: broadcast::Sender<SystemEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The current origin.
    pub fn get_origin(&self) -> Timestamp {
        *self.origin.borrow()
    }

    /// A receiver that is marked changed on every reset.
    pub fn subscribe(&self) -> watch::Receiver<Timestamp> {
        self.origin.subscribe()
    }

    pub fn metrics(&self) -> &Arc<ResetMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Moves the origin to now and returns the new value.
    ///
    /// Concurrent resets are serialized, so the in-memory origin and the file
    /// always end on the same value. The file write runs on the blocking pool.
    /// Persisting and notifying are independent best-effort steps: a failed
    /// save is logged and counted, and the notification still happens.
    pub async fn reset(&self, source: ResetSource) -> Timestamp {
        let _guard = self.reset_lock.lock().await;

        let now = Utc::now();
        self.origin.send_replace(now);
        info!("Counter reset by {} at {}", source, now);

        let store = Arc::clone(&self.store);
        let saved = match tokio::task::spawn_blocking(move || store.save(now)).await {
            Ok(result) => result.is_ok(),
            Err(e) => {
                error!("State save task failed: {}", e);
                false
            }
        };
        if !saved {
            self.metrics.record_persist_error();
            warn!("Reset kept in memory only; it will be saved with the next reset.");
        }

        self.notifier.notify(source);
        self.metrics.record_reset(source);

        if let Some(events) = &self.events {
            events
                .send(SystemEvent::TimerReset { origin: now, source })
                .ok();
        }
        now
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every notification instead of playing anything.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) calls: Mutex<Vec<ResetSource>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, source: ResetSource) {
            self.calls.lock().unwrap().push(source);
        }
    }

    pub(crate) fn timer_at(path: std::path::PathBuf) -> (TimerState, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let timer = TimerState::initialize(
            StateStore::new(path),
            notifier.clone(),
            Arc::new(ResetMetrics::new()),
        );
        (timer, notifier)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::timer_at;
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::fs;

    #[test]
    fn starts_from_persisted_origin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reset.json");
        let saved = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        StateStore::new(&path).save(saved).unwrap();

        let (timer, _) = timer_at(path);

        assert_eq!(timer.get_origin(), saved);
    }

    #[test]
    fn falls_back_to_now_without_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let before = Utc::now();

        let (timer, _) = timer_at(dir.path().join("last_reset.json"));

        let origin = timer.get_origin();
        assert!(origin >= before && origin <= Utc::now());
    }

    #[test]
    fn repeated_reads_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        let (timer, _) = timer_at(dir.path().join("last_reset.json"));

        assert_eq!(timer.get_origin(), timer.get_origin());
    }

    #[tokio::test]
    async fn reset_updates_memory_file_notifier_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reset.json");
        fs::write(&path, r#"{"last_reset":"2020-01-01T00:00:00+00:00","version":1}"#).unwrap();
        let (timer, notifier) = timer_at(path.clone());

        let returned = timer.reset(ResetSource::Web).await;

        assert_eq!(timer.get_origin(), returned);
        assert_eq!(StateStore::new(&path).load(), Some(returned));
        assert_eq!(*notifier.calls.lock().unwrap(), vec![ResetSource::Web]);
        assert_eq!(timer.metrics().resets(ResetSource::Web), 1);
        assert_eq!(timer.metrics().resets(ResetSource::Button), 0);
    }

    #[tokio::test]
    async fn persistence_failure_still_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not directory").unwrap();
        let (timer, notifier) = timer_at(blocker.join("last_reset.json"));

        let returned = timer.reset(ResetSource::Button).await;

        assert_eq!(timer.get_origin(), returned);
        assert_eq!(*notifier.calls.lock().unwrap(), vec![ResetSource::Button]);
        assert_eq!(timer.metrics().persist_errors(), 1);
        assert_eq!(timer.metrics().resets(ResetSource::Button), 1);
    }

    #[tokio::test]
    async fn subscribers_see_resets() {
        let dir = tempfile::tempdir().unwrap();
        let (timer, _) = timer_at(dir.path().join("last_reset.json"));
        let mut rx = timer.subscribe();
        assert!(!rx.has_changed().unwrap());

        let returned = timer.reset(ResetSource::Button).await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), returned);
    }

    #[tokio::test]
    async fn reset_publishes_event() {
        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = broadcast::channel(4);
        let (timer, _) = timer_at(dir.path().join("last_reset.json"));
        let timer = timer.with_events(events);

        let returned = timer.reset(ResetSource::Web).await;

        match rx.try_recv().unwrap() {
            SystemEvent::TimerReset { origin, source } => {
                assert_eq!(origin, returned);
                assert_eq!(source, ResetSource::Web);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn origin_does_not_drift_between_resets() {
        let dir = tempfile::tempdir().unwrap();
        let (timer, _) = timer_at(dir.path().join("last_reset.json"));
        let first = timer.get_origin();

        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(timer.get_origin(), first);
        assert!(timer.reset(ResetSource::Button).await >= first - Duration::seconds(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resets_leave_memory_and_file_in_agreement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reset.json");
        let (timer, notifier) = timer_at(path.clone());
        let timer = Arc::new(timer);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let timer = Arc::clone(&timer);
                let source = if i % 2 == 0 {
                    ResetSource::Button
                } else {
                    ResetSource::Web
                };
                tokio::spawn(async move {
                    let mut returned = Vec::new();
                    for _ in 0..20 {
                        returned.push(timer.reset(source).await);
                    }
                    returned
                })
            })
            .collect();

        let mut all = Vec::new();
        for task in tasks {
            let returned = task.await.unwrap();
            assert!(returned.windows(2).all(|w| w[0] <= w[1]));
            all.extend(returned);
        }

        let newest = all.iter().max().copied().unwrap();
        assert_eq!(timer.get_origin(), newest);
        assert_eq!(StateStore::new(&path).load(), Some(newest));
        assert_eq!(notifier.calls.lock().unwrap().len(), 160);
    }
}
