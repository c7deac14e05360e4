//! Shared run state.
//!
//! The engine owns one [`Shared`] per lifetime; workers, the controller, and
//! the analyzer all hold `Arc` references. Non-atomic mutation goes through
//! the status write lock; the hot counters live beside it as atomics and are
//! folded into snapshots on read.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::Result;
use parking_lot::{Mutex, RwLock};

use crate::cancel::CancelToken;
use crate::clock::TimeProvider;
use crate::errors::MAX_SYNC_ERRORS;
use crate::events::{EventEmitter, SyncEvent};
use crate::logging::RunLog;
use crate::status::{Status, SyncFailure};

pub(crate) type StatusCallback = Box<dyn Fn(&Status) + Send + Sync>;

pub(crate) struct Shared {
    pub status: RwLock<Status>,
    pub transferred_bytes: AtomicU64,
    pub active_workers: AtomicUsize,
    pub max_workers_seen: AtomicUsize,
    pub desired_workers: AtomicUsize,
    pub error_count: AtomicUsize,
    pub cancel: CancelToken,
    pub time: Arc<dyn TimeProvider>,
    callbacks: RwLock<Vec<StatusCallback>>,
    emitter: RwLock<Option<Arc<dyn EventEmitter>>>,
    run_log: Mutex<Option<RunLog>>,
}

impl Shared {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            status: RwLock::new(Status::default()),
            transferred_bytes: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
            max_workers_seen: AtomicUsize::new(0),
            desired_workers: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),
            cancel: CancelToken::new(),
            time,
            callbacks: RwLock::new(Vec::new()),
            emitter: RwLock::new(None),
            run_log: Mutex::new(None),
        }
    }

    /// Reset the mutable run state for a fresh analyze. Callbacks, emitter,
    /// log, and the cancellation token survive.
    pub fn reset_run(&self) {
        *self.status.write() = Status::default();
        self.transferred_bytes.store(0, Ordering::SeqCst);
        self.active_workers.store(0, Ordering::SeqCst);
        self.max_workers_seen.store(0, Ordering::SeqCst);
        self.desired_workers.store(0, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
    }

    pub fn set_emitter(&self, emitter: Option<Arc<dyn EventEmitter>>) {
        *self.emitter.write() = emitter;
    }

    pub fn emitter(&self) -> Option<Arc<dyn EventEmitter>> {
        self.emitter.read().clone()
    }

    pub fn register_callback(&self, callback: StatusCallback) {
        self.callbacks.write().push(callback);
    }

    pub fn open_run_log(&self, path: &Path) -> Result<()> {
        let log = RunLog::create(path)?;
        *self.run_log.lock() = Some(log);
        Ok(())
    }

    pub fn close_run_log(&self) {
        if let Some(mut log) = self.run_log.lock().take() {
            log.flush();
        }
    }

    /// Emit to the optional emitter and mirror into the run log.
    pub fn emit(&self, event: SyncEvent) {
        if let Some(log) = self.run_log.lock().as_mut() {
            log.record(&event);
        }
        if let Some(emitter) = self.emitter() {
            emitter.emit(&event);
        }
    }

    /// Record a per-item failure: bumps the shared error counter, appends to
    /// the visible error list while below the abort threshold, and emits
    /// `ErrorOccurred`. Returns the new error count.
    pub fn record_failure(&self, failure: SyncFailure) -> usize {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(SyncEvent::ErrorOccurred {
            phase: failure.phase.to_string(),
            error: format!("{}: {}", failure.path, failure.message),
        });
        let mut status = self.status.write();
        if status.errors.len() < MAX_SYNC_ERRORS {
            status.errors.push(failure);
        }
        count
    }

    /// Invoke every registered status callback with a fresh snapshot.
    pub fn notify(&self) {
        let callbacks = self.callbacks.read();
        if callbacks.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for callback in callbacks.iter() {
            callback(&snapshot);
        }
    }

    /// Deep, reduced snapshot with atomics and window metrics folded in.
    pub fn snapshot(&self) -> Status {
        let mut snap = self.status.read().reduced_clone();
        snap.transferred_bytes = self.transferred_bytes.load(Ordering::SeqCst);
        snap.active_workers = self.active_workers.load(Ordering::SeqCst);
        snap.max_workers = self.max_workers_seen.load(Ordering::SeqCst);
        snap.target_workers = self.desired_workers.load(Ordering::SeqCst);

        // Window metrics, with cumulative fallbacks when the window is thin.
        if let Some(rate) = snap.window.total_rate() {
            snap.total_rate = rate as u64;
        } else {
            snap.total_rate = self.lifetime_rate(&snap);
        }
        if let Some(rate) = snap.window.per_worker_rate() {
            snap.per_worker_rate = rate as u64;
        } else if snap.active_workers > 0 {
            snap.per_worker_rate = snap.total_rate / snap.active_workers as u64;
        }
        if let Some((read_pct, write_pct)) = snap.window.io_split() {
            snap.read_percent = read_pct;
            snap.write_percent = write_pct;
        } else {
            let total = snap.total_read_time + snap.total_write_time;
            if !total.is_zero() {
                snap.read_percent =
                    snap.total_read_time.as_secs_f64() / total.as_secs_f64() * 100.0;
                snap.write_percent = 100.0 - snap.read_percent;
            }
        }
        snap
    }

    fn lifetime_rate(&self, snap: &Status) -> u64 {
        let Some(start) = snap.start_time else {
            return 0;
        };
        let elapsed = self
            .time
            .system_now()
            .duration_since(start)
            .unwrap_or_default()
            .as_secs_f64();
        if elapsed <= 0.0 {
            return 0;
        }
        (snap.transferred_bytes as f64 / elapsed) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::events::test_support::RecordingEmitter;
    use std::sync::atomic::AtomicUsize as CbCounter;

    fn shared() -> Shared {
        Shared::new(Arc::new(SystemClock))
    }

    #[test]
    fn snapshot_folds_atomics() {
        let shared = shared();
        shared.transferred_bytes.store(42, Ordering::SeqCst);
        shared.active_workers.store(3, Ordering::SeqCst);
        shared.max_workers_seen.store(5, Ordering::SeqCst);
        shared.desired_workers.store(4, Ordering::SeqCst);

        let snap = shared.snapshot();
        assert_eq!(snap.transferred_bytes, 42);
        assert_eq!(snap.active_workers, 3);
        assert_eq!(snap.max_workers, 5);
        assert_eq!(snap.target_workers, 4);
    }

    #[test]
    fn record_failure_caps_the_visible_list() {
        let shared = shared();
        for i in 0..15 {
            shared.record_failure(SyncFailure {
                path: format!("f{i}"),
                phase: "copy",
                message: "boom".into(),
            });
        }
        assert_eq!(shared.error_count.load(Ordering::SeqCst), 15);
        assert_eq!(shared.status.read().errors.len(), MAX_SYNC_ERRORS);
    }

    #[test]
    fn record_failure_emits_error_occurred() {
        let shared = shared();
        let emitter = Arc::new(RecordingEmitter::default());
        shared.set_emitter(Some(emitter.clone()));
        shared.record_failure(SyncFailure {
            path: "x".into(),
            phase: "delete",
            message: "denied".into(),
        });
        let events = emitter.take();
        assert!(matches!(
            events.as_slice(),
            [SyncEvent::ErrorOccurred { phase, .. }] if phase == "delete"
        ));
    }

    #[test]
    fn notify_reaches_every_callback() {
        let shared = shared();
        let hits = Arc::new(CbCounter::new(0));
        for _ in 0..2 {
            let hits = hits.clone();
            shared.register_callback(Box::new(move |_status| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        shared.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn thin_window_falls_back_to_the_lifetime_rate() {
        use crate::clock::test_support::ManualClock;
        use std::time::Duration;

        let clock = Arc::new(ManualClock::new());
        let shared = Shared::new(clock.clone());
        shared.status.write().start_time = Some(clock.system_now());
        shared.transferred_bytes.store(1000, Ordering::SeqCst);
        clock.advance(Duration::from_secs(2));

        let snap = shared.snapshot();
        assert_eq!(snap.total_rate, 500);
    }

    #[test]
    fn reset_preserves_observers() {
        let shared = shared();
        let emitter = Arc::new(RecordingEmitter::default());
        shared.set_emitter(Some(emitter.clone()));
        shared.error_count.store(7, Ordering::SeqCst);
        shared.reset_run();
        assert_eq!(shared.error_count.load(Ordering::SeqCst), 0);
        assert!(shared.emitter().is_some());
    }
}
