//! Single-shot cancellation token shared across a run.
//!
//! Pollers read the flag; blocked senders race the closed channel half via
//! `select!`. `cancel()` is idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    guard: Arc<Mutex<Option<Sender<()>>>>,
    closed: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            guard: Arc::new(Mutex::new(Some(tx))),
            closed: rx,
        }
    }

    /// Signal cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Dropping the sender closes `closed`, waking blocked selects.
        self.guard.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Channel half that disconnects once the token fires. Nothing is ever
    /// sent on it; a `recv` completes (with a disconnect error) exactly when
    /// the token has been cancelled.
    pub fn closed(&self) -> &Receiver<()> {
        &self.closed
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
