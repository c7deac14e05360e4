//! Push surface for external observers.

use serde::Serialize;

use crate::status::SyncPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanTarget {
    Source,
    Dest,
}

/// Outcome summary embedded in [`SyncEvent::SyncComplete`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub files_copied: u64,
    pub files_deleted: u64,
    pub bytes_copied: u64,
    pub errors: Vec<String>,
}

/// Run lifecycle events, in nominal emission order. `ErrorOccurred` may
/// interleave anywhere; cancellation emits nothing.
#[derive(Debug, Clone, Serialize)]
pub enum SyncEvent {
    ScanStarted {
        target: ScanTarget,
    },
    ScanComplete {
        target: ScanTarget,
        count: u64,
    },
    CompareStarted,
    CompareComplete {
        plan: SyncPlan,
    },
    SyncStarted,
    SyncFileStarted {
        path: String,
        size: u64,
    },
    SyncFileComplete {
        path: String,
    },
    /// Throttled heartbeat during long transfers.
    SyncProgress {
        transferred_bytes: u64,
        bytes_per_second: u64,
    },
    SyncComplete {
        result: SyncResult,
    },
    ErrorOccurred {
        phase: String,
        error: String,
    },
}

/// Observer callback surface. Emitters are shared by reference across worker
/// threads and must tolerate concurrent emission.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &SyncEvent);
}
