//! One-way tree synchronization core.
//!
//! After a successful run every regular file present in the source appears
//! under the same relative path in the destination with matching contents,
//! and destination-only paths are gone. The crate provides the analysis
//! pipeline, the adaptive worker pool, rolling-window throughput metrics, and
//! the status/event surface; terminal UIs and CLIs sit on top of [`Engine`].

mod analyze;
mod executor;
mod logging;
mod state;
mod worker;

pub mod cancel;
pub mod clock;
pub mod compare;
pub mod controller;
pub mod engine;
pub mod errors;
pub mod events;
pub mod filter;
pub mod fs;
pub mod metrics;
pub mod status;

pub use cancel::CancelToken;
pub use clock::{SystemClock, TimeProvider};
pub use compare::ChangeType;
pub use engine::Engine;
pub use errors::{SyncError, MAX_SYNC_ERRORS};
pub use events::{EventEmitter, ScanTarget, SyncEvent, SyncResult};
pub use filter::PatternFilter;
pub use fs::{
    CopyStats, FileInfo, HashKind, LocalFs, ResizablePool, SyncFilesystem,
};
pub use metrics::{RateSample, RateWindow, SAMPLE_WINDOW};
pub use status::{
    AnalysisPhase, Bottleneck, FileState, FileToSync, Status, SyncFailure, SyncPlan,
};
