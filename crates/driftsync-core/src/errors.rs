//! Sentinel error kinds callers pattern-match on.
//!
//! Per-file failures are recovered locally and accumulated; the kinds here
//! mark the terminal outcomes of a run and the distinguished cancellation
//! signal threaded through in-flight copies.

use std::io;

/// Number of accumulated errors (copy and delete combined) that aborts a run.
pub const MAX_SYNC_ERRORS: usize = 10;

/// Terminal and sentinel error kinds for analyze/sync runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Analyze observed the cancellation signal and stopped.
    AnalysisCancelled,
    /// An in-flight operation was interrupted by the cancellation token.
    Cancelled,
    /// A single destination path could not be removed. Local signal only;
    /// never surfaced to the caller.
    DeleteFailed(String),
    /// The run completed but some files failed below the abort threshold.
    FilesFailed(usize),
    /// The run was cancelled before the copy phase could finish dispatching.
    SyncAborted,
    /// The accumulated error count reached the abort threshold.
    TooManyErrors(usize),
    /// The source or destination URI names a scheme with no driver.
    UnsupportedScheme(String),
    /// `sync()` was invoked without a completed `analyze()`.
    NotAnalyzed,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::AnalysisCancelled => write!(f, "analysis cancelled"),
            SyncError::Cancelled => write!(f, "operation cancelled"),
            SyncError::DeleteFailed(path) => write!(f, "failed to delete {path}"),
            SyncError::FilesFailed(n) => write!(f, "{n} file(s) failed to sync"),
            SyncError::SyncAborted => write!(f, "sync aborted"),
            SyncError::TooManyErrors(n) => {
                write!(f, "aborted after {n} error(s)")
            }
            SyncError::UnsupportedScheme(scheme) => {
                write!(f, "unsupported filesystem scheme: {scheme}")
            }
            SyncError::NotAnalyzed => write!(f, "sync requires a completed analyze"),
        }
    }
}

impl std::error::Error for SyncError {}

/// True when `err` is the distinguished cancellation signal (either variant).
pub fn is_cancelled(err: &eyre::Report) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SyncError>(),
            Some(SyncError::Cancelled) | Some(SyncError::AnalysisCancelled)
        )
    })
}

/// True when the chain bottoms out in an io `NotFound`.
pub fn is_not_found(err: &eyre::Report) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::NotFound)
    })
}
