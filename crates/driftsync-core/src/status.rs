//! Live run state and its snapshot policy.
//!
//! One instance of [`Status`] lives behind the engine's read-write lock for
//! the whole run; hot counters (transferred bytes, worker counts) are atomics
//! folded in at snapshot time. Snapshots reduce the per-file list to the
//! in-flight set plus the most recently active tail so observers stay cheap
//! no matter how large the plan is.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::metrics::RateWindow;

/// Entries retained in the recently-completed ring.
pub const RECENT_COMPLETED_CAP: usize = 10;

/// Recently-active entries appended to a snapshot beyond the in-flight set.
pub const SNAPSHOT_TAIL_CAP: usize = 20;

/// Lifecycle of a single planned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileState {
    Pending,
    Opening,
    Copying,
    Finalizing,
    Complete,
    Error,
    Cancelled,
}

impl FileState {
    /// States that qualify a file as "recently active" for snapshots.
    fn recently_active(self) -> bool {
        !matches!(self, FileState::Pending | FileState::Cancelled)
    }
}

/// One planned copy. Created by analysis, mutated only by the worker that
/// processes it.
#[derive(Debug, Clone)]
pub struct FileToSync {
    pub path: String,
    pub size: u64,
    pub transferred: u64,
    pub state: FileState,
    pub error: Option<String>,
}

impl FileToSync {
    pub(crate) fn pending(path: String, size: u64) -> Self {
        Self {
            path,
            size,
            transferred: 0,
            state: FileState::Pending,
            error: None,
        }
    }
}

/// Counts and byte totals produced by analysis. Read-only once published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub files_in_both: u64,
    pub files_only_in_source: u64,
    pub files_only_in_dest: u64,
    pub bytes_in_both: u64,
    pub bytes_only_in_source: u64,
    pub bytes_only_in_dest: u64,
    pub files_to_copy: u64,
    pub files_to_delete: u64,
    pub bytes_to_copy: u64,
    pub bytes_to_delete: u64,
    pub dirs_to_delete: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalysisPhase {
    Idle,
    CountingSource,
    ScanningSource,
    CountingDest,
    ScanningDest,
    Comparing,
    Planning,
    Complete,
}

impl AnalysisPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisPhase::Idle => "idle",
            AnalysisPhase::CountingSource => "counting_source",
            AnalysisPhase::ScanningSource => "scanning_source",
            AnalysisPhase::CountingDest => "counting_dest",
            AnalysisPhase::ScanningDest => "scanning_dest",
            AnalysisPhase::Comparing => "comparing",
            AnalysisPhase::Planning => "planning",
            AnalysisPhase::Complete => "complete",
        }
    }
}

impl Default for AnalysisPhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Which side dominates I/O time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bottleneck {
    Source,
    Destination,
    Balanced,
}

impl Default for Bottleneck {
    fn default() -> Self {
        Self::Balanced
    }
}

/// A recorded per-item failure.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub path: String,
    pub phase: &'static str,
    pub message: String,
}

/// The live run state. See module docs for the locking discipline.
#[derive(Debug, Clone, Default)]
pub struct Status {
    // Overall counts.
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub cancelled_files: usize,
    pub total_bytes: u64,
    pub transferred_bytes: u64,

    // Current-file display.
    pub current_file: String,
    pub current_files: Vec<String>,
    pub recently_completed: VecDeque<String>,

    // Timing.
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub bytes_per_second: u64,
    pub estimated_time_left: Option<Duration>,
    pub completion_time: Option<SystemTime>,

    // Plans.
    pub files_to_sync: Vec<FileToSync>,
    pub errors: Vec<SyncFailure>,
    pub cancelled_copies: Vec<String>,

    // Analysis progress.
    pub analysis_phase: AnalysisPhase,
    pub source_files_scanned: u64,
    pub source_files_total: u64,
    pub dest_files_scanned: u64,
    pub dest_files_total: u64,
    pub scanned_bytes: u64,
    pub scan_rate: u64,
    pub total_files_in_source: u64,
    pub total_bytes_in_source: u64,
    pub already_synced_files: u64,
    pub already_synced_bytes: u64,
    pub plan: SyncPlan,

    // Deletion progress.
    pub files_deleted: u64,
    pub bytes_deleted: u64,
    pub currently_deleting: Vec<String>,
    pub deletion_complete: bool,
    pub deletion_errors: u64,

    // Worker metrics.
    pub active_workers: usize,
    pub max_workers: usize,
    pub target_workers: usize,
    pub total_read_time: Duration,
    pub total_write_time: Duration,
    pub window: RateWindow,
    pub total_rate: u64,
    pub per_worker_rate: u64,
    pub read_percent: f64,
    pub write_percent: f64,
    pub bottleneck: Bottleneck,

    // Finalization.
    pub finalization_phase: String,

    // Indices into `files_to_sync` for the in-flight set; kept alongside the
    // display paths so snapshot reduction is O(active + tail).
    pub(crate) current_indices: Vec<usize>,
}

impl Status {
    /// Deep copy with the per-file list reduced: every in-flight entry, then
    /// up to [`SNAPSHOT_TAIL_CAP`] of the most recently active entries
    /// walking back from the tail. The full backing vector is never cloned,
    /// which is what keeps snapshots cheap on large plans.
    pub(crate) fn reduced_clone(&self) -> Status {
        let mut files = Vec::with_capacity(self.current_indices.len() + SNAPSHOT_TAIL_CAP);
        for &idx in &self.current_indices {
            if let Some(file) = self.files_to_sync.get(idx) {
                files.push(file.clone());
            }
        }

        let mut appended = 0;
        for (idx, file) in self.files_to_sync.iter().enumerate().rev() {
            if appended >= SNAPSHOT_TAIL_CAP {
                break;
            }
            if !file.state.recently_active() || self.current_indices.contains(&idx) {
                continue;
            }
            files.push(file.clone());
            appended += 1;
        }

        Status {
            total_files: self.total_files,
            processed_files: self.processed_files,
            failed_files: self.failed_files,
            cancelled_files: self.cancelled_files,
            total_bytes: self.total_bytes,
            transferred_bytes: self.transferred_bytes,
            current_file: self.current_file.clone(),
            current_files: self.current_files.clone(),
            recently_completed: self.recently_completed.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            bytes_per_second: self.bytes_per_second,
            estimated_time_left: self.estimated_time_left,
            completion_time: self.completion_time,
            files_to_sync: files,
            errors: self.errors.clone(),
            cancelled_copies: self.cancelled_copies.clone(),
            analysis_phase: self.analysis_phase,
            source_files_scanned: self.source_files_scanned,
            source_files_total: self.source_files_total,
            dest_files_scanned: self.dest_files_scanned,
            dest_files_total: self.dest_files_total,
            scanned_bytes: self.scanned_bytes,
            scan_rate: self.scan_rate,
            total_files_in_source: self.total_files_in_source,
            total_bytes_in_source: self.total_bytes_in_source,
            already_synced_files: self.already_synced_files,
            already_synced_bytes: self.already_synced_bytes,
            plan: self.plan,
            files_deleted: self.files_deleted,
            bytes_deleted: self.bytes_deleted,
            currently_deleting: self.currently_deleting.clone(),
            deletion_complete: self.deletion_complete,
            deletion_errors: self.deletion_errors,
            active_workers: self.active_workers,
            max_workers: self.max_workers,
            target_workers: self.target_workers,
            total_read_time: self.total_read_time,
            total_write_time: self.total_write_time,
            window: self.window.clone(),
            total_rate: self.total_rate,
            per_worker_rate: self.per_worker_rate,
            read_percent: self.read_percent,
            write_percent: self.write_percent,
            bottleneck: self.bottleneck,
            finalization_phase: self.finalization_phase.clone(),
            current_indices: Vec::new(),
        }
    }

    pub(crate) fn push_recently_completed(&mut self, path: String) {
        self.recently_completed.push_back(path);
        while self.recently_completed.len() > RECENT_COMPLETED_CAP {
            self.recently_completed.pop_front();
        }
    }

    pub(crate) fn begin_file(&mut self, idx: usize) {
        if let Some(file) = self.files_to_sync.get(idx) {
            self.current_file = file.path.clone();
            self.current_files.push(file.path.clone());
        }
        self.current_indices.push(idx);
    }

    pub(crate) fn finish_file(&mut self, idx: usize) {
        if let Some(file) = self.files_to_sync.get(idx) {
            let path = file.path.as_str();
            self.current_files.retain(|p| p != path);
        }
        self.current_indices.retain(|&i| i != idx);
    }

    /// Cumulative read/write balance; `Balanced` until one side crosses 60%.
    pub(crate) fn recompute_bottleneck(&mut self) {
        let total = self.total_read_time + self.total_write_time;
        if total.is_zero() {
            self.bottleneck = Bottleneck::Balanced;
            return;
        }
        let read_share = self.total_read_time.as_secs_f64() / total.as_secs_f64();
        self.bottleneck = if read_share > 0.6 {
            Bottleneck::Source
        } else if read_share < 0.4 {
            Bottleneck::Destination
        } else {
            Bottleneck::Balanced
        };
    }
}
