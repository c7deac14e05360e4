//! Analysis pipeline: scans, comparison, and plan construction.
//!
//! Two scans run on parallel threads; the source side is filtered before its
//! entries reach the map. The monotonic-count shortcut can end the run before
//! any scan happens. Everything the sync phase needs (pending copies, orphan
//! files, orphan directories deepest-first) is produced here.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use eyre::Result;

use crate::compare::{self, ChangeType};
use crate::errors::{self, SyncError};
use crate::events::{ScanTarget, SyncEvent};
use crate::filter::PatternFilter;
use crate::fs::{FileInfo, SyncFilesystem};
use crate::state::Shared;
use crate::status::{AnalysisPhase, FileToSync, SyncPlan};

/// Cancellation poll interval for the compare pass, in files.
const COMPARE_CANCEL_STRIDE: usize = 100;

pub(crate) struct AnalyzerParams {
    pub shared: Arc<Shared>,
    pub source: Arc<dyn SyncFilesystem>,
    pub dest: Arc<dyn SyncFilesystem>,
    pub change_type: ChangeType,
    pub filter: PatternFilter,
}

/// Everything sync needs from a completed analysis. The job list is index
/// aligned with `Status::files_to_sync`.
#[derive(Debug, Default)]
pub(crate) struct AnalysisOutput {
    pub jobs: Vec<FileInfo>,
    pub orphan_files: Vec<FileInfo>,
    pub orphan_dirs: Vec<FileInfo>,
}

fn set_phase(shared: &Shared, phase: AnalysisPhase) {
    shared.status.write().analysis_phase = phase;
    shared.notify();
}

fn check_cancel(shared: &Shared) -> Result<()> {
    if shared.cancel.is_cancelled() {
        return Err(SyncError::AnalysisCancelled.into());
    }
    Ok(())
}

pub(crate) fn run_analysis(params: &AnalyzerParams) -> Result<AnalysisOutput> {
    let shared = &params.shared;
    let scan_started = shared.time.now();

    if params.change_type == ChangeType::MonotonicCount {
        if let Some(output) = try_count_shortcut(params)? {
            return Ok(output);
        }
    }

    let (source_map, dest_map) = parallel_scan(params)?;
    check_cancel(shared)?;

    let scan_elapsed = shared
        .time
        .now()
        .duration_since(scan_started)
        .as_secs_f64();
    if scan_elapsed > 0.0 {
        let mut status = shared.status.write();
        status.scan_rate = (status.scanned_bytes as f64 / scan_elapsed) as u64;
    }

    shared.emit(SyncEvent::CompareStarted);
    set_phase(shared, AnalysisPhase::Comparing);

    let mut output = AnalysisOutput::default();
    let mut files_to_sync: Vec<FileToSync> = Vec::new();
    let mut plan = SyncPlan::default();
    let mut total_files_in_source = 0u64;
    let mut total_bytes_in_source = 0u64;
    let mut already_synced_files = 0u64;
    let mut already_synced_bytes = 0u64;
    let mut total_bytes = 0u64;

    let mut source_paths: Vec<&String> = source_map.keys().collect();
    source_paths.sort();

    for (i, path) in source_paths.iter().enumerate() {
        if i % COMPARE_CANCEL_STRIDE == 0 {
            check_cancel(shared)?;
        }
        let info = &source_map[*path];
        if info.is_dir {
            continue;
        }
        total_files_in_source += 1;
        total_bytes_in_source += info.size;

        let dest_entry = dest_map.get(*path).filter(|d| !d.is_dir);
        if dest_entry.is_some() {
            plan.files_in_both += 1;
            plan.bytes_in_both += info.size;
        } else {
            plan.files_only_in_source += 1;
            plan.bytes_only_in_source += info.size;
        }

        if compare::needs_sync(
            params.change_type,
            &*params.source,
            &*params.dest,
            info,
            dest_entry,
        ) {
            files_to_sync.push(FileToSync::pending(info.path.clone(), info.size));
            output.jobs.push(info.clone());
            total_bytes += info.size;
        } else {
            already_synced_files += 1;
            already_synced_bytes += info.size;
        }
    }

    set_phase(shared, AnalysisPhase::Planning);

    let mut dest_paths: Vec<&String> = dest_map.keys().collect();
    dest_paths.sort();
    for path in dest_paths {
        if source_map.contains_key(path) {
            continue;
        }
        let info = &dest_map[path];
        if info.is_dir {
            plan.dirs_to_delete += 1;
            output.orphan_dirs.push(info.clone());
        } else {
            plan.files_only_in_dest += 1;
            plan.bytes_only_in_dest += info.size;
            output.orphan_files.push(info.clone());
        }
    }
    plan.files_to_copy = plan.files_only_in_source;
    plan.bytes_to_copy = plan.bytes_only_in_source;
    plan.files_to_delete = plan.files_only_in_dest;
    plan.bytes_to_delete = plan.bytes_only_in_dest;

    // Deepest first, so parents are empty by the time they are removed.
    output
        .orphan_dirs
        .sort_by(|a, b| depth(&b.path).cmp(&depth(&a.path)).then(b.path.cmp(&a.path)));

    {
        let mut status = shared.status.write();
        status.plan = plan;
        status.total_files = files_to_sync.len();
        status.total_bytes = total_bytes;
        status.files_to_sync = files_to_sync;
        status.total_files_in_source = total_files_in_source;
        status.total_bytes_in_source = total_bytes_in_source;
        status.already_synced_files = already_synced_files;
        status.already_synced_bytes = already_synced_bytes;
    }
    shared.emit(SyncEvent::CompareComplete { plan });
    set_phase(shared, AnalysisPhase::Complete);

    Ok(output)
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// Count both sides; equal totals mean the trees are declared in sync and the
/// scan never runs. Unequal totals fall through with the counts preserved.
fn try_count_shortcut(params: &AnalyzerParams) -> Result<Option<AnalysisOutput>> {
    let shared = &params.shared;

    set_phase(shared, AnalysisPhase::CountingSource);
    let source_count = params.source.count(&mut |_path, n| {
        shared.status.write().source_files_scanned = n;
    })?;
    {
        let mut status = shared.status.write();
        status.source_files_total = source_count;
        status.source_files_scanned = source_count;
    }
    check_cancel(shared)?;

    set_phase(shared, AnalysisPhase::CountingDest);
    let dest_count = match params.dest.count(&mut |_path, n| {
        shared.status.write().dest_files_scanned = n;
    }) {
        Ok(count) => count,
        Err(err) if errors::is_not_found(&err) => 0,
        Err(err) => return Err(err),
    };
    {
        let mut status = shared.status.write();
        status.dest_files_total = dest_count;
        status.dest_files_scanned = dest_count;
    }
    check_cancel(shared)?;

    if source_count != dest_count {
        return Ok(None);
    }

    shared.emit(SyncEvent::CompareComplete {
        plan: SyncPlan::default(),
    });
    set_phase(shared, AnalysisPhase::Complete);
    Ok(Some(AnalysisOutput::default()))
}

type ScanMap = HashMap<String, FileInfo>;

fn parallel_scan(params: &AnalyzerParams) -> Result<(ScanMap, ScanMap)> {
    set_phase(&params.shared, AnalysisPhase::ScanningSource);

    thread::scope(|scope| {
        let source_scan = scope.spawn(|| scan_source(params));
        let dest_scan = scope.spawn(|| scan_dest(params));
        let source_map = join_scan(source_scan)?;
        let dest_map = join_scan(dest_scan)?;
        Ok((source_map, dest_map))
    })
}

fn join_scan(handle: thread::ScopedJoinHandle<'_, Result<ScanMap>>) -> Result<ScanMap> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

fn scan_source(params: &AnalyzerParams) -> Result<ScanMap> {
    let shared = &params.shared;
    shared.emit(SyncEvent::ScanStarted {
        target: ScanTarget::Source,
    });

    let mut map = ScanMap::new();
    let mut observed = 0u64;
    params.source.scan(&mut |info| {
        if shared.cancel.is_cancelled() {
            return Err(SyncError::AnalysisCancelled.into());
        }
        observed += 1;
        {
            let mut status = shared.status.write();
            status.source_files_scanned = observed;
            status.source_files_total = observed;
            status.scanned_bytes += info.size;
        }
        if info.is_dir || params.filter.should_include(&info.path) {
            map.insert(info.path.clone(), info);
        }
        Ok(())
    })?;

    shared.emit(SyncEvent::ScanComplete {
        target: ScanTarget::Source,
        count: observed,
    });
    set_phase(shared, AnalysisPhase::ScanningDest);
    Ok(map)
}

fn scan_dest(params: &AnalyzerParams) -> Result<ScanMap> {
    let shared = &params.shared;
    shared.emit(SyncEvent::ScanStarted {
        target: ScanTarget::Dest,
    });

    let mut map = ScanMap::new();
    let mut observed = 0u64;
    let scanned = params.dest.scan(&mut |info| {
        if shared.cancel.is_cancelled() {
            return Err(SyncError::AnalysisCancelled.into());
        }
        observed += 1;
        {
            let mut status = shared.status.write();
            status.dest_files_scanned = observed;
            status.dest_files_total = observed;
            status.scanned_bytes += info.size;
        }
        map.insert(info.path.clone(), info);
        Ok(())
    });

    match scanned {
        Ok(()) => {}
        // A destination that does not exist yet is an empty tree.
        Err(err) if errors::is_not_found(&err) => map.clear(),
        Err(err) => return Err(err),
    }

    shared.emit(SyncEvent::ScanComplete {
        target: ScanTarget::Dest,
        count: observed,
    });
    Ok(map)
}
