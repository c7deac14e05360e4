//! Sync orchestration: deletion phase, job distribution, worker lifecycle,
//! error accumulation, and completion.
//!
//! Deletion always runs before copying. Fixed mode starts a constant worker
//! count; adaptive mode starts small and lets the scaling controller move the
//! target while a control receiver spawns workers on demand. A dedicated
//! collector drains the error channel so no worker ever blocks on delivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Sender};
use eyre::Result;
use log::debug;
use parking_lot::Mutex;

use crate::analyze::AnalysisOutput;
use crate::compare::ChangeType;
use crate::controller::{self, ControllerParams, WorkerControl};
use crate::errors::{SyncError, MAX_SYNC_ERRORS};
use crate::events::{SyncEvent, SyncResult};
use crate::fs::SyncFilesystem;
use crate::state::Shared;
use crate::status::{FileState, SyncFailure};
use crate::worker::{spawn_worker, Job, WorkerContext};

/// Upper bound on queued-but-unclaimed jobs; keeps dispatch responsive to
/// cancellation and the abort threshold on large plans.
const JOB_QUEUE_DEPTH: usize = 64;

const SEND_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct ExecutorParams {
    pub shared: Arc<Shared>,
    pub source: Arc<dyn SyncFilesystem>,
    pub dest: Arc<dyn SyncFilesystem>,
    pub change_type: ChangeType,
    pub workers: usize,
    pub adaptive: bool,
    pub max_workers: usize,
}

pub(crate) fn run_sync(params: &ExecutorParams, analysis: AnalysisOutput) -> Result<()> {
    {
        let mut status = params.shared.status.write();
        status.start_time = Some(params.shared.time.system_now());
        status.finalization_phase = "running".into();
    }
    params.shared.emit(SyncEvent::SyncStarted);
    params.shared.notify();

    let deletion = run_deletion_phase(params, &analysis);
    if deletion.is_ok() {
        run_copy_phase(params, &analysis);
    }

    finalize(params, deletion)
}

/// Replay the orphan lists captured by analysis: files first, then
/// directories deepest-first so parents are empty when their turn comes.
fn run_deletion_phase(params: &ExecutorParams, analysis: &AnalysisOutput) -> Result<()> {
    let shared = &params.shared;

    for info in analysis.orphan_files.iter().chain(&analysis.orphan_dirs) {
        if shared.cancel.is_cancelled() {
            shared.status.write().currently_deleting.clear();
            return Err(SyncError::SyncAborted.into());
        }

        {
            let mut status = shared.status.write();
            status.currently_deleting.push(info.path.clone());
        }
        shared.notify();

        match params.dest.remove(&info.path) {
            Ok(()) => {
                let mut status = shared.status.write();
                if !info.is_dir {
                    status.files_deleted += 1;
                    status.bytes_deleted += info.size;
                }
            }
            Err(err) => {
                shared.status.write().deletion_errors += 1;
                let local = SyncError::DeleteFailed(info.path.clone());
                debug!("{local}: {err:#}");
                let count = shared.record_failure(SyncFailure {
                    path: info.path.clone(),
                    phase: "delete",
                    message: format!("{err:#}"),
                });
                if count >= MAX_SYNC_ERRORS {
                    let mut status = shared.status.write();
                    status.currently_deleting.clear();
                    return Err(SyncError::TooManyErrors(status.errors.len()).into());
                }
            }
        }

        {
            let mut status = shared.status.write();
            let done = info.path.as_str();
            status.currently_deleting.retain(|p| p != done);
        }
    }

    shared.status.write().deletion_complete = true;
    shared.notify();
    Ok(())
}

fn run_copy_phase(params: &ExecutorParams, analysis: &AnalysisOutput) {
    let jobs: Vec<Job> = analysis
        .jobs
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, info)| Job { index, info })
        .collect();
    if jobs.is_empty() {
        return;
    }

    let initial = initial_workers(params, jobs.len());
    params
        .shared
        .desired_workers
        .store(initial, Ordering::SeqCst);
    controller::resize_pools(&*params.source, &*params.dest, initial);

    let (job_tx, job_rx) = bounded(jobs.len().min(JOB_QUEUE_DEPTH).max(1));
    let (error_tx, error_rx) = bounded(jobs.len());
    let remaining = Arc::new(AtomicUsize::new(jobs.len()));

    let ctx = Arc::new(WorkerContext {
        shared: Arc::clone(&params.shared),
        source: Arc::clone(&params.source),
        dest: Arc::clone(&params.dest),
        change_type: params.change_type,
        job_rx,
        error_tx,
        remaining: Arc::clone(&remaining),
    });

    let handles: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..initial {
        spawn_worker(Arc::clone(&ctx), &handles);
    }

    let collector = {
        let shared = Arc::clone(&params.shared);
        thread::spawn(move || {
            while let Ok(failure) = error_rx.recv() {
                shared.record_failure(failure);
            }
        })
    };

    let distributor = {
        let shared = Arc::clone(&params.shared);
        thread::spawn(move || distribute_jobs(jobs, job_tx, &shared))
    };

    let mut controller_handle = None;
    let mut receiver_handle = None;
    let mut shutdown_tx = None;
    if params.adaptive {
        let (control_tx, control_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        shutdown_tx = Some(stop_tx);

        let controller_params = ControllerParams {
            shared: Arc::clone(&params.shared),
            source: Arc::clone(&params.source),
            dest: Arc::clone(&params.dest),
            remaining: Arc::clone(&remaining),
            control_tx,
            shutdown_rx: stop_rx,
            max_workers: params.max_workers,
        };
        controller_handle = Some(thread::spawn(move || {
            controller::run_controller(controller_params)
        }));

        let receiver_ctx = Arc::clone(&ctx);
        let receiver_handles = Arc::clone(&handles);
        receiver_handle = Some(thread::spawn(move || {
            while let Ok(WorkerControl::AddWorker) = control_rx.recv() {
                spawn_worker(Arc::clone(&receiver_ctx), &receiver_handles);
            }
        }));
    }

    // Only the workers and the control receiver may keep the context (and
    // with it the error channel) alive past this point.
    drop(ctx);

    let _ = distributor.join();

    // The controller keeps scaling while copies drain, so workers are joined
    // first. The receiver may still push freshly spawned handles during this
    // loop; they find the channel drained and exit on their own.
    loop {
        let next = handles.lock().pop();
        match next {
            Some(handle) => {
                let _ = handle.join();
            }
            None => break,
        }
    }

    drop(shutdown_tx);
    if let Some(handle) = controller_handle {
        let _ = handle.join();
    }
    if let Some(handle) = receiver_handle {
        let _ = handle.join();
    }

    let _ = collector.join();
}

fn initial_workers(params: &ExecutorParams, job_count: usize) -> usize {
    let requested = if params.adaptive {
        if params.workers == 0 {
            1
        } else {
            params.workers.min(params.max_workers)
        }
    } else {
        params.workers
    };
    requested.clamp(1, job_count.max(1))
}

fn distribute_jobs(jobs: Vec<Job>, tx: Sender<Job>, shared: &Shared) {
    for job in jobs {
        let mut pending = job;
        loop {
            if shared.cancel.is_cancelled()
                || shared.error_count.load(Ordering::SeqCst) >= MAX_SYNC_ERRORS
            {
                return;
            }
            match tx.send_timeout(pending, SEND_POLL_INTERVAL) {
                Ok(()) => break,
                Err(crossbeam_channel::SendTimeoutError::Timeout(returned)) => pending = returned,
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

/// Seal the run: account for never-started files, stamp the end, emit
/// `SyncComplete`, and translate the counters into the terminal outcome.
fn finalize(params: &ExecutorParams, deletion: Result<()>) -> Result<()> {
    let shared = &params.shared;

    let result = {
        let mut status = shared.status.write();
        let mut undispatched = 0u64;
        for file in status.files_to_sync.iter_mut() {
            if file.state == FileState::Pending {
                file.state = FileState::Cancelled;
                undispatched += 1;
            }
        }
        status.cancelled_files += undispatched as usize;
        status.end_time = Some(shared.time.system_now());
        status.finalization_phase = "complete".into();

        SyncResult {
            files_copied: status.processed_files as u64,
            files_deleted: status.files_deleted,
            bytes_copied: shared.transferred_bytes.load(Ordering::SeqCst),
            errors: status
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.path, e.message))
                .collect(),
        }
    };
    shared.emit(SyncEvent::SyncComplete { result });
    shared.notify();

    deletion?;

    let recorded = shared.status.read().errors.len();
    if shared.error_count.load(Ordering::SeqCst) >= MAX_SYNC_ERRORS {
        return Err(SyncError::TooManyErrors(recorded).into());
    }
    let failed = shared.status.read().failed_files;
    if failed > 0 {
        return Err(SyncError::FilesFailed(failed).into());
    }
    Ok(())
}
