//! Copy workers.
//!
//! Each worker is an OS thread pulling jobs from the shared bounded channel.
//! Scale-down is cooperative: after every job a worker compares the active
//! count against the desired target and races a CAS decrement; winners exit.
//! If `n` workers race a multi-step scale-down, exactly `active - desired`
//! win, never more, never fewer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::warn;
use parking_lot::Mutex;

use crate::compare::ChangeType;
use crate::errors::{self, MAX_SYNC_ERRORS};
use crate::events::SyncEvent;
use crate::fs::{self, FileInfo, SyncFilesystem};
use crate::metrics::RateSample;
use crate::state::Shared;
use crate::status::{FileState, SyncFailure};

const SAMPLE_PERIOD: Duration = Duration::from_secs(1);
const REFRESH_PERIOD: Duration = Duration::from_millis(100);

/// One unit of copy work. `index` addresses the matching
/// `Status::files_to_sync` entry.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub index: usize,
    pub info: FileInfo,
}

pub(crate) struct WorkerContext {
    pub shared: Arc<Shared>,
    pub source: Arc<dyn SyncFilesystem>,
    pub dest: Arc<dyn SyncFilesystem>,
    pub change_type: ChangeType,
    pub job_rx: Receiver<Job>,
    pub error_tx: Sender<SyncFailure>,
    pub remaining: Arc<AtomicUsize>,
}

/// Spawn one worker thread, accounting it as active before it runs so the
/// observed count never undershoots.
pub(crate) fn spawn_worker(ctx: Arc<WorkerContext>, handles: &Mutex<Vec<JoinHandle<()>>>) {
    let seq = ctx.shared.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.shared.max_workers_seen.fetch_max(seq, Ordering::SeqCst);

    let thread_ctx = Arc::clone(&ctx);
    let spawned = thread::Builder::new()
        .name(format!("sync-worker-{seq}"))
        .spawn(move || worker_loop(&thread_ctx));
    match spawned {
        Ok(handle) => handles.lock().push(handle),
        Err(err) => {
            ctx.shared.active_workers.fetch_sub(1, Ordering::SeqCst);
            warn!("failed to spawn worker thread: {err}");
        }
    }
}

fn worker_loop(ctx: &WorkerContext) {
    loop {
        if ctx.shared.cancel.is_cancelled() {
            break;
        }
        let job = match ctx.job_rx.recv() {
            Ok(job) => job,
            Err(_) => break,
        };

        let failure = sync_file(ctx, &job);
        ctx.remaining.fetch_sub(1, Ordering::SeqCst);

        if let Some(failure) = failure {
            let _ = ctx.error_tx.send(failure);
            if ctx.shared.error_count.load(Ordering::SeqCst) >= MAX_SYNC_ERRORS {
                break;
            }
        }

        if consume_scale_down(&ctx.shared.active_workers, &ctx.shared.desired_workers) {
            // The CAS already removed this worker from the active count.
            return;
        }
    }
    ctx.shared.active_workers.fetch_sub(1, Ordering::SeqCst);
}

/// Race to be one of the workers that exits when the target drops below the
/// active count. Returns true when this worker won a slot and must exit.
pub(crate) fn consume_scale_down(active: &AtomicUsize, desired: &AtomicUsize) -> bool {
    loop {
        let current = active.load(Ordering::SeqCst);
        let target = desired.load(Ordering::SeqCst);
        if current <= target {
            return false;
        }
        if active
            .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return true;
        }
    }
}

/// Process one file end to end. Returns the failure to deliver on the error
/// channel, or `None` for success and cancellation.
fn sync_file(ctx: &WorkerContext, job: &Job) -> Option<SyncFailure> {
    let idx = job.index;
    let path = job.info.path.clone();
    let shared = &ctx.shared;

    {
        let mut status = shared.status.write();
        if let Some(file) = status.files_to_sync.get_mut(idx) {
            file.state = FileState::Opening;
        }
        status.begin_file(idx);
    }
    shared.emit(SyncEvent::SyncFileStarted {
        path: path.clone(),
        size: job.info.size,
    });
    shared.notify();

    // In Content mode, matching hashes mean only the timestamp drifted.
    if ctx.change_type == ChangeType::Content && content_fast_path(ctx, &job.info) {
        shared
            .transferred_bytes
            .fetch_add(job.info.size, Ordering::SeqCst);
        {
            let mut status = shared.status.write();
            if let Some(file) = status.files_to_sync.get_mut(idx) {
                file.state = FileState::Complete;
                file.transferred = job.info.size;
            }
            status.processed_files += 1;
            status.push_recently_completed(path.clone());
            status.finish_file(idx);
        }
        shared.emit(SyncEvent::SyncFileComplete { path });
        shared.notify();
        return None;
    }

    let time = Arc::clone(&shared.time);
    let total_bytes_planned = {
        let status = shared.status.read();
        status.total_bytes
    };

    let mut first_chunk = true;
    let mut reported: u64 = 0;
    let mut sample_bytes: u64 = 0;
    let mut last_sample = time.now();
    let mut last_refresh = time.now();

    let mut progress = |done: u64, _total: u64, _path: &str| {
        let delta = done.saturating_sub(reported);
        reported = done;
        let transferred_now = shared.transferred_bytes.fetch_add(delta, Ordering::SeqCst) + delta;
        sample_bytes += delta;

        let now = time.now();
        let mut heartbeat = None;
        {
            let mut status = shared.status.write();
            if first_chunk {
                first_chunk = false;
                if let Some(file) = status.files_to_sync.get_mut(idx) {
                    if file.state == FileState::Opening {
                        file.state = FileState::Copying;
                    }
                }
            }
            if let Some(file) = status.files_to_sync.get_mut(idx) {
                file.transferred = done;
            }

            if now.duration_since(last_sample) >= SAMPLE_PERIOD {
                last_sample = now;
                let active = shared.active_workers.load(Ordering::SeqCst);
                status.window.push(RateSample {
                    at: now,
                    bytes: sample_bytes,
                    read_time: Duration::ZERO,
                    write_time: Duration::ZERO,
                    active_workers: active,
                });
                sample_bytes = 0;
                heartbeat = Some(transferred_now);
            }

            if now.duration_since(last_refresh) >= REFRESH_PERIOD {
                last_refresh = now;
                status.current_file = job.info.path.clone();
                let rate = status.window.total_rate().unwrap_or(0.0) as u64;
                status.bytes_per_second = rate;
                if rate > 0 {
                    let left = total_bytes_planned.saturating_sub(transferred_now);
                    let eta = Duration::from_secs_f64(left as f64 / rate as f64);
                    status.estimated_time_left = Some(eta);
                    status.completion_time = Some(time.system_now() + eta);
                }
            }
        }
        if let Some(transferred) = heartbeat {
            let bytes_per_second = { shared.status.read().bytes_per_second };
            shared.emit(SyncEvent::SyncProgress {
                transferred_bytes: transferred,
                bytes_per_second,
            });
            shared.notify();
        }
    };

    let mut on_data_complete = || {
        {
            let mut status = shared.status.write();
            if let Some(file) = status.files_to_sync.get_mut(idx) {
                file.state = FileState::Finalizing;
            }
        }
        shared.notify();
    };

    let result = fs::copy_with_stats(
        &*ctx.source,
        &*ctx.dest,
        &job.info,
        &mut progress,
        &shared.cancel,
        &mut on_data_complete,
    );

    match result {
        Err(err) if errors::is_cancelled(&err) => {
            {
                let mut status = shared.status.write();
                if let Some(file) = status.files_to_sync.get_mut(idx) {
                    file.state = FileState::Cancelled;
                }
                status.cancelled_copies.push(path.clone());
                status.cancelled_files += 1;
                status.finish_file(idx);
            }
            shared.notify();
            None
        }
        Err(err) => {
            let message = format!("{err:#}");
            {
                let mut status = shared.status.write();
                if let Some(file) = status.files_to_sync.get_mut(idx) {
                    file.state = FileState::Error;
                    file.error = Some(message.clone());
                }
                status.failed_files += 1;
                status.finish_file(idx);
            }
            shared.notify();
            Some(SyncFailure {
                path,
                phase: "copy",
                message,
            })
        }
        Ok(stats) => {
            let now = time.now();
            {
                let mut status = shared.status.write();
                if let Some(file) = status.files_to_sync.get_mut(idx) {
                    file.state = FileState::Complete;
                    file.transferred = stats.bytes;
                }
                status.processed_files += 1;
                status.push_recently_completed(path.clone());
                status.total_read_time += stats.read_time;
                status.total_write_time += stats.write_time;
                let active = shared.active_workers.load(Ordering::SeqCst);
                status.window.push(RateSample {
                    at: now,
                    bytes: sample_bytes,
                    read_time: stats.read_time,
                    write_time: stats.write_time,
                    active_workers: active,
                });
                status.recompute_bottleneck();
                status.finish_file(idx);
            }
            shared.emit(SyncEvent::SyncFileComplete { path });
            shared.notify();
            None
        }
    }
}

/// True when both sides hash identically and the destination timestamp was
/// refreshed to the source's.
fn content_fast_path(ctx: &WorkerContext, info: &FileInfo) -> bool {
    if ctx.dest.stat(&info.path).is_err() {
        return false;
    }
    let (Ok(src_hash), Ok(dst_hash)) = (
        ctx.source.compute_hash(&info.path),
        ctx.dest.compute_hash(&info.path),
    ) else {
        return false;
    };
    if src_hash != dst_hash {
        return false;
    }
    ctx.dest.chtimes(&info.path, info.mtime, info.mtime).is_ok()
}
