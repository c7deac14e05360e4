//! Hill-climbing worker-scaling controller.
//!
//! A 1 s ticker drives a decision every 10 s, aligned with the sample window.
//! The controller only moves the target; it never stops a worker itself.
//! Workers observe `desired_workers` dropping below the active count and exit
//! through their CAS loop, which keeps the controller free of any lock the
//! workers might be holding.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Receiver, Sender};
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::fs::SyncFilesystem;
use crate::state::Shared;

/// How often the controller acts. Matches the metrics retention window.
pub const SCALE_INTERVAL: Duration = Duration::from_secs(10);

/// Throughput ratio above which the last move counts as an improvement.
const IMPROVE_RATIO: f64 = 1.05;
/// Throughput ratio below which the last move counts as a degradation.
const DEGRADE_RATIO: f64 = 0.95;

/// Signals sent to the worker-control receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerControl {
    AddWorker,
}

/// Controller memory between ticks.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveScalingState {
    pub last_throughput: f64,
    pub last_adjustment: i32,
    pub last_check: Instant,
}

impl AdaptiveScalingState {
    pub fn new(now: Instant) -> Self {
        Self {
            last_throughput: 0.0,
            last_adjustment: 0,
            last_check: now,
        }
    }
}

fn random_direction(rng: &mut SmallRng) -> i32 {
    if rng.random_bool(0.5) {
        1
    } else {
        -1
    }
}

/// One scaling decision. Pure in everything but the RNG: continue in the last
/// successful direction, reverse on degradation, randomly perturb on a
/// plateau, and hold rather than oscillate off a boundary.
pub fn decide(
    state: &AdaptiveScalingState,
    current_throughput: f64,
    desired: usize,
    max: usize,
    rng: &mut SmallRng,
) -> i32 {
    if state.last_throughput <= 0.0 {
        // First measurement: probe upward.
        return 1;
    }

    let ratio = current_throughput / state.last_throughput;
    if ratio > IMPROVE_RATIO {
        if state.last_adjustment == 0 {
            random_direction(rng)
        } else {
            state.last_adjustment
        }
    } else if ratio < DEGRADE_RATIO {
        let at_floor = desired == 1 && state.last_adjustment == -1;
        let at_ceiling = desired == max && state.last_adjustment == 1;
        if at_floor || at_ceiling {
            0
        } else if state.last_adjustment == 0 {
            random_direction(rng)
        } else {
            -state.last_adjustment
        }
    } else {
        random_direction(rng)
    }
}

/// Clamp an adjustment to the worker bounds. Returns the new target and the
/// adjustment actually applied (0 when clamping made the move a no-op).
pub fn apply_bounds(desired: usize, delta: i32, max: usize) -> (usize, i32) {
    let new_desired = (desired as i64 + delta as i64).clamp(1, max as i64) as usize;
    (new_desired, new_desired as i32 - desired as i32)
}

pub(crate) struct ControllerParams {
    pub shared: Arc<Shared>,
    pub source: Arc<dyn SyncFilesystem>,
    pub dest: Arc<dyn SyncFilesystem>,
    pub remaining: Arc<std::sync::atomic::AtomicUsize>,
    pub control_tx: Sender<WorkerControl>,
    pub shutdown_rx: Receiver<()>,
    pub max_workers: usize,
}

/// Retarget both backing pools when the capability is present.
pub(crate) fn resize_pools(source: &dyn SyncFilesystem, dest: &dyn SyncFilesystem, target: usize) {
    if let Some(pool) = source.as_resizable() {
        pool.resize_pool(target);
    }
    if let Some(pool) = dest.as_resizable() {
        pool.resize_pool(target);
    }
}

pub(crate) fn run_controller(params: ControllerParams) {
    let ControllerParams {
        shared,
        source,
        dest,
        remaining,
        control_tx,
        shutdown_rx,
        max_workers,
    } = params;

    let mut state = AdaptiveScalingState::new(shared.time.now());
    let mut rng = SmallRng::from_os_rng();
    let mut last_bytes = shared.transferred_bytes.load(Ordering::SeqCst);
    let ticker = tick(Duration::from_secs(1));

    loop {
        select! {
            recv(ticker) -> _ => {
                let now = shared.time.now();
                if now.duration_since(state.last_check) < SCALE_INTERVAL {
                    continue;
                }
                if remaining.load(Ordering::SeqCst) == 0 {
                    continue;
                }

                let elapsed = now.duration_since(state.last_check);
                let bytes_now = shared.transferred_bytes.load(Ordering::SeqCst);
                let current = current_throughput(&shared, bytes_now, last_bytes, elapsed);

                let desired = shared.desired_workers.load(Ordering::SeqCst).max(1);
                let delta = decide(&state, current, desired, max_workers, &mut rng);
                let (new_desired, applied) = apply_bounds(desired, delta, max_workers);

                if applied != 0 {
                    shared.desired_workers.store(new_desired, Ordering::SeqCst);
                    resize_pools(&*source, &*dest, new_desired);
                    if applied > 0
                        && shared.active_workers.load(Ordering::SeqCst) < new_desired
                    {
                        let _ = control_tx.send(WorkerControl::AddWorker);
                    }
                    shared.notify();
                }
                debug!(
                    "scaling tick: throughput {:.0} B/s, workers {} -> {} (delta {})",
                    current, desired, new_desired, applied
                );

                state.last_throughput = current;
                state.last_adjustment = applied;
                state.last_check = now;
                last_bytes = bytes_now;
            }
            recv(shutdown_rx) -> _ => break,
        }
    }
}

/// Prefer the smoothed window rate; fall back to a raw point estimate while
/// the window is thin.
fn current_throughput(shared: &Shared, bytes_now: u64, last_bytes: u64, elapsed: Duration) -> f64 {
    if let Some(rate) = shared.status.read().window.total_rate() {
        return rate;
    }
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes_now.saturating_sub(last_bytes) as f64 / secs
}
