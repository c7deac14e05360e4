//! Public engine surface consumed by UI and CLI layers.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::Result;
use log::info;
use parking_lot::Mutex;

use crate::analyze::{self, AnalysisOutput, AnalyzerParams};
use crate::cancel::CancelToken;
use crate::clock::{SystemClock, TimeProvider};
use crate::compare::ChangeType;
use crate::errors::SyncError;
use crate::events::EventEmitter;
use crate::executor::{self, ExecutorParams};
use crate::filter::PatternFilter;
use crate::fs::{LocalFs, SyncFilesystem};
use crate::state::Shared;
use crate::status::Status;

/// Ceiling for the adaptive controller, bounded by the machine.
fn default_max_workers() -> usize {
    num_cpus::get().saturating_mul(2).clamp(1, 16)
}

/// One source/destination pair and the knobs for a run. Configure the public
/// fields, then `analyze()`, inspect the plan, then `sync()`.
pub struct Engine {
    source: Arc<dyn SyncFilesystem>,
    dest: Arc<dyn SyncFilesystem>,

    /// Worker count. In adaptive mode 0 means "start at one and climb".
    pub workers: usize,
    /// Let the hill-climbing controller move the worker count during a run.
    pub adaptive: bool,
    pub change_type: ChangeType,
    /// Include filter for the source side; empty includes everything.
    pub file_pattern: String,
    pub verbose: bool,

    max_workers: usize,
    shared: Arc<Shared>,
    analysis: Mutex<Option<AnalysisOutput>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workers", &self.workers)
            .field("adaptive", &self.adaptive)
            .field("change_type", &self.change_type)
            .field("file_pattern", &self.file_pattern)
            .field("verbose", &self.verbose)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine over two endpoint URIs. Plain paths and `file://`
    /// URIs resolve to the local driver; anything else is rejected.
    pub fn new(source_uri: &str, dest_uri: &str) -> Result<Self> {
        let source = filesystem_for(source_uri)?;
        let dest = filesystem_for(dest_uri)?;
        Ok(Self::with_filesystems(source, dest))
    }

    /// Build an engine over already-constructed endpoints. This is the seam
    /// for non-local drivers and for test doubles.
    pub fn with_filesystems(
        source: Arc<dyn SyncFilesystem>,
        dest: Arc<dyn SyncFilesystem>,
    ) -> Self {
        Self {
            source,
            dest,
            workers: 0,
            adaptive: false,
            change_type: ChangeType::default(),
            file_pattern: String::new(),
            verbose: false,
            max_workers: default_max_workers(),
            shared: Arc::new(Shared::new(Arc::new(SystemClock))),
            analysis: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Swap the clock. Call before the first `analyze()`; observers
    /// registered earlier are discarded with the old shared state.
    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.shared = Arc::new(Shared::new(time));
        self
    }

    /// Populate the sync plan. Fails with `AnalysisCancelled` when the
    /// cancellation token fires mid-analysis.
    pub fn analyze(&self) -> Result<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(SyncError::AnalysisCancelled.into());
        }
        if self.verbose {
            info!("analyze: pattern {:?}, mode {:?}", self.file_pattern, self.change_type);
        }

        self.shared.reset_run();
        self.analysis.lock().take();

        let params = AnalyzerParams {
            shared: Arc::clone(&self.shared),
            source: Arc::clone(&self.source),
            dest: Arc::clone(&self.dest),
            change_type: self.change_type,
            filter: PatternFilter::new(&self.file_pattern),
        };
        match analyze::run_analysis(&params) {
            Ok(output) => {
                *self.analysis.lock() = Some(output);
                Ok(())
            }
            Err(err) => {
                if !crate::errors::is_cancelled(&err) {
                    self.shared.emit(crate::events::SyncEvent::ErrorOccurred {
                        phase: "analyze".into(),
                        error: format!("{err:#}"),
                    });
                }
                Err(err)
            }
        }
    }

    /// Execute the plan produced by the last `analyze()`: deletions first,
    /// then parallel copying. Consumes the plan.
    pub fn sync(&self) -> Result<()> {
        let analysis = self
            .analysis
            .lock()
            .take()
            .ok_or(SyncError::NotAnalyzed)?;
        if self.verbose {
            info!(
                "sync: {} file(s) to copy, {} orphan file(s), {} orphan dir(s)",
                analysis.jobs.len(),
                analysis.orphan_files.len(),
                analysis.orphan_dirs.len()
            );
        }

        let params = ExecutorParams {
            shared: Arc::clone(&self.shared),
            source: Arc::clone(&self.source),
            dest: Arc::clone(&self.dest),
            change_type: self.change_type,
            workers: self.workers,
            adaptive: self.adaptive,
            max_workers: self.max_workers.max(self.workers.max(1)),
        };
        executor::run_sync(&params, analysis)
    }

    /// Request cancellation. Idempotent; observable from any thread.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Handle for imposing external deadlines on a run.
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    /// Idempotent shutdown: cancels any in-flight work and closes the log.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel();
            self.shared.close_run_log();
        }
    }

    /// Deep, reduced status snapshot. Cheap regardless of plan size.
    pub fn get_status(&self) -> Status {
        self.shared.snapshot()
    }

    pub fn set_event_emitter(&self, emitter: Option<Arc<dyn EventEmitter>>) {
        self.shared.set_emitter(emitter);
    }

    pub fn event_emitter(&self) -> Option<Arc<dyn EventEmitter>> {
        self.shared.emitter()
    }

    /// Register a callback invoked with a fresh snapshot after every
    /// significant status transition.
    pub fn register_status_callback(
        &self,
        callback: impl Fn(&Status) + Send + Sync + 'static,
    ) {
        self.shared.register_callback(Box::new(callback));
    }

    /// Mirror the event stream into a JSON-lines file.
    pub fn enable_file_logging(&self, path: &Path) -> Result<()> {
        self.shared.open_run_log(path)
    }

    pub fn close_log(&self) {
        self.shared.close_run_log();
    }
}

fn filesystem_for(uri: &str) -> Result<Arc<dyn SyncFilesystem>> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Arc::new(LocalFs::new(path)));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(SyncError::UnsupportedScheme(scheme.to_string()).into());
    }
    Ok(Arc::new(LocalFs::new(uri)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_and_file_uris_resolve() {
        assert!(Engine::new("/tmp/a", "/tmp/b").is_ok());
        assert!(Engine::new("file:///tmp/a", "file:///tmp/b").is_ok());
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        let err = Engine::new("sftp://host/a", "/tmp/b").unwrap_err();
        assert_eq!(
            err.downcast_ref::<SyncError>(),
            Some(&SyncError::UnsupportedScheme("sftp".into()))
        );
    }

    #[test]
    fn sync_without_analyze_is_an_error() {
        let engine = Engine::new("/tmp/a", "/tmp/b").unwrap();
        let err = engine.sync().unwrap_err();
        assert_eq!(
            err.downcast_ref::<SyncError>(),
            Some(&SyncError::NotAnalyzed)
        );
    }

    #[test]
    fn close_is_idempotent_and_cancels() {
        let engine = Engine::new("/tmp/a", "/tmp/b").unwrap();
        engine.close();
        engine.close();
        assert!(engine.cancel_token().is_cancelled());
    }
}
