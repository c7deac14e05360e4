#![allow(dead_code)]

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use eyre::Result;
use parking_lot::Mutex;

use driftsync_core::{
    EventEmitter, FileInfo, LocalFs, ResizablePool, SyncEvent, SyncFilesystem,
};

/// Write a tree of files, creating parents as needed.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
    }
}

/// Pin the mtime of one file to a fixed stamp, for Content-mode fixtures.
pub fn set_mtime(path: &Path, stamp: SystemTime) {
    let ft = filetime::FileTime::from_system_time(stamp);
    filetime::set_file_mtime(path, ft).expect("set mtime");
}

pub fn fixed_stamp() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

/// List every file under `root` as sorted slash-relative paths.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut found = Vec::new();
    if !root.exists() {
        return found;
    }
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.expect("walk");
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("relative")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            found.push(rel);
        }
    }
    found.sort();
    found
}

/// Emitter that records every event for ordering assertions.
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingEmitter {
    pub fn snapshot(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Local endpoint that also advertises a resizable pool and records every
/// retarget call.
pub struct PooledFs {
    inner: LocalFs,
    target: AtomicUsize,
    resize_calls: Mutex<Vec<usize>>,
    min: usize,
    max: usize,
}

impl PooledFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalFs::new(root),
            target: AtomicUsize::new(1),
            resize_calls: Mutex::new(Vec::new()),
            min: 1,
            max: 32,
        }
    }

    pub fn resize_calls(&self) -> Vec<usize> {
        self.resize_calls.lock().clone()
    }
}

impl SyncFilesystem for PooledFs {
    fn scan(&self, visit: &mut dyn FnMut(FileInfo) -> Result<()>) -> Result<()> {
        self.inner.scan(visit)
    }

    fn count(&self, progress: &mut dyn FnMut(&str, u64)) -> Result<u64> {
        self.inner.count(progress)
    }

    fn stat(&self, rel: &str) -> Result<FileInfo> {
        self.inner.stat(rel)
    }

    fn open_read(&self, rel: &str) -> Result<Box<dyn Read + Send>> {
        self.inner.open_read(rel)
    }

    fn create_write(&self, rel: &str) -> Result<Box<dyn Write + Send>> {
        self.inner.create_write(rel)
    }

    fn remove(&self, rel: &str) -> Result<()> {
        self.inner.remove(rel)
    }

    fn compute_hash(&self, rel: &str) -> Result<String> {
        self.inner.compute_hash(rel)
    }

    fn chtimes(&self, rel: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.inner.chtimes(rel, atime, mtime)
    }

    fn as_resizable(&self) -> Option<&dyn ResizablePool> {
        Some(self)
    }
}

impl ResizablePool for PooledFs {
    fn resize_pool(&self, target: usize) {
        self.target.store(target, Ordering::SeqCst);
        self.resize_calls.lock().push(target);
    }

    fn pool_size(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    fn pool_target(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    fn pool_min(&self) -> usize {
        self.min
    }

    fn pool_max(&self) -> usize {
        self.max
    }
}

/// Destination whose writes always fail, for abort-threshold scenarios.
pub struct FailingDest {
    inner: LocalFs,
}

impl FailingDest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalFs::new(root),
        }
    }
}

impl SyncFilesystem for FailingDest {
    fn scan(&self, visit: &mut dyn FnMut(FileInfo) -> Result<()>) -> Result<()> {
        self.inner.scan(visit)
    }

    fn count(&self, progress: &mut dyn FnMut(&str, u64)) -> Result<u64> {
        self.inner.count(progress)
    }

    fn stat(&self, rel: &str) -> Result<FileInfo> {
        self.inner.stat(rel)
    }

    fn open_read(&self, rel: &str) -> Result<Box<dyn Read + Send>> {
        self.inner.open_read(rel)
    }

    fn create_write(&self, _rel: &str) -> Result<Box<dyn Write + Send>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only backend").into())
    }

    fn remove(&self, rel: &str) -> Result<()> {
        self.inner.remove(rel)
    }

    fn compute_hash(&self, rel: &str) -> Result<String> {
        self.inner.compute_hash(rel)
    }

    fn chtimes(&self, rel: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.inner.chtimes(rel, atime, mtime)
    }
}

/// Shorthand for sharing a filesystem double with an engine.
pub fn shared_fs<T: SyncFilesystem + 'static>(fs: T) -> Arc<dyn SyncFilesystem> {
    Arc::new(fs)
}
