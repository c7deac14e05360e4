//! Filesystem abstraction for sync endpoints.
//!
//! Each endpoint is rooted at construction and addressed with relative,
//! forward-slash paths. Cross-endpoint operations (copying, byte-level
//! comparison) are free functions over two trait objects so each side keeps
//! only primitive stream capabilities. Backends with a retargetable
//! connection pool advertise it through [`ResizablePool`], probed at runtime.

pub mod hash;
pub mod local;

use std::io::{Read, Write};
use std::time::{Duration, Instant, SystemTime};

use eyre::Result;

use crate::cancel::CancelToken;
use crate::errors::SyncError;

pub use hash::HashKind;
pub use local::LocalFs;

/// Interval at which copy loops surface progress to the caller.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

const COPY_BUF_BYTES: usize = 256 * 1024;
const COMPARE_BUF_BYTES: usize = 64 * 1024;

/// A single scanned entry. Paths are relative to the endpoint root and
/// forward-slash normalized. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mtime: SystemTime,
    pub is_dir: bool,
}

/// Timing breakdown of a completed copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyStats {
    pub bytes: u64,
    pub read_time: Duration,
    pub write_time: Duration,
}

/// Progress callback: (bytes transferred so far, total bytes, relative path).
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64, &str);

/// Capability of backends whose underlying connection/thread count can be
/// retargeted at runtime to follow the logical worker count.
pub trait ResizablePool: Send + Sync {
    fn resize_pool(&self, target: usize);
    fn pool_size(&self) -> usize;
    fn pool_target(&self) -> usize;
    fn pool_min(&self) -> usize;
    fn pool_max(&self) -> usize;
}

/// Rooted endpoint capability set. Implementations must be safe to share
/// across worker threads.
pub trait SyncFilesystem: Send + Sync {
    /// Visit every regular file and directory under the root, in unspecified
    /// order. Restartable by calling again. The visitor may return an error
    /// to abort the walk; it is propagated unchanged.
    fn scan(&self, visit: &mut dyn FnMut(FileInfo) -> Result<()>) -> Result<()>;

    /// Count regular files under the root, reporting each path with the
    /// running count as it is observed.
    fn count(&self, progress: &mut dyn FnMut(&str, u64)) -> Result<u64>;

    /// Metadata for one relative path. Missing paths are an error.
    fn stat(&self, rel: &str) -> Result<FileInfo>;

    fn open_read(&self, rel: &str) -> Result<Box<dyn Read + Send>>;

    /// Open a writer, creating intermediate directories on demand.
    fn create_write(&self, rel: &str) -> Result<Box<dyn Write + Send>>;

    /// Remove a file or an empty directory.
    fn remove(&self, rel: &str) -> Result<()>;

    /// Content digest, stable within a run. Hex, lowercase.
    fn compute_hash(&self, rel: &str) -> Result<String>;

    fn chtimes(&self, rel: &str, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    /// Probe for the resizable-pool capability. Default: absent.
    fn as_resizable(&self) -> Option<&dyn ResizablePool> {
        None
    }
}

/// Stream one file across endpoints, reporting progress at most every 100 ms,
/// invoking `on_data_complete` once all data has been written but before the
/// flush and timestamp update, and honoring `cancel` between chunks with the
/// distinguished cancelled error. The destination mtime is set to the
/// source's on success.
pub fn copy_with_stats(
    src: &dyn SyncFilesystem,
    dst: &dyn SyncFilesystem,
    info: &FileInfo,
    progress: ProgressFn<'_>,
    cancel: &CancelToken,
    on_data_complete: &mut dyn FnMut(),
) -> Result<CopyStats> {
    let mut reader = src.open_read(&info.path)?;
    let mut writer = dst.create_write(&info.path)?;

    let mut buf = vec![0u8; COPY_BUF_BYTES];
    let mut done: u64 = 0;
    let mut read_time = Duration::ZERO;
    let mut write_time = Duration::ZERO;
    let mut last_progress = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }

        let started = Instant::now();
        let n = reader.read(&mut buf)?;
        read_time += started.elapsed();
        if n == 0 {
            break;
        }

        let started = Instant::now();
        writer.write_all(&buf[..n])?;
        write_time += started.elapsed();

        done += n as u64;
        if done >= info.size || last_progress.elapsed() >= PROGRESS_INTERVAL {
            progress(done, info.size, &info.path);
            last_progress = Instant::now();
        }
    }

    on_data_complete();

    let started = Instant::now();
    writer.flush()?;
    write_time += started.elapsed();
    drop(writer);

    dst.chtimes(&info.path, info.mtime, info.mtime)?;

    Ok(CopyStats {
        bytes: done,
        read_time,
        write_time,
    })
}

/// Byte-by-byte equality of one path on each endpoint.
pub fn compare_bytes(
    a: &dyn SyncFilesystem,
    a_rel: &str,
    b: &dyn SyncFilesystem,
    b_rel: &str,
) -> Result<bool> {
    let mut reader_a = a.open_read(a_rel)?;
    let mut reader_b = b.open_read(b_rel)?;

    let mut buf_a = vec![0u8; COMPARE_BUF_BYTES];
    let mut buf_b = vec![0u8; COMPARE_BUF_BYTES];

    loop {
        let n_a = read_full(&mut *reader_a, &mut buf_a)?;
        let n_b = read_full(&mut *reader_b, &mut buf_b)?;
        if n_a != n_b || buf_a[..n_a] != buf_b[..n_b] {
            return Ok(false);
        }
        if n_a == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the stream allows. Plain `read` may return short
/// counts, which would misalign the two sides of a comparison.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
