//! Per-file sync decision under the five comparison modes.

use log::warn;
use serde::Serialize;

use crate::fs::{self, hash::digest_prefix, FileInfo, SyncFilesystem};

/// How source and destination files are compared, from cheapest to most
/// thorough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeType {
    /// Trust equal file counts as evidence of equal trees.
    MonotonicCount,
    /// Full scan, but presence alone decides: existing destination files are
    /// never rewritten.
    FluctuatingCount,
    /// Size plus modification time.
    Content,
    /// Content hash of both sides.
    DeviousContent,
    /// Byte-by-byte comparison.
    Paranoid,
}

impl Default for ChangeType {
    fn default() -> Self {
        Self::Content
    }
}

/// Decide whether `src` must be written to the destination. `dst` is the
/// matching destination entry, when one exists. Probe failures are reported
/// as "needs sync" with a diagnostic, never as a hard error.
pub(crate) fn needs_sync(
    mode: ChangeType,
    source: &dyn SyncFilesystem,
    dest: &dyn SyncFilesystem,
    src: &FileInfo,
    dst: Option<&FileInfo>,
) -> bool {
    let Some(dst) = dst else {
        return true;
    };

    match mode {
        ChangeType::MonotonicCount | ChangeType::FluctuatingCount => false,
        ChangeType::Content => src.size != dst.size || src.mtime != dst.mtime,
        ChangeType::DeviousContent => {
            let src_hash = match source.compute_hash(&src.path) {
                Ok(digest) => digest,
                Err(err) => {
                    warn!("hash probe failed for source {}: {err}", src.path);
                    return true;
                }
            };
            let dst_hash = match dest.compute_hash(&dst.path) {
                Ok(digest) => digest,
                Err(err) => {
                    warn!("hash probe failed for dest {}: {err}", dst.path);
                    return true;
                }
            };
            if src_hash != dst_hash {
                warn!(
                    "content drift on {}: {} != {}",
                    src.path,
                    digest_prefix(&src_hash),
                    digest_prefix(&dst_hash)
                );
                true
            } else {
                false
            }
        }
        ChangeType::Paranoid => match fs::compare_bytes(source, &src.path, dest, &dst.path) {
            Ok(identical) => !identical,
            Err(err) => {
                warn!("byte comparison failed for {}: {err}", src.path);
                true
            }
        },
    }
}
