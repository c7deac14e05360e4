//! Local filesystem endpoint.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use eyre::{Result, WrapErr};
use filetime::FileTime;
use walkdir::WalkDir;

use super::hash::{self, HashKind};
use super::{FileInfo, SyncFilesystem};

const STREAM_BUF_BYTES: usize = 256 * 1024;

/// Endpoint rooted at a local directory. Does not follow symlinks.
pub struct LocalFs {
    root: PathBuf,
    hash_kind: HashKind,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hash_kind: HashKind::default(),
        }
    }

    pub fn with_hash_kind(mut self, kind: HashKind) -> Self {
        self.hash_kind = kind;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, rel: &str) -> PathBuf {
        let mut abs = self.root.clone();
        for part in rel.split('/').filter(|p| !p.is_empty() && *p != ".") {
            abs.push(part);
        }
        abs
    }
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

fn file_info(root: &Path, path: &Path, meta: &fs::Metadata) -> FileInfo {
    FileInfo {
        path: relative_slash_path(root, path),
        size: if meta.is_dir() { 0 } else { meta.len() },
        mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        is_dir: meta.is_dir(),
    }
}

impl SyncFilesystem for LocalFs {
    fn scan(&self, visit: &mut dyn FnMut(FileInfo) -> Result<()>) -> Result<()> {
        let walker = WalkDir::new(&self.root).follow_links(false).into_iter();
        for next in walker {
            let entry = match next {
                Ok(entry) => entry,
                // The root itself must be readable; anything deeper that
                // vanished mid-walk is skipped.
                Err(err) if err.depth() == 0 => {
                    if let Some(io_err) = err.io_error() {
                        let kind = io_err.kind();
                        return Err(std::io::Error::new(kind, err))
                            .wrap_err_with(|| format!("scan {}", self.root.display()));
                    }
                    return Err(err.into());
                }
                Err(_) => continue,
            };
            if entry.depth() == 0 {
                continue;
            }
            let file_type = entry.file_type();
            if !file_type.is_file() && !file_type.is_dir() {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            visit(file_info(&self.root, entry.path(), &meta))?;
        }
        Ok(())
    }

    fn count(&self, progress: &mut dyn FnMut(&str, u64)) -> Result<u64> {
        let mut count = 0u64;
        for next in WalkDir::new(&self.root).follow_links(false) {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    if let Some(io_err) = err.io_error() {
                        let kind = io_err.kind();
                        return Err(std::io::Error::new(kind, err))
                            .wrap_err_with(|| format!("count {}", self.root.display()));
                    }
                    return Err(err.into());
                }
                Err(_) => continue,
            };
            if entry.depth() == 0 || !entry.file_type().is_file() {
                continue;
            }
            count += 1;
            progress(&relative_slash_path(&self.root, entry.path()), count);
        }
        Ok(count)
    }

    fn stat(&self, rel: &str) -> Result<FileInfo> {
        let abs = self.absolute(rel);
        let meta = fs::metadata(&abs).wrap_err_with(|| format!("stat {}", abs.display()))?;
        Ok(FileInfo {
            path: rel.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: meta.is_dir(),
        })
    }

    fn open_read(&self, rel: &str) -> Result<Box<dyn Read + Send>> {
        let abs = self.absolute(rel);
        let file = File::open(&abs).wrap_err_with(|| format!("open {}", abs.display()))?;
        Ok(Box::new(BufReader::with_capacity(STREAM_BUF_BYTES, file)))
    }

    fn create_write(&self, rel: &str) -> Result<Box<dyn Write + Send>> {
        let abs = self.absolute(rel);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("create parent {}", parent.display()))?;
        }
        let file = File::create(&abs).wrap_err_with(|| format!("create {}", abs.display()))?;
        Ok(Box::new(BufWriter::with_capacity(STREAM_BUF_BYTES, file)))
    }

    fn remove(&self, rel: &str) -> Result<()> {
        let abs = self.absolute(rel);
        let meta = fs::symlink_metadata(&abs)
            .wrap_err_with(|| format!("stat for remove {}", abs.display()))?;
        if meta.is_dir() {
            fs::remove_dir(&abs).wrap_err_with(|| format!("remove dir {}", abs.display()))
        } else {
            fs::remove_file(&abs).wrap_err_with(|| format!("remove file {}", abs.display()))
        }
    }

    fn compute_hash(&self, rel: &str) -> Result<String> {
        let mut reader = self.open_read(rel)?;
        hash::hash_reader(&mut *reader, self.hash_kind)
            .wrap_err_with(|| format!("hash {rel}"))
    }

    fn chtimes(&self, rel: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let abs = self.absolute(rel);
        filetime::set_file_times(
            &abs,
            FileTime::from_system_time(atime),
            FileTime::from_system_time(mtime),
        )
        .wrap_err_with(|| format!("set times {}", abs.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::is_not_found;
    use std::collections::BTreeMap;

    fn fixture() -> (tempfile::TempDir, LocalFs) {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("sub/inner")).unwrap();
        fs::write(root.join("top.txt"), b"top").unwrap();
        fs::write(root.join("sub/mid.txt"), b"middle").unwrap();
        fs::write(root.join("sub/inner/deep.bin"), [0u8; 1024]).unwrap();
        let fs_handle = LocalFs::new(&root);
        (temp, fs_handle)
    }

    #[test]
    fn scan_yields_slash_relative_paths() -> Result<()> {
        let (_temp, local) = fixture();
        let mut seen = BTreeMap::new();
        local.scan(&mut |info| {
            seen.insert(info.path.clone(), info);
            Ok(())
        })?;

        assert_eq!(seen.len(), 5);
        assert!(seen["sub"].is_dir);
        assert!(seen["sub/inner"].is_dir);
        assert_eq!(seen["sub/mid.txt"].size, 6);
        assert_eq!(seen["sub/inner/deep.bin"].size, 1024);
        Ok(())
    }

    #[test]
    fn scan_of_missing_root_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let local = LocalFs::new(temp.path().join("nope"));
        let err = local.scan(&mut |_| Ok(())).unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn count_reports_files_only() -> Result<()> {
        let (_temp, local) = fixture();
        let mut last = (String::new(), 0);
        let total = local.count(&mut |path, n| last = (path.to_string(), n))?;
        assert_eq!(total, 3);
        assert_eq!(last.1, 3);
        Ok(())
    }

    #[test]
    fn stat_and_remove_round_trip() -> Result<()> {
        let (_temp, local) = fixture();
        assert_eq!(local.stat("top.txt")?.size, 3);
        local.remove("top.txt")?;
        assert!(local.stat("top.txt").is_err());

        local.remove("sub/inner/deep.bin")?;
        local.remove("sub/inner")?;
        assert!(local.stat("sub/inner").is_err());
        Ok(())
    }

    #[test]
    fn remove_refuses_non_empty_directory() {
        let (_temp, local) = fixture();
        assert!(local.remove("sub").is_err());
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() -> Result<()> {
        let (temp, local) = fixture();
        let a = local.compute_hash("sub/mid.txt")?;
        let b = local.compute_hash("sub/mid.txt")?;
        assert_eq!(a, b);

        fs::write(temp.path().join("tree/sub/mid.txt"), b"changed")?;
        assert_ne!(local.compute_hash("sub/mid.txt")?, a);
        Ok(())
    }

    #[test]
    fn chtimes_is_visible_through_stat() -> Result<()> {
        let (_temp, local) = fixture();
        let stamp = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        local.chtimes("top.txt", stamp, stamp)?;
        assert_eq!(local.stat("top.txt")?.mtime, stamp);
        Ok(())
    }

    #[test]
    fn resizable_capability_is_absent() {
        let (_temp, local) = fixture();
        assert!(local.as_resizable().is_none());
    }
}
