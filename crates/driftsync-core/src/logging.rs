//! Optional per-run JSON-lines log.
//!
//! Mirrors the event stream to a file so a run can be inspected after the
//! observer UI is gone. One record per line, timestamped.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use eyre::{Result, WrapErr};
use log::warn;
use serde::Serialize;

use crate::events::SyncEvent;

#[derive(Serialize)]
struct LogRecord<'a> {
    ts: String,
    event: &'a SyncEvent,
}

pub(crate) struct RunLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .wrap_err_with(|| format!("create log dir {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("open run log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    /// Append one event. Log I/O failures are reported to the log facade and
    /// otherwise swallowed; a broken log file must not fail the run.
    pub fn record(&mut self, event: &SyncEvent) {
        let record = LogRecord {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!("run log serialization failed: {err}");
                return;
            }
        };
        if let Err(err) = writeln!(self.writer, "{line}") {
            warn!("run log write to {} failed: {err}", self.path.display());
        }
    }

    pub fn flush(&mut self) {
        if let Err(err) = self.writer.flush() {
            warn!("run log flush to {} failed: {err}", self.path.display());
        }
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        self.flush();
    }
}
