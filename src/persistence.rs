//! # Sample Log
//!
//! Append-only CSV record of every accepted sample, in arrival order.
//!
//! The log is owned by a single consumer task, so rows never interleave.
//! Each append is flushed to the OS before returning; [`SampleLog::sync`]
//! additionally forces the data to disk and is called on shutdown.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::Writer;
use tracing::{debug, info};

use crate::error::{Result, SnifferError};
use crate::sample::{log_header, TelemetrySample};

/// Destination for accepted samples, owned by the pipeline's single consumer.
///
/// `append` must either record the sample or fail; a failure halts ingestion.
#[cfg_attr(test, mockall::automock)]
pub trait SampleSink: Send {
    /// Record one sample after every sample appended before it
    fn append(&mut self, sample: &TelemetrySample) -> Result<()>;

    /// Force everything appended so far to durable storage
    fn sync(&mut self) -> Result<()>;

    /// Number of samples recorded
    fn rows(&self) -> u64;
}

/// Durable, append-only sample log
pub struct SampleLog {
    writer: Writer<File>,
    path: PathBuf,
    rows: u64,
}

impl std::fmt::Debug for SampleLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLog")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl SampleLog {
    /// Create (or truncate) the log and write the header row.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`SnifferError::Persistence`] if the file cannot be created or
    /// the header cannot be written
    pub fn init<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                SnifferError::Persistence(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                SnifferError::Persistence(format!("Failed to open {}: {}", path.display(), e))
            })?;

        let mut writer = Writer::from_writer(file);
        writer
            .write_record(log_header())
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|e| {
                let reason = format!("Failed to write header to {}: {}", path.display(), e);
                SnifferError::Persistence(reason)
            })?;

        info!("Sample log initialized at {}", path.display());
        Ok(Self { writer, path, rows: 0 })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for SampleLog {
    /// Append one sample as a row.
    ///
    /// # Errors
    ///
    /// Returns [`SnifferError::Persistence`] if the row cannot be written; the
    /// caller must stop ingesting rather than continue with a gap in the log
    fn append(&mut self, sample: &TelemetrySample) -> Result<()> {
        self.writer
            .write_record(sample.to_record())
            .and_then(|_| self.writer.flush().map_err(csv::Error::from))
            .map_err(|e| {
                SnifferError::Persistence(format!(
                    "Failed to append sample {} to {}: {}",
                    sample.sequence,
                    self.path.display(),
                    e
                ))
            })?;

        self.rows += 1;
        Ok(())
    }

    /// Flush and fsync the log
    fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .and_then(|_| self.writer.get_ref().sync_all())
            .map_err(|e| {
                SnifferError::Persistence(format!("Failed to sync {}: {}", self.path.display(), e))
            })?;

        debug!("Sample log synced ({} rows)", self.rows);
        Ok(())
    }

    /// Number of data rows written by this handle
    fn rows(&self) -> u64 {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::decoder::decode_sample;
    use crate::sample::fixtures::telemetry_args;
    use tempfile::tempdir;

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_init_writes_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");

        let log = SampleLog::init(&path).unwrap();
        assert_eq!(log.rows(), 0);

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], log_header());
    }

    #[test]
    fn test_init_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "stale,data\n1,2\n3,4\n").unwrap();

        SampleLog::init(&path).unwrap();
        assert_eq!(read_rows(&path).len(), 1);
    }

    #[test]
    fn test_init_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/log.csv");

        let log = SampleLog::init(&path).unwrap();
        assert_eq!(log.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn test_append_preserves_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = SampleLog::init(&path).unwrap();

        for seq in 0..5 {
            let sample = decode_sample("/imu", &telemetry_args([1.0, 0.0, 0.0, 0.0], seq)).unwrap();
            log.append(&sample).unwrap();
        }
        log.sync().unwrap();
        assert_eq!(log.rows(), 5);

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 6);
        let sequences: Vec<&str> = rows[1..].iter().map(|r| r.last().unwrap().as_str()).collect();
        assert_eq!(sequences, vec!["0", "1", "2", "3", "4"]);
        assert!(rows[1..].iter().all(|r| r.len() == log_header().len()));
    }

    #[test]
    fn test_rows_visible_before_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = SampleLog::init(&path).unwrap();

        let sample = decode_sample("/imu", &telemetry_args([1.0, 0.0, 0.0, 0.0], 9)).unwrap();
        log.append(&sample).unwrap();

        // append flushes, so a reader sees the row without sync()
        assert_eq!(read_rows(&path).len(), 2);
    }

    #[test]
    fn test_init_fails_on_directory_path() {
        let dir = tempdir().unwrap();
        let result = SampleLog::init(dir.path());
        assert!(matches!(result, Err(SnifferError::Persistence(_))));
    }
}
