//! File-backed snapshot storage.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use tracing::trace;

use crate::error::StorageError;
use crate::layout::snapshot_file_name;
use crate::retention::{Retention, RetentionStatus, StoredSnapshot, SweepHook, SweepReport};
use crate::settings::StorageSettings;
use crate::{Sink, Storage};

/// Stores each snapshot as one file under a directory and sweeps expired
/// files whenever a sink is closed.
///
/// Cloning is cheap; clones share the same retention guard.
#[derive(Clone)]
pub struct FileStorage {
    prefix: String,
    retention: Arc<Retention>,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("prefix", &self.prefix)
            .field("dir", &self.retention.dir())
            .field("ttl", &self.retention.ttl())
            .finish()
    }
}

impl FileStorage {
    pub fn new(prefix: impl Into<String>, dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        FileStorage {
            prefix: prefix.into(),
            retention: Arc::new(Retention::new(dir.into(), ttl, None)),
        }
    }

    /// Build from `PPROF_DIR` / `PPROF_PREFIX` / `PPROF_TTL` and defaults.
    pub fn from_env() -> Self {
        Self::from_settings(StorageSettings::from_env())
    }

    pub fn from_settings(settings: StorageSettings) -> Self {
        Self::new(settings.prefix, settings.dir, settings.ttl)
    }

    /// Attach an instrumentation hook observing every sweep that runs.
    pub fn with_sweep_hook(self, hook: Arc<dyn SweepHook>) -> Self {
        let dir = self.retention.dir().to_path_buf();
        let ttl = self.retention.ttl();
        FileStorage {
            prefix: self.prefix,
            retention: Arc::new(Retention::new(dir, ttl, Some(hook))),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn dir(&self) -> &Path {
        self.retention.dir()
    }

    pub fn ttl(&self) -> Duration {
        self.retention.ttl()
    }

    /// Full path of the snapshot for `name` at `timestamp`.
    pub fn snapshot_path(&self, name: &str, timestamp: DateTime<Local>) -> PathBuf {
        self.dir()
            .join(snapshot_file_name(&self.prefix, timestamp, name))
    }

    /// Run a retention sweep now, subject to the single-sweep guard.
    pub fn sweep(&self) -> SweepReport {
        self.retention.sweep()
    }

    /// Run a retention sweep as if the wall clock read `now`.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        self.retention.sweep_at(now)
    }

    /// Snapshot files in the directory (any prefix), newest first.
    pub fn list(&self) -> io::Result<Vec<StoredSnapshot>> {
        self.retention.list()
    }

    pub fn status(&self) -> io::Result<RetentionStatus> {
        self.retention.status_at(SystemTime::now())
    }
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Storage for FileStorage {
    fn write_closer(
        &self,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<Box<dyn Sink>, StorageError> {
        let path = self.snapshot_path(name, timestamp);
        fs::create_dir_all(self.dir()).map_err(|source| StorageError::CreateDir {
            path: self.dir().to_path_buf(),
            source,
        })?;

        Ok(Box::new(FileSink {
            path,
            file: None,
            retention: Arc::clone(&self.retention),
            closed: false,
        }))
    }
}

/// A sink bound to one snapshot file.
///
/// The file is created on first write, so a capture that fails before
/// producing any bytes leaves nothing behind. Closing (or dropping an
/// unclosed sink) requests one retention sweep on the owning storage.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    retention: Arc<Retention>,
    closed: bool,
}

impl FileSink {
    fn file_mut(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let file = File::create(&self.path).map_err(|e| {
                io::Error::new(e.kind(), format!("create {:?}: {}", self.path, e))
            })?;
            trace!(path = %self.path.display(), "created snapshot file");
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("snapshot file unavailable"))
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = match self.file.take() {
            Some(file) => file.sync_all().map_err(|e| {
                io::Error::new(e.kind(), format!("close {:?}: {}", self.path, e))
            }),
            None => Ok(()),
        };
        self.retention.sweep();
        result
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other("write to closed sink"));
        }
        self.file_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Sink for FileSink {
    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn close(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finish().map_err(StorageError::from)
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 17, 13, 45, 9)
            .single()
            .unwrap()
    }

    #[test]
    fn test_write_closer_creates_directory_and_lazy_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let storage = FileStorage::new("t", &nested, Duration::from_secs(3600));

        let mut sink = storage.write_closer("heap", ts()).unwrap();
        assert!(nested.is_dir(), "directory created on acquisition");
        let path = sink.path().unwrap().to_path_buf();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "t-20240517T134509.heap.pb.gz"
        );
        assert!(!path.exists(), "file is created lazily");

        sink.write_all(b"snapshot").unwrap();
        assert!(path.exists());
        sink.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"snapshot");
    }

    #[test]
    fn test_close_reports_durable_contents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new("t", dir.path(), Duration::from_secs(3600));
        let mut sink = storage.write_closer("mutex", ts()).unwrap();
        let path = sink.path().unwrap().to_path_buf();
        sink.write_all(&[7u8; 4096]).unwrap();
        sink.close().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_closed_sink_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new("t", dir.path(), Duration::from_secs(3600));
        let mut sink = FileSink {
            path: storage.snapshot_path("heap", ts()),
            file: None,
            retention: Arc::clone(&storage.retention),
            closed: false,
        };
        sink.write_all(b"x").unwrap();
        sink.finish().unwrap();
        assert!(sink.write_all(b"y").is_err());
        assert_eq!(fs::read(storage.snapshot_path("heap", ts())).unwrap(), b"x");
    }

    #[test]
    fn test_unwritten_sink_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new("t", dir.path(), Duration::from_secs(3600));
        let sink = storage.write_closer("cpu", ts()).unwrap();
        let path = sink.path().unwrap().to_path_buf();
        sink.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_directory_creation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        fs::write(&blocker, b"not a directory").unwrap();

        let storage = FileStorage::new("t", blocker.join("sub"), Duration::from_secs(60));
        let err = storage.write_closer("heap", ts()).err().unwrap();
        assert!(matches!(err, StorageError::CreateDir { .. }));
        assert_eq!(err.path(), Some(&blocker.join("sub")));
    }

    #[test]
    fn test_debug_omits_internals() {
        let storage = FileStorage::new("svc", "/tmp/x", Duration::from_secs(5));
        let rendered = format!("{:?}", storage);
        assert!(rendered.contains("svc"));
        assert!(rendered.contains("/tmp/x"));
    }
}
