//! Time-based retention for persisted snapshots.
//!
//! A sweep lists the storage directory (non-recursively) and removes every
//! regular file ending in `.pb.gz` whose modification time is older than
//! `now - ttl`. Sweeps are advisory:
//!
//! - Listing, metadata and delete errors are swallowed (logged at debug).
//! - At most one sweep runs at a time per storage. A request that arrives
//!   while one is in flight is dropped, not queued, so closing a sink never
//!   blocks on another thread's sweep. The next close re-triggers it.
//!
//! Nothing runs on a timer: sweeps only happen when a sink is closed or when
//! [`FileStorage::sweep_at`](crate::FileStorage::sweep_at) is called.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, trace};

use crate::layout::parse_snapshot_file_name;
use crate::SNAPSHOT_SUFFIX;

/// Instrumentation hook invoked around every sweep that actually runs.
///
/// Skipped requests do not reach the hook.
pub trait SweepHook: Send + Sync {
    fn sweep_started(&self) {}

    fn sweep_finished(&self, _report: &SweepReport) {}
}

/// Outcome of one sweep request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// True when another sweep was already running and this request was dropped.
    pub skipped: bool,
    /// Snapshot files examined.
    pub scanned: usize,
    /// Files removed.
    pub removed: Vec<PathBuf>,
    /// Bytes released by the removals.
    pub bytes_freed: u64,
}

impl SweepReport {
    fn skipped() -> Self {
        SweepReport {
            skipped: true,
            ..Default::default()
        }
    }
}

/// One snapshot file found in the storage directory.
#[derive(Debug, Clone, Serialize)]
pub struct StoredSnapshot {
    pub path: PathBuf,
    pub prefix: String,
    pub profile: String,
    /// Nominal cycle time from the file name (local time).
    pub timestamp: NaiveDateTime,
    pub size_bytes: u64,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
}

/// Retention status for a storage directory.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionStatus {
    pub dir: PathBuf,
    #[serde(with = "ttl_secs")]
    pub ttl: Duration,
    pub total_files: usize,
    pub total_bytes: u64,
    /// Files a sweep at the time of the query would remove.
    pub expired_files: usize,
    pub expired_bytes: u64,
}

mod ttl_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_secs())
    }
}

/// Shared retention state for one storage directory.
pub(crate) struct Retention {
    dir: PathBuf,
    ttl: Duration,
    cleaning: Mutex<bool>,
    hook: Option<Arc<dyn SweepHook>>,
}

/// Clears the in-progress flag when the sweep ends, including by panic.
struct CleaningGuard<'a>(&'a Mutex<bool>);

impl Drop for CleaningGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl Retention {
    pub(crate) fn new(dir: PathBuf, ttl: Duration, hook: Option<Arc<dyn SweepHook>>) -> Self {
        Retention {
            dir,
            ttl,
            cleaning: Mutex::new(false),
            hook,
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run a sweep against the current wall clock.
    pub(crate) fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now())
    }

    /// Run a sweep as if the current time were `now`.
    pub(crate) fn sweep_at(&self, now: SystemTime) -> SweepReport {
        {
            let mut cleaning = self.cleaning.lock().unwrap_or_else(PoisonError::into_inner);
            if *cleaning {
                trace!(dir = %self.dir.display(), "sweep already in progress, dropping request");
                return SweepReport::skipped();
            }
            *cleaning = true;
        }
        let _guard = CleaningGuard(&self.cleaning);

        if let Some(hook) = &self.hook {
            hook.sweep_started();
        }

        let report = self.remove_expired(now);

        if !report.removed.is_empty() {
            debug!(
                dir = %self.dir.display(),
                removed = report.removed.len(),
                bytes_freed = report.bytes_freed,
                "retention sweep removed expired snapshots"
            );
        }

        if let Some(hook) = &self.hook {
            hook.sweep_finished(&report);
        }
        report
    }

    fn remove_expired(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "retention sweep cannot list directory");
                return report;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(SNAPSHOT_SUFFIX) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            report.scanned += 1;

            let Ok(modified) = meta.modified() else { continue };
            if !is_expired(modified, now, self.ttl) {
                continue;
            }

            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), size_bytes = meta.len(), "removed expired snapshot");
                    report.bytes_freed += meta.len();
                    report.removed.push(path);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "failed to remove expired snapshot");
                }
            }
        }

        report
    }

    /// List snapshot files, newest first.
    pub(crate) fn list(&self) -> std::io::Result<Vec<StoredSnapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name();
            let Some(parsed) = name.to_str().and_then(parse_snapshot_file_name) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            snapshots.push(StoredSnapshot {
                path: entry.path(),
                prefix: parsed.prefix,
                profile: parsed.profile,
                timestamp: parsed.timestamp,
                size_bytes: meta.len(),
                modified: meta.modified().ok(),
            });
        }

        snapshots.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.profile.cmp(&b.profile))
        });
        Ok(snapshots)
    }

    /// Summarise what is stored and what a sweep at `now` would remove.
    pub(crate) fn status_at(&self, now: SystemTime) -> std::io::Result<RetentionStatus> {
        let mut status = RetentionStatus {
            dir: self.dir.clone(),
            ttl: self.ttl,
            total_files: 0,
            total_bytes: 0,
            expired_files: 0,
            expired_bytes: 0,
        };

        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name();
            if !name.to_str().is_some_and(|n| n.ends_with(SNAPSHOT_SUFFIX)) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            status.total_files += 1;
            status.total_bytes += meta.len();
            if meta
                .modified()
                .is_ok_and(|modified| is_expired(modified, now, self.ttl))
            {
                status.expired_files += 1;
                status.expired_bytes += meta.len();
            }
        }

        Ok(status)
    }
}

/// A file is expired once its age strictly exceeds the ttl.
/// Files stamped in the future are never expired.
fn is_expired(modified: SystemTime, now: SystemTime, ttl: Duration) -> bool {
    now.duration_since(modified).is_ok_and(|age| age > ttl)
}
