//! profkeep snapshot storage.
//!
//! This crate provides:
//! - The [`Storage`] / [`Sink`] seam the capture loop writes snapshots through
//! - [`FileStorage`], the file-backed reference implementation
//! - File-name layout helpers (`{prefix}-{YYYYMMDDThhmmss}.{profile}.pb.gz`)
//! - Time-based retention sweeps triggered by sink close
//! - Environment-derived defaults (`PPROF_DIR`, `PPROF_PREFIX`, `PPROF_TTL`)

pub mod error;
pub mod file;
pub mod layout;
pub mod retention;
pub mod settings;

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Local};

pub use error::StorageError;
pub use file::{FileSink, FileStorage};
pub use layout::{parse_snapshot_file_name, snapshot_file_name, SnapshotFileName};
pub use retention::{RetentionStatus, StoredSnapshot, SweepHook, SweepReport};
pub use settings::{
    StorageSettings, DEFAULT_DIR_NAME, DEFAULT_PREFIX, DEFAULT_TTL, ENV_PPROF_DIR,
    ENV_PPROF_PREFIX, ENV_PPROF_TTL,
};

/// Suffix shared by every persisted snapshot file.
pub const SNAPSHOT_SUFFIX: &str = ".pb.gz";

/// Compact timestamp format used in file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Maps a (profile name, cycle timestamp) pair to a writable sink.
///
/// Implementations must be shareable across the capture threads of one
/// cycle: every profile requests its own sink concurrently.
pub trait Storage: Send + Sync {
    /// Create a sink for the snapshot of `name` taken at `timestamp`.
    fn write_closer(
        &self,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<Box<dyn Sink>, StorageError>;
}

/// A writable, closable destination for one profile's snapshot bytes.
pub trait Sink: Write + Send {
    /// Location backing this sink, if it has one.
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Flush and release the sink.
    fn close(self: Box<Self>) -> Result<(), StorageError>;
}
