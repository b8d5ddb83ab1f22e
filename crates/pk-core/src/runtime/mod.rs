//! Runtime profiling capability.
//!
//! [`RuntimeProfiler`] is the seam between the capture loop and whatever
//! actually produces profile bytes. [`NativeRuntime`] is the process-wide
//! default: CPU sampling through `pprof`, everything else as
//! gzip-compressed pprof protobufs built from process introspection and
//! the contention recorder.

pub mod contention;
pub mod encode;
mod native;

use std::io::Write;
use std::time::Duration;

pub use contention::{block_sampled, ContentionRecorder, SiteStats};
pub use native::{live_threads, NativeRuntime, ThreadInfo, DEFAULT_CPU_FREQUENCY};

use crate::error::CaptureError;

/// Kinds that are captured instantaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    Heap,
    Mutex,
    Block,
    Goroutine,
    Threadcreate,
}

impl SnapshotKind {
    pub fn name(self) -> &'static str {
        match self {
            SnapshotKind::Heap => "heap",
            SnapshotKind::Mutex => "mutex",
            SnapshotKind::Block => "block",
            SnapshotKind::Goroutine => "goroutine",
            SnapshotKind::Threadcreate => "threadcreate",
        }
    }
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Produces profile bytes for the capture loop.
///
/// Implementations are shared by every capture thread of a cycle.
pub trait RuntimeProfiler: Send + Sync {
    /// Sample CPU for `duration`, then write the encoded profile to `sink`.
    ///
    /// Blocks for the whole duration. Fails with
    /// [`CaptureError::Profiler`] if a CPU profile is already running.
    fn cpu_profile(&self, duration: Duration, sink: &mut dyn Write) -> Result<(), CaptureError>;

    /// Write an instantaneous snapshot of `kind` to `sink`.
    fn snapshot(&self, kind: SnapshotKind, sink: &mut dyn Write) -> Result<(), CaptureError>;

    /// Set the process-wide block profiling rate. The change persists after
    /// the capture that made it.
    fn set_block_profile_rate(&self, rate: i64);

    fn block_profile_rate(&self) -> i64;
}
