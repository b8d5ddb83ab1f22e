//! Profile kinds the capture loop knows how to take.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CaptureError;
use crate::runtime::{RuntimeProfiler, SnapshotKind};

/// CPU sampling window used when none (or zero) is configured.
pub const DEFAULT_CPU_DURATION: Duration = Duration::from_secs(15);

/// Block rate used by [`Profile::block`]: record every blocking event.
pub const DEFAULT_BLOCK_RATE: i64 = 1;

/// One kind of profile, with its capture parameters.
///
/// The name of each variant doubles as the file-name component of its
/// snapshots, so a capturer accepts at most one profile per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Sample CPU for `duration`. A zero duration means
    /// [`DEFAULT_CPU_DURATION`].
    Cpu { duration: Duration },
    Heap,
    Mutex,
    /// Set the runtime block rate to `rate`, then snapshot blocking events.
    /// The rate stays in effect after the capture.
    Block { rate: i64 },
    Goroutine,
    Threadcreate,
}

impl Profile {
    pub fn cpu() -> Self {
        Profile::Cpu {
            duration: DEFAULT_CPU_DURATION,
        }
    }

    pub fn heap() -> Self {
        Profile::Heap
    }

    pub fn mutex() -> Self {
        Profile::Mutex
    }

    pub fn block() -> Self {
        Profile::Block {
            rate: DEFAULT_BLOCK_RATE,
        }
    }

    pub fn goroutine() -> Self {
        Profile::Goroutine
    }

    pub fn threadcreate() -> Self {
        Profile::Threadcreate
    }

    /// Set the sampling window of a CPU profile. No effect on other kinds.
    pub fn with_duration(self, duration: Duration) -> Self {
        match self {
            Profile::Cpu { .. } => Profile::Cpu { duration },
            other => other,
        }
    }

    /// Set the rate of a block profile. No effect on other kinds.
    pub fn with_rate(self, rate: i64) -> Self {
        match self {
            Profile::Block { .. } => Profile::Block { rate },
            other => other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Profile::Cpu { .. } => "cpu",
            Profile::Heap => "heap",
            Profile::Mutex => "mutex",
            Profile::Block { .. } => "block",
            Profile::Goroutine => "goroutine",
            Profile::Threadcreate => "threadcreate",
        }
    }

    /// Sampling window actually used for a CPU profile.
    pub fn effective_duration(&self) -> Option<Duration> {
        match self {
            Profile::Cpu { duration } if duration.is_zero() => Some(DEFAULT_CPU_DURATION),
            Profile::Cpu { duration } => Some(*duration),
            _ => None,
        }
    }

    /// Write this profile's bytes to `sink`.
    ///
    /// A CPU profile blocks for its whole sampling window.
    pub fn capture(
        &self,
        sink: &mut dyn Write,
        runtime: &dyn RuntimeProfiler,
    ) -> Result<(), CaptureError> {
        match self {
            Profile::Cpu { .. } => {
                let duration = self.effective_duration().unwrap_or(DEFAULT_CPU_DURATION);
                runtime.cpu_profile(duration, sink)
            }
            Profile::Heap => runtime.snapshot(SnapshotKind::Heap, sink),
            Profile::Mutex => runtime.snapshot(SnapshotKind::Mutex, sink),
            Profile::Block { rate } => {
                runtime.set_block_profile_rate(*rate);
                runtime.snapshot(SnapshotKind::Block, sink)
            }
            Profile::Goroutine => runtime.snapshot(SnapshotKind::Goroutine, sink),
            Profile::Threadcreate => runtime.snapshot(SnapshotKind::Threadcreate, sink),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Cpu { duration } => write!(f, "cpu({})", humantime::format_duration(*duration)),
            Profile::Block { rate } => write!(f, "block(rate={})", rate),
            other => f.write_str(other.name()),
        }
    }
}

/// Parse a bare kind name into its default-parameter profile.
impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Profile::cpu()),
            "heap" => Ok(Profile::heap()),
            "mutex" => Ok(Profile::mutex()),
            "block" => Ok(Profile::block()),
            "goroutine" => Ok(Profile::goroutine()),
            "threadcreate" => Ok(Profile::threadcreate()),
            other => Err(format!("unknown profile kind: {}", other)),
        }
    }
}
