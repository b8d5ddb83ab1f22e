//! Fakes for the capture loop's collaborators.
//!
//! Lets embedders (and this crate's tests) drive the capture loop without a
//! real profiler, real process stats or a real disk:
//! - [`RecordingRuntime`]: records every capture request, can fail or panic
//!   on chosen kinds
//! - [`ScriptedStats`]: replays scripted CPU/memory readings
//! - [`MemoryStorage`]: keeps snapshot bytes in memory
//! - [`FailingStorage`]: refuses sinks for chosen profile names

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use pk_storage::{Sink, Storage, StorageError};

use crate::error::{CaptureError, WaitError};
use crate::runtime::{RuntimeProfiler, SnapshotKind};
use crate::stats::ProcessStats;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Runtime
// ============================================================================

/// A [`RuntimeProfiler`] that writes a short marker instead of a profile.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    cpu: Mutex<Vec<Duration>>,
    snapshots: Mutex<Vec<(SnapshotKind, i64)>>,
    block_rate: AtomicI64,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
    sleep_cpu: bool,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `cpu_profile` block for its full duration.
    pub fn sleeping_cpu(mut self) -> Self {
        self.sleep_cpu = true;
        self
    }

    /// Return an error when asked for `kind` (`"cpu"`, `"heap"`, ...).
    pub fn fail_on(mut self, kind: &'static str) -> Self {
        self.failing.insert(kind);
        self
    }

    /// Panic when asked for `kind`.
    pub fn panic_on(mut self, kind: &'static str) -> Self {
        self.panicking.insert(kind);
        self
    }

    pub fn cpu_durations(&self) -> Vec<Duration> {
        lock(&self.cpu).clone()
    }

    /// Snapshot requests with the block rate in effect at the time.
    pub fn snapshots(&self) -> Vec<(SnapshotKind, i64)> {
        lock(&self.snapshots).clone()
    }

    fn scripted(&self, kind: &'static str) -> Result<(), CaptureError> {
        if self.panicking.contains(kind) {
            panic!("scripted panic in {} capture", kind);
        }
        if self.failing.contains(kind) {
            return Err(CaptureError::Profiler(format!("scripted {} failure", kind)));
        }
        Ok(())
    }
}

impl RuntimeProfiler for RecordingRuntime {
    fn cpu_profile(&self, duration: Duration, sink: &mut dyn Write) -> Result<(), CaptureError> {
        lock(&self.cpu).push(duration);
        self.scripted("cpu")?;
        if self.sleep_cpu {
            thread::sleep(duration);
        }
        write!(sink, "cpu {}ms", duration.as_millis())?;
        Ok(())
    }

    fn snapshot(&self, kind: SnapshotKind, sink: &mut dyn Write) -> Result<(), CaptureError> {
        let rate = self.block_rate.load(Ordering::SeqCst);
        lock(&self.snapshots).push((kind, rate));
        self.scripted(kind.name())?;
        write!(sink, "{}", kind)?;
        Ok(())
    }

    fn set_block_profile_rate(&self, rate: i64) {
        self.block_rate.store(rate, Ordering::SeqCst);
    }

    fn block_profile_rate(&self) -> i64 {
        self.block_rate.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Process stats
// ============================================================================

/// Replays scripted readings; reads 0 once a script runs out.
#[derive(Debug, Default)]
pub struct ScriptedStats {
    cpu: VecDeque<Result<f64, WaitError>>,
    memory: VecDeque<Result<f64, WaitError>>,
    polls: Arc<AtomicUsize>,
}

impl ScriptedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cpu(mut self, readings: impl IntoIterator<Item = f64>) -> Self {
        self.cpu.extend(readings.into_iter().map(Ok));
        self
    }

    pub fn with_memory(mut self, readings: impl IntoIterator<Item = f64>) -> Self {
        self.memory.extend(readings.into_iter().map(Ok));
        self
    }

    pub fn with_cpu_error(mut self, err: WaitError) -> Self {
        self.cpu.push_back(Err(err));
        self
    }

    /// Number of readings taken so far (CPU and memory combined).
    pub fn poll_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.polls)
    }
}

impl ProcessStats for ScriptedStats {
    fn cpu_percent(&mut self) -> Result<f64, WaitError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.cpu.pop_front().unwrap_or(Ok(0.0))
    }

    fn memory_percent(&mut self) -> Result<f64, WaitError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.memory.pop_front().unwrap_or(Ok(0.0))
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Keeps each closed snapshot's bytes, keyed by profile name.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    closed: Arc<Mutex<HashMap<String, Vec<(DateTime<Local>, Vec<u8>)>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots closed so far for `name`, oldest first.
    pub fn snapshots(&self, name: &str) -> Vec<(DateTime<Local>, Vec<u8>)> {
        lock(&self.closed).get(name).cloned().unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.closed).keys().cloned().collect();
        names.sort();
        names
    }
}

impl Storage for MemoryStorage {
    fn write_closer(
        &self,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<Box<dyn Sink>, StorageError> {
        Ok(Box::new(MemorySink {
            name: name.to_string(),
            timestamp,
            buf: Vec::new(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MemorySink {
    name: String,
    timestamp: DateTime<Local>,
    buf: Vec<u8>,
    closed: Arc<Mutex<HashMap<String, Vec<(DateTime<Local>, Vec<u8>)>>>>,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for MemorySink {
    fn close(self: Box<Self>) -> Result<(), StorageError> {
        let MemorySink {
            name,
            timestamp,
            buf,
            closed,
        } = *self;
        lock(&closed).entry(name).or_default().push((timestamp, buf));
        Ok(())
    }
}

/// Refuses sinks for the listed names and delegates everything else.
pub struct FailingStorage {
    failing: HashSet<String>,
    inner: Arc<dyn Storage>,
}

impl FailingStorage {
    pub fn new(inner: Arc<dyn Storage>, failing: impl IntoIterator<Item = &'static str>) -> Self {
        FailingStorage {
            failing: failing.into_iter().map(str::to_string).collect(),
            inner,
        }
    }
}

impl Storage for FailingStorage {
    fn write_closer(
        &self,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<Box<dyn Sink>, StorageError> {
        if self.failing.contains(name) {
            return Err(StorageError::CreateFile {
                path: Path::new("/unwritable").join(name),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "scripted failure"),
            });
        }
        self.inner.write_closer(name, timestamp)
    }
}
