use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::debug;

use super::contention::{block_sampled, ContentionRecorder};
use super::encode::ProfileBuilder;
use super::{RuntimeProfiler, SnapshotKind};
use crate::error::CaptureError;
use crate::stats::current_process_memory;

/// CPU sampling frequency in Hz.
pub const DEFAULT_CPU_FREQUENCY: i32 = 100;

static GLOBAL: OnceLock<Arc<NativeRuntime>> = OnceLock::new();

/// Default [`RuntimeProfiler`] for the running process.
///
/// - `cpu`: `pprof` signal-based sampler
/// - `heap`: resident and virtual size of the process
/// - `goroutine`: live OS threads grouped by name
/// - `threadcreate`: one sample per live OS thread
/// - `mutex` / `block`: events reported through [`record_mutex`](Self::record_mutex)
///   and [`record_block`](Self::record_block)
#[derive(Debug)]
pub struct NativeRuntime {
    block_rate: AtomicI64,
    block: ContentionRecorder,
    mutex: ContentionRecorder,
}

impl Default for NativeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRuntime {
    /// A fresh runtime with block profiling disabled.
    pub fn new() -> Self {
        NativeRuntime {
            block_rate: AtomicI64::new(0),
            block: ContentionRecorder::new(),
            mutex: ContentionRecorder::new(),
        }
    }

    /// The process-wide instance.
    pub fn global() -> Arc<NativeRuntime> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(NativeRuntime::new())))
    }

    /// Report a blocking wait at `site`, sampled by the current block rate.
    pub fn record_block(&self, site: &str, waited: Duration) {
        let rate = self.block_rate.load(Ordering::Relaxed);
        let waited_ns = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        if block_sampled(rate, waited_ns, rand::random::<f64>()) {
            self.block.record(site, waited);
        }
    }

    /// Report a contended lock acquisition at `site`. Always recorded.
    pub fn record_mutex(&self, site: &str, waited: Duration) {
        self.mutex.record(site, waited);
    }

    pub fn block_recorder(&self) -> &ContentionRecorder {
        &self.block
    }

    pub fn mutex_recorder(&self) -> &ContentionRecorder {
        &self.mutex
    }

    fn write_heap(&self, sink: &mut dyn Write) -> Result<(), CaptureError> {
        let memory = current_process_memory().map_err(|e| CaptureError::Profiler(e.to_string()))?;
        let mut builder = ProfileBuilder::new(&[("resident_space", "bytes"), ("virtual_space", "bytes")]);
        let pid = std::process::id().to_string();
        builder.sample(
            vec![to_i64(memory.resident), to_i64(memory.virtual_size)],
            &[("pid", pid.as_str())],
        );
        builder.comment(&format!("total_physical_bytes={}", memory.total_physical));
        builder.write_gzip(sink)
    }

    fn write_contention(
        &self,
        recorder: &ContentionRecorder,
        period: i64,
        sink: &mut dyn Write,
    ) -> Result<(), CaptureError> {
        let mut builder = ProfileBuilder::new(&[("contentions", "count"), ("delay", "nanoseconds")])
            .period("contentions", "count", period);
        for (site, stats) in recorder.snapshot() {
            builder.sample(
                vec![to_i64(stats.count), to_i64(stats.delay.as_nanos())],
                &[("site", site.as_str())],
            );
        }
        builder.write_gzip(sink)
    }

    fn write_goroutine(&self, sink: &mut dyn Write) -> Result<(), CaptureError> {
        let threads = live_threads().ok_or(CaptureError::Unsupported("goroutine"))?;
        let mut by_name: BTreeMap<String, i64> = BTreeMap::new();
        for thread in threads {
            *by_name.entry(thread.name).or_default() += 1;
        }

        let mut builder = ProfileBuilder::new(&[("goroutine", "count")]);
        for (name, count) in &by_name {
            builder.sample(vec![*count], &[("thread_name", name.as_str())]);
        }
        builder.write_gzip(sink)
    }

    fn write_threadcreate(&self, sink: &mut dyn Write) -> Result<(), CaptureError> {
        let threads = live_threads().ok_or(CaptureError::Unsupported("threadcreate"))?;
        let mut builder = ProfileBuilder::new(&[("threadcreate", "count")]);
        for thread in &threads {
            let tid = thread.tid.to_string();
            builder.sample(vec![1], &[("tid", tid.as_str()), ("thread_name", thread.name.as_str())]);
        }
        builder.write_gzip(sink)
    }
}

impl RuntimeProfiler for NativeRuntime {
    #[cfg(unix)]
    fn cpu_profile(&self, duration: Duration, sink: &mut dyn Write) -> Result<(), CaptureError> {
        use pprof::protos::Message as _;

        let builder = pprof::ProfilerGuardBuilder::default().frequency(DEFAULT_CPU_FREQUENCY);
        #[cfg(all(
            target_os = "linux",
            any(target_arch = "x86_64", target_arch = "aarch64"),
            not(target_env = "musl")
        ))]
        let builder = builder.blocklist(&["libc", "libgcc", "pthread", "vdso"]);

        let guard = builder
            .build()
            .map_err(|e| CaptureError::Profiler(e.to_string()))?;
        debug!(duration_ms = duration.as_millis() as u64, "cpu profile started");
        std::thread::sleep(duration);

        let report = guard
            .report()
            .build()
            .map_err(|e| CaptureError::Profiler(e.to_string()))?;
        drop(guard);

        let profile = report
            .pprof()
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        super::encode::write_gzipped(sink, &profile.encode_to_vec())
    }

    #[cfg(not(unix))]
    fn cpu_profile(&self, _duration: Duration, _sink: &mut dyn Write) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported("cpu"))
    }

    fn snapshot(&self, kind: SnapshotKind, sink: &mut dyn Write) -> Result<(), CaptureError> {
        match kind {
            SnapshotKind::Heap => self.write_heap(sink),
            SnapshotKind::Mutex => self.write_contention(&self.mutex, 1, sink),
            SnapshotKind::Block => {
                let rate = self.block_rate.load(Ordering::Relaxed);
                self.write_contention(&self.block, rate, sink)
            }
            SnapshotKind::Goroutine => self.write_goroutine(sink),
            SnapshotKind::Threadcreate => self.write_threadcreate(sink),
        }
    }

    fn set_block_profile_rate(&self, rate: i64) {
        self.block_rate.store(rate, Ordering::Relaxed);
    }

    fn block_profile_rate(&self) -> i64 {
        self.block_rate.load(Ordering::Relaxed)
    }
}

fn to_i64<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

/// One OS thread of the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: u32,
    pub name: String,
}

/// Live threads of the current process, or `None` where the platform
/// offers no listing.
#[cfg(target_os = "linux")]
pub fn live_threads() -> Option<Vec<ThreadInfo>> {
    let entries = std::fs::read_dir("/proc/self/task").ok()?;
    let mut threads: Vec<ThreadInfo> = entries
        .flatten()
        .filter_map(|entry| {
            let tid = entry.file_name().to_str()?.parse::<u32>().ok()?;
            // A thread may exit between listing and reading its name.
            let name = std::fs::read_to_string(entry.path().join("comm"))
                .map(|s| s.trim_end().to_string())
                .unwrap_or_default();
            Some(ThreadInfo { tid, name })
        })
        .collect();
    threads.sort_by_key(|t| t.tid);
    Some(threads)
}

#[cfg(not(target_os = "linux"))]
pub fn live_threads() -> Option<Vec<ThreadInfo>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::encode::decode_gzipped;

    #[test]
    fn test_block_rate_gates_recording() {
        let runtime = NativeRuntime::new();
        runtime.record_block("chan.recv", Duration::from_millis(3));
        assert!(runtime.block_recorder().snapshot().is_empty(), "disabled by default");

        runtime.set_block_profile_rate(1);
        assert_eq!(runtime.block_profile_rate(), 1);
        runtime.record_block("chan.recv", Duration::from_nanos(1));
        runtime.record_block("chan.recv", Duration::from_millis(3));
        let snapshot = runtime.block_recorder().snapshot();
        assert_eq!(snapshot[0].1.count, 2);

        // Waits at or above the rate are always kept.
        runtime.set_block_profile_rate(1_000);
        runtime.record_block("sleep", Duration::from_micros(2));
        assert_eq!(runtime.block_recorder().snapshot().len(), 2);

        runtime.set_block_profile_rate(0);
        runtime.record_block("late", Duration::from_secs(1));
        assert_eq!(runtime.block_recorder().snapshot().len(), 2);
    }

    #[test]
    fn test_mutex_snapshot_contains_recorded_sites() {
        let runtime = NativeRuntime::new();
        runtime.record_mutex("registry.lock", Duration::from_micros(40));

        let mut out = Vec::new();
        runtime.snapshot(SnapshotKind::Mutex, &mut out).unwrap();
        let profile = decode_gzipped(&out).unwrap();
        assert_eq!(profile.sample.len(), 1);
        assert_eq!(profile.sample[0].value, vec![1, 40_000]);
        assert_eq!(profile.label(&profile.sample[0], "site"), Some("registry.lock"));
    }

    #[test]
    fn test_heap_snapshot_reports_resident_size() {
        let runtime = NativeRuntime::new();
        let mut out = Vec::new();
        runtime.snapshot(SnapshotKind::Heap, &mut out).unwrap();
        let profile = decode_gzipped(&out).unwrap();
        assert_eq!(profile.sample.len(), 1);
        assert!(profile.sample[0].value[0] > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_goroutine_snapshot_groups_threads_by_name() {
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        let worker = std::thread::Builder::new()
            .name("pk-test-idle".into())
            .spawn(move || {
                // The OS-visible name is set inside the new thread.
                ready_tx.send(()).unwrap();
                let _ = stop_rx.recv();
            })
            .unwrap();
        ready_rx.recv().unwrap();

        let runtime = NativeRuntime::new();
        let mut out = Vec::new();
        runtime.snapshot(SnapshotKind::Goroutine, &mut out).unwrap();
        drop(stop_tx);
        worker.join().unwrap();

        let profile = decode_gzipped(&out).unwrap();
        let idle = profile
            .sample
            .iter()
            .find(|s| profile.label(s, "thread_name") == Some("pk-test-idle"))
            .expect("named thread listed");
        assert_eq!(idle.value, vec![1]);
    }

    #[test]
    fn test_global_is_shared() {
        let a = NativeRuntime::global();
        let b = NativeRuntime::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
