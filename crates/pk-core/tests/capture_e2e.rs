//! End-to-end capture into a real directory with the native runtime.
//!
//! Kept in its own test binary: the CPU sampler is process-wide and only
//! one CPU profile may run at a time.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pk_core::{CaptureOptions, CaptureRegistry, CaptureState, MemoryLogger, NativeRuntime, Profile, Trigger};
use pk_storage::{parse_snapshot_file_name, FileStorage};
use tempfile::tempdir;

#[test]
fn test_fixed_interval_writes_cpu_and_heap_snapshots() {
    let dir = tempdir().expect("tempdir");
    let logger = Arc::new(MemoryLogger::new());
    let registry = CaptureRegistry::new();

    registry
        .enable(
            CaptureOptions::default()
                .with_profiles([
                    Profile::cpu().with_duration(Duration::from_secs(1)),
                    Profile::heap(),
                ])
                .with_trigger(Trigger::fixed(Duration::from_secs(2)))
                .with_storage(FileStorage::new("t", dir.path(), Duration::from_secs(3600)))
                .with_logger(logger.clone())
                .with_runtime(Arc::new(NativeRuntime::new())),
        )
        .expect("enable");

    thread::sleep(Duration::from_secs(3));

    let status = registry.status().expect("enabled");
    assert!(status.cycles() >= 1, "first cycle finished");
    assert_ne!(status.state(), CaptureState::NeverStarted);

    let mut cpu = Vec::new();
    let mut heap = Vec::new();
    for entry in fs::read_dir(dir.path()).expect("read dir") {
        let entry = entry.expect("entry");
        let name = entry.file_name().into_string().expect("utf-8 name");
        let parsed = parse_snapshot_file_name(&name).expect("snapshot name");
        assert_eq!(parsed.prefix, "t");
        assert!(entry.metadata().expect("metadata").len() > 0, "{} is empty", name);
        match parsed.profile.as_str() {
            "cpu" => cpu.push(parsed.timestamp),
            "heap" => heap.push(parsed.timestamp),
            other => panic!("unexpected profile file {}", other),
        }
    }

    assert!(!heap.is_empty(), "heap snapshot written");
    if cfg!(unix) {
        assert!(!cpu.is_empty(), "cpu snapshot written; log: {:?}", logger.lines());
        // One timestamp per cycle, shared by both profiles.
        cpu.sort();
        heap.sort();
        assert_eq!(cpu[0], heap[0]);
    }
}
