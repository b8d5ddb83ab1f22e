//! profkeep core: in-process continuous profiling.
//!
//! This crate provides:
//! - Triggers deciding when to capture (fixed, random, resource threshold)
//! - Profile kinds and the runtime capability that produces their bytes
//! - The capture loop: wait, fan out one capture per profile, join, repeat
//! - A registry guaranteeing one running loop per process
//! - Agent config files, logging setup and the `pk-core` CLI plumbing
//!
//! Snapshots are persisted through `pk_storage`.
//!
//! ```no_run
//! use std::time::Duration;
//! use pk_core::{enable_capture, CaptureOptions, Profile, Trigger};
//!
//! enable_capture(
//!     CaptureOptions::default()
//!         .with_profiles([Profile::cpu().with_duration(Duration::from_secs(5)), Profile::heap()])
//!         .with_trigger(Trigger::fixed(Duration::from_secs(60))),
//! )
//! .expect("capture enabled once");
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod logger;
pub mod logging;
pub mod profile;
pub mod registry;
pub mod runtime;
pub mod stats;
pub mod trigger;

// Fakes for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use capture::{
    CaptureOptions, CaptureState, CaptureStatus, Capturer, CapturerHandle, CycleReport,
    ProfileOutcome,
};
pub use error::{CaptureError, ConfigError, EnableError, WaitError};
pub use logger::{DiscardLogger, Logger, MemoryLogger, TracingLogger};
pub use profile::Profile;
pub use registry::{enable_capture, global_registry, CaptureRegistry};
pub use runtime::{NativeRuntime, RuntimeProfiler, SnapshotKind};
pub use stats::{ProcessStats, SysinfoStats};
pub use trigger::Trigger;

pub use pk_storage::{FileStorage, Sink, Storage, StorageError};
