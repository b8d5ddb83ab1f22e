//! The continuous capture loop.
//!
//! One cycle is: wait on the trigger, stamp the cycle with the current local
//! time, then capture every configured profile concurrently (one thread per
//! profile) and join them all before the next wait. Per-profile failures are
//! logged and reported but never stop the loop.
//!
//! A CPU profile holds its thread for the whole sampling window, so the
//! cycle (and therefore the next wait) lasts at least that long.

mod options;
mod report;

pub use options::CaptureOptions;
pub use report::{CaptureState, CaptureStatus, CycleReport, ProfileOutcome};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use pk_storage::Storage;
use tracing::{debug, trace};

use crate::error::{ConfigError, WaitError};
use crate::logf;
use crate::logger::Logger;
use crate::profile::Profile;
use crate::runtime::RuntimeProfiler;
use crate::trigger::Trigger;

/// First delay after a failed trigger wait.
pub const WAIT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
/// Upper bound on the delay between failed trigger waits.
pub const WAIT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Name of the background thread running [`Capturer::run`].
pub const CAPTURE_THREAD_NAME: &str = "pk-capturer";

const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %:z";

// ---------------------------------------------------------------------------
// Capturer
// ---------------------------------------------------------------------------

/// Owns a validated configuration and runs capture cycles.
pub struct Capturer {
    profiles: Vec<Profile>,
    trigger: Trigger,
    storage: Arc<dyn Storage>,
    logger: Arc<dyn Logger>,
    runtime: Arc<dyn RuntimeProfiler>,
    status: Arc<CaptureStatus>,
}

impl std::fmt::Debug for Capturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capturer")
            .field("profiles", &self.profiles)
            .field("trigger", &self.trigger)
            .field("state", &self.status.state())
            .finish_non_exhaustive()
    }
}

impl Capturer {
    /// Validate `options` and build a capturer. Nothing runs yet.
    pub fn new(options: CaptureOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let CaptureOptions {
            profiles,
            trigger,
            storage,
            logger,
            runtime,
        } = options;

        Ok(Capturer {
            profiles,
            trigger: trigger.ok_or(ConfigError::MissingTrigger)?,
            storage: storage.ok_or(ConfigError::MissingStorage)?,
            logger: logger.ok_or(ConfigError::MissingLogger)?,
            runtime: runtime.ok_or(ConfigError::MissingRuntime)?,
            status: Arc::new(CaptureStatus::new()),
        })
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// Shared status handle, valid for the capturer's whole life.
    pub fn status(&self) -> Arc<CaptureStatus> {
        Arc::clone(&self.status)
    }

    /// Wait on the trigger once, then capture every profile.
    ///
    /// A failed wait is logged and returned without capturing anything.
    pub fn run_cycle(&mut self) -> Result<CycleReport, WaitError> {
        self.status.set_state(CaptureState::Idle);
        if let Err(e) = self.trigger.wait() {
            self.status.wait_failed();
            logf!(self.logger, "wait: {}", e);
            return Err(e);
        }

        self.status.set_state(CaptureState::Capturing);
        let report = self.capture_all(Local::now());
        self.status.cycle_finished();
        self.status.set_state(CaptureState::Idle);

        debug!(
            captured = report.captured(),
            profiles = report.outcomes.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "capture cycle finished"
        );
        Ok(report)
    }

    /// Capture every profile now, stamped with `timestamp`, without
    /// consulting the trigger.
    pub fn capture_all(&self, timestamp: DateTime<Local>) -> CycleReport {
        let started = Instant::now();
        let fan_out = FanOut {
            storage: &*self.storage,
            runtime: &*self.runtime,
            logger: &*self.logger,
            timestamp,
        };

        let outcomes = thread::scope(|scope| {
            let pending: Vec<_> = self
                .profiles
                .iter()
                .map(|profile| {
                    let spawned = thread::Builder::new()
                        .name(format!("pk-capture-{}", profile.name()))
                        .spawn_scoped(scope, move || fan_out.capture(profile));
                    match spawned {
                        Ok(handle) => Pending::Running(profile, handle),
                        Err(e) => {
                            trace!(profile = profile.name(), error = %e, "spawn failed, capturing inline");
                            Pending::Inline(profile)
                        }
                    }
                })
                .collect();

            pending
                .into_iter()
                .map(|pending| match pending {
                    Pending::Running(profile, handle) => {
                        let outcome = handle
                            .join()
                            .unwrap_or_else(|payload| fan_out.panicked(profile, payload.as_ref()));
                        (profile.name(), outcome)
                    }
                    Pending::Inline(profile) => (profile.name(), fan_out.capture_inline(profile)),
                })
                .collect()
        });

        CycleReport {
            timestamp,
            outcomes,
            elapsed: started.elapsed(),
        }
    }

    /// Run cycles forever. Never returns.
    ///
    /// Consecutive trigger failures back off exponentially from
    /// [`WAIT_BACKOFF_INITIAL`] up to [`WAIT_BACKOFF_MAX`]; one successful
    /// wait resets the delay.
    pub fn run(mut self) {
        debug!(
            profiles = ?self.profiles.iter().map(Profile::name).collect::<Vec<_>>(),
            trigger = self.trigger.kind(),
            "capture loop started"
        );
        let mut failures: u32 = 0;
        loop {
            match self.run_cycle() {
                Ok(_) => failures = 0,
                Err(_) => {
                    failures = failures.saturating_add(1);
                    thread::sleep(wait_backoff(failures));
                }
            }
        }
    }

    /// Move the capturer onto a named background thread running [`run`](Self::run).
    pub fn spawn(self) -> std::io::Result<CapturerHandle> {
        let status = self.status();
        let profiles = self.profiles.iter().map(Profile::name).collect();
        let thread = thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.to_string())
            .spawn(move || self.run())?;
        Ok(CapturerHandle {
            status,
            profiles,
            thread,
        })
    }
}

/// Delay before retrying after `consecutive_failures` failed waits.
pub fn wait_backoff(consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(consecutive_failures - 1);
    WAIT_BACKOFF_INITIAL
        .saturating_mul(factor)
        .min(WAIT_BACKOFF_MAX)
}

/// A capture loop running on its background thread.
#[derive(Debug)]
pub struct CapturerHandle {
    status: Arc<CaptureStatus>,
    profiles: Vec<&'static str>,
    thread: thread::JoinHandle<()>,
}

impl CapturerHandle {
    pub fn status(&self) -> Arc<CaptureStatus> {
        Arc::clone(&self.status)
    }

    pub fn profiles(&self) -> &[&'static str] {
        &self.profiles
    }

    /// Name of the loop thread, [`CAPTURE_THREAD_NAME`].
    pub fn thread_name(&self) -> Option<&str> {
        self.thread.thread().name()
    }

    /// Whether the loop thread has exited (only possible by panic).
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Per-profile capture
// ---------------------------------------------------------------------------

/// Borrowed collaborators handed to each capture thread.
#[derive(Clone, Copy)]
struct FanOut<'a> {
    storage: &'a dyn Storage,
    runtime: &'a dyn RuntimeProfiler,
    logger: &'a dyn Logger,
    timestamp: DateTime<Local>,
}

enum Pending<'scope, 'p> {
    Running(&'p Profile, thread::ScopedJoinHandle<'scope, ProfileOutcome>),
    Inline(&'p Profile),
}

impl FanOut<'_> {
    fn capture(&self, profile: &Profile) -> ProfileOutcome {
        let name = profile.name();
        let at = self.timestamp.format(LOG_TIME_FORMAT);

        let mut sink = match self.storage.write_closer(name, self.timestamp) {
            Ok(sink) => sink,
            Err(e) => {
                logf!(self.logger, "new writer for {} {}: {}", name, at, e);
                return ProfileOutcome::SinkFailed(e.to_string());
            }
        };
        let path = sink.path().map(Path::to_path_buf);

        // The sink is released on every path: closed here, or dropped while
        // unwinding if the capture panics.
        let captured = profile.capture(&mut sink, self.runtime);
        let closed = sink.close();

        match (captured, closed) {
            (Err(e), _) => {
                logf!(self.logger, "capture {} at {}: {}", name, at, e);
                ProfileOutcome::CaptureFailed(e.to_string())
            }
            (Ok(()), Err(e)) => {
                logf!(self.logger, "close {} at {}: {}", name, at, e);
                ProfileOutcome::CaptureFailed(format!("close: {}", e))
            }
            (Ok(()), Ok(())) => {
                trace!(profile = name, "snapshot captured");
                ProfileOutcome::Captured { path }
            }
        }
    }

    /// Capture on the calling thread, containing a panic the way a joined
    /// capture thread would.
    fn capture_inline(&self, profile: &Profile) -> ProfileOutcome {
        panic::catch_unwind(AssertUnwindSafe(|| self.capture(profile)))
            .unwrap_or_else(|payload| self.panicked(profile, payload.as_ref()))
    }

    fn panicked(&self, profile: &Profile, payload: &(dyn Any + Send)) -> ProfileOutcome {
        let message = panic_message(payload);
        logf!(
            self.logger,
            "capture {} at {}: panicked: {}",
            profile.name(),
            self.timestamp.format(LOG_TIME_FORMAT),
            message
        );
        ProfileOutcome::Panicked(message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use crate::testing::{FailingStorage, MemoryStorage, RecordingRuntime, ScriptedStats};
    use crate::trigger::ResourceThreshold;

    fn options(runtime: Arc<RecordingRuntime>, storage: Arc<dyn Storage>) -> CaptureOptions {
        CaptureOptions::default()
            .with_profiles([Profile::cpu().with_duration(Duration::from_millis(20)), Profile::heap()])
            .with_trigger(Trigger::fixed(Duration::from_millis(10)))
            .with_shared_storage(storage)
            .with_runtime(runtime)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(wait_backoff(0), Duration::ZERO);
        assert_eq!(wait_backoff(1), Duration::from_millis(10));
        assert_eq!(wait_backoff(2), Duration::from_millis(20));
        assert_eq!(wait_backoff(5), Duration::from_millis(160));
        assert_eq!(wait_backoff(10), WAIT_BACKOFF_MAX);
        assert_eq!(wait_backoff(u32::MAX), WAIT_BACKOFF_MAX);
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let err = Capturer::new(CaptureOptions::default().with_profiles([Profile::heap(), Profile::heap()]))
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateProfile("heap".into()));
    }

    #[test]
    fn test_cycle_shares_one_timestamp() {
        let runtime = Arc::new(RecordingRuntime::new());
        let storage = MemoryStorage::new();
        let mut capturer = Capturer::new(options(runtime.clone(), Arc::new(storage.clone()))).unwrap();

        let report = capturer.run_cycle().unwrap();
        assert!(report.all_captured());
        assert_eq!(storage.names(), vec!["cpu", "heap"]);
        assert_eq!(storage.snapshots("cpu")[0].0, report.timestamp);
        assert_eq!(storage.snapshots("heap")[0].0, report.timestamp);
        assert_eq!(storage.snapshots("cpu")[0].1, b"cpu 20ms".to_vec());
        assert_eq!(capturer.status().cycles(), 1);
        assert_eq!(capturer.status().state(), CaptureState::Idle);
    }

    #[test]
    fn test_sink_failure_is_isolated() {
        let runtime = Arc::new(RecordingRuntime::new());
        let memory = MemoryStorage::new();
        let storage = FailingStorage::new(Arc::new(memory.clone()), ["cpu"]);
        let logger = Arc::new(MemoryLogger::new());
        let mut capturer = Capturer::new(
            options(runtime.clone(), Arc::new(storage)).with_logger(logger.clone()),
        )
        .unwrap();

        let report = capturer.run_cycle().unwrap();
        assert!(matches!(report.outcome("cpu"), Some(ProfileOutcome::SinkFailed(_))));
        assert!(report.outcome("heap").unwrap().is_captured());
        assert_eq!(memory.names(), vec!["heap"]);
        assert!(runtime.cpu_durations().is_empty(), "no capture without a sink");
        assert!(logger.contains("new writer for cpu"));
    }

    #[test]
    fn test_capture_error_is_logged() {
        let runtime = Arc::new(RecordingRuntime::new().fail_on("heap"));
        let storage = MemoryStorage::new();
        let logger = Arc::new(MemoryLogger::new());
        let mut capturer = Capturer::new(
            options(runtime, Arc::new(storage.clone())).with_logger(logger.clone()),
        )
        .unwrap();

        let report = capturer.run_cycle().unwrap();
        assert!(matches!(report.outcome("heap"), Some(ProfileOutcome::CaptureFailed(_))));
        assert!(report.outcome("cpu").unwrap().is_captured());
        assert!(logger.contains("capture heap at"));
        // The sink was still closed.
        assert_eq!(storage.snapshots("heap").len(), 1);
    }

    #[test]
    fn test_panicking_capture_is_contained() {
        let runtime = Arc::new(RecordingRuntime::new().panic_on("heap"));
        let storage = MemoryStorage::new();
        let logger = Arc::new(MemoryLogger::new());
        let mut capturer = Capturer::new(
            options(runtime, Arc::new(storage.clone())).with_logger(logger.clone()),
        )
        .unwrap();

        let first = capturer.run_cycle().unwrap();
        match first.outcome("heap") {
            Some(ProfileOutcome::Panicked(message)) => assert!(message.contains("scripted panic")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(first.outcome("cpu").unwrap().is_captured());
        assert!(logger.contains("panicked"));

        let second = capturer.run_cycle().unwrap();
        assert!(second.outcome("cpu").unwrap().is_captured());
        assert_eq!(capturer.status().cycles(), 2);
    }

    #[test]
    fn test_inline_capture_contains_panic() {
        let runtime = RecordingRuntime::new().panic_on("heap");
        let storage = MemoryStorage::new();
        let logger = MemoryLogger::new();
        let fan_out = FanOut {
            storage: &storage,
            runtime: &runtime,
            logger: &logger,
            timestamp: Local::now(),
        };

        match fan_out.capture_inline(&Profile::heap()) {
            ProfileOutcome::Panicked(message) => assert!(message.contains("scripted panic")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(logger.contains("capture heap at"));
        assert!(fan_out.capture_inline(&Profile::mutex()).is_captured());
    }

    #[test]
    fn test_spawned_loop_runs_on_named_thread() {
        let never_firing = Trigger::resource(Duration::from_secs(1), None, None);
        let capturer = Capturer::new(
            options(Arc::new(RecordingRuntime::new()), Arc::new(MemoryStorage::new()))
                .with_trigger(never_firing),
        )
        .unwrap();

        let handle = capturer.spawn().unwrap();
        assert_eq!(handle.thread_name(), Some(CAPTURE_THREAD_NAME));
        assert_eq!(handle.profiles(), ["cpu", "heap"]);
        assert!(!handle.is_finished());
        assert_eq!(handle.status().cycles(), 0);
    }

    #[test]
    fn test_wait_error_is_logged_and_counted() {
        let stats = ScriptedStats::new().with_cpu_error(WaitError::Stats("no /proc".into()));
        let trigger = ResourceThreshold::new(Duration::from_millis(1), Some(10.0), None, Box::new(stats));
        let runtime = Arc::new(RecordingRuntime::new());
        let logger = Arc::new(MemoryLogger::new());
        let mut capturer = Capturer::new(
            options(runtime.clone(), Arc::new(MemoryStorage::new()))
                .with_trigger(trigger)
                .with_logger(logger.clone()),
        )
        .unwrap();

        assert_eq!(capturer.run_cycle().unwrap_err(), WaitError::Stats("no /proc".into()));
        assert_eq!(capturer.status().wait_failures(), 1);
        assert_eq!(capturer.status().cycles(), 0);
        assert!(logger.contains("wait: process stats unavailable: no /proc"));
        assert!(runtime.cpu_durations().is_empty());
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }
}
