//! Observable state of a capture loop and per-cycle outcomes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Where a capture loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// No cycle has been attempted yet.
    NeverStarted,
    /// Waiting on the trigger.
    Idle,
    /// Profiles of a cycle are being captured.
    Capturing,
}

impl CaptureState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CaptureState::Idle,
            2 => CaptureState::Capturing,
            _ => CaptureState::NeverStarted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CaptureState::NeverStarted => 0,
            CaptureState::Idle => 1,
            CaptureState::Capturing => 2,
        }
    }
}

/// Lock-free status shared between a capturer and its observers.
#[derive(Debug, Default)]
pub struct CaptureStatus {
    state: AtomicU8,
    cycles: AtomicU64,
    wait_failures: AtomicU64,
}

impl CaptureStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Completed cycles (every profile joined).
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Trigger waits that returned an error.
    pub fn wait_failures(&self) -> u64 {
        self.wait_failures.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: CaptureState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn cycle_finished(&self) {
        self.cycles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn wait_failed(&self) {
        self.wait_failures.fetch_add(1, Ordering::AcqRel);
    }
}

/// What happened to one profile in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ProfileOutcome {
    /// Bytes written and sink closed. `path` is set when the storage
    /// reports one.
    Captured { path: Option<PathBuf> },
    /// No sink could be acquired; capture was skipped.
    SinkFailed(String),
    /// The capture or the sink close failed.
    CaptureFailed(String),
    /// The capture thread panicked.
    Panicked(String),
}

impl ProfileOutcome {
    pub fn is_captured(&self) -> bool {
        matches!(self, ProfileOutcome::Captured { .. })
    }
}

/// Result of one capture cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Nominal time shared by every snapshot of the cycle.
    pub timestamp: DateTime<Local>,
    /// One entry per configured profile, in configuration order.
    pub outcomes: Vec<(&'static str, ProfileOutcome)>,
    /// Wall time from the trigger firing until every profile joined.
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn outcome(&self, name: &str) -> Option<&ProfileOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, outcome)| outcome)
    }

    pub fn captured(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_captured()).count()
    }

    pub fn all_captured(&self) -> bool {
        self.captured() == self.outcomes.len()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let status = CaptureStatus::new();
        assert_eq!(status.state(), CaptureState::NeverStarted);
        status.set_state(CaptureState::Idle);
        assert_eq!(status.state(), CaptureState::Idle);
        status.set_state(CaptureState::Capturing);
        status.cycle_finished();
        assert_eq!(status.state(), CaptureState::Capturing);
        assert_eq!(status.cycles(), 1);
        assert_eq!(status.wait_failures(), 0);
    }

    #[test]
    fn test_report_lookup() {
        let report = CycleReport {
            timestamp: Local::now(),
            outcomes: vec![
                ("cpu", ProfileOutcome::Captured { path: None }),
                ("heap", ProfileOutcome::SinkFailed("denied".into())),
            ],
            elapsed: Duration::from_millis(3),
        };
        assert_eq!(report.captured(), 1);
        assert!(!report.all_captured());
        assert!(matches!(report.outcome("heap"), Some(ProfileOutcome::SinkFailed(_))));
        assert!(report.outcome("mutex").is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed"], 3);
        assert_eq!(json["outcomes"][1][1]["outcome"], "sink_failed");
    }
}
