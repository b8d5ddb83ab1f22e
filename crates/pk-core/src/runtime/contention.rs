//! Contention bookkeeping behind the `mutex` and `block` snapshots.
//!
//! Rust has no runtime hook that sees every blocked lock or channel wait, so
//! code that wants contention to show up in snapshots reports it through
//! [`NativeRuntime::record_block`](super::NativeRuntime::record_block) and
//! [`NativeRuntime::record_mutex`](super::NativeRuntime::record_mutex).
//! Events are aggregated per call-site label.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Aggregate for one call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteStats {
    pub count: u64,
    pub delay: Duration,
}

/// Per-site contention totals.
#[derive(Debug, Default)]
pub struct ContentionRecorder {
    sites: Mutex<BTreeMap<String, SiteStats>>,
}

impl ContentionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, site: &str, waited: Duration) {
        let mut sites = self.sites.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = sites.entry(site.to_string()).or_default();
        stats.count += 1;
        stats.delay += waited;
    }

    /// Current totals, ordered by site.
    pub fn snapshot(&self) -> Vec<(String, SiteStats)> {
        self.sites
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(site, stats)| (site.clone(), *stats))
            .collect()
    }

    pub fn reset(&self) {
        self.sites
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Whether a blocking event of `waited_ns` is recorded at `rate`.
///
/// `draw` is a uniform sample in `[0, 1)`.
/// - `rate <= 0`: never
/// - `rate == 1`: always
/// - otherwise: always when `waited_ns >= rate`, else with probability
///   `waited_ns / rate`
pub fn block_sampled(rate: i64, waited_ns: u64, draw: f64) -> bool {
    if rate <= 0 {
        return false;
    }
    if rate == 1 {
        return true;
    }
    let rate = rate as u64;
    if waited_ns >= rate {
        return true;
    }
    draw < waited_ns as f64 / rate as f64
}
