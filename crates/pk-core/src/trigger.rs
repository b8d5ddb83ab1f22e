//! Triggers decide when the next capture cycle starts.
//!
//! A trigger's [`wait`](Trigger::wait) blocks the capture loop until the
//! next cycle should run. Interval triggers return immediately on their
//! first call so the first cycle captures right away.

use std::fmt;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::error::WaitError;
use crate::stats::{ProcessStats, SysinfoStats};

/// Default bounds of the random interval trigger.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(120);

/// When to run the next capture cycle.
#[derive(Debug)]
pub enum Trigger {
    FixedInterval(FixedInterval),
    RandomInterval(RandomInterval),
    ResourceThreshold(ResourceThreshold),
}

impl Trigger {
    pub fn fixed(interval: Duration) -> Self {
        Trigger::FixedInterval(FixedInterval::new(interval))
    }

    pub fn random(min: Duration, max: Duration) -> Self {
        Trigger::RandomInterval(RandomInterval::new(min, max))
    }

    /// Threshold trigger polling the current process through `sysinfo`.
    pub fn resource(
        poll_interval: Duration,
        cpu_percent: Option<f64>,
        memory_percent: Option<f64>,
    ) -> Self {
        Trigger::ResourceThreshold(ResourceThreshold::new(
            poll_interval,
            cpu_percent,
            memory_percent,
            Box::new(SysinfoStats::current()),
        ))
    }

    /// Block until the next cycle should start.
    pub fn wait(&mut self) -> Result<(), WaitError> {
        match self {
            Trigger::FixedInterval(t) => {
                t.wait();
                Ok(())
            }
            Trigger::RandomInterval(t) => {
                t.wait();
                Ok(())
            }
            Trigger::ResourceThreshold(t) => t.wait(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::FixedInterval(_) => "fixed",
            Trigger::RandomInterval(_) => "random",
            Trigger::ResourceThreshold(_) => "resource",
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::random(DEFAULT_MIN_INTERVAL, DEFAULT_MAX_INTERVAL)
    }
}

impl From<FixedInterval> for Trigger {
    fn from(t: FixedInterval) -> Self {
        Trigger::FixedInterval(t)
    }
}

impl From<RandomInterval> for Trigger {
    fn from(t: RandomInterval) -> Self {
        Trigger::RandomInterval(t)
    }
}

impl From<ResourceThreshold> for Trigger {
    fn from(t: ResourceThreshold) -> Self {
        Trigger::ResourceThreshold(t)
    }
}

/// Fires immediately, then every `interval`.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
    started: bool,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        FixedInterval {
            interval,
            started: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn wait(&mut self) {
        if !self.started {
            self.started = true;
            return;
        }
        thread::sleep(self.interval);
    }
}

/// Fires immediately, then after a uniformly random delay in `[min, max)`.
///
/// When `max <= min` every delay is exactly `min`.
#[derive(Debug, Clone)]
pub struct RandomInterval {
    min: Duration,
    max: Duration,
    rng: StdRng,
    started: bool,
}

impl RandomInterval {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self::with_rng(min, max, StdRng::from_os_rng())
    }

    /// Deterministic delays for a given seed.
    pub fn with_seed(min: Duration, max: Duration, seed: u64) -> Self {
        Self::with_rng(min, max, StdRng::seed_from_u64(seed))
    }

    fn with_rng(min: Duration, max: Duration, rng: StdRng) -> Self {
        RandomInterval {
            min,
            max,
            rng,
            started: false,
        }
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    /// Draw the delay before the next cycle.
    pub fn next_delay(&mut self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let span = u64::try_from((self.max - self.min).as_nanos()).unwrap_or(u64::MAX);
        self.min + Duration::from_nanos(self.rng.random_range(0..span))
    }

    fn wait(&mut self) {
        if !self.started {
            self.started = true;
            return;
        }
        let delay = self.next_delay();
        trace!(delay_ms = delay.as_millis() as u64, "random interval sleeping");
        thread::sleep(delay);
    }
}

/// Fires once the process exceeds a CPU or memory threshold.
///
/// Checks before sleeping, so a process already over a threshold fires
/// immediately. A threshold of zero (or `None`) is ignored; with both
/// ignored the trigger never fires.
pub struct ResourceThreshold {
    poll_interval: Duration,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    stats: Box<dyn ProcessStats>,
}

impl fmt::Debug for ResourceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceThreshold")
            .field("poll_interval", &self.poll_interval)
            .field("cpu_percent", &self.cpu_percent)
            .field("memory_percent", &self.memory_percent)
            .finish_non_exhaustive()
    }
}

impl ResourceThreshold {
    pub fn new(
        poll_interval: Duration,
        cpu_percent: Option<f64>,
        memory_percent: Option<f64>,
        stats: Box<dyn ProcessStats>,
    ) -> Self {
        ResourceThreshold {
            poll_interval,
            cpu_percent: cpu_percent.filter(|t| *t > 0.0),
            memory_percent: memory_percent.filter(|t| *t > 0.0),
            stats,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn thresholds(&self) -> (Option<f64>, Option<f64>) {
        (self.cpu_percent, self.memory_percent)
    }

    fn wait(&mut self) -> Result<(), WaitError> {
        if self.cpu_percent.is_none() && self.memory_percent.is_none() {
            loop {
                thread::park();
            }
        }

        loop {
            if self.exceeded()? {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn exceeded(&mut self) -> Result<bool, WaitError> {
        if let Some(threshold) = self.cpu_percent {
            let cpu = self.stats.cpu_percent()?;
            if cpu > threshold {
                trace!(cpu, threshold, "cpu threshold exceeded");
                return Ok(true);
            }
        }
        if let Some(threshold) = self.memory_percent {
            let memory = self.stats.memory_percent()?;
            if memory > threshold {
                trace!(memory, threshold, "memory threshold exceeded");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
