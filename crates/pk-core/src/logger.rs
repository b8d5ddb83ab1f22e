//! Printf-style diagnostics sink used by the capture loop.
//!
//! The capture loop reports non-fatal failures (a sink that could not be
//! acquired, a capture that errored, a trigger that failed) as formatted
//! lines through a [`Logger`]. The default discards them; embedders that
//! want them in their own logs use [`TracingLogger`] or implement the trait.

use std::fmt;
use std::sync::Mutex;

/// Target used by [`TracingLogger`].
pub const CAPTURE_LOG_TARGET: &str = "pk_core::capture";

/// Receives formatted diagnostic lines.
pub trait Logger: Send + Sync {
    fn printf(&self, args: fmt::Arguments<'_>);
}

/// Printf-style call into a [`Logger`].
///
/// ```ignore
/// logf!(logger, "new writer for {} {}: {}", name, ts, err);
/// ```
#[macro_export]
macro_rules! logf {
    ($logger:expr, $($arg:tt)+) => {
        $crate::logger::Logger::printf(&*$logger, format_args!($($arg)+))
    };
}

/// Drops every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardLogger;

impl Logger for DiscardLogger {
    fn printf(&self, _args: fmt::Arguments<'_>) {}
}

/// Forwards lines to `tracing` at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn printf(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "pk_core::capture", "{}", args);
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .any(|line| line.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn printf(&self, args: fmt::Arguments<'_>) {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(args.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_logger_collects_formatted_lines() {
        let logger = MemoryLogger::new();
        logf!(&logger, "capture {} at {}: {}", "heap", 3, "boom");
        assert_eq!(logger.lines(), vec!["capture heap at 3: boom".to_string()]);
        assert!(logger.contains("boom"));
    }

    #[test]
    fn test_logf_through_trait_object() {
        let memory = Arc::new(MemoryLogger::new());
        let logger: Arc<dyn Logger> = memory.clone();
        logf!(logger, "wait: {}", "no stats");
        assert!(memory.contains("wait: no stats"));

        let discard: Arc<dyn Logger> = Arc::new(DiscardLogger);
        logf!(discard, "ignored {}", 1);
    }
}
