//! At most one running capture loop per registry.
//!
//! [`enable_capture`] uses the process-wide registry. Tests and embedders
//! that need isolation construct their own [`CaptureRegistry`].

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::info;

use crate::capture::{CaptureOptions, CaptureStatus, Capturer, CapturerHandle};
use crate::error::EnableError;

/// Owns the single running capture loop, if any.
///
/// There is no disable: once enabled, the loop runs for the life of the
/// process.
#[derive(Debug, Default)]
pub struct CaptureRegistry {
    active: Mutex<Option<CapturerHandle>>,
}

impl CaptureRegistry {
    pub const fn new() -> Self {
        CaptureRegistry {
            active: Mutex::new(None),
        }
    }

    /// Validate `options` and start the capture loop on its own thread.
    ///
    /// Fails with [`EnableError::AlreadyEnabled`] if this registry already
    /// runs a loop (whatever `options` contains), or with
    /// [`EnableError::InvalidConfiguration`] without starting anything.
    pub fn enable(&self, options: CaptureOptions) -> Result<(), EnableError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Err(EnableError::AlreadyEnabled);
        }

        let capturer = Capturer::new(options)?;
        let handle = capturer.spawn().map_err(EnableError::Spawn)?;
        info!(profiles = ?handle.profiles(), "continuous capture enabled");
        *active = Some(handle);
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Status of the running loop, if enabled.
    pub fn status(&self) -> Option<Arc<CaptureStatus>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(CapturerHandle::status)
    }

    /// Profile names of the running loop, if enabled.
    pub fn profiles(&self) -> Option<Vec<&'static str>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| h.profiles().to_vec())
    }
}

static GLOBAL_REGISTRY: OnceLock<CaptureRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn global_registry() -> &'static CaptureRegistry {
    GLOBAL_REGISTRY.get_or_init(CaptureRegistry::new)
}

/// Enable continuous capture for this process.
///
/// ```no_run
/// use pk_core::{enable_capture, CaptureOptions};
///
/// enable_capture(CaptureOptions::default()).expect("capture enabled once");
/// ```
pub fn enable_capture(options: CaptureOptions) -> Result<(), EnableError> {
    global_registry().enable(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::profile::Profile;
    use crate::testing::{MemoryStorage, RecordingRuntime};
    use crate::trigger::Trigger;
    use std::time::Duration;

    fn never_firing() -> Trigger {
        Trigger::resource(Duration::from_secs(1), None, None)
    }

    #[test]
    fn test_invalid_configuration_starts_nothing() {
        let registry = CaptureRegistry::new();
        let err = registry
            .enable(CaptureOptions::default().with_profiles(Vec::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            EnableError::InvalidConfiguration(ConfigError::EmptyProfiles)
        ));
        assert!(!registry.is_enabled());
        assert!(registry.status().is_none());
    }

    #[test]
    fn test_second_enable_is_rejected() {
        let registry = CaptureRegistry::new();
        let options = || {
            CaptureOptions::default()
                .with_profiles([Profile::heap()])
                .with_trigger(never_firing())
                .with_storage(MemoryStorage::new())
                .with_runtime(Arc::new(RecordingRuntime::new()))
        };

        registry.enable(options()).unwrap();
        let first = registry.status().unwrap();

        assert!(matches!(
            registry.enable(options()),
            Err(EnableError::AlreadyEnabled)
        ));
        // Even an invalid configuration reports AlreadyEnabled.
        assert!(matches!(
            registry.enable(CaptureOptions::default().with_profiles(Vec::new())),
            Err(EnableError::AlreadyEnabled)
        ));

        assert!(Arc::ptr_eq(&first, &registry.status().unwrap()));
        assert_eq!(registry.profiles(), Some(vec!["heap"]));
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = CaptureRegistry::new();
        let b = CaptureRegistry::new();
        let options = || {
            CaptureOptions::default()
                .with_profiles([Profile::heap()])
                .with_trigger(never_firing())
                .with_storage(MemoryStorage::new())
                .with_runtime(Arc::new(RecordingRuntime::new()))
        };
        a.enable(options()).unwrap();
        assert!(!b.is_enabled());
        b.enable(options()).unwrap();
        assert!(a.is_enabled() && b.is_enabled());
    }
}
