//! Capturer configuration.

use std::collections::HashSet;
use std::sync::Arc;

use pk_storage::{FileStorage, Storage};

use crate::error::ConfigError;
use crate::logger::{DiscardLogger, Logger};
use crate::profile::Profile;
use crate::runtime::{NativeRuntime, RuntimeProfiler};
use crate::trigger::Trigger;

/// Everything a [`Capturer`](super::Capturer) needs.
///
/// `Default` gives the stock setup: CPU (15s) and heap profiles, a random
/// 15s..120s trigger, file storage resolved from `PPROF_*` variables, a
/// discarding logger and the process-wide [`NativeRuntime`]. Each
/// collaborator is optional so that a missing one is reported as a
/// configuration error instead of a panic later on.
pub struct CaptureOptions {
    pub profiles: Vec<Profile>,
    pub trigger: Option<Trigger>,
    pub storage: Option<Arc<dyn Storage>>,
    pub logger: Option<Arc<dyn Logger>>,
    pub runtime: Option<Arc<dyn RuntimeProfiler>>,
}

impl std::fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("profiles", &self.profiles)
            .field("trigger", &self.trigger)
            .field("storage", &self.storage.is_some())
            .field("logger", &self.logger.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        let runtime: Arc<dyn RuntimeProfiler> = NativeRuntime::global();
        CaptureOptions {
            profiles: vec![Profile::cpu(), Profile::heap()],
            trigger: Some(Trigger::default()),
            storage: Some(Arc::new(FileStorage::from_env())),
            logger: Some(Arc::new(DiscardLogger)),
            runtime: Some(runtime),
        }
    }
}

impl CaptureOptions {
    /// Replace the profile set.
    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = Profile>) -> Self {
        self.profiles = profiles.into_iter().collect();
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<Trigger>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn with_shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeProfiler>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Check the configuration without consuming it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.profiles.is_empty() {
            return Err(ConfigError::EmptyProfiles);
        }
        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.name()) {
                return Err(ConfigError::DuplicateProfile(profile.name().to_string()));
            }
        }
        if self.trigger.is_none() {
            return Err(ConfigError::MissingTrigger);
        }
        if self.storage.is_none() {
            return Err(ConfigError::MissingStorage);
        }
        if self.logger.is_none() {
            return Err(ConfigError::MissingLogger);
        }
        if self.runtime.is_none() {
            return Err(ConfigError::MissingRuntime);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_options() {
        let options = CaptureOptions::default();
        assert_eq!(options.profiles, vec![Profile::cpu(), Profile::heap()]);
        assert!(matches!(options.trigger, Some(Trigger::RandomInterval(_))));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let empty = CaptureOptions::default().with_profiles(Vec::new());
        assert_eq!(empty.validate(), Err(ConfigError::EmptyProfiles));

        let duplicate = CaptureOptions::default().with_profiles([
            Profile::cpu(),
            Profile::heap(),
            Profile::cpu().with_duration(Duration::from_secs(1)),
        ]);
        assert_eq!(
            duplicate.validate(),
            Err(ConfigError::DuplicateProfile("cpu".into()))
        );

        let mut no_trigger = CaptureOptions::default();
        no_trigger.trigger = None;
        assert_eq!(no_trigger.validate(), Err(ConfigError::MissingTrigger));

        let mut no_storage = CaptureOptions::default();
        no_storage.storage = None;
        assert_eq!(no_storage.validate(), Err(ConfigError::MissingStorage));

        let mut no_logger = CaptureOptions::default();
        no_logger.logger = None;
        assert_eq!(no_logger.validate(), Err(ConfigError::MissingLogger));

        let mut no_runtime = CaptureOptions::default();
        no_runtime.runtime = None;
        assert_eq!(no_runtime.validate(), Err(ConfigError::MissingRuntime));
    }
}
