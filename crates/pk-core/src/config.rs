//! Agent configuration file.
//!
//! ```toml
//! [[profiles]]
//! kind = "cpu"
//! duration = "10s"
//!
//! [[profiles]]
//! kind = "block"
//! rate = 1
//!
//! [trigger]
//! kind = "random"   # or "fixed" (interval) / "resource" (poll_interval, cpu_percent, memory_percent)
//! min = "15s"
//! max = "2m"
//!
//! [storage]
//! dir = "/var/tmp/pprofs"
//! prefix = "api"
//! ttl = "36h"
//! ```
//!
//! Every section is optional. Storage settings resolve, per field, in the
//! order CLI → environment (`PPROF_*`) → file → built-in defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pk_storage::{FileStorage, StorageSettings};
use serde::{Deserialize, Serialize};

use crate::capture::CaptureOptions;
use crate::profile::Profile;
use crate::trigger::Trigger;

pub use crate::error::AgentConfigError;

/// Parsed agent configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// `None` keeps the default profile set; an explicit empty list is
    /// rejected when the capturer is built.
    #[serde(default)]
    pub profiles: Option<Vec<ProfileSpec>>,
    #[serde(default)]
    pub trigger: Option<TriggerSpec>,
    #[serde(default)]
    pub storage: StorageSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProfileSpec {
    Cpu {
        #[serde(default, with = "humantime_serde")]
        duration: Option<Duration>,
    },
    Heap,
    Mutex,
    Block {
        #[serde(default)]
        rate: Option<i64>,
    },
    Goroutine,
    Threadcreate,
}

impl From<ProfileSpec> for Profile {
    fn from(spec: ProfileSpec) -> Self {
        match spec {
            ProfileSpec::Cpu { duration } => match duration {
                Some(d) => Profile::cpu().with_duration(d),
                None => Profile::cpu(),
            },
            ProfileSpec::Heap => Profile::heap(),
            ProfileSpec::Mutex => Profile::mutex(),
            ProfileSpec::Block { rate } => match rate {
                Some(r) => Profile::block().with_rate(r),
                None => Profile::block(),
            },
            ProfileSpec::Goroutine => Profile::goroutine(),
            ProfileSpec::Threadcreate => Profile::threadcreate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerSpec {
    Fixed {
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
    Random {
        #[serde(with = "humantime_serde")]
        min: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
    Resource {
        #[serde(with = "humantime_serde")]
        poll_interval: Duration,
        #[serde(default)]
        cpu_percent: Option<f64>,
        #[serde(default)]
        memory_percent: Option<f64>,
    },
}

impl TriggerSpec {
    pub fn build(self) -> Trigger {
        match self {
            TriggerSpec::Fixed { interval } => Trigger::fixed(interval),
            TriggerSpec::Random { min, max } => Trigger::random(min, max),
            TriggerSpec::Resource {
                poll_interval,
                cpu_percent,
                memory_percent,
            } => Trigger::resource(poll_interval, cpu_percent, memory_percent),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSpec {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub ttl: Option<Duration>,
}

impl StorageSpec {
    fn apply(&self, mut settings: StorageSettings) -> StorageSettings {
        if let Some(dir) = &self.dir {
            settings = settings.with_dir(dir);
        }
        if let Some(prefix) = &self.prefix {
            settings = settings.with_prefix(prefix);
        }
        if let Some(ttl) = self.ttl {
            settings = settings.with_ttl(ttl);
        }
        settings
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, AgentConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| AgentConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|e| match e {
            AgentConfigError::Parse { message, .. } => AgentConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, AgentConfigError> {
        let config: AgentConfig = toml::from_str(content).map_err(|e| AgentConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), AgentConfigError> {
        match self.trigger {
            Some(TriggerSpec::Fixed { interval }) if interval.is_zero() => Err(
                AgentConfigError::Invalid("fixed trigger interval must be positive".to_string()),
            ),
            Some(TriggerSpec::Resource { poll_interval, .. }) if poll_interval.is_zero() => {
                Err(AgentConfigError::Invalid(
                    "resource trigger poll_interval must be positive".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Resolve storage settings: `cli` over environment over file over defaults.
    pub fn storage_settings<F>(&self, cli: &StorageSpec, lookup: F) -> StorageSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_file = self.storage.apply(StorageSettings::default());
        let from_env = from_file.with_env_overrides(lookup);
        cli.apply(from_env)
    }

    /// Build capture options; collaborators not covered by the file keep
    /// their defaults.
    pub fn capture_options(&self, storage: StorageSettings) -> CaptureOptions {
        let mut options =
            CaptureOptions::default().with_shared_storage(Arc::new(FileStorage::from_settings(storage)));
        if let Some(profiles) = &self.profiles {
            options = options.with_profiles(profiles.iter().copied().map(Profile::from));
        }
        if let Some(trigger) = self.trigger {
            options = options.with_trigger(trigger.build());
        }
        options
    }
}
