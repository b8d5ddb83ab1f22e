//! Environment-derived storage defaults.
//!
//! Resolution order for each setting: environment variable → built-in
//! default. Each variable overrides independently; an unparsable
//! `PPROF_TTL` falls back to the default instead of failing.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Directory override.
pub const ENV_PPROF_DIR: &str = "PPROF_DIR";
/// File-name prefix override.
pub const ENV_PPROF_PREFIX: &str = "PPROF_PREFIX";
/// Retention override, as a duration string (`36h`, `90m`, `2days`).
pub const ENV_PPROF_TTL: &str = "PPROF_TTL";

/// Subdirectory of the platform temp directory used by default.
pub const DEFAULT_DIR_NAME: &str = "pprofs";
/// Prefix used when the executable name cannot be determined.
pub const DEFAULT_PREFIX: &str = "pk";
/// Default retention window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Resolved settings for a [`FileStorage`](crate::FileStorage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub prefix: String,
    pub dir: PathBuf,
    pub ttl: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            prefix: executable_basename().unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            dir: std::env::temp_dir().join(DEFAULT_DIR_NAME),
            ttl: DEFAULT_TTL,
        }
    }
}

impl StorageSettings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        StorageSettings::default().with_env_overrides(lookup)
    }

    /// Apply any set `PPROF_*` variables on top of `self`.
    ///
    /// Lets callers layer the environment over values from another source
    /// (a config file) instead of over the built-in defaults.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_PPROF_DIR).filter(|v| !v.is_empty()) {
            self.dir = PathBuf::from(dir);
        }

        if let Some(prefix) = lookup(ENV_PPROF_PREFIX).filter(|v| !v.is_empty()) {
            self.prefix = prefix;
        }

        if let Some(raw) = lookup(ENV_PPROF_TTL).filter(|v| !v.is_empty()) {
            match humantime::parse_duration(raw.trim()) {
                Ok(ttl) => self.ttl = ttl,
                Err(e) => warn!(
                    value = %raw,
                    error = %e,
                    "ignoring invalid {}, keeping retention {:?}", ENV_PPROF_TTL, self.ttl
                ),
            }
        }

        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Base name of the running executable, without extension.
fn executable_basename() -> Option<String> {
    let exe = std::env::current_exe()
        .ok()
        .or_else(|| std::env::args_os().next().map(PathBuf::from))?;
    exe.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let settings = StorageSettings::from_lookup(lookup(&[]));
        assert_eq!(settings.ttl, DEFAULT_TTL);
        assert_eq!(settings.dir, std::env::temp_dir().join(DEFAULT_DIR_NAME));
        assert!(!settings.prefix.is_empty());
    }

    #[test]
    fn test_each_variable_overrides_independently() {
        let settings = StorageSettings::from_lookup(lookup(&[(ENV_PPROF_DIR, "/var/tmp/snaps")]));
        assert_eq!(settings.dir, PathBuf::from("/var/tmp/snaps"));
        assert_eq!(settings.ttl, DEFAULT_TTL);

        let settings = StorageSettings::from_lookup(lookup(&[(ENV_PPROF_PREFIX, "svc")]));
        assert_eq!(settings.prefix, "svc");
        assert_eq!(settings.dir, std::env::temp_dir().join(DEFAULT_DIR_NAME));

        let settings = StorageSettings::from_lookup(lookup(&[(ENV_PPROF_TTL, "36h")]));
        assert_eq!(settings.ttl, Duration::from_secs(36 * 3600));
    }

    #[test]
    fn test_invalid_ttl_falls_back() {
        let settings = StorageSettings::from_lookup(lookup(&[(ENV_PPROF_TTL, "forever-ish")]));
        assert_eq!(settings.ttl, DEFAULT_TTL);
    }

    #[test]
    fn test_env_layers_over_existing_values() {
        let base = StorageSettings::default()
            .with_prefix("from-file")
            .with_ttl(Duration::from_secs(600));
        let settings = base.with_env_overrides(lookup(&[(ENV_PPROF_TTL, "2h")]));
        assert_eq!(settings.prefix, "from-file");
        assert_eq!(settings.ttl, Duration::from_secs(7200));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let settings = StorageSettings::from_lookup(lookup(&[
            (ENV_PPROF_DIR, ""),
            (ENV_PPROF_PREFIX, ""),
            (ENV_PPROF_TTL, ""),
        ]));
        assert_eq!(settings.dir, std::env::temp_dir().join(DEFAULT_DIR_NAME));
        assert_eq!(settings.ttl, DEFAULT_TTL);
        assert!(!settings.prefix.is_empty());
    }
}
