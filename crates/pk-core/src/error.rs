//! Error types for the capture agent.
//!
//! Errors are split by the operation that can fail:
//! - [`ConfigError`]: a capturer configuration was rejected at construction
//! - [`EnableError`]: starting the background loop failed
//! - [`WaitError`]: a trigger could not decide when to fire
//! - [`CaptureError`]: producing one profile's bytes failed
//! - [`AgentConfigError`]: an agent config file could not be loaded
//!
//! Storage failures come from `pk_storage` as [`pk_storage::StorageError`].

use std::path::PathBuf;

use thiserror::Error;

use crate::exit_codes::ExitCode;

/// A capturer configuration failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no profiles configured")]
    EmptyProfiles,

    #[error("profile {0:?} configured more than once")]
    DuplicateProfile(String),

    #[error("no trigger configured")]
    MissingTrigger,

    #[error("no storage configured")]
    MissingStorage,

    #[error("no logger configured")]
    MissingLogger,

    #[error("no runtime profiler configured")]
    MissingRuntime,
}

/// Enabling continuous capture failed.
#[derive(Debug, Error)]
pub enum EnableError {
    #[error("continuous capture is already enabled")]
    AlreadyEnabled,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    #[error("failed to start capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl EnableError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            EnableError::AlreadyEnabled => ExitCode::AlreadyEnabled,
            EnableError::InvalidConfiguration(_) => ExitCode::ArgsError,
            EnableError::Spawn(_) => ExitCode::InternalError,
        }
    }
}

/// A trigger failed to decide when the next cycle should run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("process {0} not found")]
    ProcessNotFound(u32),

    #[error("process stats unavailable: {0}")]
    Stats(String),
}

/// Producing one profile's snapshot failed.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("profiler error: {0}")]
    Profiler(String),

    #[error("{0} profiles are not supported on this platform")]
    Unsupported(&'static str),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// An agent config file could not be loaded.
#[derive(Debug, Error)]
pub enum AgentConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_into_enable_error() {
        let err: EnableError = ConfigError::DuplicateProfile("heap".into()).into();
        assert!(matches!(
            err,
            EnableError::InvalidConfiguration(ConfigError::DuplicateProfile(ref n)) if n == "heap"
        ));
        assert_eq!(err.exit_code(), ExitCode::ArgsError);
        assert!(err.to_string().contains("\"heap\""));
    }

    #[test]
    fn test_already_enabled_exit_code() {
        assert_eq!(
            EnableError::AlreadyEnabled.exit_code(),
            ExitCode::AlreadyEnabled
        );
    }
}
