//! Error types for snapshot storage.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while acquiring or releasing a sink.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("mkdir {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("create {path:?}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Path the failing operation was working on, if known.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            StorageError::CreateDir { path, .. } | StorageError::CreateFile { path, .. } => {
                Some(path)
            }
            StorageError::Io(_) => None,
        }
    }
}
