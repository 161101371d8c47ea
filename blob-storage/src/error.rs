use std::io;
use std::path::PathBuf;
use thiserror::Error;
use crate::hash::ContentHash;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// No blob matches the hash under the requested confirmation filter.
    #[error("blob {0} not found")]
    NotFound(ContentHash),

    #[error("source file {path} is unreadable: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Raised once at assembly time, never retried.
    #[error("invalid storage configuration: {0}")]
    Configuration(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),

    #[error("corrupt blob record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid content hash {0:?}")]
    InvalidHash(String),
}

impl StorageError {
    pub fn source_unreadable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::SourceUnreadable { path: path.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Transport(e.to_string())
    }
}
