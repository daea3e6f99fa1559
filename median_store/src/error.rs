//! Error taxonomy shared by the store backends, the reclaimer and the HTTP layer.

use thiserror::Error;

/// Coarse classification of a [`StoreError`], used by the transport to pick a
/// response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    KeyNotFound,
    EmptySequence,
    Internal,
}

/// Errors produced by [`KeyStore`](crate::store::KeyStore) operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("key '{0}' not found")]
    KeyNotFound(String),

    #[error("key '{0}' holds no samples")]
    EmptySequence(String),

    #[error("storage operation failed: {context}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            StoreError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            StoreError::EmptySequence(_) => ErrorKind::EmptySequence,
            StoreError::Storage { .. } | StoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Storage {
            context: context.into(),
            source,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
