//! Error taxonomy for the cube source-finding core.
//!
//! Mirrors the kinds in the spec's error-handling design rather than
//! wrapping an opaque `anyhow::Error`: callers need to distinguish, say, a
//! missing header key from a truncated file.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    UserInput(String),

    #[error("index out of range: {0}")]
    IndexRange(String),

    #[error("header key missing: {0}")]
    KeyMissing(String),

    #[error("file access error for {path}: {source}")]
    FileAccess {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed FITS-like structure: {0}")]
    Format(String),

    #[error("allocation failure: {0}")]
    NoMemory(String),

    #[error("internal defensive check failed: {0}")]
    NullPtr(String),
}

impl Error {
    pub fn user_input(msg: impl Into<String>) -> Self {
        Error::UserInput(msg.into())
    }

    pub fn index_range(msg: impl Into<String>) -> Self {
        Error::IndexRange(msg.into())
    }

    pub fn key_missing(key: impl Into<String>) -> Self {
        Error::KeyMissing(key.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub fn file_access(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::FileAccess {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
