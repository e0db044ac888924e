//! Error types for the strata library.
//!
//! Every fallible operation returns [`Result`], whose error is the
//! [`StrataError`] enum. Corruption errors are never recovered from inside
//! the crate; they carry enough context (field, term, offset) to diagnose
//! the damaged file.
//!
//! # Examples
//!
//! ```
//! use strata::error::{Result, StrataError};
//!
//! fn check_chunk_size(size: u64) -> Result<u64> {
//!     if size == 0 {
//!         return Err(StrataError::corrupt("zero chunk size"));
//!     }
//!     Ok(size)
//! }
//!
//! assert!(check_chunk_size(0).is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// I/O errors (open, mmap, write, flush, sync).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The segment bytes do not describe a valid segment.
    #[error("Corrupt segment: {0}")]
    Corrupt(String),

    /// A build or merge observed its cancellation signal.
    #[error("Operation closed: segment build or merge was cancelled")]
    Closed,

    /// An input document was rejected during a build.
    #[error("Invalid document {index}: {reason}")]
    InvalidDocument { index: usize, reason: String },

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Field-related errors (unknown field, mismatched field kinds).
    #[error("Field error: {0}")]
    Field(String),

    /// Vector index errors (dimension mismatch, untrained index).
    #[error("Vector error: {0}")]
    Vector(String),

    /// FST build or load errors.
    #[error("FST error: {0}")]
    Fst(#[from] fst::Error),

    /// Binary serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        StrataError::Corrupt(msg.into())
    }

    /// Create a new invalid document error.
    pub fn invalid_document<S: Into<String>>(index: usize, reason: S) -> Self {
        StrataError::InvalidDocument {
            index,
            reason: reason.into(),
        }
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        StrataError::InvalidArgument(msg.into())
    }

    /// Create a new field error.
    pub fn field<S: Into<String>>(msg: S) -> Self {
        StrataError::Field(msg.into())
    }

    /// Create a new vector error.
    pub fn vector<S: Into<String>>(msg: S) -> Self {
        StrataError::Vector(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        StrataError::Serialization(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        StrataError::Other(msg.into())
    }

    /// Whether this error reports cancellation.
    pub fn is_closed(&self) -> bool {
        matches!(self, StrataError::Closed)
    }

    /// Whether this error reports on-disk corruption.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StrataError::Corrupt(_))
    }
}

impl From<bincode::Error> for StrataError {
    fn from(err: bincode::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}
