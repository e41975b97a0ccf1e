//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A document store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for document store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Document does not exist (only raised by operations that require it to)
    #[display("document not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// The store could not be reached (network, quota, offline)
    #[display("store unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// Path or document ID is malformed
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// Stored document could not be decoded
    #[display("invalid document data: {_0}")]
    InvalidData(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_) | Self::BackendError(_))
    }
}
