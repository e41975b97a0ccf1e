//! Facade Error Types

use derive_more::{Display, Error};

/// An error opening the accounting, with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for [`open()`](crate::open).
pub type Result<T> = std::result::Result<T, Error>;

/// Which layer failed. The underlying error is kept as a child frame.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not open document store")]
    Store,
}

impl ErrorKind {
    /// Convert a configuration error, keeping its frame as a child.
    #[track_caller]
    pub fn config(err: booktally_config::error::Error) -> Error {
        err.raise(ErrorKind::Config)
    }

    /// Convert a store error, keeping its frame as a child.
    #[track_caller]
    pub fn store(err: booktally_store::error::Error) -> Error {
        err.raise(ErrorKind::Store)
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
