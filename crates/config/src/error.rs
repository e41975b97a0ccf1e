//! Config Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The configuration sources could not be read or deserialized.
    #[display("failed to load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// The configuration was read but makes no sense.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
    /// No store root was configured and the platform has no data directory.
    #[display("no default data directory available, configure `store.root`")]
    NoDefaultDirectory,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
