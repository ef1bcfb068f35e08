//! Error types for packed store operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for packed store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or rewriting a packed store
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Store file not found
    #[error("Packed store not found: {path}")]
    NotFound { path: PathBuf },

    /// Header could not be decoded
    #[error("Invalid packed store format: {reason}")]
    InvalidFormat { reason: String },

    /// No record with this name in the store
    #[error("Record not found: {name}")]
    RecordNotFound { name: String },

    /// A standalone payload file does not have the length its record declares
    #[error("Length mismatch for {name}: expected {expected}, found {found}")]
    LengthMismatch {
        name: String,
        expected: u64,
        found: u64,
    },
}

impl Error {
    /// Create an invalid format error
    pub fn invalid_format<S: Into<String>>(reason: S) -> Self {
        Error::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<P: Into<PathBuf>>(path: P) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Create a record not found error
    pub fn record_not_found<S: Into<String>>(name: S) -> Self {
        Error::RecordNotFound { name: name.into() }
    }

    /// Check whether this error means the store file was absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<depot_core_manifest::Error> for Error {
    fn from(err: depot_core_manifest::Error) -> Self {
        match err {
            depot_core_manifest::Error::Io(e) => Error::Io(e),
            other => Error::invalid_format(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_error_conversion() {
        let err: Error = depot_core_manifest::Error::invalid_format("negative record count").into();
        assert!(matches!(err, Error::InvalidFormat { .. }));

        let io_err = depot_core_manifest::Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(Error::from(io_err), Error::Io(_)));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::not_found("/tmp/res").is_not_found());
        assert!(!Error::record_not_found("a.pack").is_not_found());
    }
}
