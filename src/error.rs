/*!
 * Error types for Depot
 */

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, DepotError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTEGRITY: i32 = 3;

#[derive(Debug)]
pub enum DepotError {
    /// Name not known to the manifest or any search path
    Resolution(String),

    /// Container could not be opened (missing or corrupt)
    Open { container: String, reason: String },

    /// Payload absent from an otherwise valid container
    Payload { container: String, payload: String },

    /// Transport-level failure while moving bytes for `name`
    Transfer { name: String, reason: String },

    /// Length or hash mismatch after a transfer
    Verification { name: String, reason: String },

    /// I/O error
    Io(io::Error),

    /// Packed store failure
    Store(depot_core_vdisk::Error),

    /// Manifest or version manifest failure
    Manifest(depot_core_manifest::Error),

    /// Configuration error
    Config(String),

    /// Name cannot be mapped to any handle kind
    InvalidName(String),
}

impl DepotError {
    pub fn open<C: Into<String>, R: Into<String>>(container: C, reason: R) -> Self {
        DepotError::Open {
            container: container.into(),
            reason: reason.into(),
        }
    }

    pub fn transfer<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        DepotError::Transfer {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn verification<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        DepotError::Verification {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DepotError::Config(_) | DepotError::InvalidName(_) | DepotError::Manifest(_) => {
                EXIT_FATAL
            }
            DepotError::Verification { .. } => EXIT_INTEGRITY,
            _ => EXIT_PARTIAL,
        }
    }

    /// Check if a fresh attempt (`Retry()` on a task, a new `load` on the cache) may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DepotError::Transfer { .. } | DepotError::Verification { .. } => true,
            DepotError::Io(io_err) => Self::is_io_transient(io_err),
            _ => false,
        }
    }

    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | UnexpectedEof
        )
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            DepotError::Resolution(_) | DepotError::InvalidName(_) => ErrorCategory::Resolution,
            DepotError::Open { .. } | DepotError::Payload { .. } => ErrorCategory::Container,
            DepotError::Transfer { .. } => ErrorCategory::Network,
            DepotError::Verification { .. } => ErrorCategory::Integrity,
            DepotError::Io(_) => ErrorCategory::IoError,
            DepotError::Store(_) => ErrorCategory::Store,
            DepotError::Manifest(_) => ErrorCategory::Manifest,
            DepotError::Config(_) => ErrorCategory::Configuration,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown resource or unusable name
    Resolution,
    /// Container open or payload lookup failures
    Container,
    /// Transport failures
    Network,
    /// Length/hash verification failures
    Integrity,
    /// I/O operation errors
    IoError,
    /// Packed store errors
    Store,
    /// Manifest decoding or validation errors
    Manifest,
    /// Configuration errors
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Resolution => write!(f, "resolution"),
            ErrorCategory::Container => write!(f, "container"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Manifest => write!(f, "manifest"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

impl fmt::Display for DepotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepotError::Resolution(name) => write!(f, "Resource not found: {}", name),
            DepotError::Open { container, reason } => {
                write!(f, "Failed to open container {}: {}", container, reason)
            }
            DepotError::Payload { container, payload } => {
                write!(f, "Payload {} not found in container {}", payload, container)
            }
            DepotError::Transfer { name, reason } => {
                write!(f, "Transfer failed for {}: {}", name, reason)
            }
            DepotError::Verification { name, reason } => {
                write!(f, "Verification failed for {}: {}", name, reason)
            }
            DepotError::Io(err) => write!(f, "I/O error: {}", err),
            DepotError::Store(err) => write!(f, "Store error: {}", err),
            DepotError::Manifest(err) => write!(f, "Manifest error: {}", err),
            DepotError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DepotError::InvalidName(name) => write!(f, "Invalid name: {}", name),
        }
    }
}

impl std::error::Error for DepotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DepotError::Io(err) => Some(err),
            DepotError::Store(err) => Some(err),
            DepotError::Manifest(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DepotError {
    fn from(err: io::Error) -> Self {
        DepotError::Io(err)
    }
}

impl From<depot_core_vdisk::Error> for DepotError {
    fn from(err: depot_core_vdisk::Error) -> Self {
        DepotError::Store(err)
    }
}

impl From<depot_core_manifest::Error> for DepotError {
    fn from(err: depot_core_manifest::Error) -> Self {
        DepotError::Manifest(err)
    }
}

impl From<toml::de::Error> for DepotError {
    fn from(err: toml::de::Error) -> Self {
        DepotError::Config(format!("TOML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_user_visible_messages() {
        assert_eq!(
            DepotError::Resolution("Assets/UI/r1.png".into()).to_string(),
            "Resource not found: Assets/UI/r1.png"
        );
        assert_eq!(
            DepotError::verification("f3", "hash mismatch").to_string(),
            "Verification failed for f3: hash mismatch"
        );
        assert_eq!(
            DepotError::transfer("f3", "connection reset").to_string(),
            "Transfer failed for f3: connection reset"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(DepotError::Config("bad".into()).exit_code(), EXIT_FATAL);
        assert_eq!(DepotError::verification("a", "b").exit_code(), EXIT_INTEGRITY);
        assert_eq!(DepotError::transfer("a", "b").exit_code(), EXIT_PARTIAL);
        assert_eq!(EXIT_SUCCESS, 0);
    }

    #[test]
    fn test_retryable() {
        assert!(DepotError::transfer("a", "b").is_retryable());
        assert!(DepotError::verification("a", "b").is_retryable());
        assert!(DepotError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_retryable());
        assert!(!DepotError::Io(io::Error::from(io::ErrorKind::NotFound)).is_retryable());
        assert!(!DepotError::Resolution("x".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            DepotError::open("c1", "missing").category(),
            ErrorCategory::Container
        );
        assert_eq!(
            DepotError::Payload {
                container: "c1".into(),
                payload: "r1".into()
            }
            .category(),
            ErrorCategory::Container
        );
        assert_eq!(ErrorCategory::Integrity.to_string(), "integrity");
    }

    #[test]
    fn test_sources() {
        let err: DepotError = io::Error::other("disk").into();
        assert!(err.source().is_some());

        let err: DepotError = depot_core_vdisk::Error::record_not_found("a").into();
        assert!(matches!(err, DepotError::Store(_)));
        assert!(err.source().is_some());

        assert!(DepotError::Config("x".into()).source().is_none());
    }
}
