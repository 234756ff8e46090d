/// Error handling module for mc-fleet.
///
/// This module defines the error types used throughout the library.
/// Every variant belongs to one [`ErrorKind`], so a presentation layer can
/// decide how to phrase a failure ("pick another version", "wait for a build",
/// "check your connection") without matching on message text.
///
/// # Example
///
/// ```
/// use mc_fleet::error::{Error, ErrorKind, Result};
///
/// fn describe(result: Result<()>) -> &'static str {
///     match result {
///         Ok(_) => "ok",
///         Err(Error::NoInstallableBuild { .. }) => "no build published yet, try again later",
///         Err(Error::VersionNotFound { .. }) => "unknown version, pick another one",
///         Err(e) if e.kind() == ErrorKind::Network => "network problem, retry",
///         Err(_) => "failed",
///     }
/// }
/// ```
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected before any side effect (duplicate name, bad bounds, unknown id).
    Validation,
    /// The requested version does not exist or has nothing installable.
    Resolution,
    /// Transport failure or a non-success HTTP status.
    Network,
    /// Child process could not be started, stopped or talked to.
    Process,
    /// Filesystem or persistence failure.
    Io,
    /// Anything else.
    Internal,
}

/// Errors that can occur in the mc-fleet library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    ///
    /// This error occurs when:
    /// - Memory bounds are zero or inverted
    /// - The port is zero
    /// - The world name is empty
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An instance with the same (case-insensitive) name already exists.
    #[error("An instance named '{0}' already exists")]
    DuplicateName(String),

    /// No instance is registered under the given id.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// The version is not listed by the upstream catalog.
    #[error("Version {version} not found in the {flavor} catalog")]
    VersionNotFound {
        /// Catalog that was queried.
        flavor: String,
        /// Version that was requested.
        version: String,
    },

    /// The version exists but has no build that can be installed yet.
    #[error("No installable build available for version {version}")]
    NoInstallableBuild {
        /// Version that was requested.
        version: String,
    },

    /// Transport-level HTTP failure (timeout, DNS, connection refused).
    #[error("Network error: {0}")]
    Network(String),

    /// The upstream answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Returned status code.
        status: u16,
    },

    /// The downloaded bytes did not match the published checksum.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum published by the catalog.
        expected: String,
        /// Checksum of the received bytes.
        actual: String,
    },

    /// Error when starting, stopping, or communicating with a server process.
    #[error("Server process error: {0}")]
    Process(String),

    /// The declared artifact does not exist on disk.
    #[error("Server artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// The runtime collaborator rejected the runtime executable.
    #[error("Invalid runtime: {}", .0.display())]
    InvalidRuntime(PathBuf),

    /// The server is already running.
    #[error("Already running")]
    AlreadyRunning,

    /// The server is not running.
    #[error("Not running")]
    NotRunning,

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error in serializing or deserializing data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigParse(_)
            | Error::ConfigInvalid(_)
            | Error::DuplicateName(_)
            | Error::InstanceNotFound(_) => ErrorKind::Validation,
            Error::VersionNotFound { .. } | Error::NoInstallableBuild { .. } => {
                ErrorKind::Resolution
            }
            Error::Network(_) | Error::HttpStatus { .. } => ErrorKind::Network,
            Error::Process(_)
            | Error::ArtifactMissing(_)
            | Error::InvalidRuntime(_)
            | Error::AlreadyRunning
            | Error::NotRunning => ErrorKind::Process,
            Error::Io(_) | Error::ChecksumMismatch { .. } | Error::Serialization(_) => {
                ErrorKind::Io
            }
            Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// The library never retries on its own.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Error::HttpStatus {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            },
            None if err.is_decode() => Error::Serialization(err.to_string()),
            None => Error::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for mc-fleet operations.
pub type Result<T> = std::result::Result<T, Error>;
