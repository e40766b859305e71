//! Error types for remote shell and file operations
//!
//! NIST 800-53: SI-11 (Error Handling), AU-3 (Content of Audit Records)
//! STIG: V-222566 - The application must generate error messages that provide information
//! necessary for corrective actions without revealing information that could be exploited
//! Implementation: Typed errors; callers map kinds to responses, never raw remote messages

use std::fmt;

use thiserror::Error;

/// Result type alias for remote operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why an outbound SSH connection could not be established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// TCP connect or handshake failed
    Network,
    /// The remote host rejected the credential
    Auth,
    /// The connect deadline elapsed
    Timeout,
    /// The server host key failed the trust policy
    HostKeyRejected,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network",
            Self::Auth => "authentication",
            Self::Timeout => "timeout",
            Self::HostKeyRejected => "host key rejected",
        };
        f.write_str(label)
    }
}

/// Connection establishment error
///
/// NIST 800-53: IA-2 (Identification and Authentication), SC-8, SI-11
#[derive(Error, Debug)]
#[error("{reason} failure connecting to {target}: {message}")]
pub struct ConnectionError {
    pub reason: ConnectionFailure,
    /// `host:port` that was dialled
    pub target: String,
    pub message: String,
}

impl ConnectionError {
    pub fn new(reason: ConnectionFailure, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason,
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Remote file operation error, keyed by the remote path involved
///
/// NIST 800-53: AC-3 (Access Enforcement), SI-11
#[derive(Error, Debug)]
pub enum FileError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Operation failed on {path}: {message}")]
    Failure { path: String, message: String },
}

/// Recursive transfer aborted part-way
///
/// Carries the entry that failed and how many entries had already completed,
/// so a partial mirror is never mistaken for a complete one.
#[derive(Error, Debug)]
#[error("transfer aborted at {path} after {completed} completed entries: {source}")]
pub struct TransferError {
    pub path: String,
    pub completed: usize,
    #[source]
    pub source: Box<Error>,
}

/// Shellport SSH error types
///
/// NIST 800-53: SI-11 (Error Handling)
/// STIG: V-222566
/// Implementation: Error types that provide context without exposing sensitive information
#[derive(Error, Debug)]
pub enum Error {
    /// Connection establishment failed
    ///
    /// NIST 800-53: IA-2, SC-8, SI-11
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Remote file operation failed
    ///
    /// NIST 800-53: AC-3, SI-11
    #[error(transparent)]
    File(#[from] FileError),

    /// Client transport (WebSocket, HTTP body) failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Recursive transfer aborted
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Malformed message from the client
    ///
    /// NIST 800-53: SI-10 (Input Validation)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    ///
    /// NIST 800-53: SI-11, SC-8 (Transmission Confidentiality)
    #[error("SSH error: {0}")]
    Ssh(String),

    /// SFTP subsystem error not attributable to a single path
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// Archive could not be written or read
    #[error("Archive error: {0}")]
    Archive(String),

    /// SSH channel unexpectedly closed
    ///
    /// NIST 800-53: SC-8, SI-11
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Invalid path
    ///
    /// NIST 800-53: SI-10 (Input Validation), SI-11
    /// STIG: V-222396, V-222566
    /// Implementation: Path validation failure (traversal, empty names, root where a name is required)
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl Error {
    /// The error that actually caused the failure, looking through transfer wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Transfer(transfer) => transfer.source.root_cause(),
            other => other,
        }
    }

    /// Reason safe to show to a client
    ///
    /// NIST 800-53: SI-11 (Error Handling)
    /// Implementation: Connection failures name the target and the failure
    /// kind only; the remote's own message may carry account details
    pub fn public_message(&self) -> String {
        match self.root_cause() {
            Error::Connection(ConnectionError { reason, target, .. }) => {
                format!("SSH connection to {target} failed: {reason}")
            }
            other => other.to_string(),
        }
    }

    /// Check if error is due to client input
    ///
    /// # NIST 800-53: SI-10 (Input Validation), SI-11
    /// # STIG: V-222396, V-222566
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::InvalidPath(_)
                | Error::Protocol(_)
                | Error::File(
                    FileError::NotFound(_)
                        | FileError::PermissionDenied(_)
                        | FileError::AlreadyExists(_)
                        | FileError::NotEmpty(_)
                        | FileError::NotADirectory(_)
                        | FileError::IsADirectory(_)
                )
        )
    }

    /// Check if error is security-related and should be audited
    ///
    /// # NIST 800-53: AU-2 (Audit Events), SI-11
    pub fn is_security_event(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::Connection(ConnectionError {
                reason: ConnectionFailure::Auth | ConnectionFailure::HostKeyRejected,
                ..
            }) | Error::File(FileError::PermissionDenied(_))
                | Error::InvalidPath(_)
        )
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::Ssh(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => Error::Io(io),
            other => Error::Archive(other.to_string()),
        }
    }
}
