//! Link errors

use thiserror::Error;

/// Errors surfaced by link operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Another connect call is still running
    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    /// Empty or blank device path
    #[error("Device path must not be empty")]
    InvalidPath,

    /// Baud rate outside the supported set
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Every attempt failed and the last one saw a held device
    #[error("Port busy after {attempts} attempts: {message}")]
    PortBusy {
        /// Open attempts made
        attempts: u32,
        /// Message of the last failure
        message: String,
    },

    /// Every attempt failed for another reason
    #[error("Failed to open port after {attempts} attempts: {message}")]
    OpenFailed {
        /// Open attempts made
        attempts: u32,
        /// Message of the last failure
        message: String,
    },

    /// No open link
    #[error("Not connected to a serial port")]
    NotConnected,

    /// Write or flush failed or timed out
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Shutdown reported an error; the link was released anyway
    #[error("Close failed: {0}")]
    CloseFailed(String),
}

impl LinkError {
    /// Build the error reported once every open attempt failed
    pub(crate) fn exhausted(attempts: u32, last: Option<OpenError>) -> Self {
        match last {
            Some(err) if err.is_busy() => LinkError::PortBusy {
                attempts,
                message: err.message,
            },
            Some(err) => LinkError::OpenFailed {
                attempts,
                message: err.message,
            },
            None => LinkError::OpenFailed {
                attempts,
                message: "unknown reason".to_string(),
            },
        }
    }
}

/// Broad classification of a failed open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenErrorKind {
    /// Device exists but is held by someone else or not yet released
    Busy,
    /// Device path does not exist
    NotFound,
    /// Anything else
    Other,
}

/// Error returned by a backend when a port cannot be opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct OpenError {
    /// Classification
    pub kind: OpenErrorKind,
    /// Message reported by the OS or backend
    pub message: String,
}

// Fragments of OS messages that mean "held by someone else". Windows reports
// a lingering handle as "Unknown error code 31" or "Access is denied".
const BUSY_HINTS: [&str; 5] = [
    "busy",
    "access is denied",
    "permission denied",
    "in use",
    "unknown error",
];

impl OpenError {
    /// Create an error of the given kind
    pub fn new(kind: OpenErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Device held by another owner
    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(OpenErrorKind::Busy, message)
    }

    /// Device path missing
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(OpenErrorKind::NotFound, message)
    }

    /// Any other failure
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(OpenErrorKind::Other, message)
    }

    /// Whether the failure looks transient (device held or not released)
    pub fn is_busy(&self) -> bool {
        self.kind == OpenErrorKind::Busy
    }
}

impl From<tokio_serial::Error> for OpenError {
    fn from(err: tokio_serial::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        use tokio_serial::ErrorKind;

        let lowered = err.description.to_lowercase();
        let kind = if BUSY_HINTS.iter().any(|hint| lowered.contains(hint)) {
            OpenErrorKind::Busy
        } else {
            match err.kind {
                ErrorKind::Io(IoKind::PermissionDenied) | ErrorKind::Unknown => {
                    OpenErrorKind::Busy
                }
                ErrorKind::Io(IoKind::NotFound) | ErrorKind::NoDevice => OpenErrorKind::NotFound,
                _ => OpenErrorKind::Other,
            }
        };

        Self::new(kind, err.description)
    }
}

impl From<std::io::Error> for OpenError {
    fn from(err: std::io::Error) -> Self {
        Self::from(tokio_serial::Error::from(err))
    }
}
