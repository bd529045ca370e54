//! Error handling for the mxuser library
//!
//! Only recoverable conditions travel through [`MxUserError`]. Misuse of a
//! primitive (double acquisition, foreign release, rank violations and the
//! like) is a programming defect and is routed to [`crate::fatal`] instead.

use thiserror::Error;

/// Main error type for the mxuser library
#[derive(Error, Debug)]
pub enum MxUserError {
    /// I/O related errors (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or parameter errors
    #[error("Invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// A process-wide hook or sink was registered twice
    #[error("Already registered: {what}")]
    AlreadyRegistered {
        /// Description of the hook that was already present
        what: String,
    },

    /// A native wait or wake call failed in an unexpected way
    #[error("System error: {message}")]
    System {
        /// Error message including the OS error code
        message: String,
    },
}

impl MxUserError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an already-registered error
    pub fn already_registered<S: Into<String>>(what: S) -> Self {
        Self::AlreadyRegistered { what: what.into() }
    }

    /// Create a system error
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::AlreadyRegistered { .. } => true,
            Self::Configuration { .. } => false,
            Self::System { .. } => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Configuration { .. } => "config",
            Self::AlreadyRegistered { .. } => "registration",
            Self::System { .. } => "system",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MxUserError>;
