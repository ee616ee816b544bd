use std::io;
use thiserror::Error;

use super::types::{CarClass, TrackId};

/// Custom error types for the broadcasting client and gap engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Truncated frame: need {needed} bytes at offset {offset}, frame has {len}")]
    TruncatedFrame {
        needed: usize,
        offset: usize,
        len: usize,
    },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Invalid string: {0}")]
    InvalidString(String),

    #[error("Socket fault: {0}")]
    SocketFault(String),

    #[error("Registration rejected after {attempts} attempts: {reason}")]
    RegistrationRejected { attempts: u32, reason: String },

    #[error("No reference curve for {class} on {track}")]
    ReferenceCurveNotFound { track: TrackId, class: CarClass },

    #[error("Invalid reference curve: {0}")]
    InvalidCurve(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new socket fault
    pub fn socket(msg: impl Into<String>) -> Self {
        Error::SocketFault(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new invalid curve error
    pub fn invalid_curve(msg: impl Into<String>) -> Self {
        Error::InvalidCurve(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Whether the error only invalidates the frame being decoded.
    ///
    /// Frame-local errors are logged and the receive loop carries on with the
    /// next datagram. Everything else ends the connection.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Error::TruncatedFrame { .. } | Error::UnknownMessageType(_) | Error::InvalidString(_)
        )
    }
}
