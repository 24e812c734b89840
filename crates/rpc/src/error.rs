//! Protocol errors.

use std::fmt;

use attestor_zk::ZkError;
use serde::{Deserialize, Serialize};

/// Code of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Not an error, used when a connection is closed normally.
    NoError,
    /// Internal error, including malformed messages.
    Internal,
    /// The request was rejected.
    BadRequest,
    /// The claim failed verification.
    InvalidClaim,
    /// The underlying transport failed.
    NetworkError,
    /// An operation timed out.
    ///
    /// Calls are not bounded by the connection itself. Callers which add their
    /// own deadlines terminate with this code.
    Timeout,
    /// The peer sent a response which does not match the request.
    ProtocolDesync,
    /// The connection is closed.
    Closed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NoError => write!(f, "no error"),
            ErrorCode::Internal => write!(f, "internal error"),
            ErrorCode::BadRequest => write!(f, "bad request"),
            ErrorCode::InvalidClaim => write!(f, "invalid claim"),
            ErrorCode::NetworkError => write!(f, "network error"),
            ErrorCode::Timeout => write!(f, "timeout"),
            ErrorCode::ProtocolDesync => write!(f, "protocol desync"),
            ErrorCode::Closed => write!(f, "connection closed"),
        }
    }
}

/// A structured error, sent over the wire in request errors and termination
/// alerts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub struct RpcError {
    code: ErrorCode,
    message: String,
}

impl RpcError {
    /// Creates a new error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates an error which signals a normal close.
    pub fn no_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Creates an invalid claim error.
    pub fn invalid_claim(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidClaim, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub(crate) fn protocol_desync(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolDesync, message)
    }

    pub(crate) fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Closed, message)
    }

    /// Returns the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if the error signals a normal close.
    pub fn is_no_error(&self) -> bool {
        self.code == ErrorCode::NoError
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;

        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }

        Ok(())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        Self::network(e.to_string())
    }
}

impl From<bincode::Error> for RpcError {
    fn from(e: bincode::Error) -> Self {
        Self::internal(format!("codec error: {e}"))
    }
}

impl From<ZkError> for RpcError {
    fn from(e: ZkError) -> Self {
        Self::invalid_claim(e.to_string())
    }
}
