//! Error types for the connection registry.
//!
//! This module defines the errors surfaced by registry operations, the
//! per-message decode error handed to subscription callbacks, and the
//! STOMP codec error used by the frame decoder.

use std::fmt;
use thiserror::Error;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations.
///
/// The error is `Clone` so that a single connect attempt outcome can be
/// delivered to every caller that joined the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The credential failed local validation; no network attempt was made.
    #[error("invalid token format: {reason}")]
    InvalidTokenFormat {
        /// Why the token was rejected.
        reason: String,
    },

    /// The endpoint name is empty or otherwise unusable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The connection deadline elapsed before the handshake completed.
    #[error("handshake with {endpoint} timed out after {timeout_ms} ms")]
    HandshakeTimeout {
        /// Endpoint whose handshake timed out.
        endpoint: String,
        /// The deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The server explicitly rejected the connection.
    #[error("handshake rejected by {endpoint}: {reason}")]
    HandshakeRejected {
        /// Endpoint that rejected the handshake.
        endpoint: String,
        /// Reason reported by the server.
        reason: String,
    },

    /// A low-level socket error.
    #[error("transport error on {endpoint}: {reason}")]
    TransportError {
        /// Endpoint whose transport failed.
        endpoint: String,
        /// Description of the failure.
        reason: String,
    },

    /// `send` was invoked while the endpoint was not connected.
    #[error("endpoint {endpoint} is not connected")]
    NotConnected {
        /// Endpoint that is not connected.
        endpoint: String,
    },

    /// The outgoing body could not be encoded.
    #[error("failed to encode message body: {0}")]
    Encode(String),
}

impl RegistryError {
    /// Create a new invalid token format error.
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidTokenFormat {
            reason: reason.into(),
        }
    }

    /// Create a new invalid endpoint error.
    pub fn invalid_endpoint(reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint(reason.into())
    }

    /// Create a new handshake timeout error.
    pub fn handshake_timeout(endpoint: impl Into<String>, timeout_ms: u64) -> Self {
        Self::HandshakeTimeout {
            endpoint: endpoint.into(),
            timeout_ms,
        }
    }

    /// Create a new handshake rejected error.
    pub fn handshake_rejected(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a new transport error.
    pub fn transport(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransportError {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a new not connected error.
    pub fn not_connected(endpoint: impl Into<String>) -> Self {
        Self::NotConnected {
            endpoint: endpoint.into(),
        }
    }

    /// Check if retrying the same operation later could succeed.
    ///
    /// Validation failures are final; timeouts and transport failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::TransportError { .. } | Self::NotConnected { .. }
        )
    }

    /// Check if this error came out of a connect attempt reaching the network.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. }
                | Self::HandshakeRejected { .. }
                | Self::TransportError { .. }
        )
    }
}

/// A malformed payload on an otherwise healthy subscription.
///
/// Delivered to the affected callback only; it never changes connection
/// state or affects other subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to decode message on {destination}: {reason}")]
pub struct MessageDecodeError {
    /// Destination the message arrived on.
    pub destination: String,
    /// Decoder error description.
    pub reason: String,
    /// The raw body that failed to decode.
    pub raw: String,
}

impl MessageDecodeError {
    /// Create a new decode error.
    pub fn new(
        destination: impl Into<String>,
        reason: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

/// Errors raised by the STOMP frame codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StompError {
    /// The command line is not a known STOMP command.
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),

    /// A header line is missing its `:` separator.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    /// A header contains an escape sequence STOMP does not define.
    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    /// The frame is not valid UTF-8 where text is required.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// The `content-length` header is not a number.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    /// The byte after a `content-length` body is not NUL.
    #[error("frame body is not NUL-terminated at the declared length")]
    UnterminatedBody,

    /// The buffered frame exceeds the configured limit.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },
}

/// The failure reported by a transport while connecting or connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// The server refused the session (STOMP ERROR frame, HTTP 401/403).
    Rejected(String),
    /// Any other socket or protocol failure.
    Io(String),
}

impl TransportFailure {
    /// Convert into the registry error for `endpoint`.
    pub fn into_error(self, endpoint: &str) -> RegistryError {
        match self {
            Self::Rejected(reason) => RegistryError::handshake_rejected(endpoint, reason),
            Self::Io(reason) => RegistryError::transport(endpoint, reason),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::Io(reason) => write!(f, "io: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_token_not_retryable() {
        let err = RegistryError::invalid_token("expected 3 segments");
        assert!(!err.is_retryable());
        assert!(!err.is_connection_failure());
        assert!(err.to_string().contains("expected 3 segments"));
    }

    #[test]
    fn test_handshake_timeout_message() {
        let err = RegistryError::handshake_timeout("/ws-x", 15_000);
        assert_eq!(err.to_string(), "handshake with /ws-x timed out after 15000 ms");
        assert!(err.is_retryable());
        assert!(err.is_connection_failure());
    }

    #[test]
    fn test_rejection_is_connection_failure() {
        let err = RegistryError::handshake_rejected("/ws-x", "bad credentials");
        assert!(err.is_connection_failure());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_connected_message() {
        let err = RegistryError::not_connected("/ws-x");
        assert_eq!(err.to_string(), "endpoint /ws-x is not connected");
    }

    #[test]
    fn test_transport_failure_into_error() {
        let rejected = TransportFailure::Rejected("401".to_string()).into_error("/ws-a");
        assert!(matches!(rejected, RegistryError::HandshakeRejected { .. }));

        let io = TransportFailure::Io("reset".to_string()).into_error("/ws-a");
        assert_eq!(io, RegistryError::transport("/ws-a", "reset"));
    }

    #[test]
    fn test_decode_error_display() {
        let err = MessageDecodeError::new("/topic/a", "expected value", "{oops");
        assert!(err.to_string().contains("/topic/a"));
        assert_eq!(err.raw, "{oops");
    }

    #[test]
    fn test_stomp_error_display() {
        let err = StompError::FrameTooLarge { size: 10, limit: 5 };
        assert_eq!(err.to_string(), "frame of 10 bytes exceeds limit of 5 bytes");
    }
}
