//! Error taxonomy for the gateway client.
//!
//! - [`GatewayError`]: what a single `call` (or the connection API) returns
//! - [`HandshakeError`]: why a device handshake failed, with its close code
//! - [`TransportError`]: socket-level failures that drive reconnection
//!
//! Per-request errors (`NotReady`, `RequestTimeout`, `Remote`,
//! `CompatibilityExhausted`) reject only the call that produced them.
//! Transport and handshake errors belong to the connection and are broadcast
//! to observers rather than raised on unrelated calls.

use thiserror::Error;

use crate::frames::RemoteError;

/// Close code: the gateway rejected the `connect` request.
pub const CLOSE_CONNECT_REJECTED: u16 = 4008;
/// Close code: no `connect.challenge` event arrived in time.
pub const CLOSE_CHALLENGE_TIMEOUT: u16 = 4009;
/// Close code: no response to `connect` arrived in time.
pub const CLOSE_CONNECT_TIMEOUT: u16 = 4010;
/// Close code: explicit client disconnect.
pub const CLOSE_NORMAL: u16 = 1000;

/// Error returned from gateway client operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The connection is not `Connected` and the method may not be queued.
    #[error("Connection not ready: {method}")]
    NotReady {
        /// Method that was rejected.
        method: String,
    },

    /// No matching response arrived before the call's deadline.
    #[error("request timed out after {timeout_ms}ms: {method}")]
    RequestTimeout {
        /// Method that timed out.
        method: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// The gateway answered with an error body.
    #[error("{0}")]
    Remote(RemoteError),

    /// Every compatibility candidate failed; displays the last error.
    #[error("{last}")]
    CompatibilityExhausted {
        /// `method` names attempted, in order.
        attempts: Vec<String>,
        /// Error from the final attempt.
        #[source]
        last: Box<GatewayError>,
    },

    /// No candidate methods are known for a logical operation.
    #[error("no candidate methods for operation: {operation}")]
    NoCandidates {
        /// Logical operation, or the empty string for an empty list.
        operation: String,
    },

    /// The request was evicted from a full outbound queue.
    #[error("outbound queue full, dropped request: {method}")]
    QueueOverflow {
        /// Method of the evicted request.
        method: String,
    },

    /// The connection went away before the request could be sent.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Why the connection closed.
        reason: String,
    },

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Device handshake failure.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Device identity could not be loaded or used.
    #[error("device identity error: {message}")]
    Identity {
        /// Description.
        message: String,
    },

    /// A frame could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// The remote error body, looking through compatibility exhaustion.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            Self::CompatibilityExhausted { last, .. } => last.remote(),
            _ => None,
        }
    }

    /// Unwrap compatibility exhaustion to the last underlying error.
    #[must_use]
    pub fn into_last(self) -> Self {
        match self {
            Self::CompatibilityExhausted { last, .. } => last.into_last(),
            other => other,
        }
    }

    /// Whether this error is scoped to one call (the connection stays healthy).
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. }
                | Self::RequestTimeout { .. }
                | Self::Remote(_)
                | Self::CompatibilityExhausted { .. }
                | Self::NoCandidates { .. }
                | Self::QueueOverflow { .. }
                | Self::Serialization(_)
        )
    }
}

impl From<RemoteError> for GatewayError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

/// Why a device handshake failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// No `connect.challenge` event before the challenge deadline.
    #[error("missing connect challenge")]
    ChallengeTimeout,

    /// No response to `connect` before the connect deadline.
    #[error("connect response timed out")]
    ConnectTimeout,

    /// Device pairing must be approved by an operator.
    #[error("{message}")]
    PairingRequired {
        /// Pairing request identifier to approve.
        request_id: String,
        /// Actionable message.
        message: String,
    },

    /// The gateway rejected the `connect` request.
    #[error("{message}")]
    Rejected {
        /// Server message, or a generic handshake-failure message.
        message: String,
        /// Server error code, if any.
        code: Option<String>,
    },

    /// The device identity could not sign the challenge.
    #[error("device identity unavailable: {message}")]
    Identity {
        /// Description.
        message: String,
    },
}

impl HandshakeError {
    /// Documented close code for this failure.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::ChallengeTimeout => CLOSE_CHALLENGE_TIMEOUT,
            Self::ConnectTimeout => CLOSE_CONNECT_TIMEOUT,
            Self::PairingRequired { .. } | Self::Rejected { .. } | Self::Identity { .. } => {
                CLOSE_CONNECT_REJECTED
            }
        }
    }
}

/// Socket-level failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("failed to open socket: {0}")]
    Open(String),

    /// The socket closed.
    #[error("socket closed ({code}): {reason}")]
    Closed {
        /// Close code (1006 when the peer vanished without a close frame).
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// Read or write failed on an open socket.
    #[error("socket I/O error: {0}")]
    Io(String),

    /// The configured URL is not a valid WebSocket URL.
    #[error("invalid gateway URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn not_ready_message_names_method() {
        let err = GatewayError::NotReady {
            method: "agent.abort".into(),
        };
        assert_eq!(err.to_string(), "Connection not ready: agent.abort");
    }

    #[test]
    fn timeout_message() {
        let err = GatewayError::RequestTimeout {
            method: "sessions.list".into(),
            timeout_ms: 15_000,
        };
        assert_eq!(err.to_string(), "request timed out after 15000ms: sessions.list");
    }

    #[test]
    fn exhausted_displays_last_error() {
        let err = GatewayError::CompatibilityExhausted {
            attempts: vec!["cron.list".into(), "crons.list".into()],
            last: Box::new(GatewayError::Remote(RemoteError::new("method not found"))),
        };
        assert_eq!(err.to_string(), "method not found");
        assert_eq!(err.remote().unwrap().message, "method not found");
        assert!(std::error::Error::source(&err).is_some());
        assert_matches!(err.into_last(), GatewayError::Remote(_));
    }

    #[test]
    fn request_scoped_classification() {
        assert!(GatewayError::Remote(RemoteError::new("x")).is_request_scoped());
        assert!(
            !GatewayError::Handshake(HandshakeError::ChallengeTimeout).is_request_scoped()
        );
        assert!(
            !GatewayError::Transport(TransportError::Io("reset".into())).is_request_scoped()
        );
    }

    #[test]
    fn handshake_close_codes_are_distinct() {
        let challenge = HandshakeError::ChallengeTimeout.close_code();
        let connect = HandshakeError::ConnectTimeout.close_code();
        let rejected = HandshakeError::Rejected {
            message: "bad token".into(),
            code: None,
        }
        .close_code();
        assert_eq!(challenge, CLOSE_CHALLENGE_TIMEOUT);
        assert_eq!(connect, CLOSE_CONNECT_TIMEOUT);
        assert_eq!(rejected, CLOSE_CONNECT_REJECTED);
        assert_ne!(challenge, connect);
        assert_ne!(connect, rejected);
    }

    #[test]
    fn pairing_uses_rejected_code() {
        let err = HandshakeError::PairingRequired {
            request_id: "p-1".into(),
            message: "approve p-1".into(),
        };
        assert_eq!(err.close_code(), CLOSE_CONNECT_REJECTED);
        assert_eq!(err.to_string(), "approve p-1");
    }

    #[test]
    fn handshake_error_converts_into_gateway_error() {
        let err: GatewayError = HandshakeError::ConnectTimeout.into();
        assert_matches!(err, GatewayError::Handshake(HandshakeError::ConnectTimeout));
    }
}
