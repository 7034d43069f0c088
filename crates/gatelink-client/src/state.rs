//! Connection lifecycle states and observer notifications.

use std::fmt;

use gatelink_core::{HandshakeError, TransportError};

/// Lifecycle state of the gateway connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket and no automatic reconnection pending.
    Disconnected,
    /// A socket is opening or performing the handshake.
    Connecting,
    /// Handshake complete; traffic flows.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Terminal until the next explicit `connect()`.
    Failed,
}

impl ConnectionState {
    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection-level notification broadcast to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The lifecycle state changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// The socket failed or closed; reconnection may follow.
    TransportFailed(TransportError),
    /// The handshake failed; the connection is `Failed`.
    HandshakeFailed {
        /// Failure.
        error: HandshakeError,
        /// Localized human-readable reason.
        reason: String,
    },
    /// Reconnection attempts are exhausted; the connection is `Failed`.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Failed.as_str(), "failed");
    }
}
