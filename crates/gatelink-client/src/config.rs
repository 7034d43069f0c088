//! Runtime client configuration.

use std::time::Duration;

use gatelink_core::TransportError;
use gatelink_settings::GatelinkSettings;
use serde_json::Value;

use crate::queue::QueuePolicy;

/// Client descriptor sent in the `connect` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client id.
    pub id: String,
    /// Client version.
    pub version: String,
    /// Platform string.
    pub platform: String,
    /// Client mode.
    pub mode: String,
    /// Human-readable name.
    pub display_name: String,
}

/// Everything the handshake asks the gateway for.
#[derive(Clone, Debug)]
pub struct ConnectProfile {
    /// Client descriptor.
    pub client: ClientInfo,
    /// Role to connect as.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Capability flags.
    pub caps: Vec<String>,
    /// Requested commands.
    pub commands: Vec<String>,
    /// Requested permissions.
    pub permissions: Value,
    /// User agent, if reported.
    pub user_agent: Option<String>,
    /// Lowest protocol version spoken.
    pub min_protocol: u32,
    /// Highest protocol version spoken.
    pub max_protocol: u32,
}

impl Default for ConnectProfile {
    fn default() -> Self {
        Self::from(&gatelink_settings::ClientSettings::default())
    }
}

impl From<&gatelink_settings::ClientSettings> for ConnectProfile {
    fn from(s: &gatelink_settings::ClientSettings) -> Self {
        Self {
            client: ClientInfo {
                id: s.id.clone(),
                version: s.version.clone(),
                platform: s.platform.clone(),
                mode: s.mode.clone(),
                display_name: s.display_name.clone(),
            },
            role: s.role.clone(),
            scopes: s.scopes.clone(),
            caps: s.caps.clone(),
            commands: s.commands.clone(),
            permissions: s.permissions.clone(),
            user_agent: s.user_agent.clone(),
            min_protocol: s.min_protocol,
            max_protocol: s.max_protocol,
        }
    }
}

/// Reconnection policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect automatically after the socket closes.
    pub enabled: bool,
    /// Base delay, grown by 1.5x per attempt.
    pub base_interval: Duration,
    /// Attempts before the connection becomes `Failed`.
    pub max_attempts: u32,
}

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Auth token.
    pub token: Option<String>,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Heartbeat ping interval. Zero disables pings.
    pub heartbeat_interval: Duration,
    /// Default per-request timeout.
    pub request_timeout: Duration,
    /// Deadline for the `connect.challenge` event.
    pub challenge_timeout: Duration,
    /// Deadline for the `connect` response.
    pub connect_timeout: Duration,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Which methods may be queued while disconnected.
    pub queue_policy: QueuePolicy,
    /// Handshake profile.
    pub profile: ConnectProfile,
}

impl ClientConfig {
    /// Configuration with defaults for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        let mut config = Self::from(&GatelinkSettings::default());
        config.url = url.into();
        config
    }

    /// Set the auth token.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect.enabled = enabled;
        self
    }

    /// Base reconnect delay.
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect.base_interval = interval;
        self
    }

    /// Reconnect attempts before giving up.
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    /// Heartbeat interval. `Duration::ZERO` disables pings.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Default request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Challenge-wait timeout.
    #[must_use]
    pub fn challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = timeout;
        self
    }

    /// Connect-response timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Outbound queue capacity (at least 1).
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Handshake profile.
    #[must_use]
    pub fn profile(mut self, profile: ConnectProfile) -> Self {
        self.profile = profile;
        self
    }

    /// URL to open, with the token as the `auth` query parameter.
    pub fn connect_url(&self) -> Result<String, TransportError> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", self.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            let _ = url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url.into())
    }
}

impl From<&GatelinkSettings> for ClientConfig {
    fn from(s: &GatelinkSettings) -> Self {
        let g = &s.gateway;
        Self {
            url: g.url.clone(),
            token: g.token.clone(),
            reconnect: ReconnectPolicy {
                enabled: g.reconnect,
                base_interval: Duration::from_millis(g.reconnect_interval_ms),
                max_attempts: g.max_reconnect_attempts,
            },
            heartbeat_interval: Duration::from_millis(g.heartbeat_interval_ms),
            request_timeout: Duration::from_millis(g.request_timeout_ms),
            challenge_timeout: Duration::from_millis(g.challenge_timeout_ms),
            connect_timeout: Duration::from_millis(g.connect_timeout_ms),
            queue_capacity: g.queue_capacity.max(1),
            queue_policy: QueuePolicy::default(),
            profile: ConnectProfile::from(&s.client),
        }
    }
}
