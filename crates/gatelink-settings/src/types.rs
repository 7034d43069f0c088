//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! partial settings file only needs the keys it overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatelinkSettings {
    /// Gateway connection settings.
    pub gateway: GatewaySettings,
    /// Client descriptor sent in the handshake.
    pub client: ClientSettings,
    /// Device identity storage.
    pub identity: IdentitySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Connection, reconnection, and timeout settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Auth token, sent as the `auth` query parameter and in `connect`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Reconnect automatically after the socket closes.
    pub reconnect: bool,
    /// Base reconnect delay in ms.
    pub reconnect_interval_ms: u64,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Heartbeat ping interval in ms.
    pub heartbeat_interval_ms: u64,
    /// Default per-request timeout in ms.
    pub request_timeout_ms: u64,
    /// How long to wait for `connect.challenge` in ms.
    pub challenge_timeout_ms: u64,
    /// How long to wait for the `connect` response in ms.
    pub connect_timeout_ms: u64,
    /// Maximum buffered requests while disconnected.
    pub queue_capacity: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".into(),
            token: None,
            reconnect: true,
            reconnect_interval_ms: 1_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
            request_timeout_ms: 15_000,
            challenge_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            queue_capacity: 200,
        }
    }
}

/// Client descriptor and requested authority.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Client id (e.g. `gatelink-cli`).
    pub id: String,
    /// Client version.
    pub version: String,
    /// Platform string (e.g. `linux`).
    pub platform: String,
    /// Client mode (e.g. `cli`, `ui`).
    pub mode: String,
    /// Human-readable client name.
    pub display_name: String,
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
    /// Locale override; resolved from the environment when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// User agent reported in `connect`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Lowest protocol version spoken.
    pub min_protocol: u32,
    /// Highest protocol version spoken.
    pub max_protocol: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            id: "gatelink-cli".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            platform: std::env::consts::OS.into(),
            mode: "cli".into(),
            display_name: "gatelink".into(),
            role: "operator".into(),
            scopes: vec!["operator.read".into(), "operator.write".into()],
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: Value::Object(serde_json::Map::new()),
            locale: None,
            user_agent: None,
            min_protocol: 3,
            max_protocol: 3,
        }
    }
}

/// Device identity storage settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Path of the persisted device keypair; defaults under `~/.gatelink`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl IdentitySettings {
    /// Configured path, or `~/.gatelink/identity/device.json`.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::loader::gatelink_home().join("identity").join("device.json"))
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`..`error`); `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            json: false,
        }
    }
}
