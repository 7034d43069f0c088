//! # gatelink-client
//!
//! One persistent WebSocket connection to the gateway, carrying:
//!
//! - a device-signed challenge handshake before any other traffic
//! - many concurrent requests correlated by id, each with its own timeout
//! - unsolicited events fanned out to subscribers
//! - a bounded outbound queue for read-only calls made while offline
//! - reconnection with capped exponential backoff
//! - fallback across method and parameter spellings for version skew
//!
//! ```ignore
//! let client = GatewayClient::new(ClientConfig::new("ws://127.0.0.1:18789").token("secret"));
//! client.connect(None, None)?;
//! let sessions = client.call("sessions.list", None).await?;
//! ```

#![deny(unsafe_code)]

pub mod backoff;
pub mod client;
pub mod compat;
pub mod config;
pub mod connection;
pub mod events;
pub mod handshake;
pub mod heartbeat;
pub mod identity;
pub mod locale;
pub mod pending;
pub mod queue;
pub mod state;

pub use client::{ClientBuilder, GatewayClient};
pub use compat::{CompatTable, ParamShape, RpcCaller};
pub use config::{ClientConfig, ClientInfo, ConnectProfile, ReconnectPolicy};
pub use events::{EventHandler, SubscriptionId};
pub use identity::{DeviceIdentity, DeviceIdentityProvider, EphemeralIdentity, FileIdentityStore};
pub use locale::{EnvLocale, FixedLocale, LocaleResolver};
pub use queue::QueuePolicy;
pub use state::{ConnectionEvent, ConnectionState};

pub use gatelink_core::{EventFrame, GatewayError, HandshakeError, RemoteError, TransportError};
