//! # gatelink
//!
//! Command-line client for the gateway: call a method, stream events, or
//! show this device's identity.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gatelink_client::state::{ConnectionEvent, ConnectionState};
use gatelink_client::{
    ClientConfig, DeviceIdentityProvider, EnvLocale, FileIdentityStore, FixedLocale,
    GatewayClient, LocaleResolver,
};
use gatelink_settings::GatelinkSettings;
use serde_json::Value;
use tokio::sync::broadcast;

/// Gateway command-line client.
#[derive(Parser, Debug)]
#[command(name = "gatelink", version, about = "Gateway RPC client")]
struct Cli {
    /// Gateway WebSocket URL (overrides settings).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Auth token (overrides settings).
    #[arg(long, global = true)]
    token: Option<String>,

    /// Settings file (default `~/.gatelink/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `info` or `gatelink_client=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a gateway method and print the result.
    Call {
        /// Method name, e.g. `sessions.list`.
        method: String,
        /// JSON params object.
        #[arg(long)]
        params: Option<String>,
        /// Request timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Alternative method names to try if the gateway does not know `method`.
        #[arg(long, value_delimiter = ',')]
        fallback: Vec<String>,
    },
    /// Print gateway events as JSON lines until interrupted.
    Watch {
        /// Only print events with this name.
        #[arg(long)]
        event: Option<String>,
    },
    /// Show (creating if needed) this device's identity.
    Identity,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(gatelink_settings::settings_path);
    let settings = gatelink_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    if settings.logging.json {
        gatelink_core::logging::init_json_subscriber(level);
    } else {
        gatelink_core::logging::init_subscriber(level);
    }

    let identity_path = settings.identity.resolved_path();
    let identity = Arc::new(FileIdentityStore::new(identity_path.clone()));

    match cli.command {
        Command::Identity => {
            let device = identity
                .load_or_create()
                .with_context(|| format!("Failed to load identity from {}", identity_path.display()))?;
            println!("deviceId:  {}", device.device_id());
            println!("publicKey: {}", device.public_key());
            println!("path:      {}", identity_path.display());
            Ok(())
        }
        Command::Call {
            method,
            params,
            timeout_ms,
            fallback,
        } => {
            let params = params
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .context("--params must be valid JSON")?;
            let client = build_client(&settings, &cli.url, &cli.token, identity);
            connect(&client, &settings).await?;

            let timeout = timeout_ms.map(Duration::from_millis);
            let result = if fallback.is_empty() {
                match timeout {
                    Some(t) => client.call_with_timeout(&method, params, t).await,
                    None => client.call(&method, params).await,
                }
            } else {
                let methods: Vec<&str> = std::iter::once(method.as_str())
                    .chain(fallback.iter().map(String::as_str))
                    .collect();
                client.call_with_fallback(&methods, &[params], timeout).await
            };
            client.disconnect();

            let value = result.with_context(|| format!("{method} failed"))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Watch { event } => {
            let client = build_client(&settings, &cli.url, &cli.token, identity);
            let print = |frame: &gatelink_client::EventFrame| match serde_json::to_string(frame) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            };
            let _subscription = match event {
                Some(name) => client.on(name, print),
                None => client.on_any(print),
            };
            let mut events = client.connection_events();
            connect(&client, &settings).await?;

            loop {
                tokio::select! {
                    signal = tokio::signal::ctrl_c() => {
                        signal.context("Failed to listen for ctrl-c")?;
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(ConnectionEvent::StateChanged { to: ConnectionState::Failed, .. }) => {
                            bail!("gateway connection failed: {}", failure_reason(&mut events));
                        }
                        Ok(ConnectionEvent::StateChanged { to, .. }) => {
                            tracing::info!(state = %to, "connection state");
                        }
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            client.disconnect();
            Ok(())
        }
    }
}

fn build_client(
    settings: &GatelinkSettings,
    url: &Option<String>,
    token: &Option<String>,
    identity: Arc<FileIdentityStore>,
) -> GatewayClient {
    let mut config = ClientConfig::from(settings);
    if let Some(url) = url {
        config.url.clone_from(url);
    }
    if let Some(token) = token {
        config.token = Some(token.clone());
    }
    let locale: Arc<dyn LocaleResolver> = match &settings.client.locale {
        Some(tag) => Arc::new(FixedLocale::new(tag.clone())),
        None => Arc::new(EnvLocale),
    };
    GatewayClient::builder(config)
        .identity(identity)
        .locale(locale)
        .build()
}

/// Connect and wait for the handshake to finish.
async fn connect(client: &GatewayClient, settings: &GatelinkSettings) -> Result<()> {
    let mut states = client.watch_state();
    let mut events = client.connection_events();
    client.connect(None, None).context("Failed to start connection")?;

    let g = &settings.gateway;
    let budget = Duration::from_millis(g.challenge_timeout_ms + g.connect_timeout_ms + 5_000);
    let wait = async {
        loop {
            match *states.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed => {
                    bail!("gateway connection failed: {}", failure_reason(&mut events))
                }
                ConnectionState::Reconnecting => {
                    tracing::warn!("gateway unreachable, retrying");
                }
                ConnectionState::Disconnected | ConnectionState::Connecting => {}
            }
            states
                .changed()
                .await
                .context("connection task stopped")?;
        }
    };
    tokio::time::timeout(budget, wait)
        .await
        .context("Timed out waiting for the gateway handshake")?
}

/// Most recent failure reason buffered on `events`.
fn failure_reason(events: &mut broadcast::Receiver<ConnectionEvent>) -> String {
    let mut reason = String::from("unknown error");
    while let Ok(event) = events.try_recv() {
        match event {
            ConnectionEvent::HandshakeFailed { reason: r, .. } => reason = r,
            ConnectionEvent::TransportFailed(e) => reason = e.to_string(),
            ConnectionEvent::ReconnectExhausted { attempts } => {
                reason = format!("gave up after {attempts} reconnect attempts");
            }
            ConnectionEvent::StateChanged { .. } => {}
        }
    }
    reason
}
