//! Public gateway client handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatelink_core::frames::RequestFrame;
use gatelink_core::{EventFrame, GatewayError, TransportError};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, instrument, warn};

use crate::compat::{self, CompatTable, ParamShape, RpcCaller};
use crate::config::ClientConfig;
use crate::connection::{self, Shared, Submitted};
use crate::events::SubscriptionId;
use crate::identity::{DeviceIdentityProvider, EphemeralIdentity};
use crate::locale::{EnvLocale, LocaleResolver};
use crate::state::{ConnectionEvent, ConnectionState};

/// Builder for [`GatewayClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    identity: Arc<dyn DeviceIdentityProvider>,
    locale: Arc<dyn LocaleResolver>,
    compat: CompatTable,
}

impl ClientBuilder {
    /// Device identity provider (default: in-memory ephemeral key).
    #[must_use]
    pub fn identity(mut self, identity: Arc<dyn DeviceIdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// Locale resolver (default: POSIX environment).
    #[must_use]
    pub fn locale(mut self, locale: Arc<dyn LocaleResolver>) -> Self {
        self.locale = locale;
        self
    }

    /// Logical operation table used by [`GatewayClient::call_op`].
    #[must_use]
    pub fn compat_table(mut self, table: CompatTable) -> Self {
        self.compat = table;
        self
    }

    /// Build a disconnected client.
    pub fn build(self) -> GatewayClient {
        GatewayClient {
            shared: Arc::new(Shared::new(self.config, self.identity, self.locale)),
            compat: self.compat,
        }
    }
}

/// Client for one gateway connection.
///
/// Dropping the client stops its background connection task.
pub struct GatewayClient {
    shared: Arc<Shared>,
    compat: CompatTable,
}

impl GatewayClient {
    /// Client with default identity and locale providers.
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a client.
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            identity: Arc::new(EphemeralIdentity::new()),
            locale: Arc::new(EnvLocale),
            compat: CompatTable::default(),
        }
    }

    /// Open the connection, replacing any existing one.
    ///
    /// `url` and `token` update the stored configuration when given. Returns
    /// once the connection task is started; watch [`Self::watch_state`] for
    /// `Connected`. Must be called within a tokio runtime.
    #[instrument(skip(self, token))]
    pub fn connect(&self, url: Option<&str>, token: Option<&str>) -> Result<(), GatewayError> {
        {
            let mut config = self.shared.config.write();
            let mut next = config.clone();
            if let Some(url) = url {
                next.url = url.to_owned();
            }
            if let Some(token) = token {
                next.token = Some(token.to_owned());
            }
            let _ = next.connect_url()?;
            *config = next;
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Open(format!("no tokio runtime: {e}")))?;

        let mut lifecycle = self.shared.lifecycle.lock();
        let (generation, cancel) = self.shared.begin_generation(&mut lifecycle);
        self.shared.set_state(&mut lifecycle, ConnectionState::Connecting);
        drop(lifecycle);

        let _ = handle.spawn(connection::run(self.shared.clone(), generation, cancel));
        Ok(())
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Queued requests are rejected; requests already sent keep waiting for
    /// their response or timeout.
    #[instrument(skip(self))]
    pub fn disconnect(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        let _ = self.shared.begin_generation(&mut lifecycle);
        self.shared.set_state(&mut lifecycle, ConnectionState::Disconnected);
        drop(lifecycle);
        self.shared.reject_queued("connection closed");
    }

    /// Call `method` with the default timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, GatewayError> {
        let timeout = self.shared.config.read().request_timeout;
        self.call_with_timeout(method, params, timeout).await
    }

    /// Call `method`, failing with `RequestTimeout` after `timeout`.
    ///
    /// While not connected, queueable methods wait in the outbound queue
    /// (their timeout still runs); other methods fail with `NotReady`.
    #[instrument(skip(self, params, timeout), fields(id = tracing::field::Empty))]
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let id = self.shared.ids.next_id();
        let _ = tracing::Span::current().record("id", id.as_str());
        let text = RequestFrame::new(&id, method, params).to_text()?;

        let rx = self.shared.pending.register(&id, method);
        let guard = PendingGuard {
            shared: &self.shared,
            id: &id,
        };
        metrics::counter!("gateway_requests_total").increment(1);
        match self.shared.submit(&id, method, text)? {
            Submitted::Sent => debug!(method, "request sent"),
            Submitted::Queued => {}
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::ConnectionClosed {
                reason: "request abandoned".into(),
            }),
            Err(_) => {
                metrics::counter!("gateway_request_timeouts_total").increment(1);
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = timeout.as_millis() as u64;
                warn!(method, timeout_ms, "request timed out");
                Err(GatewayError::RequestTimeout {
                    method: method.to_owned(),
                    timeout_ms,
                })
            }
        };
        drop(guard);
        outcome
    }

    /// Try `(shape, method)` candidates in order, shape-major.
    ///
    /// See [`compat::call_with_fallback`].
    pub async fn call_with_fallback(
        &self,
        methods: &[&str],
        shapes: &[ParamShape],
        timeout: Option<Duration>,
    ) -> Result<Value, GatewayError> {
        compat::call_with_fallback(self, methods, shapes, timeout).await
    }

    /// Call a logical operation from the compatibility table.
    ///
    /// `value` fills the operation's aliased parameter key (one candidate
    /// shape per alias); `base` supplies fixed parameters for every shape.
    pub async fn call_op(
        &self,
        op: &str,
        value: Option<Value>,
        base: Option<Value>,
    ) -> Result<Value, GatewayError> {
        self.compat.call(self, op, value, base).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the handshake has completed on the current socket.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Stream of state changes and connection-level failures.
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Payload of the last successful `connect` response.
    pub fn hello(&self) -> Option<Value> {
        self.shared.hello.lock().clone()
    }

    /// Subscribe to events named `event`.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&EventFrame) + Send + Sync + 'static,
    {
        self.shared.router.subscribe(event, handler)
    }

    /// Subscribe to every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&EventFrame) + Send + Sync + 'static,
    {
        self.shared.router.subscribe_all(handler)
    }

    /// Remove an event subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.router.unsubscribe(id)
    }

    /// Requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Requests waiting in the outbound queue.
    pub fn queued_requests(&self) -> usize {
        self.shared.gate.lock().queue.len()
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.shared.lifecycle.lock().cancel.cancel();
    }
}

#[async_trait]
impl RpcCaller for GatewayClient {
    async fn call_rpc(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, GatewayError> {
        match timeout {
            Some(timeout) => self.call_with_timeout(method, params, timeout).await,
            None => self.call(method, params).await,
        }
    }
}

/// Clears a call's bookkeeping however the call ends (settled, timed out,
/// or its future dropped).
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let _ = self.shared.pending.remove(self.id);
        let _ = self.shared.gate.lock().queue.remove(self.id);
    }
}
