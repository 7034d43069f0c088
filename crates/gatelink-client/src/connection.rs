//! Connection lifecycle: socket task, state machine, reconnection.
//!
//! Each `connect()` bumps a generation counter, cancels the previous
//! generation's token and spawns one task that owns the socket for that
//! generation. Every state change carries the generation it was computed
//! for and is dropped if a newer `connect()`/`disconnect()` has happened, so
//! a superseded task can never act on its replacement. Timers (challenge,
//! connect, backoff, heartbeat) are all scoped to that task and die with its
//! token.
//!
//! Lock order is `lifecycle` → `gate`.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use gatelink_core::errors::CLOSE_NORMAL;
use gatelink_core::frames::Frame;
use gatelink_core::ids::RequestIdGenerator;
use gatelink_core::text::close_reason;
use gatelink_core::{GatewayError, HandshakeError, TransportError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::events::EventRouter;
use crate::handshake::{ConnectContext, HandshakeSession, HandshakeStep};
use crate::heartbeat::run_heartbeat;
use crate::identity::DeviceIdentityProvider;
use crate::locale::{Language, LocaleResolver, handshake_reason};
use crate::pending::PendingRequests;
use crate::queue::{OutboundQueue, QueuedMessage};
use crate::state::{ConnectionEvent, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;

/// Work handed to the socket task's writer.
#[derive(Debug)]
pub enum Outbound {
    /// A serialized request.
    Frame(QueuedMessage),
    /// A keepalive ping.
    Ping,
}

pub(crate) struct Lifecycle {
    pub(crate) state: ConnectionState,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
}

struct Writer {
    generation: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

pub(crate) struct Gate {
    writer: Option<Writer>,
    pub(crate) queue: OutboundQueue,
}

/// State shared by the client handle and its socket task.
pub(crate) struct Shared {
    pub(crate) config: RwLock<ClientConfig>,
    pub(crate) lifecycle: Mutex<Lifecycle>,
    pub(crate) gate: Mutex<Gate>,
    pub(crate) pending: PendingRequests,
    pub(crate) router: EventRouter,
    pub(crate) ids: RequestIdGenerator,
    pub(crate) identity: Arc<dyn DeviceIdentityProvider>,
    pub(crate) locale: Arc<dyn LocaleResolver>,
    pub(crate) hello: Mutex<Option<Value>>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) events_tx: broadcast::Sender<ConnectionEvent>,
}

/// Result of submitting a request frame.
pub(crate) enum Submitted {
    /// Handed to the live socket.
    Sent,
    /// Buffered until the next successful handshake.
    Queued,
}

enum SocketOutcome {
    Cancelled,
    Lost(TransportError),
    HandshakeFailed { error: HandshakeError, reason: String },
    Invalid(TransportError),
}

impl Shared {
    pub(crate) fn new(
        config: ClientConfig,
        identity: Arc<dyn DeviceIdentityProvider>,
        locale: Arc<dyn LocaleResolver>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(64);
        let queue = OutboundQueue::new(config.queue_capacity);
        Self {
            config: RwLock::new(config),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Disconnected,
                generation: 0,
                cancel: CancellationToken::new(),
            }),
            gate: Mutex::new(Gate {
                writer: None,
                queue,
            }),
            pending: PendingRequests::new(),
            router: EventRouter::new(),
            ids: RequestIdGenerator::new(),
            identity,
            locale,
            hello: Mutex::new(None),
            state_tx,
            events_tx,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    /// Change state under an already-held lifecycle lock.
    pub(crate) fn set_state(&self, lifecycle: &mut Lifecycle, to: ConnectionState) {
        let from = lifecycle.state;
        if from == to {
            return;
        }
        lifecycle.state = to;
        info!(from = %from, to = %to, generation = lifecycle.generation, "connection state changed");
        let _ = self.state_tx.send_replace(to);
        let _ = self.events_tx.send(ConnectionEvent::StateChanged { from, to });
    }

    /// Change state if `generation` is still current.
    fn transition(&self, generation: u64, to: ConnectionState) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return false;
        }
        self.set_state(&mut lifecycle, to);
        true
    }

    /// Start a new generation: cancel the old task and detach its writer.
    pub(crate) fn begin_generation(&self, lifecycle: &mut Lifecycle) -> (u64, CancellationToken) {
        lifecycle.cancel.cancel();
        lifecycle.generation += 1;
        lifecycle.cancel = CancellationToken::new();
        self.gate.lock().writer = None;
        (lifecycle.generation, lifecycle.cancel.clone())
    }

    fn broadcast(&self, event: ConnectionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Send, queue, or refuse a serialized request.
    pub(crate) fn submit(&self, id: &str, method: &str, text: String) -> Result<Submitted, GatewayError> {
        let queueable = self.config.read().queue_policy.is_queueable(method);
        let mut message = QueuedMessage {
            id: id.to_owned(),
            method: method.to_owned(),
            text,
            seq: 0,
        };

        let mut gate = self.gate.lock();
        if let Some(writer) = &gate.writer {
            match writer.tx.send(Outbound::Frame(message)) {
                Ok(()) => return Ok(Submitted::Sent),
                Err(mpsc::error::SendError(outbound)) => {
                    let Outbound::Frame(returned) = outbound else {
                        return Err(GatewayError::NotReady {
                            method: method.to_owned(),
                        });
                    };
                    message = returned;
                }
            }
        }
        if !queueable {
            return Err(GatewayError::NotReady {
                method: method.to_owned(),
            });
        }
        let evicted = gate.queue.push(message.id, message.method, message.text);
        let depth = gate.queue.len();
        drop(gate);

        debug!(id, method, depth, "request queued until connected");
        if let Some(evicted) = evicted {
            metrics::counter!("gateway_queue_evictions_total").increment(1);
            warn!(
                id = %evicted.id,
                method = %evicted.method,
                seq = evicted.seq,
                "outbound queue full, evicting oldest request"
            );
            let _ = self.pending.reject(
                &evicted.id,
                GatewayError::QueueOverflow {
                    method: evicted.method,
                },
            );
        }
        Ok(Submitted::Queued)
    }

    /// Reject everything still queued.
    pub(crate) fn reject_queued(&self, reason: &str) {
        let drained = self.gate.lock().queue.drain();
        for message in drained {
            let _ = self.pending.reject(
                &message.id,
                GatewayError::ConnectionClosed {
                    reason: reason.to_owned(),
                },
            );
        }
    }

    /// Deliver a non-handshake frame.
    fn route(&self, frame: Frame) {
        match frame {
            Frame::Response(res) => {
                let _ = self.pending.settle(res);
            }
            Frame::Event(event) => {
                let _ = self.router.dispatch(&event);
            }
            Frame::Request(req) => {
                debug!(method = %req.method, "ignoring request frame from gateway");
            }
        }
    }

    /// Handshake done: flush the queue FIFO, then let callers write directly.
    fn go_online(&self, generation: u64, tx: &mpsc::UnboundedSender<Outbound>, hello: Value) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return false;
        }
        *self.hello.lock() = Some(hello);
        {
            let mut gate = self.gate.lock();
            let flushed = gate.queue.drain();
            if !flushed.is_empty() {
                info!(count = flushed.len(), "flushing queued requests");
            }
            for message in flushed {
                let _ = tx.send(Outbound::Frame(message));
            }
            gate.writer = Some(Writer {
                generation,
                tx: tx.clone(),
            });
        }
        self.set_state(&mut lifecycle, ConnectionState::Connected);
        true
    }

    /// Socket gone: detach the writer and deal with frames never written.
    ///
    /// Unsent queueable frames go back to the front of the queue while the
    /// connection may still come back; everything else is rejected. Frames
    /// already written stay pending until their response or timeout.
    fn go_offline(&self, generation: u64, rx: &mut mpsc::UnboundedReceiver<Outbound>, mut unsent: Vec<QueuedMessage>) {
        rx.close();
        while let Ok(outbound) = rx.try_recv() {
            if let Outbound::Frame(message) = outbound {
                unsent.push(message);
            }
        }

        let (closed, overflow) = {
            let lifecycle = self.lifecycle.lock();
            let may_resume = !matches!(
                lifecycle.state,
                ConnectionState::Disconnected | ConnectionState::Failed
            );
            let policy = self.config.read().queue_policy.clone();
            let mut gate = self.gate.lock();
            if gate.writer.as_ref().is_some_and(|w| w.generation == generation) {
                gate.writer = None;
            }

            let (mut requeue, closed): (Vec<_>, Vec<_>) = unsent
                .into_iter()
                .filter(|m| self.pending.contains(&m.id))
                .partition(|m| may_resume && policy.is_queueable(&m.method));
            if !requeue.is_empty() {
                debug!(count = requeue.len(), "requeueing unsent requests");
            }
            // A newer generation may already be online.
            if let Some(writer) = &gate.writer {
                requeue = requeue
                    .into_iter()
                    .filter_map(|m| match writer.tx.send(Outbound::Frame(m)) {
                        Ok(()) => None,
                        Err(mpsc::error::SendError(Outbound::Frame(m))) => Some(m),
                        Err(mpsc::error::SendError(Outbound::Ping)) => None,
                    })
                    .collect();
            }
            (closed, gate.queue.requeue_front(requeue))
        };

        for message in closed {
            let _ = self.pending.reject(
                &message.id,
                GatewayError::ConnectionClosed {
                    reason: "socket closed before the request was sent".into(),
                },
            );
        }
        for message in overflow {
            metrics::counter!("gateway_queue_evictions_total").increment(1);
            warn!(
                id = %message.id,
                method = %message.method,
                seq = message.seq,
                "in-flight request dropped, queue full"
            );
            let _ = self.pending.reject(
                &message.id,
                GatewayError::QueueOverflow {
                    method: message.method,
                },
            );
        }
    }

    /// Terminal failure for this generation.
    fn fail(&self, generation: u64, event: ConnectionEvent, reason: &str) {
        if self.transition(generation, ConnectionState::Failed) {
            self.broadcast(event);
            self.reject_queued(reason);
        }
    }
}

/// Drive one connection generation until cancelled or terminal.
#[instrument(skip(shared, cancel))]
pub(crate) async fn run(shared: Arc<Shared>, generation: u64, cancel: CancellationToken) {
    let mut backoff = {
        let config = shared.config.read();
        Backoff::new(config.reconnect.base_interval, config.reconnect.max_attempts)
    };

    loop {
        match run_socket(&shared, generation, &cancel, &mut backoff).await {
            SocketOutcome::Cancelled => return,
            SocketOutcome::Invalid(error) => {
                warn!(error = %error, "gateway URL rejected");
                shared.fail(generation, ConnectionEvent::TransportFailed(error), "invalid gateway URL");
                return;
            }
            SocketOutcome::HandshakeFailed { error, reason } => {
                warn!(code = error.close_code(), reason = %reason, "handshake failed");
                shared.fail(
                    generation,
                    ConnectionEvent::HandshakeFailed {
                        error,
                        reason: reason.clone(),
                    },
                    &reason,
                );
                return;
            }
            SocketOutcome::Lost(error) => {
                if cancel.is_cancelled() {
                    return;
                }
                warn!(error = %error, "gateway connection lost");
                shared.broadcast(ConnectionEvent::TransportFailed(error));
            }
        }

        let reconnect = shared.config.read().reconnect.enabled;
        if !reconnect {
            if shared.transition(generation, ConnectionState::Disconnected) {
                shared.reject_queued("connection closed");
            }
            return;
        }

        let Some(delay) = backoff.next_delay() else {
            let attempts = backoff.attempts();
            warn!(attempts, "reconnect attempts exhausted");
            shared.fail(
                generation,
                ConnectionEvent::ReconnectExhausted { attempts },
                "reconnect attempts exhausted",
            );
            return;
        };
        if !shared.transition(generation, ConnectionState::Reconnecting) {
            return;
        }
        metrics::counter!("gateway_reconnects_total").increment(1);
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        info!(attempt = backoff.attempts(), delay_ms, "scheduling reconnect");

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        if !shared.transition(generation, ConnectionState::Connecting) {
            return;
        }
    }
}

async fn run_socket(
    shared: &Arc<Shared>,
    generation: u64,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> SocketOutcome {
    let config = shared.config.read().clone();
    let url = match config.connect_url() {
        Ok(url) => url,
        Err(error) => return SocketOutcome::Invalid(error),
    };

    debug!(url = %config.url, "opening gateway socket");
    let ws = tokio::select! {
        () = cancel.cancelled() => return SocketOutcome::Cancelled,
        result = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str())) => match result {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return SocketOutcome::Lost(TransportError::Open(e.to_string())),
            Err(_) => {
                return SocketOutcome::Lost(TransportError::Open(format!(
                    "timed out after {}ms opening socket",
                    config.connect_timeout.as_millis()
                )));
            }
        },
    };
    let (mut sink, mut stream) = ws.split();

    let locale = shared.locale.active_locale();
    let lang = Language::for_locale(locale.as_deref());
    let mut session = HandshakeSession::new(
        config.challenge_timeout,
        config.connect_timeout,
        Instant::now(),
    );

    let hello = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                close(&mut sink, CLOSE_NORMAL, "client disconnect").await;
                return SocketOutcome::Cancelled;
            }
            () = tokio::time::sleep_until(session.deadline()) => {
                let error = session.timeout_error();
                return handshake_failed(&mut sink, error, lang).await;
            }
            msg = stream.next() => {
                let text = match incoming(msg) {
                    Incoming::Text(text) => text,
                    Incoming::Skip => continue,
                    Incoming::Gone(error) => return SocketOutcome::Lost(error),
                };
                let Some(frame) = parse_frame(&text) else { continue };
                let step = {
                    let ctx = ConnectContext {
                        profile: &config.profile,
                        token: config.token.as_deref(),
                        locale: locale.as_deref(),
                        identity: shared.identity.as_ref(),
                        ids: &shared.ids,
                    };
                    session.on_frame(frame, &ctx, Instant::now())
                };
                match step {
                    HandshakeStep::Send(request) => {
                        if let Err(e) = sink.send(Message::Text(request.into())).await {
                            return SocketOutcome::Lost(TransportError::Io(e.to_string()));
                        }
                    }
                    HandshakeStep::Ignored => {}
                    HandshakeStep::Passthrough(frame) => shared.route(frame),
                    HandshakeStep::Complete(hello) => break hello,
                    HandshakeStep::Failed(error) => {
                        return handshake_failed(&mut sink, error, lang).await;
                    }
                }
            }
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    if !shared.go_online(generation, &tx, hello) {
        close(&mut sink, CLOSE_NORMAL, "superseded").await;
        return SocketOutcome::Cancelled;
    }
    backoff.reset();

    let heartbeat_cancel = cancel.child_token();
    let heartbeat = tokio::spawn(run_heartbeat(
        tx,
        config.heartbeat_interval,
        heartbeat_cancel.clone(),
    ));

    let mut unsent = Vec::new();
    let outcome = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                close(&mut sink, CLOSE_NORMAL, "client disconnect").await;
                break SocketOutcome::Cancelled;
            }
            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(message)) => {
                    if let Err(e) = sink.send(Message::Text(message.text.clone().into())).await {
                        unsent.push(message);
                        break SocketOutcome::Lost(TransportError::Io(e.to_string()));
                    }
                }
                Some(Outbound::Ping) => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                        debug!(error = %e, "heartbeat ping skipped");
                    }
                }
                None => break SocketOutcome::Cancelled,
            },
            msg = stream.next() => match incoming(msg) {
                Incoming::Text(text) => {
                    if let Some(frame) = parse_frame(&text) {
                        shared.route(frame);
                    }
                }
                Incoming::Skip => {}
                Incoming::Gone(error) => break SocketOutcome::Lost(error),
            },
        }
    };

    heartbeat_cancel.cancel();
    let _ = heartbeat.await;
    shared.go_offline(generation, &mut rx, unsent);
    outcome
}

enum Incoming {
    Text(String),
    Skip,
    Gone(TransportError),
}

fn incoming(msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) -> Incoming {
    match msg {
        Some(Ok(Message::Text(text))) => Incoming::Text(text.as_str().to_owned()),
        Some(Ok(Message::Close(frame))) => {
            let (code, reason) = frame.map_or((1005, String::new()), |f| {
                (u16::from(f.code), f.reason.as_str().to_owned())
            });
            Incoming::Gone(TransportError::Closed { code, reason })
        }
        Some(Ok(_)) => Incoming::Skip,
        Some(Err(e)) => Incoming::Gone(TransportError::Io(e.to_string())),
        None => Incoming::Gone(TransportError::Closed {
            code: 1006,
            reason: "connection dropped".into(),
        }),
    }
}

fn parse_frame(text: &str) -> Option<Frame> {
    match Frame::parse(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "dropping unparseable frame");
            None
        }
    }
}

async fn handshake_failed(sink: &mut WsSink, error: HandshakeError, lang: Language) -> SocketOutcome {
    let reason = close_reason(&handshake_reason(lang, &error));
    close(sink, error.close_code(), &reason).await;
    SocketOutcome::HandshakeFailed { error, reason }
}

async fn close(sink: &mut WsSink, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: close_reason(reason).into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(code, error = %e, "close frame not sent");
    }
    let _ = sink.close().await;
}
