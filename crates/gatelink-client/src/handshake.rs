//! Device-signed handshake, one session per socket.
//!
//! The session is a plain state machine: the connection task feeds it frames
//! and asks it for the current deadline, and it answers with what to do next.
//! It never touches the socket itself.
//!
//! 1. Wait for `connect.challenge` (challenge deadline).
//! 2. Sign the nonce and send `connect` exactly once; later challenges on
//!    the same socket are ignored.
//! 3. Wait for the matching response (connect deadline).

use std::time::Duration;

use gatelink_core::frames::{CONNECT_CHALLENGE_EVENT, CONNECT_METHOD, RequestFrame};
use gatelink_core::ids::RequestIdGenerator;
use gatelink_core::{Frame, HandshakeError, RemoteError, ResponseFrame};
use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ConnectProfile;
use crate::identity::{DeviceIdentityProvider, SignedPayload};
use crate::locale::{Language, generic_handshake_failure, pairing_required};

/// Inputs needed to build the `connect` request.
pub struct ConnectContext<'a> {
    /// Client descriptor, role, scopes and protocol range.
    pub profile: &'a ConnectProfile,
    /// Auth token.
    pub token: Option<&'a str>,
    /// Locale reported to the gateway.
    pub locale: Option<&'a str>,
    /// Device key source.
    pub identity: &'a dyn DeviceIdentityProvider,
    /// Id source for the `connect` request.
    pub ids: &'a RequestIdGenerator,
}

impl ConnectContext<'_> {
    fn language(&self) -> Language {
        Language::for_locale(self.locale)
    }
}

/// What the connection task should do with a frame.
#[derive(Debug)]
pub enum HandshakeStep {
    /// Write this serialized `connect` request.
    Send(String),
    /// The frame was consumed by the handshake; nothing to do.
    Ignored,
    /// Not a handshake frame; route it normally.
    Passthrough(Frame),
    /// Handshake succeeded with this hello payload.
    Complete(Value),
    /// Handshake failed.
    Failed(HandshakeError),
}

#[derive(Debug)]
enum Phase {
    AwaitingChallenge { deadline: Instant },
    AwaitingResponse { request_id: String, deadline: Instant },
}

/// Handshake state for one freshly opened socket.
#[derive(Debug)]
pub struct HandshakeSession {
    phase: Phase,
    connect_timeout: Duration,
}

impl HandshakeSession {
    /// Start waiting for the challenge from `now`.
    pub fn new(challenge_timeout: Duration, connect_timeout: Duration, now: Instant) -> Self {
        Self {
            phase: Phase::AwaitingChallenge {
                deadline: now + challenge_timeout,
            },
            connect_timeout,
        }
    }

    /// Deadline of the current phase.
    pub fn deadline(&self) -> Instant {
        match &self.phase {
            Phase::AwaitingChallenge { deadline } | Phase::AwaitingResponse { deadline, .. } => {
                *deadline
            }
        }
    }

    /// Error for the current phase's deadline expiring.
    pub fn timeout_error(&self) -> HandshakeError {
        match self.phase {
            Phase::AwaitingChallenge { .. } => HandshakeError::ChallengeTimeout,
            Phase::AwaitingResponse { .. } => HandshakeError::ConnectTimeout,
        }
    }

    /// Whether `connect` has been sent on this socket.
    pub fn connect_sent(&self) -> bool {
        matches!(self.phase, Phase::AwaitingResponse { .. })
    }

    /// Feed one incoming frame.
    pub fn on_frame(&mut self, frame: Frame, ctx: &ConnectContext<'_>, now: Instant) -> HandshakeStep {
        match frame {
            Frame::Event(event) if event.event == CONNECT_CHALLENGE_EVENT => {
                if self.connect_sent() {
                    debug!("duplicate connect challenge ignored");
                    return HandshakeStep::Ignored;
                }
                let Some(nonce) = event.payload_str("nonce").filter(|n| !n.is_empty()) else {
                    warn!("connect challenge without nonce ignored");
                    return HandshakeStep::Ignored;
                };
                self.on_challenge(nonce, ctx, now)
            }
            Frame::Response(res) if self.is_connect_response(&res) => {
                if res.ok {
                    debug!("connect accepted");
                    HandshakeStep::Complete(res.payload.unwrap_or(Value::Null))
                } else {
                    let error = res.error.unwrap_or_else(|| RemoteError::new(""));
                    HandshakeStep::Failed(rejection(&error, ctx.language()))
                }
            }
            other => HandshakeStep::Passthrough(other),
        }
    }

    fn is_connect_response(&self, res: &ResponseFrame) -> bool {
        matches!(&self.phase, Phase::AwaitingResponse { request_id, .. } if *request_id == res.id)
    }

    fn on_challenge(&mut self, nonce: &str, ctx: &ConnectContext<'_>, now: Instant) -> HandshakeStep {
        let request_id = ctx.ids.next_id();
        let signed_at_ms = chrono::Utc::now().timestamp_millis();
        let params = match connect_params(ctx, nonce, signed_at_ms) {
            Ok(params) => params,
            Err(error) => return HandshakeStep::Failed(error),
        };
        let text = match RequestFrame::new(&request_id, CONNECT_METHOD, Some(params)).to_text() {
            Ok(text) => text,
            Err(e) => {
                return HandshakeStep::Failed(HandshakeError::Identity {
                    message: e.to_string(),
                });
            }
        };
        debug!(id = %request_id, "sending signed connect");
        self.phase = Phase::AwaitingResponse {
            request_id,
            deadline: now + self.connect_timeout,
        };
        HandshakeStep::Send(text)
    }
}

/// Map a `connect` error body to a handshake failure.
///
/// A `details.requestId` means the device awaits pairing approval.
pub fn rejection(error: &RemoteError, lang: Language) -> HandshakeError {
    if let Some(request_id) = error.detail_str("requestId").filter(|id| !id.is_empty()) {
        return HandshakeError::PairingRequired {
            request_id: request_id.to_owned(),
            message: pairing_required(lang, request_id),
        };
    }
    let message = if error.message.trim().is_empty() {
        generic_handshake_failure(lang).to_owned()
    } else {
        error.message.clone()
    };
    HandshakeError::Rejected {
        message,
        code: error.code.clone(),
    }
}

/// Build the `connect` params, signing `nonce` with the device key.
pub fn connect_params(
    ctx: &ConnectContext<'_>,
    nonce: &str,
    signed_at_ms: i64,
) -> Result<Value, HandshakeError> {
    let identity_error = |e: crate::identity::IdentityError| HandshakeError::Identity {
        message: e.to_string(),
    };
    let identity = ctx.identity.load_or_create().map_err(identity_error)?;
    let profile = ctx.profile;
    let payload = SignedPayload {
        device_id: identity.device_id(),
        client_id: &profile.client.id,
        client_mode: &profile.client.mode,
        role: &profile.role,
        scopes: &profile.scopes,
        signed_at_ms,
        token: ctx.token,
        nonce,
    };
    let signature = ctx
        .identity
        .sign(&identity, payload.canonical().as_bytes())
        .map_err(identity_error)?;

    let mut params = Map::new();
    let _ = params.insert("minProtocol".into(), json!(profile.min_protocol));
    let _ = params.insert("maxProtocol".into(), json!(profile.max_protocol));
    let _ = params.insert(
        "client".into(),
        json!({
            "id": profile.client.id,
            "version": profile.client.version,
            "platform": profile.client.platform,
            "mode": profile.client.mode,
            "displayName": profile.client.display_name,
        }),
    );
    let _ = params.insert("role".into(), json!(profile.role));
    let _ = params.insert("scopes".into(), json!(profile.scopes));
    let _ = params.insert("caps".into(), json!(profile.caps));
    let _ = params.insert("commands".into(), json!(profile.commands));
    let _ = params.insert("permissions".into(), profile.permissions.clone());
    if let Some(token) = ctx.token {
        let _ = params.insert("auth".into(), json!({ "token": token }));
    }
    if let Some(locale) = ctx.locale {
        let _ = params.insert("locale".into(), json!(locale));
    }
    if let Some(user_agent) = &profile.user_agent {
        let _ = params.insert("userAgent".into(), json!(user_agent));
    }
    let _ = params.insert(
        "device".into(),
        json!({
            "id": identity.device_id(),
            "publicKey": identity.public_key(),
            "signature": signature,
            "signedAt": signed_at_ms,
            "nonce": nonce,
        }),
    );
    Ok(Value::Object(params))
}
