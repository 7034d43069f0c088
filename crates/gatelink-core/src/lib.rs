//! # gatelink-core
//!
//! Shared vocabulary for the gatelink gateway client:
//!
//! - **Frames**: `req` / `res` / `event` JSON envelopes exchanged over the socket
//! - **Errors**: `GatewayError` taxonomy via `thiserror`, handshake close codes
//! - **Request ids**: process-unique, time-salted monotonic ids
//! - **Text**: UTF-8 safe byte truncation for close-frame reasons
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod frames;
pub mod ids;
pub mod logging;
pub mod text;

pub use errors::{GatewayError, HandshakeError, TransportError};
pub use frames::{EventFrame, Frame, RemoteError, RequestFrame, ResponseFrame};
