//! Best-effort keepalive pings while connected.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::Outbound;

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Cancelled by the connection task.
    Cancelled,
    /// The socket writer went away.
    WriterClosed,
}

/// Queue a WebSocket ping every `interval` until cancelled.
///
/// The first ping goes out one interval after start. A send failure means the
/// socket is already gone; the loop just stops, since reconnection is the
/// connection task's call. A zero `interval` disables pings; the loop then
/// only waits for cancellation.
pub async fn run_heartbeat(
    writer: mpsc::UnboundedSender<Outbound>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    if interval.is_zero() {
        debug!("heartbeat disabled");
        cancel.cancelled().await;
        return HeartbeatResult::Cancelled;
    }

    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {
                trace!("heartbeat ping");
                if writer.send(Outbound::Ping).is_err() {
                    return HeartbeatResult::WriterClosed;
                }
            }
        }
    }
}
