use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::events;
use super::session::GatewaySession;

/// Missed-ack cycles tolerated before an open connection counts as stale.
pub const STALE_MULTIPLIER: u32 = 3;

/// Periodic heartbeat sender for one connection attempt. Lives only while
/// that connection is open; the driver recreates it on every reconnect.
///
/// Exits when the shutdown signal fires or the outbound channel is gone. It
/// never drives reconnect logic itself; the session state machine reacts to
/// the transport error.
pub async fn run(
    session: Arc<GatewaySession>,
    outbound: mpsc::UnboundedSender<String>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of `interval` fires immediately; the first beat should
    // wait one full interval after the hello.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                if session.stop_requested() {
                    return;
                }
                if outbound.send(events::heartbeat_frame()).is_err() {
                    tracing::warn!(
                        index = session.index,
                        "outbound channel closed, stopping heartbeat"
                    );
                    return;
                }
                session.record_heartbeat_sent(Instant::now());
                tracing::trace!(index = session.index, "heartbeat sent");
            }
        }
    }
}
