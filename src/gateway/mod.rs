pub mod events;
pub mod heartbeat;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::SessionError;
use crate::notify::{EventSender, LifecycleEvent};
use events::{opcode, GatewayMessage, HelloData, ReadyData};
use session::{GatewaySession, SessionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tunables for one session's connection lifecycle. Defaults are the
/// production values; tests shrink every interval.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    /// Capability bitmask declared in the identify payload.
    pub intents: u64,
    pub max_reconnect_attempts: u32,
    /// Linear backoff step for transport-level failures.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Fixed delay for protocol/identify failures.
    pub protocol_retry_delay: Duration,
    pub connect_timeout: Duration,
    /// How long to wait for the hello frame.
    pub hello_timeout: Duration,
    /// Granularity at which the read loop re-checks stop and staleness.
    pub tick_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
            // GUILDS | GUILD_MESSAGES
            intents: 513,
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(30),
            protocol_retry_delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            hello_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// How a single connection attempt ended.
enum ConnectionEnd {
    /// Stop observed; no reconnect.
    Requested,
    /// Close frame or end of stream from the remote side.
    Closed(String),
    Failed(SessionError),
}

/// Drives one session's full lifecycle: connect, handshake, read loop,
/// reconnect with backoff, until it is stopped or gives up. The sole task
/// that mutates this session's state.
pub async fn run_session(
    session: Arc<GatewaySession>,
    config: GatewayConfig,
    events: EventSender,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if session.stop_requested() {
            break;
        }
        session.set_state(SessionState::Connecting);
        tracing::debug!(
            index = session.index,
            credential = %session.credential().redacted(),
            "connecting to gateway"
        );

        let end = match open_transport(&config).await {
            Ok(ws) => {
                let _ = events.send(LifecycleEvent::SessionConnected {
                    index: session.index,
                });
                drive_connection(&session, &config, ws, &events, &mut stop_rx).await
            }
            Err(e) => ConnectionEnd::Failed(e),
        };

        session.set_state(SessionState::Closing);
        let protocol_failure = match &end {
            ConnectionEnd::Requested => {
                tracing::info!(index = session.index, "session stopped on request");
                false
            }
            ConnectionEnd::Closed(reason) => {
                tracing::warn!(index = session.index, reason, "gateway connection closed");
                let _ = events.send(LifecycleEvent::SessionDisconnected {
                    index: session.index,
                    reason: reason.clone(),
                });
                false
            }
            ConnectionEnd::Failed(err) => {
                tracing::warn!(index = session.index, "session error: {err}");
                let _ = events.send(LifecycleEvent::SessionError {
                    index: session.index,
                    message: err.to_string(),
                });
                err.is_protocol()
            }
        };
        session.set_state(SessionState::Closed);

        if matches!(end, ConnectionEnd::Requested) || session.stop_requested() {
            break;
        }

        if session.reconnect_attempts() >= config.max_reconnect_attempts {
            let err = SessionError::MaxAttemptsExceeded;
            tracing::error!(
                index = session.index,
                attempts = session.reconnect_attempts(),
                "{err}, giving up"
            );
            let _ = events.send(LifecycleEvent::SessionGaveUp {
                index: session.index,
            });
            break;
        }

        let attempts = session.begin_attempt();
        let delay = reconnect_delay(&config, attempts, protocol_failure);
        tracing::info!(
            index = session.index,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnecting after backoff"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => break,
        }
    }
}

/// `min(cap, base * attempts)` for transport failures, fixed delay for
/// protocol/identify failures. Non-decreasing in `attempts`.
fn reconnect_delay(config: &GatewayConfig, attempts: u32, protocol_failure: bool) -> Duration {
    if protocol_failure {
        config.protocol_retry_delay
    } else {
        config.backoff_cap.min(config.backoff_base * attempts)
    }
}

async fn open_transport(config: &GatewayConfig) -> Result<WsStream, SessionError> {
    match tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(SessionError::ConnectFailure(e.to_string())),
        Err(_) => Err(SessionError::ConnectFailure("connect timed out".to_string())),
    }
}

/// One open transport from handshake to teardown. Always shuts the heartbeat
/// task down and closes the sink before returning.
async fn drive_connection(
    session: &Arc<GatewaySession>,
    config: &GatewayConfig,
    ws: WsStream,
    events: &EventSender,
    stop_rx: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (mut ws_sink, mut ws_stream) = ws.split();
    session.set_state(SessionState::AwaitingHandshake);

    // Wait for HELLO
    let hello_timeout = tokio::time::sleep(config.hello_timeout);
    tokio::pin!(hello_timeout);
    let heartbeat_interval = loop {
        tokio::select! {
            _ = &mut hello_timeout => {
                return ConnectionEnd::Failed(SessionError::HandshakeTimeout);
            }
            _ = stop_rx.changed() => return ConnectionEnd::Requested,
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let gw_msg: GatewayMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                return ConnectionEnd::Failed(SessionError::Protocol(
                                    format!("unparsable frame before hello: {e}"),
                                ));
                            }
                        };
                        if gw_msg.op != opcode::HELLO {
                            return ConnectionEnd::Failed(SessionError::Protocol(format!(
                                "expected hello, got opcode {}",
                                gw_msg.op
                            )));
                        }
                        let hello: HelloData = match gw_msg
                            .data
                            .ok_or("missing data")
                            .and_then(|d| serde_json::from_value(d).map_err(|_| "bad data"))
                        {
                            Ok(h) => h,
                            Err(what) => {
                                return ConnectionEnd::Failed(SessionError::Protocol(
                                    format!("hello with {what}"),
                                ));
                            }
                        };
                        break Duration::from_millis(hello.heartbeat_interval);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return ConnectionEnd::Closed(close_reason(frame));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return ConnectionEnd::Failed(SessionError::Transport(e.to_string()));
                    }
                    None => return ConnectionEnd::Closed("stream ended".to_string()),
                }
            }
        }
    };

    session.record_hello(heartbeat_interval);
    session.set_state(SessionState::Identifying);
    tracing::debug!(
        index = session.index,
        heartbeat_ms = heartbeat_interval.as_millis() as u64,
        "hello received, identifying"
    );

    // Outbound channel shared with the heartbeat task; this loop owns the
    // sink and flushes frames in order.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (hb_shutdown_tx, hb_shutdown_rx) = watch::channel(false);
    let hb_task = tokio::spawn(heartbeat::run(
        session.clone(),
        tx.clone(),
        heartbeat_interval,
        hb_shutdown_rx,
    ));

    // Send IDENTIFY
    let identify = events::identify_frame(session.credential(), config.intents);
    if let Err(e) = ws_sink.send(Message::Text(identify.into())).await {
        let _ = hb_shutdown_tx.send(true);
        let _ = hb_task.await;
        return ConnectionEnd::Failed(SessionError::Transport(e.to_string()));
    }

    let mut tick = tokio::time::interval(config.tick_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                if let Err(e) = ws_sink.send(Message::Text(frame.into())).await {
                    break ConnectionEnd::Failed(SessionError::HeartbeatSend(e.to_string()));
                }
            }
            _ = stop_rx.changed() => break ConnectionEnd::Requested,
            _ = tick.tick() => {
                if session.stop_requested() {
                    break ConnectionEnd::Requested;
                }
                if session.mark_degraded_if_stale() {
                    tracing::warn!(
                        index = session.index,
                        "heartbeat acks overdue, marking session degraded"
                    );
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match handle_frame(session, events, &text) {
                            Ok(()) => {}
                            Err(err) => break ConnectionEnd::Failed(err),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break ConnectionEnd::Closed(close_reason(frame));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break ConnectionEnd::Failed(SessionError::Transport(e.to_string()));
                    }
                    None => break ConnectionEnd::Closed("stream ended".to_string()),
                }
            }
        }
    };

    // Teardown: the heartbeat task exits on the shutdown signal without a
    // separate cancel path, then the transport is closed.
    let _ = hb_shutdown_tx.send(true);
    let _ = hb_task.await;
    let _ = ws_sink.close().await;
    end
}

fn handle_frame(
    session: &Arc<GatewaySession>,
    events: &EventSender,
    text: &str,
) -> Result<(), SessionError> {
    let gw_msg: GatewayMessage = serde_json::from_str(text)
        .map_err(|e| SessionError::Protocol(format!("unparsable frame: {e}")))?;
    match gw_msg.op {
        opcode::HEARTBEAT_ACK => {
            session.record_heartbeat_ack();
        }
        opcode::DISPATCH => {
            if gw_msg.event_type.as_deref() == Some("READY") {
                let data = gw_msg
                    .data
                    .ok_or_else(|| SessionError::Protocol("ready without data".to_string()))?;
                let ready: ReadyData = serde_json::from_value(data)
                    .map_err(|e| SessionError::Protocol(format!("bad ready payload: {e}")))?;
                tracing::info!(
                    index = session.index,
                    account = %ready.user.tag(),
                    "session ready"
                );
                session.mark_ready(ready.user.clone());
                let _ = events.send(LifecycleEvent::SessionReady {
                    index: session.index,
                    identity: ready.user,
                });
            }
            // Other dispatches are application traffic; this keeper ignores them.
        }
        _ => {}
    }
    Ok(())
}

fn close_reason(
    frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame>,
) -> String {
    match frame {
        Some(f) if !f.reason.is_empty() => format!("close {}: {}", u16::from(f.code), f.reason),
        Some(f) => format!("close {}", u16::from(f.code)),
        None => "closed without close frame".to_string(),
    }
}
