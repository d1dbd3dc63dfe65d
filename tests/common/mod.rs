#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use tokenfleet::fleet::FleetConfig;
use tokenfleet::gateway::GatewayConfig;

/// How the mock gateway treats each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    /// hello -> identify -> ready -> ack heartbeats.
    Normal,
    /// Accept the socket but never send anything.
    NoHello,
    /// Send hello, then ignore everything (identify never answered).
    SilentAfterHello,
    /// Full handshake, but heartbeats are never acknowledged.
    NeverAck,
    /// Full handshake, then close shortly after ready.
    CloseAfterReady,
    /// Close every connection before hello.
    RefuseHandshake,
    /// Close the first `n` connections before hello, then behave normally.
    RefuseFirst(usize),
}

/// In-process gateway the sessions connect to. Records connection arrival
/// times so tests can assert stagger spacing.
pub struct MockGateway {
    pub url: String,
    connects: Arc<Mutex<Vec<Instant>>>,
}

impl MockGateway {
    pub async fn spawn(script: Script, heartbeat_interval_ms: u64) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connects: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(AtomicUsize::new(0));

        let recorder = connects.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                recorder.lock().unwrap().push(Instant::now());
                let conn_no = seen.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(handle_conn(stream, script, conn_no, heartbeat_interval_ms));
            }
        });

        Self {
            url: format!("ws://127.0.0.1:{}", addr.port()),
            connects,
        }
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

async fn handle_conn(stream: TcpStream, script: Script, conn_no: usize, heartbeat_ms: u64) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    let refuse = match script {
        Script::RefuseHandshake => true,
        Script::RefuseFirst(n) => conn_no <= n,
        _ => false,
    };
    if refuse {
        let _ = ws.close(None).await;
        return;
    }
    if script == Script::NoHello {
        while let Some(Ok(_)) = ws.next().await {}
        return;
    }

    // HELLO
    let hello = json!({ "op": 10, "d": { "heartbeat_interval": heartbeat_ms } });
    if ws.send(Message::Text(hello.to_string().into())).await.is_err() {
        return;
    }

    if script == Script::SilentAfterHello {
        while let Some(Ok(_)) = ws.next().await {}
        return;
    }

    // Wait for IDENTIFY
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    return;
                };
                if frame["op"] == 2 {
                    break;
                }
            }
            Some(Ok(_)) => {}
            _ => return,
        }
    }

    // READY
    let ready = json!({
        "op": 0,
        "s": 1,
        "t": "READY",
        "d": { "user": { "id": "100", "username": "keeper", "discriminator": "0001" } }
    });
    if ws.send(Message::Text(ready.to_string().into())).await.is_err() {
        return;
    }

    if script == Script::CloseAfterReady {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = ws.close(None).await;
        return;
    }

    // Ack heartbeats (unless scripted not to)
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if frame["op"] == 1 && script != Script::NeverAck {
                let ack = json!({ "op": 11 });
                if ws.send(Message::Text(ack.to_string().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Gateway tunables shrunk to test scale.
pub fn test_gateway_config(url: &str) -> GatewayConfig {
    GatewayConfig {
        url: url.to_string(),
        intents: 0,
        max_reconnect_attempts: 5,
        backoff_base: Duration::from_millis(20),
        backoff_cap: Duration::from_millis(100),
        protocol_retry_delay: Duration::from_millis(30),
        connect_timeout: Duration::from_millis(500),
        hello_timeout: Duration::from_millis(300),
        tick_interval: Duration::from_millis(20),
    }
}

pub fn test_fleet_config(url: &str) -> FleetConfig {
    FleetConfig {
        gateway: test_gateway_config(url),
        stagger: Duration::ZERO,
        poll_interval: Duration::from_millis(100),
        shutdown_timeout: Duration::from_secs(2),
        restart_grace: Duration::from_millis(50),
    }
}

/// Polls `probe` until it returns true or the timeout elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
