use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::gateway::events::AccountIdentity;

/// Discrete lifecycle notifications emitted by sessions and the supervisor.
/// Delivery, retry, and formatting are the sink's problem, not the core's.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    FleetStarted { count: usize },
    SessionConnected { index: usize },
    SessionReady { index: usize, identity: AccountIdentity },
    SessionDisconnected { index: usize, reason: String },
    SessionError { index: usize, message: String },
    SessionGaveUp { index: usize },
    FleetStopped,
}

impl LifecycleEvent {
    pub fn title(&self) -> String {
        match self {
            LifecycleEvent::FleetStarted { .. } => "Fleet started".to_string(),
            LifecycleEvent::SessionConnected { index } => {
                format!("Session {index} - Connected")
            }
            LifecycleEvent::SessionReady { index, .. } => format!("Session {index} - Ready"),
            LifecycleEvent::SessionDisconnected { index, .. } => {
                format!("Session {index} - Disconnected")
            }
            LifecycleEvent::SessionError { index, .. } => format!("Session {index} - Error"),
            LifecycleEvent::SessionGaveUp { index } => format!("Session {index} - Gave up"),
            LifecycleEvent::FleetStopped => "Fleet stopped".to_string(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            LifecycleEvent::FleetStarted { count } => {
                format!("Fleet started with {count} session(s)")
            }
            LifecycleEvent::SessionConnected { index } => {
                format!("Session {index} opened its gateway connection")
            }
            LifecycleEvent::SessionReady { index, identity } => {
                format!("Session {index} is online as {}", identity.tag())
            }
            LifecycleEvent::SessionDisconnected { index, reason } => {
                format!("Session {index} disconnected: {reason}")
            }
            LifecycleEvent::SessionError { index, message } => {
                format!("Session {index} failed: {message}")
            }
            LifecycleEvent::SessionGaveUp { index } => {
                format!("Session {index} reached max reconnect attempts and gave up")
            }
            LifecycleEvent::FleetStopped => "All sessions stopped".to_string(),
        }
    }

    pub fn color(&self) -> u32 {
        match self {
            LifecycleEvent::FleetStarted { .. } | LifecycleEvent::SessionReady { .. } => 0x00FF00,
            LifecycleEvent::SessionConnected { .. } => 0x5865F2,
            LifecycleEvent::SessionDisconnected { .. } | LifecycleEvent::FleetStopped => 0xFFAA00,
            LifecycleEvent::SessionError { .. } | LifecycleEvent::SessionGaveUp { .. } => 0xFF0000,
        }
    }
}

/// Sessions and the supervisor hold one of these; the consuming task decides
/// where events go. Injected at construction, never read from ambient state.
pub type EventSender = mpsc::UnboundedSender<LifecycleEvent>;

/// Posts lifecycle events to a webhook as embeds, retrying transient
/// failures and honouring 429 retry_after.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl WebhookNotifier {
    /// Spawns the delivery task; it drains the channel until every sender is
    /// dropped.
    pub fn spawn(url: String) -> (EventSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LifecycleEvent>();
        let notifier = Self {
            url,
            client: reqwest::Client::new(),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        };
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                notifier.deliver(&event).await;
            }
        });
        (tx, handle)
    }

    /// Sink used when no webhook is configured: events only hit the log.
    pub fn log_only() -> (EventSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LifecycleEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::info!("{}", event.description());
            }
        });
        (tx, handle)
    }

    async fn deliver(&self, event: &LifecycleEvent) {
        let payload = json!({
            "username": "tokenfleet",
            "embeds": [{
                "title": event.title(),
                "description": event.description(),
                "color": event.color(),
                "timestamp": Utc::now().to_rfc3339(),
                "footer": { "text": "tokenfleet" }
            }]
        });

        for attempt in 1..=self.max_retries {
            match self.client.post(&self.url).json(&payload).send().await {
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let retry_after = resp
                        .json::<serde_json::Value>()
                        .await
                        .ok()
                        .and_then(|v| v.get("retry_after").and_then(|r| r.as_f64()))
                        .unwrap_or(self.retry_delay.as_secs_f64());
                    tracing::warn!("webhook rate limited, retrying after {retry_after}s");
                    tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                }
                Ok(resp) if resp.status().is_success() => return,
                Ok(resp) => {
                    tracing::warn!(status = resp.status().as_u16(), "webhook delivery failed");
                    return;
                }
                Err(e) => {
                    tracing::warn!("webhook error (attempt {attempt}): {e}");
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AccountIdentity {
        AccountIdentity {
            id: "42".into(),
            username: "keeper".into(),
            discriminator: "0001".into(),
        }
    }

    #[test]
    fn titles_name_the_session_index() {
        assert_eq!(
            LifecycleEvent::SessionGaveUp { index: 7 }.title(),
            "Session 7 - Gave up"
        );
        assert_eq!(
            LifecycleEvent::SessionReady { index: 2, identity: identity() }.title(),
            "Session 2 - Ready"
        );
    }

    #[test]
    fn ready_description_includes_identity_tag() {
        let event = LifecycleEvent::SessionReady { index: 1, identity: identity() };
        assert!(event.description().contains("keeper#0001"));
    }

    #[test]
    fn failures_are_red_successes_green() {
        assert_eq!(LifecycleEvent::SessionGaveUp { index: 1 }.color(), 0xFF0000);
        assert_eq!(
            LifecycleEvent::SessionError { index: 1, message: "x".into() }.color(),
            0xFF0000
        );
        assert_eq!(LifecycleEvent::FleetStarted { count: 3 }.color(), 0x00FF00);
    }

    #[tokio::test]
    async fn log_only_sink_drains_until_senders_drop() {
        let (tx, handle) = WebhookNotifier::log_only();
        tx.send(LifecycleEvent::FleetStarted { count: 1 }).unwrap();
        tx.send(LifecycleEvent::FleetStopped).unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("notifier task exits when channel closes")
            .unwrap();
    }
}
