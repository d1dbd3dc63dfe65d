use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::gateway::session::{GatewaySession, SessionSnapshot};
use crate::gateway::{self, GatewayConfig};
use crate::notify::{EventSender, LifecycleEvent};
use crate::token::Credential;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub gateway: GatewayConfig,
    /// Gap between consecutive session launches; bounds the burst of
    /// simultaneous handshakes against the gateway.
    pub stagger: Duration,
    pub poll_interval: Duration,
    /// Bound on how long `stop_all` waits for driver tasks to exit.
    pub shutdown_timeout: Duration,
    /// Grace period for a replaced session to release its transport.
    pub restart_grace: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            stagger: Duration::from_secs(5),
            poll_interval: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(10),
            restart_grace: Duration::from_secs(1),
        }
    }
}

/// One running session: the shared record, its stop signal, and the driver
/// task handle the supervisor polls for liveness.
pub struct SessionHandle {
    pub session: Arc<GatewaySession>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn launch(
        index: usize,
        credential: Credential,
        config: GatewayConfig,
        events: EventSender,
    ) -> Self {
        let session = Arc::new(GatewaySession::new(index, credential));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(gateway::run_session(
            session.clone(),
            config,
            events,
            stop_rx,
        ));
        Self { session, stop_tx, task }
    }

    /// Flags the session and wakes its driver; never waits for it.
    pub fn request_stop(&self) {
        self.session.request_stop();
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Aggregate health snapshot, safe to take concurrently with monitoring and
/// restarts.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub total: usize,
    pub connected: usize,
    pub healthy: usize,
    pub sessions: Vec<SessionSnapshot>,
}

/// Owns the full set of sessions: staggers their startup, polls their
/// liveness, restarts dead ones, and shuts everything down on request.
pub struct FleetSupervisor {
    credentials: Vec<Credential>,
    config: FleetConfig,
    events: EventSender,
    slots: RwLock<Vec<SessionHandle>>,
    stopping: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl FleetSupervisor {
    pub fn new(credentials: Vec<Credential>, config: FleetConfig, events: EventSender) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            credentials,
            config,
            events,
            slots: RwLock::new(Vec::new()),
            stopping: AtomicBool::new(false),
            stop_tx,
        })
    }

    /// Launches one session per credential, in order, waiting the stagger
    /// interval between launches, then runs the monitor loop until stopped.
    pub async fn start(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let total = self.credentials.len();
        for (i, credential) in self.credentials.iter().enumerate() {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            let index = i + 1;
            tracing::info!(
                index,
                credential = %credential.redacted(),
                "launching session"
            );
            let handle = SessionHandle::launch(
                index,
                credential.clone(),
                self.config.gateway.clone(),
                self.events.clone(),
            );
            {
                let mut slots = self.slots.write().await;
                // Re-checked under the lock: stop_all may have drained the
                // fleet since the loop-top check.
                if self.stopping.load(Ordering::SeqCst) {
                    handle.request_stop();
                    break;
                }
                slots.push(handle);
            }
            if index < total && !self.config.stagger.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.stagger) => {}
                    _ = stop_rx.changed() => break,
                }
            }
        }

        tracing::info!(sessions = total, "fleet started");
        let _ = self.events.send(LifecycleEvent::FleetStarted { count: total });
        self.monitor().await;
    }

    /// Poll loop: report aggregate health and restart every session whose
    /// driver task died without being asked to stop. Exits on stop.
    pub async fn monitor(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *stop_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = poll.tick() => {}
                _ = stop_rx.changed() => break,
            }
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let status = self.status().await;
            tracing::info!(
                total = status.total,
                connected = status.connected,
                healthy = status.healthy,
                "fleet health"
            );
            if let Ok(detail) = serde_json::to_string(&status) {
                tracing::debug!(status = %detail, "fleet health detail");
            }

            let dead: Vec<usize> = {
                let slots = self.slots.read().await;
                slots
                    .iter()
                    .filter(|h| h.is_finished() && !h.session.stop_requested())
                    .map(|h| h.session.index)
                    .collect()
            };
            for index in dead {
                if self.stopping.load(Ordering::SeqCst) {
                    break;
                }
                self.restart(index).await;
            }
        }
    }

    /// Replaces the session at `index` with a fresh one for the same
    /// credential. The new session starts with a clean attempt counter.
    /// Failures here are logged; the next monitor cycle retries.
    pub async fn restart(&self, index: usize) {
        let Some(credential) = self.credentials.get(index - 1).cloned() else {
            tracing::error!(index, "restart requested for unknown session index");
            return;
        };
        tracing::warn!(index, "restarting session");

        {
            let slots = self.slots.read().await;
            if let Some(handle) = slots.iter().find(|h| h.session.index == index) {
                handle.request_stop();
            }
        }
        // Give the old driver a moment to release its transport.
        tokio::time::sleep(self.config.restart_grace).await;
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        let fresh = SessionHandle::launch(
            index,
            credential,
            self.config.gateway.clone(),
            self.events.clone(),
        );
        let mut slots = self.slots.write().await;
        // stop_all serializes on this lock; if it won the race since the
        // check above, the replacement must not outlive the shutdown.
        if self.stopping.load(Ordering::SeqCst) {
            fresh.request_stop();
            tracing::info!(index, "stop requested during restart, discarding replacement");
            return;
        }
        match slots.iter_mut().find(|h| h.session.index == index) {
            Some(slot) => {
                let old = std::mem::replace(slot, fresh);
                old.task.abort();
            }
            None => {
                fresh.request_stop();
                tracing::error!(index, "session slot vanished during restart");
            }
        }
    }

    /// Requests every session to stop and waits (bounded) for their driver
    /// tasks to exit. Idempotent.
    pub async fn stop_all(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_tx.send(true);
        tracing::info!("stopping all sessions");

        let mut slots = self.slots.write().await;
        for handle in slots.iter() {
            handle.request_stop();
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        for handle in slots.iter_mut() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle.task).await.is_err() {
                tracing::warn!(
                    index = handle.session.index,
                    "session did not stop in time, aborting its task"
                );
                handle.task.abort();
            }
        }
        drop(slots);

        let _ = self.events.send(LifecycleEvent::FleetStopped);
        tracing::info!("fleet stopped");
    }

    pub async fn status(&self) -> FleetStatus {
        let slots = self.slots.read().await;
        let sessions: Vec<SessionSnapshot> = slots.iter().map(|h| h.session.snapshot()).collect();
        let connected = sessions.iter().filter(|s| s.connected).count();
        let healthy = sessions.iter().filter(|s| s.healthy).count();
        FleetStatus {
            total: sessions.len(),
            connected,
            healthy,
            sessions,
        }
    }

    /// The live session record at `index`, if launched.
    pub async fn session(&self, index: usize) -> Option<Arc<GatewaySession>> {
        let slots = self.slots.read().await;
        slots
            .iter()
            .find(|h| h.session.index == index)
            .map(|h| h.session.clone())
    }
}
