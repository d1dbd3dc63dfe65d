use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::events::AccountIdentity;
use super::heartbeat::STALE_MULTIPLIER;
use crate::token::Credential;

/// Connection lifecycle of one session. `Ready` is the only state counted
/// online; `Degraded` is an open-but-stale connection (acks overdue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingHandshake,
    Identifying,
    Ready,
    Degraded,
    Closing,
    Closed,
}

impl SessionState {
    pub fn is_online(self) -> bool {
        self == SessionState::Ready
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    heartbeat_interval: Option<Duration>,
    last_heartbeat_sent_at: Option<Instant>,
    last_heartbeat_acked: bool,
    reconnect_attempts: u32,
    identity: Option<AccountIdentity>,
}

/// One credential's gateway session. Shared between its driver task, its
/// heartbeat task, and the supervisor; every observable field sits behind a
/// single mutex so `snapshot()` never sees a half-applied transition.
pub struct GatewaySession {
    /// Stable 1-based ordinal within the fleet.
    pub index: usize,
    credential: Credential,
    inner: Mutex<Inner>,
    stop_requested: AtomicBool,
}

impl GatewaySession {
    pub fn new(index: usize, credential: Credential) -> Self {
        Self {
            index,
            credential,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                heartbeat_interval: None,
                last_heartbeat_sent_at: None,
                last_heartbeat_acked: false,
                reconnect_attempts: 0,
                identity: None,
            }),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        self.inner.lock().unwrap().state = next;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Idempotent and safe from any task; never blocks on the driver.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().unwrap().reconnect_attempts
    }

    /// Records one more reconnect attempt and returns the new count.
    pub(crate) fn begin_attempt(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        inner.reconnect_attempts += 1;
        inner.reconnect_attempts
    }

    /// Called on HELLO: a fresh connection learned its heartbeat cadence.
    /// Clears the previous attempt's heartbeat bookkeeping.
    pub(crate) fn record_hello(&self, interval: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.heartbeat_interval = Some(interval);
        inner.last_heartbeat_sent_at = None;
        inner.last_heartbeat_acked = false;
    }

    /// Only refreshes the timestamp when the previous beat was answered, so
    /// `last_heartbeat_sent_at` marks the oldest unacknowledged send and the
    /// staleness window cannot be kept open by the sender alone.
    pub(crate) fn record_heartbeat_sent(&self, at: Instant) {
        let mut inner = self.inner.lock().unwrap();
        if inner.last_heartbeat_acked || inner.last_heartbeat_sent_at.is_none() {
            inner.last_heartbeat_sent_at = Some(at);
        }
        inner.last_heartbeat_acked = false;
    }

    pub(crate) fn record_heartbeat_ack(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_heartbeat_acked = true;
        if inner.state == SessionState::Degraded {
            inner.state = SessionState::Ready;
        }
    }

    /// Confirmed READY: supersedes any previous identity and resets the
    /// attempt counter.
    pub(crate) fn mark_ready(&self, identity: AccountIdentity) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = SessionState::Ready;
        inner.reconnect_attempts = 0;
        inner.identity = Some(identity);
    }

    /// Demotes `Ready` to `Degraded` when acks are overdue. Returns true on
    /// the transition so the driver can log it once.
    pub(crate) fn mark_degraded_if_stale(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Ready && heartbeat_stale(&inner) {
            inner.state = SessionState::Degraded;
            true
        } else {
            false
        }
    }

    /// Online, not stopping, and heartbeats are being acknowledged within
    /// the tolerated window.
    pub fn is_healthy(&self) -> bool {
        if self.stop_requested() {
            return false;
        }
        let inner = self.inner.lock().unwrap();
        inner.state == SessionState::Ready && !heartbeat_stale(&inner)
    }

    pub fn identity(&self) -> Option<AccountIdentity> {
        self.inner.lock().unwrap().identity.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let stop = self.stop_requested();
        let inner = self.inner.lock().unwrap();
        SessionSnapshot {
            index: self.index,
            connected: inner.state.is_online(),
            healthy: !stop && inner.state == SessionState::Ready && !heartbeat_stale(&inner),
            identity: inner.identity.clone(),
        }
    }
}

/// A connection is stale once `STALE_MULTIPLIER` intervals have passed since
/// the oldest unanswered heartbeat. No heartbeat sent yet means not stale.
fn heartbeat_stale(inner: &Inner) -> bool {
    match (inner.last_heartbeat_sent_at, inner.heartbeat_interval) {
        (Some(sent), Some(interval)) => sent.elapsed() > interval * STALE_MULTIPLIER,
        _ => false,
    }
}

/// Point-in-time view of one session, as reported by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub index: usize,
    pub connected: bool,
    pub healthy: bool,
    pub identity: Option<AccountIdentity>,
}
