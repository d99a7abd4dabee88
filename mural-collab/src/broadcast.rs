//! Session registry and fan-out broadcast.
//!
//! All connected sessions share one tokio broadcast channel of
//! pre-encoded frames: an event is serialized once and every session's
//! receiver gets the same `Arc<Vec<u8>>`. A slow session lags and drops
//! old frames independently of the others; the next full-state snapshot
//! resynchronizes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerEvent};

/// A live connection's registry entry. Sessions own no grid data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub connected_at_ms: u64,
}

impl SessionInfo {
    pub fn new(connected_at_ms: u64) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            connected_at_ms,
        }
    }
}

/// Point-in-time broadcast counters.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub events_sent: u64,
    pub active_sessions: usize,
}

/// Fans out server events to every registered session.
pub struct Broadcaster {
    /// Shared channel; each session subscribes its own receiver.
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    /// Registered sessions, by id.
    sessions: RwLock<HashMap<Uuid, SessionInfo>>,
    /// Frames buffered per receiver before a lagging session drops.
    capacity: usize,
    /// Lock-free counter; publish never takes the sessions lock.
    events_sent: AtomicU64,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sessions: RwLock::new(HashMap::new()),
            capacity,
            events_sent: AtomicU64::new(0),
        }
    }

    /// Add a session; returns its receiver.
    ///
    /// The caller is responsible for the catch-up send (current snapshot
    /// and phase) on the session's own socket; a session must never have
    /// to reconstruct state from frames it missed.
    pub async fn register(&self, info: SessionInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(info.session_id, info);
        self.sender.subscribe()
    }

    /// Remove a session. Idempotent: unknown ids are a no-op.
    pub async fn unregister(&self, session_id: &Uuid) -> Option<SessionInfo> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id)
    }

    /// Encode once, fan out to every receiver. Returns the receiver count.
    pub fn publish(&self, event: &ServerEvent) -> Result<usize, ProtocolError> {
        let encoded = event.encode()?;
        Ok(self.publish_raw(Arc::new(encoded)))
    }

    /// Fan out pre-encoded bytes (zero-copy path).
    pub fn publish_raw(&self, frame: Arc<Vec<u8>>) -> usize {
        // send() errs only when there are no receivers; that is not a failure.
        let count = self.sender.send(frame).unwrap_or(0);
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn has_session(&self, session_id: &Uuid) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            active_sessions: self.sessions.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe without registering (internal observers, tests).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}
