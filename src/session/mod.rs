//! Session registry: maps client-chosen session ids to their event queue.
//!
//! The registry is the only structure mutated concurrently by job starts,
//! stream polls and reaper sweeps. It is backed by a sharded [`DashMap`], so
//! traffic for one session never waits on another session's lock.

mod reaper;

pub use reaper::Reaper;

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::events::EventQueue;

/// Opaque, client-supplied session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct SessionEntry {
    queue: Arc<EventQueue>,
    created_at: DateTime<Utc>,
    last_access: Instant,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            queue: Arc::new(EventQueue::new()),
            created_at: Utc::now(),
            last_access: Instant::now(),
        }
    }

    fn touch(&mut self) {
        let now = Instant::now();
        if now > self.last_access {
            self.last_access = now;
        }
    }
}

/// Point-in-time view of one session, for introspection endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub queued: usize,
}

/// Owned map of session id to queue and last-access time.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the queue for `id`, creating and registering an empty one if absent.
    ///
    /// Counts as an access: the session's idle clock restarts.
    pub fn get_or_create(&self, id: &SessionId) -> Arc<EventQueue> {
        let mut entry = self.sessions.entry(id.clone()).or_insert_with(|| {
            info!(session_id = %id, "Created session queue");
            SessionEntry::new()
        });
        entry.touch();
        entry.queue.clone()
    }

    /// Queue for `id` without creating one.
    pub fn get(&self, id: &str) -> Option<Arc<EventQueue>> {
        self.sessions.get(id).map(|entry| entry.queue.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Refresh the last-access time. Returns `false` if the session does not exist.
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                entry.touch();
                true
            }
            None => false,
        }
    }

    /// Refresh `id` only while it still maps to `queue`.
    ///
    /// Returns `false` once the session was evicted, even if a newer queue has
    /// since been registered under the same id.
    pub fn touch_queue(&self, id: &str, queue: &Arc<EventQueue>) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) if Arc::ptr_eq(&entry.queue, queue) => {
                entry.touch();
                true
            }
            _ => false,
        }
    }

    /// Whether `id` is still registered with exactly this queue. Does not touch.
    pub fn is_current(&self, id: &str, queue: &Arc<EventQueue>) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.queue, queue))
    }

    /// Remove the session's queue and metadata. Returns whether it existed.
    pub fn evict(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!(session_id = %id, "Evicted session");
        }
        removed
    }

    /// Evict every session idle for longer than `idle_timeout` as of `now`.
    pub fn evict_idle(&self, idle_timeout: Duration, now: Instant) -> Vec<SessionId> {
        let mut evicted = Vec::new();
        self.sessions.retain(|id, entry| {
            let idle = now.saturating_duration_since(entry.last_access);
            if idle > idle_timeout {
                debug!(session_id = %id, idle_secs = idle.as_secs(), "Session idle past timeout");
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// How long `id` has been idle, if it exists.
    pub fn idle_for(&self, id: &str) -> Option<Duration> {
        self.sessions
            .get(id)
            .map(|entry| Instant::now().saturating_duration_since(entry.last_access))
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let now = Instant::now();
        let mut sessions: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| SessionSnapshot {
                session_id: entry.key().clone(),
                created_at: entry.created_at,
                idle_secs: now.saturating_duration_since(entry.last_access).as_secs(),
                queued: entry.queue.len(),
            })
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session. Used at shutdown.
    pub fn clear(&self) {
        let count = self.sessions.len();
        self.sessions.clear();
        if count > 0 {
            info!("Cleared {} session(s)", count);
        }
    }
}
