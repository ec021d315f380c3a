use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use super::{SessionId, SessionRegistry};

/// Idle-session garbage collection.
///
/// There is no timer: the API layer calls [`Reaper::sweep`] on every inbound
/// request, so an idle session lives until the first request after its
/// timeout expires.
#[derive(Debug, Clone)]
pub struct Reaper {
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
}

impl Reaper {
    pub fn new(registry: Arc<SessionRegistry>, idle_timeout: Duration) -> Self {
        Self {
            registry,
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Evict every session idle beyond the timeout. Returns the evicted ids.
    pub fn sweep(&self) -> Vec<SessionId> {
        let evicted = self.registry.evict_idle(self.idle_timeout, Instant::now());
        if !evicted.is_empty() {
            info!(
                count = evicted.len(),
                idle_timeout_secs = self.idle_timeout.as_secs(),
                "Reaped idle sessions"
            );
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaper(timeout_secs: u64) -> (Reaper, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        (
            Reaper::new(registry.clone(), Duration::from_secs(timeout_secs)),
            registry,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_session_within_window() {
        let (reaper, registry) = reaper(300);
        registry.get_or_create(&SessionId::from("s1"));

        tokio::time::advance(Duration::from_secs(300)).await;

        assert!(reaper.sweep().is_empty());
        assert!(registry.contains("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_after_threshold() {
        let (reaper, registry) = reaper(300);
        let queue = registry.get_or_create(&SessionId::from("s1"));

        tokio::time::advance(Duration::from_secs(301)).await;

        assert_eq!(reaper.sweep(), vec![SessionId::from("s1")]);
        assert!(!registry.contains("s1"));
        // Holders of the old queue can still push without panicking.
        queue.push("late message");
    }

    #[tokio::test(start_paused = true)]
    async fn test_touched_session_survives_repeated_sweeps() {
        let (reaper, registry) = reaper(300);
        registry.get_or_create(&SessionId::from("s1"));

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(200)).await;
            registry.touch("s1");
            assert!(reaper.sweep().is_empty());
        }
        assert!(registry.contains("s1"));
    }
}
