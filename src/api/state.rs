//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::jobs::{Collector, JobRunner};
use crate::session::{Reaper, SessionRegistry};

/// Owned core components. Created once at startup and torn down through
/// [`AppState::shutdown`].
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub jobs: Arc<JobRunner>,
    pub reaper: Reaper,
    pub artifacts: Arc<ArtifactStore>,
    /// Longest a stream waits before sending a heartbeat.
    pub heartbeat: Duration,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig, collector: Arc<dyn Collector>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let jobs = Arc::new(JobRunner::new(registry.clone(), collector));
        let reaper = Reaper::new(registry.clone(), config.sessions.idle_timeout());
        let artifacts = Arc::new(ArtifactStore::new(
            config.downloads.dir.clone(),
            config.downloads.extension.clone(),
        ));

        Self {
            registry,
            jobs,
            reaper,
            artifacts,
            heartbeat: config.sessions.heartbeat_interval(),
            config: Arc::new(config),
        }
    }

    /// Cancel running jobs and drop every session.
    pub fn shutdown(&self) {
        self.jobs.shutdown();
        self.registry.clear();
    }
}
