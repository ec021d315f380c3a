//! Background collection jobs.
//!
//! A job is started for exactly one session and runs detached from the
//! request that started it. Its only link back to the core is a
//! [`ProgressSink`] that appends to the session's queue. Whatever way the
//! collector exits (success, error, panic, cancellation) the runner pushes
//! exactly one terminal sentinel afterwards.
//!
//! Stopping a job is best effort: the runner cancels the job's
//! [`CancellationToken`], but a collector that never looks at it keeps
//! running until it finishes on its own.

pub mod command;

pub use command::CommandCollector;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::{EventQueue, Message};
use crate::session::{SessionId, SessionRegistry};

/// Errors produced while starting or running a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Request rejected before anything was spawned.
    #[error("{0}")]
    Validation(String),

    #[error("A job is already running for session {0}")]
    AlreadyRunning(SessionId),

    /// Failure inside the collector. Never reaches the starting request.
    #[error("{0}")]
    Execution(String),

    #[error("Job stopped")]
    Cancelled,
}

impl JobError {
    pub fn missing_fields() -> Self {
        Self::Validation("Missing required fields".to_string())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

/// Raw start-job payload as received from the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartJobRequest {
    pub location: Option<String>,
    pub search: Option<String>,
    pub session_id: Option<String>,
}

impl StartJobRequest {
    /// All three fields are mandatory; blank strings count as missing.
    pub fn validate(self) -> Result<JobRequest, JobError> {
        fn present(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }

        match (
            present(self.location),
            present(self.search),
            present(self.session_id),
        ) {
            (Some(location), Some(search), Some(session_id)) => Ok(JobRequest {
                location,
                search,
                session_id: SessionId::from(session_id),
            }),
            _ => Err(JobError::missing_fields()),
        }
    }
}

/// A validated job request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub location: String,
    pub search: String,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to a running job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: JobId,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl JobHandle {
    /// Ask the job to stop. The collector may ignore the request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Write end of a session queue handed to a collector.
///
/// Messages are dropped silently once the session has been evicted (or
/// replaced) and once the runner has pushed the terminal sentinel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
    queue: Arc<EventQueue>,
    finished: Arc<AtomicBool>,
}

impl ProgressSink {
    fn new(registry: Arc<SessionRegistry>, session_id: SessionId, queue: Arc<EventQueue>) -> Self {
        Self {
            registry,
            session_id,
            queue,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Push a progress message. Returns whether it was enqueued.
    ///
    /// The terminal sentinel is reserved for the runner and is refused here.
    pub fn send(&self, message: impl Into<Message>) -> bool {
        let message = message.into();
        if message.is_done() {
            warn!(session_id = %self.session_id, "Collector tried to push the terminal sentinel");
            return false;
        }
        self.deliver(message)
    }

    fn deliver(&self, message: Message) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        if !self.registry.is_current(self.session_id.as_str(), &self.queue) {
            debug!(session_id = %self.session_id, "Session gone, dropping job message");
            return false;
        }
        self.queue.push(message);
        true
    }

    /// Push the terminal sentinel. Only the first call has any effect.
    fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.registry.is_current(self.session_id.as_str(), &self.queue) {
            self.queue.push(Message::Done);
        } else {
            debug!(session_id = %self.session_id, "Session gone, job finished unobserved");
        }
    }
}

/// The unit of work whose progress is streamed to clients.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Run one collection. Push progress through `progress`; do not push the
    /// terminal sentinel, the runner does that.
    async fn collect(
        &self,
        request: JobRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<(), JobError>;
}

/// Launches jobs and tracks the ones still running.
pub struct JobRunner {
    registry: Arc<SessionRegistry>,
    collector: Arc<dyn Collector>,
    jobs: Arc<DashMap<SessionId, JobHandle>>,
}

impl JobRunner {
    pub fn new(registry: Arc<SessionRegistry>, collector: Arc<dyn Collector>) -> Self {
        Self {
            registry,
            collector,
            jobs: Arc::new(DashMap::new()),
        }
    }

    /// Start a job for the request's session and return immediately.
    ///
    /// The session queue is created if needed. A second start for a session
    /// whose job is still running is rejected.
    pub fn start(&self, request: JobRequest) -> Result<JobHandle, JobError> {
        let session_id = request.session_id.clone();
        let handle = JobHandle {
            id: JobId::new(),
            session_id: session_id.clone(),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        };

        match self.jobs.entry(session_id.clone()) {
            Entry::Occupied(_) => return Err(JobError::AlreadyRunning(session_id)),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }

        let queue = self.registry.get_or_create(&session_id);
        let sink = ProgressSink::new(self.registry.clone(), session_id.clone(), queue);

        info!(
            session_id = %session_id,
            job_id = %handle.id,
            location = %request.location,
            search = %request.search,
            "Starting job"
        );

        tokio::spawn(run_job(
            self.collector.clone(),
            request,
            sink,
            handle.clone(),
            self.jobs.clone(),
        ));

        Ok(handle)
    }

    /// Request cancellation of the session's job. Returns whether one was running.
    pub fn stop(&self, session_id: &str) -> bool {
        match self.jobs.get(session_id) {
            Some(handle) => {
                info!(session_id = %session_id, job_id = %handle.id, "Stop requested");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Pausing is not supported by collectors; this only reports whether a
    /// job is running so the caller can acknowledge.
    pub fn pause(&self, session_id: &str) -> bool {
        let running = self.is_running(session_id);
        if running {
            warn!(session_id = %session_id, "Pause requested but jobs cannot be paused");
        }
        running
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.jobs.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<JobHandle> {
        self.jobs.get(session_id).map(|handle| handle.clone())
    }

    pub fn running(&self) -> Vec<JobHandle> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Cancel every running job. Used at shutdown.
    pub fn shutdown(&self) {
        let handles = self.running();
        if handles.is_empty() {
            return;
        }
        info!("Cancelling {} running job(s)", handles.len());
        for handle in handles {
            handle.cancel();
        }
    }
}

async fn run_job(
    collector: Arc<dyn Collector>,
    request: JobRequest,
    sink: ProgressSink,
    handle: JobHandle,
    jobs: Arc<DashMap<SessionId, JobHandle>>,
) {
    let session_id = handle.session_id.clone();
    let job_id = handle.id;

    // Run the collector in its own task so a panic surfaces as a JoinError
    // instead of unwinding past the sentinel push.
    let inner = tokio::spawn({
        let sink = sink.clone();
        let cancel = handle.cancel.clone();
        async move { collector.collect(request, sink, cancel).await }
    });

    let outcome = match inner.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(JobError::execution("Collector panicked")),
        Err(err) => Err(JobError::execution(err.to_string())),
    };

    match outcome {
        Ok(()) => {
            info!(session_id = %session_id, job_id = %job_id, "Job finished");
        }
        Err(JobError::Cancelled) => {
            warn!(session_id = %session_id, job_id = %job_id, "Job stopped");
            sink.deliver(Message::warning(JobError::Cancelled.to_string()));
        }
        Err(err) => {
            error!(session_id = %session_id, job_id = %job_id, error = %err, "Job failed");
            sink.deliver(Message::error(err.to_string()));
        }
    }

    sink.finish();
    jobs.remove_if(&session_id, |_, running| running.id == job_id);
}
