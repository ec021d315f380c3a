//! Leadstream: background lead-collection jobs with live progress streams.
//!
//! A client starts a job for a session id it chose, then opens a server-push
//! stream for the same id. The job pushes progress into the session's queue
//! and the stream drains it in order until the job's terminal sentinel.
//! Idle sessions are reclaimed by a reaper that runs on every request.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod events;
pub mod jobs;
pub mod locations;
pub mod session;
pub mod stream;

pub use config::AppConfig;
pub use events::{EventQueue, Message, PopOutcome};
pub use jobs::{Collector, CommandCollector, JobError, JobRequest, JobRunner, ProgressSink};
pub use session::{Reaper, SessionId, SessionRegistry};
pub use stream::{Frame, PublisherState, StreamPublisher};
