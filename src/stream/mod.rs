//! Server-push publisher for one connected consumer.
//!
//! Each open stream owns a [`StreamPublisher`], an explicit state machine:
//!
//! ```text
//! Open -> Waiting -(message)-> Emit ----------> Waiting
//!                 -(timeout)-> HeartbeatEmit -> Waiting
//!                 -(sentinel)-> ClosedDone
//! any -(encode failure)-> ClosedError
//! any -(session evicted)-> ClosedEvicted
//! ```
//!
//! A client that disconnects simply drops the publisher; the queue and the
//! job are untouched, so reconnecting with the same session id resumes with
//! whatever is still queued.

use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use tokio_stream::Stream;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EventQueue, Message, PopOutcome};
use crate::session::{SessionId, SessionRegistry};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session {0} was evicted")]
    Evicted(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Open,
    Waiting,
    Emit,
    HeartbeatEmit,
    ClosedDone,
    ClosedError,
    ClosedEvicted,
}

impl PublisherState {
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            Self::ClosedDone | Self::ClosedError | Self::ClosedEvicted
        )
    }
}

/// One unit pushed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Serialized message payload.
    Data(String),
    Heartbeat,
}

impl Frame {
    pub fn payload(&self) -> String {
        match self {
            Self::Data(data) => data.clone(),
            Self::Heartbeat => json!({ "type": "heartbeat" }).to_string(),
        }
    }

    /// Framed as `data: <json>\n\n` on the wire.
    pub fn into_event(self) -> Event {
        Event::default().data(self.payload())
    }
}

/// Encode a queued message for the wire. The sentinel is never encoded.
pub fn encode(message: &Message) -> Result<Option<String>, StreamError> {
    match message.payload() {
        Some(payload) => Ok(Some(serde_json::to_string(&payload)?)),
        None => Ok(None),
    }
}

pub struct StreamPublisher {
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
    queue: Arc<EventQueue>,
    heartbeat: Duration,
    state: PublisherState,
    delivered: u64,
}

impl StreamPublisher {
    /// Attach to the session's queue, creating an empty one if no job has
    /// targeted this id yet.
    pub fn open(registry: Arc<SessionRegistry>, session_id: SessionId, heartbeat: Duration) -> Self {
        let queue = registry.get_or_create(&session_id);
        info!(session_id = %session_id, "Stream opened");
        Self {
            registry,
            session_id,
            queue,
            heartbeat,
            state: PublisherState::Open,
            delivered: 0,
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Wait for the next frame. `None` once the stream reached a closed state.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.state.is_closed() {
            return None;
        }

        if !self
            .registry
            .touch_queue(self.session_id.as_str(), &self.queue)
        {
            self.close(
                PublisherState::ClosedEvicted,
                Some(StreamError::Evicted(self.session_id.clone())),
            );
            return None;
        }

        self.state = PublisherState::Waiting;
        match self.queue.pop(self.heartbeat).await {
            PopOutcome::TimedOut => {
                self.state = PublisherState::HeartbeatEmit;
                Some(Frame::Heartbeat)
            }
            PopOutcome::Message(message) => match encode(&message) {
                Ok(Some(data)) => {
                    self.state = PublisherState::Emit;
                    self.delivered += 1;
                    Some(Frame::Data(data))
                }
                Ok(None) => {
                    self.close(PublisherState::ClosedDone, None);
                    None
                }
                Err(err) => {
                    self.close(PublisherState::ClosedError, Some(err));
                    None
                }
            },
        }
    }

    /// Drive the state machine as a stream of frames.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        let mut publisher = self;
        async_stream::stream! {
            while let Some(frame) = publisher.next_frame().await {
                yield frame;
            }
        }
    }

    fn close(&mut self, state: PublisherState, err: Option<StreamError>) {
        self.state = state;
        match err {
            Some(err) => warn!(
                session_id = %self.session_id,
                delivered = self.delivered,
                error = %err,
                "Stream closed: {:?}",
                state
            ),
            None => info!(
                session_id = %self.session_id,
                delivered = self.delivered,
                "Stream closed: {:?}",
                state
            ),
        }
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        if !self.state.is_closed() {
            debug!(
                session_id = %self.session_id,
                delivered = self.delivered,
                "Stream dropped by consumer"
            );
        }
    }
}
