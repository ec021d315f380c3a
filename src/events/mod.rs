//! Per-session event queues.
//!
//! A job pushes [`Message`]s into the queue of the session it was started
//! for; the stream publisher drains the same queue in FIFO order.

mod queue;

pub use queue::{EventQueue, PopOutcome};

use serde_json::{Map, Value, json};

/// A single item flowing through a session queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Structured progress record. Keys are forwarded to the client untouched.
    Record(Map<String, Value>),
    /// Plain text notice, delivered as `{"message": text}`.
    Notice(String),
    /// Terminal sentinel: nothing else will ever be pushed for this job.
    Done,
}

impl Message {
    /// Build a record message from any JSON value.
    ///
    /// Objects become records; every other value is rendered as a notice.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Record(map),
            Value::String(text) => Self::Notice(text),
            other => Self::Notice(other.to_string()),
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice(text.into())
    }

    /// Error record rendered by the client as a failed log line.
    pub fn error(text: impl Into<String>) -> Self {
        Self::with_level(text, "error")
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::with_level(text, "warning")
    }

    fn with_level(text: impl Into<String>, level: &str) -> Self {
        let mut map = Map::new();
        map.insert("message".to_string(), Value::String(text.into()));
        map.insert("type".to_string(), Value::String(level.to_string()));
        Self::Record(map)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// JSON payload sent to stream consumers. The sentinel has none.
    pub fn payload(&self) -> Option<Value> {
        match self {
            Self::Record(map) => Some(Value::Object(map.clone())),
            Self::Notice(text) => Some(json!({ "message": text })),
            Self::Done => None,
        }
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Notice(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Notice(text)
    }
}
