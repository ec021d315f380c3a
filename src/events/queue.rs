use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use super::Message;

/// Result of a bounded wait on an [`EventQueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum PopOutcome {
    Message(Message),
    /// Nothing arrived within the wait interval. Not an error.
    TimedOut,
}

/// Unbounded FIFO of messages for one session.
///
/// Any number of producers may push concurrently. Consumers are serialized
/// on the receiver lock, so two concurrent `pop` calls never see the same
/// message.
#[derive(Debug)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    pending: AtomicUsize,
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    /// Append a message to the tail. Never blocks.
    pub fn push(&self, message: impl Into<Message>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        // The receiver is owned by `self`, so the channel cannot be closed here.
        if self.tx.send(message.into()).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Remove the head, waiting at most `timeout` for one to arrive.
    ///
    /// Cancel safe: if the wait expires no message is lost.
    pub async fn pop(&self, timeout: Duration) -> PopOutcome {
        let received = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match received {
            Ok(Some(message)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                PopOutcome::Message(message)
            }
            // The sender lives as long as the queue, so `None` cannot be observed.
            Ok(None) | Err(_) => PopOutcome::TimedOut,
        }
    }

    /// Number of messages pushed but not yet popped.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
