//! Test utilities and common setup.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, header},
};
use http_body_util::BodyExt;
use leadstream::api::{self, AppState};
use leadstream::config::AppConfig;
use leadstream::jobs::{Collector, JobError, JobRequest, ProgressSink};
use leadstream::Message;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Heartbeat interval used by test apps, short enough to keep tests quick.
pub const TEST_HEARTBEAT_MS: u64 = 50;

/// Longest any single SSE read may take before the test fails.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub downloads: TempDir,
}

impl TestApp {
    /// Fresh router sharing the same state.
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Create a test application backed by `collector`.
pub fn test_app(collector: Arc<dyn Collector>) -> TestApp {
    test_app_with(collector, |_| {})
}

/// Create a test application, adjusting the config before the state is built.
pub fn test_app_with(collector: Arc<dyn Collector>, configure: impl FnOnce(&mut AppConfig)) -> TestApp {
    let downloads = TempDir::new().unwrap();

    let mut config = AppConfig::default();
    config.sessions.heartbeat_interval_ms = TEST_HEARTBEAT_MS;
    config.downloads.dir = downloads.path().to_path_buf();
    configure(&mut config);

    let state = AppState::new(config, collector);
    let router = api::create_router(state.clone());
    TestApp {
        router,
        state,
        downloads,
    }
}

/// Pushes a fixed list of messages, pausing between them.
pub struct Scripted {
    pub messages: Vec<Message>,
    pub delay: Duration,
}

impl Scripted {
    pub fn new(messages: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            messages,
            delay: Duration::ZERO,
        })
    }

    pub fn slow(messages: Vec<Message>, delay: Duration) -> Arc<Self> {
        Arc::new(Self { messages, delay })
    }
}

#[async_trait]
impl Collector for Scripted {
    async fn collect(
        &self,
        _request: JobRequest,
        progress: ProgressSink,
        _cancel: CancellationToken,
    ) -> Result<(), JobError> {
        for message in &self.messages {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            progress.send(message.clone());
        }
        Ok(())
    }
}

/// Runs until released or cancelled.
pub struct Blocking {
    pub release: Arc<Notify>,
}

impl Blocking {
    pub fn new() -> (Arc<Self>, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        (
            Arc::new(Self {
                release: release.clone(),
            }),
            release,
        )
    }
}

#[async_trait]
impl Collector for Blocking {
    async fn collect(
        &self,
        _request: JobRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        progress.send("running");
        tokio::select! {
            _ = self.release.notified() => Ok(()),
            _ = cancel.cancelled() => Err(JobError::Cancelled),
        }
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::POST)
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Incremental reader for a `text/event-stream` response body.
pub struct SseReader {
    body: Body,
    buf: String,
}

impl SseReader {
    pub fn new(response: axum::response::Response) -> Self {
        Self {
            body: response.into_body(),
            buf: String::new(),
        }
    }

    /// Next event's `data` payload, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<Value> {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let block: String = self.buf.drain(..end + 2).collect();
                let data: Vec<&str> = block
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if data.is_empty() {
                    continue;
                }
                return Some(serde_json::from_str(&data.join("\n")).unwrap());
            }

            let frame = tokio::time::timeout(READ_TIMEOUT, self.body.frame())
                .await
                .expect("timed out waiting for SSE frame");
            match frame {
                Some(Ok(frame)) => {
                    if let Ok(bytes) = frame.into_data() {
                        self.buf.push_str(std::str::from_utf8(&bytes).unwrap());
                    }
                }
                Some(Err(err)) => panic!("SSE body error: {err}"),
                None => return None,
            }
        }
    }

    /// All non-heartbeat payloads until the stream closes.
    pub async fn data_until_close(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(event) = self.next_event().await {
            if !is_heartbeat(&event) {
                out.push(event);
            }
        }
        out
    }
}

pub fn is_heartbeat(event: &Value) -> bool {
    event.get("type").and_then(Value::as_str) == Some("heartbeat")
}
