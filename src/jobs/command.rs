//! Collector that runs an external program and forwards its stdout.
//!
//! The program receives the location and the search term as its last two
//! arguments. Every stdout line that is a JSON object becomes a structured
//! record; any other non-empty line becomes a plain notice.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Collector, JobError, JobRequest, ProgressSink};
use crate::config::CollectorConfig;
use crate::events::Message;

/// Environment variable carrying the directory collectors write exports to.
pub const OUTPUT_DIR_ENV: &str = "LEADSTREAM_OUTPUT_DIR";
/// Environment variable carrying the session id of the job.
pub const SESSION_ID_ENV: &str = "LEADSTREAM_SESSION_ID";

#[derive(Debug, Clone)]
pub struct CommandCollector {
    command: Vec<String>,
    working_dir: PathBuf,
    output_dir: PathBuf,
    env: HashMap<String, String>,
}

impl CommandCollector {
    pub fn new(command: Vec<String>, output_dir: PathBuf) -> Self {
        Self {
            command,
            working_dir: output_dir.clone(),
            output_dir,
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &CollectorConfig, output_dir: PathBuf) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: config
                .working_dir
                .clone()
                .unwrap_or_else(|| output_dir.clone()),
            output_dir,
            env: config.env.clone(),
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn spawn(&self, request: &JobRequest) -> Result<Child, JobError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(JobError::execution("No collector command configured"));
        };

        debug!(
            session_id = %request.session_id,
            "Spawning collector {} {:?}",
            program,
            args
        );

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&request.location)
            .arg(&request.search)
            .current_dir(&self.working_dir)
            .env(OUTPUT_DIR_ENV, &self.output_dir)
            .env(SESSION_ID_ENV, request.session_id.as_str())
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| JobError::execution(format!("Failed to start collector {program}: {e}")))
    }
}

#[async_trait]
impl Collector for CommandCollector {
    async fn collect(
        &self,
        request: JobRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        let mut child = self.spawn(&request)?;
        let session_id = request.session_id.clone();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JobError::execution("Collector stdout unavailable"))?;

        if let Some(stderr) = child.stderr.take() {
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(session_id = %session_id, "collector stderr: {}", line);
                }
            });
        }

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return terminate(&mut child).await,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(message) = parse_line(&line) {
                            progress.send(message);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(session_id = %session_id, "Failed to read collector output: {}", e);
                        let _ = child.kill().await;
                        return Err(JobError::execution(format!("Failed to read collector output: {e}")));
                    }
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => return terminate(&mut child).await,
            status = child.wait() => status
                .map_err(|e| JobError::execution(format!("Failed to wait for collector: {e}")))?,
        };

        check_status(status)
    }
}

async fn terminate(child: &mut Child) -> Result<(), JobError> {
    info!(pid = ?child.id(), "Killing collector after stop request");
    if let Err(e) = child.kill().await {
        warn!("Failed to kill collector: {}", e);
    }
    Err(JobError::Cancelled)
}

fn check_status(status: ExitStatus) -> Result<(), JobError> {
    if status.success() {
        Ok(())
    } else {
        Err(JobError::execution(format!("Collector exited with {status}")))
    }
}

/// Turn one line of collector output into a message. Blank lines are skipped.
pub(crate) fn parse_line(line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(Message::Record(map)),
        _ => Some(Message::Notice(trimmed.to_string())),
    }
}
