//! Line-oriented collaborators: changes as JSON lines on stdin / stdout.
//!
//! These let the binary run a session without a browser engine attached,
//! e.g. by piping a recorder's output into `lockstep lead`.

use async_trait::async_trait;
use lockstep_client::{ApplyError, ChangeApplier, ChangeRecorder, RecorderError};
use lockstep_types::Change;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Parse one input line. Blank lines are skipped, bad lines are logged.
pub fn parse_line(line: &str) -> Option<Change> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(change) => Some(change),
        Err(e) => {
            warn!(error = %e, "skipping malformed change line");
            None
        }
    }
}

/// Reads one JSON [`Change`] per line from stdin.
#[derive(Default)]
pub struct StdinRecorder {
    task: Option<JoinHandle<()>>,
}

impl StdinRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeRecorder for StdinRecorder {
    async fn start(&mut self, tx: mpsc::Sender<Change>) -> Result<(), RecorderError> {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(RecorderError::AlreadyStarted);
        }
        self.task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(change) = parse_line(&line) else {
                            continue;
                        };
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read stdin");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RecorderError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

/// Writes each applied [`Change`] to stdout as one JSON line.
pub struct StdoutApplier {
    out: tokio::io::Stdout,
}

impl StdoutApplier {
    pub fn new() -> Self {
        Self {
            out: tokio::io::stdout(),
        }
    }
}

impl Default for StdoutApplier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeApplier for StdoutApplier {
    async fn apply(&mut self, change: &Change) -> Result<(), ApplyError> {
        let mut line =
            serde_json::to_string(change).map_err(|e| ApplyError::Failed(e.to_string()))?;
        line.push('\n');
        self.out
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ApplyError::Failed(e.to_string()))?;
        self.out
            .flush()
            .await
            .map_err(|e| ApplyError::Failed(e.to_string()))
    }
}
