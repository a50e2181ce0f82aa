//! Supervision of a running engine process.
//!
//! One supervisor task owns the [`Child`](tokio::process::Child): it waits for
//! the process to exit or for cancellation (killing it in that case), then
//! collects the feeder result and the stderr tail and publishes an
//! [`EngineExit`] on a watch channel. Log drains and the feeder run as their
//! own tasks and are joined by the supervisor.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use streamforged_av::EngineHandle;
use streamforged_common::{Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::{ChunkSource, FeedOutcome, Feeder, RetryPolicy};

/// Lines of engine stderr kept for diagnostics.
const STDERR_TAIL_LINES: usize = 40;

/// How long to wait for log drains after the engine is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Summary of how an engine run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineExit {
    pub code: Option<i32>,
    pub success: bool,
    /// The process was killed because its session or job was cancelled.
    pub killed: bool,
    /// Set when a bounded feeder gave up on the origin.
    pub ingest_error: Option<String>,
    pub stderr_tail: String,
}

impl EngineExit {
    /// Map the exit to the error it represents, if any.
    pub fn to_result(&self) -> Result<()> {
        if let Some(msg) = &self.ingest_error {
            return Err(Error::upstream(msg.clone()));
        }
        if self.success {
            return Ok(());
        }
        if self.killed {
            return Err(Error::transcode("engine was stopped before finishing"));
        }
        let status = match self.code {
            Some(code) => format!("engine exited with code {code}"),
            None => "engine terminated by signal".to_string(),
        };
        if self.stderr_tail.is_empty() {
            Err(Error::transcode(status))
        } else {
            Err(Error::transcode(format!("{status}: {}", self.stderr_tail)))
        }
    }

    fn lost() -> Self {
        Self {
            code: None,
            success: false,
            killed: false,
            ingest_error: None,
            stderr_tail: "engine supervisor ended unexpectedly".to_string(),
        }
    }
}

/// Source and policy for a push-fed run.
pub struct FeedSpec {
    pub source: Arc<dyn ChunkSource>,
    pub chunk_size: u64,
    pub policy: RetryPolicy,
}

/// Handle to a supervised engine process.
///
/// Dropping the supervisor cancels it, which kills the engine.
pub struct EngineSupervisor {
    label: String,
    cancel: CancellationToken,
    exit: watch::Receiver<Option<EngineExit>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineSupervisor {
    /// Take ownership of a launched engine and start supervising it.
    ///
    /// When `keep_stdout` is set the engine's stdout is returned to the caller
    /// as the continuous output; otherwise it is drained and discarded.
    pub fn spawn(
        label: impl Into<String>,
        handle: EngineHandle,
        feed: Option<FeedSpec>,
        keep_stdout: bool,
    ) -> (Self, Option<ChildStdout>) {
        let label = label.into();
        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        let EngineHandle {
            mut child,
            stdin,
            stdout,
            stderr,
            ..
        } = handle;

        let mut drains = Vec::new();
        if let Some(stderr) = stderr {
            drains.push(tokio::spawn(drain_stderr(label.clone(), stderr, tail.clone())));
        }
        let stdout = match stdout {
            Some(stdout) if !keep_stdout => {
                drains.push(tokio::spawn(drain_stdout(stdout)));
                None
            }
            other => other,
        };

        let feeder: Option<JoinHandle<Result<FeedOutcome>>> = match (feed, stdin) {
            (Some(feed), Some(stdin)) => {
                let cancel = cancel.clone();
                let label = label.clone();
                Some(tokio::spawn(async move {
                    let mut feeder = Feeder::new(
                        feed.source,
                        stdin,
                        feed.chunk_size,
                        feed.policy,
                        cancel.clone(),
                    )
                    .with_label(label);
                    let result = feeder.run().await;
                    if result.is_err() {
                        cancel.cancel();
                    }
                    result
                }))
            }
            _ => None,
        };

        let task = tokio::spawn({
            let label = label.clone();
            let cancel = cancel.clone();
            async move {
                let waited = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = cancel.cancelled() => None,
                };
                let (status, killed) = match waited {
                    Some(status) => (status, false),
                    None => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!(session = %label, error = %e, "Kill signal failed");
                        }
                        (child.wait().await, true)
                    }
                };
                cancel.cancel();

                let ingest_error = match feeder {
                    Some(handle) => match handle.await {
                        Ok(Ok(outcome)) => {
                            tracing::debug!(session = %label, ?outcome, "Feeder finished");
                            None
                        }
                        Ok(Err(Error::Upstream(msg))) => Some(msg),
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(e) => Some(format!("feeder task failed: {e}")),
                    },
                    None => None,
                };

                for mut drain in drains {
                    if tokio::time::timeout(DRAIN_GRACE, &mut drain).await.is_err() {
                        drain.abort();
                    }
                }

                let stderr_tail = tail.lock().iter().cloned().collect::<Vec<_>>().join("\n");
                let exit = match status {
                    Ok(status) => EngineExit {
                        code: status.code(),
                        success: status.success() && !killed,
                        killed,
                        ingest_error,
                        stderr_tail,
                    },
                    Err(e) => EngineExit {
                        code: None,
                        success: false,
                        killed,
                        ingest_error,
                        stderr_tail: format!("waiting for engine failed: {e}"),
                    },
                };

                if exit.success {
                    tracing::info!(session = %label, "Engine finished");
                } else if exit.killed && exit.ingest_error.is_none() {
                    tracing::info!(session = %label, "Engine stopped");
                } else {
                    tracing::warn!(
                        session = %label,
                        code = ?exit.code,
                        ingest_error = ?exit.ingest_error,
                        "Engine failed"
                    );
                }
                let _ = exit_tx.send(Some(exit));
            }
        });

        (
            Self {
                label,
                cancel,
                exit: exit_rx,
                task: Mutex::new(Some(task)),
            },
            stdout,
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A receiver that observes the exit summary once it is published.
    pub fn exit_watch(&self) -> watch::Receiver<Option<EngineExit>> {
        self.exit.clone()
    }

    /// The exit summary, if the engine has already exited.
    pub fn exit(&self) -> Option<EngineExit> {
        self.exit.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// Wait for the engine to exit on its own or through cancellation.
    pub async fn wait(&self) -> EngineExit {
        let mut rx = self.exit.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        };
        exit.unwrap_or_else(EngineExit::lost)
    }

    /// Kill the engine, stop the feeder and wait for every task to finish.
    pub async fn shutdown(&self) -> EngineExit {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(session = %self.label, error = %e, "Supervisor task failed");
            }
        }
        self.wait().await
    }
}

impl Drop for EngineSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drain_stderr(label: String, stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "engine", session = %label, "{line}");
                let mut tail = tail.lock();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(session = %label, error = %e, "Engine stderr read failed");
                break;
            }
        }
    }
}

async fn drain_stdout(mut stdout: ChildStdout) {
    let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
}
