//! Push-fed ingestion: pulls the source in byte ranges and writes it, in
//! order, into the engine's input.

use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use streamforged_common::{Error, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::source::{ChunkSource, RangeResponse};
use crate::config::IngestConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederState {
    Fetching,
    Retrying,
    Writing,
    Draining,
    Aborted,
    Done,
}

/// What to do after a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry forever after a fixed delay. Only cancellation ends the feeder.
    Unbounded { delay: Duration },
    /// Give up after `max_attempts` consecutive failures, backing off
    /// exponentially from `base_delay` up to `max_delay`.
    Bounded {
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    },
}

impl RetryPolicy {
    pub fn bounded(config: &IngestConfig) -> Self {
        RetryPolicy::Bounded {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn unbounded(config: &IngestConfig) -> Self {
        RetryPolicy::Unbounded {
            delay: Duration::from_millis(config.unbounded_delay_ms),
        }
    }

    /// Delay before the next attempt, `attempt` counting from zero.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::Unbounded { delay } => *delay,
            RetryPolicy::Bounded {
                base_delay,
                max_delay,
                ..
            } => {
                let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base_delay
                    .checked_mul(multiplier)
                    .unwrap_or(*max_delay)
                    .min(*max_delay)
            }
        }
    }
}

/// How a feeder run ended. Each variant carries the bytes delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The source was exhausted and the input closed.
    Completed(u64),
    /// The engine stopped accepting input.
    Aborted(u64),
    /// The owning session or job was cancelled.
    Cancelled(u64),
}

impl FeedOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            FeedOutcome::Completed(n) | FeedOutcome::Aborted(n) | FeedOutcome::Cancelled(n) => *n,
        }
    }
}

enum Step {
    Advanced,
    Exhausted,
    Aborted(std::io::Error),
    Cancelled,
    Failed(Error),
}

/// Copies a [`ChunkSource`] into a sink, one range at a time.
///
/// The cursor only moves forward by the number of bytes written, so the
/// ranges requested are contiguous and a range is only requested again as a
/// retry of a failed attempt.
pub struct Feeder<S, W> {
    source: S,
    sink: W,
    chunk_size: u64,
    policy: RetryPolicy,
    cancel: CancellationToken,
    label: String,
    cursor: u64,
    state: FeederState,
}

impl<S, W> Feeder<S, W>
where
    S: ChunkSource,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        source: S,
        sink: W,
        chunk_size: u64,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            sink,
            chunk_size: chunk_size.max(1),
            policy,
            cancel,
            label: String::new(),
            cursor: 0,
            state: FeederState::Fetching,
        }
    }

    /// Identifies the owning session or job in log output.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn state(&self) -> FeederState {
        self.state
    }

    /// Feed until the source is exhausted, the sink breaks or the token is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Only a [`RetryPolicy::Bounded`] feeder fails: [`Error::Upstream`] once
    /// the retry budget is spent, after closing the sink. An unbounded feeder
    /// logs failures and keeps going.
    pub async fn run(&mut self) -> Result<FeedOutcome> {
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(FeedOutcome::Cancelled(self.cursor));
            }

            self.transition(FeederState::Fetching);
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(FeedOutcome::Cancelled(self.cursor)),
                r = self.source.fetch(self.cursor, self.chunk_size) => r,
            };

            let step = match fetched {
                Ok(response) => self.deliver(response).await,
                Err(e) => Step::Failed(e),
            };

            match step {
                Step::Advanced => failures = 0,
                Step::Exhausted => {
                    self.close_input().await;
                    self.transition(FeederState::Done);
                    tracing::info!(
                        feeder = %self.label,
                        bytes = self.cursor,
                        "Source exhausted, input closed"
                    );
                    return Ok(FeedOutcome::Completed(self.cursor));
                }
                Step::Aborted(e) => {
                    self.transition(FeederState::Aborted);
                    tracing::info!(
                        feeder = %self.label,
                        bytes = self.cursor,
                        error = %e,
                        "Engine input closed, stopping ingestion"
                    );
                    return Ok(FeedOutcome::Aborted(self.cursor));
                }
                Step::Cancelled => return Ok(FeedOutcome::Cancelled(self.cursor)),
                Step::Failed(err) => {
                    self.transition(FeederState::Retrying);
                    failures += 1;

                    if let RetryPolicy::Bounded { max_attempts, .. } = self.policy {
                        if failures >= max_attempts {
                            tracing::error!(
                                feeder = %self.label,
                                offset = self.cursor,
                                attempts = failures,
                                error = %err,
                                "Retry budget exhausted"
                            );
                            self.close_input().await;
                            return Err(Error::upstream(format!(
                                "giving up at offset {} after {} attempts: {}",
                                self.cursor,
                                failures,
                                detail(&err)
                            )));
                        }
                    }

                    let delay = self.policy.delay_for_attempt(failures - 1);
                    tracing::warn!(
                        feeder = %self.label,
                        offset = self.cursor,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Fetch failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return Ok(FeedOutcome::Cancelled(self.cursor));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn deliver(&mut self, response: RangeResponse) -> Step {
        match response {
            RangeResponse::Partial(body) if body.is_empty() => Step::Exhausted,
            RangeResponse::Partial(body) => self.write_chunk(body).await,
            RangeResponse::Unsatisfiable if self.cursor > 0 => Step::Exhausted,
            RangeResponse::Unsatisfiable => {
                Step::Failed(Error::upstream("range not satisfiable at offset 0"))
            }
            RangeResponse::Full(mut body) => {
                tracing::debug!(
                    feeder = %self.label,
                    offset = self.cursor,
                    "Origin ignored range, reading full body"
                );
                let mut skip = self.cursor;
                let mut advanced = false;
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Step::Cancelled,
                        next = body.next() => next,
                    };
                    let mut chunk = match next {
                        None => return Step::Exhausted,
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) if advanced => {
                            tracing::warn!(
                                feeder = %self.label,
                                offset = self.cursor,
                                error = %e,
                                "Body interrupted"
                            );
                            return Step::Advanced;
                        }
                        Some(Err(e)) => return Step::Failed(e),
                    };

                    // Bytes before the cursor were already delivered.
                    if skip > 0 {
                        let len = chunk.len() as u64;
                        if len <= skip {
                            skip -= len;
                            continue;
                        }
                        chunk = chunk.slice(skip as usize..);
                        skip = 0;
                    }
                    if chunk.is_empty() {
                        continue;
                    }

                    match self.write_chunk(chunk).await {
                        Step::Advanced => advanced = true,
                        other => return other,
                    }
                }
            }
        }
    }

    async fn write_chunk(&mut self, data: Bytes) -> Step {
        self.transition(FeederState::Writing);
        let sink = &mut self.sink;
        let written = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Step::Cancelled,
            r = async {
                sink.write_all(&data).await?;
                sink.flush().await
            } => r,
        };

        match written {
            Ok(()) => {
                tracing::trace!(
                    feeder = %self.label,
                    offset = self.cursor,
                    len = data.len(),
                    "Chunk written"
                );
                self.cursor += data.len() as u64;
                Step::Advanced
            }
            Err(e) => Step::Aborted(e),
        }
    }

    async fn close_input(&mut self) {
        self.transition(FeederState::Draining);
        if let Err(e) = self.sink.shutdown().await {
            tracing::debug!(feeder = %self.label, error = %e, "Closing engine input failed");
        }
    }

    fn transition(&mut self, next: FeederState) {
        if self.state != next {
            tracing::trace!(
                feeder = %self.label,
                from = ?self.state,
                to = ?next,
                offset = self.cursor,
                "Feeder state"
            );
            self.state = next;
        }
    }
}

fn detail(err: &Error) -> String {
    match err {
        Error::Upstream(msg) => msg.clone(),
        other => other.to_string(),
    }
}
