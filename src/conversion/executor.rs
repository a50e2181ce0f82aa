//! Conversion job executor.
//!
//! Runs one offline engine pass per job, writing a faststart MP4 next to the
//! other finished conversions, and records the terminal status on the job.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use streamforged_av::{launch, resolve_engine, IngestMode, TranscodeProfile};
use streamforged_common::{Error, Result};
use streamforged_db::models::ConversionJob;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ledger::JobLedger;
use crate::config::{Config, IngestConfig};
use crate::ingest::{HttpChunkSource, RetryPolicy};
use crate::supervisor::{EngineSupervisor, FeedSpec};

/// Transcodes a job's source URL into its cached artifact.
pub struct ConversionExecutor {
    ledger: JobLedger,
    engine_path: Option<PathBuf>,
    output_dir: PathBuf,
    ingest_mode: IngestMode,
    ingest: IngestConfig,
    timeout: Duration,
    http: reqwest::Client,
}

impl ConversionExecutor {
    pub fn new(config: &Config, ledger: JobLedger, http: reqwest::Client) -> Self {
        Self {
            ledger,
            engine_path: config.engine.ffmpeg_path.clone(),
            output_dir: config.storage.converted_dir(),
            ingest_mode: config.conversion.ingest,
            ingest: config.ingest.clone(),
            timeout: config.engine.conversion_timeout(),
            http,
        }
    }

    /// Final artifact location for a job.
    pub fn output_path(&self, job: &ConversionJob) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", job.id))
    }

    /// Run the conversion and move the job to its terminal state.
    pub async fn execute(&self, job: ConversionJob, cancel: CancellationToken) {
        let id = job.id;
        info!(
            job_id = %id,
            url = %job.source_url,
            ingest = ?self.ingest_mode,
            "Starting conversion"
        );

        let recorded = match self.run(&job, cancel).await {
            Ok(path) => self.ledger.complete(id, &path),
            Err(e) => self.ledger.fail(id, &e.to_string()),
        };
        if let Err(e) = recorded {
            tracing::error!(job_id = %id, error = %e, "Failed to record conversion result");
        }
    }

    /// Transcode without touching the ledger.
    ///
    /// The engine writes to a `.part` file that is renamed into place only
    /// after a clean exit, so a finished artifact is never partial.
    pub async fn run(&self, job: &ConversionJob, cancel: CancellationToken) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let engine = resolve_engine(self.engine_path.as_deref())?;

        let output = self.output_path(job);
        let partial = output.with_extension("mp4.part");

        let feed = match self.ingest_mode {
            IngestMode::Push => Some(FeedSpec {
                source: Arc::new(HttpChunkSource::new(
                    self.http.clone(),
                    &job.source_url,
                    self.ingest.request_timeout(),
                )?),
                chunk_size: self.ingest.chunk_size,
                policy: RetryPolicy::bounded(&self.ingest),
            }),
            IngestMode::Engine => None,
        };

        let profile = TranscodeProfile::file(&partial).with_ingest(self.ingest_mode);
        let handle = launch(&engine, &job.source_url, &profile, None).await?;
        let (supervisor, _) = EngineSupervisor::spawn(job.id.to_string(), handle, feed, false);

        let outcome = tokio::select! {
            exit = supervisor.wait() => exit.to_result(),
            _ = cancel.cancelled() => {
                supervisor.shutdown().await;
                Err(Error::internal("conversion interrupted by shutdown"))
            }
            _ = tokio::time::sleep(self.timeout) => {
                supervisor.shutdown().await;
                Err(Error::transcode(format!(
                    "conversion timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if let Err(e) = outcome {
            if let Err(rm) = tokio::fs::remove_file(&partial).await {
                debug!(job_id = %job.id, error = %rm, "No partial output to remove");
            }
            return Err(e);
        }

        tokio::fs::rename(&partial, &output).await?;
        Ok(output)
    }
}
