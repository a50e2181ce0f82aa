//! Conversion management: deduplicated requests and supervised background
//! jobs.

use dashmap::DashMap;
use std::sync::Arc;
use streamforged_common::{JobId, Result};
use streamforged_db::models::ConversionJob;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::executor::ConversionExecutor;
use super::ledger::JobLedger;
use crate::ingest::parse_source_url;

struct RunningJob {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns every background conversion started by this process.
#[derive(Clone)]
pub struct ConversionManager {
    ledger: JobLedger,
    executor: Arc<ConversionExecutor>,
    running: Arc<DashMap<JobId, RunningJob>>,
}

impl ConversionManager {
    pub fn new(ledger: JobLedger, executor: ConversionExecutor) -> Self {
        Self {
            ledger,
            executor: Arc::new(executor),
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// Return the job for `url`, starting a background conversion if this
    /// call created it.
    ///
    /// Repeat requests for the same URL, concurrent or not, get the same job
    /// and never start a second conversion. A failed job stays failed.
    pub fn request(&self, url: &str) -> Result<ConversionJob> {
        let url = parse_source_url(url)?;
        let (job, created) = self.ledger.get_or_create(url.as_str())?;

        if created {
            self.spawn(job.clone());
        } else {
            tracing::debug!(job_id = %job.id, status = %job.status, "Conversion already known");
        }

        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Result<ConversionJob> {
        self.ledger.get(id)
    }

    /// Whether this process is still converting `id`.
    pub fn is_running(&self, id: JobId) -> bool {
        self.running
            .get(&id)
            .map(|job| !job.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.running
            .iter()
            .filter(|job| !job.handle.is_finished())
            .count()
    }

    /// Wait for the background conversion of `id`, if one is running.
    pub async fn wait(&self, id: JobId) {
        if let Some((_, job)) = self.running.remove(&id) {
            if let Err(e) = job.handle.await {
                tracing::error!(job_id = %id, error = %e, "Conversion task failed");
            }
        }
    }

    /// Cancel every running conversion and wait for them to record their
    /// outcome.
    pub async fn shutdown(&self) {
        let ids: Vec<JobId> = self.running.iter().map(|e| *e.key()).collect();
        for id in &ids {
            if let Some(job) = self.running.get(id) {
                job.cancel.cancel();
            }
        }
        for id in ids {
            self.wait(id).await;
        }
    }

    fn spawn(&self, job: ConversionJob) {
        let id = job.id;
        let executor = self.executor.clone();
        let running = self.running.clone();

        // Insert under the entry lock so the task cannot remove itself
        // before it is registered.
        self.running.entry(id).or_insert_with(|| {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    executor.execute(job, cancel).await;
                    running.remove(&id);
                }
            });
            RunningJob { handle, cancel }
        });

        tracing::info!(job_id = %id, "Conversion queued");
    }
}
