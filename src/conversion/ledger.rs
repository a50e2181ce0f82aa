//! The job ledger: durable conversion jobs keyed by source URL.

use std::path::Path;
use streamforged_common::{ConversionStatus, JobId, Result};
use streamforged_db::models::ConversionJob;
use streamforged_db::pool::{get_conn, DbPool};
use streamforged_db::queries::conversion_jobs;

/// Reason recorded on jobs left pending by a previous process.
pub const ORPHANED_REASON: &str = "interrupted by restart";

/// Thin handle over the `conversion_jobs` table.
#[derive(Clone)]
pub struct JobLedger {
    pool: DbPool,
}

impl JobLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Existing job for `url`, or a new pending one. The flag is `true` only
    /// for the caller that created it, which then owns the background work.
    pub fn get_or_create(&self, url: &str) -> Result<(ConversionJob, bool)> {
        let conn = get_conn(&self.pool)?;
        conversion_jobs::get_or_create_job(&conn, url)
    }

    pub fn get(&self, id: JobId) -> Result<ConversionJob> {
        let conn = get_conn(&self.pool)?;
        conversion_jobs::get_conversion_job(&conn, id)
    }

    /// Move a pending job to ready. Returns whether it transitioned.
    pub fn complete(&self, id: JobId, output_path: &Path) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        let changed =
            conversion_jobs::complete_job(&conn, id, &output_path.to_string_lossy())?;
        if changed {
            tracing::info!(job_id = %id, output = ?output_path, "Conversion ready");
        } else {
            tracing::debug!(job_id = %id, "Job already terminal, completion ignored");
        }
        Ok(changed)
    }

    /// Move a pending job to failed. Returns whether it transitioned.
    pub fn fail(&self, id: JobId, error_detail: &str) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        let changed = conversion_jobs::fail_job(&conn, id, error_detail)?;
        if changed {
            tracing::warn!(job_id = %id, error = %error_detail, "Conversion failed");
        } else {
            tracing::debug!(job_id = %id, "Job already terminal, failure ignored");
        }
        Ok(changed)
    }

    /// Fail jobs a previous process left pending.
    pub fn reset_orphaned(&self) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        conversion_jobs::reset_orphaned_jobs(&conn, ORPHANED_REASON)
    }

    pub fn list(&self, status: Option<ConversionStatus>, limit: u32) -> Result<Vec<ConversionJob>> {
        let conn = get_conn(&self.pool)?;
        conversion_jobs::list_jobs(&conn, status, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamforged_common::Error;
    use streamforged_db::pool::init_memory_pool;

    #[test]
    fn test_terminal_status_is_final() {
        let ledger = JobLedger::new(init_memory_pool().unwrap());
        let (job, created) = ledger.get_or_create("https://example.com/a.mkv").unwrap();
        assert!(created);

        assert!(ledger.complete(job.id, Path::new("/data/converted/a.mp4")).unwrap());
        assert!(!ledger.fail(job.id, "late failure").unwrap());

        let job = ledger.get(job.id).unwrap();
        assert_eq!(job.status, ConversionStatus::Ready);
        assert_eq!(job.output_path.as_deref(), Some("/data/converted/a.mp4"));
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_unknown_job() {
        let ledger = JobLedger::new(init_memory_pool().unwrap());
        assert!(matches!(ledger.get(JobId::new()), Err(Error::NotFound { .. })));
        assert!(matches!(
            ledger.fail(JobId::new(), "x"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_reset_orphaned() {
        let ledger = JobLedger::new(init_memory_pool().unwrap());
        let (job, _) = ledger.get_or_create("https://example.com/b.mkv").unwrap();

        assert_eq!(ledger.reset_orphaned().unwrap(), 1);
        let job = ledger.get(job.id).unwrap();
        assert_eq!(job.status, ConversionStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(ORPHANED_REASON));
        assert_eq!(ledger.list(Some(ConversionStatus::Pending), 10).unwrap().len(), 0);
    }
}
