//! Database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamforged_common::{ConversionStatus, JobId};

/// A cached full-file conversion, one per distinct source URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionJob {
    pub id: JobId,
    pub source_url: String,
    pub status: ConversionStatus,
    /// Set only once the job is `Ready`.
    pub output_path: Option<String>,
    /// Set only once the job is `Failed`.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversionJob {
    pub fn is_ready(&self) -> bool {
        self.status == ConversionStatus::Ready
    }
}
