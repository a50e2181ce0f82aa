use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use streamforged_av::IngestMode;
use streamforged_media::ladder::default_ladder;
use streamforged_media::RenditionDescriptor;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where the ledger database, session working directories and finished
/// conversions live.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(shellexpand::tilde("~/.local/share/streamforged").as_ref())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("streamforged.db")
    }

    /// Parent of the per-session working directories.
    pub fn hls_dir(&self) -> PathBuf {
        self.data_dir.join("hls")
    }

    /// Finished offline conversions.
    pub fn converted_dir(&self) -> PathBuf {
        self.data_dir.join("converted")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Explicit ffmpeg binary; looked up on PATH when unset.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Upper bound on an offline conversion run.
    #[serde(default = "default_conversion_timeout")]
    pub conversion_timeout_secs: u64,
}

fn default_conversion_timeout() -> u64 {
    3 * 60 * 60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            conversion_timeout_secs: default_conversion_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Readiness ceiling for fast-start sessions.
    #[serde(default = "default_fast_start_ceiling")]
    pub fast_start_ceiling_secs: u64,

    /// Readiness ceiling for full-retention sessions.
    #[serde(default = "default_full_retention_ceiling")]
    pub full_retention_ceiling_secs: u64,

    /// Readiness ceiling for adaptive ladder sessions.
    #[serde(default = "default_ladder_ceiling")]
    pub ladder_ceiling_secs: u64,

    /// How long a manifest request waits for the file to appear.
    #[serde(default = "default_manifest_wait")]
    pub manifest_wait_secs: u64,

    /// How long a segment request waits for the file to appear.
    #[serde(default = "default_segment_wait")]
    pub segment_wait_secs: u64,

    /// Fallback polling interval behind filesystem notifications.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Sessions idle for longer than this are stopped.
    #[serde(default = "default_session_expiry")]
    pub session_expiry_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Target for single-rendition sessions.
    #[serde(default = "default_fast_start_rendition")]
    pub fast_start: RenditionDescriptor,

    /// Renditions for adaptive sessions, in manifest order.
    #[serde(default = "default_ladder")]
    pub ladder: Vec<RenditionDescriptor>,

    /// How sessions and progressive streams read their source when the
    /// request does not say.
    #[serde(default = "default_streaming_ingest")]
    pub ingest: IngestMode,
}

fn default_fast_start_ceiling() -> u64 {
    2
}

fn default_full_retention_ceiling() -> u64 {
    10
}

fn default_ladder_ceiling() -> u64 {
    30
}

fn default_manifest_wait() -> u64 {
    5
}

fn default_segment_wait() -> u64 {
    15
}

fn default_poll_interval() -> u64 {
    100
}

fn default_session_expiry() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_streaming_ingest() -> IngestMode {
    IngestMode::Engine
}

fn default_fast_start_rendition() -> RenditionDescriptor {
    RenditionDescriptor::new("240p", 426, 240, 500)
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            fast_start_ceiling_secs: default_fast_start_ceiling(),
            full_retention_ceiling_secs: default_full_retention_ceiling(),
            ladder_ceiling_secs: default_ladder_ceiling(),
            manifest_wait_secs: default_manifest_wait(),
            segment_wait_secs: default_segment_wait(),
            poll_interval_ms: default_poll_interval(),
            session_expiry_secs: default_session_expiry(),
            cleanup_interval_secs: default_cleanup_interval(),
            fast_start: default_fast_start_rendition(),
            ladder: default_ladder(),
            ingest: default_streaming_ingest(),
        }
    }
}

impl StreamingConfig {
    pub fn manifest_wait(&self) -> Duration {
        Duration::from_secs(self.manifest_wait_secs)
    }

    pub fn segment_wait(&self) -> Duration {
        Duration::from_secs(self.segment_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Ranged-fetch settings for push-fed ingestion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Per-request timeout for a single ranged GET.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Consecutive failures tolerated by bounded ingestion.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Fixed delay between attempts for live sessions, which retry forever.
    #[serde(default = "default_unbounded_delay")]
    pub unbounded_delay_ms: u64,
}

fn default_chunk_size() -> u64 {
    2 * 1024 * 1024
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    8
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    8_000
}

fn default_unbounded_delay() -> u64 {
    1_000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            unbounded_delay_ms: default_unbounded_delay(),
        }
    }
}

impl IngestConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionConfig {
    /// How offline conversions read their source. Push mode uses the bounded
    /// retry policy, so an unreachable origin ends the job.
    #[serde(default = "default_conversion_ingest")]
    pub ingest: IngestMode,
}

fn default_conversion_ingest() -> IngestMode {
    IngestMode::Push
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            ingest: default_conversion_ingest(),
        }
    }
}
