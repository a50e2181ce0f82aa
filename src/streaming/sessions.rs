//! Adaptive streaming sessions.
//!
//! Each session owns one supervised engine process writing HLS output into
//! its own working directory. Sessions are stopped explicitly or expire after
//! a period without artifact requests.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use streamforged_av::{launch, resolve_engine, IngestMode, TranscodeProfile};
use streamforged_common::{Error, Result, SessionId};
use streamforged_media::RenditionDescriptor;
use tokio::sync::{watch, Notify};

use super::readiness::{await_ready, DirWatcher, Readiness, ReadinessRequirement};
use crate::config::{Config, IngestConfig, StreamingConfig};
use crate::ingest::{parse_source_url, HttpChunkSource, RetryPolicy};
use crate::supervisor::{EngineExit, EngineSupervisor, FeedSpec};

/// Output shape of an adaptive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionProfile {
    /// One low-latency rendition with a sliding window of short segments.
    #[default]
    FastStart,
    /// One rendition, every segment kept.
    FullRetention,
    /// Every configured rendition behind a master playlist.
    Ladder,
}

impl std::fmt::Display for SessionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionProfile::FastStart => write!(f, "fast_start"),
            SessionProfile::FullRetention => write!(f, "full_retention"),
            SessionProfile::Ladder => write!(f, "ladder"),
        }
    }
}

/// A running adaptive stream.
pub struct StreamSession {
    pub id: SessionId,
    pub source_url: String,
    pub profile: SessionProfile,
    pub work_dir: PathBuf,
    pub requirement: ReadinessRequirement,
    pub renditions: Vec<RenditionDescriptor>,
    pub started_at: DateTime<Utc>,
    last_seen: Mutex<DateTime<Utc>>,
    watcher: Option<DirWatcher>,
    supervisor: EngineSupervisor,
}

impl StreamSession {
    /// File name of the manifest handed to clients.
    pub fn manifest_name(&self) -> String {
        self.requirement
            .entry_manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn touch(&self) {
        *self.last_seen.lock() = Utc::now();
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.lock()
    }

    pub fn exit_watch(&self) -> watch::Receiver<Option<EngineExit>> {
        self.supervisor.exit_watch()
    }

    /// Signalled on every change in the working directory.
    pub fn wake(&self) -> Option<&Notify> {
        self.watcher.as_ref().map(DirWatcher::notify)
    }

    pub fn exit(&self) -> Option<EngineExit> {
        self.supervisor.exit()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub(crate) async fn shutdown(&self) -> EngineExit {
        self.supervisor.shutdown().await
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("work_dir", &self.work_dir)
            .field("running", &self.is_running())
            .finish()
    }
}

/// A session that passed its readiness wait.
#[derive(Debug)]
pub struct StartedSession {
    pub session: Arc<StreamSession>,
    pub readiness: Readiness,
}

/// Everything a session needs to launch and feed an engine.
#[derive(Debug)]
pub(crate) struct SessionSettings {
    pub engine_path: Option<PathBuf>,
    pub hls_root: PathBuf,
    pub streaming: StreamingConfig,
    pub ingest: IngestConfig,
    pub http: reqwest::Client,
}

/// Thread-safe registry of running sessions.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, Arc<StreamSession>>>,
    settings: Arc<SessionSettings>,
    expiry_duration: Duration,
}

impl SessionManager {
    pub fn new(config: &Config, http: reqwest::Client) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            settings: Arc::new(SessionSettings {
                engine_path: config.engine.ffmpeg_path.clone(),
                hls_root: config.storage.hls_dir(),
                streaming: config.streaming.clone(),
                ingest: config.ingest.clone(),
                http,
            }),
            expiry_duration: Duration::from_secs(config.streaming.session_expiry_secs),
        }
    }

    pub(crate) fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn streaming(&self) -> &StreamingConfig {
        &self.settings.streaming
    }

    /// Launch an engine for `url` and wait for its first output.
    ///
    /// The session is registered before the wait, so artifact requests can
    /// be served while it is still warming up. If the engine fails during
    /// the wait the session is removed again.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for a non-http(s) source URL.
    /// - [`Error::Configuration`] when the engine cannot be resolved or run.
    /// - [`Error::Transcode`] / [`Error::Upstream`] when the engine exits
    ///   before its output is ready.
    pub async fn start_session(
        &self,
        url: &str,
        profile: SessionProfile,
        ingest: IngestMode,
    ) -> Result<StartedSession> {
        let source = parse_source_url(url)?;
        let settings = &self.settings;
        let engine = resolve_engine(settings.engine_path.as_deref())?;

        let id = SessionId::new();
        let work_dir = settings.hls_root.join(id.to_string());
        let streaming = &settings.streaming;

        let (transcode, renditions, ceiling_secs) = match profile {
            SessionProfile::FastStart => (
                TranscodeProfile::fast_start(streaming.fast_start.clone()),
                vec![streaming.fast_start.clone()],
                streaming.fast_start_ceiling_secs,
            ),
            SessionProfile::FullRetention => (
                TranscodeProfile::full_retention(streaming.fast_start.clone()),
                vec![streaming.fast_start.clone()],
                streaming.full_retention_ceiling_secs,
            ),
            SessionProfile::Ladder => (
                TranscodeProfile::ladder(streaming.ladder.clone()),
                streaming.ladder.clone(),
                streaming.ladder_ceiling_secs,
            ),
        };
        let transcode = transcode.with_ingest(ingest);

        let feed = match ingest {
            IngestMode::Push => Some(FeedSpec {
                source: Arc::new(HttpChunkSource::new(
                    settings.http.clone(),
                    source.as_str(),
                    settings.ingest.request_timeout(),
                )?),
                chunk_size: settings.ingest.chunk_size,
                policy: RetryPolicy::unbounded(&settings.ingest),
            }),
            IngestMode::Engine => None,
        };

        let handle = launch(&engine, source.as_str(), &transcode, Some(&work_dir)).await?;
        let requirement = ReadinessRequirement::from_outputs(&handle.outputs)
            .ok_or_else(|| Error::internal("session profile produced no segmented output"))?;
        let (supervisor, _) = EngineSupervisor::spawn(id.to_string(), handle, feed, false);
        let watcher = DirWatcher::new(&requirement.dir);

        let now = Utc::now();
        let session = Arc::new(StreamSession {
            id,
            source_url: source.to_string(),
            profile,
            work_dir,
            requirement,
            renditions,
            started_at: now,
            last_seen: Mutex::new(now),
            watcher,
            supervisor,
        });
        self.sessions.insert(id, session.clone());
        tracing::info!(
            session_id = %id,
            profile = %profile,
            ingest = ?ingest,
            "Registered new stream session"
        );

        let readiness = await_ready(
            &session.requirement,
            session.wake(),
            session.exit_watch(),
            Duration::from_secs(ceiling_secs),
            streaming.poll_interval(),
        )
        .await;

        match readiness {
            Ok(readiness) => {
                match &readiness {
                    Readiness::Ready(_) => {
                        tracing::info!(session_id = %id, "Session ready")
                    }
                    Readiness::SoftReady(_) => {
                        tracing::info!(
                            session_id = %id,
                            "Session soft-ready, serving partial manifest"
                        )
                    }
                    Readiness::NotReady => {
                        tracing::warn!(session_id = %id, "No manifest within readiness ceiling")
                    }
                }
                Ok(StartedSession { session, readiness })
            }
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Session failed to start");
                if let Some((_, session)) = self.sessions.remove(&id) {
                    session.shutdown().await;
                }
                Err(e)
            }
        }
    }

    /// Look up a session.
    pub fn get_session(&self, id: SessionId) -> Result<Arc<StreamSession>> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("session", id))
    }

    /// Mark a session as in use.
    pub fn touch(&self, id: SessionId) -> Result<()> {
        self.get_session(id)?.touch();
        Ok(())
    }

    /// Stop a session: kill its engine, stop its feeder and forget it.
    ///
    /// The working directory is left in place.
    pub async fn stop_session(&self, id: SessionId) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or_else(|| Error::not_found("session", id))?;
        session.shutdown().await;
        tracing::info!(
            session_id = %id,
            duration_secs = (Utc::now() - session.started_at).num_seconds(),
            "Ended stream session"
        );
        Ok(())
    }

    pub fn list_sessions(&self) -> Vec<Arc<StreamSession>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Stop sessions that have not been touched within the expiry duration.
    ///
    /// # Returns
    /// The number of sessions that were stopped.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let expiry = chrono::Duration::from_std(self.expiry_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| now - entry.value().last_seen() > expiry)
            .map(|entry| *entry.key())
            .collect();

        let mut removed_count = 0;
        for id in expired {
            if let Some((_, session)) = self.sessions.remove(&id) {
                tracing::info!(
                    session_id = %id,
                    inactive_secs = (now - session.last_seen()).num_seconds(),
                    "Expired session removed"
                );
                session.shutdown().await;
                removed_count += 1;
            }
        }

        if removed_count > 0 {
            tracing::debug!(removed = removed_count, "Cleaned up expired sessions");
        }

        removed_count
    }

    /// Stop every session. Used at shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.stop_session(id).await;
        }
    }

    /// Get the number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are any active sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn hls_root(&self) -> &Path {
        &self.settings.hls_root
    }
}

/// Start a background task that periodically stops expired sessions.
pub fn start_cleanup_task(
    manager: SessionManager,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            manager.cleanup_expired_sessions().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(data_dir: &Path) -> SessionManager {
        let mut config = Config::default();
        config.storage.data_dir = data_dir.to_path_buf();
        config.engine.ffmpeg_path = Some(data_dir.join("missing-ffmpeg"));
        SessionManager::new(&config, reqwest::Client::new())
    }

    #[test]
    fn test_profile_serde() {
        let p: SessionProfile = serde_json::from_str("\"full_retention\"").unwrap();
        assert_eq!(p, SessionProfile::FullRetention);
        assert_eq!(SessionProfile::default(), SessionProfile::FastStart);
        assert_eq!(SessionProfile::Ladder.to_string(), "ladder");
    }

    #[tokio::test]
    async fn test_unknown_session_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());
        let id = SessionId::new();

        assert!(matches!(manager.get_session(id), Err(Error::NotFound { .. })));
        assert!(matches!(manager.touch(id), Err(Error::NotFound { .. })));
        assert!(matches!(manager.stop_session(id).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_missing_engine_is_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());

        let result = manager
            .start_session(
                "https://example.com/a.mkv",
                SessionProfile::FastStart,
                IngestMode::Engine,
            )
            .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_bad_url_rejected_before_launch() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());

        let result = manager
            .start_session(
                "ftp://example.com/a.mkv",
                SessionProfile::FastStart,
                IngestMode::Engine,
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
