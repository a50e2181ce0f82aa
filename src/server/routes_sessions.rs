//! Adaptive streaming session route handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use streamforged_av::IngestMode;
use streamforged_common::{Error, SessionId};
use streamforged_media::RenditionDescriptor;
use tokio_util::io::ReaderStream;

use super::error::AppError;
use super::AppContext;
use crate::streaming::{self, ArtifactBody, Readiness, SessionProfile, StreamSession};

/// Request body for starting a session.
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub url: String,
    #[serde(default)]
    pub profile: SessionProfile,
    /// Defaults to the configured streaming ingest mode when omitted.
    pub ingest: Option<IngestMode>,
}

/// Session descriptor returned to clients.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub source_url: String,
    pub profile: SessionProfile,
    pub manifest_url: String,
    /// Progressive MP4 stream of the same source, for players without HLS.
    pub mp4_fallback_url: String,
    pub readiness: &'static str,
    pub ready: bool,
    pub running: bool,
    pub renditions: Vec<RenditionDescriptor>,
    pub started_at: String,
    pub last_seen: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionResponse {
    fn from_session(session: &StreamSession, readiness: Option<&Readiness>) -> Self {
        // A stopped session's engine is killed on purpose and is not a failure.
        let error = session
            .exit()
            .filter(|exit| !exit.killed)
            .and_then(|exit| exit.to_result().err())
            .map(|e| e.to_string());
        let readiness_label = match readiness {
            Some(Readiness::Ready(_)) => "ready",
            Some(Readiness::SoftReady(_)) => "soft_ready",
            Some(Readiness::NotReady) => "pending",
            None if session.is_running() => "running",
            None if error.is_some() => "failed",
            None => "stopped",
        };
        Self {
            session_id: session.id.to_string(),
            source_url: session.source_url.clone(),
            profile: session.profile,
            manifest_url: format!("/api/sessions/{}/{}", session.id, session.manifest_name()),
            mp4_fallback_url: format!(
                "/api/stream/mp4?url={}",
                urlencoding::encode(&session.source_url)
            ),
            readiness: readiness_label,
            ready: readiness.map(Readiness::is_ready).unwrap_or(false),
            running: session.is_running(),
            renditions: session.renditions.clone(),
            started_at: session.started_at.to_rfc3339(),
            last_seen: session.last_seen().to_rfc3339(),
            error,
        }
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, AppError> {
    raw.parse()
        .map_err(|_| Error::not_found("session", raw).into())
}

/// POST /api/sessions
pub async fn start_session(
    State(ctx): State<AppContext>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ingest = payload.ingest.unwrap_or(ctx.config.streaming.ingest);
    let started = ctx
        .sessions
        .start_session(&payload.url, payload.profile, ingest)
        .await?;

    let status = if matches!(started.readiness, Readiness::NotReady) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(SessionResponse::from_session(
            &started.session,
            Some(&started.readiness),
        )),
    ))
}

/// GET /api/sessions
pub async fn list_sessions(State(ctx): State<AppContext>) -> impl IntoResponse {
    let sessions: Vec<SessionResponse> = ctx
        .sessions
        .list_sessions()
        .iter()
        .map(|s| SessionResponse::from_session(s, None))
        .collect();
    Json(sessions)
}

/// GET /api/sessions/{session_id}
pub async fn get_session(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = ctx.sessions.get_session(parse_session_id(&session_id)?)?;
    Ok(Json(SessionResponse::from_session(&session, None)))
}

/// DELETE /api/sessions/{session_id}
pub async fn stop_session(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ctx.sessions
        .stop_session(parse_session_id(&session_id)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/sessions/{session_id}/{file}
///
/// Serves a manifest or segment, waiting briefly for the engine to write it.
pub async fn get_artifact(
    State(ctx): State<AppContext>,
    Path((session_id, file)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let id = parse_session_id(&session_id)?;
    let artifact = streaming::serve(&ctx.sessions, id, &file).await?;
    let content_type = artifact.content_type.to_string();
    let cache_control = artifact.cache_control().to_string();

    let (len, body) = match artifact.body {
        ArtifactBody::Manifest(bytes) => (bytes.len() as u64, Body::from(bytes)),
        ArtifactBody::Segment(path) => {
            let handle = tokio::fs::File::open(&path)
                .await
                .map_err(|_| Error::not_found("artifact", &file))?;
            // Length of the file actually opened, not of whatever the name
            // pointed at earlier.
            let len = handle.metadata().await.map_err(Error::Io)?.len();
            (len, Body::from_stream(ReaderStream::new(handle)))
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        body,
    )
        .into_response())
}
