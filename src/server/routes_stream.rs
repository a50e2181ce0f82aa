//! Progressive MP4 passthrough route.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use streamforged_av::IngestMode;

use super::error::AppError;
use super::AppContext;
use crate::streaming::open_progressive;

#[derive(Debug, Deserialize)]
pub struct ProgressiveQuery {
    pub url: String,
    pub ingest: Option<IngestMode>,
}

/// GET /api/stream/mp4?url=...
///
/// Responds once the engine has written its first bytes. The engine is
/// stopped when the client goes away.
pub async fn progressive_mp4(
    State(ctx): State<AppContext>,
    Query(query): Query<ProgressiveQuery>,
) -> Result<Response, AppError> {
    let ingest = query.ingest.unwrap_or(ctx.config.streaming.ingest);
    let stream = open_progressive(&ctx.sessions, &query.url, ingest).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream.into_stream()),
    )
        .into_response())
}
