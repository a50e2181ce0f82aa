//! Cached conversion API route handlers.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use streamforged_common::{ConversionStatus, Error, JobId};
use streamforged_db::models::ConversionJob;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::error::AppError;
use super::AppContext;

/// Request body for starting a conversion.
#[derive(Debug, Deserialize)]
pub struct ConversionRequest {
    pub url: String,
}

/// Conversion job response.
#[derive(Debug, Serialize)]
pub struct ConversionResponse {
    pub job_id: String,
    pub source_url: String,
    pub status: ConversionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversionResponse {
    fn from_model(job: &ConversionJob) -> Self {
        Self {
            job_id: job.id.to_string(),
            source_url: job.source_url.clone(),
            status: job.status,
            artifact_url: job
                .is_ready()
                .then(|| format!("/api/conversions/{}/artifact", job.id)),
            error: job.error_message.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse()
        .map_err(|_| Error::not_found("conversion_job", raw).into())
}

/// POST /api/conversions
///
/// `202` while the job is pending, `200` once it is terminal.
pub async fn create_conversion(
    State(ctx): State<AppContext>,
    Json(payload): Json<ConversionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let job = ctx.conversions.request(&payload.url)?;

    let status = match job.status {
        ConversionStatus::Pending => StatusCode::ACCEPTED,
        ConversionStatus::Ready | ConversionStatus::Failed => StatusCode::OK,
    };
    Ok((status, Json(ConversionResponse::from_model(&job))))
}

/// GET /api/conversions/{job_id}
pub async fn get_conversion(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let job = ctx.conversions.get(parse_job_id(&job_id)?)?;
    Ok(Json(ConversionResponse::from_model(&job)))
}

/// GET /api/conversions/{job_id}/artifact
///
/// Serves the finished MP4 with range support. `409` while the job is
/// pending or after it failed.
pub async fn download_artifact(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
    request: Request,
) -> Result<Response, AppError> {
    let job = ctx.conversions.get(parse_job_id(&job_id)?)?;

    let output_path = match (&job.status, &job.output_path) {
        (ConversionStatus::Ready, Some(path)) => path.clone(),
        _ => {
            let body = json!({
                "error": format!("conversion is {}", job.status),
                "code": "not_available",
                "status": job.status,
            });
            return Ok((StatusCode::CONFLICT, Json(body)).into_response());
        }
    };

    if !tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
        return Err(Error::not_found("artifact", &output_path).into());
    }

    let response = ServeFile::new(&output_path)
        .oneshot(request)
        .await
        .map_err(|e| Error::internal(format!("serving artifact failed: {e}")))?;
    Ok(response.map(Body::new))
}
