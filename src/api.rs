//! HTTP surface of the generation service.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::build::{BuildResource, BuildStatus};
use crate::errors::PipelineError;
use crate::pipeline::PipelineRunner;
use crate::storage::resolve_artifact;

/// Conversation key used when a request does not name a user.
const DEFAULT_USER: &str = "default_user";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub runner: PipelineRunner,
    /// Whether generate requests block until the build finishes.
    pub wait_for_build: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("wait_for_build", &self.wait_for_build)
            .finish_non_exhaustive()
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Pub/Sub push envelope carrying a base64 build resource.
#[derive(Deserialize)]
pub struct PubSubEnvelope {
    pub message: PubSubMessage,
}

#[derive(Deserialize)]
pub struct PubSubMessage {
    #[serde(default)]
    pub data: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Pipeline(PipelineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": msg}))).into_response()
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
            }
            ApiError::Pipeline(err) => {
                let mut payload = json!({"error": err.to_string()});
                if let Some(code) = &err.generated_code {
                    payload["generated_code"] = json!(code);
                }
                if let Some(id) = &err.build_id {
                    payload["build_id"] = json!(id);
                }
                if let Some(log) = &err.build_log_url {
                    payload["build_log_url"] = json!(log);
                }
                (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/generate", post(generate))
        .route("/api/v1/builds/{id}", get(build_status))
        .route("/api/v1/webhooks/build", post(build_webhook))
        .route("/health", get(health))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn generate(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload
        .map_err(|rejection| ApiError::BadRequest(format!("Invalid request body: {rejection}")))?;

    let prompt = request.prompt.as_deref().map(str::trim).unwrap_or_default();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("No prompt provided".to_string()));
    }
    let user = request.user_id.as_deref().unwrap_or(DEFAULT_USER);

    info!(user, wait = state.wait_for_build, "generation requested");
    let outcome = state
        .runner
        .run(user, prompt, state.wait_for_build)
        .await
        .map_err(ApiError::Pipeline)?;
    Ok(Json(outcome.to_response()))
}

async fn build_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(mut job) = state.runner.jobs.get(&id).await else {
        return Err(ApiError::NotFound(format!("Build {id} not found")));
    };

    // Builds that finished through the webhook have no download URL yet;
    // mint one on first read. Status still gets served when that fails.
    if job.status == BuildStatus::Success && job.artifact_url.is_none() {
        let resolved = resolve_artifact(
            state.runner.artifacts.as_ref(),
            &state.runner.config.bucket,
            &state.runner.config.artifact_prefix,
            &job,
        )
        .await;
        match resolved {
            Ok(url) => {
                state.runner.jobs.set_artifact_url(&job.id, &url).await;
                job.artifact_url = Some(url);
            }
            Err(err) => warn!(build = %job.id, error = %err, "artifact resolution failed"),
        }
    }

    let mut payload = json!({
        "build_id": job.id,
        "status": job.status.as_str(),
    });
    if let Some(url) = &job.artifact_url {
        payload["apk_download_url"] = json!(url);
    }
    if let Some(log) = &job.log_url {
        payload["build_log_url"] = json!(log);
    }
    Ok(Json(payload))
}

async fn build_webhook(
    State(state): State<SharedState>,
    payload: Result<Json<PubSubEnvelope>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(envelope) = payload.map_err(|rejection| {
        ApiError::BadRequest(format!("Invalid Pub/Sub envelope: {rejection}"))
    })?;

    let decoded = BASE64
        .decode(envelope.message.data.as_bytes())
        .map_err(|_| ApiError::BadRequest("Message data is not valid base64".to_string()))?;
    let resource: BuildResource = serde_json::from_slice(&decoded)
        .map_err(|_| ApiError::BadRequest("Message data is not a build resource".to_string()))?;

    // Cloud Build emits statuses this service does not track. Those are
    // acknowledged without a store write so Pub/Sub stops redelivering.
    let parsed = resource
        .status
        .as_deref()
        .map(|raw| (raw.to_string(), raw.parse::<BuildStatus>()));
    match parsed {
        Some((_, Ok(_))) => {}
        Some((raw, Err(_))) => {
            warn!(status = %raw, "ignoring webhook with unrecognized build status");
            return Ok(StatusCode::NO_CONTENT);
        }
        None => {
            warn!("ignoring webhook without a build status");
            return Ok(StatusCode::NO_CONTENT);
        }
    }

    let Some(job) = resource.into_job() else {
        warn!("ignoring webhook without a build id");
        return Ok(StatusCode::NO_CONTENT);
    };

    let known = state.runner.jobs.upsert(job.clone()).await;
    info!(build = %job.id, status = %job.status, known, "webhook applied");
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────
