//! HTTP API.
//!
//! Endpoints:
//! - GET  /                          - Service descriptor
//! - POST /v1/verify-live            - Liveness session only
//! - POST /v1/verify                 - Liveness + device trust, issues a credential
//! - GET  /v1/device-token/:token    - Validate a credential
//! - POST /v1/revoke-device          - Revoke a credential
//!
//! Verification endpoints take `multipart/form-data`: a `video` part holding
//! the recorded video (or several `video` parts, one frame image each, in
//! capture order), an optional `audio` WAV part and a `device_id` text field.
//! Sending `device_id` first lets a locked-out device be refused before any
//! media is written.

use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use certivo_core::{fuse_with_device_trust, Evidence, ReasonCode, RequestThresholds, VerificationResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential::{DeviceClaims, TokenError, TokenIssuer};
use crate::device_trust::DeviceTrustProvider;
use crate::engine::{EngineError, EngineHandle, VerifyJob, VideoInput};
use crate::rate_limiter::{RateLimited, RateLimiter};
use crate::store::{DeviceStore, StoreError, TrustedDevice};

/// Shared state behind every handler.
pub struct AppState {
    pub engine: EngineHandle,
    pub store: DeviceStore,
    pub tokens: TokenIssuer,
    pub trust: Box<dyn DeviceTrustProvider>,
    pub limiter: Mutex<RateLimiter>,
    pub upload_dir: PathBuf,
    pub verify_timeout: Duration,
    pub thresholds: RequestThresholds,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    RateLimited(#[from] RateLimited),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("credential: {0}")]
    Token(#[from] TokenError),
    #[error("upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            ApiError::Engine(EngineError::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            ApiError::Engine(_) => (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNAVAILABLE"),
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            ApiError::Token(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/v1/verify-live", post(verify_live))
        .route("/v1/verify", post(verify))
        .route("/v1/device-token/:token", get(validate_token))
        .route("/v1/revoke-device", post(revoke_device))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn service_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "certivo",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "verify_live": "POST /v1/verify-live",
            "verify": "POST /v1/verify",
            "validate_device_token": "GET /v1/device-token/{token}",
            "revoke_device": "POST /v1/revoke-device",
        }
    }))
}

// ── Uploads ───────────────────────────────────────────────────────────────────

/// One request's files, staged under their own directory and removed on drop.
struct StagedUpload {
    dir: PathBuf,
    videos: Vec<PathBuf>,
    audio: Option<PathBuf>,
    device_id: String,
}

impl StagedUpload {
    fn job(&self) -> VerifyJob {
        let video = match self.videos.as_slice() {
            [single] => VideoInput::File(single.clone()),
            frames => VideoInput::Frames(frames.to_vec()),
        };
        VerifyJob {
            video,
            audio: self.audio.clone(),
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "failed to remove upload");
        }
    }
}

/// Extension from the client's file name, when it is short and alphanumeric.
fn upload_extension(file_name: Option<&str>) -> &str {
    file_name
        .and_then(|name| FsPath::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin")
}

/// Stream the form to disk. `device_id` goes through the rate limiter as soon as it arrives.
async fn stage_upload(state: &AppState, mut multipart: Multipart) -> Result<StagedUpload, ApiError> {
    let dir = state.upload_dir.join(uuid::Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&dir).await?;
    let mut upload = StagedUpload {
        dir,
        videos: Vec::new(),
        audio: None,
        device_id: String::new(),
    };

    let bad = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.to_string());
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("video") => {
                let file_name = format!(
                    "video_{:05}.{}",
                    upload.videos.len(),
                    upload_extension(field.file_name())
                );
                let path = upload.dir.join(file_name);
                tokio::fs::write(&path, field.bytes().await.map_err(bad)?).await?;
                upload.videos.push(path);
            }
            Some("audio") => {
                let path = upload.dir.join("audio.wav");
                tokio::fs::write(&path, field.bytes().await.map_err(bad)?).await?;
                upload.audio = Some(path);
            }
            Some("device_id") => {
                upload.device_id = field.text().await.map_err(bad)?.trim().to_string();
                if !upload.device_id.is_empty() {
                    check_rate_limit(state, &upload.device_id)?;
                }
            }
            other => {
                tracing::debug!(field = ?other, "ignoring unknown form field");
            }
        }
    }

    if upload.device_id.is_empty() {
        return Err(ApiError::BadRequest("device_id is required".to_string()));
    }
    if upload.videos.is_empty() {
        return Err(ApiError::BadRequest("a video upload is required".to_string()));
    }
    Ok(upload)
}

fn check_rate_limit(state: &AppState, device_id: &str) -> Result<(), ApiError> {
    state
        .limiter
        .lock()
        .map_err(|_| ApiError::Internal("rate limiter poisoned".to_string()))?
        .check(device_id)?;
    Ok(())
}

fn record_outcome(state: &AppState, device_id: &str, passed: bool) {
    if let Ok(mut limiter) = state.limiter.lock() {
        if passed {
            limiter.record_success(device_id);
        } else {
            limiter.record_failure(device_id);
        }
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct VerifyLiveResponse {
    pub verified: bool,
    pub liveness_score: f64,
    pub lip_sync_score: f64,
    pub details: VerificationResult,
}

async fn verify_live(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<VerifyLiveResponse>, ApiError> {
    let upload = stage_upload(&state, multipart).await?;

    let result = state
        .engine
        .verify(upload.job(), state.verify_timeout)
        .await?;
    record_outcome(&state, &upload.device_id, result.challenge_passed);

    tracing::info!(
        device_id = %upload.device_id,
        video_parts = upload.videos.len(),
        passed = result.challenge_passed,
        "live verification"
    );

    Ok(Json(VerifyLiveResponse {
        verified: result.challenge_passed,
        liveness_score: result.liveness_score,
        lip_sync_score: result.lip_sync_score,
        details: result,
    }))
}

#[derive(Debug, Serialize)]
pub struct VerifyDetails {
    pub reasons: Vec<ReasonCode>,
    pub timestamp_utc: String,
    pub message: String,
    pub evidence: Evidence,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    pub liveness_score: f64,
    pub lip_sync_score: f64,
    pub challenge_passed: bool,
    pub replay_flag: bool,
    pub device_trust_score: f64,
    pub trusted_device_token: Option<String>,
    pub details: VerifyDetails,
}

async fn verify(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<VerifyResponse>, ApiError> {
    let upload = stage_upload(&state, multipart).await?;
    let device_id = upload.device_id.clone();

    let result = state
        .engine
        .verify(upload.job(), state.verify_timeout)
        .await?;
    drop(upload);

    let trust = state.trust.score(&device_id);
    let decision = fuse_with_device_trust(&result, trust, &state.thresholds);
    record_outcome(&state, &device_id, decision.verified);

    let token = if decision.verified {
        let (token, claims) = state.tokens.issue(&device_id)?;
        state
            .store
            .insert(&TrustedDevice {
                token_id: claims.token_id.clone(),
                device_id: device_id.clone(),
                verification_timestamp: claims.timestamp_utc,
            })
            .await?;
        let held = state.store.list_by_device(&device_id).await?.len();
        tracing::info!(
            device_id = %device_id,
            token_id = %claims.token_id,
            credentials = held,
            "device credential issued"
        );
        Some(token)
    } else {
        None
    };

    tracing::info!(
        device_id = %device_id,
        verified = decision.verified,
        device_trust = trust,
        "device verification"
    );

    Ok(Json(VerifyResponse {
        verified: decision.verified,
        liveness_score: result.liveness_score,
        lip_sync_score: result.lip_sync_score,
        challenge_passed: result.challenge_passed,
        replay_flag: result.replay_flag,
        device_trust_score: decision.device_trust_score,
        trusted_device_token: token,
        details: VerifyDetails {
            reasons: decision.reasons,
            timestamp_utc: chrono::Utc::now().to_rfc3339(),
            message: result.message,
            evidence: result.evidence,
        },
    }))
}

// ── Credentials ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TokenStatus {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<DeviceClaims>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl TokenStatus {
    fn invalid(reason: &'static str) -> Self {
        Self {
            valid: false,
            payload: None,
            reason: Some(reason),
        }
    }
}

async fn validate_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<TokenStatus>, ApiError> {
    let claims = match state.tokens.decode(&token) {
        Ok(claims) => claims,
        Err(TokenError::Expired) => return Ok(Json(TokenStatus::invalid("Token expired"))),
        Err(e) => {
            tracing::debug!(error = %e, "token rejected");
            return Ok(Json(TokenStatus::invalid("Invalid token")));
        }
    };

    if state.store.get(&claims.token_id).await?.is_none() {
        return Ok(Json(TokenStatus::invalid("Token revoked")));
    }

    Ok(Json(TokenStatus {
        valid: true,
        payload: Some(claims),
        reason: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeForm {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Expired but authentic credentials can still be revoked.
async fn revoke_device(
    State(state): State<Arc<AppState>>,
    Form(form): Form<RevokeForm>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let claims = match state.tokens.verify_signature(&form.token) {
        Ok(claims) => claims,
        Err(e) => {
            return Ok(Json(RevokeResponse {
                revoked: false,
                token_id: None,
                error: Some(e.to_string()),
            }))
        }
    };

    if !state.store.remove(&claims.token_id).await? {
        return Ok(Json(RevokeResponse {
            revoked: false,
            token_id: Some(claims.token_id),
            error: Some("token not found".to_string()),
        }));
    }

    tracing::info!(token_id = %claims.token_id, device_id = %claims.device_id, "device credential revoked");
    Ok(Json(RevokeResponse {
        revoked: true,
        token_id: Some(claims.token_id),
        error: None,
    }))
}
