//! REST handlers for slot/banner management, serving, statistics and
//! operational probes.

use crate::auth::PageUrl;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rotator_core::types::{Banner, PageStat, Slot, StatRow};
use rotator_core::{RotatorError, Shutdown};
use rotator_orchestrator::BannerRotator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub rotator: Arc<BannerRotator>,
    pub node_id: String,
    pub start_time: Instant,
    pub stats_interval: Duration,
    /// Fires when the HTTP server starts shutting down.
    pub shutdown: Shutdown,
}

// ─── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Error returned by every handler, rendered as JSON.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }
}

impl From<RotatorError> for ApiError {
    fn from(e: RotatorError) -> Self {
        match &e {
            RotatorError::Validation(_) => {
                metrics::counter!("api.validation_errors").increment(1);
                Self::new(StatusCode::BAD_REQUEST, "invalid_request", e.to_string())
            }
            RotatorError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", e.to_string()),
            RotatorError::AlreadyExists(_) => {
                Self::new(StatusCode::CONFLICT, "already_exists", e.to_string())
            }
            RotatorError::UnknownSegment(_) => {
                Self::new(StatusCode::NOT_FOUND, "unknown_segment", e.to_string())
            }
            _ => {
                error!(error = %e, "Request failed");
                metrics::counter!("api.errors").increment(1);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal processing error",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ─── Request / response bodies ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct AddSlotRequest {
    pub slot_id: u32,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddBannerRequest {
    pub banner_id: u32,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NextBannerRequest {
    pub slot_id: u32,
    pub user_age: u32,
    pub user_sex: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NextBannerResponse {
    pub banner_id: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClickRequest {
    pub slot_id: u32,
    pub banner_id: u32,
    pub user_age: u32,
    pub user_sex: String,
}

/// One statistics frame, also used by the streaming feed.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub time: DateTime<Utc>,
    pub stats: Vec<StatRow>,
}

impl StatsResponse {
    pub fn from_page(stat: &PageStat) -> Self {
        Self {
            time: Utc::now(),
            stats: stat.rows(),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub algorithm: String,
}

// ─── Slots ─────────────────────────────────────────────────────────────────

/// POST /v1/slots
pub async fn add_slot(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
    Json(req): Json<AddSlotRequest>,
) -> ApiResult<StatusCode> {
    state
        .rotator
        .add_slot(&page_url, req.slot_id, &req.description)
        .await?;
    Ok(StatusCode::CREATED)
}

/// GET /v1/slots
pub async fn list_slots(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
) -> ApiResult<Json<Vec<Slot>>> {
    Ok(Json(state.rotator.slots(&page_url).await?))
}

/// DELETE /v1/slots
pub async fn delete_all_slots(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
) -> ApiResult<StatusCode> {
    state.rotator.delete_all_slots(&page_url).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/slots/:slot_id
pub async fn delete_slot(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
    Path(slot_id): Path<u32>,
) -> ApiResult<StatusCode> {
    state.rotator.delete_slot(&page_url, slot_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Banners ───────────────────────────────────────────────────────────────

/// POST /v1/slots/:slot_id/banners
pub async fn add_banner(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
    Path(slot_id): Path<u32>,
    Json(req): Json<AddBannerRequest>,
) -> ApiResult<StatusCode> {
    state
        .rotator
        .add_banner_to_slot(&page_url, slot_id, req.banner_id, &req.description)
        .await?;
    Ok(StatusCode::CREATED)
}

/// GET /v1/slots/:slot_id/banners
pub async fn list_banners(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
    Path(slot_id): Path<u32>,
) -> ApiResult<Json<Vec<Banner>>> {
    Ok(Json(state.rotator.banners(&page_url, slot_id).await?))
}

/// DELETE /v1/slots/:slot_id/banners
pub async fn delete_all_banners(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
    Path(slot_id): Path<u32>,
) -> ApiResult<StatusCode> {
    state
        .rotator
        .delete_all_banners_from_slot(&page_url, slot_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/slots/:slot_id/banners/:banner_id
pub async fn delete_banner(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
    Path((slot_id, banner_id)): Path<(u32, u32)>,
) -> ApiResult<StatusCode> {
    state
        .rotator
        .delete_banner_from_slot(&page_url, slot_id, banner_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Serving ───────────────────────────────────────────────────────────────

/// POST /v1/next-banner
pub async fn next_banner(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
    Json(req): Json<NextBannerRequest>,
) -> ApiResult<Json<NextBannerResponse>> {
    let banner_id = state
        .rotator
        .next_banner(&page_url, req.slot_id, req.user_age, &req.user_sex)
        .await?;
    Ok(Json(NextBannerResponse { banner_id }))
}

/// POST /v1/clicks
pub async fn click(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
    Json(req): Json<ClickRequest>,
) -> ApiResult<StatusCode> {
    state
        .rotator
        .click_banner(
            &page_url,
            req.slot_id,
            req.banner_id,
            req.user_age,
            &req.user_sex,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Statistics ────────────────────────────────────────────────────────────

/// GET /v1/stats
pub async fn stats(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
) -> ApiResult<Json<StatsResponse>> {
    let stat = state.rotator.page_stat(&page_url).await.map_err(|e| {
        warn!(page_url = %page_url, error = %e, "Statistics read failed");
        e
    })?;
    Ok(Json(StatsResponse::from_page(&stat)))
}

// ─── Operational ───────────────────────────────────────────────────────────

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        algorithm: state.rotator.engine().name().to_string(),
    })
}

/// GET /ready. Returns 200 only while the server is not shutting down and
/// served outcomes can still reach the queue.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    let stopping = *state.shutdown.borrow() || state.shutdown.has_changed().is_err();
    if stopping || !state.rotator.is_accepting_events() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
