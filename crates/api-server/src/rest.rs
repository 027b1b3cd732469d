//! REST API handlers for banner rotation and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use banner_core::error::{BanditError, RotationError, StoreError};
use banner_core::types::{Action, Banner, BannerId, Group, GroupId, Slot, SlotId};
use banner_rotation::RotationProcessor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Maximum length of a banner URL or a description.
const MAX_FIELD_LEN: usize = 2048;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<RotationProcessor>,
    pub node_id: String,
    pub start_time: Instant,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Deserialize)]
pub struct GetBannerRequest {
    pub slot: SlotId,
    pub group: GroupId,
}

#[derive(Debug, Deserialize)]
pub struct AddBannerRequest {
    pub url: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct AddGroupRequest {
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct RelationRequest {
    pub slot: SlotId,
    pub banner: BannerId,
}

#[derive(Debug, Deserialize)]
pub struct SlotRequest {
    pub slot: SlotId,
}

#[derive(Debug, Deserialize)]
pub struct BannerRequest {
    pub banner: BannerId,
}

#[derive(Debug, Deserialize)]
pub struct GroupRequest {
    pub group: GroupId,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

fn reject(status: StatusCode, error: &str, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Map a service error onto an HTTP status and error body.
pub fn error_response(err: RotationError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        RotationError::Store(e) if e.is_not_found() => (StatusCode::NOT_FOUND, "not_found"),
        RotationError::Store(StoreError::RelationExists { .. }) => (StatusCode::CONFLICT, "relation_exists"),
        RotationError::NoBannerAvailable { .. } => (StatusCode::NOT_FOUND, "no_banner_available"),
        RotationError::Selection(BanditError::DegenerateWeights) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "degenerate_weights")
        }
        RotationError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };

    if status.is_server_error() {
        error!(error = %err, "Request failed");
        metrics::counter!("api.errors").increment(1);
        return reject(status, code, "Internal processing error");
    }

    warn!(error = %err, status = status.as_u16(), "Request rejected");
    reject(status, code, err.to_string())
}

fn store_error(err: StoreError) -> (StatusCode, Json<ErrorResponse>) {
    error_response(err.into())
}

fn validate_id(name: &str, id: i64) -> ApiResult<()> {
    if id <= 0 {
        metrics::counter!("api.validation_errors").increment(1);
        return Err(error_response(RotationError::Validation(format!(
            "'{name}' must be a positive id"
        ))));
    }
    Ok(())
}

fn validate_text(name: &str, value: &str, required: bool) -> ApiResult<()> {
    let problem = if required && value.trim().is_empty() {
        Some(format!("'{name}' must not be empty"))
    } else if value.len() > MAX_FIELD_LEN {
        Some(format!("'{name}' exceeds maximum length"))
    } else {
        None
    };
    match problem {
        Some(msg) => {
            metrics::counter!("api.validation_errors").increment(1);
            Err(error_response(RotationError::Validation(msg)))
        }
        None => Ok(()),
    }
}

fn validate_action(action: &Action) -> ApiResult<()> {
    validate_id("slot", action.slot_id)?;
    validate_id("banner", action.banner_id)?;
    validate_id("group", action.group_id)
}

/// POST /get_banner: pick a banner for a slot and group.
pub async fn get_banner(
    State(state): State<AppState>,
    Json(req): Json<GetBannerRequest>,
) -> ApiResult<Json<Banner>> {
    validate_id("slot", req.slot)?;
    validate_id("group", req.group)?;
    state
        .processor
        .choose_banner(req.slot, req.group)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /show: a served banner was displayed.
pub async fn show(State(state): State<AppState>, Json(action): Json<Action>) -> ApiResult<StatusCode> {
    validate_action(&action)?;
    state.processor.show(action).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

/// POST /click: a served banner was clicked.
pub async fn click(State(state): State<AppState>, Json(action): Json<Action>) -> ApiResult<StatusCode> {
    validate_action(&action)?;
    state.processor.click(action).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

/// POST /slot
pub async fn add_slot(State(state): State<AppState>) -> ApiResult<Json<Slot>> {
    let slot = state.processor.store().add_slot().await.map_err(store_error)?;
    metrics::counter!("api.slots.created").increment(1);
    Ok(Json(slot))
}

/// POST /banner
pub async fn add_banner(
    State(state): State<AppState>,
    Json(req): Json<AddBannerRequest>,
) -> ApiResult<Json<Banner>> {
    validate_text("url", &req.url, true)?;
    validate_text("description", &req.description, false)?;
    let banner = state
        .processor
        .store()
        .add_banner(&req.url, &req.description)
        .await
        .map_err(store_error)?;
    metrics::counter!("api.banners.created").increment(1);
    Ok(Json(banner))
}

/// POST /group
pub async fn add_group(
    State(state): State<AppState>,
    Json(req): Json<AddGroupRequest>,
) -> ApiResult<Json<Group>> {
    validate_text("description", &req.description, false)?;
    let group = state
        .processor
        .store()
        .add_group(&req.description)
        .await
        .map_err(store_error)?;
    metrics::counter!("api.groups.created").increment(1);
    Ok(Json(group))
}

/// POST /relation
pub async fn add_relation(
    State(state): State<AppState>,
    Json(req): Json<RelationRequest>,
) -> ApiResult<StatusCode> {
    validate_id("slot", req.slot)?;
    validate_id("banner", req.banner)?;
    state
        .processor
        .store()
        .add_relation(req.slot, req.banner)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::OK)
}

/// DELETE /slot
pub async fn remove_slot(
    State(state): State<AppState>,
    Json(req): Json<SlotRequest>,
) -> ApiResult<StatusCode> {
    validate_id("slot", req.slot)?;
    state
        .processor
        .store()
        .remove_slot(req.slot)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /banner
pub async fn remove_banner(
    State(state): State<AppState>,
    Json(req): Json<BannerRequest>,
) -> ApiResult<StatusCode> {
    validate_id("banner", req.banner)?;
    state
        .processor
        .store()
        .remove_banner(req.banner)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /group
pub async fn remove_group(
    State(state): State<AppState>,
    Json(req): Json<GroupRequest>,
) -> ApiResult<StatusCode> {
    validate_id("group", req.group)?;
    state
        .processor
        .store()
        .remove_group(req.group)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /relation
pub async fn remove_relation(
    State(state): State<AppState>,
    Json(req): Json<RelationRequest>,
) -> ApiResult<StatusCode> {
    validate_id("slot", req.slot)?;
    validate_id("banner", req.banner)?;
    state
        .processor
        .store()
        .remove_relation(req.slot, req.banner)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /banners
pub async fn all_banners(State(state): State<AppState>) -> ApiResult<Json<Vec<Banner>>> {
    state
        .processor
        .store()
        .all_banners()
        .await
        .map(Json)
        .map_err(store_error)
}

/// GET /groups
pub async fn all_groups(State(state): State<AppState>) -> ApiResult<Json<Vec<Group>>> {
    state
        .processor
        .store()
        .all_groups()
        .await
        .map(Json)
        .map_err(store_error)
}

/// GET /health: health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: readiness probe.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live: liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
