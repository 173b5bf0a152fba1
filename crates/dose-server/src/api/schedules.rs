use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use dose_core::dose::validate_head;
use dose_core::schedule::Schedule;

use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let schedules = state.inner.schedules.all().await;
    Json(json!({
        "count": schedules.len(),
        "schedules": schedules,
    }))
}

pub async fn get_one(State(state): State<AppState>, Path(head): Path<u8>) -> impl IntoResponse {
    if let Err(e) = validate_head(head) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        );
    }

    match state.inner.schedules.get(head).await {
        Some(schedule) => (StatusCode::OK, Json(json!(schedule))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no schedule for head {head}") })),
        ),
    }
}

#[derive(Deserialize)]
pub struct UpsertRequest {
    pub head: u8,
    pub daily_target: f64,
    pub doses_per_day: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub name: String,
}

fn default_enabled() -> bool {
    true
}

/// Create or replace a head's schedule. The response omits derived
/// fields; clients pick them up on the next GET.
pub async fn upsert(
    State(state): State<AppState>,
    Json(body): Json<UpsertRequest>,
) -> impl IntoResponse {
    let now = state.wall_time().unwrap_or(0);
    let schedule = match Schedule::new(
        body.head,
        body.name,
        body.daily_target,
        body.doses_per_day,
        body.enabled,
        now,
    ) {
        Ok(schedule) => schedule,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    };

    match state.inner.schedules.set(schedule).await {
        Ok(stored) => {
            info!(
                head = stored.head,
                interval_seconds = stored.interval_seconds,
                "schedule accepted"
            );
            (
                StatusCode::OK,
                Json(json!({ "success": true, "head": stored.head })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

/// Idempotent: deleting an absent schedule still reports success.
pub async fn delete_one(State(state): State<AppState>, Path(head): Path<u8>) -> impl IntoResponse {
    if let Err(e) = validate_head(head) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        );
    }

    match state.inner.schedules.delete(head).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "head": head })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}
