use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use dose_core::hourlog::{hour_floor, LOG_RETENTION_HOURS, SECONDS_PER_HOUR};
use dose_core::HEAD_COUNT;

use crate::state::AppState;

/// Upper bound on entries returned by one hourly query: the full
/// retention window across all heads.
const MAX_LOG_RESULTS: usize = (LOG_RETENTION_HOURS as usize + 1) * HEAD_COUNT;

fn time_unsynced() -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "wall clock not synchronized" })),
    )
}

/// Per-head day rollup for the client's dashboard screen.
pub async fn dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let Some(now) = state.wall_time() else {
        return time_unsynced();
    };

    let mut heads = Vec::with_capacity(HEAD_COUNT);
    for index in 0..HEAD_COUNT as u8 {
        // Schedule context enriches the rollup where one exists
        let (target, doses, per_dose) = match state.inner.schedules.get(index).await {
            Some(s) => (
                s.daily_target_volume_ml,
                s.doses_per_day,
                s.per_dose_volume_ml,
            ),
            None => (0.0, 0, 0.0),
        };

        match state
            .inner
            .logs
            .daily_summary(index, now, target, doses, per_dose)
            .await
        {
            Ok(summary) => heads.push(summary),
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
            }
        }
    }

    let count = heads.len();
    (
        StatusCode::OK,
        Json(json!({
            "heads": heads,
            "timestamp": now,
            "count": count,
        })),
    )
}

#[derive(Deserialize)]
pub struct HourlyQuery {
    /// Last N hours ending now; ignored when start/end are given.
    pub hours: Option<u64>,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

pub async fn hourly(
    State(state): State<AppState>,
    Query(query): Query<HourlyQuery>,
) -> impl IntoResponse {
    let Some(now) = state.wall_time() else {
        return time_unsynced();
    };

    let (start, end) = match (query.start, query.end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            let hours = query.hours.unwrap_or(24).clamp(1, LOG_RETENTION_HOURS);
            let end = hour_floor(now);
            (end.saturating_sub((hours - 1) * SECONDS_PER_HOUR), end)
        }
    };

    match state
        .inner
        .logs
        .hourly_logs(start, end, MAX_LOG_RESULTS)
        .await
    {
        Ok(logs) => {
            let count = logs.len();
            (
                StatusCode::OK,
                Json(json!({
                    "logs": logs,
                    "count": count,
                    "start": hour_floor(start),
                    "end": hour_floor(end),
                })),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

pub async fn clear(State(state): State<AppState>) -> impl IntoResponse {
    match state.inner.logs.clear_all().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}
