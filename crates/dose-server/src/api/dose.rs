use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use dose_core::dose::{validate_head, validate_volume};
use dose_engine::head::emergency_stop_all;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct DoseRequest {
    pub head: u8,
    pub volume: f64,
}

/// Ad-hoc dose. Returns 202 immediately and runs the dispense on a
/// detached worker so the HTTP response never waits on the pump; the
/// outcome arrives as a `dose_complete` / `dose_error` WebSocket event.
pub async fn start_dose(
    State(state): State<AppState>,
    Json(body): Json<DoseRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_head(body.head).and_then(|_| validate_volume(body.volume)) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        );
    }

    let head = state.inner.heads[body.head as usize].clone();
    let volume = body.volume;
    let worker_state = state.clone();
    tokio::spawn(async move {
        let result = head.dispense(volume).await;
        if result.success {
            // Log with the completion-time clock; a dose started before
            // sync but finishing after it still lands in the right hour.
            let wall_time = worker_state.wall_time().unwrap_or(0);
            if let Err(e) = worker_state
                .inner
                .logs
                .log_adhoc_dose(head.index(), result.estimated_volume_ml, wall_time)
                .await
            {
                warn!(head = head.index(), error = %e, "ad-hoc dose not logged");
            }
            worker_state.inner.broadcaster.dose_complete(
                head.index(),
                result.target_volume_ml,
                result.estimated_volume_ml,
                result.actual_runtime_ms,
            );
        } else {
            let error = result
                .error_message
                .unwrap_or_else(|| "unknown dispense failure".to_string());
            warn!(head = head.index(), error = %error, "ad-hoc dispense failed");
            worker_state
                .inner
                .broadcaster
                .dose_error(head.index(), &error);
        }
    });

    info!(head = body.head, volume_ml = body.volume, "ad-hoc dose accepted");
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "head": body.head,
            "target_volume": body.volume,
            "note": "dispensing started, result arrives on /ws",
        })),
    )
}

pub async fn emergency_stop(State(state): State<AppState>) -> impl IntoResponse {
    let result = emergency_stop_all(&state.inner.heads, state.inner.actuator.as_ref());

    let timestamp = state.wall_time().unwrap_or(0);
    state.inner.broadcaster.emergency_stop(timestamp);

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "all heads stopped" })),
        ),
        Err(e) => (
            StatusCode::OK,
            Json(json!({
                "success": false,
                "message": format!("stop issued with driver fault: {e}"),
            })),
        ),
    }
}
