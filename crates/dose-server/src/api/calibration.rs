use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use dose_core::calibration::CALIBRATION_REFERENCE_ML;
use dose_core::dose::validate_head;

use crate::state::AppState;

pub async fn get_calibrations(State(state): State<AppState>) -> Json<Value> {
    let calibrations: Vec<Value> = state
        .inner
        .heads
        .iter()
        .map(|head| {
            let cal = head.calibration_data();
            json!({
                "head": head.index(),
                "ml_per_second": cal.ml_per_second,
                "is_calibrated": cal.is_calibrated,
                "last_calibration_time": cal.last_calibration_time,
            })
        })
        .collect();

    Json(json!({ "calibrations": calibrations }))
}

#[derive(Deserialize)]
pub struct StartCalibrationRequest {
    pub head: u8,
}

/// Run the fixed reference dose so the user can measure the actual
/// output. 202-style: the pump runs on a detached worker.
pub async fn start_calibration(
    State(state): State<AppState>,
    Json(body): Json<StartCalibrationRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_head(body.head) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        );
    }

    let head = state.inner.heads[body.head as usize].clone();
    let runtime_ms = match head.calibration_runtime_ms() {
        Ok(ms) => ms,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    };

    let broadcaster = state.inner.broadcaster.clone();
    tokio::spawn(async move {
        let result = head.run_for_duration(runtime_ms).await;
        if result.success {
            broadcaster.dose_complete(
                head.index(),
                result.target_volume_ml,
                result.estimated_volume_ml,
                result.actual_runtime_ms,
            );
        } else {
            let error = result
                .error_message
                .unwrap_or_else(|| "calibration dose failed".to_string());
            warn!(head = head.index(), error = %error, "calibration dose failed");
            broadcaster.dose_error(head.index(), &error);
        }
    });

    info!(head = body.head, runtime_ms, "calibration reference dose started");
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "head": body.head,
            "reference_volume": CALIBRATION_REFERENCE_ML,
            "runtime_ms": runtime_ms,
        })),
    )
}

#[derive(Deserialize)]
pub struct CalibrateRequest {
    pub head: u8,
    pub actual_volume: f64,
}

/// Submit the measured output of the reference dose.
pub async fn apply_calibration(
    State(state): State<AppState>,
    Json(body): Json<CalibrateRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_head(body.head) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        );
    }
    if !body.actual_volume.is_finite() || body.actual_volume <= 0.0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "actual_volume must be positive" })),
        );
    }

    let head = &state.inner.heads[body.head as usize];
    match head.calibrate(body.actual_volume) {
        Ok(data) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "head": body.head,
                "ml_per_second": data.ml_per_second,
                "is_calibrated": data.is_calibrated,
            })),
        ),
        // Rate out of band or a failed flash write: the head keeps its
        // previous calibration either way.
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

pub async fn reset_calibration(
    State(state): State<AppState>,
    Path(head): Path<u8>,
) -> impl IntoResponse {
    if let Err(e) = validate_head(head) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        );
    }

    match state.inner.heads[head as usize].reset_calibration() {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "head": head })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}
