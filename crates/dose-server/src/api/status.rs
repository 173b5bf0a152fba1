use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use dose_core::clock::TimeSource;

use crate::state::AppState;

pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let wifi = state.inner.wifi.status();
    let heads: Vec<Value> = state
        .inner
        .heads
        .iter()
        .map(|head| {
            let cal = head.calibration_data();
            json!({
                "index": head.index(),
                "is_dispensing": head.is_dispensing(),
                "is_calibrated": cal.is_calibrated,
                "ml_per_second": cal.ml_per_second,
            })
        })
        .collect();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_ms": state.inner.clock.monotonic_ms(),
        "wifi_mode": wifi.mode,
        "connected": wifi.connected,
        "ip": wifi.ip,
        "ap_ssid": wifi.ap_ssid,
        "heads": heads,
    }))
}

pub async fn get_time(State(state): State<AppState>) -> Json<Value> {
    let clock = &state.inner.clock;
    Json(json!({
        "timestamp": clock.wall_time().unwrap_or(0),
        "synced": clock.is_synced(),
        "source": clock.source().as_str(),
    }))
}

#[derive(Deserialize)]
pub struct SetTimeRequest {
    pub timestamp: u64,
}

/// Manual wall-clock sync; the client pushes phone time when NTP is
/// unreachable (typically while the device is in AP mode).
pub async fn set_time(
    State(state): State<AppState>,
    Json(body): Json<SetTimeRequest>,
) -> impl IntoResponse {
    match state
        .inner
        .clock
        .set_wall_time(body.timestamp, TimeSource::Manual)
    {
        Ok(()) => {
            info!(timestamp = body.timestamp, "wall clock set manually");
            (
                StatusCode::OK,
                Json(json!({ "success": true, "timestamp": body.timestamp })),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}
