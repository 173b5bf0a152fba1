use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use dose_core::DoserError;

use crate::state::AppState;

pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.inner.wifi.status();
    Json(json!({
        "mode": status.mode,
        "connected": status.connected,
        "ip": status.ip,
        "ap_ssid": status.ap_ssid,
    }))
}

#[derive(Deserialize)]
pub struct ConfigureRequest {
    pub ssid: String,
    pub password: String,
}

/// Store credentials and switch to STA. The response goes out before the
/// transition starts: switching tears down the AP the client is talking
/// through, so the switch runs on a detached worker.
pub async fn configure(
    State(state): State<AppState>,
    Json(body): Json<ConfigureRequest>,
) -> impl IntoResponse {
    match state.inner.wifi.set_credentials(&body.ssid, &body.password) {
        Ok(()) => {}
        Err(DoserError::Validation(msg)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": msg })),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    }

    let wifi = state.inner.wifi.clone();
    tokio::spawn(async move {
        match wifi.switch_to_sta().await {
            Ok(ip) => info!(ip = %ip, "joined configured network"),
            Err(e) => warn!(error = %e, "configured network unreachable, staying in AP"),
        }
    });

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "note": "connecting to network; this access point may go away",
        })),
    )
}

/// Forget credentials and fall back to AP mode. Response first, then the
/// (possibly disconnecting) transition from a detached worker.
pub async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.inner.wifi.clear_credentials() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        );
    }

    let ap_ssid = state.inner.wifi.ap_ssid().to_string();
    let wifi = state.inner.wifi.clone();
    tokio::spawn(async move {
        if let Err(e) = wifi.switch_to_ap().await {
            warn!(error = %e, "AP fallback after credential reset failed");
        }
    });

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "note": "credentials cleared, starting access point",
            "ap_ssid": ap_ssid,
        })),
    )
}
