pub mod calibration;
pub mod dose;
pub mod logs;
pub mod schedules;
pub mod status;
pub mod wifi;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;
use crate::websocket;

pub fn build_router(state: AppState) -> Router {
    // The mobile client calls from file:// and LAN origins; allow all.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Device status + time
        .route("/api/status", get(status::get_status))
        .route("/api/time", get(status::get_time).post(status::set_time))
        // Dosing
        .route("/api/dose", post(dose::start_dose))
        .route("/api/emergency-stop", post(dose::emergency_stop))
        // Calibration
        .route("/api/calibration", get(calibration::get_calibrations))
        .route("/api/calibration/:head", delete(calibration::reset_calibration))
        .route("/api/calibrate", post(calibration::apply_calibration))
        .route("/api/calibrate/start", post(calibration::start_calibration))
        // Wi-Fi
        .route("/api/wifi/status", get(wifi::get_status))
        .route("/api/wifi/configure", post(wifi::configure))
        .route("/api/wifi/reset", post(wifi::reset))
        // Schedules
        .route("/api/schedules", get(schedules::list).post(schedules::upsert))
        .route(
            "/api/schedules/:head",
            get(schedules::get_one).delete(schedules::delete_one),
        )
        // Dosing logs
        .route("/api/logs/dashboard", get(logs::dashboard))
        .route("/api/logs/hourly", get(logs::hourly))
        .route("/api/logs", delete(logs::clear))
        // Event stream
        .route("/ws", get(websocket::ws_handler))
        .layer(cors)
        .with_state(state)
}
