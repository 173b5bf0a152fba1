/// Wi-Fi keep-alive task.
///
/// Ten-second baseline cadence; the heavy lifting (reconnects, AP
/// fallback, periodic STA retries) lives in
/// `WifiSupervisor::keepalive_tick` so it stays unit-testable. STA
/// association attempts inside a tick can stretch the effective cadence;
/// that is intentional, the supervisor's timers are monotonic and absorb
/// the drift.

use std::sync::Arc;
use std::time::Duration;

use dose_core::WIFI_KEEPALIVE_TICK_MS;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::supervisor::WifiSupervisor;

pub async fn run(supervisor: Arc<WifiSupervisor>) {
    info!("wifi keep-alive task started");

    let mut interval = tokio::time::interval(Duration::from_millis(WIFI_KEEPALIVE_TICK_MS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        supervisor.keepalive_tick().await;
    }
}
