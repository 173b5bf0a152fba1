/// Shared application state handed to every axum handler and background
/// task. Owned handles from the composition root; no globals.

use std::sync::Arc;

use dose_core::actuator::MotorActuator;
use dose_core::clock::TimeKeeper;
use dose_engine::head::Heads;
use dose_engine::log_manager::DoseLogManager;
use dose_engine::sched_manager::ScheduleManager;
use dose_wifi::WifiSupervisor;

use crate::websocket::WsBroadcaster;

#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub clock: Arc<TimeKeeper>,
    pub heads: Heads,
    pub actuator: Arc<dyn MotorActuator>,
    pub schedules: Arc<ScheduleManager>,
    pub logs: Arc<DoseLogManager>,
    pub wifi: Arc<WifiSupervisor>,
    pub broadcaster: WsBroadcaster,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<TimeKeeper>,
        heads: Heads,
        actuator: Arc<dyn MotorActuator>,
        schedules: Arc<ScheduleManager>,
        logs: Arc<DoseLogManager>,
        wifi: Arc<WifiSupervisor>,
        broadcaster: WsBroadcaster,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                clock,
                heads,
                actuator,
                schedules,
                logs,
                wifi,
                broadcaster,
            }),
        }
    }

    /// Current wall-clock seconds, or None while unsynced.
    pub fn wall_time(&self) -> Option<u64> {
        self.inner.clock.wall_time()
    }
}
