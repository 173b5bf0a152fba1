mod api;
pub mod bench;
pub mod config;
pub mod state;
pub mod storage;
pub mod websocket;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use dose_core::actuator::MotorActuator;
use dose_core::clock::TimeKeeper;
use dose_core::kv::KvBackend;
use dose_engine::calib_store::CalibrationStore;
use dose_engine::head::{emergency_stop_all, DosingHead, Heads};
use dose_engine::log_manager::{DoseLogManager, DoseLogStore};
use dose_engine::sched_manager::ScheduleManager;
use dose_engine::sched_store::ScheduleStore;
use dose_engine::scheduler;
use dose_wifi::{keepalive, WifiSupervisor, WifiTimings};

use crate::bench::{BenchActuator, BenchWifi};
use crate::config::load_config;
use crate::state::AppState;
use crate::storage::{load_or_create_device_id, FileKv};
use crate::websocket::WsBroadcaster;

#[derive(Parser, Debug)]
#[command(name = "dose-server", about = "SquareDose doser control plane")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "squaredose.toml")]
    config: String,

    /// Listen address (overrides the config file)
    #[arg(short, long)]
    listen: Option<String>,

    /// Persistence directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load config from disk if the file exists
    let mut config = config::ServerConfig::default();
    if std::path::Path::new(&args.config).exists() {
        match load_config(&args.config) {
            Ok(loaded) => {
                info!(path = %args.config, "loaded configuration");
                config = loaded;
            }
            Err(e) => {
                warn!(path = %args.config, error = %e, "config file unreadable, using defaults");
            }
        }
    } else {
        info!(path = %args.config, "no config file, using defaults");
    }

    let listen = args.listen.unwrap_or(config.server.listen);
    let data_dir = args.data_dir.unwrap_or(config.storage.data_dir);

    info!(listen = %listen, data_dir = %data_dir, "dose-server starting");

    // Persistence backend + identity
    let kv: Arc<dyn KvBackend> = Arc::new(FileKv::new(&data_dir)?);
    let device_id = load_or_create_device_id(kv.as_ref())?;

    let clock = Arc::new(TimeKeeper::new());

    // Dosing heads over the bench actuator
    let actuator: Arc<dyn MotorActuator> = Arc::new(BenchActuator::new());
    let calib_store = Arc::new(CalibrationStore::new(kv.clone()));
    let heads: Heads = std::array::from_fn(|index| {
        Arc::new(DosingHead::new(
            index as u8,
            actuator.clone(),
            calib_store.clone(),
            clock.clone(),
        ))
    });
    for head in &heads {
        if let Err(e) = head.begin() {
            warn!(head = head.index(), error = %e, "calibration load failed, head on defaults");
        }
    }

    // Schedules + dosing log
    let schedules = Arc::new(ScheduleManager::new(ScheduleStore::new(kv.clone())));
    let logs = Arc::new(DoseLogManager::new(DoseLogStore::new(kv.clone())));
    schedules.set_log_manager(logs.clone());
    if let Err(e) = schedules.begin().await {
        warn!(error = %e, "schedule cache load failed, starting empty");
    }

    // Wi-Fi supervisor over the bench radio
    let wifi = Arc::new(WifiSupervisor::new(
        Arc::new(BenchWifi::new()),
        kv.clone(),
        clock.clone(),
        device_id,
        config.wifi.ap_password,
        WifiTimings::default(),
    ));
    if let Err(e) = wifi.begin().await {
        warn!(error = %e, "wifi bring-up failed");
    }
    info!(ap_ssid = wifi.ap_ssid(), "wifi supervisor ready");

    let broadcaster = WsBroadcaster::new();

    // Background tasks: scheduler tick + wifi keep-alive
    tokio::spawn(scheduler::run(
        schedules.clone(),
        heads.clone(),
        clock.clone(),
        logs.clone(),
        broadcaster.events_tx.clone(),
    ));
    tokio::spawn(keepalive::run(wifi.clone()));

    let state = AppState::new(
        clock,
        heads,
        actuator,
        schedules,
        logs,
        wifi,
        broadcaster,
    );

    let app = api::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(addr = %listen, "control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(state))
        .await?;

    Ok(())
}

/// On ctrl-c, cut every motor before the process exits.
async fn shutdown(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    warn!("shutdown requested, stopping all heads");
    let _ = emergency_stop_all(&state.inner.heads, state.inner.actuator.as_ref());
}
