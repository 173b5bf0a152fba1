/// Scheduler tick task.
///
/// Wakes every second, idles until the wall clock is synced, then runs the
/// due check. Hourly log pruning piggy-backs on the tick so no separate
/// task is needed. Subsystem faults are logged and the loop continues; the
/// task never exits on its own.

use std::sync::Arc;
use std::time::Duration;

use dose_core::clock::TimeKeeper;
use dose_core::hourlog::hour_floor;
use dose_core::SCHEDULER_TICK_MS;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::head::Heads;
use crate::log_manager::DoseLogManager;
use crate::sched_manager::ScheduleManager;

pub async fn run(
    manager: Arc<ScheduleManager>,
    heads: Heads,
    clock: Arc<TimeKeeper>,
    log: Arc<DoseLogManager>,
    events_tx: broadcast::Sender<String>,
) {
    info!("scheduler task started");

    let mut interval = tokio::time::interval(Duration::from_millis(SCHEDULER_TICK_MS));
    // A dispense can hold a tick for minutes; don't replay the backlog,
    // the due predicate already catches up on the next real tick.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_prune_hour: u64 = 0;

    loop {
        interval.tick().await;

        let Some(now) = clock.wall_time() else {
            continue; // wall clock unsynced; schedules wait
        };

        for execution in manager.check_and_execute(now, &heads).await {
            let _ = events_tx.send(
                json!({
                    "event": "schedule_executed",
                    "head": execution.head,
                    "volume": execution.volume_ml,
                    "estimated_volume": execution.estimated_volume_ml,
                    "execution_count": execution.execution_count,
                    "timestamp": now,
                })
                .to_string(),
            );
        }

        let hour = hour_floor(now);
        if hour != last_prune_hour {
            last_prune_hour = hour;
            if let Err(e) = log.prune(now).await {
                warn!(error = %e, "hourly log prune failed");
            }
        }
    }
}
