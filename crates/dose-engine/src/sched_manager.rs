/// In-memory authoritative cache of the four schedule slots.
///
/// One mutex guards the slot array. The critical discipline: the mutex is
/// NEVER held across a dispense. `check_and_execute` copies the due record
/// out under the lock, releases it, runs the blocking dispense, then
/// re-acquires to commit execution progress. During that window the HTTP
/// surface may freely read or mutate other slots (or even this one: a
/// deleted slot simply skips its progress commit).

use std::sync::{Arc, Mutex as StdMutex};

use dose_core::schedule::Schedule;
use dose_core::{Result, HEAD_COUNT};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::head::Heads;
use crate::log_manager::DoseLogManager;
use crate::sched_store::ScheduleStore;

/// A scheduled dose that went through; surfaced as a WebSocket event.
#[derive(Debug, Clone)]
pub struct ScheduledExecution {
    pub head: u8,
    pub volume_ml: f64,
    pub estimated_volume_ml: f64,
    pub execution_count: u32,
}

pub struct ScheduleManager {
    store: ScheduleStore,
    slots: Mutex<[Option<Schedule>; HEAD_COUNT]>,
    /// Set after construction; breaks the manager↔log dependency cycle.
    log: StdMutex<Option<Arc<DoseLogManager>>>,
}

impl ScheduleManager {
    pub fn new(store: ScheduleStore) -> Self {
        Self {
            store,
            slots: Mutex::new([None, None, None, None]),
            log: StdMutex::new(None),
        }
    }

    pub fn set_log_manager(&self, log: Arc<DoseLogManager>) {
        *self.log.lock().unwrap_or_else(|e| e.into_inner()) = Some(log);
    }

    fn log_manager(&self) -> Option<Arc<DoseLogManager>> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Warm the cache from flash at boot.
    pub async fn begin(&self) -> Result<()> {
        let mut slots = self.slots.lock().await;
        for schedule in self.store.load_all(false)? {
            let head = schedule.head as usize;
            if head >= HEAD_COUNT {
                warn!(head, "discarding stored schedule with bad head index");
                continue;
            }
            slots[head] = Some(schedule);
        }
        let present = slots.iter().filter(|s| s.is_some()).count();
        info!(schedules = present, "schedule cache loaded");
        Ok(())
    }

    /// Create or replace the head's schedule. A replaced schedule starts
    /// from a clean execution history, so it fires on the next tick.
    pub async fn set(&self, schedule: Schedule) -> Result<Schedule> {
        schedule.validate()?;
        self.store.save(&schedule)?;
        let mut slots = self.slots.lock().await;
        slots[schedule.head as usize] = Some(schedule.clone());
        info!(
            head = schedule.head,
            daily_target_ml = schedule.daily_target_volume_ml,
            doses_per_day = schedule.doses_per_day,
            enabled = schedule.enabled,
            "schedule stored"
        );
        Ok(schedule)
    }

    pub async fn get(&self, head: u8) -> Option<Schedule> {
        if head as usize >= HEAD_COUNT {
            return None;
        }
        self.slots.lock().await[head as usize].clone()
    }

    pub async fn delete(&self, head: u8) -> Result<()> {
        self.store.delete(head)?;
        self.slots.lock().await[head as usize] = None;
        info!(head, "schedule deleted");
        Ok(())
    }

    /// Snapshot of all present schedules (enabled or not; the surface
    /// renders disabled ones too; the due check filters on `enabled`).
    pub async fn all(&self) -> Vec<Schedule> {
        self.slots
            .lock()
            .await
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// One scheduler tick. `now` is used for both the due check and the
    /// `last_execution_time` commit, so "should execute" stays monotonic
    /// with respect to "was executed". A failed dispense commits nothing
    /// and the slot stays due for an immediate retry next tick.
    pub async fn check_and_execute(&self, now: u64, heads: &Heads) -> Vec<ScheduledExecution> {
        let mut executed = Vec::new();

        for index in 0..HEAD_COUNT {
            let due = {
                let slots = self.slots.lock().await;
                match &slots[index] {
                    Some(s) if s.should_execute(now) => Some(s.clone()),
                    _ => None,
                }
            };
            let Some(schedule) = due else { continue };

            // Lock released: the dispense may block for minutes.
            let result = heads[index].dispense(schedule.per_dose_volume_ml).await;
            if !result.success {
                warn!(
                    head = schedule.head,
                    volume_ml = schedule.per_dose_volume_ml,
                    error = result.error_message.as_deref().unwrap_or("unknown"),
                    "scheduled dispense failed, will retry next tick"
                );
                continue;
            }

            if let Some(log) = self.log_manager() {
                if let Err(e) = log
                    .log_scheduled_dose(schedule.head, result.estimated_volume_ml, now)
                    .await
                {
                    warn!(head = schedule.head, error = %e, "scheduled dose not logged");
                }
            }

            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots[index].as_mut() {
                slot.last_execution_time = now;
                slot.execution_count += 1;
                slot.updated_at = now;
                let count = slot.execution_count;
                let snapshot = slot.clone();
                if let Err(e) = self.store.save(&snapshot) {
                    warn!(head = schedule.head, error = %e, "execution progress not persisted");
                }
                executed.push(ScheduledExecution {
                    head: schedule.head,
                    volume_ml: schedule.per_dose_volume_ml,
                    estimated_volume_ml: result.estimated_volume_ml,
                    execution_count: count,
                });
            }
            // Slot deleted mid-dispense: nothing to commit.
        }

        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib_store::CalibrationStore;
    use crate::head::DosingHead;
    use crate::log_manager::{DoseLogManager, DoseLogStore};
    use crate::testutil::MockActuator;
    use dose_core::calibration::CALIBRATION_REFERENCE_ML;
    use dose_core::clock::TimeKeeper;
    use dose_core::kv::MemoryKv;

    const T0: u64 = 1_748_779_200; // 2025-06-01 12:00:00 UTC

    struct Fixture {
        manager: Arc<ScheduleManager>,
        heads: Heads,
        actuator: Arc<MockActuator>,
        log: Arc<DoseLogManager>,
        store_kv: Arc<MemoryKv>,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKv::new());
        let calib = Arc::new(CalibrationStore::new(kv.clone()));
        let actuator = Arc::new(MockActuator::new());
        let clock = Arc::new(TimeKeeper::new());
        let heads: Heads = std::array::from_fn(|i| {
            let head = Arc::new(DosingHead::new(
                i as u8,
                actuator.clone(),
                calib.clone(),
                clock.clone(),
            ));
            head.begin().unwrap();
            // 100 mL/s keeps test dispenses in the tens of milliseconds
            head.calibrate(100.0 * CALIBRATION_REFERENCE_ML).unwrap();
            head
        });
        let manager = Arc::new(ScheduleManager::new(ScheduleStore::new(kv.clone())));
        let log = Arc::new(DoseLogManager::new(DoseLogStore::new(kv.clone())));
        manager.set_log_manager(log.clone());
        Fixture {
            manager,
            heads,
            actuator,
            log,
            store_kv: kv,
        }
    }

    fn schedule(head: u8, daily_target: f64, doses_per_day: u32) -> Schedule {
        Schedule::new(head, "test".to_string(), daily_target, doses_per_day, true, T0).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_delete_roundtrip() {
        let fx = fixture();
        fx.manager.set(schedule(1, 24.0, 12)).await.unwrap();

        let got = fx.manager.get(1).await.unwrap();
        assert_eq!(got.interval_seconds, 7_200);
        assert!((got.per_dose_volume_ml - 2.0).abs() < 1e-9);

        assert_eq!(fx.manager.all().await.len(), 1);
        fx.manager.delete(1).await.unwrap();
        assert!(fx.manager.get(1).await.is_none());
        // Deleting an absent slot is a no-op, not an error
        fx.manager.delete(1).await.unwrap();
        assert!(fx.manager.get(1).await.is_none());
    }

    #[tokio::test]
    async fn test_begin_reloads_from_store() {
        let fx = fixture();
        fx.manager.set(schedule(2, 48.0, 24)).await.unwrap();

        // Fresh manager over the same backing store sees the record
        let reborn = ScheduleManager::new(ScheduleStore::new(fx.store_kv.clone()));
        reborn.begin().await.unwrap();
        assert_eq!(reborn.get(2).await.unwrap().doses_per_day, 24);
    }

    #[tokio::test]
    async fn test_first_execution_fires_immediately() {
        let fx = fixture();
        // 288 mL/day over 12 doses = 24 mL per dose, 240ms at 100 mL/s
        fx.manager.set(schedule(0, 288.0, 12)).await.unwrap();

        let executed = fx.manager.check_and_execute(T0 + 1, &fx.heads).await;
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].head, 0);
        assert_eq!(executed[0].execution_count, 1);

        let after = fx.manager.get(0).await.unwrap();
        assert_eq!(after.last_execution_time, T0 + 1);
        assert_eq!(after.execution_count, 1);
    }

    #[tokio::test]
    async fn test_fires_once_per_interval() {
        let fx = fixture();
        fx.manager.set(schedule(0, 288.0, 12)).await.unwrap();

        // First fire at t1
        let t1 = T0 + 1;
        assert_eq!(fx.manager.check_and_execute(t1, &fx.heads).await.len(), 1);
        // Not due again inside the 7200s interval
        assert!(fx
            .manager
            .check_and_execute(t1 + 7_199, &fx.heads)
            .await
            .is_empty());
        // Due exactly at the interval, once
        let t2 = t1 + 7_200;
        assert_eq!(fx.manager.check_and_execute(t2, &fx.heads).await.len(), 1);
        assert!(fx.manager.check_and_execute(t2, &fx.heads).await.is_empty());

        let after = fx.manager.get(0).await.unwrap();
        assert_eq!(after.last_execution_time, t2);
        assert_eq!(after.execution_count, 2);
        assert_eq!(fx.actuator.start_count(0), 2);
    }

    #[tokio::test]
    async fn test_failed_dispense_stays_due_and_retries() {
        let fx = fixture();
        fx.manager.set(schedule(0, 288.0, 12)).await.unwrap();

        fx.actuator.fail_next_start();
        assert!(fx.manager.check_and_execute(T0, &fx.heads).await.is_empty());

        // Progress untouched, so the very next tick retries
        let after = fx.manager.get(0).await.unwrap();
        assert_eq!(after.last_execution_time, 0);
        assert_eq!(after.execution_count, 0);

        let retried = fx.manager.check_and_execute(T0 + 1, &fx.heads).await;
        assert_eq!(retried.len(), 1);
    }

    #[tokio::test]
    async fn test_execution_writes_scheduled_log_entry() {
        let fx = fixture();
        fx.manager.set(schedule(0, 288.0, 12)).await.unwrap();
        fx.manager.check_and_execute(T0, &fx.heads).await;

        let logs = fx.log.hourly_logs(T0, T0, 16).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].adhoc_volume_ml, 0.0);
        // Estimated volume tracks the 24 mL per-dose target
        assert!((logs[0].scheduled_volume_ml - 24.0).abs() < 24.0 * 0.25);
    }

    #[tokio::test]
    async fn test_disabled_schedule_never_executes() {
        let fx = fixture();
        let mut s = schedule(0, 288.0, 12);
        s.enabled = false;
        fx.manager.set(s).await.unwrap();
        assert!(fx
            .manager
            .check_and_execute(T0 + 99_999, &fx.heads)
            .await
            .is_empty());
        assert_eq!(fx.actuator.start_count(0), 0);
    }

    #[tokio::test]
    async fn test_multiple_heads_execute_in_slot_order() {
        let fx = fixture();
        fx.manager.set(schedule(2, 288.0, 12)).await.unwrap();
        fx.manager.set(schedule(0, 144.0, 12)).await.unwrap();

        let executed = fx.manager.check_and_execute(T0, &fx.heads).await;
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0].head, 0);
        assert_eq!(executed[1].head, 2);
    }

    #[tokio::test]
    async fn test_progress_persists_across_reload() {
        let fx = fixture();
        fx.manager.set(schedule(0, 288.0, 12)).await.unwrap();
        fx.manager.check_and_execute(T0, &fx.heads).await;

        let reborn = ScheduleManager::new(ScheduleStore::new(fx.store_kv.clone()));
        reborn.begin().await.unwrap();
        let loaded = reborn.get(0).await.unwrap();
        assert_eq!(loaded.last_execution_time, T0);
        assert_eq!(loaded.execution_count, 1);
    }
}
