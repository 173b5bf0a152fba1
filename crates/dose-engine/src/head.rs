/// One pump head: volume→runtime conversion, motor actuation, calibration.
///
/// The dispense sleep is interruptible: `stop_dispensing` and the
/// emergency-stop path bump a watch channel the sleeping task selects on,
/// so the motor stops AND the task returns promptly with an "interrupted"
/// result instead of sleeping out the full runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use dose_core::actuator::{Direction, MotorActuator};
use dose_core::calibration::{CalibrationData, CALIBRATION_REFERENCE_ML};
use dose_core::clock::TimeKeeper;
use dose_core::dose::{DoseResult, MAX_RUNTIME_MS, MIN_RUNTIME_MS};
use dose_core::{DoserError, Result, HEAD_COUNT};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::calib_store::CalibrationStore;

pub type Heads = [Arc<DosingHead>; HEAD_COUNT];

pub struct DosingHead {
    head: u8,
    actuator: Arc<dyn MotorActuator>,
    store: Arc<CalibrationStore>,
    clock: Arc<TimeKeeper>,
    calibration: StdMutex<CalibrationData>,
    /// Serializes dispenses on this head; a second caller fails fast with Busy.
    dispense_guard: Mutex<()>,
    dispensing: AtomicBool,
    /// Generation counter; a bump interrupts the in-flight dispense sleep.
    stop_tx: watch::Sender<u64>,
}

impl DosingHead {
    pub fn new(
        head: u8,
        actuator: Arc<dyn MotorActuator>,
        store: Arc<CalibrationStore>,
        clock: Arc<TimeKeeper>,
    ) -> Self {
        Self {
            head,
            actuator,
            store,
            clock,
            calibration: StdMutex::new(CalibrationData::default()),
            dispense_guard: Mutex::new(()),
            dispensing: AtomicBool::new(false),
            stop_tx: watch::channel(0).0,
        }
    }

    pub fn index(&self) -> u8 {
        self.head
    }

    /// Load persisted calibration; absent keys keep defaults.
    pub fn begin(&self) -> Result<()> {
        let data = self.store.load(self.head)?;
        *self.calibration.lock().unwrap_or_else(|e| e.into_inner()) = data;
        Ok(())
    }

    pub fn calibration_data(&self) -> CalibrationData {
        *self.calibration.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_dispensing(&self) -> bool {
        self.dispensing.load(Ordering::Acquire)
    }

    /// Dispense a target volume. Suspends the calling task for the computed
    /// runtime, so scheduled callers run this on the scheduler task and the
    /// HTTP surface spawns a worker per request.
    pub async fn dispense(&self, volume_ml: f64) -> DoseResult {
        let cal = self.calibration_data();
        let runtime_ms = match cal.runtime_for_volume(volume_ml) {
            Ok(ms) => ms,
            Err(e) => return DoseResult::failure(volume_ml, &e),
        };
        self.run_motor(volume_ml, runtime_ms, cal).await
    }

    /// Time-driven variant used by calibration workflows.
    pub async fn run_for_duration(&self, runtime_ms: u64) -> DoseResult {
        let cal = self.calibration_data();
        if !(MIN_RUNTIME_MS..=MAX_RUNTIME_MS).contains(&runtime_ms) {
            let err = DoserError::validation(format!(
                "runtime {runtime_ms} ms outside {MIN_RUNTIME_MS}..{MAX_RUNTIME_MS} ms"
            ));
            return DoseResult::failure(0.0, &err);
        }
        let target = cal.estimated_volume(runtime_ms);
        self.run_motor(target, runtime_ms, cal).await
    }

    async fn run_motor(&self, target_ml: f64, runtime_ms: u64, cal: CalibrationData) -> DoseResult {
        let _guard = match self.dispense_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                return DoseResult::failure(target_ml, &DoserError::Busy { head: self.head })
            }
        };

        // Snapshot the stop generation before the motor starts so only
        // bumps issued during this run interrupt it.
        let mut stop_rx = self.stop_tx.subscribe();
        stop_rx.borrow_and_update();

        if let Err(e) = self.actuator.start(self.head, Direction::Forward) {
            let _ = self.actuator.stop(self.head);
            warn!(head = self.head, error = %e, "motor start refused");
            return DoseResult::failure(target_ml, &e);
        }

        self.dispensing.store(true, Ordering::Release);
        let started = Instant::now();

        let interrupted = tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(runtime_ms)) => false,
            changed = stop_rx.changed() => changed.is_ok(),
        };

        let stop_result = self.actuator.stop(self.head);
        self.dispensing.store(false, Ordering::Release);
        let actual_runtime_ms = started.elapsed().as_millis() as u64;

        if interrupted {
            let err = DoserError::Interrupted { head: self.head };
            info!(head = self.head, actual_runtime_ms, "dispense interrupted");
            return DoseResult {
                success: false,
                target_volume_ml: target_ml,
                estimated_volume_ml: 0.0,
                actual_runtime_ms,
                error_message: Some(err.to_string()),
            };
        }

        if let Err(e) = stop_result {
            // The driver refused the stop; brake is the hard fallback.
            let _ = self.actuator.brake(self.head);
            warn!(head = self.head, error = %e, "motor stop refused, braked");
            return DoseResult::failure(target_ml, &e);
        }

        info!(
            head = self.head,
            volume_ml = target_ml,
            actual_runtime_ms,
            "dispense complete"
        );
        DoseResult {
            success: true,
            target_volume_ml: target_ml,
            estimated_volume_ml: cal.estimated_volume(actual_runtime_ms),
            actual_runtime_ms,
            error_message: None,
        }
    }

    /// Stop this head's motor and wake its in-flight dispense, if any.
    pub fn stop_dispensing(&self) -> Result<()> {
        let result = self.actuator.stop(self.head);
        self.interrupt();
        result
    }

    /// Wake the in-flight dispense without touching the actuator. The
    /// emergency-stop path calls this after `emergency_stop_all` has
    /// already cut motor power.
    pub fn interrupt(&self) {
        self.stop_tx.send_modify(|generation| *generation += 1);
    }

    /// Apply a measured calibration output. The reference dose is fixed at
    /// 4 mL; the new rate is persisted before the in-memory copy moves, so
    /// a failed write leaves the head on its previous rate.
    pub fn calibrate(&self, actual_volume_ml: f64) -> Result<CalibrationData> {
        let current = self.calibration_data();
        let new_rate = current.recalibrated_rate(actual_volume_ml)?;
        let data = CalibrationData {
            ml_per_second: new_rate,
            is_calibrated: true,
            last_calibration_time: self.clock.monotonic_ms() as u32,
        };
        self.store.save(self.head, &data)?;
        *self.calibration.lock().unwrap_or_else(|e| e.into_inner()) = data;
        info!(
            head = self.head,
            ml_per_second = new_rate,
            "calibration accepted"
        );
        Ok(data)
    }

    /// Runtime the calibration reference dose needs at the current rate.
    pub fn calibration_runtime_ms(&self) -> Result<u64> {
        self.calibration_data()
            .runtime_for_volume(CALIBRATION_REFERENCE_ML)
    }

    pub fn reset_calibration(&self) -> Result<()> {
        self.store.reset(self.head)?;
        *self.calibration.lock().unwrap_or_else(|e| e.into_inner()) = CalibrationData::default();
        info!(head = self.head, "calibration reset to factory default");
        Ok(())
    }
}

/// Preempt every head at once: cut motor power first, then wake any
/// sleeping dispense so it returns "interrupted" with zero estimated
/// volume.
pub fn emergency_stop_all(heads: &Heads, actuator: &dyn MotorActuator) -> Result<()> {
    let result = actuator.emergency_stop_all();
    for head in heads {
        head.interrupt();
    }
    warn!("emergency stop issued for all heads");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockActuator;
    use dose_core::kv::MemoryKv;

    fn fixture(rate: f64) -> (Arc<DosingHead>, Arc<MockActuator>) {
        let kv = Arc::new(MemoryKv::new());
        let store = Arc::new(CalibrationStore::new(kv));
        let actuator = Arc::new(MockActuator::new());
        let clock = Arc::new(TimeKeeper::new());
        let head = Arc::new(DosingHead::new(0, actuator.clone(), store, clock));
        head.begin().unwrap();
        if (rate - 1.0).abs() > 1e-9 {
            // Calibrate up to the requested rate via the 4 mL reference path
            head.calibrate(rate * CALIBRATION_REFERENCE_ML).unwrap();
        }
        (head, actuator)
    }

    #[tokio::test]
    async fn test_dispense_estimates_target_volume() {
        let (head, actuator) = fixture(50.0);
        // 10 mL at 50 mL/s = 200ms runtime
        let result = head.dispense(10.0).await;
        assert!(result.success, "{:?}", result.error_message);
        assert!(result.actual_runtime_ms >= 200);
        assert!((result.estimated_volume_ml - 10.0).abs() < 10.0 * 0.25);
        assert_eq!(actuator.start_count(0), 1);
        assert_eq!(actuator.stop_count(0), 1);
        assert!(!head.is_dispensing());
    }

    #[tokio::test]
    async fn test_dispense_rejects_invalid_volume() {
        let (head, actuator) = fixture(1.0);
        let result = head.dispense(0.05).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("invalid input"));
        assert_eq!(actuator.start_count(0), 0);
    }

    #[tokio::test]
    async fn test_dispense_rejects_sub_minimum_runtime() {
        // 0.1 mL at 2 mL/s would need 50ms, below the motor minimum
        let (head, actuator) = fixture(2.0);
        let result = head.dispense(0.1).await;
        assert!(!result.success);
        assert_eq!(actuator.start_count(0), 0);
    }

    #[tokio::test]
    async fn test_concurrent_dispense_is_busy() {
        let (head, _) = fixture(10.0);
        let slow = {
            let head = head.clone();
            // 50 mL at 10 mL/s = 5s
            tokio::spawn(async move { head.dispense(50.0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(head.is_dispensing());

        let second = head.dispense(10.0).await;
        assert!(!second.success);
        assert!(second.error_message.unwrap().contains("busy"));

        head.interrupt();
        let first = slow.await.unwrap();
        assert!(!first.success);
    }

    #[tokio::test]
    async fn test_interrupt_returns_promptly_with_zero_volume() {
        let (head, actuator) = fixture(1.0);
        let task = {
            let head = head.clone();
            // 60 mL at 1 mL/s = one minute of sleep if not interrupted
            tokio::spawn(async move { head.dispense(60.0).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        head.interrupt();
        let result = task.await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!result.success);
        assert_eq!(result.estimated_volume_ml, 0.0);
        assert!(result.error_message.unwrap().contains("interrupted"));
        assert_eq!(actuator.stop_count(0), 1);
        assert!(!head.is_dispensing());
    }

    #[tokio::test]
    async fn test_stop_dispensing_halts_one_head() {
        let (head, actuator) = fixture(1.0);
        let task = {
            let head = head.clone();
            tokio::spawn(async move { head.dispense(30.0).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        head.stop_dispensing().unwrap();
        let result = task.await.unwrap();
        assert!(!result.success);
        assert!(!head.is_dispensing());
        // Motor stopped by the call itself plus the dispense epilogue
        assert_eq!(actuator.stop_count(0), 2);
    }

    #[tokio::test]
    async fn test_emergency_stop_all_clears_every_head() {
        let kv = Arc::new(MemoryKv::new());
        let store = Arc::new(CalibrationStore::new(kv));
        let actuator = Arc::new(MockActuator::new());
        let clock = Arc::new(TimeKeeper::new());
        let heads: Heads = std::array::from_fn(|i| {
            let head = Arc::new(DosingHead::new(
                i as u8,
                actuator.clone(),
                store.clone(),
                clock.clone(),
            ));
            head.begin().unwrap();
            head
        });

        let tasks: Vec<_> = heads
            .iter()
            .map(|head| {
                let head = head.clone();
                tokio::spawn(async move { head.dispense(30.0).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(heads.iter().all(|h| h.is_dispensing()));

        emergency_stop_all(&heads, actuator.as_ref()).unwrap();

        let started = Instant::now();
        for task in tasks {
            let result = task.await.unwrap();
            assert!(!result.success);
            assert_eq!(result.estimated_volume_ml, 0.0);
        }
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(heads.iter().all(|h| !h.is_dispensing()));
        assert!(actuator.emergency_stopped());
    }

    #[tokio::test]
    async fn test_actuator_start_refusal_leaves_motor_stopped() {
        let (head, actuator) = fixture(1.0);
        actuator.fail_next_start();
        let result = head.dispense(5.0).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("actuator"));
        assert_eq!(actuator.stop_count(0), 1);
        assert!(!head.is_dispensing());
    }

    #[tokio::test]
    async fn test_run_for_duration() {
        let (head, _) = fixture(1.0);
        let result = head.run_for_duration(150).await;
        assert!(result.success);
        assert!(result.actual_runtime_ms >= 150);
        assert!(head.run_for_duration(50).await.error_message.is_some());
        assert!(head.run_for_duration(300_001).await.error_message.is_some());
    }

    #[tokio::test]
    async fn test_calibrate_persists_and_applies() {
        let kv = Arc::new(MemoryKv::new());
        let store = Arc::new(CalibrationStore::new(kv));
        let actuator = Arc::new(MockActuator::new());
        let clock = Arc::new(TimeKeeper::new());
        let head = Arc::new(DosingHead::new(1, actuator, store.clone(), clock.clone()));
        head.begin().unwrap();

        // 4 mL reference dose measured at 3.8 mL
        let data = head.calibrate(3.8).unwrap();
        assert!((data.ml_per_second - 0.95).abs() < 1e-9);
        assert!(data.is_calibrated);

        let persisted = store.load(1).unwrap();
        assert!((persisted.ml_per_second - 0.95).abs() < 1e-6);
        assert!(persisted.is_calibrated);

        head.reset_calibration().unwrap();
        assert_eq!(head.calibration_data().ml_per_second, 1.0);
        assert!(!store.load(1).unwrap().is_calibrated);
    }

    #[tokio::test]
    async fn test_calibrate_rejects_out_of_band_measurement() {
        let (head, _) = fixture(1.0);
        assert!(head.calibrate(0.0).is_err());
        assert!(head.calibrate(500.0).is_err());
        assert!(!head.calibration_data().is_calibrated);
    }
}
