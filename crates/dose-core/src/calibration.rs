use serde::{Deserialize, Serialize};

use crate::dose::{validate_volume, MAX_RUNTIME_MS, MIN_RUNTIME_MS};
use crate::error::{DoserError, Result};

/// Factory pump rate until the user calibrates
pub const DEFAULT_ML_PER_SECOND: f64 = 1.0;

/// Sanity ceiling for an accepted calibration rate
pub const MAX_ML_PER_SECOND: f64 = 100.0;

/// The calibration protocol always dispenses this reference volume; the
/// user measures the actual output and submits it back.
pub const CALIBRATION_REFERENCE_ML: f64 = 4.0;

/// Per-head pump rate, persisted in the head's own namespace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationData {
    pub ml_per_second: f64,
    pub is_calibrated: bool,
    /// Monotonic ms since boot when calibration completed. This is NOT
    /// wall-clock time; it is emitted over JSON unchanged and clients
    /// treat it as opaque.
    pub last_calibration_time: u32,
}

impl Default for CalibrationData {
    fn default() -> Self {
        Self {
            ml_per_second: DEFAULT_ML_PER_SECOND,
            is_calibrated: false,
            last_calibration_time: 0,
        }
    }
}

impl CalibrationData {
    /// Motor runtime needed to dispense `volume_ml` at the current rate.
    /// Rejects volumes whose runtime falls outside the motor's safe window.
    pub fn runtime_for_volume(&self, volume_ml: f64) -> Result<u64> {
        validate_volume(volume_ml)?;
        let runtime_ms = (volume_ml / self.ml_per_second * 1000.0).round() as u64;
        if !(MIN_RUNTIME_MS..=MAX_RUNTIME_MS).contains(&runtime_ms) {
            return Err(DoserError::validation(format!(
                "runtime {runtime_ms} ms for {volume_ml} mL outside {MIN_RUNTIME_MS}..{MAX_RUNTIME_MS} ms"
            )));
        }
        Ok(runtime_ms)
    }

    /// Volume the pump is estimated to have moved in `runtime_ms`.
    pub fn estimated_volume(&self, runtime_ms: u64) -> f64 {
        self.ml_per_second * runtime_ms as f64 / 1000.0
    }

    /// New rate implied by a measured calibration output. The reference
    /// dose ran for `CALIBRATION_REFERENCE_ML / ml_per_second` seconds, so
    /// the corrected rate is `actual / (reference / current)`.
    pub fn recalibrated_rate(&self, actual_volume_ml: f64) -> Result<f64> {
        if !actual_volume_ml.is_finite() || actual_volume_ml <= 0.0 {
            return Err(DoserError::validation(format!(
                "measured volume {actual_volume_ml} mL must be positive"
            )));
        }
        let duration_s = CALIBRATION_REFERENCE_ML / self.ml_per_second;
        let new_rate = actual_volume_ml / duration_s;
        if new_rate <= 0.0 || new_rate > MAX_ML_PER_SECOND {
            return Err(DoserError::validation(format!(
                "calibration rate {new_rate:.3} mL/s outside (0, {MAX_ML_PER_SECOND}]"
            )));
        }
        Ok(new_rate)
    }
}
