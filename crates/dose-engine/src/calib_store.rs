/// Per-head calibration persistence.
///
/// Each head gets its own namespace (`dosingHead0`..`dosingHead3`) holding
/// three typed keys: `mlPerSec` (f32 LE), `calibrated` (one byte),
/// `lastCalTime` (u32 LE, monotonic ms). Absent keys fall back to factory
/// defaults so a fresh board doses at 1.0 mL/s out of the box.

use std::sync::Arc;

use dose_core::calibration::{CalibrationData, MAX_ML_PER_SECOND};
use dose_core::dose::validate_head;
use dose_core::kv::KvBackend;
use dose_core::Result;
use tracing::warn;

const KEY_RATE: &str = "mlPerSec";
const KEY_CALIBRATED: &str = "calibrated";
const KEY_CAL_TIME: &str = "lastCalTime";

pub struct CalibrationStore {
    kv: Arc<dyn KvBackend>,
}

impl CalibrationStore {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    fn namespace(head: u8) -> String {
        format!("dosingHead{head}")
    }

    /// Load a head's calibration; any absent or corrupt key keeps its
    /// default so the invariant `ml_per_second > 0` always holds.
    pub fn load(&self, head: u8) -> Result<CalibrationData> {
        validate_head(head)?;
        let ns = Self::namespace(head);
        let mut data = CalibrationData::default();

        if let Some(blob) = self.kv.get_bytes(&ns, KEY_RATE)? {
            match <[u8; 4]>::try_from(blob.as_slice()) {
                Ok(raw) => {
                    let rate = f32::from_le_bytes(raw) as f64;
                    if rate > 0.0 && rate <= MAX_ML_PER_SECOND {
                        data.ml_per_second = rate;
                    } else {
                        warn!(head, rate, "stored pump rate out of band, using default");
                    }
                }
                Err(_) => warn!(head, "stored pump rate malformed, using default"),
            }
        }

        if let Some(blob) = self.kv.get_bytes(&ns, KEY_CALIBRATED)? {
            data.is_calibrated = blob.first().copied() == Some(1);
        }

        if let Some(blob) = self.kv.get_bytes(&ns, KEY_CAL_TIME)? {
            if let Ok(raw) = <[u8; 4]>::try_from(blob.as_slice()) {
                data.last_calibration_time = u32::from_le_bytes(raw);
            }
        }

        Ok(data)
    }

    pub fn save(&self, head: u8, data: &CalibrationData) -> Result<()> {
        validate_head(head)?;
        let ns = Self::namespace(head);
        self.kv
            .put_bytes(&ns, KEY_RATE, &(data.ml_per_second as f32).to_le_bytes())?;
        self.kv
            .put_bytes(&ns, KEY_CALIBRATED, &[u8::from(data.is_calibrated)])?;
        self.kv
            .put_bytes(&ns, KEY_CAL_TIME, &data.last_calibration_time.to_le_bytes())?;
        Ok(())
    }

    /// Wipe a head back to factory defaults.
    pub fn reset(&self, head: u8) -> Result<()> {
        validate_head(head)?;
        self.kv.clear(&Self::namespace(head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dose_core::kv::MemoryKv;

    fn store() -> CalibrationStore {
        CalibrationStore::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn test_load_defaults_when_absent() {
        let store = store();
        let data = store.load(0).unwrap();
        assert_eq!(data.ml_per_second, 1.0);
        assert!(!data.is_calibrated);
        assert_eq!(data.last_calibration_time, 0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let store = store();
        let data = CalibrationData {
            ml_per_second: 0.95,
            is_calibrated: true,
            last_calibration_time: 123_456,
        };
        store.save(2, &data).unwrap();

        let loaded = store.load(2).unwrap();
        assert!((loaded.ml_per_second - 0.95).abs() < 1e-6);
        assert!(loaded.is_calibrated);
        assert_eq!(loaded.last_calibration_time, 123_456);

        // Other heads are untouched
        assert!(!store.load(0).unwrap().is_calibrated);
    }

    #[test]
    fn test_corrupt_rate_falls_back_to_default() {
        let kv = Arc::new(MemoryKv::new());
        kv.put_bytes("dosingHead1", KEY_RATE, &(-2.0f32).to_le_bytes())
            .unwrap();
        let store = CalibrationStore::new(kv);
        assert_eq!(store.load(1).unwrap().ml_per_second, 1.0);
    }

    #[test]
    fn test_reset_clears_head() {
        let store = store();
        let data = CalibrationData {
            ml_per_second: 2.5,
            is_calibrated: true,
            last_calibration_time: 99,
        };
        store.save(3, &data).unwrap();
        store.reset(3).unwrap();
        assert!(!store.load(3).unwrap().is_calibrated);
        assert_eq!(store.load(3).unwrap().ml_per_second, 1.0);
    }

    #[test]
    fn test_rejects_bad_head() {
        assert!(store().load(4).is_err());
    }
}
