use serde::{Deserialize, Serialize};

use crate::error::{DoserError, Result};
use crate::HEAD_COUNT;

/// Accepted dose volume range in millilitres
pub const MIN_DOSE_VOLUME_ML: f64 = 0.1;
pub const MAX_DOSE_VOLUME_ML: f64 = 1000.0;

/// Accepted motor runtime range for a single dispense
pub const MIN_RUNTIME_MS: u64 = 100;
pub const MAX_RUNTIME_MS: u64 = 300_000;

pub fn validate_head(head: u8) -> Result<()> {
    if (head as usize) < HEAD_COUNT {
        Ok(())
    } else {
        Err(DoserError::validation(format!(
            "head {head} out of range 0..{}",
            HEAD_COUNT - 1
        )))
    }
}

pub fn validate_volume(volume_ml: f64) -> Result<()> {
    if !volume_ml.is_finite() || volume_ml < MIN_DOSE_VOLUME_ML || volume_ml > MAX_DOSE_VOLUME_ML {
        return Err(DoserError::validation(format!(
            "volume {volume_ml} mL outside {MIN_DOSE_VOLUME_ML}..{MAX_DOSE_VOLUME_ML}"
        )));
    }
    Ok(())
}

/// Outcome of a single dispense. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseResult {
    pub success: bool,
    pub target_volume_ml: f64,
    pub estimated_volume_ml: f64,
    pub actual_runtime_ms: u64,
    pub error_message: Option<String>,
}

impl DoseResult {
    pub fn failure(target_volume_ml: f64, error: &DoserError) -> Self {
        Self {
            success: false,
            target_volume_ml,
            estimated_volume_ml: 0.0,
            actual_runtime_ms: 0,
            error_message: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_bounds() {
        assert!(validate_head(0).is_ok());
        assert!(validate_head(3).is_ok());
        assert!(validate_head(4).is_err());
    }

    #[test]
    fn test_volume_bounds() {
        assert!(validate_volume(0.1).is_ok());
        assert!(validate_volume(1000.0).is_ok());
        assert!(validate_volume(0.09).is_err());
        assert!(validate_volume(1000.1).is_err());
        assert!(validate_volume(f64::NAN).is_err());
    }
}
