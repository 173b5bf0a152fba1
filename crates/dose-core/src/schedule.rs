use serde::{Deserialize, Serialize};

use crate::dose::validate_head;
use crate::error::{DoserError, Result};

pub const MIN_DAILY_TARGET_ML: f64 = 0.1;
pub const MAX_DAILY_TARGET_ML: f64 = 10_000.0;
pub const MIN_DOSES_PER_DAY: u32 = 1;
pub const MAX_DOSES_PER_DAY: u32 = 1440;
pub const MAX_SCHEDULE_NAME_LEN: usize = 31;
pub const MAX_PER_DOSE_VOLUME_ML: f64 = 1000.0;
pub const SECONDS_PER_DAY: u64 = 86_400;

/// One recurring-dose schedule. Exactly one slot per head; the head index
/// doubles as the schedule's identity.
///
/// `daily_target_volume_ml` and `doses_per_day` carry user intent;
/// `per_dose_volume_ml` and `interval_seconds` are derived and recomputed
/// on every write so they can never drift from the intent fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub head: u8,
    pub enabled: bool,
    pub name: String,
    pub daily_target_volume_ml: f64,
    pub doses_per_day: u32,
    pub per_dose_volume_ml: f64,
    pub interval_seconds: u64,
    /// Wall-clock seconds of the last successful execution; 0 = never.
    pub last_execution_time: u64,
    pub execution_count: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Schedule {
    pub fn new(
        head: u8,
        name: String,
        daily_target_volume_ml: f64,
        doses_per_day: u32,
        enabled: bool,
        now: u64,
    ) -> Result<Self> {
        let mut schedule = Self {
            head,
            enabled,
            name,
            daily_target_volume_ml,
            doses_per_day,
            per_dose_volume_ml: 0.0,
            interval_seconds: 0,
            last_execution_time: 0,
            execution_count: 0,
            created_at: now,
            updated_at: now,
        };
        schedule.recompute_derived();
        schedule.validate()?;
        Ok(schedule)
    }

    /// Keep derived fields consistent with user intent. Integer division
    /// for the interval: with doses_per_day <= 1440 it is always >= 60.
    pub fn recompute_derived(&mut self) {
        if self.doses_per_day > 0 {
            self.per_dose_volume_ml = self.daily_target_volume_ml / self.doses_per_day as f64;
            self.interval_seconds = SECONDS_PER_DAY / self.doses_per_day as u64;
        } else {
            self.per_dose_volume_ml = 0.0;
            self.interval_seconds = 0;
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_head(self.head)?;
        if self.name.len() > MAX_SCHEDULE_NAME_LEN {
            return Err(DoserError::validation(format!(
                "name exceeds {MAX_SCHEDULE_NAME_LEN} characters"
            )));
        }
        if !self.daily_target_volume_ml.is_finite()
            || self.daily_target_volume_ml < MIN_DAILY_TARGET_ML
            || self.daily_target_volume_ml > MAX_DAILY_TARGET_ML
        {
            return Err(DoserError::validation(format!(
                "daily target {} mL outside {MIN_DAILY_TARGET_ML}..{MAX_DAILY_TARGET_ML}",
                self.daily_target_volume_ml
            )));
        }
        if !(MIN_DOSES_PER_DAY..=MAX_DOSES_PER_DAY).contains(&self.doses_per_day) {
            return Err(DoserError::validation(format!(
                "doses per day {} outside {MIN_DOSES_PER_DAY}..{MAX_DOSES_PER_DAY}",
                self.doses_per_day
            )));
        }
        if self.per_dose_volume_ml <= 0.0 || self.per_dose_volume_ml > MAX_PER_DOSE_VOLUME_ML {
            return Err(DoserError::validation(format!(
                "per-dose volume {} mL outside (0, {MAX_PER_DOSE_VOLUME_ML}]",
                self.per_dose_volume_ml
            )));
        }
        Ok(())
    }

    /// Due predicate. A never-executed schedule fires on the first tick;
    /// afterwards it fires once per elapsed interval. A failed dispense
    /// leaves `last_execution_time` alone, so the schedule stays due.
    pub fn should_execute(&self, now: u64) -> bool {
        if !self.enabled {
            return false;
        }
        if self.last_execution_time == 0 {
            return true;
        }
        now.saturating_sub(self.last_execution_time) >= self.interval_seconds
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| DoserError::persistence(format!("schedule encode: {e}")))
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        bincode::deserialize(blob)
            .map_err(|e| DoserError::persistence(format!("schedule decode: {e}")))
    }
}
