use serde::{Deserialize, Serialize};

use crate::error::{DoserError, Result};

/// Hourly log entries older than this are pruned (14 days).
pub const LOG_RETENTION_HOURS: u64 = 336;

pub const SECONDS_PER_HOUR: u64 = 3_600;

/// Key offsets are counted from 2025-01-01T00:00:00Z to keep keys short
/// (the NVS backend caps keys at 15 bytes; a full decimal epoch would not
/// leave room for the head suffix).
pub const EPOCH_BASE: u64 = 1_735_689_600;

/// Round a wall-clock timestamp down to its hour boundary.
pub fn hour_floor(ts: u64) -> u64 {
    ts - ts % SECONDS_PER_HOUR
}

/// Compact storage key for one (hour, head) tally: `h<offset>_<head>`.
pub fn entry_key(hour_timestamp: u64, head: u8) -> String {
    let offset = (hour_timestamp as i64 - EPOCH_BASE as i64) / SECONDS_PER_HOUR as i64;
    format!("h{offset}_{head}")
}

/// Inverse of `entry_key`; used by prune and clear walks.
pub fn parse_key(key: &str) -> Option<(u64, u8)> {
    let rest = key.strip_prefix('h')?;
    let (offset, head) = rest.split_once('_')?;
    let offset: i64 = offset.parse().ok()?;
    let head: u8 = head.parse().ok()?;
    let hour = EPOCH_BASE as i64 + offset * SECONDS_PER_HOUR as i64;
    if hour < 0 {
        return None;
    }
    Some((hour as u64, head))
}

/// One hour's dosing tally for one head. Created lazily on the first dose
/// of the (hour, head) pair, merged additively on every later dose in the
/// same hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyLogEntry {
    /// Wall-clock seconds, always hour-aligned (`% 3600 == 0`).
    pub hour_timestamp: u64,
    pub head: u8,
    pub scheduled_volume_ml: f64,
    pub adhoc_volume_ml: f64,
}

impl HourlyLogEntry {
    pub fn new(hour_timestamp: u64, head: u8) -> Self {
        Self {
            hour_timestamp,
            head,
            scheduled_volume_ml: 0.0,
            adhoc_volume_ml: 0.0,
        }
    }

    /// Additive merge; commutative across any interleaving of doses.
    pub fn merge(&mut self, scheduled_ml: f64, adhoc_ml: f64) {
        self.scheduled_volume_ml += scheduled_ml;
        self.adhoc_volume_ml += adhoc_ml;
    }

    pub fn total_volume_ml(&self) -> f64 {
        self.scheduled_volume_ml + self.adhoc_volume_ml
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| DoserError::persistence(format!("log entry encode: {e}")))
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        bincode::deserialize(blob)
            .map_err(|e| DoserError::persistence(format!("log entry decode: {e}")))
    }
}
