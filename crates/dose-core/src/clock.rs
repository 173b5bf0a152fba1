/// Two time sources, kept strictly apart.
///
/// Monotonic milliseconds since boot drive durations, retry intervals, and
/// "has elapsed" logic. Wall-clock seconds since the Unix epoch drive
/// schedule due times and log hour keys, and are unavailable until the time
/// subsystem (NTP, or the client pushing phone time) syncs the keeper.

use std::sync::Mutex;
use std::time::Instant;

use crate::error::{DoserError, Result};

/// Wall-clock values below this (2020-01-01T00:00:00Z) mean "unsynced".
pub const WALL_CLOCK_VALID_AFTER: u64 = 1_577_836_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    None,
    Manual,
    Ntp,
}

impl TimeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSource::None => "none",
            TimeSource::Manual => "manual",
            TimeSource::Ntp => "ntp",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WallSync {
    epoch_at_sync: u64,
    mono_at_sync: u64,
    source: TimeSource,
}

pub struct TimeKeeper {
    boot: Instant,
    sync: Mutex<Option<WallSync>>,
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeKeeper {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
            sync: Mutex::new(None),
        }
    }

    /// Milliseconds since boot.
    pub fn monotonic_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    /// Record a wall-clock sync. Rejects obviously-bogus timestamps.
    pub fn set_wall_time(&self, epoch_secs: u64, source: TimeSource) -> Result<()> {
        if epoch_secs < WALL_CLOCK_VALID_AFTER {
            return Err(DoserError::validation(format!(
                "timestamp {epoch_secs} predates 2020-01-01"
            )));
        }
        let mut guard = self
            .sync
            .lock()
            .map_err(|_| DoserError::persistence("clock mutex poisoned"))?;
        *guard = Some(WallSync {
            epoch_at_sync: epoch_secs,
            mono_at_sync: self.monotonic_ms(),
            source,
        });
        Ok(())
    }

    /// Current wall-clock seconds, or None before the first sync.
    pub fn wall_time(&self) -> Option<u64> {
        let guard = self.sync.lock().ok()?;
        let sync = (*guard)?;
        let elapsed_s = self.monotonic_ms().wrapping_sub(sync.mono_at_sync) / 1000;
        Some(sync.epoch_at_sync + elapsed_s)
    }

    pub fn is_synced(&self) -> bool {
        self.wall_time().is_some()
    }

    pub fn source(&self) -> TimeSource {
        self.sync
            .lock()
            .ok()
            .and_then(|g| g.map(|s| s.source))
            .unwrap_or(TimeSource::None)
    }
}

/// `now - since >= interval`, correct across the monotonic counter's wrap
/// boundary thanks to unsigned wrapping subtraction.
pub fn interval_elapsed(now_ms: u64, since_ms: u64, interval_ms: u64) -> bool {
    now_ms.wrapping_sub(since_ms) >= interval_ms
}
