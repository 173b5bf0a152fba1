/// Hourly dosing log: append-with-merge tallies per (hour, head).
///
/// Entries are created lazily on the first dose of a new (hour, head) pair
/// and merged additively afterwards, so no entry exists for an hour with
/// no doses. Writes silently no-op while the wall clock is unsynced; reads
/// get their 503 at the API boundary instead.

use std::sync::Arc;

use dose_core::clock::WALL_CLOCK_VALID_AFTER;
use dose_core::dose::validate_head;
use dose_core::hourlog::{
    entry_key, hour_floor, parse_key, HourlyLogEntry, LOG_RETENTION_HOURS, SECONDS_PER_HOUR,
};
use dose_core::kv::KvBackend;
use dose_core::{DoserError, Result, HEAD_COUNT, NS_DOSING_LOGS};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Longest hour span a range query walks: the full retention window,
/// inclusive of both endpoints.
const MAX_QUERY_HOURS: u64 = LOG_RETENTION_HOURS + 1;

pub struct DoseLogStore {
    kv: Arc<dyn KvBackend>,
}

impl DoseLogStore {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    pub fn load(&self, hour_timestamp: u64, head: u8) -> Result<Option<HourlyLogEntry>> {
        match self
            .kv
            .get_bytes(NS_DOSING_LOGS, &entry_key(hour_timestamp, head))?
        {
            Some(blob) => Ok(Some(HourlyLogEntry::from_blob(&blob)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, entry: &HourlyLogEntry) -> Result<()> {
        let blob = entry.to_blob()?;
        self.kv.put_bytes(
            NS_DOSING_LOGS,
            &entry_key(entry.hour_timestamp, entry.head),
            &blob,
        )
    }

    pub fn remove(&self, hour_timestamp: u64, head: u8) -> Result<()> {
        self.kv
            .remove(NS_DOSING_LOGS, &entry_key(hour_timestamp, head))
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.kv.list_keys(NS_DOSING_LOGS)
    }

    pub fn clear(&self) -> Result<()> {
        self.kv.clear(NS_DOSING_LOGS)
    }
}

/// Per-head rollup of one day's dosing, for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub head: u8,
    pub day_start: u64,
    pub scheduled_volume_ml: f64,
    pub adhoc_volume_ml: f64,
    pub total_today_ml: f64,
    pub daily_target_volume_ml: f64,
    pub doses_per_day: u32,
    pub per_dose_volume_ml: f64,
    pub percent_complete: f64,
}

pub struct DoseLogManager {
    store: DoseLogStore,
    /// Serializes every read-modify-write so merges are atomic.
    lock: Mutex<()>,
}

impl DoseLogManager {
    pub fn new(store: DoseLogStore) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub async fn log_scheduled_dose(&self, head: u8, volume_ml: f64, wall_time: u64) -> Result<bool> {
        self.log_dose(head, volume_ml, 0.0, wall_time).await
    }

    pub async fn log_adhoc_dose(&self, head: u8, volume_ml: f64, wall_time: u64) -> Result<bool> {
        self.log_dose(head, 0.0, volume_ml, wall_time).await
    }

    async fn log_dose(
        &self,
        head: u8,
        scheduled_ml: f64,
        adhoc_ml: f64,
        wall_time: u64,
    ) -> Result<bool> {
        validate_head(head)?;
        if wall_time < WALL_CLOCK_VALID_AFTER {
            // Unsynced clock: drop silently rather than poison the log
            // with bogus hour keys.
            debug!(head, "dose not logged, wall clock unsynced");
            return Ok(false);
        }

        let _guard = self.lock.lock().await;
        let hour = hour_floor(wall_time);
        let mut entry = self
            .store
            .load(hour, head)?
            .unwrap_or_else(|| HourlyLogEntry::new(hour, head));
        entry.merge(scheduled_ml, adhoc_ml);
        self.store.save(&entry)?;
        Ok(true)
    }

    /// Entries in `[start, end]` (both rounded to hour boundaries), capped
    /// at `max` entries and the retention horizon.
    pub async fn hourly_logs(
        &self,
        start: u64,
        end: u64,
        max: usize,
    ) -> Result<Vec<HourlyLogEntry>> {
        let start = hour_floor(start);
        let end = hour_floor(end);
        if end < start {
            return Err(DoserError::validation("query end precedes start"));
        }

        let _guard = self.lock.lock().await;
        let mut logs = Vec::new();
        let hours = ((end - start) / SECONDS_PER_HOUR + 1).min(MAX_QUERY_HOURS);
        for slot in 0..hours {
            let hour = start + slot * SECONDS_PER_HOUR;
            for head in 0..HEAD_COUNT as u8 {
                if logs.len() >= max {
                    return Ok(logs);
                }
                if let Some(entry) = self.store.load(hour, head)? {
                    logs.push(entry);
                }
            }
        }
        Ok(logs)
    }

    /// Sum today's tallies for one head against its schedule intent.
    pub async fn daily_summary(
        &self,
        head: u8,
        now: u64,
        daily_target_volume_ml: f64,
        doses_per_day: u32,
        per_dose_volume_ml: f64,
    ) -> Result<DailySummary> {
        validate_head(head)?;
        let day_start = now - now % 86_400;

        let _guard = self.lock.lock().await;
        let mut scheduled = 0.0;
        let mut adhoc = 0.0;
        for slot in 0..24 {
            let hour = day_start + slot * SECONDS_PER_HOUR;
            if let Some(entry) = self.store.load(hour, head)? {
                scheduled += entry.scheduled_volume_ml;
                adhoc += entry.adhoc_volume_ml;
            }
        }

        let percent_complete = if daily_target_volume_ml > 0.0 {
            100.0 * scheduled / daily_target_volume_ml
        } else {
            0.0
        };

        Ok(DailySummary {
            head,
            day_start,
            scheduled_volume_ml: scheduled,
            adhoc_volume_ml: adhoc,
            total_today_ml: scheduled + adhoc,
            daily_target_volume_ml,
            doses_per_day,
            per_dose_volume_ml,
            percent_complete,
        })
    }

    /// Drop every entry older than the retention horizon. The backend
    /// enumerates keys, so this holds unconditionally even after long
    /// power-off gaps (the source walked a bounded window instead).
    pub async fn prune(&self, now: u64) -> Result<usize> {
        let cutoff = hour_floor(now).saturating_sub(LOG_RETENTION_HOURS * SECONDS_PER_HOUR);

        let _guard = self.lock.lock().await;
        let mut removed = 0;
        for key in self.store.keys()? {
            if let Some((hour, head)) = parse_key(&key) {
                if hour < cutoff {
                    self.store.remove(hour, head)?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(removed, "pruned hourly log entries past retention");
        }
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dose_core::kv::MemoryKv;

    const T0: u64 = 1_748_779_200; // 2025-06-01 12:00:00 UTC, hour-aligned

    fn manager() -> DoseLogManager {
        DoseLogManager::new(DoseLogStore::new(Arc::new(MemoryKv::new())))
    }

    #[tokio::test]
    async fn test_same_hour_doses_merge() {
        let mgr = manager();
        // Two ad-hoc doses at t and t+1800s land in the same hour bucket
        assert!(mgr.log_adhoc_dose(0, 1.0, T0).await.unwrap());
        assert!(mgr.log_adhoc_dose(0, 2.5, T0 + 1_800).await.unwrap());

        let logs = mgr.hourly_logs(T0, T0, 64).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].hour_timestamp, T0);
        assert_eq!(logs[0].head, 0);
        assert_eq!(logs[0].scheduled_volume_ml, 0.0);
        assert!((logs[0].adhoc_volume_ml - 3.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_scheduled_and_adhoc_counters_are_separate() {
        let mgr = manager();
        mgr.log_scheduled_dose(1, 2.0, T0).await.unwrap();
        mgr.log_adhoc_dose(1, 5.0, T0 + 60).await.unwrap();
        mgr.log_scheduled_dose(1, 2.0, T0 + 120).await.unwrap();

        let logs = mgr.hourly_logs(T0, T0, 64).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!((logs[0].scheduled_volume_ml - 4.0).abs() < 1e-9);
        assert!((logs[0].adhoc_volume_ml - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unsynced_clock_drops_silently() {
        let mgr = manager();
        assert!(!mgr.log_adhoc_dose(0, 1.0, 0).await.unwrap());
        assert!(!mgr.log_scheduled_dose(0, 1.0, 1_000_000).await.unwrap());
        assert!(mgr.hourly_logs(T0, T0, 64).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_are_hour_aligned() {
        let mgr = manager();
        mgr.log_adhoc_dose(2, 1.0, T0 + 2_345).await.unwrap();
        let logs = mgr.hourly_logs(T0, T0 + 3_599, 64).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].hour_timestamp % 3_600, 0);
    }

    #[tokio::test]
    async fn test_range_query_spans_hours_and_heads() {
        let mgr = manager();
        mgr.log_adhoc_dose(0, 1.0, T0).await.unwrap();
        mgr.log_adhoc_dose(3, 2.0, T0).await.unwrap();
        mgr.log_scheduled_dose(1, 3.0, T0 + 7_200).await.unwrap();

        let logs = mgr.hourly_logs(T0, T0 + 7_200, 64).await.unwrap();
        assert_eq!(logs.len(), 3);

        // Cap is honored
        let capped = mgr.hourly_logs(T0, T0 + 7_200, 2).await.unwrap();
        assert_eq!(capped.len(), 2);

        assert!(mgr.hourly_logs(T0, T0 - 3_600, 64).await.is_err());
    }

    #[tokio::test]
    async fn test_daily_summary() {
        let mgr = manager();
        let day_start = T0 - T0 % 86_400;
        mgr.log_scheduled_dose(1, 2.0, day_start + 3_600).await.unwrap();
        mgr.log_scheduled_dose(1, 2.0, day_start + 7_200).await.unwrap();
        mgr.log_adhoc_dose(1, 5.0, day_start + 10_000).await.unwrap();
        // Another head's doses must not leak in
        mgr.log_scheduled_dose(0, 9.0, day_start + 3_600).await.unwrap();

        let summary = mgr.daily_summary(1, T0, 24.0, 12, 2.0).await.unwrap();
        assert!((summary.scheduled_volume_ml - 4.0).abs() < 1e-9);
        assert!((summary.adhoc_volume_ml - 5.0).abs() < 1e-9);
        assert!((summary.total_today_ml - 9.0).abs() < 1e-9);
        assert!((summary.percent_complete - 100.0 * 4.0 / 24.0).abs() < 1e-9);

        let zero_target = mgr.daily_summary(1, T0, 0.0, 0, 0.0).await.unwrap();
        assert_eq!(zero_target.percent_complete, 0.0);
    }

    #[tokio::test]
    async fn test_prune_removes_only_past_retention() {
        let mgr = manager();
        let old = T0 - (LOG_RETENTION_HOURS + 5) * SECONDS_PER_HOUR;
        let edge = T0 - LOG_RETENTION_HOURS * SECONDS_PER_HOUR;
        mgr.log_adhoc_dose(0, 1.0, old).await.unwrap();
        mgr.log_adhoc_dose(1, 1.0, edge).await.unwrap();
        mgr.log_adhoc_dose(2, 1.0, T0).await.unwrap();

        let removed = mgr.prune(T0).await.unwrap();
        assert_eq!(removed, 1);

        assert!(mgr.hourly_logs(old, old, 64).await.unwrap().is_empty());
        let kept = mgr.hourly_logs(edge, T0, 64).await.unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|e| e.hour_timestamp >= edge));
    }

    #[tokio::test]
    async fn test_clear_all() {
        let mgr = manager();
        mgr.log_adhoc_dose(0, 1.0, T0).await.unwrap();
        mgr.clear_all().await.unwrap();
        assert!(mgr.hourly_logs(T0, T0, 64).await.unwrap().is_empty());
    }
}
