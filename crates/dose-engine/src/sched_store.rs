/// Schedule persistence: one bincode blob per head under the `schedules`
/// namespace, key `sched<head>`.

use std::sync::Arc;

use dose_core::dose::validate_head;
use dose_core::kv::KvBackend;
use dose_core::schedule::Schedule;
use dose_core::{Result, HEAD_COUNT, NS_SCHEDULES};

pub struct ScheduleStore {
    kv: Arc<dyn KvBackend>,
}

impl ScheduleStore {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    fn key(head: u8) -> String {
        format!("sched{head}")
    }

    /// Replace the head's schedule record. Semantic bounds are re-checked
    /// here so no invalid record can reach flash.
    pub fn save(&self, schedule: &Schedule) -> Result<()> {
        schedule.validate()?;
        let blob = schedule.to_blob()?;
        self.kv
            .put_bytes(NS_SCHEDULES, &Self::key(schedule.head), &blob)
    }

    pub fn load(&self, head: u8) -> Result<Option<Schedule>> {
        validate_head(head)?;
        match self.kv.get_bytes(NS_SCHEDULES, &Self::key(head))? {
            Some(blob) => Ok(Some(Schedule::from_blob(&blob)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, head: u8) -> Result<()> {
        validate_head(head)?;
        self.kv.remove(NS_SCHEDULES, &Self::key(head))
    }

    pub fn load_all(&self, enabled_only: bool) -> Result<Vec<Schedule>> {
        let mut schedules = Vec::with_capacity(HEAD_COUNT);
        for head in 0..HEAD_COUNT as u8 {
            if let Some(schedule) = self.load(head)? {
                if !enabled_only || schedule.enabled {
                    schedules.push(schedule);
                }
            }
        }
        Ok(schedules)
    }
}
