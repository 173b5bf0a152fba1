use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use dose_core::actuator::{Direction, MotorActuator};
use dose_core::{DoserError, Result, HEAD_COUNT};

/// Test double for the H-bridge: counts pin transitions and can refuse
/// the next start to exercise the failure paths.
pub struct MockActuator {
    starts: Mutex<[u32; HEAD_COUNT]>,
    stops: Mutex<[u32; HEAD_COUNT]>,
    running: Mutex<[bool; HEAD_COUNT]>,
    fail_next_start: AtomicBool,
    emergency_stopped: AtomicBool,
}

impl MockActuator {
    pub fn new() -> Self {
        Self {
            starts: Mutex::new([0; HEAD_COUNT]),
            stops: Mutex::new([0; HEAD_COUNT]),
            running: Mutex::new([false; HEAD_COUNT]),
            fail_next_start: AtomicBool::new(false),
            emergency_stopped: AtomicBool::new(false),
        }
    }

    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    pub fn start_count(&self, head: u8) -> u32 {
        self.starts.lock().unwrap()[head as usize]
    }

    pub fn stop_count(&self, head: u8) -> u32 {
        self.stops.lock().unwrap()[head as usize]
    }

    pub fn is_running(&self, head: u8) -> bool {
        self.running.lock().unwrap()[head as usize]
    }

    pub fn emergency_stopped(&self) -> bool {
        self.emergency_stopped.load(Ordering::SeqCst)
    }
}

impl MotorActuator for MockActuator {
    fn start(&self, head: u8, _direction: Direction) -> Result<()> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(DoserError::actuator("driver refused start"));
        }
        self.starts.lock().unwrap()[head as usize] += 1;
        self.running.lock().unwrap()[head as usize] = true;
        Ok(())
    }

    fn stop(&self, head: u8) -> Result<()> {
        self.stops.lock().unwrap()[head as usize] += 1;
        self.running.lock().unwrap()[head as usize] = false;
        Ok(())
    }

    fn brake(&self, head: u8) -> Result<()> {
        self.running.lock().unwrap()[head as usize] = false;
        Ok(())
    }

    fn emergency_stop_all(&self) -> Result<()> {
        self.emergency_stopped.store(true, Ordering::SeqCst);
        let mut running = self.running.lock().unwrap();
        running.iter_mut().for_each(|r| *r = false);
        Ok(())
    }
}
