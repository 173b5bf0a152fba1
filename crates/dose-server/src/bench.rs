/// Bench builds of the two hardware seams.
///
/// `BenchActuator` tracks H-bridge pin state in memory and logs the
/// transitions the real driver would make; `BenchWifi` simulates radio
/// association with a short delay. On-target builds replace both behind
/// the same traits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dose_core::actuator::{Direction, MotorActuator};
use dose_core::{DoserError, Result, DEFAULT_AP_IP, HEAD_COUNT};
use dose_wifi::WifiDriver;
use tracing::{debug, info, warn};

pub struct BenchActuator {
    /// Pin state per motor; the shared standby line is asserted whenever
    /// any motor runs.
    running: Mutex<[bool; HEAD_COUNT]>,
}

impl BenchActuator {
    pub fn new() -> Self {
        Self {
            running: Mutex::new([false; HEAD_COUNT]),
        }
    }

    fn check(head: u8) -> Result<()> {
        if (head as usize) < HEAD_COUNT {
            Ok(())
        } else {
            Err(DoserError::actuator(format!("no motor at index {head}")))
        }
    }
}

impl Default for BenchActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorActuator for BenchActuator {
    fn start(&self, head: u8, direction: Direction) -> Result<()> {
        Self::check(head)?;
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running[head as usize] = true;
        debug!(head, ?direction, "motor start");
        Ok(())
    }

    fn stop(&self, head: u8) -> Result<()> {
        Self::check(head)?;
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running[head as usize] = false;
        debug!(head, "motor stop");
        Ok(())
    }

    fn brake(&self, head: u8) -> Result<()> {
        Self::check(head)?;
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running[head as usize] = false;
        debug!(head, "motor brake");
        Ok(())
    }

    fn emergency_stop_all(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.iter_mut().for_each(|r| *r = false);
        warn!("emergency stop: all motor outputs cut, standby line dropped");
        Ok(())
    }
}

/// Simulated association latency for the bench radio.
const BENCH_ASSOC_DELAY_MS: u64 = 400;

pub struct BenchWifi {
    associated: AtomicBool,
    ap_up: AtomicBool,
}

impl BenchWifi {
    pub fn new() -> Self {
        Self {
            associated: AtomicBool::new(false),
            ap_up: AtomicBool::new(false),
        }
    }
}

impl Default for BenchWifi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WifiDriver for BenchWifi {
    async fn start_ap(&self, ssid: &str, _password: &str) -> Result<String> {
        self.ap_up.store(true, Ordering::SeqCst);
        info!(ssid = %ssid, ip = DEFAULT_AP_IP, "bench softAP up");
        Ok(DEFAULT_AP_IP.to_string())
    }

    async fn stop_ap(&self) -> Result<()> {
        self.ap_up.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn connect_sta(&self, ssid: &str, _password: &str, timeout: Duration) -> Result<String> {
        let delay = Duration::from_millis(BENCH_ASSOC_DELAY_MS).min(timeout);
        tokio::time::sleep(delay).await;
        if ssid.is_empty() {
            return Err(DoserError::WifiTransient("empty ssid".to_string()));
        }
        self.associated.store(true, Ordering::SeqCst);
        info!(ssid = %ssid, "bench station associated");
        Ok("192.168.1.184".to_string())
    }

    async fn disconnect_sta(&self) -> Result<()> {
        self.associated.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_sta_connected(&self) -> bool {
        self.associated.load(Ordering::SeqCst)
    }
}
