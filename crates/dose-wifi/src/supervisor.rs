/// AP↔STA mode supervisor.
///
/// AP is the initial and fallback mode; STA is attempted whenever
/// credentials exist. Two locks with distinct jobs: `state` (std Mutex,
/// never held across await) guards the observable snapshot, and
/// `transition` (tokio Mutex) serializes whole mode switches so two tasks
/// can't interleave radio teardown and bring-up. Every switch parks the
/// observable mode on `Transitioning` before touching the radio, so
/// readers never see a half-switched mode.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dose_core::clock::{interval_elapsed, TimeKeeper};
use dose_core::kv::KvBackend;
use dose_core::{
    DoserError, Result, AP_SSID_PREFIX, NS_WIFI_CONFIG, STA_CONNECT_TIMEOUT_MS, STA_FAIL_TO_AP_MS,
    STA_RETRY_INTERVAL_MS,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::driver::WifiDriver;

const KEY_SSID: &str = "ssid";
const KEY_PASSWORD: &str = "password";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Ap,
    Sta,
    Transitioning,
}

impl WifiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WifiMode::Ap => "AP",
            WifiMode::Sta => "STA",
            WifiMode::Transitioning => "TRANSITIONING",
        }
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    ssid: String,
    password: String,
}

#[derive(Debug)]
struct WifiState {
    mode: WifiMode,
    credentials: Option<Credentials>,
    local_ip: Option<String>,
    /// Monotonic ms of the first observed STA loss; 0 while healthy.
    sta_failed_since: u64,
    /// Monotonic ms of the last STA attempt from AP mode.
    last_sta_attempt: u64,
}

/// Supervisor timing knobs; tests shrink them, production uses defaults.
#[derive(Debug, Clone, Copy)]
pub struct WifiTimings {
    pub connect_timeout_ms: u64,
    pub fail_to_ap_ms: u64,
    pub retry_interval_ms: u64,
}

impl Default for WifiTimings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: STA_CONNECT_TIMEOUT_MS,
            fail_to_ap_ms: STA_FAIL_TO_AP_MS,
            retry_interval_ms: STA_RETRY_INTERVAL_MS,
        }
    }
}

/// Snapshot served by `/api/wifi/status`.
#[derive(Debug, Clone, Serialize)]
pub struct WifiStatus {
    pub mode: &'static str,
    pub connected: bool,
    pub ip: Option<String>,
    pub ap_ssid: String,
}

pub struct WifiSupervisor {
    driver: Arc<dyn WifiDriver>,
    kv: Arc<dyn KvBackend>,
    clock: Arc<TimeKeeper>,
    ap_ssid: String,
    ap_password: String,
    timings: WifiTimings,
    state: StdMutex<WifiState>,
    transition: Mutex<()>,
}

impl WifiSupervisor {
    pub fn new(
        driver: Arc<dyn WifiDriver>,
        kv: Arc<dyn KvBackend>,
        clock: Arc<TimeKeeper>,
        device_id: u64,
        ap_password: String,
        timings: WifiTimings,
    ) -> Self {
        // Stable SSID suffix from the hardware id's upper bits
        let ap_ssid = format!("{AP_SSID_PREFIX}{:04X}", (device_id >> 32) & 0xFFFF);
        Self {
            driver,
            kv,
            clock,
            ap_ssid,
            ap_password,
            timings,
            state: StdMutex::new(WifiState {
                mode: WifiMode::Transitioning,
                credentials: None,
                local_ip: None,
                sta_failed_since: 0,
                last_sta_attempt: 0,
            }),
            transition: Mutex::new(()),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, WifiState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Boot: load credentials, try STA if they exist, otherwise (or on
    /// failure) come up as AP.
    pub async fn begin(&self) -> Result<()> {
        let credentials = self.load_credentials()?;
        let has_credentials = credentials.is_some();
        self.lock_state().credentials = credentials;

        if has_credentials {
            match self.switch_to_sta().await {
                Ok(ip) => {
                    info!(ip = %ip, "joined configured network at boot");
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "boot STA attempt failed, starting AP"),
            }
            // switch_to_sta already fell back to AP
            return Ok(());
        }

        self.switch_to_ap().await
    }

    fn load_credentials(&self) -> Result<Option<Credentials>> {
        let ssid = self.kv.get_bytes(NS_WIFI_CONFIG, KEY_SSID)?;
        let password = self.kv.get_bytes(NS_WIFI_CONFIG, KEY_PASSWORD)?;
        match (ssid, password) {
            (Some(ssid), Some(password)) => {
                let ssid = String::from_utf8_lossy(&ssid).into_owned();
                let password = String::from_utf8_lossy(&password).into_owned();
                if ssid.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Credentials { ssid, password }))
            }
            _ => Ok(None),
        }
    }

    /// Persist new credentials and adopt them in memory. The caller
    /// decides when to actually switch modes.
    pub fn set_credentials(&self, ssid: &str, password: &str) -> Result<()> {
        if ssid.is_empty() || ssid.len() > 32 {
            return Err(DoserError::validation("ssid must be 1..=32 characters"));
        }
        if password.len() > 64 {
            return Err(DoserError::validation("password must be at most 64 characters"));
        }
        self.kv
            .put_bytes(NS_WIFI_CONFIG, KEY_SSID, ssid.as_bytes())?;
        self.kv
            .put_bytes(NS_WIFI_CONFIG, KEY_PASSWORD, password.as_bytes())?;
        self.lock_state().credentials = Some(Credentials {
            ssid: ssid.to_string(),
            password: password.to_string(),
        });
        info!(ssid = %ssid, "wifi credentials stored");
        Ok(())
    }

    pub fn clear_credentials(&self) -> Result<()> {
        self.kv.remove(NS_WIFI_CONFIG, KEY_SSID)?;
        self.kv.remove(NS_WIFI_CONFIG, KEY_PASSWORD)?;
        self.lock_state().credentials = None;
        info!("wifi credentials cleared");
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.lock_state().credentials.is_some()
    }

    /// Attempt the switch to station mode. On failure the supervisor is
    /// left in AP mode with the retry timer armed, and the error is
    /// returned for the caller's logging.
    pub async fn switch_to_sta(&self) -> Result<String> {
        let _transition = self.transition.lock().await;

        let Some(credentials) = self.lock_state().credentials.clone() else {
            return Err(DoserError::validation("no wifi credentials stored"));
        };

        let previous = {
            let mut state = self.lock_state();
            let previous = state.mode;
            state.mode = WifiMode::Transitioning;
            previous
        };

        if previous == WifiMode::Ap {
            if let Err(e) = self.driver.stop_ap().await {
                warn!(error = %e, "softAP teardown failed before STA attempt");
            }
        }

        let timeout = Duration::from_millis(self.timings.connect_timeout_ms);
        match self
            .driver
            .connect_sta(&credentials.ssid, &credentials.password, timeout)
            .await
        {
            Ok(ip) => {
                let mut state = self.lock_state();
                state.mode = WifiMode::Sta;
                state.local_ip = Some(ip.clone());
                state.sta_failed_since = 0;
                info!(ssid = %credentials.ssid, ip = %ip, "station mode up");
                Ok(ip)
            }
            Err(e) => {
                self.lock_state().last_sta_attempt = self.clock.monotonic_ms();
                warn!(ssid = %credentials.ssid, error = %e, "STA attempt failed, falling back to AP");
                self.bring_up_ap().await?;
                Err(DoserError::WifiTransient(e.to_string()))
            }
        }
    }

    pub async fn switch_to_ap(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        let previous = {
            let mut state = self.lock_state();
            let previous = state.mode;
            state.mode = WifiMode::Transitioning;
            previous
        };

        if previous == WifiMode::Sta {
            if let Err(e) = self.driver.disconnect_sta().await {
                warn!(error = %e, "station teardown failed before AP start");
            }
        }

        self.bring_up_ap().await
    }

    /// In-place re-association while still in STA mode. Unlike
    /// `switch_to_sta` this never falls back to AP; the keep-alive loop
    /// owns that decision once the failure window expires.
    async fn reconnect_sta(&self) -> Result<String> {
        let _transition = self.transition.lock().await;

        let Some(credentials) = self.lock_state().credentials.clone() else {
            return Err(DoserError::validation("no wifi credentials stored"));
        };

        let timeout = Duration::from_millis(self.timings.connect_timeout_ms);
        let ip = self
            .driver
            .connect_sta(&credentials.ssid, &credentials.password, timeout)
            .await?;
        let mut state = self.lock_state();
        state.local_ip = Some(ip.clone());
        state.sta_failed_since = 0;
        Ok(ip)
    }

    /// Radio bring-up half of an AP switch; `transition` must be held.
    async fn bring_up_ap(&self) -> Result<()> {
        let ip = self.driver.start_ap(&self.ap_ssid, &self.ap_password).await?;
        let mut state = self.lock_state();
        state.mode = WifiMode::Ap;
        state.local_ip = Some(ip);
        state.sta_failed_since = 0;
        info!(ssid = %self.ap_ssid, "access point up");
        Ok(())
    }

    /// One keep-alive pass; the keep-alive task calls this every 10 s.
    pub async fn keepalive_tick(&self) {
        let now = self.clock.monotonic_ms();
        let (mode, has_credentials, failed_since, last_attempt) = {
            let state = self.lock_state();
            (
                state.mode,
                state.credentials.is_some(),
                state.sta_failed_since,
                state.last_sta_attempt,
            )
        };

        match mode {
            WifiMode::Sta => {
                if self.driver.is_sta_connected() {
                    self.lock_state().sta_failed_since = 0;
                    return;
                }
                if failed_since == 0 {
                    warn!("station association lost");
                    self.lock_state().sta_failed_since = now;
                    return;
                }
                if interval_elapsed(now, failed_since, self.timings.fail_to_ap_ms) {
                    warn!("station offline past threshold, falling back to AP");
                    if let Err(e) = self.switch_to_ap().await {
                        warn!(error = %e, "AP fallback failed");
                    }
                    self.lock_state().last_sta_attempt = now;
                    return;
                }
                // Inside the grace window: try to re-associate in place.
                match self.reconnect_sta().await {
                    Ok(_) => info!("station re-associated"),
                    Err(e) => warn!(error = %e, "reconnect attempt failed"),
                }
            }
            WifiMode::Ap => {
                if has_credentials
                    && interval_elapsed(now, last_attempt, self.timings.retry_interval_ms)
                {
                    self.lock_state().last_sta_attempt = now;
                    if let Err(e) = self.switch_to_sta().await {
                        warn!(error = %e, "periodic STA retry failed, staying in AP");
                    }
                }
            }
            WifiMode::Transitioning => {
                // Normally another task is mid-switch and the next tick
                // sees the settled mode. If no switch is in flight, a
                // prior AP bring-up failed; retry it.
                if self.transition.try_lock().is_ok() {
                    warn!("mode stuck in transition, recovering to AP");
                    if let Err(e) = self.switch_to_ap().await {
                        warn!(error = %e, "AP recovery failed");
                    }
                }
            }
        }
    }

    pub fn current_mode(&self) -> WifiMode {
        self.lock_state().mode
    }

    pub fn local_ip(&self) -> Option<String> {
        self.lock_state().local_ip.clone()
    }

    pub fn ap_ssid(&self) -> &str {
        &self.ap_ssid
    }

    pub fn is_connected(&self) -> bool {
        self.current_mode() == WifiMode::Sta && self.driver.is_sta_connected()
    }

    pub fn status(&self) -> WifiStatus {
        let state = self.lock_state();
        WifiStatus {
            mode: state.mode.as_str(),
            connected: state.mode == WifiMode::Sta && self.driver.is_sta_connected(),
            ip: state.local_ip.clone(),
            ap_ssid: self.ap_ssid.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dose_core::kv::MemoryKv;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Scriptable radio: association succeeds while `available` is set.
    struct MockWifi {
        available: AtomicBool,
        associated: AtomicBool,
        connect_attempts: AtomicU32,
        ap_started: AtomicU32,
    }

    impl MockWifi {
        fn new(available: bool) -> Self {
            Self {
                available: AtomicBool::new(available),
                associated: AtomicBool::new(false),
                connect_attempts: AtomicU32::new(0),
                ap_started: AtomicU32::new(0),
            }
        }

        fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        fn drop_association(&self) {
            self.associated.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl WifiDriver for MockWifi {
        async fn start_ap(&self, _ssid: &str, _password: &str) -> Result<String> {
            self.ap_started.fetch_add(1, Ordering::SeqCst);
            Ok("192.168.4.1".to_string())
        }

        async fn stop_ap(&self) -> Result<()> {
            Ok(())
        }

        async fn connect_sta(
            &self,
            ssid: &str,
            _password: &str,
            _timeout: Duration,
        ) -> Result<String> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            if self.available.load(Ordering::SeqCst) && !ssid.is_empty() {
                self.associated.store(true, Ordering::SeqCst);
                Ok("10.0.0.42".to_string())
            } else {
                Err(DoserError::WifiTransient("association timeout".to_string()))
            }
        }

        async fn disconnect_sta(&self) -> Result<()> {
            self.associated.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_sta_connected(&self) -> bool {
            self.associated.load(Ordering::SeqCst)
        }
    }

    const DEVICE_ID: u64 = 0xA1B2_C3D4_E5F6;

    fn supervisor(driver: Arc<MockWifi>, kv: Arc<MemoryKv>) -> WifiSupervisor {
        let timings = WifiTimings {
            connect_timeout_ms: 50,
            fail_to_ap_ms: 150,
            retry_interval_ms: 200,
        };
        WifiSupervisor::new(
            driver,
            kv,
            Arc::new(TimeKeeper::new()),
            DEVICE_ID,
            "benchpw".to_string(),
            timings,
        )
    }

    #[test]
    fn test_ap_ssid_derived_from_device_id() {
        let sup = supervisor(Arc::new(MockWifi::new(false)), Arc::new(MemoryKv::new()));
        assert_eq!(sup.ap_ssid(), "SquareDose-A1B2");
    }

    #[tokio::test]
    async fn test_boot_without_credentials_starts_ap() {
        let driver = Arc::new(MockWifi::new(true));
        let sup = supervisor(driver.clone(), Arc::new(MemoryKv::new()));
        sup.begin().await.unwrap();

        assert_eq!(sup.current_mode(), WifiMode::Ap);
        assert_eq!(sup.local_ip().as_deref(), Some("192.168.4.1"));
        assert!(!sup.is_connected());
        assert_eq!(driver.connect_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_configure_then_switch_reaches_sta() {
        let driver = Arc::new(MockWifi::new(true));
        let sup = supervisor(driver, Arc::new(MemoryKv::new()));
        sup.begin().await.unwrap();

        sup.set_credentials("Net", "pw").unwrap();
        let ip = sup.switch_to_sta().await.unwrap();
        assert_eq!(ip, "10.0.0.42");
        assert_eq!(sup.current_mode(), WifiMode::Sta);
        assert!(sup.is_connected());

        let status = sup.status();
        assert_eq!(status.mode, "STA");
        assert!(status.connected);
    }

    #[tokio::test]
    async fn test_boot_with_persisted_credentials_joins_network() {
        let kv = Arc::new(MemoryKv::new());
        {
            let sup = supervisor(Arc::new(MockWifi::new(true)), kv.clone());
            sup.set_credentials("Net", "pw").unwrap();
        }

        // Fresh supervisor over the same store, as after a reboot
        let sup = supervisor(Arc::new(MockWifi::new(true)), kv);
        sup.begin().await.unwrap();
        assert_eq!(sup.current_mode(), WifiMode::Sta);
    }

    #[tokio::test]
    async fn test_sta_failure_falls_back_to_ap() {
        let driver = Arc::new(MockWifi::new(false));
        let kv = Arc::new(MemoryKv::new());
        let sup = supervisor(driver.clone(), kv);
        sup.set_credentials("Net", "pw").unwrap();

        sup.begin().await.unwrap();
        assert_eq!(sup.current_mode(), WifiMode::Ap);
        assert_eq!(driver.connect_attempts.load(Ordering::SeqCst), 1);
        // Credentials survive the failure
        assert!(sup.has_credentials());
    }

    #[tokio::test]
    async fn test_association_loss_recovers_to_ap_and_keeps_credentials() {
        let driver = Arc::new(MockWifi::new(true));
        let kv = Arc::new(MemoryKv::new());
        let sup = supervisor(driver.clone(), kv.clone());
        sup.set_credentials("Net", "pw").unwrap();
        sup.begin().await.unwrap();
        assert_eq!(sup.current_mode(), WifiMode::Sta);

        // Network goes away entirely
        driver.set_available(false);
        driver.drop_association();

        // First tick records the loss; still STA inside the grace window
        sup.keepalive_tick().await;
        assert_eq!(sup.current_mode(), WifiMode::Sta);

        // Failed reconnect attempts do not leave STA early
        sup.keepalive_tick().await;
        assert_eq!(sup.current_mode(), WifiMode::Sta);

        // Past the failure threshold the supervisor falls back to AP
        tokio::time::sleep(Duration::from_millis(200)).await;
        sup.keepalive_tick().await;
        assert_eq!(sup.current_mode(), WifiMode::Ap);
        assert_eq!(sup.ap_ssid(), "SquareDose-A1B2");
        assert!(sup.has_credentials());

        // Network returns; the next retry interval brings STA back
        driver.set_available(true);
        tokio::time::sleep(Duration::from_millis(250)).await;
        sup.keepalive_tick().await;
        assert_eq!(sup.current_mode(), WifiMode::Sta);
    }

    #[tokio::test]
    async fn test_retry_from_ap_at_most_once_per_interval() {
        let driver = Arc::new(MockWifi::new(false));
        let sup = supervisor(driver.clone(), Arc::new(MemoryKv::new()));
        sup.set_credentials("Net", "pw").unwrap();
        sup.switch_to_ap().await.unwrap();

        // Once the retry interval has elapsed since boot, one attempt fires
        tokio::time::sleep(Duration::from_millis(250)).await;
        sup.keepalive_tick().await;
        let after_first = driver.connect_attempts.load(Ordering::SeqCst);
        assert_eq!(after_first, 1);

        // Immediately again: inside the interval, no second attempt
        sup.keepalive_tick().await;
        assert_eq!(driver.connect_attempts.load(Ordering::SeqCst), after_first);

        // Once the interval elapses, exactly one more attempt
        tokio::time::sleep(Duration::from_millis(250)).await;
        sup.keepalive_tick().await;
        assert_eq!(driver.connect_attempts.load(Ordering::SeqCst), after_first + 1);
    }

    #[tokio::test]
    async fn test_cleared_credentials_stop_retries() {
        let driver = Arc::new(MockWifi::new(false));
        let sup = supervisor(driver.clone(), Arc::new(MemoryKv::new()));
        sup.set_credentials("Net", "pw").unwrap();
        sup.switch_to_ap().await.unwrap();
        sup.clear_credentials().unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        sup.keepalive_tick().await;
        assert_eq!(driver.connect_attempts.load(Ordering::SeqCst), 0);
        assert_eq!(sup.current_mode(), WifiMode::Ap);
    }

    #[tokio::test]
    async fn test_credential_validation() {
        let sup = supervisor(Arc::new(MockWifi::new(true)), Arc::new(MemoryKv::new()));
        assert!(sup.set_credentials("", "pw").is_err());
        assert!(sup.set_credentials(&"x".repeat(33), "pw").is_err());
        assert!(sup.set_credentials("Net", &"x".repeat(65)).is_err());
    }
}
