use std::time::Duration;

use async_trait::async_trait;
use dose_core::Result;

/// Radio driver seam. The on-target build wraps the SoC's Wi-Fi stack;
/// the bench build simulates association. Association and teardown may
/// block for seconds, so the methods are async; the supervisor never
/// holds its state lock across them.
#[async_trait]
pub trait WifiDriver: Send + Sync {
    /// Bring up the softAP; returns the AP-side address.
    async fn start_ap(&self, ssid: &str, password: &str) -> Result<String>;

    async fn stop_ap(&self) -> Result<()>;

    /// Associate with a network; resolves to the station address or a
    /// `WifiTransient` error once `timeout` expires.
    async fn connect_sta(&self, ssid: &str, password: &str, timeout: Duration) -> Result<String>;

    async fn disconnect_sta(&self) -> Result<()>;

    /// Instantaneous association state; cheap enough to poll every tick.
    fn is_sta_connected(&self) -> bool;
}
