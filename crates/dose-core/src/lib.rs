pub mod actuator;
pub mod calibration;
pub mod clock;
pub mod dose;
pub mod error;
pub mod hourlog;
pub mod kv;
pub mod schedule;

pub use error::{DoserError, Result};

/// Number of peristaltic pump heads on the board
pub const HEAD_COUNT: usize = 4;

/// AP SSID prefix; the suffix is derived from the device id
pub const AP_SSID_PREFIX: &str = "SquareDose-";

/// Default softAP address
pub const DEFAULT_AP_IP: &str = "192.168.4.1";

/// Default softAP password (configurable)
pub const DEFAULT_AP_PASSWORD: &str = "squaredose";

/// STA association timeout
pub const STA_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// How long STA may stay disconnected before falling back to AP
pub const STA_FAIL_TO_AP_MS: u64 = 60_000;

/// Minimum gap between STA connection attempts from AP mode
pub const STA_RETRY_INTERVAL_MS: u64 = 60_000;

/// Wi-Fi keep-alive task cadence
pub const WIFI_KEEPALIVE_TICK_MS: u64 = 10_000;

/// Scheduler task cadence
pub const SCHEDULER_TICK_MS: u64 = 1_000;

/// Persistence namespaces
pub const NS_WIFI_CONFIG: &str = "wifi_config";
pub const NS_SCHEDULES: &str = "schedules";
pub const NS_DOSING_LOGS: &str = "dosinglogs";
pub const NS_SYSTEM: &str = "system";
