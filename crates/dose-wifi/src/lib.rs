pub mod driver;
pub mod keepalive;
pub mod supervisor;

pub use driver::WifiDriver;
pub use supervisor::{WifiMode, WifiStatus, WifiSupervisor, WifiTimings};
