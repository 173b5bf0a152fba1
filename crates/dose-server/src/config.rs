use serde::{Deserialize, Serialize};

/// Top-level TOML configuration for the control-plane server.
/// Every field has a default so a missing file or empty section works.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub wifi: WifiSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiSection {
    #[serde(default = "default_ap_password")]
    pub ap_password: String,
}

fn default_ap_password() -> String {
    dose_core::DEFAULT_AP_PASSWORD.to_string()
}

impl Default for WifiSection {
    fn default() -> Self {
        Self {
            ap_password: default_ap_password(),
        }
    }
}

/// Load configuration from a TOML file on disk.
pub fn load_config(path: &str) -> anyhow::Result<ServerConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&contents)?;
    Ok(config)
}
