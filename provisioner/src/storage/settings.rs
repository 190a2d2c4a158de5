//! Settings file management

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Provisioner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Installer backend configuration
    #[serde(default)]
    pub backend: BackendSettings,

    /// Deployment state document key
    #[serde(default = "default_session")]
    pub session: String,

    /// Continue automatically after a successful operation
    #[serde(default = "default_true")]
    pub auto_advance: bool,

    /// Grace interval before auto-advancing, in milliseconds
    #[serde(default = "default_auto_advance_delay_ms")]
    pub auto_advance_delay_ms: u64,

    /// Enable the local status server
    #[serde(default)]
    pub enable_status_server: bool,

    /// Local status server configuration
    #[serde(default)]
    pub status_server: StatusServerSettings,
}

fn default_true() -> bool {
    true
}

fn default_session() -> String {
    "deployment-state".to_string()
}

fn default_auto_advance_delay_ms() -> u64 {
    2000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            backend: BackendSettings::default(),
            session: default_session(),
            auto_advance: true,
            auto_advance_delay_ms: default_auto_advance_delay_ms(),
            enable_status_server: false,
            status_server: StatusServerSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults when the file is missing or invalid
    pub async fn load_or_default(file: &File) -> Self {
        if !file.exists().await {
            return Self::default();
        }
        match file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "Unable to read settings file {}: {}, using defaults",
                    file.path().display(),
                    e
                );
                Self::default()
            }
        }
    }
}

/// Installer backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL of the installer backend
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Execution channel connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Local status server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusServerSettings {
    #[serde(default = "default_status_host")]
    pub host: String,

    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_status_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    8090
}

impl Default for StatusServerSettings {
    fn default() -> Self {
        Self {
            host: default_status_host(),
            port: default_status_port(),
        }
    }
}
