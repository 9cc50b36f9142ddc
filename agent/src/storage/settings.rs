//! Settings file management

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Executable invoked for every deployment
    #[serde(default = "default_playbook_bin")]
    pub ansible_playbook_bin: String,

    /// Shell used to run the composed command line
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Upper bound on the output kept per deployment
    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,

    /// Deployments allowed to run at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deployments: usize,

    /// Interval between scans for pending deployments
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Enable the pending-deployment poller
    #[serde(default = "default_true")]
    pub enable_poller: bool,

    /// Enable local HTTP server
    #[serde(default = "default_true")]
    pub enable_socket_server: bool,

    /// Local HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

fn default_playbook_bin() -> String {
    "ansible-playbook".to_string()
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_output_cap() -> usize {
    1024 * 1024
}

fn default_max_concurrent() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            ansible_playbook_bin: default_playbook_bin(),
            shell: default_shell(),
            output_cap_bytes: default_output_cap(),
            max_concurrent_deployments: default_max_concurrent(),
            poll_interval_secs: default_poll_interval(),
            enable_poller: true,
            enable_socket_server: true,
            server: ServerSettings::default(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8086
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Read the settings file, falling back to defaults when it does not exist
pub async fn load_settings(settings_file: &File) -> Result<Settings, DeployError> {
    if !settings_file.exists().await {
        info!(
            "No settings file at {}, using defaults",
            settings_file.path().display()
        );
        return Ok(Settings::default());
    }

    settings_file.read_json::<Settings>().await.map_err(|e| {
        DeployError::ConfigError(format!(
            "Unable to read settings file {}: {}",
            settings_file.path().display(),
            e
        ))
    })
}
