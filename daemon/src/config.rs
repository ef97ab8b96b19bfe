//! Configuration management (TOML)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub advisory: AdvisoryConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub scan_interval_ms: u64,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    /// Recent recommendations kept for status queries.
    pub history_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub cache_size: usize,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// 0 automatic, 1 notify for system, 2 confirm all, 3 monitor only.
    pub consent_level: i64,
    pub protected_processes: Vec<String>,
    pub never_terminate: Vec<String>,
    pub terminate_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub desktop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_db: Option<PathBuf>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 2000,
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            history_size: 100,
        }
    }
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.7,
            cache_size: 500,
            cache_ttl_secs: 30 * 60,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        fn names(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }
        Self {
            consent_level: 2,
            protected_processes: names(&[
                "systemd",
                "init",
                "sshd",
                "dbus-daemon",
                "NetworkManager",
                "pulseaudio",
                "pipewire",
                "Xorg",
                "Xwayland",
                "gnome-shell",
                "kwin",
                "sway",
                "gdm",
                "lightdm",
                "login",
            ]),
            never_terminate: names(&["systemd", "init", "kernel", "kthreadd"]),
            terminate_timeout_ms: 5000,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            desktop: true,
            audit_db: None,
        }
    }
}

impl MonitoringConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }
}

impl AdvisoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl SafetyConfig {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "aura")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Audit database location, explicit or under the data directory.
    pub fn audit_path(&self) -> PathBuf {
        self.notifications.audit_db.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "aura")
                .map(|dirs| dirs.data_dir().join("audit.db"))
                .unwrap_or_else(|| PathBuf::from("aura-audit.db"))
        })
    }
}
