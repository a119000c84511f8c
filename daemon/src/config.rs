//! Configuration management (TOML)

use crate::collector::{comm_name, PrivilegeClass, NICE_MAX, NICE_MIN};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "nicewatch";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read or write config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub watch: WatchConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub tick_interval_seconds: u64,
    pub target_priority: i32,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub unprivileged: Vec<String>,
    #[serde(default)]
    pub privileged: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub command: Vec<String>,
}

/// A watched name with the privilege its correction needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub name: String,
    pub class: PrivilegeClass,
}

fn default_command_timeout() -> u64 {
    5
}

impl Default for EscalationConfig {
    fn default() -> Self {
        EscalationConfig {
            command: vec!["sudo".to_string(), "-n".to_string()],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            general: GeneralConfig {
                tick_interval_seconds: 30,
                target_priority: NICE_MAX,
                command_timeout_seconds: default_command_timeout(),
                log_path: None,
                status_path: None,
                socket_path: None,
            },
            watch: WatchConfig {
                unprivileged: vec!["baloo_file".to_string(), "tracker-miner-fs-3".to_string()],
                privileged: vec!["packagekitd".to_string(), "updatedb".to_string()],
            },
            escalation: EscalationConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let general = &self.general;
        if general.tick_interval_seconds == 0 {
            return Err(ConfigError::Invalid("tick_interval_seconds must be positive".into()));
        }
        if general.command_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("command_timeout_seconds must be positive".into()));
        }
        if !(NICE_MIN..=NICE_MAX).contains(&general.target_priority) {
            return Err(ConfigError::Invalid(format!(
                "target_priority {} is outside {}..={}",
                general.target_priority, NICE_MIN, NICE_MAX
            )));
        }
        if self.escalation.command.is_empty() {
            return Err(ConfigError::Invalid("escalation.command must not be empty".into()));
        }

        // Keyed by the kernel's `comm`: two names sharing it would claim the
        // same processes.
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for name in self.watch.unprivileged.iter().chain(&self.watch.privileged) {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("watch list contains an empty name".into()));
            }
            if let Some(other) = seen.insert(comm_name(name), name) {
                if other == name.as_str() {
                    return Err(ConfigError::Invalid(format!("{name} is listed more than once")));
                }
                return Err(ConfigError::Invalid(format!(
                    "{other} and {name} share the process name prefix {:?}",
                    comm_name(name)
                )));
            }
        }
        Ok(())
    }

    /// Unprivileged names first, then privileged, each in configured order.
    pub fn watch_targets(&self) -> Vec<WatchTarget> {
        let unprivileged = self.watch.unprivileged.iter().map(|name| WatchTarget {
            name: name.clone(),
            class: PrivilegeClass::Unprivileged,
        });
        let privileged = self.watch.privileged.iter().map(|name| WatchTarget {
            name: name.clone(),
            class: PrivilegeClass::Privileged,
        });
        unprivileged.chain(privileged).collect()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.general.tick_interval_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.general.command_timeout_seconds)
    }

    pub fn log_path(&self) -> PathBuf {
        self.general
            .log_path
            .clone()
            .unwrap_or_else(|| data_dir().join("throttle.log"))
    }

    pub fn status_path(&self) -> Option<PathBuf> {
        self.general.status_path.clone()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.general.socket_path.clone().unwrap_or_else(|| {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/run/user/{}/{}.sock", uid, APP_NAME))
        })
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
