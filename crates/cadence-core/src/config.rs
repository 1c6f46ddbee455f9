//! Cadence configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CadenceError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// SQLite database path.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_database_path() -> String {
    "~/.cadence/cadence.db".into()
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            engine: EngineConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl CadenceConfig {
    /// Load config from the default path (~/.cadence/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CadenceError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CadenceError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CadenceError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
            .join("config.toml")
    }

    /// Get the Cadence home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
    }
}

/// Scheduling driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between driver ticks when running the loop.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Upper bound on a single gateway call. Exceeding it counts as a
    /// dispatch failure (assume non-delivery, release the reservation).
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
    /// Dispatch attempts per step before the enrollment fails.
    #[serde(default = "default_max_attempts")]
    pub max_dispatch_attempts: u32,
    /// Reference timezone for the daily quota calendar.
    #[serde(default = "default_quota_timezone")]
    pub quota_timezone: String,
}

fn default_tick_interval() -> u64 {
    300
}
fn default_dispatch_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_quota_timezone() -> String {
    "UTC".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            max_dispatch_attempts: default_max_attempts(),
            quota_timezone: default_quota_timezone(),
        }
    }
}

/// Messaging backend selection. When a provider section is absent the
/// console gateway takes its place, so a bare install still works.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub twilio: Option<TwilioConfig>,
}

/// SMTP email backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// From address for outreach mail.
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_smtp_port() -> u16 {
    587
}
fn default_true() -> bool {
    true
}

/// Twilio SMS backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CadenceConfig::default();
        assert_eq!(config.engine.tick_interval_secs, 300);
        assert_eq!(config.engine.max_dispatch_attempts, 3);
        assert_eq!(config.engine.quota_timezone, "UTC");
        assert!(config.channel.smtp.is_none());
        assert!(config.channel.twilio.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            database_path = "/tmp/cadence-test.db"

            [engine]
            tick_interval_secs = 60

            [channel.twilio]
            account_sid = "AC123"
            auth_token = "secret"
            from_number = "+15550001111"
        "#;
        let config: CadenceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_path, "/tmp/cadence-test.db");
        assert_eq!(config.engine.tick_interval_secs, 60);
        // Unspecified fields fall back to defaults
        assert_eq!(config.engine.dispatch_timeout_secs, 30);
        let twilio = config.channel.twilio.unwrap();
        assert_eq!(twilio.from_number, "+15550001111");
        assert!(twilio.enabled);
    }
}
