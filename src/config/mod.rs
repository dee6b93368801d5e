//! Configuration management
//!
//! Built-in defaults, then an optional TOML file, then `TURNLINK_*`
//! environment variables (nested keys joined with `__`, e.g.
//! `TURNLINK_CHANNEL__DESIRED_LIFETIME_SECS=300`).

use crate::domain::shared::{Result, TurnError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_PREFIX: &str = "TURNLINK";

/// SOFTWARE attribute limit (RFC 5389 section 15.10)
pub const MAX_SOFTWARE_LEN: usize = 763;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub channel: ChannelConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TURN server as `"host:port"`
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub desired_lifetime_secs: u32,
    pub receive_timeout_ms: u64,
    /// Value of the SOFTWARE attribute on Allocate requests
    pub software: Option<String>,
    pub retransmit: RetransmitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetransmitConfig {
    pub enabled: bool,
    pub initial_rto_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus listener address; no exporter when unset
    pub listen: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:3478".to_string(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            desired_lifetime_secs: 600,
            receive_timeout_ms: 1000,
            software: None,
            retransmit: RetransmitConfig::default(),
        }
    }
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_rto_ms: 500,
            max_attempts: 7,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ChannelConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl Config {
    /// Load configuration, layering an optional file and the environment
    /// over the defaults
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(TurnError::Config("server.host must not be empty".to_string()));
        }
        if self.channel.receive_timeout_ms == 0 {
            return Err(TurnError::Config(
                "channel.receive_timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(software) = &self.channel.software {
            if software.len() > MAX_SOFTWARE_LEN {
                return Err(TurnError::Config(format!(
                    "channel.software must be at most {} bytes",
                    MAX_SOFTWARE_LEN
                )));
            }
        }
        if self.channel.retransmit.enabled {
            if self.channel.retransmit.initial_rto_ms == 0 {
                return Err(TurnError::Config(
                    "channel.retransmit.initial_rto_ms must be positive".to_string(),
                ));
            }
            if self.channel.retransmit.max_attempts == 0 {
                return Err(TurnError::Config(
                    "channel.retransmit.max_attempts must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1:3478");
        assert_eq!(config.channel.desired_lifetime_secs, 600);
        assert_eq!(config.channel.receive_timeout(), Duration::from_secs(1));
        assert!(config.channel.retransmit.enabled);
        assert_eq!(config.logging.level, "info");
        assert!(config.metrics.listen.is_none());
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("turnlink-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
host = "turn.example.net:3478"

[channel]
desired_lifetime_secs = 300
software = "turnlink test"

[channel.retransmit]
enabled = false
"#
        )
        .unwrap();

        let config = tokio_test::assert_ok!(Config::load(path.to_str()));
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.host, "turn.example.net:3478");
        assert_eq!(config.channel.desired_lifetime_secs, 300);
        assert_eq!(config.channel.software.as_deref(), Some("turnlink test"));
        assert!(!config.channel.retransmit.enabled);
        // untouched keys keep their defaults
        assert_eq!(config.channel.receive_timeout_ms, 1000);
        assert_eq!(config.channel.retransmit.max_attempts, 7);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load(Some("/nonexistent/turnlink.toml")).unwrap_err();
        assert!(matches!(err, TurnError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.channel.receive_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(TurnError::Config(_))));

        let mut config = Config::default();
        config.server.host = " ".to_string();
        let err = tokio_test::assert_err!(config.validate());
        assert!(err.to_string().contains("server.host"));
    }

    #[test]
    fn test_validate_limits_software_length() {
        let mut config = Config::default();
        config.channel.software = Some("x".repeat(MAX_SOFTWARE_LEN));
        tokio_test::assert_ok!(config.validate());

        config.channel.software = Some("x".repeat(MAX_SOFTWARE_LEN + 1));
        let err = tokio_test::assert_err!(config.validate());
        assert!(err.to_string().contains("channel.software"));
    }
}
