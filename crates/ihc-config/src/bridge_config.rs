//! Bridge configuration
//!
//! Parses the `controller:`, `mqtt:`, `bridge:`, `system:` and `logging:`
//! sections of the bridge configuration file. Every field has a default so
//! an empty (or missing) file yields a runnable configuration.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Connection settings for the controller's command API and event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout for the command API
    pub request_timeout_secs: u64,
    /// Retries for 502/503/504 responses
    pub max_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            username: None,
            password: None,
            request_timeout_secs: 5,
            max_retries: 5,
        }
    }
}

impl ControllerConfig {
    /// Command API endpoint
    pub fn request_url(&self) -> String {
        format!("http://{}:{}/ihcrequest", self.host, self.port)
    }

    /// Event stream endpoint
    pub fn events_url(&self) -> String {
        format!("ws://{}:{}/ihcevents-ws", self.host, self.port)
    }

    /// Basic auth credentials, only when both parts are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Defaults to `ihc_bridge_<unix seconds>` when unset
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            topic_prefix: ihc_core::DEFAULT_TOPIC_PREFIX.to_string(),
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Timing and escalation policy of the synchronization engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub confirmation_timeout_secs: u64,
    pub failure_threshold: usize,
    pub failure_window_secs: u64,
    pub sweep_interval_ms: u64,
    pub event_reconnect_delay_secs: u64,
    pub event_read_timeout_ms: u64,
    pub loop_join_timeout_secs: u64,
    pub shutdown_join_timeout_secs: u64,
    pub restart_settle_secs: u64,
    pub reconnect_probe_attempts: u32,
    pub reconnect_probe_delay_secs: u64,
    pub host_restart_notice_delay_secs: u64,
    pub trigger_word: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: 10,
            failure_threshold: 3,
            failure_window_secs: 300,
            sweep_interval_ms: 1000,
            event_reconnect_delay_secs: 10,
            event_read_timeout_ms: 1000,
            loop_join_timeout_secs: 3,
            shutdown_join_timeout_secs: 5,
            restart_settle_secs: 10,
            reconnect_probe_attempts: 5,
            reconnect_probe_delay_secs: 5,
            host_restart_notice_delay_secs: 5,
            trigger_word: ihc_core::DEFAULT_TRIGGER_WORD.to_string(),
        }
    }
}

impl BridgeSettings {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn event_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.event_reconnect_delay_secs)
    }

    pub fn event_read_timeout(&self) -> Duration {
        Duration::from_millis(self.event_read_timeout_ms)
    }

    pub fn loop_join_timeout(&self) -> Duration {
        Duration::from_secs(self.loop_join_timeout_secs)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_join_timeout_secs)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_secs(self.restart_settle_secs)
    }

    pub fn reconnect_probe_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_probe_delay_secs)
    }

    pub fn host_restart_notice_delay(&self) -> Duration {
        Duration::from_secs(self.host_restart_notice_delay_secs)
    }
}

/// Commands run for the privileged system actions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub service_restart_command: Vec<String>,
    pub host_restart_command: Vec<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            service_restart_command: ["sudo", "systemctl", "restart", "ihcserver"]
                .map(String::from)
                .to_vec(),
            host_restart_command: ["sudo", "reboot"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub debug: bool,
}

/// The complete bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub controller: ControllerConfig,
    pub mqtt: MqttConfig,
    pub bridge: BridgeSettings,
    pub system: SystemConfig,
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(path)?;
        Self::from_yaml(yaml)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Configuration file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse configuration from an already tag-processed YAML value
    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        let config: BridgeConfig = match yaml {
            Value::Null => BridgeConfig::default(),
            Value::Mapping(_) => {
                serde_yaml::from_value(yaml).map_err(ConfigError::Schema)?
            }
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "root".to_string(),
                    reason: "configuration must be a mapping".to_string(),
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(key: &str, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                key: key.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.controller.host.trim().is_empty() {
            return Err(invalid("controller.host", "must not be empty"));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(invalid("mqtt.host", "must not be empty"));
        }
        if self.bridge.failure_threshold == 0 {
            return Err(invalid("bridge.failure_threshold", "must be at least 1"));
        }
        if self.bridge.confirmation_timeout_secs == 0 {
            return Err(invalid(
                "bridge.confirmation_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.bridge.sweep_interval_ms == 0 {
            return Err(invalid("bridge.sweep_interval_ms", "must be greater than zero"));
        }
        if self.bridge.event_read_timeout_ms == 0 {
            return Err(invalid(
                "bridge.event_read_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.bridge.trigger_word.trim().is_empty() {
            return Err(invalid("bridge.trigger_word", "must not be empty"));
        }
        if self.system.service_restart_command.is_empty() {
            return Err(invalid("system.service_restart_command", "must not be empty"));
        }
        if self.system.host_restart_command.is_empty() {
            return Err(invalid("system.host_restart_command", "must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.controller.port, 8081);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_prefix, "ihc");
        assert_eq!(config.bridge.confirmation_timeout(), Duration::from_secs(10));
        assert_eq!(config.bridge.failure_threshold, 3);
        assert_eq!(config.bridge.failure_window(), Duration::from_secs(300));
        assert_eq!(config.bridge.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.bridge.trigger_word, "RESTART");
        assert_eq!(
            config.system.service_restart_command,
            vec!["sudo", "systemctl", "restart", "ihcserver"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_controller_urls() {
        let controller = ControllerConfig {
            host: "10.0.0.5".to_string(),
            ..Default::default()
        };
        assert_eq!(controller.request_url(), "http://10.0.0.5:8081/ihcrequest");
        assert_eq!(controller.events_url(), "ws://10.0.0.5:8081/ihcevents-ws");
    }

    #[test]
    fn test_credentials_require_both_parts() {
        let mut controller = ControllerConfig {
            username: Some("admin".to_string()),
            ..Default::default()
        };
        assert_eq!(controller.credentials(), None);
        controller.password = Some("12345678".to_string());
        assert_eq!(controller.credentials(), Some(("admin", "12345678")));
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml: Value = serde_yaml::from_str(
            r#"
controller:
  host: 192.168.1.10
mqtt:
  host: 192.168.1.20
  topic_prefix: home/ihc
bridge:
  failure_threshold: 5
logging:
  debug: true
"#,
        )
        .unwrap();

        let config = BridgeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.controller.host, "192.168.1.10");
        assert_eq!(config.controller.port, 8081);
        assert_eq!(config.mqtt.topic_prefix, "home/ihc");
        assert_eq!(config.bridge.failure_threshold, 5);
        assert_eq!(config.bridge.failure_window_secs, 300);
        assert!(config.logging.debug);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = BridgeConfig::from_yaml(Value::Null).unwrap();
        assert_eq!(config.controller.host, "127.0.0.1");
    }

    #[test]
    fn test_validation_rejects_zero_threshold() {
        let yaml: Value = serde_yaml::from_str("bridge:\n  failure_threshold: 0\n").unwrap();
        let err = BridgeConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "bridge.failure_threshold"));
    }

    #[test]
    fn test_non_mapping_root() {
        let yaml: Value = serde_yaml::from_str("- a\n- b\n").unwrap();
        assert!(BridgeConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_wrong_value_type_is_a_schema_error() {
        let yaml: Value = serde_yaml::from_str("mqtt:\n  port: broker\n").unwrap();
        let err = BridgeConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)));
    }

    #[test]
    fn test_load_with_secret() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("secrets.yaml"), "ihc_password: hunter2\n").unwrap();
        let path = dir.path().join("bridge.yaml");
        fs::write(
            &path,
            "controller:\n  username: admin\n  password: !secret ihc_password\n",
        )
        .unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.controller.credentials(), Some(("admin", "hunter2")));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = BridgeConfig::load_or_default(dir.path().join("missing.yaml")).unwrap();
        assert_eq!(config.mqtt.port, 1883);
    }
}
