//! YAML configuration loading for the IHC bridge
//!
//! Supports the following custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml next to the configuration file
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use ihc_config::BridgeConfig;
//!
//! let config = BridgeConfig::load_or_default("/etc/ihc-bridge/bridge.yaml")?;
//! println!("controller at {}", config.controller.request_url());
//! ```

mod bridge_config;
mod error;
mod loader;
mod secrets;

pub use bridge_config::{
    BridgeConfig, BridgeSettings, ControllerConfig, LoggingConfig, MqttConfig, SystemConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "ihc_bridge_config.yaml";

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
