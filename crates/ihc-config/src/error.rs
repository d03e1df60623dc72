//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The document parsed but does not match the bridge configuration layout
    #[error("configuration does not match the expected layout: {0}")]
    Schema(#[source] serde_yaml::Error),

    #[error("unsupported YAML tag {tag}")]
    UnsupportedTag { tag: String },

    /// `!secret key` with no such key in the secrets file
    #[error("secret '{key}' is not defined")]
    SecretNotFound { key: String },

    #[error("included file {path} does not exist")]
    IncludeNotFound { path: PathBuf },

    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    /// `!env_var VAR` with VAR unset and no default
    #[error("environment variable '{var}' is not set")]
    EnvVarNotFound { var: String },

    #[error("{key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
