//! YAML loader with custom tag support
//!
//! Supported tags:
//! - `!include path` - Include another YAML file (relative to the including file)
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution with optional default

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader resolving the bridge's custom tags
pub struct YamlLoader {
    /// Base directory for resolving relative paths
    base_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, for circular include detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a loader rooted at `base_dir`, reading `secrets.yaml` from it
    pub fn new(base_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let base_dir = base_dir.into();
        let secrets = Secrets::load(&base_dir)?;
        Ok(Self::with_secrets(base_dir, secrets))
    }

    /// Create a loader with pre-loaded secrets
    pub fn with_secrets(base_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            base_dir: base_dir.into(),
            secrets,
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let v = self.process_value(v, source_path)?;
                    result.insert(k, v);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, source_path))
                .collect::<ConfigResult<Vec<Value>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Processing tag '{}' with value {:?}", tag, tagged.value);

        match tag.as_str() {
            "!include" => self.process_include(tagged.value, source_path),
            "!secret" => self.process_secret(tagged.value),
            "!env_var" => process_env_var(tagged.value),
            _ => Err(ConfigError::UnsupportedTag { tag }),
        }
    }

    fn process_include(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        let Value::String(relative) = value else {
            return Err(ConfigError::InvalidValue {
                key: "!include".to_string(),
                reason: "include path must be a string".to_string(),
            });
        };

        let base = source_path.parent().unwrap_or(&self.base_dir);
        let path = base.join(relative);
        if !path.exists() {
            return Err(ConfigError::IncludeNotFound { path });
        }

        debug!("Including file: {:?}", path);
        self.load_file(&path)
    }

    fn process_secret(&self, value: Value) -> ConfigResult<Value> {
        let Value::String(key) = value else {
            return Err(ConfigError::InvalidValue {
                key: "!secret".to_string(),
                reason: "secret key must be a string".to_string(),
            });
        };

        let secret = self.secrets.get(&key)?;
        debug!("Substituted secret: {}", key);
        Ok(Value::String(secret.to_string()))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// `!env_var NAME` or `!env_var NAME fallback`
fn process_env_var(value: Value) -> ConfigResult<Value> {
    let Value::String(spec) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };

    let (var, default) = match spec.split_once(char::is_whitespace) {
        Some((var, default)) => (var.to_string(), Some(default.trim().to_string())),
        None => (spec, None),
    };

    match (std::env::var(&var), default) {
        (Ok(value), _) => {
            debug!("Substituted env var: {}", var);
            Ok(Value::String(value))
        }
        (Err(_), Some(default)) => Ok(Value::String(default)),
        (Err(_), None) => Err(ConfigError::EnvVarNotFound { var }),
    }
}

/// Load a YAML file with full tag processing, secrets read from its directory
pub fn load_yaml(path: impl AsRef<Path>) -> ConfigResult<Value> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut loader = YamlLoader::new(dir)?;
    loader.load_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
        value.get(key)
    }

    #[test]
    fn test_load_simple_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.yaml");
        fs::write(&path, "controller:\n  host: 10.0.0.2\n  port: 8081\n").unwrap();

        let value = load_yaml(&path).unwrap();
        let controller = get(&value, "controller").unwrap();
        assert_eq!(
            get(controller, "host"),
            Some(&Value::String("10.0.0.2".to_string()))
        );
    }

    #[test]
    fn test_secret() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("secrets.yaml"), "ihc_password: s3cret\n").unwrap();
        let path = dir.path().join("bridge.yaml");
        fs::write(&path, "password: !secret ihc_password\n").unwrap();

        let value = load_yaml(&path).unwrap();
        assert_eq!(
            get(&value, "password"),
            Some(&Value::String("s3cret".to_string()))
        );
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.yaml");
        fs::write(&path, "password: !secret nope\n").unwrap();

        assert!(matches!(
            load_yaml(&path),
            Err(ConfigError::SecretNotFound { .. })
        ));
    }

    #[test]
    fn test_env_var_with_default() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("IHC_CONFIG_TEST_HOST", "broker.local");
        std::env::remove_var("IHC_CONFIG_TEST_UNSET");
        let path = dir.path().join("bridge.yaml");
        fs::write(
            &path,
            "host: !env_var IHC_CONFIG_TEST_HOST\nother: !env_var IHC_CONFIG_TEST_UNSET fallback\n",
        )
        .unwrap();

        let value = load_yaml(&path).unwrap();
        assert_eq!(
            get(&value, "host"),
            Some(&Value::String("broker.local".to_string()))
        );
        assert_eq!(
            get(&value, "other"),
            Some(&Value::String("fallback".to_string()))
        );

        std::env::remove_var("IHC_CONFIG_TEST_HOST");
    }

    #[test]
    fn test_env_var_missing() {
        std::env::remove_var("IHC_CONFIG_TEST_MISSING");
        let value = Value::String("IHC_CONFIG_TEST_MISSING".to_string());
        assert!(matches!(
            process_env_var(value),
            Err(ConfigError::EnvVarNotFound { .. })
        ));
    }

    #[test]
    fn test_include_and_circular_detection() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mqtt.yaml"), "host: broker\n").unwrap();
        let path = dir.path().join("bridge.yaml");
        fs::write(&path, "mqtt: !include mqtt.yaml\n").unwrap();

        let value = load_yaml(&path).unwrap();
        let mqtt = get(&value, "mqtt").unwrap();
        assert_eq!(get(mqtt, "host"), Some(&Value::String("broker".to_string())));

        fs::write(dir.path().join("a.yaml"), "b: !include b.yaml\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "a: !include a.yaml\n").unwrap();
        assert!(matches!(
            load_yaml(dir.path().join("a.yaml")),
            Err(ConfigError::CircularInclude { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.yaml");
        fs::write(&path, "x: !include_dir_list foo\n").unwrap();
        assert!(matches!(
            load_yaml(&path),
            Err(ConfigError::UnsupportedTag { .. })
        ));
    }
}
