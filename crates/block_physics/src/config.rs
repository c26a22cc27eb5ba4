use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::ConfigError;

pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "BLOCK_PHYSICS_SHUTDOWN_TIMEOUT_MS";
pub const ENV_WORKER_PREFIX: &str = "BLOCK_PHYSICS_WORKER_PREFIX";

pub const DEFAULT_CONFIG_FILE_NAME: &str = "block_physics.toml";
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_WORKER_PREFIX: &str = "physics";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub shutdown_timeout: Duration,
    pub worker_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            worker_name_prefix: DEFAULT_WORKER_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    physics: PhysicsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PhysicsSection {
    shutdown_timeout_ms: Option<u64>,
    worker_name_prefix: Option<String>,
}

impl SchedulerConfig {
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "shutdown_timeout_ms",
                value: "0".to_string(),
            });
        }
        self.shutdown_timeout = timeout;
        Ok(self)
    }

    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        if prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "worker_name_prefix",
                value: prefix,
            });
        }
        self.worker_name_prefix = prefix;
        Ok(self)
    }

    /// `block_physics.toml` in the working directory if present, otherwise
    /// the environment.
    pub fn from_default_sources() -> Result<Self, ConfigError> {
        let config_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::from_config_file(config_path);
        }
        Self::from_env()
    }

    /// Reads the `[physics]` table; keys missing there fall back to the
    /// environment, then to defaults.
    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::ReadConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let file: ConfigFile =
            toml::from_str(&content).map_err(|err| ConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        let section = file.physics;

        Self::from_env_with(|key| match key {
            ENV_SHUTDOWN_TIMEOUT_MS => section
                .shutdown_timeout_ms
                .map(|value| value.to_string())
                .or_else(|| std::env::var(key).ok()),
            ENV_WORKER_PREFIX => section
                .worker_name_prefix
                .clone()
                .or_else(|| std::env::var(key).ok()),
            _ => std::env::var(key).ok(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(mut getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = getter(ENV_SHUTDOWN_TIMEOUT_MS) {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "shutdown_timeout_ms",
                    value: value.clone(),
                })?;
            config = config.with_shutdown_timeout(Duration::from_millis(millis))?;
        }
        if let Some(value) = getter(ENV_WORKER_PREFIX) {
            config = config.with_worker_name_prefix(value)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("duration")
            .as_nanos();
        std::env::temp_dir().join(format!("block-physics-tests-{prefix}-{unique}"))
    }

    fn getter(values: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let values: HashMap<String, String> = values
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| values.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config = SchedulerConfig::from_env_with(getter(&[])).expect("config");
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn env_values_override_defaults() {
        let config = SchedulerConfig::from_env_with(getter(&[
            (ENV_SHUTDOWN_TIMEOUT_MS, "250"),
            (ENV_WORKER_PREFIX, "phys"),
        ]))
        .expect("config");
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.worker_name_prefix, "phys");
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        let result = SchedulerConfig::from_env_with(getter(&[(ENV_SHUTDOWN_TIMEOUT_MS, "soon")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = SchedulerConfig::from_env_with(getter(&[(ENV_SHUTDOWN_TIMEOUT_MS, "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = SchedulerConfig::from_env_with(getter(&[(ENV_WORKER_PREFIX, "  ")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn config_file_physics_table_is_read() {
        let dir = temp_dir("config-file");
        fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join(DEFAULT_CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[physics]\nshutdown_timeout_ms = 1500\nworker_name_prefix = \"tick\"\n",
        )
        .expect("write config");

        let config = SchedulerConfig::from_config_file(&path).expect("config");
        assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(config.worker_name_prefix, "tick");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn config_file_errors_are_reported() {
        let dir = temp_dir("config-errors");
        fs::create_dir_all(&dir).expect("create dir");

        let missing = dir.join("missing.toml");
        assert!(matches!(
            SchedulerConfig::from_config_file(&missing),
            Err(ConfigError::ReadConfigFile { .. })
        ));

        let bad = dir.join("bad.toml");
        fs::write(&bad, "[physics]\nshutdown_timeout_ms = \"fast\"\n").expect("write config");
        assert!(matches!(
            SchedulerConfig::from_config_file(&bad),
            Err(ConfigError::ParseConfigFile { .. })
        ));

        let unknown = dir.join("unknown.toml");
        fs::write(&unknown, "[physics]\ntick_rate = 5\n").expect("write config");
        assert!(matches!(
            SchedulerConfig::from_config_file(&unknown),
            Err(ConfigError::ParseConfigFile { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
