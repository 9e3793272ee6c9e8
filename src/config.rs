//! Configuration for the hosted runtime.
//!
//! Supports YAML file and environment variable overrides.

use serde::Deserialize;
use std::path::Path;

use kshim_core::runtime::DEFAULT_ONLINE_CPUS;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "kshim.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "KSHIM_CONFIG";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "KSHIM_LOG";
/// Environment variable overriding `runtime.online_cpus`.
pub const ONLINE_CPUS_ENV_VAR: &str = "KSHIM_ONLINE_CPUS";
/// Environment variable overriding `runtime.page_limit`.
pub const PAGE_LIMIT_ENV_VAR: &str = "KSHIM_PAGE_LIMIT";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Hosted runtime shape.
    pub runtime: RuntimeConfig,
    /// Logging.
    pub log: LogConfig,
}

/// Hosted runtime configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// CPUs reported by `num_online_cpus()`.
    pub online_cpus: u32,
    /// Pages that may be allocated at once before allocations fail.
    /// Unlimited when absent.
    pub page_limit: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            online_cpus: DEFAULT_ONLINE_CPUS,
            page_limit: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(cpus) = std::env::var(ONLINE_CPUS_ENV_VAR) {
            self.runtime.online_cpus = cpus
                .parse()
                .map_err(|_| ConfigError::InvalidEnv(ONLINE_CPUS_ENV_VAR, cpus))?;
        }

        if let Ok(limit) = std::env::var(PAGE_LIMIT_ENV_VAR) {
            self.runtime.page_limit = if limit.is_empty() || limit == "none" {
                None
            } else {
                Some(
                    limit
                        .parse()
                        .map_err(|_| ConfigError::InvalidEnv(PAGE_LIMIT_ENV_VAR, limit))?,
                )
            };
        }

        if let Ok(filter) = std::env::var(LOG_ENV_VAR) {
            self.log.filter = filter;
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {0}: '{1}'")]
    InvalidEnv(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for var in [CONFIG_ENV_VAR, ONLINE_CPUS_ENV_VAR, PAGE_LIMIT_ENV_VAR, LOG_ENV_VAR] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runtime.online_cpus, DEFAULT_ONLINE_CPUS);
        assert_eq!(config.runtime.page_limit, None);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
runtime:
  online_cpus: 8
  page_limit: 1024

log:
  filter: kshim_sync=trace,info
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.runtime.online_cpus, 8);
        assert_eq!(config.runtime.page_limit, Some(1024));
        assert_eq!(config.log.filter, "kshim_sync=trace,info");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str("runtime:\n  page_limit: 16\n").unwrap();
        assert_eq!(config.runtime.online_cpus, DEFAULT_ONLINE_CPUS);
        assert_eq!(config.runtime.page_limit, Some(16));
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_from_file_with_env_overrides() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "runtime:\n  online_cpus: 2\n  page_limit: 64").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, file.path());
        std::env::set_var(PAGE_LIMIT_ENV_VAR, "none");
        std::env::set_var(LOG_ENV_VAR, "debug");
        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.runtime.online_cpus, 2);
        assert_eq!(config.runtime.page_limit, None);
        assert_eq!(config.log.filter, "debug");
    }

    #[test]
    #[serial]
    fn test_missing_file_falls_back_to_defaults() {
        clear_env();
        std::env::set_var(CONFIG_ENV_VAR, "/nonexistent/kshim.yaml");
        std::env::set_var(ONLINE_CPUS_ENV_VAR, "6");
        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.runtime.online_cpus, 6);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_rejected() {
        clear_env();
        std::env::set_var(CONFIG_ENV_VAR, "/nonexistent/kshim.yaml");
        std::env::set_var(ONLINE_CPUS_ENV_VAR, "many");
        let err = Config::load().unwrap_err();
        clear_env();

        assert!(matches!(err, ConfigError::InvalidEnv(ONLINE_CPUS_ENV_VAR, _)));
    }

    #[test]
    fn test_bad_yaml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "runtime: [not, a, map]").unwrap();
        let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
