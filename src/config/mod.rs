//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

use crate::bus::MessagingConfig;
use crate::storage::StorageConfig;
use crate::workflow::WorkflowConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "OPENCATALOG_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "OPENCATALOG";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "OPENCATALOG_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "OPENCATALOG_LOG_FORMAT";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub workflow: WorkflowConfig,
    pub messaging: MessagingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;
    use crate::bus::MessagingType;
    use crate::storage::StorageType;

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.storage_type, StorageType::Sqlite);
        assert_eq!(config.messaging.messaging_type, MessagingType::Channel);
        assert_eq!(config.workflow.audit_type, "open_catalog");
        assert!(config.storage.busy_timeout() > config.workflow.timeout());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let file = yaml_file(
            r#"
storage:
  type: memory
workflow:
  endpoint: http://engine:9000
  timeout_secs: 4
  bindings:
    open_catalog: P9
messaging:
  type: pipe
  pipe:
    path: /run/opencatalog/callbacks
"#,
        );

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.storage.storage_type, StorageType::Memory);
        assert_eq!(config.workflow.endpoint, "http://engine:9000");
        assert_eq!(config.workflow.timeout_secs, 4);
        assert_eq!(
            config.workflow.bindings.get("open_catalog").map(String::as_str),
            Some("P9")
        );
        assert_eq!(config.messaging.messaging_type, MessagingType::Pipe);
        assert_eq!(
            config.messaging.pipe.path.as_deref(),
            Some("/run/opencatalog/callbacks")
        );
        // Unset fields keep their defaults.
        assert_eq!(config.workflow.connect_retries, 3);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = yaml_file("storage:\n  type: sqlite\n  path: /tmp/a.db\n");
        std::env::set_var("OPENCATALOG__STORAGE__PATH", "/tmp/b.db");
        std::env::set_var("OPENCATALOG__WORKFLOW__TIMEOUT_SECS", "2");

        let config = Config::load(file.path().to_str());

        std::env::remove_var("OPENCATALOG__STORAGE__PATH");
        std::env::remove_var("OPENCATALOG__WORKFLOW__TIMEOUT_SECS");

        let config = config.unwrap();
        assert_eq!(config.storage.path, "/tmp/b.db");
        assert_eq!(config.workflow.timeout_secs, 2);
    }

    #[test]
    #[serial]
    fn test_config_env_var_names_file() {
        let file = yaml_file("workflow:\n  audit_type: dataset_release\n");
        std::env::set_var(CONFIG_ENV_VAR, file.path());

        let config = Config::load(None);

        std::env::remove_var(CONFIG_ENV_VAR);
        assert_eq!(config.unwrap().workflow.audit_type, "dataset_release");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_fails() {
        assert!(Config::load(Some("/nonexistent/opencatalog.yaml")).is_err());
    }
}
