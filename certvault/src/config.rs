//! Configuration management

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Environment variable holding a ready-made OAuth access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("project_id must be set")]
    MissingProjectId,

    #[error("unable to read credentials file {path}: {source}")]
    CredentialsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in credentials file {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unable to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("unable to build HTTP client: {0}")]
    Client(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Project owning the secrets
    #[serde(default)]
    pub project_id: String,

    /// Service account key used to mint access tokens
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Static bearer token, used when no credentials file is given
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_page_size")]
    pub list_page_size: u32,

    /// Default deadline for a single operation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            credentials_file: None,
            access_token: None,
            endpoint: default_endpoint(),
            list_page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

fn default_endpoint() -> String {
    "https://secretmanager.googleapis.com".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Config {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `certvault.toml` (or `path`) and `CERTVAULT_*`
    /// environment variables. Nested keys use `__`, e.g. `CERTVAULT_RETRY__MAX_ATTEMPTS`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("certvault").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("CERTVAULT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut config = config.try_deserialize::<Config>()?;
        if config.access_token.is_none() {
            config.access_token = std::env::var(ACCESS_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }
        Ok(config)
    }

    /// Check the project id and, when configured, that the credentials file
    /// can be read and holds valid JSON
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingProjectId);
        }

        if let Some(path) = &self.credentials_file {
            read_credentials(path)?;
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Read and parse a credentials file
pub fn read_credentials(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let raw = std::fs::read(path).map_err(|source| ConfigError::CredentialsFile {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_slice(&raw).map_err(|source| ConfigError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::new("my-project");
        assert_eq!(config.endpoint, "https://secretmanager.googleapis.com");
        assert_eq!(config.list_page_size, 100);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_project_id() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingProjectId)));
    }

    #[test]
    fn test_credentials_file_that_does_not_exist() {
        let config = Config {
            credentials_file: Some(PathBuf::from("some-garbage-credentials-file.json")),
            ..Config::new("my-project")
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::CredentialsFile { .. })
        ));
    }

    #[test]
    fn test_credentials_file_with_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{this-isnt-json}").unwrap();

        let config = Config {
            credentials_file: Some(file.path().to_path_buf()),
            ..Config::new("my-project")
        };

        assert!(matches!(config.validate(), Err(ConfigError::InvalidJson { .. })));
    }

    #[test]
    fn test_credentials_file_with_valid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"type":"service_account"}"#).unwrap();

        let config = Config {
            credentials_file: Some(file.path().to_path_buf()),
            ..Config::new("my-project")
        };

        assert!(config.validate().is_ok());
    }

    /// `Config::load` reads the process environment
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn test_load_from_file() {
        let _env = ENV_LOCK.lock();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(
            br#"
project_id = "file-project"
list_page_size = 25

[retry]
base_delay_ms = 10
max_attempts = 4
"#,
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.project_id, "file-project");
        assert_eq!(config.list_page_size, 25);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.retry.max_attempts, Some(4));
    }

    #[test]
    fn test_load_from_env() {
        let _env = ENV_LOCK.lock();
        std::env::set_var("CERTVAULT_PROJECT_ID", "from-env");
        std::env::set_var("CERTVAULT_RETRY__MAX_ATTEMPTS", "7");

        let loaded = Config::load(None);

        std::env::remove_var("CERTVAULT_PROJECT_ID");
        std::env::remove_var("CERTVAULT_RETRY__MAX_ATTEMPTS");

        let config = loaded.unwrap();
        assert_eq!(config.project_id, "from-env");
        assert_eq!(config.retry.max_attempts, Some(7));
        assert_eq!(config.retry.base_delay_ms, 1_000);
    }
}
