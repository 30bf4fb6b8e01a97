//! # configs
//!
//! Layered application configuration. Later sources override earlier ones:
//!
//! 1. built-in defaults
//! 2. `agora.toml` in the working directory (optional)
//! 3. `AGORA__SECTION__KEY` environment variables, e.g. `AGORA__DATABASE__URL`
//!
//! A `.env` file is read into the environment first when present.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "agora.toml";
const ENV_PREFIX: &str = "AGORA";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub media: MediaConfig,
    pub paging: PagingConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL; may embed credentials
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Directory that holds attachment bytes
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingConfig {
    pub page_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl AppConfig {
    /// Reads `.env`, then builds the configuration from defaults,
    /// `agora.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "ignoring unreadable .env file");
            }
        }
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Like [`load`](Self::load) with an explicit config file and without
    /// touching `.env`.
    pub fn load_from(file: &Path) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .set_default("database.url", "sqlite://agora.db")?
            .set_default("database.max_connections", 5)?
            .set_default("media.root", "./data/media")?
            .set_default("paging.page_size", 10)?
            .set_default("log.filter", "info")?
            .set_default("log.json", false)?
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.expose_secret().trim().is_empty() {
            return Err(ConfigError::Invalid("database.url must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be at least 1".into()));
        }
        if self.paging.page_size == 0 {
            return Err(ConfigError::Invalid("paging.page_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("missing.toml")).unwrap();

        assert_eq!(config.paging.page_size, 10);
        assert_eq!(config.database.max_connections, 5);
        assert!(!config.log.json);
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config(
            r#"
            [database]
            url = "sqlite::memory:"
            max_connections = 1

            [paging]
            page_size = 25
            "#,
        );
        let config = AppConfig::load_from(file.path()).unwrap();

        assert_eq!(config.database.url.expose_secret(), "sqlite::memory:");
        assert_eq!(config.paging.page_size, 25);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let file = write_config("[paging]\npage_size = 0\n");
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("page_size")));
    }

    #[test]
    fn database_url_is_redacted_in_debug_output() {
        let file = write_config("[database]\nurl = \"sqlite://user:hunter2@db\"\n");
        let config = AppConfig::load_from(file.path()).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
