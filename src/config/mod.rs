// Configuration module

mod models;

pub use models::*;

use crate::error::{ProxyError, Result};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Legacy variables `KIRO_CREDS_FILE` / `PROXY_API_KEY` (highest)
    /// 2. Environment variables (`KIRO_PROXY__SECTION__KEY`)
    /// 3. Config file (`~/.kiro-proxy/config.json` unless overridden)
    /// 4. Defaults (lowest)
    ///
    /// CLI flags are applied by the caller on the returned value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        let config = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("KIRO_PROXY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("credentials_file", std::env::var("KIRO_CREDS_FILE").ok())?
            .set_override_option("api_key", std::env::var("PROXY_API_KEY").ok())?
            .build()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ProxyError::Config(e.to_string()))
    }

    /// Checks the settings the server cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ProxyError::Config(
                "api_key is not configured (set it in the config file or PROXY_API_KEY)".to_string(),
            ));
        }
        if self.credentials_file.trim().is_empty() {
            return Err(ProxyError::Config("credentials_file is not configured".to_string()));
        }
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kiro-proxy")
            .join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.credentials.refresh_margin_seconds, 300);
        assert!(config.credentials_file.ends_with("kiro-auth-token.json"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wizard_file_is_understood() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"credentials_file": "/tmp/creds.json", "api_key": "sk-local", "port": 9000}}"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.credentials.region, "us-east-1");
        assert!(config.validate().is_ok());
    }
}
