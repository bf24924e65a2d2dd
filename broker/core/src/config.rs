//! Broker Configuration
//!
//! Settings are resolved in layers, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file (explicit path, or `$XDG_CONFIG_HOME/outcome-broker/broker.toml`)
//! 3. Environment variables
//!
//! The daemon applies its command-line flags on top.
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY`: Cloud credential. When set and non-empty the cloud
//!   backend serves every generation for the life of the process.
//! - `OPENAI_BASE_URL`: Cloud API base URL
//! - `BROKER_CLOUD_MODEL`: Cloud model identifier
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: Local model server address
//! - `BROKER_LOCAL_MODEL`: Local model identifier
//! - `BROKER_SYSTEM_PROMPT`: System prompt sent with every generation
//! - `BROKER_BIND`: Address the daemon listens on

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an expert on education and learning. Keep responses concise and to the point.";

/// Errors from loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },
}

/// Process-wide broker configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Cloud credential; absent or empty selects the local backend
    pub api_key: Option<String>,
    /// Cloud API base URL
    pub openai_base_url: String,
    /// Cloud model identifier
    pub cloud_model: String,
    /// Local model server host
    pub ollama_host: String,
    /// Local model server port
    pub ollama_port: u16,
    /// Local model identifier
    pub local_model: String,
    /// System prompt sent with every generation
    pub system_prompt: String,
    /// Backend timeout in seconds: connect, each streamed read, and whole completed calls
    pub request_timeout_secs: u64,
    /// Address the daemon listens on
    pub bind_address: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            openai_base_url: "https://api.openai.com".to_string(),
            cloud_model: "gpt-4o".to_string(),
            ollama_host: "localhost".to_string(),
            ollama_port: 11434,
            local_model: "llama3".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout_secs: 120,
            bind_address: "127.0.0.1:8000".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Resolve configuration from an optional file plus the environment
    ///
    /// With no explicit path, the default path is used only if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => load_config_from_path(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => load_config_from_path(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Create configuration from defaults and environment variables only
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.openai_base_url = url;
        }
        if let Some(model) = lookup("BROKER_CLOUD_MODEL") {
            self.cloud_model = model;
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.ollama_host = host;
        }
        if let Some(port) = lookup("OLLAMA_PORT") {
            match port.parse() {
                Ok(port) => self.ollama_port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid OLLAMA_PORT"),
            }
        }
        if let Some(model) = lookup("BROKER_LOCAL_MODEL") {
            self.local_model = model;
        }
        if let Some(prompt) = lookup("BROKER_SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }
        if let Some(bind) = lookup("BROKER_BIND") {
            self.bind_address = bind;
        }
    }

    /// Whether a usable cloud credential is configured
    #[must_use]
    pub fn has_cloud_credential(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// Backend request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Default config file location
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("outcome-broker").join("broker.toml"))
}

/// Load configuration from a TOML file, without environment overrides
pub fn load_config_from_path(path: &Path) -> Result<BrokerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = ?path, "Loaded config file");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use tempfile::NamedTempFile;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.cloud_model, "gpt-4o");
        assert_eq!(config.local_model, "llama3");
        assert_eq!(config.ollama_port, 11434);
        assert!(!config.has_cloud_credential());
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_overrides() {
        let mut config = BrokerConfig::default();
        config.apply_overrides(lookup(&[
            ("OPENAI_API_KEY", "sk-abc"),
            ("OLLAMA_HOST", "gpu-box"),
            ("OLLAMA_PORT", "9999"),
            ("BROKER_BIND", "0.0.0.0:9000"),
        ]));

        assert!(config.has_cloud_credential());
        assert_eq!(config.ollama_host, "gpu-box");
        assert_eq!(config.ollama_port, 9999);
        assert_eq!(config.bind_address, "0.0.0.0:9000");
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = BrokerConfig::default();
        config.apply_overrides(lookup(&[("OLLAMA_PORT", "not-a-port")]));
        assert_eq!(config.ollama_port, 11434);
    }

    #[test]
    fn test_blank_credential_is_not_a_credential() {
        let mut config = BrokerConfig::default();
        config.apply_overrides(lookup(&[("OPENAI_API_KEY", "   ")]));
        assert!(!config.has_cloud_credential());
    }

    #[test]
    fn test_load_from_file_merges_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "local_model = \"mistral\"\nollama_port = 12000").unwrap();

        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.local_model, "mistral");
        assert_eq!(config.ollama_port, 12000);
        assert_eq!(config.cloud_model, "gpt-4o");
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ollama_port = \"eleven\"").unwrap();

        let err = load_config_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = load_config_from_path(Path::new("/nonexistent/broker.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
