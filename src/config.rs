//! Demo client configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default key server port.
pub const DEFAULT_PORT: u16 = 8886;

/// Default account name.
pub const DEFAULT_USERNAME: &str = "HELIX-RUST";

/// Default recipient lookup timeout in milliseconds.
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 5000;

/// Lowest port accepted for the key server.
pub const MIN_PORT: u16 = 1025;

/// Configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`ClientConfig`].
    #[error("parsing {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A field holds an unacceptable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT_MS
}

/// Everything one demo run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Key server host.
    pub server: String,
    /// Key server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Account to provision, log in as, and send to.
    #[serde(default = "default_username")]
    pub username: String,
    /// Inline message to round-trip when no file is given.
    #[serde(default)]
    pub message: Option<String>,
    /// File whose bytes are round-tripped.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Optional shared password layered over recipient encryption.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Recipient lookup deadline.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// Where to append the JSON-lines operation journal.
    #[serde(default)]
    pub journal: Option<PathBuf>,
}

impl ClientConfig {
    /// A config for `server` with every other field at its default.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_PORT,
            username: default_username(),
            message: None,
            file: None,
            password: None,
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
            journal: None,
        }
    }

    /// Load a config from a JSON file. The result is validated.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges and that there is something to encrypt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(invalid("server", "must not be empty"));
        }
        if self.port < MIN_PORT {
            return Err(invalid("port", format!("{} is outside {MIN_PORT}-65535", self.port)));
        }
        if self.username.trim().is_empty() {
            return Err(invalid("username", "must not be empty"));
        }
        if self.message.is_none() && self.file.is_none() {
            return Err(invalid("payload", "either a message or a file is required"));
        }
        if self.lookup_timeout_ms == 0 {
            return Err(invalid("lookup_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: ClientConfig = serde_json::from_str(r#"{"server":"10.0.0.5","message":"hi"}"#).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.username, DEFAULT_USERNAME);
        assert_eq!(config.lookup_timeout_ms, DEFAULT_LOOKUP_TIMEOUT_MS);
        config.validate().unwrap();
    }

    #[test]
    fn low_port_is_rejected() {
        let mut config = ClientConfig::new("10.0.0.5");
        config.message = Some("hi".into());
        config.port = 80;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "port", .. })));
    }

    #[test]
    fn payload_is_required() {
        let config = ClientConfig::new("10.0.0.5");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "payload", .. })));
    }

    #[test]
    fn password_is_never_serialized() {
        let mut config = ClientConfig::new("10.0.0.5");
        config.password = Some("secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
