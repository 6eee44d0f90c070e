//! Provider aliases: which backend and connection string an alias stands for.
//!
//! The file format is JSON:
//!
//! ```json
//! {
//!   "providers": {
//!     "main": { "type": "sqlite", "connectionString": "app.db" }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SqlCommandError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no provider lookup is configured")]
    MissingSection,

    #[error("provider alias '{0}' was not found")]
    AliasNotFound(String),

    #[error("The 'daProvider' node must contain an attribute named '{0}'")]
    MissingAttribute(&'static str),

    #[error("no backend is registered under '{0}'")]
    UnknownBackend(String),

    #[error("provider construction failed")]
    Construction(#[source] Box<SqlCommandError>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}

/// Backend identifier plus connection string for one alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(rename = "type", default)]
    pub backend_type: String,
    #[serde(rename = "connectionString", default)]
    pub connection_string: String,
}

impl ProviderSettings {
    #[must_use]
    pub fn new(backend_type: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            connection_string: connection_string.into(),
        }
    }

    /// Both attributes must be present and non-empty.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingAttribute` naming the first missing attribute.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_type.trim().is_empty() {
            return Err(ConfigError::MissingAttribute("type"));
        }
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::MissingAttribute("connectionString"));
        }
        Ok(())
    }
}

/// Resolves an alias to its settings.
pub trait ProviderLookup {
    fn lookup(&self, alias: &str) -> Option<ProviderSettings>;
}

impl ProviderLookup for HashMap<String, ProviderSettings> {
    fn lookup(&self, alias: &str) -> Option<ProviderSettings> {
        self.get(alias).cloned()
    }
}

/// Parsed provider alias file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

impl ProvidersConfig {
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    /// Returns `ConfigError::Io` if the file can't be read, or `ConfigError::Parse`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    #[must_use]
    pub fn with_provider(mut self, alias: impl Into<String>, settings: ProviderSettings) -> Self {
        self.providers.insert(alias.into(), settings);
        self
    }
}

impl ProviderLookup for ProvidersConfig {
    fn lookup(&self, alias: &str) -> Option<ProviderSettings> {
        self.providers.lookup(alias)
    }
}
