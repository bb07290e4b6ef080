//! Database Configuration
//!
//! Connection URI, client options and logging settings. Loaded from a JSON
//! file or built in code; validated before use.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::database::{DatabaseError, DatabaseResult};

/// Options handed to the store driver when the client is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Application name reported to the store
    #[serde(default)]
    pub app_name: Option<String>,

    /// Reject commands outside the stable API (forced on by `Database::initialize`)
    #[serde(default = "default_strict")]
    pub strict: bool,

    /// Connection pool ceiling
    #[serde(default)]
    pub max_pool_size: Option<u32>,

    /// Connect timeout in milliseconds
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

fn default_strict() -> bool {
    true
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            app_name: None,
            strict: default_strict(),
            max_pool_size: None,
            connect_timeout_ms: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive, e.g. "info" or "chunkstore=debug"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per event
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Store URI (required)
    pub uri: String,

    /// Client options
    #[serde(default)]
    pub options: ClientOptions,

    /// Production mode waits for the initial connect (default: false)
    #[serde(default)]
    pub production: bool,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

impl DatabaseConfig {
    /// Create a development configuration for a URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            options: ClientOptions::default(),
            production: false,
            logging: LogConfig::default(),
        }
    }

    /// Switch production mode on or off
    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Replace the client options
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> DatabaseResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| DatabaseError::Config(format!("Failed to read config: {}", e)))?;

        let config: DatabaseConfig = serde_json::from_str(&content)
            .map_err(|e| DatabaseError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> DatabaseResult<()> {
        if self.uri.trim().is_empty() {
            return Err(DatabaseError::Config("uri must not be empty".into()));
        }

        if !self.uri.contains("://") {
            return Err(DatabaseError::Config(format!(
                "Invalid uri: '{}'. Expected <scheme>://...",
                self.uri
            )));
        }

        if self.options.max_pool_size == Some(0) {
            return Err(DatabaseError::Config(
                "max_pool_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}
