use serde::{Deserialize, Serialize};

/// Transport used to reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

/// Cache client configuration. Every field falls back to a default when unset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub network: Network,
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    /// Hard cap on open connections; 0 means unlimited.
    #[serde(default)]
    pub max_active: u32,
    #[serde(default = "default_max_idle")]
    pub max_idle: u32,
    /// Idle connections older than this are closed; 0 keeps them forever.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub prefix: String,
    /// How long a borrow waits for a free connection.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Time allowed for borrowed connections to come back on shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            addr: default_addr(),
            password: None,
            db: 0,
            max_active: 0,
            max_idle: default_max_idle(),
            idle_timeout_secs: default_idle_timeout_secs(),
            prefix: String::new(),
            wait_timeout_ms: default_wait_timeout_ms(),
            dial_timeout_ms: default_dial_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

// Default values for cache client configuration
fn default_addr() -> String {
    "127.0.0.1:6379".to_string()
}
fn default_max_idle() -> u32 {
    8
}
fn default_idle_timeout_secs() -> u64 {
    300
} // 5 minutes
fn default_wait_timeout_ms() -> u64 {
    5000
}
fn default_dial_timeout_ms() -> u64 {
    5000
}
fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl CacheConfig {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_string())
            } else {
                ConfigError::IoError(e.to_string())
            }
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string (useful for testing)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for common errors
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "addr must not be empty".to_string(),
            ));
        }
        if self.db < 0 {
            return Err(ConfigError::ValidationError(format!(
                "db index must be non-negative, got {}",
                self.db
            )));
        }
        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "wait_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.dial_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dial_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
