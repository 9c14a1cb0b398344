use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Configuration of the delegated-signing core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Chain connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Delegated-account indexer configuration
    #[serde(default)]
    pub indexer: IndexerConfig,
    /// Delegated signing configuration
    #[serde(default)]
    pub signing: SigningConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chain connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// JSON-RPC request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// First reconnection delay in milliseconds
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound for the reconnection delay in milliseconds
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_delay_ms: u64,
}

/// Indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Maximum number of retry attempts for indexer requests
    #[serde(default = "default_max_retries")]
    pub max_retry_attempts: u32,
}

/// Delegated signing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Give up waiting for an approval decision after this many seconds.
    /// Unset means wait until the flow completes or is torn down.
    #[serde(default)]
    pub approval_timeout_seconds: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to log to file
    #[serde(default = "default_false")]
    pub log_to_file: bool,
    /// Log file path
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_reconnect_initial() -> u64 {
    500
}

fn default_reconnect_max() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("./logs/wallet.log")
}

fn default_false() -> bool {
    false
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            reconnect_initial_delay_ms: default_reconnect_initial(),
            reconnect_max_delay_ms: default_reconnect_max(),
        }
    }
}

impl ConnectionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            max_retry_attempts: default_max_retries(),
        }
    }
}

impl IndexerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl SigningConfig {
    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: default_false(),
            log_file: default_log_file(),
        }
    }
}

impl WalletConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                return CoreError::NotFound("Config file not found".to_string());
            }
            CoreError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content)
            .map_err(|e| CoreError::SerializationError(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::SerializationError(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CoreError::ConfigError(format!("Failed to create config directory: {}", e)))?;
        }

        fs::write(path, content)
            .map_err(|e| CoreError::ConfigError(format!("Failed to write config file: {}", e)))
    }

    /// Load or create default configuration
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        match Self::load(&path) {
            Ok(config) => Ok(config),
            Err(CoreError::NotFound(_)) => {
                let config = Self::default();
                config.save(&path)?;
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }
}
