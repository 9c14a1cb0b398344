use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{CoreError, CoreResult};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this again after a
/// subscriber is installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> CoreResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| CoreError::ConfigError(format!("Invalid log filter '{}': {}", config.level, e)))?;

    let result = if config.log_to_file {
        if let Some(parent) = config.log_file.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CoreError::ConfigError(format!("Failed to create log directory: {}", e)))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)
            .map_err(|e| CoreError::ConfigError(format!("Failed to open log file: {}", e)))?;

        fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        debug!("Tracing subscriber already installed: {}", e);
    }

    Ok(())
}
