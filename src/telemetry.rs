//! Logging setup for applications embedding the client
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application, which may call [`init_logging`] or bring its own.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> Result<Level> {
        match self.level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => Err(Error::Configuration(format!("unknown log level '{}'", other))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.level().map(|_| ())
    }
}

/// Install a global subscriber filtered by `RUST_LOG` plus the configured level
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level()?.into());

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    installed.map_err(|e| Error::Configuration(format!("logging already initialized: {}", e)))
}
