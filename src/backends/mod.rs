//! Storage Array Backends
//!
//! Backends are selected by connection URI scheme:
//! - `sim`: in-memory simulated array

pub mod clock;
pub mod simulator;

pub use simulator::{JobMode, SimPoolConfig, SimulatorBackend, SimulatorConfig, SIMULATOR_SCHEME};

use crate::domain::ports::StorageBackendRef;
use crate::domain::uri::ConnectionUri;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Factory for backends keyed by URI scheme
pub struct BackendFactory;

impl BackendFactory {
    /// Create the backend that serves `uri`
    pub fn create(uri: &ConnectionUri, config: &BackendConfig) -> Result<StorageBackendRef> {
        match uri.scheme() {
            SIMULATOR_SCHEME => {
                config.simulator.validate()?;
                Ok(Arc::new(SimulatorBackend::new(config.simulator.clone())))
            }
            other => Err(Error::Connection(format!(
                "no backend for scheme '{}' (supported: {})",
                other,
                Self::supported_schemes().join(", ")
            ))),
        }
    }

    pub fn supported_schemes() -> &'static [&'static str] {
        &[SIMULATOR_SCHEME]
    }
}

/// Combined backend configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub simulator: SimulatorConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_create_by_scheme() {
        let uri = ConnectionUri::parse("sim://admin@array1").unwrap();
        let backend = BackendFactory::create(&uri, &BackendConfig::default()).unwrap();
        assert_eq!(backend.backend_name(), "simulator");
    }

    #[test]
    fn test_unknown_scheme() {
        let uri = ConnectionUri::parse("smis://admin@array1:5989").unwrap();
        let err = BackendFactory::create(&uri, &BackendConfig::default()).err().unwrap();
        assert_matches!(err, Error::Connection(msg) if msg.contains("smis"));
    }

    #[test]
    fn test_invalid_simulator_config() {
        let uri = ConnectionUri::parse("sim://host").unwrap();
        let mut config = BackendConfig::default();
        config.simulator.block_size = 500;
        assert_matches!(
            BackendFactory::create(&uri, &config).err(),
            Some(Error::Configuration(_))
        );
    }
}
