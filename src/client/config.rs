//! Client Configuration
//!
//! Everything a session can be tuned with, loadable from YAML:
//!
//! ```yaml
//! timeout_ms: 30000
//! poll:
//!   initial_interval_ms: 100
//!   max_wait_ms: 600000
//! backends:
//!   simulator:
//!     job_mode: deferred
//! log:
//!   level: debug
//! ```

use crate::backends::BackendConfig;
use crate::client::jobs::PollPolicy;
use crate::error::{Error, Result};
use crate::telemetry::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-call timeout for new sessions
    pub timeout_ms: u64,
    /// Default schedule for waiting on jobs
    pub poll: PollPolicy,
    pub backends: BackendConfig,
    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll: PollPolicy::default(),
            backends: BackendConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading client configuration from {}", path.display());
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Configuration("timeout_ms must be at least 1".into()));
        }
        self.poll.validate()?;
        self.backends.simulator.validate()?;
        self.log.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::JobMode;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config = ClientConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
timeout_ms: 5000
poll:
  initial_interval_ms: 50
  max_wait_ms: 60000
backends:
  simulator:
    job_mode: alternate
    job_duration_ms: 20
log:
  level: debug
  json: true
"#;
        let config = ClientConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.poll.initial_interval_ms, 50);
        assert_eq!(config.poll.max_wait_ms, Some(60_000));
        assert_eq!(config.poll.max_interval_ms, PollPolicy::default().max_interval_ms);
        assert_eq!(config.backends.simulator.job_mode, JobMode::Alternate);
        assert_eq!(config.backends.simulator.pools.len(), 2);
        assert!(config.log.json);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert_matches!(
            ClientConfig::from_yaml_str("timeout_ms: 0"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            ClientConfig::from_yaml_str("poll:\n  multiplier: 0.2"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            ClientConfig::from_yaml_str("log:\n  level: chatty"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            ClientConfig::from_yaml_str("timeout_ms: [1, 2]"),
            Err(Error::Yaml(_))
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms: 1234").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.timeout_ms, 1234);

        assert_matches!(
            ClientConfig::from_file("/nonexistent/client.yaml"),
            Err(Error::Io(_))
        );
    }

    #[tokio::test]
    async fn test_connect_with_config() {
        let mut config = ClientConfig::from_yaml_str("timeout_ms: 4321").unwrap();
        config.backends.simulator.job_mode = JobMode::Immediate;

        let mut session = crate::Session::connect_with_config(
            "sim://user@host",
            Default::default(),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(session.timeout(), 4321);
        assert_eq!(session.list_pools().await.unwrap().len(), 2);
    }
}
