//! Session
//!
//! An authenticated handle to one management endpoint. Every request goes
//! through [`Session::exchange`], which bounds it by the session timeout,
//! and every public call ends in [`Session::note`], which refreshes the
//! last-error slot.
//!
//! Operations take `&mut self`: one session serves one caller at a time, and
//! sharing one across tasks needs a lock around it.

use crate::backends::{BackendConfig, BackendFactory};
use crate::client::config::ClientConfig;
use crate::client::jobs::JobTracker;
use crate::domain::ports::{Credentials, PluginInfo, StorageBackendRef};
use crate::domain::uri::ConnectionUri;
use crate::error::{Error, ErrorRecord, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Session {
    uri: ConnectionUri,
    backend: StorageBackendRef,
    timeout: Duration,
    last_error: Option<ErrorRecord>,
    pub(crate) jobs: JobTracker,
}

fn timeout_from_ms(ms: u64) -> Result<Duration> {
    if ms == 0 {
        return Err(Error::InvalidArgument("timeout must be at least 1 ms".into()));
    }
    Ok(Duration::from_millis(ms))
}

/// Run one request/response exchange under `timeout`
async fn timed<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

impl Session {
    /// Connect to `uri` with the default backend configuration
    ///
    /// `timeout_ms` bounds the connect itself and becomes the per-call
    /// timeout of the new session.
    pub async fn connect(uri: &str, credentials: Credentials, timeout_ms: u64) -> Result<Self> {
        Self::connect_with_backends(uri, credentials, timeout_ms, &BackendConfig::default()).await
    }

    /// Connect using the backend options and timeout of a loaded configuration
    pub async fn connect_with_config(
        uri: &str,
        credentials: Credentials,
        config: &ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        Self::connect_with_backends(uri, credentials, config.timeout_ms, &config.backends).await
    }

    async fn connect_with_backends(
        uri: &str,
        credentials: Credentials,
        timeout_ms: u64,
        backends: &BackendConfig,
    ) -> Result<Self> {
        let parsed = ConnectionUri::parse(uri)?;
        let backend = BackendFactory::create(&parsed, backends)?;
        Self::establish(parsed, credentials, timeout_ms, backend).await
    }

    /// Connect through an already constructed backend
    pub async fn connect_backend(
        uri: &str,
        credentials: Credentials,
        timeout_ms: u64,
        backend: StorageBackendRef,
    ) -> Result<Self> {
        let parsed = ConnectionUri::parse(uri)?;
        Self::establish(parsed, credentials, timeout_ms, backend).await
    }

    async fn establish(
        uri: ConnectionUri,
        credentials: Credentials,
        timeout_ms: u64,
        backend: StorageBackendRef,
    ) -> Result<Self> {
        let timeout = timeout_from_ms(timeout_ms)?;

        timed(timeout, "register", backend.register(&uri, &credentials, timeout)).await?;
        info!(
            "Connected to {} through {} backend (timeout {} ms)",
            uri,
            backend.backend_name(),
            timeout_ms
        );

        Ok(Self {
            uri,
            backend,
            timeout,
            last_error: None,
            jobs: JobTracker::default(),
        })
    }

    pub fn uri(&self) -> &ConnectionUri {
        &self.uri
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Per-call timeout in milliseconds
    pub fn timeout(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Change the per-call timeout for subsequent calls
    pub fn set_timeout(&mut self, ms: u64) -> Result<()> {
        let result = match timeout_from_ms(ms) {
            Ok(timeout) => {
                debug!("Session timeout {} ms -> {} ms", self.timeout(), ms);
                self.timeout = timeout;
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.note("set_timeout", result)
    }

    /// Take the diagnostic of the most recent call, if it failed
    pub fn last_error(&mut self) -> Option<ErrorRecord> {
        self.last_error.take()
    }

    pub async fn plugin_info(&mut self) -> Result<PluginInfo> {
        let backend = self.backend();
        let result = self.exchange("plugin_info", backend.plugin_info()).await;
        self.note("plugin_info", result)
    }

    /// Unregister from the backend; the session is consumed
    pub async fn close(self) -> Result<()> {
        let live = self.jobs.live_count();
        if live > 0 {
            warn!("Closing session to {} with {} unreleased jobs", self.uri, live);
        }

        timed(self.timeout, "unregister", self.backend.unregister()).await?;
        info!("Session to {} closed", self.uri);
        Ok(())
    }

    pub(crate) fn backend(&self) -> StorageBackendRef {
        self.backend.clone()
    }

    /// Bound one backend request by the session timeout
    pub(crate) async fn exchange<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        timed(self.timeout, operation, fut).await
    }

    /// Refresh the last-error slot from the outcome of a public call
    pub(crate) fn note<T>(&mut self, operation: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                debug!("{} failed: {}", operation, e);
                self.last_error = Some(e.record(operation));
            }
        }
        result
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uri", &self.uri.as_str())
            .field("backend", &self.backend.backend_name())
            .field("timeout_ms", &self.timeout())
            .finish()
    }
}
