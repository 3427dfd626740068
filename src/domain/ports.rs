//! Domain Ports - Core types and the backend trait
//!
//! These types describe what an array exposes (systems, pools, volumes,
//! initiators, access mappings, jobs). [`StorageBackend`] is the boundary
//! between the client session and whatever actually talks to the array.

use crate::domain::uri::ConnectionUri;
use crate::error::{Error, ErrorRecord, Result, StatusCode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Systems and Pools
// =============================================================================

/// Operational status of a storage system or volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationalStatus {
    Ok,
    Degraded,
    Offline,
    Unknown,
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationalStatus::Ok => write!(f, "ok"),
            OperationalStatus::Degraded => write!(f, "degraded"),
            OperationalStatus::Offline => write!(f, "offline"),
            OperationalStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A storage system (array controller) reachable through a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub id: String,
    pub name: String,
    pub status: OperationalStatus,
}

/// Capacity container volumes are provisioned from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    /// Total capacity in bytes
    pub total_bytes: u64,
    /// Free capacity in bytes, never above `total_bytes`
    pub free_bytes: u64,
    pub system_id: String,
}

impl Pool {
    /// Bytes currently allocated to volumes
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }
}

// =============================================================================
// Volumes
// =============================================================================

/// How a new volume's capacity is allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionKind {
    #[default]
    Default,
    Thin,
    Full,
}

/// How a volume is replicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationKind {
    Snapshot,
    Clone,
    Copy,
    MirrorSync,
    MirrorAsync,
}

impl fmt::Display for ReplicationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationKind::Snapshot => write!(f, "snapshot"),
            ReplicationKind::Clone => write!(f, "clone"),
            ReplicationKind::Copy => write!(f, "copy"),
            ReplicationKind::MirrorSync => write!(f, "mirror_sync"),
            ReplicationKind::MirrorAsync => write!(f, "mirror_async"),
        }
    }
}

/// A provisioned logical storage unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    /// Vendor-unique identifier (VPD page 0x83 style)
    pub vpd83: String,
    pub block_size: u64,
    pub block_count: u64,
    pub status: OperationalStatus,
    pub admin_enabled: bool,
    pub pool_id: String,
    pub system_id: String,
}

impl Volume {
    /// Addressable size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.block_size.saturating_mul(self.block_count)
    }
}

// =============================================================================
// Initiators and Access Mappings
// =============================================================================

/// Transport kind of a host initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorType {
    Iscsi,
    Wwn,
    Other,
}

impl InitiatorType {
    /// Check that `external_id` is well formed for this transport
    pub fn validate_id(&self, external_id: &str) -> Result<()> {
        if external_id.is_empty() || external_id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidArgument(format!(
                "initiator id '{}' is empty or contains whitespace",
                external_id
            )));
        }

        match self {
            InitiatorType::Iscsi => {
                let lower = external_id.to_ascii_lowercase();
                if ["iqn.", "eui.", "naa."].iter().any(|p| lower.starts_with(p)) {
                    Ok(())
                } else {
                    Err(Error::InvalidArgument(format!(
                        "'{}' is not an iSCSI name (expected iqn., eui. or naa. prefix)",
                        external_id
                    )))
                }
            }
            InitiatorType::Wwn => {
                let digits: String = external_id
                    .chars()
                    .filter(|c| *c != ':' && *c != '-')
                    .collect();
                if digits.len() == 16 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
                    Ok(())
                } else {
                    Err(Error::InvalidArgument(format!(
                        "'{}' is not a WWN (expected 16 hex digits)",
                        external_id
                    )))
                }
            }
            InitiatorType::Other => Ok(()),
        }
    }
}

impl fmt::Display for InitiatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitiatorType::Iscsi => write!(f, "iscsi"),
            InitiatorType::Wwn => write!(f, "wwn"),
            InitiatorType::Other => write!(f, "other"),
        }
    }
}

/// A remote host endpoint identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiator {
    /// External identifier (IQN, WWN, ...)
    pub id: String,
    pub name: String,
    pub initiator_type: InitiatorType,
}

/// Access granted to an initiator on a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::ReadWrite => write!(f, "read_write"),
            AccessMode::ReadOnly => write!(f, "read_only"),
        }
    }
}

/// A granted (initiator, volume) relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessMapping {
    pub initiator_id: String,
    pub volume_id: String,
    pub mode: AccessMode,
}

// =============================================================================
// Jobs
// =============================================================================

/// Lookup key of a deferred operation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Handle to a deferred operation whose result is a `T`
///
/// Not `Clone`: releasing consumes the handle. The raw [`JobId`] stays
/// available for callers that track jobs by key.
pub struct Job<T> {
    id: JobId,
    _result: PhantomData<fn() -> T>,
}

impl<T> Job<T> {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn into_id(self) -> JobId {
        self.id
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Job").field(&self.id).finish()
    }
}

/// Result of a mutating call: finished now, or deferred to a job
#[derive(Debug)]
#[must_use = "a started job must be polled and released"]
pub enum Outcome<T> {
    Done(T),
    Started(Job<T>),
}

impl<T> Outcome<T> {
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Done(_) => StatusCode::Ok,
            Outcome::Started(_) => StatusCode::JobStarted,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Outcome::Started(_))
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::InProgress => write!(f, "IN_PROGRESS"),
            JobStatus::Complete => write!(f, "COMPLETE"),
            JobStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Value a completed job produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Empty,
    Volume(Volume),
}

/// Point-in-time view of a job as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub percent: u8,
    pub result: Option<JobResult>,
    pub error: Option<ErrorRecord>,
}

impl JobSnapshot {
    pub fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            percent: 0,
            result: None,
            error: None,
        }
    }

    pub fn in_progress(percent: u8) -> Self {
        Self {
            status: JobStatus::InProgress,
            percent: percent.min(99),
            result: None,
            error: None,
        }
    }

    pub fn complete(result: JobResult) -> Self {
        Self {
            status: JobStatus::Complete,
            percent: 100,
            result: Some(result),
            error: None,
        }
    }

    /// A failed job keeps the percent it had reached
    pub fn failed(percent: u8, error: ErrorRecord) -> Self {
        Self {
            status: JobStatus::Error,
            percent: percent.min(99),
            result: None,
            error: Some(error),
        }
    }

    /// Check the status/percent/result invariants of a single report
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.percent > 100 {
            return Err(format!("percent {} out of range", self.percent));
        }
        match self.status {
            JobStatus::Complete => {
                if self.percent != 100 {
                    return Err(format!("complete at {}%", self.percent));
                }
                if self.result.is_none() {
                    return Err("complete without a result".to_string());
                }
            }
            JobStatus::Error => {
                if self.error.is_none() {
                    return Err("error state without error detail".to_string());
                }
                if self.percent == 100 {
                    return Err("error state at 100%".to_string());
                }
            }
            JobStatus::Pending | JobStatus::InProgress => {
                if self.percent == 100 {
                    return Err(format!("{} at 100%", self.status));
                }
                if self.result.is_some() || self.error.is_some() {
                    return Err(format!("{} carries a terminal payload", self.status));
                }
            }
        }
        Ok(())
    }
}

/// Conversion from a completed job's result into the typed value
pub trait JobOutput: Sized {
    fn from_job_result(job_id: &JobId, result: JobResult) -> Result<Self>;
}

impl JobOutput for () {
    fn from_job_result(job_id: &JobId, result: JobResult) -> Result<Self> {
        match result {
            JobResult::Empty => Ok(()),
            JobResult::Volume(v) => Err(Error::Backend {
                backend: "job".into(),
                operation: job_id.to_string(),
                reason: format!("expected no result, got volume {}", v.id),
            }),
        }
    }
}

impl JobOutput for Volume {
    fn from_job_result(job_id: &JobId, result: JobResult) -> Result<Self> {
        match result {
            JobResult::Volume(v) => Ok(v),
            JobResult::Empty => Err(Error::Backend {
                backend: "job".into(),
                operation: job_id.to_string(),
                reason: "expected a volume, job completed without one".into(),
            }),
        }
    }
}

// =============================================================================
// Connection Types
// =============================================================================

/// Secret presented when registering with a backend
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub password: Option<String>,
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Backend self-description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub description: String,
    pub version: String,
}

// =============================================================================
// Storage Backend Port
// =============================================================================

/// Port every array backend implements
///
/// Mutating calls that may take a while return [`Outcome`]; the backend
/// decides per call whether to finish inline or hand back a job. Backends own
/// the authoritative job and mapping state.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name, used in logs and error records
    fn backend_name(&self) -> &str;

    /// Authenticate and bind this backend to `uri`
    async fn register(
        &self,
        uri: &ConnectionUri,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<()>;

    /// Release backend resources; every later request fails with `SessionClosed`
    async fn unregister(&self) -> Result<()>;

    async fn plugin_info(&self) -> Result<PluginInfo>;

    // === Catalogs ===

    async fn systems(&self) -> Result<Vec<System>>;

    async fn pools(&self) -> Result<Vec<Pool>>;

    async fn volumes(&self) -> Result<Vec<Volume>>;

    async fn initiators(&self) -> Result<Vec<Initiator>>;

    // === Volume Lifecycle ===

    async fn volume_create(
        &self,
        pool: &Pool,
        name: &str,
        size_bytes: u64,
        provisioning: ProvisionKind,
    ) -> Result<Outcome<Volume>>;

    async fn volume_delete(&self, volume: &Volume) -> Result<Outcome<()>>;

    async fn volume_resize(&self, volume: &Volume, new_size_bytes: u64) -> Result<Outcome<Volume>>;

    /// Replicate `source` into `pool` (the source's own pool when `None`)
    async fn volume_replicate(
        &self,
        pool: Option<&Pool>,
        kind: ReplicationKind,
        source: &Volume,
        name: &str,
    ) -> Result<Outcome<Volume>>;

    // === Initiators ===

    async fn initiator_create(
        &self,
        name: &str,
        external_id: &str,
        initiator_type: InitiatorType,
    ) -> Result<Initiator>;

    async fn initiator_delete(&self, initiator: &Initiator) -> Result<()>;

    // === Access Mappings ===

    async fn access_grant(
        &self,
        initiator: &Initiator,
        volume: &Volume,
        mode: AccessMode,
    ) -> Result<Outcome<()>>;

    async fn access_revoke(&self, initiator: &Initiator, volume: &Volume) -> Result<()>;

    async fn access_mappings(&self) -> Result<Vec<AccessMapping>>;

    // === Jobs ===

    /// Report a job's progress without advancing it
    async fn job_status(&self, job_id: &JobId) -> Result<JobSnapshot>;

    /// Forget a job; later status/free calls fail with `FreedHandle`
    async fn job_free(&self, job_id: &JobId) -> Result<()>;
}

pub type StorageBackendRef = Arc<dyn StorageBackend>;
