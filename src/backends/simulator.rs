//! Simulated Storage Array
//!
//! In-memory backend served for the `sim://` scheme. It keeps pools, volumes,
//! initiators and the access mapping table, and can answer mutating calls
//! inline or through jobs whose progress follows a [`SimClock`].

use crate::backends::clock::{SimClock, SystemClock};
use crate::domain::ports::{
    AccessMapping, AccessMode, Credentials, Initiator, InitiatorType, Job, JobId, JobOutput,
    JobResult, JobSnapshot, OperationalStatus, Outcome, PluginInfo, Pool, ProvisionKind,
    ReplicationKind, StorageBackend, System, Volume,
};
use crate::domain::uri::ConnectionUri;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// URI scheme served by the simulator
pub const SIMULATOR_SCHEME: &str = "sim";

const BACKEND_NAME: &str = "simulator";

// =============================================================================
// Configuration
// =============================================================================

/// When mutating calls hand back a job instead of finishing inline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Immediate,
    Deferred,
    /// Every other mutating call is deferred, starting with the first
    Alternate,
}

impl FromStr for JobMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "immediate" | "sync" => Ok(JobMode::Immediate),
            "deferred" | "async" => Ok(JobMode::Deferred),
            "alternate" => Ok(JobMode::Alternate),
            other => Err(Error::Configuration(format!("unknown job mode '{}'", other))),
        }
    }
}

/// A pool the simulator starts with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimPoolConfig {
    pub name: String,
    pub total_bytes: u64,
}

/// Configuration for the simulated array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub system_name: String,
    pub pools: Vec<SimPoolConfig>,
    /// Block size of every volume
    pub block_size: u64,
    pub job_mode: JobMode,
    /// Time a deferred job takes to reach COMPLETE
    pub job_duration_ms: u64,
    /// Delay added to every request
    pub latency_ms: u64,
    /// Password required at registration, if any
    pub password: Option<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            system_name: "sim-array".to_string(),
            pools: vec![
                SimPoolConfig {
                    name: "pool-a".to_string(),
                    total_bytes: 4 * 1024 * 1024 * 1024 * 1024, // 4 TiB
                },
                SimPoolConfig {
                    name: "pool-b".to_string(),
                    total_bytes: 4 * 1024 * 1024 * 1024 * 1024,
                },
            ],
            block_size: 512,
            job_mode: JobMode::Deferred,
            job_duration_ms: 500,
            latency_ms: 0,
            password: None,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(Error::Configuration(format!(
                "block size {} is not a power of two",
                self.block_size
            )));
        }
        let mut names = BTreeSet::new();
        for pool in &self.pools {
            if pool.name.is_empty() || pool.total_bytes == 0 {
                return Err(Error::Configuration(format!(
                    "pool '{}' needs a name and a non-zero capacity",
                    pool.name
                )));
            }
            if !names.insert(pool.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate pool name '{}'",
                    pool.name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Simulator State
// =============================================================================

/// Effect a job applies when it comes due
#[derive(Debug, Clone)]
enum PendingWork {
    CreateVolume {
        volume: Volume,
    },
    DeleteVolume {
        volume_id: String,
    },
    ResizeVolume {
        volume_id: String,
        pool_id: String,
        new_block_count: u64,
        reserved_bytes: u64,
    },
    ReplicateVolume {
        volume: Volume,
        source_id: String,
    },
    Grant {
        initiator_id: String,
        volume_id: String,
        mode: AccessMode,
    },
}

impl PendingWork {
    fn operation(&self) -> &'static str {
        match self {
            PendingWork::CreateVolume { .. } => "volume_create",
            PendingWork::DeleteVolume { .. } => "volume_delete",
            PendingWork::ResizeVolume { .. } => "volume_resize",
            PendingWork::ReplicateVolume { .. } => "volume_replicate",
            PendingWork::Grant { .. } => "access_grant",
        }
    }

    /// Name of the volume this work will bring into existence
    fn new_volume_name(&self) -> Option<&str> {
        match self {
            PendingWork::CreateVolume { volume } | PendingWork::ReplicateVolume { volume, .. } => {
                Some(&volume.name)
            }
            _ => None,
        }
    }

    fn touches_volume(&self, id: &str) -> bool {
        match self {
            PendingWork::CreateVolume { volume } => volume.id == id,
            PendingWork::DeleteVolume { volume_id }
            | PendingWork::ResizeVolume { volume_id, .. }
            | PendingWork::Grant { volume_id, .. } => volume_id == id,
            PendingWork::ReplicateVolume { volume, source_id } => {
                volume.id == id || source_id == id
            }
        }
    }
}

#[derive(Debug)]
struct SimJob {
    seq: u64,
    started_ms: u64,
    duration_ms: u64,
    work: Option<PendingWork>,
    /// Terminal snapshot, once the work has been applied
    outcome: Option<JobSnapshot>,
    released: bool,
}

impl SimJob {
    fn due_ms(&self) -> u64 {
        self.started_ms.saturating_add(self.duration_ms)
    }

    fn snapshot(&self, now_ms: u64) -> JobSnapshot {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let elapsed = now_ms.saturating_sub(self.started_ms);
        if elapsed == 0 {
            return JobSnapshot::pending();
        }
        let percent = (elapsed.saturating_mul(100) / self.duration_ms.max(1)).min(99);
        JobSnapshot::in_progress(percent as u8)
    }

    /// Percent reached just before the job came due
    fn last_percent(&self) -> u8 {
        if self.duration_ms == 0 {
            return 0;
        }
        (((self.duration_ms - 1) * 100) / self.duration_ms).min(99) as u8
    }
}

enum Submitted {
    Done(JobResult),
    Started(JobId),
}

impl Submitted {
    fn into_outcome<T: JobOutput>(self) -> Result<Outcome<T>> {
        match self {
            Submitted::Done(result) => {
                T::from_job_result(&JobId::from("inline"), result).map(Outcome::Done)
            }
            Submitted::Started(id) => Ok(Outcome::Started(Job::new(id))),
        }
    }
}

struct SimState {
    registered: bool,
    closed: bool,
    job_mode: JobMode,
    job_duration_ms: u64,
    block_size: u64,
    submissions: u64,
    next_id: u64,
    system: System,
    pools: BTreeMap<String, Pool>,
    volumes: BTreeMap<String, Volume>,
    initiators: BTreeMap<String, Initiator>,
    mappings: BTreeMap<(String, String), AccessMode>,
    jobs: BTreeMap<JobId, SimJob>,
    /// Released job ids, kept for the backend's lifetime so reuse of a
    /// stale id is reported as `FreedHandle` rather than `NotFound`
    freed: BTreeSet<JobId>,
}

impl SimState {
    fn new(config: &SimulatorConfig) -> Self {
        let system = System {
            id: "SYS_1".to_string(),
            name: config.system_name.clone(),
            status: OperationalStatus::Ok,
        };

        let pools = config
            .pools
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let id = format!("POOL_{}", i + 1);
                let pool = Pool {
                    id: id.clone(),
                    name: p.name.clone(),
                    total_bytes: p.total_bytes,
                    free_bytes: p.total_bytes,
                    system_id: system.id.clone(),
                };
                (id, pool)
            })
            .collect();

        Self {
            registered: false,
            closed: false,
            job_mode: config.job_mode,
            job_duration_ms: config.job_duration_ms,
            block_size: config.block_size,
            submissions: 0,
            next_id: 0,
            system,
            pools,
            volumes: BTreeMap::new(),
            initiators: BTreeMap::new(),
            mappings: BTreeMap::new(),
            jobs: BTreeMap::new(),
            freed: BTreeSet::new(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if !self.registered {
            return Err(Error::Connection("simulator is not registered".into()));
        }
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Apply every job that has come due, in due order
    fn settle(&mut self, now_ms: u64) {
        let mut due: Vec<(u64, u64, JobId)> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.outcome.is_none() && now_ms >= job.due_ms())
            .map(|(id, job)| (job.due_ms(), job.seq, id.clone()))
            .collect();
        due.sort();

        for (_, _, id) in due {
            let Some(work) = self.jobs.get_mut(&id).and_then(|job| job.work.take()) else {
                continue;
            };
            let operation = work.operation();

            let outcome = match self.apply(work) {
                Ok(result) => {
                    debug!("Simulated job {} ({}) complete", id, operation);
                    JobSnapshot::complete(result)
                }
                Err(e) => {
                    warn!("Simulated job {} ({}) failed: {}", id, operation, e);
                    let percent = self.jobs.get(&id).map(SimJob::last_percent).unwrap_or(0);
                    JobSnapshot::failed(percent, e.record(operation))
                }
            };

            if let Some(job) = self.jobs.get_mut(&id) {
                job.outcome = Some(outcome);
            }
        }

        self.jobs
            .retain(|_, job| !(job.released && job.outcome.is_some()));
    }

    fn should_defer(&mut self) -> bool {
        self.submissions += 1;
        match self.job_mode {
            JobMode::Immediate => false,
            JobMode::Deferred => true,
            JobMode::Alternate => self.submissions % 2 == 1,
        }
    }

    fn submit(&mut self, work: PendingWork, now_ms: u64) -> Result<Submitted> {
        if !self.should_defer() {
            return self.apply(work).map(Submitted::Done);
        }

        let seq = self.next_id();
        let id = JobId::new(format!("JOB_{}", seq));
        debug!("Simulated job {} started for {}", id, work.operation());
        self.jobs.insert(
            id.clone(),
            SimJob {
                seq,
                started_ms: now_ms,
                duration_ms: self.job_duration_ms,
                work: Some(work),
                outcome: None,
                released: false,
            },
        );
        Ok(Submitted::Started(id))
    }

    /// Carry out `work`, undoing its capacity reservation if it cannot apply
    fn apply(&mut self, work: PendingWork) -> Result<JobResult> {
        match work {
            PendingWork::CreateVolume { volume } => {
                self.volumes.insert(volume.id.clone(), volume.clone());
                Ok(JobResult::Volume(volume))
            }
            PendingWork::DeleteVolume { volume_id } => {
                self.remove_volume(&volume_id)?;
                Ok(JobResult::Empty)
            }
            PendingWork::ResizeVolume {
                volume_id,
                pool_id,
                new_block_count,
                reserved_bytes,
            } => {
                let Some(volume) = self.volumes.get_mut(&volume_id) else {
                    self.unreserve(&pool_id, reserved_bytes);
                    return Err(Error::not_found("volume", volume_id));
                };
                let old_bytes = volume.size_bytes();
                volume.block_count = new_block_count;
                let new_bytes = volume.size_bytes();
                let updated = volume.clone();
                if new_bytes < old_bytes {
                    self.unreserve(&pool_id, old_bytes - new_bytes);
                }
                Ok(JobResult::Volume(updated))
            }
            PendingWork::ReplicateVolume { volume, source_id } => {
                if !self.volumes.contains_key(&source_id) {
                    self.unreserve(&volume.pool_id, volume.size_bytes());
                    return Err(Error::not_found("volume", source_id));
                }
                self.volumes.insert(volume.id.clone(), volume.clone());
                Ok(JobResult::Volume(volume))
            }
            PendingWork::Grant {
                initiator_id,
                volume_id,
                mode,
            } => {
                if !self.initiators.contains_key(&initiator_id) {
                    return Err(Error::not_found("initiator", initiator_id));
                }
                if !self.volumes.contains_key(&volume_id) {
                    return Err(Error::not_found("volume", volume_id));
                }
                self.mappings.insert((initiator_id, volume_id), mode);
                Ok(JobResult::Empty)
            }
        }
    }

    fn reserve(&mut self, pool_id: &str, bytes: u64) -> Result<()> {
        let pool = self
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| Error::not_found("pool", pool_id))?;
        if pool.free_bytes < bytes {
            return Err(Error::InsufficientCapacity {
                requested: bytes,
                available: pool.free_bytes,
            });
        }
        pool.free_bytes -= bytes;
        Ok(())
    }

    fn unreserve(&mut self, pool_id: &str, bytes: u64) {
        if let Some(pool) = self.pools.get_mut(pool_id) {
            pool.free_bytes = pool.free_bytes.saturating_add(bytes).min(pool.total_bytes);
        }
    }

    /// Drop a volume, return its capacity and every mapping that names it
    fn remove_volume(&mut self, volume_id: &str) -> Result<Volume> {
        let volume = self
            .volumes
            .remove(volume_id)
            .ok_or_else(|| Error::not_found("volume", volume_id))?;
        self.unreserve(&volume.pool_id, volume.size_bytes());

        let before = self.mappings.len();
        self.mappings.retain(|(_, v), _| v != volume_id);
        let dropped = before - self.mappings.len();
        if dropped > 0 {
            debug!("Dropped {} access mappings of volume {}", dropped, volume_id);
        }
        Ok(volume)
    }

    fn volume(&self, id: &str) -> Result<&Volume> {
        self.volumes
            .get(id)
            .ok_or_else(|| Error::not_found("volume", id))
    }

    fn name_in_use(&self, name: &str) -> bool {
        self.volumes.values().any(|v| v.name == name)
            || self
                .jobs
                .values()
                .filter_map(|job| job.work.as_ref())
                .any(|work| work.new_volume_name() == Some(name))
    }

    fn ensure_idle(&self, volume_id: &str, operation: &str) -> Result<()> {
        let busy = self
            .jobs
            .values()
            .filter_map(|job| job.work.as_ref())
            .any(|work| work.touches_volume(volume_id));
        if busy {
            return Err(Error::Backend {
                backend: BACKEND_NAME.into(),
                operation: operation.into(),
                reason: format!("volume {} has a job in progress", volume_id),
            });
        }
        Ok(())
    }

    fn new_volume(&mut self, name: &str, pool_id: &str, block_count: u64) -> Volume {
        let n = self.next_id();
        Volume {
            id: format!("VOL_{}", n),
            name: name.to_string(),
            vpd83: format!("600a0b80{:024x}", n),
            block_size: self.block_size,
            block_count,
            status: OperationalStatus::Ok,
            admin_enabled: true,
            pool_id: pool_id.to_string(),
            system_id: self.system.id.clone(),
        }
    }
}

// =============================================================================
// Simulator Backend
// =============================================================================

/// In-memory array backend
pub struct SimulatorBackend {
    config: SimulatorConfig,
    clock: Arc<dyn SimClock>,
    state: Mutex<SimState>,
}

impl SimulatorBackend {
    /// Create a simulator on the wall clock
    pub fn new(config: SimulatorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a simulator whose jobs progress against `clock`
    pub fn with_clock(config: SimulatorConfig, clock: Arc<dyn SimClock>) -> Self {
        let state = Mutex::new(SimState::new(&config));
        Self {
            config,
            clock,
            state,
        }
    }

    async fn pause(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    /// Lock the state after applying every job that has come due
    fn settled(&self) -> Result<MutexGuard<'_, SimState>> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.settle(self.clock.now_ms());
        Ok(state)
    }
}

fn oversized(size_bytes: u64, block_size: u64) -> Error {
    Error::InvalidArgument(format!(
        "{} bytes does not fit in whole {}-byte blocks",
        size_bytes, block_size
    ))
}

#[async_trait]
impl StorageBackend for SimulatorBackend {
    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }

    async fn register(
        &self,
        uri: &ConnectionUri,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<()> {
        self.pause().await;

        if uri.scheme() != SIMULATOR_SCHEME {
            return Err(Error::Connection(format!(
                "simulator cannot serve scheme '{}'",
                uri.scheme()
            )));
        }

        if let Some(expected) = &self.config.password {
            if credentials.password.as_deref() != Some(expected.as_str()) {
                return Err(Error::Authentication(format!(
                    "invalid credentials for user '{}'",
                    uri.username().unwrap_or("")
                )));
            }
        }

        let job_mode = uri.parse_param::<JobMode>("jobs")?;
        let job_duration_ms = uri.parse_param::<u64>("job_duration_ms")?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::SessionClosed);
        }
        if state.registered {
            return Err(Error::Connection(
                "simulator is already bound to a session".into(),
            ));
        }
        if let Some(mode) = job_mode {
            state.job_mode = mode;
        }
        if let Some(ms) = job_duration_ms {
            state.job_duration_ms = ms;
        }
        state.registered = true;

        info!(
            "Simulator registered: {} (jobs={:?}, job_duration_ms={}, timeout={:?})",
            uri.host().unwrap_or("localhost"),
            state.job_mode,
            state.job_duration_ms,
            timeout
        );
        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        self.pause().await;
        let mut state = self.settled()?;

        let outstanding = state.jobs.values().filter(|job| !job.released).count();
        if outstanding > 0 {
            warn!("Simulator unregistered with {} unreleased jobs", outstanding);
        }
        state.registered = false;
        state.closed = true;
        info!("Simulator unregistered");
        Ok(())
    }

    async fn plugin_info(&self) -> Result<PluginInfo> {
        self.pause().await;
        let _state = self.settled()?;
        Ok(PluginInfo {
            description: "Storage array simulator".to_string(),
            version: crate::VERSION.to_string(),
        })
    }

    async fn systems(&self) -> Result<Vec<System>> {
        self.pause().await;
        let state = self.settled()?;
        Ok(vec![state.system.clone()])
    }

    async fn pools(&self) -> Result<Vec<Pool>> {
        self.pause().await;
        let state = self.settled()?;
        Ok(state.pools.values().cloned().collect())
    }

    async fn volumes(&self) -> Result<Vec<Volume>> {
        self.pause().await;
        let state = self.settled()?;
        Ok(state.volumes.values().cloned().collect())
    }

    async fn initiators(&self) -> Result<Vec<Initiator>> {
        self.pause().await;
        let state = self.settled()?;
        Ok(state.initiators.values().cloned().collect())
    }

    async fn volume_create(
        &self,
        pool: &Pool,
        name: &str,
        size_bytes: u64,
        provisioning: ProvisionKind,
    ) -> Result<Outcome<Volume>> {
        self.pause().await;
        let mut state = self.settled()?;

        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("volume name is empty".into()));
        }
        if size_bytes == 0 {
            return Err(Error::InvalidArgument("volume size is zero".into()));
        }
        if !state.pools.contains_key(&pool.id) {
            return Err(Error::not_found("pool", &pool.id));
        }
        if state.name_in_use(name) {
            return Err(Error::AlreadyExists {
                kind: "volume".into(),
                id: name.to_string(),
            });
        }

        let block_size = state.block_size;
        let block_count = size_bytes.div_ceil(block_size);
        let reserved_bytes = block_count
            .checked_mul(block_size)
            .ok_or_else(|| oversized(size_bytes, block_size))?;
        state.reserve(&pool.id, reserved_bytes)?;
        let volume = state.new_volume(name, &pool.id, block_count);

        debug!(
            "Provisioning volume {} ({} blocks, {:?}) in {}",
            volume.id, block_count, provisioning, pool.id
        );
        state
            .submit(PendingWork::CreateVolume { volume }, self.clock.now_ms())?
            .into_outcome()
    }

    async fn volume_delete(&self, volume: &Volume) -> Result<Outcome<()>> {
        self.pause().await;
        let mut state = self.settled()?;

        state.volume(&volume.id)?;
        state.ensure_idle(&volume.id, "volume_delete")?;
        state
            .submit(
                PendingWork::DeleteVolume {
                    volume_id: volume.id.clone(),
                },
                self.clock.now_ms(),
            )?
            .into_outcome()
    }

    async fn volume_resize(&self, volume: &Volume, new_size_bytes: u64) -> Result<Outcome<Volume>> {
        self.pause().await;
        let mut state = self.settled()?;

        let current = state.volume(&volume.id)?.clone();
        if new_size_bytes == 0 {
            return Err(Error::InvalidArgument("new volume size is zero".into()));
        }
        let new_block_count = new_size_bytes.div_ceil(current.block_size);
        if new_block_count == current.block_count {
            return Err(Error::InvalidArgument(format!(
                "volume {} is already {} bytes",
                current.id,
                current.size_bytes()
            )));
        }
        state.ensure_idle(&current.id, "volume_resize")?;

        if new_block_count.checked_mul(current.block_size).is_none() {
            return Err(oversized(new_size_bytes, current.block_size));
        }
        let reserved_bytes = new_block_count
            .saturating_sub(current.block_count)
            .saturating_mul(current.block_size);
        state.reserve(&current.pool_id, reserved_bytes)?;

        state
            .submit(
                PendingWork::ResizeVolume {
                    volume_id: current.id.clone(),
                    pool_id: current.pool_id.clone(),
                    new_block_count,
                    reserved_bytes,
                },
                self.clock.now_ms(),
            )?
            .into_outcome()
    }

    async fn volume_replicate(
        &self,
        pool: Option<&Pool>,
        kind: ReplicationKind,
        source: &Volume,
        name: &str,
    ) -> Result<Outcome<Volume>> {
        self.pause().await;
        let mut state = self.settled()?;

        let source = state.volume(&source.id)?.clone();
        let pool_id = pool.map_or_else(|| source.pool_id.clone(), |p| p.id.clone());
        if !state.pools.contains_key(&pool_id) {
            return Err(Error::not_found("pool", pool_id));
        }
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("replica name is empty".into()));
        }
        if state.name_in_use(name) {
            return Err(Error::AlreadyExists {
                kind: "volume".into(),
                id: name.to_string(),
            });
        }

        state.reserve(&pool_id, source.size_bytes())?;
        let volume = state.new_volume(name, &pool_id, source.block_count);

        debug!(
            "Replicating {} into {} as {} ({})",
            source.id, pool_id, volume.id, kind
        );
        state
            .submit(
                PendingWork::ReplicateVolume {
                    volume,
                    source_id: source.id,
                },
                self.clock.now_ms(),
            )?
            .into_outcome()
    }

    async fn initiator_create(
        &self,
        name: &str,
        external_id: &str,
        initiator_type: InitiatorType,
    ) -> Result<Initiator> {
        self.pause().await;
        let mut state = self.settled()?;

        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("initiator name is empty".into()));
        }
        initiator_type.validate_id(external_id)?;
        if state.initiators.contains_key(external_id) {
            return Err(Error::AlreadyExists {
                kind: "initiator".into(),
                id: external_id.to_string(),
            });
        }

        let initiator = Initiator {
            id: external_id.to_string(),
            name: name.to_string(),
            initiator_type,
        };
        state
            .initiators
            .insert(initiator.id.clone(), initiator.clone());
        Ok(initiator)
    }

    async fn initiator_delete(&self, initiator: &Initiator) -> Result<()> {
        self.pause().await;
        let mut state = self.settled()?;

        if state.initiators.remove(&initiator.id).is_none() {
            return Err(Error::not_found("initiator", &initiator.id));
        }
        state.mappings.retain(|(i, _), _| i != &initiator.id);
        Ok(())
    }

    async fn access_grant(
        &self,
        initiator: &Initiator,
        volume: &Volume,
        mode: AccessMode,
    ) -> Result<Outcome<()>> {
        self.pause().await;
        let mut state = self.settled()?;

        if !state.initiators.contains_key(&initiator.id) {
            return Err(Error::not_found("initiator", &initiator.id));
        }
        state.volume(&volume.id)?;

        state
            .submit(
                PendingWork::Grant {
                    initiator_id: initiator.id.clone(),
                    volume_id: volume.id.clone(),
                    mode,
                },
                self.clock.now_ms(),
            )?
            .into_outcome()
    }

    async fn access_revoke(&self, initiator: &Initiator, volume: &Volume) -> Result<()> {
        self.pause().await;
        let mut state = self.settled()?;

        if !state.initiators.contains_key(&initiator.id) {
            return Err(Error::not_found("initiator", &initiator.id));
        }
        state.volume(&volume.id)?;

        let key = (initiator.id.clone(), volume.id.clone());
        if state.mappings.remove(&key).is_none() {
            return Err(Error::not_found(
                "access mapping",
                format!("{} -> {}", initiator.id, volume.id),
            ));
        }
        Ok(())
    }

    async fn access_mappings(&self) -> Result<Vec<AccessMapping>> {
        self.pause().await;
        let state = self.settled()?;
        Ok(state
            .mappings
            .iter()
            .map(|((initiator_id, volume_id), mode)| AccessMapping {
                initiator_id: initiator_id.clone(),
                volume_id: volume_id.clone(),
                mode: *mode,
            })
            .collect())
    }

    async fn job_status(&self, job_id: &JobId) -> Result<JobSnapshot> {
        self.pause().await;
        let state = self.settled()?;

        if state.freed.contains(job_id) {
            return Err(Error::FreedHandle {
                job_id: job_id.to_string(),
            });
        }
        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::not_found("job", job_id.as_str()))?;
        Ok(job.snapshot(self.clock.now_ms()))
    }

    async fn job_free(&self, job_id: &JobId) -> Result<()> {
        self.pause().await;
        let mut state = self.settled()?;

        if state.freed.contains(job_id) {
            return Err(Error::FreedHandle {
                job_id: job_id.to_string(),
            });
        }
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::not_found("job", job_id.as_str()))?;

        if job.outcome.is_some() {
            state.jobs.remove(job_id);
        } else {
            // Work still applies when it comes due; only the handle goes away.
            job.released = true;
        }
        state.freed.insert(job_id.clone());
        Ok(())
    }
}
