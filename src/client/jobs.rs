//! Job Tracker
//!
//! Client half of the deferred-operation protocol. The backend owns every
//! job; the session only observes snapshots, checks that what it sees obeys
//! the PENDING → IN_PROGRESS → {COMPLETE, ERROR} rules, and releases handles.
//!
//! Waiting is caller policy: [`PollPolicy`] decides the interval schedule and
//! the optional upper bound, and a [`Pacer`] supplies the actual pause so
//! tests can run deferred jobs without real delays.

use crate::client::session::Session;
use crate::domain::ports::{Job, JobId, JobOutput, JobSnapshot, JobStatus};
use crate::error::{Error, ErrorKind, ErrorRecord, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Poll Policy
// =============================================================================

/// Interval schedule and bounds for waiting on a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub randomization_factor: f64,
    /// Total time to spend pausing before giving up (unbounded if `None`)
    pub max_wait_ms: Option<u64>,
    /// Number of polls before giving up (unbounded if `None`)
    pub max_polls: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 100,
            max_interval_ms: 5_000,
            multiplier: 1.5,
            randomization_factor: 0.1,
            max_wait_ms: None,
            max_polls: None,
        }
    }
}

impl PollPolicy {
    /// Fixed interval, no growth and no jitter
    pub fn fixed(interval_ms: u64) -> Self {
        Self {
            initial_interval_ms: interval_ms,
            max_interval_ms: interval_ms,
            multiplier: 1.0,
            randomization_factor: 0.0,
            ..Default::default()
        }
    }

    pub fn with_max_wait(mut self, ms: u64) -> Self {
        self.max_wait_ms = Some(ms);
        self
    }

    pub fn with_max_polls(mut self, polls: u32) -> Self {
        self.max_polls = Some(polls);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_interval_ms > self.max_interval_ms {
            return Err(Error::Configuration(format!(
                "poll initial interval {} ms exceeds max interval {} ms",
                self.initial_interval_ms, self.max_interval_ms
            )));
        }
        if self.multiplier < 1.0 {
            return Err(Error::Configuration(format!(
                "poll multiplier {} is below 1.0",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.randomization_factor) {
            return Err(Error::Configuration(format!(
                "poll randomization factor {} is outside [0, 1)",
                self.randomization_factor
            )));
        }
        Ok(())
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }
}

// =============================================================================
// Pacing
// =============================================================================

/// Source of the pause between two polls
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, interval: Duration);
}

/// Pauses on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// Poll loop settings handed to [`Session::wait_for`]
#[derive(Clone)]
pub struct JobWaiter {
    policy: PollPolicy,
    pacer: Arc<dyn Pacer>,
}

impl JobWaiter {
    pub fn new(policy: PollPolicy) -> Self {
        Self::with_pacer(policy, Arc::new(TokioPacer))
    }

    pub fn with_pacer(policy: PollPolicy, pacer: Arc<dyn Pacer>) -> Self {
        Self { policy, pacer }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }
}

impl Default for JobWaiter {
    fn default() -> Self {
        Self::new(PollPolicy::default())
    }
}

// =============================================================================
// Job Tracker
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Observation {
    status: JobStatus,
    percent: u8,
}

fn rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Pending => 0,
        JobStatus::InProgress => 1,
        JobStatus::Complete | JobStatus::Error => 2,
    }
}

/// What one session has seen of each job it polled
#[derive(Debug, Default)]
pub(crate) struct JobTracker {
    observed: HashMap<JobId, Observation>,
    /// Every id this session has released. Never pruned: a stale id keeps
    /// answering `FreedHandle` for the life of the session.
    released: HashSet<JobId>,
}

impl JobTracker {
    pub(crate) fn ensure_live(&self, id: &JobId) -> Result<()> {
        if self.released.contains(id) {
            return Err(Error::FreedHandle {
                job_id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Accept a backend report only if it is consistent with earlier ones
    pub(crate) fn observe(
        &mut self,
        backend: &str,
        id: &JobId,
        snapshot: JobSnapshot,
    ) -> Result<JobSnapshot> {
        let violation = |reason: String| Error::Backend {
            backend: backend.to_string(),
            operation: "job_status".into(),
            reason: format!("job {}: {}", id, reason),
        };

        snapshot.validate().map_err(violation)?;

        if let Some(prev) = self.observed.get(id) {
            if prev.status.is_terminal() && prev.status != snapshot.status {
                return Err(violation(format!(
                    "left terminal state {} for {}",
                    prev.status, snapshot.status
                )));
            }
            if rank(snapshot.status) < rank(prev.status) {
                return Err(violation(format!(
                    "went back from {} to {}",
                    prev.status, snapshot.status
                )));
            }
            if snapshot.percent < prev.percent {
                return Err(violation(format!(
                    "progress regressed from {}% to {}%",
                    prev.percent, snapshot.percent
                )));
            }
        }

        self.observed.insert(
            id.clone(),
            Observation {
                status: snapshot.status,
                percent: snapshot.percent,
            },
        );
        Ok(snapshot)
    }

    pub(crate) fn release(&mut self, id: &JobId) {
        self.observed.remove(id);
        self.released.insert(id.clone());
    }

    /// Jobs polled at least once and not yet released
    pub(crate) fn live_count(&self) -> usize {
        self.observed.len()
    }
}

/// Tie a failed poll or release to the job being waited on
fn interrupted(id: &JobId, error: Error) -> Error {
    match error {
        Error::FreedHandle { .. } => error,
        source => Error::JobInterrupted {
            job_id: id.to_string(),
            source: Box::new(source),
        },
    }
}

// =============================================================================
// Session Job Operations
// =============================================================================

impl Session {
    /// Observe a job's current status, percent and result
    pub async fn poll_job<T>(&mut self, job: &Job<T>) -> Result<JobSnapshot> {
        self.poll_job_id(job.id()).await
    }

    /// Observe a job by its raw id
    pub async fn poll_job_id(&mut self, id: &JobId) -> Result<JobSnapshot> {
        if let Err(e) = self.jobs.ensure_live(id) {
            return self.note("job_status", Err(e));
        }

        let backend = self.backend();
        let snapshot = self.exchange("job_status", backend.job_status(id)).await;
        let result = snapshot.and_then(|s| self.jobs.observe(backend.backend_name(), id, s));
        if let Ok(s) = &result {
            debug!("Job {} is {} at {}%", id, s.status, s.percent);
        }
        self.note("job_status", result)
    }

    /// Release a job handle; the id cannot be polled or released again
    pub async fn release_job<T>(&mut self, job: Job<T>) -> Result<()> {
        self.release_job_id(&job.into_id()).await
    }

    /// Release a job by its raw id
    pub async fn release_job_id(&mut self, id: &JobId) -> Result<()> {
        if let Err(e) = self.jobs.ensure_live(id) {
            return self.note("job_free", Err(e));
        }

        let backend = self.backend();
        let result = self.exchange("job_free", backend.job_free(id)).await;
        if matches!(result, Ok(()) | Err(Error::FreedHandle { .. })) {
            self.jobs.release(id);
        }
        self.note("job_free", result)
    }

    /// Poll `job` until it finishes, then release it
    ///
    /// COMPLETE yields the typed result and ERROR yields [`Error::JobFailed`].
    /// When the policy's bound runs out the job is left unreleased and
    /// [`Error::JobWaitExceeded`] names it, so the caller can keep waiting on
    /// or release it by id. A poll or release that fails on its own (a
    /// timeout, say) comes back as [`Error::JobInterrupted`], which also
    /// names the job and keeps the inner error's classification.
    pub async fn wait_for<T: JobOutput>(&mut self, job: Job<T>, waiter: &JobWaiter) -> Result<T> {
        let result = self.drive(job, waiter).await;
        self.note("wait_for", result)
    }

    async fn drive<T: JobOutput>(&mut self, job: Job<T>, waiter: &JobWaiter) -> Result<T> {
        let policy = waiter.policy();
        let max_wait = policy.max_wait_ms.map(Duration::from_millis);
        let mut schedule = policy.schedule();
        let mut waited = Duration::ZERO;
        let mut polls: u32 = 0;

        loop {
            let snapshot = self
                .poll_job(&job)
                .await
                .map_err(|e| interrupted(job.id(), e))?;
            polls += 1;

            match snapshot.status {
                JobStatus::Complete => {
                    let id = job.into_id();
                    self.release_job_id(&id)
                        .await
                        .map_err(|e| interrupted(&id, e))?;
                    let result = snapshot.result.ok_or_else(|| Error::Backend {
                        backend: self.backend_name().to_string(),
                        operation: "job_status".into(),
                        reason: format!("job {} completed without a result", id),
                    })?;
                    info!("Job {} complete after {} polls", id, polls);
                    return T::from_job_result(&id, result);
                }
                JobStatus::Error => {
                    let id = job.into_id();
                    self.release_job_id(&id)
                        .await
                        .map_err(|e| interrupted(&id, e))?;
                    let record = snapshot.error.unwrap_or_else(|| {
                        ErrorRecord::new(ErrorKind::Backend, "job_status", "job failed")
                    });
                    warn!("Job {} failed: {}", id, record);
                    return Err(Error::JobFailed {
                        job_id: id.to_string(),
                        record,
                    });
                }
                JobStatus::Pending | JobStatus::InProgress => {}
            }

            let exhausted_polls = policy.max_polls.is_some_and(|max| polls >= max);
            let exhausted_wait = max_wait.is_some_and(|max| waited >= max);
            if exhausted_polls || exhausted_wait {
                return Err(Error::JobWaitExceeded {
                    job_id: job.id().to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }

            let mut interval = schedule
                .next_backoff()
                .unwrap_or(Duration::from_millis(policy.max_interval_ms));
            if let Some(max) = max_wait {
                interval = interval.min(max.saturating_sub(waited));
            }
            waiter.pacer.pause(interval).await;
            waited += interval;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{JobWaiter, Pacer, PollPolicy};
    use crate::backends::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Pacer that moves the simulator clock instead of sleeping
    pub(crate) struct ClockPacer(pub(crate) Arc<ManualClock>);

    #[async_trait]
    impl Pacer for ClockPacer {
        async fn pause(&self, interval: Duration) {
            self.0.advance(interval.as_millis() as u64);
        }
    }

    /// Waiter polling every `interval_ms` of simulated time
    pub(crate) fn clock_waiter(clock: &Arc<ManualClock>, interval_ms: u64) -> JobWaiter {
        JobWaiter::with_pacer(
            PollPolicy::fixed(interval_ms),
            Arc::new(ClockPacer(clock.clone())),
        )
    }
}
