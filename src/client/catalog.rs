//! Resource Catalogs
//!
//! Listing and lifecycle calls for systems, pools, volumes and initiators.
//! Every listing is a fresh snapshot from the backend; nothing is cached.

use crate::client::session::Session;
use crate::domain::ports::{
    Initiator, InitiatorType, Outcome, Pool, ProvisionKind, ReplicationKind, System, Volume,
};
use crate::error::{Error, Result};
use tracing::info;

fn require_name(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{} name is empty", what)));
    }
    Ok(())
}

impl Session {
    pub async fn list_systems(&mut self) -> Result<Vec<System>> {
        let backend = self.backend();
        let result = self.exchange("systems", backend.systems()).await;
        self.note("list_systems", result)
    }

    /// Storage pools with their capacity figures
    pub async fn list_pools(&mut self) -> Result<Vec<Pool>> {
        let backend = self.backend();
        let result = self.exchange("pools", backend.pools()).await;
        self.note("list_pools", result)
    }

    pub async fn list_volumes(&mut self) -> Result<Vec<Volume>> {
        let backend = self.backend();
        let result = self.exchange("volumes", backend.volumes()).await;
        self.note("list_volumes", result)
    }

    pub async fn list_initiators(&mut self) -> Result<Vec<Initiator>> {
        let backend = self.backend();
        let result = self.exchange("initiators", backend.initiators()).await;
        self.note("list_initiators", result)
    }

    /// Create a volume of at least `size_bytes` in `pool`
    ///
    /// The backend rounds the size up to whole blocks. The volume is either
    /// returned directly or produced by the returned job.
    pub async fn create_volume(
        &mut self,
        pool: &Pool,
        name: &str,
        size_bytes: u64,
        provisioning: ProvisionKind,
    ) -> Result<Outcome<Volume>> {
        let result = match require_name("volume", name) {
            Ok(()) if size_bytes == 0 => {
                Err(Error::InvalidArgument("volume size must be positive".into()))
            }
            Ok(()) => {
                let backend = self.backend();
                self.exchange(
                    "volume_create",
                    backend.volume_create(pool, name, size_bytes, provisioning),
                )
                .await
            }
            Err(e) => Err(e),
        };
        if let Ok(outcome) = &result {
            info!("Volume '{}' in {}: {}", name, pool.id, outcome.status());
        }
        self.note("create_volume", result)
    }

    pub async fn delete_volume(&mut self, volume: &Volume) -> Result<Outcome<()>> {
        let backend = self.backend();
        let result = self
            .exchange("volume_delete", backend.volume_delete(volume))
            .await;
        if let Ok(outcome) = &result {
            info!("Delete volume {}: {}", volume.id, outcome.status());
        }
        self.note("delete_volume", result)
    }

    /// Grow or shrink a volume; the resized volume comes back inline or via a job
    pub async fn resize_volume(
        &mut self,
        volume: &Volume,
        new_size_bytes: u64,
    ) -> Result<Outcome<Volume>> {
        let backend = self.backend();
        let result = self
            .exchange("volume_resize", backend.volume_resize(volume, new_size_bytes))
            .await;
        self.note("resize_volume", result)
    }

    /// Copy `source` into a new volume, in `pool` or else the source's own pool
    pub async fn replicate_volume(
        &mut self,
        pool: Option<&Pool>,
        kind: ReplicationKind,
        source: &Volume,
        name: &str,
    ) -> Result<Outcome<Volume>> {
        let result = match require_name("replica", name) {
            Ok(()) => {
                let backend = self.backend();
                self.exchange(
                    "volume_replicate",
                    backend.volume_replicate(pool, kind, source, name),
                )
                .await
            }
            Err(e) => Err(e),
        };
        self.note("replicate_volume", result)
    }

    /// Register a host initiator
    ///
    /// `external_id` must be well formed for `initiator_type`: an iSCSI name
    /// or a 16 hex digit WWN.
    pub async fn create_initiator(
        &mut self,
        name: &str,
        external_id: &str,
        initiator_type: InitiatorType,
    ) -> Result<Initiator> {
        let checked = require_name("initiator", name)
            .and_then(|()| initiator_type.validate_id(external_id));
        let result = match checked {
            Ok(()) => {
                let backend = self.backend();
                self.exchange(
                    "initiator_create",
                    backend.initiator_create(name, external_id, initiator_type),
                )
                .await
            }
            Err(e) => Err(e),
        };
        if let Ok(initiator) = &result {
            info!("Initiator {} registered as '{}'", initiator.id, initiator.name);
        }
        self.note("create_initiator", result)
    }

    /// Remove an initiator along with every mapping that references it
    pub async fn delete_initiator(&mut self, initiator: &Initiator) -> Result<()> {
        let backend = self.backend();
        let result = self
            .exchange("initiator_delete", backend.initiator_delete(initiator))
            .await;
        self.note("delete_initiator", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::clock::ManualClock;
    use crate::backends::simulator::{JobMode, SimulatorBackend, SimulatorConfig};
    use crate::client::jobs::testing::clock_waiter;
    use crate::client::jobs::JobWaiter;
    use crate::domain::ports::{Credentials, OperationalStatus};
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    async fn immediate_session() -> Session {
        let backend = Arc::new(SimulatorBackend::new(SimulatorConfig {
            job_mode: JobMode::Immediate,
            ..Default::default()
        }));
        Session::connect_backend("sim://user@host", Credentials::default(), 30_000, backend)
            .await
            .unwrap()
    }

    async fn deferred_session() -> (Session, JobWaiter) {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(SimulatorBackend::with_clock(
            SimulatorConfig {
                job_mode: JobMode::Deferred,
                job_duration_ms: 100,
                ..Default::default()
            },
            clock.clone(),
        ));
        let session =
            Session::connect_backend("sim://user@host", Credentials::default(), 30_000, backend)
                .await
                .unwrap();
        (session, clock_waiter(&clock, 25))
    }

    fn started<T: std::fmt::Debug>(outcome: Outcome<T>) -> crate::domain::ports::Job<T> {
        assert_matches!(outcome, Outcome::Started(job) => job)
    }

    fn done<T: std::fmt::Debug>(outcome: Outcome<T>) -> T {
        assert_matches!(outcome, Outcome::Done(value) => value)
    }

    #[tokio::test]
    async fn test_list_pools() {
        let mut session = immediate_session().await;
        let pools = session.list_pools().await.unwrap();

        assert_eq!(pools.len(), 2);
        for pool in &pools {
            assert!(pool.free_bytes <= pool.total_bytes);
            assert!(!pool.name.is_empty());
        }
    }

    #[tokio::test]
    async fn test_list_systems() {
        let mut session = immediate_session().await;
        let systems = session.list_systems().await.unwrap();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].status, OperationalStatus::Ok);
    }

    #[tokio::test]
    async fn test_create_volume_inline() {
        let mut session = immediate_session().await;
        let pool = session.list_pools().await.unwrap().remove(0);

        let volume = done(
            session
                .create_volume(&pool, "lsm_volume", 20_000_000, ProvisionKind::Default)
                .await
                .unwrap(),
        );
        assert!(volume.size_bytes() >= 20_000_000);
        assert_eq!(volume.pool_id, pool.id);

        let listed = session.list_volumes().await.unwrap();
        assert!(listed.iter().any(|v| v.id == volume.id));

        let after = session.list_pools().await.unwrap();
        let after = after.iter().find(|p| p.id == pool.id).unwrap();
        assert_eq!(after.free_bytes, pool.free_bytes - volume.size_bytes());
    }

    #[tokio::test]
    async fn test_create_volume_rejects_bad_input() {
        let mut session = immediate_session().await;
        let pool = session.list_pools().await.unwrap().remove(0);

        assert_matches!(
            session
                .create_volume(&pool, " ", 4096, ProvisionKind::Thin)
                .await,
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            session
                .create_volume(&pool, "zero", 0, ProvisionKind::Thin)
                .await,
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            session
                .create_volume(&pool, "huge", pool.total_bytes * 2, ProvisionKind::Full)
                .await,
            Err(Error::InsufficientCapacity { .. })
        );
        assert_matches!(
            session
                .create_volume(&pool, "max", u64::MAX, ProvisionKind::Default)
                .await,
            Err(Error::InvalidArgument(_))
        );
        assert_eq!(
            session.last_error().map(|e| e.operation),
            Some("create_volume".to_string())
        );
    }

    #[tokio::test]
    async fn test_delete_volume_removes_it() {
        let mut session = immediate_session().await;
        let pool = session.list_pools().await.unwrap().remove(0);
        let volume = done(
            session
                .create_volume(&pool, "scratch", 1 << 20, ProvisionKind::Thin)
                .await
                .unwrap(),
        );

        done(session.delete_volume(&volume).await.unwrap());
        assert!(session.list_volumes().await.unwrap().is_empty());

        let err = session.delete_volume(&volume).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_resize_and_replicate() {
        let mut session = immediate_session().await;
        let pools = session.list_pools().await.unwrap();
        let volume = done(
            session
                .create_volume(&pools[0], "src", 1 << 20, ProvisionKind::Default)
                .await
                .unwrap(),
        );

        let grown = done(session.resize_volume(&volume, 2 << 20).await.unwrap());
        assert_eq!(grown.id, volume.id);
        assert_eq!(grown.size_bytes(), 2 << 20);

        let copy = done(
            session
                .replicate_volume(Some(&pools[1]), ReplicationKind::Clone, &grown, "copy")
                .await
                .unwrap(),
        );
        assert_eq!(copy.pool_id, pools[1].id);
        assert_eq!(copy.size_bytes(), grown.size_bytes());

        assert_matches!(
            session
                .replicate_volume(None, ReplicationKind::Copy, &grown, "")
                .await,
            Err(Error::InvalidArgument(_))
        );
    }

    #[tokio::test]
    async fn test_create_initiator_listed() {
        let mut session = immediate_session().await;
        let initiator = session
            .create_initiator(
                "lsm_initiator",
                "iqn.1994-05.com.domain:01.89bd01",
                InitiatorType::Iscsi,
            )
            .await
            .unwrap();

        let listed = session.list_initiators().await.unwrap();
        assert_eq!(listed, vec![initiator.clone()]);
        assert_eq!(initiator.name, "lsm_initiator");
        assert_eq!(initiator.id, "iqn.1994-05.com.domain:01.89bd01");

        assert_matches!(
            session
                .create_initiator("dup", "iqn.1994-05.com.domain:01.89bd01", InitiatorType::Iscsi)
                .await,
            Err(Error::AlreadyExists { .. })
        );
    }

    #[tokio::test]
    async fn test_create_initiator_rejects_malformed_id() {
        let mut session = immediate_session().await;
        assert_matches!(
            session
                .create_initiator("fc", "not-hex", InitiatorType::Wwn)
                .await,
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            session
                .create_initiator("", "iqn.2001-04.com.example:h", InitiatorType::Iscsi)
                .await,
            Err(Error::InvalidArgument(_))
        );
        assert!(session.list_initiators().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_initiator() {
        let mut session = immediate_session().await;
        let initiator = session
            .create_initiator("fc", "500a0981891b8dc5", InitiatorType::Wwn)
            .await
            .unwrap();

        session.delete_initiator(&initiator).await.unwrap();
        assert!(session.list_initiators().await.unwrap().is_empty());
        assert_matches!(
            session.delete_initiator(&initiator).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_create_volume_through_job() {
        let (mut session, waiter) = deferred_session().await;
        let pool = session.list_pools().await.unwrap().remove(0);

        let job = started(
            session
                .create_volume(&pool, "test", 20_000_000, ProvisionKind::Default)
                .await
                .unwrap(),
        );
        let volume = session.wait_for(job, &waiter).await.unwrap();
        assert!(volume.block_size * volume.block_count >= 20_000_000);
        assert!(session
            .list_volumes()
            .await
            .unwrap()
            .iter()
            .any(|v| v.id == volume.id));
    }

    #[tokio::test]
    async fn test_delete_volume_through_job() {
        let (mut session, waiter) = deferred_session().await;
        let pool = session.list_pools().await.unwrap().remove(0);
        let job = started(
            session
                .create_volume(&pool, "doomed", 1 << 20, ProvisionKind::Thin)
                .await
                .unwrap(),
        );
        let volume = session.wait_for(job, &waiter).await.unwrap();

        let job = started(session.delete_volume(&volume).await.unwrap());
        // Still listed until the job completes.
        assert_eq!(session.list_volumes().await.unwrap().len(), 1);

        session.wait_for(job, &waiter).await.unwrap();
        assert!(session
            .list_volumes()
            .await
            .unwrap()
            .iter()
            .all(|v| v.id != volume.id));
        let after = session.list_pools().await.unwrap().remove(0);
        assert_eq!(after.free_bytes, after.total_bytes);
    }

    #[tokio::test]
    async fn test_resize_and_replicate_through_jobs() {
        let (mut session, waiter) = deferred_session().await;
        let pools = session.list_pools().await.unwrap();
        let job = started(
            session
                .create_volume(&pools[0], "src", 1 << 20, ProvisionKind::Default)
                .await
                .unwrap(),
        );
        let volume = session.wait_for(job, &waiter).await.unwrap();

        let job = started(session.resize_volume(&volume, 4 << 20).await.unwrap());
        let grown = session.wait_for(job, &waiter).await.unwrap();
        assert_eq!(grown.id, volume.id);
        assert_eq!(grown.size_bytes(), 4 << 20);

        let job = started(
            session
                .replicate_volume(Some(&pools[1]), ReplicationKind::Copy, &grown, "copy")
                .await
                .unwrap(),
        );
        let copy = session.wait_for(job, &waiter).await.unwrap();
        assert_eq!(copy.pool_id, pools[1].id);
        assert_eq!(copy.size_bytes(), grown.size_bytes());
        assert_eq!(session.list_volumes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replicate_fails_when_source_vanishes() {
        let (mut session, waiter) = deferred_session().await;
        let pool = session.list_pools().await.unwrap().remove(0);
        let job = started(
            session
                .create_volume(&pool, "src", 1 << 20, ProvisionKind::Default)
                .await
                .unwrap(),
        );
        let source = session.wait_for(job, &waiter).await.unwrap();

        // The delete is submitted first, so it lands before the copy.
        let delete = started(session.delete_volume(&source).await.unwrap());
        let replicate = started(
            session
                .replicate_volume(None, ReplicationKind::Clone, &source, "copy")
                .await
                .unwrap(),
        );
        let reserved = session.list_pools().await.unwrap().remove(0);
        assert_eq!(reserved.free_bytes, reserved.total_bytes - 2 * (1 << 20));

        let err = session.wait_for(replicate, &waiter).await.unwrap_err();
        let record = assert_matches!(err, Error::JobFailed { record, .. } => record);
        assert_eq!(record.kind, ErrorKind::NotFound);
        session.wait_for(delete, &waiter).await.unwrap();

        assert!(session.list_volumes().await.unwrap().is_empty());
        let after = session.list_pools().await.unwrap().remove(0);
        assert_eq!(after.free_bytes, after.total_bytes);
    }
}
