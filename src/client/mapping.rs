//! Access Mapping
//!
//! Grants and revokes initiator access to volumes, and answers the two
//! reverse questions: which volumes an initiator reaches, and which
//! initiators reach a volume. Answers are derived from the backend's mapping
//! table at query time, so they reflect every grant, revoke and cascade
//! already applied.

use crate::client::session::Session;
use crate::domain::ports::{AccessMapping, AccessMode, Initiator, Outcome, Volume};
use crate::error::{Error, Result};
use std::collections::HashSet;
use tracing::info;

impl Session {
    /// Allow `initiator` to reach `volume` with `mode`
    ///
    /// Granting an existing pair replaces its mode. The mapping exists once
    /// the call returns `Done`, or once the returned job completes.
    pub async fn grant_access(
        &mut self,
        initiator: &Initiator,
        volume: &Volume,
        mode: AccessMode,
    ) -> Result<Outcome<()>> {
        let backend = self.backend();
        let result = self
            .exchange("access_grant", backend.access_grant(initiator, volume, mode))
            .await;
        if let Ok(outcome) = &result {
            info!(
                "Grant {} {} -> {}: {}",
                mode,
                initiator.id,
                volume.id,
                outcome.status()
            );
        }
        self.note("grant_access", result)
    }

    /// Remove the mapping between `initiator` and `volume`
    pub async fn revoke_access(&mut self, initiator: &Initiator, volume: &Volume) -> Result<()> {
        let backend = self.backend();
        let result = self
            .exchange("access_revoke", backend.access_revoke(initiator, volume))
            .await;
        if result.is_ok() {
            info!("Revoked {} -> {}", initiator.id, volume.id);
        }
        self.note("revoke_access", result)
    }

    pub async fn list_access_mappings(&mut self) -> Result<Vec<AccessMapping>> {
        let backend = self.backend();
        let result = self
            .exchange("access_mappings", backend.access_mappings())
            .await;
        self.note("list_access_mappings", result)
    }

    /// Volumes `initiator` currently has any access to
    pub async fn volumes_accessible_by(&mut self, initiator: &Initiator) -> Result<Vec<Volume>> {
        let backend = self.backend();
        let result = self
            .exchange("volumes_accessible_by", async {
                let granted: HashSet<String> = backend
                    .access_mappings()
                    .await?
                    .into_iter()
                    .filter(|m| m.initiator_id == initiator.id)
                    .map(|m| m.volume_id)
                    .collect();
                let volumes: Vec<Volume> = backend
                    .volumes()
                    .await?
                    .into_iter()
                    .filter(|v| granted.contains(&v.id))
                    .collect();
                Ok::<_, Error>(volumes)
            })
            .await;
        self.note("volumes_accessible_by", result)
    }

    /// Initiators currently granted any access to `volume`
    pub async fn initiators_granted_to(&mut self, volume: &Volume) -> Result<Vec<Initiator>> {
        let backend = self.backend();
        let result = self
            .exchange("initiators_granted_to", async {
                let granted: HashSet<String> = backend
                    .access_mappings()
                    .await?
                    .into_iter()
                    .filter(|m| m.volume_id == volume.id)
                    .map(|m| m.initiator_id)
                    .collect();
                let initiators: Vec<Initiator> = backend
                    .initiators()
                    .await?
                    .into_iter()
                    .filter(|i| granted.contains(&i.id))
                    .collect();
                Ok::<_, Error>(initiators)
            })
            .await;
        self.note("initiators_granted_to", result)
    }
}
