//! In-memory index of active backups and restores.
//!
//! The database stays authoritative. Entries are added when a record is
//! created, kept current on every transition and evicted at the terminal
//! state, so status polls for running work avoid a database round-trip.
//! Per-target claims enforce that a target runs one operation at a time.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::backup_artifact::BackupArtifact;
use crate::models::restore_job::RestoreJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    Backup,
    Restore,
}

/// Exclusive hold on a target. Released when dropped.
#[derive(Debug)]
pub struct TargetClaim {
    claims: Arc<DashMap<String, ClaimKind>>,
    target_id: String,
}

impl Drop for TargetClaim {
    fn drop(&mut self) {
        self.claims.remove(&self.target_id);
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    backups: Arc<DashMap<String, BackupArtifact>>,
    restores: Arc<DashMap<String, RestoreJob>>,
    claims: Arc<DashMap<String, ClaimKind>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `target_id` for `kind`. On conflict returns the kind of the
    /// operation already holding the target.
    pub fn claim(&self, target_id: &str, kind: ClaimKind) -> Result<TargetClaim, ClaimKind> {
        match self.claims.entry(target_id.to_string()) {
            Entry::Occupied(held) => Err(*held.get()),
            Entry::Vacant(slot) => {
                slot.insert(kind);
                Ok(TargetClaim {
                    claims: self.claims.clone(),
                    target_id: target_id.to_string(),
                })
            }
        }
    }

    pub fn claimed_by(&self, target_id: &str) -> Option<ClaimKind> {
        self.claims.get(target_id).map(|c| *c)
    }

    pub fn track_backup(&self, artifact: BackupArtifact) {
        self.backups.insert(artifact.id.clone(), artifact);
    }

    pub fn update_backup<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut BackupArtifact),
    {
        if let Some(mut entry) = self.backups.get_mut(id) {
            f(entry.value_mut());
        }
    }

    pub fn backup(&self, id: &str) -> Option<BackupArtifact> {
        self.backups.get(id).map(|e| e.value().clone())
    }

    pub fn evict_backup(&self, id: &str) {
        self.backups.remove(id);
    }

    pub fn active_backups(&self) -> usize {
        self.backups.len()
    }

    pub fn track_restore(&self, job: RestoreJob) {
        self.restores.insert(job.id.clone(), job);
    }

    pub fn update_restore<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut RestoreJob),
    {
        if let Some(mut entry) = self.restores.get_mut(id) {
            f(entry.value_mut());
        }
    }

    pub fn restore(&self, id: &str) -> Option<RestoreJob> {
        self.restores.get(id).map(|e| e.value().clone())
    }

    pub fn evict_restore(&self, id: &str) {
        self.restores.remove(id);
    }

    pub fn active_restores(&self) -> usize {
        self.restores.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let registry = JobRegistry::new();

        let claim = registry.claim("site", ClaimKind::Backup).unwrap();
        assert_eq!(registry.claimed_by("site"), Some(ClaimKind::Backup));
        assert_eq!(registry.claim("site", ClaimKind::Restore).unwrap_err(), ClaimKind::Backup);
        assert!(registry.claim("other", ClaimKind::Backup).is_ok());

        drop(claim);
        assert!(registry.claimed_by("site").is_none());
        assert!(registry.claim("site", ClaimKind::Restore).is_ok());
    }
}
