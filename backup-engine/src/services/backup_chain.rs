//! Resolution of an artifact into the ordered chain needed to restore it.

use rusqlite::Connection;
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};
use crate::models::backup_artifact::{self, ArtifactKind, BackupArtifact};

/// Walks parent links from `artifact` back to its full backup.
///
/// The result starts with the full artifact and ends with `artifact`. A
/// dangling parent reference, a cycle, a parent owned by another target or
/// an incremental without a parent fails with `ChainBroken`; the chain is
/// never truncated.
pub fn build_chain(conn: &Connection, artifact: &BackupArtifact) -> EngineResult<Vec<BackupArtifact>> {
    resolve_chain(artifact, |id| backup_artifact::find_by_id(conn, id))
}

pub fn resolve_chain<F>(artifact: &BackupArtifact, mut lookup: F) -> EngineResult<Vec<BackupArtifact>>
where
    F: FnMut(&str) -> anyhow::Result<Option<BackupArtifact>>,
{
    let mut chain = vec![artifact.clone()];
    let mut seen = HashSet::from([artifact.id.clone()]);

    loop {
        let current = &chain[chain.len() - 1];
        let parent_id = match (current.kind, current.parent_id.as_deref()) {
            (ArtifactKind::Full, None) => break,
            (ArtifactKind::Full, Some(parent_id)) => {
                return Err(EngineError::ChainBroken(format!(
                    "full artifact {} unexpectedly references parent {}",
                    current.id, parent_id
                )));
            }
            (ArtifactKind::Incremental, None) => {
                return Err(EngineError::ChainBroken(format!(
                    "incremental artifact {} has no parent",
                    current.id
                )));
            }
            (ArtifactKind::Incremental, Some(parent_id)) => parent_id.to_string(),
        };

        if !seen.insert(parent_id.clone()) {
            return Err(EngineError::ChainBroken(format!(
                "cycle detected at artifact {}",
                parent_id
            )));
        }

        let parent = lookup(&parent_id)?.ok_or_else(|| {
            EngineError::ChainBroken(format!(
                "artifact {} references missing parent {}",
                current.id, parent_id
            ))
        })?;

        if parent.target_id != current.target_id {
            return Err(EngineError::ChainBroken(format!(
                "artifact {} of target {} references parent {} of target {}",
                current.id, current.target_id, parent.id, parent.target_id
            )));
        }

        chain.push(parent);
    }

    chain.reverse();
    Ok(chain)
}
