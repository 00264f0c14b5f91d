//! Artifact manifest stored next to the content payload.
//!
//! Restore reads the manifest back through the artifact's provider to learn
//! which paths the artifact deletes and what the resulting catalog is.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::backup_artifact::ArtifactKind;
use crate::models::checksum_catalog::Catalog;
use crate::services::change_detector::ChangeSet;

const MANIFEST_VERSION: u32 = 1;
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub version: u32,
    pub artifact_id: String,
    pub target_id: String,
    pub kind: ArtifactKind,
    pub parent_id: Option<String>,
    pub changes: ChangeSet,
    /// Complete catalog after this artifact is applied.
    pub checksums: Catalog,
    /// Exclude globs in force when the catalog was taken. Paths matching
    /// them are not tracked and must survive a restore.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactManifest {
    pub fn new(
        artifact_id: &str,
        target_id: &str,
        kind: ArtifactKind,
        parent_id: Option<String>,
        changes: ChangeSet,
        checksums: Catalog,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            artifact_id: artifact_id.to_string(),
            target_id: target_id.to_string(),
            kind,
            parent_id,
            changes,
            checksums,
            exclude_patterns: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn encode(&self) -> anyhow::Result<Bytes> {
        let json = serde_json::to_vec(self)?;
        let compressed = zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)?;
        Ok(Bytes::from(compressed))
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let json = zstd::decode_all(data)?;
        let manifest: ArtifactManifest = serde_json::from_slice(&json)?;
        if manifest.version != MANIFEST_VERSION {
            anyhow::bail!("unsupported manifest version {}", manifest.version);
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::catalog;

    #[test]
    fn test_decode_rejects_uncompressed_input() {
        assert!(ArtifactManifest::decode(b"{\"version\":1}").is_err());
    }

    #[test]
    fn test_manifest_keeps_deleted_paths() -> anyhow::Result<()> {
        let changes = ChangeSet {
            added: vec![],
            modified: vec![],
            deleted: vec!["b".into()],
        };
        let manifest = ArtifactManifest::new(
            "i2",
            "site",
            ArtifactKind::Incremental,
            Some("i1".into()),
            changes,
            catalog(&[("a", "2"), ("c", "1")]),
        )
        .with_exclude_patterns(vec!["uploads/**".into()]);
        let decoded = ArtifactManifest::decode(&manifest.encode()?)?;
        assert_eq!(decoded.changes.deleted, vec!["b"]);
        assert_eq!(decoded.exclude_patterns, vec!["uploads/**"]);
        assert_eq!(decoded.parent_id.as_deref(), Some("i1"));
        assert_eq!(decoded.checksums.len(), 2);
        Ok(())
    }
}
