//! Site agent for content trees on the local filesystem.
//!
//! The target's `root_path` is the directory being backed up. All file work
//! runs on the blocking pool.

use async_trait::async_trait;
use backup_engine::capabilities::{ChecksumReporter, ContentApplier, ContentCollector, RestoreStep};
use backup_engine::models::backup_artifact::ArtifactKind;
use backup_engine::models::checksum_catalog::Catalog;
use backup_engine::models::target::ManagedTarget;
use bytes::Bytes;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::bundle::{self, BundleEntry};
use crate::fs::walker::{self, WalkOptions};
use crate::utils::{AgentError, Result};

#[derive(Debug, Clone, Default)]
pub struct LocalSiteAgent {
    follow_links: bool,
}

impl LocalSiteAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }
}

fn site_root(target: &ManagedTarget) -> Result<PathBuf> {
    let root = PathBuf::from(&target.root_path);
    if !root.is_dir() {
        return Err(AgentError::RootNotFound(target.root_path.clone()));
    }
    Ok(root)
}

pub fn scan_checksums(root: &Path, options: &WalkOptions) -> Result<Catalog> {
    let mut catalog = Catalog::new();
    for file in walker::walk_directory(root, options)? {
        let checksum = walker::sha256_file(&file.path)?;
        catalog.insert(file.relative_path, checksum);
    }
    Ok(catalog)
}

pub fn collect_bundle(root: &Path, paths: &[String]) -> Result<Bytes> {
    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let full = walker::resolve_under(root, path)?;
        let content = std::fs::read(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AgentError::FileNotFound(path.clone()),
            _ => AgentError::Io(e),
        })?;
        entries.push(BundleEntry {
            path: path.clone(),
            content: Bytes::from(content),
        });
    }
    bundle::encode(&entries)
}

/// Applies one chain element to `root`. A full element replaces the tree:
/// its files are written and every tracked file it does not list is removed.
/// Paths matching the manifest's exclude patterns are left alone. An
/// incremental writes its added and modified files and removes its deleted
/// ones. Written files are verified against the element's catalog.
pub fn apply_step(root: &Path, step: &RestoreStep) -> Result<()> {
    let entries = bundle::decode(&step.content)?;
    let expected = &step.manifest.checksums;

    for entry in &entries {
        let target = walker::resolve_under(root, &entry.path)?;
        if let Some(want) = expected.get(&entry.path) {
            let actual = walker::sha256_bytes(&entry.content);
            if &actual != want {
                return Err(AgentError::ChecksumMismatch {
                    path: entry.path.clone(),
                    expected: want.clone(),
                    actual,
                });
            }
        }
        write_atomic(&target, &entry.content)?;
    }

    match step.artifact.kind {
        ArtifactKind::Full => {
            let keep: HashSet<&str> = expected.keys().map(String::as_str).collect();
            let options = WalkOptions {
                exclude_patterns: step.manifest.exclude_patterns.clone(),
                ..WalkOptions::default()
            };
            for file in walker::walk_directory(root, &options)? {
                if !keep.contains(file.relative_path.as_str()) {
                    std::fs::remove_file(&file.path)?;
                }
            }
        }
        ArtifactKind::Incremental => {
            for path in &step.manifest.changes.deleted {
                let target = walker::resolve_under(root, path)?;
                match std::fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    Ok(())
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".restoring");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl ChecksumReporter for LocalSiteAgent {
    async fn current_checksums(&self, target: &ManagedTarget, exclude_patterns: &[String]) -> anyhow::Result<Catalog> {
        let root = site_root(target)?;
        let options = WalkOptions {
            follow_links: self.follow_links,
            exclude_patterns: exclude_patterns.to_vec(),
        };
        let catalog = tokio::task::spawn_blocking(move || scan_checksums(&root, &options)).await??;
        tracing::debug!(target_id = %target.id, files = catalog.len(), "Checksums computed");
        Ok(catalog)
    }
}

#[async_trait]
impl ContentCollector for LocalSiteAgent {
    async fn collect(&self, target: &ManagedTarget, paths: &[String]) -> anyhow::Result<Bytes> {
        let root = site_root(target)?;
        let paths = paths.to_vec();
        let count = paths.len();
        let bundle = tokio::task::spawn_blocking(move || collect_bundle(&root, &paths)).await??;
        tracing::debug!(target_id = %target.id, files = count, bytes = bundle.len(), "Content collected");
        Ok(bundle)
    }
}

#[async_trait]
impl ContentApplier for LocalSiteAgent {
    async fn apply(&self, target: &ManagedTarget, step: &RestoreStep) -> anyhow::Result<()> {
        let root = PathBuf::from(&target.root_path);
        std::fs::create_dir_all(&root)?;
        let owned = step.clone();
        tokio::task::spawn_blocking(move || apply_step(&root, &owned)).await??;
        tracing::info!(
            target_id = %target.id,
            artifact_id = %step.artifact.id,
            step = step.index + 1,
            of = step.chain_len,
            "Applied restore step"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_engine::models::backup_artifact::{ArtifactStatus, BackupArtifact};
    use backup_engine::services::change_detector::{diff, ChangeSet};
    use backup_engine::storage::ArtifactManifest;
    use std::fs;
    use tempfile::TempDir;

    fn target(root: &Path) -> ManagedTarget {
        ManagedTarget {
            id: "site".into(),
            name: "site".into(),
            root_path: root.to_string_lossy().into_owned(),
            created_at: chrono::Utc::now(),
        }
    }

    fn step(index: usize, kind: ArtifactKind, changes: ChangeSet, checksums: Catalog, content: Bytes) -> RestoreStep {
        step_excluding(index, kind, changes, checksums, content, Vec::new())
    }

    fn step_excluding(
        index: usize,
        kind: ArtifactKind,
        changes: ChangeSet,
        checksums: Catalog,
        content: Bytes,
        exclude_patterns: Vec<String>,
    ) -> RestoreStep {
        let artifact = BackupArtifact {
            id: format!("a{}", index),
            target_id: "site".into(),
            kind,
            parent_id: (kind == ArtifactKind::Incremental).then(|| format!("a{}", index - 1)),
            status: ArtifactStatus::Completed,
            provider: "primary".into(),
            change_counts: changes.counts(),
            size_bytes: content.len() as i64,
            progress_message: String::new(),
            error: None,
            created_at: chrono::Utc::now(),
            completed_at: Some(chrono::Utc::now()),
        };
        let manifest = ArtifactManifest::new(
            &artifact.id,
            "site",
            kind,
            artifact.parent_id.clone(),
            changes,
            checksums,
        )
        .with_exclude_patterns(exclude_patterns);
        RestoreStep {
            index,
            chain_len: 2,
            artifact,
            manifest,
            content,
        }
    }

    #[tokio::test]
    async fn test_backup_and_restore_round_trip_through_agent() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        fs::create_dir_all(source.path().join("wp-content/cache"))?;
        fs::write(source.path().join("index.php"), b"v1")?;
        fs::write(source.path().join("style.css"), b"body{}")?;
        fs::write(source.path().join("wp-content/cache/x.html"), b"cached")?;

        let agent = LocalSiteAgent::new();
        let site = target(source.path());
        let excludes = vec!["wp-content/cache".to_string()];

        let full_catalog = agent.current_checksums(&site, &excludes).await?;
        assert_eq!(full_catalog.len(), 2);
        let full_changes = ChangeSet::everything(&full_catalog);
        let full_content = agent.collect(&site, &full_changes.changed_paths()).await?;

        fs::write(source.path().join("index.php"), b"v2")?;
        fs::remove_file(source.path().join("style.css"))?;
        fs::write(source.path().join("new.txt"), b"fresh")?;

        let inc_catalog = agent.current_checksums(&site, &excludes).await?;
        let inc_changes = diff(&full_catalog, &inc_catalog);
        assert_eq!(inc_changes.counts().total(), 3);
        let inc_content = agent.collect(&site, &inc_changes.changed_paths()).await?;

        let dest = TempDir::new()?;
        fs::write(dest.path().join("stale.txt"), b"remove me")?;
        let restored = target(dest.path());

        agent
            .apply(&restored, &step(0, ArtifactKind::Full, full_changes, full_catalog, full_content))
            .await?;
        assert!(!dest.path().join("stale.txt").exists());
        assert_eq!(fs::read(dest.path().join("style.css"))?, b"body{}");

        agent
            .apply(&restored, &step(1, ArtifactKind::Incremental, inc_changes, inc_catalog.clone(), inc_content))
            .await?;
        assert_eq!(fs::read(dest.path().join("index.php"))?, b"v2");
        assert!(!dest.path().join("style.css").exists());

        let final_catalog = agent.current_checksums(&restored, &[]).await?;
        assert_eq!(final_catalog, inc_catalog);
        Ok(())
    }

    #[tokio::test]
    async fn test_full_restore_keeps_excluded_files() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        fs::create_dir_all(root.path().join("wp-content/uploads/2024"))?;
        fs::write(root.path().join("index.php"), b"v1")?;
        fs::write(root.path().join("wp-content/uploads/2024/photo.jpg"), b"jpeg")?;

        let agent = LocalSiteAgent::new();
        let site = target(root.path());
        let excludes = vec!["wp-content/uploads".to_string()];

        let catalog = agent.current_checksums(&site, &excludes).await?;
        assert_eq!(catalog.len(), 1);
        let changes = ChangeSet::everything(&catalog);
        let content = agent.collect(&site, &changes.changed_paths()).await?;

        fs::write(root.path().join("index.php"), b"v2")?;
        fs::write(root.path().join("leftover.txt"), b"untracked")?;

        agent
            .apply(
                &site,
                &step_excluding(0, ArtifactKind::Full, changes, catalog, content, excludes),
            )
            .await?;
        assert_eq!(fs::read(root.path().join("index.php"))?, b"v1");
        assert!(!root.path().join("leftover.txt").exists());
        assert_eq!(fs::read(root.path().join("wp-content/uploads/2024/photo.jpg"))?, b"jpeg");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_root_and_missing_file() -> anyhow::Result<()> {
        let agent = LocalSiteAgent::new();
        let gone = target(Path::new("/nonexistent/site/root"));
        assert!(agent.current_checksums(&gone, &[]).await.is_err());

        let dir = TempDir::new()?;
        let err = collect_bundle(dir.path(), &["missing.php".to_string()]).unwrap_err();
        assert!(matches!(err, AgentError::FileNotFound(_)));
        Ok(())
    }

    #[test]
    fn test_checksum_mismatch_is_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let content = bundle::encode(&[BundleEntry {
            path: "a.txt".into(),
            content: Bytes::from_static(b"tampered"),
        }])?;
        let mut checksums = Catalog::new();
        checksums.insert("a.txt".into(), walker::sha256_bytes(b"original"));

        let err = apply_step(
            dir.path(),
            &step(0, ArtifactKind::Full, ChangeSet::everything(&checksums), checksums, content),
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::ChecksumMismatch { .. }));
        assert!(!dir.path().join("a.txt").exists());
        Ok(())
    }
}
