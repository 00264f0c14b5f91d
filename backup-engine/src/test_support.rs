//! Fixtures shared by the engine's unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::watch;

use crate::capabilities::{ChecksumReporter, ContentApplier, ContentCollector, RestoreStep, SiteCapabilities};
use crate::config::EngineConfig;
use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate::migrate;
use crate::models::backup_artifact::{self, ArtifactKind, BackupArtifact, ChangeCounts, NewArtifact};
use crate::models::checksum_catalog::{self, Catalog};
use crate::models::restore_job::RestoreJob;
use crate::models::target::{self, CreateTargetRequest, ManagedTarget};
use crate::services::backup_orchestrator::get_backup_status;
use crate::services::change_detector::ChangeSet;
use crate::services::restore_orchestrator::get_restore_status;
use crate::state::EngineState;
use crate::storage::{object_key, ArtifactManifest, MemoryObjectStore, ObjectStore, StorageRegistry, CONTENT_OBJECT, MANIFEST_OBJECT};

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

pub fn catalog(entries: &[(&str, &str)]) -> Catalog {
    entries
        .iter()
        .map(|(path, checksum)| (path.to_string(), checksum.to_string()))
        .collect()
}

pub struct TestDb {
    _dir: TempDir,
    pub pool: DbPool,
}

impl TestDb {
    pub fn new() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let db_path = dir.path().join("engine.db");
        let pool = create_pool(&db_path.to_string_lossy())?;
        migrate(&pool)?;
        Ok(Self { _dir: dir, pool })
    }

    pub fn with_target(target_id: &str) -> anyhow::Result<Self> {
        let db = Self::new()?;
        {
            let conn = db.pool.get()?;
            target::create(
                &conn,
                &CreateTargetRequest {
                    id: Some(target_id.to_string()),
                    name: format!("{} site", target_id),
                    root_path: format!("/srv/{}", target_id),
                },
            )?;
        }
        Ok(db)
    }

    pub fn completed_full(&self, conn: &Connection, target_id: &str, completed_at: DateTime<Utc>) -> anyhow::Result<BackupArtifact> {
        self.completed_artifact(conn, target_id, ArtifactKind::Full, None, &Catalog::new(), completed_at)
    }

    /// Inserts an artifact that was created and completed at `completed_at`.
    pub fn completed_artifact(
        &self,
        conn: &Connection,
        target_id: &str,
        kind: ArtifactKind,
        parent_id: Option<&str>,
        checksums: &Catalog,
        completed_at: DateTime<Utc>,
    ) -> anyhow::Result<BackupArtifact> {
        let artifact = backup_artifact::create(
            conn,
            &NewArtifact {
                target_id: target_id.to_string(),
                kind,
                parent_id: parent_id.map(str::to_string),
                provider: "primary".to_string(),
                change_counts: ChangeCounts::default(),
                created_at: completed_at,
            },
        )?;
        checksum_catalog::store(conn, &artifact.id, checksums)?;
        backup_artifact::update_completion(conn, &artifact.id, 0, &completed_at)?;
        backup_artifact::find_by_id(conn, &artifact.id)?.ok_or_else(|| anyhow::anyhow!("artifact vanished"))
    }
}

#[derive(Default)]
struct FakeSiteState {
    catalog: Catalog,
    unreachable: bool,
    last_excludes: Vec<String>,
    applied: Vec<String>,
    fail_apply_at: Option<usize>,
}

/// In-memory stand-in for a site agent. Collection and application can be
/// held open to keep an operation in flight.
pub struct FakeSite {
    inner: Mutex<FakeSiteState>,
    collect_gate: watch::Sender<bool>,
    apply_gate: watch::Sender<bool>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FakeSiteState::default()),
            collect_gate: watch::Sender::new(false),
            apply_gate: watch::Sender::new(false),
        }
    }

    pub fn set_catalog(&self, catalog: Catalog) {
        self.inner.lock().unwrap().catalog = catalog;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unwrap().unreachable = unreachable;
    }

    pub fn fail_apply_at(&self, index: usize) {
        self.inner.lock().unwrap().fail_apply_at = Some(index);
    }

    pub fn last_excludes(&self) -> Vec<String> {
        self.inner.lock().unwrap().last_excludes.clone()
    }

    /// Artifact ids applied so far, in order.
    pub fn applied(&self) -> Vec<String> {
        self.inner.lock().unwrap().applied.clone()
    }

    pub fn hold_collection(&self) {
        self.collect_gate.send_replace(true);
    }

    pub fn release_collection(&self) {
        self.collect_gate.send_replace(false);
    }

    pub fn hold_apply(&self) {
        self.apply_gate.send_replace(true);
    }

    pub fn release_apply(&self) {
        self.apply_gate.send_replace(false);
    }

    fn check_reachable(&self) -> anyhow::Result<()> {
        if self.inner.lock().unwrap().unreachable {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

async fn wait_open(gate: &watch::Sender<bool>) {
    let mut rx = gate.subscribe();
    let _ = rx.wait_for(|held| !*held).await;
}

#[async_trait]
impl ChecksumReporter for FakeSite {
    async fn current_checksums(&self, _target: &ManagedTarget, exclude_patterns: &[String]) -> anyhow::Result<Catalog> {
        self.check_reachable()?;
        let mut inner = self.inner.lock().unwrap();
        inner.last_excludes = exclude_patterns.to_vec();
        Ok(inner.catalog.clone())
    }
}

#[async_trait]
impl ContentCollector for FakeSite {
    async fn collect(&self, _target: &ManagedTarget, paths: &[String]) -> anyhow::Result<Bytes> {
        wait_open(&self.collect_gate).await;
        self.check_reachable()?;
        Ok(Bytes::from(paths.join("\n")))
    }
}

#[async_trait]
impl ContentApplier for FakeSite {
    async fn apply(&self, _target: &ManagedTarget, step: &RestoreStep) -> anyhow::Result<()> {
        wait_open(&self.apply_gate).await;
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_apply_at == Some(step.index) {
            anyhow::bail!("write failed at step {}", step.index);
        }
        inner.applied.push(step.artifact.id.clone());
        Ok(())
    }
}

/// Object store whose writes always fail.
pub struct FailingObjectStore;

#[async_trait]
impl ObjectStore for FailingObjectStore {
    async fn put(&self, key: &str, _data: Bytes) -> anyhow::Result<String> {
        anyhow::bail!("bucket rejected {}", key)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Bytes> {
        anyhow::bail!("object not found: {}", key)
    }

    async fn delete(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Engine wired to a temporary database, the fake site and an in-memory
/// `primary` provider. Target `site` is registered.
pub struct TestEngine {
    pub db: TestDb,
    pub site: Arc<FakeSite>,
    pub primary: Arc<MemoryObjectStore>,
    pub state: Arc<EngineState>,
}

impl TestEngine {
    pub fn new() -> anyhow::Result<Self> {
        let primary = Arc::new(MemoryObjectStore::new());
        let storage = StorageRegistry::new("primary").with_provider("primary", primary.clone());
        Self::build(primary, storage)
    }

    pub fn with_failing_storage() -> anyhow::Result<Self> {
        let primary = Arc::new(MemoryObjectStore::new());
        let storage = StorageRegistry::new("primary").with_provider("primary", Arc::new(FailingObjectStore));
        Self::build(primary, storage)
    }

    fn build(primary: Arc<MemoryObjectStore>, storage: StorageRegistry) -> anyhow::Result<Self> {
        let db = TestDb::with_target("site")?;
        let site = Arc::new(FakeSite::new());
        let state = Arc::new(EngineState::new(
            db.pool.clone(),
            EngineConfig::default(),
            storage,
            SiteCapabilities::from_agent(site.clone()),
        ));
        Ok(Self { db, site, primary, state })
    }

    /// Writes placeholder objects for artifacts inserted straight into the
    /// database, so they can be restored.
    pub async fn seed_objects(&self, artifacts: &[&BackupArtifact]) -> anyhow::Result<()> {
        for artifact in artifacts {
            let kind = artifact.kind.as_str();
            let manifest = ArtifactManifest::new(
                &artifact.id,
                &artifact.target_id,
                artifact.kind,
                artifact.parent_id.clone(),
                ChangeSet::default(),
                Catalog::new(),
            );
            self.primary
                .put(&object_key(&artifact.target_id, kind, &artifact.id, CONTENT_OBJECT), Bytes::new())
                .await?;
            self.primary
                .put(&object_key(&artifact.target_id, kind, &artifact.id, MANIFEST_OBJECT), manifest.encode()?)
                .await?;
        }
        Ok(())
    }
}

const WAIT_ATTEMPTS: usize = 500;

/// Polls until the artifact is terminal and its background task has let go
/// of the target.
pub async fn wait_for_backup(state: &EngineState, artifact_id: &str) -> anyhow::Result<BackupArtifact> {
    for _ in 0..WAIT_ATTEMPTS {
        let artifact = get_backup_status(state, artifact_id).await?;
        if artifact.status.is_terminal() && state.registry.backup(artifact_id).is_none() {
            return Ok(artifact);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    anyhow::bail!("backup {} did not finish", artifact_id)
}

pub async fn wait_for_restore(state: &EngineState, job_id: &str) -> anyhow::Result<RestoreJob> {
    for _ in 0..WAIT_ATTEMPTS {
        let job = get_restore_status(state, job_id).await?;
        if job.status.is_terminal() && state.registry.restore(job_id).is_none() {
            return Ok(job);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    anyhow::bail!("restore {} did not finish", job_id)
}
