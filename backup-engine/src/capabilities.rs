//! Capabilities the engine consumes from the managed target's side.
//!
//! Change reporting, content collection and restore application are all
//! provided by an agent that sits next to the site. The engine only drives
//! them; it never touches site content itself.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::models::backup_artifact::BackupArtifact;
use crate::models::checksum_catalog::Catalog;
use crate::models::target::ManagedTarget;
use crate::storage::ArtifactManifest;

#[async_trait]
pub trait ChecksumReporter: Send + Sync {
    /// Current path → checksum catalog of the target. Paths matching any of
    /// `exclude_patterns` are left out before checksums are computed.
    async fn current_checksums(
        &self,
        target: &ManagedTarget,
        exclude_patterns: &[String],
    ) -> anyhow::Result<Catalog>;
}

#[async_trait]
pub trait ContentCollector: Send + Sync {
    /// Collects the content of `paths` into a single payload.
    async fn collect(&self, target: &ManagedTarget, paths: &[String]) -> anyhow::Result<Bytes>;
}

/// One element of a restore chain, handed to the applier in chain order.
#[derive(Debug, Clone)]
pub struct RestoreStep {
    pub index: usize,
    pub chain_len: usize,
    pub artifact: BackupArtifact,
    pub manifest: ArtifactManifest,
    pub content: Bytes,
}

#[async_trait]
pub trait ContentApplier: Send + Sync {
    /// Applies one chain element. A full artifact replaces the target's
    /// content state; an incremental applies its delta on top.
    async fn apply(&self, target: &ManagedTarget, step: &RestoreStep) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SiteCapabilities {
    pub reporter: Arc<dyn ChecksumReporter>,
    pub collector: Arc<dyn ContentCollector>,
    pub applier: Arc<dyn ContentApplier>,
}

impl SiteCapabilities {
    /// Uses one agent for all three capabilities.
    pub fn from_agent<A>(agent: Arc<A>) -> Self
    where
        A: ChecksumReporter + ContentCollector + ContentApplier + 'static,
    {
        Self {
            reporter: agent.clone(),
            collector: agent.clone(),
            applier: agent,
        }
    }
}
