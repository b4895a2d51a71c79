//! Vector index abstraction and the typed chunk store on top of it.
//!
//! The [`VectorIndex`] trait defines the raw operations the pipeline needs
//! from an external vector index, enabling pluggable backends (Pinecone over
//! HTTP, in-memory for tests). Implementations must be `Send + Sync`.
//!
//! [`ChunkStore`] owns the policy: fixed-size upsert batches that isolate
//! partial failures, and project-scoped queries that can never leak chunks
//! across tenants.

pub mod memory;
pub mod pinecone;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{EmbeddedChunk, ScoredChunk};

/// Raw operations against an external vector index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Write vectors + metadata, atomic per item |
/// | [`query`](VectorIndex::query) | Similarity search filtered to one project |
/// | [`fetch_hashes`](VectorIndex::fetch_hashes) | Stored content hashes by record id |
/// | [`list_ids`](VectorIndex::list_ids) | All record ids for a project |
/// | [`delete`](VectorIndex::delete) | Remove records by id |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: &[EmbeddedChunk]) -> Result<()>;

    /// Similarity search scoped to `project_id`, best matches first.
    async fn query(
        &self,
        vector: &[f32],
        project_id: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Map of record id → stored content hash for the given ids. Ids with
    /// no stored record are absent from the map.
    async fn fetch_hashes(&self, ids: &[String]) -> Result<HashMap<String, String>>;

    async fn list_ids(&self, project_id: &str) -> Result<Vec<String>>;

    async fn delete(&self, ids: &[String]) -> Result<()>;
}

/// One failed upsert batch. Earlier committed batches are unaffected.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Zero-based ordinal of the batch within this upsert call.
    pub batch_index: usize,
    /// Number of chunks the batch carried.
    pub chunks: usize,
    pub message: String,
}

/// Outcome of a batched upsert.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    /// Chunks written across all committed batches.
    pub chunks_committed: u64,
    pub failed_batches: Vec<BatchFailure>,
}

/// Typed wrapper over a [`VectorIndex`].
///
/// Holds the upsert batch size and enforces the per-project isolation
/// contract on queries.
#[derive(Clone)]
pub struct ChunkStore {
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl ChunkStore {
    pub fn new(index: Arc<dyn VectorIndex>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        Self { index, batch_size }
    }

    /// Upsert chunks in fixed-size batches. No-op on empty input.
    ///
    /// A batch failure does not discard earlier committed batches; the
    /// report says which batches failed so the caller can schedule a retry.
    pub async fn upsert(&self, records: &[EmbeddedChunk]) -> UpsertReport {
        let mut report = UpsertReport::default();
        if records.is_empty() {
            return report;
        }

        for (batch_index, batch) in records.chunks(self.batch_size).enumerate() {
            match self.index.upsert(batch).await {
                Ok(()) => {
                    report.chunks_committed += batch.len() as u64;
                    debug!(batch_index, chunks = batch.len(), "upsert batch committed");
                }
                Err(e) => {
                    warn!(batch_index, chunks = batch.len(), error = %e, "upsert batch failed");
                    report.failed_batches.push(BatchFailure {
                        batch_index,
                        chunks: batch.len(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Similarity query scoped to one project, best matches first, ties in
    /// index order.
    ///
    /// The backend already filters by project; the re-check here turns any
    /// backend filter bug into dropped rows instead of cross-project
    /// leakage, which would poison answers with unrelated code.
    pub async fn query(
        &self,
        vector: &[f32],
        project_id: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut results = self.index.query(vector, project_id, top_k).await?;

        let before = results.len();
        results.retain(|scored| scored.chunk.project_id == project_id);
        if results.len() != before {
            warn!(
                project_id,
                dropped = before - results.len(),
                "index returned chunks outside the requested project"
            );
        }

        // Stable sort: equal scores keep the backend's insertion order.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    /// Stored content hashes for the given record ids, fetched in batches.
    pub async fn fetch_hashes(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let mut hashes = HashMap::with_capacity(ids.len());
        for batch in ids.chunks(self.batch_size) {
            hashes.extend(self.index.fetch_hashes(batch).await?);
        }
        Ok(hashes)
    }

    pub async fn list_ids(&self, project_id: &str) -> Result<Vec<String>> {
        self.index.list_ids(project_id).await
    }

    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for batch in ids.chunks(self.batch_size) {
            self.index.delete(batch).await?;
        }
        Ok(())
    }
}

/// Build the configured index backend.
///
/// Fails fast with a configuration error when the index location or
/// credentials are unresolved; the store must never operate against an
/// unresolved index.
pub fn create_index(config: &crate::config::IndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(memory::InMemoryIndex::new())),
        "pinecone" => Ok(Arc::new(pinecone::PineconeIndex::from_config(config)?)),
        other => Err(Error::Configuration(format!(
            "unknown index provider: '{}'",
            other
        ))),
    }
}
