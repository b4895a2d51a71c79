//! Ingestion pipeline orchestration.
//!
//! Turns a set of repository files into vector-index updates: chunk every
//! file, skip chunks whose stored hash already matches, embed the rest with
//! bounded parallelism, and batch-upsert through the chunk store. At most
//! one ingestion runs per project at a time, enforced by a TTL lease.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::chunk_text;
use crate::config::{ChunkingConfig, EmbeddingConfig, IngestConfig};
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::{Chunk, EmbeddedChunk, IngestReport};
use crate::store::ChunkStore;

/// Per-project ingestion leases.
///
/// A lease is a `(token, deadline)` marker; its existence while unexpired
/// serializes ingestion for the project. The TTL bounds how long a crashed
/// run can wedge a project, and [`cancel`](LeaseRegistry::cancel) clears a
/// lease early so a long-running ingestion stops at its next batch
/// boundary.
#[derive(Debug)]
pub struct LeaseRegistry {
    leases: Mutex<HashMap<String, (Uuid, Instant)>>,
    ttl: Duration,
}

impl LeaseRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Atomically check-and-set the project lease. An active unexpired
    /// lease means another run owns the project.
    fn acquire(self: &Arc<Self>, project_id: &str) -> Result<LeaseGuard> {
        let token = Uuid::new_v4();
        let mut leases = self.leases.lock().unwrap();

        if let Some((_, deadline)) = leases.get(project_id) {
            if *deadline > Instant::now() {
                return Err(Error::ConcurrencyConflict {
                    project_id: project_id.to_string(),
                });
            }
            // Expired lease: the previous run died. Take over.
            warn!(project_id, "taking over expired ingestion lease");
        }

        leases.insert(project_id.to_string(), (token, Instant::now() + self.ttl));
        Ok(LeaseGuard {
            registry: Arc::clone(self),
            project_id: project_id.to_string(),
            token,
        })
    }

    /// Whether the given run still holds its lease (not cancelled, not
    /// expired and replaced).
    fn holds(&self, project_id: &str, token: Uuid) -> bool {
        let leases = self.leases.lock().unwrap();
        matches!(leases.get(project_id), Some((t, _)) if *t == token)
    }

    /// Clear a project's lease. Returns true when a lease existed. The
    /// owning run notices at its next batch boundary; in-flight batches
    /// complete so no chunk record is half-written.
    pub fn cancel(&self, project_id: &str) -> bool {
        self.leases.lock().unwrap().remove(project_id).is_some()
    }

    fn release(&self, project_id: &str, token: Uuid) {
        let mut leases = self.leases.lock().unwrap();
        // Only the run that owns the lease may clear it; a cancelled run's
        // guard must not release a successor's lease.
        if matches!(leases.get(project_id), Some((t, _)) if *t == token) {
            leases.remove(project_id);
        }
    }
}

/// RAII lease: released on completion or failure.
#[derive(Debug)]
struct LeaseGuard {
    registry: Arc<LeaseRegistry>,
    project_id: String,
    token: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.registry.release(&self.project_id, self.token);
    }
}

/// Drives chunking, hash dedup, embedding, and batched upsert for one
/// project at a time.
pub struct IngestionCoordinator {
    store: ChunkStore,
    embeddings: Arc<dyn EmbeddingClient>,
    chunking: ChunkingConfig,
    embedding_config: EmbeddingConfig,
    leases: Arc<LeaseRegistry>,
}

impl IngestionCoordinator {
    pub fn new(
        store: ChunkStore,
        embeddings: Arc<dyn EmbeddingClient>,
        chunking: ChunkingConfig,
        embedding_config: EmbeddingConfig,
        ingest_config: &IngestConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            chunking,
            embedding_config,
            leases: Arc::new(LeaseRegistry::new(Duration::from_secs(
                ingest_config.lease_ttl_secs,
            ))),
        }
    }

    /// Cancel an in-progress ingestion for a project.
    pub fn cancel(&self, project_id: &str) -> bool {
        self.leases.cancel(project_id)
    }

    /// Ingest the project's current file set.
    ///
    /// `files` is treated as the complete set of files the project has
    /// right now: chunks stored for paths missing from it are pruned.
    /// Per-chunk embedding failures and failed upsert batches are reported
    /// in the result, not fatal: partial ingestion beats total failure.
    pub async fn ingest(
        &self,
        project_id: &str,
        files: &[(String, String)],
    ) -> Result<IngestReport> {
        let guard = self.leases.acquire(project_id)?;
        let run_id = guard.token;
        info!(project_id, %run_id, files = files.len(), "ingestion started");

        let mut report = IngestReport::default();

        // Chunk everything up front; chunking is cheap and deterministic.
        let mut chunks = Vec::new();
        for (path, text) in files {
            for (index, piece) in
                chunk_text(text, self.chunking.max_chars, self.chunking.overlap_chars)
            {
                chunks.push(Chunk::new(project_id, path, index, piece));
            }
        }

        // Compare fresh hashes against what the index already holds.
        let ids: Vec<String> = chunks.iter().map(Chunk::record_id).collect();
        let stored_hashes = self.store.fetch_hashes(&ids).await?;

        let mut pending = Vec::new();
        for chunk in chunks {
            match stored_hashes.get(&chunk.record_id()) {
                Some(stored) if *stored == chunk.hash => report.chunks_skipped += 1,
                _ => pending.push(chunk),
            }
        }
        debug!(
            project_id,
            pending = pending.len(),
            skipped = report.chunks_skipped,
            "hash dedup complete"
        );

        // Embed changed chunks, a bounded number of batches in flight at
        // once so a big push cannot exhaust the provider's rate limits.
        let semaphore = Arc::new(Semaphore::new(self.embedding_config.max_concurrency));
        let mut tasks: JoinSet<(Vec<Chunk>, Result<Vec<Vec<f32>>>)> = JoinSet::new();

        for batch in pending.chunks(self.embedding_config.batch_size) {
            if !self.leases.holds(project_id, run_id) {
                report
                    .errors
                    .push(format!("ingestion cancelled for project '{project_id}'"));
                break;
            }

            let batch: Vec<Chunk> = batch.to_vec();
            let embeddings = Arc::clone(&self.embeddings);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                let result = embeddings.embed(&texts).await;
                (batch, result)
            });
        }

        let mut embedded = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (batch, result) = joined.expect("embedding task panicked");
            match result {
                Ok(vectors) => {
                    for (chunk, vector) in batch.into_iter().zip(vectors) {
                        embedded.push(EmbeddedChunk { chunk, vector });
                    }
                }
                Err(e) => {
                    // Retries already happened inside the client; report
                    // each chunk so a follow-up run can be scheduled.
                    warn!(project_id, error = %e, chunks = batch.len(), "embedding batch exhausted retries");
                    for chunk in batch {
                        report
                            .errors
                            .push(format!("embedding failed for {}: {e}", chunk.record_id()));
                    }
                }
            }
        }

        if self.leases.holds(project_id, run_id) {
            let upsert = self.store.upsert(&embedded).await;
            report.chunks_updated = upsert.chunks_committed;
            for failure in upsert.failed_batches {
                report.errors.push(format!(
                    "upsert batch {} ({} chunks) failed: {}",
                    failure.batch_index, failure.chunks, failure.message
                ));
            }

            self.prune_removed(project_id, &ids, &mut report).await;
        }

        info!(
            project_id,
            %run_id,
            updated = report.chunks_updated,
            skipped = report.chunks_skipped,
            pruned = report.chunks_pruned,
            errors = report.errors.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// Delete stored chunks whose `(path, chunk_index)` no longer exists in
    /// the ingested file set (removed files, or tail chunks of files that
    /// shrank).
    async fn prune_removed(
        &self,
        project_id: &str,
        current_ids: &[String],
        report: &mut IngestReport,
    ) {
        let keep: HashSet<&str> = current_ids.iter().map(String::as_str).collect();

        let stored_ids = match self.store.list_ids(project_id).await {
            Ok(ids) => ids,
            Err(e) => {
                report
                    .errors
                    .push(format!("could not list stored chunks for pruning: {e}"));
                return;
            }
        };

        let stale: Vec<String> = stored_ids
            .into_iter()
            .filter(|id| !keep.contains(id.as_str()))
            .collect();

        if stale.is_empty() {
            return;
        }

        match self.store.delete(&stale).await {
            Ok(()) => {
                debug!(project_id, pruned = stale.len(), "pruned stale chunks");
                report.chunks_pruned = stale.len() as u64;
            }
            Err(e) => report
                .errors
                .push(format!("pruning {} stale chunks failed: {e}", stale.len())),
        }
    }
}
