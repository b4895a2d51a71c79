//! In-memory [`VectorIndex`] implementation for tests and local runs.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`; queries are
//! brute-force cosine similarity over everything stored for the project.
//! Nothing survives process exit.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{EmbeddedChunk, ScoredChunk};

use super::VectorIndex;

pub struct InMemoryIndex {
    records: RwLock<Vec<EmbeddedChunk>>,
    upsert_calls: AtomicUsize,
    /// Zero-based upsert-call ordinals that should fail, for exercising
    /// partial-batch behavior in tests.
    failing_upsert_calls: RwLock<HashSet<usize>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            upsert_calls: AtomicUsize::new(0),
            failing_upsert_calls: RwLock::new(HashSet::new()),
        }
    }

    /// Number of upsert calls seen so far.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Make the given upsert call ordinals (zero-based) fail with a
    /// transient error.
    pub fn fail_upsert_calls(&self, ordinals: impl IntoIterator<Item = usize>) {
        self.failing_upsert_calls
            .write()
            .unwrap()
            .extend(ordinals);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: &[EmbeddedChunk]) -> Result<()> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_upsert_calls.read().unwrap().contains(&call) {
            return Err(Error::transient("memory-index", "injected upsert failure"));
        }

        let mut stored = self.records.write().unwrap();
        for record in records {
            let id = record.chunk.record_id();
            stored.retain(|existing| existing.chunk.record_id() != id);
            stored.push(record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        project_id: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.records.read().unwrap();
        let mut results: Vec<ScoredChunk> = stored
            .iter()
            .filter(|record| record.chunk.project_id == project_id)
            .map(|record| ScoredChunk {
                chunk: record.chunk.clone(),
                score: cosine_sim(vector, &record.vector),
            })
            .collect();

        // Stable sort keeps insertion order for tied scores.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn fetch_hashes(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let stored = self.records.read().unwrap();
        Ok(stored
            .iter()
            .filter(|record| wanted.contains(record.chunk.record_id().as_str()))
            .map(|record| (record.chunk.record_id(), record.chunk.hash.clone()))
            .collect())
    }

    async fn list_ids(&self, project_id: &str) -> Result<Vec<String>> {
        let stored = self.records.read().unwrap();
        Ok(stored
            .iter()
            .filter(|record| record.chunk.project_id == project_id)
            .map(|record| record.chunk.record_id())
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut stored = self.records.write().unwrap();
        stored.retain(|record| !doomed.contains(record.chunk.record_id().as_str()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn record(project: &str, path: &str, index: i64, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk::new(project, path, index, format!("body of {path}#{index}")),
            vector,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_key() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[record("p1", "a.rs", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        let updated = EmbeddedChunk {
            chunk: Chunk::new("p1", "a.rs", 0, "new text".into()),
            vector: vec![0.0, 1.0],
        };
        index.upsert(&[updated]).await.unwrap();

        assert_eq!(index.len(), 1);
        let results = index.query(&[0.0, 1.0], "p1", 1).await.unwrap();
        assert_eq!(results[0].chunk.text, "new text");
    }

    #[tokio::test]
    async fn test_fetch_hashes_skips_missing() {
        let index = InMemoryIndex::new();
        let stored = record("p1", "a.rs", 0, vec![1.0]);
        let expected_hash = stored.chunk.hash.clone();
        index.upsert(&[stored]).await.unwrap();

        let hashes = index
            .fetch_hashes(&["p1:a.rs#0".to_string(), "p1:missing.rs#0".to_string()])
            .await
            .unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes["p1:a.rs#0"], expected_hash);
    }

    #[tokio::test]
    async fn test_list_and_delete_scoped_by_project() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                record("p1", "a.rs", 0, vec![1.0]),
                record("p1", "a.rs", 1, vec![1.0]),
                record("p2", "b.rs", 0, vec![1.0]),
            ])
            .await
            .unwrap();

        let ids = index.list_ids("p1").await.unwrap();
        assert_eq!(ids.len(), 2);

        index.delete(&ids).await.unwrap();
        assert!(index.list_ids("p1").await.unwrap().is_empty());
        assert_eq!(index.list_ids("p2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let index = InMemoryIndex::new();
        index.fail_upsert_calls([0]);
        let err = index
            .upsert(&[record("p1", "a.rs", 0, vec![1.0])])
            .await
            .unwrap_err();
        assert!(err.is_transient());
        // Next call succeeds.
        index
            .upsert(&[record("p1", "a.rs", 0, vec![1.0])])
            .await
            .unwrap();
    }
}
