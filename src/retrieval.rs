//! Question-side retrieval: embed the question, query the index, apply the
//! optional score floor.

use std::sync::Arc;

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::ScoredChunk;
use crate::store::ChunkStore;

pub struct RetrievalEngine {
    store: ChunkStore,
    embeddings: Arc<dyn EmbeddingClient>,
    top_k: usize,
    min_score: Option<f32>,
}

impl RetrievalEngine {
    pub fn new(
        store: ChunkStore,
        embeddings: Arc<dyn EmbeddingClient>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            top_k: config.top_k,
            min_score: config.min_score,
        }
    }

    /// Retrieve the chunks most similar to `question`, best first.
    ///
    /// `top_k` of `None` uses the configured default. With a score floor
    /// configured this may return fewer than `top_k` chunks, including none
    /// at all. That is a legitimate "no relevant context" outcome, not an
    /// error.
    pub async fn retrieve(
        &self,
        project_id: &str,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredChunk>> {
        let k = top_k.unwrap_or(self.top_k);

        let vector = self.embeddings.embed_one(question).await?;
        if vector.len() != self.embeddings.dims() {
            // The query-side model no longer matches what ingestion wrote;
            // results would be garbage. Fatal, not retryable.
            return Err(Error::Configuration(format!(
                "query embedding has {} dimensions, index expects {}",
                vector.len(),
                self.embeddings.dims()
            )));
        }

        let mut results = self.store.query(&vector, project_id, k).await?;

        if let Some(floor) = self.min_score {
            results.retain(|scored| scored.score >= floor);
        }

        debug!(
            project_id,
            top_k = k,
            returned = results.len(),
            "retrieval complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, EmbeddedChunk};
    use crate::store::memory::InMemoryIndex;
    use async_trait::async_trait;

    /// Maps known texts to fixed vectors; everything else gets a default.
    struct StubEmbeddings {
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingClient for StubEmbeddings {
        fn model(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn store_with(records: Vec<EmbeddedChunk>) -> ChunkStore {
        let store = ChunkStore::new(Arc::new(InMemoryIndex::new()), 100);
        store.upsert(&records).await;
        store
    }

    fn record(path: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk::new("p1", path, 0, format!("text of {path}")),
            vector,
        }
    }

    #[tokio::test]
    async fn test_score_floor_may_return_nothing() {
        let store = store_with(vec![record("far.rs", vec![0.0, 1.0])]).await;
        let engine = RetrievalEngine::new(
            store,
            Arc::new(StubEmbeddings { dims: 2 }),
            &RetrievalConfig {
                top_k: 5,
                min_score: Some(0.5),
            },
        );

        let results = engine.retrieve("p1", "anything", None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_floor_keeps_close_matches() {
        let store = store_with(vec![
            record("near.rs", vec![1.0, 0.0]),
            record("far.rs", vec![0.0, 1.0]),
        ])
        .await;
        let engine = RetrievalEngine::new(
            store,
            Arc::new(StubEmbeddings { dims: 2 }),
            &RetrievalConfig {
                top_k: 5,
                min_score: Some(0.5),
            },
        );

        let results = engine.retrieve("p1", "anything", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.path, "near.rs");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let store = store_with(vec![]).await;
        // Client claims 3 dims but produces 2.
        struct LyingStub;
        #[async_trait]
        impl EmbeddingClient for LyingStub {
            fn model(&self) -> &str {
                "stub"
            }
            fn dims(&self) -> usize {
                3
            }
            async fn embed(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }

        let engine = RetrievalEngine::new(
            store,
            Arc::new(LyingStub),
            &RetrievalConfig {
                top_k: 5,
                min_score: None,
            },
        );
        let err = engine.retrieve("p1", "anything", None).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
