//! Core data models for the ingestion and retrieval pipeline.
//!
//! These types flow between the chunker, the vector index, and the answer
//! synthesizer. A chunk is identified by `(project_id, path, chunk_index)`;
//! its `hash` decides whether the stored copy is still current.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One indexed span of a repository file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Tenant boundary. Every index operation is scoped to a project.
    pub project_id: String,
    /// Repository-relative file path.
    pub path: String,
    /// Zero-based ordinal of the chunk within its file.
    pub chunk_index: i64,
    /// SHA-256 hex digest of `text`, for dedup and change detection.
    pub hash: String,
    /// Raw chunk text, stored alongside the vector so retrieval needs no
    /// second lookup.
    pub text: String,
}

impl Chunk {
    pub fn new(project_id: &str, path: &str, chunk_index: i64, text: String) -> Self {
        let hash = hash_text(&text);
        Self {
            project_id: project_id.to_string(),
            path: path.to_string(),
            chunk_index,
            hash,
            text,
        }
    }

    /// Stable record id used by the vector index.
    pub fn record_id(&self) -> String {
        chunk_record_id(&self.project_id, &self.path, self.chunk_index)
    }
}

/// Record id for a `(project, path, chunk_index)` key.
///
/// Project ids are opaque and may themselves contain `:`. The project
/// segment is escaped (`%` first, then `:`) so one project's id prefix can
/// never match a record written for another project.
pub fn chunk_record_id(project_id: &str, path: &str, chunk_index: i64) -> String {
    format!("{}:{}#{}", escape_project(project_id), path, chunk_index)
}

/// Id prefix covering every record of one project, and no other.
pub fn record_id_prefix(project_id: &str) -> String {
    format!("{}:", escape_project(project_id))
}

fn escape_project(project_id: &str) -> String {
    project_id.replace('%', "%25").replace(':', "%3A")
}

/// SHA-256 hex digest of a chunk's text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk paired with its embedding, ready for upsert.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned from a similarity query, highest score first.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Pointer from an answer back into the chunk space.
///
/// Serialized camelCase so the persisted payload matches what dashboard
/// readers already expect (`{"path": ..., "chunkIndex": ..., "excerpt": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub path: String,
    pub chunk_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// A synthesized, citation-backed answer. Immutable once created; answers
/// are never edited, only re-asked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Chunks embedded and written (new or changed content).
    pub chunks_updated: u64,
    /// Chunks whose stored hash matched the fresh text, left untouched.
    pub chunks_skipped: u64,
    /// Chunks deleted because their path (or tail index) vanished from the
    /// ingested file set.
    pub chunks_pruned: u64,
    /// Per-unit failures (embedding exhausted retries, failed upsert
    /// batches). Non-empty means a retry should be scheduled.
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_text("fn main() {}"), hash_text("fn main() {}"));
        assert_ne!(hash_text("a"), hash_text("b"));
    }

    #[test]
    fn test_record_id_shape() {
        let chunk = Chunk::new("p1", "src/lib.rs", 2, "text".into());
        assert_eq!(chunk.record_id(), "p1:src/lib.rs#2");
    }

    #[test]
    fn test_record_prefix_cannot_cross_projects() {
        // Project "p:x" records must not fall under project "p"'s prefix,
        // or a prefix listing would enumerate (and prune) another tenant.
        let other = Chunk::new("p:x", "README.md", 0, "text".into());
        assert!(!other.record_id().starts_with(&record_id_prefix("p")));
        assert!(other.record_id().starts_with(&record_id_prefix("p:x")));
    }

    #[test]
    fn test_project_escaping_is_injective() {
        assert_ne!(
            chunk_record_id("a%3Ab", "f.rs", 0),
            chunk_record_id("a:b", "f.rs", 0)
        );
    }

    #[test]
    fn test_citation_wire_format() {
        let citation = Citation {
            path: "src/main.rs".into(),
            chunk_index: 0,
            excerpt: Some("fn main".into()),
        };
        let json = serde_json::to_string(&citation).unwrap();
        assert!(json.contains("\"chunkIndex\":0"));
        assert!(json.contains("\"path\":\"src/main.rs\""));
    }

    #[test]
    fn test_citation_excerpt_optional() {
        let citation: Citation =
            serde_json::from_str(r#"{"path":"a.ts","chunkIndex":1}"#).unwrap();
        assert_eq!(citation.chunk_index, 1);
        assert!(citation.excerpt.is_none());
    }
}
