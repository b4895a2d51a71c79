//! Grounded answer synthesis.
//!
//! Builds a prompt that embeds the retrieved chunks, each tagged
//! `path#chunkIndex`, invokes the completion capability once, and extracts
//! citations by correlating the tags the completion referenced back to the
//! chunks actually supplied. A citation can only ever point into the
//! retrieved set: a tag outside it is a grounding violation, logged and
//! dropped rather than failing the whole answer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::completion::CompletionClient;
use crate::error::{Error, Result};
use crate::models::{Answer, Citation, ScoredChunk};

/// Leading slice of chunk text carried on a citation for display.
const EXCERPT_CHARS: usize = 160;

const SYSTEM_PROMPT: &str = "You are a code assistant answering questions about one repository.\n\
     The user message includes code retrieved from that repository, each block tagged\n\
     with its source as path#chunkIndex.\n\
     Answer ONLY from the provided code. Never use outside knowledge.\n\
     After every claim, cite the block it came from as [path#chunkIndex].\n\
     If the provided code does not answer the question, say what is missing.";

/// Marker placed in the prompt when retrieval found nothing; the model is
/// told to say so instead of inventing an answer.
pub const NO_CONTEXT_SIGNAL: &str = "No repository context found";

pub struct AnswerSynthesizer {
    completion: Arc<dyn CompletionClient>,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(completion: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self {
            completion,
            timeout,
        }
    }

    /// Produce a citation-backed answer from the retrieved chunks.
    ///
    /// One completion call per question, under a hard deadline; on expiry
    /// the caller gets [`Error::Timeout`], never a partial answer. An empty
    /// retrieved set is not an error: the prompt says so explicitly and the
    /// answer carries no citations.
    pub async fn synthesize(&self, question: &str, retrieved: &[ScoredChunk]) -> Result<Answer> {
        let prompt = build_prompt(question, retrieved);

        let completion = tokio::time::timeout(
            self.timeout,
            self.completion.complete(SYSTEM_PROMPT, &prompt),
        )
        .await
        .map_err(|_| Error::Timeout {
            seconds: self.timeout.as_secs(),
        })??;

        let (citations, violations) = extract_citations(&completion, retrieved);
        for violation in violations {
            // Data-quality defect: the model cited something it was never
            // shown. The offending citation is already dropped.
            warn!(error = %violation, "grounding violation in synthesized answer");
        }

        debug!(
            question,
            citations = citations.len(),
            chunks = retrieved.len(),
            "answer synthesized"
        );

        Ok(Answer {
            question: question.to_string(),
            answer: completion,
            citations,
            created_at: Utc::now(),
        })
    }
}

/// Assemble the grounded prompt: context block first, question last.
pub fn build_prompt(question: &str, retrieved: &[ScoredChunk]) -> String {
    use std::fmt::Write;

    let mut prompt = String::from("Here is code retrieved from the repository:\n\n");

    if retrieved.is_empty() {
        prompt.push_str(NO_CONTEXT_SIGNAL);
        prompt.push_str(
            " for this project. Tell the user no indexed code matched their question.\n",
        );
    } else {
        for scored in retrieved {
            let chunk = &scored.chunk;
            write!(
                prompt,
                "--- {}#{} ---\n{}\n\n",
                chunk.path, chunk.chunk_index, chunk.text
            )
            .expect("writing to String cannot fail");
        }
    }

    prompt.push_str("---\nQuestion: ");
    prompt.push_str(question);
    prompt
}

/// Extract citations from the completion text.
///
/// Tags look like `[src/lib.rs#3]`; a bracket may carry several tags
/// separated by commas. Order follows first reference in the answer,
/// deduplicated. A tag is resolved against the retrieved set first, so any
/// chunk the model was shown can be cited whatever its path looks like.
/// Only unresolved tags go through a shape check: path-shaped ones are
/// returned as grounding violations, the rest (markdown links, footnotes)
/// are ignored.
pub fn extract_citations(
    answer: &str,
    retrieved: &[ScoredChunk],
) -> (Vec<Citation>, Vec<Error>) {
    let mut citations: Vec<Citation> = Vec::new();
    let mut violations = Vec::new();

    for tag in bracketed_tags(answer) {
        for part in tag.split(',') {
            let Some((path, index)) = split_tag(part.trim()) else {
                continue;
            };

            if citations
                .iter()
                .any(|c| c.path == path && c.chunk_index == index)
            {
                continue;
            }

            match retrieved
                .iter()
                .find(|s| s.chunk.path == path && s.chunk.chunk_index == index)
            {
                Some(scored) => citations.push(Citation {
                    path: path.to_string(),
                    chunk_index: index,
                    excerpt: Some(excerpt_of(&scored.chunk.text)),
                }),
                None if path.contains('/') || path.contains('.') => {
                    violations.push(Error::GroundingViolation {
                        path: path.to_string(),
                        chunk_index: index,
                    })
                }
                None => {}
            }
        }
    }

    (citations, violations)
}

fn bracketed_tags(text: &str) -> impl Iterator<Item = &str> {
    text.split('[').skip(1).filter_map(|rest| {
        rest.find(']').map(|end| &rest[..end])
    })
}

/// Split a candidate tag into `(path, index)`: non-empty path, `#`, and a
/// non-negative integer. Whether it is a citation is decided by resolving
/// against the retrieved set; this only rejects text that cannot be one.
fn split_tag(tag: &str) -> Option<(&str, i64)> {
    let (path, index) = tag.rsplit_once('#')?;
    if path.is_empty() {
        return None;
    }
    let index: i64 = index.trim().parse().ok()?;
    if index < 0 {
        return None;
    }
    Some((path, index))
}

fn excerpt_of(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    text.chars().take(EXCERPT_CHARS).collect()
}

/// Serialize citations for storage alongside the answer row.
pub fn encode_citations(citations: &[Citation]) -> String {
    serde_json::to_string(citations).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a persisted citation payload.
///
/// Malformed data degrades to an empty list with a diagnostic event; a
/// stored answer must stay readable even when its citation payload rots.
pub fn decode_citations(payload: &str) -> Vec<Citation> {
    match serde_json::from_str(payload) {
        Ok(citations) => citations,
        Err(e) => {
            warn!(error = %e, "discarding malformed citation payload");
            Vec::new()
        }
    }
}
