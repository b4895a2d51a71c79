//! Error taxonomy for the question-answering core.
//!
//! Errors fall into a small number of categories with distinct handling:
//!
//! * [`Error::Configuration`]: fatal, never retried (missing credentials,
//!   embedding dimension mismatch, unresolved index).
//! * [`Error::Transient`]: provider network/rate-limit failures; retried
//!   with bounded backoff by the HTTP clients, then surfaced per unit of
//!   work (per chunk during ingestion, per question during ask).
//! * [`Error::Rejected`]: permanent provider rejections (bad request,
//!   invalid credentials); never retried.
//! * [`Error::ConcurrencyConflict`]: an ingestion was requested while
//!   another run holds the project lease; surfaced immediately, never queued.
//! * [`Error::GroundingViolation`]: a synthesized answer cited a chunk
//!   outside its retrieved set; logged and the citation dropped, the answer
//!   itself is kept.
//! * [`Error::Timeout`]: a question-ask exceeded its hard deadline; no
//!   partial answer is returned.

use thiserror::Error;

/// Errors produced by the ingestion and retrieval pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal configuration problem. Aborts the operation, no retry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transient provider failure (network, rate limit, 5xx). Retried with
    /// bounded exponential backoff before it reaches the caller.
    #[error("{provider} error: {message}")]
    Transient {
        provider: &'static str,
        message: String,
    },

    /// The provider rejected the request outright (4xx other than 429).
    /// Retrying cannot help; the request or the credentials are wrong.
    #[error("{provider} rejected the request: {message}")]
    Rejected {
        provider: &'static str,
        message: String,
    },

    /// An ingestion run is already active for this project.
    #[error("ingestion already in progress for project '{project_id}'")]
    ConcurrencyConflict { project_id: String },

    /// The completion cited a chunk that was not part of its retrieval
    /// context.
    #[error("answer cited {path}#{chunk_index}, which was not in the retrieved set")]
    GroundingViolation { path: String, chunk_index: i64 },

    /// A question-ask exceeded its deadline.
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl Error {
    /// Shorthand for a transient provider error.
    pub fn transient(provider: &'static str, message: impl Into<String>) -> Self {
        Error::Transient {
            provider,
            message: message.into(),
        }
    }

    /// Shorthand for a permanent provider rejection.
    pub fn rejected(provider: &'static str, message: impl Into<String>) -> Self {
        Error::Rejected {
            provider,
            message: message.into(),
        }
    }

    /// Whether retrying this error can ever succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::transient("openai", "503").is_transient());
        assert!(!Error::rejected("openai", "401 bad key").is_transient());
        assert!(!Error::Configuration("missing key".into()).is_transient());
        assert!(!Error::ConcurrencyConflict {
            project_id: "p1".into()
        }
        .is_transient());
    }

    #[test]
    fn test_display_carries_project() {
        let err = Error::ConcurrencyConflict {
            project_id: "p1".into(),
        };
        assert!(err.to_string().contains("p1"));
    }
}
