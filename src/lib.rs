//! # githelp
//!
//! Answer natural-language questions about a source-code repository with
//! citation-grounded retrieval.
//!
//! githelp converts repository files into bounded chunks, embeds them into
//! a project-scoped vector index, and answers questions by retrieving the
//! most relevant chunks and synthesizing a grounded answer that cites the
//! exact chunks it drew from.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────────┐   ┌─────────────┐
//! │ raw files │──▶│ IngestionCoordinator  │──▶│ ChunkStore   │
//! │ (crawler) │   │ chunk + dedup + embed │   │ vector index │
//! └───────────┘   └──────────────────────┘   └──────┬──────┘
//!                                                   │
//!          question ──▶ RetrievalEngine ◀───────────┘
//!                            │ ranked chunks
//!                            ▼
//!                    AnswerSynthesizer ──▶ Answer + citations
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | error taxonomy |
//! | [`models`] | chunks, citations, answers |
//! | [`chunker`] | deterministic text chunking |
//! | [`store`] | vector index abstraction + typed chunk store |
//! | [`embedding`] | embedding capability clients |
//! | [`completion`] | completion capability clients |
//! | [`ingest`] | ingestion coordination and project leases |
//! | [`retrieval`] | question-side retrieval |
//! | [`synthesize`] | grounded answer synthesis and citations |
//! | [`repo_files`] | filesystem scan for the CLI |

pub mod chunker;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod repo_files;
pub mod retrieval;
pub mod store;
pub mod synthesize;
