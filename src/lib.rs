//! # edgequake-paperstruct
//!
//! Turn academic papers, written as Markdown or extracted from a PDF as
//! plain text, into a structured document: metadata, a nested section tree
//! of typed content blocks, and a parsed bibliography.
//!
//! ## Why this crate?
//!
//! A paper is too long for one completion and too irregular for one regex.
//! This crate splits the body into token-budgeted chunks with sentence-safe
//! overlap, parses each chunk (natively, or through an LLM asked for a
//! compact line-marker format), then stitches the pieces back together:
//! paragraphs split across chunk boundaries are rejoined, the overlap is
//! dropped, ids stay unique and headings become a section tree.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source text
//!  │
//!  ├─ 1. Metadata    title, authors, abstract, keywords (local or LLM)
//!  ├─ 2. Structure   split off references; recover headings in plain text
//!  ├─ 3. Chunking    token budget + carried sentence overlap
//!  ├─ 4. Parsing     per chunk: Markdown detectors or LLM → blocks
//!  ├─ 5. Merging     rejoin split paragraphs, build the section tree
//!  ├─ 6. References  one Reference per bibliography entry
//!  ├─ 7. Images      decode data URIs, download remote figures
//!  └─ 8. Saving      document + metadata to the DocumentStore
//! ```
//!
//! Every phase reports into one [`ParseProgress`] whose percentage never
//! decreases; a failing collaborator inside a phase degrades that phase
//! instead of failing the job.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_paperstruct::{parse_file, ParseConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Local mode: no provider, no network.
//!     let config = ParseConfig::default();
//!     let document = parse_file("paper.md", &config).await?;
//!     println!("{}", document.metadata.title);
//!     for section in &document.sections {
//!         println!("{} ({} blocks)", section.title.en, section.content.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Long-running jobs with persistence, retry and cancellation go through
//! [`Orchestrator`]:
//!
//! ```rust,no_run
//! use edgequake_paperstruct::{FileStore, Orchestrator, ParseConfig, ParseMode};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ParseConfig::builder().mode(ParseMode::Llm).build()?;
//! let orchestrator = Orchestrator::new(config, Arc::new(FileStore::new("store")));
//! let job = orchestrator.submit("attention", std::fs::read_to_string("paper.md")?).await?;
//! let mut progress = job.subscribe();
//! tokio::spawn(async move {
//!     while progress.changed().await.is_ok() {
//!         let p = progress.borrow().clone();
//!         eprintln!("{:>3}% {}", p.percentage, p.message);
//!     }
//! });
//! let document = job.wait().await?;
//! # let _ = document;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paperstruct` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-paperstruct = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod chunker;
pub mod config;
pub mod crossref;
pub mod detect;
pub mod dsl;
pub mod error;
pub mod ids;
pub mod merge;
pub mod metadata;
pub mod model;
pub mod orchestrator;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod references;
pub mod scanner;
pub mod store;
pub mod text;
pub mod tree;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancellationToken;
pub use chunker::{chunk_text, ChunkInfo, ChunkOptions};
pub use config::{ParseConfig, ParseConfigBuilder, ParseMode};
pub use error::{CompletionError, FetchError, ParseError, PhaseError, StoreError};
pub use model::{
    Alignment, Author, Block, BlockKind, Document, InlineNode, Language, ListItem, LocalizedText, Metadata, Reference,
    RichText, Section, TextStyle,
};
pub use orchestrator::{JobHandle, Orchestrator, ProgressStream};
pub use parse::{parse_dsl, parse_file, parse_markdown, parse_sync};
pub use pipeline::images::{HttpImageFetcher, ImageFetcher};
pub use pipeline::llm::{CompletionRequest, LlmCompletion, TextCompletion};
pub use progress::{NoopProgressCallback, ParseProgress, ParseProgressCallback, ParseStatus, ProgressCallback};
pub use store::{DocumentStore, FailureRecord, FileStore, MemoryStore};
