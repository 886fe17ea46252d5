//! Pipeline stages that talk to external collaborators.
//!
//! The grammar, chunker and merger are pure and live at the crate root.
//! Everything here either calls the text-completion service, fetches bytes,
//! or cleans up what came back.
//!
//! ## Data Flow
//!
//! ```text
//! outline ──▶ (chunk parse) ──▶ postprocess ──▶ translate ──▶ images
//! (headings)   llm + retry      (fences, JSON)   (zh ⇄ en)     (fetch/store)
//! ```
//!
//! 1. [`llm`]: the [`llm::TextCompletion`] seam, retry/backoff and
//!    provider resolution; every completion goes through here
//! 2. [`postprocess`]: strip fences and commentary, recover JSON from loose
//!    model output
//! 3. [`outline`]: promote heading lines in plain text before chunking
//! 4. [`translate`]: fill the missing language channel
//! 5. [`images`]: decode `data:` URIs and download remote figures

pub mod images;
pub mod llm;
pub mod outline;
pub mod postprocess;
pub mod translate;
