//! Parse-job progress: the snapshot record and the callback trait.
//!
//! A running job keeps exactly one [`ParseProgress`] value and replaces it on
//! every transition. Consumers see the latest snapshot through the job's
//! `watch` channel, the store's progress record, or a
//! [`ParseProgressCallback`] registered on the config.
//!
//! # Example
//! ```rust
//! use edgequake_paperstruct::{ParseProgress, ParseProgressCallback};
//! use std::sync::Arc;
//!
//! struct Printer;
//! impl ParseProgressCallback for Printer {
//!     fn on_progress(&self, progress: &ParseProgress) {
//!         eprintln!("{:>3}% {}", progress.percentage, progress.message);
//!     }
//! }
//!
//! let _cb: Arc<dyn ParseProgressCallback> = Arc::new(Printer);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Phase of a parse job. Linear, except that any phase may go to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParseStatus {
    #[default]
    Pending,
    Metadata,
    Structure,
    Chunking,
    Parsing,
    Merging,
    References,
    Images,
    Saving,
    Completed,
    Failed,
}

impl ParseStatus {
    /// Percentage span `(start, end)` the phase covers.
    pub fn span(self) -> (u8, u8) {
        match self {
            ParseStatus::Pending => (0, 0),
            ParseStatus::Metadata => (0, 20),
            ParseStatus::Structure => (20, 22),
            ParseStatus::Chunking => (22, 25),
            ParseStatus::Parsing => (25, 65),
            ParseStatus::Merging => (65, 70),
            ParseStatus::References => (70, 85),
            ParseStatus::Images => (85, 95),
            ParseStatus::Saving => (95, 100),
            ParseStatus::Completed => (100, 100),
            ParseStatus::Failed => (0, 100),
        }
    }

    /// Percentage after `done` of `total` units of this phase.
    pub fn at(self, done: usize, total: usize) -> u8 {
        let (start, end) = self.span();
        if total == 0 {
            return start;
        }
        let done = done.min(total);
        let width = usize::from(end - start);
        start + (width * done / total) as u8
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ParseStatus::Completed | ParseStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParseStatus::Pending => "pending",
            ParseStatus::Metadata => "metadata",
            ParseStatus::Structure => "structure",
            ParseStatus::Chunking => "chunking",
            ParseStatus::Parsing => "parsing",
            ParseStatus::Merging => "merging",
            ParseStatus::References => "references",
            ParseStatus::Images => "images",
            ParseStatus::Saving => "saving",
            ParseStatus::Completed => "completed",
            ParseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest observable state of one parse job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseProgress {
    pub status: ParseStatus,
    /// 0–100, never decreases within one run.
    pub percentage: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_images: Option<usize>,
    /// Raw error detail, set only when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParseProgress {
    pub fn pending() -> Self {
        Self {
            message: "Waiting to start".to_string(),
            ..Self::default()
        }
    }
}

/// Observer for parse-job events.
///
/// All methods have default no-op implementations so callers only override
/// what they need. Implementations must be cheap: they run inline on the
/// job's task, between phases and after every chunk.
pub trait ParseProgressCallback: Send + Sync {
    /// A new progress snapshot was published.
    fn on_progress(&self, progress: &ParseProgress) {
        let _ = progress;
    }

    /// A chunk finished parsing.
    ///
    /// # Arguments
    /// * `index` - 0-based chunk index
    /// * `total` - number of chunks in the document
    /// * `blocks` - blocks the chunk produced
    fn on_chunk_complete(&self, index: usize, total: usize, blocks: usize) {
        let _ = (index, total, blocks);
    }

    /// A chunk failed and contributes no blocks.
    fn on_chunk_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// The job reached `Completed` or `Failed`.
    fn on_finished(&self, progress: &ParseProgress) {
        let _ = progress;
    }
}

/// Does nothing; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn ParseProgressCallback>;
