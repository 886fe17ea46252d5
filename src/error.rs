//! Error types for the edgequake-paperstruct library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ParseError`] is **fatal**: the job cannot proceed at all (source text
//!   missing, store unwritable, job cancelled). Returned as `Err(ParseError)`
//!   from the top-level entry points and recorded as the `failed` job state.
//!
//! * [`PhaseError`] is **non-fatal**: one phase, chunk or figure failed
//!   (completion timeout, malformed response, image download) but the rest of
//!   the document is fine. The orchestrator logs it and substitutes the
//!   phase's fallback value (empty reference list, empty block list, …).
//!
//! Collaborator errors ([`CompletionError`], [`StoreError`], [`FetchError`])
//! are mapped into one of the two at the phase boundary.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-paperstruct library.
#[derive(Debug, Error)]
pub enum ParseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// `retry` was requested but no original source was ever persisted.
    #[error("No original source stored for document '{document_id}'\nSubmit the document before retrying it.")]
    SourceNotFound { document_id: String },

    /// The source text is empty after normalisation.
    #[error("Document '{document_id}' has no content to parse")]
    EmptySource { document_id: String },

    /// Input file could not be read.
    #[error("Failed to read input '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A persistence write or read failed. Always fatal.
    #[error("Store operation '{operation}' failed for document '{document_id}': {source}")]
    Store {
        operation: &'static str,
        document_id: String,
        #[source]
        source: StoreError,
    },

    // ── Job control ───────────────────────────────────────────────────────
    /// The job's cancellation token fired.
    #[error("Parse job for document '{document_id}' was cancelled during {phase}")]
    Cancelled { document_id: String, phase: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a job task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error raised inside one phase of a parse job.
///
/// Never returned from the public entry points; the orchestrator logs it and
/// falls back to the phase's empty value.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PhaseError {
    /// Text-completion call failed after retries.
    #[error("{phase}: completion failed after {retries} retries: {detail}")]
    CompletionFailed {
        phase: String,
        retries: u32,
        detail: String,
    },

    /// The completion returned text that could not be interpreted.
    #[error("{phase}: malformed response: {detail}")]
    MalformedResponse { phase: String, detail: String },

    /// A figure could not be downloaded or decoded.
    #[error("Figure '{figure_id}': {detail}")]
    ImageFailed { figure_id: String, detail: String },

    /// The job was cancelled while this phase was waiting on a collaborator.
    #[error("{phase}: cancelled")]
    Cancelled { phase: String },
}

/// Failure reported by a [`crate::pipeline::llm::TextCompletion`] implementation.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// Transport-level or provider API failure.
    #[error("completion transport error: {0}")]
    Transport(String),

    /// The call exceeded the configured timeout.
    #[error("completion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The job was cancelled while the call was in flight.
    #[error("completion cancelled")]
    Cancelled,
}

/// Failure reported by a [`crate::store::DocumentStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialisation failed.
    #[error("serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Document id would escape the store root or is empty.
    #[error("invalid document id '{0}'")]
    InvalidId(String),
}

/// Failure reported by a [`crate::pipeline::images::ImageFetcher`].
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("download of '{url}' failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("download of '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },
}
