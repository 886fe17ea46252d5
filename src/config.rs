//! Configuration types for document parsing.
//!
//! All parsing behaviour is controlled through [`ParseConfig`], built via its
//! [`ParseConfigBuilder`]. One struct holds every knob so a config can be
//! shared across jobs and logged as a whole.

use crate::chunker::ChunkOptions;
use crate::error::ParseError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How chunks (and the metadata/structure/reference phases) are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Native Markdown detectors only; no external calls. (default)
    #[default]
    Local,
    /// Ask the text-completion collaborator for DSL/JSON output, falling back
    /// to local heuristics where a phase allows it.
    Llm,
}

/// Configuration for a parse job.
///
/// Built via [`ParseConfig::builder()`] or using [`ParseConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_paperstruct::{ParseConfig, ParseMode};
///
/// let config = ParseConfig::builder()
///     .mode(ParseMode::Llm)
///     .max_chunk_tokens(3000)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.overlap_tokens, 200);
/// ```
#[derive(Clone)]
pub struct ParseConfig {
    /// Local detectors or LLM-assisted parsing. Default: [`ParseMode::Local`].
    pub mode: ParseMode,

    /// Token budget of one chunk (`ceil(chars / 4)` estimate). Default: 2000.
    pub max_chunk_tokens: usize,

    /// Longest unterminated sentence, in tokens, repeated at the top of the
    /// next chunk. Default: 200.
    pub overlap_tokens: usize,

    /// Chunks parsed concurrently in LLM mode. Results are always merged in
    /// chunk order. Default: 4.
    pub chunk_concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens per completion. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts on a failed completion. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-completion timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Per-image download timeout in seconds. Default: 60.
    pub image_timeout_secs: u64,

    /// Download remote figures and decode `data:` URIs. Default: true.
    pub fetch_images: bool,

    /// Fill the missing language channel (LLM mode only). Default: false.
    pub translate: bool,

    /// Characters from the top of the document shown to the metadata
    /// extractor. Default: 6000.
    pub metadata_window_chars: usize,

    /// Reference entries per completion in LLM mode. Default: 25.
    pub reference_batch_size: usize,

    /// Jobs for different documents that may run at once. Default: 1.
    pub max_concurrent_jobs: usize,

    /// Observer notified on every progress snapshot.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            mode: ParseMode::default(),
            max_chunk_tokens: 2000,
            overlap_tokens: 200,
            chunk_concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            image_timeout_secs: 60,
            fetch_images: true,
            translate: false,
            metadata_window_chars: 6000,
            reference_batch_size: 25,
            max_concurrent_jobs: 1,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseConfig")
            .field("mode", &self.mode)
            .field("max_chunk_tokens", &self.max_chunk_tokens)
            .field("overlap_tokens", &self.overlap_tokens)
            .field("chunk_concurrency", &self.chunk_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("fetch_images", &self.fetch_images)
            .field("translate", &self.translate)
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ParseProgressCallback>"),
            )
            .finish()
    }
}

impl ParseConfig {
    /// Create a new builder for `ParseConfig`.
    pub fn builder() -> ParseConfigBuilder {
        ParseConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            max_tokens: self.max_chunk_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }

    pub fn is_llm(&self) -> bool {
        self.mode == ParseMode::Llm
    }
}

/// Builder for [`ParseConfig`].
#[derive(Debug)]
pub struct ParseConfigBuilder {
    config: ParseConfig,
}

impl ParseConfigBuilder {
    pub fn mode(mut self, mode: ParseMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_chunk_tokens(mut self, n: usize) -> Self {
        self.config.max_chunk_tokens = n;
        self
    }

    pub fn overlap_tokens(mut self, n: usize) -> Self {
        self.config.overlap_tokens = n;
        self
    }

    pub fn chunk_concurrency(mut self, n: usize) -> Self {
        self.config.chunk_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn image_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_timeout_secs = secs.max(1);
        self
    }

    pub fn fetch_images(mut self, v: bool) -> Self {
        self.config.fetch_images = v;
        self
    }

    pub fn translate(mut self, v: bool) -> Self {
        self.config.translate = v;
        self
    }

    pub fn metadata_window_chars(mut self, n: usize) -> Self {
        self.config.metadata_window_chars = n.max(256);
        self
    }

    pub fn reference_batch_size(mut self, n: usize) -> Self {
        self.config.reference_batch_size = n.max(1);
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParseConfig, ParseError> {
        let c = &self.config;
        if c.max_chunk_tokens < 64 {
            return Err(ParseError::InvalidConfig(format!(
                "max_chunk_tokens must be ≥ 64, got {}",
                c.max_chunk_tokens
            )));
        }
        if c.overlap_tokens >= c.max_chunk_tokens {
            return Err(ParseError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_chunk_tokens ({})",
                c.overlap_tokens, c.max_chunk_tokens
            )));
        }
        if c.chunk_concurrency == 0 || c.max_concurrent_jobs == 0 {
            return Err(ParseError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
