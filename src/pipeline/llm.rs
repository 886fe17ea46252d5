//! Text-completion interaction: the collaborator trait, the provider
//! adapter, and the retrying call used by every LLM phase.
//!
//! Prompt wording lives in [`crate::prompts`]; response cleanup lives in
//! [`super::postprocess`]. This module only moves requests and handles
//! retry, timeout and cancellation.
//!
//! ## Retry Strategy
//!
//! Transient provider failures (429, 503, timeouts) are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base
//! and 3 retries the wait sequence is 500 ms → 1 s → 2 s. An empty response
//! counts as a failed attempt. Cancellation is never retried.

use crate::cancel::CancellationToken;
use crate::config::ParseConfig;
use crate::error::{CompletionError, ParseError, PhaseError};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// One request to the completion collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Request with token/temperature limits taken from `config`.
    pub fn new(system: impl Into<String>, user: impl Into<String>, config: &ParseConfig) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        }
    }
}

/// The text-completion collaborator: system + user prompt in, text out.
///
/// Implemented for edgequake-llm providers by [`LlmCompletion`]; tests plug
/// in scripted implementations.
pub trait TextCompletion: Send + Sync {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>>;
}

/// [`TextCompletion`] over any edgequake-llm [`LLMProvider`].
pub struct LlmCompletion {
    provider: Arc<dyn LLMProvider>,
}

impl LlmCompletion {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Resolve a provider from `config` and wrap it.
    pub fn from_config(config: &ParseConfig) -> Result<Self, ParseError> {
        resolve_provider(config).map(Self::new)
    }
}

impl TextCompletion for LlmCompletion {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>> {
        Box::pin(async move {
            let messages = vec![ChatMessage::system(&request.system), ChatMessage::user(&request.user)];
            let options = CompletionOptions {
                temperature: request.temperature,
                max_tokens: request.max_tokens,
                ..Default::default()
            };
            let response = self
                .provider
                .chat(&messages, Some(&options))
                .await
                .map_err(|e| CompletionError::Transport(e.to_string()))?;
            debug!(
                "completion: {} input tokens, {} output tokens",
                response.prompt_tokens, response.completion_tokens
            );
            Ok(response.content)
        })
    }
}

/// Retry/timeout settings for [`complete_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout: Duration,
}

impl From<&ParseConfig> for RetryPolicy {
    fn from(config: &ParseConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

/// Call the collaborator, retrying transient failures.
///
/// Every attempt is raced against `cancel` and bounded by the policy's
/// timeout. Returns the first non-empty response, or a [`PhaseError`] once
/// retries are exhausted.
pub async fn complete_with_retry(
    completion: &dyn TextCompletion,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    phase: &str,
) -> Result<String, PhaseError> {
    let start = Instant::now();
    let cancelled = || PhaseError::Cancelled {
        phase: phase.to_string(),
    };
    let mut last_err: Option<String> = None;

    for attempt in 0..=policy.max_retries {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if attempt > 0 {
            let backoff = policy.backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!("{}: retry {}/{} after {}ms", phase, attempt, policy.max_retries, backoff);
            tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = sleep(Duration::from_millis(backoff)) => {}
            }
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            r = tokio::time::timeout(policy.timeout, completion.complete(request)) => r,
        };

        let err = match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                debug!("{}: completed in {:?} ({} chars)", phase, start.elapsed(), text.len());
                return Ok(text);
            }
            Ok(Ok(_)) => "empty response".to_string(),
            Ok(Err(CompletionError::Cancelled)) => return Err(cancelled()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => CompletionError::Timeout {
                secs: policy.timeout.as_secs(),
            }
            .to_string(),
        };
        warn!("{}: attempt {} failed: {}", phase, attempt + 1, err);
        last_err = Some(err);
    }

    Err(PhaseError::CompletionFailed {
        phase: phase.to_string(),
        retries: policy.max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ParseError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| ParseError::ProviderNotConfigured {
        provider: provider_name.to_string(),
        hint: format!("{e}"),
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &ParseConfig) -> Result<Arc<dyn LLMProvider>, ParseError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| ParseError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No LLM provider could be auto-detected from environment.\n\
            Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
            Error: {}",
            e
        ),
    })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `failures` times, then answers `reply`.
    struct Flaky {
        failures: usize,
        reply: &'static str,
        calls: AtomicUsize,
    }

    impl TextCompletion for Flaky {
        fn complete<'a>(&'a self, _request: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(CompletionError::Transport("503".into()))
                } else {
                    Ok(self.reply.to_string())
                }
            })
        }
    }

    struct Slow;

    impl TextCompletion for Slow {
        fn complete<'a>(&'a self, _request: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>> {
            Box::pin(async move {
                sleep(Duration::from_secs(30)).await;
                Ok("late".to_string())
            })
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
            timeout: Duration::from_millis(50),
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("sys", "user", &ParseConfig::default())
    }

    #[test]
    fn request_takes_config_limits() {
        let r = request();
        assert_eq!(r.temperature, Some(0.1));
        assert_eq!(r.max_tokens, Some(4096));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let flaky = Flaky {
            failures: 2,
            reply: "ok",
            calls: AtomicUsize::new(0),
        };
        let out = complete_with_retry(&flaky, &request(), &policy(3), &CancellationToken::new(), "test").await;
        assert_eq!(out.unwrap(), "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retries() {
        let flaky = Flaky {
            failures: 10,
            reply: "ok",
            calls: AtomicUsize::new(0),
        };
        let err = complete_with_retry(&flaky, &request(), &policy(2), &CancellationToken::new(), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::CompletionFailed { retries: 2, .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_response_is_a_failure() {
        let blank = Flaky {
            failures: 0,
            reply: "   ",
            calls: AtomicUsize::new(0),
        };
        let err = complete_with_retry(&blank, &request(), &policy(1), &CancellationToken::new(), "test")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty response"));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let err = complete_with_retry(&Slow, &request(), &policy(0), &CancellationToken::new(), "test")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_preempts_call() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });
        let slow_policy = RetryPolicy {
            timeout: Duration::from_secs(60),
            ..policy(0)
        };
        let err = complete_with_retry(&Slow, &request(), &slow_policy, &token, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::Cancelled { .. }));
    }
}
