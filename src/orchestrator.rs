//! Parse job runner.
//!
//! [`Orchestrator::submit`] persists the original source, then spawns a task
//! that drives one document through the phases in strict order:
//!
//! ```text
//! pending → metadata → structure → chunking → parsing → merging
//!         → references → images → saving → completed
//!                         (any phase) → failed
//! ```
//!
//! Every transition publishes a [`ParseProgress`] snapshot to the job's
//! `watch` channel, the store and the configured callback; the percentage
//! never goes down. Collaborator failures inside a phase are logged and
//! replaced by that phase's fallback (local metadata, an empty chunk, no
//! references, an unmaterialised figure). Only store failures,
//! cancellation and provider set-up errors fail the job.
//!
//! Runs for the same document id are serialised by a per-id lock; runs for
//! different documents share `max_concurrent_jobs` slots.

use crate::cancel::CancellationToken;
use crate::chunker::{chunk_text, ChunkInfo};
use crate::config::ParseConfig;
use crate::crossref::resolve_cross_references;
use crate::error::{ParseError, PhaseError, StoreError};
use crate::ids::IdAllocator;
use crate::merge::{merge_into_sections, ChunkBlocks};
use crate::metadata::{self, extract_local};
use crate::model::{Document, Language};
use crate::parse::{assemble, parse_chunk_local, parse_chunk_response, prepare};
use crate::pipeline::images::{self, HttpImageFetcher, ImageFetcher};
use crate::pipeline::llm::{complete_with_retry, CompletionRequest, LlmCompletion, RetryPolicy, TextCompletion};
use crate::pipeline::{outline, translate};
use crate::progress::{ParseProgress, ParseStatus, ProgressCallback};
use crate::prompts;
use crate::references;
use crate::scanner::{normalize, to_lines};
use crate::store::DocumentStore;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// A stream of progress snapshots, latest first.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ParseProgress> + Send>>;

// ── Job handle ───────────────────────────────────────────────────────────

/// A running (or finished) parse job.
pub struct JobHandle {
    document_id: String,
    progress: watch::Receiver<ParseProgress>,
    cancel: CancellationToken,
    task: JoinHandle<Result<Document, ParseError>>,
}

impl JobHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> ParseProgress {
        self.progress.borrow().clone()
    }

    /// A new receiver on the job's progress channel.
    pub fn subscribe(&self) -> watch::Receiver<ParseProgress> {
        self.progress.clone()
    }

    /// Progress snapshots as a `Stream`. Starts with the current snapshot
    /// and ends when the job task finishes.
    pub fn progress_stream(&self) -> ProgressStream {
        Box::pin(WatchStream::new(self.progress.clone()))
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the job to stop at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<Document, ParseError> {
        self.task
            .await
            .map_err(|e| ParseError::Internal(format!("parse task failed: {e}")))?
    }
}

// ── Progress tracking ────────────────────────────────────────────────────

/// Owns the job's single [`ParseProgress`] value and publishes every change.
struct ProgressTracker {
    document_id: String,
    store: Arc<dyn DocumentStore>,
    tx: watch::Sender<ParseProgress>,
    callback: Option<ProgressCallback>,
    current: ParseProgress,
    /// Whether snapshots may be written to the store (false until this run
    /// holds the document's lock).
    persist: bool,
}

impl ProgressTracker {
    async fn publish(&mut self) {
        self.tx.send_replace(self.current.clone());
        if let Some(cb) = &self.callback {
            cb.on_progress(&self.current);
        }
        if self.persist {
            if let Err(e) = self.store.write_progress(&self.document_id, &self.current).await {
                warn!("{}: progress write failed: {}", self.document_id, e);
            }
        }
    }

    async fn enter(&mut self, status: ParseStatus, message: impl Into<String>) {
        self.current.status = status;
        self.current.percentage = self.current.percentage.max(status.span().0);
        self.current.message = message.into();
        info!("{} [{}] {}", self.document_id, status, self.current.message);
        self.publish().await;
    }

    async fn advance(&mut self, done: usize, total: usize, message: String) {
        let pct = self.current.status.at(done, total);
        self.current.percentage = self.current.percentage.max(pct);
        self.current.message = message;
        self.publish().await;
    }

    async fn chunks(&mut self, done: usize, total: usize) {
        self.current.chunks_processed = Some(done);
        self.current.total_chunks = Some(total);
        self.advance(done, total, format!("Parsed chunk {done}/{total}")).await;
    }

    async fn images(&mut self, done: usize, total: usize) {
        self.current.images_processed = Some(done);
        self.current.total_images = Some(total);
        self.advance(done, total, format!("Processed image {done}/{total}")).await;
    }

    async fn complete(&mut self, message: String) {
        self.current.status = ParseStatus::Completed;
        self.current.percentage = 100;
        self.current.message = message;
        self.current.error = None;
        self.publish().await;
        if let Some(cb) = &self.callback {
            cb.on_finished(&self.current);
        }
    }

    /// Mark the job failed, keeping the percentage it reached.
    async fn fail(&mut self, error: &ParseError) {
        self.current.status = ParseStatus::Failed;
        self.current.message = "Parse failed".to_string();
        self.current.error = Some(error.to_string());
        self.publish().await;
        if let Some(cb) = &self.callback {
            cb.on_finished(&self.current);
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Runs parse jobs against one store.
///
/// # Example
/// ```rust,no_run
/// use edgequake_paperstruct::{MemoryStore, Orchestrator, ParseConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::new(ParseConfig::default(), Arc::new(MemoryStore::new()));
/// let job = orchestrator.submit("paper-1", "# Title\n\nBody.".to_string()).await?;
/// let document = job.wait().await?;
/// println!("{} blocks", document.block_count());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<ParseConfig>,
    store: Arc<dyn DocumentStore>,
    completion: Option<Arc<dyn TextCompletion>>,
    fetcher: Option<Arc<dyn ImageFetcher>>,
    slots: Arc<Semaphore>,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

fn store_err(operation: &'static str, document_id: &str) -> impl FnOnce(StoreError) -> ParseError {
    let document_id = document_id.to_string();
    move |source| ParseError::Store {
        operation,
        document_id,
        source,
    }
}

fn cancelled(document_id: &str, phase: ParseStatus) -> ParseError {
    ParseError::Cancelled {
        document_id: document_id.to_string(),
        phase: phase.to_string(),
    }
}

fn checkpoint(cancel: &CancellationToken, document_id: &str, phase: ParseStatus) -> Result<(), ParseError> {
    if cancel.is_cancelled() {
        Err(cancelled(document_id, phase))
    } else {
        Ok(())
    }
}

impl Orchestrator {
    pub fn new(config: ParseConfig, store: Arc<dyn DocumentStore>) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            config: Arc::new(config),
            store,
            completion: None,
            fetcher: None,
            slots,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Use `completion` instead of the provider resolved from the config.
    pub fn with_completion(mut self, completion: Arc<dyn TextCompletion>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Use `fetcher` instead of the default HTTP client.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn config(&self) -> &ParseConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Persist `source` verbatim and start parsing it.
    pub async fn submit(&self, document_id: &str, source: String) -> Result<JobHandle, ParseError> {
        if normalize(&source).trim().is_empty() {
            return Err(ParseError::EmptySource {
                document_id: document_id.to_string(),
            });
        }
        self.store
            .write_original_source(document_id, &source)
            .await
            .map_err(store_err("write_original_source", document_id))?;
        Ok(self.spawn(document_id, source))
    }

    /// Re-run a document from its persisted source, from `pending`.
    pub async fn retry(&self, document_id: &str) -> Result<JobHandle, ParseError> {
        let source = self
            .store
            .read_original_source(document_id)
            .await
            .map_err(store_err("read_original_source", document_id))?
            .ok_or_else(|| ParseError::SourceNotFound {
                document_id: document_id.to_string(),
            })?;
        info!("Retrying '{}' from its original source", document_id);
        Ok(self.spawn(document_id, source))
    }

    fn spawn(&self, document_id: &str, source: String) -> JobHandle {
        let (tx, rx) = watch::channel(ParseProgress::pending());
        let cancel = CancellationToken::new();
        let this = self.clone();
        let id = document_id.to_string();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.run_job(id, source, tx, token).await });
        JobHandle {
            document_id: document_id.to_string(),
            progress: rx,
            cancel,
            task,
        }
    }

    fn lock_for(&self, document_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(document_id.to_string()).or_default())
    }

    async fn run_job(
        self,
        document_id: String,
        source: String,
        tx: watch::Sender<ParseProgress>,
        cancel: CancellationToken,
    ) -> Result<Document, ParseError> {
        let mut tracker = ProgressTracker {
            document_id: document_id.clone(),
            store: Arc::clone(&self.store),
            tx,
            callback: self.config.progress_callback.clone(),
            current: ParseProgress::pending(),
            persist: false,
        };

        // Queue: same-id runs first, then a global slot.
        let lock = self.lock_for(&document_id);
        let queued = async {
            let guard = lock.lock().await;
            let permit = self.slots.acquire().await;
            (guard, permit)
        };
        let (_guard, permit) = tokio::select! {
            _ = cancel.cancelled() => {
                let err = cancelled(&document_id, ParseStatus::Pending);
                tracker.fail(&err).await;
                return Err(err);
            }
            held = queued => held,
        };
        let _permit = permit.map_err(|_| ParseError::Internal("job queue closed".to_string()))?;
        tracker.persist = true;

        let start = Instant::now();
        tracker.enter(ParseStatus::Pending, "Starting").await;
        match self.run_phases(&document_id, &source, &mut tracker, &cancel).await {
            Ok(document) => {
                info!("{}: completed in {:?}", document_id, start.elapsed());
                Ok(document)
            }
            Err(e) => {
                warn!("{}: failed after {:?}: {}", document_id, start.elapsed(), e);
                tracker.fail(&e).await;
                if let Err(store_e) = self.store.write_failure(&document_id, &e.to_string()).await {
                    warn!("{}: failure record not written: {}", document_id, store_e);
                }
                Err(e)
            }
        }
    }

    fn completion(&self) -> Result<Option<Arc<dyn TextCompletion>>, ParseError> {
        if !self.config.is_llm() {
            return Ok(None);
        }
        match &self.completion {
            Some(c) => Ok(Some(Arc::clone(c))),
            None => Ok(Some(Arc::new(LlmCompletion::from_config(&self.config)?))),
        }
    }

    async fn run_phases(
        &self,
        id: &str,
        source: &str,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<Document, ParseError> {
        let config = self.config.as_ref();
        let completion = self.completion()?;
        let completion = completion.as_deref();

        // ── Metadata ─────────────────────────────────────────────────────
        checkpoint(cancel, id, ParseStatus::Metadata)?;
        tracker.enter(ParseStatus::Metadata, "Extracting metadata").await;
        let prepared = prepare(source, id)?;
        let local = extract_local(&prepared.text, config.metadata_window_chars);
        let front = match completion {
            None => local,
            Some(c) => match metadata::extract_with_llm(c, &prepared.text, local.clone(), config, cancel).await {
                Ok(front) => front,
                Err(PhaseError::Cancelled { .. }) => return Err(cancelled(id, ParseStatus::Metadata)),
                Err(e) => {
                    warn!("{}: {}; using local metadata", id, e);
                    local
                }
            },
        };
        tracker
            .advance(1, 1, format!("Title: {}", front.metadata.title))
            .await;

        // ── Structure ────────────────────────────────────────────────────
        checkpoint(cancel, id, ParseStatus::Structure)?;
        tracker.enter(ParseStatus::Structure, "Locating sections and references").await;
        let mut body = prepared.body.clone();
        if let Some(c) = completion {
            if outline::needs_outline(&to_lines(&body)) {
                match outline::recover_outline(c, &body, config, cancel).await {
                    Ok(text) => body = text,
                    Err(PhaseError::Cancelled { .. }) => return Err(cancelled(id, ParseStatus::Structure)),
                    Err(e) => warn!("{}: {}; keeping outline as is", id, e),
                }
            }
        }

        // ── Chunking ─────────────────────────────────────────────────────
        checkpoint(cancel, id, ParseStatus::Chunking)?;
        tracker.enter(ParseStatus::Chunking, "Splitting into chunks").await;
        let chunks = chunk_text(&body, config.chunk_options());
        debug!("{}: {} chunks", id, chunks.len());

        // ── Parsing ──────────────────────────────────────────────────────
        checkpoint(cancel, id, ParseStatus::Parsing)?;
        tracker.current.total_chunks = Some(chunks.len());
        tracker.current.chunks_processed = Some(0);
        tracker
            .enter(ParseStatus::Parsing, format!("Parsing {} chunks", chunks.len()))
            .await;
        let parsed = match completion {
            None => self.parse_chunks_local(id, &chunks, prepared.language, tracker, cancel).await?,
            Some(c) => {
                self.parse_chunks_llm(c, id, &chunks, prepared.language, tracker, cancel)
                    .await?
            }
        };

        // ── Merging ──────────────────────────────────────────────────────
        checkpoint(cancel, id, ParseStatus::Merging)?;
        tracker.enter(ParseStatus::Merging, "Merging chunk results").await;
        // Ids minted while parsing are already unique; a fresh allocator
        // keeps them as they are.
        let sections = merge_into_sections(parsed, &mut IdAllocator::new());

        // ── References ───────────────────────────────────────────────────
        checkpoint(cancel, id, ParseStatus::References)?;
        tracker.enter(ParseStatus::References, "Parsing references").await;
        let refs = match (prepared.references.as_deref(), completion) {
            (None, _) => Vec::new(),
            (Some(text), None) => references::parse_local(text),
            (Some(text), Some(c)) => {
                let entries = references::split_entries(text);
                match references::parse_with_llm(c, &entries, config, cancel).await {
                    Ok(refs) => refs,
                    Err(PhaseError::Cancelled { .. }) => return Err(cancelled(id, ParseStatus::References)),
                    Err(e) => {
                        warn!("{}: {}; continuing without references", id, e);
                        Vec::new()
                    }
                }
            }
        };

        let mut document = assemble(id, prepared.language, front, sections, refs);
        if let (true, Some(c)) = (config.translate, completion) {
            tracker
                .advance(1, 2, "Translating".to_string())
                .await;
            match translate::translate_document(c, &mut document, config, cancel).await {
                Ok(stats) => debug!("{}: translated {} fields", id, stats.translated),
                Err(PhaseError::Cancelled { .. }) => return Err(cancelled(id, ParseStatus::References)),
                Err(e) => warn!("{}: translation skipped: {}", id, e),
            }
        }
        resolve_cross_references(&mut document);

        // ── Images ───────────────────────────────────────────────────────
        checkpoint(cancel, id, ParseStatus::Images)?;
        tracker.enter(ParseStatus::Images, "Materialising figures").await;
        if config.fetch_images {
            self.materialize_images(id, &mut document, tracker, cancel).await?;
        }

        // ── Saving ───────────────────────────────────────────────────────
        checkpoint(cancel, id, ParseStatus::Saving)?;
        tracker.enter(ParseStatus::Saving, "Saving document").await;
        self.store
            .write_metadata(id, &document.metadata)
            .await
            .map_err(store_err("write_metadata", id))?;
        self.store
            .write_document(id, &document)
            .await
            .map_err(store_err("write_document", id))?;

        tracker
            .complete(format!(
                "Parsed {} blocks in {} sections, {} references",
                document.block_count(),
                document.sections.len(),
                document.references.len()
            ))
            .await;
        Ok(document)
    }

    async fn parse_chunks_local(
        &self,
        id: &str,
        chunks: &[ChunkInfo],
        language: Language,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkBlocks>, ParseError> {
        let total = chunks.len();
        let mut ids = IdAllocator::new();
        let mut out = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            checkpoint(cancel, id, ParseStatus::Parsing)?;
            let next_carry = chunks.get(i + 1).and_then(|c| c.carry.as_deref());
            let parsed = parse_chunk_local(chunk, next_carry, language, &mut ids);
            if let Some(cb) = &self.config.progress_callback {
                cb.on_chunk_complete(i, total, parsed.blocks.len());
            }
            out.push(parsed);
            tracker.chunks(i + 1, total).await;
            tokio::task::yield_now().await;
        }
        Ok(out)
    }

    /// Completions run `chunk_concurrency` at a time; results are consumed
    /// in chunk order.
    async fn parse_chunks_llm(
        &self,
        completion: &dyn TextCompletion,
        id: &str,
        chunks: &[ChunkInfo],
        language: Language,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkBlocks>, ParseError> {
        let config = self.config.as_ref();
        let total = chunks.len();
        let policy = RetryPolicy::from(config);
        let requests: Vec<CompletionRequest> = chunks
            .iter()
            .map(|chunk| {
                CompletionRequest::new(
                    prompts::CHUNK_SYSTEM_PROMPT,
                    prompts::chunk_prompt(&chunk.content, chunk.index, total),
                    config,
                )
            })
            .collect();

        // Boxed up front so the spawned job future stays `Send`.
        let calls: Vec<BoxFuture<'_, Result<String, PhaseError>>> = requests
            .iter()
            .map(|request| complete_with_retry(completion, request, &policy, cancel, "parsing").boxed())
            .collect();
        let mut responses = stream::iter(calls).buffered(config.chunk_concurrency.max(1));

        let mut ids = IdAllocator::new();
        let mut out = Vec::with_capacity(total);
        let mut i = 0;
        while let Some(result) = responses.next().await {
            let chunk = &chunks[i];
            let next_carry = chunks.get(i + 1).and_then(|c| c.carry.as_deref());
            let parsed = match result {
                Ok(raw) => {
                    let parsed = parse_chunk_response(&raw, chunk, next_carry, language, &mut ids);
                    debug!("{}: chunk {} → {} blocks", id, i, parsed.blocks.len());
                    if let Some(cb) = &config.progress_callback {
                        cb.on_chunk_complete(i, total, parsed.blocks.len());
                    }
                    parsed
                }
                Err(PhaseError::Cancelled { .. }) => return Err(cancelled(id, ParseStatus::Parsing)),
                Err(e) => {
                    warn!("{}: chunk {} failed: {}", id, i, e);
                    if let Some(cb) = &config.progress_callback {
                        cb.on_chunk_error(i, total, &e.to_string());
                    }
                    ChunkBlocks {
                        index: chunk.index,
                        blocks: Vec::new(),
                    }
                }
            };
            out.push(parsed);
            i += 1;
            tracker.chunks(i, total).await;
        }
        Ok(out)
    }

    async fn materialize_images(
        &self,
        id: &str,
        document: &mut Document,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<(), ParseError> {
        let pending = images::pending_figures(document);
        let total = pending.len();
        if total == 0 {
            return Ok(());
        }
        let fetcher: Arc<dyn ImageFetcher> = match &self.fetcher {
            Some(f) => Arc::clone(f),
            None => match HttpImageFetcher::new(self.config.image_timeout_secs) {
                Ok(f) => Arc::new(f),
                Err(e) => {
                    warn!("{}: image client unavailable: {}; skipping {} figures", id, e, total);
                    return Ok(());
                }
            },
        };
        let timeout = Duration::from_secs(self.config.image_timeout_secs);
        let mut stored = 0;
        for (i, (figure_id, src)) in pending.iter().enumerate() {
            match images::materialize_one(id, figure_id, src, self.store.as_ref(), fetcher.as_ref(), cancel, timeout)
                .await
            {
                Ok(name) => {
                    images::record_upload(document, figure_id, &name);
                    stored += 1;
                }
                Err(PhaseError::Cancelled { .. }) => return Err(cancelled(id, ParseStatus::Images)),
                Err(e) => warn!("{}: {}", id, e),
            }
            tracker.images(i + 1, total).await;
        }
        info!("{}: {}/{} figures stored", id, stored, total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use crate::store::MemoryStore;
    use futures::future::BoxFuture;

    const PAPER: &str = "# Title\n\nA. Author\n\n## 1 Intro\n\nBody text here.\n\n## References\n\n[1] A. Author, \"A paper,\" 2020.\n";

    fn orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
        Orchestrator::new(ParseConfig::default(), store)
    }

    #[tokio::test]
    async fn local_job_completes_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let job = orchestrator(Arc::clone(&store))
            .submit("doc-1", PAPER.to_string())
            .await
            .unwrap();
        let doc = job.wait().await.unwrap();
        assert_eq!(doc.id, "doc-1");
        assert_eq!(doc.references.len(), 1);

        assert_eq!(store.document("doc-1").unwrap(), doc);
        assert_eq!(store.metadata("doc-1").unwrap().title, "Title");
        let last = store.progress("doc-1").unwrap();
        assert_eq!(last.status, ParseStatus::Completed);
        assert_eq!(last.percentage, 100);
        assert!(store.failure("doc-1").is_none());
    }

    #[tokio::test]
    async fn empty_source_is_rejected_before_spawning() {
        let store = Arc::new(MemoryStore::new());
        let err = orchestrator(Arc::clone(&store))
            .submit("doc-1", "\u{FEFF}\r\n".to_string())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ParseError::EmptySource { .. }));
        assert!(store.progress("doc-1").is_none());
    }

    #[tokio::test]
    async fn retry_without_source_fails() {
        let err = orchestrator(Arc::new(MemoryStore::new()))
            .retry("missing")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ParseError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn retry_reruns_from_pending() {
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(Arc::clone(&store));
        let first = orch.submit("doc-1", PAPER.to_string()).await.unwrap().wait().await.unwrap();
        let again = orch.retry("doc-1").await.unwrap().wait().await.unwrap();
        assert_eq!(first, again);
        let history = store.progress_history("doc-1");
        let pendings = history.iter().filter(|p| p.status == ParseStatus::Pending).count();
        assert_eq!(pendings, 2);
    }

    struct Hang;

    impl TextCompletion for Hang {
        fn complete<'a>(&'a self, _r: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>> {
            Box::pin(futures::future::pending())
        }
    }

    #[tokio::test]
    async fn cancel_stops_a_waiting_job() {
        let store = Arc::new(MemoryStore::new());
        let config = ParseConfig::builder()
            .mode(crate::config::ParseMode::Llm)
            .max_retries(0)
            .build()
            .unwrap();
        let job = Orchestrator::new(config, store.clone())
            .with_completion(Arc::new(Hang))
            .submit("doc-1", PAPER.to_string())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        job.cancel();
        let err = job.wait().await.unwrap_err();
        assert!(matches!(err, ParseError::Cancelled { .. }));
        assert_eq!(store.progress("doc-1").unwrap().status, ParseStatus::Failed);
        assert!(store.document("doc-1").is_none());
        assert!(store.failure("doc-1").is_some());
    }
}
