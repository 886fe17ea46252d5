//! Job-level integration tests.
//!
//! Every test runs against a `MemoryStore` and, for LLM mode, a scripted
//! `TextCompletion` that answers each prompt family deterministically. No
//! network access is needed.

use edgequake_paperstruct::detect::paragraph::reflow;
use edgequake_paperstruct::model::flatten_blocks;
use edgequake_paperstruct::pipeline::images::ImageFetcher;
use edgequake_paperstruct::{
    prompts, BlockKind, CompletionError, CompletionRequest, Document, FetchError, MemoryStore, Orchestrator,
    ParseConfig, ParseError, ParseMode, ParseProgress, ParseProgressCallback, ParseStatus, TextCompletion,
};
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

const PAPER: &str = "# Sparse Things\n\
\n\
Ada Lovelace, Alan Turing\n\
\n\
## Abstract\n\
\n\
We look at sparse things.\n\
\n\
## 1 Introduction\n\
\n\
Sparse things matter [1]. Dense things matter less [2].\n\
\n\
## 2 Method\n\
\n\
We count the sparse things one by one.\n\
\n\
## References\n\
\n\
[1] A. Lovelace, \"Notes on sparse things,\" Journal of Things, 1843.\n\
[2] A. Turing, \"On dense things,\" Proc. Things, 1936.\n";

/// One long paragraph whose sentences wrap across lines, so that small
/// windows close mid-sentence. Every sentence carries a unique marker.
fn wrapped_paper() -> String {
    let mut body = String::from("# Wrapped\n\n## Body\n\n");
    for n in 1..=24 {
        body.push_str(&format!("Sentence S{n:02} opens on this line and\n"));
        body.push_str("closes on the next one.\n");
    }
    body
}

fn paragraph_text(doc: &Document) -> String {
    flatten_blocks(&doc.sections)
        .into_iter()
        .filter_map(|b| match &b.kind {
            BlockKind::Paragraph { content, .. } => Some(content.plain_text()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn window_number(user: &str) -> usize {
    user.strip_prefix("Window ")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn window_content(user: &str) -> &str {
    user.split_once("\"\"\"\n")
        .and_then(|(_, rest)| rest.rsplit_once("\n\"\"\""))
        .map(|(content, _)| content)
        .unwrap_or("")
}

/// Markdown window → marker syntax, the way a cooperative model would.
fn to_markers(content: &str) -> String {
    let mut out = String::new();
    for para in content.split("\n\n") {
        let lines: Vec<&str> = para.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let Some(first) = lines.first() else { continue };
        if first.starts_with('#') {
            let level = first.chars().take_while(|&c| c == '#').count();
            out.push_str(&format!("#HEADING{level}\nEN: {}\n", first.trim_start_matches('#').trim()));
            if lines.len() > 1 {
                out.push_str(&format!("#PARA\nEN: {}\n", reflow(&lines[1..])));
            }
        } else {
            out.push_str(&format!("#PARA\nEN: {}\n", reflow(&lines)));
        }
    }
    out
}

#[derive(Default)]
struct Scripted {
    fail_references: bool,
    fail_window: Option<usize>,
    hang_chunks: bool,
    chunk_calls: AtomicUsize,
}

impl TextCompletion for Scripted {
    fn complete<'a>(&'a self, r: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>> {
        Box::pin(async move {
            if r.system == prompts::METADATA_SYSTEM_PROMPT {
                return Ok(json!({
                    "title": "Sparse Things",
                    "authors": ["Ada Lovelace", {"name": "Alan Turing"}],
                    "year": "2024",
                    "abstract": "We look at sparse things.",
                    "keywords": "sparsity; things"
                })
                .to_string());
            }
            if r.system == prompts::CHUNK_SYSTEM_PROMPT {
                self.chunk_calls.fetch_add(1, Ordering::SeqCst);
                if self.hang_chunks {
                    futures::future::pending::<()>().await;
                }
                if self.fail_window == Some(window_number(&r.user)) {
                    return Err(CompletionError::Transport("503 Service Unavailable".into()));
                }
                return Ok(to_markers(window_content(&r.user)));
            }
            if r.system == prompts::REFERENCES_SYSTEM_PROMPT {
                if self.fail_references {
                    return Err(CompletionError::Transport("connection reset".into()));
                }
                return Ok(json!([
                    {"number": "1", "authors": ["A. Lovelace"], "title": "Notes on sparse things", "year": 1843},
                    {"number": "2", "authors": ["A. Turing"], "title": "On dense things", "year": 1936}
                ])
                .to_string());
            }
            Ok("[]".to_string())
        })
    }
}

#[derive(Default)]
struct Recorder {
    chunk_errors: Mutex<Vec<usize>>,
    finished: AtomicUsize,
}

impl ParseProgressCallback for Recorder {
    fn on_chunk_error(&self, index: usize, _total: usize, _error: &str) {
        self.chunk_errors.lock().unwrap().push(index);
    }

    fn on_finished(&self, _progress: &ParseProgress) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn llm_config() -> ParseConfig {
    ParseConfig::builder()
        .mode(ParseMode::Llm)
        .max_retries(0)
        .retry_backoff_ms(1)
        .fetch_images(false)
        .build()
        .expect("valid config")
}

async fn run_llm(
    store: &Arc<MemoryStore>,
    config: ParseConfig,
    completion: Arc<Scripted>,
    source: &str,
) -> Result<Document, ParseError> {
    Orchestrator::new(config, store.clone())
        .with_completion(completion)
        .submit("paper", source.to_string())
        .await?
        .wait()
        .await
}

// ── Degraded phases ──────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_reference_phase_still_completes() {
    let store = Arc::new(MemoryStore::new());
    let completion = Arc::new(Scripted {
        fail_references: true,
        ..Default::default()
    });
    let doc = run_llm(&store, llm_config(), completion, PAPER).await.expect("job completes");

    assert!(doc.references.is_empty());
    assert!(!doc.sections.is_empty());
    assert_eq!(doc.metadata.title, "Sparse Things");
    assert_eq!(doc.metadata.authors.len(), 2);
    assert_eq!(doc.metadata.year, Some(2024));

    let last = store.progress("paper").expect("progress stored");
    assert_eq!(last.status, ParseStatus::Completed);
    assert_eq!(last.percentage, 100);
    assert!(store.failure("paper").is_none());
    assert_eq!(store.document("paper"), Some(doc));
}

#[tokio::test]
async fn llm_references_are_cited_in_text() {
    let store = Arc::new(MemoryStore::new());
    let doc = run_llm(&store, llm_config(), Arc::new(Scripted::default()), PAPER)
        .await
        .expect("job completes");
    assert_eq!(doc.references.len(), 2);
    assert_eq!(doc.references[1].title, "On dense things");
    let json = serde_json::to_string(&doc).unwrap();
    assert!(json.contains("\"citation\""), "citations resolved: {json}");
}

#[tokio::test]
async fn failed_chunk_is_isolated() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(Recorder::default());
    let config = ParseConfig::builder()
        .mode(ParseMode::Llm)
        .max_chunk_tokens(64)
        .overlap_tokens(16)
        .max_retries(0)
        .retry_backoff_ms(1)
        .fetch_images(false)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let completion = Arc::new(Scripted {
        fail_window: Some(2),
        ..Default::default()
    });
    let doc = run_llm(&store, config, completion.clone(), &wrapped_paper())
        .await
        .expect("one bad chunk does not fail the job");

    let calls = completion.chunk_calls.load(Ordering::SeqCst);
    assert!(calls > 2, "document should span several windows, got {calls}");
    assert_eq!(*recorder.chunk_errors.lock().unwrap(), vec![1]);
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);

    let text = paragraph_text(&doc);
    assert!(text.contains("S01"));
    assert!(text.contains("S24"));
    assert_eq!(store.progress("paper").unwrap().status, ParseStatus::Completed);
}

// ── Chunk boundaries ─────────────────────────────────────────────────────────

fn assert_each_sentence_once(doc: &Document) {
    let text = paragraph_text(doc);
    for n in 1..=24 {
        let marker = format!("S{n:02} ");
        assert_eq!(text.matches(&marker).count(), 1, "{marker} in {text}");
    }
    assert_eq!(text.matches("closes on the next one.").count(), 24, "{text}");
}

#[tokio::test]
async fn local_carry_is_not_duplicated() {
    let config = ParseConfig::builder()
        .max_chunk_tokens(64)
        .overlap_tokens(16)
        .build()
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let doc = Orchestrator::new(config, store.clone())
        .submit("paper", wrapped_paper())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_each_sentence_once(&doc);
    let history = store.progress_history("paper");
    assert!(history.iter().any(|p| p.total_chunks.is_some_and(|t| t > 2)));
}

#[tokio::test]
async fn llm_carry_is_not_duplicated() {
    let config = ParseConfig::builder()
        .mode(ParseMode::Llm)
        .max_chunk_tokens(64)
        .overlap_tokens(16)
        .max_retries(0)
        .fetch_images(false)
        .build()
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let doc = run_llm(&store, config, Arc::new(Scripted::default()), &wrapped_paper())
        .await
        .unwrap();
    assert_each_sentence_once(&doc);
}

// ── Progress ─────────────────────────────────────────────────────────────────

fn phase_rank(s: ParseStatus) -> usize {
    [
        ParseStatus::Pending,
        ParseStatus::Metadata,
        ParseStatus::Structure,
        ParseStatus::Chunking,
        ParseStatus::Parsing,
        ParseStatus::Merging,
        ParseStatus::References,
        ParseStatus::Images,
        ParseStatus::Saving,
        ParseStatus::Completed,
    ]
    .iter()
    .position(|&p| p == s)
    .unwrap_or(usize::MAX)
}

#[tokio::test]
async fn progress_is_monotonic_and_ordered() {
    let store = Arc::new(MemoryStore::new());
    run_llm(&store, llm_config(), Arc::new(Scripted::default()), PAPER)
        .await
        .unwrap();
    let history = store.progress_history("paper");
    assert!(history.len() >= 10);
    for pair in history.windows(2) {
        assert!(pair[0].percentage <= pair[1].percentage, "{:?} → {:?}", pair[0], pair[1]);
        assert!(phase_rank(pair[0].status) <= phase_rank(pair[1].status));
    }
    assert_eq!(history[0].status, ParseStatus::Pending);
    assert_eq!(history.last().unwrap().status, ParseStatus::Completed);
}

#[tokio::test]
async fn same_document_runs_do_not_interleave() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(ParseConfig::builder().max_concurrent_jobs(4).build().unwrap(), store.clone());
    let a = orchestrator.submit("paper", PAPER.to_string()).await.unwrap();
    let b = orchestrator.submit("paper", PAPER.to_string()).await.unwrap();
    let (a, b) = tokio::join!(a.wait(), b.wait());
    assert_eq!(a.unwrap(), b.unwrap());

    let history = store.progress_history("paper");
    let completed: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, p)| p.status == ParseStatus::Completed)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(completed.len(), 2);
    assert_eq!(history[completed[0] + 1].status, ParseStatus::Pending);
    for pair in history[..=completed[0]].windows(2) {
        assert!(phase_rank(pair[0].status) <= phase_rank(pair[1].status));
    }
}

#[tokio::test]
async fn progress_stream_ends_with_terminal_state() {
    use futures::StreamExt;

    let orchestrator = Orchestrator::new(ParseConfig::default(), Arc::new(MemoryStore::new()));
    let job = orchestrator.submit("paper", PAPER.to_string()).await.unwrap();
    let stream = job.progress_stream();
    job.wait().await.unwrap();
    let seen: Vec<ParseProgress> = stream.collect().await;
    assert_eq!(seen.last().map(|p| p.status), Some(ParseStatus::Completed));
}

// ── Retry & cancellation ─────────────────────────────────────────────────────

#[tokio::test]
async fn retry_reparses_the_stored_source() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(ParseConfig::default(), store.clone());
    let first = orchestrator.submit("paper", PAPER.to_string()).await.unwrap().wait().await.unwrap();
    let second = orchestrator.retry("paper").await.unwrap().wait().await.unwrap();
    assert_eq!(first, second);

    let err = orchestrator.retry("never-submitted").await.err().expect("no source");
    assert!(matches!(err, ParseError::SourceNotFound { .. }));
}

#[tokio::test]
async fn cancel_during_parsing_fails_the_job() {
    let store = Arc::new(MemoryStore::new());
    let completion = Arc::new(Scripted {
        hang_chunks: true,
        ..Default::default()
    });
    let job = Orchestrator::new(llm_config(), store.clone())
        .with_completion(completion.clone())
        .submit("paper", PAPER.to_string())
        .await
        .unwrap();

    let mut progress = job.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while progress.borrow().status != ParseStatus::Parsing {
            progress.changed().await.unwrap();
        }
    })
    .await
    .expect("job reaches parsing");
    job.cancel();

    let err = job.wait().await.unwrap_err();
    assert!(matches!(err, ParseError::Cancelled { ref phase, .. } if phase == "parsing"), "{err}");
    let last = store.progress("paper").unwrap();
    assert_eq!(last.status, ParseStatus::Failed);
    assert!(last.percentage >= 25);
    assert!(last.error.unwrap().contains("cancelled"));
    assert!(store.document("paper").is_none());
}

// ── Figures ──────────────────────────────────────────────────────────────────

struct Offline;

impl ImageFetcher for Offline {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(async move {
            Err(FetchError::DownloadFailed {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            })
        })
    }
}

const PNG_1X1: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

#[tokio::test]
async fn inline_figures_are_stored_and_remote_failures_skipped() {
    let source = format!(
        "# Figures\n\n## Results\n\n![inline](data:image/png;base64,{PNG_1X1})\nFigure 1: Inline.\n\n\
         ![remote](https://cdn.test.org/fig2.png)\nFigure 2: Remote.\n"
    );
    let store = Arc::new(MemoryStore::new());
    let doc = Orchestrator::new(ParseConfig::default(), store.clone())
        .with_fetcher(Arc::new(Offline))
        .submit("paper", source)
        .await
        .unwrap()
        .wait()
        .await
        .expect("image failures are not fatal");

    let figures: Vec<_> = flatten_blocks(&doc.sections)
        .into_iter()
        .filter_map(|b| match &b.kind {
            BlockKind::Figure { uploaded_filename, .. } => Some((b.id.clone(), uploaded_filename.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(figures.len(), 2);
    let (inline_id, stored) = &figures[0];
    assert_eq!(stored.as_deref(), Some(format!("{inline_id}.png").as_str()));
    assert!(store.asset("paper", &format!("{inline_id}.png")).is_some());
    assert_eq!(figures[1].1, None);

    let images = store
        .progress_history("paper")
        .into_iter()
        .filter_map(|p| p.total_images)
        .max();
    assert_eq!(images, Some(2));
}
