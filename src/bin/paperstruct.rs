//! CLI binary for edgequake-paperstruct.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ParseConfig` and prints the parsed document as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_paperstruct::parse::document_id_for;
use edgequake_paperstruct::{
    parse_dsl, Document, DocumentStore, FileStore, MemoryStore, Orchestrator, ParseConfig, ParseMode, ParseProgress,
    ParseProgressCallback, ParseStatus, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one percentage bar whose prefix follows the
/// job phase, plus a log line per parsed chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Instant,
    chunk_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold:>10}  \
             [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(100);
        bar.set_style(style);
        bar.set_prefix("pending");
        bar.set_message("Queued…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Instant::now(),
            chunk_errors: AtomicUsize::new(0),
        })
    }
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_progress(&self, progress: &ParseProgress) {
        self.bar.set_prefix(progress.status.as_str());
        self.bar.set_position(u64::from(progress.percentage));
        self.bar.set_message(progress.message.clone());
    }

    fn on_chunk_complete(&self, index: usize, total: usize, blocks: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{blocks:>4} blocks")),
        ));
    }

    fn on_chunk_error(&self, index: usize, total: usize, error: &str) {
        self.chunk_errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
        ));
    }

    fn on_finished(&self, progress: &ParseProgress) {
        self.bar.finish_and_clear();
        let elapsed = dim(&format!("{:.1}s", self.started.elapsed().as_secs_f64()));
        let errors = self.chunk_errors.load(Ordering::SeqCst);
        match progress.status {
            ParseStatus::Completed if errors == 0 => {
                eprintln!("{} {}  {}", green("✔"), bold(&progress.message), elapsed)
            }
            ParseStatus::Completed => eprintln!(
                "{} {}  ({} chunks failed)  {}",
                cyan("⚠"),
                bold(&progress.message),
                red(&errors.to_string()),
                elapsed
            ),
            _ => eprintln!(
                "{} Failed during parsing: {}",
                red("✘"),
                progress.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Local parse of a Markdown paper (no API key needed)
  paperstruct paper.md

  # Write the JSON document to a file
  paperstruct paper.md -o paper.json

  # LLM-assisted parse of PDF-extracted text
  paperstruct --llm --provider openai --model gpt-4.1-mini paper.txt -o paper.json

  # Fill the Chinese channel as well
  paperstruct --llm --translate paper.md -o paper.json

  # Persist source, progress and result under ./store/attention/
  paperstruct --store store --id attention paper.md

  # Re-run a stored document from its original source
  paperstruct --store store --id attention --retry

  # Parse the line-marker format directly
  paperstruct --dsl blocks.txt

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter (overrides --verbose / --quiet)
"#;

/// Parse academic papers into structured, sectioned JSON.
#[derive(Parser, Debug)]
#[command(
    name = "paperstruct",
    version,
    about = "Parse academic papers into structured, sectioned JSON",
    long_about = "Parse an academic paper (Markdown or PDF-extracted text) into a structured document: \
metadata, a nested section tree of typed blocks, and a parsed bibliography. Runs fully locally by \
default; --llm asks a text-completion provider (OpenAI, Anthropic, Gemini, Ollama, ...) to parse each chunk.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown or plain-text paper. Not needed with --retry.
    #[arg(required_unless_present = "retry")]
    input: Option<PathBuf>,

    /// Write the JSON document to this file instead of stdout.
    #[arg(short, long, env = "PAPERSTRUCT_OUTPUT")]
    output: Option<PathBuf>,

    /// Parse chunks, metadata and references through an LLM.
    #[arg(long, env = "PAPERSTRUCT_LLM")]
    llm: bool,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Token budget per chunk (≥ 64).
    #[arg(long, env = "PAPERSTRUCT_MAX_CHUNK_TOKENS", default_value_t = 2000)]
    max_chunk_tokens: usize,

    /// Tokens of trailing text repeated at the start of the next chunk.
    #[arg(long, env = "PAPERSTRUCT_OVERLAP_TOKENS", default_value_t = 200)]
    overlap_tokens: usize,

    /// Concurrent chunk completions in --llm mode.
    #[arg(short, long, env = "PAPERSTRUCT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per completion on failure.
    #[arg(long, env = "PAPERSTRUCT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-completion timeout in seconds.
    #[arg(long, env = "PAPERSTRUCT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Fill the other language channel (requires --llm).
    #[arg(long, env = "PAPERSTRUCT_TRANSLATE", requires = "llm")]
    translate: bool,

    /// Leave figures as they are instead of downloading or decoding them.
    #[arg(long, env = "PAPERSTRUCT_NO_IMAGES")]
    no_images: bool,

    /// Persist source, progress, metadata and result under this directory.
    #[arg(long, env = "PAPERSTRUCT_STORE")]
    store: Option<PathBuf>,

    /// Document id (default: derived from the input file name).
    #[arg(long)]
    id: Option<String>,

    /// Re-run a stored document from its persisted source.
    #[arg(long, requires_all = ["store", "id"])]
    retry: bool,

    /// Treat the input as the line-marker block format.
    #[arg(long, conflicts_with = "retry")]
    dsl: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAPERSTRUCT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAPERSTRUCT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAPERSTRUCT_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the phase feedback; library INFO logs would
    // tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.dsl;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Line-marker input ────────────────────────────────────────────────
    if cli.dsl {
        let path = input_path(&cli)?;
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut document = parse_dsl(&text);
        document.id = cli.id.clone().unwrap_or_else(|| document_id_for(path));
        return write_document(&cli, &document);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ParseProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let store: Arc<dyn DocumentStore> = match cli.store {
        Some(ref dir) => Arc::new(FileStore::new(dir)),
        None => Arc::new(MemoryStore::new()),
    };
    let orchestrator = Orchestrator::new(config, store);

    // ── Run job ──────────────────────────────────────────────────────────
    let job = if cli.retry {
        let id = cli.id.as_deref().context("--retry needs --id")?;
        orchestrator.retry(id).await.context("Retry failed")?
    } else {
        let path = input_path(&cli)?;
        let id = cli.id.clone().unwrap_or_else(|| document_id_for(path));
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        orchestrator.submit(&id, source).await.context("Submit failed")?
    };

    let token = job.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    let started = Instant::now();
    let result = job.wait().await;
    ctrl_c.abort();
    let document = result.context("Parse failed")?;

    write_document(&cli, &document)?;

    if !cli.quiet && !show_progress {
        eprintln!(
            "Parsed '{}': {} sections, {} blocks, {} references in {}ms",
            document.id,
            document.sections.len(),
            document.block_count(),
            document.references.len(),
            started.elapsed().as_millis()
        );
    }
    if let (false, Some(dir)) = (cli.quiet, cli.store.as_ref()) {
        eprintln!("   stored under {}", bold(&dir.join(&document.id).display().to_string()));
    }

    Ok(())
}

fn input_path(cli: &Cli) -> Result<&PathBuf> {
    cli.input.as_ref().context("An input file is required")
}

/// Map CLI args to `ParseConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ParseConfig> {
    let mode = if cli.llm { ParseMode::Llm } else { ParseMode::Local };
    let mut builder = ParseConfig::builder()
        .mode(mode)
        .max_chunk_tokens(cli.max_chunk_tokens)
        .overlap_tokens(cli.overlap_tokens)
        .chunk_concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .translate(cli.translate)
        .fetch_images(!cli.no_images);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Pretty JSON to `--output` or stdout.
fn write_document(cli: &Cli, document: &Document) -> Result<()> {
    let json = serde_json::to_string_pretty(document).context("Failed to serialise document")?;
    match cli.output {
        Some(ref path) => {
            std::fs::write(path, format!("{json}\n")).with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("{} {}", green("→"), bold(&path.display().to_string()));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(json.as_bytes()).context("Failed to write to stdout")?;
            handle.write_all(b"\n").context("Failed to write to stdout")?;
        }
    }
    Ok(())
}
