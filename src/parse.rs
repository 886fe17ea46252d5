//! One-shot entry points, plus the per-chunk steps the job runner shares.
//!
//! [`parse_markdown`] runs the whole local pipeline in memory: no store, no
//! job, no collaborator. [`parse_file`] reads a file and routes it to the
//! DSL front-end, the local pipeline, or (in LLM mode) a full
//! [`crate::orchestrator::Orchestrator`] job backed by a [`MemoryStore`].

use crate::chunker::{chunk_text, ChunkInfo};
use crate::config::ParseConfig;
use crate::crossref::resolve_cross_references;
use crate::detect::{inline, parse_blocks, DetectContext};
use crate::dsl;
use crate::error::ParseError;
use crate::ids::IdAllocator;
use crate::merge::{coerce_blocks, merge_into_sections, trim_carry, ChunkBlocks, FlaggedBlock};
use crate::metadata::{extract_local, FrontMatter};
use crate::model::{BlockKind, Document, Language, Reference, RichText, Section};
use crate::orchestrator::Orchestrator;
use crate::pipeline::postprocess::{clean_response, extract_json};
use crate::references;
use crate::scanner::{normalize, to_lines};
use crate::store::MemoryStore;
use crate::text::detect_language;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Document id used when no store is involved.
pub const INLINE_DOCUMENT_ID: &str = "inline";

/// Source text split for the structuring phases.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    /// Whole normalised text.
    pub text: String,
    pub language: Language,
    /// Everything before the references heading.
    pub body: String,
    /// Text after the references heading, verbatim.
    pub references: Option<String>,
}

/// Normalise `raw`, detect its language and split off the references.
pub fn prepare(raw: &str, document_id: &str) -> Result<Prepared, ParseError> {
    let text = normalize(raw);
    if text.trim().is_empty() {
        return Err(ParseError::EmptySource {
            document_id: document_id.to_string(),
        });
    }
    let language = detect_language(&text);
    let lines = to_lines(&text);
    let (body_end, references) = references::split_body(&lines);
    let body = lines[..body_end]
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(Prepared {
        text,
        language,
        body,
        references,
    })
}

fn flag_first_paragraph(blocks: &mut [FlaggedBlock]) {
    if let Some(first) = blocks.first_mut() {
        if matches!(first.block.kind, BlockKind::Paragraph { .. }) {
            first.continuation = true;
        }
    }
}

/// Run the local detectors over one chunk. The trailing fragment the next
/// chunk repeats (`next_carry`) is left to that chunk.
pub fn parse_chunk_local(
    chunk: &ChunkInfo,
    next_carry: Option<&str>,
    language: Language,
    ids: &mut IdAllocator,
) -> ChunkBlocks {
    let mut ctx = DetectContext::new(ids, language);
    let blocks = parse_blocks(&chunk.content, &mut ctx).finish_before(next_carry, &mut ctx);
    let mut blocks: Vec<FlaggedBlock> = blocks.into_iter().map(FlaggedBlock::from).collect();
    if chunk.continues_paragraph {
        flag_first_paragraph(&mut blocks);
    }
    ChunkBlocks {
        index: chunk.index,
        blocks,
    }
}

/// Turn one completion response into chunk blocks. Marker syntax, JSON and
/// plain Markdown are all accepted.
pub fn parse_chunk_response(
    raw: &str,
    chunk: &ChunkInfo,
    next_carry: Option<&str>,
    language: Language,
    ids: &mut IdAllocator,
) -> ChunkBlocks {
    let cleaned = clean_response(raw);
    let mut blocks = if dsl::looks_like_dsl(&cleaned) {
        dsl::parse(&cleaned, ids)
    } else if let Some(json) = extract_json(&cleaned) {
        coerce_blocks(&json, language)
    } else {
        debug!("chunk {}: response is neither markers nor JSON, parsing as Markdown", chunk.index);
        let mut ctx = DetectContext::new(ids, language);
        parse_blocks(&cleaned, &mut ctx)
            .finish(&mut ctx)
            .into_iter()
            .map(FlaggedBlock::from)
            .collect()
    };
    if let Some(carry) = next_carry {
        trim_carry(&mut blocks, carry);
    }
    if chunk.continues_paragraph {
        flag_first_paragraph(&mut blocks);
    }
    ChunkBlocks {
        index: chunk.index,
        blocks,
    }
}

/// Put the phase outputs together into a [`Document`]. Cross-references
/// are left unresolved.
pub fn assemble(
    document_id: &str,
    language: Language,
    front: FrontMatter,
    sections: Vec<Section>,
    references: Vec<Reference>,
) -> Document {
    let abstract_text = if front.abstract_text.trim().is_empty() {
        RichText::default()
    } else {
        RichText::in_language(language, inline::tokenize(front.abstract_text.trim()))
    };
    Document {
        id: document_id.to_string(),
        language,
        metadata: front.metadata,
        abstract_text,
        keywords: front.keywords,
        sections,
        references,
    }
}

/// Parse Markdown (or PDF-extracted plain text) with the local detectors.
///
/// No store, no job and no collaborator are involved; `config` supplies the
/// chunking budget and metadata window.
///
/// # Example
/// ```rust
/// use edgequake_paperstruct::{parse_markdown, ParseConfig};
///
/// let doc = parse_markdown("# Title\n\n## 1 Intro\n\nHello.", &ParseConfig::default()).unwrap();
/// assert_eq!(doc.metadata.title, "Title");
/// ```
pub fn parse_markdown(text: &str, config: &ParseConfig) -> Result<Document, ParseError> {
    let prepared = prepare(text, INLINE_DOCUMENT_ID)?;
    let front = extract_local(&prepared.text, config.metadata_window_chars);

    let chunks = chunk_text(&prepared.body, config.chunk_options());
    let mut ids = IdAllocator::new();
    let parsed: Vec<ChunkBlocks> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let next_carry = chunks.get(i + 1).and_then(|c| c.carry.as_deref());
            parse_chunk_local(chunk, next_carry, prepared.language, &mut ids)
        })
        .collect();
    let sections = merge_into_sections(parsed, &mut IdAllocator::new());

    let references = prepared
        .references
        .as_deref()
        .map(references::parse_local)
        .unwrap_or_default();

    let mut document = assemble(INLINE_DOCUMENT_ID, prepared.language, front, sections, references);
    resolve_cross_references(&mut document);
    info!(
        "Parsed {} chunks into {} blocks, {} references",
        chunks.len(),
        document.block_count(),
        document.references.len()
    );
    Ok(document)
}

/// Parse the line-marker syntax directly into a document.
pub fn parse_dsl(text: &str) -> Document {
    let text = normalize(text);
    let language = detect_language(&text);
    let mut ids = IdAllocator::new();
    let blocks = dsl::parse(&text, &mut ids);
    let sections = merge_into_sections(vec![ChunkBlocks { index: 0, blocks }], &mut IdAllocator::new());
    let mut document = Document {
        id: INLINE_DOCUMENT_ID.to_string(),
        language,
        sections,
        ..Default::default()
    };
    if let Some(first) = document.sections.first() {
        let title = &first.title;
        document.metadata.title = match language {
            Language::Zh if !title.zh.is_empty() => title.zh.clone(),
            _ if !title.en.is_empty() => title.en.clone(),
            _ => title.zh.clone(),
        };
    }
    resolve_cross_references(&mut document);
    document
}

/// Document id derived from a file name: its stem with anything outside
/// `[A-Za-z0-9_-]` replaced by `-`.
pub fn document_id_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let id: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    let id = id.trim_matches('-');
    if id.is_empty() {
        "document".to_string()
    } else {
        id.to_string()
    }
}

/// Parse a file: marker syntax when it looks like it, otherwise the local
/// pipeline or, with [`crate::ParseMode::Llm`], a full job.
pub async fn parse_file(path: impl AsRef<Path>, config: &ParseConfig) -> Result<Document, ParseError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ParseError::InputReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    let id = document_id_for(path);
    info!("Parsing {} as '{}'", path.display(), id);

    if dsl::looks_like_dsl(&text) {
        let mut document = parse_dsl(&text);
        document.id = id;
        return Ok(document);
    }
    if config.is_llm() {
        let orchestrator = Orchestrator::new(config.clone(), Arc::new(MemoryStore::new()));
        return orchestrator.submit(&id, text).await?.wait().await;
    }
    let mut document = parse_markdown(&text, config)?;
    document.id = id;
    Ok(document)
}

/// Synchronous wrapper around [`parse_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn parse_sync(path: impl AsRef<Path>, config: &ParseConfig) -> Result<Document, ParseError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ParseError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(parse_file(path, config))
}
