//! Block grammar: order-tried detectors over a [`LineScanner`].
//!
//! Every detector has the same shape: look at the cursor, and either consume
//! the lines of exactly one block and return it, or leave the cursor where it
//! found it and return `None`. [`parse_blocks`] runs them in priority order
//! with the paragraph collector as the fallback:
//!
//! fenced code → display math → pipe table → image → blockquote → divider →
//! list → heading → paragraph
//!
//! Paragraph text that ends mid-sentence is held back as a *carry* so a
//! lowercase continuation after a blank line (typically a page break in
//! PDF-extracted text) rejoins it instead of starting a new paragraph.

pub mod code;
pub mod divider;
pub mod figure;
pub mod heading;
pub mod inline;
pub mod list;
pub mod math;
pub mod paragraph;
pub mod quote;
pub mod table;

use crate::ids::IdAllocator;
use crate::model::{Block, BlockKind, Language, RichText};
use crate::scanner::LineScanner;
use crate::text::ends_sentence;
use once_cell::sync::Lazy;
use regex::Regex;

/// State shared by detectors during one parse: the id allocator owned by the
/// run and the language channel new text is written into.
pub struct DetectContext<'a> {
    ids: &'a mut IdAllocator,
    language: Language,
}

impl<'a> DetectContext<'a> {
    pub fn new(ids: &'a mut IdAllocator, language: Language) -> Self {
        Self { ids, language }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Wrap `kind` in a block with a fresh id.
    pub fn block(&mut self, kind: BlockKind) -> Block {
        let id = self.ids.fresh(kind.id_prefix());
        Block::new(id, kind)
    }

    /// Tokenize `text` into the active language channel.
    pub fn rich(&self, text: &str) -> RichText {
        RichText::in_language(self.language, inline::tokenize(text.trim()))
    }
}

type Detector = fn(&mut LineScanner, &mut DetectContext<'_>) -> Option<Block>;

const DETECTORS: [(&str, Detector); 8] = [
    ("code", code::detect),
    ("math", math::detect),
    ("table", table::detect),
    ("figure", figure::detect),
    ("quote", quote::detect),
    ("divider", divider::detect),
    ("list", list::detect),
    ("heading", heading::detect),
];

/// Does `line` open a block other than a paragraph? Paragraph collection and
/// merge-ahead stop in front of such lines.
pub fn is_block_start(line: &str) -> bool {
    let t = line.trim_start();
    if t.is_empty() {
        return false;
    }
    heading::is_atx(line)
        || code::is_fence(line)
        || t.starts_with('|')
        || quote::is_quote_line(line)
        || figure::is_image_line(line)
        || divider::is_divider(line)
        || math::is_math_start(line)
        || list::parse_marker(line).is_some_and(|m| m.interrupts_paragraph())
        || heading::numbered_heading(line).is_some()
}

fn detect_structured(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    for (name, detector) in DETECTORS {
        let start = scanner.position();
        if let Some(block) = detector(scanner, ctx) {
            return Some(block);
        }
        if scanner.position() != start {
            tracing::warn!(detector = name, "detector declined without restoring the cursor");
            scanner.reset(start);
        }
    }
    None
}

/// Detect the next block at the cursor, falling back to a paragraph.
/// Returns `None` only at a blank line or end of input.
pub fn detect_block(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    detect_structured(scanner, ctx).or_else(|| paragraph::detect(scanner, ctx))
}

// ── Captions ─────────────────────────────────────────────────────────────

static RE_CAPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?P<kind>figure|fig\.?|table|tab\.|listing|code|algorithm)\s+(?P<num>[A-Z]?\d+(?:\.\d+)*[a-z]?)\s*[:.|]\s*(?P<text>.*?)\s*$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionKind {
    Figure,
    Table,
    Listing,
}

impl CaptionKind {
    fn matches(self, word: &str) -> bool {
        let w = word.to_ascii_lowercase();
        match self {
            CaptionKind::Figure => w.starts_with("fig"),
            CaptionKind::Table => w.starts_with("tab"),
            CaptionKind::Listing => matches!(w.as_str(), "listing" | "code" | "algorithm"),
        }
    }
}

/// Parse a `Figure 2: text` / `Table 1. text` / `Algorithm 1: text` line
/// into `(number, text)`.
pub fn caption_line(line: &str, kind: CaptionKind) -> Option<(String, String)> {
    let caps = RE_CAPTION.captures(line)?;
    if !kind.matches(caps.name("kind")?.as_str()) {
        return None;
    }
    Some((
        caps.name("num")?.as_str().to_string(),
        caps.name("text").map(|m| m.as_str()).unwrap_or("").to_string(),
    ))
}

fn paragraph_caption(block: &Block) -> Option<(CaptionKind, String, String)> {
    let BlockKind::Paragraph { content, .. } = &block.kind else {
        return None;
    };
    let text = content.plain_text();
    [CaptionKind::Figure, CaptionKind::Table]
        .into_iter()
        .find_map(|kind| caption_line(&text, kind).map(|(n, t)| (kind, n, t)))
}

/// Give `block` the caption if it is an uncaptioned figure/table of `kind`.
fn try_caption(block: &mut Block, kind: CaptionKind, text: &RichText, num: &str) -> bool {
    let (caption, number) = match (&mut block.kind, kind) {
        (BlockKind::Figure { caption, number, .. }, CaptionKind::Figure)
        | (BlockKind::Table { caption, number, .. }, CaptionKind::Table) => (caption, number),
        _ => return false,
    };
    if !caption.is_empty() {
        return false;
    }
    *caption = text.clone();
    if number.is_none() {
        *number = Some(num.to_string());
    }
    true
}

/// Fold stand-alone caption paragraphs into an adjacent uncaptioned
/// figure or table, preferring the block before the caption.
pub fn attach_captions(blocks: Vec<Block>, ctx: &DetectContext<'_>) -> Vec<Block> {
    let mut out: Vec<Block> = Vec::with_capacity(blocks.len());
    let mut iter = blocks.into_iter().peekable();
    while let Some(block) = iter.next() {
        if let Some((kind, num, text)) = paragraph_caption(&block) {
            let rich = ctx.rich(&text);
            if out.last_mut().is_some_and(|prev| try_caption(prev, kind, &rich, &num)) {
                continue;
            }
            if iter.peek_mut().is_some_and(|next| try_caption(next, kind, &rich, &num)) {
                continue;
            }
        }
        out.push(block);
    }
    out
}

// ── Block parsing with paragraph carry ───────────────────────────────────

/// Blocks parsed from one run of text, plus the paragraph still waiting for
/// its sentence to finish.
#[derive(Debug, Default)]
pub struct ParsedBlocks {
    pub blocks: Vec<Block>,
    pending: Option<String>,
}

impl ParsedBlocks {
    /// Reflowed text of the paragraph held back as a carry, if any.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    fn flush_pending(&mut self, ctx: &mut DetectContext<'_>) {
        if let Some(text) = self.pending.take() {
            self.blocks.push(paragraph::make(&text, ctx));
        }
    }

    fn push_paragraph(&mut self, text: String, ctx: &mut DetectContext<'_>) {
        let text = match self.pending.take() {
            Some(mut prev) if text.starts_with(char::is_lowercase) => {
                paragraph::join_fragment(&mut prev, &text);
                prev
            }
            Some(prev) => {
                self.blocks.push(paragraph::make(&prev, ctx));
                text
            }
            None => text,
        };
        if ends_sentence(&text) {
            self.blocks.push(paragraph::make(&text, ctx));
        } else {
            self.pending = Some(text);
        }
    }

    /// Emit everything, including an unterminated final paragraph.
    pub fn finish(self, ctx: &mut DetectContext<'_>) -> Vec<Block> {
        self.finish_before(None, ctx)
    }

    /// Emit everything, dropping the trailing fragment that the next chunk
    /// starts with (`next_carry`, as raw source lines) so it is parsed once.
    pub fn finish_before(mut self, next_carry: Option<&str>, ctx: &mut DetectContext<'_>) -> Vec<Block> {
        if let Some(pending) = self.pending.take() {
            let carry = next_carry
                .map(|c| paragraph::reflow(&c.lines().collect::<Vec<_>>()))
                .filter(|c| !c.is_empty());
            let kept = match carry {
                Some(carry) if pending.ends_with(&carry) => {
                    pending[..pending.len() - carry.len()].trim_end().to_string()
                }
                _ => pending,
            };
            if !kept.is_empty() {
                self.blocks.push(paragraph::make(&kept, ctx));
            }
        }
        attach_captions(self.blocks, ctx)
    }
}

/// Parse `text` into blocks, holding back an unterminated final paragraph.
pub fn parse_blocks(text: &str, ctx: &mut DetectContext<'_>) -> ParsedBlocks {
    let mut scanner = LineScanner::from_text(text);
    let mut parsed = ParsedBlocks::default();
    loop {
        scanner.skip_blank();
        if scanner.eof() {
            break;
        }
        if let Some(block) = detect_structured(&mut scanner, ctx) {
            parsed.flush_pending(ctx);
            parsed.blocks.push(block);
            continue;
        }
        match paragraph::collect_lines(&mut scanner) {
            Some(lines) => parsed.push_paragraph(paragraph::reflow(&lines), ctx),
            None => {
                scanner.next();
            }
        }
    }
    parsed
}

/// Parse a complete Markdown text into its blocks.
pub fn parse_markdown_blocks(text: &str, ctx: &mut DetectContext<'_>) -> Vec<Block> {
    parse_blocks(text, ctx).finish(ctx)
}
