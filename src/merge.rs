//! Reconcile per-chunk parse output into one block stream.
//!
//! Chunk results arrive as [`FlaggedBlock`]s, either straight from the local
//! detectors / DSL parser or coerced from loosely typed JSON returned by a
//! completion call. The merger orders them by chunk index, glues paragraphs
//! the producer flagged as continuations onto their predecessor, repairs
//! missing or duplicate ids, and hands the result to the section builder.

use crate::detect::paragraph::join_fragment;
use crate::ids::IdAllocator;
use crate::model::{Alignment, Block, BlockKind, InlineNode, Language, ListItem, RichText, Section, TextStyle};
use crate::tree::build_sections;
use serde_json::Value;

/// A parsed block plus the producer's "continues the previous paragraph"
/// flag.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedBlock {
    pub block: Block,
    pub continuation: bool,
}

impl FlaggedBlock {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            continuation: false,
        }
    }
}

impl From<Block> for FlaggedBlock {
    fn from(block: Block) -> Self {
        Self::new(block)
    }
}

/// The parse result of one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkBlocks {
    pub index: usize,
    pub blocks: Vec<FlaggedBlock>,
}

// ── Rich-text concatenation ──────────────────────────────────────────────

fn is_plain_text(node: Option<&InlineNode>) -> bool {
    matches!(node, Some(InlineNode::Text { style: None, .. }))
}

fn append_channel(acc: &mut Vec<InlineNode>, mut next: Vec<InlineNode>) {
    if next.is_empty() {
        return;
    }
    if acc.is_empty() {
        *acc = next;
        return;
    }
    if is_plain_text(acc.last()) && is_plain_text(next.first()) {
        let first = next.remove(0);
        if let (Some(InlineNode::Text { content: a, .. }), InlineNode::Text { content: b, .. }) =
            (acc.last_mut(), first)
        {
            join_fragment(a, &b);
        }
    } else {
        acc.push(InlineNode::text(" "));
    }
    acc.extend(next);
}

/// Append `next` to `acc` channel by channel.
pub fn concat_rich(acc: &mut RichText, next: RichText) {
    append_channel(&mut acc.en, next.en);
    append_channel(&mut acc.zh, next.zh);
}

/// Drop a trailing `carry` (raw source text) from the last paragraph, where
/// the next chunk repeats it. Used for completion output, which cannot be
/// asked to leave the fragment out.
pub fn trim_carry(blocks: &mut Vec<FlaggedBlock>, carry: &str) {
    let carry = crate::detect::paragraph::reflow(&carry.lines().collect::<Vec<_>>());
    if carry.is_empty() {
        return;
    }
    let Some(last) = blocks.last_mut() else { return };
    let BlockKind::Paragraph { content, .. } = &mut last.block.kind else {
        return;
    };
    for lang in [Language::En, Language::Zh] {
        let channel = content.channel_mut(lang);
        let Some(InlineNode::Text { content: text, .. }) = channel.last_mut() else {
            continue;
        };
        let trimmed = text.trim_end();
        if let Some(head) = trimmed.strip_suffix(carry.as_str()) {
            let head = head.trim_end().to_string();
            if head.is_empty() {
                channel.pop();
            } else {
                *text = head;
            }
        }
    }
    if content.is_empty() {
        blocks.pop();
    }
}

// ── Merge ────────────────────────────────────────────────────────────────

/// Flatten chunk results in chunk order, merging flagged continuations and
/// making every block id unique and non-empty.
pub fn merge_chunks(mut chunks: Vec<ChunkBlocks>, ids: &mut IdAllocator) -> Vec<Block> {
    chunks.sort_by_key(|c| c.index);
    let mut out: Vec<Block> = Vec::new();
    for flagged in chunks.into_iter().flat_map(|c| c.blocks) {
        let FlaggedBlock {
            block,
            continuation,
        } = flagged;
        if continuation {
            if let (
                Some(Block {
                    kind: BlockKind::Paragraph { content: prev, .. },
                    ..
                }),
                BlockKind::Paragraph { content, .. },
            ) = (out.last_mut(), &block.kind)
            {
                concat_rich(prev, content.clone());
                continue;
            }
        }
        out.push(block);
    }
    assign_ids(&mut out, ids);
    out
}

/// Keep every free id, suffix duplicates, then mint ids for blocks without
/// one. Claiming all present ids first keeps repeated merges stable.
pub fn assign_ids(blocks: &mut [Block], ids: &mut IdAllocator) {
    let mut missing = Vec::new();
    for (i, block) in blocks.iter_mut().enumerate() {
        if block.id.trim().is_empty() {
            missing.push(i);
        } else {
            block.id = ids.claim(&block.id, block.kind.id_prefix());
        }
    }
    for i in missing {
        let prefix = blocks[i].kind.id_prefix();
        blocks[i].id = ids.fresh(prefix);
    }
}

/// [`merge_chunks`] followed by section-tree assembly.
pub fn merge_into_sections(chunks: Vec<ChunkBlocks>, ids: &mut IdAllocator) -> Vec<Section> {
    let blocks = merge_chunks(chunks, ids);
    build_sections(blocks, ids)
}

// ── Coercion of loosely typed output ─────────────────────────────────────

fn str_field<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn string_of(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn opt_string(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(string_of))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

fn coerce_inline(v: &Value) -> Option<InlineNode> {
    match v {
        Value::String(s) => Some(InlineNode::text(s.clone())),
        Value::Object(map) => {
            if map.contains_key("type") {
                if let Ok(mut node) = serde_json::from_value::<InlineNode>(v.clone()) {
                    if let InlineNode::InlineMath { latex } = &mut node {
                        *latex = latex.replace('$', "").trim().to_string();
                    }
                    return Some(node);
                }
            }
            let content = str_field(v, &["content", "text", "value"])?;
            let style = match str_field(v, &["style"]) {
                Some("bold") => Some(TextStyle::Bold),
                Some("italic") => Some(TextStyle::Italic),
                Some("code") => Some(TextStyle::Code),
                _ => None,
            };
            Some(InlineNode::Text {
                content: content.to_string(),
                style,
            })
        }
        Value::Number(_) | Value::Bool(_) => string_of(v).map(InlineNode::text),
        _ => None,
    }
}

/// Coerce a string, a node, or an array of either into inline nodes.
pub fn coerce_inlines(v: &Value) -> Vec<InlineNode> {
    match v {
        Value::Array(items) => items.iter().filter_map(coerce_inline).collect(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => crate::detect::inline::tokenize(s),
        other => coerce_inline(other).into_iter().collect(),
    }
}

/// Coerce `{en, zh}`, a bare string, or a bare node array into rich text.
/// Bare values go into `lang`.
pub fn coerce_rich(v: &Value, lang: Language) -> RichText {
    match v {
        Value::Object(map) if map.contains_key("en") || map.contains_key("zh") => RichText {
            en: map.get("en").map(coerce_inlines).unwrap_or_default(),
            zh: map.get("zh").map(coerce_inlines).unwrap_or_default(),
        },
        Value::Null => RichText::default(),
        other => RichText::in_language(lang, coerce_inlines(other)),
    }
}

fn rich_field(v: &Value, keys: &[&str], lang: Language) -> RichText {
    keys.iter()
        .find_map(|k| v.get(*k))
        .map(|f| coerce_rich(f, lang))
        .unwrap_or_default()
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items.iter().filter_map(string_of).collect(),
        Some(Value::String(s)) => s.split('|').map(|c| c.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}

fn normalised_type(v: &Value) -> Option<String> {
    str_field(v, &["type", "kind"]).map(|t| {
        t.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase()
    })
}

fn infer_type(v: &Value) -> &'static str {
    if v.get("latex").is_some() {
        "math"
    } else if v.get("src").is_some() {
        "figure"
    } else if v.get("rows").is_some() {
        "table"
    } else if v.get("code").is_some() {
        "code"
    } else if v.get("items").is_some() {
        "unorderedlist"
    } else {
        "paragraph"
    }
}

fn coerce_items(v: Option<&Value>, lang: Language) -> Vec<ListItem> {
    let Some(Value::Array(items)) = v else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) if map.contains_key("content") => ListItem {
                content: coerce_rich(&map["content"], lang),
                level: item.get("level").and_then(Value::as_u64).unwrap_or(0).min(u8::MAX as u64) as u8,
            },
            other => ListItem {
                content: coerce_rich(other, lang),
                level: 0,
            },
        })
        .filter(|item| !item.content.is_empty())
        .collect()
}

/// Coerce one loosely typed block object. Unknown or empty blocks yield
/// `None`.
pub fn coerce_block(v: &Value, lang: Language) -> Option<FlaggedBlock> {
    if let Value::String(s) = v {
        let content = RichText::in_language(lang, crate::detect::inline::tokenize(s));
        return (!content.is_empty()).then(|| {
            FlaggedBlock::new(Block::new("", BlockKind::Paragraph { content, align: None }))
        });
    }
    if !v.is_object() {
        return None;
    }
    let ty = normalised_type(v).unwrap_or_else(|| infer_type(v).to_string());
    let id = opt_string(v, &["id"]).unwrap_or_default();
    let continuation = truthy(v.get("continuation").or_else(|| v.get("cont")).or_else(|| v.get("continued")));

    let heading_level = ty
        .strip_prefix("heading")
        .or_else(|| ty.strip_prefix('h'))
        .and_then(|n| n.parse::<u8>().ok());

    let kind = match ty.as_str() {
        t if t.starts_with("heading") || heading_level.is_some() => BlockKind::Heading {
            level: v
                .get("level")
                .and_then(Value::as_u64)
                .map(|l| l as u8)
                .or(heading_level)
                .unwrap_or(1)
                .clamp(1, 6),
            content: rich_field(v, &["content", "text", "title"], lang),
            number: opt_string(v, &["number"]),
        },
        "paragraph" | "para" | "text" => BlockKind::Paragraph {
            content: rich_field(v, &["content", "text"], lang),
            align: str_field(v, &["align"]).and_then(Alignment::parse),
        },
        "math" | "equation" | "displaymath" => BlockKind::Math {
            latex: str_field(v, &["latex", "content"])?.replace('$', "").trim().to_string(),
            label: opt_string(v, &["label"]),
            number: opt_string(v, &["number"]),
        },
        "figure" | "image" => BlockKind::Figure {
            src: str_field(v, &["src", "url"])?.to_string(),
            alt: opt_string(v, &["alt"]),
            caption: rich_field(v, &["caption"], lang),
            description: opt_string(v, &["description"]),
            number: opt_string(v, &["number"]),
            uploaded_filename: opt_string(v, &["uploadedFilename"]),
        },
        "table" => {
            let headers = string_list(v.get("headers"));
            let width = headers.len();
            let rows = match v.get("rows") {
                Some(Value::Array(rows)) => rows
                    .iter()
                    .map(|r| {
                        let mut row = string_list(Some(r));
                        if width > 0 {
                            row.resize(width, String::new());
                        }
                        row
                    })
                    .collect(),
                _ => Vec::new(),
            };
            let align: Vec<Alignment> = string_list(v.get("align"))
                .iter()
                .filter_map(|a| Alignment::parse(a))
                .collect();
            BlockKind::Table {
                headers: (!headers.is_empty()).then_some(headers),
                rows,
                align: (!align.is_empty()).then_some(align),
                caption: rich_field(v, &["caption"], lang),
                number: opt_string(v, &["number"]),
            }
        }
        "code" | "codeblock" => BlockKind::Code {
            language: opt_string(v, &["language", "lang"]),
            code: v.get("code").or_else(|| v.get("content")).and_then(string_of).unwrap_or_default(),
            caption: opt_string(v, &["caption"]),
        },
        "orderedlist" => BlockKind::OrderedList {
            items: coerce_items(v.get("items"), lang),
        },
        "unorderedlist" | "bulletlist" => BlockKind::UnorderedList {
            items: coerce_items(v.get("items"), lang),
        },
        "list" => {
            let items = coerce_items(v.get("items"), lang);
            if truthy(v.get("ordered")) {
                BlockKind::OrderedList { items }
            } else {
                BlockKind::UnorderedList { items }
            }
        }
        "quote" | "blockquote" => BlockKind::Quote {
            content: rich_field(v, &["content", "text"], lang),
            author: opt_string(v, &["author"]),
        },
        "divider" | "hr" | "rule" => BlockKind::Divider {},
        other => {
            tracing::debug!(block_type = other, "dropping block of unknown type");
            return None;
        }
    };

    let empty = match &kind {
        BlockKind::Paragraph { content, .. } | BlockKind::Heading { content, .. } | BlockKind::Quote { content, .. } => {
            content.is_empty()
        }
        BlockKind::OrderedList { items } | BlockKind::UnorderedList { items } => items.is_empty(),
        _ => false,
    };
    if empty {
        return None;
    }
    Some(FlaggedBlock {
        block: Block::new(id, kind),
        continuation,
    })
}

fn coerce_section(v: &Value, depth: u8, lang: Language, out: &mut Vec<FlaggedBlock>) {
    let title = v.get("title").map(|t| coerce_rich(t, lang)).unwrap_or_default();
    if !title.is_empty() {
        out.push(FlaggedBlock::new(Block::new(
            "",
            BlockKind::Heading {
                level: v
                    .get("level")
                    .and_then(Value::as_u64)
                    .map(|l| l as u8)
                    .unwrap_or(depth)
                    .clamp(1, 6),
                content: title,
                number: opt_string(v, &["number"]),
            },
        )));
    }
    if let Some(Value::Array(blocks)) = v.get("content").or_else(|| v.get("blocks")) {
        out.extend(blocks.iter().filter_map(|b| coerce_block(b, lang)));
    }
    if let Some(Value::Array(subs)) = v.get("subsections") {
        for sub in subs {
            coerce_section(sub, depth.saturating_add(1), lang, out);
        }
    }
}

/// Coerce a whole chunk response: a block array, `{blocks: [...]}`, or
/// `{sections: [...]}`.
pub fn coerce_blocks(v: &Value, lang: Language) -> Vec<FlaggedBlock> {
    match v {
        Value::Array(items) => items.iter().filter_map(|b| coerce_block(b, lang)).collect(),
        Value::Object(map) => {
            if let Some(Value::Array(sections)) = map.get("sections") {
                let mut out = Vec::new();
                for section in sections {
                    coerce_section(section, 1, lang, &mut out);
                }
                out
            } else if let Some(blocks) = map.get("blocks").or_else(|| map.get("content")) {
                coerce_blocks(blocks, lang)
            } else {
                coerce_block(v, lang).into_iter().collect()
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::plain_text;
    use serde_json::json;

    fn para(id: &str, text: &str) -> Block {
        Block::new(
            id,
            BlockKind::Paragraph {
                content: RichText::in_language(Language::En, vec![InlineNode::text(text)]),
                align: None,
            },
        )
    }

    #[test]
    fn continuation_paragraphs_are_concatenated() {
        let chunks = vec![
            ChunkBlocks {
                index: 1,
                blocks: vec![FlaggedBlock {
                    block: para("b", "ends here."),
                    continuation: true,
                }],
            },
            ChunkBlocks {
                index: 0,
                blocks: vec![para("a", "This sentence").into()],
            },
        ];
        let mut ids = IdAllocator::new();
        let blocks = merge_chunks(chunks, &mut ids);
        assert_eq!(blocks.len(), 1);
        match &blocks[0].kind {
            BlockKind::Paragraph { content, .. } => {
                assert_eq!(plain_text(&content.en), "This sentence ends here.")
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn continuation_after_non_paragraph_is_kept_separate() {
        let heading = Block::new(
            "h",
            BlockKind::Heading {
                level: 1,
                content: RichText::in_language(Language::En, vec![InlineNode::text("T")]),
                number: None,
            },
        );
        let chunks = vec![ChunkBlocks {
            index: 0,
            blocks: vec![
                heading.into(),
                FlaggedBlock {
                    block: para("p", "x."),
                    continuation: true,
                },
            ],
        }];
        let mut ids = IdAllocator::new();
        assert_eq!(merge_chunks(chunks, &mut ids).len(), 2);
    }

    #[test]
    fn duplicate_and_missing_ids_are_repaired() {
        let chunks = vec![ChunkBlocks {
            index: 0,
            blocks: vec![para("p", "1.").into(), para("p", "2.").into(), para("", "3.").into()],
        }];
        let mut ids = IdAllocator::new();
        let blocks = merge_chunks(chunks, &mut ids);
        let got: Vec<_> = blocks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(got[0], "p");
        assert_eq!(got[1], "p-2");
        assert!(got[2].starts_with("para-"));
    }

    #[test]
    fn concat_joins_text_and_separates_math() {
        let mut a = RichText::in_language(Language::En, vec![InlineNode::InlineMath { latex: "x".into() }]);
        concat_rich(&mut a, RichText::in_language(Language::En, vec![InlineNode::text("is big.")]));
        assert_eq!(plain_text(&a.en), "$x$ is big.");
    }

    #[test]
    fn loose_inline_content_is_coerced() {
        let v = json!({
            "type": "paragraph",
            "content": {"en": ["plain", {"content": "no type"}, {"type": "inlineMath", "latex": "$a$"}]}
        });
        let block = coerce_block(&v, Language::En).unwrap().block;
        match block.kind {
            BlockKind::Paragraph { content, .. } => {
                assert_eq!(content.en[0], InlineNode::text("plain"));
                assert_eq!(content.en[1], InlineNode::text("no type"));
                assert_eq!(content.en[2], InlineNode::InlineMath { latex: "a".into() });
            }
            other => panic!("expected paragraph, got {other:?}"),
        }
    }

    #[test]
    fn block_type_is_inferred_when_missing() {
        let v = json!({"latex": "$$E$$", "label": "eq1"});
        match coerce_block(&v, Language::En).unwrap().block.kind {
            BlockKind::Math { latex, label, .. } => {
                assert_eq!(latex, "E");
                assert_eq!(label.as_deref(), Some("eq1"));
            }
            other => panic!("expected math, got {other:?}"),
        }
    }

    #[test]
    fn sections_shape_flattens_to_headings() {
        let v = json!({"sections": [{
            "title": "Intro",
            "content": [{"type": "paragraph", "content": "Body."}],
            "subsections": [{"title": {"en": "Detail"}, "content": ["More."]}]
        }]});
        let blocks = coerce_blocks(&v, Language::En);
        let types: Vec<_> = blocks.iter().map(|b| b.block.kind.type_name()).collect();
        assert_eq!(types, vec!["heading", "paragraph", "heading", "paragraph"]);
        match &blocks[2].block.kind {
            BlockKind::Heading { level, .. } => assert_eq!(*level, 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn continuation_flag_variants() {
        let v = json!([{"type": "para", "content": "tail.", "cont": "yes"}]);
        assert!(coerce_blocks(&v, Language::En)[0].continuation);
    }

    #[test]
    fn trim_carry_removes_repeated_fragment() {
        let mut blocks = vec![para("a", "Done. The next sentence").into()];
        trim_carry(&mut blocks, "The next\nsentence");
        match &blocks[0].block.kind {
            BlockKind::Paragraph { content, .. } => assert_eq!(plain_text(&content.en), "Done."),
            _ => unreachable!(),
        }
        let mut only = vec![para("b", "just a fragment").into()];
        trim_carry(&mut only, "just a fragment");
        assert!(only.is_empty());
    }
}
