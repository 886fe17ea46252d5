//! Canonical document model produced by every front-end.
//!
//! Blocks and inline nodes are sum types so the merger's "coerce loosely
//! typed output" step is an exhaustive conversion instead of property
//! sniffing. Serialised field names are camelCase to match the JSON the
//! surrounding HTTP layer serves.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Language channels ────────────────────────────────────────────────────

/// Which language channel of a bilingual field a piece of text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    pub fn other(self) -> Self {
        match self {
            Language::En => Language::Zh,
            Language::Zh => Language::En,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inline content ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextStyle {
    Bold,
    Italic,
    Code,
}

/// A fragment of rich text inside a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InlineNode {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<TextStyle>,
    },
    Link {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default)]
        children: Vec<InlineNode>,
    },
    /// `latex` never contains a `$`.
    InlineMath { latex: String },
    Citation { reference_ids: Vec<String> },
    FigureRef { target_id: String },
    TableRef { target_id: String },
    EquationRef { target_id: String },
}

impl InlineNode {
    pub fn text(content: impl Into<String>) -> Self {
        InlineNode::Text {
            content: content.into(),
            style: None,
        }
    }

    /// Plain-text rendering used for titles, prompts and comparisons.
    pub fn plain_text(&self) -> String {
        match self {
            InlineNode::Text { content, .. } => content.clone(),
            InlineNode::Link { children, url, .. } => {
                if children.is_empty() {
                    url.clone()
                } else {
                    plain_text(children)
                }
            }
            InlineNode::InlineMath { latex } => format!("${latex}$"),
            InlineNode::Citation { reference_ids } => format!("[{}]", reference_ids.join(", ")),
            InlineNode::FigureRef { target_id }
            | InlineNode::TableRef { target_id }
            | InlineNode::EquationRef { target_id } => target_id.clone(),
        }
    }
}

/// Concatenate the plain text of a run of inline nodes.
pub fn plain_text(nodes: &[InlineNode]) -> String {
    nodes.iter().map(InlineNode::plain_text).collect()
}

/// Bilingual rich text (`{en, zh}`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RichText {
    #[serde(default)]
    pub en: Vec<InlineNode>,
    #[serde(default)]
    pub zh: Vec<InlineNode>,
}

impl RichText {
    /// Rich text with only `lang` populated.
    pub fn in_language(lang: Language, nodes: Vec<InlineNode>) -> Self {
        let mut rt = RichText::default();
        *rt.channel_mut(lang) = nodes;
        rt
    }

    pub fn channel(&self, lang: Language) -> &[InlineNode] {
        match lang {
            Language::En => &self.en,
            Language::Zh => &self.zh,
        }
    }

    pub fn channel_mut(&mut self, lang: Language) -> &mut Vec<InlineNode> {
        match lang {
            Language::En => &mut self.en,
            Language::Zh => &mut self.zh,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.en.is_empty() && self.zh.is_empty()
    }

    /// Plain text of the first non-empty channel, English first.
    pub fn plain_text(&self) -> String {
        if self.en.is_empty() {
            plain_text(&self.zh)
        } else {
            plain_text(&self.en)
        }
    }

    pub fn to_localized(&self) -> LocalizedText {
        LocalizedText {
            en: plain_text(&self.en),
            zh: plain_text(&self.zh),
        }
    }
}

/// Bilingual plain text, used for section titles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default)]
    pub en: String,
    #[serde(default)]
    pub zh: String,
}

// ── Blocks ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Some(Alignment::Left),
            "center" | "centre" | "c" => Some(Alignment::Center),
            "right" | "r" => Some(Alignment::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListItem {
    pub content: RichText,
    /// Nesting depth, 0 for top-level items.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub level: u8,
}

fn is_zero(v: &u8) -> bool {
    *v == 0
}

/// One structural unit of document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub kind: BlockKind,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BlockKind {
    Heading {
        level: u8,
        content: RichText,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<String>,
    },
    Paragraph {
        content: RichText,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        align: Option<Alignment>,
    },
    Math {
        latex: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<String>,
    },
    Figure {
        src: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
        #[serde(default)]
        caption: RichText,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uploaded_filename: Option<String>,
    },
    Table {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Vec<String>>,
        #[serde(default)]
        rows: Vec<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        align: Option<Vec<Alignment>>,
        #[serde(default)]
        caption: RichText,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<String>,
    },
    Code {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    OrderedList {
        items: Vec<ListItem>,
    },
    UnorderedList {
        items: Vec<ListItem>,
    },
    Quote {
        content: RichText,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<String>,
    },
    Divider {},
}

impl BlockKind {
    /// Prefix used when allocating a fresh id for this kind of block.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            BlockKind::Heading { .. } => "heading",
            BlockKind::Paragraph { .. } => "para",
            BlockKind::Math { .. } => "math",
            BlockKind::Figure { .. } => "figure",
            BlockKind::Table { .. } => "table",
            BlockKind::Code { .. } => "code",
            BlockKind::OrderedList { .. } | BlockKind::UnorderedList { .. } => "list",
            BlockKind::Quote { .. } => "quote",
            BlockKind::Divider {} => "divider",
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            BlockKind::Heading { .. } => "heading",
            BlockKind::Paragraph { .. } => "paragraph",
            BlockKind::Math { .. } => "math",
            BlockKind::Figure { .. } => "figure",
            BlockKind::Table { .. } => "table",
            BlockKind::Code { .. } => "code",
            BlockKind::OrderedList { .. } => "orderedList",
            BlockKind::UnorderedList { .. } => "unorderedList",
            BlockKind::Quote { .. } => "quote",
            BlockKind::Divider {} => "divider",
        }
    }

    /// All rich-text fields of the block, for passes that rewrite inline
    /// content (cross-references, translation).
    pub fn rich_texts_mut(&mut self) -> Vec<&mut RichText> {
        match self {
            BlockKind::Heading { content, .. }
            | BlockKind::Paragraph { content, .. }
            | BlockKind::Quote { content, .. } => vec![content],
            BlockKind::Figure { caption, .. } | BlockKind::Table { caption, .. } => vec![caption],
            BlockKind::OrderedList { items } | BlockKind::UnorderedList { items } => {
                items.iter_mut().map(|i| &mut i.content).collect()
            }
            BlockKind::Math { .. } | BlockKind::Code { .. } | BlockKind::Divider {} => Vec::new(),
        }
    }
}

// ── Sections ─────────────────────────────────────────────────────────────

/// A heading-scoped container. Owns its blocks and subsections outright.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub content: Vec<Block>,
    #[serde(default)]
    pub subsections: Vec<Section>,
}

impl Section {
    /// Visit every block depth-first in document order.
    pub fn for_each_block<'a>(&'a self, f: &mut impl FnMut(&'a Block)) {
        for block in &self.content {
            f(block);
        }
        for sub in &self.subsections {
            sub.for_each_block(f);
        }
    }

    pub fn for_each_block_mut(&mut self, f: &mut impl FnMut(&mut Block)) {
        for block in &mut self.content {
            f(block);
        }
        for sub in &mut self.subsections {
            sub.for_each_block_mut(f);
        }
    }

    pub fn for_each_section_mut(&mut self, f: &mut impl FnMut(&mut Section)) {
        f(self);
        for sub in &mut self.subsections {
            sub.for_each_section_mut(f);
        }
    }
}

/// Collect every block of a section forest in depth-first document order.
pub fn flatten_blocks(sections: &[Section]) -> Vec<&Block> {
    let mut out = Vec::new();
    for section in sections {
        section.for_each_block(&mut |b| out.push(b));
    }
    out
}

// ── References & metadata ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_type: Option<String>,
}

/// The canonical structured representation of one paper.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub language: Language,
    pub metadata: Metadata,
    #[serde(rename = "abstract", default)]
    pub abstract_text: RichText,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl Document {
    pub fn for_each_block_mut(&mut self, f: &mut impl FnMut(&mut Block)) {
        for section in &mut self.sections {
            section.for_each_block_mut(f);
        }
    }

    pub fn block_count(&self) -> usize {
        flatten_blocks(&self.sections).len()
    }
}
