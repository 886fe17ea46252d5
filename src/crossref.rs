//! Cross-reference resolution.
//!
//! Runs once the section tree and the reference list exist. Plain text
//! nodes are scanned for numeric citations (`[3]`, `[1, 4]`, `[2–5]`) and for
//! `Figure N` / `Table N` / `Eq. (N)` mentions; each one that resolves to a
//! known reference or numbered block becomes a typed inline node. Anything
//! that does not resolve stays text. Already-resolved nodes are never
//! re-scanned, so the pass is idempotent.

use crate::model::{BlockKind, Document, InlineNode, Reference};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use tracing::debug;

static RE_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \[(?P<cite>\d{1,4}(?:\s*[-–]\s*\d{1,4})?(?:\s*,\s*\d{1,4}(?:\s*[-–]\s*\d{1,4})?)*)\]
        | \b(?:Figure|Fig\.)\s*(?P<fig>\d{1,3}[a-z]?)\b
        | \b(?:Table|Tab\.)\s*(?P<tab>\d{1,3})\b
        | \b(?:Equation|Eq\.|Eqn\.)\s*\((?P<eq>\d{1,3}(?:\.\d{1,3})*[a-z]?)\)
        ",
    )
    .unwrap()
});

/// Widest citation range expanded (`[1–40]`); larger ranges stay text.
const MAX_RANGE: u32 = 50;

#[derive(Debug, Default)]
struct Targets {
    references: HashMap<String, String>,
    figures: HashMap<String, String>,
    tables: HashMap<String, String>,
    equations: HashMap<String, String>,
}

impl Targets {
    fn collect(document: &Document) -> Self {
        let mut t = Targets::default();
        for (i, r) in document.references.iter().enumerate() {
            let key = r.number.clone().unwrap_or_else(|| (i + 1).to_string());
            t.references.entry(key).or_insert_with(|| r.id.clone());
        }
        for block in crate::model::flatten_blocks(&document.sections) {
            let (map, number) = match &block.kind {
                BlockKind::Figure { number: Some(n), .. } => (&mut t.figures, n),
                BlockKind::Table { number: Some(n), .. } => (&mut t.tables, n),
                BlockKind::Math { number: Some(n), .. } => (&mut t.equations, n),
                _ => continue,
            };
            map.entry(number.clone()).or_insert_with(|| block.id.clone());
        }
        t
    }

    fn citation(&self, list: &str) -> Option<Vec<String>> {
        let mut ids = Vec::new();
        for part in list.split(',') {
            let part = part.trim();
            let (lo, hi) = match part.split_once(['-', '–']) {
                Some((a, b)) => (a.trim().parse::<u32>().ok()?, b.trim().parse::<u32>().ok()?),
                None => {
                    let n = part.parse::<u32>().ok()?;
                    (n, n)
                }
            };
            if hi < lo || hi - lo > MAX_RANGE {
                return None;
            }
            for n in lo..=hi {
                if let Some(id) = self.references.get(&n.to_string()) {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
            }
        }
        (!ids.is_empty()).then_some(ids)
    }

    fn figure(&self, n: &str) -> Option<&String> {
        self.figures
            .get(n)
            .or_else(|| self.figures.get(n.trim_end_matches(|c: char| c.is_ascii_lowercase())))
    }

    fn resolve(&self, caps: &Captures<'_>) -> Option<InlineNode> {
        if let Some(m) = caps.name("cite") {
            return self
                .citation(m.as_str())
                .map(|reference_ids| InlineNode::Citation { reference_ids });
        }
        if let Some(m) = caps.name("fig") {
            return self.figure(m.as_str()).map(|id| InlineNode::FigureRef {
                target_id: id.clone(),
            });
        }
        if let Some(m) = caps.name("tab") {
            return self.tables.get(m.as_str()).map(|id| InlineNode::TableRef {
                target_id: id.clone(),
            });
        }
        if let Some(m) = caps.name("eq") {
            return self.equations.get(m.as_str()).map(|id| InlineNode::EquationRef {
                target_id: id.clone(),
            });
        }
        None
    }
}

/// Split one plain text node around its resolvable mentions.
fn rewrite_text(content: &str, targets: &Targets, resolved: &mut usize) -> Option<Vec<InlineNode>> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in RE_MENTION.captures_iter(content) {
        let Some(node) = targets.resolve(&caps) else {
            continue;
        };
        let Some(m) = caps.get(0) else {
            continue;
        };
        if m.start() > last {
            out.push(InlineNode::text(&content[last..m.start()]));
        }
        out.push(node);
        last = m.end();
        *resolved += 1;
    }
    if out.is_empty() {
        return None;
    }
    if last < content.len() {
        out.push(InlineNode::text(&content[last..]));
    }
    Some(out)
}

fn rewrite_nodes(nodes: &mut Vec<InlineNode>, targets: &Targets, resolved: &mut usize) {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes.drain(..) {
        match &node {
            InlineNode::Text { content, style: None } => match rewrite_text(content, targets, resolved) {
                Some(parts) => out.extend(parts),
                None => out.push(node),
            },
            _ => out.push(node),
        }
    }
    *nodes = out;
}

/// Resolve citations and block mentions throughout `document`. Returns how
/// many mentions were converted.
pub fn resolve_cross_references(document: &mut Document) -> usize {
    let targets = Targets::collect(document);
    let mut resolved = 0;
    document.for_each_block_mut(&mut |block| {
        if matches!(block.kind, BlockKind::Heading { .. }) {
            return;
        }
        for rich in block.kind.rich_texts_mut() {
            rewrite_nodes(&mut rich.en, &targets, &mut resolved);
            rewrite_nodes(&mut rich.zh, &targets, &mut resolved);
        }
    });
    rewrite_nodes(&mut document.abstract_text.en, &targets, &mut resolved);
    rewrite_nodes(&mut document.abstract_text.zh, &targets, &mut resolved);
    debug!("cross-references: {} mentions resolved", resolved);
    resolved
}

/// Reference ids cited anywhere in the document, in first-citation order.
pub fn cited_reference_ids(document: &Document) -> Vec<&str> {
    fn walk<'a>(nodes: &'a [InlineNode], out: &mut Vec<&'a str>) {
        for node in nodes {
            match node {
                InlineNode::Citation { reference_ids } => {
                    for id in reference_ids {
                        if !out.contains(&id.as_str()) {
                            out.push(id);
                        }
                    }
                }
                InlineNode::Link { children, .. } => walk(children, out),
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    for block in crate::model::flatten_blocks(&document.sections) {
        match &block.kind {
            BlockKind::Paragraph { content, .. } | BlockKind::Quote { content, .. } => {
                walk(&content.en, &mut out);
                walk(&content.zh, &mut out);
            }
            BlockKind::OrderedList { items } | BlockKind::UnorderedList { items } => {
                for item in items {
                    walk(&item.content.en, &mut out);
                    walk(&item.content.zh, &mut out);
                }
            }
            BlockKind::Figure { caption, .. } | BlockKind::Table { caption, .. } => {
                walk(&caption.en, &mut out);
                walk(&caption.zh, &mut out);
            }
            _ => {}
        }
    }
    out
}

/// References no block cites, for diagnostics.
pub fn uncited<'a>(document: &'a Document) -> Vec<&'a Reference> {
    let cited = cited_reference_ids(document);
    document
        .references
        .iter()
        .filter(|r| !cited.contains(&r.id.as_str()))
        .collect()
}
