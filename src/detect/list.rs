//! Ordered / unordered list detection with indentation-based nesting.
//!
//! Nesting follows a monotonic indent stack: pop while the new marker's
//! indent is below the top, push when it is deeper. An item continues over
//! lines indented deeper than its marker; a new marker, a blank line followed
//! by something that is not a list item or an indented continuation, or a
//! line at or below the marker's indent ends it.

use super::{divider, heading, paragraph, DetectContext};
use crate::model::{Block, BlockKind, ListItem};
use crate::scanner::LineScanner;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_UNORDERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<indent>[ \t]*)(?:[-*+]\s+|•\s*)(?P<content>.*)$").unwrap());

static RE_ORDERED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<indent>[ \t]*)(?P<num>\d{1,3}|[ivxlcdm]{1,6}|[IVXLCDM]{1,6}|[a-zA-Z])[.)]\s+(?P<content>.*)$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Ordered,
    Unordered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker<'a> {
    pub indent: usize,
    pub kind: ListKind,
    /// The ordinal of an ordered marker (`3`, `iv`, `b`); empty for bullets.
    pub numeral: &'a str,
    pub content: &'a str,
}

impl Marker<'_> {
    /// Bullets and digit ordinals. Letter and roman ordinals are too easily
    /// confused with initials ("A. Smith") to interrupt a running paragraph.
    pub fn interrupts_paragraph(&self) -> bool {
        self.kind == ListKind::Unordered || self.numeral.chars().all(|c| c.is_ascii_digit())
    }
}

fn indent_width(s: &str) -> usize {
    s.chars().map(|c| if c == '\t' { 4 } else { 1 }).sum()
}

/// Recognise a list marker at the start of `line`.
pub fn parse_marker(line: &str) -> Option<Marker<'_>> {
    if let Some(caps) = RE_UNORDERED.captures(line) {
        return Some(Marker {
            indent: indent_width(caps.name("indent")?.as_str()),
            kind: ListKind::Unordered,
            numeral: "",
            content: caps.name("content")?.as_str(),
        });
    }
    let caps = RE_ORDERED.captures(line)?;
    Some(Marker {
        indent: indent_width(caps.name("indent")?.as_str()),
        kind: ListKind::Ordered,
        numeral: caps.name("num")?.as_str(),
        content: caps.name("content")?.as_str(),
    })
}

struct PendingItem {
    level: u8,
    marker_indent: usize,
    lines: Vec<String>,
}

pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    let start = scanner.position();
    let first = scanner.peek(0)?;
    if divider::is_divider(&first.text) {
        return None;
    }
    let marker = parse_marker(&first.text)?;
    let kind = marker.kind;
    if kind == ListKind::Ordered && heading::is_numbered_heading_at(scanner) {
        return None;
    }

    let base = marker.indent;
    let mut stack = vec![base];
    let mut items = vec![PendingItem {
        level: 0,
        marker_indent: base,
        lines: vec![marker.content.trim().to_string()],
    }];
    scanner.next();

    loop {
        let Some(line) = scanner.peek(0) else { break };

        if line.is_blank() {
            let mut offset = 1;
            while scanner.peek(offset).is_some_and(|l| l.is_blank()) {
                offset += 1;
            }
            let Some(after) = scanner.peek(offset) else { break };
            let current_indent = items.last().map(|i| i.marker_indent).unwrap_or(base);
            let resumes = match parse_marker(&after.text) {
                Some(m) => m.indent > base || (m.indent == base && m.kind == kind),
                None => after.indent() > current_indent,
            };
            if !resumes || divider::is_divider(&after.text) {
                break;
            }
            for _ in 0..offset {
                scanner.next();
            }
            continue;
        }

        if divider::is_divider(&line.text) {
            break;
        }

        if let Some(m) = parse_marker(&line.text) {
            if m.indent < base || (m.indent == base && m.kind != kind) {
                break;
            }
            while stack.len() > 1 && stack.last().is_some_and(|&top| m.indent < top) {
                stack.pop();
            }
            if stack.last().is_some_and(|&top| m.indent > top) {
                stack.push(m.indent);
            }
            items.push(PendingItem {
                level: (stack.len() - 1).min(u8::MAX as usize) as u8,
                marker_indent: m.indent,
                lines: vec![m.content.trim().to_string()],
            });
            scanner.next();
            continue;
        }

        let current_indent = items.last().map(|i| i.marker_indent).unwrap_or(base);
        if line.indent() > current_indent && !super::is_block_start(line.text.trim_start()) {
            let text = line.text.trim().to_string();
            if let Some(item) = items.last_mut() {
                item.lines.push(text);
            }
            scanner.next();
            continue;
        }
        break;
    }

    if items.is_empty() {
        scanner.reset(start);
        return None;
    }

    let items = items
        .into_iter()
        .map(|item| ListItem {
            content: ctx.rich(&paragraph::reflow(&item.lines)),
            level: item.level,
        })
        .collect();
    let kind = match kind {
        ListKind::Ordered => BlockKind::OrderedList { items },
        ListKind::Unordered => BlockKind::UnorderedList { items },
    };
    Some(ctx.block(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;
    use crate::model::Language;

    fn run(text: &str) -> (Option<Block>, LineScanner) {
        let mut ids = IdAllocator::new();
        let mut ctx = DetectContext::new(&mut ids, Language::En);
        let mut s = LineScanner::from_text(text);
        let block = detect(&mut s, &mut ctx);
        (block, s)
    }

    fn items(block: &Block) -> Vec<(String, u8)> {
        match &block.kind {
            BlockKind::OrderedList { items } | BlockKind::UnorderedList { items } => items
                .iter()
                .map(|i| (i.content.plain_text(), i.level))
                .collect(),
            other => panic!("not a list: {other:?}"),
        }
    }

    #[test]
    fn markers() {
        assert_eq!(parse_marker("- a").unwrap().kind, ListKind::Unordered);
        assert_eq!(parse_marker("• bullet").unwrap().content, "bullet");
        assert_eq!(parse_marker("12) twelve").unwrap().kind, ListKind::Ordered);
        assert_eq!(parse_marker("iv. four").unwrap().kind, ListKind::Ordered);
        assert_eq!(parse_marker("b) bee").unwrap().content, "bee");
        assert!(parse_marker("-not a list").is_none());
        assert!(parse_marker("plain").is_none());
    }

    #[test]
    fn blank_then_paragraph_ends_list() {
        let (block, s) = run("- a\n- b\n\nNext paragraph.");
        let block = block.unwrap();
        assert!(matches!(block.kind, BlockKind::UnorderedList { .. }));
        assert_eq!(items(&block).len(), 2);
        // The blank line is left for the caller.
        assert!(s.peek(0).unwrap().is_blank());
        assert_eq!(s.peek(1).unwrap().text, "Next paragraph.");
    }

    #[test]
    fn nested_levels() {
        let (block, _) = run("- a\n  - a1\n    - a1x\n  - a2\n- b");
        let got = items(&block.unwrap());
        let levels: Vec<u8> = got.iter().map(|(_, l)| *l).collect();
        assert_eq!(levels, vec![0, 1, 2, 1, 0]);
    }

    #[test]
    fn indented_continuation_joins_item() {
        let (block, _) = run("1) first part\n   continues here\n2) second");
        let got = items(&block.unwrap());
        assert_eq!(got[0].0, "first part continues here");
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn unindented_line_terminates_item() {
        let (block, s) = run("- item\nNot part of it.");
        assert_eq!(items(&block.unwrap()).len(), 1);
        assert_eq!(s.peek(0).unwrap().text, "Not part of it.");
    }

    #[test]
    fn loose_list_resumes_after_blank() {
        let (block, _) = run("- a\n\n- b");
        assert_eq!(items(&block.unwrap()).len(), 2);
    }

    #[test]
    fn kind_switch_at_base_ends_list() {
        let (block, s) = run("- a\n1) b");
        assert_eq!(items(&block.unwrap()).len(), 1);
        assert_eq!(s.peek(0).unwrap().text, "1) b");
    }

    #[test]
    fn numbered_heading_declines() {
        let (block, s) = run("1. Introduction\n\nBody text.");
        assert!(block.is_none());
        assert_eq!(s.position(), 0);
    }
}
