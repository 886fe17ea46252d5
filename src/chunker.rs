//! Token-bounded, overlapping windows over a normalised document.
//!
//! Lines are accumulated until the next one would push the window past
//! `max_tokens`. When a window closes in the middle of a paragraph, the text
//! after that paragraph's last sentence end is the *carry*: it is repeated
//! at the top of the next window so the boundary sentence is parsed whole
//! there, and the block parser drops it from the closing window (see
//! [`crate::detect::ParsedBlocks::finish_before`]). The lines each window
//! owns never overlap, so concatenating them reproduces the source.

use crate::detect::{code, is_block_start, math};
use crate::scanner::{normalize, to_lines, Line};
use crate::text::{ends_sentence, last_sentence_end};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    /// Carry (if any) followed by the window's own lines.
    pub content: String,
    pub index: usize,
    /// First line owned by this window (0-based, inclusive).
    pub start_line: usize,
    /// Last line owned by this window (inclusive).
    pub end_line: usize,
    /// Unterminated sentence repeated from the previous window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carry: Option<String>,
    /// The first paragraph of this window continues the last paragraph of
    /// the previous one.
    #[serde(default)]
    pub continues_paragraph: bool,
}

impl ChunkInfo {
    /// The window's own text, without the carry.
    pub fn own_text(&self) -> &str {
        match &self.carry {
            Some(carry) => self
                .content
                .strip_prefix(carry.as_str())
                .and_then(|rest| rest.strip_prefix('\n'))
                .unwrap_or(&self.content),
            None => &self.content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

/// Token cost of a line including its newline, so a window's summed cost
/// never underestimates the estimate of its joined content.
fn line_cost(s: &str) -> usize {
    (s.chars().count() + 1).div_ceil(4)
}

/// Inclusive line ranges of fenced code and multi-line display math.
fn protected_regions(lines: &[Line]) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let end = if let Some(fence) = code::parse_fence(&lines[i].text) {
            (i + 1..lines.len())
                .find(|&j| code::closes(&lines[j].text, &fence))
                .unwrap_or(lines.len() - 1)
        } else if let Some(close) = math::multiline_close(&lines[i].text) {
            match (i + 1..lines.len()).find(|&j| lines[j].text.contains(close.as_str())) {
                Some(j) => j,
                None => {
                    i += 1;
                    continue;
                }
            }
        } else {
            i += 1;
            continue;
        };
        regions.push((i, end));
        i = end + 1;
    }
    regions
}

fn is_paragraph_line(line: &Line) -> bool {
    !line.is_blank() && !is_block_start(&line.text)
}

#[derive(Clone)]
struct Boundary {
    carry: Option<String>,
    continues: bool,
}

/// Work out what the window `[start, end]` hands to the one after it.
///
/// Blank lines on either side of the boundary do not end the paragraph when
/// the text after them starts lowercase, matching how the block parser
/// rejoins a paragraph split by a page break.
fn boundary(
    lines: &[Line],
    start: usize,
    end: usize,
    region: &[bool],
    incoming: &Boundary,
    overlap_tokens: usize,
) -> Boundary {
    let none = Boundary {
        carry: None,
        continues: false,
    };
    // A window of blank lines passes on what it was handed.
    let Some(last) = (start..=end).rev().find(|&i| !lines[i].is_blank()) else {
        return incoming.clone();
    };
    let Some(next) = (end + 1..lines.len()).find(|&i| !lines[i].is_blank()) else {
        return none;
    };
    if !is_paragraph_line(&lines[last]) || region[last] || !is_paragraph_line(&lines[next]) || region[next] {
        return none;
    }
    if next > last + 1 && !lines[next].text.trim_start().starts_with(char::is_lowercase) {
        return none;
    }
    let end = last;

    let mut p = end;
    while p > start && is_paragraph_line(&lines[p - 1]) && !region[p - 1] {
        p -= 1;
    }
    // Text directly under a list item or quote marker is not a paragraph.
    if p > start && !lines[p - 1].is_blank() {
        return none;
    }

    let para = lines[p..=end]
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let para = para.trim();
    if ends_sentence(para) {
        return none;
    }

    let cut = last_sentence_end(para).unwrap_or(0);
    let carry = para[cut..].trim();
    let preceded = cut > 0 || (p == start && incoming.carry.is_some());
    if carry.is_empty() || carry.chars().count() > overlap_tokens.saturating_mul(4) {
        return Boundary {
            carry: None,
            continues: true,
        };
    }
    Boundary {
        carry: Some(carry.to_string()),
        continues: preceded,
    }
}

/// Split `text` into windows.
pub fn chunk_text(text: &str, options: ChunkOptions) -> Vec<ChunkInfo> {
    chunk_lines(&to_lines(&normalize(text)), options)
}

pub fn chunk_lines(lines: &[Line], options: ChunkOptions) -> Vec<ChunkInfo> {
    if lines.is_empty() {
        return Vec::new();
    }
    let max_tokens = options.max_tokens.max(1);

    // `region[i]`: line i is inside fenced code or display math.
    // `no_break[i]`: a window may not close right after line i, unless the
    // region alone is over twice the budget.
    let mut region = vec![false; lines.len()];
    let mut no_break = vec![false; lines.len()];
    for (a, b) in protected_regions(lines) {
        region[a..=b].fill(true);
        let cost: usize = lines[a..=b].iter().map(|l| line_cost(&l.text)).sum();
        if cost <= max_tokens.saturating_mul(2) {
            no_break[a..b].fill(true);
        }
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut incoming = Boundary {
        carry: None,
        continues: false,
    };
    let mut used = 0;

    for i in 0..lines.len() {
        let cost = line_cost(&lines[i].text);
        if i > start && used + cost > max_tokens && !no_break[i - 1] {
            let outgoing = boundary(
                lines,
                start,
                i - 1,
                &region,
                &incoming,
                options.overlap_tokens,
            );
            chunks.push(build(lines, chunks.len(), start, i - 1, incoming));
            used = outgoing.carry.as_deref().map(line_cost).unwrap_or(0);
            incoming = outgoing;
            start = i;
        }
        used += cost;
    }
    chunks.push(build(lines, chunks.len(), start, lines.len() - 1, incoming));
    chunks
}

fn build(lines: &[Line], index: usize, start: usize, end: usize, incoming: Boundary) -> ChunkInfo {
    let own = lines[start..=end]
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let content = match &incoming.carry {
        Some(carry) => format!("{carry}\n{own}"),
        None => own,
    };
    ChunkInfo {
        content,
        index,
        start_line: start,
        end_line: end,
        carry: incoming.carry,
        continues_paragraph: incoming.continues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::estimate_tokens;

    fn opts(max_tokens: usize, overlap_tokens: usize) -> ChunkOptions {
        ChunkOptions {
            max_tokens,
            overlap_tokens,
        }
    }

    fn own_lines(text: &str, chunks: &[ChunkInfo]) -> String {
        let lines = to_lines(&normalize(text));
        chunks
            .iter()
            .flat_map(|c| lines[c.start_line..=c.end_line].iter().map(|l| l.text.clone()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn small_document_is_one_chunk() {
        let chunks = chunk_text("# T\n\nHello.", opts(100, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 0);
        assert_eq!(chunks[0].end_line, 2);
        assert!(chunks[0].carry.is_none());
    }

    #[test]
    fn ranges_cover_the_document_without_overlap() {
        let text = (0..40)
            .map(|i| format!("Line number {i} has some words."))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_text(&text, opts(40, 10));
        assert!(chunks.len() > 1);
        assert_eq!(own_lines(&text, &chunks), text);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_line + 1, pair[1].start_line);
        }
    }

    #[test]
    fn windows_respect_budget() {
        let text = (0..50).map(|_| "word ".repeat(6)).collect::<Vec<_>>().join("\n");
        for chunk in chunk_text(&text, opts(30, 8)) {
            if chunk.end_line > chunk.start_line {
                assert!(estimate_tokens(&chunk.content) <= 30, "{chunk:?}");
            }
        }
    }

    #[test]
    fn oversized_single_line_is_its_own_window() {
        let long = "x".repeat(400);
        let text = format!("short\n{long}\nshort");
        let chunks = chunk_text(&text, opts(20, 5));
        assert!(chunks.iter().any(|c| c.start_line == 1 && c.end_line == 1));
    }

    #[test]
    fn unterminated_sentence_is_carried() {
        // The first window closes after "carried over the", mid-sentence.
        let text = "Alpha beta gamma delta. The sentence that gets\ncarried over the\nboundary ends here. More text.";
        let chunks = chunk_text(text, opts(17, 20));
        assert_eq!(chunks.len(), 2);
        let second = &chunks[1];
        let carry = second.carry.as_deref().expect("carry");
        assert!(carry.starts_with("The sentence that gets"));
        assert!(second.content.starts_with(carry));
        assert!(second.continues_paragraph);
        assert_eq!(second.own_text(), "boundary ends here. More text.");
    }

    #[test]
    fn finished_paragraph_has_no_carry() {
        let text = "First paragraph ends.\n\nSecond paragraph also ends here fine.";
        let chunks = chunk_text(text, opts(8, 20));
        assert!(chunks.iter().all(|c| c.carry.is_none()));
    }

    const PAGE_BREAK: &str =
        "The first page ends in the middle of a sentence that\n\ncontinues on the next page after the break. Done here.";

    #[test]
    fn page_break_inside_sentence_is_carried() {
        // Budget 15 closes the window after the blank line, 14 before it and
        // 10 leaves the blank line in a window of its own.
        for max in [10, 14, 15] {
            let chunks = chunk_text(PAGE_BREAK, opts(max, 20));
            let last = chunks.last().unwrap();
            assert_eq!(
                last.carry.as_deref(),
                Some("The first page ends in the middle of a sentence that"),
                "{chunks:?}"
            );
            assert!(last.content.contains("that\ncontinues"));
            assert!(chunks[1..].iter().all(|c| c.carry == last.carry));
        }
    }

    #[test]
    fn page_break_without_room_for_carry_continues() {
        let chunks = chunk_text(PAGE_BREAK, opts(15, 2));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].carry.is_none());
        assert!(chunks[1].continues_paragraph);
    }

    #[test]
    fn capitalised_text_after_blank_starts_fresh() {
        let text = PAGE_BREAK.replace("continues", "Continues");
        let chunks = chunk_text(&text, opts(15, 20));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].carry.is_none());
        assert!(!chunks[1].continues_paragraph);
    }

    #[test]
    fn fence_is_not_split() {
        let text = "Intro words here.\n```\nline one\nline two\nline three\n```\nAfter.";
        let chunks = chunk_text(text, opts(10, 5));
        for c in &chunks {
            let opens = c.start_line <= 1 && c.end_line >= 1;
            if opens {
                assert!(c.end_line >= 5, "fence split: {chunks:?}");
            }
        }
    }

    #[test]
    fn overlong_carry_is_dropped_but_continuation_kept() {
        let text = "Start. this fragment is quite long and has no end\nat all even on the next\nline";
        let chunks = chunk_text(text, opts(14, 2));
        assert!(chunks.len() >= 2);
        assert!(chunks[1].carry.is_none());
        assert!(chunks[1].continues_paragraph);
    }
}
