//! Heading detection: ATX (`## Title`) and numbered prefixes (`1.2 Title`,
//! `IV. Title`, `B) Title`).
//!
//! The numbering prefix is always stripped from the stored title and kept in
//! `number`. Depth of a dotted numeric prefix is its dot-separator count plus
//! one, capped at 6; roman numerals are depth 1 and single letters depth 2.

use super::DetectContext;
use crate::model::{Block, BlockKind};
use crate::scanner::LineScanner;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_NUMBER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<num>(?:\d{1,2}\.)*\d{1,2}\.?|[IVXLC]{1,6}\.|[A-Z][.)])\s+(?P<title>\S.*?)\s*$")
        .unwrap()
});

/// Longest title (in characters) a numbered line may have to count as a heading.
const MAX_TITLE_CHARS: usize = 100;
/// Longest title (in words) a numbered line may have to count as a heading.
const MAX_TITLE_WORDS: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingLine {
    pub level: u8,
    pub number: Option<String>,
    pub title: String,
}

/// Parse an ATX heading: up to three spaces, 1–6 `#`, then a space.
pub fn parse_atx(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let title = rest
        .trim()
        .trim_end_matches('#')
        .trim_end();
    if title.is_empty() {
        return None;
    }
    Some((hashes as u8, title))
}

pub fn is_atx(line: &str) -> bool {
    parse_atx(line).is_some()
}

/// Depth implied by a numbering prefix.
pub fn prefix_depth(number: &str) -> u8 {
    let n = number.trim_end_matches(['.', ')']);
    if n.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let dots = n.matches('.').count();
        (dots + 1).min(6) as u8
    } else if n.len() == 1 && !matches!(n, "I" | "V" | "X") {
        // Single letters other than the common roman numerals are
        // IEEE-style subsection labels (A., B., C., …).
        2
    } else {
        1
    }
}

/// Split a leading numbering prefix off a title.
pub fn split_number(title: &str) -> (Option<String>, &str) {
    match RE_NUMBER_PREFIX.captures(title) {
        Some(caps) => {
            let num = caps.name("num").map(|m| m.as_str()).unwrap_or("");
            let rest = caps.name("title").map(|m| m.as_str()).unwrap_or(title);
            (
                Some(num.trim_end_matches(['.', ')']).to_string()),
                rest,
            )
        }
        None => (None, title),
    }
}

fn looks_like_title(title: &str) -> bool {
    let Some(first) = title.chars().next() else {
        return false;
    };
    if !(first.is_uppercase() || (first.is_alphabetic() && !first.is_lowercase())) {
        return false;
    }
    if title.chars().count() > MAX_TITLE_CHARS
        || title.split_whitespace().count() > MAX_TITLE_WORDS
    {
        return false;
    }
    !title.ends_with(['.', ',', ';', ':']) && !title.contains(". ")
}

/// Recognise a numbered heading line such as `1.2.3 Deep Dive`.
pub fn numbered_heading(line: &str) -> Option<HeadingLine> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let caps = RE_NUMBER_PREFIX.captures(trimmed)?;
    let raw_num = caps.name("num")?.as_str();
    let title = caps.name("title")?.as_str();
    if !looks_like_title(title) {
        return None;
    }
    Some(HeadingLine {
        level: prefix_depth(raw_num),
        number: Some(raw_num.trim_end_matches(['.', ')']).to_string()),
        title: title.to_string(),
    })
}

/// ATX first, then numbered prefix.
pub fn classify(line: &str) -> Option<HeadingLine> {
    if let Some((level, raw)) = parse_atx(line) {
        let (number, title) = split_number(raw);
        return Some(HeadingLine {
            level,
            number,
            title: title.to_string(),
        });
    }
    numbered_heading(line)
}

/// True when a numbered prefix is clearly sectioning rather than a list
/// marker: multi-level (`2.1`), or a heading-shaped line whose next
/// non-blank line is not another list item.
pub fn is_numbered_heading_at(scanner: &LineScanner) -> bool {
    let Some(line) = scanner.peek(0) else {
        return false;
    };
    let Some(heading) = numbered_heading(&line.text) else {
        return false;
    };
    if heading.level > 1 && heading.number.as_deref().is_some_and(|n| n.contains('.')) {
        return true;
    }
    let mut offset = 1;
    while let Some(next) = scanner.peek(offset) {
        if !next.is_blank() {
            return super::list::parse_marker(&next.text).is_none();
        }
        offset += 1;
    }
    true
}

pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    let line = scanner.peek(0)?;
    let heading = classify(&line.text)?;
    scanner.next();
    let content = ctx.rich(&heading.title);
    Some(ctx.block(BlockKind::Heading {
        level: heading.level,
        content,
        number: heading.number,
    }))
}
