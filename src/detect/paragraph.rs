//! Paragraph fallback: collects lines up to a blank line or block start and
//! reflows them into continuous text.
//!
//! Carrying an unterminated trailing sentence into the next paragraph is the
//! block parser's job (see [`super::ParsedBlocks`]); this module only deals
//! with a single run of lines.

use super::DetectContext;
use crate::model::{Block, BlockKind};
use crate::scanner::LineScanner;

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3000..=0x303F | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xFF00..=0xFFEF)
}

/// Append `next` to `acc` the way a reader would: undo `word-` + `break`
/// hyphenation, join CJK runs without a space, otherwise insert one space.
pub fn join_fragment(acc: &mut String, next: &str) {
    let next = next.trim();
    if next.is_empty() {
        return;
    }
    if acc.is_empty() {
        acc.push_str(next);
        return;
    }
    let first = next.chars().next().unwrap_or(' ');
    let mut tail = acc.chars().rev();
    let last = tail.next().unwrap_or(' ');
    let before_last = tail.next().unwrap_or(' ');

    if last == '-' && before_last.is_alphabetic() && first.is_lowercase() {
        acc.pop();
        acc.push_str(next);
    } else if is_cjk(last) && is_cjk(first) {
        acc.push_str(next);
    } else {
        acc.push(' ');
        acc.push_str(next);
    }
}

/// Reflow source lines into one line of text.
pub fn reflow<S: AsRef<str>>(lines: &[S]) -> String {
    let mut out = String::new();
    for line in lines {
        join_fragment(&mut out, line.as_ref());
    }
    out
}

/// Consume the lines of one paragraph. The first line is always taken so
/// the fallback makes progress; returns `None` only at a blank line or EOF.
pub fn collect_lines(scanner: &mut LineScanner) -> Option<Vec<String>> {
    let first = scanner.peek(0)?;
    if first.is_blank() {
        return None;
    }
    let mut lines = vec![first.text.clone()];
    scanner.next();
    while let Some(line) = scanner.peek(0) {
        if line.is_blank() || super::is_block_start(&line.text) {
            break;
        }
        lines.push(line.text.clone());
        scanner.next();
    }
    Some(lines)
}

pub fn make(text: &str, ctx: &mut DetectContext<'_>) -> Block {
    let content = ctx.rich(text);
    ctx.block(BlockKind::Paragraph {
        content,
        align: None,
    })
}

pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    let lines = collect_lines(scanner)?;
    Some(make(&reflow(&lines), ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenation_is_undone() {
        assert_eq!(reflow(&["a trans-", "formation here"]), "a transformation here");
    }

    #[test]
    fn real_hyphen_before_capital_is_kept() {
        assert_eq!(reflow(&["the Lipschitz-", "Continuous case"]), "the Lipschitz- Continuous case");
    }

    #[test]
    fn cjk_lines_join_without_space() {
        assert_eq!(reflow(&["这是一个", "句子。"]), "这是一个句子。");
    }

    #[test]
    fn stops_at_block_start() {
        let mut s = LineScanner::from_text("one\ntwo\n## Next\nthree");
        let lines = collect_lines(&mut s).unwrap();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(s.peek(0).unwrap().text, "## Next");
    }

    #[test]
    fn blank_returns_none() {
        let mut s = LineScanner::from_text("\nbody");
        assert!(collect_lines(&mut s).is_none());
        assert_eq!(s.position(), 0);
    }
}
