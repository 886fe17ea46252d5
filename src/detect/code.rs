use super::{caption_line, CaptionKind, DetectContext};
use crate::model::{Block, BlockKind};
use crate::scanner::LineScanner;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_FENCE_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<indent> {0,3})(?P<fence>`{3,}|~{3,})[ \t]*(?P<info>[^`]*)$").unwrap()
});

pub struct Fence {
    pub indent: usize,
    pub marker: char,
    pub len: usize,
    pub language: Option<String>,
}

pub fn parse_fence(line: &str) -> Option<Fence> {
    let caps = RE_FENCE_OPEN.captures(line)?;
    let fence = caps.name("fence")?.as_str();
    let language = caps
        .name("info")
        .and_then(|m| m.as_str().split_whitespace().next())
        .map(|s| s.trim_matches(['{', '}', '.']).to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    Some(Fence {
        indent: caps.name("indent").map(|m| m.as_str().len()).unwrap_or(0),
        marker: fence.chars().next()?,
        len: fence.chars().count(),
        language,
    })
}

pub fn is_fence(line: &str) -> bool {
    parse_fence(line).is_some()
}

/// Does `line` close `fence`? Needs a run of the same character at least
/// as long as the opening one and nothing else.
pub fn closes(line: &str, fence: &Fence) -> bool {
    let t = line.trim();
    let run = t.chars().take_while(|&c| c == fence.marker).count();
    run >= fence.len && t.chars().count() == run
}

fn strip_indent(line: &str, indent: usize) -> &str {
    let spaces = line.chars().take(indent).take_while(|&c| c == ' ').count();
    &line[spaces..]
}

/// Fenced code. An unterminated fence runs to the end of input.
pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    let fence = parse_fence(&scanner.peek(0)?.text)?;
    scanner.next();

    let mut body = Vec::new();
    while let Some(line) = scanner.next() {
        if closes(&line.text, &fence) {
            break;
        }
        body.push(strip_indent(&line.text, fence.indent).to_string());
    }

    let caption = match scanner
        .peek(0)
        .and_then(|l| caption_line(&l.text, CaptionKind::Listing))
    {
        Some((num, text)) => {
            scanner.next();
            Some(if text.is_empty() { num } else { text })
        }
        None => None,
    };

    Some(ctx.block(BlockKind::Code {
        language: fence.language,
        code: body.join("\n"),
        caption,
    }))
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

    #[test]
    fn fenced_with_language() {
        let (block, s) = run("```Python\nprint('$x$')\n```\nafter");
        match block.unwrap().kind {
            BlockKind::Code { language, code, .. } => {
                assert_eq!(language.as_deref(), Some("python"));
                assert_eq!(code, "print('$x$')");
            }
            other => panic!("expected code, got {other:?}"),
        }
        assert_eq!(s.peek(0).unwrap().text, "after");
    }

    #[test]
    fn indented_fence_strips_indent() {
        let (block, _) = run("  ~~~\n  let x = 1;\n    nested\n  ~~~");
        match block.unwrap().kind {
            BlockKind::Code { code, language, .. } => {
                assert_eq!(code, "let x = 1;\n  nested");
                assert!(language.is_none());
            }
            other => panic!("expected code, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_runs_to_eof() {
        let (block, s) = run("```\na\nb");
        assert!(block.is_some());
        assert!(s.eof());
    }

    #[test]
    fn shorter_fence_does_not_close() {
        let (block, _) = run("````\n```\ninner\n```\n````");
        match block.unwrap().kind {
            BlockKind::Code { code, .. } => assert_eq!(code, "```\ninner\n```"),
            other => panic!("expected code, got {other:?}"),
        }
    }

    #[test]
    fn listing_caption_consumed() {
        let (block, s) = run("```\nx\n```\nAlgorithm 1: Training loop");
        match block.unwrap().kind {
            BlockKind::Code { caption, .. } => assert_eq!(caption.as_deref(), Some("Training loop")),
            other => panic!("expected code, got {other:?}"),
        }
        assert!(s.eof());
    }
}
