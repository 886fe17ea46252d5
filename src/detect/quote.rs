use super::{paragraph, DetectContext};
use crate::model::{Block, BlockKind};
use crate::scanner::LineScanner;

fn quote_body(line: &str) -> Option<&str> {
    let t = line.trim_start();
    if line.len() - t.len() > 3 {
        return None;
    }
    let rest = t.strip_prefix('>')?;
    Some(rest.trim_start_matches('>').trim())
}

pub fn is_quote_line(line: &str) -> bool {
    quote_body(line).is_some()
}

fn attribution(line: &str) -> Option<&str> {
    ["—", "--", "–"]
        .iter()
        .find_map(|dash| line.strip_prefix(dash))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// A run of `>` lines. A final `— Name` line becomes the author.
pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    let mut lines: Vec<String> = Vec::new();
    while let Some(body) = scanner.peek(0).and_then(|l| quote_body(&l.text)) {
        lines.push(body.to_string());
        scanner.next();
    }
    if lines.is_empty() {
        return None;
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let author = match lines.last().and_then(|l| attribution(l)) {
        Some(name) if lines.len() > 1 => {
            let name = name.to_string();
            lines.pop();
            Some(name)
        }
        _ => None,
    };

    let content = ctx.rich(&paragraph::reflow(&lines));
    Some(ctx.block(BlockKind::Quote { content, author }))
}
