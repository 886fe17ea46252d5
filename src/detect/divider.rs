use super::DetectContext;
use crate::model::{Block, BlockKind};
use crate::scanner::LineScanner;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_DIVIDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(?:(?:-[ \t]*){3,}|(?:\*[ \t]*){3,}|(?:_[ \t]*){3,})$").unwrap());

/// `---`, `***` or `___` (spaces allowed between the characters).
pub fn is_divider(line: &str) -> bool {
    RE_DIVIDER.is_match(line)
}

pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    if !is_divider(&scanner.peek(0)?.text) {
        return None;
    }
    scanner.next();
    Some(ctx.block(BlockKind::Divider {}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognised_forms() {
        assert!(is_divider("---"));
        assert!(is_divider("* * *"));
        assert!(is_divider("_____"));
        assert!(!is_divider("--"));
        assert!(!is_divider("- item"));
        assert!(!is_divider("|---|---|"));
    }
}
