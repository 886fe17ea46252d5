//! GFM-style pipe tables.

use super::{caption_line, CaptionKind, DetectContext};
use crate::model::{Alignment, Block, BlockKind, RichText};
use crate::scanner::LineScanner;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_DELIMITER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(?:\|\s*:?-{3,}:?\s*)*\|?\s*$").unwrap()
});

/// A non-blank line containing at least one unescaped `|`.
pub fn is_pipe_row(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && split_unescaped(t).len() > 1
}

pub fn is_delimiter_row(line: &str) -> bool {
    line.contains('|') && RE_DELIMITER.is_match(line)
}

fn split_unescaped(s: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    cells.push(current);
    cells
}

/// Split a pipe row into trimmed cells, dropping the outer pipes.
pub fn split_cells(line: &str) -> Vec<String> {
    let t = line.trim();
    let mut cells = split_unescaped(t);
    if t.starts_with('|') && !cells.is_empty() {
        cells.remove(0);
    }
    if t.ends_with('|') && !t.ends_with("\\|") && !cells.is_empty() {
        cells.pop();
    }
    cells.into_iter().map(|c| c.trim().to_string()).collect()
}

fn alignment_of(cell: &str) -> Alignment {
    let c = cell.trim();
    match (c.starts_with(':'), c.ends_with(':')) {
        (true, true) => Alignment::Center,
        (false, true) => Alignment::Right,
        _ => Alignment::Left,
    }
}

fn fit_width(mut row: Vec<String>, width: usize) -> Vec<String> {
    row.resize(width, String::new());
    row
}

pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    let header = scanner.peek(0)?;
    let delimiter = scanner.peek(1)?;
    if !is_pipe_row(&header.text) || !is_delimiter_row(&delimiter.text) {
        return None;
    }
    let headers = split_cells(&header.text);
    let width = headers.len();
    let delimiter_cells = split_cells(&delimiter.text);
    let align = if delimiter.text.contains(':') {
        Some(fit_align(
            delimiter_cells.iter().map(|c| alignment_of(c)).collect(),
            width,
        ))
    } else {
        None
    };
    scanner.next();
    scanner.next();

    let mut rows = Vec::new();
    while let Some(line) = scanner.peek(0) {
        // A stray delimiter mid-table is dropped rather than ending it.
        if is_delimiter_row(&line.text) {
            scanner.next();
            continue;
        }
        if !is_pipe_row(&line.text) {
            break;
        }
        rows.push(fit_width(split_cells(&line.text), width));
        scanner.next();
    }

    let mut caption = RichText::default();
    let mut number = None;
    if let Some((num, text)) = scanner
        .peek(0)
        .and_then(|l| caption_line(&l.text, CaptionKind::Table))
    {
        caption = ctx.rich(&text);
        number = Some(num);
        scanner.next();
    }

    Some(ctx.block(BlockKind::Table {
        headers: Some(headers),
        rows,
        align,
        caption,
        number,
    }))
}

fn fit_align(mut align: Vec<Alignment>, width: usize) -> Vec<Alignment> {
    align.resize(width, Alignment::Left);
    align
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
    fn cells_respect_escaped_pipes() {
        assert_eq!(split_cells("| a | b \\| c |"), vec!["a", "b | c"]);
        assert_eq!(split_cells("a | b"), vec!["a", "b"]);
    }

    #[test]
    fn delimiter_row_shapes() {
        assert!(is_delimiter_row("|---|:---:|---:|"));
        assert!(is_delimiter_row("--- | ---"));
        assert!(!is_delimiter_row("---"));
        assert!(!is_delimiter_row("| -- | -- |"));
    }

    #[test]
    fn table_with_alignment_and_caption() {
        let (block, s) = run("| A | B | C |\n|:---|:---:|---:|\n| 1 | 2 | 3 |\n| 4 | 5 |\nTable 2: Results.\nafter");
        let block = block.unwrap();
        match block.kind {
            BlockKind::Table {
                headers,
                rows,
                align,
                caption,
                number,
            } => {
                assert_eq!(headers.unwrap(), vec!["A", "B", "C"]);
                assert_eq!(rows, vec![vec!["1", "2", "3"], vec!["4", "5", ""]]);
                assert_eq!(
                    align.unwrap(),
                    vec![Alignment::Left, Alignment::Center, Alignment::Right]
                );
                assert_eq!(caption.plain_text(), "Results.");
                assert_eq!(number.as_deref(), Some("2"));
            }
            other => panic!("expected table, got {other:?}"),
        }
        assert_eq!(s.peek(0).unwrap().text, "after");
    }

    #[test]
    fn missing_delimiter_declines() {
        let (block, s) = run("| A | B |\n| 1 | 2 |");
        assert!(block.is_none());
        assert_eq!(s.position(), 0);
    }

    #[test]
    fn rows_stop_at_non_pipe_line() {
        let (block, s) = run("A | B\n--- | ---\n1 | 2\nplain text");
        assert!(block.is_some());
        assert_eq!(s.peek(0).unwrap().text, "plain text");
    }
}
