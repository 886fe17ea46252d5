use super::{caption_line, CaptionKind, DetectContext};
use crate::model::{Block, BlockKind, RichText};
use crate::scanner::LineScanner;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_IMAGE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*!\[(?P<alt>[^\]]*)\]\((?P<src>[^)\s]+)(?:\s+"(?P<title>[^"]*)")?\)\s*$"#).unwrap()
});

pub fn is_image_line(line: &str) -> bool {
    RE_IMAGE_LINE.is_match(line)
}

/// A stand-alone `![alt](src "title")` line, optionally followed by a
/// `Figure N:` caption line.
pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    let caps = RE_IMAGE_LINE.captures(&scanner.peek(0)?.text)?;
    let src = caps.name("src")?.as_str().to_string();
    let alt = caps
        .name("alt")
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    let title = caps
        .name("title")
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    scanner.next();

    let (caption, number) = match scanner
        .peek(0)
        .and_then(|l| caption_line(&l.text, CaptionKind::Figure))
    {
        Some((num, text)) => {
            scanner.next();
            (ctx.rich(&text), Some(num))
        }
        None => (
            title.map(|t| ctx.rich(&t)).unwrap_or_else(RichText::default),
            None,
        ),
    };

    Some(ctx.block(BlockKind::Figure {
        src,
        alt,
        caption,
        description: None,
        number,
        uploaded_filename: None,
    }))
}
