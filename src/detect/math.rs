//! Display math: `$$…$$`, `\[…\]` and `\begin{equation|align|gather…}`.
//!
//! Only regions that start on their own line are handled here. A `$…$` span
//! embedded in a sentence belongs to the inline tokenizer.

use super::DetectContext;
use crate::model::{Block, BlockKind};
use crate::scanner::LineScanner;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_BEGIN_ENV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\\begin\{(?P<env>equation|align|gather|multline|eqnarray)(?P<star>\*?)\}").unwrap()
});
static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{(?P<v>[^}]*)\}").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\tag\*?\{(?P<v>[^}]*)\}").unwrap());
static RE_TRAILING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\((?P<v>\d+(?:\.\d+)*[a-z]?)\)\s*$").unwrap());

/// Does `line` open a display-math region?
pub fn is_math_start(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("$$") || t.starts_with("\\[") || RE_BEGIN_ENV.is_match(t)
}

/// For a line opening a multi-line display-math region, the delimiter that
/// closes it. `None` for single-line regions and non-math lines.
pub fn multiline_close(line: &str) -> Option<String> {
    let t = line.trim();
    let (rest, close) = if let Some(r) = t.strip_prefix("$$") {
        (r, "$$".to_string())
    } else if let Some(r) = t.strip_prefix("\\[") {
        (r, "\\]".to_string())
    } else {
        let caps = RE_BEGIN_ENV.captures(t)?;
        let end = caps.get(0)?.end();
        (&t[end..], format!("\\end{{{}{}}}", &caps["env"], &caps["star"]))
    };
    if rest.contains(close.as_str()) {
        None
    } else {
        Some(close)
    }
}

struct Region {
    body: String,
    after_close: String,
}

/// Collect from the opening delimiter through the line holding `close`.
/// Returns `None` (cursor untouched) when the region never closes.
fn collect_region(scanner: &mut LineScanner, open_len: usize, close: &str) -> Option<Region> {
    let start = scanner.position();
    let first = scanner.peek(0)?.text.trim().to_string();
    let rest = &first[open_len..];

    if let Some(end) = rest.find(close) {
        scanner.next();
        return Some(Region {
            body: rest[..end].to_string(),
            after_close: rest[end + close.len()..].to_string(),
        });
    }

    let mut body = vec![rest.to_string()];
    scanner.next();
    loop {
        let Some(line) = scanner.peek(0) else {
            scanner.reset(start);
            return None;
        };
        let text = line.text.clone();
        scanner.next();
        if let Some(end) = text.find(close) {
            body.push(text[..end].to_string());
            return Some(Region {
                body: body.join("\n"),
                after_close: text[end + close.len()..].to_string(),
            });
        }
        body.push(text);
    }
}

fn finish(region: Region, wrap_env: Option<&str>, ctx: &mut DetectContext<'_>) -> Block {
    let mut latex = region.body;
    let label = RE_LABEL
        .captures(&latex)
        .and_then(|c| c.name("v"))
        .map(|m| m.as_str().trim().to_string());
    let mut number = RE_TAG
        .captures(&latex)
        .and_then(|c| c.name("v"))
        .map(|m| m.as_str().trim().to_string());
    latex = RE_LABEL.replace_all(&latex, "").into_owned();
    latex = RE_TAG.replace_all(&latex, "").into_owned();
    if number.is_none() {
        number = RE_TRAILING_NUMBER
            .captures(&region.after_close)
            .and_then(|c| c.name("v"))
            .map(|m| m.as_str().to_string());
    }

    let body = latex.replace('$', "");
    let body = body.trim();
    let latex = match wrap_env {
        Some(env) => format!("\\begin{{{env}}}\n{body}\n\\end{{{env}}}"),
        None => body.to_string(),
    };
    ctx.block(BlockKind::Math {
        latex,
        label,
        number,
    })
}

pub fn detect(scanner: &mut LineScanner, ctx: &mut DetectContext<'_>) -> Option<Block> {
    let line = scanner.peek(0)?;
    let t = line.text.trim_start().to_string();

    if t.starts_with("$$") {
        let region = collect_region(scanner, 2, "$$")?;
        return Some(finish(region, None, ctx));
    }
    if t.starts_with("\\[") {
        let region = collect_region(scanner, 2, "\\]")?;
        return Some(finish(region, None, ctx));
    }

    let caps = RE_BEGIN_ENV.captures(&t)?;
    let env = format!("{}{}", &caps["env"], &caps["star"]);
    let open_len = caps.get(0).map(|m| m.end())?;
    let close = format!("\\end{{{env}}}");
    let region = collect_region(scanner, open_len, &close)?;
    // Single-equation environments collapse to their body; multi-line ones
    // keep the wrapper so alignment markers stay meaningful.
    let wrap = match &caps["env"] {
        "equation" => None,
        _ => Some(env.as_str()),
    };
    Some(finish(region, wrap, ctx))
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

    fn math(block: Block) -> (String, Option<String>, Option<String>) {
        match block.kind {
            BlockKind::Math {
                latex,
                label,
                number,
            } => (latex, label, number),
            other => panic!("expected math, got {other:?}"),
        }
    }

    #[test]
    fn single_line_dollars_with_number() {
        let (block, s) = run("$$ E = mc^2 $$ (3)\nnext");
        let (latex, _, number) = math(block.unwrap());
        assert_eq!(latex, "E = mc^2");
        assert_eq!(number.as_deref(), Some("3"));
        assert_eq!(s.peek(0).unwrap().text, "next");
    }

    #[test]
    fn multi_line_dollars() {
        let (block, s) = run("$$\na + b\n= c\n$$\nafter");
        let (latex, _, _) = math(block.unwrap());
        assert_eq!(latex, "a + b\n= c");
        assert_eq!(s.peek(0).unwrap().text, "after");
    }

    #[test]
    fn bracket_form() {
        let (block, _) = run("\\[\n\\int_0^1 f\n\\]");
        assert_eq!(math(block.unwrap()).0, "\\int_0^1 f");
    }

    #[test]
    fn equation_env_with_label() {
        let (block, _) = run("\\begin{equation}\\label{eq:loss}\nL = \\sum_i l_i\n\\end{equation}");
        let (latex, label, _) = math(block.unwrap());
        assert_eq!(latex, "L = \\sum_i l_i");
        assert_eq!(label.as_deref(), Some("eq:loss"));
    }

    #[test]
    fn align_env_keeps_wrapper() {
        let (block, _) = run("\\begin{align*}\na &= b \\\\\nc &= d\n\\end{align*}");
        let (latex, _, _) = math(block.unwrap());
        assert!(latex.starts_with("\\begin{align*}"));
        assert!(latex.ends_with("\\end{align*}"));
    }

    #[test]
    fn multiline_close_delimiters() {
        assert_eq!(multiline_close("$$").as_deref(), Some("$$"));
        assert_eq!(multiline_close("$$ x $$"), None);
        assert_eq!(multiline_close("\\begin{align}").as_deref(), Some("\\end{align}"));
        assert_eq!(multiline_close("text"), None);
    }

    #[test]
    fn unterminated_declines() {
        let (block, s) = run("$$\nx = 1\nno close");
        assert!(block.is_none());
        assert_eq!(s.position(), 0);
    }

    #[test]
    fn latex_never_contains_dollar() {
        let (block, _) = run("$$ $x$ + y $$");
        assert!(!math(block.unwrap()).0.contains('$'));
    }
}
