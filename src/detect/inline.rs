//! Inline tokenizer shared by every block that carries rich text.
//!
//! Scans left to right for the earliest link, code span, emphasis or
//! `$…$` math span; the text in between becomes `Text` nodes. Math payloads
//! have every `$` removed, so `InlineMath::latex` is dollar-free no matter how
//! the delimiters were nested or mismatched.

use crate::model::{InlineNode, TextStyle};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_INLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?P<code>`[^`\n]+`)|(?P<link>!?\[(?P<label>[^\]\n]*)\]\((?P<url>[^)\s]+)(?:\s+"(?P<title>[^"\n]*)")?\))|(?P<bold>\*\*[^*\n]+\*\*)|(?P<italic>\*[^*\s][^*\n]*\*)"#,
    )
    .unwrap()
});

/// A math span located in the source: byte range plus cleaned payload.
struct MathSpan {
    start: usize,
    end: usize,
    latex: String,
}

/// Tokenize one run of text into inline nodes.
pub fn tokenize(text: &str) -> Vec<InlineNode> {
    let mut nodes = Vec::new();
    let mut pending = String::new();
    let mut pos = 0;

    while pos < text.len() {
        let rx = RE_INLINE.captures_at(text, pos);
        let rx_start = rx
            .as_ref()
            .and_then(|c| c.get(0))
            .map(|m| m.start())
            .unwrap_or(usize::MAX);
        let math = find_math(text, pos).filter(|m| m.start < rx_start);

        if let Some(span) = math {
            pending.push_str(&text[pos..span.start]);
            flush_text(&mut pending, &mut nodes);
            nodes.push(InlineNode::InlineMath { latex: span.latex });
            pos = span.end;
            continue;
        }

        let Some(caps) = rx else {
            pending.push_str(&text[pos..]);
            break;
        };
        let Some(whole) = caps.get(0) else { break };
        pending.push_str(&text[pos..whole.start()]);
        flush_text(&mut pending, &mut nodes);

        if let Some(code) = caps.name("code") {
            let inner = code.as_str().trim_matches('`');
            nodes.push(styled(inner, TextStyle::Code));
        } else if caps.name("link").is_some() {
            let label = caps.name("label").map(|m| m.as_str()).unwrap_or("");
            let url = caps.name("url").map(|m| m.as_str()).unwrap_or("");
            nodes.push(InlineNode::Link {
                url: url.to_string(),
                title: caps.name("title").map(|m| m.as_str().to_string()),
                children: tokenize(label),
            });
        } else if let Some(bold) = caps.name("bold") {
            nodes.push(styled(bold.as_str().trim_matches('*'), TextStyle::Bold));
        } else if let Some(italic) = caps.name("italic") {
            nodes.push(styled(italic.as_str().trim_matches('*'), TextStyle::Italic));
        }
        pos = whole.end();
    }

    flush_text(&mut pending, &mut nodes);
    nodes
}

fn styled(content: &str, style: TextStyle) -> InlineNode {
    InlineNode::Text {
        content: content.to_string(),
        style: Some(style),
    }
}

fn flush_text(pending: &mut String, nodes: &mut Vec<InlineNode>) {
    if pending.is_empty() {
        return;
    }
    let content = pending.replace("\\$", "$");
    pending.clear();
    nodes.push(InlineNode::text(content));
}

fn is_escaped(bytes: &[u8], at: usize) -> bool {
    at > 0 && bytes[at - 1] == b'\\'
}

/// Find the first well-formed `$…$` or `$$…$$` span at or after `from`.
///
/// Single-dollar spans follow the usual TeX-in-Markdown rule: no space just
/// inside either delimiter and no digit right after the closing one, so
/// prices like "$5 and $10" stay text.
fn find_math(s: &str, from: usize) -> Option<MathSpan> {
    let bytes = s.as_bytes();
    let mut i = from;
    while let Some(off) = s[i..].find('$') {
        let start = i + off;
        if is_escaped(bytes, start) {
            i = start + 1;
            continue;
        }
        let run = if s[start + 1..].starts_with('$') { 2 } else { 1 };
        let open_end = start + run;
        if run == 1 && s[open_end..].chars().next().is_none_or(char::is_whitespace) {
            i = open_end;
            continue;
        }
        let delim = &s[start..open_end];
        let mut j = open_end;
        let mut close = None;
        while let Some(o) = s[j..].find(delim) {
            let c = j + o;
            let valid = !is_escaped(bytes, c)
                && (run == 2
                    || (!bytes[c - 1].is_ascii_whitespace()
                        && !s[c + 1..].starts_with(|ch: char| ch.is_ascii_digit())));
            if valid {
                close = Some(c);
                break;
            }
            j = c + 1;
        }
        let Some(c) = close else {
            i = open_end;
            continue;
        };
        let latex = s[open_end..c].replace('$', "").trim().to_string();
        if latex.is_empty() {
            i = c + run;
            continue;
        }
        return Some(MathSpan {
            start,
            end: c + run,
            latex,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::plain_text;

    fn math_of(nodes: &[InlineNode]) -> Vec<String> {
        nodes
            .iter()
            .filter_map(|n| match n {
                InlineNode::InlineMath { latex } => Some(latex.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_is_single_node() {
        assert_eq!(tokenize("hello world"), vec![InlineNode::text("hello world")]);
    }

    #[test]
    fn inline_math_strips_delimiters() {
        let nodes = tokenize("Let $x^2$ be given.");
        assert_eq!(nodes.len(), 3);
        assert_eq!(math_of(&nodes), vec!["x^2"]);
        assert_eq!(nodes[0], InlineNode::text("Let "));
        assert_eq!(nodes[2], InlineNode::text(" be given."));
    }

    #[test]
    fn double_dollar_inside_sentence_is_inline() {
        let nodes = tokenize("where $$a+b$$ holds");
        assert_eq!(math_of(&nodes), vec!["a+b"]);
    }

    #[test]
    fn unmatched_dollar_stays_text() {
        let nodes = tokenize("costs $5 and $10 total");
        assert!(math_of(&nodes).is_empty());
        assert_eq!(plain_text(&nodes), "costs $5 and $10 total");
    }

    #[test]
    fn escaped_dollar_is_literal() {
        let nodes = tokenize(r"price \$3 only");
        assert_eq!(nodes, vec![InlineNode::text("price $3 only")]);
    }

    #[test]
    fn link_with_title() {
        let nodes = tokenize(r#"see [the site](https://a.org "A") now"#);
        assert_eq!(nodes.len(), 3);
        match &nodes[1] {
            InlineNode::Link {
                url,
                title,
                children,
            } => {
                assert_eq!(url, "https://a.org");
                assert_eq!(title.as_deref(), Some("A"));
                assert_eq!(children, &vec![InlineNode::text("the site")]);
            }
            other => panic!("expected link, got {other:?}"),
        }
    }

    #[test]
    fn earliest_match_wins() {
        let nodes = tokenize("$a$ then [b](c)");
        assert!(matches!(nodes[0], InlineNode::InlineMath { .. }));
        assert!(matches!(nodes[2], InlineNode::Link { .. }));
    }

    #[test]
    fn styles() {
        let nodes = tokenize("**bold** and *it* and `code`");
        let styles: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                InlineNode::Text { style: Some(s), .. } => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            styles,
            vec![TextStyle::Bold, TextStyle::Italic, TextStyle::Code]
        );
    }

    #[test]
    fn dollar_inside_code_span_is_not_math() {
        let nodes = tokenize("run `echo $HOME` now");
        assert!(math_of(&nodes).is_empty());
    }

    #[test]
    fn empty_input() {
        assert!(tokenize("").is_empty());
    }
}
