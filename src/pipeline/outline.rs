//! Outline recovery for plain text.
//!
//! Text extracted from a PDF usually loses its heading markup, which leaves
//! the section tree builder with nothing to nest on. When the body has fewer
//! than two detectable headings, lines are grouped into short classification
//! units, the collaborator is asked which units open with a heading, and
//! those lines are rewritten as ATX headings before chunking.

use crate::cancel::CancellationToken;
use crate::config::ParseConfig;
use crate::detect::heading;
use crate::error::PhaseError;
use crate::pipeline::llm::{complete_with_retry, CompletionRequest, RetryPolicy, TextCompletion};
use crate::pipeline::postprocess::extract_json;
use crate::prompts;
use crate::scanner::{to_lines, Line, LineScanner};
use crate::text::truncate_chars;
use serde_json::Value;
use std::ops::Range;
use tracing::{debug, info};

/// Token target of one classification unit.
const UNIT_MIN_TOKENS: usize = 24;
/// Most lines merged into one unit.
const UNIT_MAX_LINES: usize = 6;
/// Units sent per completion.
const UNITS_PER_REQUEST: usize = 80;
/// Characters of each unit shown to the model.
const UNIT_PREVIEW_CHARS: usize = 240;

/// A run of lines classified together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineUnit {
    pub number: usize,
    pub lines: Range<usize>,
    pub text: String,
}

/// One unit the model says opens with a heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingHint {
    pub unit: usize,
    pub level: u8,
    pub title: String,
}

/// Count lines the block grammar would already treat as headings.
pub fn detectable_headings(lines: &[Line]) -> usize {
    lines
        .iter()
        .filter(|l| heading::is_atx(&l.text) || heading::numbered_heading(&l.text).is_some())
        .count()
}

/// Whether the outline pass should run on `lines`.
pub fn needs_outline(lines: &[Line]) -> bool {
    lines.iter().any(|l| !l.is_blank()) && detectable_headings(lines) < 2
}

/// Group `lines` into classification units with exact line ranges.
pub fn units(lines: &[Line]) -> Vec<OutlineUnit> {
    let mut scanner = LineScanner::new(lines.to_vec());
    let mut out = Vec::new();
    while let Some(merged) = scanner.merge_ahead_lines(UNIT_MIN_TOKENS, UNIT_MAX_LINES) {
        scanner.consume_merged(&merged);
        out.push(OutlineUnit {
            number: out.len() + 1,
            lines: merged.lines,
            text: merged.text,
        });
    }
    out
}

/// Coerce the model's answer into hints. Unknown shapes yield nothing.
pub fn parse_hints(v: &Value) -> Vec<HeadingHint> {
    let items = match v {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj.get("headings").or_else(|| obj.get("outline")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| {
            let unit = match item.get("unit")? {
                Value::Number(n) => n.as_u64()? as usize,
                Value::String(s) => s.trim().trim_matches(['[', ']']).parse().ok()?,
                _ => return None,
            };
            let level = item
                .get("level")
                .and_then(Value::as_u64)
                .map(|l| l.clamp(1, 6) as u8)
                .unwrap_or(1);
            let title = item.get("title")?.as_str()?.trim().to_string();
            (!title.is_empty()).then_some(HeadingHint { unit, level, title })
        })
        .collect()
}

/// Rewrite hinted lines as ATX headings. A hint is applied only when its
/// unit's first line really starts with the title; any text after the title
/// on that line moves to its own line.
pub fn apply_hints(lines: &[Line], units: &[OutlineUnit], hints: &[HeadingHint]) -> (String, usize) {
    let mut out: Vec<String> = lines.iter().map(|l| l.text.clone()).collect();
    let mut applied = 0;

    // Bottom-up so inserted lines do not shift pending targets.
    let mut targets: Vec<(usize, &HeadingHint)> = hints
        .iter()
        .filter_map(|h| {
            let unit = units.iter().find(|u| u.number == h.unit)?;
            let first = unit.lines.clone().find(|&i| !lines[i].is_blank())?;
            Some((first, h))
        })
        .collect();
    targets.sort_by(|a, b| b.0.cmp(&a.0));
    targets.dedup_by_key(|t| t.0);

    for (index, hint) in targets {
        let line = out[index].trim().to_string();
        let Some(rest) = strip_title(&line, &hint.title) else {
            debug!("outline: unit {} does not start with {:?}", hint.unit, hint.title);
            continue;
        };
        // The heading detector splits any numbering prefix back off.
        out[index] = format!("{} {}", "#".repeat(hint.level as usize), hint.title);
        if !rest.is_empty() {
            out.insert(index + 1, rest.to_string());
        }
        applied += 1;
    }
    (out.join("\n"), applied)
}

/// Text after `title` if `line` starts with it (case- and space-insensitive).
fn strip_title<'a>(line: &'a str, title: &str) -> Option<&'a str> {
    let mut rest = line;
    for word in title.split_whitespace() {
        rest = rest.trim_start();
        let head = rest.get(..word.len())?;
        if !head.eq_ignore_ascii_case(word) {
            return None;
        }
        rest = &rest[word.len()..];
    }
    Some(rest.trim_start_matches([':', '.', ' ']).trim())
}

/// Promote heading lines in `body` and return the rewritten text. Errors
/// leave the caller with the unchanged body.
pub async fn recover_outline(
    completion: &dyn TextCompletion,
    body: &str,
    config: &ParseConfig,
    cancel: &CancellationToken,
) -> Result<String, PhaseError> {
    let lines = to_lines(body);
    let units = units(&lines);
    if units.is_empty() {
        return Ok(body.to_string());
    }

    let policy = RetryPolicy::from(config);
    let mut hints = Vec::new();
    for batch in units.chunks(UNITS_PER_REQUEST) {
        let listed: Vec<(usize, String)> = batch
            .iter()
            .map(|u| (u.number, truncate_chars(&u.text, UNIT_PREVIEW_CHARS).to_string()))
            .collect();
        let request = CompletionRequest::new(prompts::OUTLINE_SYSTEM_PROMPT, prompts::outline_prompt(&listed), config);
        let raw = complete_with_retry(completion, &request, &policy, cancel, "structure").await?;
        let Some(json) = extract_json(&raw) else {
            return Err(PhaseError::MalformedResponse {
                phase: "structure".to_string(),
                detail: format!("no outline array in {} chars", raw.len()),
            });
        };
        hints.extend(parse_hints(&json));
    }

    let (text, applied) = apply_hints(&lines, &units, &hints);
    info!("structure: {} of {} suggested headings promoted", applied, hints.len());
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use futures::future::BoxFuture;
    use serde_json::json;

    const PLAIN: &str = "Deep Things\n\nIntroduction\nWe study deep things in this work and\nfind them deep.\n\nRelated Work Prior work on shallow things exists.\n\nConclusion\nDeep.";

    struct Canned(&'static str);

    impl TextCompletion for Canned {
        fn complete<'a>(&'a self, _r: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>> {
            Box::pin(async move { Ok(self.0.to_string()) })
        }
    }

    fn config() -> ParseConfig {
        ParseConfig::builder().max_retries(0).retry_backoff_ms(1).build().unwrap()
    }

    #[test]
    fn plain_text_needs_outline() {
        assert!(needs_outline(&to_lines(PLAIN)));
        assert!(!needs_outline(&to_lines("# A\n\ntext\n\n## B\n\ntext")));
        assert!(!needs_outline(&to_lines("\n\n")));
    }

    #[test]
    fn units_cover_every_line_once() {
        let lines = to_lines(PLAIN);
        let units = units(&lines);
        let mut next = 0;
        for u in &units {
            assert_eq!(u.lines.start, next);
            next = u.lines.end;
        }
        assert!(next <= lines.len());
        assert!(lines[next..].iter().all(Line::is_blank));
    }

    #[test]
    fn hints_accept_loose_shapes() {
        let v = json!([
            {"unit": 2, "level": 1, "title": "Introduction"},
            {"unit": "[3]", "level": 9, "title": "Related Work"},
            {"unit": 4, "title": ""}
        ]);
        let hints = parse_hints(&v);
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[1].unit, 3);
        assert_eq!(hints[1].level, 6);
    }

    #[test]
    fn apply_splits_inline_heading() {
        let lines = to_lines(PLAIN);
        let units = units(&lines);
        let related = units.iter().find(|u| u.text.starts_with("Related")).unwrap().number;
        let hints = vec![
            HeadingHint {
                unit: related,
                level: 1,
                title: "Related Work".into(),
            },
            HeadingHint {
                unit: related,
                level: 2,
                title: "Nope".into(),
            },
        ];
        let (text, applied) = apply_hints(&lines, &units, &hints);
        assert_eq!(applied, 1);
        assert!(text.contains("# Related Work\nPrior work on shallow things exists."));
    }

    #[tokio::test]
    async fn recover_promotes_headings() {
        let lines = to_lines(PLAIN);
        let intro = units(&lines)
            .iter()
            .find(|u| u.text.starts_with("Introduction"))
            .unwrap()
            .number;
        let answer: &'static str = Box::leak(
            format!("```json\n[{{\"unit\": {intro}, \"level\": 1, \"title\": \"Introduction\"}}]\n```").into_boxed_str(),
        );
        let out = recover_outline(&Canned(answer), PLAIN, &config(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.contains("\n# Introduction\nWe study"));
    }

    #[tokio::test]
    async fn garbage_answer_is_an_error() {
        let err = recover_outline(&Canned("no idea"), PLAIN, &config(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::MalformedResponse { .. }));
    }
}
