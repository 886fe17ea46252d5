//! Title, authors, abstract and keywords from the top of a paper.
//!
//! [`extract_local`] is a line heuristic that needs no collaborator; it is
//! the whole phase in Local mode and the fallback when the LLM call fails.
//! [`extract_with_llm`] asks for one JSON object and coerces whatever shape
//! comes back, then fills gaps from the local result.

use crate::cancel::CancellationToken;
use crate::config::ParseConfig;
use crate::detect::{heading, paragraph};
use crate::error::PhaseError;
use crate::model::{Author, Metadata};
use crate::pipeline::llm::{complete_with_retry, CompletionRequest, RetryPolicy, TextCompletion};
use crate::pipeline::postprocess::extract_json;
use crate::prompts;
use crate::scanner::{normalize, to_lines, Line};
use crate::text::truncate_chars;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Metadata plus the abstract and keywords found alongside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    pub metadata: Metadata,
    pub abstract_text: String,
    pub keywords: Vec<String>,
}

impl FrontMatter {
    /// Fill every empty field from `other`.
    pub fn fill_from(&mut self, other: FrontMatter) {
        let m = &mut self.metadata;
        let o = other.metadata;
        if m.title.trim().is_empty() {
            m.title = o.title;
        }
        if m.authors.is_empty() {
            m.authors = o.authors;
        }
        m.journal = m.journal.take().or(o.journal);
        m.publication_date = m.publication_date.take().or(o.publication_date);
        m.doi = m.doi.take().or(o.doi);
        m.year = m.year.or(o.year);
        m.article_type = m.article_type.take().or(o.article_type);
        if self.abstract_text.trim().is_empty() {
            self.abstract_text = other.abstract_text;
        }
        if self.keywords.is_empty() {
            self.keywords = other.keywords;
        }
    }
}

static RE_DOI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(10\.\d{4,9}/[^\s\x22<>]+)").unwrap());

static RE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19[5-9]\d|20\d\d)\b").unwrap());

static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static RE_ABSTRACT_INLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:\*\*|__)?(?:abstract|摘要)(?:\*\*|__)?\s*(?:[—–:.]|--?)\s*(?P<text>\S.*)$").unwrap()
});

static RE_ABSTRACT_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:\*\*|__)?(?:abstract|摘要)(?:\*\*|__)?[:.]?$").unwrap());

static RE_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:\*\*|__|\*|_)?(?:keywords|key words|index terms|关键词)(?:\*\*|__|\*|_)?\s*(?:[—–:：]|--?)\s*(?:\*\*|__)?\s*(?P<list>.+)$",
    )
    .unwrap()
});

static RE_FOOTNOTE_MARKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d*†‡§¶,]+$").unwrap());

/// Title text of a heading line.
fn heading_title(line: &str) -> Option<String> {
    heading::classify(line).map(|h| h.title)
}

fn is_abstract_heading(line: &str) -> bool {
    let t = heading_title(line).unwrap_or_else(|| line.trim().to_string());
    RE_ABSTRACT_HEADING.is_match(t.trim())
}

/// A comma/`and`-separated list of short capitalised names.
fn parse_author_line(line: &str) -> Option<Vec<String>> {
    let t = line.trim();
    if t.is_empty() || t.chars().count() > 300 || t.ends_with('.') && !t.ends_with(" al.") {
        return None;
    }
    if heading::is_atx(t) || RE_ABSTRACT_INLINE.is_match(t) || RE_KEYWORDS.is_match(t) {
        return None;
    }
    let cleaned = RE_EMAIL.replace_all(t, "");
    let mut names = Vec::new();
    for part in cleaned.split([',', ';', '&']).flat_map(|p| p.split(" and ")) {
        let name = RE_FOOTNOTE_MARKS.replace(part.trim(), "");
        let name = name.trim().trim_matches('*');
        if name.is_empty() {
            continue;
        }
        let words: Vec<&str> = name.split_whitespace().collect();
        let capitalised = words
            .iter()
            .all(|w| w.chars().next().is_some_and(|c| c.is_uppercase() || !c.is_ascii()));
        if words.is_empty() || words.len() > 5 || !capitalised {
            return None;
        }
        names.push(words.join(" "));
    }
    (!names.is_empty()).then_some(names)
}

fn split_keywords(list: &str) -> Vec<String> {
    list.split([',', ';', '·', '，', '；'])
        .map(|k| k.trim().trim_end_matches('.').trim_matches(['*', '_']).trim())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn ends_abstract(l: &Line) -> bool {
    heading::classify(&l.text).is_some() || RE_KEYWORDS.is_match(&l.text)
}

/// Abstract paragraph(s): after an `Abstract` heading up to the next
/// heading or keywords line, or the text of an `Abstract—…` line up to the
/// next blank line.
fn find_abstract(lines: &[Line]) -> String {
    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = RE_ABSTRACT_INLINE.captures(&line.text) {
            let mut parts = vec![caps["text"].to_string()];
            parts.extend(
                lines[i + 1..]
                    .iter()
                    .take_while(|l| !l.is_blank() && !ends_abstract(l))
                    .map(|l| l.text.clone()),
            );
            return paragraph::reflow(&parts);
        }
        if is_abstract_heading(&line.text) {
            let body: Vec<&Line> = lines[i + 1..].iter().take_while(|l| !ends_abstract(l)).collect();
            let mut paragraphs: Vec<String> = Vec::new();
            let mut current: Vec<&str> = Vec::new();
            for l in body {
                if l.is_blank() {
                    if !current.is_empty() {
                        paragraphs.push(paragraph::reflow(&current));
                        current.clear();
                    }
                } else {
                    current.push(&l.text);
                }
            }
            if !current.is_empty() {
                paragraphs.push(paragraph::reflow(&current));
            }
            return paragraphs.join(" ");
        }
    }
    String::new()
}

/// Heuristic metadata from the first `window_chars` characters.
pub fn extract_local(text: &str, window_chars: usize) -> FrontMatter {
    let normalized = normalize(text);
    let window = truncate_chars(&normalized, window_chars);
    let lines = to_lines(window);
    let mut out = FrontMatter::default();

    let title_at = lines
        .iter()
        .position(|l| heading::parse_atx(&l.text).is_some())
        .or_else(|| lines.iter().position(|l| !l.is_blank()));
    if let Some(i) = title_at {
        let raw = &lines[i].text;
        out.metadata.title = heading::parse_atx(raw)
            .map(|(_, t)| t.to_string())
            .unwrap_or_else(|| raw.trim().to_string());

        if let Some(next) = lines[i + 1..].iter().find(|l| !l.is_blank()) {
            if let Some(names) = parse_author_line(&next.text) {
                out.metadata.authors = names
                    .into_iter()
                    .map(|name| Author {
                        name,
                        ..Author::default()
                    })
                    .collect();
            }
        }
    }

    let emails: Vec<&str> = RE_EMAIL.find_iter(window).map(|m| m.as_str()).collect();
    if !emails.is_empty() && emails.len() == out.metadata.authors.len() {
        for (author, email) in out.metadata.authors.iter_mut().zip(&emails) {
            author.email = Some(email.to_string());
        }
    } else if let (Some(first), [email]) = (out.metadata.authors.first_mut(), emails.as_slice()) {
        first.email = Some(email.to_string());
    }

    out.metadata.doi = RE_DOI
        .captures(window)
        .map(|c| c[1].trim_end_matches(['.', ',', ';', ')']).to_string());
    out.metadata.year = RE_YEAR.captures(window).and_then(|c| c[1].parse().ok());
    if window.contains("arXiv:") {
        out.metadata.journal = Some("arXiv".to_string());
        out.metadata.article_type = Some("preprint".to_string());
    }

    out.abstract_text = find_abstract(&lines);
    out.keywords = lines
        .iter()
        .find_map(|l| RE_KEYWORDS.captures(&l.text).map(|c| split_keywords(&c["list"])))
        .unwrap_or_default();
    out
}

// ── JSON coercion ────────────────────────────────────────────────────────

fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match v.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A year given as a number, a numeric string, or a date string.
pub fn coerce_year(v: Option<&Value>) -> Option<u16> {
    match v? {
        Value::Number(n) => n.as_u64().and_then(|y| u16::try_from(y).ok()),
        Value::String(s) => RE_YEAR.captures(s).and_then(|c| c[1].parse().ok()),
        _ => None,
    }
}

fn coerce_author(v: &Value) -> Option<Author> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(Author {
            name: s.trim().to_string(),
            ..Author::default()
        }),
        Value::Object(_) => Some(Author {
            name: str_field(v, &["name", "fullName", "full_name"])?,
            affiliation: str_field(v, &["affiliation", "institution", "org"]),
            email: str_field(v, &["email", "mail"]),
        }),
        _ => None,
    }
}

fn coerce_keywords(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|k| k.as_str())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        Some(Value::String(s)) => split_keywords(s),
        _ => Vec::new(),
    }
}

/// Coerce a loosely-shaped metadata object.
pub fn from_json(v: &Value) -> Option<FrontMatter> {
    let obj = match v {
        Value::Object(_) => v,
        Value::Array(items) => items.iter().find(|i| i.is_object())?,
        _ => return None,
    };
    let authors = match obj.get("authors").or_else(|| obj.get("author")) {
        Some(Value::Array(items)) => items.iter().filter_map(coerce_author).collect(),
        Some(Value::String(s)) => s
            .split([',', ';'])
            .flat_map(|p| p.split(" and "))
            .filter_map(|p| coerce_author(&Value::String(p.to_string())))
            .collect(),
        _ => Vec::new(),
    };
    Some(FrontMatter {
        metadata: Metadata {
            title: str_field(obj, &["title"]).unwrap_or_default(),
            authors,
            journal: str_field(obj, &["journal", "venue", "publication"]),
            publication_date: str_field(obj, &["publicationDate", "publication_date", "date"]),
            doi: str_field(obj, &["doi", "DOI"]),
            year: coerce_year(obj.get("year")).or_else(|| coerce_year(obj.get("publicationDate"))),
            article_type: str_field(obj, &["articleType", "article_type", "type"]),
        },
        abstract_text: str_field(obj, &["abstract", "summary"]).unwrap_or_default(),
        keywords: coerce_keywords(obj.get("keywords")),
    })
}

/// One completion for the opening window; gaps filled from `local`.
pub async fn extract_with_llm(
    completion: &dyn TextCompletion,
    text: &str,
    local: FrontMatter,
    config: &ParseConfig,
    cancel: &CancellationToken,
) -> Result<FrontMatter, PhaseError> {
    let window = truncate_chars(text, config.metadata_window_chars);
    let request = CompletionRequest::new(prompts::METADATA_SYSTEM_PROMPT, prompts::metadata_prompt(window), config);
    let raw = complete_with_retry(completion, &request, &RetryPolicy::from(config), cancel, "metadata").await?;
    let mut parsed = extract_json(&raw)
        .as_ref()
        .and_then(from_json)
        .ok_or_else(|| PhaseError::MalformedResponse {
            phase: "metadata".to_string(),
            detail: format!("no metadata object in {} chars", raw.len()),
        })?;
    debug!("metadata: model returned title {:?}", parsed.metadata.title);
    parsed.fill_from(local);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAPER: &str = "# Attention Is All You Need\n\
Ashish Vaswani, Noam Shazeer and Niki Parmar\n\
\n\
## Abstract\n\
\n\
The dominant sequence transduction models are based on complex\n\
recurrent networks.\n\
\n\
We propose the Transformer.\n\
\n\
Keywords: attention; transformers, sequence models.\n\
\n\
## 1 Introduction\n\
\n\
Published 2017. DOI 10.5555/3295222.3295349.\n";

    #[test]
    fn local_title_authors_abstract() {
        let fm = extract_local(PAPER, 6000);
        assert_eq!(fm.metadata.title, "Attention Is All You Need");
        let names: Vec<_> = fm.metadata.authors.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Ashish Vaswani", "Noam Shazeer", "Niki Parmar"]);
        assert_eq!(
            fm.abstract_text,
            "The dominant sequence transduction models are based on complex recurrent networks. We propose the Transformer."
        );
        assert_eq!(fm.keywords, vec!["attention", "transformers", "sequence models"]);
        assert_eq!(fm.metadata.year, Some(2017));
        assert_eq!(fm.metadata.doi.as_deref(), Some("10.5555/3295222.3295349"));
    }

    #[test]
    fn inline_abstract_prefix() {
        let text = "Deep Residual Learning\n\nAbstract—Deeper neural networks are more\ndifficult to train.\n\nIndex Terms—residual, vision";
        let fm = extract_local(text, 6000);
        assert_eq!(fm.abstract_text, "Deeper neural networks are more difficult to train.");
        assert_eq!(fm.keywords, vec!["residual", "vision"]);
        assert!(fm.metadata.authors.is_empty());
    }

    #[test]
    fn sentence_is_not_an_author_line() {
        assert!(parse_author_line("We study the problem of learning.").is_none());
        assert!(parse_author_line("Alice Smith1, Bob Jones2*").is_some());
    }

    #[test]
    fn window_limits_search() {
        let text = format!("Title\n\n{}\nKeywords: late", "x ".repeat(500));
        assert!(extract_local(&text, 100).keywords.is_empty());
    }

    #[test]
    fn json_coercion_accepts_loose_shapes() {
        let v = json!({
            "title": "Paper",
            "authors": ["A. One", {"name": "B. Two", "email": "b@x.org"}],
            "year": "2021-05-01",
            "keywords": "x; y",
            "abstract": "Short."
        });
        let fm = from_json(&v).unwrap();
        assert_eq!(fm.metadata.authors.len(), 2);
        assert_eq!(fm.metadata.authors[1].email.as_deref(), Some("b@x.org"));
        assert_eq!(fm.metadata.year, Some(2021));
        assert_eq!(fm.keywords, vec!["x", "y"]);
        assert_eq!(fm.abstract_text, "Short.");
        assert!(from_json(&json!("nope")).is_none());
    }

    #[test]
    fn fill_from_keeps_present_values() {
        let mut a = FrontMatter {
            metadata: Metadata {
                title: "Model title".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let b = extract_local(PAPER, 6000);
        a.fill_from(b);
        assert_eq!(a.metadata.title, "Model title");
        assert_eq!(a.metadata.year, Some(2017));
        assert_eq!(a.keywords.len(), 3);
    }
}
