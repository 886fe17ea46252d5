//! Reference-list location, entry splitting and parsing.
//!
//! The references section is found by its heading and handed over as raw
//! text; it never goes through block detection. Entries are split on
//! `[n]` / `n.` markers or blank lines, then parsed either by the local
//! heuristic below or in batches by the completion collaborator.

use crate::cancel::CancellationToken;
use crate::config::ParseConfig;
use crate::detect::paragraph;
use crate::error::PhaseError;
use crate::ids::IdAllocator;
use crate::metadata::coerce_year;
use crate::model::Reference;
use crate::pipeline::llm::{complete_with_retry, CompletionRequest, RetryPolicy, TextCompletion};
use crate::pipeline::postprocess::extract_json;
use crate::prompts;
use crate::scanner::{normalize, Line, LineScanner};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

static RE_REFERENCES_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s{0,3}(?:#{1,6}\s+)?(?:(?:\d{1,2}|[IVX]{1,4})\.?\s+)?(?:\*\*|__)?(?:references|bibliography|literature cited|works cited|参考文献)(?:\*\*|__)?\s*:?\s*$",
    )
    .unwrap()
});

static RE_BRACKET_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[(?P<n>\d{1,4})\]\s*(?P<rest>.*)$").unwrap());

static RE_NUMBERED_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<n>\d{1,4})\.\s+(?P<rest>\S.*)$").unwrap());

static RE_DOI: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:doi:\s*|https?://(?:dx\.)?doi\.org/)?(10\.\d{4,9}/[^\s\x22<>]+)").unwrap());

static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s\x22<>]+").unwrap());

static RE_PAREN_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((?P<y>(?:19|20)\d\d)[a-z]?\)").unwrap());

static RE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?P<y>(?:19|20)\d\d)[a-z]?\b").unwrap());

static RE_QUOTED_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“](?P<t>[^"”]{3,}?)[,.]?["”]"#).unwrap());

static RE_PAGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\bpp?\.\s*(?P<a>\d+(?:\s*[-–—]+\s*\d+)?)|[:,]\s*(?P<b>\d+\s*[-–—]+\s*\d+))").unwrap()
});

static RE_VOLUME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bvol(?:ume)?\.?\s*(?P<v>\d+)").unwrap());

static RE_ISSUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:no|issue)\.?\s*(?P<i>\d+)").unwrap());

/// APA-style `12(3)` volume/issue pair.
static RE_VOL_ISSUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?P<v>\d{1,4})\s*\((?P<i>\d{1,4})\)").unwrap());

static RE_INITIALS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[A-Z]\.?[\s-]?)+$").unwrap());

pub fn is_references_heading(line: &str) -> bool {
    RE_REFERENCES_HEADING.is_match(line)
}

/// Index of the references heading line. The last match wins so a table of
/// contents entry is not mistaken for the section.
pub fn find_references_start(lines: &[Line]) -> Option<usize> {
    lines.iter().rposition(|l| is_references_heading(&l.text))
}

fn flush(current: &mut Vec<String>, out: &mut Vec<String>) {
    if !current.is_empty() {
        let entry = paragraph::reflow(current);
        if !entry.is_empty() {
            out.push(entry);
        }
        current.clear();
    }
}

/// Split a references section into one string per entry.
///
/// Entries keep their `[n]` / `n.` marker so numbering survives. Wrapped
/// lines are joined, undoing end-of-line hyphenation.
pub fn split_entries(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let lines: Vec<&str> = normalized.lines().filter(|l| !is_references_heading(l)).collect();

    let marker: Option<&Regex> = if lines.iter().any(|l| RE_BRACKET_ENTRY.is_match(l)) {
        Some(&RE_BRACKET_ENTRY)
    } else if lines.iter().filter(|l| RE_NUMBERED_ENTRY.is_match(l)).count() >= 2 {
        Some(&RE_NUMBERED_ENTRY)
    } else {
        None
    };

    let mut out = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let has_blank_separators = lines.iter().any(|l| l.trim().is_empty());

    for line in lines {
        let blank = line.trim().is_empty();
        let starts_entry = match marker {
            Some(re) => re.is_match(line),
            None => !has_blank_separators && !blank,
        };
        if starts_entry || (marker.is_none() && blank) {
            flush(&mut current, &mut out);
        }
        if !blank {
            current.push(line.trim().to_string());
        }
    }
    flush(&mut current, &mut out);
    out
}

fn split_authors(part: &str) -> Vec<String> {
    let part = part.trim().trim_end_matches([',', ';', ':']).trim();
    if part.is_empty() {
        return Vec::new();
    }
    let mut authors: Vec<String> = Vec::new();
    for piece in part.split([',', ';', '&']).flat_map(|p| p.split(" and ")) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        // "Vaswani, A." splits into a surname and its initials.
        if RE_INITIALS.is_match(piece) {
            if let Some(last) = authors.last_mut().filter(|l| !l.contains(['.', ' '])) {
                last.push_str(", ");
                last.push_str(piece);
                continue;
            }
        }
        authors.push(piece.to_string());
    }
    authors
}

fn first_sentence(s: &str) -> (&str, &str) {
    match s.find(". ") {
        Some(i) => (&s[..i], &s[i + 2..]),
        None => (s.trim_end_matches('.'), ""),
    }
}

/// Venue: text up to the first volume/pages/year detail.
fn venue(s: &str) -> Option<String> {
    let s = s.trim().trim_start_matches("In ").trim_start_matches("in ");
    let cut = s
        .find([',', '.'])
        .unwrap_or(s.len())
        .min(RE_YEAR.find(s).map(|m| m.start()).unwrap_or(s.len()));
    let v = s[..cut].trim().trim_end_matches([',', '(']).trim();
    (!v.is_empty()).then(|| v.to_string())
}

/// Heuristic parse of one entry.
pub fn parse_entry(entry: &str, index: usize) -> Reference {
    let (number, body) = if let Some(c) = RE_BRACKET_ENTRY.captures(entry) {
        (Some(c["n"].to_string()), c["rest"].to_string())
    } else if let Some(c) = RE_NUMBERED_ENTRY.captures(entry) {
        (Some(c["n"].to_string()), c["rest"].to_string())
    } else {
        (None, entry.trim().to_string())
    };

    let doi = RE_DOI
        .captures(&body)
        .map(|c| c[1].trim_end_matches(['.', ',', ';', ')']).to_string());
    let url = RE_URL
        .find(&body)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ')']).to_string())
        .filter(|u| !u.contains("doi.org/"));

    let mut reference = Reference {
        id: String::new(),
        number: number.clone(),
        doi,
        url,
        ..Reference::default()
    };

    if let Some(c) = RE_QUOTED_TITLE.captures(&body) {
        let m = c.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        reference.authors = split_authors(&body[..m.0]);
        reference.title = c["t"].trim().to_string();
        reference.publication = venue(body[m.1..].trim_start_matches([',', ' ']));
    } else if let Some(c) = RE_PAREN_YEAR.captures(&body) {
        let m = c.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        reference.authors = split_authors(&body[..m.0]);
        let rest = body[m.1..].trim_start_matches(['.', ' ']);
        let (title, after) = first_sentence(rest);
        reference.title = title.trim().to_string();
        reference.publication = venue(after);
    } else {
        let (authors, rest) = first_sentence(&body);
        let (title, after) = first_sentence(rest);
        if title.is_empty() {
            reference.title = authors.trim().to_string();
        } else {
            reference.authors = split_authors(authors);
            reference.title = title.trim().to_string();
            reference.publication = venue(after);
        }
    }

    reference.year = RE_PAREN_YEAR
        .captures(&body)
        .or_else(|| RE_YEAR.captures(&body))
        .and_then(|c| c["y"].parse().ok());
    reference.pages = RE_PAGES
        .captures(&body)
        .and_then(|c| c.name("a").or_else(|| c.name("b")))
        .map(|m| m.as_str().replace(' ', ""));
    if let Some(c) = RE_VOLUME.captures(&body) {
        reference.volume = Some(c["v"].to_string());
        reference.issue = RE_ISSUE.captures(&body).map(|c| c["i"].to_string());
    } else if let Some(c) = RE_VOL_ISSUE.captures(&body) {
        reference.volume = Some(c["v"].to_string());
        reference.issue = Some(c["i"].to_string());
    }

    reference.id = format!("ref-{}", number.unwrap_or_else(|| (index + 1).to_string()));
    reference
}

/// Make reference ids unique (`ref-3`, `ref-3-2`, …).
pub fn assign_ids(references: &mut [Reference]) {
    let mut ids = IdAllocator::new();
    for (i, r) in references.iter_mut().enumerate() {
        let wanted = if r.id.trim().is_empty() {
            format!("ref-{}", r.number.clone().unwrap_or_else(|| (i + 1).to_string()))
        } else {
            r.id.clone()
        };
        r.id = ids.claim(&wanted, "ref");
    }
}

/// Local parse of a whole references section.
pub fn parse_local(text: &str) -> Vec<Reference> {
    let mut refs: Vec<Reference> = split_entries(text)
        .iter()
        .enumerate()
        .map(|(i, e)| parse_entry(e, i))
        .collect();
    assign_ids(&mut refs);
    refs
}

// ── LLM batches ──────────────────────────────────────────────────────────

fn opt_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerce one loosely-shaped reference object.
pub fn coerce_reference(v: &Value, index: usize) -> Option<Reference> {
    if !v.is_object() {
        return None;
    }
    let authors = match v.get("authors") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|a| match a {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(_) => opt_str(a, "name"),
                _ => None,
            })
            .filter(|a| !a.is_empty())
            .collect(),
        Some(Value::String(s)) => split_authors(s),
        _ => Vec::new(),
    };
    let title = opt_str(v, "title").unwrap_or_default();
    if title.is_empty() && authors.is_empty() {
        return None;
    }
    let number = opt_str(v, "number").map(|n| n.trim_matches(['[', ']', '.']).to_string());
    Some(Reference {
        id: format!("ref-{}", number.clone().unwrap_or_else(|| (index + 1).to_string())),
        number,
        authors,
        title,
        publication: opt_str(v, "publication").or_else(|| opt_str(v, "journal")),
        year: coerce_year(v.get("year")),
        doi: opt_str(v, "doi"),
        url: opt_str(v, "url"),
        pages: opt_str(v, "pages"),
        volume: opt_str(v, "volume"),
        issue: opt_str(v, "issue"),
    })
}

/// Parse `entries` in batches of `config.reference_batch_size`. Any failed
/// batch fails the whole phase.
pub async fn parse_with_llm(
    completion: &dyn TextCompletion,
    entries: &[String],
    config: &ParseConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Reference>, PhaseError> {
    let policy = RetryPolicy::from(config);
    let mut out = Vec::with_capacity(entries.len());

    for (b, batch) in entries.chunks(config.reference_batch_size.max(1)).enumerate() {
        let request = CompletionRequest::new(prompts::REFERENCES_SYSTEM_PROMPT, prompts::references_prompt(batch), config);
        let raw = complete_with_retry(completion, &request, &policy, cancel, "references").await?;
        let items = match extract_json(&raw) {
            Some(Value::Array(items)) => items,
            Some(Value::Object(mut obj)) => match obj.remove("references") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        if items.is_empty() {
            return Err(PhaseError::MalformedResponse {
                phase: "references".to_string(),
                detail: format!("batch {} returned no reference array", b + 1),
            });
        }
        let base = out.len();
        out.extend(
            items
                .iter()
                .enumerate()
                .filter_map(|(i, v)| coerce_reference(v, base + i)),
        );
        debug!("references: batch {} parsed {} entries", b + 1, items.len());
    }

    assign_ids(&mut out);
    info!("references: {} entries parsed", out.len());
    Ok(out)
}

/// Line range of the body and the references text, given the whole
/// document's lines. The references text is handed over verbatim.
pub fn split_body(lines: &[Line]) -> (usize, Option<String>) {
    match find_references_start(lines) {
        Some(start) => {
            let mut scanner = LineScanner::new(lines.to_vec());
            scanner.reset(start + 1);
            (start, Some(scanner.remaining_text()))
        }
        None => (lines.len(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::to_lines;
    use serde_json::json;

    #[test]
    fn heading_variants() {
        for h in ["References", "## References", "7. References", "VI. REFERENCES", "**Bibliography**", "参考文献"] {
            assert!(is_references_heading(h), "{h}");
        }
        assert!(!is_references_heading("We list references below."));
    }

    #[test]
    fn bracket_entries_join_wrapped_lines() {
        let text = "[1] A. Smith and B. Jones, \"Deep learn-\ning for things,\" in Proc. ICML, 2019.\n[2] C. Lee, \"Other,\" 2020.";
        let entries = split_entries(text);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("Deep learning for things"));
    }

    #[test]
    fn blank_separated_entries() {
        let text = "Smith, J. (2020). A title. Journal.\n\nLee, K. (2019). Another\ntitle. Venue.";
        assert_eq!(split_entries(text).len(), 2);
    }

    #[test]
    fn ieee_entry() {
        let r = parse_entry(
            "[3] A. Vaswani, N. Shazeer, and N. Parmar, \"Attention is all you need,\" in Advances in NeurIPS, vol. 30, no. 2, pp. 5998-6008, 2017.",
            0,
        );
        assert_eq!(r.number.as_deref(), Some("3"));
        assert_eq!(r.id, "ref-3");
        assert_eq!(r.authors, vec!["A. Vaswani", "N. Shazeer", "N. Parmar"]);
        assert_eq!(r.title, "Attention is all you need");
        assert_eq!(r.publication.as_deref(), Some("Advances in NeurIPS"));
        assert_eq!(r.year, Some(2017));
        assert_eq!(r.volume.as_deref(), Some("30"));
        assert_eq!(r.issue.as_deref(), Some("2"));
        assert_eq!(r.pages.as_deref(), Some("5998-6008"));
    }

    #[test]
    fn apa_entry() {
        let r = parse_entry(
            "He, K., Zhang, X., & Ren, S. (2016). Deep residual learning. Proceedings of CVPR, 12(3), 770–778. https://doi.org/10.1109/CVPR.2016.90",
            4,
        );
        assert_eq!(r.id, "ref-5");
        assert_eq!(r.authors, vec!["He, K.", "Zhang, X.", "Ren, S."]);
        assert_eq!(r.title, "Deep residual learning");
        assert_eq!(r.year, Some(2016));
        assert_eq!(r.doi.as_deref(), Some("10.1109/CVPR.2016.90"));
        assert!(r.url.is_none());
        assert_eq!(r.volume.as_deref(), Some("12"));
        assert_eq!(r.issue.as_deref(), Some("3"));
    }

    #[test]
    fn ids_are_unique() {
        let refs = parse_local("[1] A. \"X,\" 2000.\n[1] B. \"Y,\" 2001.");
        assert_eq!(refs[0].id, "ref-1");
        assert_eq!(refs[1].id, "ref-1-2");
    }

    #[test]
    fn coerce_loose_reference() {
        let r = coerce_reference(&json!({"number": "[7]", "authors": "A. B and C. D", "title": "T", "year": "2018"}), 0)
            .unwrap();
        assert_eq!(r.id, "ref-7");
        assert_eq!(r.authors.len(), 2);
        assert_eq!(r.year, Some(2018));
        assert!(coerce_reference(&json!({"year": 2018}), 0).is_none());
        assert!(coerce_reference(&json!("text"), 0).is_none());
    }

    #[test]
    fn body_split_uses_last_heading() {
        let lines = to_lines("# Contents\nReferences\n# Intro\nText.\n# References\n[1] X.");
        let (end, refs) = split_body(&lines);
        assert_eq!(end, 4);
        assert_eq!(refs.as_deref(), Some("[1] X."));
    }

    #[test]
    fn references_text_is_verbatim() {
        let lines = to_lines("Body.\n## References\n\n[1] A. Smith,\n    wrapped title.\n\n[2] B. Lee.");
        let (end, refs) = split_body(&lines);
        assert_eq!(end, 1);
        assert_eq!(refs.as_deref(), Some("\n[1] A. Smith,\n    wrapped title.\n\n[2] B. Lee."));
    }
}
