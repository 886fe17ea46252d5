//! Post-processing: deterministic cleanup of completion responses.
//!
//! Even well-prompted models wrap their answer in ` ```json ` fences, use
//! typographic quotes in JSON, leave trailing commas, or append a chatty
//! sentence after the payload. These rules undo that before the response is
//! handed to the JSON coercion or the marker parser. Each rule is a pure
//! `&str → String` pass.
//!
//! ## Rule Order
//!
//! Line endings and invisible characters go first so the fence regex sees
//! clean input; commentary is dropped last because it needs the fences gone.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Clean a free-text (marker syntax) response.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Strip outer code fences of any language
/// 4. Trim trailing whitespace per line
/// 5. Drop a trailing commentary paragraph
pub fn clean_response(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    let s = trim_trailing_whitespace(&s);
    drop_trailing_commentary(&s)
}

/// Find and parse the JSON payload of a response.
///
/// Tries the cleaned text as-is, then the first balanced object/array in
/// it, then the same after normalising typographic quotes and trailing
/// commas. Returns `None` when nothing parses; callers treat that as "no
/// usable output".
pub fn extract_json(input: &str) -> Option<Value> {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(s) {
        return Some(v);
    }
    if let Some(span) = balanced_span(s) {
        if let Ok(v) = serde_json::from_str::<Value>(span) {
            return Some(v);
        }
    }

    let repaired = remove_trailing_commas(&normalise_quotes(s));
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }
    balanced_span(&repaired).and_then(|span| serde_json::from_str::<Value>(span).ok())
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 3: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

/// Opening fence somewhere after a preamble line ("Here is the JSON:").
static RE_INNER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)[ \t]*\n(.*?)\n```").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        return caps[1].to_string();
    }
    if let Some(caps) = RE_INNER_FENCE.captures(trimmed) {
        return caps[1].to_string();
    }
    input.to_string()
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Drop trailing commentary ─────────────────────────────────────────
//
// "Note: I skipped the page header." after the last block would otherwise be
// appended to the last field by the marker parser. Only a paragraph separated
// by a blank line and opening with a typical assistant phrase is dropped.

static RE_COMMENTARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:note|notes|explanation|i have|i've|i hope|here is|here's|let me know|this output|the above)\b",
    )
    .unwrap()
});

fn drop_trailing_commentary(input: &str) -> String {
    let Some(split) = input.trim_end().rfind("\n\n") else {
        return input.to_string();
    };
    let tail = input[split..].trim();
    if RE_COMMENTARY.is_match(tail) {
        input[..split].to_string()
    } else {
        input.to_string()
    }
}

// ── JSON repair ──────────────────────────────────────────────────────────────

fn normalise_quotes(input: &str) -> String {
    input
        .replace(['\u{201C}', '\u{201D}', '\u{201E}', '\u{201F}', '\u{2033}'], "\"")
        .replace(['\u{2018}', '\u{2019}', '\u{201A}', '\u{201B}'], "'")
}

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());

fn remove_trailing_commas(input: &str) -> String {
    RE_TRAILING_COMMA.replace_all(input, "$1").to_string()
}

/// The first `{…}` or `[…]` span whose brackets balance, skipping brackets
/// inside string literals.
fn balanced_span(input: &str) -> Option<&str> {
    let start = input.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in input[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&input[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Tests ────────────────────────────────────────────────────────────────────
