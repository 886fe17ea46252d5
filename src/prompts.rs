//! Prompts for the text-completion phases.
//!
//! Every instruction sent to the completion collaborator lives here so the
//! wording can change without touching retry or parsing logic. Each phase has
//! a fixed system prompt and a function that builds the user prompt.

/// Metadata, abstract and keywords from the top of the paper. Expects one
/// JSON object.
pub const METADATA_SYSTEM_PROMPT: &str = r#"You extract bibliographic metadata from the first pages of an academic paper.

Return ONE JSON object and nothing else, with these keys:
  "title": string
  "authors": array of {"name": string, "affiliation": string|null, "email": string|null}
  "journal": string|null
  "publicationDate": string|null
  "doi": string|null
  "year": number|null
  "articleType": string|null
  "abstract": string (the abstract text verbatim, or "")
  "keywords": array of strings

Rules:
- Copy text exactly as it appears; do not invent values.
- Use null for anything that is not present.
- Do NOT wrap the JSON in code fences. Do NOT add commentary."#;

pub fn metadata_prompt(window: &str) -> String {
    format!("Paper opening:\n\"\"\"\n{window}\n\"\"\"")
}

/// Heading classification for plain text with no Markdown headings. Expects
/// a JSON array.
pub const OUTLINE_SYSTEM_PROMPT: &str = r#"You recover the section outline of an academic paper whose headings lost their formatting.

You receive numbered text units. Decide which units START with a section heading.

Return ONE JSON array and nothing else. Each element:
  {"unit": number, "level": 1-6, "title": string}
where "title" is the heading text exactly as it appears at the start of the unit.
Return [] if no unit starts with a heading.
Do NOT wrap the JSON in code fences. Do NOT add commentary."#;

pub fn outline_prompt(units: &[(usize, String)]) -> String {
    let mut out = String::from("Units:\n");
    for (n, text) in units {
        out.push_str(&format!("[{n}] {text}\n"));
    }
    out
}

/// Block-structure parsing of one chunk in the line-marker syntax.
pub const CHUNK_SYSTEM_PROMPT: &str = r#"You convert a window of an academic paper into a line-marker block format.

Emit one block after another. Each block starts with a marker line:
  #HEADING1 .. #HEADING6   fields: NUM, EN, ZH
  #PARA                    fields: EN, ZH, CONT
  #MATH                    fields: LATEX, LABEL, NUM
  #FIGURE                  fields: SRC, ALT, CAPTION-EN, CAPTION-ZH, DESC, NUM
  #TABLE                   fields: HEADER, ROW (repeatable), ALIGN, CAPTION-EN, CAPTION-ZH, NUM
  #CODE[language]          field: CODE (everything after "CODE:" until the next marker)
  #LIST-ORDERED            fields: ITEM-EN, ITEM-ZH (repeatable, indent two spaces per level)
  #LIST-UNORDERED          same as #LIST-ORDERED
  #QUOTE                   fields: EN, ZH, AUTHOR
  #DIVIDER                 no fields

Field lines look like `KEY: value`. Table cells are separated by ` | `.

Rules:
- Keep the original wording. Fill only the language the text is written in; leave the other out.
- Inline math stays inside the text as $...$. Display math goes into #MATH without $ delimiters.
- If the window begins in the middle of a paragraph, mark the first #PARA with `CONT: true`.
- Skip page numbers, running headers and footers.
- Output ONLY marker and field lines. No code fences, no commentary."#;

pub fn chunk_prompt(content: &str, index: usize, total: usize) -> String {
    format!(
        "Window {} of {}:\n\"\"\"\n{}\n\"\"\"",
        index + 1,
        total,
        content
    )
}

/// Reference-list parsing. Expects a JSON array, one element per entry.
pub const REFERENCES_SYSTEM_PROMPT: &str = r#"You parse bibliography entries of an academic paper.

Return ONE JSON array with exactly one object per input entry, in order:
  {"number": string|null, "authors": [string], "title": string,
   "publication": string|null, "year": number|null, "doi": string|null,
   "url": string|null, "pages": string|null, "volume": string|null, "issue": string|null}

Copy values exactly; use null for missing fields.
Do NOT wrap the JSON in code fences. Do NOT add commentary."#;

pub fn references_prompt(entries: &[String]) -> String {
    let mut out = String::from("Entries:\n");
    for (i, e) in entries.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, e));
    }
    out
}

/// Translation of short text items. Expects a JSON array of strings.
pub const TRANSLATE_SYSTEM_PROMPT: &str = r#"You translate fragments of an academic paper.

Return ONE JSON array of strings, one translation per input item, in order.
Keep $...$ math, citations like [3] and URLs unchanged.
Do NOT wrap the JSON in code fences. Do NOT add commentary."#;

pub fn translate_prompt(target: &str, items: &[String]) -> String {
    let json = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
    format!("Translate each item into {target}.\nItems: {json}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_prompt_lists_every_marker() {
        for marker in [
            "#HEADING1",
            "#PARA",
            "#MATH",
            "#FIGURE",
            "#TABLE",
            "#CODE[",
            "#LIST-ORDERED",
            "#LIST-UNORDERED",
            "#QUOTE",
            "#DIVIDER",
        ] {
            assert!(CHUNK_SYSTEM_PROMPT.contains(marker), "{marker}");
        }
    }

    #[test]
    fn user_prompts_embed_input() {
        assert!(chunk_prompt("body", 0, 3).starts_with("Window 1 of 3"));
        assert!(outline_prompt(&[(0, "Intro".into())]).contains("[0] Intro"));
        assert!(references_prompt(&["A. B. 2020".into()]).contains("1. A. B. 2020"));
        assert!(translate_prompt("Chinese", &["hi".into()]).contains(r#"["hi"]"#));
    }
}
