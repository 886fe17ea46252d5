//! Line-marker block syntax emitted by completion calls.
//!
//! ```text
//! #HEADING2
//! NUM: 3.1
//! EN: Training Setup
//! ZH: 训练设置
//! #PARA
//! CONT: true
//! EN: continues the sentence from the previous window. New sentence.
//! #CODE[python]
//! CODE:
//! print("hi")
//! ```
//!
//! A block runs from its marker to the next marker. Lines that are not a
//! known `FIELD:` continue the previous field. Missing optional fields are
//! simply absent in the result; a block with no usable content is dropped.

use crate::detect::{inline, paragraph};
use crate::ids::IdAllocator;
use crate::merge::FlaggedBlock;
use crate::model::{Alignment, Block, BlockKind, ListItem, RichText};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^#(?P<name>HEADING[1-6]|PARA|MATH|FIGURE|TABLE|CODE|LIST-ORDERED|LIST-UNORDERED|QUOTE|DIVIDER)(?:\[(?P<arg>[^\]]*)\])?\s*$",
    )
    .unwrap()
});

static RE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<indent>[ \t]*)(?P<key>[A-Z][A-Z-]*):[ \t]?(?P<value>.*)$").unwrap());

const KNOWN_FIELDS: &[&str] = &[
    "EN", "ZH", "NUM", "ID", "CONT", "LATEX", "LABEL", "SRC", "ALT", "CAPTION", "CAPTION-EN", "CAPTION-ZH",
    "DESC", "HEADER", "ROW", "ALIGN", "CODE", "ITEM-EN", "ITEM-ZH", "AUTHOR", "LANG",
];

/// Does the text look like marker output at all?
pub fn looks_like_dsl(text: &str) -> bool {
    text.lines().any(|l| RE_MARKER.is_match(l.trim_end()))
}

#[derive(Debug)]
struct Field {
    key: String,
    indent: usize,
    lines: Vec<String>,
}

#[derive(Debug)]
struct RawBlock {
    name: String,
    arg: Option<String>,
    fields: Vec<Field>,
}

impl RawBlock {
    fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.key == key)
    }

    /// Reflowed text of the first `key` field.
    fn text(&self, key: &str) -> Option<String> {
        self.all(key)
            .next()
            .map(|f| paragraph::reflow(&f.lines))
            .filter(|s| !s.is_empty())
    }

    /// Verbatim (newline-joined) value of the first `key` field.
    fn verbatim(&self, key: &str) -> Option<String> {
        self.all(key).next().map(|f| f.lines.join("\n"))
    }

    fn rich(&self, en: &str, zh: &str) -> RichText {
        RichText {
            en: self.text(en).map(|t| inline::tokenize(&t)).unwrap_or_default(),
            zh: self.text(zh).map(|t| inline::tokenize(&t)).unwrap_or_default(),
        }
    }
}

fn split_blocks(text: &str) -> Vec<RawBlock> {
    let mut blocks: Vec<RawBlock> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = RE_MARKER.captures(line.trim_end()) {
            blocks.push(RawBlock {
                name: caps["name"].to_string(),
                arg: caps.name("arg").map(|m| m.as_str().trim().to_string()),
                fields: Vec::new(),
            });
            continue;
        }
        // Text before the first marker is commentary.
        let Some(current) = blocks.last_mut() else { continue };
        let in_code = current.fields.last().is_some_and(|f| f.key == "CODE");

        if !in_code {
            if let Some(caps) = RE_FIELD.captures(line) {
                let key = &caps["key"];
                if KNOWN_FIELDS.contains(&key) {
                    let indent: usize = caps["indent"].chars().map(|c| if c == '\t' { 4 } else { 1 }).sum();
                    let value = caps["value"].trim_end();
                    current.fields.push(Field {
                        key: key.to_string(),
                        indent,
                        lines: if value.is_empty() { Vec::new() } else { vec![value.to_string()] },
                    });
                    continue;
                }
            }
        }
        match current.fields.last_mut() {
            Some(field) => field.lines.push(line.to_string()),
            None if !line.trim().is_empty() => current.fields.push(Field {
                key: "EN".to_string(),
                indent: 0,
                lines: vec![line.to_string()],
            }),
            None => {}
        }
    }
    blocks
}

fn split_row(s: &str) -> Vec<String> {
    crate::detect::table::split_cells(s)
}

fn list_items(raw: &RawBlock) -> Vec<ListItem> {
    let mut items: Vec<ListItem> = Vec::new();
    let mut zh_open = false;
    for field in &raw.fields {
        let text = paragraph::reflow(&field.lines);
        if text.is_empty() {
            continue;
        }
        let level = (field.indent / 2).min(u8::MAX as usize) as u8;
        match field.key.as_str() {
            "ITEM-EN" | "EN" => {
                items.push(ListItem {
                    content: RichText {
                        en: inline::tokenize(&text),
                        zh: Vec::new(),
                    },
                    level,
                });
                zh_open = true;
            }
            "ITEM-ZH" | "ZH" => match items.last_mut() {
                Some(item) if zh_open && item.content.zh.is_empty() => {
                    item.content.zh = inline::tokenize(&text);
                    zh_open = false;
                }
                _ => items.push(ListItem {
                    content: RichText {
                        en: Vec::new(),
                        zh: inline::tokenize(&text),
                    },
                    level,
                }),
            },
            _ => {}
        }
    }
    items
}

fn is_truthy(s: Option<String>) -> bool {
    s.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
}

fn convert(raw: RawBlock) -> Option<FlaggedBlock> {
    let continuation = is_truthy(raw.text("CONT"));
    let kind = match raw.name.as_str() {
        name if name.starts_with("HEADING") => {
            let level = name["HEADING".len()..].parse::<u8>().unwrap_or(1).clamp(1, 6);
            let content = raw.rich("EN", "ZH");
            if content.is_empty() {
                return None;
            }
            BlockKind::Heading {
                level,
                content,
                number: raw.text("NUM"),
            }
        }
        "PARA" => {
            let content = raw.rich("EN", "ZH");
            if content.is_empty() {
                return None;
            }
            BlockKind::Paragraph {
                content,
                align: raw.text("ALIGN").as_deref().and_then(Alignment::parse),
            }
        }
        "MATH" => {
            let latex = raw.verbatim("LATEX")?.replace('$', "");
            let latex = latex.trim();
            if latex.is_empty() {
                return None;
            }
            BlockKind::Math {
                latex: latex.to_string(),
                label: raw.text("LABEL"),
                number: raw.text("NUM"),
            }
        }
        "FIGURE" => BlockKind::Figure {
            src: raw.text("SRC")?,
            alt: raw.text("ALT"),
            caption: raw.rich("CAPTION-EN", "CAPTION-ZH"),
            description: raw.text("DESC"),
            number: raw.text("NUM"),
            uploaded_filename: None,
        },
        "TABLE" => {
            let headers = raw.text("HEADER").map(|h| split_row(&h));
            let width = headers.as_ref().map(Vec::len).unwrap_or(0);
            let rows: Vec<Vec<String>> = raw
                .all("ROW")
                .map(|f| {
                    let mut row = split_row(&f.lines.join(" "));
                    if width > 0 {
                        row.resize(width, String::new());
                    }
                    row
                })
                .collect();
            if headers.is_none() && rows.is_empty() {
                return None;
            }
            let align = raw
                .text("ALIGN")
                .map(|a| split_row(&a).iter().filter_map(|c| Alignment::parse(c)).collect::<Vec<_>>())
                .filter(|a| !a.is_empty());
            BlockKind::Table {
                headers,
                rows,
                align,
                caption: raw.rich("CAPTION-EN", "CAPTION-ZH"),
                number: raw.text("NUM"),
            }
        }
        "CODE" => BlockKind::Code {
            language: raw
                .arg
                .clone()
                .or_else(|| raw.text("LANG"))
                .map(|l| l.to_ascii_lowercase())
                .filter(|l| !l.is_empty()),
            code: raw
                .verbatim("CODE")
                .map(|c| c.trim_end().to_string())
                .unwrap_or_default(),
            caption: raw.text("CAPTION"),
        },
        "LIST-ORDERED" | "LIST-UNORDERED" => {
            let items = list_items(&raw);
            if items.is_empty() {
                return None;
            }
            if raw.name == "LIST-ORDERED" {
                BlockKind::OrderedList { items }
            } else {
                BlockKind::UnorderedList { items }
            }
        }
        "QUOTE" => {
            let content = raw.rich("EN", "ZH");
            if content.is_empty() {
                return None;
            }
            BlockKind::Quote {
                content,
                author: raw.text("AUTHOR"),
            }
        }
        "DIVIDER" => BlockKind::Divider {},
        _ => return None,
    };
    Some(FlaggedBlock {
        block: Block::new(raw.text("ID").unwrap_or_default(), kind),
        continuation,
    })
}

/// Parse marker syntax into flagged blocks. Ids come from the `ID:` field
/// when present and unique, otherwise they are minted from `ids`.
pub fn parse(text: &str, ids: &mut IdAllocator) -> Vec<FlaggedBlock> {
    let text = crate::scanner::normalize(text);
    split_blocks(&text)
        .into_iter()
        .filter_map(convert)
        .map(|mut flagged| {
            let prefix = flagged.block.kind.id_prefix();
            flagged.block.id = ids.claim(&flagged.block.id, prefix);
            flagged
        })
        .collect()
}
