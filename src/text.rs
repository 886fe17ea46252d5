//! Small text helpers shared by the scanner, chunker and paragraph detector.
//!
//! The chunker and the paragraph reflow must agree exactly on where the last
//! sentence of a run of text ends, otherwise the carried fragment would be
//! duplicated or lost at chunk boundaries. Both call [`last_sentence_end`].

use crate::model::Language;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(4)
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '」' | '』')
}

fn is_cjk_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

/// Byte offset just past the last sentence terminator in `s`.
///
/// A terminator counts when it is followed (after optional closing quotes or
/// brackets) by whitespace or the end of the text. CJK full-stops count even
/// when followed directly by more text.
pub fn last_sentence_end(s: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = s.char_indices().collect();
    let mut i = chars.len();
    while i > 0 {
        i -= 1;
        let c = chars[i].1;
        if !is_terminator(c) {
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && is_closer(chars[j].1) {
            j += 1;
        }
        let end = chars.get(j).map(|&(p, _)| p).unwrap_or(s.len());
        if is_cjk_terminator(c) || j == chars.len() || chars[j].1.is_whitespace() {
            return Some(end);
        }
    }
    None
}

/// True when `s` (ignoring trailing whitespace) ends a sentence.
pub fn ends_sentence(s: &str) -> bool {
    let trimmed = s.trim_end();
    !trimmed.is_empty() && last_sentence_end(trimmed) == Some(trimmed.len())
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x20000..=0x2A6DF | 0xF900..=0xFAFF)
}

/// Guess the document's primary language from its CJK ideograph ratio.
pub fn detect_language(text: &str) -> Language {
    let mut cjk = 0usize;
    let mut letters = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
            letters += 1;
        } else if c.is_alphabetic() {
            letters += 1;
        }
    }
    if letters == 0 {
        return Language::En;
    }
    if cjk * 10 >= letters * 3 {
        Language::Zh
    } else {
        Language::En
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn sentence_end_ignores_decimals_and_initials_mid_word() {
        assert_eq!(last_sentence_end("pi is 3.14 roughly"), None);
        assert_eq!(last_sentence_end("Done. Then more"), Some(5));
    }

    #[test]
    fn sentence_end_includes_closing_quote() {
        let s = "He said \"stop.\" and left";
        let end = last_sentence_end(s).unwrap();
        assert_eq!(&s[..end], "He said \"stop.\"");
    }

    #[test]
    fn cjk_full_stop_counts_without_space() {
        let s = "这是第一句。这是第二";
        let end = last_sentence_end(s).unwrap();
        assert_eq!(&s[..end], "这是第一句。");
    }

    #[test]
    fn ends_sentence_checks() {
        assert!(ends_sentence("It works.  "));
        assert!(!ends_sentence("It works"));
        assert!(!ends_sentence(""));
    }

    #[test]
    fn language_detection() {
        assert_eq!(detect_language("A plain English sentence."), Language::En);
        assert_eq!(detect_language("本文提出了一种新的方法。"), Language::Zh);
        assert_eq!(detect_language("12345"), Language::En);
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
