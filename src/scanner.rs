//! Line scanner: normalised source text behind a back-trackable cursor.
//!
//! Detectors call [`LineScanner::peek`] to look ahead, [`LineScanner::next`]
//! once they have positively identified their block, and
//! [`LineScanner::reset`] (or [`LineScanner::back`]) to decline. Nothing here
//! fails: exhaustion is reported as `None`.

use crate::detect::is_block_start;
use crate::text::estimate_tokens;
use std::ops::Range;

/// One line of normalised source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub index: usize,
    pub text: String,
}

impl Line {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Number of leading spaces, counting a tab as four.
    pub fn indent(&self) -> usize {
        let mut width = 0;
        for c in self.text.chars() {
            match c {
                ' ' => width += 1,
                '\t' => width += 4,
                _ => break,
            }
        }
        width
    }
}

/// Strip a leading BOM and turn CRLF / lone CR into LF.
pub fn normalize(raw: &str) -> String {
    let s = raw.strip_prefix('\u{FEFF}').unwrap_or(raw);
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split normalised text into lines. Joining the `text` fields with `\n`
/// reproduces the input exactly.
pub fn to_lines(normalized: &str) -> Vec<Line> {
    normalized
        .split('\n')
        .enumerate()
        .map(|(index, text)| Line {
            index,
            text: text.to_string(),
        })
        .collect()
}

/// The result of [`LineScanner::merge_ahead_lines`]: merged text plus the
/// exact line range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedLines {
    pub text: String,
    pub lines: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct LineScanner {
    lines: Vec<Line>,
    pos: usize,
}

impl LineScanner {
    pub fn new(lines: Vec<Line>) -> Self {
        Self { lines, pos: 0 }
    }

    /// Normalise `raw` and scan it.
    pub fn from_text(raw: &str) -> Self {
        Self::new(to_lines(&normalize(raw)))
    }

    pub fn peek(&self, offset: usize) -> Option<&Line> {
        self.lines.get(self.pos + offset)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&Line> {
        let line = self.lines.get(self.pos)?;
        self.pos += 1;
        Some(line)
    }

    /// Rewind by up to `n` lines.
    pub fn back(&mut self, n: usize) {
        self.pos = self.pos.saturating_sub(n);
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.lines.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Restore a position previously obtained from [`Self::position`].
    pub fn reset(&mut self, pos: usize) {
        self.pos = pos.min(self.lines.len());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Skip blank lines; returns how many were skipped.
    pub fn skip_blank(&mut self) -> usize {
        let start = self.pos;
        while self.peek(0).is_some_and(Line::is_blank) {
            self.pos += 1;
        }
        self.pos - start
    }

    /// Everything not yet consumed, verbatim.
    pub fn remaining_text(&self) -> String {
        self.lines[self.pos.min(self.lines.len())..]
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Greedily join consecutive non-blank lines (space separated) starting
    /// at the cursor until the estimate reaches `min_tokens`, `max_lines`
    /// lines have been taken, or the next line starts a new block.
    ///
    /// Leading blank lines are skipped and included in the returned range.
    /// Does not move the cursor; pass the result to
    /// [`Self::consume_merged`] to advance past exactly those lines.
    pub fn merge_ahead_lines(&self, min_tokens: usize, max_lines: usize) -> Option<MergedLines> {
        let mut i = self.pos;
        while self.lines.get(i).is_some_and(Line::is_blank) {
            i += 1;
        }
        let start = self.pos;
        let first = self.lines.get(i)?;
        let mut text = first.text.trim().to_string();
        let mut taken = 1;
        i += 1;
        while taken < max_lines.max(1) && estimate_tokens(&text) < min_tokens {
            let Some(line) = self.lines.get(i) else { break };
            if line.is_blank() || is_block_start(&line.text) {
                break;
            }
            text.push(' ');
            text.push_str(line.text.trim());
            taken += 1;
            i += 1;
        }
        Some(MergedLines {
            text,
            lines: start..i,
        })
    }

    /// Advance the cursor past the lines a [`MergedLines`] covered.
    pub fn consume_merged(&mut self, merged: &MergedLines) {
        if merged.lines.end > self.pos {
            self.reset(merged.lines.end);
        }
    }
}
