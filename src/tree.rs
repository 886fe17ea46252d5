//! Section tree assembly from a flat block stream.
//!
//! Single pass, no back-tracking. Open sections live on an owned stack; a
//! section is attached to its parent (or to the root list) the moment it is
//! popped, so the finished tree never holds shared or back references.

use crate::ids::IdAllocator;
use crate::model::{Block, BlockKind, LocalizedText, RichText, Section};

pub struct SectionTreeBuilder<'a> {
    ids: &'a mut IdAllocator,
    roots: Vec<Section>,
    stack: Vec<Section>,
    opened: usize,
}

impl<'a> SectionTreeBuilder<'a> {
    pub fn new(ids: &'a mut IdAllocator) -> Self {
        Self {
            ids,
            roots: Vec::new(),
            stack: Vec::new(),
            opened: 0,
        }
    }

    pub fn push(&mut self, block: Block) {
        match block.kind {
            BlockKind::Heading {
                level,
                content,
                number,
            } => self.open(level, &content, number),
            _ => self.attach(block),
        }
    }

    fn open(&mut self, level: u8, title: &RichText, number: Option<String>) {
        let level = level.clamp(1, 6) as usize;
        while self.stack.len() >= level {
            self.close_top();
        }
        let id = self.next_section_id();
        self.stack.push(Section {
            id,
            number,
            title: title.to_localized(),
            content: Vec::new(),
            subsections: Vec::new(),
        });
    }

    fn attach(&mut self, block: Block) {
        if let Some(top) = self.stack.last_mut() {
            top.content.push(block);
            return;
        }
        // The stack is only empty before the first heading, so the last root
        // (if any) is the anonymous preamble section.
        if self.roots.is_empty() {
            let id = self.next_section_id();
            self.roots.push(Section {
                id,
                title: LocalizedText::default(),
                ..Section::default()
            });
        }
        if let Some(preamble) = self.roots.last_mut() {
            preamble.content.push(block);
        }
    }

    /// Section ids are `sec-{n}` in opening order, so rebuilding a tree
    /// from its own flattened blocks reproduces the same ids.
    fn next_section_id(&mut self) -> String {
        self.opened += 1;
        self.ids.claim(&format!("sec-{}", self.opened), "sec")
    }

    fn close_top(&mut self) {
        let Some(section) = self.stack.pop() else {
            return;
        };
        match self.stack.last_mut() {
            Some(parent) => parent.subsections.push(section),
            None => self.roots.push(section),
        }
    }

    pub fn finish(mut self) -> Vec<Section> {
        while !self.stack.is_empty() {
            self.close_top();
        }
        self.roots
    }
}

/// Build the section forest for `blocks`. Heading blocks become sections;
/// every other block lands in exactly one section, in input order.
pub fn build_sections(blocks: impl IntoIterator<Item = Block>, ids: &mut IdAllocator) -> Vec<Section> {
    let mut builder = SectionTreeBuilder::new(ids);
    for block in blocks {
        builder.push(block);
    }
    builder.finish()
}

/// Inverse of [`build_sections`]: headings re-emitted in front of their
/// section's content, depth-first.
pub fn flatten_sections(sections: Vec<Section>) -> Vec<Block> {
    fn walk(section: Section, depth: u8, out: &mut Vec<Block>) {
        let anonymous = section.title.en.is_empty() && section.title.zh.is_empty() && depth == 1;
        if !anonymous {
            let mut content = RichText::default();
            if !section.title.en.is_empty() {
                content.en = crate::detect::inline::tokenize(&section.title.en);
            }
            if !section.title.zh.is_empty() {
                content.zh = crate::detect::inline::tokenize(&section.title.zh);
            }
            out.push(Block::new(
                String::new(),
                BlockKind::Heading {
                    level: depth.min(6),
                    content,
                    number: section.number,
                },
            ));
        }
        out.extend(section.content);
        for sub in section.subsections {
            walk(sub, depth.saturating_add(1), out);
        }
    }
    let mut out = Vec::new();
    for section in sections {
        walk(section, 1, &mut out);
    }
    out
}
