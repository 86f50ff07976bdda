use crate::document::{Document, ScanDirection};
use crate::error::Result;
use crate::match_index::MatchIndex;
use crate::pattern::{SearchParams, SearchPattern};
use crate::renumber::Truncation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    #[serde(flatten)]
    pub search: SearchParams,
}

#[derive(Debug, Clone)]
struct Tag {
    name: String,
    pattern: SearchPattern,
    lines: MatchIndex,
}

/// Lines matching each configured tag pattern. The table is filled in
/// slices, one tag after another, and is only usable for imports once
/// complete.
#[derive(Debug, Clone, Default)]
pub struct TagTable {
    tags: Vec<Tag>,
    cursor_tag: usize,
    cursor_line: usize,
    scanned_to: usize,
}

impl TagTable {
    pub fn new(specs: &[TagSpec]) -> Result<Self> {
        let tags = specs
            .iter()
            .map(|spec| {
                Ok(Tag {
                    name: spec.name.clone(),
                    pattern: SearchPattern::compile(&spec.search)?,
                    lines: MatchIndex::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tags,
            cursor_tag: 0,
            cursor_line: 1,
            scanned_to: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.tags.get(id).map(|t| t.name.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.cursor_tag >= self.tags.len()
    }

    /// Percentage of the tag scan done so far.
    pub fn progress(&self, line_count: usize) -> u8 {
        if self.is_complete() || line_count == 0 {
            return 100;
        }
        let total = (self.tags.len() * line_count) as u64;
        let done = (self.cursor_tag * line_count + self.cursor_line.saturating_sub(1)) as u64;
        (done * 100 / total).min(99) as u8
    }

    /// Scans up to `max_lines` lines. Returns the number of lines scanned.
    pub fn scan_step<D: Document + ?Sized>(&mut self, doc: &D, max_lines: usize) -> usize {
        let end = doc.line_count() + 1;
        let mut scanned = 0;
        while scanned < max_lines && !self.is_complete() {
            let tag = &mut self.tags[self.cursor_tag];
            let window_end = self
                .cursor_line
                .saturating_add(max_lines - scanned)
                .min(end);
            let from = self.cursor_line;
            match doc.search(&tag.pattern, from, window_end, ScanDirection::Forward) {
                Some(m) => {
                    tag.lines.insert(m.line);
                    self.cursor_line = m.line + 1;
                }
                None => self.cursor_line = window_end,
            }
            scanned += self.cursor_line.saturating_sub(from).max(1);
            if self.cursor_line >= end {
                self.cursor_tag += 1;
                self.cursor_line = if self.cursor_tag < self.tags.len() {
                    self.scanned_to.min(end - 1) + 1
                } else {
                    1
                };
                if self.cursor_tag >= self.tags.len() {
                    self.scanned_to = end - 1;
                }
            }
        }
        scanned
    }

    /// Lines of all given tags, ascending and without duplicates.
    pub fn lines_for(&self, ids: &[usize]) -> Vec<usize> {
        let mut union = MatchIndex::new();
        for tag in ids.iter().filter_map(|&id| self.tags.get(id)) {
            union.insert_many(tag.lines.as_slice());
        }
        union.take_all()
    }

    pub fn tags_at(&self, line: usize) -> Vec<usize> {
        self.tags
            .iter()
            .enumerate()
            .filter(|(_, t)| t.lines.contains(line))
            .map(|(id, _)| id)
            .collect()
    }

    /// Re-opens the scan for lines appended after the last complete pass.
    pub fn lines_appended(&mut self, line_count: usize) {
        if self.is_complete() && line_count > self.scanned_to && !self.tags.is_empty() {
            self.cursor_tag = 0;
            self.cursor_line = self.scanned_to + 1;
        }
    }

    pub fn renumber(&mut self, cut: &Truncation) {
        for tag in &mut self.tags {
            tag.lines.renumber(cut);
        }
        let shift = |line: usize| {
            if cut.bottom() > 0 && line >= cut.bottom() {
                cut.bottom().saturating_sub(cut.top())
            } else {
                line.saturating_sub(cut.discarded_above())
            }
        };
        self.scanned_to = shift(self.scanned_to);
        if !self.is_complete() {
            self.cursor_line = shift(self.cursor_line.saturating_sub(1)) + 1;
        }
    }
}
