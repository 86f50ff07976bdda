use crate::pattern::SearchPattern;
use ropey::Rope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMatch {
    pub line: usize,
    pub offset: usize,
    pub len: usize,
}

/// Line-oriented text store browsed by the engine. Lines are numbered from 1.
pub trait Document {
    fn line_count(&self) -> usize;

    fn line_text(&self, line: usize) -> Option<String>;

    /// Searches lines in `[start, end)` and returns the first match in scan
    /// order. Only the first match per line is considered.
    fn search(
        &self,
        pattern: &SearchPattern,
        start: usize,
        end: usize,
        direction: ScanDirection,
    ) -> Option<LineMatch> {
        let start = start.max(1);
        let end = end.min(self.line_count() + 1);
        if start >= end {
            return None;
        }
        let scan_line = |line: usize| {
            let text = self.line_text(line)?;
            let (offset, len) = pattern.find_in(&text)?;
            Some(LineMatch { line, offset, len })
        };
        match direction {
            ScanDirection::Forward => (start..end).find_map(scan_line),
            ScanDirection::Backward => (start..end).rev().find_map(scan_line),
        }
    }

    /// Removes lines `[start, end)`.
    fn delete_range(&mut self, start: usize, end: usize);

    /// Inserts `text` before `line`; `line_count() + 1` appends.
    fn insert_text(&mut self, line: usize, text: &str);
}

#[derive(Debug, Clone, Default)]
pub struct RopeDocument {
    rope: Rope,
}

impl RopeDocument {
    pub fn from_text(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
        }
    }

    pub fn append(&mut self, text: &str) {
        let end = self.rope.len_chars();
        self.rope.insert(end, text);
    }

    fn line_start_char(&self, line: usize) -> usize {
        let idx = line.saturating_sub(1);
        if idx >= self.rope.len_lines() {
            self.rope.len_chars()
        } else {
            self.rope.line_to_char(idx)
        }
    }

    fn ends_with_newline(&self) -> bool {
        let len = self.rope.len_chars();
        len > 0 && self.rope.char(len - 1) == '\n'
    }
}

impl Document for RopeDocument {
    fn line_count(&self) -> usize {
        if self.rope.len_chars() == 0 {
            return 0;
        }
        let lines = self.rope.len_lines();
        if self.ends_with_newline() {
            lines - 1
        } else {
            lines
        }
    }

    fn line_text(&self, line: usize) -> Option<String> {
        if line == 0 || line > self.line_count() {
            return None;
        }
        let mut text = self.rope.line(line - 1).to_string();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        Some(text)
    }

    fn delete_range(&mut self, start: usize, end: usize) {
        let start = start.max(1);
        let count = self.line_count();
        if start > count || start >= end {
            return;
        }
        let from = self.line_start_char(start);
        let to = if end > count {
            self.rope.len_chars()
        } else {
            self.line_start_char(end)
        };
        self.rope.remove(from..to);
    }

    fn insert_text(&mut self, line: usize, text: &str) {
        let at = self.line_start_char(line.max(1));
        self.rope.insert(at, text);
    }
}

#[cfg(test)]
mod tests {
    use super::{Document, LineMatch, RopeDocument, ScanDirection};
    use crate::pattern::{SearchParams, SearchPattern};

    fn doc(lines: &[&str]) -> RopeDocument {
        let mut text = lines.join("\n");
        text.push('\n');
        RopeDocument::from_text(&text)
    }

    #[test]
    fn line_count_ignores_trailing_newline() {
        assert_eq!(RopeDocument::from_text("").line_count(), 0);
        assert_eq!(RopeDocument::from_text("a\nb\n").line_count(), 2);
        assert_eq!(RopeDocument::from_text("a\nb").line_count(), 2);
    }

    #[test]
    fn line_text_strips_line_endings() {
        let d = RopeDocument::from_text("one\r\ntwo\n");
        assert_eq!(d.line_text(1).as_deref(), Some("one"));
        assert_eq!(d.line_text(2).as_deref(), Some("two"));
        assert_eq!(d.line_text(3), None);
        assert_eq!(d.line_text(0), None);
    }

    #[test]
    fn search_respects_window_and_direction() {
        let d = doc(&["x", "ERROR a", "y", "ERROR b", "z"]);
        let pat = SearchPattern::compile(&SearchParams::literal("ERROR")).unwrap();
        let fwd = d.search(&pat, 1, 6, ScanDirection::Forward);
        assert_eq!(fwd, Some(LineMatch { line: 2, offset: 0, len: 5 }));
        let back = d.search(&pat, 1, 6, ScanDirection::Backward).unwrap();
        assert_eq!(back.line, 4);
        assert_eq!(d.search(&pat, 3, 4, ScanDirection::Forward), None);
    }

    #[test]
    fn delete_range_removes_whole_lines() {
        let mut d = doc(&["a", "b", "c", "d"]);
        d.delete_range(2, 4);
        assert_eq!(d.line_count(), 2);
        assert_eq!(d.line_text(2).as_deref(), Some("d"));
        d.delete_range(2, 100);
        assert_eq!(d.line_count(), 1);
    }

    #[test]
    fn insert_and_append_text() {
        let mut d = doc(&["a", "c"]);
        d.insert_text(2, "b\n");
        d.append("d\n");
        let all: Vec<String> = (1..=d.line_count()).filter_map(|l| d.line_text(l)).collect();
        assert_eq!(all, vec!["a", "b", "c", "d"]);
    }
}
