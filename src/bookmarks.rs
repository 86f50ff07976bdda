use crate::document::Document;
use crate::error::Result;
use crate::line_list::LineListReport;
use crate::renumber::Truncation;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::LazyLock;

static BOOKMARK_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:[ \t:.,;='/](.*))?$").expect("invalid bookmark pattern")
});
static BLANK_OR_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:#.*)?$").expect("invalid comment pattern"));

/// Bookmarked lines with a note each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookmarks {
    marks: BTreeMap<usize, String>,
    modified: bool,
}

/// Parsed bookmark file, not yet merged.
#[derive(Debug, Clone, Default)]
pub struct BookmarkImport {
    pub entries: Vec<(usize, String)>,
    pub report: LineListReport,
}

fn default_note<D: Document + ?Sized>(doc: &D, line: usize) -> String {
    match doc.line_text(line) {
        Some(text) if !text.is_empty() => text,
        _ => format!("Bookmark in empty line {line}"),
    }
}

impl Bookmarks {
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn contains(&self, line: usize) -> bool {
        self.marks.contains_key(&line)
    }

    pub fn note(&self, line: usize) -> Option<&str> {
        self.marks.get(&line).map(String::as_str)
    }

    pub fn set_note(&mut self, line: usize, note: impl Into<String>) {
        if let Some(slot) = self.marks.get_mut(&line) {
            *slot = note.into();
            self.modified = true;
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.marks.keys().copied()
    }

    /// Adds a bookmark noted with the line's text, or removes an existing
    /// one. Returns whether the line is bookmarked afterwards.
    pub fn toggle<D: Document + ?Sized>(&mut self, doc: &D, line: usize) -> bool {
        self.modified = true;
        if self.marks.remove(&line).is_some() {
            false
        } else {
            self.marks.insert(line, default_note(doc, line));
            true
        }
    }

    pub fn clear(&mut self) {
        if !self.marks.is_empty() {
            self.modified = true;
        }
        self.marks.clear();
    }

    /// Closest bookmark strictly after (or before) `line`.
    pub fn next_from(&self, line: usize, forward: bool) -> Option<usize> {
        if forward {
            self.marks.range(line + 1..).next().map(|(&l, _)| l)
        } else {
            self.marks.range(..line).next_back().map(|(&l, _)| l)
        }
    }

    pub fn renumber(&mut self, cut: &Truncation) {
        let marks = std::mem::take(&mut self.marks);
        self.marks = cut.remap_keys(marks);
    }

    pub fn parse(text: &str, line_count: usize) -> BookmarkImport {
        let mut import = BookmarkImport {
            report: LineListReport {
                max: line_count,
                ..LineListReport::default()
            },
            ..BookmarkImport::default()
        };
        for row in text.lines() {
            if let Some(caps) = BOOKMARK_ROW.captures(row) {
                match caps[1].parse::<usize>() {
                    Ok(line) if (1..=line_count).contains(&line) => {
                        let note = caps.get(2).map_or("", |m| m.as_str().trim());
                        import.entries.push((line, note.to_string()));
                        import.report.lines.push(line);
                    }
                    Ok(_) => import.report.skipped += 1,
                    Err(_) => import.report.malformed += 1,
                }
            } else if !BLANK_OR_COMMENT.is_match(row) {
                import.report.malformed += 1;
            }
        }
        import
    }

    pub fn read(path: &Path, line_count: usize) -> Result<BookmarkImport> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text, line_count))
    }

    /// Adds parsed entries; empty notes fall back to the line's text.
    pub fn merge<D: Document + ?Sized>(&mut self, doc: &D, import: BookmarkImport) {
        for (line, note) in import.entries {
            let note = if note.is_empty() {
                default_note(doc, line)
            } else {
                note
            };
            self.marks.insert(line, note);
            self.modified = true;
        }
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(fs::File::create(path)?);
        for (line, note) in &self.marks {
            writeln!(out, "{line}\t{note}")?;
        }
        out.flush()?;
        self.modified = false;
        tracing::debug!(path = %path.display(), count = self.marks.len(), "saved bookmarks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Bookmarks;
    use crate::document::RopeDocument;
    use crate::renumber::Truncation;

    fn doc() -> RopeDocument {
        let text: String = (1..=100).map(|l| format!("line {l}\n")).collect();
        RopeDocument::from_text(&text)
    }

    #[test]
    fn toggle_adds_and_removes() {
        let d = doc();
        let mut marks = Bookmarks::default();
        assert!(marks.toggle(&d, 12));
        assert_eq!(marks.note(12), Some("line 12"));
        assert!(!marks.toggle(&d, 12));
        assert!(marks.is_empty());
        assert!(marks.is_modified());
    }

    #[test]
    fn next_from_walks_in_both_directions() {
        let d = doc();
        let mut marks = Bookmarks::default();
        for l in [5, 40, 77] {
            marks.toggle(&d, l);
        }
        assert_eq!(marks.next_from(5, true), Some(40));
        assert_eq!(marks.next_from(40, false), Some(5));
        assert_eq!(marks.next_from(77, true), None);
    }

    #[test]
    fn renumber_follows_truncation() {
        let d = doc();
        let mut marks = Bookmarks::default();
        for l in [10, 25, 75] {
            marks.toggle(&d, l);
        }
        marks.renumber(&Truncation::above(50));
        assert_eq!(marks.lines().collect::<Vec<_>>(), vec![26]);
        assert_eq!(marks.note(26), Some("line 75"));
    }

    #[test]
    fn file_round_trip_keeps_notes() {
        let d = doc();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marks.txt");
        let mut marks = Bookmarks::default();
        marks.toggle(&d, 3);
        marks.toggle(&d, 8);
        marks.set_note(8, "checkpoint");
        marks.save(&path).unwrap();
        assert!(!marks.is_modified());

        let import = Bookmarks::read(&path, 100).unwrap();
        assert!(import.report.is_clean());
        let mut loaded = Bookmarks::default();
        loaded.merge(&d, import);
        assert_eq!(loaded.note(3), Some("line 3"));
        assert_eq!(loaded.note(8), Some("checkpoint"));
    }

    #[test]
    fn parse_reports_bad_rows_and_fills_empty_notes() {
        let d = doc();
        let import = Bookmarks::parse("# header\n4\n500 far\nnot a number\n", 100);
        assert_eq!(import.report.skipped, 1);
        assert_eq!(import.report.malformed, 1);
        let mut marks = Bookmarks::default();
        marks.merge(&d, import);
        assert_eq!(marks.note(4), Some("line 4"));
    }
}
