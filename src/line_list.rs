use crate::document::Document;
use crate::error::{Result, TrawlError};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::LazyLock;

static NUMBER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:[^\d\w]|$)").expect("invalid line number pattern"));
static BLANK_OR_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:#.*)?$").expect("invalid comment pattern"));

/// Result of parsing a line number list against the current document size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineListReport {
    /// Valid line numbers, ascending and without duplicates.
    pub lines: Vec<usize>,
    /// Numbers outside `1..=max`.
    pub skipped: usize,
    /// Non-empty, non-comment lines without a leading number.
    pub malformed: usize,
    pub max: usize,
}

impl LineListReport {
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.malformed == 0
    }

    /// Fails with a description of the rejected entries; the caller may
    /// still proceed with `lines` if the user agrees.
    pub fn check(&self) -> Result<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(TrawlError::OutOfRangeLine {
                skipped: self.skipped,
                malformed: self.malformed,
                max: self.max,
            })
        }
    }
}

pub fn parse_line_list(text: &str, line_count: usize) -> LineListReport {
    let mut lines = BTreeSet::new();
    let mut report = LineListReport {
        max: line_count,
        ..LineListReport::default()
    };
    for row in text.lines() {
        if let Some(caps) = NUMBER_PREFIX.captures(row) {
            match caps[1].parse::<usize>() {
                Ok(line) if (1..=line_count).contains(&line) => {
                    lines.insert(line);
                }
                Ok(_) => report.skipped += 1,
                Err(_) => report.malformed += 1,
            }
        } else if !BLANK_OR_COMMENT.is_match(row) {
            report.malformed += 1;
        }
    }
    report.lines = lines.into_iter().collect();
    report
}

pub fn load_line_list(path: &Path, line_count: usize) -> Result<LineListReport> {
    let text = fs::read_to_string(path)?;
    let report = parse_line_list(&text, line_count);
    tracing::debug!(
        path = %path.display(),
        valid = report.lines.len(),
        skipped = report.skipped,
        malformed = report.malformed,
        "loaded line list"
    );
    Ok(report)
}

/// Writes one line number per line.
pub fn save_line_numbers(path: &Path, lines: &[usize]) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

/// Writes `number<TAB>text` for every listed line.
pub fn save_with_text<D: Document + ?Sized>(path: &Path, doc: &D, lines: &[usize]) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for &line in lines {
        let text = doc.line_text(line).unwrap_or_default();
        writeln!(out, "{line}\t{text}")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_line_list, parse_line_list, save_line_numbers, save_with_text};
    use crate::document::RopeDocument;
    use crate::error::TrawlError;
    use std::fs;

    #[test]
    fn parse_accepts_numbers_comments_and_blank_lines() {
        let text = "# exported\n12\n3 some text\n\n  \n7:rest\n3\n";
        let report = parse_line_list(text, 20);
        assert_eq!(report.lines, vec![3, 7, 12]);
        assert!(report.is_clean());
        assert!(report.check().is_ok());
    }

    #[test]
    fn parse_counts_rejected_entries() {
        let text = "0\n5\n99\nabc\n12abc\n99999999999999999999999999\n";
        let report = parse_line_list(text, 10);
        assert_eq!(report.lines, vec![5]);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.malformed, 3);
        match report.check() {
            Err(TrawlError::OutOfRangeLine {
                skipped,
                malformed,
                max,
            }) => assert_eq!((skipped, malformed, max), (2, 3, 10)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn save_then_load_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        save_line_numbers(&path, &[2, 9, 40]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2\n9\n40\n");
        let report = load_line_list(&path, 10).unwrap();
        assert_eq!(report.lines, vec![2, 9]);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn text_export_can_be_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("with_text.txt");
        let doc = RopeDocument::from_text("alpha\nbeta\ngamma\n");
        save_with_text(&path, &doc, &[1, 3]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\talpha\n3\tgamma\n");
        assert_eq!(load_line_list(&path, 3).unwrap().lines, vec![1, 3]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_line_list(&dir.path().join("nope"), 5).unwrap_err();
        assert!(matches!(err, TrawlError::Io(_)));
    }
}
