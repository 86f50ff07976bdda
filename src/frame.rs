use crate::document::Document;
use crate::error::{Result, TrawlError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_range_limit() -> usize {
    5000
}

/// Patterns used to derive a value (e.g. a tick number) and an optional frame
/// identifier for any document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSpec {
    #[serde(default)]
    pub val_pattern: String,
    #[serde(default)]
    pub frame_pattern: String,
    #[serde(default)]
    pub frame_forward: bool,
    #[serde(default)]
    pub frame_capture: bool,
    #[serde(default = "default_range_limit")]
    pub range_limit: usize,
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            val_pattern: String::new(),
            frame_pattern: String::new(),
            frame_forward: false,
            frame_capture: false,
            range_limit: default_range_limit(),
        }
    }
}

impl FrameSpec {
    pub fn is_configured(&self) -> bool {
        !self.val_pattern.is_empty() || (self.frame_forward && !self.frame_pattern.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMarker {
    pub val: String,
    pub frm: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameEntry {
    start: usize,
    last: usize,
    marker: FrameMarker,
}

/// Memoized marker lookups keyed by the line where a frame starts, plus the
/// extent `[start, end)` of the frame resolved most recently.
#[derive(Debug, Clone, Default)]
pub struct FrameCache {
    entries: BTreeMap<usize, FrameEntry>,
    extent: Option<(usize, usize)>,
}

impl FrameCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extent(&self) -> Option<(usize, usize)> {
        self.extent
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.extent = None;
    }

    fn insert(&mut self, entry: FrameEntry) {
        self.extent = Some((entry.start, entry.last + 1));
        self.entries.entry(entry.start).or_insert(entry);
    }

    fn extent_marker(&self, line: usize) -> Option<&FrameMarker> {
        let (start, end) = self.extent?;
        if (start..end).contains(&line) {
            self.entries.get(&start).map(|e| &e.marker)
        } else {
            None
        }
    }

    /// The closest entry starting at or before `line`.
    fn preceding(&self, line: usize) -> Option<&FrameEntry> {
        self.entries.range(..=line).next_back().map(|(_, e)| e)
    }

    fn preceding_mut(&mut self, line: usize) -> Option<&mut FrameEntry> {
        self.entries.range_mut(..=line).next_back().map(|(_, e)| e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Value lines are searched backwards only; a frame lasts until the next value line.
    Linear,
    /// Frames are bounded by separator lines searched in both directions.
    Range,
}

#[derive(Debug)]
pub struct FrameParser {
    mode: Mode,
    val: Option<Regex>,
    sep: Option<Regex>,
    capture: bool,
    limit: usize,
    cache: FrameCache,
}

fn compile(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|err| TrawlError::invalid_pattern(pattern, err.to_string()))
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|caps| {
        caps.get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    })
}

impl FrameParser {
    /// Returns `Ok(None)` when the spec does not configure any marker.
    pub fn from_spec(spec: &FrameSpec) -> Result<Option<Self>> {
        if !spec.is_configured() {
            return Ok(None);
        }
        let mode = if spec.frame_forward && !spec.frame_pattern.is_empty() {
            Mode::Range
        } else {
            Mode::Linear
        };
        Ok(Some(Self {
            mode,
            val: compile(&spec.val_pattern)?,
            sep: compile(&spec.frame_pattern)?,
            capture: spec.frame_capture,
            limit: spec.range_limit.max(1),
            cache: FrameCache::default(),
        }))
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    pub fn marker<D: Document + ?Sized>(&mut self, doc: &D, line: usize) -> Option<FrameMarker> {
        if line == 0 || line > doc.line_count() {
            return None;
        }
        if let Some(marker) = self.cache.extent_marker(line) {
            return Some(marker.clone());
        }
        match self.mode {
            Mode::Linear => self.linear(doc, line),
            Mode::Range => self.range(doc, line),
        }
    }

    fn linear<D: Document + ?Sized>(&mut self, doc: &D, line: usize) -> Option<FrameMarker> {
        let prev_last = match self.cache.preceding(line) {
            Some(e) if line <= e.last => return Some(e.marker.clone()),
            Some(e) => Some(e.last),
            None => None,
        };
        let floor = line.saturating_sub(self.limit - 1).max(1);
        let mut val = String::new();
        for cur in (floor..=line).rev() {
            if prev_last == Some(cur) {
                let entry = self.cache.preceding_mut(line)?;
                entry.last = line;
                let (start, marker) = (entry.start, entry.marker.clone());
                self.cache.extent = Some((start, line + 1));
                return Some(marker);
            }
            let text = doc.line_text(cur)?;
            if let Some(re) = &self.val {
                if let Some(v) = first_capture(re, &text) {
                    val = v;
                    if !self.capture {
                        let marker = FrameMarker {
                            val,
                            frm: String::new(),
                        };
                        self.cache.insert(FrameEntry {
                            start: cur,
                            last: line,
                            marker: marker.clone(),
                        });
                        return Some(marker);
                    }
                }
            }
            if let Some(re) = &self.sep {
                if let Some(frm) = first_capture(re, &text) {
                    let frm = if self.capture { frm } else { String::new() };
                    let marker = FrameMarker {
                        val: std::mem::take(&mut val),
                        frm,
                    };
                    self.cache.insert(FrameEntry {
                        start: cur,
                        last: line,
                        marker: marker.clone(),
                    });
                    return Some(marker);
                }
            }
        }
        None
    }

    fn range<D: Document + ?Sized>(&mut self, doc: &D, line: usize) -> Option<FrameMarker> {
        if let Some(e) = self.cache.preceding(line) {
            if line < e.last {
                return Some(e.marker.clone());
            }
        }
        let sep = self.sep.as_ref()?;
        let mut val: Option<(usize, String)> = None;
        let mut frm = String::new();
        let mut start = None;

        let floor = line.saturating_sub(self.limit - 1).max(1);
        for cur in (floor..=line).rev() {
            let text = doc.line_text(cur)?;
            if let Some(f) = first_capture(sep, &text) {
                frm = f;
                start = Some(cur);
                break;
            }
            if val.is_none() {
                if let Some(v) = self.val.as_ref().and_then(|re| first_capture(re, &text)) {
                    val = Some((cur, v));
                }
            }
        }
        if start.is_none() && floor == 1 {
            start = Some(1);
        }

        let count = doc.line_count();
        let ceiling = (line + self.limit).min(count + 1);
        let mut end = ceiling;
        for cur in line + 1..ceiling {
            let text = doc.line_text(cur)?;
            if sep.is_match(&text) {
                end = cur;
                break;
            }
            if val.is_none() {
                if let Some(v) = self.val.as_ref().and_then(|re| first_capture(re, &text)) {
                    val = Some((cur, v));
                }
            }
        }

        let start = start.or(val.as_ref().map(|(l, _)| *l))?;
        let marker = FrameMarker {
            val: val.map(|(_, v)| v).unwrap_or_default(),
            frm: if self.capture { frm } else { String::new() },
        };
        self.cache.insert(FrameEntry {
            start,
            last: end,
            marker: marker.clone(),
        });
        self.cache.extent = Some((start, end));
        Some(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameMarker, FrameParser, FrameSpec};
    use crate::document::RopeDocument;

    fn doc(lines: &[&str]) -> RopeDocument {
        let mut text = lines.join("\n");
        text.push('\n');
        RopeDocument::from_text(&text)
    }

    fn marker(val: &str, frm: &str) -> Option<FrameMarker> {
        Some(FrameMarker {
            val: val.to_string(),
            frm: frm.to_string(),
        })
    }

    #[test]
    fn unconfigured_spec_yields_no_parser() {
        assert!(FrameParser::from_spec(&FrameSpec::default()).unwrap().is_none());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let spec = FrameSpec {
            val_pattern: "tick (".into(),
            ..FrameSpec::default()
        };
        assert!(FrameParser::from_spec(&spec).is_err());
    }

    #[test]
    fn linear_finds_nearest_value_above() {
        let d = doc(&["noise", "tick 7", "a", "b", "tick 8", "c"]);
        let spec = FrameSpec {
            val_pattern: r"tick (\d+)".into(),
            ..FrameSpec::default()
        };
        let mut p = FrameParser::from_spec(&spec).unwrap().unwrap();
        assert_eq!(p.marker(&d, 1), None);
        assert_eq!(p.marker(&d, 4), marker("7", ""));
        assert_eq!(p.cache().len(), 1);
        // extending the cached frame does not add entries
        assert_eq!(p.marker(&d, 3), marker("7", ""));
        assert_eq!(p.marker(&d, 6), marker("8", ""));
        assert_eq!(p.cache().len(), 2);
        assert_eq!(p.cache().extent(), Some((5, 7)));
    }

    #[test]
    fn linear_extends_previous_entry_when_scan_reaches_it() {
        let d = doc(&["tick 1", "a", "b", "c"]);
        let spec = FrameSpec {
            val_pattern: r"tick (\d+)".into(),
            ..FrameSpec::default()
        };
        let mut p = FrameParser::from_spec(&spec).unwrap().unwrap();
        assert_eq!(p.marker(&d, 2), marker("1", ""));
        assert_eq!(p.marker(&d, 4), marker("1", ""));
        assert_eq!(p.cache().len(), 1);
        assert_eq!(p.cache().extent(), Some((1, 5)));
    }

    #[test]
    fn range_mode_uses_separators_in_both_directions() {
        let d = doc(&[
            "== frame A",
            "x",
            "tick 3",
            "== frame B",
            "y",
            "tick 4",
            "z",
        ]);
        let spec = FrameSpec {
            val_pattern: r"tick (\d+)".into(),
            frame_pattern: r"== frame (\w+)".into(),
            frame_forward: true,
            frame_capture: true,
            ..FrameSpec::default()
        };
        let mut p = FrameParser::from_spec(&spec).unwrap().unwrap();
        // value below the line is found by the forward scan
        assert_eq!(p.marker(&d, 2), marker("3", "A"));
        assert_eq!(p.cache().extent(), Some((1, 4)));
        assert_eq!(p.marker(&d, 3), marker("3", "A"));
        assert_eq!(p.marker(&d, 5), marker("4", "B"));
        assert_eq!(p.cache().len(), 2);
    }

    #[test]
    fn range_limit_bounds_the_scan() {
        let d = doc(&["tick 1", "a", "b", "c", "d"]);
        let spec = FrameSpec {
            val_pattern: r"tick (\d+)".into(),
            range_limit: 2,
            ..FrameSpec::default()
        };
        let mut p = FrameParser::from_spec(&spec).unwrap().unwrap();
        assert_eq!(p.marker(&d, 5), None);
        assert_eq!(p.marker(&d, 2), marker("1", ""));
    }

    #[test]
    fn invalidate_drops_entries_and_extent() {
        let d = doc(&["tick 1", "a"]);
        let spec = FrameSpec {
            val_pattern: r"tick (\d+)".into(),
            ..FrameSpec::default()
        };
        let mut p = FrameParser::from_spec(&spec).unwrap().unwrap();
        p.marker(&d, 2);
        p.invalidate();
        assert!(p.cache().is_empty());
        assert_eq!(p.cache().extent(), None);
    }
}
