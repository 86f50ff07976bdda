use crate::document::Document;
use std::collections::BTreeMap;

/// Describes lines discarded from the document: everything above `top` and
/// everything from `bottom` on. `top == 1` keeps the head, `bottom == 0`
/// keeps the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    top: usize,
    bottom: usize,
}

impl Truncation {
    pub fn new(top: usize, bottom: usize) -> Self {
        Self {
            top: top.max(1),
            bottom,
        }
    }

    pub fn above(top: usize) -> Self {
        Self::new(top, 0)
    }

    pub fn below(bottom: usize) -> Self {
        Self::new(1, bottom)
    }

    pub fn top(&self) -> usize {
        self.top
    }

    pub fn bottom(&self) -> usize {
        self.bottom
    }

    pub fn is_noop(&self) -> bool {
        self.top == 1 && self.bottom == 0
    }

    pub fn discarded_above(&self) -> usize {
        self.top - 1
    }

    /// New number for `line`, or `None` if the line was discarded.
    pub fn map_line(&self, line: usize) -> Option<usize> {
        if line < self.top || (self.bottom > 0 && line >= self.bottom) {
            return None;
        }
        Some(line - self.discarded_above())
    }

    pub fn map_lines(&self, lines: &[usize]) -> Vec<usize> {
        lines.iter().filter_map(|&l| self.map_line(l)).collect()
    }

    pub fn remap_keys<V>(&self, map: BTreeMap<usize, V>) -> BTreeMap<usize, V> {
        map.into_iter()
            .filter_map(|(line, v)| self.map_line(line).map(|l| (l, v)))
            .collect()
    }

    /// Removes the discarded ranges from `doc`, tail first so that `top`
    /// still refers to the original numbering.
    pub fn apply_to<D: Document + ?Sized>(&self, doc: &mut D) {
        if self.bottom > 0 {
            doc.delete_range(self.bottom, doc.line_count() + 1);
        }
        if self.top > 1 {
            doc.delete_range(1, self.top);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Truncation;
    use crate::document::{Document, RopeDocument};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn head_discard_shifts_remaining_lines() {
        let cut = Truncation::above(50);
        assert_eq!(cut.map_line(10), None);
        assert_eq!(cut.map_line(49), None);
        assert_eq!(cut.map_line(50), Some(1));
        assert_eq!(cut.map_line(75), Some(26));
    }

    #[test]
    fn tail_discard_keeps_numbers() {
        let cut = Truncation::below(20);
        assert_eq!(cut.map_line(19), Some(19));
        assert_eq!(cut.map_line(20), None);
    }

    #[test]
    fn remap_keys_drops_discarded_entries() {
        let mut map = BTreeMap::new();
        map.insert(3, "a");
        map.insert(7, "b");
        map.insert(12, "c");
        let out = Truncation::new(5, 10).remap_keys(map);
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![(3, "b")]);
    }

    #[test]
    fn apply_to_document_matches_line_mapping() {
        let text: String = (1..=10).map(|n| format!("line {n}\n")).collect();
        let mut doc = RopeDocument::from_text(&text);
        let cut = Truncation::new(3, 8);
        cut.apply_to(&mut doc);
        assert_eq!(doc.line_count(), 5);
        assert_eq!(doc.line_text(1).as_deref(), Some("line 3"));
        assert_eq!(doc.line_text(cut.map_line(7).unwrap()).as_deref(), Some("line 7"));
    }

    proptest! {
        #[test]
        fn mapping_is_strictly_monotone(top in 1usize..100, bottom in 0usize..200, a in 1usize..300, b in 1usize..300) {
            let cut = Truncation::new(top, bottom);
            if let (Some(ma), Some(mb)) = (cut.map_line(a), cut.map_line(b)) {
                prop_assert_eq!(a.cmp(&b), ma.cmp(&mb));
                prop_assert!(ma >= 1);
            }
        }
    }
}
