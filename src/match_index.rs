use crate::renumber::Truncation;
use std::collections::HashSet;

/// Sorted, duplicate-free list of 1-based line numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchIndex {
    lines: Vec<usize>,
}

impl MatchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines<I: IntoIterator<Item = usize>>(lines: I) -> Self {
        let mut lines: Vec<usize> = lines.into_iter().filter(|&l| l > 0).collect();
        lines.sort_unstable();
        lines.dedup();
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.lines
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.lines.iter().copied()
    }

    /// Lower bound: index of the first element `>= line`, or `len()`.
    pub fn index_of(&self, line: usize) -> usize {
        self.lines.partition_point(|&l| l < line)
    }

    pub fn position(&self, line: usize) -> Option<usize> {
        let idx = self.index_of(line);
        (self.lines.get(idx) == Some(&line)).then_some(idx)
    }

    pub fn contains(&self, line: usize) -> bool {
        self.position(line).is_some()
    }

    pub fn line_at(&self, idx: usize) -> Option<usize> {
        self.lines.get(idx).copied()
    }

    pub fn insert(&mut self, line: usize) -> bool {
        if line == 0 {
            return false;
        }
        let idx = self.index_of(line);
        if self.lines.get(idx) == Some(&line) {
            return false;
        }
        self.lines.insert(idx, line);
        true
    }

    pub fn remove(&mut self, line: usize) -> bool {
        match self.position(line) {
            Some(idx) => {
                self.lines.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Adds all lines not yet present, sorting once. Returns the lines that
    /// were actually added, in input order.
    pub fn insert_many(&mut self, lines: &[usize]) -> Vec<usize> {
        let mut seen = HashSet::with_capacity(lines.len());
        let added: Vec<usize> = lines
            .iter()
            .copied()
            .filter(|&l| l > 0 && !self.contains(l) && seen.insert(l))
            .collect();
        if added.is_empty() {
            return added;
        }
        let appends_in_order = added.windows(2).all(|w| w[0] < w[1])
            && self.lines.last().is_none_or(|&last| last < added[0]);
        self.lines.extend_from_slice(&added);
        if !appends_in_order {
            self.lines.sort_unstable();
        }
        added
    }

    /// Removes all given lines in one pass. Returns the lines that were
    /// actually present, in input order.
    pub fn remove_many(&mut self, lines: &[usize]) -> Vec<usize> {
        let mut seen = HashSet::with_capacity(lines.len());
        let removed: Vec<usize> = lines
            .iter()
            .copied()
            .filter(|&l| self.contains(l) && seen.insert(l))
            .collect();
        if removed.is_empty() {
            return removed;
        }
        let mut doomed = removed.clone();
        doomed.sort_unstable();
        self.lines.retain(|l| doomed.binary_search(l).is_err());
        removed
    }

    pub fn take_all(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.lines)
    }

    pub fn renumber(&mut self, cut: &Truncation) {
        let mut kept = Vec::with_capacity(self.lines.len());
        kept.extend(self.lines.iter().filter_map(|&l| cut.map_line(l)));
        self.lines = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::MatchIndex;
    use crate::renumber::Truncation;
    use proptest::prelude::*;

    #[test]
    fn index_of_is_lower_bound() {
        let idx = MatchIndex::from_lines([10, 20, 30]);
        assert_eq!(idx.index_of(5), 0);
        assert_eq!(idx.index_of(10), 0);
        assert_eq!(idx.index_of(11), 1);
        assert_eq!(idx.index_of(30), 2);
        assert_eq!(idx.index_of(31), 3);
        assert_eq!(MatchIndex::new().index_of(7), 0);
    }

    #[test]
    fn insert_and_remove_report_whether_applied() {
        let mut idx = MatchIndex::new();
        assert!(idx.insert(5));
        assert!(!idx.insert(5));
        assert!(!idx.insert(0));
        assert!(idx.insert(2));
        assert_eq!(idx.as_slice(), &[2, 5]);
        assert!(idx.remove(5));
        assert!(!idx.remove(5));
        assert_eq!(idx.position(2), Some(0));
        assert_eq!(idx.line_at(1), None);
    }

    #[test]
    fn insert_many_returns_only_new_lines_in_input_order() {
        let mut idx = MatchIndex::from_lines([4, 8]);
        let added = idx.insert_many(&[9, 4, 1, 9, 6]);
        assert_eq!(added, vec![9, 1, 6]);
        assert_eq!(idx.as_slice(), &[1, 4, 6, 8, 9]);
    }

    #[test]
    fn remove_many_skips_absent_lines() {
        let mut idx = MatchIndex::from_lines([1, 2, 3, 4]);
        let removed = idx.remove_many(&[4, 7, 2, 4]);
        assert_eq!(removed, vec![4, 2]);
        assert_eq!(idx.as_slice(), &[1, 3]);
    }

    #[test]
    fn renumber_drops_and_shifts() {
        let mut idx = MatchIndex::from_lines([10, 25, 75]);
        idx.renumber(&Truncation::new(50, 0));
        assert_eq!(idx.as_slice(), &[26]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize),
        Remove(usize),
        InsertMany(Vec<usize>),
        RemoveMany(Vec<usize>),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..200).prop_map(Op::Insert),
            (0usize..200).prop_map(Op::Remove),
            prop::collection::vec(0usize..200, 0..40).prop_map(Op::InsertMany),
            prop::collection::vec(0usize..200, 0..40).prop_map(Op::RemoveMany),
        ]
    }

    proptest! {
        #[test]
        fn stays_strictly_ascending(ops in prop::collection::vec(op(), 0..60)) {
            let mut idx = MatchIndex::new();
            for op in ops {
                match op {
                    Op::Insert(l) => { idx.insert(l); }
                    Op::Remove(l) => { idx.remove(l); }
                    Op::InsertMany(v) => { idx.insert_many(&v); }
                    Op::RemoveMany(v) => { idx.remove_many(&v); }
                }
                prop_assert!(idx.as_slice().windows(2).all(|w| w[0] < w[1]));
                prop_assert!(idx.iter().all(|l| l > 0));
            }
        }

        #[test]
        fn lower_bound_is_smallest_index_not_below(
            lines in prop::collection::vec(1usize..500, 0..80),
            target in 0usize..520,
        ) {
            let idx = MatchIndex::from_lines(lines);
            let expected = idx.iter().position(|l| l >= target).unwrap_or(idx.len());
            prop_assert_eq!(idx.index_of(target), expected);
        }
    }
}
