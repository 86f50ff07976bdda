use crate::renumber::Truncation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Add,
    Remove,
}

impl Change {
    pub fn inverse(self) -> Self {
        match self {
            Change::Add => Change::Remove,
            Change::Remove => Change::Add,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Change::Add => "addition",
            Change::Remove => "removal",
        }
    }
}

/// One batch of list changes. An entry stays open (unfinalized) while the run
/// that produced it keeps appending, and is closed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub change: Change,
    pub finalized: bool,
    pub lines: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stack {
    Undo,
    Redo,
}

impl Stack {
    pub fn opposite(self) -> Self {
        match self {
            Stack::Undo => Stack::Redo,
            Stack::Redo => Stack::Undo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReplayCursor {
    from: Stack,
    entry: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub change: Change,
    pub lines: Vec<usize>,
    pub last: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoLedger {
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
    replay: Option<ReplayCursor>,
}

impl UndoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn stack(&self, stack: Stack) -> &Vec<UndoEntry> {
        match stack {
            Stack::Undo => &self.undo,
            Stack::Redo => &self.redo,
        }
    }

    fn stack_mut(&mut self, stack: Stack) -> &mut Vec<UndoEntry> {
        match stack {
            Stack::Undo => &mut self.undo,
            Stack::Redo => &mut self.redo,
        }
    }

    pub fn entries(&self, stack: Stack) -> &[UndoEntry] {
        self.stack(stack)
    }

    pub fn has(&self, stack: Stack) -> bool {
        !self.stack(stack).is_empty()
    }

    /// Kind and line count of the most recent entry, for menu and status text.
    pub fn describe_top(&self, stack: Stack) -> Option<(Change, usize)> {
        self.stack(stack).last().map(|e| (e.change, e.lines.len()))
    }

    /// Closes the open entry and discards redo history before a new
    /// non-replay run starts mutating the list.
    pub fn begin_run(&mut self) {
        self.finalize(Stack::Undo);
        self.redo.clear();
    }

    /// Appends lines touched by the current run. Lines coalesce into the open
    /// entry when it has the same kind; otherwise a new open entry is pushed.
    pub fn record_batch(&mut self, change: Change, lines: &[usize]) {
        if lines.is_empty() {
            return;
        }
        self.redo.clear();
        match self.undo.last_mut() {
            Some(top) if !top.finalized && top.change == change => {
                top.lines.extend_from_slice(lines);
            }
            _ => {
                self.finalize(Stack::Undo);
                self.undo.push(UndoEntry {
                    change,
                    finalized: false,
                    lines: lines.to_vec(),
                });
            }
        }
    }

    /// Records a complete change (manual edit, clear) as its own closed entry.
    pub fn record_change(&mut self, change: Change, lines: Vec<usize>) {
        if lines.is_empty() {
            return;
        }
        self.finalize(Stack::Undo);
        self.redo.clear();
        self.undo.push(UndoEntry {
            change,
            finalized: true,
            lines,
        });
    }

    pub fn finalize(&mut self, stack: Stack) {
        if let Some(top) = self.stack_mut(stack).last_mut() {
            top.finalized = true;
        }
    }

    /// Prepares moving the top entry of `from` onto the opposite stack.
    /// Returns the number of lines to be replayed.
    pub fn begin_replay(&mut self, from: Stack) -> Option<usize> {
        self.finalize(Stack::Undo);
        self.finalize(Stack::Redo);
        let len = self.stack(from).len();
        let count = self.stack(from).last()?.lines.len();
        self.replay = Some(ReplayCursor {
            from,
            entry: Some(len - 1),
        });
        Some(count)
    }

    pub fn replay_remaining(&self) -> usize {
        match self.replay {
            Some(ReplayCursor {
                from,
                entry: Some(idx),
            }) => self.stack(from).get(idx).map_or(0, |e| e.lines.len()),
            _ => 0,
        }
    }

    /// Removes up to `max` lines from the front of the entry being replayed.
    pub fn take_chunk(&mut self, max: usize) -> Option<Chunk> {
        let cursor = self.replay?;
        let idx = cursor.entry?;
        let src = self.stack_mut(cursor.from);
        if src.len() != idx + 1 {
            return None;
        }
        let entry = &mut src[idx];
        let change = entry.change;
        let take = max.max(1).min(entry.lines.len());
        let lines: Vec<usize> = entry.lines.drain(..take).collect();
        let last = entry.lines.is_empty();
        if last {
            src.pop();
            if let Some(cursor) = self.replay.as_mut() {
                cursor.entry = None;
            }
        }
        Some(Chunk {
            change,
            lines,
            last,
        })
    }

    /// Records lines that a replay step actually applied to the list.
    pub fn commit_replayed(&mut self, applied: Change, lines: &[usize]) {
        let Some(cursor) = self.replay else {
            return;
        };
        if lines.is_empty() {
            return;
        }
        let dst = self.stack_mut(cursor.from.opposite());
        match dst.last_mut() {
            Some(top) if !top.finalized && top.change == applied => {
                top.lines.extend_from_slice(lines);
            }
            _ => {
                if let Some(top) = dst.last_mut() {
                    top.finalized = true;
                }
                dst.push(UndoEntry {
                    change: applied,
                    finalized: false,
                    lines: lines.to_vec(),
                });
            }
        }
    }

    /// Ends a replay, completed or aborted. Partially replayed entries stay
    /// split between both stacks.
    pub fn finish_replay(&mut self) {
        if let Some(cursor) = self.replay.take() {
            self.finalize(cursor.from.opposite());
            self.finalize(cursor.from);
        }
    }

    /// Closes whatever is open, run or replay.
    pub fn abort(&mut self) {
        self.finish_replay();
        self.finalize(Stack::Undo);
    }

    pub fn renumber(&mut self, cut: &Truncation) {
        let replay_entry = self.replay.and_then(|c| c.entry.map(|e| (c.from, e)));
        let mut new_replay_entry = None;
        for stack in [Stack::Undo, Stack::Redo] {
            let old = std::mem::take(self.stack_mut(stack));
            let mut kept = Vec::with_capacity(old.len());
            for (idx, mut entry) in old.into_iter().enumerate() {
                entry.lines = cut.map_lines(&entry.lines);
                if entry.lines.is_empty() {
                    continue;
                }
                if replay_entry == Some((stack, idx)) {
                    new_replay_entry = Some(kept.len());
                }
                kept.push(entry);
            }
            *self.stack_mut(stack) = kept;
        }
        if let Some(cursor) = self.replay.as_mut() {
            cursor.entry = new_replay_entry;
        }
    }

    #[cfg(test)]
    pub(crate) fn reconstruct(&self) -> crate::match_index::MatchIndex {
        let mut idx = crate::match_index::MatchIndex::new();
        for entry in &self.undo {
            match entry.change {
                Change::Add => idx.insert_many(&entry.lines),
                Change::Remove => idx.remove_many(&entry.lines),
            };
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::{Change, Stack, UndoEntry, UndoLedger};
    use crate::match_index::MatchIndex;
    use crate::renumber::Truncation;

    fn replay_all(ledger: &mut UndoLedger, index: &mut MatchIndex, from: Stack, chunk: usize) {
        ledger.begin_replay(from).unwrap();
        while let Some(step) = ledger.take_chunk(chunk) {
            let applied = step.change.inverse();
            let lines = match applied {
                Change::Add => index.insert_many(&step.lines),
                Change::Remove => index.remove_many(&step.lines),
            };
            ledger.commit_replayed(applied, &lines);
            if step.last {
                break;
            }
        }
        ledger.finish_replay();
    }

    #[test]
    fn same_kind_batches_coalesce_until_finalized() {
        let mut ledger = UndoLedger::new();
        ledger.begin_run();
        ledger.record_batch(Change::Add, &[3, 9]);
        ledger.record_batch(Change::Add, &[12]);
        assert_eq!(
            ledger.entries(Stack::Undo),
            &[UndoEntry {
                change: Change::Add,
                finalized: false,
                lines: vec![3, 9, 12],
            }]
        );
        ledger.finalize(Stack::Undo);
        ledger.finalize(Stack::Undo);
        ledger.record_batch(Change::Add, &[20]);
        assert_eq!(ledger.entries(Stack::Undo).len(), 2);
        assert!(ledger.entries(Stack::Undo)[0].finalized);
    }

    #[test]
    fn kind_change_closes_open_entry() {
        let mut ledger = UndoLedger::new();
        ledger.record_batch(Change::Add, &[1]);
        ledger.record_batch(Change::Remove, &[1]);
        let entries = ledger.entries(Stack::Undo);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].finalized);
        assert!(!entries[1].finalized);
    }

    #[test]
    fn empty_batch_records_nothing() {
        let mut ledger = UndoLedger::new();
        ledger.record_batch(Change::Add, &[]);
        assert!(!ledger.has(Stack::Undo));
    }

    #[test]
    fn undo_then_redo_restores_state() {
        let mut index = MatchIndex::new();
        let mut ledger = UndoLedger::new();
        let added = index.insert_many(&[10, 250, 900]);
        ledger.begin_run();
        ledger.record_batch(Change::Add, &added);
        ledger.finalize(Stack::Undo);
        let removed = index.remove_many(&[250]);
        ledger.record_change(Change::Remove, removed);

        let (index_before, ledger_before) = (index.clone(), ledger.clone());
        replay_all(&mut ledger, &mut index, Stack::Undo, 1);
        assert_eq!(index.as_slice(), &[10, 250, 900]);
        assert_eq!(ledger.describe_top(Stack::Redo), Some((Change::Add, 1)));
        replay_all(&mut ledger, &mut index, Stack::Redo, 1);
        assert_eq!(index, index_before);
        assert_eq!(ledger, ledger_before);
    }

    #[test]
    fn chunked_undo_moves_lines_progressively() {
        let mut index = MatchIndex::new();
        let mut ledger = UndoLedger::new();
        let added = index.insert_many(&[1, 2, 3, 4, 5]);
        ledger.record_change(Change::Add, added);

        assert_eq!(ledger.begin_replay(Stack::Undo), Some(5));
        let step = ledger.take_chunk(2).unwrap();
        assert_eq!(step.lines, vec![1, 2]);
        assert!(!step.last);
        let removed = index.remove_many(&step.lines);
        ledger.commit_replayed(Change::Remove, &removed);
        assert_eq!(ledger.replay_remaining(), 3);

        // aborting here leaves the change split across both stacks
        ledger.abort();
        assert_eq!(ledger.describe_top(Stack::Undo), Some((Change::Add, 3)));
        assert_eq!(ledger.describe_top(Stack::Redo), Some((Change::Remove, 2)));
        assert!(ledger.entries(Stack::Redo)[0].finalized);
        assert_eq!(ledger.reconstruct(), index);
    }

    #[test]
    fn stale_lines_are_dropped_from_replay() {
        let mut index = MatchIndex::from_lines([5]);
        let mut ledger = UndoLedger::new();
        ledger.record_change(Change::Add, vec![5, 6]);
        replay_all(&mut ledger, &mut index, Stack::Undo, 10);
        assert!(index.is_empty());
        assert_eq!(ledger.describe_top(Stack::Redo), Some((Change::Remove, 1)));
    }

    #[test]
    fn renumber_updates_both_stacks_and_prunes_empty_entries() {
        let mut ledger = UndoLedger::new();
        ledger.record_change(Change::Add, vec![2, 3]);
        ledger.record_batch(Change::Add, &[10, 60]);
        ledger.redo.push(UndoEntry {
            change: Change::Remove,
            finalized: true,
            lines: vec![70],
        });
        ledger.renumber(&Truncation::above(50));
        assert_eq!(ledger.entries(Stack::Undo).len(), 1);
        assert_eq!(ledger.entries(Stack::Undo)[0].lines, vec![11]);
        assert!(!ledger.entries(Stack::Undo)[0].finalized);
        assert_eq!(ledger.entries(Stack::Redo)[0].lines, vec![21]);
    }

    #[test]
    fn renumber_dropping_replayed_entry_ends_replay() {
        let mut ledger = UndoLedger::new();
        ledger.record_change(Change::Add, vec![40]);
        ledger.record_change(Change::Add, vec![2]);
        ledger.begin_replay(Stack::Undo);
        ledger.renumber(&Truncation::above(10));
        assert_eq!(ledger.take_chunk(10), None);
        assert_eq!(ledger.describe_top(Stack::Undo), Some((Change::Add, 1)));
    }
}
