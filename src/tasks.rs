use crate::document::{Document, LineMatch, ScanDirection};
use crate::engine::EngineState;
use crate::ledger::{Change, Stack};
use crate::pattern::SearchPattern;
use crate::scheduler::{Budget, SchedulerPolicy, TaskStatus};

/// Part of the document a search-all request covers, relative to the cursor.
/// The cursor line belongs to both `Above` and `Below`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRange {
    Whole,
    Above(usize),
    Below(usize),
}

impl ScanRange {
    /// Line bounds `[start, end)` for a document of `line_count` lines.
    pub fn bounds(self, line_count: usize) -> (usize, usize) {
        let end = line_count + 1;
        match self {
            ScanRange::Whole => (1, end),
            ScanRange::Above(cursor) => (1, cursor.saturating_add(1).clamp(1, end)),
            ScanRange::Below(cursor) => (cursor.clamp(1, end), end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkKind {
    Search,
    TagImport,
    FileImport,
    UndoReplay,
    RedoReplay,
    Refill,
}

impl BulkKind {
    pub fn label(self) -> &'static str {
        match self {
            BulkKind::Search => "search",
            BulkKind::TagImport => "tag import",
            BulkKind::FileImport => "file import",
            BulkKind::UndoReplay => "undo",
            BulkKind::RedoReplay => "redo",
            BulkKind::Refill => "refill",
        }
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as u128 * 100) / total as u128).min(100) as u8
}

/// Applies one batch to the index and books the lines actually changed.
fn apply_batch(state: &mut EngineState, change: Change, lines: &[usize]) -> usize {
    let applied = match change {
        Change::Add => state.index.insert_many(lines),
        Change::Remove => state.index.remove_many(lines),
    };
    state.ledger.record_batch(change, &applied);
    applied.len()
}

#[derive(Debug, Clone)]
pub struct SearchTask {
    patterns: Vec<SearchPattern>,
    change: Change,
    current: usize,
    start: usize,
    end: usize,
    next: usize,
}

impl SearchTask {
    pub fn new(patterns: Vec<SearchPattern>, change: Change, start: usize, end: usize) -> Self {
        Self {
            patterns,
            change,
            current: 0,
            start,
            end: end.max(start),
            next: start,
        }
    }

    fn resume<D: Document + ?Sized>(
        &mut self,
        state: &mut EngineState,
        doc: &D,
        budget: &mut Budget,
    ) -> TaskStatus {
        let end = self.end.min(doc.line_count() + 1);
        let mut found = Vec::new();
        while let Some(pattern) = self.patterns.get(self.current) {
            while self.next < end && !budget.expired() {
                let window_end = self.next.saturating_add(budget.remaining_lines()).min(end);
                match doc.search(pattern, self.next, window_end, ScanDirection::Forward) {
                    Some(m) => {
                        budget.charge(m.line + 1 - self.next);
                        found.push(m.line);
                        self.next = m.line + 1;
                    }
                    None => {
                        budget.charge(window_end - self.next);
                        self.next = window_end;
                    }
                }
            }
            apply_batch(state, self.change, &found);
            found.clear();
            if self.next < end {
                return TaskStatus::Yielded;
            }
            // every pattern closes its own entry
            state.ledger.finalize(Stack::Undo);
            self.current += 1;
            self.next = self.start;
            if budget.expired() && self.current < self.patterns.len() {
                return TaskStatus::Yielded;
            }
        }
        TaskStatus::Done
    }

    fn progress(&self) -> u8 {
        let span = self.end - self.start;
        let done = self.current * span + (self.next - self.start);
        percent(done, self.patterns.len() * span)
    }
}

/// Adds or removes a precomputed list of lines in chunks. Tag imports fetch
/// their lines once the tag table is complete.
#[derive(Debug, Clone)]
pub struct ImportTask {
    tags: Option<Vec<usize>>,
    lines: Vec<usize>,
    pos: usize,
    change: Change,
}

impl ImportTask {
    pub fn from_tags(tags: Vec<usize>, change: Change) -> Self {
        Self {
            tags: Some(tags),
            lines: Vec::new(),
            pos: 0,
            change,
        }
    }

    pub fn from_lines(lines: Vec<usize>) -> Self {
        Self {
            tags: None,
            lines,
            pos: 0,
            change: Change::Add,
        }
    }

    pub fn waits_for_tags(&self) -> bool {
        self.tags.is_some()
    }

    fn resume<D: Document + ?Sized>(
        &mut self,
        state: &mut EngineState,
        doc: &D,
        budget: &mut Budget,
    ) -> TaskStatus {
        if let Some(ids) = &self.tags {
            if !state.tags.is_complete() {
                return TaskStatus::Suspended;
            }
            self.lines = state.tags.lines_for(ids);
            self.tags = None;
        }
        let count = doc.line_count();
        while self.pos < self.lines.len() && !budget.expired() {
            let take = budget.remaining_lines().min(self.lines.len() - self.pos);
            let chunk: Vec<usize> = self.lines[self.pos..self.pos + take]
                .iter()
                .copied()
                .filter(|&l| l <= count)
                .collect();
            apply_batch(state, self.change, &chunk);
            budget.charge(take);
            self.pos += take;
        }
        if self.pos < self.lines.len() {
            TaskStatus::Yielded
        } else {
            TaskStatus::Done
        }
    }

    fn progress(&self) -> u8 {
        if self.tags.is_some() {
            return 0;
        }
        percent(self.pos, self.lines.len())
    }
}

/// Moves the top entry of one ledger stack onto the other, inverting its
/// effect on the index chunk by chunk.
#[derive(Debug, Clone)]
pub struct ReplayTask {
    from: Stack,
    orig: usize,
}

impl ReplayTask {
    pub fn new(from: Stack, orig: usize) -> Self {
        Self { from, orig }
    }

    fn resume<D: Document + ?Sized>(
        &mut self,
        state: &mut EngineState,
        doc: &D,
        budget: &mut Budget,
        policy: &SchedulerPolicy,
    ) -> TaskStatus {
        let count = doc.line_count();
        while !budget.expired() {
            let max = policy.replay_chunk.min(budget.remaining_lines());
            let Some(chunk) = state.ledger.take_chunk(max) else {
                return TaskStatus::Done;
            };
            let applied_change = chunk.change.inverse();
            let applied = match applied_change {
                Change::Add => {
                    let valid: Vec<usize> =
                        chunk.lines.iter().copied().filter(|&l| l <= count).collect();
                    state.index.insert_many(&valid)
                }
                Change::Remove => state.index.remove_many(&chunk.lines),
            };
            if applied.len() < chunk.lines.len() {
                tracing::debug!(
                    skipped = chunk.lines.len() - applied.len(),
                    "stale lines dropped from {}",
                    if self.from == Stack::Undo { "undo" } else { "redo" }
                );
            }
            state.ledger.commit_replayed(applied_change, &applied);
            budget.charge(chunk.lines.len());
            if chunk.last {
                return TaskStatus::Done;
            }
        }
        TaskStatus::Yielded
    }

    fn progress(&self, state: &EngineState) -> u8 {
        let remaining = state.ledger.replay_remaining();
        percent(self.orig.saturating_sub(remaining), self.orig)
    }
}

#[derive(Debug, Clone)]
pub enum BulkTask {
    Search(SearchTask),
    TagImport(ImportTask),
    FileImport(ImportTask),
    UndoReplay(ReplayTask),
    RedoReplay(ReplayTask),
    Refill(SearchTask),
}

impl BulkTask {
    pub fn kind(&self) -> BulkKind {
        match self {
            BulkTask::Search(_) => BulkKind::Search,
            BulkTask::TagImport(_) => BulkKind::TagImport,
            BulkTask::FileImport(_) => BulkKind::FileImport,
            BulkTask::UndoReplay(_) => BulkKind::UndoReplay,
            BulkTask::RedoReplay(_) => BulkKind::RedoReplay,
            BulkTask::Refill(_) => BulkKind::Refill,
        }
    }

    pub fn waits_for_tags(&self) -> bool {
        matches!(self, BulkTask::TagImport(t) if t.waits_for_tags())
    }

    pub fn resume<D: Document + ?Sized>(
        &mut self,
        state: &mut EngineState,
        doc: &D,
        budget: &mut Budget,
        policy: &SchedulerPolicy,
    ) -> TaskStatus {
        match self {
            BulkTask::Search(t) | BulkTask::Refill(t) => t.resume(state, doc, budget),
            BulkTask::TagImport(t) | BulkTask::FileImport(t) => t.resume(state, doc, budget),
            BulkTask::UndoReplay(t) | BulkTask::RedoReplay(t) => {
                t.resume(state, doc, budget, policy)
            }
        }
    }

    pub fn progress(&self, state: &EngineState) -> u8 {
        match self {
            BulkTask::Search(t) | BulkTask::Refill(t) => t.progress(),
            BulkTask::TagImport(t) | BulkTask::FileImport(t) => t.progress(),
            BulkTask::UndoReplay(t) | BulkTask::RedoReplay(t) => t.progress(state),
        }
    }

    /// Closes the ledger state the task left open.
    pub fn finish(&self, state: &mut EngineState, aborted: bool) {
        match self {
            BulkTask::UndoReplay(_) | BulkTask::RedoReplay(_) => state.ledger.finish_replay(),
            _ if aborted => state.ledger.abort(),
            _ => state.ledger.finalize(Stack::Undo),
        }
    }
}

/// Incremental search for the next match from a start line.
#[derive(Debug, Clone)]
pub struct IncSearchTask {
    pattern: SearchPattern,
    direction: ScanDirection,
    next: usize,
    found: Option<LineMatch>,
}

impl IncSearchTask {
    /// Searches lines after `from` (forward) or before it (backward).
    pub fn new(pattern: SearchPattern, from: usize, direction: ScanDirection) -> Self {
        let next = match direction {
            ScanDirection::Forward => from + 1,
            ScanDirection::Backward => from.saturating_sub(1),
        };
        Self {
            pattern,
            direction,
            next,
            found: None,
        }
    }

    pub fn found(&self) -> Option<LineMatch> {
        self.found
    }

    fn resume<D: Document + ?Sized>(&mut self, doc: &D, budget: &mut Budget) -> TaskStatus {
        let count = doc.line_count();
        while !budget.expired() {
            let step = budget.remaining_lines();
            match self.direction {
                ScanDirection::Forward => {
                    if self.next > count {
                        return TaskStatus::Done;
                    }
                    let end = self.next.saturating_add(step).min(count + 1);
                    self.found = doc.search(&self.pattern, self.next, end, self.direction);
                    budget.charge(end - self.next);
                    self.next = end;
                }
                ScanDirection::Backward => {
                    if self.next == 0 {
                        return TaskStatus::Done;
                    }
                    let start = (self.next + 1).saturating_sub(step).max(1);
                    self.found = doc.search(&self.pattern, start, self.next + 1, self.direction);
                    budget.charge(self.next + 1 - start);
                    self.next = start - 1;
                }
            }
            if self.found.is_some() {
                return TaskStatus::Done;
            }
        }
        TaskStatus::Yielded
    }
}

/// Marks every line matching the current search pattern.
#[derive(Debug, Clone)]
pub struct HighlightTask {
    pattern: SearchPattern,
    next: usize,
}

impl HighlightTask {
    pub fn new(pattern: SearchPattern) -> Self {
        Self { pattern, next: 1 }
    }

    fn resume<D: Document + ?Sized>(
        &mut self,
        state: &mut EngineState,
        doc: &D,
        budget: &mut Budget,
    ) -> TaskStatus {
        let end = doc.line_count() + 1;
        while self.next < end && !budget.expired() {
            let window_end = self.next.saturating_add(budget.remaining_lines()).min(end);
            match doc.search(&self.pattern, self.next, window_end, ScanDirection::Forward) {
                Some(m) => {
                    budget.charge(m.line + 1 - self.next);
                    state.highlights.insert(m.line);
                    self.next = m.line + 1;
                }
                None => {
                    budget.charge(window_end - self.next);
                    self.next = window_end;
                }
            }
        }
        if self.next < end {
            TaskStatus::Yielded
        } else {
            TaskStatus::Done
        }
    }
}

#[derive(Debug, Clone)]
pub enum Task {
    Bulk(BulkTask),
    IncSearch(IncSearchTask),
    SearchHighlight(HighlightTask),
    HighlightInit,
}

impl Task {
    pub fn resume<D: Document + ?Sized>(
        &mut self,
        state: &mut EngineState,
        doc: &D,
        budget: &mut Budget,
        policy: &SchedulerPolicy,
    ) -> TaskStatus {
        match self {
            Task::Bulk(t) => t.resume(state, doc, budget, policy),
            Task::IncSearch(t) => t.resume(doc, budget),
            Task::SearchHighlight(t) => t.resume(state, doc, budget),
            Task::HighlightInit => {
                if !state.tags.is_complete() {
                    state.tags.scan_step(doc, budget.remaining_lines());
                }
                if state.tags.is_complete() {
                    TaskStatus::Done
                } else {
                    TaskStatus::Yielded
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BulkTask, ImportTask, IncSearchTask, ScanRange, SearchTask, Task};
    use crate::document::{RopeDocument, ScanDirection};
    use crate::engine::EngineState;
    use crate::ledger::{Change, Stack};
    use crate::pattern::{SearchParams, SearchPattern};
    use crate::scheduler::{Budget, SchedulerPolicy, TaskStatus};
    use std::time::Duration;

    fn numbered(n: usize, hits: &[usize]) -> RopeDocument {
        let text: String = (1..=n)
            .map(|l| {
                if hits.contains(&l) {
                    format!("{l} ERROR\n")
                } else {
                    format!("{l} ok\n")
                }
            })
            .collect();
        RopeDocument::from_text(&text)
    }

    fn pat(s: &str) -> SearchPattern {
        SearchPattern::compile(&SearchParams::literal(s)).unwrap()
    }

    fn lines(n: usize) -> Budget {
        Budget::new(Duration::from_secs(60), n)
    }

    #[test]
    fn scan_range_bounds() {
        assert_eq!(ScanRange::Whole.bounds(10), (1, 11));
        assert_eq!(ScanRange::Above(4).bounds(10), (1, 5));
        assert_eq!(ScanRange::Below(4).bounds(10), (4, 11));
        assert_eq!(ScanRange::Below(10).bounds(10), (10, 11));
        assert_eq!(ScanRange::Below(12).bounds(10), (11, 11));
        assert_eq!(ScanRange::Above(0).bounds(10), (1, 1));
    }

    #[test]
    fn search_runs_across_turns_into_one_entry() {
        let doc = numbered(1000, &[10, 250, 900]);
        let mut state = EngineState::default();
        let mut task = SearchTask::new(vec![pat("ERROR")], Change::Add, 1, 1001);
        let mut turns = 0;
        loop {
            turns += 1;
            let status = task.resume(&mut state, &doc, &mut lines(300));
            if status == TaskStatus::Done {
                break;
            }
            assert_eq!(status, TaskStatus::Yielded);
        }
        assert!(turns >= 4);
        assert_eq!(state.index.as_slice(), &[10, 250, 900]);
        let entries = state.ledger.entries(Stack::Undo);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lines, vec![10, 250, 900]);
        assert!(entries[0].finalized);
        assert_eq!(task.progress(), 100);
    }

    #[test]
    fn each_pattern_gets_its_own_entry() {
        let doc = RopeDocument::from_text("a\nb\na b\n");
        let mut state = EngineState::default();
        let mut task = SearchTask::new(vec![pat("a"), pat("b")], Change::Add, 1, 4);
        assert_eq!(task.resume(&mut state, &doc, &mut Budget::unlimited()), TaskStatus::Done);
        let entries = state.ledger.entries(Stack::Undo);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].lines, vec![1, 3]);
        assert_eq!(entries[1].lines, vec![2]);
        assert_eq!(state.index.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn remove_search_only_books_removed_lines() {
        let doc = numbered(20, &[3, 7]);
        let mut state = EngineState::default();
        state.index.insert_many(&[1, 3, 5]);
        let mut task = SearchTask::new(vec![pat("ERROR")], Change::Remove, 1, 21);
        task.resume(&mut state, &doc, &mut Budget::unlimited());
        assert_eq!(state.index.as_slice(), &[1, 5]);
        assert_eq!(state.ledger.describe_top(Stack::Undo), Some((Change::Remove, 1)));
    }

    #[test]
    fn tag_import_waits_for_complete_table() {
        let doc = numbered(5, &[2]);
        let mut state = EngineState::default();
        state.tags = crate::tags::TagTable::new(&[crate::tags::TagSpec {
            name: "err".into(),
            search: SearchParams::literal("ERROR"),
        }])
        .unwrap();
        let mut task = BulkTask::TagImport(ImportTask::from_tags(vec![0], Change::Add));
        let policy = SchedulerPolicy::default();
        assert!(task.waits_for_tags());
        assert_eq!(
            task.resume(&mut state, &doc, &mut Budget::unlimited(), &policy),
            TaskStatus::Suspended
        );
        let mut init = Task::HighlightInit;
        assert_eq!(
            init.resume(&mut state, &doc, &mut Budget::unlimited(), &policy),
            TaskStatus::Done
        );
        assert_eq!(
            task.resume(&mut state, &doc, &mut Budget::unlimited(), &policy),
            TaskStatus::Done
        );
        assert_eq!(state.index.as_slice(), &[2]);
    }

    #[test]
    fn file_import_skips_lines_past_the_end() {
        let doc = numbered(5, &[]);
        let mut state = EngineState::default();
        let mut task = ImportTask::from_lines(vec![4, 9, 1]);
        assert_eq!(task.resume(&mut state, &doc, &mut lines(2)), TaskStatus::Yielded);
        assert_eq!(task.progress(), 66);
        assert_eq!(task.resume(&mut state, &doc, &mut lines(2)), TaskStatus::Done);
        assert_eq!(state.index.as_slice(), &[1, 4]);
        assert_eq!(state.ledger.entries(Stack::Undo)[0].lines, vec![4, 1]);
    }

    #[test]
    fn inc_search_finds_next_match_in_either_direction() {
        let doc = numbered(50, &[5, 30]);
        let mut fwd = IncSearchTask::new(pat("ERROR"), 5, ScanDirection::Forward);
        let mut turns = 0;
        while fwd.resume(&doc, &mut lines(8)) == TaskStatus::Yielded {
            turns += 1;
        }
        assert!(turns > 0);
        assert_eq!(fwd.found().map(|m| m.line), Some(30));

        let mut back = IncSearchTask::new(pat("ERROR"), 30, ScanDirection::Backward);
        while back.resume(&doc, &mut lines(8)) == TaskStatus::Yielded {}
        assert_eq!(back.found().map(|m| m.line), Some(5));

        let mut none = IncSearchTask::new(pat("ERROR"), 30, ScanDirection::Forward);
        assert_eq!(none.resume(&doc, &mut Budget::unlimited()), TaskStatus::Done);
        assert_eq!(none.found(), None);
    }
}
