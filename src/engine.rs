use crate::document::{Document, ScanDirection};
use crate::error::Result;
use crate::frame::{FrameMarker, FrameParser, FrameSpec};
use crate::ledger::{Change, Stack, UndoLedger};
use crate::match_index::MatchIndex;
use crate::pattern::{SearchParams, SearchPattern};
use crate::renumber::Truncation;
use crate::scheduler::{Budget, Family, Phase, Scheduler, SchedulerPolicy, TaskStatus};
use crate::tags::{TagSpec, TagTable};
use crate::tasks::{
    BulkKind, BulkTask, HighlightTask, ImportTask, IncSearchTask, ReplayTask, ScanRange,
    SearchTask, Task,
};
use std::time::Instant;

/// Everything background tasks may touch during a turn.
#[derive(Debug, Default)]
pub struct EngineState {
    pub(crate) index: MatchIndex,
    pub(crate) ledger: UndoLedger,
    pub(crate) tags: TagTable,
    pub(crate) highlights: MatchIndex,
    pub(crate) suspend_count: u32,
    pub(crate) prompt_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Search {
        patterns: Vec<SearchParams>,
        change: Change,
        range: ScanRange,
    },
    TagImport {
        tags: Vec<usize>,
        change: Change,
    },
    FileImport {
        lines: Vec<usize>,
    },
    Undo,
    Redo,
    /// Insort or removal of explicit lines, e.g. the cursor line.
    Manual {
        lines: Vec<usize>,
        change: Change,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// Applied synchronously, no task needed.
    Applied,
    /// Another match-filling task is running; the caller must ask the user.
    PendingConfirmation,
    /// A confirmation prompt is already open.
    Busy,
    Cancelled,
    NothingToDo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    AbortOngoing,
    CancelNew,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Progress { kind: BulkKind, percent: u8 },
    Completed { kind: BulkKind },
    Aborted { kind: BulkKind },
    PromptOpened { ongoing: BulkKind },
    PromptDismissed { auto: bool },
    IncSearchMatch(Option<crate::document::LineMatch>),
    HighlightsReady,
    TagsReady,
    Warning(String),
}

enum Prepared {
    Search {
        patterns: Vec<SearchPattern>,
        change: Change,
        range: ScanRange,
    },
    TagImport {
        tags: Vec<usize>,
        change: Change,
    },
    FileImport {
        lines: Vec<usize>,
    },
    Replay(Stack),
    Manual {
        lines: Vec<usize>,
        change: Change,
    },
}

struct LastSearch {
    patterns: Vec<SearchPattern>,
    change: Change,
}

pub struct Engine {
    state: EngineState,
    sched: Scheduler<Task>,
    frames: Option<FrameParser>,
    pending: Option<Prepared>,
    last_search: Option<LastSearch>,
    refill_from: Option<usize>,
    events: Vec<Notification>,
}

impl Engine {
    pub fn new(policy: SchedulerPolicy, tags: &[TagSpec], frame: &FrameSpec) -> Result<Self> {
        let mut engine = Self {
            state: EngineState {
                tags: TagTable::new(tags)?,
                ..EngineState::default()
            },
            sched: Scheduler::new(policy),
            frames: FrameParser::from_spec(frame)?,
            pending: None,
            last_search: None,
            refill_from: None,
            events: Vec::new(),
        };
        engine.schedule_tag_scan(Instant::now());
        Ok(engine)
    }

    pub fn match_count(&self) -> usize {
        self.state.index.len()
    }

    pub fn line_at(&self, idx: usize) -> Option<usize> {
        self.state.index.line_at(idx)
    }

    pub fn index_of_line(&self, line: usize) -> Option<usize> {
        self.state.index.position(line)
    }

    /// First list index whose line is `>= line`.
    pub fn lower_bound(&self, line: usize) -> usize {
        self.state.index.index_of(line)
    }

    pub fn lines(&self) -> &[usize] {
        self.state.index.as_slice()
    }

    pub fn is_highlighted(&self, line: usize) -> bool {
        self.state.highlights.contains(line)
    }

    pub fn tags(&self) -> &TagTable {
        &self.state.tags
    }

    pub fn describe_undo(&self) -> Option<(Change, usize)> {
        self.state.ledger.describe_top(Stack::Undo)
    }

    pub fn describe_redo(&self) -> Option<(Change, usize)> {
        self.state.ledger.describe_top(Stack::Redo)
    }

    pub fn suspend_count(&self) -> u32 {
        self.state.suspend_count
    }

    pub fn prompt_pending(&self) -> bool {
        self.state.prompt_open
    }

    pub fn bulk_kind(&self) -> Option<BulkKind> {
        match self.sched.task(Family::SearchList) {
            Some(Task::Bulk(task)) => Some(task.kind()),
            _ => None,
        }
    }

    pub fn bulk_phase(&self) -> Option<Phase> {
        self.sched.phase(Family::SearchList)
    }

    pub fn progress(&self) -> Option<(BulkKind, u8)> {
        match self.sched.task(Family::SearchList) {
            Some(Task::Bulk(task)) => Some((task.kind(), task.progress(&self.state))),
            _ => None,
        }
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        self.sched.next_wakeup()
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.events)
    }

    pub fn frame_marker<D: Document + ?Sized>(&mut self, doc: &D, line: usize) -> Option<FrameMarker> {
        self.frames.as_mut()?.marker(doc, line)
    }

    pub fn has_frames(&self) -> bool {
        self.frames.is_some()
    }

    /// Raises the suspend depth while a modal interaction is in progress.
    pub fn begin_modal(&mut self) {
        self.state.suspend_count += 1;
    }

    pub fn end_modal(&mut self) {
        self.state.suspend_count = self.state.suspend_count.saturating_sub(1);
    }

    fn prepare(&self, request: Request) -> Result<Prepared> {
        Ok(match request {
            Request::Search {
                patterns,
                change,
                range,
            } => Prepared::Search {
                patterns: patterns
                    .iter()
                    .map(SearchPattern::compile)
                    .collect::<Result<Vec<_>>>()?,
                change,
                range,
            },
            Request::TagImport { tags, change } => Prepared::TagImport { tags, change },
            Request::FileImport { lines } => Prepared::FileImport { lines },
            Request::Undo => Prepared::Replay(Stack::Undo),
            Request::Redo => Prepared::Replay(Stack::Redo),
            Request::Manual { lines, change } => Prepared::Manual { lines, change },
        })
    }

    /// Starts a match-list operation, or opens a confirmation prompt when
    /// another one is still running. Invalid patterns are rejected before
    /// anything is touched.
    pub fn request<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        request: Request,
        now: Instant,
    ) -> Result<Admission> {
        let prepared = self.prepare(request)?;
        match &prepared {
            Prepared::Replay(stack) if !self.state.ledger.has(*stack) => {
                return Ok(Admission::NothingToDo);
            }
            Prepared::Manual { lines, .. } | Prepared::FileImport { lines } if lines.is_empty() => {
                return Ok(Admission::NothingToDo);
            }
            Prepared::Search { patterns, .. } if patterns.is_empty() => {
                return Ok(Admission::NothingToDo);
            }
            _ => {}
        }
        if self.state.prompt_open {
            return Ok(Admission::Busy);
        }
        if let Some(ongoing) = self.bulk_kind() {
            tracing::info!(ongoing = ongoing.label(), "request conflicts with ongoing operation");
            self.pending = Some(prepared);
            self.state.prompt_open = true;
            self.state.suspend_count += 1;
            self.events.push(Notification::PromptOpened { ongoing });
            return Ok(Admission::PendingConfirmation);
        }
        Ok(self.start(doc, prepared, now))
    }

    /// Answers an open confirmation prompt.
    pub fn resolve_prompt<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        decision: Decision,
        now: Instant,
    ) -> Admission {
        if !self.state.prompt_open {
            return Admission::NothingToDo;
        }
        let pending = self.dismiss_prompt();
        self.events.push(Notification::PromptDismissed { auto: false });
        match decision {
            Decision::CancelNew => {
                tracing::info!("new request dropped, ongoing operation continues");
                Admission::Cancelled
            }
            Decision::AbortOngoing => {
                self.sched.request_stop(Family::SearchList, now);
                self.retire(Family::SearchList, true);
                match pending {
                    Some(prepared) => self.start(doc, prepared, now),
                    None => Admission::NothingToDo,
                }
            }
        }
    }

    /// Stops the running match-filling task at its next checkpoint.
    pub fn abort(&mut self, now: Instant) -> bool {
        if self.sched.is_active(Family::SearchList) {
            self.sched.request_stop(Family::SearchList, now);
            true
        } else {
            false
        }
    }

    /// Removes every line from the list as one undoable change. A running
    /// task is aborted without asking.
    pub fn clear(&mut self) -> usize {
        if self.state.prompt_open {
            self.dismiss_prompt();
            self.events.push(Notification::PromptDismissed { auto: false });
        }
        self.retire(Family::SearchList, true);
        self.last_search = None;
        self.refill_from = None;
        let all = self.state.index.take_all();
        let count = all.len();
        self.state.ledger.record_change(Change::Remove, all);
        tracing::info!(count, "match list cleared");
        count
    }

    pub fn start_inc_search(
        &mut self,
        params: &SearchParams,
        from: usize,
        direction: ScanDirection,
        now: Instant,
    ) -> Result<()> {
        let pattern = SearchPattern::compile(params)?;
        self.sched.schedule(
            Family::IncSearch,
            Task::IncSearch(IncSearchTask::new(pattern, from, direction)),
            now,
        );
        Ok(())
    }

    pub fn start_search_highlight(&mut self, params: &SearchParams, now: Instant) -> Result<()> {
        let pattern = SearchPattern::compile(params)?;
        self.state.highlights = MatchIndex::new();
        self.sched.schedule(
            Family::SearchHighlight,
            Task::SearchHighlight(HighlightTask::new(pattern)),
            now,
        );
        Ok(())
    }

    pub fn cancel_search_highlight(&mut self) {
        self.sched.remove(Family::SearchHighlight);
        self.state.highlights = MatchIndex::new();
    }

    /// Next (or previous) list index after `from` whose line matches `params`.
    pub fn search_in_list<D: Document + ?Sized>(
        &self,
        doc: &D,
        params: &SearchParams,
        from: Option<usize>,
        direction: ScanDirection,
    ) -> Result<Option<usize>> {
        let pattern = SearchPattern::compile(params)?;
        let lines = self.state.index.as_slice();
        let matches = |idx: &usize| {
            doc.line_text(lines[*idx])
                .is_some_and(|text| pattern.is_match(&text))
        };
        Ok(match direction {
            ScanDirection::Forward => {
                let start = from.map_or(0, |i| i + 1);
                (start..lines.len()).find(matches)
            }
            ScanDirection::Backward => {
                let end = from.unwrap_or(lines.len()).min(lines.len());
                (0..end).rev().find(matches)
            }
        })
    }

    /// Runs one scheduler turn: the highest-priority task due at `now` either
    /// backs off, is retired, or works for one slice.
    pub fn poll<D: Document + ?Sized>(&mut self, doc: &D, now: Instant) -> Vec<Notification> {
        if let Some(family) = self.sched.next_due(now) {
            self.turn(doc, family, now);
        }
        std::mem::take(&mut self.events)
    }

    /// Polls until no task is left, a prompt needs an answer, or `max_turns`
    /// turns were run. Time jumps to each wakeup instead of sleeping.
    pub fn drive<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        mut now: Instant,
        max_turns: usize,
    ) -> Vec<Notification> {
        let mut out = std::mem::take(&mut self.events);
        for _ in 0..max_turns {
            if self.state.prompt_open {
                break;
            }
            let Some(at) = self.sched.next_wakeup() else {
                break;
            };
            now = now.max(at);
            out.extend(self.poll(doc, now));
        }
        out
    }

    /// Drops discarded lines from the document and renumbers every
    /// line-keyed structure accordingly.
    pub fn discard_lines<D: Document + ?Sized>(&mut self, doc: &mut D, cut: Truncation) {
        if cut.is_noop() {
            return;
        }
        if self.state.prompt_open {
            self.dismiss_prompt();
            self.events.push(Notification::Warning(
                "Pending request dropped: document was truncated".to_string(),
            ));
            self.events.push(Notification::PromptDismissed { auto: true });
        }
        self.retire(Family::SearchList, true);
        self.sched.remove(Family::IncSearch);
        self.sched.remove(Family::SearchHighlight);

        cut.apply_to(doc);
        self.state.index.renumber(&cut);
        self.state.ledger.renumber(&cut);
        self.state.tags.renumber(&cut);
        self.state.highlights.renumber(&cut);
        if let Some(frames) = self.frames.as_mut() {
            frames.invalidate();
        }
        self.refill_from = self.refill_from.and_then(|line| {
            if cut.bottom() > 0 && line >= cut.bottom() {
                None
            } else {
                Some(line.saturating_sub(cut.discarded_above()).max(1))
            }
        });
        tracing::info!(
            top = cut.top(),
            bottom = cut.bottom(),
            remaining = self.state.index.len(),
            "discarded document lines"
        );
    }

    /// Books lines appended by the ingestion thread: tags are scanned for
    /// them and the last search is re-applied to them.
    pub fn on_lines_appended<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        old_count: usize,
        now: Instant,
    ) {
        let count = doc.line_count();
        if count <= old_count {
            return;
        }
        self.state.tags.lines_appended(count);
        self.schedule_tag_scan(now);
        if self.last_search.is_some() {
            let from = old_count + 1;
            self.refill_from = Some(self.refill_from.map_or(from, |f| f.min(from)));
            self.start_refill(doc, now);
        }
    }

    fn schedule_tag_scan(&mut self, now: Instant) {
        if !self.state.tags.is_complete() && !self.sched.is_active(Family::HighlightInit) {
            self.sched.schedule(Family::HighlightInit, Task::HighlightInit, now);
        }
    }

    fn dismiss_prompt(&mut self) -> Option<Prepared> {
        self.state.prompt_open = false;
        self.state.suspend_count = self.state.suspend_count.saturating_sub(1);
        self.pending.take()
    }

    fn schedule_bulk(&mut self, task: BulkTask, now: Instant) -> Admission {
        tracing::debug!(kind = task.kind().label(), "starting match-list task");
        self.sched.schedule(Family::SearchList, Task::Bulk(task), now);
        Admission::Started
    }

    fn start<D: Document + ?Sized>(&mut self, doc: &D, prepared: Prepared, now: Instant) -> Admission {
        match prepared {
            Prepared::Search {
                patterns,
                change,
                range,
            } => {
                let (start, end) = range.bounds(doc.line_count());
                self.state.ledger.begin_run();
                if matches!(range, ScanRange::Whole | ScanRange::Below(_)) {
                    self.last_search = Some(LastSearch {
                        patterns: patterns.clone(),
                        change,
                    });
                    self.refill_from = None;
                }
                self.schedule_bulk(
                    BulkTask::Search(SearchTask::new(patterns, change, start, end)),
                    now,
                )
            }
            Prepared::TagImport { tags, change } => {
                self.state.ledger.begin_run();
                self.schedule_tag_scan(now);
                self.schedule_bulk(BulkTask::TagImport(ImportTask::from_tags(tags, change)), now)
            }
            Prepared::FileImport { lines } => {
                self.state.ledger.begin_run();
                self.schedule_bulk(BulkTask::FileImport(ImportTask::from_lines(lines)), now)
            }
            Prepared::Replay(stack) => match self.state.ledger.begin_replay(stack) {
                Some(orig) => {
                    let task = ReplayTask::new(stack, orig);
                    let task = match stack {
                        Stack::Undo => BulkTask::UndoReplay(task),
                        Stack::Redo => BulkTask::RedoReplay(task),
                    };
                    self.schedule_bulk(task, now)
                }
                None => Admission::NothingToDo,
            },
            Prepared::Manual { lines, change } => {
                let count = doc.line_count();
                let applied = match change {
                    Change::Add => {
                        let valid: Vec<usize> =
                            lines.into_iter().filter(|&l| l <= count).collect();
                        self.state.index.insert_many(&valid)
                    }
                    Change::Remove => self.state.index.remove_many(&lines),
                };
                if applied.is_empty() {
                    return Admission::NothingToDo;
                }
                tracing::debug!(count = applied.len(), change = change.label(), "manual list edit");
                self.state.ledger.record_change(change, applied);
                Admission::Applied
            }
        }
    }

    fn start_refill<D: Document + ?Sized>(&mut self, doc: &D, now: Instant) {
        if self.sched.is_active(Family::SearchList) || self.state.prompt_open {
            return;
        }
        let (Some(from), Some(last)) = (self.refill_from, self.last_search.as_ref()) else {
            return;
        };
        let end = doc.line_count() + 1;
        let task = SearchTask::new(last.patterns.clone(), last.change, from, end);
        self.refill_from = None;
        if from >= end {
            return;
        }
        self.state.ledger.begin_run();
        self.schedule_bulk(BulkTask::Refill(task), now);
    }

    fn must_back_off(&self, family: Family) -> bool {
        // the prompt's own suspension spares the task it contests and
        // whatever that task waits on
        let suspended = self.state.suspend_count > u32::from(self.state.prompt_open);
        match family {
            Family::SearchList => {
                suspended
                    || self.sched.is_active(Family::IncSearch)
                    || self.sched.is_active(Family::SearchHighlight)
            }
            Family::IncSearch => false,
            Family::SearchHighlight => suspended,
            Family::HighlightInit => {
                let bulk_blocks = matches!(
                    self.sched.task(Family::SearchList),
                    Some(Task::Bulk(task)) if !task.waits_for_tags()
                );
                suspended
                    || bulk_blocks
                    || self.sched.is_active(Family::IncSearch)
                    || self.sched.is_active(Family::SearchHighlight)
            }
        }
    }

    fn turn<D: Document + ?Sized>(&mut self, doc: &D, family: Family, now: Instant) {
        if self.sched.stop_requested(family) {
            self.retire(family, true);
            if family == Family::SearchList {
                self.after_bulk(doc, now);
            }
            return;
        }
        if self.must_back_off(family) {
            tracing::trace!(?family, "backing off");
            self.sched.end_turn(family, TaskStatus::Suspended, now);
            return;
        }
        self.sched.set_phase(family, Phase::Running);
        let policy = *self.sched.policy();
        let mut budget = Budget::for_policy(&policy);
        let Some(task) = self.sched.task_mut(family) else {
            return;
        };
        let status = task.resume(&mut self.state, doc, &mut budget, &policy);
        match status {
            TaskStatus::Done => {
                self.sched.set_phase(family, Phase::Finalizing);
                self.retire(family, false);
                if family == Family::SearchList {
                    self.after_bulk(doc, now);
                }
            }
            TaskStatus::Yielded => {
                if let Some(Task::Bulk(task)) = self.sched.task(family) {
                    self.events.push(Notification::Progress {
                        kind: task.kind(),
                        percent: task.progress(&self.state),
                    });
                }
                self.sched.end_turn(family, status, now);
            }
            TaskStatus::Suspended => {
                self.sched.end_turn(family, status, now);
            }
        }
    }

    /// Removes the family's task and closes its ledger state.
    fn retire(&mut self, family: Family, aborted: bool) {
        let Some(task) = self.sched.remove(family) else {
            return;
        };
        match task {
            Task::Bulk(task) => {
                task.finish(&mut self.state, aborted);
                let kind = task.kind();
                if aborted {
                    tracing::info!(kind = kind.label(), matches = self.state.index.len(), "aborted");
                    self.events.push(Notification::Aborted { kind });
                } else {
                    tracing::info!(kind = kind.label(), matches = self.state.index.len(), "completed");
                    self.events.push(Notification::Completed { kind });
                }
            }
            Task::IncSearch(task) if !aborted => {
                self.events.push(Notification::IncSearchMatch(task.found()));
            }
            Task::SearchHighlight(_) if !aborted => self.events.push(Notification::HighlightsReady),
            Task::HighlightInit if !aborted => self.events.push(Notification::TagsReady),
            _ => {}
        }
    }

    /// A finished task auto-dismisses a prompt raised against it; the new
    /// request then proceeds. Otherwise deferred refills get their turn.
    fn after_bulk<D: Document + ?Sized>(&mut self, doc: &D, now: Instant) {
        if self.state.prompt_open {
            let pending = self.dismiss_prompt();
            self.events.push(Notification::PromptDismissed { auto: true });
            if let Some(prepared) = pending {
                let admission = self.start(doc, prepared, now);
                tracing::debug!(?admission, "pending request admitted");
            }
            return;
        }
        self.start_refill(doc, now);
    }
}
