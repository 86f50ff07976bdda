use std::time::{Duration, Instant};

/// Background task families, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    /// Match-filling bulk tasks (search, imports, undo/redo replay, refill).
    SearchList,
    IncSearch,
    SearchHighlight,
    HighlightInit,
}

impl Family {
    pub const ALL: [Family; 4] = [
        Family::SearchList,
        Family::IncSearch,
        Family::SearchHighlight,
        Family::HighlightInit,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Queued,
    Running,
    Yielded,
    Suspended,
    Aborting,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Yielded,
    Suspended,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerPolicy {
    pub slice: Duration,
    pub backoff: Duration,
    pub throttle: Duration,
    pub throttle_after: u32,
    pub scan_chunk_lines: usize,
    pub replay_chunk: usize,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            slice: Duration::from_millis(100),
            backoff: Duration::from_millis(100),
            throttle: Duration::from_millis(10),
            throttle_after: 10,
            scan_chunk_lines: 4096,
            replay_chunk: 1000,
        }
    }
}

/// Work allowance for one turn: a wall-clock slice and a line count,
/// whichever runs out first.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Option<Instant>,
    lines_left: usize,
}

impl Budget {
    pub fn new(slice: Duration, lines: usize) -> Self {
        Self {
            deadline: Instant::now().checked_add(slice),
            lines_left: lines.max(1),
        }
    }

    pub fn for_policy(policy: &SchedulerPolicy) -> Self {
        Self::new(policy.slice, policy.scan_chunk_lines)
    }

    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            lines_left: usize::MAX,
        }
    }

    pub fn remaining_lines(&self) -> usize {
        self.lines_left
    }

    pub fn charge(&mut self, lines: usize) {
        self.lines_left = self.lines_left.saturating_sub(lines.max(1));
    }

    pub fn expired(&self) -> bool {
        self.lines_left == 0 || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[derive(Debug)]
struct Slot<T> {
    task: T,
    phase: Phase,
    ready_at: Instant,
    streak: u32,
    stop: bool,
}

/// Timer queue with one slot per family. The scheduler only decides when a
/// task runs next; resuming it is up to the caller.
#[derive(Debug)]
pub struct Scheduler<T> {
    policy: SchedulerPolicy,
    slots: [Option<Slot<T>>; 4],
}

impl<T> Scheduler<T> {
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self {
            policy,
            slots: [None, None, None, None],
        }
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    /// Installs `task`, replacing whatever the family had queued.
    pub fn schedule(&mut self, family: Family, task: T, now: Instant) -> Option<T> {
        let prev = self.slots[family.slot()].replace(Slot {
            task,
            phase: Phase::Queued,
            ready_at: now,
            streak: 0,
            stop: false,
        });
        prev.map(|s| s.task)
    }

    pub fn is_active(&self, family: Family) -> bool {
        self.slots[family.slot()].is_some()
    }

    pub fn any_active_except(&self, family: Family) -> bool {
        Family::ALL
            .iter()
            .any(|&f| f != family && self.is_active(f))
    }

    pub fn phase(&self, family: Family) -> Option<Phase> {
        self.slots[family.slot()].as_ref().map(|s| s.phase)
    }

    pub fn task(&self, family: Family) -> Option<&T> {
        self.slots[family.slot()].as_ref().map(|s| &s.task)
    }

    pub fn task_mut(&mut self, family: Family) -> Option<&mut T> {
        self.slots[family.slot()].as_mut().map(|s| &mut s.task)
    }

    /// Marks the family's task for cancellation at its next checkpoint.
    pub fn request_stop(&mut self, family: Family, now: Instant) {
        if let Some(slot) = self.slots[family.slot()].as_mut() {
            slot.stop = true;
            slot.phase = Phase::Aborting;
            slot.ready_at = now;
        }
    }

    pub fn stop_requested(&self, family: Family) -> bool {
        self.slots[family.slot()].as_ref().is_some_and(|s| s.stop)
    }

    pub fn set_phase(&mut self, family: Family, phase: Phase) {
        if let Some(slot) = self.slots[family.slot()].as_mut() {
            slot.phase = phase;
        }
    }

    /// Highest-priority family whose task is due at `now`.
    pub fn next_due(&self, now: Instant) -> Option<Family> {
        Family::ALL.into_iter().find(|&f| {
            self.slots[f.slot()]
                .as_ref()
                .is_some_and(|s| s.ready_at <= now)
        })
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|s| s.ready_at).min()
    }

    /// Books the outcome of a turn and computes when the task runs next.
    /// Returns the task when it is done.
    pub fn end_turn(&mut self, family: Family, status: TaskStatus, now: Instant) -> Option<T> {
        let policy = self.policy;
        let slot_ref = &mut self.slots[family.slot()];
        match status {
            TaskStatus::Done => slot_ref.take().map(|s| s.task),
            TaskStatus::Yielded => {
                if let Some(slot) = slot_ref.as_mut() {
                    slot.phase = Phase::Yielded;
                    slot.streak += 1;
                    if slot.streak > policy.throttle_after {
                        slot.streak = 0;
                        slot.ready_at = now + policy.throttle;
                    } else {
                        slot.ready_at = now;
                    }
                }
                None
            }
            TaskStatus::Suspended => {
                if let Some(slot) = slot_ref.as_mut() {
                    slot.phase = Phase::Suspended;
                    slot.streak = 0;
                    slot.ready_at = now + policy.backoff;
                }
                None
            }
        }
    }

    pub fn remove(&mut self, family: Family) -> Option<T> {
        self.slots[family.slot()].take().map(|s| s.task)
    }
}
