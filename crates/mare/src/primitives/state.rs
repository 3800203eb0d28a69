// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task state word: stage flags packed alongside a predecessor counter in
//! a single atomic `u32`, so that decrementing the predecessor count and
//! transitioning to ready happens with one CAS.

use crate::loom::sync::atomic::{AtomicU32, Ordering};

const PRED_BITS: u32 = 26;
const PRED_MASK: u32 = (1 << PRED_BITS) - 1;

const IN_UTCACHE: u32 = 1 << 26;
const CANCEL_REQ: u32 = 1 << 27;
const UNLAUNCHED: u32 = 1 << 28;
const RUNNING: u32 = 1 << 29;
const COMPLETED: u32 = 1 << 30;
const CANCELED: u32 = 1 << 31;

const STAGE_MASK: u32 = UNLAUNCHED | RUNNING | COMPLETED | CANCELED;

/// The maximum number of predecessors a single task may register.
pub const MAX_PREDECESSORS: u32 = PRED_MASK;

/// Snapshot of a task's lifecycle stage, independent of predecessor count or
/// the `CANCEL_REQ`/`IN_UTCACHE` bits.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Stage {
    Unlaunched,
    Ready,
    Running,
    Completed,
    Canceled,
}

impl Stage {
    /// Total order used by the monotonicity invariant (testable property #1).
    fn rank(self) -> u8 {
        match self {
            Stage::Unlaunched => 0,
            Stage::Ready => 1,
            Stage::Running => 2,
            Stage::Completed | Stage::Canceled => 3,
        }
    }
}

impl PartialOrd for Stage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}

fn stage_of(word: u32) -> Stage {
    if word & CANCELED != 0 {
        Stage::Canceled
    } else if word & COMPLETED != 0 {
        Stage::Completed
    } else if word & RUNNING != 0 {
        Stage::Running
    } else if word & UNLAUNCHED != 0 {
        Stage::Unlaunched
    } else {
        Stage::Ready
    }
}

/// Outcome of [`TaskState::notify_predecessor_done`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NotifyOutcome {
    /// The predecessor count is still above zero, or the task was canceled
    /// or not yet launched; nothing to do.
    StillWaiting,
    /// The count reached zero, the task is launched and not canceled: the
    /// caller must enqueue it.
    Ready,
    /// The count reached zero but the task had already been canceled; the
    /// caller must drop its reference without enqueuing.
    Canceled,
}

/// Outcome of [`TaskState::try_begin_run`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BeginRun {
    /// The task transitioned to `RUNNING`; the caller must execute the body.
    Run,
    /// A cancellation was observed; the task transitioned directly to
    /// `CANCELED` without running, the body must not be invoked.
    Canceled,
}

/// Outcome of [`TaskState::request_cancel`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CancelOutcome {
    /// The task was `UNLAUNCHED` or `READY` and is now `CANCELED` directly.
    Canceled,
    /// The task was already `RUNNING`; the cancel handler (if any) must be
    /// invoked by the caller since the body is racing against this flag.
    InvokeHandler,
    /// The task had already reached a terminal stage; nothing to do.
    AlreadyTerminal,
    /// `CANCEL_REQ` was already set by a previous caller.
    AlreadyRequested,
}

#[derive(Debug)]
pub struct TaskState(AtomicU32);

impl TaskState {
    util::loom_const_fn! {
        pub const fn new() -> Self {
            Self(AtomicU32::new(UNLAUNCHED))
        }
    }

    pub fn stage(&self, order: Ordering) -> Stage {
        stage_of(self.0.load(order))
    }

    pub fn pred_count(&self, order: Ordering) -> u32 {
        self.0.load(order) & PRED_MASK
    }

    pub fn is_in_utcache(&self, order: Ordering) -> bool {
        self.0.load(order) & IN_UTCACHE != 0
    }

    /// Increments the predecessor count. Fails (returns `false`) if the task
    /// has already left `UNLAUNCHED`, i.e. it is READY-or-later.
    pub fn add_predecessor(&self) -> bool {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            if cur & UNLAUNCHED == 0 {
                return false;
            }
            let count = cur & PRED_MASK;
            assert!(count < PRED_MASK, "too many predecessors registered");
            let new = (cur & !PRED_MASK) | (count + 1);
            match self
                .0
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Clears `UNLAUNCHED`. Returns `true` if the task is immediately ready
    /// to run (predecessor count already zero).
    pub fn launch(&self) -> bool {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let new = cur & !UNLAUNCHED;
            match self
                .0
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return new & PRED_MASK == 0 && new & (CANCEL_REQ | CANCELED) == 0,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Decrements the predecessor count by one.
    pub fn notify_predecessor_done(&self) -> NotifyOutcome {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let count = cur & PRED_MASK;
            debug_assert!(count > 0, "predecessor count underflow");
            let new_count = count.saturating_sub(1);
            let new = (cur & !PRED_MASK) | new_count;
            match self
                .0
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if new_count != 0 {
                        return NotifyOutcome::StillWaiting;
                    }
                    if new & UNLAUNCHED != 0 {
                        return NotifyOutcome::StillWaiting;
                    }
                    if new & (CANCELED | CANCEL_REQ) != 0 {
                        return NotifyOutcome::Canceled;
                    }
                    return NotifyOutcome::Ready;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Sets `CANCEL_REQ`. If the task hasn't started running, it is moved
    /// directly to `CANCELED` here; the caller only needs to invoke the
    /// cancel handler when this returns [`CancelOutcome::InvokeHandler`].
    pub fn request_cancel(&self) -> CancelOutcome {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            if cur & (COMPLETED | CANCELED) != 0 {
                return CancelOutcome::AlreadyTerminal;
            }
            if cur & CANCEL_REQ != 0 {
                return CancelOutcome::AlreadyRequested;
            }
            let stage = stage_of(cur);
            let new = if stage == Stage::Running {
                (cur | CANCEL_REQ) & !PRED_MASK | (cur & PRED_MASK)
            } else {
                // UNLAUNCHED or READY: go straight to CANCELED.
                (cur & !(UNLAUNCHED | PRED_MASK)) | CANCEL_REQ | CANCELED
            };
            match self
                .0
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    return if stage == Stage::Running {
                        CancelOutcome::InvokeHandler
                    } else {
                        CancelOutcome::Canceled
                    };
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// READY -> RUNNING, unless a cancellation raced in, in which case the
    /// task moves straight to CANCELED without running.
    pub fn try_begin_run(&self) -> BeginRun {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            debug_assert_eq!(cur & UNLAUNCHED, 0, "try_begin_run on unlaunched task");
            if cur & CANCEL_REQ != 0 || cur & CANCELED != 0 {
                let new = (cur & !PRED_MASK) | CANCELED;
                match self
                    .0
                    .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Relaxed)
                {
                    Ok(_) => return BeginRun::Canceled,
                    Err(actual) => {
                        cur = actual;
                        continue;
                    }
                }
            }
            let new = (cur & !PRED_MASK) | RUNNING;
            match self
                .0
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return BeginRun::Run,
                Err(actual) => cur = actual,
            }
        }
    }

    /// RUNNING -> COMPLETED or CANCELED, depending on whether a cancel raced
    /// in while the body was executing.
    pub fn finish_run(&self, canceled: bool) {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let target = if canceled || cur & CANCEL_REQ != 0 {
                CANCELED
            } else {
                COMPLETED
            };
            let new = (cur & !(RUNNING | PRED_MASK)) | target;
            match self
                .0
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn set_in_utcache(&self) -> bool {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            if cur & (COMPLETED | CANCELED) != 0 {
                return false;
            }
            let new = cur | IN_UTCACHE;
            match self
                .0
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn clear_in_utcache(&self) {
        self.0.fetch_and(!IN_UTCACHE, Ordering::AcqRel);
    }

    pub fn is_terminal(&self, order: Ordering) -> bool {
        let word = self.0.load(order);
        word & (COMPLETED | CANCELED) != 0
    }

    /// `true` once `request_cancel` has set `CANCEL_REQ`, regardless of
    /// stage. Used by `abort_on_cancel` to decide whether to unwind.
    pub fn cancel_requested(&self, order: Ordering) -> bool {
        self.0.load(order) & (CANCEL_REQ | CANCELED) != 0
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_without_predecessors_is_immediately_ready() {
        let s = TaskState::new();
        assert_eq!(s.stage(Ordering::Acquire), Stage::Unlaunched);
        assert!(s.launch());
        assert_eq!(s.stage(Ordering::Acquire), Stage::Ready);
    }

    #[test]
    fn predecessors_gate_readiness() {
        let s = TaskState::new();
        assert!(s.add_predecessor());
        assert!(s.add_predecessor());
        assert!(!s.launch(), "two outstanding predecessors, not ready yet");
        assert_eq!(s.notify_predecessor_done(), NotifyOutcome::StillWaiting);
        assert_eq!(s.notify_predecessor_done(), NotifyOutcome::Ready);
    }

    #[test]
    fn add_predecessor_fails_after_launch() {
        let s = TaskState::new();
        assert!(s.launch());
        assert!(!s.add_predecessor());
    }

    #[test]
    fn cancel_before_run_skips_running() {
        let s = TaskState::new();
        assert!(s.launch());
        assert_eq!(s.request_cancel(), CancelOutcome::Canceled);
        assert_eq!(s.stage(Ordering::Acquire), Stage::Canceled);
        assert_eq!(s.try_begin_run(), BeginRun::Canceled);
    }

    #[test]
    fn cancel_while_running_requires_handler_invocation() {
        let s = TaskState::new();
        assert!(s.launch());
        assert_eq!(s.try_begin_run(), BeginRun::Run);
        assert_eq!(s.request_cancel(), CancelOutcome::InvokeHandler);
        s.finish_run(true);
        assert_eq!(s.stage(Ordering::Acquire), Stage::Canceled);
    }

    #[test]
    fn monotone_stage_order() {
        let s = TaskState::new();
        let mut prev = s.stage(Ordering::Acquire);
        s.launch();
        let mut cur = s.stage(Ordering::Acquire);
        assert!(cur >= prev);
        prev = cur;
        s.try_begin_run();
        cur = s.stage(Ordering::Acquire);
        assert!(cur >= prev);
        prev = cur;
        s.finish_run(false);
        cur = s.stage(Ordering::Acquire);
        assert!(cur >= prev);
    }
}

/// Model-checks the CAS races between `add_predecessor`/`notify_predecessor_done`
/// and `request_cancel` that `#[cfg(test)]` alone can only ever exercise under
/// one interleaving.
#[cfg(all(loom, test))]
mod loom_tests {
    use super::*;
    use crate::loom::{self, sync::Arc, thread};

    /// Two predecessors notify concurrently; exactly one of them must observe
    /// `NotifyOutcome::Ready` and the other `StillWaiting`, regardless of
    /// interleaving (testable property #1's monotonicity depends on this).
    #[test]
    fn concurrent_notify_predecessor_done_yields_exactly_one_ready() {
        loom::model(|| {
            let s = Arc::new(TaskState::new());
            assert!(s.add_predecessor());
            assert!(s.add_predecessor());
            assert!(s.launch());

            let s2 = Arc::clone(&s);
            let t1 = thread::spawn(move || s2.notify_predecessor_done());
            let outcome2 = s.notify_predecessor_done();
            let outcome1 = t1.join().unwrap();

            let readies = [outcome1, outcome2]
                .iter()
                .filter(|o| **o == NotifyOutcome::Ready)
                .count();
            let waiting = [outcome1, outcome2]
                .iter()
                .filter(|o| **o == NotifyOutcome::StillWaiting)
                .count();
            assert_eq!(readies, 1, "exactly one notifier sees the count hit zero");
            assert_eq!(waiting, 1);
        });
    }

    /// `request_cancel` racing `try_begin_run` must never let the task run
    /// after observing `CancelOutcome::Canceled`, and must never drop a
    /// cancel request racing a run that's already underway.
    #[test]
    fn cancel_races_begin_run_without_double_run() {
        loom::model(|| {
            let s = Arc::new(TaskState::new());
            assert!(s.launch());

            let s2 = Arc::clone(&s);
            let canceler = thread::spawn(move || s2.request_cancel());
            let begin = s.try_begin_run();
            let cancel_outcome = canceler.join().unwrap();

            match begin {
                BeginRun::Run => {
                    // `request_cancel` can only have raced in after the task
                    // reached RUNNING, since it would otherwise have beaten
                    // `try_begin_run` to CANCELED and `begin` would be `Canceled`.
                    assert_eq!(cancel_outcome, CancelOutcome::InvokeHandler);
                    s.finish_run(false);
                }
                BeginRun::Canceled => {
                    assert_eq!(cancel_outcome, CancelOutcome::Canceled);
                }
            }
            assert_eq!(s.stage(Ordering::Acquire), Stage::Canceled);
        });
    }
}
