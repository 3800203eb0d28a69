// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-worker Chase-Lev deque (spec §4.4): owner-only push/pop, multi-thief
//! steal. `crossbeam-deque` already implements this exact contract (resizing
//! array, `Steal::Retry`/`Steal::Empty`/`Steal::Success` in place of a bare
//! `ABORT` token, array retirement handled internally via epoch-based
//! reclamation) so this module is a thin, task-shaped wrapper rather than a
//! hand-rolled reimplementation.

use crate::task::TaskRef;
use crossbeam_deque::{Injector as CbInjector, Steal, Stealer as CbStealer, Worker as CbWorker};

/// The underlying `crossbeam-deque` injector type backing
/// `scheduler::injector::GlobalQueue` (spec §3.5/§4.5 "global submission
/// queue"), re-exported here so [`LocalDeque::steal_from_global`] can
/// interoperate with it without the scheduler module reaching into
/// `crossbeam_deque` directly.
pub type GlobalQueueInner = CbInjector<TaskRef>;

/// The result of a steal attempt against a [`LocalStealer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StealOutcome {
    /// A task was stolen.
    Task,
    /// The deque was empty.
    Empty,
    /// Lost a race with another stealer or the owner; the caller should
    /// treat this exactly like a transient empty result (spec's `ABORT`
    /// token) and retry or move to the next victim.
    Abort,
}

/// The owning half of a worker's deque. Only the worker thread that created
/// it may call `push`/`pop`.
pub struct LocalDeque {
    inner: CbWorker<TaskRef>,
}

impl LocalDeque {
    pub fn new() -> Self {
        Self {
            inner: CbWorker::new_lifo(),
        }
    }

    pub fn stealer(&self) -> LocalStealer {
        LocalStealer {
            inner: self.inner.stealer(),
        }
    }

    /// Push a task to the private end. Never blocks; the array resizes
    /// itself as needed.
    pub fn push(&self, task: TaskRef) {
        self.inner.push(task);
    }

    /// Pop from the private (LIFO) end — cache-friendly, the first choice in
    /// the worker loop (spec §4.5 step 1).
    pub fn pop(&self) -> Option<TaskRef> {
        self.inner.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Steals a batch from the global queue directly into this deque (spec
    /// §4.5 step 2: "consult the global submission queue"). Returns
    /// [`StealOutcome::Task`] if at least one task landed here.
    pub fn steal_from_global(&self, global: &GlobalQueueInner) -> StealOutcome {
        loop {
            match global.steal_batch_and_pop(&self.inner) {
                Steal::Success(task) => {
                    self.inner.push(task);
                    return StealOutcome::Task;
                }
                Steal::Empty => return StealOutcome::Empty,
                Steal::Retry => return StealOutcome::Abort,
            }
        }
    }
}

impl Default for LocalDeque {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable handle that lets any other worker steal from this deque.
#[derive(Clone)]
pub struct LocalStealer {
    inner: CbStealer<TaskRef>,
}

impl LocalStealer {
    /// Steal one task, returning it directly.
    pub fn steal_one(&self) -> Option<TaskRef> {
        loop {
            match self.inner.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Steal roughly half the victim's queue into `dest`, returning the
    /// number of tasks moved (always ≥ 1 if any were available).
    pub fn steal_batch_into(&self, dest: &LocalDeque) -> usize {
        loop {
            match self.inner.steal_batch_with_limit(&dest.inner, usize::MAX) {
                Steal::Success(()) => return dest.len(),
                Steal::Empty => return 0,
                Steal::Retry => continue,
            }
        }
    }
}

/// Soft limit on a worker's local deque before new pushes spill to the
/// global submission queue (spec §4.4 "Overflow handling" — "new
/// submissions go to the global queue instead"; see
/// `scheduler::injector::GlobalQueue`, which is built on the same
/// `crossbeam_deque::Injector` this module's `LocalDeque` interoperates
/// with via `steal_batch_and_pop`).
pub const LOCAL_DEQUE_SOFT_LIMIT: usize = 4096;
