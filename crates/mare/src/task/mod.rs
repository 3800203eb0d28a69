// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task model (spec §3.1, §4.1): a task owns a body, a packed state
//! word, an intrusive-in-spirit successor list, group membership, and
//! attributes. Kept from the teacher: the `CachePadded` header, the
//! type-erased body with small-body optimization, and the
//! `#[track_caller]`/tracing-span construction style from `TaskBuilder`.
//! Dropped: the `Stage<F: Future>`/`PollResult`/join-waker machinery, which
//! has no place in a run-to-completion task body model.

mod attrs;
mod body;
pub mod builder;
mod id;

pub use attrs::{TaskAttrs, TaskFlags};
pub use body::TaskBody;
pub use id::TaskId;

use crate::error::{AbortTaskPanic, GroupMemberFailed};
use crate::group::Group;
use crate::primitives::{BeginRun, CancelOutcome, NotifyOutcome, Signature, Stage, TaskState};
use crate::storage;
use std::any::Any;
use std::panic::Location;
use std::sync::{Arc, Mutex};
use util::CachePadded;

/// Everything about a task that isn't the body itself or its attributes;
/// separated out so `CachePadded` only pads the hot atomic state, matching
/// the teacher's `Header` split in `task.rs`.
struct Header {
    id: TaskId,
    state: TaskState,
    source_id: Mutex<&'static str>,
    location: &'static Location<'static>,
}

struct Inner {
    header: CachePadded<Header>,
    body: Mutex<Option<TaskBody>>,
    attrs: TaskAttrs,
    cancel_handler: Option<Arc<dyn Fn() + Send + Sync>>,
    successors: Mutex<Vec<TaskRef>>,
    groups: Mutex<Signature>,
    /// The concrete groups this task was launched into, kept alongside the
    /// folded `groups` signature so the scheduler can call
    /// `Group::task_launched`/`task_finished` on each without a process-wide
    /// bit-to-group lookup table.
    live_groups: Mutex<Vec<Group>>,
    panic_payload: Mutex<Option<Box<dyn Any + Send>>>,
    completion: Completion,
    /// `(shard index, slab key)` while this task sits in the
    /// unlaunched-task cache; cleared on `remove`.
    cache_entry: Mutex<Option<(usize, usize)>>,
}

/// A shared, reference-counted handle to a task. Cheap to clone; the task
/// itself is dropped once every `TaskRef` (including the scheduler's own
/// bookkeeping copies) is gone and it carries no outstanding unlaunched
/// predecessors (spec §3.1 invariant).
#[derive(Clone)]
pub struct TaskRef(Arc<Inner>);

impl std::fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRef")
            .field("id", &self.0.header.id)
            .field("stage", &self.0.header.state.stage(std::sync::atomic::Ordering::Acquire))
            .finish()
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for TaskRef {}

/// A condvar-backed one-shot completion signal, used by `wait_for(task)`.
struct Completion {
    done: Mutex<bool>,
    cv: std::sync::Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cv: std::sync::Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cv.wait(done).unwrap();
        }
    }

    fn is_done(&self) -> bool {
        *self.done.lock().unwrap()
    }
}

/// Passed to a running task body; the only way a body observes
/// cancellation or touches task-local storage.
pub struct TaskContext<'a> {
    task: &'a TaskRef,
}

impl<'a> TaskContext<'a> {
    fn new(task: &'a TaskRef) -> Self {
        storage::enter_task();
        Self { task }
    }

    /// Cooperative cancellation check (spec §4.5/§7 `abort_on_cancel`): if a
    /// cancellation has been requested, unwinds with the
    /// [`AbortTaskPanic`] sentinel, which the worker loop's `catch_unwind`
    /// recognizes and converts into `CANCELED` bookkeeping without treating
    /// it as a task failure.
    pub fn abort_on_cancel(&self) {
        if self.task.0.header.state.stage(std::sync::atomic::Ordering::Acquire) == Stage::Running
            && (self.task.cancel_requested() || self.task.any_group_canceled())
        {
            std::panic::panic_any(AbortTaskPanic);
        }
    }

    pub fn task(&self) -> &TaskRef {
        self.task
    }

    #[cfg(test)]
    pub(crate) fn for_test(task: &'a TaskRef) -> Self {
        TaskContext { task }
    }
}

impl TaskRef {
    #[track_caller]
    pub(crate) fn new_detached(
        body: TaskBody,
        attrs: TaskAttrs,
        cancel_handler: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Self {
        let source_id = body.source_id();
        let inner = Inner {
            header: CachePadded::new(Header {
                id: TaskId::next(),
                state: TaskState::new(),
                source_id: Mutex::new(source_id),
                location: Location::caller(),
            }),
            body: Mutex::new(Some(body)),
            attrs,
            cancel_handler,
            successors: Mutex::new(Vec::new()),
            groups: Mutex::new(Signature::empty()),
            live_groups: Mutex::new(Vec::new()),
            panic_payload: Mutex::new(None),
            completion: Completion::new(),
            cache_entry: Mutex::new(None),
        };
        Self(Arc::new(inner))
    }

    pub fn id(&self) -> TaskId {
        self.0.header.id
    }

    pub fn source_id(&self) -> &'static str {
        *self.0.header.source_id.lock().unwrap()
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.0.header.location
    }

    pub fn attrs(&self) -> &TaskAttrs {
        &self.0.attrs
    }

    pub fn stage(&self) -> Stage {
        self.0.header.state.stage(std::sync::atomic::Ordering::Acquire)
    }

    pub fn is_terminal(&self) -> bool {
        self.0.header.state.is_terminal(std::sync::atomic::Ordering::Acquire)
    }

    fn cancel_requested(&self) -> bool {
        self.0
            .header
            .state
            .cancel_requested(std::sync::atomic::Ordering::Acquire)
    }

    /// `true` if any group this task belongs to has been canceled (spec §5
    /// "Cancellation... observed at scheduler decision points and by
    /// cooperative `abort_on_cancel` checks"). Checked in addition to the
    /// task's own `CANCEL_REQ` bit, since a group cancellation never touches
    /// an already-launched member's own state word directly.
    fn any_group_canceled(&self) -> bool {
        self.0.live_groups.lock().unwrap().iter().any(Group::is_canceled)
    }

    /// `cancel(task)`: requests cooperative cancellation (spec §6). A
    /// no-op if the task has already reached a terminal stage.
    pub fn cancel(&self) {
        self.request_cancel();
    }

    /// `after(pred, self)`: registers `self` as a successor of `pred`,
    /// incrementing `self`'s predecessor count. Must be called before
    /// either task is launched (spec §4.2 "Membership changes happen only
    /// at launch time" applies analogously to predecessor wiring).
    pub fn after(pred: &TaskRef, succ: &TaskRef) -> Result<(), crate::error::ApiError> {
        if !succ.0.header.state.add_predecessor() {
            return Err(crate::error::ApiError::invalid_handle(
                "after() called on a task that has already launched",
            ));
        }
        pred.0.successors.lock().unwrap().push(succ.clone());
        Ok(())
    }

    /// Invoked by the scheduler once this task reaches a terminal stage:
    /// notifies every successor. Returns two lists: successors that became
    /// ready to run, and successors that transitioned straight to CANCELED
    /// because they had already been canceled while still waiting on this
    /// predecessor — the caller must finalize those too (group bookkeeping,
    /// their own successors), since they will never be scheduled to run.
    pub(crate) fn notify_successors(&self) -> (Vec<TaskRef>, Vec<TaskRef>) {
        let successors = std::mem::take(&mut *self.0.successors.lock().unwrap());
        let mut ready = Vec::new();
        let mut canceled = Vec::new();
        for succ in successors {
            match succ.0.header.state.notify_predecessor_done() {
                NotifyOutcome::Ready => ready.push(succ),
                NotifyOutcome::Canceled => canceled.push(succ),
                NotifyOutcome::StillWaiting => {}
            }
        }
        (ready, canceled)
    }

    pub(crate) fn request_cancel(&self) -> CancelOutcome {
        let outcome = self.0.header.state.request_cancel();
        if outcome == CancelOutcome::InvokeHandler {
            if let Some(handler) = self.0.cancel_handler.as_ref() {
                handler();
            }
            if let Some(unblock) = self.0.attrs.unblock_handler() {
                unblock();
            }
        }
        if matches!(outcome, CancelOutcome::Canceled) {
            self.0.completion.signal();
            crate::logging::emit(crate::logging::Event::TaskCanceled { task: self.id().as_u64() });
        }
        outcome
    }

    pub(crate) fn try_begin_run(&self) -> BeginRun {
        self.0.header.state.try_begin_run()
    }

    pub(crate) fn launch_ready(&self) -> bool {
        self.0.header.state.launch()
    }

    /// Records the groups this task is being launched into: folds their
    /// signatures together for the unlaunched-cache superset test, and keeps
    /// the concrete handles so the scheduler can adjust each group's
    /// outstanding count. Must be called at most once, before the task is
    /// either enqueued or cached (spec §4.2 "membership changes happen only
    /// at launch time").
    pub(crate) fn record_groups(&self, groups: &[Group]) {
        let mut sig = Signature::empty();
        for g in groups {
            sig.union_assign(g.signature());
        }
        *self.0.groups.lock().unwrap() = sig;
        *self.0.live_groups.lock().unwrap() = groups.to_vec();
    }

    pub(crate) fn groups(&self) -> Signature {
        self.0.groups.lock().unwrap().clone()
    }

    pub(crate) fn live_groups(&self) -> Vec<Group> {
        self.0.live_groups.lock().unwrap().clone()
    }

    /// A fresh marker to feed a group's `task_finished(failure)` when this
    /// task panicked; `None` if it completed normally or was canceled.
    /// Never consumes the task's own stored payload, which is only ever
    /// taken once by this task's own `wait_for`.
    pub(crate) fn group_failure_marker(&self) -> Option<Box<dyn Any + Send>> {
        if self.0.panic_payload.lock().unwrap().is_some() {
            Some(Box::new(GroupMemberFailed { task_id: self.id() }))
        } else {
            None
        }
    }

    pub(crate) fn set_in_utcache(&self) -> bool {
        self.0.header.state.set_in_utcache()
    }

    pub(crate) fn clear_in_utcache(&self) {
        self.0.header.state.clear_in_utcache();
    }

    pub(crate) fn is_in_utcache(&self) -> bool {
        self.0
            .header
            .state
            .is_in_utcache(std::sync::atomic::Ordering::Acquire)
    }

    pub(crate) fn set_cache_entry(&self, entry: (usize, usize)) {
        *self.0.cache_entry.lock().unwrap() = Some(entry);
    }

    pub(crate) fn take_cache_entry(&self) -> Option<(usize, usize)> {
        self.0.cache_entry.lock().unwrap().take()
    }

    /// Runs the body, converting a cooperative-cancel panic into `CANCELED`
    /// bookkeeping and storing any other panic payload for later
    /// propagation via `wait_for` (spec §7 "User exceptions").
    pub(crate) fn run_body(&self) {
        let ctx = TaskContext::new(self);
        let mut guard = self.0.body.lock().unwrap();
        let Some(mut body) = guard.take() else {
            return;
        };
        drop(guard);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            body.invoke(&ctx);
        }));

        storage::leave_task();

        match result {
            Ok(()) => self.0.header.state.finish_run(false),
            Err(payload) => {
                let is_abort = payload.downcast_ref::<AbortTaskPanic>().is_some();
                if !is_abort {
                    *self.0.panic_payload.lock().unwrap() = Some(payload);
                }
                self.0.header.state.finish_run(true);
            }
        }
        self.0.completion.signal();
    }

    /// `wait_for(task)`: blocks until the task reaches a terminal stage,
    /// then re-throws any stored user-exception payload (spec §7).
    pub fn wait_for(&self) {
        self.0.completion.wait();
        if let Some(payload) = self.0.panic_payload.lock().unwrap().take() {
            std::panic::resume_unwind(payload);
        }
    }

    pub fn is_done(&self) -> bool {
        self.0.completion.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_orders_run_before_successor_ready() {
        let a = TaskRef::new_detached(TaskBody::new(|_| {}), TaskAttrs::new(), None);
        let b = TaskRef::new_detached(TaskBody::new(|_| {}), TaskAttrs::new(), None);
        TaskRef::after(&a, &b).unwrap();
        assert!(!b.launch_ready(), "b has an outstanding predecessor");
        assert!(a.launch_ready());
        assert_eq!(a.try_begin_run(), BeginRun::Run);
        // `notify_successors` itself doesn't gate on `a`'s own stage — it
        // only decrements `b`'s predecessor count. The caller (the worker
        // loop, via `run_body`) is responsible for calling it only after
        // `a`'s body has actually finished running.
        let (ready, canceled) = a.notify_successors();
        assert_eq!(ready.len(), 1, "b's only predecessor just notified it");
        assert!(Arc::ptr_eq(&ready[0].0, &b.0));
        assert!(canceled.is_empty());
    }

    #[test]
    fn cancel_before_launch_marks_canceled() {
        let t = TaskRef::new_detached(TaskBody::new(|_| {}), TaskAttrs::new(), None);
        assert_eq!(t.request_cancel(), CancelOutcome::Canceled);
        assert_eq!(t.stage(), Stage::Canceled);
    }
}
