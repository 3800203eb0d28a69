// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The worker loop (spec §4.5): local pop, then the global queue, then a
//! random peer steal, then park. Shared between the pool's own worker
//! threads and the dedicated threads spawned for blocking/GPU tasks, which
//! run exactly one task through [`execute`] before exiting rather than
//! looping.

use crate::primitives::{BeginRun, LocalDeque, StealOutcome};
use crate::scheduler::Shared;
use crate::storage;
use crate::task::TaskRef;
use fastrand::FastRand;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// The body of a pool worker thread: runs until told to shut down and
/// drained, consulting (in order) its own deque, the global queue, and its
/// peers before parking.
pub(crate) fn run(id: usize, shared: Arc<Shared>, local: LocalDeque, seed: u64) {
    storage::bind_worker_slot(id as u64);
    let mut rng = FastRand::from_seed(seed);
    loop {
        match find_work(id, &shared, &local, &mut rng) {
            Some(task) => {
                log_running(id, &task);
                execute(task, &shared, &local);
            }
            None => {
                if shared.shutdown.load(Ordering::Acquire) && local.is_empty() && shared.global.is_empty() {
                    break;
                }
                crate::logging::emit(crate::logging::Event::WorkerParked { worker: id });
                park(&shared);
            }
        }
    }
}

fn find_work(id: usize, shared: &Shared, local: &LocalDeque, rng: &mut FastRand) -> Option<TaskRef> {
    if let Some(task) = local.pop() {
        return Some(task);
    }
    if matches!(shared.global.steal_into(local), StealOutcome::Task) {
        if let Some(task) = local.pop() {
            return Some(task);
        }
    }
    steal_from_peer(id, shared, local, rng)
}

fn steal_from_peer(id: usize, shared: &Shared, local: &LocalDeque, rng: &mut FastRand) -> Option<TaskRef> {
    let peers = shared.stealers.len();
    if peers <= 1 {
        return None;
    }
    let start = rng.fastrand_n(u32::try_from(peers).unwrap_or(u32::MAX)) as usize;
    for offset in 0..peers {
        let victim = (start + offset) % peers;
        if victim == id {
            continue;
        }
        if let Some(task) = shared.stealers[victim].steal_one() {
            return Some(task);
        }
        let _ = local;
    }
    None
}

/// Registers with the shared futex, re-checks for work that may have
/// arrived since the last scan (self-waking if so, which `Futex::wait`
/// resolves instantly), then blocks. Woken by any submission (spec §4.6).
fn park(shared: &Shared) {
    let token = shared.parked.register();
    if shared.shutdown.load(Ordering::Acquire) || !shared.global.is_empty() {
        token.wake();
    }
    shared.parked.wait(&token);
}

fn log_running(id: usize, task: &TaskRef) {
    crate::logging::emit(crate::logging::Event::TaskRunning {
        task: task.id().as_u64(),
        worker: id,
    });
}

/// Runs one task to completion and finalizes it: group bookkeeping,
/// successor notification, and recursive finalization of any successor that
/// became CANCELED without ever running (spec §4.5 "Notify every
/// successor" / "Decrement `tasks_outstanding`").
pub(crate) fn execute(task: TaskRef, shared: &Shared, local: &LocalDeque) {
    // A group this task belongs to may have been canceled after launch but
    // before this scheduling point; propagate that into the task's own
    // `CANCEL_REQ` bit now so `try_begin_run` observes it (spec §5
    // "Cancellation... observed at scheduler decision points").
    if task.any_group_canceled() {
        task.cancel();
    }
    if task.try_begin_run() == BeginRun::Run {
        task.run_body();
    }
    finalize(task, shared, local);
}

pub(crate) fn finalize(task: TaskRef, shared: &Shared, local: &LocalDeque) {
    let mut pending = vec![task];
    while let Some(t) = pending.pop() {
        crate::logging::emit(crate::logging::Event::TaskCompleted { task: t.id().as_u64() });
        for group in t.live_groups() {
            group.task_finished(t.group_failure_marker());
        }
        let (ready, became_canceled) = t.notify_successors();
        for succ in ready {
            enqueue_local(succ, shared, local);
        }
        pending.extend(became_canceled);
    }
}

/// Pushes a now-ready task onto the finishing worker's own local deque
/// (spec §4.5: "any readied successor is pushed onto the worker's own
/// deque"), spilling to the global queue past the soft limit, and wakes one
/// parked peer so it can steal the work.
pub(crate) fn enqueue_local(task: TaskRef, shared: &Shared, local: &LocalDeque) {
    if local.len() >= crate::primitives::deque::LOCAL_DEQUE_SOFT_LIMIT {
        shared.global.push(task);
    } else {
        local.push(task);
    }
    shared.parked.wake(1);
}
