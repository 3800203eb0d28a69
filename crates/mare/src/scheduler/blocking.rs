// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Dedicated threads for `TaskFlags::BLOCKING` tasks (spec §4.5), so a task
//! that calls into a foreign blocking API never occupies (and thus starves)
//! a fixed pool worker slot. Each such task gets its own short-lived OS
//! thread; the pool's own worker count is unaffected.

use crate::primitives::{BeginRun, LocalDeque};
use crate::scheduler::{worker, Shared};
use crate::task::TaskRef;
use std::sync::Arc;

/// Spawns a dedicated thread that runs `task` to completion and finalizes
/// it exactly like a pool worker would, then exits. The thread is detached;
/// `shared` is kept alive by the `Arc` clone so finalization can still push
/// readied successors onto the global queue and wake a parked worker.
pub(crate) fn spawn(task: TaskRef, shared: Arc<Shared>) {
    let result = std::thread::Builder::new()
        .name("mare-blocking".to_owned())
        .spawn(move || {
            // A scratch local deque purely so `worker::finalize` has
            // somewhere to put readied successors; this thread never pops
            // from it; it re-submits anything landing here to the global
            // queue before exiting.
            let scratch = LocalDeque::new();
            if task.any_group_canceled() {
                task.cancel();
            }
            if task.try_begin_run() == BeginRun::Run {
                task.run_body();
            }
            worker::finalize(task, &shared, &scratch);
            while let Some(leftover) = scratch.pop() {
                shared.global.push(leftover);
            }
            shared.parked.wake(1);
        });
    if let Err(err) = result {
        tracing::error!(error = %err, "failed to spawn dedicated blocking-task thread");
    }
}
