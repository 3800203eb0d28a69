// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Task attributes (spec §3.1 `attrs`, §6 `create_task_attrs`/`with_attrs`).

use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct TaskFlags: u8 {
        /// Run on a dedicated on-demand thread instead of a pool worker
        /// (spec §4.5 "Blocking tasks").
        const BLOCKING      = 1 << 0;
        /// Hint to the scheduler that this task is expected to run for a
        /// long time; does not change correctness, only advisory.
        const LONG_RUNNING  = 1 << 1;
        /// Submits to a `GpuQueue` instead of running inline.
        const GPU           = 1 << 2;
        /// Marks the sentinel stub task used by the injector/deque (never
        /// user-visible).
        const STUB          = 1 << 3;
        /// Hint that the body is expected to call `abort_on_cancel`
        /// cooperatively at well-defined points.
        const YIELD         = 1 << 4;
    }
}

/// Reusable, cloneable bundle of task attributes, created via
/// `create_task_attrs` and applied to one or more bodies via `with_attrs`.
#[derive(Clone, Default)]
pub struct TaskAttrs {
    flags: TaskFlags,
    cost: f64,
    /// Only meaningful for `BLOCKING` tasks: invoked by `cancel(task)` to
    /// unblock the body out from under whatever blocking call it is in,
    /// distinct from the task's own `cancel_handler` (grounded on
    /// `examples/original_source/.../blocked_task.hh`'s separate unblock
    /// callback).
    unblock: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl TaskAttrs {
    pub fn new() -> Self {
        Self {
            flags: TaskFlags::empty(),
            cost: 1.0,
            unblock: None,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: TaskFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn blocking(self) -> Self {
        self.with_flags(TaskFlags::BLOCKING)
    }

    #[must_use]
    pub fn long_running(self) -> Self {
        self.with_flags(TaskFlags::LONG_RUNNING)
    }

    #[must_use]
    pub fn gpu(self) -> Self {
        self.with_flags(TaskFlags::GPU)
    }

    #[must_use]
    pub fn with_unblock(mut self, unblock: impl Fn() + Send + Sync + 'static) -> Self {
        self.unblock = Some(Arc::new(unblock));
        self
    }

    /// `assign_cost(task|node, double)` — an opaque scheduling hint used by
    /// the SDF partitioner to balance work across partitions; has no effect
    /// on plain task scheduling beyond being queryable.
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn is_blocking(&self) -> bool {
        self.flags.contains(TaskFlags::BLOCKING)
    }

    pub fn is_gpu(&self) -> bool {
        self.flags.contains(TaskFlags::GPU)
    }

    pub(crate) fn unblock_handler(&self) -> Option<Arc<dyn Fn() + Send + Sync>> {
        self.unblock.clone()
    }
}

impl std::fmt::Debug for TaskAttrs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskAttrs")
            .field("flags", &self.flags)
            .field("cost", &self.cost)
            .field("has_unblock", &self.unblock.is_some())
            .finish()
    }
}
