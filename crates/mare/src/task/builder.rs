// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Task construction (`create_task`), grounded on the teacher's
//! `TaskBuilder` (`#[track_caller]` location capture, a `tracing::trace_span`
//! per task) but building a run-to-completion [`TaskBody`] instead of
//! spawning a `Future`.

use crate::task::{TaskAttrs, TaskBody, TaskContext, TaskRef};
use std::any::type_name;
use std::panic::Location;
use std::sync::Arc;

pub struct TaskBuilder {
    name: Option<&'static str>,
    attrs: TaskAttrs,
    cancel_handler: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            attrs: TaskAttrs::new(),
            cancel_handler: None,
        }
    }

    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    #[must_use]
    pub fn attrs(mut self, attrs: TaskAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    /// `create_task(body, cancel_handler)`: the handler is invoked only
    /// when `cancel(task)` races against a `RUNNING` body (spec §4.1
    /// `request_cancel`).
    #[must_use]
    pub fn cancel_handler(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.cancel_handler = Some(Arc::new(handler));
        self
    }

    /// `create_task(body)`: builds the task but does not launch it — the
    /// caller still owns wiring it into `after`/groups before `launch`.
    #[track_caller]
    pub fn build<F>(self, mut f: F) -> TaskRef
    where
        F: FnMut(&TaskContext) + Send + 'static,
    {
        let loc = Location::caller();
        let name = self.name;
        let span = tracing::trace_span!(
            "task",
            task.name = ?name,
            task.body = %type_name::<F>(),
            loc.file = loc.file(),
            loc.line = loc.line(),
        );
        let body = TaskBody::new(move |ctx: &TaskContext| {
            let _enter = span.enter();
            f(ctx);
        });
        TaskRef::new_detached(body, self.attrs, self.cancel_handler)
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
