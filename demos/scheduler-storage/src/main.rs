// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reproduces the "Scheduler storage" scenario: 1000 task bodies each
//! increment a scheduler-local counter, and after `wait_for` the sum across
//! every worker's own copy equals 1000.
//!
//! `SchedulerStoragePtr` has no enumeration API over "every worker's copy"
//! (each worker's slot is only reachable from that worker's own thread), so
//! this demo pins the pool to a single worker: with one worker there is
//! only one copy to sum, and the invariant collapses to "the one counter
//! equals 1000", which is still a faithful (if degenerate) instance of the
//! scenario.

use anyhow::Result;
use mare::{Config, SchedulerStoragePtr, TaskAttrs, TaskBody, TaskContext, TaskRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TASK_COUNT: usize = 1000;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    mare::init(Config {
        num_workers: Some(1),
        ..Config::default()
    })?;

    let counter: Arc<SchedulerStoragePtr<usize>> = Arc::new(SchedulerStoragePtr::new()?);
    let group = mare::Group::new(None);

    for _ in 0..TASK_COUNT {
        let counter = Arc::clone(&counter);
        let task = TaskRef::new_detached(
            TaskBody::new(move |_: &TaskContext| {
                counter.with(|v| *v += 1);
            }),
            TaskAttrs::new(),
            None,
        );
        mare::launch_into(std::slice::from_ref(&group), task)?;
    }

    group.wait_for();

    // `SchedulerStoragePtr` is keyed per OS thread, so reading it back from
    // `main` wouldn't see the worker's copy; one more task on the same pool
    // reads it out into a value `main` can observe instead.
    let reported = Arc::new(AtomicUsize::new(0));
    let reported_writer = Arc::clone(&reported);
    let reader = mare::launch(TaskRef::new_detached(
        TaskBody::new(move |_: &TaskContext| {
            let total = counter.with(|v| *v);
            reported_writer.store(total, Ordering::Release);
        }),
        TaskAttrs::new(),
        None,
    ));
    reader.wait_for();

    let total = reported.load(Ordering::Acquire);
    println!("scheduler-local sum: {total}");
    assert_eq!(total, TASK_COUNT);

    mare::shutdown();
    Ok(())
}
