// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reproduces the "Group cancellation" scenario: 2000 tasks are launched
//! into one group, each bumping a shared counter; the group is canceled
//! mid-flight. Every task still ends up terminal, and the counter never
//! exceeds the number of tasks that actually ran.

use anyhow::Result;
use mare::{Config, Group, TaskAttrs, TaskBody, TaskContext, TaskRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TASK_COUNT: usize = 2000;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    mare::init(Config::default())?;

    let group = Group::new(Some("group-cancel-demo".into()));
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..TASK_COUNT {
        let counter = Arc::clone(&counter);
        let task = TaskRef::new_detached(
            TaskBody::new(move |_: &TaskContext| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
            TaskAttrs::new(),
            None,
        );
        mare::launch_into(std::slice::from_ref(&group), task)?;
    }

    mare::cancel_group(&group);
    group.wait_for();

    let ran = counter.load(Ordering::Relaxed);
    println!("{ran} of {TASK_COUNT} tasks ran before cancellation reached the rest");
    assert!(ran <= TASK_COUNT);

    mare::shutdown();
    Ok(())
}
