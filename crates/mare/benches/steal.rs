// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stealer throughput under contention: tasks are launched from outside the
//! pool, so they land entirely on the global queue rather than any one
//! worker's local deque. Every worker thread competes for the same batch via
//! the global-steal and peer-steal paths, with no local-pop fast path to
//! fall back on.

use criterion::{criterion_group, criterion_main, Criterion};
use mare::{Config, TaskAttrs, TaskBody, TaskContext, TaskRef};

fn steal_dominated_workload(c: &mut Criterion) {
    mare::init(Config {
        num_workers: Some(num_cpus::get().max(2)),
        ..Config::default()
    })
    .unwrap();

    const TASKS: usize = 20_000;

    c.bench_function("steal_dominated_20k_tasks", |b| {
        b.iter(|| {
            let group = mare::Group::new(None);
            for _ in 0..TASKS {
                let task = TaskRef::new_detached(TaskBody::new(|_: &TaskContext| {}), TaskAttrs::new(), None);
                mare::launch_into(std::slice::from_ref(&group), task).unwrap();
            }
            group.wait_for();
        });
    });

    mare::shutdown();
}

criterion_group!(steal, steal_dominated_workload);
criterion_main!(steal);
