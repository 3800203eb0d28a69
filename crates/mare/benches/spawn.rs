// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Raw launch throughput: how many no-op tasks the pool can create, run,
//! and tear down per second, with no `after` edges or group membership to
//! amortize against.

use criterion::{criterion_group, criterion_main, Criterion};
use mare::{Config, TaskAttrs, TaskBody, TaskContext, TaskRef};

fn spawn_one(c: &mut Criterion) {
    mare::init(Config {
        num_workers: Some(1),
        ..Config::default()
    })
    .unwrap();

    c.bench_function("spawn_one_task", |b| {
        b.iter(|| {
            let task = TaskRef::new_detached(TaskBody::new(|_: &TaskContext| {}), TaskAttrs::new(), None);
            mare::launch(task).wait_for();
        });
    });

    mare::shutdown();
}

fn spawn_batch_single_threaded(c: &mut Criterion) {
    mare::init(Config {
        num_workers: Some(1),
        ..Config::default()
    })
    .unwrap();

    const BATCH: usize = 1_000;

    c.bench_function("spawn_batch_1k_single_threaded", |b| {
        b.iter(|| {
            let handles: Vec<TaskRef> = (0..BATCH)
                .map(|_| {
                    let task = TaskRef::new_detached(TaskBody::new(|_: &TaskContext| {}), TaskAttrs::new(), None);
                    mare::launch(task)
                })
                .collect();
            for h in handles {
                h.wait_for();
            }
        });
    });

    mare::shutdown();
}

fn spawn_batch_multi_threaded(c: &mut Criterion) {
    mare::init(Config {
        num_workers: Some(num_cpus::get()),
        ..Config::default()
    })
    .unwrap();

    const BATCH: usize = 1_000;

    c.bench_function("spawn_batch_1k_multi_threaded", |b| {
        b.iter(|| {
            let handles: Vec<TaskRef> = (0..BATCH)
                .map(|_| {
                    let task = TaskRef::new_detached(TaskBody::new(|_: &TaskContext| {}), TaskAttrs::new(), None);
                    mare::launch(task)
                })
                .collect();
            for h in handles {
                h.wait_for();
            }
        });
    });

    mare::shutdown();
}

criterion_group!(spawn, spawn_one, spawn_batch_single_threaded, spawn_batch_multi_threaded);
criterion_main!(spawn);
