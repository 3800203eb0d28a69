// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Measures hand-off latency through `after` chains: each "ping" is a task
//! whose only successor is the next "ping", so completing one immediately
//! readies the next. This is the closest MARE analogue to a classic
//! yield-based ping-pong benchmark, since MARE tasks never yield mid-body —
//! progress only happens at task boundaries.

use criterion::{criterion_group, criterion_main, Criterion};
use mare::{Config, TaskAttrs, TaskBody, TaskContext, TaskRef};

const PINGS: usize = 10_000;

fn chain_of(len: usize) -> (TaskRef, TaskRef) {
    let mut tasks: Vec<TaskRef> = (0..len)
        .map(|_| TaskRef::new_detached(TaskBody::new(|_: &TaskContext| {}), TaskAttrs::new(), None))
        .collect();
    for pair in tasks.windows(2) {
        TaskRef::after(&pair[0], &pair[1]).unwrap();
    }
    let last = tasks.pop().unwrap();
    let first = tasks.into_iter().next().unwrap_or_else(|| last.clone());
    (first, last)
}

fn single_threaded_chain(c: &mut Criterion) {
    mare::init(Config {
        num_workers: Some(1),
        ..Config::default()
    })
    .unwrap();

    c.bench_function("chain_10k_single_threaded", |b| {
        b.iter(|| {
            let (first, last) = chain_of(PINGS);
            let last = mare::launch(last);
            let _first = mare::launch(first);
            last.wait_for();
        });
    });

    mare::shutdown();
}

fn multi_threaded_two_chains(c: &mut Criterion) {
    mare::init(Config {
        num_workers: Some(2),
        ..Config::default()
    })
    .unwrap();

    c.bench_function("chain_10k_multi_threaded_two_chains", |b| {
        b.iter(|| {
            let (first_a, last_a) = chain_of(PINGS);
            let (first_b, last_b) = chain_of(PINGS);
            let last_a = mare::launch(last_a);
            let last_b = mare::launch(last_b);
            let _first_a = mare::launch(first_a);
            let _first_b = mare::launch(first_b);
            last_a.wait_for();
            last_b.wait_for();
        });
    });

    mare::shutdown();
}

fn group_of_independent_tasks(c: &mut Criterion) {
    mare::init(Config {
        num_workers: Some(4),
        ..Config::default()
    })
    .unwrap();

    c.bench_function("group_10k_independent_tasks", |b| {
        b.iter(|| {
            let group = mare::Group::new(None);
            for _ in 0..PINGS {
                let task = TaskRef::new_detached(
                    TaskBody::new(|ctx: &TaskContext| {
                        let _ = ctx.task();
                    }),
                    TaskAttrs::new(),
                    None,
                );
                mare::launch_into(std::slice::from_ref(&group), task).unwrap();
            }
            group.wait_for();
        });
    });

    mare::shutdown();
}

criterion_group!(
    ping_pong,
    single_threaded_chain,
    multi_threaded_two_chains,
    group_of_independent_tasks,
);
criterion_main!(ping_pong);
