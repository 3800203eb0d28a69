// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Iterations/sec for a three-node synchronous dataflow pipeline
//! (source -> map -> sink), all on a single partition so the benchmark
//! isolates channel hand-off overhead from cross-thread scheduling.

use criterion::{criterion_group, criterion_main, Criterion};
use mare::{Channel, GraphBuilder, NodeBody};

fn three_node_pipe(c: &mut Criterion) {
    const ITERATIONS: u64 = 5_000;

    c.bench_function("sdf_pipe_3node_5k_iterations", |b| {
        b.iter(|| {
            let a_to_b = Channel::<i64>::new(8).unwrap();
            let b_to_c = Channel::<i64>::new(8).unwrap();

            let mut builder = GraphBuilder::new();
            let mut n = 0i64;
            builder.add_node(
                Some("source"),
                NodeBody::Source(Box::new(move || {
                    n += 1;
                    Box::new(n)
                })),
                vec![],
                vec![a_to_b.clone()],
            );
            builder.add_node(
                Some("double"),
                NodeBody::Map1(Box::new(|v| {
                    let v = *v.downcast::<i64>().unwrap();
                    Box::new(v * 2)
                })),
                vec![a_to_b],
                vec![b_to_c.clone()],
            );
            builder.add_node(Some("sink"), NodeBody::Sink1(Box::new(|_| {})), vec![b_to_c], vec![]);

            let graph = std::sync::Arc::new(builder.build(1).unwrap());
            let handle = graph.launch(Some(ITERATIONS));
            handle.wait_for();
            handle.destroy();
        });
    });
}

criterion_group!(sdf_pipe, three_node_pipe);
criterion_main!(sdf_pipe);
