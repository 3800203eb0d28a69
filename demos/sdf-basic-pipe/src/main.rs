// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reproduces the "SDF basic pipe" scenario: three nodes `f1 -> f2 -> f3`
//! over `i32` channels. `f1` emits `0..9`, `f2` doubles, `f3` appends to a
//! list. Ten iterations should leave the list holding `[0,2,4,...,18]`.

use anyhow::Result;
use mare::{Channel, GraphBuilder, Mutex, NodeBody};
use std::sync::Arc;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let f1_to_f2 = Channel::<i32>::new(4)?;
    let f2_to_f3 = Channel::<i32>::new(4)?;
    let results = Arc::new(Mutex::new(Vec::<i32>::new()));
    let results_sink = Arc::clone(&results);

    let mut builder = GraphBuilder::new();
    let mut next = 0i32;
    builder.add_node(
        Some("f1"),
        NodeBody::Source(Box::new(move || {
            let v = next;
            next += 1;
            Box::new(v)
        })),
        vec![],
        vec![f1_to_f2.clone()],
    );
    builder.add_node(
        Some("f2"),
        NodeBody::Map1(Box::new(|v| {
            let v = *v.downcast::<i32>().unwrap();
            Box::new(v * 2)
        })),
        vec![f1_to_f2],
        vec![f2_to_f3.clone()],
    );
    builder.add_node(
        Some("f3"),
        NodeBody::Sink1(Box::new(move |v| {
            let v = *v.downcast::<i32>().unwrap();
            results_sink.lock().push(v);
        })),
        vec![f2_to_f3],
        vec![],
    );

    let graph = Arc::new(builder.build(1)?);
    graph.launch_and_wait(Some(10))?;

    let final_list = results.lock().clone();
    println!("{final_list:?}");
    assert_eq!(final_list, vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);

    Ok(())
}
