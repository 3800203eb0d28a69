// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reproduces the named "Pause/resume" scenario: a long-running pipeline is
//! paused at iteration 250, resumed, paused again at iteration 500, resumed,
//! then canceled at iteration 750 — each stop landing on the exact requested
//! iteration count rather than merely "soon after."

use anyhow::Result;
use mare::{Channel, GraphBuilder, NodeBody};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let sink_channel = Channel::<i32>::new(4)?;

    let mut builder = GraphBuilder::new();
    let mut n = 0i32;
    let source = builder.add_node(
        Some("source"),
        NodeBody::Source(Box::new(move || {
            n += 1;
            Box::new(n)
        })),
        vec![],
        vec![sink_channel.clone()],
    );
    builder.add_node(Some("sink"), NodeBody::Sink1(Box::new(|_| {})), vec![sink_channel], vec![]);
    let iterations = builder.iterations_handle(source);

    let graph = Arc::new(builder.build(1)?);
    let handle = graph.launch(Some(1000));

    handle.pause(Some(250));
    println!("paused at iteration {}", iterations.load(Ordering::Relaxed));
    assert_eq!(iterations.load(Ordering::Relaxed), 250);

    handle.resume();
    handle.pause(Some(500));
    println!("paused at iteration {}", iterations.load(Ordering::Relaxed));
    assert_eq!(iterations.load(Ordering::Relaxed), 500);

    handle.resume();
    handle.cancel(Some(750));
    handle.wait_for();
    handle.destroy();

    let final_count = iterations.load(Ordering::Relaxed);
    println!("final iteration count: {final_count}");
    assert_eq!(final_count, 750);

    Ok(())
}
