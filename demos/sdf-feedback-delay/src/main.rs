// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reproduces the "SDF feedback with delay" scenario: a filter graph
//! `xᵢ -> add1 -> mult(0.3) -> add2 -> yᵢ` with a two-delay feedback from
//! `y` into `add1`'s second input and a one-delay feedback into `add2`'s
//! second input, both preloaded with zeros. Ten iterations should match the
//! deterministic linear recurrence `y[i] = 0.3*(x[i] + y[i-2]) + y[i-1]`
//! (with `y[-1] = y[-2] = 0`).
//!
//! `add2` and the feedback tap are one node here (`NodeBody::Custom`) since
//! a single value must fan out to three consumers (the sink, and both delay
//! lines) but an SDF channel has exactly one producer and one consumer
//! (spec §3.3) — the tap node is the producer of all three.

use anyhow::Result;
use mare::{Channel, GraphBuilder, Mutex, NodeBody, NodeIo};
use std::sync::Arc;

const ITERATIONS: usize = 10;

#[allow(clippy::float_arithmetic, reason = "the recurrence is inherently floating-point")]
fn expected_sequence(x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0_f64; x.len()];
    let at = |y: &[f64], idx: isize| -> f64 {
        if idx < 0 {
            0.0
        } else {
            y[usize::try_from(idx).expect("checked non-negative above")]
        }
    };
    for i in 0..x.len() {
        let fb1 = at(&y, isize::try_from(i).expect("small index") - 1);
        let fb2 = at(&y, isize::try_from(i).expect("small index") - 2);
        y[i] = 0.3 * (x[i] + fb2) + fb1;
    }
    y
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let x_values: Vec<f64> = (0..ITERATIONS).map(|_| 1.0).collect();

    let x_ch = Channel::<f64>::new(1)?;
    let s1_ch = Channel::<f64>::new(1)?; // add1 -> mult
    let s2_ch = Channel::<f64>::new(1)?; // mult -> add2
    let sink_ch = Channel::<f64>::new(1)?;
    let fb1_ch = Channel::<f64>::new(1)?; // one-delay feedback into add2
    let fb2_ch = Channel::<f64>::new(2)?; // two-delay feedback into add1
    fb1_ch.preload([0.0]);
    fb2_ch.preload([0.0, 0.0]);

    let results = Arc::new(Mutex::new(Vec::<f64>::new()));
    let results_sink = Arc::clone(&results);

    let mut builder = GraphBuilder::new();
    let source_values = x_values.clone();
    let mut next = 0usize;
    builder.add_node(
        Some("x"),
        NodeBody::Source(Box::new(move || {
            let v = source_values[next];
            next += 1;
            Box::new(v)
        })),
        vec![],
        vec![x_ch.clone()],
    );
    builder.add_node(
        Some("add1"),
        NodeBody::Map2(Box::new(|a, b| {
            #[allow(clippy::float_arithmetic, reason = "filter tap addition")]
            let sum = *a.downcast::<f64>().unwrap() + *b.downcast::<f64>().unwrap();
            Box::new(sum)
        })),
        vec![x_ch, fb2_ch.clone()],
        vec![s1_ch.clone()],
    );
    builder.add_node(
        Some("mult"),
        NodeBody::Map1(Box::new(|v| {
            let v = *v.downcast::<f64>().unwrap();
            #[allow(clippy::float_arithmetic, reason = "filter gain stage")]
            let scaled = v * 0.3;
            Box::new(scaled)
        })),
        vec![s1_ch],
        vec![s2_ch.clone()],
    );
    builder.add_node(
        Some("add2_and_tap"),
        NodeBody::Custom(Box::new(move |io: &NodeIo<'_>| {
            let mult_val = *io.read(0).downcast::<f64>().unwrap();
            let fb1 = *io.read(1).downcast::<f64>().unwrap();
            #[allow(clippy::float_arithmetic, reason = "filter tap addition")]
            let y = mult_val + fb1;
            io.write(0, Box::new(y)); // sink
            io.write(1, Box::new(y)); // one-delay feedback for the next iteration
            io.write(2, Box::new(y)); // two-delay feedback for two iterations from now
        })),
        vec![s2_ch, fb1_ch.clone()],
        vec![sink_ch.clone(), fb1_ch, fb2_ch],
    );
    builder.add_node(
        Some("collect"),
        NodeBody::Sink1(Box::new(move |v| {
            let v = *v.downcast::<f64>().unwrap();
            results_sink.lock().push(v);
        })),
        vec![sink_ch],
        vec![],
    );

    let graph = Arc::new(builder.build(1)?);
    graph.launch_and_wait(Some(u64::try_from(ITERATIONS)?))?;

    let actual = results.lock().clone();
    let expected = expected_sequence(&x_values);
    println!("actual:   {actual:?}");
    println!("expected: {expected:?}");

    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected.iter()) {
        #[allow(clippy::float_arithmetic, reason = "epsilon comparison, not equality")]
        let diff = (a - e).abs();
        assert!(diff < 1e-9, "mismatch: {a} vs {e}");
    }

    Ok(())
}
