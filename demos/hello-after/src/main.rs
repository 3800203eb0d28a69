// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reproduces the "Hello-after" scenario from the MARE design notes: two
//! tasks wired with `after(A, B)` print in order regardless of which one
//! the scheduler happens to pick up first.

use anyhow::Result;
use mare::{Config, TaskAttrs, TaskBody, TaskContext, TaskRef};
use std::io::Write;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    mare::init(Config::default())?;

    let a = TaskRef::new_detached(
        TaskBody::new(|_: &TaskContext| {
            print!("Hello ");
            std::io::stdout().flush().ok();
        }),
        TaskAttrs::new(),
        None,
    );
    let b = TaskRef::new_detached(
        TaskBody::new(|_: &TaskContext| {
            println!("World");
        }),
        TaskAttrs::new(),
        None,
    );

    TaskRef::after(&a, &b)?;
    let b = mare::launch(b);
    let _a = mare::launch(a);
    b.wait_for();

    mare::shutdown();
    Ok(())
}
