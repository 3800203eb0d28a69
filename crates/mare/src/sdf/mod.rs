// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Synchronous dataflow graphs (spec §3.3-3.4, §4.7-4.8): bounded SPSC
//! channels, typed/introspective node bodies, partitioned static scheduling,
//! and pause/resume/cancel over a running graph.

mod channel;
mod graph;
mod launcher;
mod node;

pub use channel::{BoxAny, Channel, DynChannel};
pub use graph::GraphBuilder;
pub use launcher::{ResumePoint, SdfGraph, SdfHandle};
pub use node::{NodeBody, NodeId, NodeIo};
