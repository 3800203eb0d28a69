// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! SDF node bodies (spec §3.4, §9 "Dynamic dispatch in SDF bodies"). A node
//! is either one of a handful of common typed shapes (source, 1-in/1-out
//! map, 2-in/1-out map, sink) or a fully introspective body that receives a
//! [`NodeIo`] handle and decides for itself how many inputs/outputs to touch
//! — the Rust equivalent of the original's runtime `node_channels` query
//! object, backed here by the node's own channel binding table rather than a
//! separate interface type.

use super::channel::{BoxAny, DynChannel};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to one node's bound channels, passed to [`NodeBody::Custom`]
/// bodies. Index order matches the order the node was built with
/// (`with_inputs(...)`/`with_outputs(...)`).
pub struct NodeIo<'a> {
    inputs: &'a [Arc<dyn DynChannel>],
    outputs: &'a [Arc<dyn DynChannel>],
}

impl<'a> NodeIo<'a> {
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn read(&self, index: usize) -> BoxAny {
        self.inputs[index].read_any()
    }

    pub fn write(&self, index: usize, value: BoxAny) {
        self.outputs[index].write_any(value);
    }
}

/// A node's body. The typed arities cover the overwhelming majority of real
/// pipelines (the basic-pipe and feedback-filter scenarios of spec §8 are
/// both expressible with `Source`/`Map1`/`Map2`); `Custom` is the escape
/// hatch for a body that wants to query its own channel count at runtime.
pub enum NodeBody {
    /// No inputs, one output — the first stage of a pipeline.
    Source(Box<dyn FnMut() -> BoxAny + Send>),
    /// One input, one output.
    Map1(Box<dyn FnMut(BoxAny) -> BoxAny + Send>),
    /// Two inputs, one output (used by the feedback-filter scenario: a
    /// primary input plus a delayed feedback input).
    Map2(Box<dyn FnMut(BoxAny, BoxAny) -> BoxAny + Send>),
    /// One input, no outputs — a terminal sink stage.
    Sink1(Box<dyn FnMut(BoxAny) + Send>),
    /// Introspective: the body reads/writes through [`NodeIo`] itself.
    Custom(Box<dyn FnMut(&NodeIo<'_>) + Send>),
}

/// An opaque identifier for a node within a [`super::graph::GraphBuilder`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) usize);

pub(crate) struct NodeSpec {
    pub(crate) id: NodeId,
    pub(crate) name: Option<&'static str>,
    pub(crate) body: NodeBody,
    pub(crate) inputs: Vec<Arc<dyn DynChannel>>,
    pub(crate) outputs: Vec<Arc<dyn DynChannel>>,
    pub(crate) cost: f64,
    pub(crate) partition: Option<usize>,
    pub(crate) iterations: Arc<AtomicU64>,
}

impl NodeSpec {
    /// One step of the partition driver's per-node schedule (spec §4.8
    /// "pop all input channels, invoke body, push all output channels").
    /// For the typed arities the pop/invoke/push sequencing is inlined here
    /// rather than exposed generically; `Custom` bodies perform their own
    /// pop/push through `NodeIo` in whatever order they choose.
    pub(crate) fn step(&mut self) {
        match &mut self.body {
            NodeBody::Source(f) => {
                let out = f();
                self.outputs[0].write_any(out);
            }
            NodeBody::Map1(f) => {
                let a = self.inputs[0].read_any();
                let out = f(a);
                self.outputs[0].write_any(out);
            }
            NodeBody::Map2(f) => {
                let a = self.inputs[0].read_any();
                let b = self.inputs[1].read_any();
                let out = f(a, b);
                self.outputs[0].write_any(out);
            }
            NodeBody::Sink1(f) => {
                let a = self.inputs[0].read_any();
                f(a);
            }
            NodeBody::Custom(f) => {
                let io = NodeIo {
                    inputs: &self.inputs,
                    outputs: &self.outputs,
                };
                f(&io);
            }
        }
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// `true` if the node's last input/output operation had to park — used
    /// to populate a resume point's `node_interrupted` field.
    pub(crate) fn any_channel_blocked(&self) -> bool {
        self.inputs.iter().any(|c| c.last_op_blocked()) || self.outputs.iter().any(|c| c.last_op_blocked())
    }
}
