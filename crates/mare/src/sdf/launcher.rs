// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Launching, pausing, resuming, and canceling an SDF graph (spec §4.8,
//! §6). Each partition runs on its own dedicated thread (mirroring the
//! scheduler's `blocking` threads rather than going through the work-stealing
//! pool, since a partition's loop runs for the whole graph's lifetime and
//! would otherwise monopolize a pool worker); the partitions share a single
//! [`Control`] block modeled on [`crate::group::Group`]'s done/cv pattern for
//! coordinating pause/resume/cancel and the overall `wait_for`.
//!
//! `pause`/`cancel` are iteration-targeted (spec §4.8(3)(5), §9 testable
//! property 8): `pause(g, iter)` blocks the caller until every partition has
//! completed exactly `iter` iterations, then stops each at the boundary
//! between iterations (never mid-node); `cancel(g, iter)` schedules a
//! one-shot cancellation that fires once every partition reaches `iter`.
//! Passing `None` asks for the un-targeted form instead — "as soon as
//! possible" — implemented as a target of zero, which every partition's
//! iteration count already satisfies, so each stops at its very next
//! iteration boundary.

use super::node::NodeSpec;
use crate::error::ApiError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// A built, launchable SDF graph. Produced by
/// [`super::graph::GraphBuilder::build`].
pub struct SdfGraph {
    nodes: Vec<Mutex<NodeSpec>>,
    partitions: Vec<super::graph::Partition>,
}

impl SdfGraph {
    pub(crate) fn new(nodes: Vec<NodeSpec>, partitions: Vec<super::graph::Partition>) -> Self {
        Self {
            nodes: nodes.into_iter().map(Mutex::new).collect(),
            partitions,
        }
    }

    /// `launch(graph, iterations)` (spec §6): starts one driver thread per
    /// partition and returns a handle for `wait_for`/`pause`/`resume`/
    /// `cancel`/`query`. `iterations = None` runs until canceled.
    pub fn launch(self: Arc<Self>, iterations: Option<u64>) -> SdfHandle {
        let control = Arc::new(Control::new(self.partitions.len()));
        let mut threads = Vec::with_capacity(self.partitions.len());
        for partition_idx in 0..self.partitions.len() {
            let graph = Arc::clone(&self);
            let control = Arc::clone(&control);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("mare-sdf-partition-{partition_idx}"))
                    .spawn(move || partition_driver(&graph, partition_idx, iterations, &control))
                    .expect("failed to spawn sdf partition thread"),
            );
        }
        SdfHandle {
            graph: self,
            control,
            threads: Mutex::new(Some(threads)),
        }
    }

    /// `launch_and_wait(graph, iterations)`: convenience combinator.
    pub fn launch_and_wait(self: Arc<Self>, iterations: Option<u64>) -> Result<(), ApiError> {
        let handle = self.launch(iterations);
        handle.wait_for();
        Ok(())
    }
}

/// A resume point within one partition's schedule: which node the driver
/// was about to step, and whether that node's last channel operation had
/// blocked (spec §4.8's `{before_first_iter, iter, node_index,
/// node_interrupted}` tuple).
#[derive(Debug, Clone, Copy)]
pub struct ResumePoint {
    pub before_first_iter: bool,
    pub iter: u64,
    pub node_index: usize,
    pub node_interrupted: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ControlState {
    Running,
    Paused,
    Canceled,
}

struct Control {
    state: Mutex<ControlState>,
    cv: Condvar,
    /// Count of partitions still actively running; reaching zero means the
    /// graph finished its iteration budget or was canceled.
    active: AtomicU64,
    /// Count of partitions that have acknowledged a pause request by
    /// parking at a clean resume point.
    paused_count: Mutex<usize>,
    partition_count: usize,
    finished: AtomicBool,
    resume_points: Mutex<Vec<Option<ResumePoint>>>,
    /// `Some(iter)` once `pause(g, iter)` is requested: a partition parks
    /// once its own completed-iteration count reaches `iter`. Cleared by
    /// `resume`.
    pause_target: Mutex<Option<u64>>,
    /// `Some(iter)` once `cancel(g, iter)` is requested: a partition stops
    /// for good once its own completed-iteration count reaches `iter`. Never
    /// cleared — a scheduled cancel is one-shot and permanent.
    cancel_target: Mutex<Option<u64>>,
}

impl Control {
    fn new(partition_count: usize) -> Self {
        Self {
            state: Mutex::new(ControlState::Running),
            cv: Condvar::new(),
            active: AtomicU64::new(partition_count as u64),
            paused_count: Mutex::new(0),
            partition_count,
            finished: AtomicBool::new(false),
            resume_points: Mutex::new(vec![None; partition_count]),
            pause_target: Mutex::new(None),
            cancel_target: Mutex::new(None),
        }
    }
}

/// A handle to a launched graph (spec §6's opaque `sdf_graph` handle once
/// launched). `destroy()` must be called after `wait_for()`/a terminal
/// `cancel()` to join the partition threads and release the graph.
pub struct SdfHandle {
    graph: Arc<SdfGraph>,
    control: Arc<Control>,
    threads: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl SdfHandle {
    /// Blocks until every partition finishes its iteration budget or the
    /// graph is canceled.
    pub fn wait_for(&self) {
        let guard = self.control.state.lock().unwrap();
        let _unused = self
            .control
            .cv
            .wait_while(guard, |_| !self.control.finished.load(Ordering::Acquire))
            .unwrap();
    }

    /// `pause(graph, iter, iter_synced)` (spec §4.8(3)): blocks until every
    /// partition has completed exactly `iter` iterations, then stops each at
    /// the next iteration boundary. `iter = None` asks for the un-targeted
    /// "as soon as possible" form instead.
    pub fn pause(&self, iter: Option<u64>) {
        let target = iter.unwrap_or(0);
        *self.control.pause_target.lock().unwrap() = Some(target);
        self.control.cv.notify_all();

        let guard = self.control.paused_count.lock().unwrap();
        let _unused = self
            .control
            .cv
            .wait_while(guard, |count| {
                *count < self.control.partition_count && !self.control.finished.load(Ordering::Acquire)
            })
            .unwrap();
    }

    /// `resume(graph)`: releases every partition parked at its resume
    /// point. A no-op once the graph has been canceled.
    pub fn resume(&self) {
        let mut state = self.control.state.lock().unwrap();
        if *state == ControlState::Canceled {
            return;
        }
        *state = ControlState::Running;
        *self.control.pause_target.lock().unwrap() = None;
        *self.control.paused_count.lock().unwrap() = 0;
        self.control.cv.notify_all();
        for partition in 0..self.control.partition_count {
            crate::logging::emit(crate::logging::Event::SdfPartitionResumed { partition });
        }
    }

    /// `cancel(graph, iter)` (spec §4.8(5)): schedules a one-shot cancel that
    /// takes effect once every partition completes exactly `iter`
    /// iterations, without blocking the caller. `iter = None` cancels
    /// immediately instead.
    pub fn cancel(&self, iter: Option<u64>) {
        match iter {
            Some(target) => {
                *self.control.cancel_target.lock().unwrap() = Some(target);
                self.control.cv.notify_all();
            }
            None => {
                let mut state = self.control.state.lock().unwrap();
                *state = ControlState::Canceled;
                self.control.cv.notify_all();
            }
        }
    }

    /// `sdf_graph_query(graph)`: a resume point snapshot per partition, plus
    /// each node's running iteration count.
    pub fn query(&self) -> Vec<Option<ResumePoint>> {
        self.control.resume_points.lock().unwrap().clone()
    }

    pub fn node_iterations(&self, node: super::node::NodeId) -> u64 {
        self.graph.nodes[node.0].lock().unwrap().iterations.load(Ordering::Relaxed)
    }

    /// `destroy_sdf_graph(graph)`: joins all partition driver threads. Call
    /// after `wait_for` or `cancel`; joining a still-running graph blocks
    /// until it reaches a terminal state.
    pub fn destroy(&self) {
        if let Some(threads) = self.threads.lock().unwrap().take() {
            for t in threads {
                let _unused = t.join();
            }
        }
    }
}

fn partition_driver(graph: &Arc<SdfGraph>, partition_idx: usize, iterations: Option<u64>, control: &Arc<Control>) {
    let order = &graph.partitions[partition_idx].order;
    let mut iter = 0u64;
    loop {
        if iterations.is_some_and(|limit| iter >= limit) {
            break;
        }
        if cancel_due_now(control, iter) {
            finish_partition_canceled(control);
            return;
        }
        park_if_pause_due(control, partition_idx, iter, order[0]);
        if cancel_due_now(control, iter) {
            finish_partition_canceled(control);
            return;
        }

        for &node_idx in order {
            let mut node = graph.nodes[node_idx].lock().unwrap();
            node.step();
            let blocked = node.any_channel_blocked();
            drop(node);
            record_resume_point(
                control,
                partition_idx,
                ResumePoint {
                    before_first_iter: iter == 0,
                    iter,
                    node_index: node_idx,
                    node_interrupted: blocked,
                },
            );
        }
        iter += 1;
    }
    finish_partition(control);
}

fn record_resume_point(control: &Control, partition_idx: usize, point: ResumePoint) {
    control.resume_points.lock().unwrap()[partition_idx] = Some(point);
}

/// `true` once a scheduled `cancel(g, iter)` target (or an untargeted,
/// immediate `cancel(g)`) applies to this partition's own iteration count.
/// Marks the shared state `Canceled` the first time any partition observes
/// this, so `query`/`resume`/a later `cancel` call see a consistent terminal
/// state.
fn cancel_due_now(control: &Control, iter: u64) -> bool {
    let mut state = control.state.lock().unwrap();
    if *state == ControlState::Canceled {
        return true;
    }
    if let Some(target) = *control.cancel_target.lock().unwrap() {
        if iter >= target {
            *state = ControlState::Canceled;
            control.cv.notify_all();
            return true;
        }
    }
    false
}

/// Parks the calling partition thread if a pause target is set and this
/// partition's completed-iteration count has reached it. Returns once
/// `resume` releases it, or once a `cancel(g, iter)` scheduled while parked
/// becomes due for this partition's own `iter`.
fn park_if_pause_due(control: &Control, partition_idx: usize, iter: u64, next_node: usize) {
    let target = *control.pause_target.lock().unwrap();
    let Some(target) = target else { return };
    if iter < target {
        return;
    }
    let mut state = control.state.lock().unwrap();
    if *state == ControlState::Canceled {
        return;
    }
    *state = ControlState::Paused;
    record_resume_point(
        control,
        partition_idx,
        ResumePoint {
            before_first_iter: iter == 0,
            iter,
            node_index: next_node,
            node_interrupted: false,
        },
    );
    crate::logging::emit(crate::logging::Event::SdfPartitionPaused { partition: partition_idx, iter });
    {
        let mut count = control.paused_count.lock().unwrap();
        *count += 1;
        if *count == control.partition_count {
            control.cv.notify_all();
        }
    }
    // A plain `wait_while` on `state != Paused` would never wake up here:
    // `cancel(g, iter)` only records a target, it doesn't touch `state`, so a
    // partition already parked has to re-check the target itself on every
    // spurious or cancel-triggered wake rather than rely on the predicate
    // alone to notice.
    loop {
        if *state != ControlState::Paused {
            return;
        }
        if let Some(cancel_target) = *control.cancel_target.lock().unwrap() {
            if iter >= cancel_target {
                *state = ControlState::Canceled;
                control.cv.notify_all();
                return;
            }
        }
        state = control.cv.wait(state).unwrap();
    }
}

fn finish_partition(control: &Control) {
    if control.active.fetch_sub(1, Ordering::AcqRel) == 1 {
        control.finished.store(true, Ordering::Release);
        control.cv.notify_all();
    }
}

/// Like `finish_partition`, but also releases any in-progress `pause()` wait:
/// a cancel that lands before every partition has parked must still unblock
/// the caller rather than wait forever for a pause that will never complete.
fn finish_partition_canceled(control: &Control) {
    {
        let mut count = control.paused_count.lock().unwrap();
        if *count < control.partition_count {
            *count = control.partition_count;
        }
    }
    control.cv.notify_all();
    finish_partition(control);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::channel::Channel;
    use crate::sdf::graph::GraphBuilder;
    use crate::sdf::node::NodeBody;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn basic_pipe_runs_requested_iterations() {
        let ch = Channel::<i32>::new(4).unwrap();
        let total = Arc::new(AtomicI64::new(0));
        let total_clone = Arc::clone(&total);

        let mut b = GraphBuilder::new();
        let mut n = 0;
        b.add_node(
            Some("src"),
            NodeBody::Source(Box::new(move || {
                n += 1;
                Box::new(n)
            })),
            vec![],
            vec![ch.clone()],
        );
        b.add_node(
            Some("sink"),
            NodeBody::Sink1(Box::new(move |v| {
                let v = *v.downcast::<i32>().unwrap();
                total_clone.fetch_add(i64::from(v), Ordering::Relaxed);
            })),
            vec![ch],
            vec![],
        );
        let graph = Arc::new(b.build(1).unwrap());
        let handle = graph.launch(Some(5));
        handle.wait_for();
        handle.destroy();
        assert_eq!(total.load(Ordering::Relaxed), 1 + 2 + 3 + 4 + 5);
    }

    #[test]
    fn pause_at_iter_unblocks_with_exact_count() {
        let ch = Channel::<i32>::new(4).unwrap();
        let total = Arc::new(AtomicI64::new(0));
        let total_clone = Arc::clone(&total);

        let mut b = GraphBuilder::new();
        let mut n = 0;
        let src = b.add_node(
            Some("src"),
            NodeBody::Source(Box::new(move || {
                n += 1;
                Box::new(n)
            })),
            vec![],
            vec![ch.clone()],
        );
        b.add_node(
            Some("sink"),
            NodeBody::Sink1(Box::new(move |v| {
                let v = *v.downcast::<i32>().unwrap();
                total_clone.fetch_add(i64::from(v), Ordering::Relaxed);
            })),
            vec![ch],
            vec![],
        );
        let iterations = b.iterations_handle(src);
        let graph = Arc::new(b.build(1).unwrap());
        let handle = graph.launch(Some(1000));

        handle.pause(Some(25));
        assert_eq!(iterations.load(Ordering::Relaxed), 25);

        handle.resume();
        handle.pause(Some(50));
        assert_eq!(iterations.load(Ordering::Relaxed), 50);

        handle.resume();
        handle.cancel(Some(75));
        handle.wait_for();
        handle.destroy();
        assert_eq!(iterations.load(Ordering::Relaxed), 75);
    }

    #[test]
    fn untargeted_pause_then_resume_does_not_lose_progress() {
        let ch = Channel::<i32>::new(4).unwrap();
        let total = Arc::new(AtomicI64::new(0));
        let total_clone = Arc::clone(&total);

        let mut b = GraphBuilder::new();
        let mut n = 0;
        b.add_node(
            Some("src"),
            NodeBody::Source(Box::new(move || {
                n += 1;
                std::thread::sleep(std::time::Duration::from_millis(2));
                Box::new(n)
            })),
            vec![],
            vec![ch.clone()],
        );
        b.add_node(
            Some("sink"),
            NodeBody::Sink1(Box::new(move |v| {
                let v = *v.downcast::<i32>().unwrap();
                total_clone.fetch_add(i64::from(v), Ordering::Relaxed);
            })),
            vec![ch],
            vec![],
        );
        let graph = Arc::new(b.build(1).unwrap());
        let handle = graph.launch(Some(20));
        std::thread::sleep(std::time::Duration::from_millis(5));
        handle.pause(None);
        let before = total.load(Ordering::Relaxed);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(total.load(Ordering::Relaxed), before);
        handle.resume();
        handle.wait_for();
        handle.destroy();
        assert!(total.load(Ordering::Relaxed) >= before);
    }

    #[test]
    fn cancel_with_no_iter_takes_effect_immediately() {
        let ch = Channel::<i32>::new(4).unwrap();
        let mut b = GraphBuilder::new();
        let mut n = 0;
        b.add_node(
            Some("src"),
            NodeBody::Source(Box::new(move || {
                n += 1;
                std::thread::sleep(std::time::Duration::from_millis(2));
                Box::new(n)
            })),
            vec![],
            vec![ch.clone()],
        );
        b.add_node(Some("sink"), NodeBody::Sink1(Box::new(|_| {})), vec![ch], vec![]);
        let graph = Arc::new(b.build(1).unwrap());
        let handle = graph.launch(Some(1000));
        std::thread::sleep(std::time::Duration::from_millis(5));
        handle.cancel(None);
        handle.wait_for();
        handle.destroy();
    }
}
