// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! MARE: a heterogeneous task-parallel runtime (spec §1).
//!
//! The crate is organized the way the engine itself is layered:
//!
//! - [`primitives`] — lock-free building blocks: task state words, the
//!   work-stealing deque, group signatures, the futex-like wait/wake queue.
//! - [`task`] — task bodies, attributes, and the `after`/successor graph.
//! - [`group`] — named, cancellable, waitable task collections and the join
//!   algebra.
//! - [`scheduler`] — the worker pool, `init`/`shutdown`, and
//!   `launch`/`launch_into`/`add_to_group`/`cancel_group`.
//! - [`sdf`] — synchronous dataflow graphs built on top of the same task
//!   machinery's blocking primitives.
//! - [`sync`] — user-visible blocking primitives (`Mutex`, `CondVar`,
//!   `Barrier`) sharing the scheduler's own futex.
//! - [`storage`] — the three-tier task/scheduler/thread-local storage model.
//! - [`logging`] — structured event sinks (spec §2.1).
//! - [`error`] — the crate's error types (spec §7).

mod error;
mod group;
mod logging;
mod loom;
mod primitives;
mod scheduler;
mod sdf;
mod storage;
mod sync;
mod task;
mod unlaunched_cache;

pub use error::{ApiError, ApiErrorKind, ResourceError, StorageError};
pub use group::{Group, VirtualGroup};
pub use logging::{set_sink, Event, EventSink, FtraceTextSink, TracingSink};
pub use primitives::Signature;
pub use scheduler::{
    add_to_group, cancel_group, gpu_queue, init, launch, launch_into, shutdown, Config, DefaultTopology, GpuEvent,
    GpuQueue, GpuRange, Topology,
};
pub use sdf::{BoxAny, Channel, DynChannel, GraphBuilder, NodeBody, NodeId, NodeIo, ResumePoint, SdfGraph, SdfHandle};
pub use storage::{bind_worker_slot, SchedulerStoragePtr, TaskStoragePtr, ThreadStoragePtr};
pub use sync::{Barrier, CondVar, Mutex, MutexGuard, RecursiveMutex, RecursiveMutexGuard};
pub use task::builder::TaskBuilder;
pub use task::{TaskAttrs, TaskBody, TaskContext, TaskFlags, TaskId, TaskRef};
