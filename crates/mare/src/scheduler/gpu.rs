// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The GPU collaborator seam (spec §1 "Non-goals": GPU kernel compilation
//! and dispatch are out of scope, but a task marked `TaskFlags::GPU` still
//! needs somewhere to go). MARE owns none of the actual device work; it
//! just needs a handle it can launch onto and block a dedicated thread on,
//! the same way a `TaskFlags::BLOCKING` task blocks on a foreign API.

/// A submitted kernel's completion handle. Implementations are expected to
/// be whatever the host's GPU runtime hands back from a kernel launch (a
/// CUDA/HIP event, a fence, ...); MARE only ever calls `wait`.
pub trait GpuEvent: Send {
    fn wait(self: Box<Self>);
}

/// The iteration range a GPU task is launched over; deliberately minimal —
/// MARE doesn't know or care about grid/block shapes beyond a flat count.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GpuRange {
    pub global: usize,
    pub local: usize,
}

/// A host-supplied GPU task queue. `scheduler::init` accepts an `Arc<dyn
/// GpuQueue>`; tasks built with `TaskAttrs::gpu()` are handed to it instead
/// of running inline on a pool worker.
pub trait GpuQueue: Send + Sync {
    /// Submits `body` for execution over `range` and returns immediately
    /// with a handle to wait on. `body` is expected to perform whatever
    /// host-side launch call the device API requires; MARE does not
    /// interpret its return value.
    fn launch(&self, range: GpuRange, body: Box<dyn FnOnce() + Send>) -> Box<dyn GpuEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct ImmediateEvent;
    impl GpuEvent for ImmediateEvent {
        fn wait(self: Box<Self>) {}
    }

    struct InlineQueue;
    impl GpuQueue for InlineQueue {
        fn launch(&self, _range: GpuRange, body: Box<dyn FnOnce() + Send>) -> Box<dyn GpuEvent> {
            body();
            Box::new(ImmediateEvent)
        }
    }

    #[test]
    fn inline_queue_runs_body_before_returning_event() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let queue = InlineQueue;
        let event = queue.launch(GpuRange { global: 4, local: 1 }, Box::new(move || ran2.store(true, Ordering::SeqCst)));
        event.wait();
        assert!(ran.load(Ordering::SeqCst));
    }
}
