// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A bounded SPSC channel buffer (spec §3.3/§4.7): one producer node, one
//! consumer node, blocking semantics on empty/full. Built directly on
//! [`crate::primitives::Futex`], the same suspension primitive `mare::sync`
//! uses, so a parked SDF reader/writer never holds a worker behind a kernel
//! lock either.
//!
//! `Channel<T>` is generic and strongly typed; [`DynChannel`] type-erases it
//! at graph-construction boundaries so [`super::graph::GraphBuilder`] can
//! wire heterogeneous node bodies together without every node needing to
//! know every channel's element type at compile time.

use crate::error::ApiError;
use crate::primitives::Futex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A boxed, type-erased value moving through a [`DynChannel`].
pub type BoxAny = Box<dyn Any + Send>;

/// A bounded FIFO of `T` (spec §3.3): `read` blocks on empty, `write` blocks
/// on full. Exactly one producer and one consumer use a given channel within
/// a graph, matching spec §3.3's "exactly one producer node and one consumer
/// node."
pub struct Channel<T> {
    buf: Mutex<VecDeque<T>>,
    capacity: usize,
    readers: Futex,
    writers: Futex,
    last_op_blocked: AtomicBool,
    had_delay: AtomicBool,
}

impl<T: Send + 'static> Channel<T> {
    /// `create_sdf_node`'s channel constructor. Fails on a zero-size buffer
    /// (spec §7 "Misuse... zero-size buffer").
    pub fn new(capacity: usize) -> Result<Arc<Self>, ApiError> {
        if capacity == 0 {
            return Err(ApiError::zero_size_channel(
                "sdf channel capacity must be at least 1",
            ));
        }
        Ok(Arc::new(Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            readers: Futex::new(),
            writers: Futex::new(),
            last_op_blocked: AtomicBool::new(false),
            had_delay: AtomicBool::new(false),
        }))
    }

    /// `preload_channel(dc, values)` (spec §4.8 "Delays"): fills the buffer
    /// with initial values before the graph's first iteration. Must be
    /// called before `launch`; the launcher never preloads on its own.
    ///
    /// # Panics
    ///
    /// Panics if `values` would exceed `capacity` — a preload that doesn't
    /// fit can never be drained by a correctly sized channel, so this is a
    /// construction-time programmer error rather than a runtime condition.
    pub fn preload(&self, values: impl IntoIterator<Item = T>) {
        let mut buf = self.buf.lock().unwrap();
        let mut any = false;
        for value in values {
            assert!(
                buf.len() < self.capacity,
                "preload exceeds sdf channel capacity"
            );
            buf.push_back(value);
            any = true;
        }
        if any {
            self.had_delay.store(true, Ordering::Release);
        }
    }

    /// Blocks until there is room, then pushes `value` (spec §4.7 `write`).
    pub fn write(&self, value: T) {
        let mut value = Some(value);
        loop {
            let mut buf = self.buf.lock().unwrap();
            if buf.len() < self.capacity {
                buf.push_back(value.take().expect("write retried after success"));
                self.last_op_blocked.store(false, Ordering::Release);
                drop(buf);
                self.readers.wake(1);
                return;
            }
            // Still full: register while still holding `buf` so a reader
            // can't drain and wake a writer in the gap between this check
            // and the registration (it would need the same lock first).
            // Only registering here, rather than on every loop iteration,
            // means a non-blocking write never leaves a stale slot behind
            // in the futex's waiter registry.
            let token = self.writers.register();
            drop(buf);
            self.last_op_blocked.store(true, Ordering::Release);
            self.writers.wait(&token);
        }
    }

    /// Blocks until there is an element, then pops and returns it (spec §4.7
    /// `read`).
    pub fn read(&self) -> T {
        loop {
            let mut buf = self.buf.lock().unwrap();
            if let Some(value) = buf.pop_front() {
                self.last_op_blocked.store(false, Ordering::Release);
                drop(buf);
                self.writers.wake(1);
                return value;
            }
            let token = self.readers.register();
            drop(buf);
            self.last_op_blocked.store(true, Ordering::Release);
            self.readers.wait(&token);
        }
    }

    /// Re-arms any writer parked on "full" after an SDF launcher
    /// interruption (spec §4.7 `trigger_write_resume`).
    pub fn trigger_write_resume(&self) {
        self.writers.wake_all();
    }

    /// Re-arms any reader parked on "empty" (spec §4.7
    /// `trigger_read_resume`).
    pub fn trigger_read_resume(&self) {
        self.readers.wake_all();
    }

    /// `true` if the most recent `read`/`write` call on this channel had to
    /// park before it could proceed — the progress signal the SDF launcher
    /// uses to detect an interruption point (spec §4.7).
    pub fn last_op_blocked(&self) -> bool {
        self.last_op_blocked.load(Ordering::Acquire)
    }
}

/// Type-erased view of a [`Channel<T>`] for the graph/launcher layer, which
/// drives heterogeneously-typed nodes without monomorphizing over every
/// element type in the graph.
pub trait DynChannel: Send + Sync {
    fn read_any(&self) -> BoxAny;
    fn write_any(&self, value: BoxAny);
    fn last_op_blocked(&self) -> bool;
    /// Whether this channel was preloaded with at least one delay element
    /// before launch — required on at least one edge of every SDF cycle
    /// (spec §4.8 "A cycle must have ≥1 delay on some edge").
    fn has_delay(&self) -> bool;
}

impl<T: Send + 'static> DynChannel for Channel<T> {
    fn read_any(&self) -> BoxAny {
        Box::new(self.read())
    }

    fn write_any(&self, value: BoxAny) {
        let value = *value
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("sdf channel element type mismatch"));
        self.write(value);
    }

    fn last_op_blocked(&self) -> bool {
        Channel::last_op_blocked(self)
    }

    fn has_delay(&self) -> bool {
        self.had_delay.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_in_order() {
        let ch: Arc<Channel<i32>> = Channel::new(4).unwrap();
        ch.write(1);
        ch.write(2);
        assert_eq!(ch.read(), 1);
        assert_eq!(ch.read(), 2);
    }

    #[test]
    fn preload_is_read_before_any_write() {
        let ch: Arc<Channel<i32>> = Channel::new(4).unwrap();
        ch.preload([10, 20]);
        assert!(DynChannel::has_delay(ch.as_ref()));
        assert_eq!(ch.read(), 10);
        assert_eq!(ch.read(), 20);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(Channel::<i32>::new(0).is_err());
    }

    #[test]
    fn write_blocks_until_reader_drains_then_resumes() {
        let ch: Arc<Channel<i32>> = Channel::new(1).unwrap();
        ch.write(1);
        let ch2 = Arc::clone(&ch);
        let handle = std::thread::spawn(move || ch2.write(2));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(ch.read(), 1);
        handle.join().unwrap();
        assert_eq!(ch.read(), 2);
    }
}
