// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Spin-based synchronization primitives for short, hot-path critical sections.
//!
//! These are busy-wait locks: they never park the calling thread. MARE uses them to
//! guard the small, fast-changing internals of the scheduler (deque metadata, the
//! unlaunched-task cache shards, wait-queue bookkeeping) where a lock is held for at
//! most a handful of instructions. Anything that can be held across a potentially long
//! wait belongs on the blocking primitives in `mare::sync`, built on top of the futex.

mod backoff;
mod barrier;
mod lazy_lock;
mod loom;
mod mutex;
mod once;
mod once_lock;
mod remutex;
mod rw_lock;

pub use backoff::Backoff;
pub use barrier::{Barrier, BarrierWaitResult};
pub use lazy_lock::LazyLock;
pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use once::{ExclusiveState, Once};
pub use once_lock::OnceLock;
pub use remutex::{ReentrantMutex, ReentrantMutexGuard};
pub use rw_lock::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

/// Marker type which indicates that the Guard type for a lock is not `Send`.
#[expect(dead_code, reason = "inner pointer is unused")]
pub(crate) struct GuardNoSend(*mut ());
#[expect(clippy::undocumented_unsafe_blocks, reason = "")]
unsafe impl Sync for GuardNoSend {}
