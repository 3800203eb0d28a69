// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `mutex`/`recursive_mutex`/`timed_mutex` (spec §4.6, §6): user-visible
//! blocking primitives built directly on [`crate::primitives::Futex`] rather
//! than the OS mutex, so a task that blocks on one of these parks the same
//! way it would waiting on a group or an SDF channel, instead of handing the
//! wait off to the kernel.

use crate::primitives::Futex;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::ThreadId;
use std::time::Duration;

/// A non-recursive mutual exclusion lock.
pub struct Mutex<T> {
    locked: AtomicBool,
    futex: Futex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            futex: Futex::new(),
            data: UnsafeCell::new(value),
        }
    }

    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            if self.try_acquire() {
                return MutexGuard { mutex: self };
            }
            let token = self.futex.register();
            if self.try_acquire() {
                token.wake();
                return MutexGuard { mutex: self };
            }
            self.futex.wait(&token);
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.try_acquire().then_some(MutexGuard { mutex: self })
    }

    /// `timed_mutex` variant: returns `None` if `timeout` elapses before
    /// the lock is acquired.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                return Some(MutexGuard { mutex: self });
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let token = self.futex.register();
            if self.try_acquire() {
                token.wake();
                return Some(MutexGuard { mutex: self });
            }
            if !self.futex.wait_until(&token, deadline) {
                return None;
            }
        }
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
        self.futex.wake(1);
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> MutexGuard<'a, T> {
    /// Lets [`super::condvar::CondVar`] release and reacquire the same
    /// mutex around a wait without `Mutex` exposing its innards publicly.
    pub(crate) fn mutex_ref(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// `recursive_mutex` (spec §6): the same owning thread may lock it again
/// without deadlocking itself; tracks a depth counter rather than unlocking
/// until the outermost guard drops.
pub struct RecursiveMutex<T> {
    owner: AtomicUsize,
    depth: UnsafeCell<usize>,
    futex: Futex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RecursiveMutex<T> {}
unsafe impl<T: Send> Sync for RecursiveMutex<T> {}

const NO_OWNER: usize = 0;

fn thread_key(id: ThreadId) -> usize {
    // `ThreadId` has no stable numeric accessor; hash it to a nonzero key
    // unique enough to distinguish "this thread" from "no thread" for the
    // lifetime of a single lock/unlock pair.
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    let key = hasher.finish() as usize;
    if key == NO_OWNER {
        key.wrapping_add(1)
    } else {
        key
    }
}

impl<T> RecursiveMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            owner: AtomicUsize::new(NO_OWNER),
            depth: UnsafeCell::new(0),
            futex: Futex::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> RecursiveMutexGuard<'_, T> {
        let me = thread_key(std::thread::current().id());
        loop {
            if self.owner.load(Ordering::Acquire) == me {
                unsafe { *self.depth.get() += 1 };
                return RecursiveMutexGuard { mutex: self };
            }
            if self
                .owner
                .compare_exchange(NO_OWNER, me, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                unsafe { *self.depth.get() = 1 };
                return RecursiveMutexGuard { mutex: self };
            }
            let token = self.futex.register();
            if self.owner.load(Ordering::Acquire) == NO_OWNER {
                token.wake();
                continue;
            }
            self.futex.wait(&token);
        }
    }

    fn unlock(&self) {
        let depth = unsafe {
            let d = self.depth.get();
            *d -= 1;
            *d
        };
        if depth == 0 {
            self.owner.store(NO_OWNER, Ordering::Release);
            self.futex.wake(1);
        }
    }
}

pub struct RecursiveMutexGuard<'a, T> {
    mutex: &'a RecursiveMutex<T>,
}

impl<T> Deref for RecursiveMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for RecursiveMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for RecursiveMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_excludes_concurrent_access() {
        let m = Arc::new(Mutex::new(0_i64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *m.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 8000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = Mutex::new(());
        let guard = m.lock();
        assert!(m.try_lock().is_none());
        drop(guard);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn try_lock_for_times_out() {
        let m = Mutex::new(());
        let _guard = m.lock();
        assert!(m.try_lock_for(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn recursive_mutex_allows_reentry_from_owner() {
        let m = RecursiveMutex::new(0_i32);
        let outer = m.lock();
        let inner = m.lock();
        drop(inner);
        drop(outer);
        let guard = m.lock();
        assert_eq!(*guard, 0);
    }
}
