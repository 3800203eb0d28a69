// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The process-internal futex-like wait/wake primitive (spec §4.6). Three
//! callers share it: worker threads (parked and resumed through the
//! scheduler's replacement mechanism), foreign threads (a plain semaphore
//! wait), and timed waits (a CAS-race token that a timeout racer and a
//! waker both try to claim, loser cleans up).
//!
//! Structurally this keeps the shape of the teacher's `park::{Parker,
//! UnparkToken, ParkingLot}` trio — a registry of wake targets behind a
//! short spin-locked critical section, a counter of currently-parked
//! waiters — but drops the `Waker`/`RawWaker` vtable entirely: MARE tasks
//! are never polled, so there is no `Future` to wake, only a thread (or
//! worker slot) to unpark.

use spin::Mutex as SpinMutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const IDLE: u8 = 0;
const CLAIMED: u8 = 1;

/// A single waiter's parking slot: a condvar-guarded boolean plus the
/// CAS-race token used to arbitrate between a timeout and a wakeup.
struct Slot {
    woken: Mutex<bool>,
    cv: Condvar,
    /// 0 = unclaimed, 1 = claimed (by either the timeout racer or the
    /// waker — whichever CASes first "wins" and is responsible for the
    /// state transition; the loser just walks away).
    race: AtomicU8,
}

impl Slot {
    fn new() -> Self {
        Self {
            woken: Mutex::new(false),
            cv: Condvar::new(),
            race: AtomicU8::new(IDLE),
        }
    }

    fn signal(&self) -> bool {
        if self
            .race
            .compare_exchange(IDLE, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut woken = self.woken.lock().unwrap();
        *woken = true;
        self.cv.notify_one();
        true
    }

    /// Claims the race on behalf of a timeout. Returns `true` if the timeout
    /// won (no wakeup had claimed it yet).
    fn expire(&self) -> bool {
        self.race
            .compare_exchange(IDLE, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A registration a waker can hold to resume a specific parked waiter. Cheap
/// to clone; multiple wakers racing to signal the same token is safe (only
/// the first succeeds, the rest observe `signal` return `false`).
#[derive(Clone)]
pub struct WakeToken(Arc<Slot>);

impl WakeToken {
    /// Wakes the associated waiter. Returns `true` if this call won the
    /// race (i.e. actually woke it); `false` if the waiter already timed
    /// out or was already woken by a previous call.
    pub fn wake(&self) -> bool {
        self.0.signal()
    }
}

/// The shared futex: a registry of currently-parked waiters plus a counter,
/// mirroring `ParkingLot`'s shape. Used directly by `mare::sync` primitives
/// and by the scheduler's worker-replacement park point.
pub struct Futex {
    waiters: SpinMutex<Vec<Arc<Slot>>>,
}

impl Futex {
    pub const fn new() -> Self {
        Self {
            waiters: SpinMutex::new(Vec::new()),
        }
    }

    /// Registers a new waiter and returns a token any thread can use to wake
    /// it, without yet blocking. Split from `wait`/`wait_until` so that the
    /// caller can register itself, release whatever made it decide to wait
    /// (e.g. a mutex), and only then block — avoiding the lost-wakeup window.
    pub fn register(&self) -> WakeToken {
        let slot = Arc::new(Slot::new());
        self.waiters.lock().push(Arc::clone(&slot));
        WakeToken(slot)
    }

    /// Blocks the calling thread until `token` is woken. Used by foreign
    /// (non-pool) threads, matching spec §4.6's "blocks on a semaphore"
    /// caller.
    pub fn wait(&self, token: &WakeToken) {
        let mut woken = token.0.woken.lock().unwrap();
        while !*woken {
            woken = token.0.cv.wait(woken).unwrap();
        }
    }

    /// Blocks until either `token` is woken or `deadline` elapses. Returns
    /// `true` if woken, `false` on timeout. This is the CAS-race timed-wait
    /// path: the timeout racer here competes against any `WakeToken::wake`
    /// call for the same slot.
    pub fn wait_until(&self, token: &WakeToken, deadline: Instant) -> bool {
        loop {
            let now = Instant::now();
            if now >= deadline {
                let timed_out = token.0.expire();
                if timed_out {
                    self.forget(token);
                }
                return !timed_out;
            }
            let remaining = deadline - now;
            let (guard, result) = token
                .0
                .cv
                .wait_timeout(token.0.woken.lock().unwrap(), remaining)
                .unwrap();
            if *guard {
                return true;
            }
            if result.timed_out() {
                let timed_out = token.0.expire();
                if timed_out {
                    self.forget(token);
                }
                return !timed_out;
            }
        }
    }

    pub fn wait_timeout(&self, token: &WakeToken, timeout: Duration) -> bool {
        self.wait_until(token, Instant::now() + timeout)
    }

    /// Removes a timed-out token from the registry so a future `wake()`
    /// never iterates over a dead slot. Idempotent: a token already removed
    /// (because it was woken) is simply not found.
    fn forget(&self, token: &WakeToken) {
        self.waiters.lock().retain(|s| !Arc::ptr_eq(s, &token.0));
    }

    /// Wakes up to `n` currently-registered waiters (most-recently-registered
    /// first), removing them from the registry. Returns the number actually
    /// woken.
    pub fn wake(&self, n: usize) -> usize {
        let mut waiters = self.waiters.lock();
        let mut woken = 0;
        while woken < n {
            let Some(slot) = waiters.pop() else { break };
            if WakeToken(slot).wake() {
                woken += 1;
            }
        }
        woken
    }

    pub fn wake_all(&self) -> usize {
        self.wake(usize::MAX)
    }
}

impl Default for Futex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wake_unblocks_waiter() {
        let futex = Arc::new(Futex::new());
        let token = futex.register();
        let waker_token = token.clone();
        let futex2 = Arc::clone(&futex);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(waker_token.wake());
            let _ = futex2;
        });
        futex.wait(&token);
        handle.join().unwrap();
    }

    #[test]
    fn timeout_fires_without_spurious_wakeup() {
        let futex = Futex::new();
        let token = futex.register();
        let woken = futex.wait_timeout(&token, Duration::from_millis(10));
        assert!(!woken);
    }

    #[test]
    fn race_has_exactly_one_winner() {
        let futex = Arc::new(Futex::new());
        let token = futex.register();
        // Timeout elapses immediately so `expire` and a concurrent `wake`
        // race for the same token.
        let waker_token = token.clone();
        let t = thread::spawn(move || waker_token.wake());
        let timed_out = !futex.wait_timeout(&token, Duration::from_millis(0));
        let woke = t.join().unwrap();
        // Exactly one of the two observed "I claimed it."
        assert_ne!(timed_out, woke);
    }
}
