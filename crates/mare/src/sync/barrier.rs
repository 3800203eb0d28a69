// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `sense_barrier` (spec §4.6): a reusable barrier for a fixed party count,
//! parking arrivals on [`Futex`] rather than busy-waiting. Distinct from
//! `libs/spin`'s spin-wait barrier, which is meant for very short critical
//! sections inside the scheduler itself; this one is for user tasks that may
//! wait arbitrarily long and should yield the thread while doing so.
//!
//! Sense-reversing: each generation flips a shared boolean rather than
//! resetting a counter, so a thread that arrives for generation N+1 while
//! stragglers from generation N are still being woken can't be mistaken for
//! a generation-N arrival.

use crate::primitives::Futex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct Barrier {
    parties: usize,
    count: AtomicUsize,
    sense: AtomicBool,
    futex: Futex,
}

impl Barrier {
    pub const fn new(parties: usize) -> Self {
        Self {
            parties,
            count: AtomicUsize::new(0),
            sense: AtomicBool::new(false),
            futex: Futex::new(),
        }
    }

    /// Blocks until `parties` threads have called `wait` for the current
    /// generation. Returns `true` to exactly one caller per generation (the
    /// "leader"), matching `std::sync::Barrier`'s
    /// `BarrierWaitResult::is_leader`.
    pub fn wait(&self) -> bool {
        let local_sense = !self.sense.load(Ordering::Acquire);
        let arrived = self.count.fetch_add(1, Ordering::AcqRel) + 1;

        if arrived == self.parties {
            self.count.store(0, Ordering::Release);
            self.sense.store(local_sense, Ordering::Release);
            self.futex.wake_all();
            return true;
        }

        loop {
            let token = self.futex.register();
            if self.sense.load(Ordering::Acquire) == local_sense {
                token.wake();
                return false;
            }
            self.futex.wait(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn all_parties_release_together() {
        let barrier = Arc::new(Barrier::new(4));
        let past = Arc::new(Counter::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            let past = Arc::clone(&past);
            handles.push(thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(5));
                barrier.wait();
                past.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(past.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn exactly_one_leader_per_generation() {
        let barrier = Arc::new(Barrier::new(3));
        let leaders = Arc::new(Counter::new(0));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            let leaders = Arc::clone(&leaders);
            handles.push(thread::spawn(move || {
                if barrier.wait() {
                    leaders.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }
}
