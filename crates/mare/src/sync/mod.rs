// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! User-visible blocking primitives (spec §4.6, §6): `mutex`,
//! `recursive_mutex`, `timed_mutex`, `condition_variable[_any]`,
//! `sense_barrier`. All built on [`crate::primitives::Futex`] so blocking on
//! one of these parks a task the same way blocking on a group or an SDF
//! channel does.

mod barrier;
mod condvar;
mod mutex;

pub use barrier::Barrier;
pub use condvar::CondVar;
pub use mutex::{Mutex, MutexGuard, RecursiveMutex, RecursiveMutexGuard};
