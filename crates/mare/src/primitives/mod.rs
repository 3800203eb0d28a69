// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The ~10% "primitives" layer (spec §2): the task state word, group
//! signatures, the per-worker Chase-Lev deque, and the futex-like wait/wake
//! primitive. Everything above this module is built in terms of these.

pub mod deque;
pub mod futex;
pub mod signature;
pub mod state;

pub use deque::{GlobalQueueInner, LocalDeque, LocalStealer, StealOutcome};
pub use futex::{Futex, WakeToken};
pub use signature::{Signature, SignatureAllocator};
pub use state::{BeginRun, CancelOutcome, NotifyOutcome, Stage, TaskState};
