// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Swaps the task state word's atomics for `loom`'s instrumented equivalents
//! under `#[cfg(loom)]`, so `primitives::state::TaskState`'s CAS loops can be
//! model-checked instead of only ever run under the one interleaving a normal
//! test happens to hit.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync;
        pub(crate) use loom::thread;
        pub(crate) use loom::model;
    } else {
        #[cfg(test)]
        pub(crate) use std::thread;

        #[cfg(test)]
        #[inline(always)]
        pub(crate) fn model<F>(f: F)
        where
            F: Fn() + Sync + Send + 'static,
        {
            f()
        }

        pub(crate) mod sync {
            pub(crate) use core::sync::*;

            #[cfg(test)]
            pub(crate) use std::sync::*;
        }
    }
}
