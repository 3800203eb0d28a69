// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Type-erased task bodies with a small-body optimization (spec §9:
//! "represent a task body as a fixed-size callable slot plus a pointer to a
//! vtable `{invoke, destroy, source_id}`... small-body optimization avoids
//! allocation on the hot path").
//!
//! Closures that fit in [`INLINE_CAP`] bytes and have no stricter alignment
//! requirement than a `usize` are stored inline; anything larger spills to a
//! `Box`. Either way the caller only ever sees a `TaskBody`.

use crate::task::TaskContext;
use std::mem::{align_of, size_of, MaybeUninit};
use std::ptr;

/// Three words: enough for the overwhelming majority of task closures (a
/// captured `Arc`/`&T` plus a counter or two) without spilling to the heap.
const INLINE_CAP: usize = 3 * size_of::<usize>();

struct VTable {
    invoke: unsafe fn(*mut (), &TaskContext),
    drop_inline: unsafe fn(*mut ()),
    drop_boxed: unsafe fn(*mut ()),
    source_id: fn() -> &'static str,
}

enum Storage {
    Inline(MaybeUninit<[usize; INLINE_CAP / size_of::<usize>()]>),
    Boxed(*mut ()),
}

/// A type-erased, `FnMut(&TaskContext) + Send` task body.
pub struct TaskBody {
    storage: Storage,
    vtable: &'static VTable,
}

// Safety: `F: Send` is required by `TaskBody::new`, and the stored value is
// never accessed concurrently (only the worker currently running the task
// touches it).
unsafe impl Send for TaskBody {}

impl TaskBody {
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(&TaskContext) + Send + 'static,
    {
        if size_of::<F>() <= INLINE_CAP && align_of::<F>() <= align_of::<usize>() {
            let mut storage = MaybeUninit::<[usize; INLINE_CAP / size_of::<usize>()]>::uninit();
            // Safety: the size/alignment checks above guarantee `storage`
            // has room and correct alignment for a `F`.
            unsafe {
                ptr::write(storage.as_mut_ptr().cast::<F>(), f);
            }
            Self {
                storage: Storage::Inline(storage),
                vtable: vtable_for::<F>(),
            }
        } else {
            let boxed = Box::new(f);
            Self {
                storage: Storage::Boxed(Box::into_raw(boxed).cast::<()>()),
                vtable: vtable_for::<F>(),
            }
        }
    }

    fn data_ptr(&mut self) -> *mut () {
        match &mut self.storage {
            Storage::Inline(buf) => buf.as_mut_ptr().cast::<()>(),
            Storage::Boxed(ptr) => *ptr,
        }
    }

    pub fn invoke(&mut self, ctx: &TaskContext) {
        let vtable = self.vtable;
        let ptr = self.data_ptr();
        // Safety: `ptr` was produced by `Self::new` for the `F` that
        // `vtable` was built for and hasn't been dropped; `invoke` is
        // called at most once per task (the state word only reaches
        // `RUNNING` once, per `TaskState::try_begin_run`).
        unsafe { (vtable.invoke)(ptr, ctx) }
    }

    pub fn source_id(&self) -> &'static str {
        (self.vtable.source_id)()
    }
}

impl Drop for TaskBody {
    fn drop(&mut self) {
        let vtable = self.vtable;
        match &mut self.storage {
            Storage::Inline(buf) => {
                let ptr = buf.as_mut_ptr().cast::<()>();
                // Safety: inline storage was initialized in `Self::new` and
                // has not yet been dropped.
                unsafe { (vtable.drop_inline)(ptr) }
            }
            Storage::Boxed(ptr) => {
                // Safety: `ptr` came from `Box::into_raw(Box::<F>::new(..))`
                // in `Self::new`, is not aliased, and is dropped at most
                // once here.
                unsafe { (vtable.drop_boxed)(*ptr) }
            }
        }
    }
}

/// Builds (once per monomorphization, via the `const` associated item
/// trick) the vtable for a concrete closure type `F`.
fn vtable_for<F: FnMut(&TaskContext) + Send + 'static>() -> &'static VTable {
    struct Holder<F>(std::marker::PhantomData<F>);
    impl<F: FnMut(&TaskContext) + Send + 'static> Holder<F> {
        const VTABLE: VTable = VTable {
            invoke: invoke_for::<F>,
            drop_inline: drop_inline_for::<F>,
            drop_boxed: drop_boxed_for::<F>,
            source_id: source_id_for::<F>,
        };
    }

    unsafe fn invoke_for<F: FnMut(&TaskContext) + Send + 'static>(
        ptr: *mut (),
        ctx: &TaskContext,
    ) {
        // Safety: ensured by `TaskBody::invoke`'s caller contract.
        let f = unsafe { &mut *ptr.cast::<F>() };
        f(ctx);
    }

    unsafe fn drop_inline_for<F>(ptr: *mut ()) {
        // Safety: ensured by `TaskBody::drop`'s `Storage::Inline` arm.
        unsafe { ptr::drop_in_place(ptr.cast::<F>()) }
    }

    unsafe fn drop_boxed_for<F>(ptr: *mut ()) {
        // Safety: ensured by `TaskBody::drop`'s `Storage::Boxed` arm.
        unsafe {
            drop(Box::from_raw(ptr.cast::<F>()));
        }
    }

    fn source_id_for<F>() -> &'static str {
        std::any::type_name::<F>()
    }

    &Holder::<F>::VTABLE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskAttrs, TaskContext, TaskRef};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dummy_task() -> TaskRef {
        TaskRef::new_detached(TaskBody::new(|_: &TaskContext| {}), TaskAttrs::new(), None)
    }

    #[test]
    fn inline_closure_runs_without_boxing_observably() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let mut body = TaskBody::new(move |_ctx: &TaskContext| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let task = dummy_task();
        let ctx = TaskContext::for_test(&task);
        body.invoke(&ctx);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn large_capture_spills_to_box_and_still_runs() {
        let big = [0u8; 256];
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let mut body = TaskBody::new(move |_ctx: &TaskContext| {
            let _ = big.len();
            c.fetch_add(1, Ordering::SeqCst);
        });
        let task = dummy_task();
        let ctx = TaskContext::for_test(&task);
        body.invoke(&ctx);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
