// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Groups and the join algebra (spec §3.2, §4.2). Groups never hold task
//! pointers — only a count and a signature (spec §9 "Smart-pointer
//! cycles") — so the cancel path reaches unlaunched members through the
//! side-indexed [`crate::unlaunched_cache`] instead of a back-pointer list.

use crate::primitives::{Signature, SignatureAllocator};
use crate::unlaunched_cache;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

fn allocator() -> &'static SignatureAllocator {
    static ALLOC: OnceLock<SignatureAllocator> = OnceLock::new();
    ALLOC.get_or_init(SignatureAllocator::new)
}

struct Inner {
    name: Option<String>,
    signature: Signature,
    tasks_outstanding: AtomicUsize,
    canceled: AtomicBool,
    done: Mutex<()>,
    cv: Condvar,
    /// First exception stored by a member task (spec §7: "Groups
    /// accumulate exceptions from members; `wait_for(group)` rethrows the
    /// first stored exception").
    first_failure: Mutex<Option<Box<dyn std::any::Any + Send>>>,
}

/// A named, cancellable, waitable collection of tasks.
#[derive(Clone)]
pub struct Group(Arc<Inner>);

impl Group {
    pub fn new(name: Option<String>) -> Self {
        Self(Arc::new(Inner {
            name,
            signature: allocator().alloc(),
            tasks_outstanding: AtomicUsize::new(0),
            canceled: AtomicBool::new(false),
            done: Mutex::new(()),
            cv: Condvar::new(),
            first_failure: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    pub fn is_canceled(&self) -> bool {
        self.0.canceled.load(Ordering::Acquire)
    }

    pub fn tasks_outstanding(&self) -> usize {
        self.0.tasks_outstanding.load(Ordering::Acquire)
    }

    /// `A & B`: a virtual group whose signature is the union of bits.
    /// Membership in the result is a superset test, never materialized as
    /// its own concrete group identity — calling `cancel`/further joins on
    /// the result operates purely on the union signature.
    pub fn join(&self, other: &Group) -> VirtualGroup {
        VirtualGroup {
            signature: self.0.signature.union(&other.0.signature),
        }
    }

    /// Called by the scheduler/unlaunched-cache path when a task is
    /// launched into this group.
    pub(crate) fn task_launched(&self) {
        self.0.tasks_outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Called by the scheduler when a member task reaches a terminal
    /// stage. Wakes any `wait_for(group)` callers once the count reaches
    /// zero.
    pub(crate) fn task_finished(&self, failure: Option<Box<dyn std::any::Any + Send>>) {
        if let Some(failure) = failure {
            let mut slot = self.0.first_failure.lock().unwrap();
            if slot.is_none() {
                *slot = Some(failure);
            }
        }
        let prev = self.0.tasks_outstanding.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            let _guard = self.0.done.lock().unwrap();
            self.0.cv.notify_all();
        }
    }

    /// `cancel(group)`: one-shot, never clears. Reaches every member that
    /// hasn't launched yet by sweeping the process-wide unlaunched-task
    /// cache; a member that is already launched or running observes
    /// `is_canceled()` at its own cancel-request path instead.
    pub fn cancel(&self) {
        self.0.canceled.store(true, Ordering::Release);
        unlaunched_cache::global().cancel_all(self);
        crate::logging::emit(crate::logging::Event::GroupCanceled {
            group: self.0.name.as_deref(),
        });
    }

    /// `wait_for(group)`: blocks until `tasks_outstanding` reaches zero,
    /// then rethrows the first stored member exception, if any.
    pub fn wait_for(&self) {
        let guard = self.0.done.lock().unwrap();
        let _unused = self
            .0
            .cv
            .wait_while(guard, |()| self.0.tasks_outstanding.load(Ordering::Acquire) > 0)
            .unwrap();
        if let Some(failure) = self.0.first_failure.lock().unwrap().take() {
            std::panic::resume_unwind(failure);
        }
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Group {}

/// The result of `A & B`. Not independently cancelable or waitable as a
/// *new* group identity (it doesn't own a bit or a task counter); `wait_for`
/// on a join is defined in terms of its constituents per spec §4.2, so
/// `VirtualGroup` only exposes the signature for membership tests and
/// further joins.
#[derive(Clone)]
pub struct VirtualGroup {
    signature: Signature,
}

impl VirtualGroup {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn join(&self, other: &Group) -> VirtualGroup {
        VirtualGroup {
            signature: self.signature.union(&other.0.signature),
        }
    }

    pub fn join_virtual(&self, other: &VirtualGroup) -> VirtualGroup {
        VirtualGroup {
            signature: self.signature.union(&other.signature),
        }
    }

    pub fn contains(&self, task_signature: &Signature) -> bool {
        task_signature.is_superset_of(&self.signature)
    }
}

impl std::ops::BitAnd for &Group {
    type Output = VirtualGroup;
    fn bitand(self, rhs: &Group) -> VirtualGroup {
        self.join(rhs)
    }
}

impl std::ops::BitAnd<&Group> for VirtualGroup {
    type Output = VirtualGroup;
    fn bitand(self, rhs: &Group) -> VirtualGroup {
        self.join(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_membership_is_superset_test() {
        let a = Group::new(Some("a".into()));
        let b = Group::new(Some("b".into()));
        let joined = a.join(&b);

        let mut member_sig = a.signature().clone();
        member_sig.union_assign(b.signature());
        assert!(joined.contains(&member_sig));

        assert!(!joined.contains(a.signature()));
    }

    #[test]
    fn wait_for_returns_once_outstanding_reaches_zero() {
        let g = Group::new(None);
        g.task_launched();
        g.task_launched();
        assert_eq!(g.tasks_outstanding(), 2);
        g.task_finished(None);
        g.task_finished(None);
        g.wait_for();
        assert_eq!(g.tasks_outstanding(), 0);
    }

    #[test]
    fn cancel_is_one_shot_and_sticky() {
        let g = Group::new(None);
        assert!(!g.is_canceled());
        g.cancel();
        assert!(g.is_canceled());
        g.cancel();
        assert!(g.is_canceled());
    }
}
