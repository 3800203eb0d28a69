// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The process-wide unlaunched-task cache (spec §4.3): a side index that
//! lets a canceled group reach tasks that were added to it before being
//! launched, since groups themselves hold only a signature and a count,
//! never member pointers.
//!
//! Entries live in a `sharded_slab::Slab` (the real, published crate — the
//! teacher's own vendoring attempt at this, `libs/ksharded-slab`, was an
//! incomplete fork missing `lib.rs`). The slab gives O(1) remove-by-key;
//! sharding for concurrent insert/remove is layered on top, keyed by the
//! hash of the group signature the task was inserted under, via a fixed
//! number of `spin::Mutex`-guarded shard index vectors.
use crate::group::Group;
use crate::primitives::Signature;
use crate::task::TaskRef;
use sharded_slab::Slab;
use spin::Mutex as SpinMutex;
use std::sync::OnceLock;

const SHARDS: usize = 16;

/// The single process-wide unlaunched-task cache. There is exactly one of
/// these regardless of how many times `scheduler::init`/`shutdown` cycle,
/// mirroring `group::allocator()`'s process-wide bit allocator: group bits
/// and cache entries both need to outlive any one scheduler instance.
pub fn global() -> &'static UnlaunchedCache {
    static CACHE: OnceLock<UnlaunchedCache> = OnceLock::new();
    CACHE.get_or_init(UnlaunchedCache::new)
}

struct Entry {
    task: TaskRef,
    signature: Signature,
}

pub struct UnlaunchedCache {
    slab: Slab<Entry>,
    shards: Vec<SpinMutex<Vec<usize>>>,
}

impl UnlaunchedCache {
    pub fn new() -> Self {
        Self {
            slab: Slab::new(),
            shards: (0..SHARDS).map(|_| SpinMutex::new(Vec::new())).collect(),
        }
    }

    fn shard_for(signature: &Signature) -> usize {
        let bucket = signature.shard_hash() % SHARDS as u64;
        usize::try_from(bucket).expect("SHARDS fits in usize")
    }

    /// Caches an unlaunched task under the folded signature of every group
    /// it belongs to (spec §4.3). Callers are responsible for rejecting
    /// already-canceled groups before a task ever reaches this point — by
    /// the time a task sits here, sweeping is the only way a cancellation
    /// can still reach it, so there is nothing left here to validate about
    /// group liveness.
    pub fn insert(&self, task: &TaskRef, signature: &Signature) -> Result<(), crate::error::ApiError> {
        if signature.is_empty() {
            return Ok(());
        }
        if !task.set_in_utcache() {
            // Task already reached a terminal stage concurrently; nothing
            // to cache.
            return Ok(());
        }
        let signature = signature.clone();
        let shard = Self::shard_for(&signature);
        let key = self
            .slab
            .insert(Entry {
                task: task.clone(),
                signature,
            })
            .expect("unlaunched-task cache exhausted its key space");
        self.shards[shard].lock().push(key);
        task.set_cache_entry((shard, key));
        Ok(())
    }

    /// `remove(task)`: idempotent, called on launch or cancel.
    pub fn remove(&self, task: &TaskRef) {
        let Some((shard, key)) = task.take_cache_entry() else {
            return;
        };
        self.shards[shard].lock().retain(|k| *k != key);
        self.slab.remove(key);
        task.clear_in_utcache();
    }

    /// `cancel_all(group)`: atomically sweeps every cached task whose
    /// signature is a superset of `group`'s and transitions each to
    /// CANCELED. Sweeps take per-shard locks one at a time rather than a
    /// single process-wide lock.
    pub fn cancel_all(&self, group: &Group) {
        let group_sig = group.signature();
        for shard_idx in 0..SHARDS {
            let keys: Vec<usize> = self.shards[shard_idx].lock().clone();
            for key in keys {
                let Some(entry) = self.slab.get(key) else {
                    continue;
                };
                if entry.signature.is_superset_of(group_sig) {
                    let task = entry.task.clone();
                    drop(entry);
                    task.request_cancel();
                    self.remove(&task);
                }
            }
        }
    }
}

impl Default for UnlaunchedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskAttrs, TaskBody, TaskContext};

    fn dummy_task() -> TaskRef {
        TaskRef::new_detached(TaskBody::new(|_: &TaskContext| {}), TaskAttrs::new(), None)
    }

    #[test]
    fn cancel_all_reaches_unlaunched_member() {
        let cache = UnlaunchedCache::new();
        let group = Group::new(Some("g".into()));
        let task = dummy_task();
        cache.insert(&task, group.signature()).unwrap();
        assert!(task.is_in_utcache());

        group.cancel();
        cache.cancel_all(&group);

        assert_eq!(task.stage(), crate::primitives::Stage::Canceled);
        assert!(!task.is_in_utcache());
    }

    #[test]
    fn remove_is_idempotent() {
        let cache = UnlaunchedCache::new();
        let group = Group::new(None);
        let task = dummy_task();
        cache.insert(&task, group.signature()).unwrap();
        cache.remove(&task);
        cache.remove(&task);
        assert!(!task.is_in_utcache());
    }

    #[test]
    fn insert_with_empty_signature_is_a_no_op() {
        let cache = UnlaunchedCache::new();
        let task = dummy_task();
        cache.insert(&task, &Signature::empty()).unwrap();
        assert!(!task.is_in_utcache());
    }
}
