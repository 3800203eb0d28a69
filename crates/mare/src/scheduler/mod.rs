// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Scheduler state and the public launch surface (spec §3.5, §5): the
//! worker pool, the global submission queue, init/shutdown with nesting
//! depth, and the `launch`/`launch_into`/`add_to_group`/`cancel_group`
//! facades that tie task and group bookkeeping to the actual moment of
//! scheduling.

pub mod blocking;
pub mod gpu;
pub mod injector;
pub mod topology;
mod worker;

pub use gpu::{GpuEvent, GpuQueue, GpuRange};
pub use topology::{DefaultTopology, Topology};

use crate::error::{ApiError, ResourceError};
use crate::group::Group;
use crate::primitives::{Futex, LocalDeque, LocalStealer};
use crate::task::TaskRef;
use crate::unlaunched_cache;
use injector::GlobalQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

/// Configuration accepted by [`init`] (spec §5 "Configuration", §6
/// `MARE_RANDOM_SEED`).
pub struct Config {
    /// Worker count; `None` asks `topology` for `num_cores()`.
    pub num_workers: Option<usize>,
    /// CPU topology source; defaults to [`DefaultTopology`].
    pub topology: Arc<dyn Topology>,
    /// Optional GPU collaborator for `TaskFlags::GPU` tasks.
    pub gpu_queue: Option<Arc<dyn GpuQueue>>,
    /// Fixed PRNG seed for steal-victim selection, overriding
    /// `MARE_RANDOM_SEED`. Mostly for deterministic tests.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: None,
            topology: Arc::new(DefaultTopology),
            gpu_queue: None,
            seed: None,
        }
    }
}

impl Config {
    fn resolved_seed(&self) -> u64 {
        self.seed
            .or_else(|| std::env::var("MARE_RANDOM_SEED").ok().and_then(|s| s.parse().ok()))
            .unwrap_or(0x5eed_cafe_u64)
    }
}

/// State shared by every worker and dedicated thread in a running pool.
pub(crate) struct Shared {
    pub(crate) global: GlobalQueue,
    pub(crate) stealers: Vec<LocalStealer>,
    pub(crate) parked: Futex,
    pub(crate) shutdown: AtomicBool,
    pub(crate) gpu_queue: Option<Arc<dyn GpuQueue>>,
}

struct Runtime {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Runtime {
    fn start(config: &Config) -> Result<Self, ResourceError> {
        let num_workers = config.num_workers.unwrap_or_else(|| config.topology.num_cores()).max(1);
        let seed = config.resolved_seed();

        let locals: Vec<LocalDeque> = (0..num_workers).map(|_| LocalDeque::new()).collect();
        let stealers = locals.iter().map(LocalDeque::stealer).collect();

        let shared = Arc::new(Shared {
            global: GlobalQueue::new(),
            stealers,
            parked: Futex::new(),
            shutdown: AtomicBool::new(false),
            gpu_queue: config.gpu_queue.clone(),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for (id, local) in locals.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("mare-worker-{id}"))
                .spawn(move || worker::run(id, shared, local, seed.wrapping_add(id as u64)))
                .map_err(|err| ResourceError::new(format!("failed to spawn worker thread {id}: {err}")))?;
            workers.push(handle);
        }

        tracing::info!(num_workers, seed, "mare scheduler started");
        Ok(Self { shared, workers })
    }

    fn stop(self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.parked.wake_all();
        for handle in self.workers {
            let _ = handle.join();
        }
        tracing::info!("mare scheduler stopped");
    }
}

struct GlobalState {
    runtime: Option<Runtime>,
    depth: usize,
}

fn state() -> &'static Mutex<GlobalState> {
    static STATE: OnceLock<Mutex<GlobalState>> = OnceLock::new();
    STATE.get_or_init(|| {
        Mutex::new(GlobalState {
            runtime: None,
            depth: 0,
        })
    })
}

/// `init(config)`: idempotent per nesting depth (spec §5). The first call
/// actually starts the worker pool; every call increments a balanced
/// `init`/`shutdown` counter. Also registers the process-wide atexit and
/// pre-fork hooks exactly once, regardless of how many times `init` runs.
pub fn init(config: Config) -> Result<(), ResourceError> {
    register_process_hooks();
    let mut guard = state().lock().unwrap();
    if guard.runtime.is_none() {
        guard.runtime = Some(Runtime::start(&config)?);
    }
    guard.depth += 1;
    Ok(())
}

/// `shutdown()`: decrements the nesting counter; only the call that brings
/// it to zero actually closes submission, drains workers, and joins pool
/// threads.
pub fn shutdown() {
    let mut guard = state().lock().unwrap();
    guard.depth = guard.depth.saturating_sub(1);
    if guard.depth == 0 {
        if let Some(runtime) = guard.runtime.take() {
            drop(guard);
            runtime.stop();
        }
    }
}

/// Ensures a pool is running, auto-starting one with default [`Config`] if
/// `launch`/`launch_into` is called before any explicit `init` — this
/// implicit start counts as one `init`/`shutdown` pair like any other.
fn ensure_started() {
    let mut guard = state().lock().unwrap();
    if guard.runtime.is_none() {
        register_process_hooks();
        match Runtime::start(&Config::default()) {
            Ok(rt) => {
                guard.runtime = Some(rt);
                guard.depth += 1;
            }
            Err(err) => panic!("mare: failed to auto-start scheduler: {err}"),
        }
    }
}

/// Returns a clone of the running pool's shared state, auto-starting a
/// pool with default config first if none is running yet. Always returns
/// an owned `Arc` (never a borrow guarded by the state lock) so callers are
/// free to hand it to a freshly spawned thread without risking a
/// self-deadlock on `state()`'s mutex.
fn shared_handle() -> Arc<Shared> {
    ensure_started();
    let guard = state().lock().unwrap();
    Arc::clone(&guard.runtime.as_ref().expect("runtime just ensured").shared)
}

/// `launch(task)`: clears `UNLAUNCHED`, removes the task from the
/// unlaunched-task cache (a no-op if it was never cached), and either
/// enqueues it now or leaves it to be enqueued when its last predecessor
/// finishes. Group bookkeeping (`task_launched`) happens here, once, for
/// every group the task was already added to via [`add_to_group`] — *not*
/// when it was added, per spec §4.3/§4.5.
pub fn launch(task: TaskRef) -> TaskRef {
    unlaunched_cache::global().remove(&task);
    let became_ready = task.launch_ready();
    if task.is_terminal() {
        return task;
    }
    for group in task.live_groups() {
        group.task_launched();
    }
    if became_ready {
        let shared = shared_handle();
        submit(task.clone(), &shared);
    }
    task
}

/// `launch_into(groups, task)`: equivalent to calling [`add_to_group`] then
/// [`launch`] in one step. Fails if any of `groups` is already canceled,
/// without launching the task (spec's testable property: cancellation
/// reaching a task either cancels it immediately or the launch fails —
/// never leaves it RUNNING).
pub fn launch_into(groups: &[Group], task: TaskRef) -> Result<TaskRef, ApiError> {
    if groups.iter().any(Group::is_canceled) {
        task.request_cancel();
        return Ok(task);
    }
    task.record_groups(groups);
    Ok(launch(task))
}

/// `add_to_group(groups, task)`: records group membership on a task that
/// has *not* been launched yet, caching it in the unlaunched-task cache so
/// a subsequent `cancel(group)` can still reach it (spec §4.3). Fails iff
/// any of `groups` is already canceled.
pub fn add_to_group(groups: &[Group], task: &TaskRef) -> Result<(), ApiError> {
    if task.stage() != crate::primitives::Stage::Unlaunched {
        return Err(ApiError::invalid_handle(
            "add_to_group called on a task that has already launched",
        ));
    }
    if groups.iter().any(Group::is_canceled) {
        return Err(ApiError::group_canceled(
            "cannot add a task to an already-canceled group",
        ));
    }
    task.record_groups(groups);
    unlaunched_cache::global().insert(task, &task.groups())
}

/// `cancel(group)`: marks the group canceled and sweeps the unlaunched-task
/// cache for any current member that hasn't launched yet. Already-running
/// or already-launched members are reached through their own `cancel_req`
/// observation points, not through this call.
pub fn cancel_group(group: &Group) {
    group.cancel();
    unlaunched_cache::global().cancel_all(group);
}

fn submit(task: TaskRef, shared: &Arc<Shared>) {
    crate::logging::emit(crate::logging::Event::TaskLaunched {
        task: task.id().as_u64(),
        name: None,
    });
    if task.attrs().is_blocking() || task.attrs().is_gpu() {
        blocking::spawn(task, Arc::clone(shared));
        return;
    }
    shared.global.push(task);
    shared.parked.wake(1);
}

/// The currently configured GPU collaborator, if any (spec §1).
pub fn gpu_queue() -> Option<Arc<dyn GpuQueue>> {
    shared_handle().gpu_queue.clone()
}

fn is_running() -> bool {
    state().lock().unwrap().runtime.is_some()
}

static HOOKS_REGISTERED: std::sync::Once = std::sync::Once::new();

fn register_process_hooks() {
    HOOKS_REGISTERED.call_once(|| {
        #[cfg(unix)]
        unsafe {
            libc::atexit(atexit_shutdown);
            libc::pthread_atfork(Some(before_fork), None, None);
        }
    });
}

#[cfg(unix)]
extern "C" fn atexit_shutdown() {
    // Flush by forcing a full teardown regardless of nesting depth (spec
    // §5 "An atexit hook calls shutdown to flush logs").
    let mut guard = state().lock().unwrap();
    guard.depth = guard.depth.min(1);
    drop(guard);
    shutdown();
}

#[cfg(unix)]
extern "C" fn before_fork() {
    if is_running() {
        eprintln!("mare: fork() is unsupported while the scheduler pool is running");
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskAttrs, TaskBody, TaskContext};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn spin_task(counter: Arc<AtomicUsize>) -> TaskRef {
        TaskRef::new_detached(
            TaskBody::new(move |_: &TaskContext| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            TaskAttrs::new(),
            None,
        )
    }

    #[test]
    fn launch_runs_a_simple_task() {
        init(Config {
            num_workers: Some(2),
            ..Config::default()
        })
        .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let task = launch(spin_task(Arc::clone(&counter)));
        task.wait_for();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        shutdown();
    }

    #[test]
    fn after_chain_runs_in_order() {
        init(Config {
            num_workers: Some(2),
            ..Config::default()
        })
        .unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = Arc::clone(&order);
        let o2 = Arc::clone(&order);
        let a = TaskRef::new_detached(
            TaskBody::new(move |_: &TaskContext| o1.lock().unwrap().push('a')),
            TaskAttrs::new(),
            None,
        );
        let b = TaskRef::new_detached(
            TaskBody::new(move |_: &TaskContext| o2.lock().unwrap().push('b')),
            TaskAttrs::new(),
            None,
        );
        TaskRef::after(&a, &b).unwrap();
        let b = launch(b);
        let a = launch(a);
        a.wait_for();
        b.wait_for();
        assert_eq!(*order.lock().unwrap(), vec!['a', 'b']);
        shutdown();
    }

    #[test]
    fn group_wait_for_returns_after_all_members_finish() {
        init(Config {
            num_workers: Some(2),
            ..Config::default()
        })
        .unwrap();
        let group = Group::new(Some("g".into()));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let t = spin_task(Arc::clone(&counter));
            launch_into(&[group.clone()], t).unwrap();
        }
        group.wait_for();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        shutdown();
    }

    #[test]
    fn add_to_group_then_launch_counts_as_one_group_membership() {
        init(Config {
            num_workers: Some(2),
            ..Config::default()
        })
        .unwrap();
        let group = Group::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        let task = spin_task(Arc::clone(&counter));
        add_to_group(&[group.clone()], &task).unwrap();
        assert_eq!(group.tasks_outstanding(), 0, "not counted until actually launched");
        let task = launch(task);
        task.wait_for();
        group.wait_for();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        shutdown();
    }

    #[test]
    fn canceling_group_before_launch_reaches_unlaunched_member() {
        init(Config {
            num_workers: Some(2),
            ..Config::default()
        })
        .unwrap();
        let group = Group::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        let task = spin_task(Arc::clone(&counter));
        add_to_group(&[group.clone()], &task).unwrap();
        cancel_group(&group);
        let task = launch(task);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0, "canceled before it ever ran");
        assert!(task.is_terminal());
        shutdown();
    }
}
