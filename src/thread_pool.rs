//! Thread Pool Executor
//!
//! Worker threads draining a single cost-priority task queue. One mutex
//! guards the queue; tasks execute with the lock released. Task groups are
//! cache-padded atomic counters; `wait` participates by executing queued
//! tasks until its group drains, then yield-spins. Between `step_begin` and
//! `step_end` the pool can busy-wait: idle workers yield-spin on an atomic
//! pending counter instead of parking, removing wakeup latency from short
//! phases.
//!
//! Queue order is not deterministic and does not need to be: all observable
//! side effects go through the deferred-event merges.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_utils::CachePadded;

use crate::executor::{
    partition_range, PartitionedRange, StepTask, TaskExecutor, TaskGroupId, ThreadContext,
};
use crate::profile::StepProfile;
use crate::settings::{
    MAX_CONCURRENT_TASK_GROUPS, MAX_THREAD_POOL_THREADS, PARTITION_RANGE_MIN_SIZE,
};

struct PendingTask {
    cost: u32,
    group: TaskGroupId,
    task: StepTask,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}
impl Eq for PendingTask {}
impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.cost.cmp(&other.cost)
    }
}

struct PoolState {
    pending: BinaryHeap<PendingTask>,
    group_in_use: [bool; MAX_CONCURRENT_TASK_GROUPS],
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    worker_cond: Condvar,
    /// Mirror of the queue length, readable without the lock while
    /// busy-waiting.
    pending_count: AtomicUsize,
    busy_wait: AtomicBool,
    /// Outstanding-task counters, one per group slot.
    groups: [CachePadded<AtomicU32>; MAX_CONCURRENT_TASK_GROUPS],
}

/// The thread pool. Owns its workers; the constructing thread is thread 0
/// and participates through [`ThreadPool::wait`].
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool with `total_threads` execution threads, including the
    /// caller. `total_threads - 1` workers are spawned, clamped to the
    /// compile-time maximum.
    #[must_use]
    pub fn new(total_threads: usize) -> Self {
        let worker_count = total_threads
            .saturating_sub(1)
            .min(MAX_THREAD_POOL_THREADS);

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                pending: BinaryHeap::new(),
                group_in_use: [false; MAX_CONCURRENT_TASK_GROUPS],
                shutdown: false,
            }),
            worker_cond: Condvar::new(),
            pending_count: AtomicUsize::new(0),
            busy_wait: AtomicBool::new(false),
            groups: core::array::from_fn(|_| CachePadded::new(AtomicU32::new(0))),
        });

        let threads = (0..worker_count)
            .map(|i| {
                let shared = Arc::clone(&shared);
                let thread_id = (1 + i) as u32;
                std::thread::Builder::new()
                    .name(format!("flux2d-worker-{thread_id}"))
                    .spawn(move || worker_main(&shared, thread_id))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, threads }
    }

    /// Create a pool sized to the host: one thread per available core.
    #[must_use]
    pub fn with_host_threads() -> Self {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(cores)
    }

    /// Total threads available to execute tasks (workers plus the caller).
    #[must_use]
    pub fn thread_count(&self) -> u32 {
        self.threads.len() as u32 + 1
    }

    /// Wake the workers to busy-wait for tasks until [`stop_busy_waiting`]
    /// is called.
    ///
    /// [`stop_busy_waiting`]: ThreadPool::stop_busy_waiting
    pub fn start_busy_waiting(&self) {
        {
            let _state = self.shared.state.lock().unwrap();
            self.shared.busy_wait.store(true, Ordering::Relaxed);
        }
        self.shared.worker_cond.notify_all();
    }

    /// Let idle workers park on the condition variable again.
    pub fn stop_busy_waiting(&self) {
        let _state = self.shared.state.lock().unwrap();
        self.shared.busy_wait.store(false, Ordering::Relaxed);
    }

    /// Allocate a task group slot.
    pub fn create_task_group(&self) -> TaskGroupId {
        let mut state = self.shared.state.lock().unwrap();
        for (i, in_use) in state.group_in_use.iter_mut().enumerate() {
            if !*in_use {
                *in_use = true;
                debug_assert_eq!(self.shared.groups[i].load(Ordering::Relaxed), 0);
                return i as TaskGroupId;
            }
        }
        panic!(
            "more than {MAX_CONCURRENT_TASK_GROUPS} concurrent task groups"
        );
    }

    /// Release a task group slot. The group must be fully drained.
    pub fn destroy_task_group(&self, group: TaskGroupId) {
        let mut state = self.shared.state.lock().unwrap();
        assert_eq!(
            self.shared.groups[group as usize].load(Ordering::Relaxed),
            0,
            "destroying a task group with outstanding tasks"
        );
        state.group_in_use[group as usize] = false;
    }

    /// Submit one task. Wakes a single worker.
    pub fn submit_task(&self, group: TaskGroupId, task: StepTask) {
        {
            let mut state = self.shared.state.lock().unwrap();
            let cost = task.cost;
            state.pending.push(PendingTask { cost, group, task });
            self.shared
                .pending_count
                .store(state.pending.len(), Ordering::Relaxed);
            self.shared.groups[group as usize].fetch_add(1, Ordering::Relaxed);
        }
        self.shared.worker_cond.notify_one();
    }

    /// Submit a batch of tasks. Wakes every worker.
    pub fn submit_tasks(&self, group: TaskGroupId, tasks: &[StepTask]) {
        if tasks.is_empty() {
            return;
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            for task in tasks {
                state.pending.push(PendingTask {
                    cost: task.cost,
                    group,
                    task: *task,
                });
            }
            self.shared
                .pending_count
                .store(state.pending.len(), Ordering::Relaxed);
            self.shared.groups[group as usize].fetch_add(tasks.len() as u32, Ordering::Relaxed);
        }
        self.shared.worker_cond.notify_all();
    }

    /// Participating wait: run queued tasks until the group drains, then
    /// yield-spin for any stragglers still executing on workers. Must only
    /// be called from the stepping thread.
    pub fn wait(&self, group: TaskGroupId, ctx: &ThreadContext) {
        debug_assert_eq!(ctx.thread_id, 0, "workers must not wait on task groups");
        let group_counter = &self.shared.groups[group as usize];

        let mut state = self.shared.state.lock().unwrap();
        loop {
            if group_counter.load(Ordering::Acquire) == 0 {
                return;
            }

            let Some(next) = state.pending.pop() else {
                drop(state);
                // Tasks of this group are in flight on workers.
                while group_counter.load(Ordering::Acquire) > 0 {
                    std::thread::yield_now();
                }
                return;
            };
            self.shared
                .pending_count
                .store(state.pending.len(), Ordering::Relaxed);
            drop(state);

            next.task.execute(ctx);
            // This is not necessarily the group being waited on.
            self.shared.groups[next.group as usize].fetch_sub(1, Ordering::Release);

            state = self.shared.state.lock().unwrap();
        }
    }

    fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            // Shutting down in the middle of processing tasks is not
            // supported.
            assert!(
                state.pending.is_empty(),
                "thread pool shut down with pending tasks"
            );
            state.shutdown = true;
            self.shared.busy_wait.store(false, Ordering::Relaxed);
        }
        self.shared.worker_cond.notify_all();

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(shared: &PoolShared, thread_id: u32) {
    let ctx = ThreadContext { thread_id };

    let mut state = shared.state.lock().unwrap();
    loop {
        while state.pending.is_empty() {
            if shared.busy_wait.load(Ordering::Relaxed) {
                drop(state);
                while shared.pending_count.load(Ordering::Relaxed) == 0
                    && shared.busy_wait.load(Ordering::Relaxed)
                {
                    std::thread::yield_now();
                }
                state = shared.state.lock().unwrap();
                // The queue is re-checked now that the lock is held; spurious
                // wakeups fall back into the wait loop.
            } else {
                state = shared
                    .worker_cond
                    .wait_while(state, |s| {
                        !s.shutdown
                            && s.pending.is_empty()
                            && !shared.busy_wait.load(Ordering::Relaxed)
                    })
                    .unwrap();
            }

            if state.shutdown {
                assert!(
                    state.pending.is_empty(),
                    "thread pool shut down with pending tasks"
                );
                return;
            }
        }

        let next = state.pending.pop().unwrap();
        shared
            .pending_count
            .store(state.pending.len(), Ordering::Relaxed);
        drop(state);

        next.task.execute(&ctx);
        shared.groups[next.group as usize].fetch_sub(1, Ordering::Release);

        state = shared.state.lock().unwrap();
    }
}

/// A [`TaskExecutor`] backed by a [`ThreadPool`].
pub struct ThreadPoolExecutor {
    pool: ThreadPool,
    target_range_task_count: u32,
    continuous_busy_wait: bool,
}

impl ThreadPoolExecutor {
    /// Create an executor with `total_threads` execution threads (including
    /// the stepping thread).
    #[must_use]
    pub fn new(total_threads: usize) -> Self {
        let pool = ThreadPool::new(total_threads);
        let target_range_task_count = 2 * pool.thread_count();
        Self {
            pool,
            target_range_task_count,
            continuous_busy_wait: false,
        }
    }

    /// Create an executor sized to the host.
    #[must_use]
    pub fn with_host_threads() -> Self {
        let pool = ThreadPool::with_host_threads();
        let target_range_task_count = 2 * pool.thread_count();
        Self {
            pool,
            target_range_task_count,
            continuous_busy_wait: false,
        }
    }

    /// Keep workers busy-waiting between steps. Lowest latency, at the cost
    /// of spinning cores while the simulation is idle.
    pub fn set_continuous_busy_wait(&mut self, flag: bool) {
        self.continuous_busy_wait = flag;
        if flag {
            self.pool.start_busy_waiting();
        } else {
            self.pool.stop_busy_waiting();
        }
    }

    /// Target number of range tasks per partitioned submission.
    pub fn set_target_range_task_count(&mut self, value: u32) {
        self.target_range_task_count = value.max(1);
    }

    /// Access the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

impl TaskExecutor for ThreadPoolExecutor {
    fn thread_count(&self) -> u32 {
        self.pool.thread_count()
    }

    fn step_begin(&mut self) {
        self.pool.start_busy_waiting();
    }

    fn step_end(&mut self, _profile: &StepProfile) {
        if !self.continuous_busy_wait {
            self.pool.stop_busy_waiting();
        }
    }

    fn create_task_group(&mut self) -> TaskGroupId {
        self.pool.create_task_group()
    }

    fn destroy_task_group(&mut self, group: TaskGroupId) {
        self.pool.destroy_task_group(group);
    }

    fn partition_range(&self, begin: u32, end: u32, output: &mut PartitionedRange) {
        partition_range(
            begin,
            end,
            self.target_range_task_count,
            PARTITION_RANGE_MIN_SIZE,
            output,
        );
    }

    fn submit_task(&mut self, group: TaskGroupId, task: StepTask) {
        self.pool.submit_task(group, task);
    }

    fn submit_tasks(&mut self, group: TaskGroupId, tasks: &[StepTask]) {
        self.pool.submit_tasks(group, tasks);
    }

    fn wait(&mut self, group: TaskGroupId, ctx: &ThreadContext) {
        self.pool.wait(group, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_lifecycle() {
        let pool = ThreadPool::new(2);
        let a = pool.create_task_group();
        let b = pool.create_task_group();
        assert_ne!(a, b);
        pool.destroy_task_group(a);
        let c = pool.create_task_group();
        assert_eq!(a, c);
        pool.destroy_task_group(b);
        pool.destroy_task_group(c);
    }

    #[test]
    fn test_heap_orders_by_cost() {
        let mut heap = BinaryHeap::new();
        for cost in [5u32, 50, 1, 20] {
            heap.push(PendingTask {
                cost,
                group: 0,
                task: crate::world::null_task(cost),
            });
        }
        let order: Vec<u32> = std::iter::from_fn(|| heap.pop().map(|t| t.cost)).collect();
        assert_eq!(order, vec![50, 20, 5, 1]);
    }

    #[test]
    fn test_busy_wait_toggle() {
        let pool = ThreadPool::new(4);
        pool.start_busy_waiting();
        assert!(pool.shared.busy_wait.load(Ordering::Relaxed));
        pool.stop_busy_waiting();
        assert!(!pool.shared.busy_wait.load(Ordering::Relaxed));
    }

    #[test]
    fn test_thread_count_includes_user_thread() {
        let pool = ThreadPool::new(1);
        assert_eq!(pool.thread_count(), 1);
        let pool = ThreadPool::new(4);
        assert_eq!(pool.thread_count(), 4);
    }
}
