//! Task Executor Interface
//!
//! The strategy surface between the step pipeline and whatever runs its
//! tasks. The pipeline describes work as [`StepTask`] values — a tagged kind
//! plus a world pointer valid for the current phase — and hands them to a
//! [`TaskExecutor`]. The bundled implementations are
//! [`ThreadPoolExecutor`](crate::thread_pool::ThreadPoolExecutor) and the
//! trivial [`SerialExecutor`] used by tests and single-threaded hosts.
//!
//! Task ordering inside a phase is explicitly not deterministic; determinism
//! is provided by the deferred-event merges between phases.

use crate::profile::StepProfile;
use crate::settings::{PARTITION_RANGE_MAX_OUTPUT, PARTITION_RANGE_MIN_SIZE};
use crate::world::WorldPtr;

/// Identifies a task group created by an executor.
pub type TaskGroupId = u32;

/// Per-thread data passed into every task execution.
#[derive(Clone, Copy, Debug)]
pub struct ThreadContext {
    /// Executing thread id. The stepping thread is 0; pool workers are
    /// `1..thread_count`.
    pub thread_id: u32,
}

/// A contiguous index range `[begin, end)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Range {
    /// First index.
    pub begin: u32,
    /// One past the last index.
    pub end: u32,
}

impl Range {
    /// Number of items in the range.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    /// Is the range empty?
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// A set of contiguous ranges produced by [`partition_range`].
#[derive(Clone, Copy, Debug)]
pub struct PartitionedRange {
    /// The ranges; only the first `count` are valid.
    pub ranges: [Range; PARTITION_RANGE_MAX_OUTPUT],
    /// Number of valid ranges.
    pub count: u32,
}

impl Default for PartitionedRange {
    fn default() -> Self {
        Self {
            ranges: [Range::default(); PARTITION_RANGE_MAX_OUTPUT],
            count: 0,
        }
    }
}

impl core::ops::Index<usize> for PartitionedRange {
    type Output = Range;

    fn index(&self, i: usize) -> &Range {
        &self.ranges[i]
    }
}

/// Evenly divide `[begin, end)` into at most `target_count` contiguous
/// ranges. Output sizes differ by at most one, and no range is smaller than
/// `min_size` unless the whole input is.
pub fn partition_range(
    begin: u32,
    end: u32,
    target_count: u32,
    min_size: u32,
    output: &mut PartitionedRange,
) {
    output.count = 0;
    if end <= begin {
        return;
    }

    let len = end - begin;
    let mut target = target_count
        .min(PARTITION_RANGE_MAX_OUTPUT as u32)
        .max(1);
    if min_size > 0 {
        target = target.min((len / min_size).max(1));
    }

    let base = len / target;
    let remainder = len % target;

    let mut cursor = begin;
    for i in 0..target {
        let size = base + u32::from(i < remainder);
        output.ranges[i as usize] = Range {
            begin: cursor,
            end: cursor + size,
        };
        cursor += size;
    }
    debug_assert_eq!(cursor, end);
    output.count = target;
}

/// Which per-thread buffers a sort task orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortSet {
    /// Begin/end/destroy/pre-solve buffers produced by the collide phase.
    Collides,
    /// Deferred contact creations produced by a pair sweep.
    Creates,
    /// Deferred proxy moves produced by fixture synchronization.
    Moves,
    /// Deferred post-solves produced by the solve phase.
    PostSolves,
}

/// The work items of the step pipeline.
#[derive(Clone, Copy, Debug)]
pub enum TaskKind {
    /// Narrow-phase update over a slice of the contact order array.
    Collide(Range),
    /// Broad-phase pair sweep over a slice of the move buffer.
    FindNewContacts(Range),
    /// Swept-AABB generation over a slice of the non-static body array.
    GenerateMoveProxies(Range),
    /// Clear island/TOI flags on a slice of the contact order array. The
    /// TOI prefix also resets cached impact times.
    ResetContactFlags {
        /// Slice of the order array (prefix- or suffix-relative).
        range: Range,
        /// True when the slice lies in the TOI prefix.
        toi: bool,
    },
    /// Clear island flags and sweep `alpha0` on a slice of the non-static
    /// body array.
    ResetBodyFlags(Range),
    /// Sort one thread's deferred buffers by their merge keys.
    SortBuffers {
        /// Buffer owner.
        thread: u32,
        /// Which buffers to sort.
        set: SortSet,
    },
    /// Solve a batch of islands.
    Solve {
        /// The batch, owned by the stepping world for the phase's duration.
        batch: SolveHandle,
    },
}

/// Opaque handle to a batch of islands. Valid from submission until the
/// solve phase's `wait` returns.
#[derive(Clone, Copy, Debug)]
pub struct SolveHandle(pub(crate) *const crate::island::SolveBatch);

/// A schedulable unit: a task kind bound to its world.
#[derive(Clone, Copy, Debug)]
pub struct StepTask {
    pub(crate) world: WorldPtr,
    /// What to do.
    pub kind: TaskKind,
    /// Estimated execution cost; higher-cost tasks should run first.
    pub cost: u32,
}

// Safety: the pointers inside a task (the world, a solve batch) are valid
// and conform to the phase-disjointness rules from submission until the
// phase's wait returns, which is the only window in which executors run
// tasks.
unsafe impl Send for StepTask {}
unsafe impl Sync for StepTask {}

/// The executor strategy interface.
///
/// `submit_task`/`submit_tasks` must eventually execute every task exactly
/// once, each before the matching `wait` returns. `wait` is only ever called
/// from the stepping thread (context thread id 0) and is expected to
/// *participate*: execute queued tasks rather than block idle.
pub trait TaskExecutor {
    /// Total number of threads that may execute tasks, including the
    /// stepping thread.
    fn thread_count(&self) -> u32;

    /// Called when a world step begins.
    fn step_begin(&mut self) {}

    /// Called when a world step ends, with the completed profile.
    fn step_end(&mut self, profile: &StepProfile) {
        let _ = profile;
    }

    /// Create a task group to submit against.
    fn create_task_group(&mut self) -> TaskGroupId;

    /// Destroy a task group. All of its tasks must have completed.
    fn destroy_task_group(&mut self, group: TaskGroupId);

    /// Partition a range into per-task sub-ranges.
    fn partition_range(&self, begin: u32, end: u32, output: &mut PartitionedRange);

    /// Submit a single task.
    fn submit_task(&mut self, group: TaskGroupId, task: StepTask);

    /// Submit a batch of tasks.
    fn submit_tasks(&mut self, group: TaskGroupId, tasks: &[StepTask]) {
        for task in tasks {
            self.submit_task(group, *task);
        }
    }

    /// Wait until every task in the group has completed, executing queued
    /// tasks while waiting.
    fn wait(&mut self, group: TaskGroupId, ctx: &ThreadContext);
}

/// An executor that runs every task inline at submission, on the stepping
/// thread. The degenerate case of the participating-wait design: with one
/// thread there is nothing to wait for.
#[derive(Debug, Default)]
pub struct SerialExecutor {
    open_groups: u32,
}

impl SerialExecutor {
    /// Create a serial executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskExecutor for SerialExecutor {
    fn thread_count(&self) -> u32 {
        1
    }

    fn create_task_group(&mut self) -> TaskGroupId {
        self.open_groups += 1;
        0
    }

    fn destroy_task_group(&mut self, _group: TaskGroupId) {
        debug_assert!(self.open_groups > 0);
        self.open_groups -= 1;
    }

    fn partition_range(&self, begin: u32, end: u32, output: &mut PartitionedRange) {
        partition_range(begin, end, 1, PARTITION_RANGE_MIN_SIZE, output);
    }

    fn submit_task(&mut self, _group: TaskGroupId, task: StepTask) {
        task.execute(&ThreadContext { thread_id: 0 });
    }

    fn wait(&mut self, _group: TaskGroupId, _ctx: &ThreadContext) {}
}
