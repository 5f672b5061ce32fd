//! Fork-join job scheduler.
//!
//! The scheduler owns three classes of worker threads, one per [`Priority`]. Work is submitted
//! against a [`Context`], a completion counter that can be waited on:
//!
//! - [`Scheduler::execute`] submits a single job.
//! - [`Scheduler::dispatch`] submits `job_count` jobs, partitioned into groups of `group_size`
//!   consecutive indices. Each group is one unit of work and runs start to finish on one thread.
//! - [`Scheduler::dispatch_shared`] additionally gives every group a block of scratch memory
//!   shared by its jobs (see [`JobArgs::shared`]).
//! - [`Scheduler::wait`] blocks until a context is idle. The waiting thread doesn't sit idle: it
//!   wakes the class's workers and helps drain the class's queues before it parks.
//!
//! # Architecture
//!
//! ```text
//!            dispatch / execute
//!                    │ round-robin
//!      ┌─────────────┼─────────────┐
//!      ▼             ▼             ▼
//!  ┌────────┐   ┌────────┐    ┌────────┐
//!  │queue 0 │   │queue 1 │ .. │queue n │   one queue per worker, per priority class
//!  └────────┘   └────────┘    └────────┘
//!      ▲  ▲          ▲             ▲
//!      │  └──────────┼─────────────┤   every worker (and every waiter) sweeps all queues
//!  worker 0      worker 1      worker n
//! ```
//!
//! A context's counter is incremented by the number of groups *before* any group is published,
//! and decremented after each group finishes. Workers that run out of work park on a condition
//! variable until new work is submitted.
//!
//! When a class has no worker threads, or the scheduler was never initialized, jobs run inline
//! on the submitting thread.
//!
//! # Borrowed data
//!
//! Job bodies may borrow from the caller's stack only on a context opened with
//! [`Scheduler::scope`]. The scope hands out a `&Context<'env>` and doesn't return until every
//! job submitted on it finished, so the borrowed data always outlives the jobs. A context made
//! with [`Context::new`] is `Context<'static>` and only accepts jobs that own their data.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut scheduler = Scheduler::new();
//! scheduler.initialize(u32::MAX);
//!
//! let mut squares = vec![0u64; 1000];
//! let out = DisjointSlice::new(&mut squares);
//! scheduler.scope(Priority::High, |ctx| {
//!     scheduler.dispatch(ctx, 1000, 64, move |args| {
//!         let i = args.job_index as usize;
//!         unsafe { *out.get_mut(i) = (i * i) as u64 };
//!     });
//! });
//! ```

mod disjoint;
mod job;
mod queue;
mod scratch;
mod worker;

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

pub use disjoint::DisjointSlice;
pub use job::JobArgs;
pub use queue::{BLOCK_CAPACITY, BlockQueue};

use job::{ContextState, Job, Task};
use worker::{PriorityResources, Shared};

/// Priority class a job runs in. Each class has its own threads and queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Frame-critical work. One thread per core except the main thread's.
    #[default]
    High,
    /// Background work that shouldn't starve `High`.
    Low,
    /// Long running streaming work on a single thread.
    Streaming,
}

impl Priority {
    pub const COUNT: usize = 3;
    pub const ALL: [Priority; Self::COUNT] = [Priority::High, Priority::Low, Priority::Streaming];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::High => "high",
            Priority::Low => "low",
            Priority::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Scheduler start-up configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound for the thread count of every priority class.
    pub max_thread_count: u32,
    /// Pin workers to cores. Pinning is best effort.
    pub pin_threads: bool,
    /// Prefix of worker thread names, e.g. `tessel::high::0`.
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_thread_count: u32::MAX,
            pin_threads: true,
            thread_name_prefix: "tessel".into(),
        }
    }
}

/// A completion counter for a set of submitted jobs.
///
/// Jobs submitted on a `Context<'env>` may borrow data living for `'env`. Only
/// [`Scheduler::scope`] creates contexts with a non-`'static` environment, and it waits for them
/// before returning. `'env` is invariant, so a free-standing `Context<'static>` can't stand in for
/// a scoped one.
pub struct Context<'env> {
    state: Arc<ContextState>,
    priority: Priority,
    scoped: bool,
    _env: PhantomData<&'env mut &'env ()>,
}

impl Context<'static> {
    /// A free-standing context. Its jobs must own everything they touch; dropping it doesn't
    /// wait for them.
    pub fn new(priority: Priority) -> Self {
        Self {
            state: Arc::new(ContextState::default()),
            priority,
            scoped: false,
            _env: PhantomData,
        }
    }
}

impl Context<'_> {
    fn scoped(priority: Priority) -> Self {
        Self {
            state: Arc::new(ContextState::default()),
            priority,
            scoped: true,
            _env: PhantomData,
        }
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// `true` while jobs submitted on this context are still pending or running.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Number of outstanding groups.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.state.counter.load(Ordering::Acquire)
    }
}

impl Default for Context<'static> {
    fn default() -> Self {
        Self::new(Priority::High)
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        // Only reached with work outstanding when the scope's wait unwound.
        if self.scoped {
            while self.state.is_busy() {
                thread::yield_now();
            }
        }
    }
}

/// Waits for a scoped context when the scope exits, normally or by unwinding.
struct ScopeExit<'s, 'env> {
    scheduler: &'s Scheduler,
    ctx: &'s Context<'env>,
}

impl Drop for ScopeExit<'_, '_> {
    fn drop(&mut self) {
        self.scheduler.wait(self.ctx);
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("priority", &self.priority)
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// How many workers to signal after a submission.
#[derive(Clone, Copy)]
enum Wake {
    One,
    All,
}

/// The job scheduler.
///
/// Constructed uninitialized; [`initialize`](Scheduler::initialize) spawns the worker threads.
/// Until then, and after [`shutdown`](Scheduler::shutdown), every submission runs inline.
#[derive(Default)]
pub struct Scheduler {
    shared: Option<Arc<Shared>>,
    threads: Vec<JoinHandle<()>>,
    core_count: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn worker threads, capping every class at `max_thread_count` threads.
    pub fn initialize(&mut self, max_thread_count: u32) {
        self.initialize_with(Config {
            max_thread_count,
            ..Config::default()
        });
    }

    /// Spawn worker threads. Calling this on an initialized scheduler does nothing.
    pub fn initialize_with(&mut self, config: Config) {
        if self.shared.is_some() {
            return;
        }

        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let core_count = if core_ids.is_empty() {
            thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            core_ids.len()
        };
        let max = config.max_thread_count.max(1) as usize;
        let thread_counts = [
            core_count.saturating_sub(1).clamp(1, max),
            core_count.saturating_sub(2).clamp(1, max),
            1,
        ];

        let shared = Arc::new(Shared {
            alive: AtomicBool::new(true),
            classes: std::array::from_fn(|i| {
                PriorityResources::new(Priority::ALL[i], thread_counts[i])
            }),
        });

        for priority in Priority::ALL {
            for thread_index in 0..thread_counts[priority.index()] {
                let core = if config.pin_threads && !core_ids.is_empty() {
                    let n = core_ids.len();
                    let slot = match priority {
                        // Skip the main thread's core.
                        Priority::High | Priority::Low => (thread_index + 1) % n,
                        Priority::Streaming => n - 1 - thread_index % n,
                    };
                    Some(core_ids[slot])
                } else {
                    None
                };

                let name = format!("{}::{priority}::{thread_index}", config.thread_name_prefix);
                let worker_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new().name(name).spawn(move || {
                    worker::run_worker(worker_shared, priority, thread_index, core)
                });
                match spawned {
                    Ok(handle) => self.threads.push(handle),
                    Err(error) => {
                        log::warn!("failed to spawn {priority} worker {thread_index}: {error}")
                    }
                }
            }
        }

        log::info!(
            "job scheduler initialized: {core_count} cores, {} high, {} low, {} streaming threads",
            thread_counts[0],
            thread_counts[1],
            thread_counts[2],
        );

        self.core_count = core_count;
        self.shared = Some(shared);
    }

    /// Stop and join every worker. Queued jobs that no worker picked up run inline before this
    /// returns. Calling this on an uninitialized scheduler does nothing.
    pub fn shutdown(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        shared.alive.store(false, Ordering::Release);

        // Workers may be about to park; keep signalling until every one of them is out.
        let joined = AtomicBool::new(false);
        thread::scope(|scope| {
            scope.spawn(|| {
                while !joined.load(Ordering::Acquire) {
                    for class in &shared.classes {
                        class.wake_all();
                    }
                    thread::yield_now();
                }
            });
            for handle in self.threads.drain(..) {
                if handle.join().is_err() {
                    log::error!("job scheduler worker panicked");
                }
            }
            joined.store(true, Ordering::Release);
        });

        for class in &shared.classes {
            let leftover = class.queued();
            if leftover > 0 {
                log::debug!("running {leftover} leftover {} jobs inline", class.priority);
            }
            class.work(0);
        }

        log::info!("job scheduler shut down");
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.shared.is_some()
    }

    /// Number of logical cores detected at initialization, 0 before.
    #[inline]
    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// Number of worker threads of a class, 0 when uninitialized.
    pub fn thread_count(&self, priority: Priority) -> u32 {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.class(priority).thread_count() as u32)
    }

    /// Number of groups `dispatch` produces for `job_count` jobs of `group_size`.
    #[inline]
    pub const fn dispatch_group_count(job_count: u32, group_size: u32) -> u32 {
        if group_size == 0 {
            0
        } else {
            job_count.div_ceil(group_size)
        }
    }

    /// Run `f` with a fresh context of `priority` whose jobs may borrow anything that outlives
    /// this call.
    ///
    /// Returns once every job submitted on the context finished, helping to run them like
    /// [`wait`](Scheduler::wait). The context must only be used with this scheduler.
    ///
    /// ```rust,ignore
    /// let total = AtomicU32::new(0);
    /// scheduler.scope(Priority::High, |ctx| {
    ///     scheduler.dispatch(ctx, 100, 10, |args| {
    ///         total.fetch_add(args.job_index, Ordering::Relaxed);
    ///     });
    /// });
    /// assert_eq!(total.into_inner(), 4950);
    /// ```
    pub fn scope<'env, F, R>(&self, priority: Priority, f: F) -> R
    where
        F: FnOnce(&Context<'env>) -> R,
    {
        let ctx = Context::scoped(priority);
        let exit = ScopeExit { scheduler: self, ctx: &ctx };
        let result = f(&ctx);
        drop(exit);
        result
    }

    /// `true` while `ctx` has outstanding jobs.
    #[inline]
    pub fn is_busy(&self, ctx: &Context<'_>) -> bool {
        ctx.is_busy()
    }

    /// Outstanding groups of `ctx`.
    #[inline]
    pub fn remaining_job_count(&self, ctx: &Context<'_>) -> u32 {
        ctx.remaining()
    }

    /// Submit a single job.
    pub fn execute<'env, F>(&self, ctx: &Context<'env>, task: F)
    where
        F: FnOnce(JobArgs<'_>) + Send + 'env,
    {
        let task = Mutex::new(Some(task));
        self.submit(ctx, 1, 1, 0, Wake::One, move |args| {
            let task = task.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(task) = task {
                task(args);
            }
        });
    }

    /// Submit `job_count` jobs in groups of `group_size`.
    pub fn dispatch<'env, F>(&self, ctx: &Context<'env>, job_count: u32, group_size: u32, task: F)
    where
        F: Fn(JobArgs<'_>) + Send + Sync + 'env,
    {
        self.dispatch_shared(ctx, job_count, group_size, 0, task);
    }

    /// Submit `job_count` jobs in groups of `group_size`, each group getting
    /// `shared_memory_size` bytes of scratch memory shared by its jobs.
    pub fn dispatch_shared<'env, F>(
        &self,
        ctx: &Context<'env>,
        job_count: u32,
        group_size: u32,
        shared_memory_size: usize,
        task: F,
    ) where
        F: Fn(JobArgs<'_>) + Send + Sync + 'env,
    {
        let wake = if self.thread_count(ctx.priority) > 1 {
            Wake::All
        } else {
            Wake::One
        };
        self.submit(ctx, job_count, group_size, shared_memory_size, wake, task);
    }

    /// Block until `ctx` is idle, helping to run the class's queued jobs meanwhile.
    pub fn wait(&self, ctx: &Context<'_>) {
        if !ctx.is_busy() {
            return;
        }

        let Some(shared) = self.shared.as_ref() else {
            while ctx.is_busy() {
                thread::yield_now();
            }
            return;
        };

        let class = shared.class(ctx.priority);
        class.wake_all();
        class.work(class.next_queue_index());
        class.wait_until_idle(&ctx.state);
    }

    fn submit<'env, F>(
        &self,
        ctx: &Context<'env>,
        job_count: u32,
        group_size: u32,
        shared_memory_size: usize,
        wake: Wake,
        task: F,
    ) where
        F: Fn(JobArgs<'_>) + Send + Sync + 'env,
    {
        let group_count = Self::dispatch_group_count(job_count, group_size);
        if group_count == 0 {
            return;
        }

        // Published jobs may finish immediately; the counter must already cover all of them.
        ctx.state.counter.fetch_add(group_count, Ordering::AcqRel);

        let task: Arc<dyn Fn(JobArgs<'_>) + Send + Sync + 'env> = Arc::new(task);
        // SAFETY: only the lifetime is erased. Every clone of the task is dropped by the job
        // holding it before that job decrements the context counter. A context with a
        // non-`'static` environment only exists inside `scope`, which can't return (ending
        // `'env`) while the counter is non-zero, and its `Drop` blocks if the scope unwinds.
        let task: Arc<Task> = unsafe {
            std::mem::transmute::<Arc<dyn Fn(JobArgs<'_>) + Send + Sync + 'env>, Arc<Task>>(task)
        };

        let class = self
            .shared
            .as_ref()
            .map(|shared| shared.class(ctx.priority))
            .filter(|class| class.thread_count() > 0);

        for group_id in 0..group_count {
            let group_job_offset = group_id * group_size;
            let job = Job {
                task: Arc::clone(&task),
                context: Arc::clone(&ctx.state),
                group_id,
                group_job_offset,
                group_job_end: group_job_offset.saturating_add(group_size).min(job_count),
                shared_memory_size,
            };
            match class {
                Some(class) => class.push(job),
                None => {
                    job.execute();
                }
            }
        }
        drop(task);

        if let Some(class) = class {
            match wake {
                Wake::One => class.wake_one(),
                Wake::All => class.wake_all(),
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("initialized", &self.is_initialized())
            .field("core_count", &self.core_count)
            .field("high", &self.thread_count(Priority::High))
            .field("low", &self.thread_count(Priority::Low))
            .field("streaming", &self.thread_count(Priority::Streaming))
            .finish()
    }
}
