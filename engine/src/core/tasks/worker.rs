use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use super::job::{ContextState, Job};
use super::queue::BlockQueue;
use super::Priority;

/// State shared between the scheduler handle and every worker thread.
pub(crate) struct Shared {
    pub(crate) alive: AtomicBool,
    pub(crate) classes: [PriorityResources; Priority::COUNT],
}

impl Shared {
    #[inline]
    pub(crate) fn class(&self, priority: Priority) -> &PriorityResources {
        &self.classes[priority.index()]
    }
}

/// Queues, round-robin cursor and wake/wait signalling for one priority class.
pub(crate) struct PriorityResources {
    pub(crate) priority: Priority,
    queues: Box<[BlockQueue<Job>]>,
    next_queue: AtomicUsize,
    wake_lock: Mutex<()>,
    wake_condition: Condvar,
    wait_lock: Mutex<()>,
    wait_condition: Condvar,
}

impl PriorityResources {
    pub(crate) fn new(priority: Priority, thread_count: usize) -> Self {
        Self {
            priority,
            queues: (0..thread_count).map(|_| BlockQueue::new()).collect(),
            next_queue: AtomicUsize::new(0),
            wake_lock: Mutex::new(()),
            wake_condition: Condvar::new(),
            wait_lock: Mutex::new(()),
            wait_condition: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn thread_count(&self) -> usize {
        self.queues.len()
    }

    /// Next queue index in round-robin order.
    #[inline]
    pub(crate) fn next_queue_index(&self) -> usize {
        self.next_queue.fetch_add(1, Ordering::Relaxed) % self.queues.len().max(1)
    }

    /// Place a job on the next queue in round-robin order.
    pub(crate) fn push(&self, job: Job) {
        let index = self.next_queue_index();
        self.queues[index].push_back(job);
    }

    /// One full pass over every queue of the class, starting at `start`, draining each in turn.
    pub(crate) fn work(&self, start: usize) {
        let count = self.queues.len();
        for offset in 0..count {
            let queue = &self.queues[(start + offset) % count];
            while let Some(job) = queue.pop_front() {
                self.run(job);
            }
        }
    }

    /// Run a single job, waking waiters when it completes its context.
    pub(crate) fn run(&self, job: Job) {
        if job.execute() {
            self.notify_waiters();
        }
    }

    /// Number of queued jobs across the class.
    pub(crate) fn queued(&self) -> usize {
        self.queues.iter().map(BlockQueue::len).sum()
    }

    fn notify_waiters(&self) {
        let _guard = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.wait_condition.notify_all();
    }

    pub(crate) fn wake_one(&self) {
        self.wake_condition.notify_one();
    }

    pub(crate) fn wake_all(&self) {
        self.wake_condition.notify_all();
    }

    /// Park the calling worker until the class is signalled.
    pub(crate) fn sleep(&self) {
        let guard = self.wake_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .wake_condition
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until `context` has no outstanding jobs.
    ///
    /// The counter is re-checked under the wait lock, and the job that brings it to zero
    /// notifies under the same lock, so the final notification can't slip in between.
    pub(crate) fn wait_until_idle(&self, context: &ContextState) {
        let mut guard = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        while context.is_busy() {
            guard = self
                .wait_condition
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Body of a worker thread: drain the class's queues, then sleep until woken, while alive.
pub(crate) fn run_worker(
    shared: Arc<Shared>,
    priority: Priority,
    thread_index: usize,
    core: Option<core_affinity::CoreId>,
) {
    if let Some(core) = core
        && !core_affinity::set_for_current(core)
    {
        log::debug!("could not pin {priority:?} worker {thread_index} to core {}", core.id);
    }

    let class = shared.class(priority);
    while shared.alive.load(Ordering::Acquire) {
        class.work(thread_index);
        if !shared.alive.load(Ordering::Acquire) {
            break;
        }
        class.sleep();
    }
    log::trace!("{priority:?} worker {thread_index} exiting");
}
