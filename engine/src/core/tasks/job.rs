use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Pod;

use super::scratch;

/// Type-erased job body as stored in the queues.
pub(crate) type Task = dyn Fn(JobArgs<'_>) + Send + Sync + 'static;

/// Completion counter shared by a [`Context`](super::Context) and every job dispatched on it.
#[derive(Debug, Default)]
pub(crate) struct ContextState {
    pub(crate) counter: AtomicU32,
}

impl ContextState {
    #[inline]
    pub(crate) fn is_busy(&self) -> bool {
        self.counter.load(Ordering::Acquire) > 0
    }
}

/// Arguments handed to a job body for every job index it runs.
///
/// Jobs of one dispatch are partitioned into groups of `group_size` consecutive indices. A group
/// runs start to finish on a single thread, so state kept in the group's
/// [`shared_memory`](JobArgs::shared_memory) carries from one index to the next.
#[derive(Debug)]
pub struct JobArgs<'a> {
    /// Index of this job within the whole dispatch.
    pub job_index: u32,
    /// Index of the group this job belongs to.
    pub group_id: u32,
    /// Index of this job within its group.
    pub group_index: u32,
    /// `true` for the first job executed in the group.
    pub is_first_job_in_group: bool,
    /// `true` for the last job executed in the group.
    pub is_last_job_in_group: bool,
    shared_memory: &'a mut [u8],
}

impl JobArgs<'_> {
    /// The group's scratch memory, `shared_memory_size` bytes long and 64 byte aligned.
    ///
    /// The contents are unspecified when the group starts; initialize them on
    /// `is_first_job_in_group`.
    #[inline]
    pub fn shared_memory(&mut self) -> &mut [u8] {
        self.shared_memory
    }

    /// View the front of the group's scratch memory as a `T`.
    ///
    /// # Panics
    ///
    /// Panics if the dispatch requested less than `size_of::<T>()` bytes of shared memory.
    #[inline]
    pub fn shared<T: Pod>(&mut self) -> &mut T {
        debug_assert!(std::mem::align_of::<T>() <= scratch::ALIGNMENT);
        bytemuck::from_bytes_mut(&mut self.shared_memory[..std::mem::size_of::<T>()])
    }
}

/// One group of a dispatch: the range `[group_job_offset, group_job_end)` of job indices.
pub(crate) struct Job {
    pub(crate) task: Arc<Task>,
    pub(crate) context: Arc<ContextState>,
    pub(crate) group_id: u32,
    pub(crate) group_job_offset: u32,
    pub(crate) group_job_end: u32,
    pub(crate) shared_memory_size: usize,
}

impl Job {
    /// Run every index of the group, then decrement the context counter.
    ///
    /// Returns `true` if this job was the last outstanding one on its context.
    pub(crate) fn execute(self) -> bool {
        let Job {
            task,
            context,
            group_id,
            group_job_offset,
            group_job_end,
            shared_memory_size,
        } = self;

        scratch::with_scratch(shared_memory_size, |shared_memory| {
            for job_index in group_job_offset..group_job_end {
                task(JobArgs {
                    job_index,
                    group_id,
                    group_index: job_index - group_job_offset,
                    is_first_job_in_group: job_index == group_job_offset,
                    is_last_job_in_group: job_index + 1 == group_job_end,
                    shared_memory: &mut *shared_memory,
                });
            }
        });

        // The borrowed environment may be released as soon as the counter hits zero, so the
        // task must be gone before that happens.
        drop(task);
        context.counter.fetch_sub(1, Ordering::AcqRel) == 1
    }
}
