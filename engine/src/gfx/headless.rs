use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::{Buffer, BufferDesc, Capability, GraphicsDevice, GraphicsError, MappedMemory, Usage};

/// A device without a GPU.
///
/// Buffers are plain heap memory, every buffer gets a bindless descriptor, and the ring-buffer
/// slot advances when [`advance_frame`](HeadlessDevice::advance_frame) is called. Used by tests,
/// benchmarks and the demo application.
#[derive(Debug)]
pub struct HeadlessDevice {
    capabilities: HashSet<Capability>,
    buffer_count: usize,
    frame: AtomicUsize,
    next_id: AtomicU64,
    allocated: AtomicUsize,
    memory_budget: usize,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub const DEFAULT_BUFFER_COUNT: usize = 2;

    /// A double-buffered device with bindless support and no memory budget.
    pub fn new() -> Self {
        Self {
            capabilities: HashSet::from([Capability::Bindless]),
            buffer_count: Self::DEFAULT_BUFFER_COUNT,
            frame: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            allocated: AtomicUsize::new(0),
            memory_budget: usize::MAX,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count.max(1);
        self
    }

    /// Fail allocations once the total allocated size would exceed `bytes`.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Move to the next ring-buffer slot. Call once per frame, between scene updates.
    pub fn advance_frame(&self) {
        self.frame.fetch_add(1, Ordering::Relaxed);
    }

    /// Total bytes handed out so far.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn check_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<Buffer, GraphicsError> {
        let reserved = self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |allocated| {
                allocated
                    .checked_add(desc.size)
                    .filter(|&total| total <= self.memory_budget)
            });
        if reserved.is_err() {
            return Err(GraphicsError::OutOfMemory {
                requested: desc.size,
            });
        }

        let mapped = match desc.usage {
            Usage::Upload | Usage::Readback => {
                let mut mapped = MappedMemory::zeroed(desc.size);
                if let Some(data) = initial_data {
                    let len = data.len().min(desc.size);
                    mapped.as_bytes_mut()[..len].copy_from_slice(&data[..len]);
                }
                Some(mapped)
            }
            Usage::Default => None,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let descriptor = self
            .check_capability(Capability::Bindless)
            .then(|| u32::try_from(id).unwrap_or(u32::MAX));
        Ok(Buffer::new(desc.clone(), id, descriptor, mapped))
    }

    fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    fn buffer_index(&self) -> usize {
        self.frame.load(Ordering::Relaxed) % self.buffer_count
    }

    fn descriptor_index(&self, buffer: &Buffer) -> Option<u32> {
        buffer.descriptor()
    }
}
