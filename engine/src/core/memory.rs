//! Fixed-capacity allocators backing transient engine data.
//!
//! Two allocators live here:
//!
//! - **[`LinearAllocator`]**: a bump allocator over a single pre-sized buffer. Allocation is a
//!   pointer bump, deallocation is either LIFO (`free`) or a whole-buffer `reset`. It never grows
//!   on its own, so callers that can't tolerate a `None` must size it up front with
//!   [`LinearAllocator::reserve`].
//!
//! - **[`BlockAllocator`]**: a free-list pool of fixed-capacity [`Block`]s. The job queues use it
//!   to recycle their storage blocks instead of hitting the heap for every job. It performs no
//!   locking of its own; the owner (a queue) is expected to hold it behind its own lock.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut linear = LinearAllocator::new();
//! linear.reserve(1024);
//! let a = linear.allocate(100).unwrap();   // offset 0
//! let b = linear.allocate(100).unwrap();   // offset 112 (16 byte aligned)
//! linear.free(100);                        // releases `b`
//! linear.reset();                          // releases everything
//! ```

use std::ptr::NonNull;

use bytemuck::{Pod, Zeroable};

/// One 64 byte, 64 byte aligned line of backing storage.
#[repr(C, align(64))]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Line([u8; 64]);

const LINE_SIZE: usize = std::mem::size_of::<Line>();

/// A bump allocator over a fixed buffer.
///
/// Every allocation is rounded up to [`LinearAllocator::ALIGNMENT`] bytes so returned pointers
/// are always suitably aligned for any math or GPU record type used by the engine.
#[derive(Default)]
pub struct LinearAllocator {
    buffer: Box<[Line]>,
    capacity: usize,
    offset: usize,
}

impl LinearAllocator {
    /// Alignment of every pointer handed out by the allocator.
    pub const ALIGNMENT: usize = 16;

    /// Create an allocator without any backing storage. Every allocation fails until
    /// [`reserve`](Self::reserve) is called.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator with `capacity` bytes of backing storage.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut allocator = Self::new();
        allocator.reserve(capacity);
        allocator
    }

    /// (Re)allocate the backing buffer.
    ///
    /// Any pointer previously returned by [`allocate`](Self::allocate) is invalidated. Keeping
    /// them alive past this call is a caller error.
    pub fn reserve(&mut self, capacity: usize) {
        let lines = capacity.div_ceil(LINE_SIZE);
        self.buffer = vec![Line::zeroed(); lines].into_boxed_slice();
        self.capacity = capacity;
        self.offset = 0;
    }

    /// Bump allocate `size` bytes.
    ///
    /// Returns `None` when the remaining capacity is insufficient. The allocator never grows.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let size = Self::aligned(size);
        let end = self.offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        let base = bytemuck::cast_slice_mut::<Line, u8>(&mut self.buffer).as_mut_ptr();
        // SAFETY: `offset + size <= capacity <= buffer byte length`, so the pointer stays inside
        // the allocation.
        let ptr = unsafe { base.add(self.offset) };
        self.offset = end;
        NonNull::new(ptr)
    }

    /// Allocate a zero-initialized slice of `len` plain-old-data values.
    ///
    /// The slice borrows the allocator, so only one slice can be alive at a time. Use
    /// [`allocate`](Self::allocate) when several regions are needed concurrently.
    pub fn allocate_slice<T: Pod>(&mut self, len: usize) -> Option<&mut [T]> {
        debug_assert!(std::mem::align_of::<T>() <= Self::ALIGNMENT);
        let size = len.checked_mul(std::mem::size_of::<T>())?;
        let start = self.offset;
        self.allocate(size)?;
        let bytes = &mut bytemuck::cast_slice_mut::<Line, u8>(&mut self.buffer)[start..start + size];
        bytes.fill(0);
        Some(bytemuck::cast_slice_mut(bytes))
    }

    /// Release the most recent `size` bytes. Only top-down (LIFO) deallocation is supported.
    pub fn free(&mut self, size: usize) {
        let size = Self::aligned(size);
        debug_assert!(size <= self.offset, "freeing more than was allocated");
        self.offset = self.offset.saturating_sub(size);
    }

    /// Release every allocation at once.
    #[inline]
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently allocated (including alignment padding).
    #[inline]
    pub fn used(&self) -> usize {
        self.offset
    }

    #[inline]
    fn aligned(size: usize) -> usize {
        size.div_ceil(Self::ALIGNMENT) * Self::ALIGNMENT
    }
}

/// A fixed-capacity run of `N` item slots with front/back cursors.
///
/// Items are pushed at `last` and popped from `first`. Once `last == N` the block is full; once
/// `first == last` it is drained and must be [`reset`](Block::reset) before it can be reused.
pub struct Block<T, const N: usize> {
    items: [Option<T>; N],
    first: usize,
    last: usize,
}

impl<T, const N: usize> Block<T, N> {
    fn new() -> Box<Self> {
        Box::new(Self {
            items: std::array::from_fn(|_| None),
            first: 0,
            last: 0,
        })
    }

    /// `true` when no more items can be pushed.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.last == N
    }

    /// `true` when every pushed item has been popped.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first == self.last
    }

    /// Number of items still waiting in the block.
    #[inline]
    pub fn len(&self) -> usize {
        self.last - self.first
    }

    /// Push an item at the back, handing it back if the block is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items[self.last] = Some(item);
        self.last += 1;
        Ok(())
    }

    /// Pop the front item.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.items[self.first].take();
        self.first += 1;
        item
    }

    /// Rewind both cursors, dropping anything left in the block.
    pub fn reset(&mut self) {
        for slot in &mut self.items[self.first..self.last] {
            *slot = None;
        }
        self.first = 0;
        self.last = 0;
    }
}

/// A free-list pool of [`Block`]s.
///
/// `allocate` pops a pooled block or heap-allocates a fresh one; `free` resets the block and
/// returns it to the pool. There is no internal synchronization.
pub struct BlockAllocator<T, const N: usize> {
    free_list: Vec<Box<Block<T, N>>>,
    allocated: usize,
}

impl<T, const N: usize> Default for BlockAllocator<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> BlockAllocator<T, N> {
    /// Create an empty pool.
    #[inline]
    pub const fn new() -> Self {
        Self {
            free_list: Vec::new(),
            allocated: 0,
        }
    }

    /// Take a block from the pool, allocating a new one if the pool is empty.
    pub fn allocate(&mut self) -> Box<Block<T, N>> {
        match self.free_list.pop() {
            Some(block) => block,
            None => {
                self.allocated += 1;
                Block::new()
            }
        }
    }

    /// Return a block to the pool.
    pub fn free(&mut self, mut block: Box<Block<T, N>>) {
        block.reset();
        self.free_list.push(block);
    }

    /// Number of blocks waiting in the pool.
    #[inline]
    pub fn pooled(&self) -> usize {
        self.free_list.len()
    }

    /// Number of blocks ever heap-allocated by this pool.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_allocate_until_exhausted() {
        // Given
        let mut allocator = LinearAllocator::with_capacity(64);

        // When
        let a = allocator.allocate(16);
        let b = allocator.allocate(32);
        let c = allocator.allocate(32);

        // Then - third allocation doesn't fit and the allocator doesn't grow
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());
        assert_eq!(allocator.used(), 48);
        assert_eq!(allocator.capacity(), 64);
    }

    #[test]
    fn linear_allocations_are_aligned_and_contiguous() {
        // Given
        let mut allocator = LinearAllocator::with_capacity(256);

        // When
        let a = allocator.allocate(3).unwrap();
        let b = allocator.allocate(5).unwrap();

        // Then
        assert_eq!(a.as_ptr() as usize % 64, 0);
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
    }

    #[test]
    fn linear_free_is_lifo_and_reset_releases_all() {
        // Given
        let mut allocator = LinearAllocator::with_capacity(128);
        let first = allocator.allocate(32).unwrap();
        allocator.allocate(32).unwrap();

        // When - free the top allocation and allocate again
        allocator.free(32);
        allocator.allocate(32).unwrap();

        // Then
        assert_eq!(allocator.used(), 64);

        // When
        allocator.reset();
        let again = allocator.allocate(32).unwrap();

        // Then - the buffer is reused from the start
        assert_eq!(again, first);
    }

    #[test]
    fn linear_without_reserve_fails() {
        let mut allocator = LinearAllocator::new();
        assert!(allocator.allocate(1).is_none());
        assert!(allocator.allocate(0).is_some());
    }

    #[test]
    fn linear_allocate_slice_is_zeroed() {
        // Given
        let mut allocator = LinearAllocator::with_capacity(256);
        if let Some(bytes) = allocator.allocate_slice::<u32>(4) {
            bytes.copy_from_slice(&[1, 2, 3, 4]);
        }
        allocator.reset();

        // When
        let values = allocator.allocate_slice::<u32>(4).unwrap();

        // Then
        assert_eq!(values, &[0, 0, 0, 0]);
    }

    #[test]
    fn block_push_pop_and_full() {
        // Given
        let mut block = Block::<u32, 2>::new();

        // When
        assert!(block.push(1).is_ok());
        assert!(block.push(2).is_ok());

        // Then
        assert!(block.is_full());
        assert_eq!(block.push(3), Err(3));
        assert_eq!(block.pop(), Some(1));
        assert_eq!(block.pop(), Some(2));
        assert_eq!(block.pop(), None);
        assert!(block.is_empty());
    }

    #[test]
    fn block_allocator_recycles_blocks() {
        // Given
        let mut pool = BlockAllocator::<u32, 4>::new();
        let mut block = pool.allocate();
        block.push(7).unwrap();

        // When
        pool.free(block);
        let reused = pool.allocate();

        // Then - the block came back from the pool, reset
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.pooled(), 0);
        assert!(reused.is_empty());
        assert!(!reused.is_full());
    }
}
