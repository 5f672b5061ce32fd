use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam::utils::CachePadded;

use crate::core::memory::{Block, BlockAllocator};

/// Items stored per queue block.
pub const BLOCK_CAPACITY: usize = 256;

struct Blocks<T> {
    blocks: VecDeque<Box<Block<T, BLOCK_CAPACITY>>>,
    pool: BlockAllocator<T, BLOCK_CAPACITY>,
}

/// A FIFO job queue built from pooled fixed-size blocks.
///
/// Pushes append to the tail block, allocating a new one from the pool when it fills up. Pops
/// take from the head block and return it to the pool once drained, unless it is the only block
/// left, in which case it is rewound in place. An approximate item count lets idle workers skip
/// the lock on empty queues; the authoritative emptiness check happens under the lock.
pub struct BlockQueue<T> {
    inner: Mutex<Blocks<T>>,
    len: CachePadded<AtomicUsize>,
}

impl<T> Default for BlockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Blocks {
                blocks: VecDeque::new(),
                pool: BlockAllocator::new(),
            }),
            len: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn push_back(&self, item: T) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Blocks { blocks, pool } = &mut *inner;

        let mut item = item;
        if let Some(tail) = blocks.back_mut() {
            match tail.push(item) {
                Ok(()) => {
                    self.len.fetch_add(1, Ordering::Release);
                    return;
                }
                Err(rejected) => item = rejected,
            }
        }

        let mut block = pool.allocate();
        if block.push(item).is_ok() {
            self.len.fetch_add(1, Ordering::Release);
        }
        blocks.push_back(block);
    }

    pub fn pop_front(&self) -> Option<T> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Blocks { blocks, pool } = &mut *inner;

        let head = blocks.front_mut()?;
        let item = head.pop()?;
        if head.is_empty() {
            if blocks.len() > 1 {
                if let Some(drained) = blocks.pop_front() {
                    pool.free(drained);
                }
            } else if let Some(head) = blocks.front_mut() {
                head.reset();
            }
        }
        self.len.fetch_sub(1, Ordering::Release);
        Some(item)
    }

    /// Approximate number of queued items.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_across_block_boundaries() {
        // Given
        let queue = BlockQueue::new();

        // When
        for i in 0..1000u32 {
            queue.push_back(i);
        }

        // Then
        assert_eq!(queue.len(), 1000);
        for i in 0..1000u32 {
            assert_eq!(queue.pop_front(), Some(i));
        }
        assert_eq!(queue.pop_front(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn interleaved_push_pop_reuses_blocks() {
        // Given
        let queue = BlockQueue::new();

        // When - stay within one block the whole time
        for round in 0..10u32 {
            for i in 0..200 {
                queue.push_back(round * 1000 + i);
            }
            for i in 0..200 {
                assert_eq!(queue.pop_front(), Some(round * 1000 + i));
            }
        }

        // Then
        let inner = queue.inner.lock().unwrap();
        assert_eq!(inner.pool.allocated(), 1);
    }

    #[test]
    fn drained_blocks_return_to_pool() {
        // Given
        let queue = BlockQueue::new();
        for i in 0..(BLOCK_CAPACITY * 3) {
            queue.push_back(i);
        }

        // When
        while queue.pop_front().is_some() {}

        // Then - two drained blocks pooled, the last one rewound in place
        let inner = queue.inner.lock().unwrap();
        assert_eq!(inner.blocks.len(), 1);
        assert_eq!(inner.pool.pooled(), 2);
    }

    #[test]
    fn concurrent_producers_and_consumers_lose_nothing() {
        // Given
        let queue = Arc::new(BlockQueue::new());

        // When
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..1000 {
                        queue.push_back(t * 1000 + i);
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    for _ in 0..2000 {
                        if let Some(item) = queue.pop_front() {
                            taken.push(item);
                        }
                    }
                    taken
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|consumer| consumer.join().unwrap())
            .collect();
        while let Some(item) = queue.pop_front() {
            all.push(item);
        }

        // Then
        all.sort_unstable();
        assert_eq!(all, (0..4000).collect::<Vec<_>>());
    }
}
