//! Small synchronization primitives for short critical sections.
//!
//! [`SpinLock`] is a test-and-test-and-set lock with exponential backoff, intended for critical
//! sections a handful of instructions long (pushing into a shared list from many jobs, picking a
//! winner among candidates). [`ThreadSafeRingBuffer`] is a bounded FIFO guarded by one.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::utils::Backoff;

/// A mutual exclusion lock that busy-waits instead of parking the thread.
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `locked`, so sharing the lock between threads is
// sound whenever the protected value may be sent between them.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create an unlocked lock around `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Consume the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquire the lock, spinning until it becomes available.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard { lock: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    /// Acquire the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Mutable access without locking; the exclusive borrow already proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("SpinLock").field("value", &&*guard).finish(),
            None => f.debug_struct("SpinLock").field("value", &"<locked>").finish(),
        }
    }
}

/// RAII guard releasing the [`SpinLock`] on drop.
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

struct Ring<T, const CAPACITY: usize> {
    items: [Option<T>; CAPACITY],
    head: usize,
    len: usize,
}

/// A bounded FIFO safe to share between threads.
///
/// `push_back` fails (handing the item back) instead of overwriting when the buffer is full.
pub struct ThreadSafeRingBuffer<T, const CAPACITY: usize> {
    ring: SpinLock<Ring<T, CAPACITY>>,
}

impl<T, const CAPACITY: usize> Default for ThreadSafeRingBuffer<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAPACITY: usize> ThreadSafeRingBuffer<T, CAPACITY> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            ring: SpinLock::new(Ring {
                items: std::array::from_fn(|_| None),
                head: 0,
                len: 0,
            }),
        }
    }

    /// Append an item, or return it if the buffer is full.
    pub fn push_back(&self, item: T) -> Result<(), T> {
        let mut ring = self.ring.lock();
        if ring.len == CAPACITY {
            return Err(item);
        }
        let tail = (ring.head + ring.len) % CAPACITY;
        ring.items[tail] = Some(item);
        ring.len += 1;
        Ok(())
    }

    /// Remove the oldest item.
    pub fn pop_front(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        if ring.len == 0 {
            return None;
        }
        let head = ring.head;
        let item = ring.items[head].take();
        ring.head = (head + 1) % CAPACITY;
        ring.len -= 1;
        item
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }
}
