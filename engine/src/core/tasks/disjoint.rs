use std::marker::PhantomData;
use std::ptr::NonNull;

/// A mutable slice that can be shared between jobs writing to distinct indices.
///
/// Parallel dispatches commonly give job `i` exclusive ownership of element `i`. The borrow
/// checker can't see that partition through a `Fn` closure, so this wrapper hands out element
/// references through an `unsafe` accessor whose contract is exactly that partition.
pub struct DisjointSlice<'a, T> {
    ptr: NonNull<T>,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: the wrapper is a `&mut [T]` whose aliasing rules are upheld by `get_mut` callers.
unsafe impl<T: Send> Send for DisjointSlice<'_, T> {}
unsafe impl<T: Send> Sync for DisjointSlice<'_, T> {}

impl<'a, T> DisjointSlice<'a, T> {
    #[inline]
    pub fn new(slice: &'a mut [T]) -> Self {
        Self {
            len: slice.len(),
            // SAFETY: slice pointers are never null.
            ptr: unsafe { NonNull::new_unchecked(slice.as_mut_ptr()) },
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mutable access to element `index`.
    ///
    /// # Safety
    ///
    /// No other reference to element `index` may be alive for as long as the returned one is.
    /// Callers typically guarantee this by mapping each job index to a unique element.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self, index: usize) -> &'a mut T {
        assert!(index < self.len, "index {index} out of bounds for length {}", self.len);
        // SAFETY: in bounds; exclusivity is the caller's obligation.
        unsafe { &mut *self.ptr.as_ptr().add(index) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn distinct_indices_from_many_threads() {
        // Given
        let mut values = vec![0u32; 64];
        let slice = DisjointSlice::new(&mut values);

        // When
        thread::scope(|s| {
            for t in 0..4 {
                let slice = &slice;
                s.spawn(move || {
                    for i in (t..64).step_by(4) {
                        // SAFETY: each thread owns a distinct residue class.
                        unsafe { *slice.get_mut(i) = i as u32 * 2 };
                    }
                });
            }
        });

        // Then
        assert!(values.iter().enumerate().all(|(i, &v)| v == i as u32 * 2));
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_panics() {
        let mut values = [1, 2, 3];
        let slice = DisjointSlice::new(&mut values);
        // SAFETY: no other references exist.
        unsafe {
            slice.get_mut(3);
        }
    }
}
