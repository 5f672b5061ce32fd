//! Per-thread scratch memory backing a job group's shared memory.

use std::cell::Cell;

use bytemuck::{Pod, Zeroable};

/// Alignment guaranteed for group shared memory.
pub(crate) const ALIGNMENT: usize = std::mem::align_of::<ScratchLine>();

#[repr(C, align(64))]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ScratchLine([u8; 64]);

thread_local! {
    static SCRATCH: Cell<Vec<ScratchLine>> = const { Cell::new(Vec::new()) };
}

/// Lend `size` bytes of thread-local scratch memory to `f`.
///
/// The buffer is moved out of the thread-local slot for the duration of the call, so a job that
/// runs nested jobs inline gets a distinct buffer for each level.
pub(crate) fn with_scratch<R>(size: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
    if size == 0 {
        return f(&mut []);
    }

    let mut lines = SCRATCH.with(Cell::take);
    let needed = size.div_ceil(ALIGNMENT);
    if lines.len() < needed {
        lines.resize(needed, ScratchLine::zeroed());
    }

    let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut lines[..needed]);
    let result = f(&mut bytes[..size]);

    SCRATCH.with(|slot| {
        let nested = slot.take();
        slot.set(if nested.len() > lines.len() { nested } else { lines });
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_is_aligned_and_sized() {
        with_scratch(100, |bytes| {
            assert_eq!(bytes.len(), 100);
            assert_eq!(bytes.as_ptr() as usize % ALIGNMENT, 0);
        });
    }

    #[test]
    fn nested_scratch_is_distinct() {
        // Given
        with_scratch(8, |outer| {
            outer.fill(1);

            // When
            with_scratch(8, |inner| inner.fill(2));

            // Then - the inner lease did not alias the outer one
            assert!(outer.iter().all(|&b| b == 1));
        });
    }

    #[test]
    fn zero_sized_scratch_is_empty() {
        with_scratch(0, |bytes| assert!(bytes.is_empty()));
    }
}
