use bytemuck::Pod;

use crate::gfx::{Buffer, BufferDesc, GraphicsDevice, GraphicsError};

/// One upload buffer per ring-buffer slot, all of the same capacity.
#[derive(Debug, Default)]
pub struct UploadRing {
    buffers: Vec<Buffer>,
    capacity: usize,
}

impl UploadRing {
    /// Records that fit in each slot.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<&Buffer> {
        self.buffers.get(index)
    }

    /// Grow to `ceil(required * headroom)` records if `required` doesn't fit or the device's slot
    /// count changed. Returns `true` if the buffers were recreated.
    pub(crate) fn reserve<T: Pod>(
        &mut self,
        device: &dyn GraphicsDevice,
        required: usize,
        headroom: f32,
        name: &str,
    ) -> Result<bool, GraphicsError> {
        if required <= self.capacity && self.buffers.len() == device.buffer_count() {
            return Ok(false);
        }
        let capacity = ((required as f32) * headroom.max(1.0)).ceil() as usize;
        self.recreate::<T>(device, capacity.max(required))?;
        log::debug!("{name} upload buffers grown to {capacity} records");
        Ok(true)
    }

    /// Replace the buffers with `capacity` records per slot.
    pub(crate) fn recreate<T: Pod>(&mut self, device: &dyn GraphicsDevice, capacity: usize) -> Result<(), GraphicsError> {
        let desc = BufferDesc::upload::<T>(capacity);
        let buffers = (0..device.buffer_count())
            .map(|_| device.create_buffer(&desc, None))
            .collect::<Result<Vec<_>, _>>()?;
        self.buffers = buffers;
        self.capacity = capacity;
        Ok(())
    }

    /// The mapped records of `slot`, empty if the slot doesn't exist.
    pub(crate) fn records_mut<T: Pod>(&mut self, slot: usize) -> &mut [T] {
        self.buffers
            .get_mut(slot)
            .and_then(Buffer::mapped_mut)
            .map(|mapped| mapped.as_slice_mut::<T>())
            .unwrap_or_default()
    }

    pub fn records<T: Pod>(&self, slot: usize) -> &[T] {
        self.buffers
            .get(slot)
            .and_then(Buffer::mapped)
            .map(|mapped| mapped.as_slice::<T>())
            .unwrap_or_default()
    }
}

/// The scene's per-frame GPU records.
#[derive(Debug, Default)]
pub struct GpuBuffers {
    pub instances: UploadRing,
    pub materials: UploadRing,
    pub geometries: UploadRing,
    pub impostors: UploadRing,
    /// Top-level acceleration structure instances, only used with ray tracing.
    pub tlas_instances: UploadRing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{HeadlessDevice, ShaderMaterial};

    #[test]
    fn reserve_grows_with_headroom_once() {
        // Given
        let device = HeadlessDevice::new();
        let mut ring = UploadRing::default();

        // When
        let grown = ring.reserve::<ShaderMaterial>(&device, 10, 1.5, "material").unwrap();
        let again = ring.reserve::<ShaderMaterial>(&device, 15, 1.5, "material").unwrap();

        // Then
        assert!(grown);
        assert!(!again);
        assert_eq!(ring.capacity(), 15);
        assert_eq!(ring.records::<ShaderMaterial>(0).len(), 15);
        assert_eq!(ring.records::<ShaderMaterial>(1).len(), 15);
        assert!(ring.slot(2).is_none());
    }

    #[test]
    fn reserve_propagates_allocation_failure() {
        let device = HeadlessDevice::new().with_memory_budget(64);
        let mut ring = UploadRing::default();
        let result = ring.reserve::<ShaderMaterial>(&device, 4, 1.0, "material");
        assert!(matches!(result, Err(GraphicsError::OutOfMemory { .. })));
        assert_eq!(ring.capacity(), 0);
    }

    #[test]
    fn missing_slot_has_no_records() {
        let mut ring = UploadRing::default();
        assert!(ring.records_mut::<ShaderMaterial>(0).is_empty());
    }
}
