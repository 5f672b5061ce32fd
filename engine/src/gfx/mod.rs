//! The graphics device boundary.
//!
//! The scene never talks to a GPU API directly. It consumes a [`GraphicsDevice`] for exactly
//! three things: creating upload buffers, learning which ring-buffer slot the current frame
//! writes to, and resolving bindless descriptor indices for the GPU records it fills.
//!
//! # Upload buffers
//!
//! A buffer created with [`Usage::Upload`] exposes [`MappedMemory`]: CPU-visible memory that
//! stays valid and directly writable for the buffer's whole life. The scene keeps one upload
//! buffer per ring-buffer slot (see [`GraphicsDevice::buffer_count`]) so the CPU can fill the
//! current slot while the GPU still reads the previous one.
//!
//! ```rust,ignore
//! let slot = device.buffer_index();
//! let instances = buffers[slot].mapped_mut().unwrap().as_slice_mut::<ShaderMeshInstance>();
//! instances[i] = record;
//! ```

mod headless;
pub mod records;

use std::fmt;

use bytemuck::Pod;
use thiserror::Error;

pub use headless::HeadlessDevice;
pub use records::{
    ShaderGeometry, ShaderImpostor, ShaderMaterial, ShaderMeshInstance, TlasInstance, affine_rows, pack_unorm4,
};

/// Optional device features the scene queries before using them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Top-level acceleration structures for ray tracing.
    RayTracing,
    /// Bindless descriptor indexing.
    Bindless,
    /// Mesh shaders (meshlet rendering).
    MeshShader,
}

/// Failures creating device resources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error("out of device memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("unsupported by this device: {0}")]
    Unsupported(&'static str),
    #[error("device error: {0}")]
    Device(String),
}

/// Where a buffer lives and who can touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Usage {
    /// GPU only.
    #[default]
    Default,
    /// CPU writes, GPU reads. Persistently mapped.
    Upload,
    /// GPU writes, CPU reads. Persistently mapped.
    Readback,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferDesc {
    /// Size in bytes.
    pub size: usize,
    pub usage: Usage,
    /// Element stride for structured buffers, 0 for raw buffers.
    pub stride: usize,
}

impl BufferDesc {
    /// An upload buffer holding `count` records of `T`.
    pub fn upload<T: Pod>(count: usize) -> Self {
        Self {
            size: count * std::mem::size_of::<T>(),
            usage: Usage::Upload,
            stride: std::mem::size_of::<T>(),
        }
    }

    /// Number of `stride`-sized elements that fit.
    #[inline]
    pub fn element_count(&self) -> usize {
        if self.stride == 0 { 0 } else { self.size / self.stride }
    }
}

/// 16 byte chunk of mapped memory; gives the mapping the alignment GPU records need.
#[repr(C, align(16))]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Chunk([u8; 16]);

/// CPU-visible memory of an upload or readback buffer.
pub struct MappedMemory {
    chunks: Box<[Chunk]>,
    len: usize,
}

impl MappedMemory {
    /// Zeroed mapping of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            chunks: vec![Chunk([0; 16]); len.div_ceil(16)].into_boxed_slice(),
            len,
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

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.chunks)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.chunks)[..self.len]
    }

    /// The mapping as a slice of records. Trailing bytes that don't fill a whole record are
    /// not part of the slice.
    pub fn as_slice<T: Pod>(&self) -> &[T] {
        let bytes = self.as_bytes();
        let count = bytes.len() / std::mem::size_of::<T>().max(1);
        bytemuck::cast_slice(&bytes[..count * std::mem::size_of::<T>()])
    }

    pub fn as_slice_mut<T: Pod>(&mut self) -> &mut [T] {
        let bytes = self.as_bytes_mut();
        let count = bytes.len() / std::mem::size_of::<T>().max(1);
        bytemuck::cast_slice_mut(&mut bytes[..count * std::mem::size_of::<T>()])
    }
}

impl fmt::Debug for MappedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedMemory").field("len", &self.len).finish()
    }
}

/// A device buffer.
#[derive(Debug)]
pub struct Buffer {
    desc: BufferDesc,
    id: u64,
    descriptor: Option<u32>,
    mapped: Option<MappedMemory>,
}

impl Buffer {
    /// Assemble a buffer. Device implementations call this from
    /// [`GraphicsDevice::create_buffer`].
    pub fn new(desc: BufferDesc, id: u64, descriptor: Option<u32>, mapped: Option<MappedMemory>) -> Self {
        Self {
            desc,
            id,
            descriptor,
            mapped,
        }
    }

    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Device-unique id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn descriptor(&self) -> Option<u32> {
        self.descriptor
    }

    #[inline]
    pub fn mapped(&self) -> Option<&MappedMemory> {
        self.mapped.as_ref()
    }

    #[inline]
    pub fn mapped_mut(&mut self) -> Option<&mut MappedMemory> {
        self.mapped.as_mut()
    }
}

/// The device contract consumed by the scene.
pub trait GraphicsDevice: Send + Sync {
    fn check_capability(&self, capability: Capability) -> bool;

    /// Create a buffer, optionally initialized with `initial_data`.
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<Buffer, GraphicsError>;

    /// Number of upload ring-buffer slots (frames in flight).
    fn buffer_count(&self) -> usize;

    /// Ring-buffer slot of the current frame, in `0..buffer_count()`. Stable for a whole frame.
    fn buffer_index(&self) -> usize;

    /// Bindless index of the buffer's shader resource view, `None` if it has none.
    fn descriptor_index(&self, buffer: &Buffer) -> Option<u32>;
}
