//! Plain-old-data records the scene writes into upload buffers.
//!
//! Layouts are `#[repr(C)]` with no implicit padding so they can be copied to the GPU verbatim.
//! Affine transforms are stored as the top three rows of the matrix.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Per-object instance data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderMeshInstance {
    pub uid: u32,
    pub flags: u32,
    pub layer_mask: u32,
    pub geometry_offset: u32,
    pub geometry_count: u32,
    /// RGBA8 unorm.
    pub color: u32,
    /// RGBA8 unorm, alpha is unused.
    pub emissive: u32,
    pub lod: u32,
    pub center: [f32; 3],
    pub radius: f32,
    pub transform: [[f32; 4]; 3],
    pub transform_inverse_transpose: [[f32; 4]; 3],
    pub transform_prev: [[f32; 4]; 3],
}

impl ShaderMeshInstance {
    pub const FLAG_DYNAMIC: u32 = 1 << 0;
    pub const FLAG_CAST_SHADOW: u32 = 1 << 1;
    pub const FLAG_TRANSPARENT: u32 = 1 << 2;
}

/// Per-material shading data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderMaterial {
    pub base_color: [f32; 4],
    pub emissive_color: [f32; 4],
    /// xy: uv scale, zw: uv offset.
    pub texture_transform: [f32; 4],
    pub flags: u32,
    pub stencil_ref: u32,
    pub subsurface_profile: u32,
    pub shader_type: u32,
}

impl ShaderMaterial {
    pub const FLAG_CAST_SHADOW: u32 = 1 << 0;
    pub const FLAG_TRANSPARENT: u32 = 1 << 1;
    pub const FLAG_DOUBLE_SIDED: u32 = 1 << 2;
    pub const FLAG_CUSTOM_SHADER: u32 = 1 << 3;
}

/// Per-subset geometry data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderGeometry {
    pub index_offset: u32,
    pub index_count: u32,
    pub material_index: u32,
    pub flags: u32,
    pub aabb_min: [f32; 3],
    pub morph_count: u32,
    pub aabb_max: [f32; 3],
    pub mesh_index: u32,
}

impl ShaderGeometry {
    pub const FLAG_DYNAMIC: u32 = 1 << 0;
    pub const FLAG_MORPHED: u32 = 1 << 1;
}

/// Placement of one impostor billboard.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderImpostor {
    pub transform: [[f32; 4]; 3],
    /// RGBA8 unorm.
    pub color: u32,
    pub impostor_index: u32,
    pub fade: f32,
    pub instance_uid: u32,
}

/// One instance of the top-level ray tracing acceleration structure.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TlasInstance {
    pub transform: [[f32; 4]; 3],
    pub instance_id: u32,
    pub instance_mask: u32,
    pub instance_contribution: u32,
    pub flags: u32,
    /// Device address of the bottom-level structure, 0 if it isn't built yet.
    pub blas_address: u64,
}

/// The top three rows of an affine matrix.
#[inline]
pub fn affine_rows(matrix: &Mat4) -> [[f32; 4]; 3] {
    [
        matrix.row(0).to_array(),
        matrix.row(1).to_array(),
        matrix.row(2).to_array(),
    ]
}

/// Pack a `[0, 1]` color into RGBA8 unorm.
#[inline]
pub fn pack_unorm4(color: Vec4) -> u32 {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    (c.x as u32) | ((c.y as u32) << 8) | ((c.z as u32) << 16) | ((c.w as u32) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn record_sizes_are_gpu_friendly() {
        assert_eq!(std::mem::size_of::<ShaderMeshInstance>(), 192);
        assert_eq!(std::mem::size_of::<ShaderMaterial>(), 64);
        assert_eq!(std::mem::size_of::<ShaderGeometry>(), 48);
        assert_eq!(std::mem::size_of::<ShaderImpostor>(), 64);
        assert_eq!(std::mem::size_of::<TlasInstance>(), 72);
    }

    #[test]
    fn affine_rows_hold_translation_in_w() {
        let rows = affine_rows(&Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn pack_unorm4_clamps_and_orders_channels() {
        assert_eq!(pack_unorm4(Vec4::new(1.0, 0.0, 0.0, 1.0)), 0xff00_00ff);
        assert_eq!(pack_unorm4(Vec4::new(2.0, -1.0, 0.0, 0.0)), 0x0000_00ff);
    }
}
