use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Mat4, Vec3};

use crate::core::tasks::{Context, DisjointSlice, Scheduler};
use crate::ecs::ComponentManager;
use crate::gfx::{ShaderGeometry, ShaderMaterial};
use crate::scene::bounds::Aabb;
use crate::scene::components::{
    ArmatureComponent, MaterialComponent, MeshComponent, SubsurfaceProfile, TransformComponent,
};

use super::FrameCounters;

/// Texture animation, engine stencil reference, and the GPU material record of every material.
///
/// Records are written every frame: each ring-buffer slot has to see the current state.
pub(crate) fn run_material_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    materials: &'env mut ComponentManager<MaterialComponent>,
    records: &'env mut [ShaderMaterial],
    dt: f32,
) {
    let rows = DisjointSlice::new(materials.components_mut());
    let records = DisjointSlice::new(records);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        // SAFETY: one job per row.
        let material = unsafe { rows.get_mut(row) };

        material.texture_animation_elapsed += dt * material.texture_animation_frame_rate;
        if material.texture_animation_elapsed >= 1.0 {
            let direction = material.texture_animation_direction;
            material.texture_mul_add.z = (material.texture_mul_add.z + direction.x) % 1.0;
            material.texture_mul_add.w = (material.texture_mul_add.w + direction.y) % 1.0;
            material.texture_animation_elapsed = 0.0;
        }

        material.engine_stencil_ref = match material.subsurface_profile {
            SubsurfaceProfile::Skin => MaterialComponent::STENCIL_REF_SKIN,
            SubsurfaceProfile::Snow => MaterialComponent::STENCIL_REF_SNOW,
            SubsurfaceProfile::None if material.custom_shader.is_some() => MaterialComponent::STENCIL_REF_CUSTOM_SHADER,
            SubsurfaceProfile::None => MaterialComponent::STENCIL_REF_DEFAULT,
        };

        if row < records.len() {
            // SAFETY: record `row` belongs to this job.
            *unsafe { records.get_mut(row) } = material.shader_record();
        }
        material.set_dirty(false);
    });
}

/// Hand out each mesh its range in the frame's geometry records.
pub(crate) fn run_mesh_prepass<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    meshes: &'env mut ComponentManager<MeshComponent>,
    geometry_count: &'env AtomicU32,
) {
    let rows = DisjointSlice::new(meshes.components_mut());
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        // SAFETY: one job per row.
        let mesh = unsafe { rows.get_mut(args.job_index as usize) };
        mesh.geometry_offset = geometry_count.fetch_add(mesh.subsets.len() as u32, Ordering::Relaxed);
    });
}

/// Write one geometry record per mesh subset into the range the pre-pass assigned.
pub(crate) fn run_mesh_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    meshes: &'env ComponentManager<MeshComponent>,
    materials: &'env ComponentManager<MaterialComponent>,
    records: &'env mut [ShaderGeometry],
) {
    let records = DisjointSlice::new(records);
    scheduler.dispatch(ctx, meshes.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let mesh = &meshes[row];
        let mut flags = 0;
        if mesh.dynamic || mesh.is_skinned() {
            flags |= ShaderGeometry::FLAG_DYNAMIC;
        }
        if !mesh.morph_targets.is_empty() {
            flags |= ShaderGeometry::FLAG_MORPHED;
        }

        for (subset_index, subset) in mesh.subsets.iter().enumerate() {
            let index = mesh.geometry_offset as usize + subset_index;
            if index >= records.len() {
                break;
            }
            // SAFETY: geometry ranges were handed out by an atomic counter and never overlap.
            *unsafe { records.get_mut(index) } = ShaderGeometry {
                index_offset: subset.index_offset,
                index_count: subset.index_count,
                material_index: materials.index_of(subset.material).map_or(u32::MAX, |index| index as u32),
                flags,
                aabb_min: mesh.aabb.min.to_array(),
                morph_count: mesh.morph_targets.len() as u32,
                aabb_max: mesh.aabb.max.to_array(),
                mesh_index: row as u32,
            };
        }
    });
}

/// Skinning matrices and bone bounds of every armature.
pub(crate) fn run_armature_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    armatures: &'env mut ComponentManager<ArmatureComponent>,
    transforms: &'env ComponentManager<TransformComponent>,
    counters: &'env FrameCounters,
) {
    let (lookup, rows) = armatures.split_mut();
    let rows = DisjointSlice::new(rows);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let entity = lookup.entity(row);
        // SAFETY: one job per row.
        let armature = unsafe { rows.get_mut(row) };

        let Some(transform) = transforms.get(entity) else {
            counters.skip("armature", entity, "transform");
            return;
        };
        let to_armature = transform.world.inverse();

        let ArmatureComponent {
            bones,
            inverse_bind_matrices,
            bone_matrices,
            aabb,
        } = armature;
        bone_matrices.resize(bones.len(), Mat4::IDENTITY);
        *aabb = Aabb::EMPTY;
        for (i, bone) in bones.iter().enumerate() {
            let Some(bone_transform) = transforms.get(*bone) else {
                bone_matrices[i] = Mat4::IDENTITY;
                continue;
            };
            let inverse_bind = inverse_bind_matrices.get(i).copied().unwrap_or(Mat4::IDENTITY);
            bone_matrices[i] = to_armature * bone_transform.world * inverse_bind;
            *aabb = aabb.merge(&Aabb::from_half_width(bone_transform.position(), Vec3::ONE));
        }
    });
}
