use glam::{Mat4, Quat, Vec3};

use crate::core::tasks::{Context, DisjointSlice, Scheduler};
use crate::ecs::{ComponentManager, Entity};
use crate::gfx::{ShaderMeshInstance, TlasInstance, affine_rows, pack_unorm4};
use crate::scene::bounds::Aabb;
use crate::scene::components::{
    ArmatureComponent, ImpostorComponent, ImpostorInstance, LayerComponent, MaterialComponent, MeshComponent,
    ObjectComponent, PreviousFrameTransformComponent, TransformComponent,
};

use super::FrameCounters;

/// Inputs and outputs of the object system for one frame.
///
/// Row `i` of `aabbs`, `instances` and `tlas_instances` belongs to row `i` of `objects`.
/// `group_bounds` holds one entry per dispatch group.
pub(crate) struct ObjectSystem<'a> {
    pub(crate) objects: &'a mut ComponentManager<ObjectComponent>,
    pub(crate) aabbs: &'a mut [Aabb],
    pub(crate) group_bounds: &'a mut [Aabb],
    pub(crate) instances: &'a mut [ShaderMeshInstance],
    /// `Some` when the acceleration structure is rebuilt this frame.
    pub(crate) tlas_instances: Option<&'a mut [TlasInstance]>,
    pub(crate) meshes: &'a ComponentManager<MeshComponent>,
    pub(crate) materials: &'a ComponentManager<MaterialComponent>,
    pub(crate) transforms: &'a ComponentManager<TransformComponent>,
    pub(crate) prev_transforms: &'a ComponentManager<PreviousFrameTransformComponent>,
    pub(crate) armatures: &'a ComponentManager<ArmatureComponent>,
    pub(crate) impostors: &'a ComponentManager<ImpostorComponent>,
    pub(crate) layers: &'a ComponentManager<LayerComponent>,
    pub(crate) camera_position: Vec3,
    pub(crate) counters: &'a FrameCounters,
}

impl<'a> ObjectSystem<'a> {
    /// Dispatch one job per object in groups of `group_size`.
    ///
    /// Each group reduces its objects' bounds in shared memory and its last job publishes the
    /// result to `group_bounds[group_id]`, so merging the scene bounds afterwards only touches one
    /// box per group.
    pub(crate) fn dispatch(self, scheduler: &Scheduler, ctx: &Context<'a>, group_size: u32) {
        let ObjectSystem {
            objects,
            aabbs,
            group_bounds,
            instances,
            tlas_instances,
            meshes,
            materials,
            transforms,
            prev_transforms,
            armatures,
            impostors,
            layers,
            camera_position,
            counters,
        } = self;

        debug_assert!(group_bounds.len() >= Scheduler::dispatch_group_count(objects.len() as u32, group_size) as usize);
        let (lookup, rows) = objects.split_mut();
        let job_count = rows.len() as u32;
        let rows = DisjointSlice::new(rows);
        let aabbs = DisjointSlice::new(aabbs);
        let group_bounds = DisjointSlice::new(group_bounds);
        let instances = DisjointSlice::new(instances);
        let tlas_instances = tlas_instances.map(DisjointSlice::new);

        let shared_memory_size = std::mem::size_of::<Aabb>();
        scheduler.dispatch_shared(ctx, job_count, group_size, shared_memory_size, move |mut args| {
            let row = args.job_index as usize;
            let entity = lookup.entity(row);
            // SAFETY: one job per row for every per-object slice.
            let (object, aabb) = unsafe { (rows.get_mut(row), aabbs.get_mut(row)) };

            *aabb = Aabb::EMPTY;
            let prepared = prepare(object, entity, meshes, materials, transforms, armatures, camera_position, counters);
            if let Some(Prepared { mesh, world, bounds }) = prepared {
                *aabb = bounds;
                object.transform_index = transforms.index_of(entity);
                object.prev_transform_index = prev_transforms.index_of(entity);

                if let Some(impostor) = impostors.get(object.mesh) {
                    object.impostor_swap_distance = impostor.swap_in_distance;
                    if object.camera_distance > impostor.swap_in_distance {
                        object.impostor_placement = true;
                        let transform =
                            Mat4::from_scale_rotation_translation(Vec3::splat(object.radius), Quat::IDENTITY, object.center);
                        let instance = ImpostorInstance {
                            transform,
                            instance_uid: entity.id(),
                        };
                        impostor.place(&bounds, object.color, instance);
                    }
                }

                let layer_mask = layers.get(entity).map_or(u32::MAX, |layer| layer.layer_mask);
                if object.renderable && row < instances.len() {
                    let world_prev = prev_transforms.get(entity).map_or(world, |prev| prev.world_prev);
                    // SAFETY: record `row` belongs to this job.
                    *unsafe { instances.get_mut(row) } = instance_record(object, entity, mesh, &world, &world_prev, layer_mask);
                }
                if let Some(tlas_instances) = tlas_instances.as_ref().filter(|tlas| row < tlas.len()) {
                    // SAFETY: record `row` belongs to this job.
                    *unsafe { tlas_instances.get_mut(row) } = TlasInstance {
                        transform: affine_rows(&world),
                        instance_id: row as u32,
                        instance_mask: layer_mask & 0xff,
                        instance_contribution: 0,
                        flags: 0,
                        blas_address: 0,
                    };
                }
            }

            let is_first = args.is_first_job_in_group;
            let is_last = args.is_last_job_in_group;
            let group_id = args.group_id as usize;
            let group_aabb = args.shared::<Aabb>();
            if is_first {
                *group_aabb = Aabb::EMPTY;
            }
            *group_aabb = group_aabb.merge(aabb);
            if is_last {
                // SAFETY: only the last job of a group writes the group's entry.
                *unsafe { group_bounds.get_mut(group_id) } = *group_aabb;
            }
        });
    }
}

struct Prepared<'a> {
    mesh: &'a MeshComponent,
    world: Mat4,
    bounds: Aabb,
}

/// Reset the computed state of `object` and recompute it. `None` if the object contributes nothing
/// this frame.
#[allow(clippy::too_many_arguments)]
fn prepare<'a>(
    object: &mut ObjectComponent,
    entity: Entity,
    meshes: &'a ComponentManager<MeshComponent>,
    materials: &ComponentManager<MaterialComponent>,
    transforms: &ComponentManager<TransformComponent>,
    armatures: &ComponentManager<ArmatureComponent>,
    camera_position: Vec3,
    counters: &FrameCounters,
) -> Option<Prepared<'a>> {
    object.transform_index = None;
    object.prev_transform_index = None;
    object.render_type_mask = 0;
    object.dynamic = false;
    object.cast_shadow = false;
    object.impostor_placement = false;
    object.impostor_swap_distance = 0.0;

    if !object.mesh.is_valid() {
        return None;
    }
    let Some(mesh) = meshes.get(object.mesh) else {
        counters.skip("object", entity, "mesh");
        return None;
    };
    let Some(transform) = transforms.get(entity) else {
        counters.skip("object", entity, "transform");
        return None;
    };
    let world = transform.world;

    let mut bounds = mesh.aabb.transform(&world);
    object.center = (world * mesh.aabb.as_box_matrix()).w_axis.truncate();
    if mesh.is_skinned() || mesh.dynamic {
        object.dynamic = true;
        if let Some(armature) = armatures.get(mesh.armature) {
            bounds = bounds.merge(&armature.aabb);
        }
    }

    for subset in &mesh.subsets {
        if let Some(material) = materials.get(subset.material) {
            object.render_type_mask |= material.render_types();
            object.cast_shadow |= material.cast_shadow;
        }
    }

    object.radius = bounds.radius();
    object.camera_distance = object.center.distance(camera_position);
    object.lod = select_lod(object.camera_distance, object.radius, object.lod_distance_multiplier, mesh.lod_count);

    Some(Prepared { mesh, world, bounds })
}

/// LOD 0 while the camera is inside the bounding sphere, then one level per `1 / multiplier` units.
fn select_lod(distance: f32, radius: f32, multiplier: f32, lod_count: u32) -> u32 {
    if lod_count <= 1 || distance < radius {
        return 0;
    }
    let lod = ((distance - radius) * multiplier).floor().max(0.0) as u32;
    lod.min(lod_count - 1)
}

fn instance_record(
    object: &ObjectComponent,
    entity: Entity,
    mesh: &MeshComponent,
    world: &Mat4,
    world_prev: &Mat4,
    layer_mask: u32,
) -> ShaderMeshInstance {
    let mut flags = 0;
    if object.dynamic {
        flags |= ShaderMeshInstance::FLAG_DYNAMIC;
    }
    if object.cast_shadow {
        flags |= ShaderMeshInstance::FLAG_CAST_SHADOW;
    }
    if object.render_type_mask & ObjectComponent::RENDER_TYPE_TRANSPARENT != 0 {
        flags |= ShaderMeshInstance::FLAG_TRANSPARENT;
    }
    let subsets_per_lod = mesh.subsets_per_lod() as u32;
    ShaderMeshInstance {
        uid: entity.id(),
        flags,
        layer_mask,
        geometry_offset: mesh.geometry_offset + object.lod * subsets_per_lod,
        geometry_count: subsets_per_lod,
        color: pack_unorm4(object.color),
        emissive: pack_unorm4(object.emissive_color),
        lod: object.lod,
        center: object.center.to_array(),
        radius: object.radius,
        transform: affine_rows(world),
        transform_inverse_transpose: affine_rows(&world.inverse().transpose()),
        transform_prev: affine_rows(world_prev),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tasks::Priority;
    use crate::scene::components::MeshSubset;
    use glam::Vec4;
    use std::sync::atomic::Ordering;

    fn scheduler() -> Scheduler {
        let mut scheduler = Scheduler::new();
        scheduler.initialize(4);
        scheduler
    }

    #[derive(Default)]
    struct Fixture {
        objects: ComponentManager<ObjectComponent>,
        meshes: ComponentManager<MeshComponent>,
        materials: ComponentManager<MaterialComponent>,
        transforms: ComponentManager<TransformComponent>,
        prev_transforms: ComponentManager<PreviousFrameTransformComponent>,
        armatures: ComponentManager<ArmatureComponent>,
        impostors: ComponentManager<ImpostorComponent>,
        layers: ComponentManager<LayerComponent>,
        aabbs: Vec<Aabb>,
        group_bounds: Vec<Aabb>,
        instances: Vec<ShaderMeshInstance>,
        tlas_instances: Vec<TlasInstance>,
        counters: FrameCounters,
    }

    const MESH: Entity = Entity::from_raw(1000);
    const MATERIAL: Entity = Entity::from_raw(1001);

    impl Fixture {
        /// A unit cube mesh with `lod_count` LODs of two subsets each.
        fn with_mesh(lod_count: u32) -> Self {
            let mut fixture = Self::default();
            fixture.materials.create(MATERIAL);
            fixture.meshes.insert(
                MESH,
                MeshComponent {
                    subsets: vec![MeshSubset { material: MATERIAL, ..Default::default() }; 2 * lod_count as usize],
                    aabb: Aabb::from_half_width(Vec3::ZERO, Vec3::ONE),
                    lod_count,
                    geometry_offset: 10,
                    ..Default::default()
                },
            );
            fixture
        }

        fn add_object(&mut self, id: u32, position: Vec3) -> Entity {
            let entity = Entity::from_raw(id);
            self.objects.insert(entity, ObjectComponent { mesh: MESH, ..Default::default() });
            let transform = self.transforms.create(entity);
            transform.translate(position);
            transform.update_transform();
            entity
        }

        fn run(&mut self, group_size: u32, camera_position: Vec3, with_tlas: bool) {
            let count = self.objects.len();
            let scheduler = scheduler();
            self.aabbs.resize(count, Aabb::EMPTY);
            self.group_bounds = vec![Aabb::EMPTY; Scheduler::dispatch_group_count(count as u32, group_size) as usize];
            self.instances.resize(count, ShaderMeshInstance::default());
            self.tlas_instances.resize(count, TlasInstance::default());
            scheduler.scope(Priority::High, |ctx| {
                ObjectSystem {
                    objects: &mut self.objects,
                    aabbs: &mut self.aabbs,
                    group_bounds: &mut self.group_bounds,
                    instances: &mut self.instances,
                    tlas_instances: with_tlas.then_some(&mut self.tlas_instances[..]),
                    meshes: &self.meshes,
                    materials: &self.materials,
                    transforms: &self.transforms,
                    prev_transforms: &self.prev_transforms,
                    armatures: &self.armatures,
                    impostors: &self.impostors,
                    layers: &self.layers,
                    camera_position,
                    counters: &self.counters,
                }
                .dispatch(&scheduler, ctx, group_size);
            });
        }
    }

    // ==== LOD ====

    #[test]
    fn lod_grows_with_distance_and_clamps() {
        assert_eq!(select_lod(0.5, 1.0, 1.0, 4), 0);
        assert_eq!(select_lod(2.5, 1.0, 1.0, 4), 1);
        assert_eq!(select_lod(3.0, 1.0, 1.0, 4), 2);
        assert_eq!(select_lod(100.0, 1.0, 1.0, 4), 3);
        assert_eq!(select_lod(100.0, 1.0, 0.01, 4), 0);
        assert_eq!(select_lod(100.0, 1.0, 1.0, 1), 0);
    }

    #[test]
    fn instance_record_points_at_selected_lod() {
        // Given
        let mut fixture = Fixture::with_mesh(3);
        let entity = fixture.add_object(1, Vec3::new(0.0, 0.0, 10.0));

        // When: radius √3, distance 10
        fixture.run(64, Vec3::ZERO, false);

        // Then
        let object = fixture.objects.get(entity).unwrap();
        assert_eq!(object.lod, 2);
        let record = &fixture.instances[0];
        assert_eq!(record.uid, 1);
        assert_eq!(record.lod, 2);
        assert_eq!(record.geometry_offset, 10 + 2 * 2);
        assert_eq!(record.geometry_count, 2);
        assert_eq!(record.transform[2][3], 10.0);
        assert_eq!(record.layer_mask, u32::MAX);
        assert_eq!(record.color, pack_unorm4(Vec4::ONE));
        assert_eq!(object.transform_index, Some(0));
        assert_eq!(object.render_type_mask, ObjectComponent::RENDER_TYPE_OPAQUE);
    }

    // ==== Bounds ====

    #[test]
    fn group_bounds_merge_to_scene_bounds() {
        // Given: 100 objects spread along X
        let mut fixture = Fixture::with_mesh(1);
        for id in 1..=100 {
            fixture.add_object(id, Vec3::new(id as f32 * 3.0, 0.0, 0.0));
        }

        // When
        fixture.run(7, Vec3::ZERO, false);

        // Then
        assert_eq!(fixture.group_bounds.len(), 15);
        let bounds = fixture.group_bounds.iter().fold(Aabb::EMPTY, |bounds, group| bounds.merge(group));
        let expected = fixture.aabbs.iter().fold(Aabb::EMPTY, |bounds, aabb| bounds.merge(aabb));
        assert_eq!(bounds, expected);
        assert!(bounds.min.abs_diff_eq(Vec3::new(2.0, -1.0, -1.0), 1e-5));
        assert!(bounds.max.abs_diff_eq(Vec3::new(301.0, 1.0, 1.0), 1e-4));
    }

    #[test]
    fn missing_mesh_is_skipped_with_empty_bounds() {
        // Given
        let mut fixture = Fixture::with_mesh(1);
        fixture.add_object(1, Vec3::ZERO);
        let orphan = Entity::from_raw(2);
        fixture.objects.insert(orphan, ObjectComponent { mesh: Entity::from_raw(999), ..Default::default() });
        fixture.transforms.create(orphan);

        // When
        fixture.run(64, Vec3::ZERO, false);

        // Then
        assert!(fixture.aabbs[1].is_empty());
        assert_eq!(fixture.counters.skipped_references.load(Ordering::Relaxed), 1);
        assert_eq!(fixture.objects.get(orphan).unwrap().transform_index, None);
        assert!(fixture.group_bounds[0].max.abs_diff_eq(Vec3::ONE, 1e-6));
    }

    #[test]
    fn skinned_mesh_is_dynamic_and_grows_to_bones() {
        // Given
        let mut fixture = Fixture::with_mesh(1);
        let armature = Entity::from_raw(500);
        fixture.meshes.get_mut(MESH).unwrap().armature = armature;
        fixture.armatures.insert(
            armature,
            ArmatureComponent {
                aabb: Aabb::from_half_width(Vec3::new(0.0, 5.0, 0.0), Vec3::ONE),
                ..Default::default()
            },
        );
        let entity = fixture.add_object(1, Vec3::ZERO);

        // When
        fixture.run(64, Vec3::ZERO, false);

        // Then
        assert!(fixture.objects.get(entity).unwrap().dynamic);
        assert_eq!(fixture.aabbs[0].max.y, 6.0);
        assert_ne!(fixture.instances[0].flags & ShaderMeshInstance::FLAG_DYNAMIC, 0);
    }

    // ==== Impostors and ray tracing ====

    #[test]
    fn distant_objects_are_placed_on_the_impostor() {
        // Given
        let mut fixture = Fixture::with_mesh(1);
        fixture.impostors.insert(MESH, ImpostorComponent { swap_in_distance: 50.0, ..Default::default() });
        let near = fixture.add_object(1, Vec3::new(0.0, 0.0, 10.0));
        let far = fixture.add_object(2, Vec3::new(0.0, 0.0, 100.0));
        fixture.add_object(3, Vec3::new(0.0, 0.0, -200.0));

        // When
        fixture.run(1, Vec3::ZERO, false);

        // Then
        assert!(!fixture.objects.get(near).unwrap().impostor_placement);
        assert!(fixture.objects.get(far).unwrap().impostor_placement);
        assert_eq!(fixture.objects.get(far).unwrap().impostor_swap_distance, 50.0);
        let placements = fixture.impostors.get_mut(MESH).unwrap().placements();
        assert_eq!(placements.instances.len(), 2);
        assert!(placements.aabb.contains(Vec3::new(0.0, 0.0, 100.0)));
        assert!(placements.aabb.contains(Vec3::new(0.0, 0.0, -200.0)));
        let mut uids: Vec<u32> = placements.instances.iter().map(|instance| instance.instance_uid).collect();
        uids.sort();
        assert_eq!(uids, [2, 3]);
    }

    #[test]
    fn tlas_records_are_written_only_when_requested() {
        // Given
        let mut fixture = Fixture::with_mesh(1);
        fixture.add_object(1, Vec3::X);
        fixture.layers.insert(Entity::from_raw(1), LayerComponent { layer_mask: 0x1ff });

        // When
        fixture.run(64, Vec3::ZERO, false);
        let untouched = fixture.tlas_instances[0];
        fixture.run(64, Vec3::ZERO, true);

        // Then
        assert_eq!(untouched, TlasInstance::default());
        let record = fixture.tlas_instances[0];
        assert_eq!(record.instance_mask, 0xff);
        assert_eq!(record.transform[0][3], 1.0);
    }
}
