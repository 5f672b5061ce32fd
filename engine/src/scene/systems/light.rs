use glam::{Mat4, Vec3};

use crate::core::sync::SpinLock;
use crate::core::tasks::{Context, DisjointSlice, Scheduler};
use crate::ecs::ComponentManager;
use crate::scene::bounds::Aabb;
use crate::scene::components::{
    CameraComponent, DecalComponent, EnvironmentProbeComponent, ForceFieldComponent, LightComponent, LightKind,
    MaterialComponent, TransformComponent, WeatherComponent,
};

use super::FrameCounters;

/// Half width of the bounds given to lights that reach everywhere.
const UNBOUNDED_HALF_WIDTH: f32 = 10_000.0;

#[inline]
fn max_scale(world: &Mat4) -> f32 {
    let (scale, _, _) = world.to_scale_rotation_translation();
    scale.max_element()
}

/// World space position, direction, range and bounds of every light.
///
/// The lowest-index directional light becomes `most_important_light`, picked under a spin lock
/// as lights update concurrently.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_light_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    lights: &'env mut ComponentManager<LightComponent>,
    aabbs: &'env mut [Aabb],
    transforms: &'env ComponentManager<TransformComponent>,
    camera_position: Vec3,
    most_important_light: &'env SpinLock<Option<usize>>,
    counters: &'env FrameCounters,
) {
    let (lookup, rows) = lights.split_mut();
    let rows = DisjointSlice::new(rows);
    let aabbs = DisjointSlice::new(aabbs);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let entity = lookup.entity(row);
        // SAFETY: one job per row for both slices.
        let (light, aabb) = unsafe { (rows.get_mut(row), aabbs.get_mut(row)) };

        *aabb = Aabb::EMPTY;
        let Some(transform) = transforms.get(entity) else {
            counters.skip("light", entity, "transform");
            return;
        };
        let world = transform.world;
        let (scale, rotation, position) = world.to_scale_rotation_translation();
        light.position = position;
        light.rotation = rotation;
        light.scale = scale;
        light.direction = world.transform_vector3(Vec3::Y).normalize_or(Vec3::Y);
        light.range_global = light.range_local * scale.max_element();

        match light.kind {
            LightKind::Directional => {
                *aabb = Aabb::from_half_width(camera_position, Vec3::splat(UNBOUNDED_HALF_WIDTH));
                let mut candidate = most_important_light.lock();
                if candidate.is_none_or(|current| row < current) {
                    *candidate = Some(row);
                }
            }
            LightKind::Point | LightKind::Spot => {
                *aabb = Aabb::from_half_width(position, Vec3::splat(light.range_global));
            }
            LightKind::Area => {
                light.right = world.transform_vector3(Vec3::NEG_X).normalize_or(Vec3::NEG_X);
                light.front = world.transform_vector3(Vec3::NEG_Z).normalize_or(Vec3::NEG_Z);
                *aabb = Aabb::from_half_width(position, Vec3::splat(UNBOUNDED_HALF_WIDTH));
            }
        }
    });
}

pub(crate) fn run_camera_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    cameras: &'env mut ComponentManager<CameraComponent>,
    transforms: &'env ComponentManager<TransformComponent>,
) {
    let (lookup, rows) = cameras.split_mut();
    let rows = DisjointSlice::new(rows);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        // SAFETY: one job per row.
        let camera = unsafe { rows.get_mut(row) };
        if let Some(transform) = transforms.get(lookup.entity(row)) {
            camera.transform_camera(transform);
        }
        camera.update_camera();
    });
}

/// Decals take their color from the material on the same entity.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_decal_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    decals: &'env mut ComponentManager<DecalComponent>,
    aabbs: &'env mut [Aabb],
    transforms: &'env ComponentManager<TransformComponent>,
    materials: &'env ComponentManager<MaterialComponent>,
    counters: &'env FrameCounters,
) {
    let (lookup, rows) = decals.split_mut();
    let rows = DisjointSlice::new(rows);
    let aabbs = DisjointSlice::new(aabbs);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let entity = lookup.entity(row);
        // SAFETY: one job per row for both slices.
        let (decal, aabb) = unsafe { (rows.get_mut(row), aabbs.get_mut(row)) };

        *aabb = Aabb::EMPTY;
        let Some(transform) = transforms.get(entity) else {
            counters.skip("decal", entity, "transform");
            return;
        };
        decal.world = transform.world;
        decal.front = decal.world.transform_vector3(Vec3::Z);
        decal.position = transform.position();
        decal.range = max_scale(&decal.world) * 2.0;
        *aabb = Aabb::from_half_width(Vec3::ZERO, Vec3::ONE).transform(&decal.world);

        match materials.get(entity) {
            Some(material) => {
                decal.color = material.base_color;
                decal.emissive = material.emissive_strength();
            }
            None => counters.skip("decal", entity, "material"),
        }
    });
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn run_probe_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    probes: &'env mut ComponentManager<EnvironmentProbeComponent>,
    aabbs: &'env mut [Aabb],
    transforms: &'env ComponentManager<TransformComponent>,
    counters: &'env FrameCounters,
) {
    let (lookup, rows) = probes.split_mut();
    let rows = DisjointSlice::new(rows);
    let aabbs = DisjointSlice::new(aabbs);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let entity = lookup.entity(row);
        // SAFETY: one job per row for both slices.
        let (probe, aabb) = unsafe { (rows.get_mut(row), aabbs.get_mut(row)) };

        *aabb = Aabb::EMPTY;
        let Some(transform) = transforms.get(entity) else {
            counters.skip("probe", entity, "transform");
            return;
        };
        probe.position = transform.position();
        probe.inverse_matrix = transform.world.inverse();
        probe.range = max_scale(&transform.world) * 2.0;
        *aabb = Aabb::from_half_width(Vec3::ZERO, Vec3::ONE).transform(&transform.world);
    });
}

pub(crate) fn run_force_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    forces: &'env mut ComponentManager<ForceFieldComponent>,
    transforms: &'env ComponentManager<TransformComponent>,
    counters: &'env FrameCounters,
) {
    let (lookup, rows) = forces.split_mut();
    let rows = DisjointSlice::new(rows);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let entity = lookup.entity(row);
        // SAFETY: one job per row.
        let force = unsafe { rows.get_mut(row) };
        let Some(transform) = transforms.get(entity) else {
            counters.skip("force field", entity, "transform");
            return;
        };
        force.position = transform.position();
        force.direction = transform.world.transform_vector3(Vec3::NEG_Y).normalize_or(Vec3::NEG_Y);
        force.range_global = force.range_local * max_scale(&transform.world);
    });
}

/// The first weather component is the frame's weather. Its light selection is redone each frame.
pub(crate) fn run_weather_system(weathers: &ComponentManager<WeatherComponent>) -> WeatherComponent {
    let mut weather = weathers.components().first().cloned().unwrap_or_default();
    weather.most_important_light_index = None;
    weather
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tasks::Priority;
    use crate::ecs::Entity;
    use glam::Quat;

    fn scheduler() -> Scheduler {
        let mut scheduler = Scheduler::new();
        scheduler.initialize(4);
        scheduler
    }

    fn transform(translation: Vec3, rotation: Quat, scale: Vec3) -> TransformComponent {
        let mut transform = TransformComponent {
            translation_local: translation,
            rotation_local: rotation,
            scale_local: scale,
            ..Default::default()
        };
        transform.update_transform();
        transform
    }

    #[test]
    fn lights_get_world_state_and_bounds() {
        // Given
        let scheduler = scheduler();
        let mut transforms: ComponentManager<TransformComponent> = ComponentManager::new();
        let mut lights = ComponentManager::new();
        let point = Entity::from_raw(1);
        let spot = Entity::from_raw(2);
        transforms.insert(point, transform(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY, Vec3::splat(2.0)));
        transforms.insert(
            spot,
            transform(Vec3::ZERO, Quat::from_rotation_x(std::f32::consts::FRAC_PI_2), Vec3::ONE),
        );
        lights.insert(point, LightComponent { range_local: 5.0, ..Default::default() });
        lights.insert(spot, LightComponent { kind: LightKind::Spot, ..Default::default() });
        let mut aabbs = vec![Aabb::EMPTY; 2];
        let candidate = SpinLock::new(None);
        let counters = FrameCounters::default();

        // When
        scheduler.scope(Priority::High, |ctx| {
            run_light_system(&scheduler, ctx, 1, &mut lights, &mut aabbs, &transforms, Vec3::ZERO, &candidate, &counters);
        });

        // Then
        let point_light = lights.get(point).unwrap();
        assert_eq!(point_light.range(), 10.0);
        assert!(point_light.position.abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
        assert!(aabbs[0].max.abs_diff_eq(Vec3::new(11.0, 12.0, 13.0), 1e-5));
        assert!(lights.get(spot).unwrap().direction.abs_diff_eq(Vec3::Z, 1e-6));
        assert_eq!(candidate.into_inner(), None);
    }

    #[test]
    fn lowest_directional_light_is_most_important() {
        // Given
        let scheduler = scheduler();
        let mut transforms: ComponentManager<TransformComponent> = ComponentManager::new();
        let mut lights = ComponentManager::new();
        for id in 1..=64 {
            let entity = Entity::from_raw(id);
            transforms.create(entity).update_transform();
            let kind = if id % 3 == 0 { LightKind::Directional } else { LightKind::Point };
            lights.insert(entity, LightComponent { kind, ..Default::default() });
        }
        let mut aabbs = vec![Aabb::EMPTY; 64];
        let candidate = SpinLock::new(None);
        let counters = FrameCounters::default();

        // When
        scheduler.scope(Priority::High, |ctx| {
            let eye = Vec3::new(0.0, 5.0, 0.0);
            run_light_system(&scheduler, ctx, 1, &mut lights, &mut aabbs, &transforms, eye, &candidate, &counters);
        });

        // Then: entity 3 sits at row 2
        assert_eq!(candidate.into_inner(), Some(2));
        assert!(aabbs[2].contains(Vec3::new(0.0, 5.0, 9_000.0)));
    }

    #[test]
    fn decal_copies_material_and_scales_range() {
        // Given
        let scheduler = scheduler();
        let entity = Entity::from_raw(1);
        let mut transforms: ComponentManager<TransformComponent> = ComponentManager::new();
        transforms.insert(entity, transform(Vec3::ZERO, Quat::IDENTITY, Vec3::new(1.0, 3.0, 2.0)));
        let mut materials = ComponentManager::new();
        materials.insert(
            entity,
            MaterialComponent {
                base_color: glam::Vec4::new(0.5, 0.5, 0.5, 1.0),
                emissive_color: glam::Vec4::new(1.0, 1.0, 1.0, 4.0),
                ..Default::default()
            },
        );
        let mut decals = ComponentManager::new();
        decals.create(entity);
        let mut aabbs = vec![Aabb::EMPTY];
        let counters = FrameCounters::default();

        // When
        scheduler.scope(Priority::High, |ctx| {
            run_decal_system(&scheduler, ctx, 64, &mut decals, &mut aabbs, &transforms, &materials, &counters);
        });

        // Then
        let decal = decals.get(entity).unwrap();
        assert_eq!(decal.range, 6.0);
        assert_eq!(decal.emissive, 4.0);
        assert!(aabbs[0].max.abs_diff_eq(Vec3::new(1.0, 3.0, 2.0), 1e-6));
    }

    #[test]
    fn probe_and_force_follow_transform() {
        // Given
        let scheduler = scheduler();
        let entity = Entity::from_raw(1);
        let mut transforms: ComponentManager<TransformComponent> = ComponentManager::new();
        transforms.insert(entity, transform(Vec3::new(0.0, 4.0, 0.0), Quat::IDENTITY, Vec3::ONE));
        let mut probes = ComponentManager::new();
        probes.create(entity);
        let mut forces = ComponentManager::new();
        forces.insert(entity, ForceFieldComponent { range_local: 3.0, ..Default::default() });
        let mut aabbs = vec![Aabb::EMPTY];
        let counters = FrameCounters::default();

        // When
        scheduler.scope(Priority::High, |ctx| {
            run_probe_system(&scheduler, ctx, 64, &mut probes, &mut aabbs, &transforms, &counters);
            run_force_system(&scheduler, ctx, 64, &mut forces, &transforms, &counters);
        });

        // Then
        let probe = probes.get(entity).unwrap();
        assert_eq!(probe.range, 2.0);
        assert!(probe.inverse_matrix.transform_point3(Vec3::new(0.0, 4.0, 0.0)).abs_diff_eq(Vec3::ZERO, 1e-6));
        let force = forces.get(entity).unwrap();
        assert_eq!(force.direction, Vec3::NEG_Y);
        assert_eq!(force.range_global, 3.0);
    }

    #[test]
    fn missing_transform_is_counted() {
        let scheduler = scheduler();
        let mut forces = ComponentManager::new();
        forces.create(Entity::from_raw(1));
        let counters = FrameCounters::default();
        let transforms: ComponentManager<TransformComponent> = ComponentManager::new();
        scheduler.scope(Priority::High, |ctx| {
            run_force_system(&scheduler, ctx, 64, &mut forces, &transforms, &counters);
        });
        assert_eq!(counters.skipped_references.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn weather_resets_light_selection() {
        let mut weathers = ComponentManager::new();
        weathers.insert(
            Entity::from_raw(1),
            WeatherComponent {
                fog_end: 42.0,
                most_important_light_index: Some(3),
                ..Default::default()
            },
        );
        let weather = run_weather_system(&weathers);
        assert_eq!(weather.fog_end, 42.0);
        assert_eq!(weather.most_important_light_index, None);
        assert_eq!(run_weather_system(&ComponentManager::new()), WeatherComponent::default());
    }
}
