//! Scene building blocks shared by the scenarios.

use glam::Vec3;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tessel_engine::core::tasks::Scheduler;
use tessel_engine::ecs::Entity;
use tessel_engine::scene::{Aabb, MeshSubset, Scene};

/// An initialized scheduler with at most `threads` workers per priority class.
pub fn scheduler(threads: u32) -> Scheduler {
    let mut scheduler = Scheduler::new();
    scheduler.initialize(threads);
    scheduler
}

/// A box mesh of the given half extents with `lods` levels of detail, one subset each.
pub fn box_mesh(scene: &mut Scene, name: &str, half_extents: Vec3, lods: u32) -> Entity {
    let material = scene.create_material(name);
    let mesh = scene.create_mesh(name);
    if let Some(component) = scene.meshes.get_mut(mesh) {
        component.aabb = Aabb::from_half_width(Vec3::ZERO, half_extents);
        component.lod_count = lods.max(1);
        for _ in 0..lods.max(1) {
            component.subsets.push(MeshSubset {
                material,
                index_offset: 0,
                index_count: 36,
            });
        }
    }
    mesh
}

/// A random point in a square of `extent` around the origin, at height `y`.
pub fn random_ground_point(rng: &mut ChaCha8Rng, extent: f32, y: f32) -> Vec3 {
    Vec3::new(rng.gen_range(-extent..extent), y, rng.gen_range(-extent..extent))
}

/// Place an object of `mesh` at `position`.
pub fn place(scene: &mut Scene, name: &str, mesh: Entity, position: Vec3) -> Entity {
    let object = scene.create_object(name);
    if let Some(component) = scene.objects.get_mut(object) {
        component.mesh = mesh;
    }
    if let Some(transform) = scene.transforms.get_mut(object) {
        transform.translate(position);
    }
    object
}
