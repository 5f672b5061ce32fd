//! City benchmark scenario.
//!
//! - Buildings with a few props attached to each
//! - Vehicles driving every frame, so a fraction of transforms is dirty
//! - Point lights, decals and probes scattered between the buildings
//!
//! This scenario tests the full scene frame: hierarchy propagation, object bounds and LOD,
//! and the GPU record uploads.

use glam::{Quat, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessel_engine::core::tasks::Scheduler;
use tessel_engine::ecs::Entity;
use tessel_engine::gfx::{Capability, HeadlessDevice};
use tessel_engine::scene::Scene;

use crate::fixtures::{box_mesh, place, random_ground_point, scheduler};
use crate::scenarios::Scenario;

/// Configuration for the city benchmark.
#[derive(Debug, Clone)]
pub struct CityConfig {
    pub building_count: usize,
    pub props_per_building: usize,
    pub vehicle_count: usize,
    pub light_count: usize,
    /// Half extent of the city square.
    pub extent: f32,
    pub delta_time: f32,
    pub seed: u64,
    pub threads: u32,
    /// Write ray tracing instances every frame.
    pub ray_tracing: bool,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            building_count: 2_000,
            props_per_building: 3,
            vehicle_count: 1_000,
            light_count: 200,
            extent: 500.0,
            delta_time: 1.0 / 60.0,
            seed: 4242,
            threads: 8,
            ray_tracing: false,
        }
    }
}

struct Vehicle {
    entity: Entity,
    velocity: Vec3,
}

/// City benchmark scenario.
pub struct CityScenario {
    config: CityConfig,
    scene: Scene,
    scheduler: Scheduler,
    device: HeadlessDevice,
    vehicles: Vec<Vehicle>,
}

impl CityScenario {
    pub fn new() -> Self {
        Self::with_config(CityConfig::default())
    }

    pub fn with_config(config: CityConfig) -> Self {
        let device = if config.ray_tracing {
            HeadlessDevice::new().with_capability(Capability::RayTracing)
        } else {
            HeadlessDevice::new()
        };
        Self {
            scene: Scene::new(),
            scheduler: scheduler(config.threads),
            device,
            vehicles: Vec::new(),
            config,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }
}

impl Default for CityScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for CityScenario {
    fn name(&self) -> &'static str {
        "city"
    }

    fn description(&self) -> &'static str {
        "Static buildings with attached props, moving vehicles and lights"
    }

    fn entity_count(&self) -> usize {
        let config = &self.config;
        config.building_count * (1 + config.props_per_building) + config.vehicle_count + config.light_count
    }

    fn setup(&mut self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let extent = self.config.extent;
        let scene = &mut self.scene;

        let building = box_mesh(scene, "building", Vec3::new(5.0, 20.0, 5.0), 3);
        let prop = box_mesh(scene, "prop", Vec3::splat(0.5), 2);
        let car = box_mesh(scene, "car", Vec3::new(1.0, 0.75, 2.0), 2);

        for _ in 0..self.config.building_count {
            let position = random_ground_point(&mut rng, extent, 20.0);
            let parent = place(scene, "building", building, position);
            for _ in 0..self.config.props_per_building {
                let offset = Vec3::new(rng.gen_range(-5.0..5.0), 20.5, rng.gen_range(-5.0..5.0));
                let child = place(scene, "prop", prop, offset);
                scene.component_attach(child, parent, true);
            }
        }

        for _ in 0..self.config.vehicle_count {
            let entity = place(scene, "car", car, random_ground_point(&mut rng, extent, 0.75));
            let heading = Quat::from_rotation_y(rng.gen_range(0.0..std::f32::consts::TAU));
            self.vehicles.push(Vehicle {
                entity,
                velocity: heading * Vec3::new(0.0, 0.0, rng.gen_range(5.0..20.0)),
            });
        }

        for _ in 0..self.config.light_count {
            let position = random_ground_point(&mut rng, extent, 6.0);
            let color = Vec3::new(rng.gen_range(0.5..1.0), rng.gen_range(0.5..1.0), rng.gen_range(0.5..1.0));
            scene.create_light("street light", position, color, 5.0, 15.0);
        }
        for index in 0..self.config.light_count / 4 {
            let decal = scene.create_decal("graffiti");
            if let Some(transform) = scene.transforms.get_mut(decal) {
                transform.translate(random_ground_point(&mut rng, extent, 0.1));
            }
            if index % 8 == 0 {
                scene.create_probe("probe", random_ground_point(&mut rng, extent, 10.0));
            }
        }
        scene.camera.eye = Vec3::new(0.0, 50.0, -extent);
    }

    fn update(&mut self) {
        let dt = self.config.delta_time;
        let extent = self.config.extent;
        for vehicle in &mut self.vehicles {
            let Some(transform) = self.scene.transforms.get_mut(vehicle.entity) else {
                continue;
            };
            transform.translate(vehicle.velocity * dt);
            let position = transform.translation_local;
            if position.x.abs() > extent || position.z.abs() > extent {
                vehicle.velocity = -vehicle.velocity;
            }
        }

        self.scene.acceleration_structure_update_requested = self.config.ray_tracing;
        if let Err(err) = self.scene.update(&self.scheduler, &self.device, dt) {
            panic!("city frame failed: {err}");
        }
        self.device.advance_frame();
    }

    fn teardown(&mut self) {
        self.scene.clear();
        self.vehicles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> CityConfig {
        CityConfig {
            building_count: 20,
            props_per_building: 2,
            vehicle_count: 10,
            light_count: 8,
            extent: 50.0,
            threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn city_scenario_setup() {
        let mut scenario = CityScenario::with_config(small());

        scenario.setup();
        assert_eq!(scenario.scene().objects.len(), 20 * 3 + 10);
        assert_eq!(scenario.scene().hierarchy.len(), 40);
        assert_eq!(scenario.scene().lights.len(), 8);

        scenario.teardown();
        assert!(scenario.scene().objects.is_empty());
    }

    #[test]
    fn city_scenario_update() {
        let mut scenario = CityScenario::with_config(small());
        scenario.setup();

        for _ in 0..5 {
            scenario.update();
        }

        let stats = scenario.scene().stats();
        assert_eq!(stats.objects, 70);
        assert_eq!(stats.skipped_references, 0);
        // Only the vehicles move after the first frame.
        assert_eq!(stats.transforms_updated, 10);
        assert!(!scenario.scene().bounds.is_empty());

        scenario.teardown();
    }
}
