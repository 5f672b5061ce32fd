//! Crowd benchmark scenario.
//!
//! Simulates animated characters:
//! - Every character walks along its own looping translation track
//! - Characters are grouped, and every group shares a sway animation rotating all its members
//!
//! This scenario tests animation partitioning (shared targets force animations into one queue),
//! keyframe sampling and the parallel queue execution.

use glam::{Quat, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessel_engine::core::tasks::Scheduler;
use tessel_engine::ecs::Entity;
use tessel_engine::gfx::HeadlessDevice;
use tessel_engine::scene::{
    AnimationChannel, AnimationComponent, AnimationDataComponent, AnimationPath, AnimationSampler, Interpolation,
    Scene, create_entity,
};

use crate::fixtures::{box_mesh, place, random_ground_point, scheduler};
use crate::scenarios::Scenario;

/// Configuration for the crowd benchmark.
#[derive(Debug, Clone)]
pub struct CrowdConfig {
    pub character_count: usize,
    /// Characters sharing one sway animation.
    pub group_size: usize,
    pub extent: f32,
    pub delta_time: f32,
    pub seed: u64,
    pub threads: u32,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            character_count: 5_000,
            group_size: 4,
            extent: 200.0,
            delta_time: 1.0 / 60.0,
            seed: 777,
            threads: 8,
        }
    }
}

/// Crowd benchmark scenario.
pub struct CrowdScenario {
    config: CrowdConfig,
    scene: Scene,
    scheduler: Scheduler,
    device: HeadlessDevice,
}

fn keyframes(scene: &mut Scene, keyframe_times: Vec<f32>, keyframe_data: Vec<f32>) -> Entity {
    let data = create_entity();
    scene.animation_datas.insert(
        data,
        AnimationDataComponent {
            keyframe_times,
            keyframe_data,
        },
    );
    data
}

fn start(scene: &mut Scene, data: Entity, mode: Interpolation, path: AnimationPath, targets: &[Entity]) {
    let channels = targets
        .iter()
        .map(|&target| AnimationChannel {
            target,
            path,
            sampler_index: 0,
        })
        .collect();
    let mut animation = AnimationComponent::new(channels, vec![AnimationSampler { data, mode }]);
    animation.fit_end(&scene.animation_datas);
    animation.play();
    scene.animations.insert(create_entity(), animation);
}

impl CrowdScenario {
    pub fn new() -> Self {
        Self::with_config(CrowdConfig::default())
    }

    pub fn with_config(config: CrowdConfig) -> Self {
        Self {
            scene: Scene::new(),
            scheduler: scheduler(config.threads),
            device: HeadlessDevice::new(),
            config,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Queues the animations form: one per group.
    pub fn expected_queue_count(&self) -> usize {
        self.config.character_count.div_ceil(self.config.group_size.max(1))
    }
}

impl Default for CrowdScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for CrowdScenario {
    fn name(&self) -> &'static str {
        "crowd"
    }

    fn description(&self) -> &'static str {
        "Animated characters walking, grouped under shared sway animations"
    }

    fn entity_count(&self) -> usize {
        self.config.character_count
    }

    fn setup(&mut self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let scene = &mut self.scene;
        let body = box_mesh(scene, "character", Vec3::new(0.3, 0.9, 0.3), 2);

        let sway = Quat::from_rotation_z(0.2);
        let sway_data = keyframes(
            scene,
            vec![0.0, 1.0, 2.0],
            vec![0.0, 0.0, 0.0, 1.0, sway.x, sway.y, sway.z, sway.w, 0.0, 0.0, 0.0, 1.0],
        );

        let characters: Vec<Entity> = (0..self.config.character_count)
            .map(|_| place(scene, "character", body, Vec3::ZERO))
            .collect();

        for &character in &characters {
            let from = random_ground_point(&mut rng, self.config.extent, 0.9);
            let to = from + Vec3::new(rng.gen_range(-10.0..10.0), 0.0, rng.gen_range(-10.0..10.0));
            let length = rng.gen_range(2.0..8.0);
            let walk = keyframes(
                scene,
                vec![0.0, length * 0.5, length],
                vec![from.x, from.y, from.z, to.x, to.y, to.z, from.x, from.y, from.z],
            );
            start(scene, walk, Interpolation::Linear, AnimationPath::Translation, &[character]);
        }

        for group in characters.chunks(self.config.group_size.max(1)) {
            start(scene, sway_data, Interpolation::Linear, AnimationPath::Rotation, group);
        }
    }

    fn update(&mut self) {
        if let Err(err) = self.scene.update(&self.scheduler, &self.device, self.config.delta_time) {
            panic!("crowd frame failed: {err}");
        }
        self.device.advance_frame();
    }

    fn teardown(&mut self) {
        self.scene.clear();
    }
}
