use std::time::Duration;

use glam::{Quat, Vec3};
use crossbeam::channel::Receiver;
use log::{Level, error, info, warn};
use tessel_engine::core::logger::{self, LogMessage};
use tessel_engine::core::tasks::Scheduler;
use tessel_engine::core::time::{SIXTY_FPS, Time};
use tessel_engine::ecs::Entity;
use tessel_engine::gfx::{Capability, HeadlessDevice};
use tessel_engine::scene::{
    Aabb, AnimationChannel, AnimationComponent, AnimationDataComponent, AnimationPath, AnimationSampler,
    LightKind, MeshSubset, Scene, create_entity,
};

const GRID: i32 = 32;
const DEFAULT_FRAMES: u64 = 600;

/// A unit cube with one subset.
fn cube(scene: &mut Scene) -> Entity {
    let material = scene.create_material("cube material");
    let mesh = scene.create_mesh("cube");
    if let Some(component) = scene.meshes.get_mut(mesh) {
        component.aabb = Aabb::from_half_width(Vec3::ZERO, Vec3::splat(0.5));
        component.subsets.push(MeshSubset {
            material,
            index_offset: 0,
            index_count: 36,
        });
    }
    mesh
}

/// Bob `target` up and down once per second.
fn bob(scene: &mut Scene, target: Entity) {
    let data = create_entity();
    scene.animation_datas.insert(
        data,
        AnimationDataComponent {
            keyframe_times: vec![0.0, 0.5, 1.0],
            keyframe_data: vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        },
    );
    let mut animation = AnimationComponent::new(
        vec![AnimationChannel {
            target,
            path: AnimationPath::Translation,
            sampler_index: 0,
        }],
        vec![AnimationSampler {
            data,
            ..Default::default()
        }],
    );
    animation.fit_end(&scene.animation_datas);
    animation.play();
    scene.animations.insert(create_entity(), animation);
}

fn build(scene: &mut Scene) -> Vec<Entity> {
    let mesh = cube(scene);
    let mut spinners = Vec::new();
    for x in -GRID / 2..GRID / 2 {
        for z in -GRID / 2..GRID / 2 {
            let name = format!("cube {x} {z}");
            let object = scene.create_object(&name);
            if let Some(component) = scene.objects.get_mut(object) {
                component.mesh = mesh;
            }
            if let Some(transform) = scene.transforms.get_mut(object) {
                transform.translate(Vec3::new(x as f32 * 2.0, 0.0, z as f32 * 2.0));
            }
            match (x + z).rem_euclid(7) {
                0 => bob(scene, object),
                3 => spinners.push(object),
                _ => {}
            }
        }
    }

    let sun = scene.create_light("sun", Vec3::new(0.0, 50.0, 0.0), Vec3::ONE, 4.0, 0.0);
    if let Some(light) = scene.lights.get_mut(sun) {
        light.kind = LightKind::Directional;
    }
    scene.create_light("lamp", Vec3::new(4.0, 3.0, 4.0), Vec3::new(1.0, 0.8, 0.6), 10.0, 12.0);
    scene.create_probe("probe", Vec3::new(0.0, 2.0, 0.0));
    scene.create_emitter("sparks", Vec3::new(0.0, 1.0, 0.0));

    let camera = scene.create_camera("main camera", 1920.0, 1080.0, 0.1, 1000.0, std::f32::consts::FRAC_PI_3);
    if let Some(transform) = scene.transforms.get_mut(camera) {
        transform.translate(Vec3::new(0.0, 10.0, -40.0));
    }
    spinners
}

fn print_logs(logs: &Receiver<LogMessage>) {
    for message in logs.try_iter() {
        println!("[{:<5}] {}: {}", message.level, message.target, message.message);
    }
}

fn main() {
    let logs = match logger::init(Level::Info) {
        Ok(logs) => logs,
        Err(err) => {
            eprintln!("failed to install logger: {err}");
            return;
        }
    };

    let frames = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);

    let mut scheduler = Scheduler::new();
    scheduler.initialize(u32::MAX);
    info!("scheduler running on {} cores", scheduler.core_count());

    let device = HeadlessDevice::new().with_capability(Capability::RayTracing);
    let mut scene = Scene::new();
    let spinners = build(&mut scene);
    scene.acceleration_structure_update_requested = true;
    info!("built {scene:?}");

    let mut time = Time::new(SIXTY_FPS);
    let delta = Duration::from_nanos(SIXTY_FPS);
    while time.frame < frames {
        time = time.advance(delta);
        let dt = time.delta_seconds();
        let spin = Quat::from_rotation_y(dt);
        for &entity in &spinners {
            if let Some(transform) = scene.transforms.get_mut(entity) {
                transform.rotate(spin);
            }
        }

        if let Err(err) = scene.update(&scheduler, &device, dt) {
            error!("frame {} failed: {err}", time.frame);
            break;
        }
        device.advance_frame();

        let stats = scene.stats();
        if stats.skipped_references > 0 {
            warn!("frame {}: {} components skipped", time.frame, stats.skipped_references);
        }
        if time.frame % 60 == 0 {
            info!(
                "frame {} t={:.2}s: {} transforms, {} objects, {} animation queues, bounds {:?}..{:?}",
                time.frame,
                time.time.as_secs_f32(),
                stats.transforms_updated,
                stats.objects,
                stats.animation_queues,
                scene.bounds.min,
                scene.bounds.max,
            );
        }
        print_logs(&logs);
    }

    info!("{} bytes of device memory in use", device.allocated_bytes());
    drop(scene);
    scheduler.shutdown();
    print_logs(&logs);
}
