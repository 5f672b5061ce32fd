//! The scene: component storage for everything in a world, and the per-frame update pipeline.
//!
//! [`Scene::update`] runs the frame as a fixed sequence of segments. Inside a segment, systems
//! fan out over the job scheduler inside one [`Scheduler::scope`]; a segment ends when its scope
//! returns, and the next segment may read anything the previous ones wrote.
//!
//! ```text
//! scripts, terrain, upload buffers
//! animation scan ─────────────────────┐ (background)
//! A: prev transforms, expressions,    │
//!    materials, mesh pre-pass   wait  │
//! animations ◄──────────────── wait ──┘
//! physics, transforms           wait
//! hierarchy, springs, IK
//! C: meshes, armatures, impostors, weather   wait
//! D: objects, lights, cameras, decals, probes, forces, particles,
//!    sound, video, sprites, fonts            wait
//! bounds, impostor records, acceleration structure
//! ```
//!
//! Component rows are stable for the whole update: side tables such as
//! [`aabb_objects`](Scene::aabb_objects) are indexed by row.

pub mod animation;
pub mod bounds;
mod collaborators;
pub mod components;
pub mod gpu;
mod systems;


use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;
use thiserror::Error;

use crate::core::sync::SpinLock;
use crate::core::tasks::{Priority, Scheduler};
use crate::ecs::{Allocator, ComponentManager, Entity};
use crate::gfx::{
    Capability, GraphicsDevice, GraphicsError, ShaderGeometry, ShaderMaterial, ShaderMeshInstance, TlasInstance,
};

pub use animation::AnimationQueue;
pub use bounds::Aabb;
pub use collaborators::{AudioSink, PhysicsEngine, ScriptHost, TerrainGenerator};
pub use components::*;
pub use gpu::{GpuBuffers, UploadRing};

use systems::{FrameCounters, ObjectSystem, Propagated};

/// Entity ids are unique across every scene of the process, so scenes can always be merged.
static ENTITIES: Allocator = Allocator::new();

/// A new, process-wide unique entity.
#[inline]
pub fn create_entity() -> Entity {
    ENTITIES.alloc()
}

/// Tuning of the update pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Group size of systems with heavy per-component work.
    pub small_group_size: u32,
    /// Group size of systems with light per-component work.
    pub large_group_size: u32,
    /// Upload buffers grow to `required * gpu_buffer_headroom` records.
    pub gpu_buffer_headroom: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            small_group_size: 64,
            large_group_size: 256,
            gpu_buffer_headroom: 1.5,
        }
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("scene update failed on the graphics device: {0}")]
    Graphics(#[from] GraphicsError),
}

/// What the last [`Scene::update`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// World matrices rebuilt by the transform system.
    pub transforms_updated: u32,
    /// Queues the animations were partitioned into.
    pub animation_queues: usize,
    pub objects: usize,
    /// Impostor records written.
    pub impostors: usize,
    /// Components skipped because something they reference is missing.
    pub skipped_references: u32,
}

pub struct Scene {
    pub names: ComponentManager<NameComponent>,
    pub layers: ComponentManager<LayerComponent>,
    pub transforms: ComponentManager<TransformComponent>,
    pub prev_transforms: ComponentManager<PreviousFrameTransformComponent>,
    pub hierarchy: ComponentManager<HierarchyComponent>,
    pub materials: ComponentManager<MaterialComponent>,
    pub meshes: ComponentManager<MeshComponent>,
    pub impostors: ComponentManager<ImpostorComponent>,
    pub objects: ComponentManager<ObjectComponent>,
    pub rigid_bodies: ComponentManager<RigidBodyComponent>,
    pub armatures: ComponentManager<ArmatureComponent>,
    pub lights: ComponentManager<LightComponent>,
    pub cameras: ComponentManager<CameraComponent>,
    pub probes: ComponentManager<EnvironmentProbeComponent>,
    pub forces: ComponentManager<ForceFieldComponent>,
    pub decals: ComponentManager<DecalComponent>,
    pub animations: ComponentManager<AnimationComponent>,
    pub animation_datas: ComponentManager<AnimationDataComponent>,
    pub emitters: ComponentManager<EmitterComponent>,
    pub hairs: ComponentManager<HairParticleComponent>,
    pub weathers: ComponentManager<WeatherComponent>,
    pub sounds: ComponentManager<SoundComponent>,
    pub videos: ComponentManager<VideoComponent>,
    pub inverse_kinematics: ComponentManager<InverseKinematicsComponent>,
    pub springs: ComponentManager<SpringComponent>,
    pub expressions: ComponentManager<ExpressionComponent>,
    pub scripts: ComponentManager<ScriptComponent>,
    pub sprites: ComponentManager<SpriteComponent>,
    pub fonts: ComponentManager<FontComponent>,

    /// The main camera. Objects measure LOD and impostor distances from its eye.
    pub camera: CameraComponent,
    /// The frame's weather, taken from the first weather component.
    pub weather: WeatherComponent,
    /// Bounds of every object. Computed.
    pub bounds: Aabb,
    /// Write top-level acceleration structure instances this frame.
    pub acceleration_structure_update_requested: bool,
    pub config: Config,

    pub physics: Option<Box<dyn PhysicsEngine>>,
    pub audio: Option<Box<dyn AudioSink>>,
    pub script_host: Option<Box<dyn ScriptHost>>,
    pub terrain: Option<Box<dyn TerrainGenerator>>,

    aabb_objects: Vec<Aabb>,
    aabb_lights: Vec<Aabb>,
    aabb_decals: Vec<Aabb>,
    aabb_probes: Vec<Aabb>,
    parallel_bounds: Vec<Aabb>,
    animation_queues: Vec<AnimationQueue>,
    propagated: Vec<Propagated>,
    gpu: GpuBuffers,
    counters: FrameCounters,
    stats: FrameStats,
    time: f32,
}

/// Operations applied to every component manager alike. The hierarchy is handled on its own
/// since removing from it has to keep parents ahead of their children.
macro_rules! component_managers {
    ($($field:ident),* $(,)?) => {
        impl Scene {
            fn clear_components(&mut self) {
                $(self.$field.clear();)*
                self.hierarchy.clear();
            }

            fn merge_components(&mut self, other: &mut Scene) {
                $(self.$field.merge(&mut other.$field);)*
                self.hierarchy.merge(&mut other.hierarchy);
            }

            fn remove_components(&mut self, entity: Entity) {
                $(self.$field.remove(entity);)*
                self.hierarchy.remove_keep_sorted(entity);
            }
        }
    };
}

component_managers!(
    names,
    layers,
    transforms,
    prev_transforms,
    materials,
    meshes,
    impostors,
    objects,
    rigid_bodies,
    armatures,
    lights,
    cameras,
    probes,
    forces,
    decals,
    animations,
    animation_datas,
    emitters,
    hairs,
    weathers,
    sounds,
    videos,
    inverse_kinematics,
    springs,
    expressions,
    scripts,
    sprites,
    fonts,
);

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("transforms", &self.transforms.len())
            .field("objects", &self.objects.len())
            .field("meshes", &self.meshes.len())
            .field("lights", &self.lights.len())
            .field("animations", &self.animations.len())
            .field("bounds", &self.bounds)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            names: ComponentManager::new(),
            layers: ComponentManager::new(),
            transforms: ComponentManager::new(),
            prev_transforms: ComponentManager::new(),
            hierarchy: ComponentManager::new(),
            materials: ComponentManager::new(),
            meshes: ComponentManager::new(),
            impostors: ComponentManager::new(),
            objects: ComponentManager::new(),
            rigid_bodies: ComponentManager::new(),
            armatures: ComponentManager::new(),
            lights: ComponentManager::new(),
            cameras: ComponentManager::new(),
            probes: ComponentManager::new(),
            forces: ComponentManager::new(),
            decals: ComponentManager::new(),
            animations: ComponentManager::new(),
            animation_datas: ComponentManager::new(),
            emitters: ComponentManager::new(),
            hairs: ComponentManager::new(),
            weathers: ComponentManager::new(),
            sounds: ComponentManager::new(),
            videos: ComponentManager::new(),
            inverse_kinematics: ComponentManager::new(),
            springs: ComponentManager::new(),
            expressions: ComponentManager::new(),
            scripts: ComponentManager::new(),
            sprites: ComponentManager::new(),
            fonts: ComponentManager::new(),
            camera: CameraComponent::default(),
            weather: WeatherComponent::default(),
            bounds: Aabb::EMPTY,
            acceleration_structure_update_requested: false,
            config: Config::default(),
            physics: None,
            audio: None,
            script_host: None,
            terrain: None,
            aabb_objects: Vec::new(),
            aabb_lights: Vec::new(),
            aabb_decals: Vec::new(),
            aabb_probes: Vec::new(),
            parallel_bounds: Vec::new(),
            animation_queues: Vec::new(),
            propagated: Vec::new(),
            gpu: GpuBuffers::default(),
            counters: FrameCounters::default(),
            stats: FrameStats::default(),
            time: 0.0,
        }
    }

    pub fn with_config(config: Config) -> Self {
        Self { config, ..Self::new() }
    }

    // ==== Computed state ====

    /// World bounds of each object, by object row.
    #[inline]
    pub fn aabb_objects(&self) -> &[Aabb] {
        &self.aabb_objects
    }

    #[inline]
    pub fn aabb_lights(&self) -> &[Aabb] {
        &self.aabb_lights
    }

    #[inline]
    pub fn aabb_decals(&self) -> &[Aabb] {
        &self.aabb_decals
    }

    #[inline]
    pub fn aabb_probes(&self) -> &[Aabb] {
        &self.aabb_probes
    }

    /// How the last update partitioned the animations.
    #[inline]
    pub fn animation_queues(&self) -> &[AnimationQueue] {
        &self.animation_queues
    }

    #[inline]
    pub fn gpu(&self) -> &GpuBuffers {
        &self.gpu
    }

    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Seconds of scene time, the sum of every `dt` passed to [`update`](Scene::update).
    #[inline]
    pub fn time(&self) -> f32 {
        self.time
    }

    // ==== Entities ====

    /// Remove every entity and all computed state. Collaborators and config are kept.
    pub fn clear(&mut self) {
        self.clear_components();
        self.aabb_objects.clear();
        self.aabb_lights.clear();
        self.aabb_decals.clear();
        self.aabb_probes.clear();
        self.parallel_bounds.clear();
        self.animation_queues.clear();
        self.propagated.clear();
        self.bounds = Aabb::EMPTY;
        self.stats = FrameStats::default();
    }

    /// Move every entity of `other` into this scene, leaving `other` empty.
    pub fn merge(&mut self, other: &mut Scene) {
        self.merge_components(other);
        self.bounds = self.bounds.merge(&other.bounds);
        other.clear();
    }

    /// Remove `entity` from every component manager. With `recursive`, everything attached below
    /// it goes too; otherwise its children are detached and stay in place.
    pub fn remove_entity(&mut self, entity: Entity, recursive: bool) {
        if recursive {
            let children: Vec<Entity> = self
                .hierarchy
                .iter()
                .filter(|(_, node)| node.parent == entity)
                .map(|(child, _)| child)
                .collect();
            for child in children {
                self.remove_entity(child, true);
            }
        } else {
            self.component_detach_children(entity);
        }
        self.component_detach(entity);
        self.remove_components(entity);
    }

    /// The first entity named `name`.
    pub fn find_by_name(&self, name: &str) -> Option<Entity> {
        self.names
            .iter()
            .find(|(_, component)| component.name == name)
            .map(|(entity, _)| entity)
    }

    // ==== Creation ====

    fn create_named(&mut self, name: &str) -> Entity {
        let entity = create_entity();
        self.names.insert(entity, NameComponent::new(name));
        entity
    }

    fn create_placed(&mut self, name: &str, position: Vec3) -> Entity {
        let entity = self.create_named(name);
        self.layers.create(entity);
        let transform = self.transforms.create(entity);
        transform.translate(position);
        transform.update_transform();
        entity
    }

    pub fn create_material(&mut self, name: &str) -> Entity {
        let entity = self.create_named(name);
        self.materials.create(entity);
        entity
    }

    pub fn create_mesh(&mut self, name: &str) -> Entity {
        let entity = self.create_named(name);
        self.meshes.create(entity);
        entity
    }

    pub fn create_object(&mut self, name: &str) -> Entity {
        let entity = self.create_placed(name, Vec3::ZERO);
        self.prev_transforms.create(entity);
        self.objects.create(entity);
        entity
    }

    pub fn create_light(&mut self, name: &str, position: Vec3, color: Vec3, intensity: f32, range: f32) -> Entity {
        let entity = self.create_placed(name, position);
        self.lights.insert(
            entity,
            LightComponent {
                color,
                intensity,
                range_local: range,
                range_global: range,
                ..Default::default()
            },
        );
        entity
    }

    pub fn create_force(&mut self, name: &str, position: Vec3) -> Entity {
        let entity = self.create_placed(name, position);
        self.forces.create(entity);
        entity
    }

    pub fn create_probe(&mut self, name: &str, position: Vec3) -> Entity {
        let entity = self.create_placed(name, position);
        self.probes.create(entity);
        entity
    }

    /// A decal, with a material of its own to take its color from.
    pub fn create_decal(&mut self, name: &str) -> Entity {
        let entity = self.create_placed(name, Vec3::ZERO);
        self.decals.create(entity);
        self.materials.create(entity);
        entity
    }

    pub fn create_camera(&mut self, name: &str, width: f32, height: f32, z_near: f32, z_far: f32, fov: f32) -> Entity {
        let entity = self.create_placed(name, Vec3::ZERO);
        self.cameras
            .insert(entity, CameraComponent::perspective(width, height, z_near, z_far, fov));
        entity
    }

    pub fn create_emitter(&mut self, name: &str, position: Vec3) -> Entity {
        let entity = self.create_placed(name, position);
        self.emitters.create(entity);
        self.materials.create(entity);
        entity
    }

    pub fn create_hair(&mut self, name: &str, position: Vec3) -> Entity {
        let entity = self.create_placed(name, position);
        self.hairs.create(entity);
        self.materials.create(entity);
        entity
    }

    pub fn create_sound(&mut self, name: &str, filename: &str, position: Vec3) -> Entity {
        let entity = self.create_placed(name, position);
        self.sounds.insert(
            entity,
            SoundComponent {
                filename: filename.to_owned(),
                ..Default::default()
            },
        );
        entity
    }

    // ==== Hierarchy ====

    /// Attach `entity` to `parent`.
    ///
    /// Unless `child_already_in_local_space`, the child keeps its current world placement: its
    /// local state is rebased into the parent's space. The child's layer mask is saved in the
    /// hierarchy node and restored on detach.
    ///
    /// # Panics
    ///
    /// Panics if `entity == parent`.
    pub fn component_attach(&mut self, entity: Entity, parent: Entity, child_already_in_local_space: bool) {
        assert_ne!(entity, parent, "{entity} can't be attached to itself");

        if self.hierarchy.contains(entity) {
            self.component_detach(entity);
        }

        self.hierarchy.insert(
            entity,
            HierarchyComponent {
                parent,
                ..Default::default()
            },
        );
        // Children already attached to `entity` must stay behind it.
        let last = self.hierarchy.len() - 1;
        if let Some(row) = (0..last).find(|&row| self.hierarchy[row].parent == entity) {
            self.hierarchy.move_item(last, row);
        }

        if !self.transforms.contains(parent) {
            self.transforms.create(parent);
        }
        if !self.transforms.contains(entity) {
            self.transforms.create(entity);
        }
        let parent_world = self.transforms.get(parent).map(|transform| transform.world).unwrap_or_default();
        if let Some(transform) = self.transforms.get_mut(entity) {
            if !child_already_in_local_space {
                transform.matrix_transform(&parent_world.inverse());
                transform.update_transform();
            }
            transform.update_transform_parented(&parent_world);
        }

        if !self.layers.contains(parent) {
            self.layers.create(parent);
        }
        if !self.layers.contains(entity) {
            self.layers.create(entity);
        }
        let layer_mask = self.layers.get(entity).map_or(u32::MAX, |layer| layer.layer_mask);
        if let Some(node) = self.hierarchy.get_mut(entity) {
            node.layer_mask_bind = layer_mask;
        }
    }

    /// Detach `entity` from its parent, baking its world placement into its local state.
    pub fn component_detach(&mut self, entity: Entity) {
        let Some(node) = self.hierarchy.get(entity).copied() else {
            return;
        };
        if let Some(transform) = self.transforms.get_mut(entity) {
            transform.apply_transform();
        }
        if let Some(layer) = self.layers.get_mut(entity) {
            layer.layer_mask = node.layer_mask_bind;
        }
        self.hierarchy.remove_keep_sorted(entity);
    }

    /// Detach every direct child of `parent`.
    pub fn component_detach_children(&mut self, parent: Entity) {
        let mut row = 0;
        while row < self.hierarchy.len() {
            if self.hierarchy[row].parent == parent {
                let child = self.hierarchy.entity(row);
                self.component_detach(child);
            } else {
                row += 1;
            }
        }
    }

    // ==== Update ====

    /// Advance the scene by `dt` seconds.
    ///
    /// Upload buffers are sized before any system writes to them; if the device can't provide
    /// them, the frame is abandoned and the error returned.
    pub fn update(&mut self, scheduler: &Scheduler, device: &dyn GraphicsDevice, dt: f32) -> Result<(), SceneError> {
        self.time += dt;
        self.counters.reset();
        let small = self.config.small_group_size;
        let large = self.config.large_group_size;
        let headroom = self.config.gpu_buffer_headroom;

        self.run_scripts(scheduler, dt);
        if dt > 0.0
            && let Some(terrain) = self.terrain.as_deref_mut()
        {
            terrain.generate(scheduler, self.camera.eye, dt);
        }

        self.gpu
            .instances
            .reserve::<ShaderMeshInstance>(device, self.objects.len(), headroom, "instance")?;
        self.gpu
            .materials
            .reserve::<ShaderMaterial>(device, self.materials.len(), headroom, "material")?;
        let geometry_count = self.meshes.components().iter().map(|mesh| mesh.subsets.len()).sum::<usize>();
        self.gpu
            .geometries
            .reserve::<ShaderGeometry>(device, geometry_count, headroom, "geometry")?;
        let slot = device.buffer_index();

        self.aabb_objects.resize(self.objects.len(), Aabb::EMPTY);
        self.aabb_lights.resize(self.lights.len(), Aabb::EMPTY);
        self.aabb_decals.resize(self.decals.len(), Aabb::EMPTY);
        self.aabb_probes.resize(self.probes.len(), Aabb::EMPTY);
        let group_count = Scheduler::dispatch_group_count(self.objects.len() as u32, small) as usize;
        self.parallel_bounds.clear();
        self.parallel_bounds.resize(group_count, Aabb::EMPTY);

        let geometry_counter = AtomicU32::new(0);
        let most_important_light = SpinLock::new(None);

        // The animation scan overlaps the first segment and is waited for when its scope closes.
        scheduler.scope(Priority::High, |scan| {
            let animations = self.animations.components();
            let queues = &mut self.animation_queues;
            scheduler.execute(scan, move |_| animation::partition(animations, queues));

            scheduler.scope(Priority::High, |ctx| {
                systems::run_prev_transform_system(
                    scheduler,
                    ctx,
                    large,
                    &mut self.prev_transforms,
                    &self.transforms,
                    &self.counters,
                );
                systems::run_expression_system(scheduler, ctx, small, &mut self.expressions, dt);
                systems::run_material_system(
                    scheduler,
                    ctx,
                    small,
                    &mut self.materials,
                    self.gpu.materials.records_mut::<ShaderMaterial>(slot),
                    dt,
                );
                systems::run_mesh_prepass(scheduler, ctx, small, &mut self.meshes, &geometry_counter);
            });
        });

        scheduler.scope(Priority::High, |ctx| {
            animation::update(
                scheduler,
                ctx,
                &self.animation_queues,
                self.animations.components_mut(),
                &self.animation_datas,
                animation::Targets::new(&mut self.transforms, &mut self.meshes),
                dt,
            );
        });

        if let Some(physics) = self.physics.as_deref_mut() {
            physics.step(scheduler, &mut self.transforms, &self.rigid_bodies, dt);
        }

        scheduler.scope(Priority::High, |ctx| {
            systems::run_transform_system(scheduler, ctx, large, &mut self.transforms, &self.counters);
        });

        systems::run_hierarchy_system(
            scheduler,
            small,
            &self.hierarchy,
            &mut self.transforms,
            &mut self.layers,
            &mut self.propagated,
        );
        systems::run_spring_system(
            &mut self.springs,
            &mut self.transforms,
            &self.hierarchy,
            &self.weather,
            &self.counters,
            self.time,
            dt,
        );
        let solved = systems::run_inverse_kinematics_system(
            &self.inverse_kinematics,
            &mut self.transforms,
            &self.hierarchy,
            &self.counters,
        );
        if solved {
            systems::run_hierarchy_system(
                scheduler,
                small,
                &self.hierarchy,
                &mut self.transforms,
                &mut self.layers,
                &mut self.propagated,
            );
        }

        systems::apply_expressions(&mut self.expressions, &mut self.meshes);
        scheduler.scope(Priority::High, |ctx| {
            systems::run_mesh_system(
                scheduler,
                ctx,
                small,
                &self.meshes,
                &self.materials,
                self.gpu.geometries.records_mut::<ShaderGeometry>(slot),
            );
            systems::run_armature_system(scheduler, ctx, small, &mut self.armatures, &self.transforms, &self.counters);
            systems::run_impostor_reset(scheduler, ctx, small, &mut self.impostors);
            self.weather = systems::run_weather_system(&self.weathers);
        });

        let camera_position = self.camera.eye;
        let ray_tracing = device.check_capability(Capability::RayTracing);
        scheduler.scope(Priority::High, |ctx| {
            let tlas_instances = if ray_tracing && self.acceleration_structure_update_requested {
                Some(self.gpu.tlas_instances.records_mut::<TlasInstance>(slot))
            } else {
                None
            };
            ObjectSystem {
                objects: &mut self.objects,
                aabbs: &mut self.aabb_objects,
                group_bounds: &mut self.parallel_bounds,
                instances: self.gpu.instances.records_mut::<ShaderMeshInstance>(slot),
                tlas_instances,
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
            .dispatch(scheduler, ctx, small);

            systems::run_camera_system(scheduler, ctx, small, &mut self.cameras, &self.transforms);
            systems::run_decal_system(
                scheduler,
                ctx,
                small,
                &mut self.decals,
                &mut self.aabb_decals,
                &self.transforms,
                &self.materials,
                &self.counters,
            );
            systems::run_probe_system(
                scheduler,
                ctx,
                small,
                &mut self.probes,
                &mut self.aabb_probes,
                &self.transforms,
                &self.counters,
            );
            systems::run_force_system(scheduler, ctx, small, &mut self.forces, &self.transforms, &self.counters);
            systems::run_light_system(
                scheduler,
                ctx,
                small,
                &mut self.lights,
                &mut self.aabb_lights,
                &self.transforms,
                camera_position,
                &most_important_light,
                &self.counters,
            );
            systems::run_emitter_system(scheduler, ctx, small, &mut self.emitters, &self.transforms, &self.counters, dt);
            systems::run_hair_system(
                scheduler,
                ctx,
                small,
                &mut self.hairs,
                &self.transforms,
                &self.meshes,
                &self.counters,
            );
            systems::run_video_system(scheduler, ctx, small, &mut self.videos, dt);
            systems::run_sprite_system(scheduler, ctx, small, &mut self.sprites, dt);
            systems::run_font_system(scheduler, ctx, small, &mut self.fonts, dt);
            if let Some(audio) = self.audio.as_deref_mut() {
                systems::run_sound_system(&self.sounds, &self.transforms, audio, camera_position);
            }
        });

        self.bounds = self.parallel_bounds.iter().fold(Aabb::EMPTY, |bounds, group| bounds.merge(group));
        self.weather.most_important_light_index = most_important_light.into_inner();
        let impostors = systems::write_impostor_records(&mut self.impostors, &mut self.gpu.impostors, device, headroom, slot)?;
        if ray_tracing && dt > 0.0 && !self.objects.is_empty() && self.gpu.tlas_instances.capacity() != self.objects.len() {
            self.gpu
                .tlas_instances
                .recreate::<TlasInstance>(device, self.objects.len())?;
            log::debug!("acceleration structure instances resized to {}", self.objects.len());
        }

        self.stats = FrameStats {
            transforms_updated: self.counters.transforms_updated.load(Ordering::Relaxed),
            animation_queues: self.animation_queues.len(),
            objects: self.objects.len(),
            impostors,
            skipped_references: self.counters.skipped_references.load(Ordering::Relaxed),
        };
        Ok(())
    }

    /// Run every playing script through the script host. The host gets the whole scene, so it is
    /// taken out for the duration.
    fn run_scripts(&mut self, scheduler: &Scheduler, dt: f32) {
        let Some(mut host) = self.script_host.take() else {
            return;
        };
        let scripts = self.scripts.entities().to_vec();
        for entity in scripts {
            let Some(script) = self.scripts.get_mut(entity) else {
                continue;
            };
            if !script.playing {
                continue;
            }
            script.run_count += 1;
            if script.once {
                script.playing = false;
            }
            host.run_script(self, scheduler, entity, dt);
        }
        if self.script_host.is_none() {
            self.script_host = Some(host);
        }
    }
}
