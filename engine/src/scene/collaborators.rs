//! Subsystems the scene drives but doesn't implement.
//!
//! Each one is optional. A scene without a physics engine simply keeps its transforms, one
//! without an audio sink keeps its sounds silent.

use glam::Vec3;

use crate::core::tasks::Scheduler;
use crate::ecs::{ComponentManager, Entity};

use super::Scene;
use super::components::{RigidBodyComponent, TransformComponent};

/// Rigid body simulation, stepped once per frame before transforms are recomputed.
pub trait PhysicsEngine: Send {
    /// Advance the simulation by `dt` and write simulated bodies back into `transforms`.
    fn step(
        &mut self,
        scheduler: &Scheduler,
        transforms: &mut ComponentManager<TransformComponent>,
        rigid_bodies: &ComponentManager<RigidBodyComponent>,
        dt: f32,
    );
}

/// Sound output. Calls arrive serially from the frame's sound system.
pub trait AudioSink: Send {
    /// Position a 3D sound relative to the listener.
    fn update_3d(&mut self, sound: Entity, emitter: Vec3, listener: Vec3);
    fn set_playing(&mut self, sound: Entity, playing: bool);
    fn set_looped(&mut self, sound: Entity, looped: bool);
    fn set_volume(&mut self, sound: Entity, volume: f32);
}

/// Runs script components. Has the whole scene to itself while it runs.
pub trait ScriptHost: Send {
    fn run_script(&mut self, scene: &mut Scene, scheduler: &Scheduler, script: Entity, dt: f32);
}

/// Streams terrain chunks around the camera.
pub trait TerrainGenerator: Send {
    fn generate(&mut self, scheduler: &Scheduler, camera_position: Vec3, dt: f32);
}
