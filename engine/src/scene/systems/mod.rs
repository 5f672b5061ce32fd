//! The per-frame systems run by [`Scene::update`](super::Scene::update).
//!
//! A system either dispatches one job per component onto the caller's [`Context`] and returns
//! immediately, or runs serially on the calling thread. Systems never wait on the context they
//! are given: the scene decides where the barriers go.
//!
//! [`Context`]: crate::core::tasks::Context

mod effects;
mod expression;
mod light;
mod mesh;
mod object;
mod procedural;
mod transform;

use std::sync::atomic::{AtomicU32, Ordering};

use crate::ecs::Entity;

pub(crate) use effects::{
    run_emitter_system, run_font_system, run_hair_system, run_impostor_reset, run_sound_system, run_sprite_system,
    run_video_system, write_impostor_records,
};
pub(crate) use expression::{apply_expressions, run_expression_system};
pub(crate) use light::{
    run_camera_system, run_decal_system, run_force_system, run_light_system, run_probe_system, run_weather_system,
};
pub(crate) use mesh::{run_armature_system, run_material_system, run_mesh_prepass, run_mesh_system};
pub(crate) use object::ObjectSystem;
pub(crate) use procedural::{run_inverse_kinematics_system, run_spring_system};
pub(crate) use transform::{Propagated, run_hierarchy_system, run_prev_transform_system, run_transform_system};

/// Counters shared by the jobs of one frame.
#[derive(Debug, Default)]
pub(crate) struct FrameCounters {
    pub(crate) transforms_updated: AtomicU32,
    pub(crate) skipped_references: AtomicU32,
}

impl FrameCounters {
    pub(crate) fn reset(&self) {
        self.transforms_updated.store(0, Ordering::Relaxed);
        self.skipped_references.store(0, Ordering::Relaxed);
    }

    /// A system dropped `entity` for the frame because a component it references is gone.
    #[inline]
    pub(crate) fn skip(&self, system: &str, entity: Entity, missing: &str) {
        log::trace!("{system}: {entity} skipped, no {missing}");
        self.skipped_references.fetch_add(1, Ordering::Relaxed);
    }
}
