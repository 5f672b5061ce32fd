//! Animation evaluation and the dependency scan that lets independent animations run in parallel.
//!
//! Every animation channel writes one target entity: a transform (translation, rotation, scale)
//! or a mesh (morph target weights). Two animations writing the same target must run on the same
//! thread, in registration order, because the later one blends on top of the earlier one's
//! result. Animations without a common target are free to run concurrently.
//!
//! [`partition`] splits the scene's animations into [`AnimationQueue`]s along that line. The scene
//! dispatches one job per queue; a job evaluates its queue's animations one after another.

use std::collections::HashMap;

use glam::{Quat, Vec3};

use crate::core::tasks::{Context, DisjointSlice, Scheduler};
use crate::ecs::{ComponentManager, Entity, Lookup};

use super::components::{
    AnimationComponent, AnimationDataComponent, AnimationPath, Interpolation, MeshComponent, TransformComponent,
};

/// A set of animations sharing targets, evaluated serially.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnimationQueue {
    /// Rows into the scene's animations, ascending.
    animations: Vec<usize>,
    /// Entities written by any animation in the queue, sorted and unique.
    targets: Vec<Entity>,
}

impl AnimationQueue {
    #[inline]
    pub fn animations(&self) -> &[usize] {
        &self.animations
    }

    #[inline]
    pub fn writes(&self, entity: Entity) -> bool {
        self.targets.binary_search(&entity).is_ok()
    }

    pub fn targets(&self) -> impl Iterator<Item = Entity> + '_ {
        self.targets.iter().copied()
    }
}

/// An animation that is paused and wasn't scrubbed since it was last evaluated produces the same
/// pose again, so it is left out of the frame.
#[inline]
pub(crate) fn is_idle(animation: &AnimationComponent) -> bool {
    !animation.is_playing() && animation.last_evaluated_timer == Some(animation.timer)
}

/// Disjoint sets over the distinct targets of one scan. Slots are handed out densely in the
/// order targets are first seen, so the cost never depends on entity id values.
#[derive(Debug, Default)]
struct TargetSets {
    slots: HashMap<Entity, usize>,
    parents: Vec<usize>,
}

impl TargetSets {
    fn slot(&mut self, entity: Entity) -> usize {
        let parents = &mut self.parents;
        *self.slots.entry(entity).or_insert_with(|| {
            parents.push(parents.len());
            parents.len() - 1
        })
    }

    fn find(&mut self, mut slot: usize) -> usize {
        while self.parents[slot] != slot {
            self.parents[slot] = self.parents[self.parents[slot]];
            slot = self.parents[slot];
        }
        slot
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parents[a.max(b)] = a.min(b);
        }
    }

    /// Root set of `entity`, `None` for entities this scan never saw.
    fn root(&mut self, entity: Entity) -> Option<usize> {
        let slot = self.slots.get(&entity).copied()?;
        Some(self.find(slot))
    }
}

/// Partition `animations` into queues such that no two queues write a common target.
///
/// # Algorithm
///
/// 1. Union the targets of every animation that isn't idle. Afterwards two targets are in the
///    same set exactly when a chain of animations connects them.
/// 2. Walk the animations in row order and append each one to the queue of its targets' set,
///    opening the queue on first use. Animations without targets get a queue of their own.
///
/// Queues are the connected components of the shares-a-target relation regardless of input
/// order. Rows within a queue stay ascending, which preserves registration order, and queues are
/// ordered by their first row.
///
/// # Performance
///
/// Time: O(c × α(c)) expected, where c = channels of the animations that aren't idle.
pub fn partition(animations: &[AnimationComponent], queues: &mut Vec<AnimationQueue>) {
    queues.clear();
    let mut sets = TargetSets::default();

    for animation in animations.iter().filter(|animation| !is_idle(animation)) {
        let mut first = None;
        for entity in animation.targets() {
            let slot = sets.slot(entity);
            match first {
                None => first = Some(slot),
                Some(first) => sets.union(first, slot),
            }
        }
    }

    let mut queue_of_set: Vec<Option<usize>> = vec![None; sets.parents.len()];
    for (row, animation) in animations.iter().enumerate() {
        if is_idle(animation) {
            continue;
        }
        let set = animation.targets().next().and_then(|entity| sets.root(entity));
        let index = match set.and_then(|set| queue_of_set[set]) {
            Some(index) => index,
            None => {
                queues.push(AnimationQueue::default());
                let index = queues.len() - 1;
                if let Some(set) = set {
                    queue_of_set[set] = Some(index);
                }
                index
            }
        };
        let queue = &mut queues[index];
        queue.animations.push(row);
        queue.targets.extend(animation.targets());
    }

    for queue in queues.iter_mut() {
        queue.targets.sort_unstable();
        queue.targets.dedup();
    }
}

/// Mutable access to the entities animations write, shared by all queue jobs.
pub(crate) struct Targets<'a> {
    transform_lookup: Lookup<'a>,
    transforms: DisjointSlice<'a, TransformComponent>,
    mesh_lookup: Lookup<'a>,
    meshes: DisjointSlice<'a, MeshComponent>,
}

impl<'a> Targets<'a> {
    pub(crate) fn new(
        transforms: &'a mut ComponentManager<TransformComponent>,
        meshes: &'a mut ComponentManager<MeshComponent>,
    ) -> Self {
        let (transform_lookup, transforms) = transforms.split_mut();
        let (mesh_lookup, meshes) = meshes.split_mut();
        Self {
            transform_lookup,
            transforms: DisjointSlice::new(transforms),
            mesh_lookup,
            meshes: DisjointSlice::new(meshes),
        }
    }

    /// # Safety
    ///
    /// No other reference to the entity's transform may be alive.
    unsafe fn transform(&self, entity: Entity) -> Option<&'a mut TransformComponent> {
        let row = self.transform_lookup.index_of(entity)?;
        // SAFETY: forwarded to the caller.
        Some(unsafe { self.transforms.get_mut(row) })
    }

    /// # Safety
    ///
    /// No other reference to the entity's mesh may be alive.
    unsafe fn mesh(&self, entity: Entity) -> Option<&'a mut MeshComponent> {
        let row = self.mesh_lookup.index_of(entity)?;
        // SAFETY: forwarded to the caller.
        Some(unsafe { self.meshes.get_mut(row) })
    }
}

/// Dispatch one job per queue on `ctx`.
pub(crate) fn update<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    queues: &'env [AnimationQueue],
    animations: &'env mut [AnimationComponent],
    datas: &'env ComponentManager<AnimationDataComponent>,
    targets: Targets<'env>,
    dt: f32,
) {
    let animations = DisjointSlice::new(animations);
    scheduler.dispatch(ctx, queues.len() as u32, 1, move |args| {
        let queue = &queues[args.job_index as usize];
        let mut lanes = Vec::new();
        for &row in &queue.animations {
            // SAFETY: every row appears in exactly one queue.
            let animation = unsafe { animations.get_mut(row) };
            // SAFETY: queues never share a target, so no other job touches this queue's targets.
            unsafe { evaluate(animation, datas, &targets, &mut lanes, dt) };
        }
    });
}

/// Sample every channel at the current timer, blend the result into the targets, then advance
/// the timer.
///
/// # Safety
///
/// No other thread may access the animation's targets for the duration of the call.
pub(crate) unsafe fn evaluate(
    animation: &mut AnimationComponent,
    datas: &ComponentManager<AnimationDataComponent>,
    targets: &Targets<'_>,
    lanes: &mut Vec<f32>,
    dt: f32,
) {
    for channel in &animation.channels {
        let Some(sampler) = animation.samplers.get(channel.sampler_index) else {
            log::trace!("animation channel targeting {} has no sampler", channel.target);
            continue;
        };
        let Some(data) = datas.get(sampler.data) else {
            log::trace!("animation sampler data {} is missing", sampler.data);
            continue;
        };
        let Some(keys) = Keyframes::find(&data.keyframe_times, animation.timer) else {
            continue;
        };

        match channel.path {
            AnimationPath::Weights => {
                // SAFETY: only this call touches the target.
                let Some(mesh) = (unsafe { targets.mesh(channel.target) }) else {
                    continue;
                };
                lanes.clear();
                lanes.resize(mesh.morph_targets.len(), 0.0);
                if lanes.is_empty() || !keys.sample(data, sampler.mode, false, lanes) {
                    continue;
                }
                for (morph, &weight) in mesh.morph_targets.iter_mut().zip(lanes.iter()) {
                    morph.weight += (weight - morph.weight) * animation.amount;
                }
            }
            path => {
                // SAFETY: only this call touches the target.
                let Some(target) = (unsafe { targets.transform(channel.target) }) else {
                    continue;
                };
                let rotation = path == AnimationPath::Rotation;
                lanes.clear();
                lanes.resize(if rotation { 4 } else { 3 }, 0.0);
                if !keys.sample(data, sampler.mode, rotation, lanes) {
                    continue;
                }

                let current = *target;
                let mut sampled = current;
                match path {
                    AnimationPath::Translation => sampled.translation_local = Vec3::from_slice(lanes),
                    AnimationPath::Rotation => sampled.rotation_local = Quat::from_slice(lanes).normalize(),
                    AnimationPath::Scale => sampled.scale_local = Vec3::from_slice(lanes),
                    AnimationPath::Weights => {}
                }
                target.lerp(&current, &sampled, animation.amount);
            }
        }
    }

    animation.last_evaluated_timer = Some(animation.timer);
    advance(animation, dt);
}

fn advance(animation: &mut AnimationComponent, dt: f32) {
    if animation.is_playing() {
        animation.timer += dt * animation.speed;
    }
    if animation.timer > animation.end {
        if animation.is_looped() {
            animation.timer = animation.start;
        } else {
            animation.timer = animation.end;
            animation.pause();
        }
    }
}

/// The keyframe pair bracketing a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Keyframes {
    left: usize,
    right: usize,
    /// Position between the two keys in `[0, 1]`.
    t: f32,
    /// Seconds between the two keys.
    span: f32,
}

impl Keyframes {
    /// Linear scan for the first key at or after `timer`; keyframe counts are small.
    fn find(times: &[f32], timer: f32) -> Option<Self> {
        let last = times.len().checked_sub(1)?;
        let (left, right) = if times[last] < timer {
            (last, last)
        } else {
            let right = times.iter().position(|&time| time >= timer).unwrap_or(last);
            (right.saturating_sub(1), right)
        };
        let span = times[right] - times[left];
        let t = if span > 0.0 {
            ((timer - times[left]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(Self { left, right, t, span })
    }

    /// Sample `out.len()` lanes. Returns `false` if the data is too short for the keyframes.
    fn sample(&self, data: &AnimationDataComponent, mode: Interpolation, rotation: bool, out: &mut [f32]) -> bool {
        let stride = out.len();
        let parts = if mode == Interpolation::CubicSpline { 3 } else { 1 };
        let element = |key: usize, part: usize| {
            let start = (key * parts + part) * stride;
            data.keyframe_data.get(start..start + stride)
        };
        let value_part = if mode == Interpolation::CubicSpline { 1 } else { 0 };
        let (Some(a), Some(b)) = (element(self.left, value_part), element(self.right, value_part)) else {
            return false;
        };

        if mode == Interpolation::Step || self.left == self.right {
            out.copy_from_slice(a);
            return true;
        }

        match mode {
            Interpolation::Linear | Interpolation::Step if rotation => {
                let q = Quat::from_slice(a).slerp(Quat::from_slice(b), self.t).normalize();
                out.copy_from_slice(&q.to_array());
            }
            Interpolation::Linear | Interpolation::Step => {
                for ((out, &a), &b) in out.iter_mut().zip(a).zip(b) {
                    *out = a + (b - a) * self.t;
                }
            }
            Interpolation::CubicSpline => {
                let (Some(out_tangent), Some(in_tangent)) = (element(self.left, 2), element(self.right, 0)) else {
                    return false;
                };
                let t = self.t;
                let t2 = t * t;
                let t3 = t2 * t;
                let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
                let h10 = t3 - 2.0 * t2 + t;
                let h01 = -2.0 * t3 + 3.0 * t2;
                let h11 = t3 - t2;
                for lane in 0..stride {
                    out[lane] = h00 * a[lane]
                        + h10 * self.span * out_tangent[lane]
                        + h01 * b[lane]
                        + h11 * self.span * in_tangent[lane];
                }
                if rotation {
                    let q = Quat::from_slice(out).normalize();
                    out.copy_from_slice(&q.to_array());
                }
            }
        }
        true
    }
}
