use std::sync::atomic::Ordering;

use glam::Mat4;

use crate::core::tasks::{Context, DisjointSlice, Priority, Scheduler};
use crate::ecs::{ComponentManager, Entity};
use crate::scene::components::{
    HierarchyComponent, LayerComponent, PreviousFrameTransformComponent, TransformComponent,
};

use super::FrameCounters;

pub(crate) fn run_prev_transform_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    prev_transforms: &'env mut ComponentManager<PreviousFrameTransformComponent>,
    transforms: &'env ComponentManager<TransformComponent>,
    counters: &'env FrameCounters,
) {
    let (lookup, rows) = prev_transforms.split_mut();
    let rows = DisjointSlice::new(rows);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let entity = lookup.entity(row);
        // SAFETY: one job per row.
        let prev = unsafe { rows.get_mut(row) };
        match transforms.get(entity) {
            Some(transform) => prev.world_prev = transform.world,
            None => counters.skip("previous transform", entity, "transform"),
        }
    });
}

/// Rebuild the world matrix of every dirty transform. Clean transforms cost a flag check.
///
/// Each group counts its recomputations in shared memory and publishes the sum once.
pub(crate) fn run_transform_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    transforms: &'env mut ComponentManager<TransformComponent>,
    counters: &'env FrameCounters,
) {
    let transforms = DisjointSlice::new(transforms.components_mut());
    let shared_memory_size = std::mem::size_of::<u32>();
    scheduler.dispatch_shared(ctx, transforms.len() as u32, group_size, shared_memory_size, move |mut args| {
        // SAFETY: one job per row.
        let updated = unsafe { transforms.get_mut(args.job_index as usize) }.update_transform();

        let (first, last) = (args.is_first_job_in_group, args.is_last_job_in_group);
        let count = args.shared::<u32>();
        if first {
            *count = 0;
        }
        *count += u32::from(updated);
        if last {
            counters.transforms_updated.fetch_add(*count, Ordering::Relaxed);
        }
    });
}

/// World matrix and layer mask of one hierarchy row, computed before any row is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Propagated {
    world: Option<Mat4>,
    layer_mask: Option<u32>,
}

/// Propagate parent transforms and layer masks down every hierarchy chain.
///
/// Every row walks its own chain up to the root, so rows don't depend on each other and the walk
/// is fully parallel. Results land in `propagated` first and are written back in a second pass,
/// since a row's walk reads the transforms other rows write.
pub(crate) fn run_hierarchy_system(
    scheduler: &Scheduler,
    group_size: u32,
    hierarchy: &ComponentManager<HierarchyComponent>,
    transforms: &mut ComponentManager<TransformComponent>,
    layers: &mut ComponentManager<LayerComponent>,
    propagated: &mut Vec<Propagated>,
) {
    let job_count = hierarchy.len() as u32;
    propagated.clear();
    propagated.resize(hierarchy.len(), Propagated::default());

    {
        let out = DisjointSlice::new(&mut propagated[..]);
        let (transforms, layers) = (&*transforms, &*layers);
        scheduler.scope(Priority::High, |ctx| {
            scheduler.dispatch(ctx, job_count, group_size, move |args| {
                let row = args.job_index as usize;
                // SAFETY: one job per row.
                let out = unsafe { out.get_mut(row) };
                *out = propagate(hierarchy, transforms, layers, hierarchy.entity(row));
            });
        });
    }

    let (transform_lookup, transform_rows) = transforms.split_mut();
    let transform_rows = DisjointSlice::new(transform_rows);
    let (layer_lookup, layer_rows) = layers.split_mut();
    let layer_rows = DisjointSlice::new(layer_rows);
    let propagated = &propagated[..];
    scheduler.scope(Priority::High, |ctx| {
        scheduler.dispatch(ctx, job_count, group_size, move |args| {
            let row = args.job_index as usize;
            let entity = hierarchy.entity(row);
            let result = propagated[row];
            // SAFETY: an entity has at most one hierarchy row, so rows write distinct components.
            if let (Some(world), Some(index)) = (result.world, transform_lookup.index_of(entity)) {
                unsafe { transform_rows.get_mut(index) }.world = world;
            }
            if let (Some(layer_mask), Some(index)) = (result.layer_mask, layer_lookup.index_of(entity)) {
                unsafe { layer_rows.get_mut(index) }.layer_mask = layer_mask;
            }
        });
    });
}

fn propagate(
    hierarchy: &ComponentManager<HierarchyComponent>,
    transforms: &ComponentManager<TransformComponent>,
    layers: &ComponentManager<LayerComponent>,
    entity: Entity,
) -> Propagated {
    let Some(node) = hierarchy.get(entity) else {
        return Propagated::default();
    };
    let mut world = transforms.get(entity).map(TransformComponent::local_matrix);
    let mut layer_mask = layers.contains(entity).then_some(node.layer_mask_bind);

    // Bounded by the row count so a cycle can't hang the job.
    let mut parent = node.parent;
    for _ in 0..=hierarchy.len() {
        if let Some(parent_node) = hierarchy.get(parent) {
            if let (Some(world), Some(transform)) = (world.as_mut(), transforms.get(parent)) {
                *world = transform.local_matrix() * *world;
            }
            if let Some(mask) = layer_mask.as_mut() {
                *mask &= parent_node.layer_mask_bind;
            }
            parent = parent_node.parent;
        } else {
            if let (Some(world), Some(transform)) = (world.as_mut(), transforms.get(parent)) {
                *world = transform.world * *world;
            }
            if let Some(mask) = layer_mask.as_mut() {
                *mask &= layers.get(parent).map_or(u32::MAX, |layer| layer.layer_mask);
            }
            break;
        }
    }

    Propagated { world, layer_mask }
}
