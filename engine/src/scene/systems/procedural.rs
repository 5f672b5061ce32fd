use glam::{Quat, Vec3};

use crate::ecs::{ComponentManager, Entity};
use crate::scene::components::{
    HierarchyComponent, InverseKinematicsComponent, SpringComponent, TransformComponent, WeatherComponent,
};

use super::FrameCounters;

const GRAVITY: Vec3 = Vec3::new(0.0, -9.8, 0.0);
const MAX_CHAIN_LENGTH: u32 = 32;

/// Damped spring bones. Serial: a spring may rotate its parent, which another spring reads.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_spring_system(
    springs: &mut ComponentManager<SpringComponent>,
    transforms: &mut ComponentManager<TransformComponent>,
    hierarchy: &ComponentManager<HierarchyComponent>,
    weather: &WeatherComponent,
    counters: &FrameCounters,
    time: f32,
    dt: f32,
) {
    for row in 0..springs.len() {
        let entity = springs.entity(row);
        let spring = &mut springs[row];
        if spring.disabled {
            continue;
        }
        let Some(index) = transforms.index_of(entity) else {
            counters.skip("spring", entity, "transform");
            continue;
        };

        if spring.take_reset() {
            spring.center_of_mass = transforms[index].position();
            spring.velocity = Vec3::ZERO;
        }

        let parent = hierarchy
            .get(entity)
            .and_then(|node| transforms.index_of(node.parent));
        if let Some(parent) = parent {
            let parent_world = transforms[parent].world;
            transforms[index].update_transform_parented(&parent_world);
        }

        let position = transforms[index].position();
        let mut force = (position - spring.center_of_mass) * spring.stiffness;
        if spring.wind_affection > 0.0 {
            let wave = (time * weather.wind_speed + position.dot(weather.wind_direction)).sin();
            force += weather.wind_direction * wave * spring.wind_affection;
        }
        if spring.gravity_enabled {
            force += GRAVITY;
        }
        spring.velocity += force * dt;
        let mut target = spring.center_of_mass + spring.velocity * dt;

        if let Some(parent) = parent {
            let parent_transform = transforms[parent];
            let parent_position = parent_transform.position();
            let parent_to_child = position - parent_position;
            let parent_to_target = target - parent_position;
            if !spring.stretch_enabled {
                target = parent_position + parent_to_target.normalize_or_zero() * parent_to_child.length();
            }

            if let Some(rotation) = rotation_between(parent_to_child, target - parent_position) {
                let mut rotated = parent_transform;
                rotated.apply_transform();
                rotated.rotate(rotation);
                rotated.update_transform();
                transforms[parent].world = rotated.world;
            }
        }

        spring.center_of_mass = target;
        spring.velocity *= spring.damping;
        transforms[index].world.w_axis = target.extend(1.0);
    }
}

/// Rotate each IK chain's ancestors so the end effector points at the target.
///
/// Returns `true` if any chain was solved; the hierarchy then has to be propagated again.
pub(crate) fn run_inverse_kinematics_system(
    iks: &ComponentManager<InverseKinematicsComponent>,
    transforms: &mut ComponentManager<TransformComponent>,
    hierarchy: &ComponentManager<HierarchyComponent>,
    counters: &FrameCounters,
) -> bool {
    let mut solved = false;
    let mut stack: Vec<Entity> = Vec::with_capacity(MAX_CHAIN_LENGTH as usize);

    for (entity, ik) in iks.iter() {
        if ik.disabled {
            continue;
        }
        let Some(effector) = transforms.index_of(entity) else {
            counters.skip("inverse kinematics", entity, "transform");
            continue;
        };
        let Some(target) = transforms.get(ik.target) else {
            counters.skip("inverse kinematics", entity, "target");
            continue;
        };
        if !hierarchy.contains(entity) {
            continue;
        }
        solved = true;
        let target_position = target.position();

        for _ in 0..ik.iteration_count {
            stack.clear();
            let mut child = entity;
            for _ in 0..ik.chain_length.min(MAX_CHAIN_LENGTH) {
                let Some(node) = hierarchy.get(child) else {
                    break;
                };
                let Some(parent) = transforms.index_of(node.parent) else {
                    break;
                };
                stack.push(child);

                let parent_position = transforms[parent].position();
                let to_effector = transforms[effector].position() - parent_position;
                let to_target = target_position - parent_position;
                if let Some(rotation) = rotation_between(to_effector, to_target) {
                    let transform = &mut transforms[parent];
                    transform.apply_transform();
                    transform.rotate(rotation);
                    transform.update_transform();
                }

                // Back into the grandparent's space.
                let grandparent = hierarchy.get(node.parent).map(|parent_node| parent_node.parent);
                if let Some(grandparent_world) = grandparent.and_then(|id| transforms.get(id)).map(|t| t.world) {
                    transforms[parent].matrix_transform(&grandparent_world.inverse());
                }

                let mut parent_world = transforms[parent].world;
                for &link in stack.iter().rev() {
                    if let Some(index) = transforms.index_of(link) {
                        transforms[index].update_transform_parented(&parent_world);
                        parent_world = transforms[index].world;
                    }
                }

                if grandparent.is_none() {
                    break;
                }
                child = node.parent;
            }
        }
    }

    solved
}

/// The rotation taking direction `from` onto `to`, `None` if they are (anti)parallel or zero.
fn rotation_between(from: Vec3, to: Vec3) -> Option<Quat> {
    let from = from.try_normalize()?;
    let to = to.try_normalize()?;
    let axis = from.cross(to).try_normalize()?;
    let angle = from.dot(to).clamp(-1.0, 1.0).acos();
    Some(Quat::from_axis_angle(axis, angle).normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn transform_at(position: Vec3) -> TransformComponent {
        let mut transform = TransformComponent {
            translation_local: position,
            ..Default::default()
        };
        transform.update_transform();
        transform
    }

    // ==== Springs ====

    #[test]
    fn spring_without_forces_stays_at_rest() {
        // Given
        let entity = Entity::from_raw(1);
        let mut springs = ComponentManager::new();
        springs.create(entity);
        let mut transforms = ComponentManager::new();
        transforms.insert(entity, transform_at(Vec3::new(0.0, 2.0, 0.0)));

        // When
        for _ in 0..10 {
            run_spring_system(
                &mut springs,
                &mut transforms,
                &ComponentManager::new(),
                &WeatherComponent::default(),
                &FrameCounters::default(),
                0.0,
                1.0 / 60.0,
            );
        }

        // Then
        let spring = springs.get(entity).unwrap();
        assert!(spring.center_of_mass().abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-6));
        assert_eq!(spring.velocity(), Vec3::ZERO);
    }

    #[test]
    fn spring_lags_behind_movement() {
        // Given
        let entity = Entity::from_raw(1);
        let mut springs = ComponentManager::new();
        springs.create(entity);
        let mut transforms = ComponentManager::new();
        transforms.insert(entity, transform_at(Vec3::ZERO));
        let run = |springs: &mut ComponentManager<SpringComponent>, transforms: &mut ComponentManager<TransformComponent>| {
            run_spring_system(
                springs,
                transforms,
                &ComponentManager::new(),
                &WeatherComponent::default(),
                &FrameCounters::default(),
                0.0,
                0.01,
            )
        };
        run(&mut springs, &mut transforms);

        // When: the animated position jumps
        *transforms.get_mut(entity).unwrap() = transform_at(Vec3::X);
        run(&mut springs, &mut transforms);

        // Then
        let x = transforms.get(entity).unwrap().position().x;
        assert!(x > 0.0 && x < 1.0, "{x}");
    }

    #[test]
    fn gravity_pulls_spring_down() {
        let entity = Entity::from_raw(1);
        let mut springs = ComponentManager::new();
        springs.insert(entity, SpringComponent { gravity_enabled: true, ..Default::default() });
        let mut transforms = ComponentManager::new();
        transforms.insert(entity, transform_at(Vec3::ZERO));
        run_spring_system(
            &mut springs,
            &mut transforms,
            &ComponentManager::new(),
            &WeatherComponent::default(),
            &FrameCounters::default(),
            0.0,
            0.1,
        );
        assert!(springs.get(entity).unwrap().center_of_mass().y < 0.0);
    }

    #[test]
    fn spring_without_transform_is_skipped() {
        let mut springs = ComponentManager::new();
        springs.create(Entity::from_raw(1));
        let counters = FrameCounters::default();
        run_spring_system(
            &mut springs,
            &mut ComponentManager::new(),
            &ComponentManager::new(),
            &WeatherComponent::default(),
            &counters,
            0.0,
            0.1,
        );
        assert_eq!(counters.skipped_references.load(Ordering::Relaxed), 1);
    }

    // ==== Inverse kinematics ====

    fn arm(target_position: Vec3, chain_length: u32) -> (ComponentManager<TransformComponent>, ComponentManager<HierarchyComponent>, ComponentManager<InverseKinematicsComponent>) {
        // shoulder at the origin, elbow at +X, hand at +2X
        let (shoulder, elbow, hand, target) = (ent(1), ent(2), ent(3), ent(4));
        let mut transforms = ComponentManager::new();
        transforms.insert(shoulder, transform_at(Vec3::ZERO));
        transforms.insert(elbow, transform_at(Vec3::X));
        transforms.insert(hand, transform_at(Vec3::X));
        transforms.insert(target, transform_at(target_position));
        let elbow_world = transforms.get(elbow).unwrap().world;
        transforms.get_mut(hand).unwrap().update_transform_parented(&elbow_world);

        let mut hierarchy = ComponentManager::new();
        hierarchy.insert(elbow, HierarchyComponent { parent: shoulder, ..Default::default() });
        hierarchy.insert(hand, HierarchyComponent { parent: elbow, ..Default::default() });

        let mut iks = ComponentManager::new();
        iks.insert(
            hand,
            InverseKinematicsComponent {
                target,
                chain_length,
                iteration_count: 1,
                disabled: false,
            },
        );
        (transforms, hierarchy, iks)
    }

    fn ent(id: u32) -> Entity {
        Entity::from_raw(id)
    }

    #[test]
    fn ik_rotates_parent_towards_target() {
        // Given
        let (mut transforms, hierarchy, iks) = arm(Vec3::new(1.0, 2.0, 0.0), 1);

        // When
        let solved = run_inverse_kinematics_system(&iks, &mut transforms, &hierarchy, &FrameCounters::default());

        // Then: the elbow turned a quarter, the shoulder didn't move
        assert!(solved);
        let hand = transforms.get(ent(3)).unwrap().position();
        assert!(hand.abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-5), "{hand}");
        assert_eq!(transforms.get(ent(1)).unwrap().rotation_local, Quat::IDENTITY);
    }

    #[test]
    fn ik_chain_reaches_target() {
        // Given
        let (mut transforms, hierarchy, iks) = arm(Vec3::new(1.0, 1.0, 0.0), 2);

        // When
        run_inverse_kinematics_system(&iks, &mut transforms, &hierarchy, &FrameCounters::default());

        // Then
        let hand = transforms.get(ent(3)).unwrap().position();
        assert!(hand.abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-5), "{hand}");
    }

    #[test]
    fn disabled_ik_does_nothing() {
        let iks = {
            let mut iks = ComponentManager::new();
            iks.insert(Entity::from_raw(1), InverseKinematicsComponent { disabled: true, ..Default::default() });
            iks
        };
        let solved = run_inverse_kinematics_system(
            &iks,
            &mut ComponentManager::new(),
            &ComponentManager::new(),
            &FrameCounters::default(),
        );
        assert!(!solved);
    }

    #[test]
    fn rotation_between_parallel_vectors_is_none() {
        assert!(rotation_between(Vec3::X, Vec3::X * 2.0).is_none());
        assert!(rotation_between(Vec3::ZERO, Vec3::X).is_none());
        let rotation = rotation_between(Vec3::X, Vec3::Y).unwrap();
        assert!((rotation * Vec3::X).abs_diff_eq(Vec3::Y, 1e-6));
    }
}
