use glam::Vec3;

use crate::core::tasks::{Context, DisjointSlice, Scheduler};
use crate::ecs::ComponentManager;
use crate::gfx::{GraphicsDevice, GraphicsError, ShaderImpostor, affine_rows, pack_unorm4};
use crate::scene::collaborators::AudioSink;
use crate::scene::components::{
    EmitterComponent, FontComponent, HairParticleComponent, ImpostorComponent, MeshComponent, SoundComponent,
    SpriteComponent, TransformComponent, VideoComponent,
};
use crate::scene::gpu::UploadRing;

use super::FrameCounters;

/// Clear last frame's impostor placements before objects place themselves again.
pub(crate) fn run_impostor_reset<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    impostors: &'env mut ComponentManager<ImpostorComponent>,
) {
    let rows = DisjointSlice::new(impostors.components_mut());
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        // SAFETY: one job per row.
        unsafe { rows.get_mut(args.job_index as usize) }.reset();
    });
}

/// Flatten every impostor's placements into the impostor upload ring, growing it first if needed.
///
/// Returns the number of records written.
pub(crate) fn write_impostor_records(
    impostors: &mut ComponentManager<ImpostorComponent>,
    ring: &mut UploadRing,
    device: &dyn GraphicsDevice,
    headroom: f32,
    slot: usize,
) -> Result<usize, GraphicsError> {
    let required = impostors
        .components_mut()
        .iter_mut()
        .map(|impostor| impostor.placements().instances.len())
        .sum::<usize>();
    ring.reserve::<ShaderImpostor>(device, required, headroom, "impostor")?;

    let records = ring.records_mut::<ShaderImpostor>(slot);
    let mut written = 0;
    for (index, impostor) in impostors.components_mut().iter_mut().enumerate() {
        let placements = impostor.placements();
        let color = pack_unorm4(placements.color);
        for instance in &placements.instances {
            let Some(record) = records.get_mut(written) else {
                return Ok(written);
            };
            *record = ShaderImpostor {
                transform: affine_rows(&instance.transform),
                color,
                impostor_index: index as u32,
                fade: placements.fade_threshold_radius,
                instance_uid: instance.instance_uid,
            };
            written += 1;
        }
    }
    Ok(written)
}

pub(crate) fn run_emitter_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    emitters: &'env mut ComponentManager<EmitterComponent>,
    transforms: &'env ComponentManager<TransformComponent>,
    counters: &'env FrameCounters,
    dt: f32,
) {
    let (lookup, rows) = emitters.split_mut();
    let rows = DisjointSlice::new(rows);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let entity = lookup.entity(row);
        let Some(transform) = transforms.get(entity) else {
            counters.skip("emitter", entity, "transform");
            return;
        };
        // SAFETY: one job per row.
        unsafe { rows.get_mut(row) }.update_cpu(&transform.world, dt);
    });
}

pub(crate) fn run_hair_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    hairs: &'env mut ComponentManager<HairParticleComponent>,
    transforms: &'env ComponentManager<TransformComponent>,
    meshes: &'env ComponentManager<MeshComponent>,
    counters: &'env FrameCounters,
) {
    let (lookup, rows) = hairs.split_mut();
    let rows = DisjointSlice::new(rows);
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        let row = args.job_index as usize;
        let entity = lookup.entity(row);
        // SAFETY: one job per row.
        let hair = unsafe { rows.get_mut(row) };
        let Some(transform) = transforms.get(entity) else {
            counters.skip("hair", entity, "transform");
            return;
        };
        let Some(mesh) = meshes.get(hair.mesh) else {
            counters.skip("hair", entity, "mesh");
            return;
        };
        hair.update_cpu(transform, mesh);
    });
}

/// Forward sound state to the audio sink. Serial: the sink is a single `&mut`.
pub(crate) fn run_sound_system(
    sounds: &ComponentManager<SoundComponent>,
    transforms: &ComponentManager<TransformComponent>,
    audio: &mut dyn AudioSink,
    listener: Vec3,
) {
    for (entity, sound) in sounds.iter() {
        if let Some(transform) = transforms.get(entity).filter(|_| !sound.disable_3d) {
            audio.update_3d(entity, transform.position(), listener);
        }
        audio.set_playing(entity, sound.playing);
        audio.set_looped(entity, sound.looped);
        audio.set_volume(entity, sound.volume);
    }
}

pub(crate) fn run_video_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    videos: &'env mut ComponentManager<VideoComponent>,
    dt: f32,
) {
    let rows = DisjointSlice::new(videos.components_mut());
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        // SAFETY: one job per row.
        unsafe { rows.get_mut(args.job_index as usize) }.update(dt);
    });
}

pub(crate) fn run_sprite_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    sprites: &'env mut ComponentManager<SpriteComponent>,
    dt: f32,
) {
    let rows = DisjointSlice::new(sprites.components_mut());
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        // SAFETY: one job per row.
        unsafe { rows.get_mut(args.job_index as usize) }.update(dt);
    });
}

pub(crate) fn run_font_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    fonts: &'env mut ComponentManager<FontComponent>,
    dt: f32,
) {
    let rows = DisjointSlice::new(fonts.components_mut());
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        // SAFETY: one job per row.
        unsafe { rows.get_mut(args.job_index as usize) }.update(dt);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tasks::Priority;
    use crate::ecs::Entity;
    use crate::gfx::HeadlessDevice;
    use crate::scene::bounds::Aabb;
    use crate::scene::components::ImpostorInstance;
    use glam::{Mat4, Vec4};
    use std::sync::atomic::Ordering;

    fn scheduler() -> Scheduler {
        let mut scheduler = Scheduler::new();
        scheduler.initialize(2);
        scheduler
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<String>,
    }

    impl AudioSink for RecordingSink {
        fn update_3d(&mut self, sound: Entity, emitter: Vec3, listener: Vec3) {
            self.calls.push(format!("3d {sound} {emitter} {listener}"));
        }
        fn set_playing(&mut self, sound: Entity, playing: bool) {
            self.calls.push(format!("playing {sound} {playing}"));
        }
        fn set_looped(&mut self, sound: Entity, looped: bool) {
            self.calls.push(format!("looped {sound} {looped}"));
        }
        fn set_volume(&mut self, sound: Entity, volume: f32) {
            self.calls.push(format!("volume {sound} {volume}"));
        }
    }

    fn placed(uid: u32, position: Vec3) -> ImpostorInstance {
        ImpostorInstance {
            transform: Mat4::from_translation(position),
            instance_uid: uid,
        }
    }

    // ==== Impostors ====

    #[test]
    fn impostor_records_cover_every_placement() {
        // Given
        let device = HeadlessDevice::new();
        let mut impostors: ComponentManager<ImpostorComponent> = ComponentManager::new();
        impostors.create(Entity::from_raw(1));
        impostors.create(Entity::from_raw(2));
        let aabb = Aabb::from_half_width(Vec3::ZERO, Vec3::ONE);
        impostors[0].place(&aabb, Vec4::ONE, placed(10, Vec3::X));
        impostors[1].place(&aabb, Vec4::ONE, placed(11, Vec3::Y));
        impostors[1].place(&aabb, Vec4::ONE, placed(12, Vec3::Z));
        let mut ring = UploadRing::default();

        // When
        let written = write_impostor_records(&mut impostors, &mut ring, &device, 1.0, 1).unwrap();

        // Then
        assert_eq!(written, 3);
        assert_eq!(ring.capacity(), 3);
        let records = ring.records::<ShaderImpostor>(1);
        assert_eq!(records[0].impostor_index, 0);
        assert_eq!(records[2].impostor_index, 1);
        assert_eq!(records[2].instance_uid, 12);
        assert_eq!(records[1].transform[1][3], 1.0);
        assert_eq!(records[0].fade, aabb.radius());
    }

    #[test]
    fn impostor_reset_clears_placements() {
        let scheduler = scheduler();
        let mut impostors: ComponentManager<ImpostorComponent> = ComponentManager::new();
        impostors.create(Entity::from_raw(1));
        impostors[0].place(&Aabb::from_half_width(Vec3::ZERO, Vec3::ONE), Vec4::ONE, placed(1, Vec3::ZERO));
        scheduler.scope(Priority::High, |ctx| {
            run_impostor_reset(&scheduler, ctx, 64, &mut impostors);
        });
        let placements = impostors[0].placements();
        assert!(placements.instances.is_empty());
        assert!(placements.aabb.is_empty());
    }

    // ==== Particles ====

    #[test]
    fn emitter_spawns_at_its_transform() {
        // Given
        let scheduler = scheduler();
        let entity = Entity::from_raw(1);
        let mut transforms: ComponentManager<TransformComponent> = ComponentManager::new();
        let transform = transforms.create(entity);
        transform.translate(Vec3::new(0.0, 3.0, 0.0));
        transform.update_transform();
        let mut emitters = ComponentManager::new();
        emitters.insert(entity, EmitterComponent { count: 20.0, ..Default::default() });
        let counters = FrameCounters::default();

        // When
        scheduler.scope(Priority::High, |ctx| {
            run_emitter_system(&scheduler, ctx, 64, &mut emitters, &transforms, &counters, 0.5);
        });

        // Then
        let particles = emitters.get(entity).unwrap().particles();
        assert_eq!(particles.len(), 10);
        assert_eq!(particles[0].position, Vec3::new(0.0, 3.0, 0.0));
        assert_eq!(particles[0].velocity, Vec3::Y);
    }

    #[test]
    fn hair_without_mesh_is_skipped() {
        // Given
        let scheduler = scheduler();
        let (with_mesh, without_mesh, mesh) = (Entity::from_raw(1), Entity::from_raw(2), Entity::from_raw(3));
        let mut transforms: ComponentManager<TransformComponent> = ComponentManager::new();
        transforms.create(with_mesh).update_transform();
        transforms.create(without_mesh).update_transform();
        let mut meshes = ComponentManager::new();
        meshes.insert(
            mesh,
            MeshComponent {
                aabb: Aabb::from_half_width(Vec3::ZERO, Vec3::ONE),
                ..Default::default()
            },
        );
        let mut hairs = ComponentManager::new();
        hairs.insert(with_mesh, HairParticleComponent { mesh, length: 0.5, ..Default::default() });
        hairs.insert(without_mesh, HairParticleComponent::default());
        let counters = FrameCounters::default();

        // When
        scheduler.scope(Priority::High, |ctx| {
            run_hair_system(&scheduler, ctx, 1, &mut hairs, &transforms, &meshes, &counters);
        });

        // Then
        assert_eq!(hairs.get(with_mesh).unwrap().aabb.max, Vec3::splat(1.5));
        assert!(hairs.get(without_mesh).unwrap().aabb.is_empty());
        assert_eq!(counters.skipped_references.load(Ordering::Relaxed), 1);
    }

    // ==== Media ====

    #[test]
    fn sound_state_reaches_the_sink() {
        // Given
        let (positioned, flat) = (Entity::from_raw(1), Entity::from_raw(2));
        let mut transforms: ComponentManager<TransformComponent> = ComponentManager::new();
        let transform = transforms.create(positioned);
        transform.translate(Vec3::X);
        transform.update_transform();
        let mut sounds = ComponentManager::new();
        sounds.insert(positioned, SoundComponent { playing: true, ..Default::default() });
        sounds.insert(flat, SoundComponent { disable_3d: true, volume: 0.5, looped: false, ..Default::default() });
        let mut sink = RecordingSink::default();

        // When
        run_sound_system(&sounds, &transforms, &mut sink, Vec3::ZERO);

        // Then
        assert_eq!(sink.calls.len(), 7);
        assert!(sink.calls[0].starts_with("3d #1"));
        assert_eq!(sink.calls[1], "playing #1 true");
        assert_eq!(sink.calls[4], "playing #2 false");
        assert_eq!(sink.calls[6], "volume #2 0.5");
    }

    #[test]
    fn media_components_advance() {
        // Given
        let scheduler = scheduler();
        let entity = Entity::from_raw(1);
        let mut videos = ComponentManager::new();
        videos.insert(
            entity,
            VideoComponent {
                duration: 1.0,
                playing: true,
                looped: true,
                ..Default::default()
            },
        );
        let mut sprites = ComponentManager::new();
        sprites.insert(entity, SpriteComponent { frame_rate: 10.0, frame_count: 4, ..Default::default() });
        let mut fonts = ComponentManager::new();
        fonts.insert(
            entity,
            FontComponent {
                text: "abcd".into(),
                typewriter_time: 2.0,
                ..Default::default()
            },
        );

        // When
        scheduler.scope(Priority::High, |ctx| {
            run_video_system(&scheduler, ctx, 64, &mut videos, 1.25);
            run_sprite_system(&scheduler, ctx, 64, &mut sprites, 0.25);
            run_font_system(&scheduler, ctx, 64, &mut fonts, 1.0);
        });

        // Then
        assert!((videos[0].time - 0.25).abs() < 1e-6);
        assert_eq!(sprites[0].current_frame, 2);
        assert_eq!(fonts[0].visible_characters(), 2);
    }
}
