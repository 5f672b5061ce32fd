//! Scene component types.
//!
//! Components are plain data with a handful of helpers. Fields documented as *computed* are
//! written by the scene systems every frame and are overwritten on the next update; everything
//! else is owned by the user.

use std::collections::VecDeque;
use std::f32::consts::{FRAC_PI_3, FRAC_PI_4};

use glam::{EulerRot, Mat4, Quat, Vec2, Vec3, Vec4};

use crate::core::sync::SpinLock;
use crate::ecs::Entity;
use crate::gfx::ShaderMaterial;

use super::bounds::Aabb;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameComponent {
    pub name: String,
}

impl NameComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Visibility layers of an entity. Attached children get their mask combined with the
/// ancestors' masks by the hierarchy system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerComponent {
    pub layer_mask: u32,
}

impl Default for LayerComponent {
    fn default() -> Self {
        Self { layer_mask: u32::MAX }
    }
}

// ==== Transforms ====

/// Local scale, rotation and translation plus the derived world matrix.
///
/// Every mutator marks the component dirty. The transform system only rebuilds `world` from
/// the local state of dirty components, so a component left alone costs nothing per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformComponent {
    pub scale_local: Vec3,
    pub rotation_local: Quat,
    pub translation_local: Vec3,
    /// Local to world matrix. Computed.
    pub world: Mat4,
    pub(crate) dirty: bool,
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self {
            scale_local: Vec3::ONE,
            rotation_local: Quat::IDENTITY,
            translation_local: Vec3::ZERO,
            world: Mat4::IDENTITY,
            dirty: true,
        }
    }
}

impl TransformComponent {
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    /// World space position.
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    /// World space rotation.
    pub fn rotation(&self) -> Quat {
        let (_, rotation, _) = self.world.to_scale_rotation_translation();
        rotation
    }

    /// World space scale.
    pub fn scale(&self) -> Vec3 {
        let (scale, _, _) = self.world.to_scale_rotation_translation();
        scale
    }

    #[inline]
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale_local, self.rotation_local, self.translation_local)
    }

    /// Rebuild `world` from the local state if dirty. Returns `true` if it did.
    #[inline]
    pub fn update_transform(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;
        self.world = self.local_matrix();
        true
    }

    /// `world = parent_world * local`.
    #[inline]
    pub fn update_transform_parented(&mut self, parent_world: &Mat4) {
        self.world = *parent_world * self.local_matrix();
    }

    /// Bake the world matrix into the local state.
    pub fn apply_transform(&mut self) {
        self.set_dirty();
        let (scale, rotation, translation) = self.world.to_scale_rotation_translation();
        self.scale_local = scale;
        self.rotation_local = rotation;
        self.translation_local = translation;
    }

    /// Reset the local state to identity.
    pub fn clear_transform(&mut self) {
        self.set_dirty();
        self.scale_local = Vec3::ONE;
        self.rotation_local = Quat::IDENTITY;
        self.translation_local = Vec3::ZERO;
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.set_dirty();
        self.translation_local += offset;
    }

    /// Rotate by `rotation`, applied after the current local rotation.
    pub fn rotate(&mut self, rotation: Quat) {
        self.set_dirty();
        self.rotation_local = (rotation * self.rotation_local).normalize();
    }

    /// Rotate by roll (z), then pitch (x), then yaw (y). `angles` is `(pitch, yaw, roll)`.
    pub fn rotate_roll_pitch_yaw(&mut self, angles: Vec3) {
        self.rotate(Quat::from_euler(EulerRot::YXZ, angles.y, angles.x, angles.z));
    }

    pub fn scale_by(&mut self, factor: Vec3) {
        self.set_dirty();
        self.scale_local *= factor;
    }

    /// Replace the local state with `matrix * local`.
    pub fn matrix_transform(&mut self, matrix: &Mat4) {
        self.set_dirty();
        let (scale, rotation, translation) = (*matrix * self.local_matrix()).to_scale_rotation_translation();
        self.scale_local = scale;
        self.rotation_local = rotation;
        self.translation_local = translation;
    }

    /// Interpolate the local state between `a` and `b`.
    pub fn lerp(&mut self, a: &TransformComponent, b: &TransformComponent, t: f32) {
        self.set_dirty();
        self.scale_local = a.scale_local.lerp(b.scale_local, t);
        self.rotation_local = a.rotation_local.slerp(b.rotation_local, t).normalize();
        self.translation_local = a.translation_local.lerp(b.translation_local, t);
    }
}

/// Last frame's world matrix, for motion vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousFrameTransformComponent {
    pub world_prev: Mat4,
}

impl Default for PreviousFrameTransformComponent {
    fn default() -> Self {
        Self {
            world_prev: Mat4::IDENTITY,
        }
    }
}

/// Links an entity to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyComponent {
    pub parent: Entity,
    /// The child's own layer mask, saved when it was attached and restored on detach.
    pub layer_mask_bind: u32,
}

impl Default for HierarchyComponent {
    fn default() -> Self {
        Self {
            parent: Entity::INVALID,
            layer_mask_bind: u32::MAX,
        }
    }
}

// ==== Materials and meshes ====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubsurfaceProfile {
    #[default]
    None,
    Skin,
    Snow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialComponent {
    pub base_color: Vec4,
    /// `w` is the emissive strength.
    pub emissive_color: Vec4,
    /// xy: uv scale, zw: uv offset.
    pub texture_mul_add: Vec4,
    pub texture_animation_direction: Vec2,
    /// Texture animation steps per second, 0 disables the animation.
    pub texture_animation_frame_rate: f32,
    pub texture_animation_elapsed: f32,
    pub cast_shadow: bool,
    pub transparent: bool,
    pub double_sided: bool,
    pub custom_shader: Option<u32>,
    pub subsurface_profile: SubsurfaceProfile,
    pub user_stencil_ref: u8,
    /// Computed.
    pub engine_stencil_ref: u8,
    pub(crate) dirty: bool,
}

impl Default for MaterialComponent {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            emissive_color: Vec4::new(1.0, 1.0, 1.0, 0.0),
            texture_mul_add: Vec4::new(1.0, 1.0, 0.0, 0.0),
            texture_animation_direction: Vec2::ZERO,
            texture_animation_frame_rate: 0.0,
            texture_animation_elapsed: 0.0,
            cast_shadow: true,
            transparent: false,
            double_sided: false,
            custom_shader: None,
            subsurface_profile: SubsurfaceProfile::None,
            user_stencil_ref: 0,
            engine_stencil_ref: Self::STENCIL_REF_DEFAULT,
            dirty: true,
        }
    }
}

impl MaterialComponent {
    pub const STENCIL_REF_DEFAULT: u8 = 1;
    pub const STENCIL_REF_CUSTOM_SHADER: u8 = 2;
    pub const STENCIL_REF_SKIN: u8 = 3;
    pub const STENCIL_REF_SNOW: u8 = 4;

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    #[inline]
    pub fn emissive_strength(&self) -> f32 {
        self.emissive_color.w
    }

    /// Render passes the material takes part in, see [`ObjectComponent::RENDER_TYPE_OPAQUE`].
    #[inline]
    pub fn render_types(&self) -> u32 {
        if self.transparent {
            ObjectComponent::RENDER_TYPE_TRANSPARENT
        } else {
            ObjectComponent::RENDER_TYPE_OPAQUE
        }
    }

    /// Engine reference in the low nibble, user reference in the high nibble.
    #[inline]
    pub fn stencil_ref(&self) -> u32 {
        (u32::from(self.user_stencil_ref & 0xf) << 4) | u32::from(self.engine_stencil_ref & 0xf)
    }

    pub fn shader_record(&self) -> ShaderMaterial {
        let mut flags = 0;
        if self.cast_shadow {
            flags |= ShaderMaterial::FLAG_CAST_SHADOW;
        }
        if self.transparent {
            flags |= ShaderMaterial::FLAG_TRANSPARENT;
        }
        if self.double_sided {
            flags |= ShaderMaterial::FLAG_DOUBLE_SIDED;
        }
        if self.custom_shader.is_some() {
            flags |= ShaderMaterial::FLAG_CUSTOM_SHADER;
        }
        ShaderMaterial {
            base_color: self.base_color.to_array(),
            emissive_color: self.emissive_color.to_array(),
            texture_transform: self.texture_mul_add.to_array(),
            flags,
            stencil_ref: self.stencil_ref(),
            subsurface_profile: self.subsurface_profile as u32,
            shader_type: self.custom_shader.unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshSubset {
    pub material: Entity,
    pub index_offset: u32,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MorphTarget {
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshComponent {
    /// Subsets of all LODs, LOD 0 first. Every LOD has the same number of subsets.
    pub subsets: Vec<MeshSubset>,
    /// Bounds in mesh space.
    pub aabb: Aabb,
    pub armature: Entity,
    pub morph_targets: Vec<MorphTarget>,
    pub lod_count: u32,
    /// Vertices are rewritten every frame (by morphing or simulation).
    pub dynamic: bool,
    /// First entry of the mesh's subsets in the frame's geometry records. Computed.
    pub geometry_offset: u32,
}

impl Default for MeshComponent {
    fn default() -> Self {
        Self {
            subsets: Vec::new(),
            aabb: Aabb::EMPTY,
            armature: Entity::INVALID,
            morph_targets: Vec::new(),
            lod_count: 1,
            dynamic: false,
            geometry_offset: 0,
        }
    }
}

impl MeshComponent {
    #[inline]
    pub fn is_skinned(&self) -> bool {
        self.armature.is_valid()
    }

    #[inline]
    pub fn subsets_per_lod(&self) -> usize {
        self.subsets.len() / self.lod_count.max(1) as usize
    }

    /// Center and radius of the bounding sphere in mesh space.
    #[inline]
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        (self.aabb.center(), self.aabb.radius())
    }
}

/// One billboard placement of an impostor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpostorInstance {
    pub transform: Mat4,
    pub instance_uid: u32,
}

/// Everything the object system writes into an impostor while objects update in parallel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpostorPlacements {
    pub aabb: Aabb,
    pub color: Vec4,
    pub fade_threshold_radius: f32,
    pub instances: Vec<ImpostorInstance>,
}

/// Far-distance billboard stand-in for a mesh, attached to the mesh entity.
#[derive(Debug)]
pub struct ImpostorComponent {
    pub swap_in_distance: f32,
    pub texture_index: u32,
    pub(crate) placements: SpinLock<ImpostorPlacements>,
}

impl Default for ImpostorComponent {
    fn default() -> Self {
        Self {
            swap_in_distance: 100.0,
            texture_index: 0,
            placements: SpinLock::default(),
        }
    }
}

impl ImpostorComponent {
    /// This frame's placements. Computed.
    #[inline]
    pub fn placements(&mut self) -> &ImpostorPlacements {
        self.placements.get_mut()
    }

    pub(crate) fn reset(&mut self) {
        let placements = self.placements.get_mut();
        placements.aabb = Aabb::EMPTY;
        placements.instances.clear();
    }

    /// Record one object drawn through this impostor. Called concurrently by object jobs.
    pub(crate) fn place(&self, aabb: &Aabb, color: Vec4, instance: ImpostorInstance) {
        let mut placements = self.placements.lock();
        placements.aabb = placements.aabb.merge(aabb);
        placements.color = color;
        placements.fade_threshold_radius = aabb.radius();
        placements.instances.push(instance);
    }
}

// ==== Objects ====

/// A renderable instance of a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectComponent {
    pub mesh: Entity,
    pub color: Vec4,
    pub emissive_color: Vec4,
    pub lod_distance_multiplier: f32,
    pub renderable: bool,
    /// Computed: center of the world space bounding box.
    pub center: Vec3,
    /// Computed.
    pub radius: f32,
    /// Computed.
    pub lod: u32,
    /// Computed, `RENDER_TYPE_*` bits of the mesh's materials.
    pub render_type_mask: u32,
    /// Computed.
    pub dynamic: bool,
    /// Computed.
    pub cast_shadow: bool,
    /// Computed.
    pub impostor_placement: bool,
    /// Computed.
    pub impostor_swap_distance: f32,
    /// Computed, valid for one frame.
    pub transform_index: Option<usize>,
    /// Computed, valid for one frame.
    pub prev_transform_index: Option<usize>,
    /// Computed: distance from the main camera.
    pub camera_distance: f32,
}

impl Default for ObjectComponent {
    fn default() -> Self {
        Self {
            mesh: Entity::INVALID,
            color: Vec4::ONE,
            emissive_color: Vec4::ONE,
            lod_distance_multiplier: 1.0,
            renderable: true,
            center: Vec3::ZERO,
            radius: 0.0,
            lod: 0,
            render_type_mask: 0,
            dynamic: false,
            cast_shadow: false,
            impostor_placement: false,
            impostor_swap_distance: 0.0,
            transform_index: None,
            prev_transform_index: None,
            camera_distance: 0.0,
        }
    }
}

impl ObjectComponent {
    pub const RENDER_TYPE_OPAQUE: u32 = 1 << 0;
    pub const RENDER_TYPE_TRANSPARENT: u32 = 1 << 1;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CollisionShape {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    Capsule { radius: f32, height: f32 },
}

impl Default for CollisionShape {
    fn default() -> Self {
        CollisionShape::Box {
            half_extents: Vec3::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidBodyComponent {
    pub shape: CollisionShape,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Driven by its transform instead of the simulation.
    pub kinematic: bool,
    pub disable_deactivation: bool,
}

impl Default for RigidBodyComponent {
    fn default() -> Self {
        Self {
            shape: CollisionShape::default(),
            mass: 1.0,
            friction: 0.5,
            restitution: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            kinematic: false,
            disable_deactivation: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArmatureComponent {
    pub bones: Vec<Entity>,
    /// One per bone.
    pub inverse_bind_matrices: Vec<Mat4>,
    /// Computed: bone to armature space skinning matrices, one per bone.
    pub bone_matrices: Vec<Mat4>,
    /// Computed: world space bounds of the bones.
    pub aabb: Aabb,
}

// ==== Lights, cameras and the environment ====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightKind {
    Directional,
    #[default]
    Point,
    Spot,
    /// Rectangle, disc, sphere and tube lights.
    Area,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightComponent {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub range_local: f32,
    pub outer_cone_angle: f32,
    pub inner_cone_angle: f32,
    pub cast_shadow: bool,
    /// Computed.
    pub position: Vec3,
    /// Computed.
    pub rotation: Quat,
    /// Computed.
    pub scale: Vec3,
    /// Computed: the world space +Y axis.
    pub direction: Vec3,
    /// Computed: `range_local` scaled by the largest world scale axis.
    pub range_global: f32,
    /// Computed for area lights.
    pub right: Vec3,
    /// Computed for area lights.
    pub front: Vec3,
}

impl Default for LightComponent {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            color: Vec3::ONE,
            intensity: 1.0,
            range_local: 10.0,
            outer_cone_angle: FRAC_PI_4,
            inner_cone_angle: 0.0,
            cast_shadow: false,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            direction: Vec3::Y,
            range_global: 10.0,
            right: Vec3::NEG_X,
            front: Vec3::NEG_Z,
        }
    }
}

impl LightComponent {
    #[inline]
    pub fn range(&self) -> f32 {
        self.range_global
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraComponent {
    pub width: f32,
    pub height: f32,
    pub z_near: f32,
    pub z_far: f32,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub eye: Vec3,
    /// Look direction.
    pub at: Vec3,
    pub up: Vec3,
    /// Computed.
    pub view: Mat4,
    /// Computed.
    pub projection: Mat4,
    /// Computed.
    pub view_projection: Mat4,
    /// Computed.
    pub inverse_view_projection: Mat4,
}

impl Default for CameraComponent {
    fn default() -> Self {
        Self::perspective(1920.0, 1080.0, 0.1, 1000.0, FRAC_PI_3)
    }
}

impl CameraComponent {
    pub fn perspective(width: f32, height: f32, z_near: f32, z_far: f32, fov: f32) -> Self {
        let mut camera = Self {
            width,
            height,
            z_near,
            z_far,
            fov,
            eye: Vec3::ZERO,
            at: Vec3::Z,
            up: Vec3::Y,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            inverse_view_projection: Mat4::IDENTITY,
        };
        camera.update_camera();
        camera
    }

    /// Place the camera at the transform, looking down its +Z axis.
    pub fn transform_camera(&mut self, transform: &TransformComponent) {
        self.eye = transform.position();
        self.at = transform.world.transform_vector3(Vec3::Z).normalize_or(Vec3::Z);
        self.up = transform.world.transform_vector3(Vec3::Y).normalize_or(Vec3::Y);
    }

    pub fn update_camera(&mut self) {
        let aspect = if self.height > 0.0 { self.width / self.height } else { 1.0 };
        self.view = Mat4::look_to_lh(self.eye, self.at, self.up);
        self.projection = Mat4::perspective_lh(self.fov, aspect, self.z_near, self.z_far);
        self.view_projection = self.projection * self.view;
        self.inverse_view_projection = self.view_projection.inverse();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentProbeComponent {
    pub resolution: u32,
    pub realtime: bool,
    /// Computed.
    pub position: Vec3,
    /// Computed.
    pub range: f32,
    /// Computed: world to probe space.
    pub inverse_matrix: Mat4,
}

impl Default for EnvironmentProbeComponent {
    fn default() -> Self {
        Self {
            resolution: 128,
            realtime: false,
            position: Vec3::ZERO,
            range: 0.0,
            inverse_matrix: Mat4::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceFieldKind {
    #[default]
    Point,
    Plane,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ForceFieldComponent {
    pub kind: ForceFieldKind,
    /// Negative values push away.
    pub gravity: f32,
    pub range_local: f32,
    /// Computed.
    pub position: Vec3,
    /// Computed: the world space -Y axis.
    pub direction: Vec3,
    /// Computed.
    pub range_global: f32,
}

/// Projected texture. Takes its color from the material on the same entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DecalComponent {
    /// Computed.
    pub color: Vec4,
    /// Computed.
    pub emissive: f32,
    /// Computed.
    pub world: Mat4,
    /// Computed.
    pub front: Vec3,
    /// Computed.
    pub position: Vec3,
    /// Computed.
    pub range: f32,
}

impl Default for DecalComponent {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            emissive: 0.0,
            world: Mat4::IDENTITY,
            front: Vec3::Z,
            position: Vec3::ZERO,
            range: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherComponent {
    pub sun_color: Vec3,
    pub sun_direction: Vec3,
    pub sun_energy: f32,
    pub ambient: Vec3,
    pub horizon: Vec3,
    pub zenith: Vec3,
    pub fog_start: f32,
    pub fog_end: f32,
    pub wind_direction: Vec3,
    pub wind_speed: f32,
    pub wind_randomness: f32,
    pub wind_wave_size: f32,
    /// Index into the scene's lights of the directional light lighting the scene. Computed.
    pub most_important_light_index: Option<usize>,
}

impl Default for WeatherComponent {
    fn default() -> Self {
        Self {
            sun_color: Vec3::ZERO,
            sun_direction: Vec3::Y,
            sun_energy: 0.0,
            ambient: Vec3::splat(0.2),
            horizon: Vec3::splat(0.6),
            zenith: Vec3::new(0.3, 0.5, 0.9),
            fog_start: 100.0,
            fog_end: 1000.0,
            wind_direction: Vec3::ZERO,
            wind_speed: 1.0,
            wind_randomness: 5.0,
            wind_wave_size: 1.0,
            most_important_light_index: None,
        }
    }
}

// ==== Animation ====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimationPath {
    #[default]
    Translation,
    Rotation,
    Scale,
    /// Morph target weights of the target mesh.
    Weights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Linear,
    Step,
    /// Cubic Hermite spline. Every keyframe stores an in-tangent, the value and an out-tangent.
    CubicSpline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimationChannel {
    pub target: Entity,
    pub path: AnimationPath,
    pub sampler_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimationSampler {
    /// Entity holding the [`AnimationDataComponent`].
    pub data: Entity,
    pub mode: Interpolation,
}

/// Keyframes shared by any number of samplers.
///
/// `keyframe_data` holds `keyframe_times.len()` elements of 3 floats (translation, scale),
/// 4 floats (rotation) or one float per morph target (weights), tripled for cubic splines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimationDataComponent {
    pub keyframe_times: Vec<f32>,
    pub keyframe_data: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationComponent {
    pub start: f32,
    pub end: f32,
    pub timer: f32,
    /// Blend factor between the current pose and the sampled one.
    pub amount: f32,
    pub speed: f32,
    pub channels: Vec<AnimationChannel>,
    pub samplers: Vec<AnimationSampler>,
    pub(crate) playing: bool,
    pub(crate) looped: bool,
    pub(crate) last_evaluated_timer: Option<f32>,
}

impl Default for AnimationComponent {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 0.0,
            timer: 0.0,
            amount: 1.0,
            speed: 1.0,
            channels: Vec::new(),
            samplers: Vec::new(),
            playing: false,
            looped: true,
            last_evaluated_timer: None,
        }
    }
}

impl AnimationComponent {
    /// A stopped, looping animation driving `channels` from `samplers`. Call
    /// [`fit_end`](Self::fit_end) once the keyframe data is registered.
    pub fn new(channels: Vec<AnimationChannel>, samplers: Vec<AnimationSampler>) -> Self {
        Self {
            channels,
            samplers,
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    #[inline]
    pub fn is_looped(&self) -> bool {
        self.looped
    }

    pub fn set_looped(&mut self, looped: bool) {
        self.looped = looped;
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Pause and rewind to `start`.
    pub fn stop(&mut self) {
        self.pause();
        self.timer = self.start;
    }

    /// Entities written by this animation's channels.
    pub fn targets(&self) -> impl Iterator<Item = Entity> + '_ {
        self.channels.iter().map(|channel| channel.target)
    }

    /// Set `end` to the last keyframe time of all samplers.
    pub fn fit_end(&mut self, datas: &crate::ecs::ComponentManager<AnimationDataComponent>) {
        self.end = self
            .samplers
            .iter()
            .filter_map(|sampler| datas.get(sampler.data))
            .filter_map(|data| data.keyframe_times.last().copied())
            .fold(self.start, f32::max);
    }
}

// ==== Procedural animation ====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InverseKinematicsComponent {
    pub target: Entity,
    /// Number of ancestors rotated towards the target.
    pub chain_length: u32,
    pub iteration_count: u32,
    pub disabled: bool,
}

impl Default for InverseKinematicsComponent {
    fn default() -> Self {
        Self {
            target: Entity::INVALID,
            chain_length: 0,
            iteration_count: 1,
            disabled: false,
        }
    }
}

/// Jiggle bone: the entity lags behind its animated position like a damped spring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringComponent {
    pub stiffness: f32,
    pub damping: f32,
    pub wind_affection: f32,
    pub disabled: bool,
    pub stretch_enabled: bool,
    pub gravity_enabled: bool,
    pub(crate) center_of_mass: Vec3,
    pub(crate) velocity: Vec3,
    pub(crate) resetting: bool,
}

impl Default for SpringComponent {
    fn default() -> Self {
        Self {
            stiffness: 100.0,
            damping: 0.8,
            wind_affection: 0.0,
            disabled: false,
            stretch_enabled: false,
            gravity_enabled: false,
            center_of_mass: Vec3::ZERO,
            velocity: Vec3::ZERO,
            resetting: true,
        }
    }
}

impl SpringComponent {
    /// Restart the simulation from the current position on the next update.
    pub fn reset(&mut self) {
        self.resetting = true;
    }

    #[inline]
    pub fn center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub(crate) fn take_reset(&mut self) -> bool {
        std::mem::take(&mut self.resetting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MorphTargetBinding {
    pub mesh: Entity,
    pub index: usize,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expression {
    pub name: String,
    pub weight: f32,
    /// Weights snap to 0 or 1.
    pub binary: bool,
    pub morph_target_bindings: Vec<MorphTargetBinding>,
    pub(crate) dirty: bool,
}

impl Expression {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Set the weight, marking the expression dirty if it changed.
    pub fn set_weight(&mut self, weight: f32) {
        let weight = if self.binary { weight.round() } else { weight };
        if (self.weight - weight).abs() > f32::EPSILON {
            self.dirty = true;
        }
        self.weight = weight;
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

/// Facial expressions driving morph targets, with procedural blinking.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionComponent {
    pub expressions: Vec<Expression>,
    /// Index of the expression closing both eyelids.
    pub blink: Option<usize>,
    /// Blinks per second.
    pub blink_frequency: f32,
    /// Seconds one blink takes.
    pub blink_length: f32,
    /// Blinks in a row.
    pub blink_count: u32,
    pub(crate) blink_timer: f32,
}

impl Default for ExpressionComponent {
    fn default() -> Self {
        Self {
            expressions: Vec::new(),
            blink: None,
            blink_frequency: 0.3,
            blink_length: 0.1,
            blink_count: 2,
            blink_timer: 0.0,
        }
    }
}

// ==== Particles ====

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub life: f32,
    pub max_life: f32,
    pub size: f32,
}

/// CPU simulated particle emitter.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterComponent {
    /// Particles emitted per second.
    pub count: f32,
    /// Seconds a particle lives.
    pub life: f32,
    /// Launch speed along the emitter's +Y axis.
    pub speed: f32,
    pub size_begin: f32,
    pub size_end: f32,
    pub gravity: Vec3,
    pub max_particles: usize,
    pub paused: bool,
    /// Computed.
    pub aabb: Aabb,
    pub(crate) particles: VecDeque<Particle>,
    pub(crate) emit: f32,
}

impl Default for EmitterComponent {
    fn default() -> Self {
        Self {
            count: 10.0,
            life: 1.0,
            speed: 1.0,
            size_begin: 1.0,
            size_end: 0.0,
            gravity: Vec3::ZERO,
            max_particles: 1000,
            paused: false,
            aabb: Aabb::EMPTY,
            particles: VecDeque::new(),
            emit: 0.0,
        }
    }
}

impl EmitterComponent {
    #[inline]
    pub fn particles(&self) -> &VecDeque<Particle> {
        &self.particles
    }

    /// Emit `count` particles on the next update, on top of the continuous rate.
    pub fn burst(&mut self, count: f32) {
        self.emit += count.max(0.0);
    }

    /// Advance the particles by `dt` and emit new ones at the emitter's world transform.
    pub fn update_cpu(&mut self, world: &Mat4, dt: f32) {
        if self.paused {
            return;
        }

        let mut aabb = Aabb::EMPTY;
        for particle in &mut self.particles {
            particle.velocity += self.gravity * dt;
            particle.position += particle.velocity * dt;
            particle.life = (particle.life - dt).clamp(0.0, particle.max_life);

            let life_lerp = if particle.max_life > 0.0 { particle.life / particle.max_life } else { 0.0 };
            particle.size = self.size_end + (self.size_begin - self.size_end) * life_lerp;
            aabb = aabb.merge(&Aabb::from_half_width(particle.position, Vec3::splat(particle.size)));
        }
        self.aabb = aabb;

        while self.particles.front().is_some_and(|particle| particle.life <= 0.0) {
            self.particles.pop_front();
        }

        self.emit += self.count * dt;
        let emitted = self.emit.floor();
        self.emit -= emitted;

        let position = world.w_axis.truncate();
        let velocity = world.transform_vector3(Vec3::Y).normalize_or_zero() * self.speed;
        for _ in 0..emitted as usize {
            if self.particles.len() >= self.max_particles {
                self.particles.pop_front();
            }
            self.particles.push_back(Particle {
                position,
                velocity,
                life: self.life,
                max_life: self.life,
                size: self.size_begin,
            });
        }
    }
}

/// Hair or grass strands grown on a mesh surface.
#[derive(Debug, Clone, PartialEq)]
pub struct HairParticleComponent {
    pub mesh: Entity,
    pub strand_count: u32,
    pub length: f32,
    /// Computed.
    pub world: Mat4,
    /// Computed.
    pub aabb: Aabb,
}

impl Default for HairParticleComponent {
    fn default() -> Self {
        Self {
            mesh: Entity::INVALID,
            strand_count: 1000,
            length: 1.0,
            world: Mat4::IDENTITY,
            aabb: Aabb::EMPTY,
        }
    }
}

impl HairParticleComponent {
    pub fn update_cpu(&mut self, transform: &TransformComponent, mesh: &MeshComponent) {
        self.world = transform.world;
        let aabb = mesh.aabb.transform(&self.world);
        self.aabb = if aabb.is_empty() {
            aabb
        } else {
            Aabb::new(aabb.min - Vec3::splat(self.length), aabb.max + Vec3::splat(self.length))
        };
    }
}

// ==== Media and scripting ====

#[derive(Debug, Clone, PartialEq)]
pub struct SoundComponent {
    pub filename: String,
    pub volume: f32,
    pub playing: bool,
    pub looped: bool,
    /// Not positioned in the world.
    pub disable_3d: bool,
}

impl Default for SoundComponent {
    fn default() -> Self {
        Self {
            filename: String::new(),
            volume: 1.0,
            playing: false,
            looped: true,
            disable_3d: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoComponent {
    pub filename: String,
    /// Length in seconds.
    pub duration: f32,
    /// Playback position in seconds.
    pub time: f32,
    pub playing: bool,
    pub looped: bool,
}

impl VideoComponent {
    pub fn update(&mut self, dt: f32) {
        if !self.playing {
            return;
        }
        self.time += dt;
        if self.time >= self.duration {
            if self.looped && self.duration > 0.0 {
                self.time %= self.duration;
            } else {
                self.time = self.duration;
                self.playing = false;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptComponent {
    pub filename: String,
    pub playing: bool,
    /// Stop after one run.
    pub once: bool,
    /// Computed.
    pub run_count: u32,
}

/// A screen or world space image with flipbook animation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteComponent {
    pub position: Vec3,
    pub size: Vec2,
    pub rotation: f32,
    pub color: Vec4,
    pub hidden: bool,
    /// Flipbook frames per second, 0 disables the flipbook.
    pub frame_rate: f32,
    pub frame_count: u32,
    /// Computed.
    pub current_frame: u32,
    pub(crate) elapsed: f32,
}

impl Default for SpriteComponent {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            size: Vec2::ONE,
            rotation: 0.0,
            color: Vec4::ONE,
            hidden: false,
            frame_rate: 0.0,
            frame_count: 1,
            current_frame: 0,
            elapsed: 0.0,
        }
    }
}

impl SpriteComponent {
    pub fn update(&mut self, dt: f32) {
        if self.frame_rate <= 0.0 || self.frame_count <= 1 {
            return;
        }
        self.elapsed += dt * self.frame_rate;
        let frames = self.elapsed.floor();
        if frames >= 1.0 {
            self.elapsed -= frames;
            self.current_frame = ((self.current_frame as u64 + frames as u64) % self.frame_count as u64) as u32;
        }
    }
}

/// Text with an optional typewriter reveal.
#[derive(Debug, Clone, PartialEq)]
pub struct FontComponent {
    pub text: String,
    pub position: Vec3,
    pub size: f32,
    pub color: Vec4,
    pub hidden: bool,
    /// Seconds to reveal the whole text, 0 shows it at once.
    pub typewriter_time: f32,
    pub typewriter_looped: bool,
    pub(crate) typewriter_elapsed: f32,
}

impl Default for FontComponent {
    fn default() -> Self {
        Self {
            text: String::new(),
            position: Vec3::ZERO,
            size: 16.0,
            color: Vec4::ONE,
            hidden: false,
            typewriter_time: 0.0,
            typewriter_looped: false,
            typewriter_elapsed: 0.0,
        }
    }
}

impl FontComponent {
    pub fn update(&mut self, dt: f32) {
        if self.typewriter_time <= 0.0 {
            return;
        }
        self.typewriter_elapsed += dt;
        if self.typewriter_elapsed > self.typewriter_time && self.typewriter_looped {
            self.typewriter_elapsed = 0.0;
        }
    }

    /// Number of characters currently revealed.
    pub fn visible_characters(&self) -> usize {
        let count = self.text.chars().count();
        if self.typewriter_time <= 0.0 {
            return count;
        }
        let t = (self.typewriter_elapsed / self.typewriter_time).clamp(0.0, 1.0);
        (count as f32 * t) as usize
    }
}
