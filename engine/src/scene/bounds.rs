use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Axis aligned bounding box.
///
/// The default box is inverted (`min = +MAX`, `max = -MAX`) so merging anything into it yields
/// the other box unchanged.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(-f32::MAX),
    };

    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_half_width(center: Vec3, half_width: Vec3) -> Self {
        Self {
            min: center - half_width,
            max: center + half_width,
        }
    }

    /// `true` while nothing was merged into the box.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    #[inline]
    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn merge_point(&self, point: Vec3) -> Aabb {
        Aabb {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_width(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Radius of the bounding sphere around the box.
    #[inline]
    pub fn radius(&self) -> f32 {
        self.half_width().length()
    }

    /// Bounds of the eight transformed corners.
    pub fn transform(&self, matrix: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let corners = [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ];
        corners
            .into_iter()
            .fold(Aabb::EMPTY, |aabb, corner| aabb.merge_point(matrix.transform_point3(corner)))
    }

    /// The matrix mapping the unit cube `[-1, 1]³` onto this box.
    #[inline]
    pub fn as_box_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.half_width(), glam::Quat::IDENTITY, self.center())
    }

    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn empty_is_merge_identity() {
        // Given
        let aabb = Aabb::new(Vec3::new(-1.0, 0.0, 2.0), Vec3::new(1.0, 3.0, 4.0));

        // When
        let merged = Aabb::EMPTY.merge(&aabb);

        // Then
        assert!(Aabb::EMPTY.is_empty());
        assert_eq!(merged, aabb);
    }

    #[test]
    fn transform_covers_rotated_corners() {
        // Given
        let aabb = Aabb::from_half_width(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let matrix = Mat4::from_rotation_translation(
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            Vec3::new(10.0, 0.0, 0.0),
        );

        // When
        let transformed = aabb.transform(&matrix);

        // Then
        assert!(transformed.min.abs_diff_eq(Vec3::new(9.0, -2.0, -1.0), 1e-5));
        assert!(transformed.max.abs_diff_eq(Vec3::new(11.0, 2.0, 1.0), 1e-5));
    }

    #[test]
    fn box_matrix_maps_unit_cube() {
        let aabb = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 4.0, 6.0));
        let matrix = aabb.as_box_matrix();
        assert!(matrix.transform_point3(Vec3::ONE).abs_diff_eq(aabb.max, 1e-6));
        assert!(matrix.transform_point3(-Vec3::ONE).abs_diff_eq(aabb.min, 1e-6));
        assert!(matrix.w_axis.truncate().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
    }

    #[test]
    fn intersection_and_containment() {
        let a = Aabb::from_half_width(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::from_half_width(Vec3::new(1.5, 0.0, 0.0), Vec3::ONE);
        let c = Aabb::from_half_width(Vec3::new(5.0, 0.0, 0.0), Vec3::ONE);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains(Vec3::new(0.5, -0.5, 1.0)));
        assert!((a.radius() - 3f32.sqrt()).abs() < 1e-6);
    }
}
