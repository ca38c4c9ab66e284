use crate::{Aabb, EulerRot, Mat4, Quat, Vec3};

/// Placement of a model in engine space: scale, then rotate, then translate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Rotation about X, then Y, then Z; angles in radians.
    pub fn from_euler_xyz(x: f32, y: f32, z: f32) -> Self {
        Self {
            rotation: Quat::from_euler(EulerRot::XYZ, x, y, z),
            ..Self::IDENTITY
        }
    }

    /// Uniform scale and offset mapping `bounds` into the cube [-1, 1]^3,
    /// centered at the origin. Degenerate boxes only get recentered.
    pub fn fit(bounds: &Aabb) -> Self {
        let largest = bounds.extent().max_element();
        let s = if largest > f32::EPSILON { 2.0 / largest } else { 1.0 };
        Self {
            translation: -bounds.center() * s,
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(s),
        }
    }

    #[inline]
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation * (p * self.scale) + self.translation
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn identity_is_identity_matrix() {
        assert_eq!(Transform::IDENTITY.matrix(), Mat4::IDENTITY);
        assert_eq!(Transform::default(), Transform::IDENTITY);
    }

    #[test]
    fn fit_maps_box_into_unit_cube() {
        let mut b = Aabb::from_point(vec3(10.0, 0.0, 4.0));
        b.include(vec3(14.0, 2.0, 5.0));
        let t = Transform::fit(&b);
        assert!(close(t.transform_point(b.min), vec3(-1.0, -0.5, -0.25)));
        assert!(close(t.transform_point(b.max), vec3(1.0, 0.5, 0.25)));
        assert!(close(t.matrix().transform_point3(b.max), t.transform_point(b.max)));
    }

    #[test]
    fn degenerate_box_is_only_recentered() {
        let t = Transform::fit(&Aabb::from_point(vec3(1.0, 2.0, 3.0)));
        assert_eq!(t.scale, Vec3::ONE);
        assert!(close(t.transform_point(vec3(1.0, 2.0, 3.0)), Vec3::ZERO));
    }

    #[test]
    fn quarter_turn_about_y() {
        let t = Transform::from_euler_xyz(0.0, std::f32::consts::FRAC_PI_2, 0.0);
        assert!(close(t.transform_point(Vec3::X), vec3(0.0, 0.0, -1.0)));
    }
}
