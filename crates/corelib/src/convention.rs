//! Coordinate and matrix conventions shared by loaders and renderers.
//!
//! Engine space is left-handed: +X right, +Y up, +Z into the screen. Model
//! files authored right-handed (OBJ) are mirrored on load by negating Z, and
//! their texture V axis is flipped because the engine samples with the origin
//! at the top-left corner.
//!
//! Matrices are glam column-major [`Mat4`]s. They are uploaded to shaders as
//! `to_cols_array_2d()` without any transpose, and projections produce clip
//! depth in `[0, 1]`.

use crate::{Mat4, Vec3};

/// Mirror a right-handed file position into engine space.
#[inline]
pub fn position_from_rh(p: [f32; 3]) -> [f32; 3] {
    [p[0], p[1], -p[2]]
}

/// Mirror a right-handed file normal into engine space.
#[inline]
pub fn normal_from_rh(n: [f32; 3]) -> [f32; 3] {
    [n[0], n[1], -n[2]]
}

/// Move a bottom-left-origin texture coordinate to a top-left origin.
#[inline]
pub fn texcoord_from_bottom_left(uv: [f32; 2]) -> [f32; 2] {
    [uv[0], 1.0 - uv[1]]
}

/// Left-handed perspective projection with depth in `[0, 1]`.
#[inline]
pub fn perspective(fov_y_rad: f32, aspect: f32, z_near: f32, z_far: f32) -> Mat4 {
    Mat4::perspective_lh(fov_y_rad, aspect.max(1e-6), z_near, z_far)
}

/// Left-handed view matrix.
#[inline]
pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_at_lh(eye, target, up)
}

/// Shader-ready layout of a matrix (columns, no transpose).
#[inline]
pub fn to_shader(m: &Mat4) -> [[f32; 4]; 4] {
    m.to_cols_array_2d()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Vec4, vec3};

    #[test]
    fn flips_z_and_v() {
        assert_eq!(position_from_rh([1.0, 2.0, 3.0]), [1.0, 2.0, -3.0]);
        assert_eq!(normal_from_rh([0.0, 0.0, 1.0]), [0.0, 0.0, -1.0]);
        assert_eq!(texcoord_from_bottom_left([0.25, 0.25]), [0.25, 0.75]);
    }

    #[test]
    fn projection_maps_near_and_far_to_unit_depth() {
        let proj = perspective(60f32.to_radians(), 1.0, 0.5, 50.0);
        let near = proj * Vec4::new(0.0, 0.0, 0.5, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, 50.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shader_layout_is_column_major() {
        let m = Mat4::from_translation(vec3(1.0, 2.0, 3.0));
        let cols = to_shader(&m);
        assert_eq!(cols[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
