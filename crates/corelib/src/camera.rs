use bytemuck::{Pod, Zeroable};

use crate::{Mat4, Vec3, convention};

/// Perspective camera in engine (left-handed) space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_rad: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub aspect: f32,
}

impl Camera {
    /// 60 degree vertical field of view, clip range 0.1..100, Y up.
    pub fn looking_at(eye: Vec3, target: Vec3, aspect: f32) -> Self {
        Self {
            eye,
            target,
            up: Vec3::Y,
            fov_y_rad: 60f32.to_radians(),
            z_near: 0.1,
            z_far: 100.0,
            aspect,
        }
    }

    pub fn with_clip(mut self, z_near: f32, z_far: f32) -> Self {
        self.z_near = z_near;
        self.z_far = z_far;
        self
    }

    /// Aspect ratio for a `width` x `height` target; zero sizes count as 1.
    pub fn for_target(mut self, width: u32, height: u32) -> Self {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
        self
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        convention::look_at(self.eye, self.target, self.up)
    }

    /// Depth lands in `[0, 1]`.
    #[inline]
    pub fn proj(&self) -> Mat4 {
        convention::perspective(self.fov_y_rad, self.aspect, self.z_near, self.z_far)
    }

    #[inline]
    pub fn proj_view(&self) -> Mat4 {
        self.proj() * self.view()
    }
}

/// Per-frame matrices as laid out in constant slot 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ViewUniform {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl ViewUniform {
    pub fn new(model: &Mat4, camera: &Camera) -> Self {
        Self {
            model: convention::to_shader(model),
            view: convention::to_shader(&camera.view()),
            proj: convention::to_shader(&camera.proj()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Vec4, vec3};

    #[test]
    fn target_projects_inside_clip_volume() {
        let cam = Camera::looking_at(vec3(0.0, 0.0, -4.0), Vec3::ZERO, 1.0);
        let clip = cam.proj_view() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let depth = clip.z / clip.w;
        assert!(clip.x.abs() < 1e-5 && clip.y.abs() < 1e-5);
        assert!(depth > 0.0 && depth < 1.0);
    }

    #[test]
    fn near_plane_maps_to_zero_depth() {
        let cam = Camera::looking_at(Vec3::ZERO, Vec3::Z, 1.0).with_clip(0.5, 10.0);
        let clip = cam.proj_view() * Vec4::new(0.0, 0.0, 0.5, 1.0);
        assert!((clip.z / clip.w).abs() < 1e-5);
    }

    #[test]
    fn aspect_follows_target_size() {
        let cam = Camera::looking_at(Vec3::NEG_Z, Vec3::ZERO, 1.0).for_target(1920, 1080);
        assert!((cam.aspect - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(cam.for_target(0, 0).aspect, 1.0);
    }

    #[test]
    fn view_uniform_is_three_matrices() {
        assert_eq!(std::mem::size_of::<ViewUniform>(), 3 * 64);
    }
}
