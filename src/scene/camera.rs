//! Cameras
//!
//! Meshes name the camera they are drawn through; the camera's position and
//! view direction feed a shared uniform entry.

use crate::backend::CameraUniform;
use crate::error::UniformKind;
use crate::resources::UniformSource;
use glam::{Mat4, Vec3};
use parking_lot::RwLock;

/// How a camera maps view space to clip space
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        let half_w = width / 2.0;
        let half_h = height / 2.0;
        Projection::Orthographic {
            left: -half_w,
            right: half_w,
            bottom: -half_h,
            top: half_h,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = self {
            *a = aspect;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CameraState {
    position: Vec3,
    target: Vec3,
    up: Vec3,
    projection: Projection,
}

/// A named viewpoint; meshes reference cameras by name
///
/// State sits behind a lock so the logic thread can move the camera while the
/// render thread reads it for the shared uniform refresh.
#[derive(Debug)]
pub struct Camera {
    id: u64,
    name: String,
    state: RwLock<CameraState>,
}

impl Camera {
    pub fn new(id: u64, name: impl Into<String>, position: Vec3, target: Vec3) -> Self {
        Self {
            id,
            name: name.into(),
            state: RwLock::new(CameraState {
                position,
                target,
                up: Vec3::Y,
                projection: Projection::default(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Vec3 {
        self.state.read().position
    }

    pub fn set_position(&self, position: Vec3) {
        self.state.write().position = position;
    }

    pub fn look_at(&self, target: Vec3) {
        self.state.write().target = target;
    }

    pub fn set_projection(&self, projection: Projection) {
        self.state.write().projection = projection;
    }

    /// Match the projection to a `width` x `height` target; zero height is ignored
    pub fn set_aspect(&self, width: f32, height: f32) {
        if height > 0.0 {
            self.state.write().projection.set_aspect(width / height);
        }
    }

    /// Unit vector from the eye towards the target
    pub fn forward(&self) -> Vec3 {
        let state = self.state.read();
        (state.target - state.position).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        let state = self.state.read();
        Mat4::look_at_rh(state.position, state.target, state.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.state.read().projection.matrix()
    }

    /// Block written into the shared camera uniform
    pub fn uniform_data(&self) -> CameraUniform {
        CameraUniform {
            position: self.position().extend(1.0),
            direction: self.forward().extend(0.0),
        }
    }
}

impl UniformSource for Camera {
    const KIND: UniformKind = UniformKind::Camera;
    const SIZE: u64 = std::mem::size_of::<CameraUniform>() as u64;

    fn uniform_key(&self) -> u64 {
        self.id
    }

    fn uniform_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(&self.uniform_data()).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_tracks_movement() {
        let camera = Camera::new(1, "main", Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        assert_eq!(camera.uniform_data().direction, glam::Vec4::new(0.0, 0.0, -1.0, 0.0));

        camera.set_position(Vec3::new(5.0, 0.0, 0.0));
        let data = camera.uniform_data();
        assert_eq!(data.position, glam::Vec4::new(5.0, 0.0, 0.0, 1.0));
        assert_eq!(data.direction, glam::Vec4::new(-1.0, 0.0, 0.0, 0.0));
        assert_eq!(camera.uniform_bytes().len() as u64, Camera::SIZE);
    }

    #[test]
    fn test_aspect_ignores_zero_height() {
        let camera = Camera::new(1, "main", Vec3::Z, Vec3::ZERO);
        let before = camera.projection_matrix();
        camera.set_aspect(800.0, 0.0);
        assert_eq!(camera.projection_matrix(), before);
        camera.set_aspect(800.0, 400.0);
        assert_ne!(camera.projection_matrix(), before);
    }

    #[test]
    fn test_orthographic_projection_keeps_its_bounds() {
        let camera = Camera::new(1, "map", Vec3::new(0.0, 10.0, 0.1), Vec3::ZERO);
        camera.set_projection(Projection::orthographic(20.0, 10.0, 0.1, 50.0));
        let before = camera.projection_matrix();
        camera.set_aspect(1920.0, 1080.0);
        assert_eq!(camera.projection_matrix(), before);

        let corner = before.project_point3(Vec3::new(10.0, 5.0, -1.0));
        assert!((corner.x - 1.0).abs() < 1e-5);
        assert!((corner.y - 1.0).abs() < 1e-5);

        camera.look_at(Vec3::new(0.0, 0.0, 10.0));
        assert!(camera.forward().z > 0.0);
    }
}
