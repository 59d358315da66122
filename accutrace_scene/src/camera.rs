use anyhow::Context;
use nalgebra_glm as glm;
use serde_json as js;

use crate::json::{f32_or, to_vec3};

/// Perspective camera looking down its local −Z axis.
///
/// Every setter raises a change flag that the renderer consumes once per frame
/// to decide whether accumulated samples are still valid.
#[derive(Copy, Clone, Debug)]
pub struct Camera {
    position:     glm::Vec3,
    rotation:     glm::Quat,
    /// Degrees.
    vertical_fov: f32,
    near:         f32,
    far:          f32,
    has_changed:  bool,
}

const DEFAULT_PITCH: f32 = -10.0;

/// Slightly above the scene, looking at it from the +Z side.
impl Default for Camera {
    fn default() -> Self {
        Self::new(glm::vec3(0.0, 30.0, 120.0), orientation(0.0, DEFAULT_PITCH.to_radians()), 60.0)
    }
}

impl Camera {
    pub fn new(position: glm::Vec3, rotation: glm::Quat, vertical_fov: f32) -> Self {
        Self { position, rotation, vertical_fov, near: 0.1, far: 1000.0, has_changed: true }
    }

    /// Keys: `position` (3 numbers), `yaw` and `pitch` in degrees, `fov` in
    /// degrees, `near`, `far`. Missing keys keep their defaults.
    pub fn from_json(object: &js::Value) -> anyhow::Result<Self> {
        let mut camera = Self::default();
        if !object["position"].is_null() {
            camera.position = to_vec3(&object["position"]).context("Invalid camera position")?;
        }
        let yaw = f32_or(object, "yaw", 0.0)?;
        let pitch = f32_or(object, "pitch", DEFAULT_PITCH)?;
        camera.rotation = orientation(yaw.to_radians(), pitch.to_radians());
        camera.vertical_fov = f32_or(object, "fov", camera.vertical_fov)?;
        camera.near = f32_or(object, "near", camera.near)?;
        camera.far = f32_or(object, "far", camera.far)?;
        Ok(camera)
    }

    pub fn position(&self) -> glm::Vec3 {
        self.position
    }

    pub fn rotation(&self) -> glm::Quat {
        self.rotation
    }

    pub fn vertical_fov(&self) -> f32 {
        self.vertical_fov
    }

    pub fn set_position(&mut self, position: glm::Vec3) {
        self.position = position;
        self.has_changed = true;
    }

    pub fn set_rotation(&mut self, rotation: glm::Quat) {
        self.rotation = glm::quat_normalize(&rotation);
        self.has_changed = true;
    }

    pub fn translate(&mut self, offset: glm::Vec3) {
        self.position += offset;
        self.has_changed = true;
    }

    pub fn set_vertical_fov(&mut self, degrees: f32) {
        self.vertical_fov = degrees;
        self.has_changed = true;
    }

    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    /// Returns whether the camera moved since the last call, and forgets it.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.has_changed)
    }

    pub fn forward(&self) -> glm::Vec3 {
        glm::quat_rotate_vec3(&self.rotation, &glm::vec3(0.0, 0.0, -1.0))
    }

    pub fn right(&self) -> glm::Vec3 {
        glm::quat_rotate_vec3(&self.rotation, &glm::vec3(1.0, 0.0, 0.0))
    }

    pub fn camera_to_world(&self) -> glm::Mat4 {
        glm::translation(&self.position) * glm::quat_to_mat4(&self.rotation)
    }

    pub fn projection(&self, aspect: f32) -> glm::Mat4 {
        glm::perspective(aspect, self.vertical_fov.to_radians(), self.near, self.far)
    }

    pub fn inverse_projection(&self, aspect: f32) -> glm::Mat4 {
        glm::inverse(&self.projection(aspect))
    }
}

/// Yaw around world up followed by pitch around the camera's own right axis.
/// Both angles in radians.
pub fn orientation(yaw: f32, pitch: f32) -> glm::Quat {
    glm::quat_angle_axis(yaw, &glm::vec3(0.0, 1.0, 0.0)) * glm::quat_angle_axis(pitch, &glm::vec3(1.0, 0.0, 0.0))
}
