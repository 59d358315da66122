use std::collections::HashSet;

use accutrace_scene::{camera::orientation, Camera};
use nalgebra_glm as glm;
use winit::event::{ElementState, MouseButton, VirtualKeyCode};

const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2;

/// Free-look controller. Holding the right mouse button turns the camera,
/// WASD moves it in its own plane and Q/E move it along world up.
pub struct FlyCam {
    /// Units per second.
    pub speed:            f32,
    /// Degrees per pixel of mouse travel.
    pub look_sensitivity: f32,

    yaw:           f32,
    pitch:         f32,
    looking:       bool,
    cursor_locked: bool,
    mouse_delta:   glm::Vec2,
    held:          HashSet<VirtualKeyCode>,
}

impl FlyCam {
    /// `yaw` and `pitch` in degrees, matching the camera's initial orientation.
    pub fn new(yaw: f32, pitch: f32, speed: f32, look_sensitivity: f32) -> Self {
        Self {
            speed,
            look_sensitivity,
            yaw: yaw.to_radians(),
            pitch: pitch.to_radians().clamp(-MAX_PITCH, MAX_PITCH),
            looking: false,
            cursor_locked: false,
            mouse_delta: glm::Vec2::zeros(),
            held: HashSet::new(),
        }
    }

    /// Returns `true` when the cursor lock was toggled and the window must
    /// follow.
    pub fn on_key(&mut self, key: VirtualKeyCode, state: ElementState) -> bool {
        match state {
            ElementState::Pressed => {
                let newly_pressed = self.held.insert(key);
                if key == VirtualKeyCode::Escape && newly_pressed {
                    self.cursor_locked = !self.cursor_locked;
                    return true;
                }
            }
            ElementState::Released => {
                self.held.remove(&key);
            }
        }
        false
    }

    pub fn on_mouse_button(&mut self, button: MouseButton, state: ElementState) {
        if button == MouseButton::Right {
            self.looking = state == ElementState::Pressed;
        }
    }

    pub fn on_mouse_motion(&mut self, delta: (f64, f64)) {
        if self.looking {
            self.mouse_delta += glm::vec2(delta.0 as f32, delta.1 as f32);
        }
    }

    /// Drops held keys and buttons, e.g. when the window loses focus.
    pub fn release_all(&mut self) {
        self.held.clear();
        self.looking = false;
        self.mouse_delta = glm::Vec2::zeros();
    }

    pub fn is_cursor_locked(&self) -> bool {
        self.cursor_locked
    }

    /// Applies the input gathered since the last call. The camera is only
    /// touched when it actually moves, so a still camera keeps accumulating.
    pub fn update(&mut self, camera: &mut Camera, dt: f32) {
        let mouse_delta = std::mem::replace(&mut self.mouse_delta, glm::Vec2::zeros());
        if mouse_delta != glm::Vec2::zeros() {
            let turn = mouse_delta * self.look_sensitivity.to_radians();
            self.yaw -= turn.x;
            self.pitch = (self.pitch - turn.y).clamp(-MAX_PITCH, MAX_PITCH);
            camera.set_rotation(orientation(self.yaw, self.pitch));
        }

        let axis = |positive: VirtualKeyCode, negative: VirtualKeyCode| {
            self.held.contains(&positive) as i32 as f32 - self.held.contains(&negative) as i32 as f32
        };
        let forward = axis(VirtualKeyCode::W, VirtualKeyCode::S);
        let right = axis(VirtualKeyCode::D, VirtualKeyCode::A);
        let up = axis(VirtualKeyCode::E, VirtualKeyCode::Q);

        let direction = camera.forward() * forward + camera.right() * right + glm::vec3(0.0, up, 0.0);
        if direction != glm::Vec3::zeros() {
            camera.translate(direction * self.speed * dt);
        }
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }
}
