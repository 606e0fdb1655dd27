//! Camera controller system
//!
//! Controllers read an explicit [`InputState`] snapshot instead of polling
//! the window, so they can be driven from tests as easily as from winit.
//!
//! - FPS: WASD movement, right-drag mouse look, Shift to sprint
//! - Orbit: drag to rotate around a target point, scroll to zoom
//!
//! [`CameraRig`] owns both and toggles between them with Tab.

use std::collections::HashSet;
use std::f32::consts::FRAC_PI_2;

use glam::{Vec2, Vec3};

use super::Camera;

/// Keys the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    W,
    A,
    S,
    D,
    Q,
    E,
    Space,
    Ctrl,
    Shift,
    Tab,
    Escape,
    /// Number row, `0..=9`
    Digit(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Input snapshot for one frame
#[derive(Debug, Clone, Default)]
pub struct InputState {
    held: HashSet<Key>,
    /// Keys that went down since the last [`InputState::end_frame`]
    pressed: HashSet<Key>,
    buttons: HashSet<MouseButton>,
    /// Mouse delta since last frame (in pixels, y down)
    pub mouse_delta: Vec2,
    /// Scroll delta (positive = scroll up)
    pub scroll_delta: f32,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_down(&mut self, key: Key) {
        if self.held.insert(key) {
            self.pressed.insert(key);
        }
    }

    pub fn key_up(&mut self, key: Key) {
        self.held.remove(&key);
    }

    pub fn button_down(&mut self, button: MouseButton) {
        self.buttons.insert(button);
    }

    pub fn button_up(&mut self, button: MouseButton) {
        self.buttons.remove(&button);
    }

    pub fn add_mouse_delta(&mut self, delta: Vec2) {
        self.mouse_delta += delta;
    }

    pub fn add_scroll(&mut self, delta: f32) {
        self.scroll_delta += delta;
    }

    pub fn is_held(&self, key: Key) -> bool {
        self.held.contains(&key)
    }

    /// Went down this frame
    pub fn was_pressed(&self, key: Key) -> bool {
        self.pressed.contains(&key)
    }

    pub fn is_button_held(&self, button: MouseButton) -> bool {
        self.buttons.contains(&button)
    }

    /// Reset per-frame state (call after update)
    pub fn end_frame(&mut self) {
        self.pressed.clear();
        self.mouse_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    /// Drop everything, e.g. when the window loses focus
    pub fn clear(&mut self) {
        self.held.clear();
        self.buttons.clear();
        self.end_frame();
    }
}

/// Largest pitch magnitude; keeps the view off the poles
pub const MAX_PITCH: f32 = FRAC_PI_2 - 0.01;
pub const MIN_ORBIT_DISTANCE: f32 = 0.5;
pub const MAX_ORBIT_DISTANCE: f32 = 100.0;

/// Unit direction for a yaw/pitch pair (yaw 0 looks down +X)
fn direction(yaw: f32, pitch: f32) -> Vec3 {
    Vec3::new(
        pitch.cos() * yaw.cos(),
        pitch.sin(),
        pitch.cos() * yaw.sin(),
    )
}

/// Camera controller driven by an input snapshot
pub trait CameraController {
    /// Update the camera based on input and delta time
    fn update(&mut self, camera: &mut Camera, input: &InputState, dt: f32);

    /// Get the controller name for debugging
    fn name(&self) -> &'static str;

    /// Adopt the camera's current placement
    fn sync_with_camera(&mut self, camera: &Camera);

    /// Whether the cursor should be captured for mouse look
    fn wants_cursor_lock(&self, input: &InputState) -> bool;
}

/// First-person controller
///
/// - WASD: move, E/Space up, Q/Ctrl down, Shift sprints
/// - Right mouse button held: look around
#[derive(Debug, Clone)]
pub struct FpsController {
    pub position: Vec3,
    /// Horizontal angle in radians
    pub yaw: f32,
    /// Vertical angle in radians, clamped to [`MAX_PITCH`]
    pub pitch: f32,
    /// Units per second
    pub move_speed: f32,
    pub sprint_multiplier: f32,
    /// Radians per pixel
    pub look_sensitivity: f32,
}

impl Default for FpsController {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            yaw: -FRAC_PI_2,
            pitch: 0.0,
            move_speed: 5.0,
            sprint_multiplier: 3.0,
            look_sensitivity: 0.002,
        }
    }
}

impl FpsController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_yaw_pitch(&mut self, yaw: f32, pitch: f32) {
        self.yaw = yaw;
        self.pitch = pitch.clamp(-MAX_PITCH, MAX_PITCH);
    }

    pub fn forward(&self) -> Vec3 {
        direction(self.yaw, self.pitch)
    }

    /// Right vector on the XZ plane
    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize_or_zero()
    }

    fn apply(&self, camera: &mut Camera) {
        camera.position = self.position;
        camera.target = self.position + self.forward();
        camera.up = Vec3::Y;
    }
}

impl CameraController for FpsController {
    fn update(&mut self, camera: &mut Camera, input: &InputState, dt: f32) {
        if input.is_button_held(MouseButton::Right) && input.mouse_delta != Vec2::ZERO {
            self.yaw += input.mouse_delta.x * self.look_sensitivity;
            // Mouse y grows downwards
            self.pitch = (self.pitch - input.mouse_delta.y * self.look_sensitivity)
                .clamp(-MAX_PITCH, MAX_PITCH);
        }

        let forward = self.forward();
        let right = self.right();
        let mut velocity = Vec3::ZERO;
        if input.is_held(Key::W) {
            velocity += forward;
        }
        if input.is_held(Key::S) {
            velocity -= forward;
        }
        if input.is_held(Key::D) {
            velocity += right;
        }
        if input.is_held(Key::A) {
            velocity -= right;
        }
        if input.is_held(Key::E) || input.is_held(Key::Space) {
            velocity.y += 1.0;
        }
        if input.is_held(Key::Q) || input.is_held(Key::Ctrl) {
            velocity.y -= 1.0;
        }

        if velocity.length_squared() > 1e-6 {
            let mut speed = self.move_speed;
            if input.is_held(Key::Shift) {
                speed *= self.sprint_multiplier;
            }
            self.position += velocity.normalize() * speed * dt;
        }

        self.apply(camera);
    }

    fn name(&self) -> &'static str {
        "FPS"
    }

    fn sync_with_camera(&mut self, camera: &Camera) {
        self.position = camera.position;
        let forward = camera.forward();
        if forward != Vec3::ZERO {
            self.set_yaw_pitch(forward.z.atan2(forward.x), forward.y.clamp(-1.0, 1.0).asin());
        }
    }

    fn wants_cursor_lock(&self, input: &InputState) -> bool {
        input.is_button_held(MouseButton::Right)
    }
}

/// Orbit controller
///
/// - Left or right mouse button held: rotate around the target
/// - Scroll: zoom, clamped to [`MIN_ORBIT_DISTANCE`]..=[`MAX_ORBIT_DISTANCE`]
#[derive(Debug, Clone)]
pub struct OrbitController {
    pub target: Vec3,
    pub distance: f32,
    /// Azimuth in radians
    pub yaw: f32,
    /// Elevation in radians
    pub pitch: f32,
    pub look_sensitivity: f32,
    /// Distance change per scroll unit
    pub scroll_speed: f32,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 5.0,
            yaw: 0.0,
            pitch: 0.3,
            look_sensitivity: 0.002,
            scroll_speed: 2.0,
        }
    }
}

impl OrbitController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eye position on the sphere around the target
    pub fn position(&self) -> Vec3 {
        self.target + direction(self.yaw, self.pitch) * self.distance
    }

    pub fn set_distance(&mut self, distance: f32) {
        self.distance = distance.clamp(MIN_ORBIT_DISTANCE, MAX_ORBIT_DISTANCE);
    }

    fn apply(&self, camera: &mut Camera) {
        camera.position = self.position();
        camera.target = self.target;
        camera.up = Vec3::Y;
    }
}

impl CameraController for OrbitController {
    fn update(&mut self, camera: &mut Camera, input: &InputState, _dt: f32) {
        if self.wants_cursor_lock(input) {
            self.yaw += input.mouse_delta.x * self.look_sensitivity;
            self.pitch = (self.pitch - input.mouse_delta.y * self.look_sensitivity)
                .clamp(-MAX_PITCH, MAX_PITCH);
        }
        if input.scroll_delta != 0.0 {
            self.set_distance(self.distance - input.scroll_delta * self.scroll_speed);
        }
        self.apply(camera);
    }

    fn name(&self) -> &'static str {
        "Orbit"
    }

    fn sync_with_camera(&mut self, camera: &Camera) {
        self.target = camera.target;
        let offset = camera.position - camera.target;
        let distance = offset.length();
        if distance > 1e-4 {
            let dir = offset / distance;
            self.set_distance(distance);
            self.yaw = dir.z.atan2(dir.x);
            self.pitch = dir.y.clamp(-1.0, 1.0).asin().clamp(-MAX_PITCH, MAX_PITCH);
        }
    }

    fn wants_cursor_lock(&self, input: &InputState) -> bool {
        input.is_button_held(MouseButton::Left) || input.is_button_held(MouseButton::Right)
    }
}

/// Active camera control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraMode {
    #[default]
    Fps,
    Orbit,
}

/// Both controllers plus the active mode; Tab switches between them.
#[derive(Debug, Clone, Default)]
pub struct CameraRig {
    mode: CameraMode,
    pub fps: FpsController,
    pub orbit: OrbitController,
}

impl CameraRig {
    /// Start in `mode`, placed where `camera` currently is
    pub fn new(mode: CameraMode, camera: &Camera) -> Self {
        let mut rig = Self {
            mode,
            ..Default::default()
        };
        rig.fps.sync_with_camera(camera);
        rig.orbit.sync_with_camera(camera);
        rig
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    /// Switch modes keeping the view continuous: entering orbit puts the
    /// target `distance` ahead of the eye, leaving it keeps the eye where
    /// the orbit left it.
    pub fn set_mode(&mut self, mode: CameraMode) {
        if self.mode == mode {
            return;
        }
        match mode {
            CameraMode::Orbit => {
                // The orbit eye sits opposite the view direction
                let forward = self.fps.forward();
                self.orbit.target = self.fps.position + forward * self.orbit.distance;
                self.orbit.yaw = (-forward.z).atan2(-forward.x);
                self.orbit.pitch = -self.fps.pitch;
            }
            CameraMode::Fps => {
                let eye = self.orbit.position();
                let forward = (self.orbit.target - eye).normalize_or_zero();
                self.fps.position = eye;
                self.fps
                    .set_yaw_pitch(forward.z.atan2(forward.x), forward.y.clamp(-1.0, 1.0).asin());
            }
        }
        self.mode = mode;
        log::debug!("Camera mode: {:?}", mode);
    }

    fn active(&mut self) -> &mut dyn CameraController {
        match self.mode {
            CameraMode::Fps => &mut self.fps,
            CameraMode::Orbit => &mut self.orbit,
        }
    }

    pub fn update(&mut self, camera: &mut Camera, input: &InputState, dt: f32) {
        if input.was_pressed(Key::Tab) {
            let next = match self.mode {
                CameraMode::Fps => CameraMode::Orbit,
                CameraMode::Orbit => CameraMode::Fps,
            };
            self.set_mode(next);
        }
        self.active().update(camera, input, dt);
    }

    pub fn wants_cursor_lock(&self, input: &InputState) -> bool {
        match self.mode {
            CameraMode::Fps => self.fps.wants_cursor_lock(input),
            CameraMode::Orbit => self.orbit.wants_cursor_lock(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn test_pressed_lasts_one_frame() {
        let mut input = InputState::new();
        input.key_down(Key::Tab);
        assert!(input.was_pressed(Key::Tab));
        input.end_frame();
        assert!(!input.was_pressed(Key::Tab));
        assert!(input.is_held(Key::Tab));
        // Key repeat does not count as a new press
        input.key_down(Key::Tab);
        assert!(!input.was_pressed(Key::Tab));
    }

    #[test]
    fn test_fps_moves_along_view_direction() {
        let mut camera = Camera::default();
        let mut fps = FpsController::new();
        fps.position = Vec3::ZERO;
        fps.set_yaw_pitch(-FRAC_PI_2, 0.0);
        let mut input = InputState::new();
        input.key_down(Key::W);

        fps.update(&mut camera, &input, 1.0);
        assert!(approx(camera.position, Vec3::new(0.0, 0.0, -5.0)));
        assert!(approx(camera.forward(), Vec3::new(0.0, 0.0, -1.0)));

        input.key_down(Key::Shift);
        fps.update(&mut camera, &input, 1.0);
        assert!(approx(camera.position, Vec3::new(0.0, 0.0, -20.0)));
    }

    #[test]
    fn test_fps_pitch_is_clamped() {
        let mut camera = Camera::default();
        let mut fps = FpsController::new();
        let mut input = InputState::new();
        input.button_down(MouseButton::Right);
        input.add_mouse_delta(Vec2::new(0.0, -1.0e6));
        fps.update(&mut camera, &input, 0.016);
        assert_eq!(fps.pitch, MAX_PITCH);

        input.end_frame();
        input.add_mouse_delta(Vec2::new(0.0, 1.0e7));
        fps.update(&mut camera, &input, 0.016);
        assert_eq!(fps.pitch, -MAX_PITCH);
    }

    #[test]
    fn test_fps_ignores_mouse_without_button() {
        let mut camera = Camera::default();
        let mut fps = FpsController::new();
        let yaw = fps.yaw;
        let mut input = InputState::new();
        input.add_mouse_delta(Vec2::new(100.0, 0.0));
        fps.update(&mut camera, &input, 0.016);
        assert_eq!(fps.yaw, yaw);
        assert!(!fps.wants_cursor_lock(&input));
    }

    #[test]
    fn test_orbit_zoom_is_clamped() {
        let mut camera = Camera::default();
        let mut orbit = OrbitController::new();
        let mut input = InputState::new();
        input.add_scroll(1000.0);
        orbit.update(&mut camera, &input, 0.016);
        assert_eq!(orbit.distance, MIN_ORBIT_DISTANCE);

        input.end_frame();
        input.add_scroll(-1000.0);
        orbit.update(&mut camera, &input, 0.016);
        assert_eq!(orbit.distance, MAX_ORBIT_DISTANCE);
        assert!(((camera.position - camera.target).length() - MAX_ORBIT_DISTANCE).abs() < 1e-3);
    }

    #[test]
    fn test_rig_tab_toggles_and_keeps_eye() {
        let mut camera = Camera::default();
        let mut rig = CameraRig::new(CameraMode::Fps, &camera);
        let mut input = InputState::new();

        rig.update(&mut camera, &input, 0.0);
        let eye = camera.position;
        let forward = camera.forward();

        input.key_down(Key::Tab);
        rig.update(&mut camera, &input, 0.0);
        assert_eq!(rig.mode(), CameraMode::Orbit);
        assert!(approx(camera.position, eye));
        assert!(approx(camera.forward(), forward));

        input.end_frame();
        input.key_up(Key::Tab);
        input.key_down(Key::Tab);
        rig.update(&mut camera, &input, 0.0);
        assert_eq!(rig.mode(), CameraMode::Fps);
        assert!(approx(camera.position, eye));
    }

    #[test]
    fn test_sync_with_default_camera() {
        let camera = Camera::default();
        let mut fps = FpsController::new();
        fps.sync_with_camera(&camera);
        assert!(approx(fps.forward(), camera.forward()));

        let mut orbit = OrbitController::new();
        orbit.sync_with_camera(&camera);
        assert!(approx(orbit.position(), camera.position));
    }
}
