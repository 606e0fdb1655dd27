//! Window management using winit
//!
//! [`run`] opens the window, brings up the Vulkan backend and the engine,
//! and drives one frame per redraw until the window closes, Escape is
//! pressed or an optional frame limit is reached.
//!
//! Controls: WASD/QE to move, right mouse to look, Tab to switch between
//! FPS and orbit cameras, 1-7 to pick a debug view.

use std::sync::Arc;

use glam::Vec2;
use winit::{
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::{DeviceEvent, ElementState, Event, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::backend::vulkan::VulkanBackend;
use crate::backend::BackendError;
use crate::engine::{Engine, FrameStatus};
use crate::pipeline::DebugView;
use crate::scene::{CameraMode, CameraRig, InputState, Key, MouseButton};
use crate::EngineConfig;

/// Scroll pixels per wheel line
const PIXELS_PER_LINE: f32 = 50.0;

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("event loop error: {0}")]
    EventLoop(#[from] EventLoopError),
    #[error("window creation failed: {0}")]
    Os(#[from] OsError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Key the engine reacts to for a physical key code
pub fn map_key(code: KeyCode) -> Option<Key> {
    let key = match code {
        KeyCode::KeyW => Key::W,
        KeyCode::KeyA => Key::A,
        KeyCode::KeyS => Key::S,
        KeyCode::KeyD => Key::D,
        KeyCode::KeyQ => Key::Q,
        KeyCode::KeyE => Key::E,
        KeyCode::Space => Key::Space,
        KeyCode::ControlLeft | KeyCode::ControlRight => Key::Ctrl,
        KeyCode::ShiftLeft | KeyCode::ShiftRight => Key::Shift,
        KeyCode::Tab => Key::Tab,
        KeyCode::Escape => Key::Escape,
        KeyCode::Digit0 => Key::Digit(0),
        KeyCode::Digit1 => Key::Digit(1),
        KeyCode::Digit2 => Key::Digit(2),
        KeyCode::Digit3 => Key::Digit(3),
        KeyCode::Digit4 => Key::Digit(4),
        KeyCode::Digit5 => Key::Digit(5),
        KeyCode::Digit6 => Key::Digit(6),
        KeyCode::Digit7 => Key::Digit(7),
        KeyCode::Digit8 => Key::Digit(8),
        KeyCode::Digit9 => Key::Digit(9),
        _ => return None,
    };
    Some(key)
}

pub fn map_button(button: winit::event::MouseButton) -> Option<MouseButton> {
    match button {
        winit::event::MouseButton::Left => Some(MouseButton::Left),
        winit::event::MouseButton::Right => Some(MouseButton::Right),
        winit::event::MouseButton::Middle => Some(MouseButton::Middle),
        _ => None,
    }
}

/// Number keys 1-7 select the debug views in order
pub fn debug_view_for_key(key: Key) -> Option<DebugView> {
    match key {
        Key::Digit(n) => DebugView::ALL.get((n as usize).checked_sub(1)?).copied(),
        _ => None,
    }
}

/// Per-window state carried through the event loop
struct App {
    window: Arc<WinitWindow>,
    /// Dropped before the window so the surface goes first
    engine: Option<Engine<VulkanBackend>>,
    input: InputState,
    rig: CameraRig,
    cursor_locked: bool,
    max_frames: Option<u64>,
    failure: Option<BackendError>,
}

impl App {
    fn handle_window_event(&mut self, event: &WindowEvent, elwt: &EventLoopWindowTarget<()>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => elwt.exit(),
            WindowEvent::Resized(size) => engine.resize(size.width, size.height),
            WindowEvent::Focused(false) => self.input.clear(),
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else {
                    return;
                };
                let Some(key) = map_key(code) else {
                    return;
                };
                match event.state {
                    ElementState::Pressed => {
                        self.input.key_down(key);
                        if key == Key::Escape {
                            elwt.exit();
                        } else if let Some(view) = debug_view_for_key(key) {
                            engine.set_debug_view(view);
                        }
                    }
                    ElementState::Released => self.input.key_up(key),
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if let Some(button) = map_button(*button) {
                    match state {
                        ElementState::Pressed => self.input.button_down(button),
                        ElementState::Released => self.input.button_up(button),
                    }
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / PIXELS_PER_LINE,
                };
                self.input.add_scroll(lines);
            }
            WindowEvent::RedrawRequested => self.redraw(elwt),
            _ => {}
        }
    }

    fn redraw(&mut self, elwt: &EventLoopWindowTarget<()>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let dt = engine.timer().delta_seconds();
        self.rig
            .update(&mut engine.scene_mut().camera, &self.input, dt);
        let lock = self.rig.wants_cursor_lock(&self.input);
        self.input.end_frame();
        if lock != self.cursor_locked {
            self.window.set_cursor_visible(!lock);
            self.cursor_locked = lock;
        }

        match engine.draw_frame() {
            Ok(FrameStatus::Presented { .. }) => {
                let timer = engine.timer();
                if timer.frame_count() % 300 == 0 {
                    log::debug!("{:.1} fps", timer.fps());
                }
            }
            Ok(FrameStatus::Recreated | FrameStatus::Skipped) => {}
            Err(e) => {
                log::error!("Frame {} failed: {}", engine.frame_number(), e);
                self.failure = Some(e);
                elwt.exit();
                return;
            }
        }
        if self
            .max_frames
            .is_some_and(|limit| engine.frame_number() >= limit)
        {
            log::info!("Frame limit reached");
            elwt.exit();
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.destroy();
        }
    }
}

/// Open a window and render until it is closed.
///
/// `setup` runs once after the engine is up and is where meshes,
/// materials and the scene are created. `max_frames` stops the loop after
/// that many presented frames.
pub fn run<F>(config: EngineConfig, max_frames: Option<u64>, setup: F) -> Result<(), WindowError>
where
    F: FnOnce(&mut Engine<VulkanBackend>) -> Result<(), BackendError>,
{
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(&event_loop)?,
    );

    let size = window.inner_size();
    let config = config.with_size(size.width, size.height);
    let mut engine = Engine::<VulkanBackend>::new(&*window, config)?;
    setup(&mut engine)?;

    let rig = CameraRig::new(CameraMode::Fps, &engine.scene().camera);
    let mut app = App {
        window: Arc::clone(&window),
        engine: Some(engine),
        input: InputState::new(),
        rig,
        cursor_locked: false,
        max_frames,
        failure: None,
    };

    event_loop.run(|event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);
        match event {
            Event::WindowEvent { event, .. } => app.handle_window_event(&event, elwt),
            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta },
                ..
            } => {
                app.input
                    .add_mouse_delta(Vec2::new(delta.0 as f32, delta.1 as f32));
            }
            Event::AboutToWait => app.window.request_redraw(),
            Event::LoopExiting => app.shutdown(),
            _ => {}
        }
    })?;

    app.shutdown();
    match app.failure.take() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(map_key(KeyCode::KeyW), Some(Key::W));
        assert_eq!(map_key(KeyCode::ShiftRight), Some(Key::Shift));
        assert_eq!(map_key(KeyCode::Digit3), Some(Key::Digit(3)));
        assert_eq!(map_key(KeyCode::F12), None);
    }

    #[test]
    fn test_digits_select_debug_views() {
        assert_eq!(debug_view_for_key(Key::Digit(1)), Some(DebugView::Final));
        assert_eq!(debug_view_for_key(Key::Digit(3)), Some(DebugView::Normal));
        assert_eq!(debug_view_for_key(Key::Digit(7)), Some(DebugView::Cascades));
        assert_eq!(debug_view_for_key(Key::Digit(0)), None);
        assert_eq!(debug_view_for_key(Key::Digit(8)), None);
        assert_eq!(debug_view_for_key(Key::W), None);
    }
}
