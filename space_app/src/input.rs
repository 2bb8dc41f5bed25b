//! Mouse and gamepad camera controls
//!
//! Left-drag orbits, right-drag pans and the wheel zooms. Drag distances are
//! measured in half the window's shorter side, so a drag across that distance
//! turns the same amount whatever the window size. A gamepad walks the camera
//! with the left stick and turns it with the right one.

use ash::vk;
use glfw::MouseButton;
use space_engine::render::backends::vulkan::{GamepadSticks, PointerEvent};

use crate::camera::TrackballCamera;

const POINTER_ROTATE_SPEED: f32 = 2.0;
const POINTER_PAN_SPEED: f32 = 5.0;
/// Zoom per wheel notch, scrolling away from the user zooms in
const SCROLL_ZOOM_SPEED: f32 = 0.5;

/// Stick deflection treated as centered
const STICK_DEAD_ZONE: f32 = 0.15;
/// World units per second at full deflection
const STICK_MOVE_SPEED: f32 = 3.0;
/// Radians per second at full deflection
const STICK_LOOK_SPEED: f32 = 1.5;

/// What a mouse drag currently does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragMode {
    Idle,
    Rotate,
    Pan,
}

/// One camera adjustment produced by pointer input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraAction {
    Rotate { dside: f32, dup: f32 },
    Pan { dside: f32, dup: f32 },
    Zoom(f32),
}

impl CameraAction {
    pub fn apply(self, camera: &mut TrackballCamera) {
        match self {
            Self::Rotate { dside, dup } => camera.rotate(dside, dup),
            Self::Pan { dside, dup } => camera.pan(dside, dup),
            Self::Zoom(amount) => camera.zoom(amount),
        }
    }
}

/// Turns pointer events into trackball actions
///
/// A drag starts only from [`DragMode::Idle`]; releasing any button ends it.
#[derive(Debug)]
pub struct PointerController {
    mode: DragMode,
    last_position: Option<(f64, f64)>,
}

impl Default for PointerController {
    fn default() -> Self {
        Self {
            mode: DragMode::Idle,
            last_position: None,
        }
    }
}

impl PointerController {
    /// Feed one event; `area` is the window size in cursor coordinates
    pub fn handle(&mut self, event: PointerEvent, area: vk::Extent2D) -> Option<CameraAction> {
        match event {
            PointerEvent::Button { button, pressed: true } => {
                if self.mode == DragMode::Idle {
                    // Button1 is the left button, Button2 the right one
                    self.mode = match button {
                        MouseButton::Button1 => DragMode::Rotate,
                        MouseButton::Button2 => DragMode::Pan,
                        _ => DragMode::Idle,
                    };
                }
                None
            }
            PointerEvent::Button { pressed: false, .. } => {
                self.mode = DragMode::Idle;
                None
            }
            PointerEvent::Moved { x, y } => {
                let (last_x, last_y) = self.last_position.replace((x, y))?;
                let minor_axis = area.width.min(area.height) / 2;
                if minor_axis == 0 {
                    return None;
                }
                let dside = (x - last_x) as f32 / minor_axis as f32;
                let dup = -(y - last_y) as f32 / minor_axis as f32;
                match self.mode {
                    DragMode::Idle => None,
                    DragMode::Rotate => Some(CameraAction::Rotate {
                        dside: dside * POINTER_ROTATE_SPEED,
                        dup: dup * POINTER_ROTATE_SPEED,
                    }),
                    DragMode::Pan => Some(CameraAction::Pan {
                        dside: dside * POINTER_PAN_SPEED,
                        dup: dup * POINTER_PAN_SPEED,
                    }),
                }
            }
            PointerEvent::Scroll(offset) => Some(CameraAction::Zoom(-offset as f32 * SCROLL_ZOOM_SPEED)),
        }
    }
}

/// First-person deltas for one frame of stick input
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StickMotion {
    pub dx: f32,
    pub dy: f32,
    pub dtheta: f32,
    pub dphy: f32,
}

impl StickMotion {
    /// Scale deflections past the dead zone by `dt` seconds
    ///
    /// Pushing the left stick up walks forward; pushing the right stick up
    /// looks up.
    pub fn from_sticks(sticks: &GamepadSticks, dt: f32) -> Self {
        let [move_x, move_y] = sticks.left.map(dead_zone);
        let [look_x, look_y] = sticks.right.map(dead_zone);
        Self {
            dx: move_x * STICK_MOVE_SPEED * dt,
            dy: move_y * STICK_MOVE_SPEED * dt,
            dtheta: look_x * STICK_LOOK_SPEED * dt,
            dphy: look_y * STICK_LOOK_SPEED * dt,
        }
    }

    pub fn apply(self, camera: &mut TrackballCamera) {
        camera.first_person_control(self.dx, self.dy, self.dtheta, self.dphy);
    }
}

fn dead_zone(value: f32) -> f32 {
    if value.abs() < STICK_DEAD_ZONE {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const AREA: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

    fn press(button: MouseButton) -> PointerEvent {
        PointerEvent::Button { button, pressed: true }
    }

    fn release(button: MouseButton) -> PointerEvent {
        PointerEvent::Button { button, pressed: false }
    }

    fn moved(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Moved { x, y }
    }

    #[test]
    fn test_left_drag_rotates_in_half_minor_axis_units() {
        let mut pointer = PointerController::default();
        assert_eq!(pointer.handle(moved(100.0, 100.0), AREA), None);
        pointer.handle(press(MouseButton::Button1), AREA);
        assert_eq!(pointer.mode, DragMode::Rotate);

        let Some(CameraAction::Rotate { dside, dup }) = pointer.handle(moved(130.0, 85.0), AREA) else {
            panic!("left drag should rotate");
        };
        // Half of the 600 pixel side is 300
        assert_relative_eq!(dside, 30.0 / 300.0 * 2.0);
        assert_relative_eq!(dup, 15.0 / 300.0 * 2.0);
    }

    #[test]
    fn test_right_drag_pans() {
        let mut pointer = PointerController::default();
        pointer.handle(moved(0.0, 0.0), AREA);
        pointer.handle(press(MouseButton::Button2), AREA);
        let Some(CameraAction::Pan { dside, dup }) = pointer.handle(moved(-60.0, 30.0), AREA) else {
            panic!("right drag should pan");
        };
        assert_relative_eq!(dside, -0.2 * 5.0);
        assert_relative_eq!(dup, -0.1 * 5.0);
    }

    #[test]
    fn test_second_button_does_not_switch_mode() {
        let mut pointer = PointerController::default();
        pointer.handle(press(MouseButton::Button1), AREA);
        pointer.handle(press(MouseButton::Button2), AREA);
        assert_eq!(pointer.mode, DragMode::Rotate);
    }

    #[test]
    fn test_any_release_ends_drag() {
        let mut pointer = PointerController::default();
        pointer.handle(moved(10.0, 10.0), AREA);
        pointer.handle(press(MouseButton::Button1), AREA);
        pointer.handle(release(MouseButton::Button2), AREA);
        assert_eq!(pointer.mode, DragMode::Idle);
        assert_eq!(pointer.handle(moved(50.0, 50.0), AREA), None);
    }

    #[test]
    fn test_middle_button_starts_nothing() {
        let mut pointer = PointerController::default();
        pointer.handle(press(MouseButton::Button3), AREA);
        assert_eq!(pointer.mode, DragMode::Idle);
    }

    #[test]
    fn test_idle_motion_still_tracks_position() {
        let mut pointer = PointerController::default();
        pointer.handle(moved(0.0, 0.0), AREA);
        pointer.handle(moved(300.0, 0.0), AREA);
        pointer.handle(press(MouseButton::Button1), AREA);
        let Some(CameraAction::Rotate { dside, .. }) = pointer.handle(moved(330.0, 0.0), AREA) else {
            panic!("left drag should rotate");
        };
        assert_relative_eq!(dside, 0.2);
    }

    #[test]
    fn test_collapsed_window_ignores_motion() {
        let mut pointer = PointerController::default();
        let collapsed = vk::Extent2D { width: 800, height: 1 };
        pointer.handle(press(MouseButton::Button1), collapsed);
        pointer.handle(moved(0.0, 0.0), collapsed);
        assert_eq!(pointer.handle(moved(10.0, 10.0), collapsed), None);
    }

    #[test]
    fn test_scroll_away_zooms_in() {
        let mut pointer = PointerController::default();
        assert_eq!(pointer.handle(PointerEvent::Scroll(1.0), AREA), Some(CameraAction::Zoom(-0.5)));

        let mut camera = TrackballCamera::default();
        let before = (camera.eye() - camera.center()).norm();
        CameraAction::Zoom(-0.5).apply(&mut camera);
        assert!((camera.eye() - camera.center()).norm() < before);
    }

    #[test]
    fn test_centered_sticks_do_nothing() {
        let sticks = GamepadSticks {
            left: [0.1, -0.14],
            right: [-0.05, 0.0],
        };
        assert_eq!(StickMotion::from_sticks(&sticks, 0.016), StickMotion::default());

        let mut camera = TrackballCamera::default();
        StickMotion::from_sticks(&sticks, 0.016).apply(&mut camera);
        assert_eq!(camera, TrackballCamera::default());
    }

    #[test]
    fn test_full_deflection_scales_with_frame_time() {
        let sticks = GamepadSticks {
            left: [1.0, -1.0],
            right: [0.5, 0.0],
        };
        let motion = StickMotion::from_sticks(&sticks, 0.5);
        assert_relative_eq!(motion.dx, 1.5);
        assert_relative_eq!(motion.dy, -1.5);
        assert_relative_eq!(motion.dtheta, 0.375);
        assert_relative_eq!(motion.dphy, 0.0);
    }

    #[test]
    fn test_left_stick_up_walks_forward() {
        let mut camera = TrackballCamera::default();
        let start = (camera.eye() - camera.center()).norm();
        let sticks = GamepadSticks {
            left: [0.0, -1.0],
            right: [0.0, 0.0],
        };
        StickMotion::from_sticks(&sticks, 0.1).apply(&mut camera);
        let forward = (TrackballCamera::default().center() - TrackballCamera::default().eye()).normalize();
        assert_relative_eq!(camera.eye(), TrackballCamera::default().eye() + forward * 0.3, epsilon = 1e-5);
        assert_relative_eq!((camera.eye() - camera.center()).norm(), start, epsilon = 1e-5);
    }
}
