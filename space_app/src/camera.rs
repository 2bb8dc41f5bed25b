//! Camera with trackball and first-person controls
//!
//! Trackball controls orbit, pan and zoom around the look-at point. First-person
//! controls walk the eye and center together and turn the view around the eye.

use nalgebra::{Unit, UnitQuaternion};
use space_engine::foundation::math::{look_at, Mat4, Point3, Vec3};

const MIN_DISTANCE: f32 = 1e-3;

/// Smallest turn applied by [`TrackballCamera::first_person_look`]
const MIN_LOOK_ANGLE: f32 = 1e-3;

/// Camera defined by an eye position, the point it looks at and an up vector
#[derive(Debug, Clone, PartialEq)]
pub struct TrackballCamera {
    eye: Vec3,
    center: Vec3,
    up: Vec3,
}

impl Default for TrackballCamera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 2.0, 5.0),
            center: Vec3::new(0.0, 1.0, 0.0),
            up: Vec3::new(0.0, 1.0, 0.0),
        }
    }
}

impl TrackballCamera {
    /// Camera position
    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    /// Point the camera looks at
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Orbit the eye around the center
    ///
    /// `dside` moves along the screen's horizontal axis, `dup` along its
    /// vertical one; the rotation angle is the length of that displacement.
    pub fn rotate(&mut self, dside: f32, dup: f32) {
        let angle = dside.hypot(dup);
        if angle < 1e-6 {
            return;
        }

        let eye_center = self.eye - self.center;
        let (side, up) = self.screen_axes();
        let direction = up * dup + side * dside;
        let Some(axis) = Unit::try_new(direction.cross(&eye_center), 1e-6) else {
            return;
        };

        let rotation = UnitQuaternion::from_axis_angle(&axis, angle);
        self.eye = rotation * eye_center + self.center;
        self.up = rotation * self.up;
    }

    /// Move eye and center together in the screen plane
    pub fn pan(&mut self, dside: f32, dup: f32) {
        let (side, up) = self.screen_axes();
        let offset = up * dup + side * dside;
        self.eye += offset;
        self.center += offset;
    }

    /// Move the eye along the view axis; positive values move away
    ///
    /// Steps scale with the logarithm of the distance so zooming feels even
    /// near and far. When a step would cross the center, the center is pushed
    /// along instead.
    pub fn zoom(&mut self, amount: f32) {
        let eye_center = self.eye - self.center;
        let length = eye_center.norm();
        if length < MIN_DISTANCE * MIN_DISTANCE {
            return;
        }
        let forward = eye_center / length;

        let mut step = (length + 1.0).ln() * amount / 2.0;
        if step + length < MIN_DISTANCE {
            step = 0.1 * amount;
            self.center += forward * step;
        }
        self.eye += forward * step;
    }

    /// Walk without turning
    ///
    /// `dx` strafes along the screen's horizontal axis. `dy` moves along the
    /// view axis, positive values stepping back.
    pub fn first_person_move(&mut self, dx: f32, dy: f32) {
        let (side, _) = self.screen_axes();
        let back = (self.eye - self.center).normalize();
        let offset = side * dx + back * dy;
        self.eye += offset;
        self.center += offset;
    }

    /// Turn the view around the eye
    ///
    /// Positive `dtheta` looks right and positive `dphy` looks down. Turns
    /// smaller than a milliradian are ignored.
    pub fn first_person_look(&mut self, dtheta: f32, dphy: f32) {
        let angle = dtheta.hypot(dphy);
        if angle < MIN_LOOK_ANGLE {
            return;
        }

        let eye_center = self.center - self.eye;
        let up = self.up.normalize();
        let left = up.cross(&eye_center.normalize()).normalize();
        let direction = up * dphy + left * dtheta;
        let Some(axis) = Unit::try_new(direction.cross(&eye_center), 1e-6) else {
            return;
        };

        let rotation = UnitQuaternion::from_axis_angle(&axis, angle);
        self.center = self.eye + rotation * eye_center;
        self.up = rotation * self.up;
    }

    /// Walk, then turn
    pub fn first_person_control(&mut self, dx: f32, dy: f32, dtheta: f32, dphy: f32) {
        self.first_person_move(dx, dy);
        self.first_person_look(dtheta, dphy);
    }

    /// View matrix for the current pose
    pub fn view_matrix(&self) -> Mat4 {
        look_at(&Point3::from(self.eye), &Point3::from(self.center), &self.up)
    }

    fn screen_axes(&self) -> (Vec3, Vec3) {
        let back = (self.eye - self.center).normalize();
        let up = self.up.normalize();
        let side = up.cross(&back).normalize();
        (side, up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rotate_keeps_distance_to_center() {
        let mut camera = TrackballCamera::default();
        let before = (camera.eye() - camera.center()).norm();
        camera.rotate(0.4, -0.2);
        let after = (camera.eye() - camera.center()).norm();
        assert_relative_eq!(before, after, epsilon = 1e-5);
        assert_eq!(camera.center(), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_rotate_sideways_moves_eye_sideways() {
        let mut camera = TrackballCamera::default();
        camera.rotate(0.3, 0.0);
        assert!(camera.eye().x.abs() > 0.1);
    }

    #[test]
    fn test_zero_rotation_is_a_no_op() {
        let mut camera = TrackballCamera::default();
        camera.rotate(0.0, 0.0);
        assert_eq!(camera, TrackballCamera::default());
    }

    #[test]
    fn test_pan_moves_eye_and_center_together() {
        let mut camera = TrackballCamera::default();
        let offset_before = camera.eye() - camera.center();
        camera.pan(1.0, 0.5);
        assert_relative_eq!(camera.eye() - camera.center(), offset_before, epsilon = 1e-5);
        assert!(camera.center() != Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_zoom_in_shortens_distance() {
        let mut camera = TrackballCamera::default();
        let before = (camera.eye() - camera.center()).norm();
        camera.zoom(-0.5);
        let after = (camera.eye() - camera.center()).norm();
        assert!(after < before);
        assert_relative_eq!(before - after, (before + 1.0).ln() * 0.25, epsilon = 1e-5);
    }

    #[test]
    fn test_first_person_move_keeps_view_direction() {
        let mut camera = TrackballCamera::default();
        let offset_before = camera.eye() - camera.center();
        camera.first_person_move(1.0, 0.0);
        assert_relative_eq!(camera.eye() - camera.center(), offset_before, epsilon = 1e-5);
        assert_relative_eq!(camera.eye().x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_first_person_move_forward_approaches_center() {
        let mut camera = TrackballCamera::default();
        let start = camera.eye();
        let forward = (camera.center() - camera.eye()).normalize();
        camera.first_person_move(0.0, -0.5);
        assert_relative_eq!(camera.eye(), start + forward * 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_first_person_look_turns_around_eye() {
        let mut camera = TrackballCamera::default();
        let distance = (camera.center() - camera.eye()).norm();
        camera.first_person_look(0.2, 0.0);
        assert_eq!(camera.eye(), TrackballCamera::default().eye());
        assert_relative_eq!((camera.center() - camera.eye()).norm(), distance, epsilon = 1e-5);
        assert!(camera.center().x > 0.1);

        let mut camera = TrackballCamera::default();
        camera.first_person_look(0.0, 0.1);
        assert!(camera.center().y < 1.0);
    }

    #[test]
    fn test_tiny_look_is_ignored() {
        let mut camera = TrackballCamera::default();
        camera.first_person_look(5e-4, 5e-4);
        assert_eq!(camera, TrackballCamera::default());
    }

    #[test]
    fn test_first_person_control_moves_then_turns() {
        let mut camera = TrackballCamera::default();
        camera.first_person_control(0.0, -1.0, 0.3, 0.0);

        let mut expected = TrackballCamera::default();
        expected.first_person_move(0.0, -1.0);
        expected.first_person_look(0.3, 0.0);
        assert_relative_eq!(camera.eye(), expected.eye(), epsilon = 1e-6);
        assert_relative_eq!(camera.center(), expected.center(), epsilon = 1e-6);
    }

    #[test]
    fn test_view_matrix_maps_center_onto_view_axis() {
        let camera = TrackballCamera::default();
        let center = camera.view_matrix().transform_point(&Point3::from(camera.center()));
        assert_relative_eq!(center.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(center.y, 0.0, epsilon = 1e-5);
        assert!(center.z < 0.0);
    }
}
