//! Math types and the projection helpers the renderer needs
//!
//! Projections are built in the OpenGL convention (Y up, depth in [-1, 1]) and
//! then corrected for Vulkan with [`clip_correction`].

pub use nalgebra::{Matrix4, Point3 as NPoint3, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 3D point type
pub type Point3 = NPoint3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Flips Y and maps depth from [-1, 1] to [0, 1]
#[rustfmt::skip]
pub fn clip_correction() -> Mat4 {
    Mat4::new(
        1.0,  0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0,  0.0, 0.5, 0.5,
        0.0,  0.0, 0.0, 1.0,
    )
}

/// Right-handed perspective projection, `fov_degrees` measured vertically
pub fn perspective(fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    Mat4::new_perspective(aspect, fov_degrees.to_radians(), near, far)
}

/// Right-handed view matrix looking from `eye` towards `target`
pub fn look_at(eye: &Point3, target: &Point3, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, up)
}

/// `clip * projection * view * model`, ready for a uniform buffer
pub fn model_view_projection(projection: &Mat4, view: &Mat4, model: &Mat4) -> Mat4 {
    clip_correction() * projection * view * model
}

/// Width over height, treating a zero height as square
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    fn project(point: Vector4<f32>) -> Vector4<f32> {
        let projection = perspective(60.0, 4.0 / 3.0, 0.1, 100.0);
        let clip = clip_correction() * projection * point;
        clip / clip.w
    }

    #[test]
    fn test_near_plane_maps_to_zero_depth() {
        let ndc = project(Vector4::new(0.0, 0.0, -0.1, 1.0));
        assert_relative_eq!(ndc.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_far_plane_maps_to_unit_depth() {
        let ndc = project(Vector4::new(0.0, 0.0, -100.0, 1.0));
        assert_relative_eq!(ndc.z, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_up_maps_to_negative_y() {
        let ndc = project(Vector4::new(0.0, 1.0, -5.0, 1.0));
        assert!(ndc.y < 0.0);
    }

    #[test]
    fn test_identity_view_and_model_leave_projection() {
        let projection = perspective(60.0, 1.0, 0.1, 100.0);
        let mvp = model_view_projection(&projection, &Mat4::identity(), &Mat4::identity());
        assert_relative_eq!(mvp, clip_correction() * projection);
    }

    #[test]
    fn test_aspect_ratio_handles_zero_height() {
        assert_relative_eq!(aspect_ratio(800, 600), 4.0 / 3.0);
        assert_relative_eq!(aspect_ratio(800, 0), 1.0);
    }
}
