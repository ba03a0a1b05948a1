//! Camera component defining the viewpoint of a frame.

use glam::{Mat4, Vec3};

use super::Transform;

/// Projection mode for cameras.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraProjection {
    Perspective {
        /// Vertical field of view in radians.
        fov_y: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        /// Half-height of the view in world units.
        scale: f32,
        near: f32,
        far: f32,
    },
}

impl Default for CameraProjection {
    fn default() -> Self {
        Self::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl CameraProjection {
    /// Creates a perspective projection with the given FOV in degrees.
    #[inline]
    pub fn perspective(fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            near,
            far,
        }
    }

    #[inline]
    pub fn orthographic(scale: f32, near: f32, far: f32) -> Self {
        Self::Orthographic { scale, near, far }
    }

    /// Computes the projection matrix for the given aspect ratio.
    pub fn compute_matrix(&self, aspect_ratio: f32) -> Mat4 {
        match *self {
            Self::Perspective { fov_y, near, far } => {
                Mat4::perspective_rh(fov_y, aspect_ratio, near, far)
            }
            Self::Orthographic { scale, near, far } => {
                let half_width = scale * aspect_ratio;
                Mat4::orthographic_rh(-half_width, half_width, -scale, scale, near, far)
            }
        }
    }
}

/// Main camera component.
///
/// Only the active camera with the highest `order` renders a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub projection: CameraProjection,
    pub order: i32,
    pub is_active: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: CameraProjection::default(),
            order: 0,
            is_active: true,
        }
    }
}

impl Camera {
    pub fn perspective(fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            projection: CameraProjection::perspective(fov_y_degrees, near, far),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Computes the world-to-view matrix for a camera placed at `transform`.
    pub fn view_matrix(transform: &Transform) -> Mat4 {
        let eye = transform.translation;
        Mat4::look_at_rh(eye, eye + transform.forward(), transform.rotation * Vec3::Y)
    }

    /// Computes the combined view-projection matrix.
    pub fn view_projection(&self, transform: &Transform, aspect_ratio: f32) -> Mat4 {
        self.projection.compute_matrix(aspect_ratio) * Self::view_matrix(transform)
    }
}
