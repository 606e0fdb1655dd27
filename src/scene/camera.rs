//! Camera system
//!
//! Projections are reversed-Z: the near plane maps to depth 1 and the far
//! plane to depth 0, so depth tests use `GreaterEqual` and depth clears to 0.

use glam::{Mat4, Vec2, Vec3};

use crate::backend::Extent2D;

/// Camera projection type
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
            fov_y: 60f32.to_radians(),
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

    /// Reversed-Z projection matrix (near and far swapped).
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, far, near),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, far, near),
        }
    }

    pub fn near(&self) -> f32 {
        match self {
            Projection::Perspective { near, .. } => *near,
            Projection::Orthographic { near, .. } => *near,
        }
    }

    pub fn far(&self) -> f32 {
        match self {
            Projection::Perspective { far, .. } => *far,
            Projection::Orthographic { far, .. } => *far,
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = self {
            *a = aspect;
        }
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 3.0, 8.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// Projection shifted by a sub-pixel offset given in NDC units
    pub fn jittered_projection_matrix(&self, jitter_ndc: Vec2) -> Mat4 {
        Mat4::from_translation(Vec3::new(jitter_ndc.x, jitter_ndc.y, 0.0)) * self.projection_matrix()
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get the forward direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Get the right direction
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize_or_zero()
    }

    /// Update aspect ratio for perspective projection
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.projection.set_aspect(width / height);
        }
    }

    /// World-space corners of the view volume between two view distances,
    /// near quad first (counter-clockwise from bottom-left), then far quad.
    pub fn frustum_slice_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let forward = self.forward();
        let right = self.right();
        let up = right.cross(forward);

        let half_extents = |distance: f32| -> Vec2 {
            match self.projection {
                Projection::Perspective { fov_y, aspect, .. } => {
                    let half_h = distance * (fov_y * 0.5).tan();
                    Vec2::new(half_h * aspect, half_h)
                }
                Projection::Orthographic {
                    left,
                    right,
                    bottom,
                    top,
                    ..
                } => Vec2::new((right - left) * 0.5, (top - bottom) * 0.5),
            }
        };

        let mut corners = [Vec3::ZERO; 8];
        for (quad, distance) in [near, far].into_iter().enumerate() {
            let center = self.position + forward * distance;
            let half = half_extents(distance);
            let offsets = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (i, (sx, sy)) in offsets.into_iter().enumerate() {
                corners[quad * 4 + i] = center + right * (sx * half.x) + up * (sy * half.y);
            }
        }
        corners
    }
}

/// Number of samples in the jitter sequence before it repeats
pub const JITTER_SAMPLES: u64 = 8;

/// Radical inverse of `index` in `base`
pub fn halton(mut index: u64, base: u64) -> f32 {
    let mut result = 0.0;
    let mut fraction = 1.0 / base as f32;
    while index > 0 {
        result += (index % base) as f32 * fraction;
        index /= base;
        fraction /= base as f32;
    }
    result
}

/// Sub-pixel jitter for a frame in NDC units, from the Halton(2, 3)
/// sequence. Each component lies within half a pixel of the center.
pub fn jitter_offset(frame_index: u64, extent: Extent2D) -> Vec2 {
    if extent.is_zero_area() {
        return Vec2::ZERO;
    }
    // Halton index 0 is (0, 0); start at 1 so every sample is off-center
    let index = frame_index % JITTER_SAMPLES + 1;
    let sample = Vec2::new(halton(index, 2), halton(index, 3)) - Vec2::splat(0.5);
    Vec2::new(
        sample.x * 2.0 / extent.width as f32,
        sample.y * 2.0 / extent.height as f32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_reversed_z_maps_near_to_one_and_far_to_zero() {
        let camera = Camera::default();
        let proj = camera.projection_matrix();
        let near = proj * Vec4::new(0.0, 0.0, -camera.projection.near(), 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -camera.projection.far(), 1.0);
        assert!((near.z / near.w - 1.0).abs() < 1e-5);
        assert!((far.z / far.w).abs() < 1e-5);
    }

    #[test]
    fn test_reversed_ortho() {
        let proj = Projection::orthographic(10.0, 10.0, 1.0, 11.0).matrix();
        let near = proj * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -11.0, 1.0);
        assert!((near.z - 1.0).abs() < 1e-5);
        assert!(far.z.abs() < 1e-5);
    }

    #[test]
    fn test_halton_sequence() {
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(2, 2), 0.25);
        assert_eq!(halton(3, 2), 0.75);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-6);
        assert!((halton(2, 3) - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_jitter_stays_within_half_a_pixel_and_repeats() {
        let extent = Extent2D::new(1600, 900);
        for frame in 0..JITTER_SAMPLES {
            let j = jitter_offset(frame, extent);
            assert!(j.x.abs() <= 1.0 / 1600.0 + 1e-7);
            assert!(j.y.abs() <= 1.0 / 900.0 + 1e-7);
            assert_eq!(j, jitter_offset(frame + JITTER_SAMPLES, extent));
        }
        assert_ne!(jitter_offset(0, extent), jitter_offset(1, extent));
        assert_eq!(jitter_offset(3, Extent2D::new(0, 10)), Vec2::ZERO);
    }

    #[test]
    fn test_jitter_only_translates_clip_xy() {
        let camera = Camera::default();
        let j = Vec2::new(0.001, -0.002);
        let p = Vec4::new(0.3, 0.2, -5.0, 1.0);
        let a = camera.projection_matrix() * p;
        let b = camera.jittered_projection_matrix(j) * p;
        assert!(((b.x / b.w) - (a.x / a.w) - j.x).abs() < 1e-5);
        assert!(((b.y / b.w) - (a.y / a.w) - j.y).abs() < 1e-5);
        assert!((b.z - a.z).abs() < 1e-6);
    }

    #[test]
    fn test_frustum_slice_corners() {
        let camera = Camera::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        let corners = camera.frustum_slice_corners(1.0, 10.0);
        for c in &corners[..4] {
            assert!((c.z + 1.0).abs() < 1e-5);
        }
        for c in &corners[4..] {
            assert!((c.z + 10.0).abs() < 1e-5);
        }
        assert!(corners[5].x > corners[4].x);
    }
}
