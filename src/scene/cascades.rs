//! Cascaded shadow map fitting
//!
//! The view frustum is split into up to [`MAX_CASCADES`] depth ranges by
//! blending logarithmic and uniform splits. Each range gets an orthographic,
//! reversed-Z light projection fitted to the bounding sphere of its frustum
//! slice, snapped to whole shadow-map texels so the map does not shimmer as
//! the camera moves.

use glam::{Mat4, Vec3, Vec4};

use super::{Camera, DirectionalLight};

pub const MAX_CASCADES: usize = 3;

/// Light-space matrices and split depths for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeSet {
    pub view_proj: [Mat4; MAX_CASCADES],
    /// Far view distance of each cascade; unused entries are zero
    pub splits: [f32; MAX_CASCADES],
    pub count: u32,
}

impl Default for CascadeSet {
    fn default() -> Self {
        Self {
            view_proj: [Mat4::IDENTITY; MAX_CASCADES],
            splits: [0.0; MAX_CASCADES],
            count: 0,
        }
    }
}

impl CascadeSet {
    /// Split distances packed for the uniform block
    pub fn splits_vec4(&self) -> Vec4 {
        Vec4::new(self.splits[0], self.splits[1], self.splits[2], 0.0)
    }
}

/// Far distance of each cascade, from the practical split scheme:
/// `lambda * log + (1 - lambda) * uniform`.
pub fn split_distances(near: f32, far: f32, count: usize, lambda: f32) -> Vec<f32> {
    let count = count.clamp(1, MAX_CASCADES);
    let lambda = lambda.clamp(0.0, 1.0);
    let ratio = far / near;
    (1..=count)
        .map(|i| {
            let p = i as f32 / count as f32;
            let log = near * ratio.powf(p);
            let uniform = near + (far - near) * p;
            lambda * log + (1.0 - lambda) * uniform
        })
        .collect()
}

/// Fit one light projection per cascade.
///
/// `max_distance` caps how far shadows reach; the camera's far plane is
/// used when it is closer.
pub fn compute_cascades(
    camera: &Camera,
    light: &DirectionalLight,
    count: usize,
    lambda: f32,
    max_distance: f32,
    shadow_map_size: u32,
) -> CascadeSet {
    let near = camera.projection.near();
    let far = camera.projection.far().min(max_distance).max(near + 1e-3);
    let splits = split_distances(near, far, count, lambda);

    let light_dir = light.direction.normalize_or_zero();
    let light_dir = if light_dir == Vec3::ZERO {
        Vec3::NEG_Y
    } else {
        light_dir
    };
    let up = if light_dir.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };

    let mut set = CascadeSet {
        count: splits.len() as u32,
        ..Default::default()
    };
    let mut slice_near = near;
    for (i, &slice_far) in splits.iter().enumerate() {
        let corners = camera.frustum_slice_corners(slice_near, slice_far);
        let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
        let radius = corners
            .iter()
            .map(|c| c.distance(center))
            .fold(0.0f32, f32::max);
        // Quantize so the projection size stays fixed while the camera turns
        let radius = ((radius * 16.0).ceil() / 16.0).max(1e-3);

        let eye = center - light_dir * radius * 2.0;
        let view = Mat4::look_at_rh(eye, center, up);
        let proj = Mat4::orthographic_rh(-radius, radius, -radius, radius, radius * 4.0, 0.01);

        set.view_proj[i] = snap_to_texels(proj * view, shadow_map_size);
        set.splits[i] = slice_far;
        slice_near = slice_far;
    }
    set
}

/// Shift a light projection so world origin lands on a texel boundary.
fn snap_to_texels(view_proj: Mat4, shadow_map_size: u32) -> Mat4 {
    let half_size = shadow_map_size.max(1) as f32 * 0.5;
    let origin = view_proj * Vec4::W;
    let texel = origin.truncate().truncate() * half_size;
    let offset = (texel.round() - texel) / half_size;
    Mat4::from_translation(Vec3::new(offset.x, offset.y, 0.0)) * view_proj
}
