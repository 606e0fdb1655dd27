//! Light types for the scene

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Default capacity of the point-light buffer
pub const DEFAULT_MAX_POINT_LIGHTS: usize = 256;

/// Point light with a finite range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            range,
        }
    }

    /// Convert to GPU data format
    pub fn to_gpu_data(&self) -> GpuPointLight {
        GpuPointLight {
            position: self.position,
            range: self.range,
            color: self.color,
            intensity: self.intensity,
        }
    }
}

/// Directional light (like the sun)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels, normalized
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.3, -1.0, 0.5).normalize(),
            color: Vec3::new(1.0, 0.95, 0.9),
            intensity: 2.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or_zero(),
            color,
            intensity,
        }
    }
}

/// GPU layout of one point light: 32 bytes, two 16-byte rows
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    pub position: Vec3,
    pub range: f32,
    pub color: Vec3,
    pub intensity: f32,
}

/// Point lights packed for upload
#[derive(Debug, Clone, Default)]
pub struct PackedLights {
    pub lights: Vec<GpuPointLight>,
    /// Lights beyond capacity that were left out
    pub dropped: usize,
}

/// Pack the first `capacity` lights; anything past that is dropped.
pub fn pack_point_lights(lights: &[PointLight], capacity: usize) -> PackedLights {
    let kept = lights.len().min(capacity);
    PackedLights {
        lights: lights[..kept].iter().map(PointLight::to_gpu_data).collect(),
        dropped: lights.len() - kept,
    }
}

/// Logs one warning per run of frames in which lights overflow the buffer
#[derive(Debug, Default)]
pub struct LightOverflowWarning {
    overflowing: bool,
}

impl LightOverflowWarning {
    /// Record this frame's packing result; returns true when a warning was logged.
    pub fn observe(&mut self, packed: &PackedLights, total: usize) -> bool {
        let overflowing = packed.dropped > 0;
        let warn = overflowing && !self.overflowing;
        if warn {
            log::warn!(
                "{} point lights exceed the light buffer capacity of {}; {} dropped",
                total,
                packed.lights.len(),
                packed.dropped
            );
        }
        self.overflowing = overflowing;
        warn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lights(n: usize) -> Vec<PointLight> {
        (0..n)
            .map(|i| PointLight::new(Vec3::splat(i as f32), Vec3::ONE, 1.0, 5.0))
            .collect()
    }

    #[test]
    fn test_gpu_point_light_is_32_bytes() {
        assert_eq!(std::mem::size_of::<GpuPointLight>(), 32);
        let gpu = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::X, 4.0, 9.0).to_gpu_data();
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&gpu));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 9.0, 1.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn test_packing_at_capacity_keeps_everything() {
        let packed = pack_point_lights(&lights(256), 256);
        assert_eq!(packed.lights.len(), 256);
        assert_eq!(packed.dropped, 0);
    }

    #[test]
    fn test_packing_over_capacity_keeps_first_lights() {
        let packed = pack_point_lights(&lights(300), 256);
        assert_eq!(packed.lights.len(), 256);
        assert_eq!(packed.dropped, 44);
        assert_eq!(packed.lights[255].position, Vec3::splat(255.0));
    }

    #[test]
    fn test_overflow_warns_once_per_episode() {
        let mut warning = LightOverflowWarning::default();
        let over = pack_point_lights(&lights(300), 256);
        let under = pack_point_lights(&lights(10), 256);

        assert!(warning.observe(&over, 300));
        assert!(!warning.observe(&over, 300));
        assert!(!warning.observe(&under, 10));
        assert!(warning.observe(&over, 300));
    }
}
