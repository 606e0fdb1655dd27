//! Material definitions for PBR rendering
//!
//! A material is immutable once created: its parameter block is uploaded
//! once and its descriptor set (set 2) never changes.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use super::TextureId;
use crate::backend::traits::*;
use crate::backend::types::*;

/// Parameter block at binding 3 of the material set
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialParams {
    pub albedo_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub normal_scale: f32,
    pub _pad: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            albedo_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            normal_scale: 1.0,
            _pad: 0.0,
        }
    }
}

/// PBR material description. Missing textures fall back to 1x1 defaults:
/// white for albedo and metallic-roughness, flat for normals.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub params: MaterialParams,
    pub albedo_texture: Option<TextureId>,
    pub normal_texture: Option<TextureId>,
    pub metallic_roughness_texture: Option<TextureId>,
}

impl Default for Material {
    fn default() -> Self {
        Self::new("default")
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: MaterialParams::default(),
            albedo_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
        }
    }

    pub fn with_albedo(mut self, color: Vec3) -> Self {
        self.params.albedo_color = color.extend(1.0);
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.params.metallic = metallic.clamp(0.0, 1.0);
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.params.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn with_normal_scale(mut self, scale: f32) -> Self {
        self.params.normal_scale = scale;
        self
    }

    pub fn with_albedo_texture(mut self, texture: TextureId) -> Self {
        self.albedo_texture = Some(texture);
        self
    }

    pub fn with_normal_texture(mut self, texture: TextureId) -> Self {
        self.normal_texture = Some(texture);
        self
    }

    pub fn with_metallic_roughness_texture(mut self, texture: TextureId) -> Self {
        self.metallic_roughness_texture = Some(texture);
        self
    }

    // Presets

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic").with_albedo(color).with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_albedo(color)
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn gold() -> Self {
        Self::metal(Vec3::new(1.0, 0.766, 0.336), 0.3)
    }

    pub fn silver() -> Self {
        Self::metal(Vec3::new(0.972, 0.960, 0.915), 0.2)
    }

    pub fn rubber(color: Vec3) -> Self {
        Self::new("rubber").with_albedo(color).with_roughness(0.9)
    }
}

/// Material resident on the device: its parameter buffer and set 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMaterial {
    pub set: DescriptorSetHandle,
    pub params_buffer: BufferHandle,
}

impl GpuMaterial {
    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.params_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = MaterialParams::default();
        assert_eq!(params.metallic, 0.0);
        assert_eq!(params.roughness, 0.5);
        assert_eq!(params.normal_scale, 1.0);
        assert_eq!(std::mem::size_of::<MaterialParams>(), 32);
    }

    #[test]
    fn test_presets_clamp() {
        let gold = Material::gold();
        assert_eq!(gold.params.metallic, 1.0);
        let rough = Material::plastic(Vec3::X).with_roughness(3.0);
        assert_eq!(rough.params.roughness, 1.0);
        assert_eq!(rough.params.albedo_color, Vec4::new(1.0, 0.0, 0.0, 1.0));
    }
}
