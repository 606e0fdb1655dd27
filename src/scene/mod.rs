//! Scene management

mod camera;
mod camera_controller;
mod cascades;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use cascades::*;
pub use light::*;
pub use transform::*;

use glam::{Mat4, Vec3};

use crate::backend::{BufferHandle, DescriptorSetHandle};
use crate::resources::{MaterialId, MeshId};

/// A renderable object in the scene. Items missing a mesh or material are
/// kept but skipped when drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    pub mesh: Option<MeshId>,
    pub material: Option<MaterialId>,
    pub transform: Transform,
}

impl DrawItem {
    pub fn new(mesh: MeshId, material: MaterialId) -> Self {
        Self {
            mesh: Some(mesh),
            material: Some(material),
            transform: Transform::default(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.transform.scale = scale;
        self
    }
}

/// A draw resolved to GPU handles, ready for recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub material_set: DescriptorSetHandle,
    pub model: Mat4,
}

/// Model matrix pushed per draw (vertex stage, offset 0)
pub const MODEL_PUSH_SIZE: u32 = std::mem::size_of::<Mat4>() as u32;

/// The scene containing all renderable content
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub camera: Camera,
    pub directional_light: DirectionalLight,
    pub point_lights: Vec<PointLight>,
    pub items: Vec<DrawItem>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a point light to the scene
    pub fn add_point_light(&mut self, light: PointLight) {
        self.point_lights.push(light);
    }

    /// Add a draw item; returns its index
    pub fn add_item(&mut self, item: DrawItem) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    pub fn clear_items(&mut self) {
        self.items.clear();
    }
}
