//! Resource management
//!
//! Meshes, textures and materials live in an [`AssetStore`] and are named
//! by small copyable ids. Draw items reference assets by id; the store
//! turns them into [`DrawCall`]s for recording.

mod material;
mod mesh;
mod texture;

pub use material::*;
pub use mesh::*;
pub use texture::*;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::descriptor::DescriptorManager;
use crate::scene::{DrawCall, DrawItem};

/// Index of a mesh in an [`AssetStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Index of a material in an [`AssetStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

/// Index of a texture in an [`AssetStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Owns every uploaded mesh, texture and material
#[derive(Debug)]
pub struct AssetStore {
    meshes: Vec<GpuMesh>,
    textures: Vec<GpuTexture>,
    materials: Vec<GpuMaterial>,
    sampler: SamplerHandle,
    white: TextureId,
    flat_normal: TextureId,
}

impl AssetStore {
    /// Create the shared material sampler and the fallback textures.
    pub fn new(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        let anisotropy = backend.capabilities().max_sampler_anisotropy;
        let sampler = backend.create_sampler(&SamplerDescriptor::material(anisotropy))?;
        let mut store = Self {
            meshes: Vec::new(),
            textures: Vec::new(),
            materials: Vec::new(),
            sampler,
            white: TextureId(0),
            flat_normal: TextureId(0),
        };
        store.white = store.add_texture(backend, &TextureData::white())?;
        store.flat_normal = store.add_texture(backend, &TextureData::flat_normal())?;
        Ok(store)
    }

    pub fn add_mesh(&mut self, backend: &mut dyn GraphicsBackend, mesh: &MeshData) -> BackendResult<MeshId> {
        let gpu = GpuMesh::upload(backend, mesh)?;
        self.meshes.push(gpu);
        Ok(MeshId(self.meshes.len() as u32 - 1))
    }

    pub fn add_texture(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        texture: &TextureData,
    ) -> BackendResult<TextureId> {
        let gpu = GpuTexture::upload(backend, texture)?;
        self.textures.push(gpu);
        Ok(TextureId(self.textures.len() as u32 - 1))
    }

    /// Upload the parameter block and write the material's set:
    /// bindings 0-2 albedo, normal, metallic-roughness; binding 3 parameters.
    pub fn create_material(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        descriptors: &mut DescriptorManager,
        layout: DescriptorSetLayoutHandle,
        material: &Material,
    ) -> BackendResult<MaterialId> {
        let views = [
            material.albedo_texture.unwrap_or(self.white),
            material.normal_texture.unwrap_or(self.flat_normal),
            material.metallic_roughness_texture.unwrap_or(self.white),
        ]
        .map(|id| self.texture(id).map(|t| t.view));
        let views = views.into_iter().collect::<BackendResult<Vec<_>>>()?;

        let params = bytemuck::bytes_of(&material.params);
        let params_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{}_params", material.name)),
                size: params.len() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                location: MemoryLocation::GpuOnly,
            },
            params,
        )?;

        let written = descriptors.allocate(backend, layout).and_then(|set| {
            for (binding, view) in views.iter().enumerate() {
                descriptors.write_image(
                    backend,
                    set,
                    binding as u32,
                    *view,
                    self.sampler,
                    TextureLayout::ShaderReadOnly,
                )?;
            }
            descriptors.write_buffer(
                backend,
                set,
                3,
                params_buffer,
                params.len() as u64,
                DescriptorType::UniformBuffer,
            )?;
            Ok(set)
        });
        let set = match written {
            Ok(set) => set,
            Err(e) => {
                backend.destroy_buffer(params_buffer);
                return Err(e);
            }
        };

        self.materials.push(GpuMaterial { set, params_buffer });
        log::debug!("Created material '{}'", material.name);
        Ok(MaterialId(self.materials.len() as u32 - 1))
    }

    pub fn mesh(&self, id: MeshId) -> Option<&GpuMesh> {
        self.meshes.get(id.0 as usize)
    }

    pub fn material(&self, id: MaterialId) -> Option<&GpuMaterial> {
        self.materials.get(id.0 as usize)
    }

    pub fn texture(&self, id: TextureId) -> BackendResult<&GpuTexture> {
        self.textures
            .get(id.0 as usize)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {:?}", id)))
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Draw calls for every item with a known mesh and material, in order.
    /// Anything else is skipped.
    pub fn resolve_draws(&self, items: &[DrawItem]) -> Vec<DrawCall> {
        items
            .iter()
            .filter_map(|item| {
                let mesh = self.mesh(item.mesh?)?;
                let material = self.material(item.material?)?;
                Some(DrawCall {
                    vertex_buffer: mesh.vertex_buffer,
                    index_buffer: mesh.index_buffer,
                    index_count: mesh.index_count,
                    material_set: material.set,
                    model: item.transform.matrix(),
                })
            })
            .collect()
    }

    /// Free every asset. Material sets go with the descriptor pool.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for mesh in self.meshes.drain(..) {
            mesh.destroy(backend);
        }
        for material in self.materials.drain(..) {
            material.destroy(backend);
        }
        for texture in self.textures.drain(..) {
            texture.destroy(backend);
        }
        backend.destroy_sampler(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::descriptor::{material_bindings, DEFAULT_MAX_SETS};
    use glam::Vec3;

    struct Fixture {
        backend: DummyBackend,
        descriptors: DescriptorManager,
        layout: DescriptorSetLayoutHandle,
        store: AssetStore,
    }

    fn fixture() -> Fixture {
        let mut backend = DummyBackend::new();
        let mut descriptors = DescriptorManager::new(&mut backend, DEFAULT_MAX_SETS).unwrap();
        let layout = descriptors
            .get_or_create_layout(&mut backend, &material_bindings())
            .unwrap();
        let store = AssetStore::new(&mut backend).unwrap();
        Fixture {
            backend,
            descriptors,
            layout,
            store,
        }
    }

    #[test]
    fn test_material_falls_back_to_default_textures() {
        let mut f = fixture();
        let id = f
            .store
            .create_material(&mut f.backend, &mut f.descriptors, f.layout, &Material::gold())
            .unwrap();
        let material = *f.store.material(id).unwrap();
        let writes = f.backend.descriptor_writes(material.set);
        assert_eq!(writes.len(), 4);

        let white = f.store.texture(f.store.white).unwrap().view;
        let flat = f.store.texture(f.store.flat_normal).unwrap().view;
        let view_at = |binding: u32| {
            writes.iter().find_map(|(b, r)| match r {
                DescriptorResource::CombinedImageSampler { view, .. } if *b == binding => Some(*view),
                _ => None,
            })
        };
        assert_eq!(view_at(0), Some(white));
        assert_eq!(view_at(1), Some(flat));
        assert_eq!(view_at(2), Some(white));

        let params: MaterialParams =
            bytemuck::pod_read_unaligned(f.backend.buffer_contents(material.params_buffer).unwrap());
        assert_eq!(params.metallic, 1.0);
    }

    #[test]
    fn test_unknown_texture_is_an_error() {
        let mut f = fixture();
        let material = Material::new("broken").with_albedo_texture(TextureId(99));
        let before = f.backend.live_resources().buffers;
        assert!(f
            .store
            .create_material(&mut f.backend, &mut f.descriptors, f.layout, &material)
            .is_err());
        assert_eq!(f.backend.live_resources().buffers, before);
    }

    #[test]
    fn test_resolve_skips_incomplete_items() {
        let mut f = fixture();
        let cube = f.store.add_mesh(&mut f.backend, &MeshData::cube()).unwrap();
        let plane = f
            .store
            .add_mesh(&mut f.backend, &MeshData::plane(1.0, 1.0, 1))
            .unwrap();
        let red = f
            .store
            .create_material(
                &mut f.backend,
                &mut f.descriptors,
                f.layout,
                &Material::plastic(Vec3::X),
            )
            .unwrap();

        let items = [
            DrawItem::new(cube, red).with_position(Vec3::X),
            DrawItem {
                mesh: None,
                ..DrawItem::new(cube, red)
            },
            DrawItem::new(plane, MaterialId(42)),
            DrawItem::new(plane, red).with_position(Vec3::Y),
        ];
        let draws = f.store.resolve_draws(&items);
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].index_count, 36);
        assert_eq!(draws[0].model.w_axis.truncate(), Vec3::X);
        assert_eq!(draws[1].index_count, 6);
        assert_eq!(draws[1].model.w_axis.truncate(), Vec3::Y);
    }

    #[test]
    fn test_destroy_frees_everything() {
        let mut f = fixture();
        f.store.add_mesh(&mut f.backend, &MeshData::cube()).unwrap();
        f.store
            .create_material(&mut f.backend, &mut f.descriptors, f.layout, &Material::default())
            .unwrap();
        f.store.destroy(&mut f.backend);
        f.descriptors.destroy(&mut f.backend);
        let live = f.backend.live_resources();
        assert_eq!((live.buffers, live.textures, live.samplers), (0, 0, 0));
        assert_eq!(live.texture_views, 0);
    }
}
