//! Descriptor pool, layout cache and write helpers.
//!
//! Layouts are cached by a canonical key built from each binding's
//! `(binding, type, count, stages)` tuple, so passes asking for the same
//! shape share one layout handle. Sets are handed out one per call and are
//! never recycled individually; they go away with the pool.

use std::collections::HashMap;

use crate::backend::{
    BackendError, BackendResult, BufferHandle, DescriptorBinding, DescriptorPoolDescriptor,
    DescriptorPoolHandle, DescriptorResource, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorType, GraphicsBackend, SamplerHandle, ShaderStageFlags, TextureLayout,
    TextureViewHandle,
};

/// Sets the pool can hand out before it is exhausted.
pub const DEFAULT_MAX_SETS: u32 = 1000;

/// Canonical cache key of a layout: sorted `(binding, type, count, stage bits)`.
type LayoutKey = Vec<(u32, DescriptorType, u32, u32)>;

fn layout_key(bindings: &[DescriptorBinding]) -> LayoutKey {
    let mut key: LayoutKey = bindings
        .iter()
        .map(|b| (b.binding, b.ty, b.count, b.stages.bits()))
        .collect();
    key.sort_unstable_by_key(|entry| entry.0);
    key
}

/// Pool + layout cache shared by every pass and material
#[derive(Debug)]
pub struct DescriptorManager {
    pool: Option<DescriptorPoolHandle>,
    layouts: HashMap<LayoutKey, DescriptorSetLayoutHandle>,
    allocated_sets: usize,
    max_sets: u32,
}

impl DescriptorManager {
    /// Create the pool, sized up front for `max_sets` sets.
    pub fn new(backend: &mut dyn GraphicsBackend, max_sets: u32) -> BackendResult<Self> {
        let pool = backend.create_descriptor_pool(&DescriptorPoolDescriptor {
            max_sets,
            pool_sizes: vec![
                (DescriptorType::UniformBuffer, max_sets * 4),
                (DescriptorType::CombinedImageSampler, max_sets * 8),
                (DescriptorType::StorageBuffer, max_sets * 2),
                (DescriptorType::StorageImage, max_sets * 2),
            ],
        })?;
        log::debug!("Descriptor pool created ({} sets)", max_sets);
        Ok(Self {
            pool: Some(pool),
            layouts: HashMap::new(),
            allocated_sets: 0,
            max_sets,
        })
    }

    /// Return the cached layout for this binding shape, creating it on first use.
    pub fn get_or_create_layout(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let key = layout_key(bindings);
        if let Some(layout) = self.layouts.get(&key) {
            return Ok(*layout);
        }
        let layout = backend.create_descriptor_set_layout(bindings)?;
        log::trace!(
            "Descriptor set layout created with {} bindings",
            bindings.len()
        );
        self.layouts.insert(key, layout);
        Ok(layout)
    }

    pub fn allocate(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let pool = self
            .pool
            .ok_or_else(|| BackendError::DescriptorFailed("descriptor pool destroyed".into()))?;
        if self.allocated_sets as u32 >= self.max_sets {
            return Err(BackendError::DescriptorFailed(format!(
                "descriptor pool exhausted ({} sets)",
                self.max_sets
            )));
        }
        let set = backend.allocate_descriptor_set(pool, layout)?;
        self.allocated_sets += 1;
        Ok(set)
    }

    /// Bind a whole buffer (`range` bytes from offset 0).
    pub fn write_buffer(
        &self,
        backend: &mut dyn GraphicsBackend,
        set: DescriptorSetHandle,
        binding: u32,
        buffer: BufferHandle,
        range: u64,
        ty: DescriptorType,
    ) -> BackendResult<()> {
        backend.write_descriptor(
            set,
            binding,
            &DescriptorResource::Buffer {
                buffer,
                offset: 0,
                range,
                ty,
            },
        )
    }

    /// Bind a combined image sampler read in `layout`.
    pub fn write_image(
        &self,
        backend: &mut dyn GraphicsBackend,
        set: DescriptorSetHandle,
        binding: u32,
        view: TextureViewHandle,
        sampler: SamplerHandle,
        layout: TextureLayout,
    ) -> BackendResult<()> {
        backend.write_descriptor(
            set,
            binding,
            &DescriptorResource::CombinedImageSampler {
                view,
                sampler,
                layout,
            },
        )
    }

    /// Bind a storage image in the general layout.
    pub fn write_storage_image(
        &self,
        backend: &mut dyn GraphicsBackend,
        set: DescriptorSetHandle,
        binding: u32,
        view: TextureViewHandle,
    ) -> BackendResult<()> {
        backend.write_descriptor(
            set,
            binding,
            &DescriptorResource::StorageImage {
                view,
                layout: TextureLayout::General,
            },
        )
    }

    pub fn cached_layouts(&self) -> usize {
        self.layouts.len()
    }

    pub fn allocated_sets(&self) -> usize {
        self.allocated_sets
    }

    /// Destroy cached layouts and the pool (which frees every set).
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, layout) in self.layouts.drain() {
            backend.destroy_descriptor_set_layout(layout);
        }
        if let Some(pool) = self.pool.take() {
            backend.destroy_descriptor_pool(pool);
        }
        self.allocated_sets = 0;
    }
}

/// Set 0: per-frame uniforms (binding 0) and point lights (binding 1)
pub fn global_bindings() -> Vec<DescriptorBinding> {
    vec![
        DescriptorBinding::new(
            0,
            DescriptorType::UniformBuffer,
            ShaderStageFlags::VERTEX_FRAGMENT,
        ),
        DescriptorBinding::new(1, DescriptorType::StorageBuffer, ShaderStageFlags::FRAGMENT),
    ]
}

/// Set 2: albedo, normal and metallic-roughness maps, then material params
pub fn material_bindings() -> Vec<DescriptorBinding> {
    let mut bindings: Vec<DescriptorBinding> = (0..3)
        .map(|binding| {
            DescriptorBinding::new(
                binding,
                DescriptorType::CombinedImageSampler,
                ShaderStageFlags::FRAGMENT,
            )
        })
        .collect();
    bindings.push(DescriptorBinding::new(
        3,
        DescriptorType::UniformBuffer,
        ShaderStageFlags::FRAGMENT,
    ));
    bindings
}

/// Set layouts every pipeline layout is assembled from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedSetLayouts {
    pub global: DescriptorSetLayoutHandle,
    pub material: DescriptorSetLayoutHandle,
    /// Placeholder for set 1 in passes that sample nothing
    pub empty: DescriptorSetLayoutHandle,
}

impl SharedSetLayouts {
    /// Layouts are owned by the manager's cache and go away with it.
    pub fn create(
        descriptors: &mut DescriptorManager,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<Self> {
        Ok(Self {
            global: descriptors.get_or_create_layout(backend, &global_bindings())?,
            material: descriptors.get_or_create_layout(backend, &material_bindings())?,
            empty: descriptors.get_or_create_layout(backend, &[])?,
        })
    }

    /// `[global, inputs, material]`, the set order shared by every pass
    pub fn pipeline_sets(&self, inputs: DescriptorSetLayoutHandle) -> [DescriptorSetLayoutHandle; 3] {
        [self.global, inputs, self.material]
    }
}
