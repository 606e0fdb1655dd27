//! Descriptor pools, set layouts and set writes

use ash::vk;

use super::{convert, map_vk, VkDescriptorSet, VulkanBackend};
use crate::backend::traits::*;
use crate::backend::types::*;

impl VulkanBackend {
    pub(super) fn make_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle> {
        let sizes: Vec<vk::DescriptorPoolSize> = desc
            .pool_sizes
            .iter()
            .map(|&(ty, count)| vk::DescriptorPoolSize {
                ty: convert::descriptor_type(ty),
                descriptor_count: count,
            })
            .collect();
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(desc.max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { self.ctx.device.create_descriptor_pool(&info, None) }
            .map_err(map_vk(BackendError::DescriptorFailed))?;
        Ok(DescriptorPoolHandle(self.res.pools.insert(pool)))
    }

    pub(super) fn release_descriptor_pool(&mut self, handle: DescriptorPoolHandle) {
        let Some(pool) = self.res.pools.remove(handle.0) else {
            return;
        };
        self.res.sets.retain(|set| set.pool != handle.0);
        unsafe { self.ctx.device.destroy_descriptor_pool(pool, None) };
    }

    pub(super) fn make_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(convert::descriptor_type(b.ty))
                    .descriptor_count(b.count)
                    .stage_flags(convert::shader_stages(b.stages))
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.ctx.device.create_descriptor_set_layout(&info, None) }
            .map_err(map_vk(BackendError::DescriptorFailed))?;
        Ok(DescriptorSetLayoutHandle(self.res.set_layouts.insert(layout)))
    }

    pub(super) fn allocate_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let vk_pool = *self.res.pools.lookup(pool.0, "descriptor pool")?;
        let layouts = [*self.res.set_layouts.lookup(layout.0, "descriptor set layout")?];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vk_pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.ctx.device.allocate_descriptor_sets(&info) }.map_err(|e| match e {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                BackendError::DescriptorFailed(format!("pool {:?} exhausted", pool))
            }
            other => map_vk(BackendError::DescriptorFailed)(other),
        })?;
        let set = sets
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::DescriptorFailed("no set returned".into()))?;
        let id = self.res.sets.insert(VkDescriptorSet { set, pool: pool.0 });
        Ok(DescriptorSetHandle(id))
    }

    pub(super) fn update_set(
        &mut self,
        set: DescriptorSetHandle,
        binding: u32,
        resource: &DescriptorResource,
    ) -> BackendResult<()> {
        let dst = self.res.sets.lookup(set.0, "descriptor set")?.set;
        let write = vk::WriteDescriptorSet::default()
            .dst_set(dst)
            .dst_binding(binding)
            .dst_array_element(0);

        match *resource {
            DescriptorResource::Buffer {
                buffer,
                offset,
                range,
                ty,
            } => {
                let vk_buffer = self.res.buffers.lookup(buffer.0, "buffer")?.buffer;
                let infos = [vk::DescriptorBufferInfo {
                    buffer: vk_buffer,
                    offset,
                    range,
                }];
                let writes = [write
                    .descriptor_type(convert::descriptor_type(ty))
                    .buffer_info(&infos)];
                unsafe { self.ctx.device.update_descriptor_sets(&writes, &[]) };
            }
            DescriptorResource::CombinedImageSampler {
                view,
                sampler,
                layout,
            } => {
                let infos = [vk::DescriptorImageInfo {
                    sampler: *self.res.samplers.lookup(sampler.0, "sampler")?,
                    image_view: *self.res.views.lookup(view.0, "texture view")?,
                    image_layout: convert::image_layout(layout),
                }];
                let writes = [write
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&infos)];
                unsafe { self.ctx.device.update_descriptor_sets(&writes, &[]) };
            }
            DescriptorResource::StorageImage { view, layout } => {
                let infos = [vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: *self.res.views.lookup(view.0, "texture view")?,
                    image_layout: convert::image_layout(layout),
                }];
                let writes = [write
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(&infos)];
                unsafe { self.ctx.device.update_descriptor_sets(&writes, &[]) };
            }
        }
        Ok(())
    }
}
