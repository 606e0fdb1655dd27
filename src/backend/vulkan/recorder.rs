//! Command recording into a Vulkan command buffer

use ash::vk;

use super::{convert, Resources};
use crate::backend::traits::*;
use crate::backend::types::*;

/// Records into one open command buffer, resolving handles through the
/// backend's resource tables. Unknown handles are logged and skipped.
pub(super) struct Recorder<'a> {
    device: &'a ash::Device,
    res: &'a Resources,
    cmd: vk::CommandBuffer,
}

impl<'a> Recorder<'a> {
    pub fn new(device: &'a ash::Device, res: &'a Resources, cmd: vk::CommandBuffer) -> Self {
        Self { device, res, cmd }
    }

    /// A null view leaves the attachment unused instead of breaking the
    /// begin/end pairing.
    fn view(&self, view: TextureViewHandle) -> vk::ImageView {
        match self.res.views.get(view.0) {
            Some(&view) => view,
            None => {
                log::error!("Unknown texture view {:?} in rendering info", view);
                vk::ImageView::null()
            }
        }
    }

    fn attachment(&self, attachment: &RenderingAttachment) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view(attachment.view))
            .image_layout(convert::image_layout(attachment.layout))
            .load_op(convert::load_op(attachment.load_op))
            .store_op(convert::store_op(attachment.store_op))
            .clear_value(convert::clear_value(attachment.load_op))
    }
}

impl CommandRecorder for Recorder<'_> {
    fn cmd_image_barrier(&mut self, barrier: &ImageBarrier) {
        let Some(texture) = self.res.textures.get(barrier.texture.0) else {
            log::error!("Barrier on unknown texture {:?}", barrier.texture);
            return;
        };
        let (dst_stage, dst_access) = convert::layout_sync(barrier.new_layout);
        // Discarding transitions chain off the destination stage so they
        // also wait for an acquire semaphore waited on at that stage.
        let (src_stage, src_access) = match barrier.old_layout {
            TextureLayout::Undefined => (dst_stage, vk::AccessFlags2::NONE),
            old => convert::layout_sync(old),
        };

        let image_barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(convert::image_layout(barrier.old_layout))
            .new_layout(convert::image_layout(barrier.new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(texture.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: convert::aspect(barrier.aspect),
                base_mip_level: barrier.base_mip_level,
                level_count: barrier.mip_level_count,
                base_array_layer: barrier.base_array_layer,
                layer_count: barrier.array_layer_count,
            });
        let barriers = [image_barrier];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dependency) };
    }

    fn cmd_begin_rendering(&mut self, info: &RenderingInfo) {
        let colors: Vec<_> = info
            .color_attachments
            .iter()
            .map(|a| self.attachment(a))
            .collect();
        let depth = info.depth_attachment.as_ref().map(|a| self.attachment(a));

        let mut rendering = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: convert::extent(info.extent),
            })
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            rendering = rendering.depth_attachment(depth);
        }
        unsafe { self.device.cmd_begin_rendering(self.cmd, &rendering) };
    }

    fn cmd_end_rendering(&mut self) {
        unsafe { self.device.cmd_end_rendering(self.cmd) };
    }

    fn cmd_set_viewport(&mut self, viewport: &Viewport) {
        let viewports = [vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        }];
        unsafe { self.device.cmd_set_viewport(self.cmd, 0, &viewports) };
    }

    fn cmd_set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x, y },
            extent: vk::Extent2D { width, height },
        }];
        unsafe { self.device.cmd_set_scissor(self.cmd, 0, &scissors) };
    }

    fn cmd_bind_pipeline(&mut self, pipeline: PipelineHandle) {
        let Some(&pipeline) = self.res.pipelines.get(pipeline.0) else {
            log::error!("Bind of unknown pipeline {:?}", pipeline);
            return;
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        let (Some(&layout), Some(set)) = (
            self.res.pipeline_layouts.get(layout.0),
            self.res.sets.get(set.0),
        ) else {
            log::error!("Bind of unknown descriptor set {:?} at index {}", set, set_index);
            return;
        };
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set.set],
                &[],
            )
        };
    }

    fn cmd_push_constants(
        &mut self,
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        let Some(&layout) = self.res.pipeline_layouts.get(layout.0) else {
            log::error!("Push constants on unknown layout {:?}", layout);
            return;
        };
        unsafe {
            self.device.cmd_push_constants(
                self.cmd,
                layout,
                convert::shader_stages(stages),
                offset,
                data,
            )
        };
    }

    fn cmd_bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        let Some(buffer) = self.res.buffers.get(buffer.0) else {
            log::error!("Bind of unknown vertex buffer {:?}", buffer);
            return;
        };
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, 0, &[buffer.buffer], &[offset])
        };
    }

    fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        let Some(buffer) = self.res.buffers.get(buffer.0) else {
            log::error!("Bind of unknown index buffer {:?}", buffer);
            return;
        };
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.cmd, buffer.buffer, offset, vk::IndexType::UINT32)
        };
    }

    fn cmd_draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                vertices.len() as u32,
                instances.len() as u32,
                vertices.start,
                instances.start,
            )
        };
    }

    fn cmd_draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.cmd,
                indices.len() as u32,
                instances.len() as u32,
                indices.start,
                base_vertex,
                instances.start,
            )
        };
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        buffer: BufferHandle,
        texture: TextureHandle,
        region: &TextureCopyRegion,
    ) {
        let (Some(buffer), Some(texture)) = (
            self.res.buffers.get(buffer.0),
            self.res.textures.get(texture.0),
        ) else {
            log::error!("Copy between unknown {:?} and {:?}", buffer, texture);
            return;
        };
        let copy = vk::BufferImageCopy::default()
            .buffer_offset(region.buffer_offset)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: convert::view_aspect(texture.format),
                mip_level: region.mip_level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: region.width,
                height: region.height,
                depth: 1,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.cmd,
                buffer.buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            )
        };
    }

    fn cmd_copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) {
        let (Some(src_buffer), Some(dst_buffer)) =
            (self.res.buffers.get(src.0), self.res.buffers.get(dst.0))
        else {
            log::error!("Copy between unknown buffers {:?} and {:?}", src, dst);
            return;
        };
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(self.cmd, src_buffer.buffer, dst_buffer.buffer, &[region])
        };
    }
}
