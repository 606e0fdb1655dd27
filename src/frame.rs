//! Per-frame data: the global uniform block, parameters handed to passes,
//! and the resources owned by each frame slot.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};

use crate::backend::*;
use crate::descriptor::{DescriptorManager, SharedSetLayouts};
use crate::pipeline::DebugView;
use crate::scene::{jitter_offset, CascadeSet, GpuPointLight, Scene, MAX_CASCADES};

/// Uniform block bound at set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUniforms {
    pub view: Mat4,
    /// Jittered when TAA is active
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub unjittered_view_proj: Mat4,
    /// Last frame's unjittered view-projection
    pub prev_view_proj: Mat4,
    pub cascade_view_proj: [Mat4; MAX_CASCADES],
    /// xyz position, w unused
    pub camera_position: Vec4,
    /// Direction the light travels
    pub dir_light_direction: Vec4,
    /// rgb color, w intensity
    pub dir_light_color: Vec4,
    pub cascade_splits: Vec4,
    /// xy this frame's jitter, zw last frame's (NDC units)
    pub jitter: Vec4,
    /// xy size in pixels, zw reciprocal
    pub extent: Vec4,
    pub point_light_count: u32,
    pub cascade_count: u32,
    pub frame_index: u32,
    pub time: f32,
}

/// What the motion pass needs to remember about the previous frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousFrame {
    pub view_proj: Mat4,
    pub jitter: Vec2,
}

/// Inputs for one frame's uniform block
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub scene: &'a Scene,
    pub extent: Extent2D,
    pub frame_index: u64,
    pub time: f32,
    /// Apply sub-pixel jitter to the projection
    pub jitter: bool,
    pub cascades: &'a CascadeSet,
    pub point_light_count: u32,
    /// `None` on the first frame; this frame's matrices are reused
    pub previous: Option<PreviousFrame>,
}

impl GlobalUniforms {
    pub fn build(inputs: &FrameInputs) -> Self {
        let camera = &inputs.scene.camera;
        let light = &inputs.scene.directional_light;
        let extent = inputs.extent;

        let jitter = if inputs.jitter {
            jitter_offset(inputs.frame_index, extent)
        } else {
            Vec2::ZERO
        };
        let view = camera.view_matrix();
        let unjittered_view_proj = camera.projection_matrix() * view;
        let proj = camera.jittered_projection_matrix(jitter);
        let view_proj = proj * view;
        let previous = inputs.previous.unwrap_or(PreviousFrame {
            view_proj: unjittered_view_proj,
            jitter,
        });

        let (width, height) = (extent.width.max(1) as f32, extent.height.max(1) as f32);
        Self {
            view,
            proj,
            view_proj,
            inv_view_proj: view_proj.inverse(),
            unjittered_view_proj,
            prev_view_proj: previous.view_proj,
            cascade_view_proj: inputs.cascades.view_proj,
            camera_position: camera.position.extend(1.0),
            dir_light_direction: light.direction.extend(0.0),
            dir_light_color: light.color.extend(light.intensity),
            cascade_splits: inputs.cascades.splits_vec4(),
            jitter: Vec4::new(jitter.x, jitter.y, previous.jitter.x, previous.jitter.y),
            extent: Vec4::new(width, height, 1.0 / width, 1.0 / height),
            point_light_count: inputs.point_light_count,
            cascade_count: inputs.cascades.count,
            frame_index: inputs.frame_index as u32,
            time: inputs.time,
        }
    }

    /// The part of this frame the next one needs
    pub fn as_previous(&self) -> PreviousFrame {
        PreviousFrame {
            view_proj: self.unjittered_view_proj,
            jitter: Vec2::new(self.jitter.x, self.jitter.y),
        }
    }
}

/// Per-frame parameters visible to every pass
#[derive(Debug, Clone, Copy)]
pub struct FrameParams {
    pub extent: Extent2D,
    /// Set 0 of the frame slot being recorded
    pub global_set: DescriptorSetHandle,
    pub frame_number: u64,
    /// Already resolved for the variant, see [`DebugView::effective`]
    pub debug_view: DebugView,
    pub clear_color: [f32; 4],
}

/// Resources owned by one frame slot. The GPU may read them until the
/// slot's fence signals.
#[derive(Debug, Clone, Copy)]
pub struct FrameResources {
    pub command_buffer: CommandBufferHandle,
    pub uniform_buffer: BufferHandle,
    pub light_buffer: BufferHandle,
    pub global_set: DescriptorSetHandle,
}

impl FrameResources {
    fn create(
        backend: &mut dyn GraphicsBackend,
        descriptors: &mut DescriptorManager,
        layouts: &SharedSetLayouts,
        light_capacity: usize,
        index: usize,
    ) -> BackendResult<Self> {
        let uniform_size = std::mem::size_of::<GlobalUniforms>() as u64;
        let light_size = (light_capacity.max(1) * std::mem::size_of::<GpuPointLight>()) as u64;

        let command_buffer = backend
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::CommandFailed("no command buffer allocated".into()))?;
        let uniform_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("global_uniforms_{}", index)),
            size: uniform_size,
            usage: BufferUsage::UNIFORM,
            location: MemoryLocation::CpuToGpu,
        })?;
        let light_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("point_lights_{}", index)),
            size: light_size,
            usage: BufferUsage::STORAGE,
            location: MemoryLocation::CpuToGpu,
        })?;

        let global_set = descriptors.allocate(backend, layouts.global)?;
        descriptors.write_buffer(
            backend,
            global_set,
            0,
            uniform_buffer,
            uniform_size,
            DescriptorType::UniformBuffer,
        )?;
        descriptors.write_buffer(
            backend,
            global_set,
            1,
            light_buffer,
            light_size,
            DescriptorType::StorageBuffer,
        )?;

        Ok(Self {
            command_buffer,
            uniform_buffer,
            light_buffer,
            global_set,
        })
    }

    fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.free_command_buffers(&[self.command_buffer]);
        backend.destroy_buffer(self.uniform_buffer);
        backend.destroy_buffer(self.light_buffer);
    }

    /// Upload this frame's uniforms and lights. Call only after the slot's
    /// fence has been waited on.
    pub fn write(
        &self,
        backend: &mut dyn GraphicsBackend,
        uniforms: &GlobalUniforms,
        lights: &[GpuPointLight],
    ) -> BackendResult<()> {
        backend.write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(uniforms))?;
        if !lights.is_empty() {
            backend.write_buffer(self.light_buffer, 0, bytemuck::cast_slice(lights))?;
        }
        Ok(())
    }
}

/// One [`FrameResources`] per swapchain image.
///
/// The pool only grows: descriptor sets are never returned to the pool
/// individually, so slots are reused when the image count drops.
#[derive(Debug, Default)]
pub struct FramePool {
    slots: Vec<FrameResources>,
    light_capacity: usize,
}

impl FramePool {
    pub fn new(light_capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            light_capacity,
        }
    }

    /// Make sure at least `count` slots exist.
    pub fn ensure(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        descriptors: &mut DescriptorManager,
        layouts: &SharedSetLayouts,
        count: usize,
    ) -> BackendResult<()> {
        while self.slots.len() < count {
            let index = self.slots.len();
            let slot =
                FrameResources::create(backend, descriptors, layouts, self.light_capacity, index)?;
            self.slots.push(slot);
        }
        log::debug!("Frame resources: {} slots", self.slots.len());
        Ok(())
    }

    pub fn slot(&self, index: usize) -> BackendResult<&FrameResources> {
        self.slots
            .get(index)
            .ok_or_else(|| BackendError::InvalidHandle(format!("frame slot {}", index)))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn light_capacity(&self) -> usize {
        self.light_capacity
    }

    /// Free every slot. Descriptor sets go with the descriptor pool.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for slot in self.slots.drain(..) {
            slot.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::scene::{compute_cascades, PointLight};
    use glam::Vec3;

    #[test]
    fn test_uniform_block_has_no_padding() {
        assert_eq!(std::mem::size_of::<GlobalUniforms>(), 688);
        assert_eq!(std::mem::size_of::<GlobalUniforms>() % 16, 0);
    }

    #[test]
    fn test_first_frame_reuses_current_matrices() {
        let scene = Scene::new();
        let cascades = CascadeSet::default();
        let uniforms = GlobalUniforms::build(&FrameInputs {
            scene: &scene,
            extent: Extent2D::new(800, 600),
            frame_index: 0,
            time: 0.0,
            jitter: false,
            cascades: &cascades,
            point_light_count: 0,
            previous: None,
        });
        assert_eq!(uniforms.prev_view_proj, uniforms.unjittered_view_proj);
        assert_eq!(uniforms.view_proj, uniforms.unjittered_view_proj);
        assert_eq!(uniforms.extent, Vec4::new(800.0, 600.0, 1.0 / 800.0, 1.0 / 600.0));
    }

    #[test]
    fn test_jitter_leaves_unjittered_matrix_alone() {
        let mut scene = Scene::new();
        scene.add_point_light(PointLight::default());
        let cascades = compute_cascades(&scene.camera, &scene.directional_light, 3, 0.75, 100.0, 2048);
        let first = GlobalUniforms::build(&FrameInputs {
            scene: &scene,
            extent: Extent2D::new(1600, 900),
            frame_index: 0,
            time: 0.0,
            jitter: true,
            cascades: &cascades,
            point_light_count: 1,
            previous: None,
        });
        assert_ne!(first.view_proj, first.unjittered_view_proj);

        scene.camera.position += Vec3::X;
        let second = GlobalUniforms::build(&FrameInputs {
            scene: &scene,
            extent: Extent2D::new(1600, 900),
            frame_index: 1,
            time: 0.016,
            jitter: true,
            cascades: &cascades,
            point_light_count: 1,
            previous: Some(first.as_previous()),
        });
        assert_eq!(second.prev_view_proj, first.unjittered_view_proj);
        assert_eq!(second.jitter.z, first.jitter.x);
        assert_eq!(second.cascade_count, 3);
        assert_eq!(second.dir_light_color.w, 2.0);
    }

    #[test]
    fn test_pool_only_grows() {
        let mut backend = DummyBackend::new();
        let mut descriptors = DescriptorManager::new(&mut backend, 16).unwrap();
        let layouts = SharedSetLayouts::create(&mut descriptors, &mut backend).unwrap();
        let mut pool = FramePool::new(4);

        pool.ensure(&mut backend, &mut descriptors, &layouts, 3).unwrap();
        pool.ensure(&mut backend, &mut descriptors, &layouts, 2).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(descriptors.allocated_sets(), 3);

        let slot = *pool.slot(0).unwrap();
        let writes = backend.descriptor_writes(slot.global_set);
        assert_eq!(writes.len(), 2);
        assert_eq!(
            backend.buffer_contents(slot.light_buffer).map(|b| b.len()),
            Some(4 * 32)
        );

        pool.destroy(&mut backend);
        descriptors.destroy(&mut backend);
        let live = backend.live_resources();
        assert_eq!(live.buffers, 0);
        assert_eq!(live.command_buffers, 0);
        assert!(backend.hazards().is_empty());
    }
}
