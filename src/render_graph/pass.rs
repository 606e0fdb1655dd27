//! Render pass definitions for the render graph

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::descriptor::SharedSetLayouts;
use crate::frame::FrameParams;
use crate::pipeline::ShaderLibrary;
use crate::render_graph::resource::*;
use crate::scene::DrawCall;

/// Unique identifier for a render pass; also its insertion index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Context for declaring what a pass reads and writes
pub struct PassSetupContext<'a> {
    pub(crate) resources: &'a [VirtualResource],
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
}

impl<'a> PassSetupContext<'a> {
    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess {
            resource,
            usage,
            sampler: None,
        });
    }

    /// Declare a sampled read. Sampled reads are bound, in declaration
    /// order, to bindings `0..n` of the pass's input set (set 1).
    pub fn sample(&mut self, resource: ResourceId, sampler: SamplerKind) {
        let is_depth = self
            .resources
            .iter()
            .find(|r| r.id() == resource)
            .and_then(VirtualResource::format)
            .is_some_and(|f| f.is_depth());
        let usage = if is_depth {
            ResourceUsage::DepthStencilRead
        } else {
            ResourceUsage::TextureRead
        };
        self.inputs.push(ResourceAccess {
            resource,
            usage,
            sampler: Some(sampler),
        });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess {
            resource,
            usage,
            sampler: None,
        });
    }
}

/// Context for building a pass's pipelines
pub struct PipelineSetupContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub shaders: &'a mut ShaderLibrary,
    pub layouts: &'a SharedSetLayouts,
    /// Layout of the pass's input set, if it samples anything
    pub input_layout: Option<DescriptorSetLayoutHandle>,
    pub swapchain_format: TextureFormat,
    pub(crate) resources: &'a [VirtualResource],
}

impl<'a> PipelineSetupContext<'a> {
    /// Attachment format of a resource; externals render in the swapchain format.
    pub fn format_of(&self, resource: ResourceId) -> BackendResult<TextureFormat> {
        let virtual_resource = self
            .resources
            .iter()
            .find(|r| r.id() == resource)
            .ok_or_else(|| BackendError::InvalidHandle(format!("resource {:?}", resource)))?;
        Ok(virtual_resource.format().unwrap_or(self.swapchain_format))
    }

    /// Input layout, or the shared empty layout when the pass samples nothing.
    pub fn input_layout_or_empty(&self) -> DescriptorSetLayoutHandle {
        self.input_layout.unwrap_or(self.layouts.empty)
    }
}

/// Physical image backing a resource for the current frame
#[derive(Debug, Clone)]
pub struct PhysicalTexture {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    /// One single-layer view per array layer (layered targets only)
    pub layer_views: Vec<TextureViewHandle>,
    pub extent: Extent2D,
    pub format: TextureFormat,
    pub array_layers: u32,
    /// Sized relative to the window; rebuilt on resize
    pub is_relative: bool,
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a> {
    pub cmd: &'a mut dyn CommandRecorder,
    pub frame: &'a FrameParams,
    pub draws: &'a [DrawCall],
    /// Input set for this frame's history parity
    pub input_set: Option<DescriptorSetHandle>,
    /// False on the first frame after history targets were (re)allocated
    pub history_valid: bool,
    pub(crate) textures: &'a HashMap<ResourceId, &'a PhysicalTexture>,
}

impl<'a> PassExecuteContext<'a> {
    fn texture(&self, resource: ResourceId) -> BackendResult<&PhysicalTexture> {
        self.textures
            .get(&resource)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("resource {:?} not bound", resource)))
    }

    /// Get a texture view handle for a resource
    pub fn view(&self, resource: ResourceId) -> BackendResult<TextureViewHandle> {
        Ok(self.texture(resource)?.view)
    }

    /// View of one array layer of a layered resource
    pub fn layer_view(&self, resource: ResourceId, layer: u32) -> BackendResult<TextureViewHandle> {
        let texture = self.texture(resource)?;
        texture
            .layer_views
            .get(layer as usize)
            .copied()
            .ok_or_else(|| {
                BackendError::InvalidHandle(format!("layer {} of resource {:?}", layer, resource))
            })
    }

    pub fn extent(&self, resource: ResourceId) -> BackendResult<Extent2D> {
        Ok(self.texture(resource)?.extent)
    }

    /// Input set of the pass; errors if the pass declared no sampled reads.
    pub fn input_set(&self) -> BackendResult<DescriptorSetHandle> {
        self.input_set
            .ok_or_else(|| BackendError::DescriptorFailed("pass has no input set".into()))
    }
}

/// Trait for render passes
pub trait RenderPass: Send + Sync {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Setup phase - declare reads and writes
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Build pipelines. Called once at startup and again when the
    /// swapchain format changes.
    fn create_pipelines(&mut self, ctx: &mut PipelineSetupContext) -> BackendResult<()>;

    fn destroy_pipelines(&mut self, backend: &mut dyn GraphicsBackend);

    /// Execute phase - record commands. Layout transitions for every
    /// declared access have already been recorded.
    fn execute(&self, ctx: &mut PassExecuteContext) -> BackendResult<()>;
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.inputs.iter().any(|a| a.resource == resource)
    }

    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.outputs.iter().any(|a| a.resource == resource)
    }

    /// Sampled reads in binding order.
    pub fn sampled_inputs(&self) -> impl Iterator<Item = &ResourceAccess> {
        self.inputs.iter().filter(|a| a.sampler.is_some())
    }
}
