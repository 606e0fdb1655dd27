//! Render graph definition and compilation

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::backend::{
    BackendError, BackendResult, DescriptorSetLayoutHandle, GraphicsBackend, TextureFormat,
};
use crate::descriptor::SharedSetLayouts;
use crate::pipeline::ShaderLibrary;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Ids of the two halves of a history pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPair {
    pub current: ResourceId,
    pub previous: ResourceId,
}

/// The main render graph structure
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    next_resource_id: u32,
    history_pairs: Vec<HistoryPair>,

    /// External resources (like swapchain)
    external_resources: HashMap<String, ResourceId>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_resource_id: 0,
            history_pairs: Vec::new(),
            external_resources: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        id
    }

    /// Declare a graph-owned texture
    pub fn create_texture(&mut self, name: &str, info: TextureInfo) -> ResourceId {
        let id = self.next_id();
        self.resources.push(VirtualResource::Texture(VirtualTexture {
            id,
            name: name.to_string(),
            info,
        }));
        id
    }

    /// Declare a texture that survives into the next frame. Passes write
    /// `current` and read last frame's contents through `previous`; the
    /// executor swaps the two physical images every frame.
    pub fn create_history(&mut self, name: &str, info: TextureInfo) -> HistoryPair {
        let current = self.next_id();
        let previous = self.next_id();
        for (id, slot, suffix) in [
            (current, HistorySlot::Current, "current"),
            (previous, HistorySlot::Previous, "previous"),
        ] {
            self.resources.push(VirtualResource::History {
                texture: VirtualTexture {
                    id,
                    name: format!("{}_{}", name, suffix),
                    info: info.clone(),
                },
                slot,
            });
        }
        let pair = HistoryPair { current, previous };
        self.history_pairs.push(pair);
        pair
    }

    /// Register an external resource (like swapchain image)
    pub fn register_external(&mut self, name: &str) -> ResourceId {
        let id = self.next_id();
        self.resources.push(VirtualResource::External {
            id,
            name: name.to_string(),
        });
        self.external_resources.insert(name.to_string(), id);
        id
    }

    /// Get external resource by name
    pub fn get_external(&self, name: &str) -> Option<ResourceId> {
        self.external_resources.get(name).copied()
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> PassId {
        self.add_boxed_pass(Box::new(pass))
    }

    pub fn add_boxed_pass(&mut self, mut pass: Box<dyn RenderPass>) -> PassId {
        let id = PassId(self.passes.len() as u32);
        let name = pass.name().to_string();

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                resources: &self.resources,
                inputs: &mut inputs,
                outputs: &mut outputs,
            };
            pass.setup(&mut ctx);
        }

        self.passes.push(pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            inputs,
            outputs,
        });

        id
    }

    /// Compile the graph into an execution order.
    ///
    /// A reader runs after every writer of what it reads. Two passes that
    /// write the same resource keep their insertion order. Among ready
    /// passes the one added first runs first.
    pub fn compile(&self) -> BackendResult<CompiledGraph> {
        self.validate()?;

        let count = self.pass_nodes.len();
        let mut dependencies: Vec<HashSet<usize>> = vec![HashSet::new(); count];

        for (r, reader) in self.pass_nodes.iter().enumerate() {
            for (w, writer) in self.pass_nodes.iter().enumerate() {
                if r == w {
                    continue;
                }
                for input in &reader.inputs {
                    if writer.writes_resource(input.resource) {
                        dependencies[r].insert(w);
                    }
                }
                if w < r {
                    let shared_write = reader
                        .outputs
                        .iter()
                        .any(|o| writer.writes_resource(o.resource));
                    if shared_write {
                        dependencies[r].insert(w);
                    }
                }
            }
        }

        // Kahn's algorithm, lowest insertion index first
        let mut in_degree: Vec<usize> = dependencies.iter().map(HashSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted_passes = Vec::with_capacity(count);

        while let Some(index) = ready.pop_first() {
            sorted_passes.push(self.pass_nodes[index].id);
            for (dependent, deps) in dependencies.iter().enumerate() {
                if deps.contains(&index) {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if sorted_passes.len() != count {
            let stuck: Vec<&str> = (0..count)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.pass_nodes[i].name.as_str())
                .collect();
            return Err(BackendError::InitializationFailed(format!(
                "render graph has a dependency cycle through {:?}",
                stuck
            )));
        }

        log::debug!(
            "Render graph compiled: {}",
            sorted_passes
                .iter()
                .map(|id| self.pass_nodes[id.index()].name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(CompiledGraph {
            pass_order: sorted_passes,
        })
    }

    /// Every access names a declared resource, and every graph-owned
    /// texture that is read has a writer.
    fn validate(&self) -> BackendResult<()> {
        for node in &self.pass_nodes {
            for access in node.inputs.iter().chain(node.outputs.iter()) {
                let Some(resource) = self.resource(access.resource) else {
                    return Err(BackendError::InitializationFailed(format!(
                        "pass '{}' uses undeclared resource {:?}",
                        node.name, access.resource
                    )));
                };
                if access.is_read() && matches!(resource, VirtualResource::Texture(_)) {
                    let written = self
                        .pass_nodes
                        .iter()
                        .any(|n| n.writes_resource(access.resource));
                    if !written {
                        return Err(BackendError::InitializationFailed(format!(
                            "pass '{}' reads '{}' which no pass writes",
                            node.name,
                            resource.name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Get all passes
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    /// Get mutable passes
    pub fn passes_mut(&mut self) -> &mut [Box<dyn RenderPass>] {
        &mut self.passes
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    pub fn resource(&self, id: ResourceId) -> Option<&VirtualResource> {
        self.resources.iter().find(|r| r.id() == id)
    }

    pub fn history_pairs(&self) -> &[HistoryPair] {
        &self.history_pairs
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        self.passes.get(id.index()).map(|p| p.as_ref())
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.get(id.index())
    }

    /// Find a pass by name
    pub fn find_pass(&self, name: &str) -> Option<PassId> {
        self.pass_nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    /// Build the pipelines of every pass. `input_layout` names the layout
    /// of a pass's input set, if it has one.
    pub fn create_pipelines(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &mut ShaderLibrary,
        layouts: &SharedSetLayouts,
        swapchain_format: TextureFormat,
        input_layout: impl Fn(PassId) -> Option<DescriptorSetLayoutHandle>,
    ) -> BackendResult<()> {
        for (index, pass) in self.passes.iter_mut().enumerate() {
            let mut ctx = PipelineSetupContext {
                backend: &mut *backend,
                shaders: &mut *shaders,
                layouts,
                input_layout: input_layout(PassId(index as u32)),
                swapchain_format,
                resources: &self.resources,
            };
            if let Err(e) = pass.create_pipelines(&mut ctx) {
                log::error!("Pass '{}' failed to build its pipelines: {}", pass.name(), e);
                return Err(e);
            }
        }
        log::debug!("Pipelines created for {} passes", self.passes.len());
        Ok(())
    }

    pub fn destroy_pipelines(&mut self, backend: &mut dyn GraphicsBackend) {
        for pass in &mut self.passes {
            pass.destroy_pipelines(backend);
        }
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiled render graph with execution order
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GraphicsBackend, TextureFormat};

    struct TestPass {
        name: &'static str,
        reads: Vec<ResourceId>,
        writes: Vec<ResourceId>,
    }

    impl TestPass {
        fn new(name: &'static str, reads: &[ResourceId], writes: &[ResourceId]) -> Self {
            Self {
                name,
                reads: reads.to_vec(),
                writes: writes.to_vec(),
            }
        }
    }

    impl RenderPass for TestPass {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            for r in &self.reads {
                ctx.sample(*r, SamplerKind::Point);
            }
            for w in &self.writes {
                ctx.write(*w, ResourceUsage::RenderTarget);
            }
        }

        fn create_pipelines(&mut self, _ctx: &mut PipelineSetupContext) -> BackendResult<()> {
            Ok(())
        }

        fn destroy_pipelines(&mut self, _backend: &mut dyn GraphicsBackend) {}

        fn execute(&self, _ctx: &mut PassExecuteContext) -> BackendResult<()> {
            Ok(())
        }
    }

    fn names(graph: &RenderGraph, compiled: &CompiledGraph) -> Vec<String> {
        compiled
            .pass_order
            .iter()
            .map(|id| graph.get_pass_node(*id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_readers_run_after_writers() {
        let mut graph = RenderGraph::new();
        let a = graph.create_texture("a", TextureInfo::screen(TextureFormat::Rgba16Float));
        let b = graph.create_texture("b", TextureInfo::screen(TextureFormat::Rgba16Float));
        let out = graph.register_external("swapchain");

        // Added consumer-first on purpose
        graph.add_pass(TestPass::new("final", &[b], &[out]));
        graph.add_pass(TestPass::new("second", &[a], &[b]));
        graph.add_pass(TestPass::new("first", &[], &[a]));

        let compiled = graph.compile().unwrap();
        assert_eq!(names(&graph, &compiled), vec!["first", "second", "final"]);
    }

    #[test]
    fn test_independent_passes_keep_insertion_order() {
        let mut graph = RenderGraph::new();
        let a = graph.create_texture("a", TextureInfo::screen(TextureFormat::Rgba8Unorm));
        let b = graph.create_texture("b", TextureInfo::screen(TextureFormat::Rgba8Unorm));
        let c = graph.create_texture("c", TextureInfo::screen(TextureFormat::Rgba8Unorm));

        graph.add_pass(TestPass::new("x", &[], &[a]));
        graph.add_pass(TestPass::new("y", &[], &[b]));
        graph.add_pass(TestPass::new("z", &[], &[c]));
        graph.add_pass(TestPass::new("combine", &[a, b, c], &[]));

        for _ in 0..5 {
            let compiled = graph.compile().unwrap();
            assert_eq!(names(&graph, &compiled), vec!["x", "y", "z", "combine"]);
        }
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut graph = RenderGraph::new();
        let a = graph.create_texture("a", TextureInfo::screen(TextureFormat::Rgba8Unorm));
        let b = graph.create_texture("b", TextureInfo::screen(TextureFormat::Rgba8Unorm));
        graph.add_pass(TestPass::new("p", &[b], &[a]));
        graph.add_pass(TestPass::new("q", &[a], &[b]));

        assert!(matches!(
            graph.compile(),
            Err(BackendError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_read_without_writer_is_an_error() {
        let mut graph = RenderGraph::new();
        let orphan = graph.create_texture("orphan", TextureInfo::screen(TextureFormat::Rgba8Unorm));
        let out = graph.register_external("swapchain");
        graph.add_pass(TestPass::new("p", &[orphan], &[out]));

        let err = graph.compile().unwrap_err();
        assert!(err.to_string().contains("orphan"));
    }

    #[test]
    fn test_history_previous_needs_no_writer() {
        let mut graph = RenderGraph::new();
        let history = graph.create_history("taa", TextureInfo::screen(TextureFormat::Rgba16Float));
        let out = graph.register_external("swapchain");
        graph.add_pass(TestPass::new("resolve", &[history.previous], &[history.current]));
        graph.add_pass(TestPass::new("present", &[history.current], &[out]));

        let compiled = graph.compile().unwrap();
        assert_eq!(names(&graph, &compiled), vec!["resolve", "present"]);
        assert_eq!(graph.history_pairs().len(), 1);
        assert_eq!(
            graph.resource(history.previous).unwrap().name(),
            "taa_previous"
        );
    }

    #[test]
    fn test_sampled_depth_is_a_depth_read() {
        let mut graph = RenderGraph::new();
        let depth = graph.create_texture("depth", TextureInfo::screen(TextureFormat::Depth32Float));
        let color = graph.create_texture("color", TextureInfo::screen(TextureFormat::Rgba8Unorm));
        graph.add_pass(TestPass::new("reader", &[depth, color], &[]));

        let node = &graph.pass_nodes()[0];
        assert_eq!(node.inputs[0].usage, ResourceUsage::DepthStencilRead);
        assert_eq!(node.inputs[1].usage, ResourceUsage::TextureRead);
        assert_eq!(node.sampled_inputs().count(), 2);
    }
}
