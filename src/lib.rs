//! Deferred Renderer - a Vulkan rendering engine built around a render graph
//!
//! Three pipeline variants share one per-frame driver:
//! - **Forward**: a single lit pass into the swapchain image
//! - **Deferred**: G-buffer, fullscreen PBR lighting, tonemapping
//! - **DeferredAdvanced**: cascaded shadows, motion vectors, TAA and FXAA on
//!   top of the deferred path
//!
//! # Features
//! - Render graph with declared reads and writes, explicit layout tracking
//!   and barrier insertion
//! - Frame slots fenced per swapchain image, with swapchain recreation on
//!   resize or staleness
//! - A device seam ([`backend::GraphicsBackend`]) with an `ash` backend and a
//!   recording dummy backend for headless tests

pub mod backend;
pub mod descriptor;
pub mod engine;
pub mod frame;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;
pub mod swapchain;
pub mod sync;
pub mod timer;
pub mod window;

use std::path::PathBuf;

pub use engine::{Engine, FrameStatus};
pub use pipeline::{DebugView, GraphSettings, PipelineVariant, TonemapOperator, TonemapSettings};
pub use timer::Timer;

use scene::{DEFAULT_MAX_POINT_LIGHTS, MAX_CASCADES};

/// Configuration for initializing the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Pass composition
    pub variant: PipelineVariant,
    /// Force FIFO presentation
    pub vsync: bool,
    /// Directory the `*.spv` shaders are loaded from
    pub shader_dir: PathBuf,
    /// Install the validation layer and debug messenger
    pub enable_validation: bool,
    /// Capacity of the point light buffer, at most 256
    pub max_point_lights: usize,
    pub shadow_map_size: u32,
    /// Number of shadow cascades, 1 to 3
    pub cascade_count: u32,
    /// Blend between logarithmic (1) and uniform (0) cascade splits
    pub cascade_split_lambda: f32,
    pub tonemap: TonemapOperator,
    pub exposure: f32,
    /// Weight of the history sample in the TAA resolve
    pub taa_feedback: f32,
    pub debug_view: DebugView,
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Renderer".to_string(),
            width: 1600,
            height: 900,
            variant: PipelineVariant::default(),
            vsync: true,
            shader_dir: PathBuf::from("shaders"),
            enable_validation: cfg!(debug_assertions),
            max_point_lights: DEFAULT_MAX_POINT_LIGHTS,
            shadow_map_size: 2048,
            cascade_count: MAX_CASCADES as u32,
            cascade_split_lambda: 0.75,
            tonemap: TonemapOperator::default(),
            exposure: 1.0,
            taa_feedback: 0.9,
            debug_view: DebugView::Final,
            clear_color: [0.02, 0.02, 0.04, 1.0],
        }
    }
}

impl EngineConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_variant(mut self, variant: PipelineVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Clamped to the hard cap of 256
    pub fn with_max_point_lights(mut self, count: usize) -> Self {
        self.max_point_lights = count.min(DEFAULT_MAX_POINT_LIGHTS);
        self
    }

    pub fn with_shadow_map_size(mut self, size: u32) -> Self {
        self.shadow_map_size = size;
        self
    }

    /// Clamped to 1..=3
    pub fn with_cascades(mut self, count: u32, split_lambda: f32) -> Self {
        self.cascade_count = count.clamp(1, MAX_CASCADES as u32);
        self.cascade_split_lambda = split_lambda.clamp(0.0, 1.0);
        self
    }

    pub fn with_tonemap(mut self, operator: TonemapOperator, exposure: f32) -> Self {
        self.tonemap = operator;
        self.exposure = exposure;
        self
    }

    pub fn with_taa_feedback(mut self, feedback: f32) -> Self {
        self.taa_feedback = feedback.clamp(0.0, 1.0);
        self
    }

    pub fn with_debug_view(mut self, view: DebugView) -> Self {
        self.debug_view = view;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// The settings that shape the render graph
    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            shadow_map_size: self.shadow_map_size.max(1),
            cascade_count: self.cascade_count.clamp(1, MAX_CASCADES as u32),
            tonemap: TonemapSettings {
                operator: self.tonemap,
                exposure: self.exposure,
            },
            taa_feedback: self.taa_feedback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!((config.width, config.height), (1600, 900));
        assert_eq!(config.variant, PipelineVariant::Deferred);
        assert_eq!(config.max_point_lights, 256);
        assert_eq!(config.cascade_count, 3);
        assert_eq!(config.clear_color, [0.02, 0.02, 0.04, 1.0]);
    }

    #[test]
    fn test_builders_clamp() {
        let config = EngineConfig::default()
            .with_max_point_lights(10_000)
            .with_cascades(7, 2.0)
            .with_taa_feedback(1.5);
        assert_eq!(config.max_point_lights, 256);
        assert_eq!(config.cascade_count, 3);
        assert_eq!(config.cascade_split_lambda, 1.0);
        assert_eq!(config.taa_feedback, 1.0);
    }

    #[test]
    fn test_graph_settings_carry_tonemap() {
        let settings = EngineConfig::default()
            .with_tonemap(TonemapOperator::Reinhard, 1.5)
            .with_shadow_map_size(1024)
            .graph_settings();
        assert_eq!(settings.tonemap.operator, TonemapOperator::Reinhard);
        assert_eq!(settings.tonemap.exposure, 1.5);
        assert_eq!(settings.shadow_map_size, 1024);
    }
}
