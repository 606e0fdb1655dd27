//! Post-processing effects
//!
//! Both passes are fullscreen triangles sharing [`FULLSCREEN_VERTEX_SHADER`].

mod fxaa;
mod tonemapping;

pub use fxaa::{FxaaPass, FxaaPush};
pub use tonemapping::{TonemapOperator, TonemapPush, TonemapSettings, TonemappingPass};

/// Vertex stage of every fullscreen pass: positions come from the vertex index
pub const FULLSCREEN_VERTEX_SHADER: &str = "fullscreen.vert";
