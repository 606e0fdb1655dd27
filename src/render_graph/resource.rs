//! Virtual resources for the render graph

use crate::backend::types::*;

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Describes texture dimensions that can be relative to screen size
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureSize {
    /// Absolute size in pixels, independent of the window
    Absolute { width: u32, height: u32 },
    /// Relative to screen size (1.0 = full screen)
    Relative { width_scale: f32, height_scale: f32 },
}

impl Default for TextureSize {
    fn default() -> Self {
        TextureSize::Relative {
            width_scale: 1.0,
            height_scale: 1.0,
        }
    }
}

impl TextureSize {
    /// Pixel size for a given screen extent, never smaller than 1x1.
    pub fn resolve(&self, screen: Extent2D) -> Extent2D {
        match self {
            TextureSize::Absolute { width, height } => Extent2D::new(*width, *height),
            TextureSize::Relative {
                width_scale,
                height_scale,
            } => Extent2D::new(
                (((screen.width as f32) * width_scale) as u32).max(1),
                (((screen.height as f32) * height_scale) as u32).max(1),
            ),
        }
    }

    /// Whether the physical texture must be rebuilt when the window resizes.
    pub fn is_relative(&self) -> bool {
        matches!(self, TextureSize::Relative { .. })
    }
}

/// Description of a graph-owned texture
#[derive(Debug, Clone, PartialEq)]
pub struct TextureInfo {
    pub format: TextureFormat,
    pub size: TextureSize,
    pub array_layers: u32,
}

impl TextureInfo {
    /// Screen-sized, single layer.
    pub fn screen(format: TextureFormat) -> Self {
        Self {
            format,
            size: TextureSize::default(),
            array_layers: 1,
        }
    }

    /// Fixed size, with `layers` array layers.
    pub fn fixed(format: TextureFormat, width: u32, height: u32, layers: u32) -> Self {
        Self {
            format,
            size: TextureSize::Absolute { width, height },
            array_layers: layers.max(1),
        }
    }
}

/// Which half of a history pair a resource id names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistorySlot {
    /// Written this frame
    Current,
    /// Written last frame, read this frame
    Previous,
}

/// Virtual texture resource in the render graph
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub name: String,
    pub info: TextureInfo,
}

/// Resource type enumeration
#[derive(Debug, Clone)]
pub enum VirtualResource {
    Texture(VirtualTexture),
    /// One half of a ping-pong pair that persists across frames
    History {
        texture: VirtualTexture,
        slot: HistorySlot,
    },
    /// External resource (like swapchain image), bound each frame
    External { id: ResourceId, name: String },
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Texture(t) => t.id,
            VirtualResource::History { texture, .. } => texture.id,
            VirtualResource::External { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Texture(t) => &t.name,
            VirtualResource::History { texture, .. } => &texture.name,
            VirtualResource::External { name, .. } => name,
        }
    }

    /// Format of a graph-owned texture; `None` for externals.
    pub fn format(&self) -> Option<TextureFormat> {
        match self {
            VirtualResource::Texture(t) => Some(t.info.format),
            VirtualResource::History { texture, .. } => Some(texture.info.format),
            VirtualResource::External { .. } => None,
        }
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceUsage {
    /// Read as a texture (sampled)
    TextureRead,
    /// Write as a color render target
    RenderTarget,
    /// Depth sampled by a shader
    DepthStencilRead,
    /// Depth attachment
    DepthStencilWrite,
}

impl ResourceUsage {
    /// Layout the image must be in while the pass runs.
    pub fn layout(self) -> TextureLayout {
        match self {
            ResourceUsage::TextureRead => TextureLayout::ShaderReadOnly,
            ResourceUsage::RenderTarget => TextureLayout::ColorAttachment,
            ResourceUsage::DepthStencilRead => TextureLayout::DepthStencilReadOnly,
            ResourceUsage::DepthStencilWrite => TextureLayout::DepthStencilAttachment,
        }
    }
}

/// Sampler used for a sampled pass input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    /// Nearest, clamped; texel-exact reads of render targets
    Point,
    /// Bilinear, clamped
    Linear,
    /// Depth comparison for shadow lookups
    ShadowCompare,
}

/// Resource access declaration for a pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
    /// Set for sampled reads; these become the pass's input descriptor set.
    pub sampler: Option<SamplerKind>,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::TextureRead | ResourceUsage::DepthStencilRead
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::RenderTarget | ResourceUsage::DepthStencilWrite
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_size_resolves_against_screen() {
        let half = TextureSize::Relative {
            width_scale: 0.5,
            height_scale: 0.5,
        };
        assert_eq!(
            half.resolve(Extent2D::new(1600, 900)),
            Extent2D::new(800, 450)
        );
        assert_eq!(half.resolve(Extent2D::new(1, 1)), Extent2D::new(1, 1));
        assert!(half.is_relative());
    }

    #[test]
    fn test_absolute_size_ignores_screen() {
        let shadow = TextureInfo::fixed(TextureFormat::Depth32Float, 2048, 2048, 3);
        assert_eq!(
            shadow.size.resolve(Extent2D::new(640, 480)),
            Extent2D::new(2048, 2048)
        );
        assert!(!shadow.size.is_relative());
        assert_eq!(shadow.array_layers, 3);
    }

    #[test]
    fn test_usage_layouts() {
        assert_eq!(
            ResourceUsage::RenderTarget.layout(),
            TextureLayout::ColorAttachment
        );
        assert_eq!(
            ResourceUsage::DepthStencilRead.layout(),
            TextureLayout::DepthStencilReadOnly
        );
        assert!(ResourceUsage::TextureRead.layout().is_shader_readable());
        assert!(ResourceUsage::DepthStencilWrite.layout().is_attachment());
    }
}
