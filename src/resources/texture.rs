//! Texture loading and management

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use crate::backend::traits::*;
use crate::backend::types::*;

/// RGBA8 pixels ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Level 0
    pub data: Vec<u8>,
    /// Levels 1.., each half the previous size
    pub mips: Vec<Vec<u8>>,
}

impl TextureData {
    /// Load a color texture from an image file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("texture")
            .to_string();
        let img = image::open(path).map_err(|e| {
            BackendError::TextureCreationFailed(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self::from_image(img, &name, TextureFormat::Rgba8UnormSrgb).with_mipmaps())
    }

    /// Decode an encoded image (PNG, JPEG, ...) held in memory
    pub fn from_bytes(bytes: &[u8], name: &str, format: TextureFormat) -> BackendResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| BackendError::TextureCreationFailed(format!("{}: {}", name, e)))?;
        Ok(Self::from_image(img, name, format).with_mipmaps())
    }

    fn from_image(img: DynamicImage, name: &str, format: TextureFormat) -> Self {
        let (width, height) = img.dimensions();
        Self {
            name: name.to_string(),
            width,
            height,
            format,
            data: img.to_rgba8().into_raw(),
            mips: Vec::new(),
        }
    }

    fn from_rgba(img: RgbaImage, name: &str, format: TextureFormat) -> Self {
        Self {
            name: name.to_string(),
            width: img.width(),
            height: img.height(),
            format,
            data: img.into_raw(),
            mips: Vec::new(),
        }
    }

    /// 1x1 texture; stored linearly so channels read back exactly
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self::from_rgba(
            RgbaImage::from_pixel(1, 1, Rgba(color)),
            name,
            TextureFormat::Rgba8Unorm,
        )
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Tangent-space +Z
    pub fn flat_normal() -> Self {
        Self::solid_color([128, 128, 255, 255], "flat_normal")
    }

    /// sRGB checkerboard with `cell`-pixel squares
    pub fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let img = RgbaImage::from_fn(size.max(1), size.max(1), |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgba(a)
            } else {
                Rgba(b)
            }
        });
        Self::from_rgba(img, "checkerboard", TextureFormat::Rgba8UnormSrgb).with_mipmaps()
    }

    /// Replace any mips with a full chain down to 1x1, each level a
    /// triangle-filtered downsample of the one above.
    pub fn with_mipmaps(mut self) -> Self {
        self.mips.clear();
        let Some(mut previous) = RgbaImage::from_raw(self.width, self.height, self.data.clone())
        else {
            log::warn!("Texture '{}' has a short pixel buffer, mipmaps skipped", self.name);
            return self;
        };
        for level in 1..mip_level_count(self.width, self.height) {
            let (width, height) = mip_extent(self.width, self.height, level);
            previous = imageops::resize(&previous, width, height, FilterType::Triangle);
            self.mips.push(previous.as_raw().clone());
        }
        self
    }

    pub fn mip_levels(&self) -> u32 {
        1 + self.mips.len() as u32
    }

    /// Pixel data of every level, largest first
    pub fn levels(&self) -> Vec<&[u8]> {
        std::iter::once(self.data.as_slice())
            .chain(self.mips.iter().map(Vec::as_slice))
            .collect()
    }

    pub fn descriptor(&self) -> TextureDescriptor {
        TextureDescriptor {
            label: Some(self.name.clone()),
            width: self.width,
            height: self.height,
            format: self.format,
            mip_levels: self.mip_levels(),
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        }
    }
}

/// Sampled texture resident on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuTexture {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl GpuTexture {
    /// Create the image and upload `data` through a staging buffer. The
    /// image ends in `ShaderReadOnly`.
    pub fn upload(backend: &mut dyn GraphicsBackend, data: &TextureData) -> BackendResult<Self> {
        let desc = data.descriptor();
        let texture = backend.create_texture(&desc)?;
        let uploaded = upload_texture(backend, texture, &desc, &data.levels())
            .and_then(|()| backend.create_texture_view(texture, &TextureViewDescriptor::full(&desc)));
        let view = match uploaded {
            Ok(view) => view,
            Err(e) => {
                backend.destroy_texture(texture);
                return Err(e);
            }
        };
        log::debug!(
            "Uploaded texture '{}' {}x{} {:?}, {} mips",
            data.name,
            data.width,
            data.height,
            data.format,
            desc.mip_levels
        );
        Ok(Self {
            texture,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
        })
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};

    #[test]
    fn test_checkerboard_cells() {
        let tex = TextureData::checkerboard(4, 2, [255; 4], [0, 0, 0, 255]);
        assert_eq!(tex.data.len(), 4 * 4 * 4);
        let pixel = |x: usize, y: usize| &tex.data[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(pixel(0, 0), &[255; 4]);
        assert_eq!(pixel(1, 1), &[255; 4]);
        assert_eq!(pixel(2, 0), &[0, 0, 0, 255]);
        assert_eq!(pixel(2, 2), &[255; 4]);
    }

    #[test]
    fn test_checkerboard_has_full_mip_chain() {
        let tex = TextureData::checkerboard(256, 32, [255; 4], [0, 0, 0, 255]);
        assert_eq!(tex.mip_levels(), 9);
        assert_eq!(tex.descriptor().mip_levels, 9);
        for (level, data) in tex.levels().iter().enumerate() {
            let (w, h) = mip_extent(256, 256, level as u32);
            assert_eq!(data.len(), (w * h * 4) as usize, "mip {}", level);
        }
        // 1x1 tail averages the two colours
        let tail = tex.mips.last().unwrap();
        assert!((100..=155).contains(&tail[0]), "tail {:?}", tail);
        assert_eq!(tail[3], 255);
    }

    #[test]
    fn test_mipmaps_of_non_square_image() {
        let tex = TextureData::from_rgba(
            RgbaImage::from_pixel(8, 2, Rgba([40, 80, 120, 255])),
            "strip",
            TextureFormat::Rgba8Unorm,
        )
        .with_mipmaps();
        // 8x2, 4x1, 2x1, 1x1
        assert_eq!(tex.mip_levels(), 4);
        assert_eq!(tex.mips[0].len(), 4 * 4);
        assert_eq!(tex.mips[2], vec![40, 80, 120, 255]);
    }

    #[test]
    fn test_solid_colors_stay_single_level() {
        assert_eq!(TextureData::white().mip_levels(), 1);
        assert_eq!(TextureData::flat_normal().with_mipmaps().mip_levels(), 1);
    }

    #[test]
    fn test_upload_copies_every_mip() {
        let mut backend = DummyBackend::new();
        let data = TextureData::checkerboard(16, 4, [255; 4], [0, 0, 0, 255]);
        let gpu = GpuTexture::upload(&mut backend, &data).unwrap();

        let immediate = backend.submissions().last().unwrap();
        let regions: Vec<TextureCopyRegion> = immediate
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::CopyBufferToTexture { texture, region, .. }
                    if *texture == gpu.texture =>
                {
                    Some(*region)
                }
                _ => None,
            })
            .collect();
        let extents: Vec<(u32, u32, u32)> =
            regions.iter().map(|r| (r.mip_level, r.width, r.height)).collect();
        assert_eq!(extents, vec![(0, 16, 16), (1, 8, 8), (2, 4, 4), (3, 2, 2), (4, 1, 1)]);
        assert_eq!(regions[1].buffer_offset, 16 * 16 * 4);
        assert_eq!(regions[4].buffer_offset, (256 + 64 + 16 + 4) * 4);

        let barriers: Vec<u32> = immediate
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Barrier(b) => Some(b.mip_level_count),
                _ => None,
            })
            .collect();
        assert_eq!(barriers, vec![5, 5]);
        assert!(backend.hazards().is_empty());
        gpu.destroy(&mut backend);
    }

    #[test]
    fn test_mismatched_mip_data_is_rejected() {
        let mut backend = DummyBackend::new();
        let mut data = TextureData::checkerboard(8, 2, [255; 4], [0, 0, 0, 255]);
        data.mips[1].pop();
        assert!(matches!(
            GpuTexture::upload(&mut backend, &data),
            Err(BackendError::TextureCreationFailed(_))
        ));
        let live = backend.live_resources();
        assert_eq!((live.textures, live.buffers), (0, 0));
    }

    #[test]
    fn test_from_bytes_decodes_png() {
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 3, Rgba([10, 20, 30, 255])))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageOutputFormat::Png)
            .unwrap();
        let tex = TextureData::from_bytes(&png, "decoded", TextureFormat::Rgba8Unorm).unwrap();
        assert_eq!((tex.width, tex.height), (2, 3));
        assert_eq!(&tex.data[..4], &[10, 20, 30, 255]);
        // 2x3, 1x1
        assert_eq!(tex.mip_levels(), 2);
        assert!(TextureData::from_bytes(b"not an image", "bad", TextureFormat::Rgba8Unorm).is_err());
    }

    #[test]
    fn test_upload_ends_shader_readable() {
        let mut backend = DummyBackend::new();
        let gpu = GpuTexture::upload(&mut backend, &TextureData::flat_normal()).unwrap();

        let immediate = backend.submissions().last().unwrap();
        let layouts: Vec<(TextureLayout, TextureLayout)> = immediate
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Barrier(b) if b.texture == gpu.texture => {
                    Some((b.old_layout, b.new_layout))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                (TextureLayout::Undefined, TextureLayout::TransferDst),
                (TextureLayout::TransferDst, TextureLayout::ShaderReadOnly),
            ]
        );
        gpu.destroy(&mut backend);
        let live = backend.live_resources();
        assert_eq!((live.textures, live.buffers), (0, 0));
    }
}
