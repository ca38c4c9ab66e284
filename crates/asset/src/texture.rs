//! Decoded images, always RGBA8 with rows top to bottom.

use std::path::Path;

use crate::{
    error::{AssetError, AssetResult},
    source::SourceProvider,
};

pub const BYTES_PER_TEXEL: usize = 4;

/// CPU copy of an image ready for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Read `path` through `source` and decode it.
    pub fn load(source: &dyn SourceProvider, path: &Path) -> AssetResult<Self> {
        let bytes = source.read_bytes(path)?;
        Self::decode(path, &bytes)
    }

    /// Decode any format the `image` crate was built with; `path` only
    /// labels errors.
    pub fn decode(path: &Path, bytes: &[u8]) -> AssetResult<Self> {
        let rgba = image::load_from_memory(bytes)
            .map_err(|source| AssetError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .into_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("Decoded {} ({}x{})", path.display(), width, height);
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Square two-tone checkerboard with 8 texel cells.
    pub fn checkerboard(size: u32) -> Self {
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| (x / 8 + y / 8) % 2))
            .flat_map(|cell| if cell == 0 { [255, 255, 255, 255] } else { [128, 128, 128, 255] })
            .collect();
        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    /// Full mip chain, largest first, down to 1x1. Each level is filtered
    /// from the one before it.
    pub fn mip_chain(&self) -> Vec<TextureData> {
        let mut levels = vec![self.clone()];
        let Some(mut current) = image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
        else {
            log::warn!("{}x{} texture has short pixel data, skipping mips", self.width, self.height);
            return levels;
        };
        while current.width() > 1 || current.height() > 1 {
            let width = (current.width() / 2).max(1);
            let height = (current.height() / 2).max(1);
            current = image::imageops::resize(&current, width, height, image::imageops::FilterType::Triangle);
            levels.push(TextureData {
                width,
                height,
                pixels: current.as_raw().clone(),
            });
        }
        levels
    }

    pub fn texel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * BYTES_PER_TEXEL;
        self.pixels.get(at..at + BYTES_PER_TEXEL)?.try_into().ok()
    }

    /// Encode as PNG; used to build in-memory fixtures.
    pub fn to_png(&self) -> AssetResult<Vec<u8>> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::write_buffer_with_format(
            &mut out,
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .map_err(|source| AssetError::Image {
            path: "<memory>".into(),
            source,
        })?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn checkerboard_alternates_every_eight_texels() {
        let tex = TextureData::checkerboard(16);
        assert_eq!(tex.pixels.len(), 16 * 16 * BYTES_PER_TEXEL);
        assert_eq!(tex.texel(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(tex.texel(8, 0), Some([128, 128, 128, 255]));
        assert_eq!(tex.texel(8, 8), Some([255, 255, 255, 255]));
        assert_eq!(tex.texel(16, 0), None);
    }

    #[test]
    fn mip_chain_halves_down_to_one_texel() {
        let chain = TextureData::checkerboard(16).mip_chain();
        let sizes: Vec<_> = chain.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, [(16, 16), (8, 8), (4, 4), (2, 2), (1, 1)]);
        for level in &chain {
            assert_eq!(level.pixels.len(), (level.width * level.height) as usize * BYTES_PER_TEXEL);
        }
        // Two white and two grey cells blend into one light grey texel.
        let last = chain.last().unwrap().texel(0, 0).unwrap();
        assert!(last[0] > 128 && last[0] < 255);
        assert_eq!(last[3], 255);

        let wide = TextureData {
            width: 4,
            height: 1,
            pixels: vec![255; 16],
        };
        let sizes: Vec<_> = wide.mip_chain().iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, [(4, 1), (2, 1), (1, 1)]);
    }

    #[test]
    fn png_survives_a_source() {
        let png = TextureData::checkerboard(4).to_png().unwrap();
        let src = MemorySource::new().with("t/checker.png", png);
        let tex = TextureData::load(&src, Path::new("t/checker.png")).unwrap();
        assert_eq!(tex, TextureData::checkerboard(4));
    }

    #[test]
    fn garbage_bytes_are_an_image_error() {
        let err = TextureData::decode(Path::new("x.png"), b"not an image").unwrap_err();
        assert!(matches!(err, AssetError::Image { .. }));
    }
}
