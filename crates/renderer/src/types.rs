//! Backend-neutral resource ids, formats and descriptors.

use bitflags::bitflags;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

resource_id!(
    /// Handle for a GPU buffer.
    BufferId
);
resource_id!(
    /// Handle for a GPU texture (storage only; bind through a view).
    TextureId
);
resource_id!(
    /// Handle for a typed view of a texture.
    ViewId
);
resource_id!(
    /// Handle for a sampler state.
    SamplerId
);
resource_id!(
    /// Handle for a compiled shader program.
    ProgramId
);

/// Pixel formats known to the engine.
///
/// Depth surfaces that are also sampled use a typeless storage format with
/// two typed views: a `Depth*` view for depth testing and a color-typed view
/// for shader reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R32Float,
    R16Unorm,
    Depth16Unorm,
    Depth24UnormS8,
    Depth32Float,
    Depth32FloatS8,
    R16Typeless,
    R24G8Typeless,
    R32Typeless,
    R32G8X24Typeless,
    R24UnormX8,
    R32FloatX8X24,
}

impl TextureFormat {
    /// Typed depth(-stencil) formats usable by a depth target view.
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth16Unorm
                | TextureFormat::Depth24UnormS8
                | TextureFormat::Depth32Float
                | TextureFormat::Depth32FloatS8
        )
    }

    pub fn is_typeless(self) -> bool {
        matches!(
            self,
            TextureFormat::R16Typeless
                | TextureFormat::R24G8Typeless
                | TextureFormat::R32Typeless
                | TextureFormat::R32G8X24Typeless
        )
    }

    /// Formats a render target view may use.
    pub fn is_color_renderable(self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8Unorm
                | TextureFormat::Rgba8UnormSrgb
                | TextureFormat::Bgra8Unorm
                | TextureFormat::Bgra8UnormSrgb
                | TextureFormat::Rgba16Float
                | TextureFormat::Rgba32Float
                | TextureFormat::Rg16Float
                | TextureFormat::R32Float
                | TextureFormat::R16Unorm
        )
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R16Unorm | TextureFormat::Depth16Unorm | TextureFormat::R16Typeless => 2,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Depth32FloatS8
            | TextureFormat::R32G8X24Typeless
            | TextureFormat::R32FloatX8X24 => 8,
            _ => 4,
        }
    }

    /// Whether whole-texture copies between the two formats are allowed.
    /// Formats differing only in sRGB encoding copy freely, as do typeless
    /// depth storage and the depth format it backs.
    pub fn is_copy_compatible(self, other: TextureFormat) -> bool {
        self.copy_family() == other.copy_family()
    }

    fn copy_family(self) -> TextureFormat {
        match self {
            TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8Unorm,
            TextureFormat::Depth16Unorm => TextureFormat::R16Typeless,
            TextureFormat::Depth24UnormS8 => TextureFormat::R24G8Typeless,
            TextureFormat::Depth32Float => TextureFormat::R32Typeless,
            TextureFormat::Depth32FloatS8 => TextureFormat::R32G8X24Typeless,
            other => other,
        }
    }

    /// Whether a view typed as `view` may be created over storage `self`.
    pub fn is_view_compatible(self, view: TextureFormat) -> bool {
        if self == view {
            return !view.is_typeless();
        }
        matches!(
            (self, view),
            (
                TextureFormat::R16Typeless,
                TextureFormat::Depth16Unorm | TextureFormat::R16Unorm
            ) | (
                TextureFormat::R24G8Typeless,
                TextureFormat::Depth24UnormS8 | TextureFormat::R24UnormX8
            ) | (
                TextureFormat::R32Typeless,
                TextureFormat::Depth32Float | TextureFormat::R32Float
            ) | (
                TextureFormat::R32G8X24Typeless,
                TextureFormat::Depth32FloatS8 | TextureFormat::R32FloatX8X24
            )
        )
    }
}

/// Depth attachment formats and their derived storage/view formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    D16Unorm,
    D24UnormS8,
    D32Float,
    D32FloatS8,
}

impl DepthFormat {
    /// Format of the depth-test view.
    pub fn target_format(self) -> TextureFormat {
        match self {
            DepthFormat::D16Unorm => TextureFormat::Depth16Unorm,
            DepthFormat::D24UnormS8 => TextureFormat::Depth24UnormS8,
            DepthFormat::D32Float => TextureFormat::Depth32Float,
            DepthFormat::D32FloatS8 => TextureFormat::Depth32FloatS8,
        }
    }

    /// Typeless storage that admits both a depth view and a shader view.
    pub fn storage_format(self) -> TextureFormat {
        match self {
            DepthFormat::D16Unorm => TextureFormat::R16Typeless,
            DepthFormat::D24UnormS8 => TextureFormat::R24G8Typeless,
            DepthFormat::D32Float => TextureFormat::R32Typeless,
            DepthFormat::D32FloatS8 => TextureFormat::R32G8X24Typeless,
        }
    }

    /// Format of the shader-read view.
    pub fn shader_format(self) -> TextureFormat {
        match self {
            DepthFormat::D16Unorm => TextureFormat::R16Unorm,
            DepthFormat::D24UnormS8 => TextureFormat::R24UnormX8,
            DepthFormat::D32Float => TextureFormat::R32Float,
            DepthFormat::D32FloatS8 => TextureFormat::R32FloatX8X24,
        }
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, DepthFormat::D24UnormS8 | DepthFormat::D32FloatS8)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_TARGET = 1 << 1;
        const SHADER_READ = 1 << 2;
        const COPY_SRC = 1 << 3;
        const COPY_DST = 1 << 4;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const COPY_DST = 1 << 3;
    }
}

/// Immutable buffer created with its full contents.
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub usage: BufferUsage,
    pub contents: &'a [u8],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Levels in the mip chain, 1 for render targets.
    pub mip_levels: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
}

impl TextureDesc<'_> {
    /// Extent of mip `level`; each level halves the previous one, down to 1.
    pub fn mip_size(&self, level: u32) -> (u32, u32) {
        mip_size(self.width, self.height, level)
    }

    /// Byte length of tightly packed initial data: every level, largest
    /// first.
    pub fn data_len(&self) -> usize {
        let bpp = self.format.bytes_per_pixel() as usize;
        (0..self.mip_levels)
            .map(|level| {
                let (w, h) = self.mip_size(level);
                w as usize * h as usize * bpp
            })
            .sum()
    }
}

/// Number of levels in a full mip chain for a `width` x `height` image.
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub fn mip_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// Role a view plays when bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderRead,
    RenderTarget,
    DepthTarget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    pub kind: ViewKind,
    pub format: TextureFormat,
}

impl ViewDesc {
    pub fn shader_read(format: TextureFormat) -> Self {
        Self {
            kind: ViewKind::ShaderRead,
            format,
        }
    }

    pub fn render_target(format: TextureFormat) -> Self {
        Self {
            kind: ViewKind::RenderTarget,
            format,
        }
    }

    pub fn depth_target(format: TextureFormat) -> Self {
        Self {
            kind: ViewKind::DepthTarget,
            format,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Clamp,
    Mirror,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub address: AddressMode,
    pub compare: Option<CompareFunction>,
    pub lod_min: f32,
    pub lod_max: f32,
}

impl SamplerDesc {
    /// Trilinear filtering, wrapping on every axis, full mip range.
    pub fn linear_wrap() -> Self {
        Self {
            filter: FilterMode::Linear,
            address: AddressMode::Wrap,
            compare: None,
            lod_min: 0.0,
            lod_max: f32::MAX,
        }
    }

    pub fn nearest_clamp() -> Self {
        Self {
            filter: FilterMode::Nearest,
            address: AddressMode::Clamp,
            compare: None,
            lod_min: 0.0,
            lod_max: f32::MAX,
        }
    }
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self::linear_wrap()
    }
}

/// Width of one element in an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexFormat {
    U8,
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> usize {
        match self {
            IndexFormat::U8 => 1,
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }

    /// Narrowest width able to hold `max_index`.
    pub fn narrowest_for(max_index: u32) -> Self {
        if max_index <= u8::MAX as u32 {
            IndexFormat::U8
        } else if max_index <= u16::MAX as u32 {
            IndexFormat::U16
        } else {
            IndexFormat::U32
        }
    }

    pub fn fits(self, max_index: u32) -> bool {
        self >= Self::narrowest_for(max_index)
    }

    /// Next wider format, if any.
    pub fn wider(self) -> Option<Self> {
        match self {
            IndexFormat::U8 => Some(IndexFormat::U16),
            IndexFormat::U16 => Some(IndexFormat::U32),
            IndexFormat::U32 => None,
        }
    }

    /// Pack indices into little-endian bytes of this width.
    pub fn pack(self, indices: &[u32]) -> Vec<u8> {
        match self {
            IndexFormat::U8 => indices.iter().map(|&i| i as u8).collect(),
            IndexFormat::U16 => indices
                .iter()
                .flat_map(|&i| (i as u16).to_le_bytes())
                .collect(),
            IndexFormat::U32 => bytemuck::cast_slice(indices).to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Topology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowest_index_width() {
        assert_eq!(IndexFormat::narrowest_for(0), IndexFormat::U8);
        assert_eq!(IndexFormat::narrowest_for(255), IndexFormat::U8);
        assert_eq!(IndexFormat::narrowest_for(256), IndexFormat::U16);
        assert_eq!(IndexFormat::narrowest_for(65_535), IndexFormat::U16);
        assert_eq!(IndexFormat::narrowest_for(65_536), IndexFormat::U32);
        assert!(IndexFormat::U32.fits(300));
        assert!(!IndexFormat::U8.fits(300));
    }

    #[test]
    fn index_packing_widths() {
        assert_eq!(IndexFormat::U8.pack(&[0, 1, 2]), vec![0, 1, 2]);
        assert_eq!(IndexFormat::U16.pack(&[1, 258]), vec![1, 0, 2, 1]);
        assert_eq!(IndexFormat::U32.pack(&[1]).len(), 4);
    }

    #[test]
    fn mip_chain_sizes() {
        assert_eq!(max_mip_levels(1, 1), 1);
        assert_eq!(max_mip_levels(8, 8), 4);
        assert_eq!(max_mip_levels(256, 16), 9);
        assert_eq!(max_mip_levels(5, 3), 3);
        assert_eq!(mip_size(256, 16, 6), (4, 1));

        let desc = TextureDesc {
            label: "t",
            width: 8,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
            mip_levels: 4,
            sample_count: 1,
            usage: TextureUsage::SHADER_READ,
        };
        // 8x4, 4x2, 2x1, 1x1
        assert_eq!(desc.data_len(), (32 + 8 + 2 + 1) * 4);
    }

    #[test]
    fn depth_formats_derive_compatible_views() {
        for depth in [
            DepthFormat::D16Unorm,
            DepthFormat::D24UnormS8,
            DepthFormat::D32Float,
            DepthFormat::D32FloatS8,
        ] {
            let storage = depth.storage_format();
            assert!(storage.is_typeless());
            assert!(storage.is_view_compatible(depth.target_format()));
            assert!(storage.is_view_compatible(depth.shader_format()));
            assert!(!storage.is_view_compatible(storage));
            assert!(depth.target_format().is_depth());
        }
        assert!(!TextureFormat::R32Typeless.is_view_compatible(TextureFormat::Depth16Unorm));
        assert!(TextureFormat::Rgba8Unorm.is_view_compatible(TextureFormat::Rgba8Unorm));
        assert!(TextureFormat::Rgba8Unorm.is_copy_compatible(TextureFormat::Rgba8UnormSrgb));
        assert!(TextureFormat::R32Typeless.is_copy_compatible(TextureFormat::Depth32Float));
        assert!(!TextureFormat::Rgba8Unorm.is_copy_compatible(TextureFormat::Rgba16Float));
    }
}
