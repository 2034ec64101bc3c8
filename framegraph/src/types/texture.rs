//! Texture descriptors, formats and usage flags of transient and imported images.

use super::Extent3d;
use bitflags::bitflags;

/// Texel format of an image resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// Single 8-bit unorm channel, e.g. ambient occlusion.
    R8Unorm,
    R16Float,
    R32Float,
    /// Object ids and other integer payloads.
    R32Uint,
    /// Two half-float channels, e.g. motion vectors.
    Rg16Float,
    /// The default color format.
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    /// Typical swapchain format.
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgb10a2Unorm,
    /// HDR color.
    Rgba16Float,
    Rgba32Float,
    Depth16Unorm,
    Depth24PlusStencil8,
    Depth32Float,
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Check if the format has a depth and/or stencil aspect.
    ///
    /// Decides the memory class a transient of this format is placed in.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24PlusStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Check if the format carries a stencil aspect.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }

    /// Bytes per texel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Float | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgb10a2Unorm
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Ways an image may be used.
    ///
    /// Transients get the flags their declared accesses imply on top of these;
    /// imported images are limited to what they declare.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        /// Sampled by shaders.
        const TEXTURE_BINDING = 1 << 2;
        /// Read or written as a storage image.
        const STORAGE_BINDING = 1 << 3;
        /// Color or depth-stencil attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

/// Shape, format and usage of an image resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Name given to the backend. Transients default to their resource name.
    pub label: Option<String>,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// A single-mip, single-sample 2D image.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            mip_level_count: 1,
            sample_count: 1,
            format,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Multisampled images take `count` times the memory.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Size in bytes of all mips, layers and samples, before alignment.
    pub fn byte_size(&self) -> u64 {
        let texel = self.format.block_size() as u64 * self.sample_count.max(1) as u64;
        (0..self.mip_level_count.max(1))
            .map(|level| {
                let extent = self.size.mip_level(level);
                extent.width as u64 * extent.height as u64 * extent.depth.max(1) as u64 * texel
            })
            .sum()
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self::new_2d(1, 1, TextureFormat::default(), TextureUsage::empty())
    }
}
