//! Common types and descriptors for frame graph resources.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! used when declaring transient and imported resources.

mod buffer;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};

/// 3D extent (width, height, depth or array layers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth (3D textures) or array layer count.
    pub depth: u32,
}

impl Extent3d {
    /// Create a new extent.
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Create a 2D extent with a single layer.
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self::new(width, height, 1)
    }

    /// Extent of the given mip level, clamped to one texel per axis.
    pub fn mip_level(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: self.depth,
        }
    }
}

impl Default for Extent3d {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_clamps() {
        let extent = Extent3d::new_2d(8, 2);
        assert_eq!(extent.mip_level(1), Extent3d::new_2d(4, 1));
        assert_eq!(extent.mip_level(3), Extent3d::new_2d(1, 1));
    }
}
