//! Image formats, usage flags, mip ranges and descriptors.

use std::ops::Range;

use super::{Extent3d, MemoryType};
use bitflags::bitflags;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit red channel, signed normalized.
    R8Snorm,
    /// 8-bit red channel, unsigned integer.
    R8Uint,
    /// 8-bit red channel, signed integer.
    R8Sint,

    // 16-bit formats
    /// 16-bit red channel, unsigned normalized.
    R16Unorm,
    /// 16-bit red channel, float.
    R16Float,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,

    // 128-bit formats
    /// 32-bit RGBA channels, float.
    Rgba32Float,

    // Depth/stencil formats
    /// 16-bit depth.
    Depth16Unorm,
    /// 24-bit depth.
    Depth24Plus,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit depth, float.
    Depth32Float,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24Plus
                | Self::Depth24PlusStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }

    /// Returns the size in bytes per pixel/block.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm | Self::R8Snorm | Self::R8Uint | Self::R8Sint => 1,
            Self::R16Unorm | Self::R16Float | Self::Rg8Unorm | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24Plus
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Ways an image may be accessed over its lifetime.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Image can be copied from.
        const COPY_SRC = 1 << 0;
        /// Image can be copied to.
        const COPY_DST = 1 << 1;
        /// Image can be sampled or read in a shader.
        const SHADER_READ = 1 << 2;
        /// Image can be written as a storage image.
        const SHADER_READ_WRITE = 1 << 3;
        /// Image can be a color render target.
        const COLOR_RENDER_TARGET = 1 << 4;
        /// Image can be a depth-stencil render target.
        const DEPTH_STENCIL_RENDER_TARGET = 1 << 5;
    }
}

impl Default for ImageUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Memory layout of image texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageTiling {
    /// Driver-chosen layout.
    #[default]
    Optimal,
    /// Row-major layout, for host access.
    Linear,
}

/// Dimensionality of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageDimension {
    #[default]
    D2,
    D3,
}

/// Contiguous range of mip levels.
///
/// A count of [`MipRange::REMAINING`] extends the range to the last mip of
/// whichever image it is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MipRange {
    /// First mip in the range.
    pub first: u32,
    /// Number of mips, or [`MipRange::REMAINING`].
    pub count: u32,
}

impl MipRange {
    /// Sentinel count meaning "up to the last mip".
    pub const REMAINING: u32 = u32::MAX;

    /// Every mip of the image.
    pub const fn all() -> Self {
        Self {
            first: 0,
            count: Self::REMAINING,
        }
    }

    /// A single mip level.
    pub const fn only(level: u32) -> Self {
        Self {
            first: level,
            count: 1,
        }
    }

    /// `count` levels starting at `first`.
    pub const fn new(first: u32, count: u32) -> Self {
        Self { first, count }
    }

    /// Concrete levels of an image with `mip_levels` mips.
    ///
    /// # Panics
    ///
    /// Panics if the range starts past the last mip or extends past it.
    pub fn resolve(&self, mip_levels: u32) -> Range<u32> {
        assert!(
            self.first < mip_levels,
            "contract violation: mip {} requested on an image with {} mip(s)",
            self.first,
            mip_levels
        );
        if self.count == Self::REMAINING {
            return self.first..mip_levels;
        }
        let end = self.first + self.count;
        assert!(
            end <= mip_levels,
            "contract violation: mips {}..{} requested on an image with {} mip(s)",
            self.first,
            end,
            mip_levels
        );
        self.first..end
    }
}

impl Default for MipRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Descriptor for creating an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    /// Debug label for the image.
    pub label: Option<String>,
    /// Size of mip 0.
    pub size: Extent3d,
    /// 2D or 3D.
    pub dimension: ImageDimension,
    /// Mip level count.
    pub mip_levels: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// Texel layout.
    pub tiling: ImageTiling,
    /// Usage flags.
    pub usage: ImageUsage,
    /// Heap the image lives in.
    pub memory: MemoryType,
}

impl ImageDescriptor {
    /// Create a new 2D image descriptor with one mip.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: ImageUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            dimension: ImageDimension::D2,
            mip_levels: 1,
            format,
            tiling: ImageTiling::Optimal,
            usage,
            memory: MemoryType::DeviceOnly,
        }
    }

    /// Create a new 3D image descriptor with one mip.
    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        usage: ImageUsage,
    ) -> Self {
        Self {
            size: Extent3d::new_3d(width, height, depth),
            dimension: ImageDimension::D3,
            ..Self::new_2d(width, height, format, usage)
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_levels = count;
        self
    }

    /// Use a full mip chain down to 1x1.
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = self.size.max_mip_levels();
        self
    }

    /// Set the texel tiling.
    pub fn with_tiling(mut self, tiling: ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_range_resolve() {
        assert_eq!(MipRange::all().resolve(5), 0..5);
        assert_eq!(MipRange::only(3).resolve(5), 3..4);
        assert_eq!(MipRange::new(1, 2).resolve(5), 1..3);
        assert_eq!(MipRange::new(2, MipRange::REMAINING).resolve(5), 2..5);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_mip_range_past_end() {
        let _ = MipRange::new(3, 4).resolve(5);
    }

    #[test]
    fn test_descriptor_builders() {
        let desc = ImageDescriptor::new_2d(
            128,
            64,
            TextureFormat::Rgba8Unorm,
            ImageUsage::SHADER_READ,
        )
        .with_label("albedo")
        .with_full_mip_chain();
        assert_eq!(desc.mip_levels, 8);
        assert_eq!(desc.label.as_deref(), Some("albedo"));

        let volume = ImageDescriptor::new_3d(
            16,
            16,
            16,
            TextureFormat::R16Float,
            ImageUsage::SHADER_READ_WRITE,
        );
        assert_eq!(volume.dimension, ImageDimension::D3);
        assert_eq!(volume.size.depth, 16);
    }

    #[test]
    fn test_format_queries() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(TextureFormat::Depth24PlusStencil8.has_stencil());
        assert_eq!(TextureFormat::Rgba16Float.block_size(), 8);
    }
}
