//! Common types shared across the execution engine.

// ============================================================================
// Queues
// ============================================================================

/// Kind of hardware queue a [`QueueIndex`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Graphics queue: accepts every command.
    Graphics,
    /// Async compute queue: compute, copies and acceleration-structure builds.
    Compute,
    /// Transfer queue: copies only.
    Copy,
}

impl QueueType {
    /// Whether commands that rasterize (passes, draws, present) may run here.
    pub fn supports_graphics(&self) -> bool {
        matches!(self, Self::Graphics)
    }

    /// Whether compute work (dispatches, ray tracing, AS builds) may run here.
    pub fn supports_compute(&self) -> bool {
        matches!(self, Self::Graphics | Self::Compute)
    }
}

/// Index of a queue in the execution context's queue list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueIndex(pub u32);

impl QueueIndex {
    /// The index as a `usize` for slice access.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for QueueIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Memory heap a backend object is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// GPU-local memory, not host visible.
    #[default]
    DeviceOnly,
    /// Host-visible memory written by the CPU and read by the GPU.
    Upload,
    /// Host-visible memory written by the GPU and read back by the CPU.
    Readback,
}

impl MemoryType {
    /// Whether the CPU can write or read this memory directly.
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, Self::DeviceOnly)
    }
}

// ============================================================================
// Viewport
// ============================================================================

/// Viewport configuration for rendering.
///
/// Depth range follows the `[0, 1]` convention with origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// X coordinate of the viewport's top-left corner.
    pub x: f32,
    /// Y coordinate of the viewport's top-left corner.
    pub y: f32,
    /// Width of the viewport.
    pub width: f32,
    /// Height of the viewport.
    pub height: f32,
    /// Minimum depth value (default: 0.0).
    pub min_depth: f32,
    /// Maximum depth value (default: 1.0).
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    /// Create a viewport covering `extent` with the full depth range.
    pub fn covering(extent: Extent2d) -> Self {
        Self {
            width: extent.width as f32,
            height: extent.height as f32,
            ..Self::default()
        }
    }
}

/// Scissor rectangle for clipping rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    /// X coordinate of the top-left corner.
    pub x: i32,
    /// Y coordinate of the top-left corner.
    pub y: i32,
    /// Width of the scissor rectangle.
    pub width: u32,
    /// Height of the scissor rectangle.
    pub height: u32,
}

impl ScissorRect {
    /// Create a scissor rectangle covering `extent`.
    pub fn covering(extent: Extent2d) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }
}

// ============================================================================
// Extents
// ============================================================================

/// 2D extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2d {
    /// Create a new 2D extent.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of mip `level` of an image with this base size.
    pub fn mip(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
        }
    }
}

/// 3D extent for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels (1 for 2D images).
    pub depth: u32,
}

impl Extent3d {
    /// Create a new 2D extent.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Create a new 3D extent.
    pub fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Width and height, dropping depth.
    pub fn to_2d(&self) -> Extent2d {
        Extent2d::new(self.width, self.height)
    }

    /// Largest number of mip levels a chain starting at this size can have.
    pub fn max_mip_levels(&self) -> u32 {
        let largest = self.width.max(self.height).max(self.depth).max(1);
        32 - largest.leading_zeros()
    }
}

// ============================================================================
// Clear values
// ============================================================================

/// Clear value for render targets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClearValue {
    /// Keep the previous contents.
    #[default]
    Load,
    /// Contents are undefined at pass start.
    DontCare,
    /// Clear color attachment with RGBA values.
    Color { r: f32, g: f32, b: f32, a: f32 },
    /// Clear depth and stencil attachments.
    DepthStencil { depth: f32, stencil: u8 },
}

impl ClearValue {
    /// Create a color clear value.
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Color { r, g, b, a }
    }

    /// Create a depth clear value with stencil zeroed.
    pub fn depth(value: f32) -> Self {
        Self::DepthStencil {
            depth: value,
            stencil: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_mip_levels() {
        assert_eq!(Extent3d::new_2d(1, 1).max_mip_levels(), 1);
        assert_eq!(Extent3d::new_2d(256, 256).max_mip_levels(), 9);
        assert_eq!(Extent3d::new_2d(300, 17).max_mip_levels(), 9);
        assert_eq!(Extent3d::new_3d(4, 4, 64).max_mip_levels(), 7);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let size = Extent2d::new(64, 8);
        assert_eq!(size.mip(3), Extent2d::new(8, 1));
        assert_eq!(size.mip(10), Extent2d::new(1, 1));
    }

    #[test]
    fn test_queue_capabilities() {
        assert!(QueueType::Graphics.supports_graphics());
        assert!(QueueType::Compute.supports_compute());
        assert!(!QueueType::Copy.supports_compute());
        assert_eq!(QueueIndex(2).to_string(), "queue#2");
    }
}
