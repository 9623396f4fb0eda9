//! GPU access states tracked per image sub-resource and per buffer.
//!
//! Image layouts are mutually exclusive, so [`ImageAccess`] is a plain enum.
//! Buffers have no layout and several read-only accesses can be in effect at
//! once, so [`BufferAccess`] is a flag set.

use bitflags::bitflags;

/// Access state of one image mip (or one swap-chain back buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageAccess {
    /// Contents are undefined. Every image starts here.
    #[default]
    Undefined,
    /// Sampled or read as a storage image.
    ShaderRead,
    /// Read and written as a storage image.
    ShaderReadWrite,
    /// Bound as a color render target.
    ColorRenderTarget,
    /// Bound as a depth-stencil target with writes enabled.
    DepthStencilWrite,
    /// Bound as a read-only depth-stencil target.
    DepthStencilRead,
    /// Source of a copy.
    CopySource,
    /// Destination of a copy.
    CopyDestination,
    /// Handed to the presentation engine.
    Present,
}

impl ImageAccess {
    /// Whether the GPU may write the image in this state.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::ShaderReadWrite
                | Self::ColorRenderTarget
                | Self::DepthStencilWrite
                | Self::CopyDestination
        )
    }

    /// Whether two requests for the same mip can be in effect at the same time.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self == other
    }
}

bitflags! {
    /// Access state of a buffer. The empty set is the undefined state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferAccess: u32 {
        /// Read as vertex input.
        const VERTEX = 1 << 0;
        /// Read as index input.
        const INDEX = 1 << 1;
        /// Read as a constant buffer.
        const CONSTANT = 1 << 2;
        /// Read as a structured buffer.
        const SHADER_READ = 1 << 3;
        /// Written as a structured buffer.
        const SHADER_WRITE = 1 << 4;
        /// Read as indirect arguments.
        const INDIRECT = 1 << 5;
        /// Source of a copy.
        const COPY_SOURCE = 1 << 6;
        /// Destination of a copy.
        const COPY_DESTINATION = 1 << 7;
        /// Geometry or instance input of an acceleration-structure build.
        const ACCELERATION_STRUCTURE_BUILD_INPUT = 1 << 8;
        /// Scratch memory of an acceleration-structure build.
        const ACCELERATION_STRUCTURE_SCRATCH = 1 << 9;
        /// Acceleration structure read by ray queries or trace calls.
        const ACCELERATION_STRUCTURE_READ = 1 << 10;
        /// Acceleration structure written by a build.
        const ACCELERATION_STRUCTURE_WRITE = 1 << 11;
        /// Read as a ray tracing shader table.
        const SHADER_RECORD = 1 << 12;

        /// Accesses that modify the buffer.
        const WRITES = Self::SHADER_WRITE.bits()
            | Self::COPY_DESTINATION.bits()
            | Self::ACCELERATION_STRUCTURE_SCRATCH.bits()
            | Self::ACCELERATION_STRUCTURE_WRITE.bits();
    }
}

impl Default for BufferAccess {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferAccess {
    /// The undefined state every buffer starts in.
    pub const UNDEFINED: Self = Self::empty();

    /// Read-write structured buffer access.
    pub fn shader_read_write() -> Self {
        Self::SHADER_READ | Self::SHADER_WRITE
    }

    /// Whether this state includes a write.
    pub fn is_write(&self) -> bool {
        self.intersects(Self::WRITES)
    }

    /// Combine two requests that are in effect at the same time.
    ///
    /// Read-only accesses accumulate. A write is only compatible with an
    /// identical request. Returns `None` when the two cannot coexist.
    pub fn merge(self, other: Self) -> Option<Self> {
        if self == other {
            Some(self)
        } else if !self.is_write() && !other.is_write() {
            Some(self | other)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_access_writes() {
        assert!(!ImageAccess::Undefined.is_write());
        assert!(!ImageAccess::ShaderRead.is_write());
        assert!(ImageAccess::ShaderReadWrite.is_write());
        assert!(ImageAccess::ColorRenderTarget.is_write());
        assert!(!ImageAccess::Present.is_write());
    }

    #[test]
    fn test_buffer_reads_merge() {
        let merged = BufferAccess::VERTEX
            .merge(BufferAccess::CONSTANT)
            .unwrap();
        assert_eq!(merged, BufferAccess::VERTEX | BufferAccess::CONSTANT);
        assert!(!merged.is_write());
    }

    #[test]
    fn test_buffer_write_conflicts() {
        assert_eq!(
            BufferAccess::shader_read_write().merge(BufferAccess::shader_read_write()),
            Some(BufferAccess::shader_read_write())
        );
        assert_eq!(
            BufferAccess::SHADER_READ.merge(BufferAccess::COPY_DESTINATION),
            None
        );
        assert!(BufferAccess::UNDEFINED.is_empty());
    }
}
