//! Buffer types and descriptors.

use bitflags::bitflags;

use super::MemoryType;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be bound as a constant buffer.
        const CONSTANT = 1 << 2;
        /// Buffer can be read as a structured buffer in shaders.
        const SHADER_READ = 1 << 3;
        /// Buffer can be written as a structured buffer in shaders.
        const SHADER_READ_WRITE = 1 << 4;
        /// Buffer can be used as an indirect argument buffer.
        const INDIRECT = 1 << 5;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 6;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 7;
        /// Buffer can back an acceleration structure.
        const ACCELERATION_STRUCTURE = 1 << 8;
        /// Buffer can feed geometry or instances to an acceleration-structure build.
        const ACCELERATION_STRUCTURE_BUILD_INPUT = 1 << 9;
        /// Buffer can be used as acceleration-structure build scratch memory.
        const ACCELERATION_STRUCTURE_SCRATCH = 1 << 10;
        /// Buffer can hold a ray tracing shader table.
        const SHADER_RECORD = 1 << 11;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Heap the buffer lives in.
    pub memory: MemoryType,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new device-local buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            memory: MemoryType::DeviceOnly,
            usage,
        }
    }

    /// Create a host-visible buffer the CPU writes and the GPU reads.
    pub fn upload(size: u64, usage: BufferUsage) -> Self {
        Self::new(size, usage).with_memory(MemoryType::Upload)
    }

    /// Create a host-visible buffer the GPU writes and the CPU reads.
    pub fn readback(size: u64) -> Self {
        Self::new(size, BufferUsage::COPY_DST).with_memory(MemoryType::Readback)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the memory heap.
    pub fn with_memory(mut self, memory: MemoryType) -> Self {
        self.memory = memory;
        self
    }
}

/// Element type of an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}
