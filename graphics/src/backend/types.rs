//! Plain data passed across the backend seam.

use bytemuck::{Pod, Zeroable};

use super::handles::{
    AccelerationStructureHandle, BufferHandle, DescriptorSetLayoutHandle, FenceHandle,
    FrameBufferHandle, ImageHandle, ImageViewHandle, PipelineResourcesHandle, SamplerHandle,
    TimelineSemaphoreHandle,
};
use crate::shader::Shader;
use crate::types::{
    BufferAccess, ClearValue, DescriptorType, Extent2d, Extent3d, ImageAccess, ImageDimension,
    IndexFormat, InputBufferLayout, PipelineState, PrimitiveTopology, TextureFormat, VertexFormat,
};

// ============================================================================
// Barriers
// ============================================================================

/// Access transition of a contiguous mip range of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub first_mip: u32,
    pub mip_count: u32,
    pub from: ImageAccess,
    pub to: ImageAccess,
}

/// Access transition of a whole buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub from: BufferAccess,
    pub to: BufferAccess,
}

// ============================================================================
// Queue synchronization
// ============================================================================

/// A timeline semaphore paired with the value to wait for or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreValue {
    pub semaphore: TimelineSemaphoreHandle,
    pub value: u64,
}

/// Synchronization attached to one queue submission.
///
/// Waits are satisfied before any list in the submission starts; signals and
/// the fence fire after all of them complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSynchronization<'a> {
    pub waits: &'a [SemaphoreValue],
    pub signals: &'a [SemaphoreValue],
    pub fence: Option<FenceHandle>,
}

/// Result of presenting a swap chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwapChainStatus {
    /// Presented normally.
    #[default]
    Ok,
    /// Presented, but the swap chain no longer matches the surface exactly.
    Suboptimal,
    /// Not presented; the swap chain must be resized first.
    OutOfDate,
}

/// Parameters of a swap chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainDescriptor {
    pub size: Extent2d,
    pub format: TextureFormat,
    pub image_count: u32,
}

// ============================================================================
// Views and frame buffers
// ============================================================================

/// Parameters of an image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewDescriptor {
    pub image: ImageHandle,
    pub dimension: ImageDimension,
    pub format: TextureFormat,
    pub first_mip: u32,
    pub mip_count: u32,
}

/// Render targets bound together for one pass.
#[derive(Debug, Clone, Copy)]
pub struct FrameBufferDescriptor<'a> {
    pub color: &'a [ImageViewHandle],
    pub depth_stencil: Option<ImageViewHandle>,
    pub size: Extent2d,
}

/// Arguments of [`CommandList::begin_pass`](super::CommandList::begin_pass).
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin<'a> {
    pub frame_buffer: FrameBufferHandle,
    pub size: Extent2d,
    pub color_clears: &'a [ClearValue],
    pub depth_stencil_clear: ClearValue,
}

// ============================================================================
// Descriptors
// ============================================================================

/// One register range in a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorRangeBinding {
    pub register: u32,
    pub count: u32,
    pub ty: DescriptorType,
}

/// What a descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    Image(ImageViewHandle),
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        stride: u32,
    },
    ConstantBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Sampler(SamplerHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

/// A write of one descriptor into a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorWrite {
    pub register: u32,
    pub array_index: u32,
    pub ty: DescriptorType,
    pub resource: DescriptorResource,
}

/// Layout of a descriptor set together with the space it is bound at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceLayout {
    pub space: u32,
    pub layout: DescriptorSetLayoutHandle,
}

// ============================================================================
// Pipelines
// ============================================================================

/// Everything needed to create a graphics pipeline state object.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDescriptor<'a> {
    pub resources: PipelineResourcesHandle,
    pub vertex_shader: &'a Shader,
    pub pixel_shader: &'a Shader,
    pub input_buffers: &'a [InputBufferLayout],
    pub color_formats: &'a [TextureFormat],
    pub depth_stencil_format: Option<TextureFormat>,
    pub state: &'a PipelineState,
    pub topology: PrimitiveTopology,
}

/// Everything needed to create a compute pipeline state object.
#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineDescriptor<'a> {
    pub resources: PipelineResourcesHandle,
    pub shader: &'a Shader,
}

/// A hit group of a ray tracing pipeline.
#[derive(Debug, Clone, Copy)]
pub struct HitGroupDescriptor<'a> {
    pub closest_hit: Option<&'a Shader>,
    pub any_hit: Option<&'a Shader>,
}

/// Everything needed to create a ray tracing pipeline state object.
///
/// Shader groups are numbered ray generation first, then miss shaders, then
/// hit groups.
#[derive(Debug, Clone, Copy)]
pub struct RaytracingPipelineDescriptor<'a> {
    pub resources: PipelineResourcesHandle,
    pub ray_generation: &'a Shader,
    pub miss: &'a [Shader],
    pub hit_groups: &'a [HitGroupDescriptor<'a>],
    pub max_recursion_depth: u32,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
}

// ============================================================================
// Draw inputs and copies
// ============================================================================

/// A vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBufferView {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub stride: u32,
}

/// An index buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBufferView {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub format: IndexFormat,
}

/// Copy of tightly packed texel rows from a buffer into one image mip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferImageCopy {
    pub buffer: BufferHandle,
    pub buffer_offset: u64,
    /// Bytes between rows in the buffer.
    pub row_pitch: u32,
    pub image: ImageHandle,
    pub mip: u32,
    pub size: Extent3d,
    pub format: TextureFormat,
}

// ============================================================================
// Ray tracing
// ============================================================================

/// Triangle geometry input of a bottom-level build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasGeometry {
    pub vertex_buffer: BufferHandle,
    pub vertex_offset: u64,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub vertex_format: VertexFormat,
    pub index_buffer: Option<IndexBufferView>,
    pub index_count: u32,
    pub opaque: bool,
}

impl BlasGeometry {
    /// Number of triangles the geometry contributes.
    pub fn triangle_count(&self) -> u32 {
        match self.index_buffer {
            Some(_) => self.index_count / 3,
            None => self.vertex_count / 3,
        }
    }
}

/// Memory requirements of an acceleration-structure build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildSizes {
    pub acceleration_structure_size: u64,
    pub build_scratch_size: u64,
}

/// Whether an acceleration structure holds geometry or instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureKind {
    BottomLevel,
    TopLevel,
}

/// GPU layout of one top-level instance (64 bytes, shared by DXR and Vulkan).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceDescription {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    /// Low 24 bits: instance id. High 8 bits: visibility mask.
    pub id_and_mask: u32,
    /// Low 24 bits: hit group offset. High 8 bits: instance flags.
    pub hit_group_offset_and_flags: u32,
    /// Device address of the bottom-level structure.
    pub acceleration_structure_address: u64,
}

impl InstanceDescription {
    /// Size of one instance in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Pack an instance.
    pub fn new(
        transform: [f32; 12],
        id: u32,
        mask: u8,
        hit_group_offset: u32,
        flags: u8,
        acceleration_structure_address: u64,
    ) -> Self {
        Self {
            transform,
            id_and_mask: (id & 0x00ff_ffff) | ((mask as u32) << 24),
            hit_group_offset_and_flags: (hit_group_offset & 0x00ff_ffff) | ((flags as u32) << 24),
            acceleration_structure_address,
        }
    }
}

static_assertions::const_assert_eq!(std::mem::size_of::<InstanceDescription>(), 64);

/// A contiguous run of shader records in a shader table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderTableRegion {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub stride: u64,
    pub size: u64,
}

/// Shader table regions consumed by one `trace_rays` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceRaysRegions {
    pub ray_generation: ShaderTableRegion,
    pub miss: ShaderTableRegion,
    pub hit_group: ShaderTableRegion,
}
