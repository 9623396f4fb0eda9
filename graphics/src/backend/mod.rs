//! Capability interface every GPU backend implements.
//!
//! The execution engine talks to DirectX 12, Vulkan or Metal exclusively through
//! [`GpuBackend`] (device factory, queue and synchronization operations) and
//! [`CommandList`] (recording). Neither trait exposes which API sits behind it,
//! and engine code never branches on the backend in use.
//!
//! # Available Backends
//!
//! - `dummy` (default feature): a simulated device that keeps real buffer
//!   memory, executes copies and models timeline semaphores per queue. It is
//!   what the test-suite runs on.
//!
//! # Object model
//!
//! Backend objects are identified by opaque `Copy` handles (see [`handles`]).
//! The engine owns their lifetime: objects are destroyed by handing a
//! [`BackendObject`] to [`GpuBackend::destroy`], which the engine only does once
//! the GPU is known to be done with them.
//!
//! All calls return as soon as the work is enqueued; completion is observed
//! through fences and timeline semaphores only.

#[cfg(feature = "dummy")]
pub mod dummy;
pub mod handles;
pub mod types;

use std::any::Any;

use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, ImageDescriptor, QueueIndex, QueueType, SamplerDescriptor, ScissorRect,
    ShaderStages, Viewport,
};

#[cfg(feature = "dummy")]
pub use dummy::{DummyBackend, DummyCommand, DummyStatistics, ExecutedSubmission};
pub use handles::*;
pub use types::*;

/// Where a pipeline state or descriptor set is bound on a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
    RayTracing,
}

/// A native command list being recorded for one queue.
///
/// Lists are created by [`GpuBackend::create_command_list`], recorded, closed
/// with [`finish`](Self::finish) and handed to
/// [`GpuBackend::submit_command_lists`].
pub trait CommandList: Any + Send {
    /// Start a render pass over a frame buffer.
    fn begin_pass(&mut self, pass: &RenderPassBegin<'_>);

    /// End the current render pass.
    fn end_pass(&mut self);

    /// Bind a pipeline state object.
    fn bind_pipeline_state(&mut self, bind_point: PipelineBindPoint, state: PipelineStateHandle);

    /// Bind vertex buffers starting at input slot `first_slot`.
    fn bind_vertex_buffers(&mut self, first_slot: u32, buffers: &[VertexBufferView]);

    /// Bind an index buffer.
    fn bind_index_buffer(&mut self, view: IndexBufferView);

    /// Bind descriptor sets to consecutive spaces starting at `first_space`.
    fn bind_descriptor_sets(
        &mut self,
        bind_point: PipelineBindPoint,
        resources: PipelineResourcesHandle,
        first_space: u32,
        sets: &[DescriptorSetHandle],
    );

    fn set_viewports(&mut self, viewports: &[Viewport]);

    fn set_scissors(&mut self, scissors: &[ScissorRect]);

    /// Copy `size` bytes between buffers.
    fn copy_buffer(
        &mut self,
        source: BufferHandle,
        source_offset: u64,
        destination: BufferHandle,
        destination_offset: u64,
        size: u64,
    );

    fn copy_buffer_to_image(&mut self, copy: &BufferImageCopy);

    fn draw_instanced(
        &mut self,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    );

    fn draw_indexed_instanced(
        &mut self,
        first_index: u32,
        index_count: u32,
        first_vertex: i32,
        first_instance: u32,
        instance_count: u32,
    );

    /// Dispatch `x * y * z` compute thread groups.
    fn run_compute_shader(&mut self, x: u32, y: u32, z: u32);

    fn build_bottom_level_acceleration_structure(
        &mut self,
        geometry: &[BlasGeometry],
        target: AccelerationStructureHandle,
        scratch: BufferHandle,
        scratch_offset: u64,
    );

    fn build_top_level_acceleration_structure(
        &mut self,
        instances: BufferHandle,
        instances_offset: u64,
        instance_count: u32,
        target: AccelerationStructureHandle,
        scratch: BufferHandle,
        scratch_offset: u64,
    );

    fn trace_rays(&mut self, regions: &TraceRaysRegions, width: u32, height: u32, depth: u32);

    /// Record image and buffer transitions as one barrier call.
    fn resource_barrier(&mut self, images: &[ImageBarrier], buffers: &[BufferBarrier]);

    /// Write the GPU clock into slot `index` of `heap`.
    fn query_timestamp(&mut self, heap: TimestampQueryHeapHandle, index: u32);

    /// Close the list for submission.
    fn finish(&mut self);

    /// Downcast support for backends inspecting their own lists on submit.
    fn as_any(&self) -> &dyn Any;
}

/// Device, queue and synchronization operations of one GPU backend.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Types of the queues this device was created with, indexed by [`QueueIndex`].
    fn queue_types(&self) -> &[QueueType];

    // ------------------------------------------------------------------
    // Device object factory
    // ------------------------------------------------------------------

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError>;

    fn create_image2d(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, GraphicsError>;

    fn create_image3d(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, GraphicsError>;

    fn create_image_view(
        &self,
        descriptor: &ImageViewDescriptor,
    ) -> Result<ImageViewHandle, GraphicsError>;

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError>;

    fn create_frame_buffer(
        &self,
        descriptor: &FrameBufferDescriptor<'_>,
    ) -> Result<FrameBufferHandle, GraphicsError>;

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorRangeBinding],
        visibility: ShaderStages,
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError>;

    /// Create a pipeline layout from descriptor set layouts bound at the given spaces.
    fn create_pipeline_resources(
        &self,
        sets: &[SpaceLayout],
    ) -> Result<PipelineResourcesHandle, GraphicsError>;

    fn create_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError>;

    /// Write descriptors into a set. The set must not be in use by the GPU.
    fn write_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    fn create_graphics_pipeline_state(
        &self,
        descriptor: &GraphicsPipelineDescriptor<'_>,
    ) -> Result<PipelineStateHandle, GraphicsError>;

    fn create_compute_pipeline_state(
        &self,
        descriptor: &ComputePipelineDescriptor<'_>,
    ) -> Result<PipelineStateHandle, GraphicsError>;

    fn create_raytracing_pipeline_state(
        &self,
        descriptor: &RaytracingPipelineDescriptor<'_>,
    ) -> Result<PipelineStateHandle, GraphicsError>;

    /// Size in bytes of one shader group handle.
    fn shader_group_handle_size(&self) -> u32;

    /// Required alignment of shader table regions.
    fn shader_table_alignment(&self) -> u32;

    /// Opaque handles of `count` shader groups starting at `first`.
    fn shader_group_handles(&self, pipeline: PipelineStateHandle, first: u32, count: u32)
    -> Vec<u8>;

    fn create_acceleration_structure(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        kind: AccelerationStructureKind,
    ) -> Result<AccelerationStructureHandle, GraphicsError>;

    fn bottom_level_build_sizes(&self, geometry: &[BlasGeometry]) -> BuildSizes;

    fn top_level_build_sizes(&self, instance_count: u32) -> BuildSizes;

    /// Device address used to reference a bottom-level structure from an instance.
    fn acceleration_structure_address(&self, handle: AccelerationStructureHandle) -> u64;

    fn create_timestamp_query_heap(
        &self,
        count: u32,
    ) -> Result<TimestampQueryHeapHandle, GraphicsError>;

    /// Read back `count` timestamps. The writing submissions must have completed.
    fn resolve_timestamps(
        &self,
        heap: TimestampQueryHeapHandle,
        count: u32,
    ) -> Result<Vec<u64>, GraphicsError>;

    /// Timestamp ticks per second on `queue`.
    fn timestamp_frequency(&self, queue: QueueIndex) -> u64;

    fn create_command_list(
        &self,
        queue: QueueIndex,
    ) -> Result<Box<dyn CommandList>, GraphicsError>;

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle, GraphicsError>;

    fn create_timeline_semaphore(
        &self,
        initial_value: u64,
    ) -> Result<TimelineSemaphoreHandle, GraphicsError>;

    fn create_swap_chain(
        &self,
        descriptor: &SwapChainDescriptor,
    ) -> Result<SwapChainHandle, GraphicsError>;

    /// Back buffers of a swap chain, in index order.
    fn swap_chain_images(&self, swap_chain: SwapChainHandle) -> Vec<ImageHandle>;

    /// Index of the back buffer to render into next.
    fn acquire_next_image(&self, swap_chain: SwapChainHandle) -> Result<u32, GraphicsError>;

    /// Recreate the back buffers at a new size. Old back buffer handles become invalid.
    fn resize_swap_chain(
        &self,
        swap_chain: SwapChainHandle,
        size: crate::types::Extent2d,
    ) -> Result<(), GraphicsError>;

    // ------------------------------------------------------------------
    // Queue operations
    // ------------------------------------------------------------------

    fn submit_command_lists(
        &self,
        queue: QueueIndex,
        lists: Vec<Box<dyn CommandList>>,
        synchronization: &QueueSynchronization<'_>,
    ) -> Result<(), GraphicsError>;

    fn present(&self, queue: QueueIndex, swap_chain: SwapChainHandle) -> SwapChainStatus;

    /// Signal `fence` once all work previously submitted to `queue` completes.
    fn signal_fence(&self, queue: QueueIndex, fence: FenceHandle) -> Result<(), GraphicsError>;

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    fn wait_fence(&self, fence: FenceHandle) -> Result<(), GraphicsError>;

    fn is_fence_signaled(&self, fence: FenceHandle) -> bool;

    fn wait_timeline_semaphore(
        &self,
        semaphore: TimelineSemaphoreHandle,
        value: u64,
    ) -> Result<(), GraphicsError>;

    fn timeline_semaphore_value(&self, semaphore: TimelineSemaphoreHandle) -> u64;

    // ------------------------------------------------------------------
    // Host memory access
    // ------------------------------------------------------------------

    /// Write into a host-visible buffer.
    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    /// Read from a host-visible buffer.
    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError>;

    /// Destroy an object. The GPU must no longer be using it.
    fn destroy(&self, object: BackendObject);
}

static_assertions::assert_obj_safe!(GpuBackend, CommandList);
