//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU but simulates one closely enough to test
//! the execution engine end to end:
//!
//! - buffers and images own real bytes; `copy_buffer` and
//!   `copy_buffer_to_image` actually move them,
//! - each queue executes its submissions strictly in order, and a submission
//!   only runs once every timeline semaphore it waits on has reached the
//!   requested value,
//! - signals, fences and timestamp queries take effect when a submission runs,
//! - every executed submission is appended to an execution log, and object
//!   creation is counted per kind.
//!
//! Work runs eagerly inside `submit_command_lists` whenever it is unblocked. A
//! CPU wait that can never be satisfied returns [`GraphicsError::WaitFailed`]
//! instead of hanging.

use std::any::Any;
use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::{
    AccelerationStructureHandle, AccelerationStructureKind, BackendObject, BlasGeometry,
    BufferBarrier, BufferHandle, BufferImageCopy, BuildSizes, CommandList,
    ComputePipelineDescriptor, DescriptorRangeBinding, DescriptorSetHandle,
    DescriptorSetLayoutHandle, DescriptorWrite, FenceHandle, FrameBufferDescriptor,
    FrameBufferHandle, GpuBackend, GraphicsPipelineDescriptor, ImageBarrier, ImageHandle,
    ImageViewDescriptor, ImageViewHandle, IndexBufferView, PipelineBindPoint,
    PipelineResourcesHandle, PipelineStateHandle, QueueSynchronization,
    RaytracingPipelineDescriptor, RenderPassBegin, SamplerHandle, SemaphoreValue,
    SpaceLayout, SwapChainDescriptor, SwapChainHandle, SwapChainStatus,
    TimelineSemaphoreHandle, TimestampQueryHeapHandle, TraceRaysRegions, VertexBufferView,
};
use crate::error::GraphicsError;
use crate::shader::ShaderStage;
use crate::types::{
    BufferDescriptor, ClearValue, Extent2d, Extent3d, ImageDescriptor, ImageDimension,
    ImageUsage, MemoryType, QueueIndex, QueueType, SamplerDescriptor, ScissorRect, ShaderStages,
    TextureFormat, Viewport,
};

const TIMESTAMP_FREQUENCY: u64 = 1_000_000_000;
const TIMESTAMP_TICK: u64 = 1_000;
const SHADER_GROUP_HANDLE_SIZE: u32 = 32;
const SHADER_TABLE_ALIGNMENT: u32 = 64;
const ACCELERATION_STRUCTURE_ADDRESS_STRIDE: u64 = 0x1_0000;

/// A command recorded into a [`DummyBackend`] command list.
#[derive(Debug, Clone, PartialEq)]
pub enum DummyCommand {
    BeginPass {
        frame_buffer: FrameBufferHandle,
        size: Extent2d,
        color_clears: Vec<ClearValue>,
    },
    EndPass,
    BindPipelineState {
        bind_point: PipelineBindPoint,
        state: PipelineStateHandle,
    },
    BindVertexBuffers {
        first_slot: u32,
        buffers: Vec<VertexBufferView>,
    },
    BindIndexBuffer(IndexBufferView),
    BindDescriptorSets {
        bind_point: PipelineBindPoint,
        resources: PipelineResourcesHandle,
        first_space: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    SetViewports(Vec<Viewport>),
    SetScissors(Vec<ScissorRect>),
    CopyBuffer {
        source: BufferHandle,
        source_offset: u64,
        destination: BufferHandle,
        destination_offset: u64,
        size: u64,
    },
    CopyBufferToImage(BufferImageCopy),
    Draw {
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    },
    DrawIndexed {
        first_index: u32,
        index_count: u32,
        first_vertex: i32,
        first_instance: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    BuildBlas {
        geometry: Vec<BlasGeometry>,
        target: AccelerationStructureHandle,
        scratch: BufferHandle,
        scratch_offset: u64,
    },
    BuildTlas {
        instances: BufferHandle,
        instances_offset: u64,
        instance_count: u32,
        target: AccelerationStructureHandle,
        scratch: BufferHandle,
        scratch_offset: u64,
    },
    TraceRays {
        regions: TraceRaysRegions,
        width: u32,
        height: u32,
        depth: u32,
    },
    Barrier {
        images: Vec<ImageBarrier>,
        buffers: Vec<BufferBarrier>,
    },
    QueryTimestamp {
        heap: TimestampQueryHeapHandle,
        index: u32,
    },
    /// Not recorded by lists; logged when a queued present executes.
    Present {
        swap_chain: SwapChainHandle,
    },
}

/// Command list of the [`DummyBackend`].
#[derive(Debug)]
pub struct DummyCommandList {
    queue: QueueIndex,
    commands: Vec<DummyCommand>,
    finished: bool,
}

impl DummyCommandList {
    fn push(&mut self, command: DummyCommand) {
        assert!(
            !self.finished,
            "DummyBackend: recording into a finished command list"
        );
        self.commands.push(command);
    }

    /// Commands recorded so far.
    pub fn commands(&self) -> &[DummyCommand] {
        &self.commands
    }
}

impl CommandList for DummyCommandList {
    fn begin_pass(&mut self, pass: &RenderPassBegin<'_>) {
        self.push(DummyCommand::BeginPass {
            frame_buffer: pass.frame_buffer,
            size: pass.size,
            color_clears: pass.color_clears.to_vec(),
        });
    }

    fn end_pass(&mut self) {
        self.push(DummyCommand::EndPass);
    }

    fn bind_pipeline_state(&mut self, bind_point: PipelineBindPoint, state: PipelineStateHandle) {
        self.push(DummyCommand::BindPipelineState { bind_point, state });
    }

    fn bind_vertex_buffers(&mut self, first_slot: u32, buffers: &[VertexBufferView]) {
        self.push(DummyCommand::BindVertexBuffers {
            first_slot,
            buffers: buffers.to_vec(),
        });
    }

    fn bind_index_buffer(&mut self, view: IndexBufferView) {
        self.push(DummyCommand::BindIndexBuffer(view));
    }

    fn bind_descriptor_sets(
        &mut self,
        bind_point: PipelineBindPoint,
        resources: PipelineResourcesHandle,
        first_space: u32,
        sets: &[DescriptorSetHandle],
    ) {
        self.push(DummyCommand::BindDescriptorSets {
            bind_point,
            resources,
            first_space,
            sets: sets.to_vec(),
        });
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.push(DummyCommand::SetViewports(viewports.to_vec()));
    }

    fn set_scissors(&mut self, scissors: &[ScissorRect]) {
        self.push(DummyCommand::SetScissors(scissors.to_vec()));
    }

    fn copy_buffer(
        &mut self,
        source: BufferHandle,
        source_offset: u64,
        destination: BufferHandle,
        destination_offset: u64,
        size: u64,
    ) {
        self.push(DummyCommand::CopyBuffer {
            source,
            source_offset,
            destination,
            destination_offset,
            size,
        });
    }

    fn copy_buffer_to_image(&mut self, copy: &BufferImageCopy) {
        self.push(DummyCommand::CopyBufferToImage(*copy));
    }

    fn draw_instanced(
        &mut self,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    ) {
        self.push(DummyCommand::Draw {
            first_vertex,
            vertex_count,
            first_instance,
            instance_count,
        });
    }

    fn draw_indexed_instanced(
        &mut self,
        first_index: u32,
        index_count: u32,
        first_vertex: i32,
        first_instance: u32,
        instance_count: u32,
    ) {
        self.push(DummyCommand::DrawIndexed {
            first_index,
            index_count,
            first_vertex,
            first_instance,
            instance_count,
        });
    }

    fn run_compute_shader(&mut self, x: u32, y: u32, z: u32) {
        self.push(DummyCommand::Dispatch { x, y, z });
    }

    fn build_bottom_level_acceleration_structure(
        &mut self,
        geometry: &[BlasGeometry],
        target: AccelerationStructureHandle,
        scratch: BufferHandle,
        scratch_offset: u64,
    ) {
        self.push(DummyCommand::BuildBlas {
            geometry: geometry.to_vec(),
            target,
            scratch,
            scratch_offset,
        });
    }

    fn build_top_level_acceleration_structure(
        &mut self,
        instances: BufferHandle,
        instances_offset: u64,
        instance_count: u32,
        target: AccelerationStructureHandle,
        scratch: BufferHandle,
        scratch_offset: u64,
    ) {
        self.push(DummyCommand::BuildTlas {
            instances,
            instances_offset,
            instance_count,
            target,
            scratch,
            scratch_offset,
        });
    }

    fn trace_rays(&mut self, regions: &TraceRaysRegions, width: u32, height: u32, depth: u32) {
        self.push(DummyCommand::TraceRays {
            regions: *regions,
            width,
            height,
            depth,
        });
    }

    fn resource_barrier(&mut self, images: &[ImageBarrier], buffers: &[BufferBarrier]) {
        self.push(DummyCommand::Barrier {
            images: images.to_vec(),
            buffers: buffers.to_vec(),
        });
    }

    fn query_timestamp(&mut self, heap: TimestampQueryHeapHandle, index: u32) {
        self.push(DummyCommand::QueryTimestamp { heap, index });
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A submission that has run on the simulated GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedSubmission {
    /// Global execution order across all queues.
    pub sequence: u64,
    pub queue: QueueIndex,
    pub waits: Vec<SemaphoreValue>,
    pub signals: Vec<SemaphoreValue>,
    pub fence: Option<FenceHandle>,
    /// Commands of all lists in the submission, in order.
    pub commands: Vec<DummyCommand>,
}

/// Counters of objects created and work executed by a [`DummyBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStatistics {
    pub buffers_created: u64,
    pub images_created: u64,
    pub image_views_created: u64,
    pub samplers_created: u64,
    pub frame_buffers_created: u64,
    pub descriptor_set_layouts_created: u64,
    pub pipeline_resources_created: u64,
    pub descriptor_sets_created: u64,
    pub descriptor_set_writes: u64,
    pub graphics_pipelines_created: u64,
    pub compute_pipelines_created: u64,
    pub raytracing_pipelines_created: u64,
    pub acceleration_structures_created: u64,
    pub command_lists_created: u64,
    pub submissions: u64,
    pub presents: u64,
    pub objects_destroyed: u64,
}

#[derive(Debug)]
struct DummyBuffer {
    memory: MemoryType,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DummyImage {
    size: Extent3d,
    format: TextureFormat,
    mips: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct DummySwapChain {
    descriptor: SwapChainDescriptor,
    images: Vec<ImageHandle>,
    next_image: u32,
    scripted_statuses: VecDeque<SwapChainStatus>,
}

#[derive(Debug)]
struct PendingSubmission {
    queue: QueueIndex,
    commands: Vec<DummyCommand>,
    waits: Vec<SemaphoreValue>,
    signals: Vec<SemaphoreValue>,
    fence: Option<FenceHandle>,
}

#[derive(Debug, Default)]
struct DummyState {
    next_handle: u64,
    live_objects: HashMap<u64, &'static str>,
    buffers: HashMap<BufferHandle, DummyBuffer>,
    images: HashMap<ImageHandle, DummyImage>,
    fences: HashMap<FenceHandle, bool>,
    semaphores: HashMap<TimelineSemaphoreHandle, u64>,
    timestamp_heaps: HashMap<TimestampQueryHeapHandle, Vec<u64>>,
    swap_chains: HashMap<SwapChainHandle, DummySwapChain>,
    descriptor_sets: HashMap<DescriptorSetHandle, Vec<DescriptorWrite>>,
    queues: Vec<VecDeque<PendingSubmission>>,
    clock: u64,
    next_sequence: u64,
    log: Vec<ExecutedSubmission>,
    statistics: DummyStatistics,
    pipeline_failure: Option<String>,
    deferred: bool,
}

impl DummyState {
    fn mint(&mut self, kind: &'static str) -> u64 {
        self.next_handle += 1;
        self.live_objects.insert(self.next_handle, kind);
        self.next_handle
    }

    fn semaphore_value(&self, semaphore: TimelineSemaphoreHandle) -> u64 {
        self.semaphores.get(&semaphore).copied().unwrap_or(0)
    }

    fn blocked_submissions(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Run every submission whose waits are satisfied, until nothing moves.
    fn pump(&mut self) {
        loop {
            let mut progressed = false;
            for queue in 0..self.queues.len() {
                loop {
                    let ready = match self.queues[queue].front() {
                        Some(front) => front
                            .waits
                            .iter()
                            .all(|wait| self.semaphore_value(wait.semaphore) >= wait.value),
                        None => break,
                    };
                    if !ready {
                        break;
                    }
                    let Some(submission) = self.queues[queue].pop_front() else {
                        break;
                    };
                    self.execute(submission);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn pump_unless_deferred(&mut self) {
        if !self.deferred {
            self.pump();
        }
    }

    fn execute(&mut self, submission: PendingSubmission) {
        for command in &submission.commands {
            match command {
                DummyCommand::CopyBuffer {
                    source,
                    source_offset,
                    destination,
                    destination_offset,
                    size,
                } => {
                    let bytes = self.buffer_range(*source, *source_offset, *size).to_vec();
                    let end = (*destination_offset + *size) as usize;
                    let Some(target) = self.buffers.get_mut(destination) else {
                        panic!("DummyBackend: copy into unknown buffer #{}", destination.raw());
                    };
                    assert!(
                        end <= target.data.len(),
                        "DummyBackend: copy past the end of buffer #{}",
                        destination.raw()
                    );
                    target.data[*destination_offset as usize..end].copy_from_slice(&bytes);
                }
                DummyCommand::CopyBufferToImage(copy) => self.copy_to_image(copy),
                DummyCommand::QueryTimestamp { heap, index } => {
                    self.clock += TIMESTAMP_TICK;
                    let clock = self.clock;
                    if let Some(slots) = self.timestamp_heaps.get_mut(heap) {
                        slots[*index as usize] = clock;
                    }
                }
                DummyCommand::Present { swap_chain } => {
                    log::trace!("DummyBackend: presenting swap chain #{}", swap_chain.raw());
                }
                _ => {}
            }
        }

        for signal in &submission.signals {
            let current = self.semaphore_value(signal.semaphore);
            assert!(
                signal.value > current,
                "DummyBackend: timeline semaphore #{} signaled with non-increasing value {} (current {})",
                signal.semaphore.raw(),
                signal.value,
                current
            );
            self.semaphores.insert(signal.semaphore, signal.value);
        }
        if let Some(fence) = submission.fence {
            self.fences.insert(fence, true);
        }

        self.next_sequence += 1;
        log::trace!(
            "DummyBackend: executed submission {} on {} ({} commands)",
            self.next_sequence,
            submission.queue,
            submission.commands.len()
        );
        self.log.push(ExecutedSubmission {
            sequence: self.next_sequence,
            queue: submission.queue,
            waits: submission.waits,
            signals: submission.signals,
            fence: submission.fence,
            commands: submission.commands,
        });
    }

    fn buffer_range(&self, buffer: BufferHandle, offset: u64, size: u64) -> &[u8] {
        let Some(source) = self.buffers.get(&buffer) else {
            panic!("DummyBackend: access to unknown buffer #{}", buffer.raw());
        };
        let end = (offset + size) as usize;
        assert!(
            end <= source.data.len(),
            "DummyBackend: access past the end of buffer #{} ({} > {})",
            buffer.raw(),
            end,
            source.data.len()
        );
        &source.data[offset as usize..end]
    }

    fn copy_to_image(&mut self, copy: &BufferImageCopy) {
        let block = copy.format.block_size() as usize;
        let row_bytes = copy.size.width as usize * block;
        let rows = (copy.size.height * copy.size.depth) as usize;
        let mut texels = Vec::with_capacity(row_bytes * rows);
        for row in 0..rows {
            let offset = copy.buffer_offset + row as u64 * copy.row_pitch as u64;
            texels.extend_from_slice(self.buffer_range(copy.buffer, offset, row_bytes as u64));
        }

        let Some(image) = self.images.get_mut(&copy.image) else {
            panic!("DummyBackend: copy into unknown image #{}", copy.image.raw());
        };
        let mip = &mut image.mips[copy.mip as usize];
        assert!(
            texels.len() <= mip.len(),
            "DummyBackend: copy larger than mip {} of image #{}",
            copy.mip,
            copy.image.raw()
        );
        mip[..texels.len()].copy_from_slice(&texels);
    }

    fn allocate_image(&mut self, descriptor: &ImageDescriptor) -> ImageHandle {
        let handle = ImageHandle::from_raw(self.mint("Image"));
        let block = descriptor.format.block_size() as usize;
        let mips = (0..descriptor.mip_levels)
            .map(|level| {
                let width = (descriptor.size.width >> level).max(1) as usize;
                let height = (descriptor.size.height >> level).max(1) as usize;
                let depth = match descriptor.dimension {
                    ImageDimension::D2 => 1,
                    ImageDimension::D3 => (descriptor.size.depth >> level).max(1) as usize,
                };
                vec![0u8; width * height * depth * block]
            })
            .collect();
        self.images.insert(
            handle,
            DummyImage {
                size: descriptor.size,
                format: descriptor.format,
                mips,
            },
        );
        self.statistics.images_created += 1;
        handle
    }

    fn allocate_swap_chain_images(&mut self, descriptor: &SwapChainDescriptor) -> Vec<ImageHandle> {
        let image = ImageDescriptor::new_2d(
            descriptor.size.width,
            descriptor.size.height,
            descriptor.format,
            ImageUsage::COLOR_RENDER_TARGET,
        );
        (0..descriptor.image_count)
            .map(|_| self.allocate_image(&image))
            .collect()
    }
}

/// Simulated GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    queue_types: Vec<QueueType>,
    state: Mutex<DummyState>,
}

impl DummyBackend {
    /// Create a device with one graphics, one compute and one copy queue.
    pub fn new() -> Self {
        Self::with_queues(&[QueueType::Graphics, QueueType::Compute, QueueType::Copy])
    }

    /// Create a device with the given queues.
    pub fn with_queues(queue_types: &[QueueType]) -> Self {
        let state = DummyState {
            queues: queue_types.iter().map(|_| VecDeque::new()).collect(),
            ..DummyState::default()
        };
        Self {
            queue_types: queue_types.to_vec(),
            state: Mutex::new(state),
        }
    }

    /// Counters of created objects and executed work.
    pub fn statistics(&self) -> DummyStatistics {
        self.state.lock().statistics
    }

    /// Every submission executed so far, in execution order.
    pub fn execution_log(&self) -> Vec<ExecutedSubmission> {
        self.state.lock().log.clone()
    }

    /// Submissions still waiting on a semaphore value nobody has signaled.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().blocked_submissions()
    }

    /// Number of objects created and not yet destroyed.
    pub fn live_object_count(&self) -> usize {
        self.state.lock().live_objects.len()
    }

    /// Whether `object` has been created and not destroyed.
    pub fn is_alive(&self, object: BackendObject) -> bool {
        self.state.lock().live_objects.contains_key(&object.raw())
    }

    /// Buffer bytes regardless of memory type.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Vec<u8> {
        let state = self.state.lock();
        state
            .buffers
            .get(&buffer)
            .map(|b| b.data.clone())
            .unwrap_or_default()
    }

    /// Texel bytes of one image mip.
    pub fn image_contents(&self, image: ImageHandle, mip: u32) -> Vec<u8> {
        let state = self.state.lock();
        state
            .images
            .get(&image)
            .and_then(|i| i.mips.get(mip as usize).cloned())
            .unwrap_or_default()
    }

    /// Size and format an image was created with.
    pub fn image_info(&self, image: ImageHandle) -> Option<(Extent3d, TextureFormat)> {
        let state = self.state.lock();
        state.images.get(&image).map(|i| (i.size, i.format))
    }

    /// Descriptors most recently written into a set.
    pub fn descriptor_set_contents(&self, set: DescriptorSetHandle) -> Vec<DescriptorWrite> {
        let state = self.state.lock();
        state.descriptor_sets.get(&set).cloned().unwrap_or_default()
    }

    /// Make the next present of `swap_chain` report `status`.
    pub fn script_present_status(&self, swap_chain: SwapChainHandle, status: SwapChainStatus) {
        let mut state = self.state.lock();
        if let Some(chain) = state.swap_chains.get_mut(&swap_chain) {
            chain.scripted_statuses.push_back(status);
        }
    }

    /// Hold submitted work until the CPU waits on a fence or semaphore,
    /// like a GPU running behind.
    pub fn set_deferred_execution(&self, deferred: bool) {
        let mut state = self.state.lock();
        state.deferred = deferred;
        if !deferred {
            state.pump();
        }
    }

    /// Make the next pipeline creation fail with `message`.
    pub fn fail_next_pipeline_creation(&self, message: impl Into<String>) {
        self.state.lock().pipeline_failure = Some(message.into());
    }

    fn check_queue(&self, queue: QueueIndex) -> Result<(), GraphicsError> {
        if queue.index() < self.queue_types.len() {
            Ok(())
        } else {
            Err(GraphicsError::InvalidParameter(format!(
                "{queue} does not exist ({} queue(s))",
                self.queue_types.len()
            )))
        }
    }

    fn create_pipeline(
        &self,
        label: &str,
        counter: impl FnOnce(&mut DummyStatistics),
    ) -> Result<PipelineStateHandle, GraphicsError> {
        let mut state = self.state.lock();
        if let Some(message) = state.pipeline_failure.take() {
            return Err(GraphicsError::PipelineCreationFailed(message));
        }
        counter(&mut state.statistics);
        let handle = PipelineStateHandle::from_raw(state.mint("PipelineState"));
        log::trace!("DummyBackend: created {} pipeline #{}", label, handle.raw());
        Ok(handle)
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_stage(
    shader: &crate::shader::Shader,
    expected: ShaderStage,
) -> Result<(), GraphicsError> {
    if shader.stage() == expected {
        Ok(())
    } else {
        Err(GraphicsError::PipelineCreationFailed(format!(
            "shader {} is a {:?} shader, expected {:?}",
            shader.id(),
            shader.stage(),
            expected
        )))
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn queue_types(&self) -> &[QueueType] {
        &self.queue_types
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be non-zero".to_string(),
            ));
        }
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let mut state = self.state.lock();
        let handle = BufferHandle::from_raw(state.mint("Buffer"));
        state.buffers.insert(
            handle,
            DummyBuffer {
                memory: descriptor.memory,
                data: vec![0u8; descriptor.size as usize],
            },
        );
        state.statistics.buffers_created += 1;
        Ok(handle)
    }

    fn create_image2d(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, GraphicsError> {
        if descriptor.dimension != ImageDimension::D2 {
            return Err(GraphicsError::InvalidParameter(
                "create_image2d called with a 3D descriptor".to_string(),
            ));
        }
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height
        );
        Ok(self.state.lock().allocate_image(descriptor))
    }

    fn create_image3d(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, GraphicsError> {
        if descriptor.dimension != ImageDimension::D3 {
            return Err(GraphicsError::InvalidParameter(
                "create_image3d called with a 2D descriptor".to_string(),
            ));
        }
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );
        Ok(self.state.lock().allocate_image(descriptor))
    }

    fn create_image_view(
        &self,
        descriptor: &ImageViewDescriptor,
    ) -> Result<ImageViewHandle, GraphicsError> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&descriptor.image) {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "view of unknown image #{}",
                descriptor.image.raw()
            )));
        }
        state.statistics.image_views_created += 1;
        Ok(ImageViewHandle::from_raw(state.mint("ImageView")))
    }

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.min_filter);
        let mut state = self.state.lock();
        state.statistics.samplers_created += 1;
        Ok(SamplerHandle::from_raw(state.mint("Sampler")))
    }

    fn create_frame_buffer(
        &self,
        descriptor: &FrameBufferDescriptor<'_>,
    ) -> Result<FrameBufferHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating frame buffer with {} color target(s) ({}x{})",
            descriptor.color.len(),
            descriptor.size.width,
            descriptor.size.height
        );
        let mut state = self.state.lock();
        state.statistics.frame_buffers_created += 1;
        Ok(FrameBufferHandle::from_raw(state.mint("FrameBuffer")))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorRangeBinding],
        _visibility: ShaderStages,
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating descriptor set layout with {} range(s)",
            bindings.len()
        );
        let mut state = self.state.lock();
        state.statistics.descriptor_set_layouts_created += 1;
        Ok(DescriptorSetLayoutHandle::from_raw(
            state.mint("DescriptorSetLayout"),
        ))
    }

    fn create_pipeline_resources(
        &self,
        sets: &[SpaceLayout],
    ) -> Result<PipelineResourcesHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating pipeline resources over {} set(s)",
            sets.len()
        );
        let mut state = self.state.lock();
        state.statistics.pipeline_resources_created += 1;
        Ok(PipelineResourcesHandle::from_raw(
            state.mint("PipelineResources"),
        ))
    }

    fn create_descriptor_set(
        &self,
        _layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError> {
        let mut state = self.state.lock();
        state.statistics.descriptor_sets_created += 1;
        let handle = DescriptorSetHandle::from_raw(state.mint("DescriptorSet"));
        state.descriptor_sets.insert(handle, Vec::new());
        Ok(handle)
    }

    fn write_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        state.statistics.descriptor_set_writes += 1;
        let contents = state.descriptor_sets.entry(set).or_default();
        for write in writes {
            contents.retain(|w| {
                !(w.register == write.register && w.array_index == write.array_index)
            });
            contents.push(*write);
        }
    }

    fn create_graphics_pipeline_state(
        &self,
        descriptor: &GraphicsPipelineDescriptor<'_>,
    ) -> Result<PipelineStateHandle, GraphicsError> {
        check_stage(descriptor.vertex_shader, ShaderStage::Vertex)?;
        check_stage(descriptor.pixel_shader, ShaderStage::Pixel)?;
        self.create_pipeline("graphics", |s| s.graphics_pipelines_created += 1)
    }

    fn create_compute_pipeline_state(
        &self,
        descriptor: &ComputePipelineDescriptor<'_>,
    ) -> Result<PipelineStateHandle, GraphicsError> {
        check_stage(descriptor.shader, ShaderStage::Compute)?;
        self.create_pipeline("compute", |s| s.compute_pipelines_created += 1)
    }

    fn create_raytracing_pipeline_state(
        &self,
        descriptor: &RaytracingPipelineDescriptor<'_>,
    ) -> Result<PipelineStateHandle, GraphicsError> {
        check_stage(descriptor.ray_generation, ShaderStage::RayGeneration)?;
        for miss in descriptor.miss {
            check_stage(miss, ShaderStage::Miss)?;
        }
        self.create_pipeline("ray tracing", |s| s.raytracing_pipelines_created += 1)
    }

    fn shader_group_handle_size(&self) -> u32 {
        SHADER_GROUP_HANDLE_SIZE
    }

    fn shader_table_alignment(&self) -> u32 {
        SHADER_TABLE_ALIGNMENT
    }

    fn shader_group_handles(
        &self,
        pipeline: PipelineStateHandle,
        first: u32,
        count: u32,
    ) -> Vec<u8> {
        (first..first + count)
            .flat_map(|group| {
                let tag = (pipeline.raw() as u8).wrapping_mul(16).wrapping_add(group as u8);
                std::iter::repeat_n(tag, SHADER_GROUP_HANDLE_SIZE as usize)
            })
            .collect()
    }

    fn create_acceleration_structure(
        &self,
        buffer: BufferHandle,
        _offset: u64,
        _size: u64,
        kind: AccelerationStructureKind,
    ) -> Result<AccelerationStructureHandle, GraphicsError> {
        let mut state = self.state.lock();
        if !state.buffers.contains_key(&buffer) {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "{kind:?} acceleration structure over unknown buffer #{}",
                buffer.raw()
            )));
        }
        state.statistics.acceleration_structures_created += 1;
        Ok(AccelerationStructureHandle::from_raw(
            state.mint("AccelerationStructure"),
        ))
    }

    fn bottom_level_build_sizes(&self, geometry: &[BlasGeometry]) -> BuildSizes {
        let triangles: u64 = geometry.iter().map(|g| g.triangle_count() as u64).sum();
        BuildSizes {
            acceleration_structure_size: 256 + triangles * 64,
            build_scratch_size: 128 + triangles * 32,
        }
    }

    fn top_level_build_sizes(&self, instance_count: u32) -> BuildSizes {
        BuildSizes {
            acceleration_structure_size: 256 + instance_count as u64 * 128,
            build_scratch_size: 128 + instance_count as u64 * 64,
        }
    }

    fn acceleration_structure_address(&self, handle: AccelerationStructureHandle) -> u64 {
        handle.raw() * ACCELERATION_STRUCTURE_ADDRESS_STRIDE
    }

    fn create_timestamp_query_heap(
        &self,
        count: u32,
    ) -> Result<TimestampQueryHeapHandle, GraphicsError> {
        let mut state = self.state.lock();
        let handle = TimestampQueryHeapHandle::from_raw(state.mint("TimestampQueryHeap"));
        state.timestamp_heaps.insert(handle, vec![0; count as usize]);
        Ok(handle)
    }

    fn resolve_timestamps(
        &self,
        heap: TimestampQueryHeapHandle,
        count: u32,
    ) -> Result<Vec<u64>, GraphicsError> {
        let state = self.state.lock();
        let slots = state.timestamp_heaps.get(&heap).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown timestamp heap #{}", heap.raw()))
        })?;
        Ok(slots.iter().take(count as usize).copied().collect())
    }

    fn timestamp_frequency(&self, _queue: QueueIndex) -> u64 {
        TIMESTAMP_FREQUENCY
    }

    fn create_command_list(
        &self,
        queue: QueueIndex,
    ) -> Result<Box<dyn CommandList>, GraphicsError> {
        self.check_queue(queue)?;
        self.state.lock().statistics.command_lists_created += 1;
        Ok(Box::new(DummyCommandList {
            queue,
            commands: Vec::new(),
            finished: false,
        }))
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle, GraphicsError> {
        let mut state = self.state.lock();
        let handle = FenceHandle::from_raw(state.mint("Fence"));
        state.fences.insert(handle, signaled);
        Ok(handle)
    }

    fn create_timeline_semaphore(
        &self,
        initial_value: u64,
    ) -> Result<TimelineSemaphoreHandle, GraphicsError> {
        let mut state = self.state.lock();
        let handle = TimelineSemaphoreHandle::from_raw(state.mint("TimelineSemaphore"));
        state.semaphores.insert(handle, initial_value);
        Ok(handle)
    }

    fn create_swap_chain(
        &self,
        descriptor: &SwapChainDescriptor,
    ) -> Result<SwapChainHandle, GraphicsError> {
        if descriptor.image_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "swap chain needs at least one image".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let handle = SwapChainHandle::from_raw(state.mint("SwapChain"));
        let images = state.allocate_swap_chain_images(descriptor);
        state.swap_chains.insert(
            handle,
            DummySwapChain {
                descriptor: *descriptor,
                images,
                next_image: 0,
                scripted_statuses: VecDeque::new(),
            },
        );
        Ok(handle)
    }

    fn swap_chain_images(&self, swap_chain: SwapChainHandle) -> Vec<ImageHandle> {
        let state = self.state.lock();
        state
            .swap_chains
            .get(&swap_chain)
            .map(|chain| chain.images.clone())
            .unwrap_or_default()
    }

    fn acquire_next_image(&self, swap_chain: SwapChainHandle) -> Result<u32, GraphicsError> {
        let mut state = self.state.lock();
        let chain = state
            .swap_chains
            .get_mut(&swap_chain)
            .ok_or(GraphicsError::SurfaceLost)?;
        let index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.descriptor.image_count;
        Ok(index)
    }

    fn resize_swap_chain(
        &self,
        swap_chain: SwapChainHandle,
        size: Extent2d,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let Some(mut descriptor) = state.swap_chains.get(&swap_chain).map(|c| c.descriptor) else {
            return Err(GraphicsError::SurfaceLost);
        };
        descriptor.size = size;
        let images = state.allocate_swap_chain_images(&descriptor);
        let old = match state.swap_chains.get_mut(&swap_chain) {
            Some(chain) => {
                chain.descriptor = descriptor;
                chain.next_image = 0;
                std::mem::replace(&mut chain.images, images)
            }
            None => Vec::new(),
        };
        for image in old {
            state.images.remove(&image);
            state.live_objects.remove(&image.raw());
        }
        Ok(())
    }

    fn submit_command_lists(
        &self,
        queue: QueueIndex,
        lists: Vec<Box<dyn CommandList>>,
        synchronization: &QueueSynchronization<'_>,
    ) -> Result<(), GraphicsError> {
        self.check_queue(queue)?;

        let mut commands = Vec::new();
        for list in &lists {
            let Some(list) = list.as_any().downcast_ref::<DummyCommandList>() else {
                return Err(GraphicsError::Internal(
                    "command list was not created by the dummy backend".to_string(),
                ));
            };
            if !list.finished {
                return Err(GraphicsError::Internal(
                    "command list submitted without finish()".to_string(),
                ));
            }
            if list.queue != queue {
                return Err(GraphicsError::InvalidParameter(format!(
                    "command list for {} submitted to {queue}",
                    list.queue
                )));
            }
            commands.extend(list.commands.iter().cloned());
        }

        let mut state = self.state.lock();
        state.statistics.submissions += 1;
        state.queues[queue.index()].push_back(PendingSubmission {
            queue,
            commands,
            waits: synchronization.waits.to_vec(),
            signals: synchronization.signals.to_vec(),
            fence: synchronization.fence,
        });
        state.pump_unless_deferred();
        Ok(())
    }

    fn present(&self, queue: QueueIndex, swap_chain: SwapChainHandle) -> SwapChainStatus {
        let mut state = self.state.lock();
        state.statistics.presents += 1;
        let status = state
            .swap_chains
            .get_mut(&swap_chain)
            .and_then(|chain| chain.scripted_statuses.pop_front())
            .unwrap_or(SwapChainStatus::Ok);
        if let Some(pending) = state.queues.get_mut(queue.index()) {
            pending.push_back(PendingSubmission {
                queue,
                commands: vec![DummyCommand::Present { swap_chain }],
                waits: Vec::new(),
                signals: Vec::new(),
                fence: None,
            });
        }
        state.pump_unless_deferred();
        status
    }

    fn signal_fence(&self, queue: QueueIndex, fence: FenceHandle) -> Result<(), GraphicsError> {
        self.check_queue(queue)?;
        let mut state = self.state.lock();
        state.queues[queue.index()].push_back(PendingSubmission {
            queue,
            commands: Vec::new(),
            waits: Vec::new(),
            signals: Vec::new(),
            fence: Some(fence),
        });
        state.pump_unless_deferred();
        Ok(())
    }

    fn wait_fence(&self, fence: FenceHandle) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        state.pump();
        match state.fences.get(&fence) {
            Some(true) => Ok(()),
            Some(false) => Err(GraphicsError::WaitFailed(format!(
                "fence #{} can never be signaled, {} submission(s) are blocked",
                fence.raw(),
                state.blocked_submissions()
            ))),
            None => Err(GraphicsError::InvalidParameter(format!(
                "unknown fence #{}",
                fence.raw()
            ))),
        }
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> bool {
        self.state.lock().fences.get(&fence).copied().unwrap_or(false)
    }

    fn wait_timeline_semaphore(
        &self,
        semaphore: TimelineSemaphoreHandle,
        value: u64,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        state.pump();
        let current = state.semaphore_value(semaphore);
        if current >= value {
            Ok(())
        } else {
            Err(GraphicsError::WaitFailed(format!(
                "timeline semaphore #{} is at {} and can never reach {}",
                semaphore.raw(),
                current,
                value
            )))
        }
    }

    fn timeline_semaphore_value(&self, semaphore: TimelineSemaphoreHandle) -> u64 {
        self.state.lock().semaphore_value(semaphore)
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        log::trace!(
            "DummyBackend: write_buffer #{} offset={} len={}",
            buffer.raw(),
            offset,
            data.len()
        );
        let mut state = self.state.lock();
        let target = state.buffers.get_mut(&buffer).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer #{}", buffer.raw()))
        })?;
        if !target.memory.is_host_visible() {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer #{} is not host visible",
                buffer.raw()
            )));
        }
        let end = offset as usize + data.len();
        if end > target.data.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} overflows buffer #{} ({} bytes)",
                data.len(),
                offset,
                buffer.raw(),
                target.data.len()
            )));
        }
        target.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let state = self.state.lock();
        let source = state.buffers.get(&buffer).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer #{}", buffer.raw()))
        })?;
        if !source.memory.is_host_visible() {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer #{} is not host visible",
                buffer.raw()
            )));
        }
        let end = (offset + size) as usize;
        if end > source.data.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "read of {} bytes at {} overflows buffer #{}",
                size,
                offset,
                buffer.raw()
            )));
        }
        Ok(source.data[offset as usize..end].to_vec())
    }

    fn destroy(&self, object: BackendObject) {
        log::trace!("DummyBackend: destroying {} #{}", object.kind(), object.raw());
        let mut state = self.state.lock();
        assert!(
            state.live_objects.remove(&object.raw()).is_some(),
            "DummyBackend: {} #{} destroyed twice or never created",
            object.kind(),
            object.raw()
        );
        match object {
            BackendObject::Buffer(buffer) => {
                state.buffers.remove(&buffer);
            }
            BackendObject::Image(image) => {
                state.images.remove(&image);
            }
            BackendObject::Fence(fence) => {
                state.fences.remove(&fence);
            }
            BackendObject::TimelineSemaphore(semaphore) => {
                state.semaphores.remove(&semaphore);
            }
            BackendObject::TimestampQueryHeap(heap) => {
                state.timestamp_heaps.remove(&heap);
            }
            BackendObject::DescriptorSet(set) => {
                state.descriptor_sets.remove(&set);
            }
            BackendObject::SwapChain(swap_chain) => {
                if let Some(chain) = state.swap_chains.remove(&swap_chain) {
                    for image in chain.images {
                        state.images.remove(&image);
                        state.live_objects.remove(&image.raw());
                    }
                }
            }
            _ => {}
        }
        state.statistics.objects_destroyed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferUsage;

    fn upload_buffer(backend: &DummyBackend, bytes: &[u8]) -> BufferHandle {
        let buffer = backend
            .create_buffer(&BufferDescriptor::upload(
                bytes.len() as u64,
                BufferUsage::COPY_SRC,
            ))
            .unwrap();
        backend.write_buffer(buffer, 0, bytes).unwrap();
        buffer
    }

    fn submit(
        backend: &DummyBackend,
        queue: u32,
        record: impl FnOnce(&mut dyn CommandList),
        synchronization: QueueSynchronization<'_>,
    ) {
        let mut list = backend.create_command_list(QueueIndex(queue)).unwrap();
        record(list.as_mut());
        list.finish();
        backend
            .submit_command_lists(QueueIndex(queue), vec![list], &synchronization)
            .unwrap();
    }

    #[test]
    fn test_copy_moves_bytes() {
        let backend = DummyBackend::new();
        let source = upload_buffer(&backend, &[1, 2, 3, 4]);
        let destination = backend
            .create_buffer(&BufferDescriptor::readback(4))
            .unwrap();

        submit(
            &backend,
            0,
            |list| list.copy_buffer(source, 1, destination, 0, 3),
            QueueSynchronization::default(),
        );

        assert_eq!(
            backend.read_buffer(destination, 0, 4).unwrap(),
            vec![2, 3, 4, 0]
        );
        assert_eq!(backend.statistics().submissions, 1);
    }

    #[test]
    fn test_submission_blocks_until_semaphore_signaled() {
        let backend = DummyBackend::new();
        let semaphore = backend.create_timeline_semaphore(0).unwrap();
        let fence = backend.create_fence(false).unwrap();

        let wait = [SemaphoreValue {
            semaphore,
            value: 1,
        }];
        submit(
            &backend,
            1,
            |_| {},
            QueueSynchronization {
                waits: &wait,
                signals: &[],
                fence: Some(fence),
            },
        );
        assert_eq!(backend.pending_submissions(), 1);
        assert!(!backend.is_fence_signaled(fence));
        assert!(matches!(
            backend.wait_fence(fence),
            Err(GraphicsError::WaitFailed(_))
        ));

        submit(
            &backend,
            0,
            |_| {},
            QueueSynchronization {
                waits: &[],
                signals: &wait,
                fence: None,
            },
        );
        assert_eq!(backend.pending_submissions(), 0);
        assert!(backend.wait_fence(fence).is_ok());

        let log = backend.execution_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].queue, QueueIndex(0));
        assert_eq!(log[1].queue, QueueIndex(1));
    }

    #[test]
    #[should_panic(expected = "non-increasing value")]
    fn test_semaphore_values_must_increase() {
        let backend = DummyBackend::new();
        let semaphore = backend.create_timeline_semaphore(5).unwrap();
        let signal = [SemaphoreValue {
            semaphore,
            value: 5,
        }];
        submit(
            &backend,
            0,
            |_| {},
            QueueSynchronization {
                waits: &[],
                signals: &signal,
                fence: None,
            },
        );
    }

    #[test]
    fn test_unfinished_list_is_rejected() {
        let backend = DummyBackend::new();
        let list = backend.create_command_list(QueueIndex(0)).unwrap();
        let result = backend.submit_command_lists(
            QueueIndex(0),
            vec![list],
            &QueueSynchronization::default(),
        );
        assert!(matches!(result, Err(GraphicsError::Internal(_))));
    }

    #[test]
    fn test_copy_to_image_respects_row_pitch() {
        let backend = DummyBackend::new();
        // Two rows of two RGBA8 texels, padded to 16 bytes per row.
        let mut bytes = vec![0u8; 32];
        bytes[..8].copy_from_slice(&[1; 8]);
        bytes[16..24].copy_from_slice(&[2; 8]);
        let source = upload_buffer(&backend, &bytes);
        let image = backend
            .create_image2d(&ImageDescriptor::new_2d(
                2,
                2,
                TextureFormat::Rgba8Unorm,
                ImageUsage::COPY_DST,
            ))
            .unwrap();

        let copy = BufferImageCopy {
            buffer: source,
            buffer_offset: 0,
            row_pitch: 16,
            image,
            mip: 0,
            size: Extent3d::new_2d(2, 2),
            format: TextureFormat::Rgba8Unorm,
        };
        submit(
            &backend,
            0,
            |list| list.copy_buffer_to_image(&copy),
            QueueSynchronization::default(),
        );

        let texels = backend.image_contents(image, 0);
        assert_eq!(&texels[..8], &[1; 8]);
        assert_eq!(&texels[8..], &[2; 8]);
    }

    #[test]
    fn test_timestamps_increase_in_execution_order() {
        let backend = DummyBackend::new();
        let heap = backend.create_timestamp_query_heap(2).unwrap();
        submit(
            &backend,
            0,
            |list| {
                list.query_timestamp(heap, 0);
                list.query_timestamp(heap, 1);
            },
            QueueSynchronization::default(),
        );
        let ticks = backend.resolve_timestamps(heap, 2).unwrap();
        assert!(ticks[0] > 0);
        assert!(ticks[1] > ticks[0]);
    }

    #[test]
    fn test_scripted_present_status() {
        let backend = DummyBackend::new();
        let swap_chain = backend
            .create_swap_chain(&SwapChainDescriptor {
                size: Extent2d::new(64, 64),
                format: TextureFormat::Bgra8Unorm,
                image_count: 2,
            })
            .unwrap();
        assert_eq!(backend.swap_chain_images(swap_chain).len(), 2);
        assert_eq!(backend.acquire_next_image(swap_chain).unwrap(), 0);
        assert_eq!(backend.acquire_next_image(swap_chain).unwrap(), 1);

        backend.script_present_status(swap_chain, SwapChainStatus::OutOfDate);
        assert_eq!(
            backend.present(QueueIndex(0), swap_chain),
            SwapChainStatus::OutOfDate
        );
        assert_eq!(
            backend.present(QueueIndex(0), swap_chain),
            SwapChainStatus::Ok
        );
        assert_eq!(backend.statistics().presents, 2);
    }

    #[test]
    #[should_panic(expected = "destroyed twice")]
    fn test_double_destroy_is_detected() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(true).unwrap();
        backend.destroy(fence.into());
        backend.destroy(fence.into());
    }

    #[test]
    fn test_scripted_pipeline_failure() {
        let backend = DummyBackend::new();
        backend.fail_next_pipeline_creation("out of registers");
        let shader = crate::shader::Shader::from_binary(ShaderStage::Compute, "main", vec![0u8]);
        let resources = backend.create_pipeline_resources(&[]).unwrap();
        let descriptor = ComputePipelineDescriptor {
            resources,
            shader: &shader,
        };
        assert_eq!(
            backend.create_compute_pipeline_state(&descriptor),
            Err(GraphicsError::PipelineCreationFailed(
                "out of registers".to_string()
            ))
        );
        assert!(backend.create_compute_pipeline_state(&descriptor).is_ok());
        assert_eq!(backend.statistics().compute_pipelines_created, 1);
    }
}
