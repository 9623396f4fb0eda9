//! Recording commands into a queue's stream.

use super::{
    BlasGeometryDesc, BoundResource, ColorTarget, DepthStencilTarget, DispatchCompute,
    DrawInstanced, QueueCommand, RecordedCommand, ResourceBindings, TlasInstance, TraceRays,
};
use crate::backend::AccelerationStructureKind;
use crate::execution::ImmediateConstantView;
use crate::execution::immediate::ImmediateConstantStaging;
use crate::resources::{AccelerationStructureId, BufferId, ImageId, ResourceRegistry, SwapChainId};
use crate::types::{Extent2d, QueueIndex, QueueType};

/// A timestamp requested before the command at `command_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TimestampMarker {
    pub(crate) command_index: usize,
    pub(crate) label: String,
}

/// Commands and timestamp markers recorded for one queue.
#[derive(Debug, Default)]
pub(crate) struct QueueRecording {
    pub(crate) commands: Vec<RecordedCommand>,
    pub(crate) timestamps: Vec<TimestampMarker>,
}

impl QueueRecording {
    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.timestamps.is_empty()
    }
}

/// Appends commands to one queue of an
/// [`ExecutionContext`](crate::execution::ExecutionContext).
///
/// Obtained through [`ExecutionContext::queue`](crate::execution::ExecutionContext::queue).
/// Recording is cheap: commands are only validated against the queue type
/// and the registry, and replayed when the batch executes.
///
/// # Example
///
/// ```ignore
/// let mut graphics = context.queue(QueueIndex(0));
/// let (camera, bytes) = graphics.stage_immediate_constant_buffer(64);
/// bytes.copy_from_slice(bytemuck::bytes_of(&view_projection));
///
/// let target = ColorTarget::clear(RenderTarget::SwapChain(window), 0.0, 0.0, 0.0, 1.0);
/// graphics.begin_pass(size, vec![target], None);
/// graphics.draw(DrawInstanced::new(vs, ps).with_vertex_count(3).with_bindings(bindings));
/// graphics.end_pass();
/// graphics.present(window);
/// ```
pub struct QueueRecorder<'a> {
    queue: QueueIndex,
    queue_type: QueueType,
    batch: u64,
    recording: &'a mut QueueRecording,
    sequence: &'a mut u64,
    registry: &'a ResourceRegistry,
    immediate: &'a mut ImmediateConstantStaging,
}

impl<'a> QueueRecorder<'a> {
    pub(crate) fn new(
        queue: QueueIndex,
        queue_type: QueueType,
        batch: u64,
        recording: &'a mut QueueRecording,
        sequence: &'a mut u64,
        registry: &'a ResourceRegistry,
        immediate: &'a mut ImmediateConstantStaging,
    ) -> Self {
        Self {
            queue,
            queue_type,
            batch,
            recording,
            sequence,
            registry,
            immediate,
        }
    }

    pub fn queue(&self) -> QueueIndex {
        self.queue
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Number of commands recorded on this queue for the current batch.
    pub fn command_count(&self) -> usize {
        self.recording.commands.len()
    }

    fn push(&mut self, command: QueueCommand) {
        log::trace!("{}: recorded {}", self.queue, command.name());
        self.recording.commands.push(RecordedCommand {
            sequence: *self.sequence,
            command,
        });
        *self.sequence += 1;
    }

    fn require_graphics(&self, what: &str) {
        assert!(
            self.queue_type.supports_graphics(),
            "contract violation: {what} recorded on {} ({:?} queue)",
            self.queue,
            self.queue_type
        );
    }

    fn require_compute(&self, what: &str) {
        assert!(
            self.queue_type.supports_compute(),
            "contract violation: {what} recorded on {} ({:?} queue)",
            self.queue,
            self.queue_type
        );
    }

    /// Immediate constants are copied into place by the queue that staged
    /// them, so no other queue can bind them.
    fn check_immediate_constants(&self, bindings: &ResourceBindings) {
        for resource in bindings.resources() {
            if let BoundResource::ImmediateConstants(view) = resource {
                assert_eq!(
                    view.queue(),
                    self.queue,
                    "contract violation: immediate constants staged on {} bound on {}",
                    view.queue(),
                    self.queue
                );
            }
        }
    }

    fn check_buffer_range(&self, buffer: BufferId, offset: u64, size: u64) {
        let capacity = self.registry.buffer_descriptor(buffer).size;
        assert!(
            offset.checked_add(size).is_some_and(|end| end <= capacity),
            "contract violation: range {}..{} exceeds {buffer:?} of {} bytes",
            offset,
            offset.saturating_add(size),
            capacity
        );
    }

    // ------------------------------------------------------------------
    // Copies
    // ------------------------------------------------------------------

    /// Copy `size` bytes between two buffers.
    ///
    /// # Panics
    ///
    /// Panics if either range exceeds its buffer.
    pub fn copy_buffer(
        &mut self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) {
        self.check_buffer_range(source, source_offset, size);
        self.check_buffer_range(destination, destination_offset, size);
        self.push(QueueCommand::CopyBuffer {
            source,
            source_offset,
            destination,
            destination_offset,
            size,
        });
    }

    /// Copy rows `row_pitch` bytes apart into a whole mip of `destination`.
    pub fn copy_buffer_to_image(
        &mut self,
        source: BufferId,
        source_offset: u64,
        row_pitch: u32,
        destination: ImageId,
        mip: u32,
    ) {
        let descriptor = self.registry.image_descriptor(destination);
        assert!(
            mip < descriptor.mip_levels,
            "contract violation: mip {mip} of {destination:?} does not exist"
        );
        let extent = descriptor.size;
        let rows = (extent.height >> mip).max(1) as u64 * (extent.depth >> mip).max(1) as u64;
        let row_bytes = (extent.width >> mip).max(1) as u64 * descriptor.format.block_size() as u64;
        assert!(
            row_pitch as u64 >= row_bytes,
            "contract violation: row pitch {row_pitch} is smaller than a row of {row_bytes} bytes"
        );
        self.check_buffer_range(source, source_offset, (rows - 1) * row_pitch as u64 + row_bytes);
        self.push(QueueCommand::CopyBufferToImage {
            source,
            source_offset,
            row_pitch,
            destination,
            mip,
        });
    }

    // ------------------------------------------------------------------
    // Acceleration structures
    // ------------------------------------------------------------------

    /// Build a bottom-level acceleration structure from triangle geometry.
    pub fn build_blas(&mut self, target: AccelerationStructureId, geometry: Vec<BlasGeometryDesc>) {
        self.require_compute("build_blas");
        assert_eq!(
            self.registry.acceleration_structure_kind(target),
            AccelerationStructureKind::BottomLevel,
            "contract violation: build_blas into a top-level structure"
        );
        assert!(!geometry.is_empty(), "contract violation: build_blas without geometry");
        self.push(QueueCommand::BuildBlas { target, geometry });
    }

    /// Build a top-level acceleration structure over bottom-level instances.
    pub fn build_tlas(&mut self, target: AccelerationStructureId, instances: Vec<TlasInstance>) {
        self.require_compute("build_tlas");
        assert_eq!(
            self.registry.acceleration_structure_kind(target),
            AccelerationStructureKind::TopLevel,
            "contract violation: build_tlas into a bottom-level structure"
        );
        for instance in &instances {
            assert_eq!(
                self.registry.acceleration_structure_kind(instance.blas),
                AccelerationStructureKind::BottomLevel,
                "contract violation: TLAS instance {} does not reference a bottom-level structure",
                instance.id
            );
        }
        self.push(QueueCommand::BuildTlas { target, instances });
    }

    // ------------------------------------------------------------------
    // Passes and draws
    // ------------------------------------------------------------------

    /// Begin a render pass of `size` pixels.
    ///
    /// Target sizes are checked when the pass is replayed.
    pub fn begin_pass(
        &mut self,
        size: Extent2d,
        color: Vec<ColorTarget>,
        depth_stencil: Option<DepthStencilTarget>,
    ) {
        self.require_graphics("begin_pass");
        self.push(QueueCommand::BeginPass {
            size,
            color,
            depth_stencil,
        });
    }

    pub fn draw(&mut self, draw: DrawInstanced) {
        self.require_graphics("draw");
        self.check_immediate_constants(&draw.bindings);
        self.push(QueueCommand::DrawInstanced(Box::new(draw)));
    }

    pub fn end_pass(&mut self) {
        self.require_graphics("end_pass");
        self.push(QueueCommand::EndPass);
    }

    pub fn dispatch(&mut self, dispatch: DispatchCompute) {
        self.require_compute("dispatch");
        self.check_immediate_constants(&dispatch.bindings);
        self.push(QueueCommand::DispatchCompute(Box::new(dispatch)));
    }

    pub fn trace_rays(&mut self, trace: TraceRays) {
        self.require_compute("trace_rays");
        self.check_immediate_constants(&trace.bindings);
        self.push(QueueCommand::TraceRays(Box::new(trace)));
    }

    /// Present the swap chain's acquired back buffer. Skipped when nothing
    /// rendered into the swap chain this batch.
    pub fn present(&mut self, swap_chain: SwapChainId) {
        self.require_graphics("present");
        self.registry.swap_chain_size(swap_chain);
        self.push(QueueCommand::Present { swap_chain });
    }

    // ------------------------------------------------------------------
    // Timestamps and immediate constants
    // ------------------------------------------------------------------

    /// Write a GPU timestamp before the next recorded command, or at the end
    /// of the queue's work if nothing follows.
    pub fn mark_timestamp(&mut self, label: impl Into<String>) {
        self.recording.timestamps.push(TimestampMarker {
            command_index: self.recording.commands.len(),
            label: label.into(),
        });
    }

    /// Reserve `size` bytes of constant data for this batch.
    ///
    /// Returns the view to bind with
    /// [`BoundResource::ImmediateConstants`](super::BoundResource::ImmediateConstants)
    /// and the bytes to fill in. The data is uploaded when the batch executes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or the batch's constant buffer is full.
    pub fn stage_immediate_constant_buffer(
        &mut self,
        size: u64,
    ) -> (ImmediateConstantView, &mut [u8]) {
        self.immediate.stage(self.batch, self.queue, size)
    }

    /// Stage a plain-old-data value as immediate constants.
    pub fn write_immediate_constants<T: bytemuck::Pod>(
        &mut self,
        value: &T,
    ) -> ImmediateConstantView {
        let bytes = bytemuck::bytes_of(value);
        let (view, target) = self.stage_immediate_constant_buffer(bytes.len() as u64);
        target.copy_from_slice(bytes);
        view
    }
}

impl std::fmt::Debug for QueueRecorder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRecorder")
            .field("queue", &self.queue)
            .field("queue_type", &self.queue_type)
            .field("batch", &self.batch)
            .field("commands", &self.recording.commands.len())
            .finish()
    }
}
