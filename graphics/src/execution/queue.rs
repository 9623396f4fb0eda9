//! Replay of one queue's command stream.
//!
//! A [`QueueContext`] walks its recorded commands one at a time. Before each
//! command it writes pending timestamps and, when the command consumes work of
//! another queue, closes the open command list so the next submission can wait
//! on the producer's semaphore. After each command it signals its own
//! semaphore when another queue consumes the result.
//!
//! ```text
//! NotStarted --start_execution--> Executing <--end_pass-- WithinPass
//!                                     |  \---begin_pass-->/
//!                                     \--finish_execution--> Finished
//! ```

use tessera_core::arena::align_up;

use super::batch::{BatchContext, BoundDescriptorSets};
use super::dependency::QueueDependencies;
use crate::backend::{
    BlasGeometry, BufferHandle, BufferImageCopy, BuildSizes, CommandList, GpuBackend,
    ImageViewDescriptor, IndexBufferView, InstanceDescription, PipelineBindPoint,
    PipelineStateHandle, QueueSynchronization, RenderPassBegin, SemaphoreValue,
    ShaderTableRegion, SwapChainStatus, TimelineSemaphoreHandle, TimestampQueryHeapHandle,
    TraceRaysRegions, VertexBufferView,
};
use crate::cache::{ComputePipelineKey, GraphicsPipelineKey, HitGroupKey, RaytracingPipelineKey};
use crate::command::{
    BlasGeometryDesc, BoundResource, ColorTarget, DepthStencilTarget, DispatchCompute,
    DrawInstanced, QueueCommand, QueueRecording, RecordedCommand, RenderTarget, ResourceBindings,
    TimestampMarker, TlasInstance, TraceRays,
};
use crate::error::GraphicsError;
use crate::profiling::profile_scope;
use crate::resources::{AccelerationStructureId, BufferId, ImageId, ResourceRegistry, SwapChainId};
use crate::transition::SimultaneousScope;
use crate::types::{
    BufferAccess, BufferUsage, ClearValue, Extent2d, Extent3d, ImageAccess, ImageDimension,
    MipRange, QueueIndex, ScissorRect, ShaderStages, TextureFormat, Viewport,
};

const RAY_TRACING_STAGES: ShaderStages = ShaderStages::RAY_GENERATION
    .union(ShaderStages::MISS)
    .union(ShaderStages::CLOSEST_HIT)
    .union(ShaderStages::ANY_HIT)
    .union(ShaderStages::INTERSECTION);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueState {
    NotStarted,
    Executing,
    WithinPass,
    Finished,
}

/// Work one queue did for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatistics {
    pub queue: QueueIndex,
    /// Commands replayed.
    pub commands: usize,
    /// Command lists submitted, including empty submissions that only wait
    /// or signal.
    pub submissions: usize,
    pub image_barriers: usize,
    pub buffer_barriers: usize,
    /// Cross-queue semaphore waits.
    pub waits: usize,
    /// Semaphore signals, including the final one.
    pub signals: usize,
    pub timestamps: usize,
    pub presents: usize,
}

impl QueueStatistics {
    pub(crate) fn new(queue: QueueIndex) -> Self {
        Self {
            queue,
            commands: 0,
            submissions: 0,
            image_barriers: 0,
            buffer_barriers: 0,
            waits: 0,
            signals: 0,
            timestamps: 0,
            presents: 0,
        }
    }
}

/// Outcome of one present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentResult {
    pub queue: QueueIndex,
    pub swap_chain: SwapChainId,
    pub status: SwapChainStatus,
}

/// Timestamps one queue wrote, resolved once the batch retires.
#[derive(Debug)]
pub(crate) struct TimestampQueries {
    pub(crate) queue: QueueIndex,
    pub(crate) heap: TimestampQueryHeapHandle,
    pub(crate) labels: Vec<String>,
}

#[derive(Debug)]
struct PassState {
    size: Extent2d,
    color_formats: Vec<TextureFormat>,
    depth_stencil_format: Option<TextureFormat>,
}

pub(crate) struct QueueContext {
    queue: QueueIndex,
    semaphore: TimelineSemaphoreHandle,
    commands: Vec<RecordedCommand>,
    timestamps: Vec<TimestampMarker>,
    dependencies: QueueDependencies,
    state: QueueState,
    index: usize,
    next_timestamp: usize,
    next_acquire: usize,
    next_release: usize,
    list: Option<Box<dyn CommandList>>,
    pending_waits: Vec<SemaphoreValue>,
    timestamp_heap: Option<TimestampQueryHeapHandle>,
    pass: Option<PassState>,
    bound_pipeline: Option<(PipelineBindPoint, PipelineStateHandle)>,
    presents: Vec<PresentResult>,
    statistics: QueueStatistics,
}

impl QueueContext {
    pub(crate) fn new(
        queue: QueueIndex,
        semaphore: TimelineSemaphoreHandle,
        recording: QueueRecording,
        dependencies: QueueDependencies,
    ) -> Self {
        Self {
            queue,
            semaphore,
            commands: recording.commands,
            timestamps: recording.timestamps,
            dependencies,
            state: QueueState::NotStarted,
            index: 0,
            next_timestamp: 0,
            next_acquire: 0,
            next_release: 0,
            list: None,
            pending_waits: Vec::new(),
            timestamp_heap: None,
            pass: None,
            bound_pipeline: None,
            presents: Vec::new(),
            statistics: QueueStatistics::new(queue),
        }
    }

    pub(crate) fn queue(&self) -> QueueIndex {
        self.queue
    }

    pub(crate) fn state(&self) -> QueueState {
        self.state
    }

    /// Semaphore value signaled once the queue's batch work has completed.
    pub(crate) fn final_value(&self) -> u64 {
        self.dependencies.final_value
    }

    pub(crate) fn statistics(&self) -> QueueStatistics {
        self.statistics
    }

    /// True once every recorded command has been replayed.
    pub(crate) fn is_finished(&self) -> bool {
        self.index >= self.commands.len()
    }

    /// Recording order of the next command to replay.
    pub(crate) fn next_sequence(&self) -> Option<u64> {
        match self.state {
            QueueState::Executing | QueueState::WithinPass => {
                self.commands.get(self.index).map(|c| c.sequence)
            }
            QueueState::NotStarted | QueueState::Finished => None,
        }
    }

    pub(crate) fn take_presents(&mut self) -> Vec<PresentResult> {
        std::mem::take(&mut self.presents)
    }

    pub(crate) fn take_timestamp_queries(&mut self) -> Option<TimestampQueries> {
        let heap = self.timestamp_heap.take()?;
        Some(TimestampQueries {
            queue: self.queue,
            heap,
            labels: self.timestamps.drain(..).map(|m| m.label).collect(),
        })
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    fn command_list(
        &mut self,
        backend: &dyn GpuBackend,
    ) -> Result<&mut Box<dyn CommandList>, GraphicsError> {
        let list = match self.list.take() {
            Some(list) => list,
            None => backend.create_command_list(self.queue)?,
        };
        Ok(self.list.insert(list))
    }

    /// Submit the open list with the pending waits and `signals`.
    ///
    /// Submits an empty list when there is nothing recorded but something to
    /// wait for or signal.
    fn flush(
        &mut self,
        backend: &dyn GpuBackend,
        signals: &[SemaphoreValue],
    ) -> Result<(), GraphicsError> {
        let lists = match self.list.take() {
            Some(mut list) => {
                list.finish();
                vec![list]
            }
            None if self.pending_waits.is_empty() && signals.is_empty() => return Ok(()),
            None => Vec::new(),
        };
        let waits = std::mem::take(&mut self.pending_waits);
        backend.submit_command_lists(
            self.queue,
            lists,
            &QueueSynchronization {
                waits: &waits,
                signals,
                fence: None,
            },
        )?;
        log::trace!(
            "{}: submitted with {} wait(s) and {} signal(s)",
            self.queue,
            waits.len(),
            signals.len()
        );
        self.statistics.submissions += 1;
        self.statistics.signals += signals.len();
        self.bound_pipeline = None;
        Ok(())
    }

    /// Prepare and collect the staged transitions into one barrier call.
    fn apply_transitions(&mut self, batch: &mut BatchContext<'_>) -> Result<(), GraphicsError> {
        batch.transitions.prepare(batch.registry);
        let barriers = batch.transitions.collect_transitions(batch.registry);
        if barriers.is_empty() {
            return Ok(());
        }
        self.statistics.image_barriers += barriers.images.len();
        self.statistics.buffer_barriers += barriers.buffers.len();
        self.command_list(batch.backend)?
            .resource_barrier(&barriers.images, &barriers.buffers);
        Ok(())
    }

    fn write_timestamps(
        &mut self,
        backend: &dyn GpuBackend,
        command_index: usize,
    ) -> Result<(), GraphicsError> {
        while self
            .timestamps
            .get(self.next_timestamp)
            .is_some_and(|marker| marker.command_index <= command_index)
        {
            if let Some(heap) = self.timestamp_heap {
                let slot = self.next_timestamp as u32;
                self.command_list(backend)?.query_timestamp(heap, slot);
                self.statistics.timestamps += 1;
            }
            self.next_timestamp += 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Allocate the timestamp heap and copy this queue's immediate constants
    /// into the device buffer.
    pub(crate) fn start_execution(
        &mut self,
        batch: &mut BatchContext<'_>,
    ) -> Result<(), GraphicsError> {
        assert_eq!(
            self.state,
            QueueState::NotStarted,
            "contract violation: {} started twice",
            self.queue
        );
        self.state = QueueState::Executing;

        if !self.timestamps.is_empty() {
            if batch.config.timestamps_enabled {
                let heap = batch
                    .backend
                    .create_timestamp_query_heap(self.timestamps.len() as u32)?;
                batch.track(heap);
                self.timestamp_heap = Some(heap);
            } else {
                log::trace!(
                    "{}: timestamps disabled, {} marker(s) dropped",
                    self.queue,
                    self.timestamps.len()
                );
            }
        }

        let copies = batch
            .immediate
            .as_ref()
            .map(|imm| (imm.upload, imm.device, imm.staged.copy_regions(self.queue)));
        if let Some((upload, device, regions)) =
            copies.filter(|(_, _, regions)| !regions.is_empty())
        {
            let list = self.command_list(batch.backend)?;
            for &(offset, size) in &regions {
                list.copy_buffer(upload, offset, device, offset, size);
            }
            batch
                .transitions
                .stage_raw_buffer(device, BufferAccess::COPY_DESTINATION, BufferAccess::CONSTANT);
            self.apply_transitions(batch)?;
            log::trace!(
                "{}: {} immediate constant region(s) copied",
                self.queue,
                regions.len()
            );
        }
        Ok(())
    }

    /// Replay the next command with its waits, timestamps and signals.
    pub(crate) fn execute_next_command(
        &mut self,
        batch: &mut BatchContext<'_>,
    ) -> Result<(), GraphicsError> {
        assert!(
            matches!(self.state, QueueState::Executing | QueueState::WithinPass),
            "contract violation: {} is {:?}, not executing",
            self.queue,
            self.state
        );
        let index = self.index;
        assert!(
            index < self.commands.len(),
            "contract violation: {} has no command left",
            self.queue
        );
        let backend = batch.backend;

        self.write_timestamps(backend, index)?;

        let mut waits = Vec::new();
        while let Some(acquire) = self
            .dependencies
            .acquires
            .get(self.next_acquire)
            .copied()
            .filter(|a| a.command_index == index)
        {
            waits.push(acquire.wait);
            self.next_acquire += 1;
        }
        if !waits.is_empty() {
            self.flush(backend, &[])?;
            self.statistics.waits += waits.len();
            self.pending_waits.extend(waits);
        }

        let commands = std::mem::take(&mut self.commands);
        let result = self.execute(batch, &commands, index);
        self.commands = commands;
        result?;
        self.index += 1;
        self.statistics.commands += 1;

        let mut signals = Vec::new();
        while let Some(release) = self
            .dependencies
            .releases
            .get(self.next_release)
            .copied()
            .filter(|r| r.command_index == index)
        {
            signals.push(SemaphoreValue {
                semaphore: self.semaphore,
                value: release.value,
            });
            self.next_release += 1;
        }
        if !signals.is_empty() {
            self.flush(backend, &signals)?;
        }
        Ok(())
    }

    /// Write trailing timestamps and submit the rest of the queue's work with
    /// the final semaphore signal.
    pub(crate) fn finish_execution(
        &mut self,
        batch: &mut BatchContext<'_>,
    ) -> Result<(), GraphicsError> {
        assert!(
            self.state != QueueState::WithinPass,
            "contract violation: {} finished its batch inside a pass",
            self.queue
        );
        assert!(
            self.state == QueueState::Executing && self.is_finished(),
            "contract violation: {} finished with commands left",
            self.queue
        );
        self.write_timestamps(batch.backend, usize::MAX)?;
        let signal = SemaphoreValue {
            semaphore: self.semaphore,
            value: self.dependencies.final_value,
        };
        self.flush(batch.backend, &[signal])?;
        self.state = QueueState::Finished;
        log::trace!(
            "{}: finished with {} command(s) in {} submission(s)",
            self.queue,
            self.statistics.commands,
            self.statistics.submissions
        );
        Ok(())
    }

    /// Drop unsubmitted work and signal the final value so that no other
    /// queue waits forever on a failed batch.
    pub(crate) fn abandon(&mut self, backend: &dyn GpuBackend) {
        if self.state == QueueState::Finished {
            return;
        }
        self.list = None;
        self.pending_waits.clear();
        self.pass = None;
        let signal = SemaphoreValue {
            semaphore: self.semaphore,
            value: self.dependencies.final_value,
        };
        if let Err(error) = backend.submit_command_lists(
            self.queue,
            Vec::new(),
            &QueueSynchronization {
                waits: &[],
                signals: &[signal],
                fence: None,
            },
        ) {
            log::error!("{}: failed to signal abandoned batch: {error}", self.queue);
        }
        self.state = QueueState::Finished;
    }

    // ------------------------------------------------------------------
    // Executors
    // ------------------------------------------------------------------

    fn execute(
        &mut self,
        batch: &mut BatchContext<'_>,
        commands: &[RecordedCommand],
        index: usize,
    ) -> Result<(), GraphicsError> {
        let command = &commands[index].command;
        log::trace!("{}: executing #{index} {}", self.queue, command.name());
        match command {
            QueueCommand::CopyBuffer {
                source,
                source_offset,
                destination,
                destination_offset,
                size,
            } => self.copy_buffer(
                batch,
                *source,
                *source_offset,
                *destination,
                *destination_offset,
                *size,
            ),
            QueueCommand::CopyBufferToImage {
                source,
                source_offset,
                row_pitch,
                destination,
                mip,
            } => self.copy_buffer_to_image(
                batch,
                *source,
                *source_offset,
                *row_pitch,
                *destination,
                *mip,
            ),
            QueueCommand::BuildBlas { target, geometry } => {
                self.build_blas(batch, *target, geometry)
            }
            QueueCommand::BuildTlas { target, instances } => {
                self.build_tlas(batch, *target, instances)
            }
            QueueCommand::BeginPass {
                size,
                color,
                depth_stencil,
            } => self.begin_pass(
                batch,
                *size,
                color,
                depth_stencil.as_ref(),
                &commands[index + 1..],
            ),
            QueueCommand::DrawInstanced(draw) => self.draw(batch, draw),
            QueueCommand::DispatchCompute(dispatch) => self.dispatch(batch, dispatch),
            QueueCommand::TraceRays(trace) => self.trace_rays(batch, trace),
            QueueCommand::EndPass => self.end_pass(batch),
            QueueCommand::Present { swap_chain } => self.present(batch, *swap_chain),
        }
    }

    fn require_outside_pass(&self, what: &str) {
        assert!(
            self.pass.is_none(),
            "contract violation: {what} recorded inside a pass on {}",
            self.queue
        );
    }

    /// Bind `pipeline` unless it is already bound, then the descriptor sets.
    fn bind_pipeline(
        &mut self,
        backend: &dyn GpuBackend,
        bind_point: PipelineBindPoint,
        pipeline: PipelineStateHandle,
        sets: &BoundDescriptorSets,
    ) -> Result<&mut Box<dyn CommandList>, GraphicsError> {
        let rebind =
            self.bound_pipeline.replace((bind_point, pipeline)) != Some((bind_point, pipeline));
        let list = self.command_list(backend)?;
        if rebind {
            list.bind_pipeline_state(bind_point, pipeline);
        }
        for (first_space, run) in &sets.runs {
            list.bind_descriptor_sets(bind_point, sets.resources, *first_space, run);
        }
        Ok(list)
    }

    fn copy_buffer(
        &mut self,
        batch: &mut BatchContext<'_>,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), GraphicsError> {
        self.require_outside_pass("copy_buffer");
        batch.transitions.simultaneous(|scope| {
            scope.stage_buffer(source, BufferAccess::COPY_SOURCE);
            scope.stage_buffer(destination, BufferAccess::COPY_DESTINATION);
        });
        self.apply_transitions(batch)?;
        let source = batch.registry.buffer_entry(source).handle;
        let destination = batch.registry.buffer_entry(destination).handle;
        self.command_list(batch.backend)?
            .copy_buffer(source, source_offset, destination, destination_offset, size);
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        batch: &mut BatchContext<'_>,
        source: BufferId,
        source_offset: u64,
        row_pitch: u32,
        destination: ImageId,
        mip: u32,
    ) -> Result<(), GraphicsError> {
        self.require_outside_pass("copy_buffer_to_image");
        batch.transitions.simultaneous(|scope| {
            scope.stage_buffer(source, BufferAccess::COPY_SOURCE);
            scope.stage_image(destination, MipRange::only(mip), ImageAccess::CopyDestination);
        });
        self.apply_transitions(batch)?;

        let entry = batch.registry.image_entry(destination);
        let extent = entry.descriptor.size;
        let copy = BufferImageCopy {
            buffer: batch.registry.buffer_entry(source).handle,
            buffer_offset: source_offset,
            row_pitch,
            image: entry.handle,
            mip,
            size: Extent3d {
                width: (extent.width >> mip).max(1),
                height: (extent.height >> mip).max(1),
                depth: (extent.depth >> mip).max(1),
            },
            format: entry.descriptor.format,
        };
        self.command_list(batch.backend)?.copy_buffer_to_image(&copy);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------

    fn begin_pass(
        &mut self,
        batch: &mut BatchContext<'_>,
        size: Extent2d,
        color: &[ColorTarget],
        depth_stencil: Option<&DepthStencilTarget>,
        following: &[RecordedCommand],
    ) -> Result<(), GraphicsError> {
        profile_scope!("begin_pass");
        assert!(
            self.pass.is_none(),
            "contract violation: begin_pass called while already within a pass"
        );

        for target in color {
            if let RenderTarget::SwapChain(id) = target.target {
                batch.registry.acquire_next_image(id)?;
            }
        }
        for target in color {
            let extent = match target.target {
                RenderTarget::Image { image, mip } => {
                    batch.registry.image_entry(image).descriptor.size.to_2d().mip(mip)
                }
                RenderTarget::SwapChain(id) => batch.registry.swap_chain_entry(id).descriptor.size,
            };
            check_target_size(&target.target, extent, size);
        }
        if let Some(depth) = depth_stencil {
            let extent = batch
                .registry
                .image_entry(depth.image)
                .descriptor
                .size
                .to_2d()
                .mip(depth.mip);
            check_target_size(&depth.image, extent, size);
        }

        // Targets and everything the pass's draws read transition together.
        let registry = &*batch.registry;
        batch.transitions.simultaneous(|scope| {
            for target in color {
                match target.target {
                    RenderTarget::Image { image, mip } => scope.stage_image(
                        image,
                        MipRange::only(mip),
                        ImageAccess::ColorRenderTarget,
                    ),
                    RenderTarget::SwapChain(id) => {
                        scope.stage_swap_chain(id, ImageAccess::ColorRenderTarget)
                    }
                }
            }
            if let Some(depth) = depth_stencil {
                let access = if depth.read_only {
                    ImageAccess::DepthStencilRead
                } else {
                    ImageAccess::DepthStencilWrite
                };
                scope.stage_image(depth.image, MipRange::only(depth.mip), access);
            }
            for recorded in following {
                match &recorded.command {
                    QueueCommand::DrawInstanced(draw) => stage_draw(scope, draw, registry),
                    QueueCommand::EndPass | QueueCommand::BeginPass { .. } => break,
                    _ => {}
                }
            }
        });
        self.apply_transitions(batch)?;

        let mut views = Vec::with_capacity(color.len());
        let mut color_formats = Vec::with_capacity(color.len());
        for target in color {
            let (view, format) = match target.target {
                RenderTarget::Image { image, mip } => {
                    batch.registry_image_view(image, MipRange::only(mip))?
                }
                RenderTarget::SwapChain(id) => {
                    let acquired = batch.registry.acquire_next_image(id)?;
                    let entry = batch.registry.swap_chain_entry(id);
                    let descriptor = ImageViewDescriptor {
                        image: entry.images[acquired as usize],
                        dimension: ImageDimension::D2,
                        format: entry.descriptor.format,
                        first_mip: 0,
                        mip_count: 1,
                    };
                    (batch.image_view(descriptor)?, descriptor.format)
                }
            };
            views.push(view);
            color_formats.push(format);
        }
        let depth_view = match depth_stencil {
            Some(depth) => Some(batch.registry_image_view(depth.image, MipRange::only(depth.mip))?),
            None => None,
        };

        let frame_buffer = batch.frame_buffer(&views, depth_view.map(|(view, _)| view), size)?;
        let color_clears: Vec<ClearValue> = color.iter().map(|target| target.clear).collect();
        let depth_stencil_clear = depth_stencil.map_or(ClearValue::DontCare, |depth| depth.clear);
        self.command_list(batch.backend)?.begin_pass(&RenderPassBegin {
            frame_buffer,
            size,
            color_clears: &color_clears,
            depth_stencil_clear,
        });
        self.pass = Some(PassState {
            size,
            color_formats,
            depth_stencil_format: depth_view.map(|(_, format)| format),
        });
        self.bound_pipeline = None;
        self.state = QueueState::WithinPass;
        Ok(())
    }

    fn end_pass(&mut self, batch: &mut BatchContext<'_>) -> Result<(), GraphicsError> {
        if self.pass.take().is_none() {
            panic!("contract violation: end_pass called outside a pass on {}", self.queue);
        }
        self.state = QueueState::Executing;
        self.command_list(batch.backend)?.end_pass();
        Ok(())
    }

    fn draw(
        &mut self,
        batch: &mut BatchContext<'_>,
        draw: &DrawInstanced,
    ) -> Result<(), GraphicsError> {
        let Some(pass) = &self.pass else {
            panic!("contract violation: draw recorded outside a pass on {}", self.queue);
        };
        let size = pass.size;
        let key = |resources| GraphicsPipelineKey {
            resources,
            vertex_shader: draw.vertex_shader.clone(),
            pixel_shader: draw.pixel_shader.clone(),
            input_buffers: draw.vertex_buffers.iter().map(|input| input.layout.clone()).collect(),
            color_formats: pass.color_formats.clone(),
            depth_stencil_format: pass.depth_stencil_format,
            state: draw.state.clone(),
            topology: draw.topology,
        };

        let sets = batch
            .use_pipeline_resources(&draw.bindings, ShaderStages::VERTEX | ShaderStages::PIXEL)?;
        let pipeline = batch.cache.get_graphics_pipeline_state(&key(sets.resources))?;

        let vertex_buffers: Vec<VertexBufferView> = draw
            .vertex_buffers
            .iter()
            .map(|input| VertexBufferView {
                buffer: batch.registry.buffer_entry(input.buffer).handle,
                offset: input.offset,
                stride: input.layout.stride,
            })
            .collect();
        let index_buffer = draw.index_buffer.map(|input| IndexBufferView {
            buffer: batch.registry.buffer_entry(input.buffer).handle,
            offset: input.offset,
            format: input.format,
        });
        let viewport = draw.viewport.unwrap_or_else(|| Viewport::covering(size));
        let scissor = draw.scissor.unwrap_or_else(|| ScissorRect::covering(size));

        let list = self.bind_pipeline(batch.backend, PipelineBindPoint::Graphics, pipeline, &sets)?;
        if !vertex_buffers.is_empty() {
            list.bind_vertex_buffers(0, &vertex_buffers);
        }
        list.set_viewports(&[viewport]);
        list.set_scissors(&[scissor]);
        match index_buffer {
            Some(view) => {
                list.bind_index_buffer(view);
                list.draw_indexed_instanced(
                    draw.first,
                    draw.count,
                    draw.base_vertex,
                    draw.first_instance,
                    draw.instance_count,
                );
            }
            None => list.draw_instanced(
                draw.first,
                draw.count,
                draw.first_instance,
                draw.instance_count,
            ),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Compute and ray tracing
    // ------------------------------------------------------------------

    fn dispatch(
        &mut self,
        batch: &mut BatchContext<'_>,
        dispatch: &DispatchCompute,
    ) -> Result<(), GraphicsError> {
        self.require_outside_pass("dispatch");
        let registry = &*batch.registry;
        batch
            .transitions
            .simultaneous(|scope| stage_bindings(scope, &dispatch.bindings, registry));
        self.apply_transitions(batch)?;

        let sets = batch.use_pipeline_resources(&dispatch.bindings, ShaderStages::COMPUTE)?;
        let pipeline = batch.cache.get_compute_pipeline_state(&ComputePipelineKey {
            resources: sets.resources,
            shader: dispatch.shader.clone(),
        })?;
        let [x, y, z] = dispatch.groups;
        self.bind_pipeline(batch.backend, PipelineBindPoint::Compute, pipeline, &sets)?
            .run_compute_shader(x, y, z);
        Ok(())
    }

    fn trace_rays(
        &mut self,
        batch: &mut BatchContext<'_>,
        trace: &TraceRays,
    ) -> Result<(), GraphicsError> {
        self.require_outside_pass("trace_rays");
        let registry = &*batch.registry;
        batch
            .transitions
            .simultaneous(|scope| stage_bindings(scope, &trace.bindings, registry));
        self.apply_transitions(batch)?;

        let sets = batch.use_pipeline_resources(&trace.bindings, RAY_TRACING_STAGES)?;
        let key = RaytracingPipelineKey {
            resources: sets.resources,
            ray_generation: trace.ray_generation.clone(),
            miss: trace.miss.clone(),
            hit_groups: trace
                .hit_groups
                .iter()
                .map(|group| HitGroupKey {
                    closest_hit: group.closest_hit.clone(),
                    any_hit: group.any_hit.clone(),
                })
                .collect(),
            max_recursion_depth: trace.max_recursion_depth,
            max_payload_size: trace.max_payload_size,
            max_attribute_size: trace.max_attribute_size,
        };
        let pipeline = batch.cache.get_raytracing_pipeline_state(&key)?;
        let regions = write_shader_table(batch, pipeline, &key)?;
        self.bind_pipeline(batch.backend, PipelineBindPoint::RayTracing, pipeline, &sets)?
            .trace_rays(&regions, trace.width, trace.height, trace.depth);
        Ok(())
    }

    fn build_blas(
        &mut self,
        batch: &mut BatchContext<'_>,
        target: AccelerationStructureId,
        geometry: &[BlasGeometryDesc],
    ) -> Result<(), GraphicsError> {
        self.require_outside_pass("build_blas");
        let entry = batch.registry.acceleration_structure_entry(target);
        let (handle, target_buffer) = (entry.handle, entry.buffer);
        batch.transitions.simultaneous(|scope| {
            scope.stage_buffer(target_buffer, BufferAccess::ACCELERATION_STRUCTURE_WRITE);
            for g in geometry {
                scope.stage_buffer(
                    g.vertex_buffer,
                    BufferAccess::ACCELERATION_STRUCTURE_BUILD_INPUT,
                );
                if let Some(index) = g.index_buffer {
                    scope.stage_buffer(
                        index.buffer,
                        BufferAccess::ACCELERATION_STRUCTURE_BUILD_INPUT,
                    );
                }
            }
        });

        let native: Vec<BlasGeometry> = geometry
            .iter()
            .map(|g| BlasGeometry {
                vertex_buffer: batch.registry.buffer_entry(g.vertex_buffer).handle,
                vertex_offset: g.vertex_offset,
                vertex_stride: g.vertex_stride,
                vertex_count: g.vertex_count,
                vertex_format: g.vertex_format,
                index_buffer: g.index_buffer.map(|index| IndexBufferView {
                    buffer: batch.registry.buffer_entry(index.buffer).handle,
                    offset: index.offset,
                    format: index.format,
                }),
                index_count: g.index_count,
                opaque: g.opaque,
            })
            .collect();
        let sizes = batch.backend.bottom_level_build_sizes(&native);
        check_structure_size(batch.registry, target, target_buffer, sizes);

        let (scratch, offset, bookmark) = batch.scratch(self.queue, sizes.build_scratch_size)?;
        stage_scratch(batch, scratch);
        self.apply_transitions(batch)?;
        self.command_list(batch.backend)?
            .build_bottom_level_acceleration_structure(&native, handle, scratch, offset);
        batch.release_scratch(self.queue, bookmark);
        Ok(())
    }

    fn build_tlas(
        &mut self,
        batch: &mut BatchContext<'_>,
        target: AccelerationStructureId,
        instances: &[TlasInstance],
    ) -> Result<(), GraphicsError> {
        self.require_outside_pass("build_tlas");
        let entry = batch.registry.acceleration_structure_entry(target);
        let (handle, target_buffer) = (entry.handle, entry.buffer);
        let registry = &*batch.registry;
        batch.transitions.simultaneous(|scope| {
            scope.stage_buffer(target_buffer, BufferAccess::ACCELERATION_STRUCTURE_WRITE);
            for instance in instances {
                let blas = registry.acceleration_structure_entry(instance.blas).buffer;
                scope.stage_buffer(blas, BufferAccess::ACCELERATION_STRUCTURE_READ);
            }
        });

        let descriptions: Vec<InstanceDescription> = instances
            .iter()
            .map(|instance| {
                let blas = batch.registry.acceleration_structure_entry(instance.blas).handle;
                InstanceDescription::new(
                    instance.transform,
                    instance.id,
                    instance.mask,
                    instance.hit_group_offset,
                    instance.flags,
                    batch.backend.acceleration_structure_address(blas),
                )
            })
            .collect();
        let count = descriptions.len() as u32;
        let upload = batch.upload(
            bytemuck::cast_slice(&descriptions),
            BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
        )?;
        let sizes = batch.backend.top_level_build_sizes(count);
        check_structure_size(batch.registry, target, target_buffer, sizes);

        let (scratch, offset, bookmark) = batch.scratch(self.queue, sizes.build_scratch_size)?;
        stage_scratch(batch, scratch);
        self.apply_transitions(batch)?;
        self.command_list(batch.backend)?
            .build_top_level_acceleration_structure(upload, 0, count, handle, scratch, offset);
        batch.release_scratch(self.queue, bookmark);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Presentation
    // ------------------------------------------------------------------

    fn present(
        &mut self,
        batch: &mut BatchContext<'_>,
        swap_chain: SwapChainId,
    ) -> Result<(), GraphicsError> {
        self.require_outside_pass("present");
        let entry = batch.registry.swap_chain_entry(swap_chain);
        if entry.acquired.is_none() {
            log::debug!(
                "{}: nothing rendered into {swap_chain:?} this batch, present skipped",
                self.queue
            );
            return Ok(());
        }
        let handle = entry.handle;

        batch.transitions.stage_swap_chain(swap_chain, ImageAccess::Present);
        self.apply_transitions(batch)?;
        self.flush(batch.backend, &[])?;

        let status = batch.backend.present(self.queue, handle);
        if status != SwapChainStatus::Ok {
            log::warn!("{}: present of {swap_chain:?} returned {status:?}", self.queue);
        }
        batch.registry.swap_chain_entry_mut(swap_chain).acquired = None;
        self.statistics.presents += 1;
        self.presents.push(PresentResult {
            queue: self.queue,
            swap_chain,
            status,
        });
        Ok(())
    }
}

impl std::fmt::Debug for QueueContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueContext")
            .field("queue", &self.queue)
            .field("state", &self.state)
            .field("index", &self.index)
            .field("commands", &self.commands.len())
            .field("open_list", &self.list.is_some())
            .field("pending_waits", &self.pending_waits.len())
            .finish()
    }
}

fn check_target_size(target: &dyn std::fmt::Debug, extent: Extent2d, size: Extent2d) {
    assert_eq!(
        extent, size,
        "contract violation: render target {target:?} is {}x{} but the pass is {}x{}",
        extent.width, extent.height, size.width, size.height
    );
}

fn check_structure_size(
    registry: &ResourceRegistry,
    target: AccelerationStructureId,
    buffer: BufferId,
    sizes: BuildSizes,
) {
    let capacity = registry.buffer_entry(buffer).descriptor.size;
    assert!(
        capacity >= sizes.acceleration_structure_size,
        "contract violation: {target:?} holds {capacity} byte(s) but its build needs {}",
        sizes.acceleration_structure_size
    );
}

fn stage_scratch(batch: &mut BatchContext<'_>, scratch: BufferHandle) {
    batch.transitions.stage_raw_buffer(
        scratch,
        BufferAccess::ACCELERATION_STRUCTURE_SCRATCH,
        BufferAccess::ACCELERATION_STRUCTURE_SCRATCH,
    );
}

/// Stage every resource `bindings` reads or writes.
fn stage_bindings(
    scope: &mut SimultaneousScope<'_>,
    bindings: &ResourceBindings,
    registry: &ResourceRegistry,
) {
    for resource in bindings.resources() {
        match resource {
            BoundResource::ReadOnlyImage { image, mips } => {
                scope.stage_image(*image, *mips, ImageAccess::ShaderRead)
            }
            BoundResource::ReadWriteImage { image, mips } => {
                scope.stage_image(*image, *mips, ImageAccess::ShaderReadWrite)
            }
            BoundResource::ReadOnlyBuffer { buffer, .. } => {
                scope.stage_buffer(*buffer, BufferAccess::SHADER_READ)
            }
            BoundResource::ReadWriteBuffer { buffer, .. } => {
                scope.stage_buffer(*buffer, BufferAccess::shader_read_write())
            }
            BoundResource::ConstantBuffer { buffer, .. } => {
                scope.stage_buffer(*buffer, BufferAccess::CONSTANT)
            }
            BoundResource::ImageArray(id) => {
                let array = registry.image_array(*id);
                let access = array.access();
                for slot in array.slots.iter().flatten() {
                    scope.stage_image(slot.image, slot.mips, access);
                }
            }
            BoundResource::BufferArray(id) => {
                let array = registry.buffer_array(*id);
                let access = array.access();
                for slot in array.slots.iter().flatten() {
                    scope.stage_buffer(slot.buffer, access);
                }
            }
            BoundResource::AccelerationStructure(id) => {
                let buffer = registry.acceleration_structure_entry(*id).buffer;
                scope.stage_buffer(buffer, BufferAccess::ACCELERATION_STRUCTURE_READ);
            }
            BoundResource::ImmediateConstants(_) | BoundResource::Sampler(_) => {}
        }
    }
}

fn stage_draw(
    scope: &mut SimultaneousScope<'_>,
    draw: &DrawInstanced,
    registry: &ResourceRegistry,
) {
    for input in &draw.vertex_buffers {
        scope.stage_buffer(input.buffer, BufferAccess::VERTEX);
    }
    if let Some(index) = draw.index_buffer {
        scope.stage_buffer(index.buffer, BufferAccess::INDEX);
    }
    stage_bindings(scope, &draw.bindings, registry);
}

/// Upload the shader table of `pipeline`: ray generation, then the miss
/// shaders, then the hit groups, one aligned record each.
fn write_shader_table(
    batch: &mut BatchContext<'_>,
    pipeline: PipelineStateHandle,
    key: &RaytracingPipelineKey,
) -> Result<TraceRaysRegions, GraphicsError> {
    let handle_size = batch.backend.shader_group_handle_size() as u64;
    let stride = align_up(handle_size, batch.backend.shader_table_alignment() as u64);
    let groups = key.group_count();
    let handles = batch.backend.shader_group_handles(pipeline, 0, groups);

    let mut table = vec![0u8; (stride * groups as u64) as usize];
    for (group, handle) in handles.chunks_exact(handle_size as usize).enumerate() {
        let offset = group * stride as usize;
        table[offset..offset + handle.len()].copy_from_slice(handle);
    }
    let buffer = batch.upload(&table, BufferUsage::SHADER_RECORD)?;

    let miss_count = key.miss.len() as u64;
    let hit_count = key.hit_groups.len() as u64;
    let region = |first: u64, count: u64| ShaderTableRegion {
        buffer,
        offset: first * stride,
        stride,
        size: count * stride,
    };
    Ok(TraceRaysRegions {
        ray_generation: region(0, 1),
        miss: region(1, miss_count),
        hit_group: region(1 + miss_count, hit_count),
    })
}
