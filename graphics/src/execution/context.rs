//! The execution context: recording, batch execution and retirement.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::batch::{BatchContext, BatchResources};
use super::dependency::{LastUse, ResourceKey, compute_dependencies};
use super::immediate::{ImmediateConstantStaging, StagedConstants};
use super::queue::{PresentResult, QueueContext, QueueStatistics, TimestampQueries};
use crate::backend::{
    BackendObject, FenceHandle, GpuBackend, QueueSynchronization, SemaphoreValue,
    TimelineSemaphoreHandle,
};
use crate::cache::PipelineCache;
use crate::command::{QueueRecorder, QueueRecording, RecordedCommand};
use crate::config::ExecutionConfig;
use crate::error::GraphicsError;
use crate::profiling::{frame_mark, profile_function, profile_scope};
use crate::resources::{
    BufferDescriptorArrayId, BufferSlot, ImageDescriptorArrayId, ImageSlot, ResourceRegistry,
    SwapChainId,
};
use crate::types::{Extent2d, QueueIndex};

/// What [`ExecutionContext::execute_batch`] submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSubmission {
    /// Index of the submitted batch.
    pub batch: u64,
    /// Per-queue statistics, in queue order.
    pub queues: Vec<QueueStatistics>,
    /// Every present the batch issued, in execution order.
    pub presents: Vec<PresentResult>,
}

impl BatchSubmission {
    pub fn queue(&self, queue: QueueIndex) -> &QueueStatistics {
        &self.queues[queue.index()]
    }
}

/// One resolved GPU timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampSample {
    pub queue: QueueIndex,
    pub label: String,
    /// Raw GPU clock value.
    pub ticks: u64,
    /// `ticks` converted with the queue's timestamp frequency.
    pub seconds: f64,
}

/// GPU timings of a retired batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatistics {
    pub batch: u64,
    pub timestamps: Vec<TimestampSample>,
}

impl BatchStatistics {
    /// Seconds between two labelled timestamps of the same queue.
    pub fn elapsed(&self, queue: QueueIndex, from: &str, to: &str) -> Option<f64> {
        let find = |label: &str| {
            self.timestamps
                .iter()
                .find(|sample| sample.queue == queue && sample.label == label)
        };
        Some(find(to)?.seconds - find(from)?.seconds)
    }
}

#[derive(Debug)]
struct InFlightBatch {
    index: u64,
    fence: FenceHandle,
    final_values: Vec<u64>,
    resources: BatchResources,
    timestamps: Vec<TimestampQueries>,
}

/// Top-level owner of a backend's frame execution.
///
/// Commands are recorded per queue through [`queue`](Self::queue) and replayed
/// by [`execute_batch`](Self::execute_batch), which computes the cross-queue
/// semaphore waits, stages resource transitions and submits every queue's work.
/// Objects a batch creates are destroyed once its fence has signaled.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tessera_graphics::{
///     BufferDescriptor, BufferUsage, DummyBackend, ExecutionConfig, ExecutionContext, QueueIndex,
/// };
///
/// let backend = Arc::new(DummyBackend::new());
/// let mut context = ExecutionContext::new(backend, ExecutionConfig::new()).unwrap();
///
/// let usage = BufferUsage::COPY_SRC | BufferUsage::COPY_DST;
/// let a = context.registry_mut().create_buffer(&BufferDescriptor::new(64, usage)).unwrap();
/// let b = context.registry_mut().create_buffer(&BufferDescriptor::new(64, usage)).unwrap();
///
/// context.queue(QueueIndex(2)).copy_buffer(a, 0, b, 0, 64);
/// let submission = context.execute_batch().unwrap();
/// assert_eq!(submission.queue(QueueIndex(2)).commands, 1);
/// context.wait_idle().unwrap();
/// ```
pub struct ExecutionContext {
    backend: Arc<dyn GpuBackend>,
    config: ExecutionConfig,
    registry: ResourceRegistry,
    cache: PipelineCache,
    semaphores: Vec<TimelineSemaphoreHandle>,
    /// Highest value each queue's semaphore has been asked to signal.
    signaled_values: Vec<u64>,
    recordings: Vec<QueueRecording>,
    sequence: u64,
    immediate: ImmediateConstantStaging,
    batch_index: u64,
    last_users: HashMap<ResourceKey, LastUse>,
    in_flight: VecDeque<InFlightBatch>,
    completed: Vec<BatchStatistics>,
    descriptor_array_waits: usize,
}

static_assertions::assert_impl_all!(ExecutionContext: Send);

impl ExecutionContext {
    /// Create a context over the first `config.queues.len()` queues of
    /// `backend`.
    ///
    /// Fails with [`GraphicsError::InitializationFailed`] when the backend's
    /// queues do not start with the configured queue types.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        config: ExecutionConfig,
    ) -> Result<Self, GraphicsError> {
        config.validate()?;
        let available = backend.queue_types();
        if config.queues.len() > available.len()
            || config.queues.iter().zip(available).any(|(wanted, have)| wanted != have)
        {
            return Err(GraphicsError::InitializationFailed(format!(
                "{} offers queues {:?}, configuration asks for {:?}",
                backend.name(),
                available,
                config.queues
            )));
        }

        let mut semaphores = Vec::with_capacity(config.queues.len());
        for _ in &config.queues {
            match backend.create_timeline_semaphore(0) {
                Ok(semaphore) => semaphores.push(semaphore),
                Err(error) => {
                    for semaphore in semaphores {
                        backend.destroy(BackendObject::from(semaphore));
                    }
                    return Err(error);
                }
            }
        }

        let queue_count = config.queues.len();
        log::info!(
            "Execution context{} created on {} with {} queue(s)",
            config
                .label
                .as_deref()
                .map(|label| format!(" '{label}'"))
                .unwrap_or_default(),
            backend.name(),
            queue_count
        );
        Ok(Self {
            registry: ResourceRegistry::new(backend.clone()),
            cache: PipelineCache::new(backend.clone()),
            immediate: ImmediateConstantStaging::new(
                config.immediate_constant_buffer_size,
                config.immediate_constant_alignment,
                queue_count,
            ),
            semaphores,
            signaled_values: vec![0; queue_count],
            recordings: (0..queue_count).map(|_| QueueRecording::default()).collect(),
            sequence: 0,
            batch_index: 0,
            last_users: HashMap::new(),
            in_flight: VecDeque::new(),
            completed: Vec::new(),
            descriptor_array_waits: 0,
            backend,
            config,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Create and release resources.
    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    /// Index the next executed batch will get.
    pub fn current_batch(&self) -> u64 {
        self.batch_index
    }

    pub fn batches_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// How often a descriptor array flush had to wait for the GPU.
    pub fn descriptor_array_waits(&self) -> usize {
        self.descriptor_array_waits
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Record commands for `queue` in the current batch.
    ///
    /// # Panics
    ///
    /// Panics if `queue` is not configured.
    pub fn queue(&mut self, queue: QueueIndex) -> QueueRecorder<'_> {
        let Some(&queue_type) = self.config.queues.get(queue.index()) else {
            panic!(
                "contract violation: {queue} does not exist, {} queue(s) configured",
                self.config.queues.len()
            );
        };
        QueueRecorder::new(
            queue,
            queue_type,
            self.batch_index,
            &mut self.recordings[queue.index()],
            &mut self.sequence,
            &self.registry,
            &mut self.immediate,
        )
    }

    /// Point slot `index` of an image descriptor array at `slot`. Written
    /// before the next batch uses the array.
    pub fn write_image_descriptor(
        &mut self,
        id: ImageDescriptorArrayId,
        index: u32,
        slot: Option<ImageSlot>,
    ) {
        self.registry.write_image_descriptor(id, index, slot);
    }

    /// Point slot `index` of a buffer descriptor array at `slot`. Written
    /// before the next batch uses the array.
    pub fn write_buffer_descriptor(
        &mut self,
        id: BufferDescriptorArrayId,
        index: u32,
        slot: Option<BufferSlot>,
    ) {
        self.registry.write_buffer_descriptor(id, index, slot);
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Replay everything recorded since the last batch and submit it.
    ///
    /// Blocks while `max_batches_in_flight` batches are still executing. On a
    /// backend failure the whole batch is abandoned: unsubmitted work is
    /// dropped, every queue still signals its final value, and the objects
    /// the batch created are disposed after the next batch completes.
    pub fn execute_batch(&mut self) -> Result<BatchSubmission, GraphicsError> {
        profile_function!();
        while self.in_flight.len() >= self.config.max_batches_in_flight {
            self.retire_oldest()?;
        }
        self.retire_completed_batches();
        self.flush_descriptor_array_writes()?;

        let index = self.batch_index;
        self.batch_index += 1;
        let recordings: Vec<QueueRecording> =
            self.recordings.iter_mut().map(std::mem::take).collect();
        let staged = self.immediate.take();
        self.sequence = 0;

        let dependencies = {
            profile_scope!("compute_dependencies");
            let streams: Vec<&[RecordedCommand]> =
                recordings.iter().map(|r| r.commands.as_slice()).collect();
            compute_dependencies(
                &streams,
                &self.semaphores,
                &self.signaled_values,
                &self.registry,
                &mut self.last_users,
            )
        };
        let mut queues: Vec<QueueContext> = recordings
            .into_iter()
            .zip(dependencies)
            .enumerate()
            .map(|(i, (recording, deps))| {
                QueueContext::new(QueueIndex(i as u32), self.semaphores[i], recording, deps)
            })
            .collect();
        for queue in &queues {
            self.signaled_values[queue.queue().index()] = queue.final_value();
        }

        let backend = self.backend.clone();
        let mut batch = BatchContext::new(
            index,
            backend.as_ref(),
            &mut self.registry,
            &mut self.cache,
            &self.config,
        );
        let result = replay(&mut batch, &mut queues, staged);
        let mut resources = batch.into_resources();

        if let Err(error) = result {
            log::error!("Batch {index} abandoned: {error}");
            for queue in &mut queues {
                queue.abandon(backend.as_ref());
            }
            for object in resources.into_objects() {
                self.registry.dispose(object);
            }
            return Err(error);
        }

        resources.extend(self.registry.take_disposals());
        self.last_users.retain(|key, _| key.exists_in(&self.registry));

        let final_values: Vec<u64> = queues.iter().map(QueueContext::final_value).collect();
        let fence = match self.submit_fence(&final_values) {
            Ok(fence) => fence,
            Err(error) => {
                for object in resources.into_objects() {
                    self.registry.dispose(object);
                }
                return Err(error);
            }
        };

        let statistics: Vec<QueueStatistics> =
            queues.iter().map(QueueContext::statistics).collect();
        let presents = queues.iter_mut().flat_map(QueueContext::take_presents).collect();
        let timestamps = queues
            .iter_mut()
            .filter_map(QueueContext::take_timestamp_queries)
            .collect();
        log::trace!(
            "Batch {index} submitted: {} command(s), {} object(s) in the ledger",
            statistics.iter().map(|s| s.commands).sum::<usize>(),
            resources.len()
        );
        self.in_flight.push_back(InFlightBatch {
            index,
            fence,
            final_values,
            resources,
            timestamps,
        });
        frame_mark!();

        Ok(BatchSubmission {
            batch: index,
            queues: statistics,
            presents,
        })
    }

    /// A fence on the first queue that signals once every queue has reached
    /// its final value.
    fn submit_fence(&self, final_values: &[u64]) -> Result<FenceHandle, GraphicsError> {
        let fence = self.backend.create_fence(false)?;
        let waits: Vec<SemaphoreValue> = self
            .semaphores
            .iter()
            .zip(final_values)
            .map(|(&semaphore, &value)| SemaphoreValue { semaphore, value })
            .collect();
        let submitted = self.backend.submit_command_lists(
            QueueIndex(0),
            Vec::new(),
            &QueueSynchronization {
                waits: &waits,
                signals: &[],
                fence: Some(fence),
            },
        );
        if let Err(error) = submitted {
            self.backend.destroy(BackendObject::from(fence));
            return Err(error);
        }
        Ok(fence)
    }

    // ------------------------------------------------------------------
    // Retirement
    // ------------------------------------------------------------------

    /// Retire every batch whose fence has signaled, oldest first. Returns
    /// how many were retired.
    pub fn retire_completed_batches(&mut self) -> usize {
        let mut retired = 0;
        while self
            .in_flight
            .front()
            .is_some_and(|batch| self.backend.is_fence_signaled(batch.fence))
        {
            if let Some(batch) = self.in_flight.pop_front() {
                self.retire(batch);
                retired += 1;
            }
        }
        retired
    }

    fn retire_oldest(&mut self) -> Result<(), GraphicsError> {
        let Some(batch) = self.in_flight.pop_front() else {
            return Ok(());
        };
        if let Err(error) = self.backend.wait_fence(batch.fence) {
            self.in_flight.push_front(batch);
            return Err(error);
        }
        self.retire(batch);
        Ok(())
    }

    fn retire(&mut self, batch: InFlightBatch) {
        let mut samples = Vec::new();
        for queries in &batch.timestamps {
            match self
                .backend
                .resolve_timestamps(queries.heap, queries.labels.len() as u32)
            {
                Ok(ticks) => {
                    let frequency = self.backend.timestamp_frequency(queries.queue).max(1) as f64;
                    samples.extend(queries.labels.iter().zip(ticks).map(|(label, ticks)| {
                        TimestampSample {
                            queue: queries.queue,
                            label: label.clone(),
                            ticks,
                            seconds: ticks as f64 / frequency,
                        }
                    }));
                }
                Err(error) => log::warn!(
                    "Batch {}: timestamps of {} could not be resolved: {error}",
                    batch.index,
                    queries.queue
                ),
            }
        }
        if !samples.is_empty() {
            self.completed.push(BatchStatistics {
                batch: batch.index,
                timestamps: samples,
            });
        }

        let count = batch.resources.len();
        for object in batch.resources.into_objects() {
            self.backend.destroy(object);
        }
        self.backend.destroy(BackendObject::from(batch.fence));
        log::debug!("Batch {} retired, {count} object(s) destroyed", batch.index);
    }

    /// Block until every submitted batch has completed and retire them all.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        for (&semaphore, &value) in self.semaphores.iter().zip(&self.signaled_values) {
            self.backend.wait_timeline_semaphore(semaphore, value)?;
        }
        while !self.in_flight.is_empty() {
            self.retire_oldest()?;
        }
        Ok(())
    }

    /// GPU timings of batches retired since the last call.
    pub fn take_batch_statistics(&mut self) -> Vec<BatchStatistics> {
        std::mem::take(&mut self.completed)
    }

    // ------------------------------------------------------------------
    // Shared state
    // ------------------------------------------------------------------

    /// Write pending descriptor array slots, waiting first for any in-flight
    /// batch still reading an array. Returns the number of slots written.
    ///
    /// Runs at the start of every batch; call it directly to push writes out
    /// early.
    pub fn flush_descriptor_array_writes(&mut self) -> Result<usize, GraphicsError> {
        let image_arrays: Vec<(ImageDescriptorArrayId, Option<u64>)> = self
            .registry
            .image_arrays
            .iter()
            .filter(|(_, array)| !array.released && array.has_pending_writes())
            .map(|(id, array)| (id, array.last_used_batch))
            .collect();
        let buffer_arrays: Vec<(BufferDescriptorArrayId, Option<u64>)> = self
            .registry
            .buffer_arrays
            .iter()
            .filter(|(_, array)| !array.released && array.has_pending_writes())
            .map(|(id, array)| (id, array.last_used_batch))
            .collect();

        let mut written = 0;
        for (id, last_used) in image_arrays {
            self.wait_for_batch(last_used)?;
            written += self.registry.flush_image_array(id)?;
        }
        for (id, last_used) in buffer_arrays {
            self.wait_for_batch(last_used)?;
            written += self.registry.flush_buffer_array(id);
        }
        Ok(written)
    }

    /// Wait until `batch` has completed on every queue, if it is in flight.
    fn wait_for_batch(&mut self, batch: Option<u64>) -> Result<(), GraphicsError> {
        let Some(index) = batch else {
            return Ok(());
        };
        let Some(in_flight) = self.in_flight.iter().find(|b| b.index == index) else {
            return Ok(());
        };
        let pending: Vec<(TimelineSemaphoreHandle, u64)> = self
            .semaphores
            .iter()
            .zip(&in_flight.final_values)
            .filter(|&(&semaphore, &value)| {
                self.backend.timeline_semaphore_value(semaphore) < value
            })
            .map(|(&semaphore, &value)| (semaphore, value))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        profile_scope!("descriptor_array_wait");
        log::debug!("Descriptor array still read by batch {index}, waiting for it");
        for (semaphore, value) in pending {
            self.backend.wait_timeline_semaphore(semaphore, value)?;
        }
        self.descriptor_array_waits += 1;
        Ok(())
    }

    /// Drop every cached pipeline object, for shader hot-reload. The objects
    /// are destroyed once the next batch completes.
    pub fn invalidate_pipeline_cache(&mut self) {
        let objects = self.cache.clear();
        for object in objects {
            self.registry.dispose(object);
        }
    }

    /// Resize a swap chain after the GPU has gone idle.
    pub fn resize_swap_chain(
        &mut self,
        id: SwapChainId,
        size: Extent2d,
    ) -> Result<(), GraphicsError> {
        self.wait_idle()?;
        self.registry.resize_swap_chain(id, size)
    }
}

/// Replay every queue in batch-global recording order.
fn replay(
    batch: &mut BatchContext<'_>,
    queues: &mut [QueueContext],
    staged: StagedConstants,
) -> Result<(), GraphicsError> {
    profile_scope!("replay");
    batch.flush_immediate_constant_buffers(staged)?;
    for queue in queues.iter_mut() {
        queue.start_execution(batch)?;
    }
    while let Some(queue) = queues
        .iter_mut()
        .filter_map(|queue| queue.next_sequence().map(|sequence| (sequence, queue)))
        .min_by_key(|(sequence, _)| *sequence)
        .map(|(_, queue)| queue)
    {
        queue.execute_next_command(batch)?;
    }
    for queue in queues.iter_mut() {
        queue.finish_execution(batch)?;
    }
    Ok(())
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if let Err(error) = self.wait_idle() {
            log::error!("Execution context dropped while the GPU was busy: {error}");
        }
        for batch in std::mem::take(&mut self.in_flight) {
            for object in batch.resources.into_objects() {
                self.backend.destroy(object);
            }
            self.backend.destroy(BackendObject::from(batch.fence));
        }
        let mut objects = self.cache.clear();
        objects.extend(self.registry.release_all());
        for object in objects {
            self.backend.destroy(object);
        }
        for semaphore in self.semaphores.drain(..) {
            self.backend.destroy(BackendObject::from(semaphore));
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("backend", &self.backend.name())
            .field("label", &self.config.label)
            .field("queues", &self.config.queues)
            .field("batch", &self.batch_index)
            .field("in_flight", &self.in_flight.len())
            .field("cache", &self.cache.len())
            .finish()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::{BufferDescriptor, BufferUsage, QueueType};

    fn context(backend: &Arc<DummyBackend>) -> ExecutionContext {
        ExecutionContext::new(backend.clone(), ExecutionConfig::new()).unwrap()
    }

    #[test]
    fn test_mismatched_queues_are_rejected() {
        let backend = Arc::new(DummyBackend::with_queues(&[QueueType::Graphics]));
        let config =
            ExecutionConfig::new().with_queues(vec![QueueType::Graphics, QueueType::Compute]);
        assert!(matches!(
            ExecutionContext::new(backend, config),
            Err(GraphicsError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_empty_batches_signal_and_retire() {
        let backend = Arc::new(DummyBackend::new());
        let mut context = context(&backend);
        let first = context.execute_batch().unwrap();
        let second = context.execute_batch().unwrap();
        assert_eq!((first.batch, second.batch), (0, 1));
        assert!(first.queues.iter().all(|queue| queue.signals == 1));

        // The second batch retired the first before it was submitted.
        assert_eq!(context.batches_in_flight(), 1);
        assert_eq!(context.retire_completed_batches(), 1);
        assert_eq!(context.batches_in_flight(), 0);
        assert_eq!(backend.pending_submissions(), 0);
    }

    #[test]
    fn test_in_flight_limit_blocks_on_the_oldest_batch() {
        let backend = Arc::new(DummyBackend::new());
        backend.set_deferred_execution(true);
        let mut context = context(&backend);
        for _ in 0..4 {
            context.execute_batch().unwrap();
            assert!(context.batches_in_flight() <= 2);
        }
        context.wait_idle().unwrap();
        assert_eq!(context.batches_in_flight(), 0);
    }

    #[test]
    fn test_drop_destroys_everything() {
        let backend = Arc::new(DummyBackend::new());
        {
            let mut context = context(&backend);
            let usage = BufferUsage::COPY_SRC | BufferUsage::COPY_DST;
            let a = context
                .registry_mut()
                .create_buffer(&BufferDescriptor::new(64, usage))
                .unwrap();
            let b = context
                .registry_mut()
                .create_buffer(&BufferDescriptor::new(64, usage))
                .unwrap();
            context.queue(QueueIndex(0)).copy_buffer(a, 0, b, 0, 16);
            context.execute_batch().unwrap();
        }
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    #[should_panic(expected = "contract violation: queue#7 does not exist")]
    fn test_unknown_queue_panics() {
        let backend = Arc::new(DummyBackend::new());
        let mut context = context(&backend);
        context.queue(QueueIndex(7));
    }
}
