//! Cross-queue dependency analysis.
//!
//! Commands of all queues are walked once per batch in recording order. When a
//! resource last used on queue P is used next on queue Q, P gets a release
//! event (a timeline semaphore signal) after its last use and Q gets an
//! acquire event (a wait for that value) before its first use.
//!
//! Barriers cannot be placed inside a render pass, and neither can waits or
//! signals, so commands inside a pass acquire at the pass's `BeginPass` and
//! release at its `EndPass`. A resource must therefore not be produced on
//! another queue after a pass consuming it has begun.
//!
//! Semaphore values are assigned once every release point is known, in command
//! order per queue, so values always increase along a queue's timeline. Each
//! queue's final value (signaled after its last command) is remembered per
//! resource, which lets the next batch wait on work from earlier batches.

use std::collections::{BTreeSet, HashMap};

use crate::backend::{SemaphoreValue, TimelineSemaphoreHandle};
use crate::command::{BoundResource, QueueCommand, RecordedCommand, RenderTarget};
use crate::resources::{
    BufferDescriptorArrayId, BufferId, ImageDescriptorArrayId, ImageId, ResourceRegistry,
    SwapChainId,
};
use crate::types::QueueIndex;

/// Anything whose use is ordered across queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum ResourceKey {
    Image(ImageId),
    Buffer(BufferId),
    SwapChain(SwapChainId),
    ImageArray(ImageDescriptorArrayId),
    BufferArray(BufferDescriptorArrayId),
}

impl ResourceKey {
    /// Whether the resource still exists in `registry`.
    pub(crate) fn exists_in(&self, registry: &ResourceRegistry) -> bool {
        match self {
            Self::Image(id) => registry.images.contains_key(*id),
            Self::Buffer(id) => registry.buffers.contains_key(*id),
            Self::SwapChain(id) => registry.swap_chains.contains_key(*id),
            Self::ImageArray(id) => registry.image_arrays.contains_key(*id),
            Self::BufferArray(id) => registry.buffer_arrays.contains_key(*id),
        }
    }
}

/// Last queue to use a resource in a previous batch, with that queue's final
/// semaphore value for the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LastUse {
    pub(crate) queue: QueueIndex,
    pub(crate) value: u64,
}

/// Wait before the command at `command_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AcquireEvent {
    pub(crate) command_index: usize,
    pub(crate) wait: SemaphoreValue,
}

/// Signal of the queue's own semaphore after the command at `command_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReleaseEvent {
    pub(crate) command_index: usize,
    pub(crate) value: u64,
}

/// Synchronization events of one queue for one batch, sorted by command index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct QueueDependencies {
    pub(crate) acquires: Vec<AcquireEvent>,
    pub(crate) releases: Vec<ReleaseEvent>,
    /// Value signaled once every command of the queue has completed.
    pub(crate) final_value: u64,
}

fn push_bindings<'a>(
    resources: impl Iterator<Item = &'a BoundResource>,
    registry: &ResourceRegistry,
    keys: &mut Vec<ResourceKey>,
) {
    for resource in resources {
        match resource {
            BoundResource::ReadOnlyImage { image, .. }
            | BoundResource::ReadWriteImage { image, .. } => {
                keys.push(ResourceKey::Image(*image));
            }
            BoundResource::ReadOnlyBuffer { buffer, .. }
            | BoundResource::ReadWriteBuffer { buffer, .. }
            | BoundResource::ConstantBuffer { buffer, .. } => {
                keys.push(ResourceKey::Buffer(*buffer))
            }
            BoundResource::ImmediateConstants(_) | BoundResource::Sampler(_) => {}
            BoundResource::ImageArray(id) => {
                keys.push(ResourceKey::ImageArray(*id));
                keys.extend(
                    registry
                        .image_array(*id)
                        .slots
                        .iter()
                        .flatten()
                        .map(|slot| ResourceKey::Image(slot.image)),
                );
            }
            BoundResource::BufferArray(id) => {
                keys.push(ResourceKey::BufferArray(*id));
                keys.extend(
                    registry
                        .buffer_array(*id)
                        .slots
                        .iter()
                        .flatten()
                        .map(|slot| ResourceKey::Buffer(slot.buffer)),
                );
            }
            BoundResource::AccelerationStructure(id) => {
                keys.push(ResourceKey::Buffer(registry.acceleration_structure_entry(*id).buffer));
            }
        }
    }
}

/// Every resource `command` touches.
pub(crate) fn command_resources(
    command: &QueueCommand,
    registry: &ResourceRegistry,
    keys: &mut Vec<ResourceKey>,
) {
    match command {
        QueueCommand::CopyBuffer {
            source,
            destination,
            ..
        } => keys.extend([ResourceKey::Buffer(*source), ResourceKey::Buffer(*destination)]),
        QueueCommand::CopyBufferToImage {
            source,
            destination,
            ..
        } => keys.extend([ResourceKey::Buffer(*source), ResourceKey::Image(*destination)]),
        QueueCommand::BuildBlas { target, geometry } => {
            keys.push(ResourceKey::Buffer(registry.acceleration_structure_entry(*target).buffer));
            for geometry in geometry {
                keys.push(ResourceKey::Buffer(geometry.vertex_buffer));
                if let Some(index) = geometry.index_buffer {
                    keys.push(ResourceKey::Buffer(index.buffer));
                }
            }
        }
        QueueCommand::BuildTlas { target, instances } => {
            keys.push(ResourceKey::Buffer(registry.acceleration_structure_entry(*target).buffer));
            keys.extend(instances.iter().map(|instance| {
                ResourceKey::Buffer(registry.acceleration_structure_entry(instance.blas).buffer)
            }));
        }
        QueueCommand::BeginPass {
            color,
            depth_stencil,
            ..
        } => {
            keys.extend(color.iter().map(|target| match target.target {
                RenderTarget::Image { image, .. } => ResourceKey::Image(image),
                RenderTarget::SwapChain(swap_chain) => ResourceKey::SwapChain(swap_chain),
            }));
            keys.extend(depth_stencil.iter().map(|target| ResourceKey::Image(target.image)));
        }
        QueueCommand::DrawInstanced(draw) => {
            keys.extend(draw.vertex_buffers.iter().map(|input| ResourceKey::Buffer(input.buffer)));
            keys.extend(draw.index_buffer.iter().map(|input| ResourceKey::Buffer(input.buffer)));
            push_bindings(draw.bindings.resources(), registry, keys);
        }
        QueueCommand::DispatchCompute(dispatch) => {
            push_bindings(dispatch.bindings.resources(), registry, keys);
        }
        QueueCommand::TraceRays(trace) => push_bindings(trace.bindings.resources(), registry, keys),
        QueueCommand::EndPass => {}
        QueueCommand::Present { swap_chain } => keys.push(ResourceKey::SwapChain(*swap_chain)),
    }
}

/// For every command inside a pass (`BeginPass` and `EndPass` included), the
/// indices of the pass's `BeginPass` and `EndPass`. An unterminated pass ends
/// at the last command.
pub(crate) fn pass_spans(commands: &[RecordedCommand]) -> Vec<Option<(usize, usize)>> {
    let mut spans = vec![None; commands.len()];
    let mut open = None;
    for (index, recorded) in commands.iter().enumerate() {
        match recorded.command {
            QueueCommand::BeginPass { .. } if open.is_none() => open = Some(index),
            QueueCommand::EndPass => {
                if let Some(begin) = open.take() {
                    spans[begin..=index].fill(Some((begin, index)));
                }
            }
            _ => {}
        }
    }
    if let Some(begin) = open {
        let end = commands.len() - 1;
        spans[begin..].fill(Some((begin, end)));
    }
    spans
}

#[derive(Debug, Clone, Copy)]
enum WaitSource {
    /// A release in this batch, by producer command index.
    Release(usize),
    /// A final value of an earlier batch.
    Value(u64),
}

#[derive(Debug, Clone, Copy)]
struct PendingAcquire {
    command_index: usize,
    producer: usize,
    source: WaitSource,
}

#[derive(Debug, Clone, Copy)]
struct LocalUse {
    queue: usize,
    release_index: usize,
}

/// Compute acquire and release events of every queue for one batch.
///
/// `base_values` are the semaphore values each queue has signaled so far.
/// `last_users` carries the final use of each resource across batches and is
/// updated with this batch's uses.
///
/// # Panics
///
/// Panics if a resource changes queues where no wait can be placed: either
/// it is consumed inside a pass that began before another queue finished
/// with it, or another queue touches it while a pass using it is still open.
pub(crate) fn compute_dependencies(
    queues: &[&[RecordedCommand]],
    semaphores: &[TimelineSemaphoreHandle],
    base_values: &[u64],
    registry: &ResourceRegistry,
    last_users: &mut HashMap<ResourceKey, LastUse>,
) -> Vec<QueueDependencies> {
    let spans: Vec<_> = queues.iter().map(|commands| pass_spans(commands)).collect();

    let mut order: Vec<(u64, usize, usize)> = queues
        .iter()
        .enumerate()
        .flat_map(|(queue, commands)| {
            commands
                .iter()
                .enumerate()
                .map(move |(index, recorded)| (recorded.sequence, queue, index))
        })
        .collect();
    order.sort_unstable();

    let mut local: HashMap<ResourceKey, LocalUse> = HashMap::new();
    let mut release_points: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); queues.len()];
    let mut pending: Vec<Vec<PendingAcquire>> = vec![Vec::new(); queues.len()];
    let mut keys = Vec::new();

    for (_, queue, index) in order {
        keys.clear();
        command_resources(&queues[queue][index].command, registry, &mut keys);
        keys.sort_unstable();
        keys.dedup();

        let (acquire_index, release_index) = spans[queue][index].unwrap_or((index, index));
        for key in keys.iter().copied() {
            match local.get(&key) {
                Some(previous) if previous.queue != queue => {
                    let produced = queues[previous.queue][previous.release_index].sequence;
                    let consumed = queues[queue][acquire_index].sequence;
                    assert!(
                        produced < consumed,
                        "contract violation: {key:?} crosses an open pass \
                         from queue#{} to queue#{queue}: released after command {produced} \
                         but needed before command {consumed}",
                        previous.queue
                    );
                    release_points[previous.queue].insert(previous.release_index);
                    pending[queue].push(PendingAcquire {
                        command_index: acquire_index,
                        producer: previous.queue,
                        source: WaitSource::Release(previous.release_index),
                    });
                }
                Some(_) => {}
                None => {
                    if let Some(last) = last_users
                        .get(&key)
                        .filter(|last| last.queue.index() != queue)
                    {
                        pending[queue].push(PendingAcquire {
                            command_index: acquire_index,
                            producer: last.queue.index(),
                            source: WaitSource::Value(last.value),
                        });
                    }
                }
            }
            local.insert(
                key,
                LocalUse {
                    queue,
                    release_index,
                },
            );
        }
    }

    let mut dependencies: Vec<QueueDependencies> = release_points
        .iter()
        .zip(base_values)
        .map(|(points, base)| {
            let releases: Vec<_> = points
                .iter()
                .zip(1..)
                .map(|(&command_index, offset)| ReleaseEvent {
                    command_index,
                    value: base + offset,
                })
                .collect();
            QueueDependencies {
                final_value: base + releases.len() as u64 + 1,
                releases,
                acquires: Vec::new(),
            }
        })
        .collect();

    for (consumer, mut acquires) in pending.into_iter().enumerate() {
        acquires.sort_by_key(|acquire| acquire.command_index);
        let mut waited = vec![0u64; queues.len()];
        for acquire in acquires {
            let value = match acquire.source {
                WaitSource::Value(value) => value,
                WaitSource::Release(index) => {
                    let releases = &dependencies[acquire.producer].releases;
                    match releases.binary_search_by_key(&index, |release| release.command_index) {
                        Ok(position) => releases[position].value,
                        Err(_) => unreachable!("release point {index} was registered"),
                    }
                }
            };
            if value <= waited[acquire.producer] {
                continue;
            }
            waited[acquire.producer] = value;
            dependencies[consumer].acquires.push(AcquireEvent {
                command_index: acquire.command_index,
                wait: SemaphoreValue {
                    semaphore: semaphores[acquire.producer],
                    value,
                },
            });
        }
    }

    for (key, used) in local {
        last_users.insert(
            key,
            LastUse {
                queue: QueueIndex(used.queue as u32),
                value: dependencies[used.queue].final_value,
            },
        );
    }

    let waits: usize = dependencies.iter().map(|d| d.acquires.len()).sum();
    if waits > 0 {
        log::trace!("Dependency analysis: {waits} cross-queue wait(s)");
    }
    dependencies
}
