//! Access-state transition tracking.
//!
//! Commands declare how they intend to use resources by staging requests on a
//! [`TransitionBuffer`]. Nothing is emitted while staging. Once every request
//! for a command is staged, [`TransitionBuffer::prepare`] resolves them and
//! [`TransitionBuffer::collect_transitions`] compares the result against the
//! state tracked in the [`ResourceRegistry`], producing the barriers needed and
//! updating the tracked state.
//!
//! # Staging groups
//!
//! Every `stage_*` call forms its own group. Groups are applied in order, so a
//! later request for the same sub-resource replaces an earlier one:
//!
//! ```ignore
//! transitions.stage_image(albedo, MipRange::all(), ImageAccess::ShaderReadWrite);
//! transitions.stage_image(albedo, MipRange::all(), ImageAccess::ShaderRead);
//! transitions.prepare(&registry);
//! // One barrier per mip range: Undefined -> ShaderRead
//! let barriers = transitions.collect_transitions(&mut registry);
//! ```
//!
//! Requests staged inside [`TransitionBuffer::simultaneous`] are in effect at
//! the same time and must be compatible with each other. Image requests are
//! compatible only when identical; buffer reads accumulate, and a buffer write
//! is compatible only with an identical request. A conflict is a caller bug and
//! panics in `prepare`.
//!
//! # Raw buffers
//!
//! Engine-owned buffers whose usage is fully known (scratch and upload memory)
//! skip tracking: [`TransitionBuffer::stage_raw_buffer`] names both states
//! directly. A buffer must always be staged with the same pair.

use std::collections::{BTreeMap, HashMap};

use crate::backend::{BufferBarrier, BufferHandle, ImageBarrier};
use crate::resources::{BufferId, ImageId, ResourceRegistry, SwapChainId};
use crate::types::{BufferAccess, ImageAccess, MipRange};

#[derive(Debug, Clone, Copy)]
enum Request {
    Image {
        image: ImageId,
        mips: MipRange,
        access: ImageAccess,
    },
    Buffer {
        buffer: BufferId,
        access: BufferAccess,
    },
    SwapChain {
        swap_chain: SwapChainId,
        access: ImageAccess,
    },
}

/// Barriers produced by one [`TransitionBuffer::collect_transitions`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedBarriers {
    pub images: Vec<ImageBarrier>,
    pub buffers: Vec<BufferBarrier>,
}

impl CollectedBarriers {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }

    /// Total number of image and buffer barriers.
    pub fn len(&self) -> usize {
        self.images.len() + self.buffers.len()
    }
}

/// Requests that are in effect at the same time.
///
/// Obtained through [`TransitionBuffer::simultaneous`].
pub struct SimultaneousScope<'a> {
    requests: &'a mut Vec<Request>,
}

impl SimultaneousScope<'_> {
    pub fn stage_image(&mut self, image: ImageId, mips: MipRange, access: ImageAccess) {
        self.requests.push(Request::Image {
            image,
            mips,
            access,
        });
    }

    pub fn stage_buffer(&mut self, buffer: BufferId, access: BufferAccess) {
        self.requests.push(Request::Buffer { buffer, access });
    }

    pub fn stage_swap_chain(&mut self, swap_chain: SwapChainId, access: ImageAccess) {
        self.requests.push(Request::SwapChain { swap_chain, access });
    }
}

/// Staged access requests awaiting conversion into barriers.
#[derive(Debug, Default)]
pub struct TransitionBuffer {
    groups: Vec<Vec<Request>>,
    images: BTreeMap<(ImageId, u32), ImageAccess>,
    buffers: BTreeMap<BufferId, BufferAccess>,
    swap_chains: BTreeMap<SwapChainId, ImageAccess>,
    raw_buffers: BTreeMap<BufferHandle, (BufferAccess, BufferAccess)>,
    raw_pairs: HashMap<BufferHandle, (BufferAccess, BufferAccess)>,
}

impl TransitionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `access` for a mip range of an image.
    pub fn stage_image(&mut self, image: ImageId, mips: MipRange, access: ImageAccess) {
        self.simultaneous(|scope| scope.stage_image(image, mips, access));
    }

    /// Request `access` for a buffer.
    pub fn stage_buffer(&mut self, buffer: BufferId, access: BufferAccess) {
        self.simultaneous(|scope| scope.stage_buffer(buffer, access));
    }

    /// Request `access` for the acquired back buffer of a swap chain.
    pub fn stage_swap_chain(&mut self, swap_chain: SwapChainId, access: ImageAccess) {
        self.simultaneous(|scope| scope.stage_swap_chain(swap_chain, access));
    }

    /// Stage several requests that are in effect at the same time.
    pub fn simultaneous<R>(&mut self, stage: impl FnOnce(&mut SimultaneousScope<'_>) -> R) -> R {
        let mut requests = Vec::new();
        let result = stage(&mut SimultaneousScope {
            requests: &mut requests,
        });
        if !requests.is_empty() {
            self.groups.push(requests);
        }
        result
    }

    /// Stage an untracked transition of an engine-owned buffer.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` was previously staged with a different pair.
    pub fn stage_raw_buffer(&mut self, buffer: BufferHandle, from: BufferAccess, to: BufferAccess) {
        let pair = *self.raw_pairs.entry(buffer).or_insert((from, to));
        assert!(
            pair == (from, to),
            "contract violation: raw buffer #{} staged as {:?} -> {:?}, previously {:?} -> {:?}",
            buffer.raw(),
            from,
            to,
            pair.0,
            pair.1
        );
        self.raw_buffers.insert(buffer, (from, to));
    }

    /// Whether nothing is staged or prepared.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
            && self.images.is_empty()
            && self.buffers.is_empty()
            && self.swap_chains.is_empty()
            && self.raw_buffers.is_empty()
    }

    /// Resolve staged groups: validate each group and apply groups in order.
    ///
    /// # Panics
    ///
    /// Panics on incompatible requests for the same sub-resource within one
    /// group, or on a mip range outside the image.
    pub fn prepare(&mut self, registry: &ResourceRegistry) {
        for group in std::mem::take(&mut self.groups) {
            let mut images: BTreeMap<(ImageId, u32), ImageAccess> = BTreeMap::new();
            let mut buffers: BTreeMap<BufferId, BufferAccess> = BTreeMap::new();
            let mut swap_chains: BTreeMap<SwapChainId, ImageAccess> = BTreeMap::new();

            for request in group {
                match request {
                    Request::Image {
                        image,
                        mips,
                        access,
                    } => {
                        let levels =
                            mips.resolve(registry.image_entry(image).descriptor.mip_levels);
                        for mip in levels {
                            let existing = *images.entry((image, mip)).or_insert(access);
                            assert!(
                                existing.is_compatible_with(&access),
                                "contract violation: mip {mip} of {image:?} requested as both {existing:?} and {access:?}"
                            );
                        }
                    }
                    Request::Buffer { buffer, access } => {
                        let merged = match buffers.get(&buffer) {
                            Some(existing) => match BufferAccess::merge(*existing, access) {
                                Some(merged) => merged,
                                None => panic!(
                                    "contract violation: {buffer:?} requested as both {existing:?} and {access:?}"
                                ),
                            },
                            None => access,
                        };
                        buffers.insert(buffer, merged);
                    }
                    Request::SwapChain { swap_chain, access } => {
                        let existing = *swap_chains.entry(swap_chain).or_insert(access);
                        assert!(
                            existing.is_compatible_with(&access),
                            "contract violation: {swap_chain:?} requested as both {existing:?} and {access:?}"
                        );
                    }
                }
            }

            self.images.extend(images);
            self.buffers.extend(buffers);
            self.swap_chains.extend(swap_chains);
        }
    }

    /// Convert prepared requests into barriers and make the requested states
    /// current. Clears everything staged.
    ///
    /// # Panics
    ///
    /// Panics if requests were staged but not prepared, or if a swap chain was
    /// staged without an acquired back buffer.
    pub fn collect_transitions(&mut self, registry: &mut ResourceRegistry) -> CollectedBarriers {
        assert!(
            self.groups.is_empty(),
            "contract violation: collect_transitions called with unprepared requests"
        );
        let mut collected = CollectedBarriers::default();

        for ((image, mip), to) in std::mem::take(&mut self.images) {
            let entry = registry.image_entry_mut(image);
            let from = std::mem::replace(&mut entry.mip_access[mip as usize], to);
            if from == to {
                continue;
            }
            match collected.images.last_mut() {
                Some(last)
                    if last.image == entry.handle
                        && last.from == from
                        && last.to == to
                        && last.first_mip + last.mip_count == mip =>
                {
                    last.mip_count += 1;
                }
                _ => collected.images.push(ImageBarrier {
                    image: entry.handle,
                    first_mip: mip,
                    mip_count: 1,
                    from,
                    to,
                }),
            }
        }

        for (swap_chain, to) in std::mem::take(&mut self.swap_chains) {
            let entry = registry.swap_chain_entry_mut(swap_chain);
            let Some(index) = entry.acquired else {
                panic!("contract violation: {swap_chain:?} used without an acquired back buffer");
            };
            let from = std::mem::replace(&mut entry.image_access[index as usize], to);
            if from != to {
                collected.images.push(ImageBarrier {
                    image: entry.images[index as usize],
                    first_mip: 0,
                    mip_count: 1,
                    from,
                    to,
                });
            }
        }

        for (buffer, to) in std::mem::take(&mut self.buffers) {
            let entry = registry.buffer_entry_mut(buffer);
            let from = std::mem::replace(&mut entry.access, to);
            if from != to {
                collected.buffers.push(BufferBarrier {
                    buffer: entry.handle,
                    from,
                    to,
                });
            }
        }

        for (buffer, (from, to)) in std::mem::take(&mut self.raw_buffers) {
            collected.buffers.push(BufferBarrier { buffer, from, to });
        }

        if !collected.is_empty() {
            log::trace!(
                "Collected {} image and {} buffer barrier(s)",
                collected.images.len(),
                collected.buffers.len()
            );
        }
        collected
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::backend::{DummyBackend, SwapChainDescriptor};
    use crate::types::{
        BufferDescriptor, BufferUsage, Extent2d, ImageDescriptor, ImageUsage, TextureFormat,
    };

    fn setup() -> ResourceRegistry {
        ResourceRegistry::new(Arc::new(DummyBackend::new()))
    }

    fn image(registry: &mut ResourceRegistry, mips: u32) -> ImageId {
        registry
            .create_image(
                &ImageDescriptor::new_2d(
                    64,
                    64,
                    TextureFormat::Rgba8Unorm,
                    ImageUsage::SHADER_READ | ImageUsage::SHADER_READ_WRITE,
                )
                .with_mip_levels(mips),
            )
            .unwrap()
    }

    fn buffer(registry: &mut ResourceRegistry) -> BufferId {
        registry
            .create_buffer(&BufferDescriptor::new(
                256,
                BufferUsage::VERTEX | BufferUsage::SHADER_READ_WRITE,
            ))
            .unwrap()
    }

    #[test]
    fn test_last_request_wins_then_noop() {
        let mut registry = setup();
        let x = image(&mut registry, 1);
        let mut transitions = TransitionBuffer::new();

        transitions.stage_image(x, MipRange::all(), ImageAccess::ShaderReadWrite);
        transitions.stage_image(x, MipRange::all(), ImageAccess::ShaderRead);
        transitions.prepare(&registry);
        let barriers = transitions.collect_transitions(&mut registry);
        assert_eq!(barriers.images.len(), 1);
        assert_eq!(barriers.images[0].from, ImageAccess::Undefined);
        assert_eq!(barriers.images[0].to, ImageAccess::ShaderRead);
        assert_eq!(registry.image_access(x, 0), ImageAccess::ShaderRead);

        transitions.stage_image(x, MipRange::all(), ImageAccess::ShaderRead);
        transitions.prepare(&registry);
        assert!(transitions.collect_transitions(&mut registry).is_empty());
        assert!(transitions.is_empty());
    }

    #[test]
    fn test_consecutive_mips_merge_into_one_barrier() {
        let mut registry = setup();
        let x = image(&mut registry, 6);

        let mut transitions = TransitionBuffer::new();
        transitions.stage_image(x, MipRange::new(2, 2), ImageAccess::ShaderReadWrite);
        transitions.prepare(&registry);
        transitions.collect_transitions(&mut registry);

        // Mips 0-1 and 4-5 are undefined, 2-3 are read-write.
        transitions.stage_image(x, MipRange::all(), ImageAccess::ShaderRead);
        transitions.prepare(&registry);
        let barriers = transitions.collect_transitions(&mut registry);
        let ranges: Vec<_> = barriers
            .images
            .iter()
            .map(|b| (b.first_mip, b.mip_count, b.from))
            .collect();
        assert_eq!(
            ranges,
            vec![
                (0, 2, ImageAccess::Undefined),
                (2, 2, ImageAccess::ShaderReadWrite),
                (4, 2, ImageAccess::Undefined),
            ]
        );
    }

    #[test]
    fn test_simultaneous_buffer_reads_accumulate() {
        let mut registry = setup();
        let b = buffer(&mut registry);
        let mut transitions = TransitionBuffer::new();

        transitions.simultaneous(|scope| {
            scope.stage_buffer(b, BufferAccess::VERTEX);
            scope.stage_buffer(b, BufferAccess::SHADER_READ);
        });
        transitions.prepare(&registry);
        let barriers = transitions.collect_transitions(&mut registry);
        assert_eq!(barriers.buffers.len(), 1);
        assert_eq!(
            barriers.buffers[0].to,
            BufferAccess::VERTEX | BufferAccess::SHADER_READ
        );
    }

    #[rstest]
    #[case::read_and_write(BufferAccess::SHADER_READ, BufferAccess::SHADER_WRITE)]
    #[case::two_writes(BufferAccess::COPY_DESTINATION, BufferAccess::SHADER_WRITE)]
    #[should_panic(expected = "contract violation")]
    fn test_conflicting_simultaneous_buffer_requests(
        #[case] first: BufferAccess,
        #[case] second: BufferAccess,
    ) {
        let mut registry = setup();
        let b = buffer(&mut registry);
        let mut transitions = TransitionBuffer::new();
        transitions.simultaneous(|scope| {
            scope.stage_buffer(b, first);
            scope.stage_buffer(b, second);
        });
        transitions.prepare(&registry);
    }

    #[test]
    #[should_panic(expected = "requested as both")]
    fn test_conflicting_simultaneous_image_requests() {
        let mut registry = setup();
        let x = image(&mut registry, 4);
        let mut transitions = TransitionBuffer::new();
        transitions.simultaneous(|scope| {
            scope.stage_image(x, MipRange::new(0, 2), ImageAccess::ShaderRead);
            scope.stage_image(x, MipRange::only(1), ImageAccess::ColorRenderTarget);
        });
        transitions.prepare(&registry);
    }

    #[test]
    fn test_disjoint_simultaneous_image_requests() {
        let mut registry = setup();
        let x = image(&mut registry, 4);
        let mut transitions = TransitionBuffer::new();
        transitions.simultaneous(|scope| {
            scope.stage_image(x, MipRange::only(0), ImageAccess::ShaderRead);
            scope.stage_image(x, MipRange::only(1), ImageAccess::ShaderReadWrite);
        });
        transitions.prepare(&registry);
        assert_eq!(transitions.collect_transitions(&mut registry).images.len(), 2);
    }

    #[test]
    fn test_raw_buffer_is_always_emitted() {
        let mut registry = setup();
        let b = buffer(&mut registry);
        let handle = registry.buffer_handle(b);
        let mut transitions = TransitionBuffer::new();
        for _ in 0..2 {
            transitions.stage_raw_buffer(
                handle,
                BufferAccess::ACCELERATION_STRUCTURE_SCRATCH,
                BufferAccess::ACCELERATION_STRUCTURE_SCRATCH,
            );
            transitions.prepare(&registry);
            assert_eq!(transitions.collect_transitions(&mut registry).buffers.len(), 1);
        }
    }

    #[test]
    #[should_panic(expected = "previously")]
    fn test_raw_buffer_pair_must_stay_consistent() {
        let mut registry = setup();
        let b = buffer(&mut registry);
        let handle = registry.buffer_handle(b);
        let mut transitions = TransitionBuffer::new();
        transitions.stage_raw_buffer(
            handle,
            BufferAccess::COPY_DESTINATION,
            BufferAccess::CONSTANT,
        );
        transitions.stage_raw_buffer(handle, BufferAccess::COPY_DESTINATION, BufferAccess::VERTEX);
    }

    #[test]
    fn test_swap_chain_targets_acquired_back_buffer() {
        let mut registry = setup();
        let swap_chain = registry
            .create_swap_chain(&SwapChainDescriptor {
                size: Extent2d::new(16, 16),
                format: TextureFormat::Bgra8Unorm,
                image_count: 2,
            })
            .unwrap();
        registry.acquire_next_image(swap_chain).unwrap();

        let mut transitions = TransitionBuffer::new();
        transitions.stage_swap_chain(swap_chain, ImageAccess::ColorRenderTarget);
        transitions.prepare(&registry);
        let barriers = transitions.collect_transitions(&mut registry);
        let back_buffer = registry.swap_chain_entry(swap_chain).images[0];
        assert_eq!(barriers.images[0].image, back_buffer);
        assert_eq!(barriers.images[0].to, ImageAccess::ColorRenderTarget);
    }

    #[test]
    #[should_panic(expected = "unprepared")]
    fn test_collect_requires_prepare() {
        let mut registry = setup();
        let b = buffer(&mut registry);
        let mut transitions = TransitionBuffer::new();
        transitions.stage_buffer(b, BufferAccess::VERTEX);
        transitions.collect_transitions(&mut registry);
    }
}
