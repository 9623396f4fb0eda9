//! Per-batch state: the resource ledger, transient allocations and caches that
//! live exactly as long as one batch.

use std::collections::HashMap;

use tessera_core::arena::{Bookmark, StackArena};

use super::immediate::{ImmediateConstantBuffers, StagedConstants};
use crate::backend::{
    BackendObject, BufferHandle, DescriptorRangeBinding, DescriptorResource, DescriptorSetHandle,
    DescriptorWrite, FrameBufferDescriptor, FrameBufferHandle, GpuBackend, ImageViewDescriptor,
    ImageViewHandle, PipelineResourcesHandle, SamplerHandle, SpaceLayout,
};
use crate::cache::{DescriptorSetLayoutKey, PipelineCache, PipelineResourcesKey};
use crate::command::{BoundResource, ResourceBindings};
use crate::config::ExecutionConfig;
use crate::error::GraphicsError;
use crate::profiling::profile_scope;
use crate::resources::{ImageId, ResourceRegistry};
use crate::transition::TransitionBuffer;
use crate::types::{
    BufferDescriptor, BufferUsage, Extent2d, MipRange, QueueIndex, SamplerDescriptor,
    ShaderStages, TextureFormat,
};

/// Scratch offsets of acceleration-structure builds are aligned to this.
const SCRATCH_ALIGNMENT: u64 = 256;

/// Backend objects owned by one batch.
///
/// Everything in the ledger is destroyed exactly once, after the batch's fence
/// has signaled.
#[derive(Debug, Default)]
pub struct BatchResources {
    objects: Vec<BackendObject>,
}

impl BatchResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: impl Into<BackendObject>) {
        self.objects.push(object.into());
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[BackendObject] {
        &self.objects
    }

    pub(crate) fn into_objects(self) -> Vec<BackendObject> {
        self.objects
    }
}

impl Extend<BackendObject> for BatchResources {
    fn extend<T: IntoIterator<Item = BackendObject>>(&mut self, iter: T) {
        self.objects.extend(iter);
    }
}

/// Pipeline resources and descriptor sets of one pipeline-bound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundDescriptorSets {
    pub(crate) resources: PipelineResourcesHandle,
    /// Sets grouped into runs of consecutive spaces: `(first_space, sets)`.
    pub(crate) runs: Vec<(u32, Vec<DescriptorSetHandle>)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FrameBufferKey {
    color: Vec<ImageViewHandle>,
    depth_stencil: Option<ImageViewHandle>,
    size: Extent2d,
}

#[derive(Debug)]
struct ScratchMemory {
    arena: StackArena,
    buffer: Option<BufferHandle>,
}

/// Everything one batch allocates while its queues replay.
///
/// Factory methods record what they create in the batch ledger, which the
/// execution context destroys once the GPU has finished the batch.
pub(crate) struct BatchContext<'a> {
    pub(crate) index: u64,
    pub(crate) backend: &'a dyn GpuBackend,
    pub(crate) registry: &'a mut ResourceRegistry,
    pub(crate) cache: &'a mut PipelineCache,
    pub(crate) config: &'a ExecutionConfig,
    pub(crate) transitions: TransitionBuffer,
    pub(crate) immediate: Option<ImmediateConstantBuffers>,
    resources: BatchResources,
    frame_buffers: HashMap<FrameBufferKey, FrameBufferHandle>,
    image_views: HashMap<ImageViewDescriptor, ImageViewHandle>,
    samplers: HashMap<SamplerDescriptor, SamplerHandle>,
    scratch: Vec<ScratchMemory>,
}

impl<'a> BatchContext<'a> {
    pub(crate) fn new(
        index: u64,
        backend: &'a dyn GpuBackend,
        registry: &'a mut ResourceRegistry,
        cache: &'a mut PipelineCache,
        config: &'a ExecutionConfig,
    ) -> Self {
        let scratch = config
            .queues
            .iter()
            .map(|_| ScratchMemory {
                arena: StackArena::new(config.scratch_arena_size),
                buffer: None,
            })
            .collect();
        Self {
            index,
            backend,
            registry,
            cache,
            config,
            transitions: TransitionBuffer::new(),
            immediate: None,
            resources: BatchResources::new(),
            frame_buffers: HashMap::new(),
            image_views: HashMap::new(),
            samplers: HashMap::new(),
            scratch,
        }
    }

    /// Hand an object to the batch ledger.
    pub(crate) fn track(&mut self, object: impl Into<BackendObject>) {
        self.resources.push(object);
    }

    /// The ledger, for disposal once the batch completes or is abandoned.
    pub(crate) fn into_resources(self) -> BatchResources {
        self.resources
    }

    // ------------------------------------------------------------------
    // Transient buffers
    // ------------------------------------------------------------------

    /// Create a buffer that lives as long as the batch.
    pub(crate) fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferHandle, GraphicsError> {
        let buffer = self.backend.create_buffer(descriptor)?;
        self.track(buffer);
        Ok(buffer)
    }

    /// Create a host-visible buffer holding `bytes`.
    pub(crate) fn upload(
        &mut self,
        bytes: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferHandle, GraphicsError> {
        let size = (bytes.len() as u64).max(1);
        let buffer = self.create_buffer(&BufferDescriptor::upload(size, usage))?;
        if !bytes.is_empty() {
            self.backend.write_buffer(buffer, 0, bytes)?;
        }
        Ok(buffer)
    }

    /// Write the batch's immediate constants into a new upload buffer and
    /// create the device buffer every queue copies its ranges into.
    pub(crate) fn flush_immediate_constant_buffers(
        &mut self,
        staged: StagedConstants,
    ) -> Result<(), GraphicsError> {
        if staged.is_empty() {
            return Ok(());
        }
        profile_scope!("flush_immediate_constant_buffers");
        let size = self.config.immediate_constant_buffer_size;
        let upload = self.create_buffer(
            &BufferDescriptor::upload(size, BufferUsage::COPY_SRC)
                .with_label("immediate constants (upload)"),
        )?;
        let device = self.create_buffer(
            &BufferDescriptor::new(size, BufferUsage::CONSTANT | BufferUsage::COPY_DST)
                .with_label("immediate constants"),
        )?;
        self.backend.write_buffer(upload, 0, &staged.data)?;
        log::trace!(
            "Batch {}: {} byte(s) of immediate constants uploaded",
            self.index,
            staged.data.len()
        );
        self.immediate = Some(ImmediateConstantBuffers {
            upload,
            device,
            staged,
        });
        Ok(())
    }

    /// Take `size` bytes of the queue's acceleration-structure scratch memory.
    ///
    /// Returns the scratch buffer, the offset of the allocation and a bookmark
    /// to hand back to [`release_scratch`](Self::release_scratch) once the
    /// build is recorded.
    ///
    /// # Panics
    ///
    /// Panics if the scratch arena is exhausted.
    pub(crate) fn scratch(
        &mut self,
        queue: QueueIndex,
        size: u64,
    ) -> Result<(BufferHandle, u64, Bookmark), GraphicsError> {
        let capacity = self.config.scratch_arena_size;
        let buffer = match self.scratch[queue.index()].buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = self.create_buffer(
                    &BufferDescriptor::new(capacity, BufferUsage::ACCELERATION_STRUCTURE_SCRATCH)
                        .with_label(format!("{queue} scratch")),
                )?;
                self.scratch[queue.index()].buffer = Some(buffer);
                buffer
            }
        };
        let arena = &mut self.scratch[queue.index()].arena;
        let bookmark = arena.push_bookmark();
        let Some(allocation) = arena.allocate(size, SCRATCH_ALIGNMENT) else {
            panic!(
                "acceleration structure scratch arena exhausted: {size} byte(s) requested, {} of {capacity} in use",
                arena.used()
            );
        };
        Ok((buffer, allocation.offset, bookmark))
    }

    pub(crate) fn release_scratch(&mut self, queue: QueueIndex, bookmark: Bookmark) {
        self.scratch[queue.index()].arena.pop_bookmark(bookmark);
    }

    // ------------------------------------------------------------------
    // Views, frame buffers and samplers
    // ------------------------------------------------------------------

    /// Get or create a view for this batch.
    pub(crate) fn image_view(
        &mut self,
        descriptor: ImageViewDescriptor,
    ) -> Result<ImageViewHandle, GraphicsError> {
        if let Some(view) = self.image_views.get(&descriptor) {
            return Ok(*view);
        }
        let view = self.backend.create_image_view(&descriptor)?;
        self.track(view);
        self.image_views.insert(descriptor, view);
        Ok(view)
    }

    /// View over `mips` of a registry image, in the image's own format.
    pub(crate) fn registry_image_view(
        &mut self,
        image: ImageId,
        mips: MipRange,
    ) -> Result<(ImageViewHandle, TextureFormat), GraphicsError> {
        let entry = self.registry.image_entry(image);
        let levels = mips.resolve(entry.descriptor.mip_levels);
        let descriptor = ImageViewDescriptor {
            image: entry.handle,
            dimension: entry.descriptor.dimension,
            format: entry.descriptor.format,
            first_mip: levels.start,
            mip_count: levels.end - levels.start,
        };
        Ok((self.image_view(descriptor)?, descriptor.format))
    }

    /// Get or create a frame buffer for this batch.
    pub(crate) fn frame_buffer(
        &mut self,
        color: &[ImageViewHandle],
        depth_stencil: Option<ImageViewHandle>,
        size: Extent2d,
    ) -> Result<FrameBufferHandle, GraphicsError> {
        let key = FrameBufferKey {
            color: color.to_vec(),
            depth_stencil,
            size,
        };
        if let Some(frame_buffer) = self.frame_buffers.get(&key) {
            return Ok(*frame_buffer);
        }
        let frame_buffer = self.backend.create_frame_buffer(&FrameBufferDescriptor {
            color,
            depth_stencil,
            size,
        })?;
        self.track(frame_buffer);
        self.frame_buffers.insert(key, frame_buffer);
        Ok(frame_buffer)
    }

    pub(crate) fn sampler(
        &mut self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError> {
        if let Some(sampler) = self.samplers.get(descriptor) {
            return Ok(*sampler);
        }
        let sampler = self.backend.create_sampler(descriptor)?;
        self.track(sampler);
        self.samplers.insert(descriptor.clone(), sampler);
        Ok(sampler)
    }

    // ------------------------------------------------------------------
    // Descriptor sets
    // ------------------------------------------------------------------

    fn descriptor_resource(
        &mut self,
        resource: &BoundResource,
    ) -> Result<DescriptorResource, GraphicsError> {
        Ok(match resource {
            BoundResource::ReadOnlyImage { image, mips }
            | BoundResource::ReadWriteImage { image, mips } => {
                DescriptorResource::Image(self.registry_image_view(*image, *mips)?.0)
            }
            BoundResource::ReadOnlyBuffer {
                buffer,
                offset,
                size,
                stride,
            }
            | BoundResource::ReadWriteBuffer {
                buffer,
                offset,
                size,
                stride,
            } => DescriptorResource::Buffer {
                buffer: self.registry.buffer_entry(*buffer).handle,
                offset: *offset,
                size: *size,
                stride: *stride,
            },
            BoundResource::ConstantBuffer {
                buffer,
                offset,
                size,
            } => DescriptorResource::ConstantBuffer {
                buffer: self.registry.buffer_entry(*buffer).handle,
                offset: *offset,
                size: *size,
            },
            BoundResource::ImmediateConstants(view) => {
                assert_eq!(
                    view.batch, self.index,
                    "contract violation: immediate constants staged for batch {} bound in batch {}",
                    view.batch, self.index
                );
                let Some(immediate) = &self.immediate else {
                    panic!("contract violation: immediate constants bound but none were staged");
                };
                DescriptorResource::ConstantBuffer {
                    buffer: immediate.device,
                    offset: view.offset(),
                    size: view.size(),
                }
            }
            BoundResource::Sampler(descriptor) => {
                DescriptorResource::Sampler(self.sampler(descriptor)?)
            }
            BoundResource::AccelerationStructure(id) => DescriptorResource::AccelerationStructure(
                self.registry.acceleration_structure_entry(*id).handle,
            ),
            BoundResource::ImageArray(_) | BoundResource::BufferArray(_) => {
                unreachable!("descriptor arrays are bound as whole sets")
            }
        })
    }

    /// Resolve the pipeline resources of `bindings` and fill one descriptor
    /// set per space.
    ///
    /// Descriptor arrays bring their own set. Every other space gets a fresh
    /// set owned by this batch, written once.
    pub(crate) fn use_pipeline_resources(
        &mut self,
        bindings: &ResourceBindings,
        visibility: ShaderStages,
    ) -> Result<BoundDescriptorSets, GraphicsError> {
        let mut layouts = Vec::with_capacity(bindings.sets.len());
        let mut sets: Vec<(u32, DescriptorSetHandle)> = Vec::with_capacity(bindings.sets.len());

        for binding in &bindings.sets {
            let (layout, set) = match binding.array() {
                Some(BoundResource::ImageArray(id)) => {
                    let array = self.registry.image_array_mut(*id);
                    array.last_used_batch = Some(self.index);
                    (array.layout, array.set)
                }
                Some(BoundResource::BufferArray(id)) => {
                    let array = self.registry.buffer_array_mut(*id);
                    array.last_used_batch = Some(self.index);
                    (array.layout, array.set)
                }
                _ => {
                    let ranges = binding
                        .bindings
                        .iter()
                        .map(|b| DescriptorRangeBinding {
                            register: b.register,
                            count: 1,
                            ty: b.resource.descriptor_type(),
                        })
                        .collect();
                    let layout = self.cache.get_descriptor_set_layout(
                        &DescriptorSetLayoutKey::new(ranges, visibility),
                    )?;
                    let set = self.backend.create_descriptor_set(layout)?;
                    self.track(set);

                    let mut writes = Vec::with_capacity(binding.bindings.len());
                    for b in &binding.bindings {
                        writes.push(DescriptorWrite {
                            register: b.register,
                            array_index: 0,
                            ty: b.resource.descriptor_type(),
                            resource: self.descriptor_resource(&b.resource)?,
                        });
                    }
                    self.backend.write_descriptor_set(set, &writes);
                    (layout, set)
                }
            };
            layouts.push(SpaceLayout {
                space: binding.space,
                layout,
            });
            sets.push((binding.space, set));
        }

        let resources = self
            .cache
            .get_pipeline_resources(&PipelineResourcesKey::new(layouts))?;
        Ok(BoundDescriptorSets {
            resources,
            runs: contiguous_runs(&sets),
        })
    }
}

impl std::fmt::Debug for BatchContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchContext")
            .field("index", &self.index)
            .field("resources", &self.resources.len())
            .field("frame_buffers", &self.frame_buffers.len())
            .field("image_views", &self.image_views.len())
            .field("samplers", &self.samplers.len())
            .finish()
    }
}

/// Group sets sorted by space into runs of consecutive spaces.
fn contiguous_runs(sets: &[(u32, DescriptorSetHandle)]) -> Vec<(u32, Vec<DescriptorSetHandle>)> {
    let mut runs: Vec<(u32, Vec<DescriptorSetHandle>)> = Vec::new();
    for &(space, set) in sets {
        match runs.last_mut() {
            Some((first, run)) if *first + run.len() as u32 == space => run.push(set),
            _ => runs.push((space, vec![set])),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(raw: u64) -> DescriptorSetHandle {
        DescriptorSetHandle::from_raw(raw)
    }

    #[test]
    fn test_contiguous_runs() {
        let sets = [(0, set(1)), (1, set(2)), (3, set(3)), (4, set(4)), (7, set(5))];
        assert_eq!(
            contiguous_runs(&sets),
            vec![
                (0, vec![set(1), set(2)]),
                (3, vec![set(3), set(4)]),
                (7, vec![set(5)]),
            ]
        );
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[cfg(feature = "dummy")]
    mod dummy {
        use std::sync::Arc;

        use super::super::*;
        use crate::backend::DummyBackend;
        use crate::command::DescriptorSetBinding;
        use crate::types::{ImageDescriptor, ImageUsage};

        struct Fixture {
            backend: Arc<DummyBackend>,
            registry: ResourceRegistry,
            cache: PipelineCache,
            config: ExecutionConfig,
        }

        fn fixture() -> Fixture {
            let backend = Arc::new(DummyBackend::new());
            Fixture {
                registry: ResourceRegistry::new(backend.clone()),
                cache: PipelineCache::new(backend.clone()),
                config: ExecutionConfig::new().with_scratch_arena_size(4096),
                backend,
            }
        }

        #[test]
        fn test_views_and_samplers_are_cached_per_batch() {
            let mut f = fixture();
            let image = f
                .registry
                .create_image(&ImageDescriptor::new_2d(
                    8,
                    8,
                    TextureFormat::Rgba8Unorm,
                    ImageUsage::SHADER_READ,
                ))
                .unwrap();
            let mut batch = BatchContext::new(
                0,
                f.backend.as_ref(),
                &mut f.registry,
                &mut f.cache,
                &f.config,
            );

            let (a, _) = batch.registry_image_view(image, MipRange::all()).unwrap();
            let (b, _) = batch.registry_image_view(image, MipRange::only(0)).unwrap();
            assert_eq!(a, b);
            let s1 = batch.sampler(&SamplerDescriptor::linear()).unwrap();
            let s2 = batch.sampler(&SamplerDescriptor::linear()).unwrap();
            assert_eq!(s1, s2);

            let resources = batch.into_resources();
            assert_eq!(resources.len(), 2);
            let statistics = f.backend.statistics();
            assert_eq!(statistics.image_views_created, 1);
            assert_eq!(statistics.samplers_created, 1);
        }

        #[test]
        fn test_pipeline_resources_share_layouts() {
            let mut f = fixture();
            let mut batch = BatchContext::new(
                0,
                f.backend.as_ref(),
                &mut f.registry,
                &mut f.cache,
                &f.config,
            );
            let bindings = ResourceBindings::new()
                .with_set(
                    DescriptorSetBinding::new(0)
                        .with(0, BoundResource::Sampler(SamplerDescriptor::linear())),
                )
                .with_set(
                    DescriptorSetBinding::new(1)
                        .with(0, BoundResource::Sampler(SamplerDescriptor::nearest())),
                )
                .with_set(
                    DescriptorSetBinding::new(4)
                        .with(0, BoundResource::Sampler(SamplerDescriptor::linear())),
                );

            let first = batch.use_pipeline_resources(&bindings, ShaderStages::PIXEL).unwrap();
            let second = batch.use_pipeline_resources(&bindings, ShaderStages::PIXEL).unwrap();
            assert_eq!(first.resources, second.resources);
            assert_eq!(first.runs.len(), 2);
            assert_eq!(first.runs[0].1.len(), 2);
            assert_eq!(first.runs[1].0, 4);
            // Descriptor sets are per use, layouts are shared.
            assert_ne!(first.runs[0].1, second.runs[0].1);
            drop(batch);

            let statistics = f.backend.statistics();
            assert_eq!(statistics.descriptor_set_layouts_created, 1);
            assert_eq!(statistics.pipeline_resources_created, 1);
            assert_eq!(statistics.descriptor_sets_created, 6);
        }

        #[test]
        fn test_scratch_bookmarks_reuse_memory() {
            let mut f = fixture();
            let mut batch = BatchContext::new(
                0,
                f.backend.as_ref(),
                &mut f.registry,
                &mut f.cache,
                &f.config,
            );
            let (buffer, offset, mark) = batch.scratch(QueueIndex(0), 1000).unwrap();
            assert_eq!(offset, 0);
            batch.release_scratch(QueueIndex(0), mark);
            let (again, offset, _) = batch.scratch(QueueIndex(0), 1000).unwrap();
            assert_eq!((again, offset), (buffer, 0));
            assert_eq!(batch.into_resources().len(), 1);
        }

        #[test]
        #[should_panic(expected = "scratch arena exhausted")]
        fn test_scratch_exhaustion_is_fatal() {
            let mut f = fixture();
            let mut batch = BatchContext::new(
                0,
                f.backend.as_ref(),
                &mut f.registry,
                &mut f.cache,
                &f.config,
            );
            let _ = batch.scratch(QueueIndex(1), 8192);
        }
    }
}
