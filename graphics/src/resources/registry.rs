//! Storage and lifetime of logical resources.

use std::sync::Arc;

use slotmap::SlotMap;

use super::descriptor_array::{BufferDescriptorArray, ImageDescriptorArray};
use super::swap_chain::SwapChainEntry;
use super::{
    AccelerationStructureId, BufferDescriptorArrayId, BufferId, ImageDescriptorArrayId, ImageId,
    SwapChainId,
};
use crate::backend::{
    AccelerationStructureHandle, AccelerationStructureKind, BackendObject, BufferHandle,
    GpuBackend, ImageHandle, ImageViewDescriptor, ImageViewHandle,
};
use crate::error::GraphicsError;
use crate::types::{
    BufferAccess, BufferDescriptor, BufferUsage, ImageAccess, ImageDescriptor, ImageDimension,
    MipRange, TextureFormat,
};

#[derive(Debug)]
pub(crate) struct ImageEntry {
    pub(crate) handle: ImageHandle,
    pub(crate) descriptor: ImageDescriptor,
    pub(crate) mip_access: Vec<ImageAccess>,
    pub(crate) released: bool,
}

#[derive(Debug)]
pub(crate) struct BufferEntry {
    pub(crate) handle: BufferHandle,
    pub(crate) descriptor: BufferDescriptor,
    pub(crate) access: BufferAccess,
    pub(crate) released: bool,
}

#[derive(Debug)]
pub(crate) struct AccelerationStructureEntry {
    pub(crate) handle: AccelerationStructureHandle,
    pub(crate) buffer: BufferId,
    pub(crate) kind: AccelerationStructureKind,
    pub(crate) released: bool,
}

/// Registry of logical resources and their tracked GPU access state.
///
/// Public lookups panic with a contract violation when given an id that was
/// released or never existed. Crate-internal replay lookups still accept ids
/// released after their commands were recorded; those entries stay alive until
/// the batch that used them has been submitted.
pub struct ResourceRegistry {
    backend: Arc<dyn GpuBackend>,
    pub(crate) images: SlotMap<ImageId, ImageEntry>,
    pub(crate) buffers: SlotMap<BufferId, BufferEntry>,
    pub(crate) swap_chains: SlotMap<SwapChainId, SwapChainEntry>,
    pub(crate) acceleration_structures:
        SlotMap<AccelerationStructureId, AccelerationStructureEntry>,
    pub(crate) image_arrays: SlotMap<ImageDescriptorArrayId, ImageDescriptorArray>,
    pub(crate) buffer_arrays: SlotMap<BufferDescriptorArrayId, BufferDescriptorArray>,
    pending_disposal: Vec<BackendObject>,
}

impl ResourceRegistry {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>) -> Self {
        Self {
            backend,
            images: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            swap_chains: SlotMap::with_key(),
            acceleration_structures: SlotMap::with_key(),
            image_arrays: SlotMap::with_key(),
            buffer_arrays: SlotMap::with_key(),
            pending_disposal: Vec::new(),
        }
    }

    pub(crate) fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create an image. Every mip starts in [`ImageAccess::Undefined`].
    pub fn create_image(&mut self, descriptor: &ImageDescriptor) -> Result<ImageId, GraphicsError> {
        if descriptor.mip_levels == 0 {
            return Err(GraphicsError::InvalidParameter(
                "an image needs at least one mip level".to_string(),
            ));
        }
        let handle = match descriptor.dimension {
            ImageDimension::D2 => self.backend.create_image2d(descriptor)?,
            ImageDimension::D3 => self.backend.create_image3d(descriptor)?,
        };
        let id = self.images.insert(ImageEntry {
            handle,
            descriptor: descriptor.clone(),
            mip_access: vec![ImageAccess::Undefined; descriptor.mip_levels as usize],
            released: false,
        });
        log::trace!("Created {:?} ({:?})", id, descriptor.label);
        Ok(id)
    }

    /// Create a buffer in the undefined access state.
    pub fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferId, GraphicsError> {
        let handle = self.backend.create_buffer(descriptor)?;
        let id = self.buffers.insert(BufferEntry {
            handle,
            descriptor: descriptor.clone(),
            access: BufferAccess::UNDEFINED,
            released: false,
        });
        log::trace!("Created {:?} ({:?})", id, descriptor.label);
        Ok(id)
    }

    /// Create an acceleration structure over a new device buffer of `size` bytes.
    ///
    /// Use [`GpuBackend::bottom_level_build_sizes`] or
    /// [`GpuBackend::top_level_build_sizes`] to size it.
    pub fn create_acceleration_structure(
        &mut self,
        kind: AccelerationStructureKind,
        size: u64,
    ) -> Result<AccelerationStructureId, GraphicsError> {
        let buffer = self.create_buffer(
            &BufferDescriptor::new(size, BufferUsage::ACCELERATION_STRUCTURE)
                .with_label(format!("{kind:?} acceleration structure")),
        )?;
        let buffer_handle = self.buffers[buffer].handle;
        let handle = match self
            .backend
            .create_acceleration_structure(buffer_handle, 0, size, kind)
        {
            Ok(handle) => handle,
            Err(error) => {
                self.buffers.remove(buffer);
                self.backend.destroy(buffer_handle.into());
                return Err(error);
            }
        };
        Ok(self.acceleration_structures.insert(AccelerationStructureEntry {
            handle,
            buffer,
            kind,
            released: false,
        }))
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Release an image. Its backend object is destroyed once the next
    /// submitted batch completes.
    ///
    /// # Panics
    ///
    /// Panics if the image was already released.
    pub fn release_image(&mut self, id: ImageId) {
        self.live_image(id);
        self.images[id].released = true;
    }

    /// Release a buffer. See [`release_image`](Self::release_image).
    pub fn release_buffer(&mut self, id: BufferId) {
        self.live_buffer(id);
        self.buffers[id].released = true;
    }

    /// Release an acceleration structure together with its backing buffer.
    pub fn release_acceleration_structure(&mut self, id: AccelerationStructureId) {
        let buffer = self.live_acceleration_structure(id).buffer;
        self.acceleration_structures[id].released = true;
        self.buffers[buffer].released = true;
    }

    /// Hand a backend object to the next batch's disposal list.
    pub(crate) fn dispose(&mut self, object: BackendObject) {
        self.pending_disposal.push(object);
    }

    /// Remove released entries and collect every backend object awaiting
    /// disposal.
    pub(crate) fn take_disposals(&mut self) -> Vec<BackendObject> {
        let mut objects = std::mem::take(&mut self.pending_disposal);

        self.acceleration_structures.retain(|_, entry| {
            if entry.released {
                objects.push(entry.handle.into());
            }
            !entry.released
        });
        self.images.retain(|_, entry| {
            if entry.released {
                objects.push(entry.handle.into());
            }
            !entry.released
        });
        self.buffers.retain(|_, entry| {
            if entry.released {
                objects.push(entry.handle.into());
            }
            !entry.released
        });
        self.swap_chains.retain(|_, entry| {
            if entry.released {
                objects.push(entry.handle.into());
            }
            !entry.released
        });
        self.image_arrays.retain(|_, array| {
            if array.released {
                objects.extend(array.backend_objects());
            }
            !array.released
        });
        self.buffer_arrays.retain(|_, array| {
            if array.released {
                objects.extend(array.backend_objects());
            }
            !array.released
        });

        if !objects.is_empty() {
            log::trace!("{} backend object(s) scheduled for disposal", objects.len());
        }
        objects
    }

    /// Release everything still registered and collect all backend objects.
    /// Used on teardown, once the GPU is idle.
    pub(crate) fn release_all(&mut self) -> Vec<BackendObject> {
        self.images.values_mut().for_each(|e| e.released = true);
        self.buffers.values_mut().for_each(|e| e.released = true);
        self.swap_chains.values_mut().for_each(|e| e.released = true);
        self.acceleration_structures
            .values_mut()
            .for_each(|e| e.released = true);
        self.image_arrays.values_mut().for_each(|a| a.released = true);
        self.buffer_arrays.values_mut().for_each(|a| a.released = true);
        self.take_disposals()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn image_descriptor(&self, id: ImageId) -> &ImageDescriptor {
        &self.live_image(id).descriptor
    }

    pub fn image_handle(&self, id: ImageId) -> ImageHandle {
        self.live_image(id).handle
    }

    /// Tracked access state of one mip.
    pub fn image_access(&self, id: ImageId, mip: u32) -> ImageAccess {
        let entry = self.live_image(id);
        entry.mip_access[MipRange::only(mip).resolve(entry.descriptor.mip_levels).start as usize]
    }

    pub fn buffer_descriptor(&self, id: BufferId) -> &BufferDescriptor {
        &self.live_buffer(id).descriptor
    }

    pub fn buffer_handle(&self, id: BufferId) -> BufferHandle {
        self.live_buffer(id).handle
    }

    /// Tracked access state of a buffer.
    pub fn buffer_access(&self, id: BufferId) -> BufferAccess {
        self.live_buffer(id).access
    }

    pub fn acceleration_structure_handle(
        &self,
        id: AccelerationStructureId,
    ) -> AccelerationStructureHandle {
        self.live_acceleration_structure(id).handle
    }

    /// Buffer backing an acceleration structure.
    pub fn acceleration_structure_buffer(&self, id: AccelerationStructureId) -> BufferId {
        self.live_acceleration_structure(id).buffer
    }

    pub fn acceleration_structure_kind(
        &self,
        id: AccelerationStructureId,
    ) -> AccelerationStructureKind {
        self.live_acceleration_structure(id).kind
    }

    /// Number of live (unreleased) images and buffers, for diagnostics.
    pub fn live_resource_count(&self) -> usize {
        self.images.values().filter(|e| !e.released).count()
            + self.buffers.values().filter(|e| !e.released).count()
    }

    // ------------------------------------------------------------------
    // Checked lookups
    // ------------------------------------------------------------------

    pub(crate) fn live_image(&self, id: ImageId) -> &ImageEntry {
        match self.images.get(id) {
            Some(entry) if !entry.released => entry,
            Some(_) => panic!("contract violation: {id:?} used after release"),
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn live_buffer(&self, id: BufferId) -> &BufferEntry {
        match self.buffers.get(id) {
            Some(entry) if !entry.released => entry,
            Some(_) => panic!("contract violation: {id:?} used after release"),
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn live_acceleration_structure(
        &self,
        id: AccelerationStructureId,
    ) -> &AccelerationStructureEntry {
        match self.acceleration_structures.get(id) {
            Some(entry) if !entry.released => entry,
            Some(_) => panic!("contract violation: {id:?} used after release"),
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn image_entry(&self, id: ImageId) -> &ImageEntry {
        match self.images.get(id) {
            Some(entry) => entry,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn image_entry_mut(&mut self, id: ImageId) -> &mut ImageEntry {
        match self.images.get_mut(id) {
            Some(entry) => entry,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn buffer_entry(&self, id: BufferId) -> &BufferEntry {
        match self.buffers.get(id) {
            Some(entry) => entry,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn buffer_entry_mut(&mut self, id: BufferId) -> &mut BufferEntry {
        match self.buffers.get_mut(id) {
            Some(entry) => entry,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn acceleration_structure_entry(
        &self,
        id: AccelerationStructureId,
    ) -> &AccelerationStructureEntry {
        match self.acceleration_structures.get(id) {
            Some(entry) => entry,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    /// Create a view over `mips` of an image, reinterpreted as `format`.
    pub(crate) fn create_image_view(
        &self,
        id: ImageId,
        format: TextureFormat,
        mips: MipRange,
    ) -> Result<ImageViewHandle, GraphicsError> {
        let entry = self.image_entry(id);
        let levels = mips.resolve(entry.descriptor.mip_levels);
        self.backend.create_image_view(&ImageViewDescriptor {
            image: entry.handle,
            dimension: entry.descriptor.dimension,
            format,
            first_mip: levels.start,
            mip_count: levels.end - levels.start,
        })
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("backend", &self.backend.name())
            .field("images", &self.images.len())
            .field("buffers", &self.buffers.len())
            .field("swap_chains", &self.swap_chains.len())
            .field("acceleration_structures", &self.acceleration_structures.len())
            .field("pending_disposal", &self.pending_disposal.len())
            .finish()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::ImageUsage;

    fn registry() -> (Arc<DummyBackend>, ResourceRegistry) {
        let backend = Arc::new(DummyBackend::new());
        let registry = ResourceRegistry::new(backend.clone());
        (backend, registry)
    }

    #[test]
    fn test_new_resources_start_undefined() {
        let (_backend, mut registry) = registry();
        let image = registry
            .create_image(
                &ImageDescriptor::new_2d(64, 64, TextureFormat::Rgba8Unorm, ImageUsage::SHADER_READ)
                    .with_full_mip_chain(),
            )
            .unwrap();
        let buffer = registry
            .create_buffer(&BufferDescriptor::new(256, BufferUsage::CONSTANT))
            .unwrap();

        assert_eq!(registry.image_descriptor(image).mip_levels, 7);
        for mip in 0..7 {
            assert_eq!(registry.image_access(image, mip), ImageAccess::Undefined);
        }
        assert_eq!(registry.buffer_access(buffer), BufferAccess::UNDEFINED);
    }

    #[test]
    fn test_release_is_deferred_until_disposals_are_taken() {
        let (backend, mut registry) = registry();
        let buffer = registry
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::VERTEX))
            .unwrap();
        let handle = registry.buffer_handle(buffer);

        registry.release_buffer(buffer);
        assert!(backend.is_alive(handle.into()));
        assert_eq!(registry.buffer_entry(buffer).handle, handle);

        let disposals = registry.take_disposals();
        assert_eq!(disposals, vec![BackendObject::Buffer(handle)]);
        assert!(registry.buffers.get(buffer).is_none());
    }

    #[test]
    fn test_acceleration_structure_release_takes_its_buffer() {
        let (_backend, mut registry) = registry();
        let blas = registry
            .create_acceleration_structure(AccelerationStructureKind::BottomLevel, 1024)
            .unwrap();
        let buffer = registry.acceleration_structure_buffer(blas);
        registry.release_acceleration_structure(blas);
        assert_eq!(registry.take_disposals().len(), 2);
        assert!(registry.buffers.get(buffer).is_none());
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_use_after_release_panics() {
        let (_backend, mut registry) = registry();
        let buffer = registry
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::VERTEX))
            .unwrap();
        registry.release_buffer(buffer);
        registry.buffer_handle(buffer);
    }

    #[test]
    fn test_zero_mip_image_is_rejected() {
        let (_backend, mut registry) = registry();
        let descriptor =
            ImageDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, ImageUsage::SHADER_READ)
                .with_mip_levels(0);
        assert!(matches!(
            registry.create_image(&descriptor),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
