//! Bindless descriptor arrays.
//!
//! A descriptor array is one descriptor set holding a single large register
//! range. Writes are deferred: [`ResourceRegistry::write_image_descriptor`]
//! only records the new slot content, and the set itself is rewritten by
//! [`ResourceRegistry::flush_image_array`] once the GPU is no longer reading it.

use super::{
    BufferDescriptorArrayId, BufferId, ImageDescriptorArrayId, ImageId, ResourceRegistry,
};
use crate::backend::{
    BackendObject, DescriptorRangeBinding, DescriptorResource, DescriptorSetHandle,
    DescriptorSetLayoutHandle, DescriptorWrite, ImageViewHandle,
};
use crate::error::GraphicsError;
use crate::types::{BufferAccess, DescriptorType, ImageAccess, MipRange, ShaderStages};

/// Content of one image descriptor array slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSlot {
    pub image: ImageId,
    pub mips: MipRange,
}

/// Content of one buffer descriptor array slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSlot {
    pub buffer: BufferId,
    pub offset: u64,
    pub size: u64,
    pub stride: u32,
}

#[derive(Debug)]
pub(crate) struct ImageDescriptorArray {
    pub(crate) ty: DescriptorType,
    pub(crate) layout: DescriptorSetLayoutHandle,
    pub(crate) set: DescriptorSetHandle,
    pub(crate) slots: Vec<Option<ImageSlot>>,
    views: Vec<Option<ImageViewHandle>>,
    pending: Vec<u32>,
    /// Index of the last batch that bound this array.
    pub(crate) last_used_batch: Option<u64>,
    pub(crate) released: bool,
}

impl ImageDescriptorArray {
    pub(crate) fn access(&self) -> ImageAccess {
        match self.ty {
            DescriptorType::ReadWriteImage => ImageAccess::ShaderReadWrite,
            _ => ImageAccess::ShaderRead,
        }
    }

    pub(crate) fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn backend_objects(&self) -> impl Iterator<Item = BackendObject> + '_ {
        self.views
            .iter()
            .flatten()
            .map(|view| BackendObject::from(*view))
            .chain([self.set.into(), self.layout.into()])
    }
}

#[derive(Debug)]
pub(crate) struct BufferDescriptorArray {
    pub(crate) ty: DescriptorType,
    pub(crate) layout: DescriptorSetLayoutHandle,
    pub(crate) set: DescriptorSetHandle,
    pub(crate) slots: Vec<Option<BufferSlot>>,
    pending: Vec<u32>,
    pub(crate) last_used_batch: Option<u64>,
    pub(crate) released: bool,
}

impl BufferDescriptorArray {
    pub(crate) fn access(&self) -> BufferAccess {
        match self.ty {
            DescriptorType::ReadWriteBuffer => BufferAccess::shader_read_write(),
            _ => BufferAccess::SHADER_READ,
        }
    }

    pub(crate) fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn backend_objects(&self) -> impl Iterator<Item = BackendObject> + '_ {
        [BackendObject::from(self.set), self.layout.into()].into_iter()
    }
}

fn push_pending(pending: &mut Vec<u32>, index: u32) {
    if !pending.contains(&index) {
        pending.push(index);
    }
}

impl ResourceRegistry {
    fn create_array_set(
        &self,
        ty: DescriptorType,
        capacity: u32,
    ) -> Result<(DescriptorSetLayoutHandle, DescriptorSetHandle), GraphicsError> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "descriptor array capacity must be non-zero".to_string(),
            ));
        }
        let layout = self.backend().create_descriptor_set_layout(
            &[DescriptorRangeBinding {
                register: 0,
                count: capacity,
                ty,
            }],
            ShaderStages::ALL,
        )?;
        match self.backend().create_descriptor_set(layout) {
            Ok(set) => Ok((layout, set)),
            Err(error) => {
                self.backend().destroy(layout.into());
                Err(error)
            }
        }
    }

    /// Create an array of `capacity` image descriptors of type
    /// [`DescriptorType::ReadOnlyImage`] or [`DescriptorType::ReadWriteImage`].
    pub fn create_image_descriptor_array(
        &mut self,
        ty: DescriptorType,
        capacity: u32,
    ) -> Result<ImageDescriptorArrayId, GraphicsError> {
        assert!(
            matches!(
                ty,
                DescriptorType::ReadOnlyImage | DescriptorType::ReadWriteImage
            ),
            "contract violation: {ty:?} is not an image descriptor type"
        );
        let (layout, set) = self.create_array_set(ty, capacity)?;
        Ok(self.image_arrays.insert(ImageDescriptorArray {
            ty,
            layout,
            set,
            slots: vec![None; capacity as usize],
            views: vec![None; capacity as usize],
            pending: Vec::new(),
            last_used_batch: None,
            released: false,
        }))
    }

    /// Create an array of `capacity` buffer descriptors of type
    /// [`DescriptorType::ReadOnlyBuffer`] or [`DescriptorType::ReadWriteBuffer`].
    pub fn create_buffer_descriptor_array(
        &mut self,
        ty: DescriptorType,
        capacity: u32,
    ) -> Result<BufferDescriptorArrayId, GraphicsError> {
        assert!(
            matches!(
                ty,
                DescriptorType::ReadOnlyBuffer | DescriptorType::ReadWriteBuffer
            ),
            "contract violation: {ty:?} is not a buffer descriptor type"
        );
        let (layout, set) = self.create_array_set(ty, capacity)?;
        Ok(self.buffer_arrays.insert(BufferDescriptorArray {
            ty,
            layout,
            set,
            slots: vec![None; capacity as usize],
            pending: Vec::new(),
            last_used_batch: None,
            released: false,
        }))
    }

    pub fn release_image_descriptor_array(&mut self, id: ImageDescriptorArrayId) {
        self.live_image_array_mut(id).released = true;
    }

    pub fn release_buffer_descriptor_array(&mut self, id: BufferDescriptorArrayId) {
        self.live_buffer_array_mut(id).released = true;
    }

    /// Point slot `index` at `image`, or clear it with `None`. Takes effect
    /// when the array is next flushed.
    pub fn write_image_descriptor(
        &mut self,
        id: ImageDescriptorArrayId,
        index: u32,
        slot: Option<ImageSlot>,
    ) {
        if let Some(slot) = slot {
            let levels = self.live_image(slot.image).descriptor.mip_levels;
            slot.mips.resolve(levels);
        }
        let array = self.live_image_array_mut(id);
        assert!(
            (index as usize) < array.slots.len(),
            "contract violation: slot {index} out of range for an array of {}",
            array.slots.len()
        );
        array.slots[index as usize] = slot;
        push_pending(&mut array.pending, index);
    }

    /// Point slot `index` at a buffer range, or clear it with `None`.
    pub fn write_buffer_descriptor(
        &mut self,
        id: BufferDescriptorArrayId,
        index: u32,
        slot: Option<BufferSlot>,
    ) {
        if let Some(slot) = slot {
            let size = self.live_buffer(slot.buffer).descriptor.size;
            assert!(
                slot.offset + slot.size <= size,
                "contract violation: range {}..{} exceeds buffer of {} bytes",
                slot.offset,
                slot.offset + slot.size,
                size
            );
        }
        let array = self.live_buffer_array_mut(id);
        assert!(
            (index as usize) < array.slots.len(),
            "contract violation: slot {index} out of range for an array of {}",
            array.slots.len()
        );
        array.slots[index as usize] = slot;
        push_pending(&mut array.pending, index);
    }

    /// Rewrite the pending slots of an image array. The GPU must not be
    /// reading the array.
    pub(crate) fn flush_image_array(
        &mut self,
        id: ImageDescriptorArrayId,
    ) -> Result<usize, GraphicsError> {
        let pending = std::mem::take(&mut self.image_array_mut(id).pending);
        let mut writes = Vec::with_capacity(pending.len());
        for index in &pending {
            let array = self.image_array(id);
            let (slot, ty) = (array.slots[*index as usize], array.ty);
            let view = match slot {
                Some(slot) => {
                    let format = self.image_entry(slot.image).descriptor.format;
                    let view = self.create_image_view(slot.image, format, slot.mips)?;
                    writes.push(DescriptorWrite {
                        register: 0,
                        array_index: *index,
                        ty,
                        resource: DescriptorResource::Image(view),
                    });
                    Some(view)
                }
                None => None,
            };
            let old = std::mem::replace(&mut self.image_array_mut(id).views[*index as usize], view);
            if let Some(old) = old {
                self.dispose(old.into());
            }
        }
        let set = self.image_array(id).set;
        if !writes.is_empty() {
            self.backend().write_descriptor_set(set, &writes);
        }
        log::debug!("Flushed {} slot(s) of {id:?}", pending.len());
        Ok(pending.len())
    }

    /// Rewrite the pending slots of a buffer array.
    pub(crate) fn flush_buffer_array(&mut self, id: BufferDescriptorArrayId) -> usize {
        let pending = std::mem::take(&mut self.buffer_array_mut(id).pending);
        let array = self.buffer_array(id);
        let writes: Vec<_> = pending
            .iter()
            .filter_map(|index| {
                array.slots[*index as usize].map(|slot| DescriptorWrite {
                    register: 0,
                    array_index: *index,
                    ty: array.ty,
                    resource: DescriptorResource::Buffer {
                        buffer: self.buffer_entry(slot.buffer).handle,
                        offset: slot.offset,
                        size: slot.size,
                        stride: slot.stride,
                    },
                })
            })
            .collect();
        if !writes.is_empty() {
            self.backend().write_descriptor_set(array.set, &writes);
        }
        log::debug!("Flushed {} slot(s) of {id:?}", pending.len());
        pending.len()
    }

    pub(crate) fn image_array(&self, id: ImageDescriptorArrayId) -> &ImageDescriptorArray {
        match self.image_arrays.get(id) {
            Some(array) => array,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn image_array_mut(
        &mut self,
        id: ImageDescriptorArrayId,
    ) -> &mut ImageDescriptorArray {
        match self.image_arrays.get_mut(id) {
            Some(array) => array,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn buffer_array(&self, id: BufferDescriptorArrayId) -> &BufferDescriptorArray {
        match self.buffer_arrays.get(id) {
            Some(array) => array,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn buffer_array_mut(
        &mut self,
        id: BufferDescriptorArrayId,
    ) -> &mut BufferDescriptorArray {
        match self.buffer_arrays.get_mut(id) {
            Some(array) => array,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn live_image_array(&self, id: ImageDescriptorArrayId) -> &ImageDescriptorArray {
        let array = self.image_array(id);
        assert!(!array.released, "contract violation: {id:?} used after release");
        array
    }

    pub(crate) fn live_buffer_array(
        &self,
        id: BufferDescriptorArrayId,
    ) -> &BufferDescriptorArray {
        let array = self.buffer_array(id);
        assert!(!array.released, "contract violation: {id:?} used after release");
        array
    }

    fn live_image_array_mut(&mut self, id: ImageDescriptorArrayId) -> &mut ImageDescriptorArray {
        let array = self.image_array_mut(id);
        assert!(!array.released, "contract violation: {id:?} used after release");
        array
    }

    fn live_buffer_array_mut(
        &mut self,
        id: BufferDescriptorArrayId,
    ) -> &mut BufferDescriptorArray {
        let array = self.buffer_array_mut(id);
        assert!(!array.released, "contract violation: {id:?} used after release");
        array
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::{BufferDescriptor, BufferUsage, ImageDescriptor, ImageUsage, TextureFormat};

    #[test]
    fn test_image_writes_are_deferred_until_flush() {
        let backend = Arc::new(DummyBackend::new());
        let mut registry = ResourceRegistry::new(backend.clone());
        let array = registry
            .create_image_descriptor_array(DescriptorType::ReadOnlyImage, 16)
            .unwrap();
        let image = registry
            .create_image(&ImageDescriptor::new_2d(
                8,
                8,
                TextureFormat::Rgba8Unorm,
                ImageUsage::SHADER_READ,
            ))
            .unwrap();

        registry.write_image_descriptor(
            array,
            3,
            Some(ImageSlot {
                image,
                mips: MipRange::all(),
            }),
        );
        let set = registry.image_array(array).set;
        assert!(backend.descriptor_set_contents(set).is_empty());
        assert!(registry.image_array(array).has_pending_writes());

        assert_eq!(registry.flush_image_array(array).unwrap(), 1);
        let contents = backend.descriptor_set_contents(set);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].array_index, 3);
        assert!(!registry.image_array(array).has_pending_writes());
    }

    #[test]
    fn test_overwritten_slot_view_is_disposed() {
        let backend = Arc::new(DummyBackend::new());
        let mut registry = ResourceRegistry::new(backend);
        let array = registry
            .create_image_descriptor_array(DescriptorType::ReadOnlyImage, 4)
            .unwrap();
        let image = registry
            .create_image(&ImageDescriptor::new_2d(
                8,
                8,
                TextureFormat::Rgba8Unorm,
                ImageUsage::SHADER_READ,
            ))
            .unwrap();
        let slot = Some(ImageSlot {
            image,
            mips: MipRange::all(),
        });

        registry.write_image_descriptor(array, 0, slot);
        registry.flush_image_array(array).unwrap();
        registry.write_image_descriptor(array, 0, None);
        registry.flush_image_array(array).unwrap();

        let disposed = registry.take_disposals();
        assert_eq!(disposed.len(), 1);
        assert!(matches!(disposed[0], BackendObject::ImageView(_)));
    }

    #[test]
    fn test_buffer_array_flush() {
        let backend = Arc::new(DummyBackend::new());
        let mut registry = ResourceRegistry::new(backend.clone());
        let array = registry
            .create_buffer_descriptor_array(DescriptorType::ReadWriteBuffer, 8)
            .unwrap();
        let buffer = registry
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::SHADER_READ_WRITE))
            .unwrap();
        registry.write_buffer_descriptor(
            array,
            7,
            Some(BufferSlot {
                buffer,
                offset: 512,
                size: 512,
                stride: 16,
            }),
        );
        assert_eq!(registry.flush_buffer_array(array), 1);
        assert_eq!(registry.buffer_array(array).access(), BufferAccess::shader_read_write());
        assert_eq!(
            backend.descriptor_set_contents(registry.buffer_array(array).set)[0].array_index,
            7
        );
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_slot_out_of_range_panics() {
        let backend = Arc::new(DummyBackend::new());
        let mut registry = ResourceRegistry::new(backend);
        let array = registry
            .create_buffer_descriptor_array(DescriptorType::ReadOnlyBuffer, 2)
            .unwrap();
        registry.write_buffer_descriptor(array, 2, None);
    }
}
