//! Swap chains and their back buffers.

use super::{ResourceRegistry, SwapChainId};
use crate::backend::{ImageHandle, SwapChainDescriptor, SwapChainHandle};
use crate::error::GraphicsError;
use crate::types::{Extent2d, ImageAccess, TextureFormat};

#[derive(Debug)]
pub(crate) struct SwapChainEntry {
    pub(crate) handle: SwapChainHandle,
    pub(crate) descriptor: SwapChainDescriptor,
    pub(crate) images: Vec<ImageHandle>,
    pub(crate) image_access: Vec<ImageAccess>,
    /// Back buffer acquired for the frame being recorded, if any.
    pub(crate) acquired: Option<u32>,
    pub(crate) released: bool,
}

impl ResourceRegistry {
    /// Create a swap chain. Back buffers start undefined and nothing is acquired.
    pub fn create_swap_chain(
        &mut self,
        descriptor: &SwapChainDescriptor,
    ) -> Result<SwapChainId, GraphicsError> {
        let handle = self.backend().create_swap_chain(descriptor)?;
        let images = self.backend().swap_chain_images(handle);
        log::debug!(
            "Created swap chain {}x{} with {} back buffer(s)",
            descriptor.size.width,
            descriptor.size.height,
            images.len()
        );
        Ok(self.swap_chains.insert(SwapChainEntry {
            handle,
            descriptor: *descriptor,
            image_access: vec![ImageAccess::Undefined; images.len()],
            images,
            acquired: None,
            released: false,
        }))
    }

    /// Release a swap chain once the next batch completes.
    pub fn release_swap_chain(&mut self, id: SwapChainId) {
        self.live_swap_chain(id);
        self.swap_chains[id].released = true;
    }

    /// Size of the back buffers.
    pub fn swap_chain_size(&self, id: SwapChainId) -> Extent2d {
        self.live_swap_chain(id).descriptor.size
    }

    pub fn swap_chain_format(&self, id: SwapChainId) -> TextureFormat {
        self.live_swap_chain(id).descriptor.format
    }

    pub fn swap_chain_handle(&self, id: SwapChainId) -> SwapChainHandle {
        self.live_swap_chain(id).handle
    }

    /// Index of the acquired back buffer, if one was acquired since the last present.
    pub fn acquired_image(&self, id: SwapChainId) -> Option<u32> {
        self.live_swap_chain(id).acquired
    }

    /// Acquire the next back buffer, or return the one already acquired.
    pub fn acquire_next_image(&mut self, id: SwapChainId) -> Result<u32, GraphicsError> {
        if let Some(index) = self.swap_chain_entry(id).acquired {
            return Ok(index);
        }
        let handle = self.swap_chain_entry(id).handle;
        let index = self.backend().acquire_next_image(handle)?;
        log::trace!("Acquired back buffer {index} of {id:?}");
        self.swap_chain_entry_mut(id).acquired = Some(index);
        Ok(index)
    }

    /// Recreate the back buffers at a new size.
    ///
    /// The GPU must not be using the old back buffers.
    pub(crate) fn resize_swap_chain(
        &mut self,
        id: SwapChainId,
        size: Extent2d,
    ) -> Result<(), GraphicsError> {
        let handle = self.live_swap_chain(id).handle;
        self.backend().resize_swap_chain(handle, size)?;
        let images = self.backend().swap_chain_images(handle);
        let entry = self.swap_chain_entry_mut(id);
        entry.descriptor.size = size;
        entry.image_access = vec![ImageAccess::Undefined; images.len()];
        entry.images = images;
        entry.acquired = None;
        log::debug!("Resized {id:?} to {}x{}", size.width, size.height);
        Ok(())
    }

    pub(crate) fn live_swap_chain(&self, id: SwapChainId) -> &SwapChainEntry {
        match self.swap_chains.get(id) {
            Some(entry) if !entry.released => entry,
            Some(_) => panic!("contract violation: {id:?} used after release"),
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn swap_chain_entry(&self, id: SwapChainId) -> &SwapChainEntry {
        match self.swap_chains.get(id) {
            Some(entry) => entry,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }

    pub(crate) fn swap_chain_entry_mut(&mut self, id: SwapChainId) -> &mut SwapChainEntry {
        match self.swap_chains.get_mut(id) {
            Some(entry) => entry,
            None => panic!("contract violation: {id:?} does not exist"),
        }
    }
}
