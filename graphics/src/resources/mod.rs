//! Logical GPU resources.
//!
//! The [`ResourceRegistry`] owns every long-lived resource the engine knows
//! about and hands out generational ids for them:
//! - [`ImageId`] - 2D or 3D image with per-mip access tracking
//! - [`BufferId`] - buffer with a single tracked access state
//! - [`SwapChainId`] - presentable swap chain with per-back-buffer access
//! - [`AccelerationStructureId`] - bottom- or top-level acceleration structure
//! - [`ImageDescriptorArrayId`] / [`BufferDescriptorArrayId`] - bindless tables
//!
//! Ids are decoupled from backend objects. Releasing an id only marks it; the
//! backend objects behind it are destroyed once the next submitted batch has
//! completed on the GPU.

mod descriptor_array;
mod registry;
mod swap_chain;

pub use descriptor_array::{BufferSlot, ImageSlot};
pub use registry::ResourceRegistry;

slotmap::new_key_type! {
    /// Logical image.
    pub struct ImageId;
    /// Logical buffer.
    pub struct BufferId;
    /// Logical swap chain.
    pub struct SwapChainId;
    /// Logical acceleration structure, backed by a [`BufferId`].
    pub struct AccelerationStructureId;
    /// Bindless array of image descriptors.
    pub struct ImageDescriptorArrayId;
    /// Bindless array of buffer descriptors.
    pub struct BufferDescriptorArrayId;
}

static_assertions::assert_impl_all!(ImageId: Send, Sync, Copy);
static_assertions::assert_impl_all!(BufferId: Send, Sync, Copy);
static_assertions::assert_impl_all!(SwapChainId: Send, Sync, Copy);
