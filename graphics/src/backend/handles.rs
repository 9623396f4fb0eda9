//! Opaque handles to backend objects.
//!
//! Handles are plain `Copy` ids minted by a [`GpuBackend`](super::GpuBackend).
//! The engine never looks inside them; ownership is expressed separately through
//! [`BackendObject`], which is what deferred disposal hands back to the backend.

macro_rules! backend_handles {
    ($($(#[$meta:meta])* $name:ident => $variant:ident,)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u64);

            impl $name {
                /// Create a handle from a backend-specific raw id.
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// The backend-specific raw id.
                pub const fn raw(&self) -> u64 {
                    self.0
                }
            }

            impl From<$name> for BackendObject {
                fn from(handle: $name) -> Self {
                    Self::$variant(handle)
                }
            }
        )*

        /// An owned backend object awaiting destruction.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum BackendObject {
            $($variant($name),)*
        }

        impl BackendObject {
            /// Raw id of the wrapped handle.
            pub fn raw(&self) -> u64 {
                match self {
                    $(Self::$variant(handle) => handle.raw(),)*
                }
            }

            /// Human-readable kind, for logs.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)*
                }
            }
        }
    };
}

backend_handles! {
    /// GPU buffer.
    BufferHandle => Buffer,
    /// GPU image (2D or 3D).
    ImageHandle => Image,
    /// View over a mip range of an image.
    ImageViewHandle => ImageView,
    /// Texture sampler.
    SamplerHandle => Sampler,
    /// Set of render-target views bound together by a pass.
    FrameBufferHandle => FrameBuffer,
    /// Layout of one descriptor set.
    DescriptorSetLayoutHandle => DescriptorSetLayout,
    /// Descriptor set (or descriptor heap range).
    DescriptorSetHandle => DescriptorSet,
    /// Pipeline layout / root signature.
    PipelineResourcesHandle => PipelineResources,
    /// Graphics, compute or ray tracing pipeline state.
    PipelineStateHandle => PipelineState,
    /// CPU-waitable fence.
    FenceHandle => Fence,
    /// Monotonic GPU counter used for cross-queue waits.
    TimelineSemaphoreHandle => TimelineSemaphore,
    /// Presentable swap chain.
    SwapChainHandle => SwapChain,
    /// Heap of timestamp queries.
    TimestampQueryHeapHandle => TimestampQueryHeap,
    /// Bottom- or top-level acceleration structure.
    AccelerationStructureHandle => AccelerationStructure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_round_trip_into_object() {
        let buffer = BufferHandle::from_raw(7);
        let object: BackendObject = buffer.into();
        assert_eq!(object, BackendObject::Buffer(buffer));
        assert_eq!(object.raw(), 7);
        assert_eq!(object.kind(), "Buffer");
    }
}
