//! # Tessera Graphics
//!
//! Frame execution engine that sits between a renderer and a GPU API.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GpuBackend`] / [`CommandList`] - the capability interface a DirectX 12,
//!   Vulkan or Metal backend implements
//! - [`ResourceRegistry`] - long-lived images, buffers, swap chains,
//!   acceleration structures and bindless descriptor arrays
//! - [`TransitionBuffer`] - access-state tracking that turns staged usage into
//!   minimal barriers
//! - [`PipelineCache`] - structural caching of layouts and pipeline states
//! - [`ExecutionContext`] - per-queue recording, cross-queue dependency
//!   analysis, batch replay and deferred destruction
//! - [`DummyBackend`] - a simulated device for tests (`dummy` feature)
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_graphics::{
//!     BufferDescriptor, BufferUsage, DummyBackend, ExecutionConfig, ExecutionContext, QueueIndex,
//! };
//!
//! let backend = Arc::new(DummyBackend::new());
//! let mut context = ExecutionContext::new(backend.clone(), ExecutionConfig::new()).unwrap();
//!
//! let staging = context
//!     .registry_mut()
//!     .create_buffer(&BufferDescriptor::upload(256, BufferUsage::COPY_SRC))
//!     .unwrap();
//! let vertices = context
//!     .registry_mut()
//!     .create_buffer(&BufferDescriptor::new(256, BufferUsage::COPY_DST | BufferUsage::VERTEX))
//!     .unwrap();
//!
//! // Upload on the copy queue; later consumers wait on it automatically.
//! context.queue(QueueIndex(2)).copy_buffer(staging, 0, vertices, 0, 256);
//! context.execute_batch().unwrap();
//! context.wait_idle().unwrap();
//! ```

pub mod backend;
pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod execution;
pub mod profiling;
pub mod resources;
pub mod shader;
pub mod transition;
pub mod types;

// Re-export main types for convenience
#[cfg(feature = "dummy")]
pub use backend::DummyBackend;
pub use backend::{BackendObject, CommandList, GpuBackend, SwapChainDescriptor, SwapChainStatus};
pub use cache::PipelineCache;
pub use command::{
    BoundResource, ColorTarget, DepthStencilTarget, DescriptorSetBinding, DispatchCompute,
    DrawInstanced, QueueCommand, QueueRecorder, RenderTarget, ResourceBindings, TlasInstance,
    TraceRays,
};
pub use config::ExecutionConfig;
pub use error::GraphicsError;
pub use execution::{
    BatchStatistics, BatchSubmission, ExecutionContext, ImmediateConstantView, PresentResult,
    QueueStatistics, TimestampSample,
};
pub use resources::{
    AccelerationStructureId, BufferDescriptorArrayId, BufferId, ImageDescriptorArrayId, ImageId,
    ResourceRegistry, SwapChainId,
};
pub use shader::{Shader, ShaderCompiler, ShaderStage};
pub use transition::TransitionBuffer;
pub use types::{
    BufferAccess, BufferDescriptor, BufferUsage, ClearValue, Extent2d, Extent3d, ImageAccess,
    ImageDescriptor, ImageUsage, MipRange, QueueIndex, QueueType, SamplerDescriptor,
    TextureFormat,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
        assert_eq!(backend.queue_types().len(), 3);
    }
}
