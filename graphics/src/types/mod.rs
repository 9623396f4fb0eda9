//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage and access flags, pipeline state
//! descriptions and descriptor structs used throughout the engine.

mod access;
mod buffer;
mod common;
mod pipeline;
mod sampler;
mod texture;

pub use access::{BufferAccess, ImageAccess};
pub use buffer::{BufferDescriptor, BufferUsage, IndexFormat};
pub use common::{
    ClearValue, Extent2d, Extent3d, MemoryType, QueueIndex, QueueType, ScissorRect, Viewport,
};
pub use pipeline::{
    BlendFactor, BlendOp, BlendState, ColorWriteMask, CullMode, DepthStencilState, DescriptorType,
    FillMode, FrontFace, InputBufferLayout, InputElement, InputRate, PipelineState,
    PrimitiveTopology, RasterizerState, RenderTargetBlend, ShaderStages, StencilOp, StencilState,
    VertexFormat,
};
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
pub use texture::{
    ImageDescriptor, ImageDimension, ImageTiling, ImageUsage, MipRange, TextureFormat,
};
