//! Structural cache keys.
//!
//! Every key compares and hashes by value, including all nested vectors, so
//! two keys built independently from equal parameters always hit the same
//! cache entry.

use crate::backend::{DescriptorRangeBinding, PipelineResourcesHandle, SpaceLayout};
use crate::shader::Shader;
use crate::types::{
    InputBufferLayout, PipelineState, PrimitiveTopology, ShaderStages, TextureFormat,
};

/// Key of a descriptor set layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutKey {
    /// Ranges sorted by register.
    pub ranges: Vec<DescriptorRangeBinding>,
    pub visibility: ShaderStages,
}

impl DescriptorSetLayoutKey {
    /// Build a key, sorting `ranges` by register.
    pub fn new(mut ranges: Vec<DescriptorRangeBinding>, visibility: ShaderStages) -> Self {
        ranges.sort();
        Self { ranges, visibility }
    }
}

/// Key of a pipeline resource layout (root signature / pipeline layout).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineResourcesKey {
    /// Set layouts sorted by space.
    pub sets: Vec<SpaceLayout>,
}

impl PipelineResourcesKey {
    pub fn new(mut sets: Vec<SpaceLayout>) -> Self {
        sets.sort_by_key(|set| set.space);
        Self { sets }
    }
}

/// Key of a graphics pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineKey {
    pub resources: PipelineResourcesHandle,
    pub vertex_shader: Shader,
    pub pixel_shader: Shader,
    pub input_buffers: Vec<InputBufferLayout>,
    pub color_formats: Vec<TextureFormat>,
    pub depth_stencil_format: Option<TextureFormat>,
    pub state: PipelineState,
    pub topology: PrimitiveTopology,
}

/// Key of a compute pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    pub resources: PipelineResourcesHandle,
    pub shader: Shader,
}

/// Shaders of one ray tracing hit group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HitGroupKey {
    pub closest_hit: Option<Shader>,
    pub any_hit: Option<Shader>,
}

/// Key of a ray tracing pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RaytracingPipelineKey {
    pub resources: PipelineResourcesHandle,
    pub ray_generation: Shader,
    pub miss: Vec<Shader>,
    pub hit_groups: Vec<HitGroupKey>,
    pub max_recursion_depth: u32,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
}

impl RaytracingPipelineKey {
    /// Number of shader groups: ray generation, then miss shaders, then hit groups.
    pub fn group_count(&self) -> u32 {
        1 + self.miss.len() as u32 + self.hit_groups.len() as u32
    }
}
