//! Fixed-function pipeline state, vertex input layouts and binding kinds.
//!
//! Everything here is `Eq + Hash` because it is part of pipeline cache keys.

use bitflags::bitflags;

use super::CompareFunction;

// ============================================================================
// Vertex input
// ============================================================================

/// How primitives are assembled from vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Format of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Uint,
    Uint2,
    Uint4,
    Unorm8x4,
    Snorm8x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::Float | Self::Uint | Self::Unorm8x4 | Self::Snorm8x4 => 4,
            Self::Float2 | Self::Uint2 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::Uint4 => 16,
        }
    }
}

/// How an input buffer advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputRate {
    /// Once per vertex.
    #[default]
    PerVertex,
    /// Once per instance.
    PerInstance,
}

/// One attribute read from an input buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputElement {
    /// Shader input semantic, e.g. `POSITION`.
    pub semantic_name: String,
    /// Semantic index, e.g. 1 for `TEXCOORD1`.
    pub semantic_index: u32,
    /// Attribute format.
    pub format: VertexFormat,
    /// Byte offset within one element of the buffer.
    pub byte_offset: u32,
}

impl InputElement {
    /// Create an input element.
    pub fn new(
        semantic_name: impl Into<String>,
        semantic_index: u32,
        format: VertexFormat,
        byte_offset: u32,
    ) -> Self {
        Self {
            semantic_name: semantic_name.into(),
            semantic_index,
            format,
            byte_offset,
        }
    }
}

/// Layout of one bound input buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputBufferLayout {
    /// Input slot this buffer is bound to.
    pub buffer_index: u32,
    /// Bytes between consecutive elements.
    pub stride: u32,
    /// How the buffer advances.
    pub input_rate: InputRate,
    /// Attributes read from this buffer.
    pub elements: Vec<InputElement>,
}

impl InputBufferLayout {
    /// Create a per-vertex layout with no elements.
    pub fn new(buffer_index: u32, stride: u32) -> Self {
        Self {
            buffer_index,
            stride,
            input_rate: InputRate::PerVertex,
            elements: Vec::new(),
        }
    }

    /// Add an element.
    pub fn with_element(mut self, element: InputElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Advance per instance instead of per vertex.
    pub fn per_instance(mut self) -> Self {
        self.input_rate = InputRate::PerInstance;
        self
    }
}

// ============================================================================
// Rasterizer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterizerState {
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
    pub fill_mode: FillMode,
    /// Constant depth bias in depth-buffer units.
    pub depth_bias: i32,
}

// ============================================================================
// Depth-stencil
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

/// Stencil behavior for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StencilState {
    pub compare: CompareFunction,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
}

/// Depth and stencil test state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    /// `None` disables the stencil test.
    pub stencil: Option<StencilState>,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self::disabled()
    }
}

impl DepthStencilState {
    /// No depth or stencil test.
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_compare: CompareFunction::Always,
            stencil: None,
        }
    }

    /// Standard less-equal depth test with writes.
    pub fn depth_read_write() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareFunction::LessEqual,
            stencil: None,
        }
    }
}

// ============================================================================
// Blending
// ============================================================================

/// Blend factor for blending operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    #[default]
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Blend operation for combining colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags! {
    /// Color channels written by a render target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

/// Blending of one color render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetBlend {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: ColorWriteMask,
}

impl Default for RenderTargetBlend {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RenderTargetBlend {
    /// Blending off, all channels written.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: ColorWriteMask::ALL,
        }
    }

    /// Standard "src over dst" alpha blending.
    pub fn alpha_blending() -> Self {
        Self {
            enabled: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
            ..Self::disabled()
        }
    }
}

/// Blend state for every color render target of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BlendState {
    /// One entry per color target; missing entries mean [`RenderTargetBlend::disabled`].
    pub render_targets: Vec<RenderTargetBlend>,
}

impl BlendState {
    /// The same blending on `count` targets.
    pub fn uniform(blend: RenderTargetBlend, count: usize) -> Self {
        Self {
            render_targets: vec![blend; count],
        }
    }
}

/// Complete fixed-function state of a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PipelineState {
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
}

// ============================================================================
// Descriptors
// ============================================================================

bitflags! {
    /// Shader stages a descriptor set is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const COMPUTE = 1 << 2;
        const RAY_GENERATION = 1 << 3;
        const MISS = 1 << 4;
        const CLOSEST_HIT = 1 << 5;
        const ANY_HIT = 1 << 6;
        const INTERSECTION = 1 << 7;
        const ALL = (1 << 8) - 1;
    }
}

/// Kind of resource a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DescriptorType {
    ReadOnlyImage,
    ReadWriteImage,
    ReadOnlyBuffer,
    ReadWriteBuffer,
    ConstantBuffer,
    Sampler,
    AccelerationStructure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_input_layouts_compare_by_value() {
        let make = |stride| {
            InputBufferLayout::new(0, stride)
                .with_element(InputElement::new("POSITION", 0, VertexFormat::Float3, 0))
                .with_element(InputElement::new("TEXCOORD", 0, VertexFormat::Float2, 12))
        };
        assert_eq!(make(20), make(20));
        assert_eq!(hash_of(&make(20)), hash_of(&make(20)));
        assert_ne!(make(20), make(24));
    }

    #[test]
    fn test_blend_state_defaults() {
        let blend = RenderTargetBlend::default();
        assert!(!blend.enabled);
        assert_eq!(blend.write_mask, ColorWriteMask::ALL);
        assert_eq!(BlendState::uniform(blend, 3).render_targets.len(), 3);
        assert!(RenderTargetBlend::alpha_blending().enabled);
    }
}
