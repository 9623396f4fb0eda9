//! Backend-agnostic queue commands.
//!
//! Commands are recorded into per-queue streams through a [`QueueRecorder`]
//! and replayed by the execution engine when the batch is executed. Every
//! command carries the resource ids it touches, which is what the engine uses
//! to stage transitions and to compute cross-queue dependencies.
//!
//! # Module Contents
//!
//! - [`QueueCommand`] - the tagged command variant
//! - [`DrawInstanced`], [`DispatchCompute`], [`TraceRays`] - payloads of the
//!   pipeline-bound commands, built with `with_*` setters
//! - [`ResourceBindings`] - descriptor sets of a pipeline-bound command
//! - [`QueueRecorder`] - appends commands to one queue's stream

mod bindings;
mod recorder;

pub use bindings::{Binding, BoundResource, DescriptorSetBinding, ResourceBindings};
pub use recorder::QueueRecorder;
pub(crate) use recorder::{QueueRecording, TimestampMarker};

use crate::resources::{AccelerationStructureId, BufferId, ImageId, SwapChainId};
use crate::shader::Shader;
use crate::types::{
    ClearValue, Extent2d, IndexFormat, InputBufferLayout, PipelineState, PrimitiveTopology,
    ScissorRect, VertexFormat, Viewport,
};

// ============================================================================
// Pass targets
// ============================================================================

/// Image a pass renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// One mip of a registry image.
    Image { image: ImageId, mip: u32 },
    /// The back buffer of a swap chain acquired for this batch.
    SwapChain(SwapChainId),
}

/// A color target with its load operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTarget {
    pub target: RenderTarget,
    pub clear: ClearValue,
}

impl ColorTarget {
    /// Keep the previous contents of `target`.
    pub fn load(target: RenderTarget) -> Self {
        Self {
            target,
            clear: ClearValue::Load,
        }
    }

    /// Clear `target` to a color.
    pub fn clear(target: RenderTarget, r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            target,
            clear: ClearValue::color(r, g, b, a),
        }
    }
}

/// The depth-stencil target of a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilTarget {
    pub image: ImageId,
    pub mip: u32,
    pub clear: ClearValue,
    /// Bind read-only so the image can also be sampled in the pass.
    pub read_only: bool,
}

// ============================================================================
// Draw inputs
// ============================================================================

/// A vertex buffer bound at the input slot of its layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexInput {
    pub buffer: BufferId,
    pub offset: u64,
    pub layout: InputBufferLayout,
}

/// An index buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexInput {
    pub buffer: BufferId,
    pub offset: u64,
    pub format: IndexFormat,
}

/// An instanced draw inside a pass.
///
/// Draws with an index buffer use `first`/`count` as an index range and
/// `base_vertex` as the vertex offset; draws without one use them as a vertex
/// range.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawInstanced {
    pub vertex_shader: Shader,
    pub pixel_shader: Shader,
    pub state: PipelineState,
    pub topology: PrimitiveTopology,
    pub vertex_buffers: Vec<VertexInput>,
    pub index_buffer: Option<IndexInput>,
    pub bindings: ResourceBindings,
    pub first: u32,
    pub count: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
    pub instance_count: u32,
    /// Defaults to the whole pass.
    pub viewport: Option<Viewport>,
    /// Defaults to the whole pass.
    pub scissor: Option<ScissorRect>,
}

impl DrawInstanced {
    /// A single-instance triangle list draw of zero vertices.
    pub fn new(vertex_shader: Shader, pixel_shader: Shader) -> Self {
        Self {
            vertex_shader,
            pixel_shader,
            state: PipelineState::default(),
            topology: PrimitiveTopology::TriangleList,
            vertex_buffers: Vec::new(),
            index_buffer: None,
            bindings: ResourceBindings::new(),
            first: 0,
            count: 0,
            base_vertex: 0,
            first_instance: 0,
            instance_count: 1,
            viewport: None,
            scissor: None,
        }
    }

    pub fn with_vertex_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Draw `count` elements starting at `first`.
    pub fn with_range(mut self, first: u32, count: u32) -> Self {
        self.first = first;
        self.count = count;
        self
    }

    pub fn with_instances(mut self, first_instance: u32, instance_count: u32) -> Self {
        self.first_instance = first_instance;
        self.instance_count = instance_count;
        self
    }

    pub fn with_state(mut self, state: PipelineState) -> Self {
        self.state = state;
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_vertex_buffer(
        mut self,
        buffer: BufferId,
        offset: u64,
        layout: InputBufferLayout,
    ) -> Self {
        self.vertex_buffers.push(VertexInput {
            buffer,
            offset,
            layout,
        });
        self
    }

    pub fn with_index_buffer(mut self, buffer: BufferId, offset: u64, format: IndexFormat) -> Self {
        self.index_buffer = Some(IndexInput {
            buffer,
            offset,
            format,
        });
        self
    }

    pub fn with_base_vertex(mut self, base_vertex: i32) -> Self {
        self.base_vertex = base_vertex;
        self
    }

    pub fn with_bindings(mut self, bindings: ResourceBindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn with_scissor(mut self, scissor: ScissorRect) -> Self {
        self.scissor = Some(scissor);
        self
    }
}

/// A compute dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCompute {
    pub shader: Shader,
    pub bindings: ResourceBindings,
    /// Thread group counts.
    pub groups: [u32; 3],
}

impl DispatchCompute {
    pub fn new(shader: Shader, x: u32, y: u32, z: u32) -> Self {
        Self {
            shader,
            bindings: ResourceBindings::new(),
            groups: [x, y, z],
        }
    }

    pub fn with_bindings(mut self, bindings: ResourceBindings) -> Self {
        self.bindings = bindings;
        self
    }
}

// ============================================================================
// Ray tracing
// ============================================================================

/// Triangle geometry of a bottom-level build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasGeometryDesc {
    pub vertex_buffer: BufferId,
    pub vertex_offset: u64,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub vertex_format: VertexFormat,
    pub index_buffer: Option<IndexInput>,
    pub index_count: u32,
    pub opaque: bool,
}

/// One instance of a top-level build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TlasInstance {
    pub blas: AccelerationStructureId,
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    pub id: u32,
    pub mask: u8,
    pub hit_group_offset: u32,
    pub flags: u8,
}

impl TlasInstance {
    pub const IDENTITY: [f32; 12] = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    /// An untransformed, fully visible instance of `blas`.
    pub fn new(blas: AccelerationStructureId, id: u32) -> Self {
        Self {
            blas,
            transform: Self::IDENTITY,
            id,
            mask: 0xff,
            hit_group_offset: 0,
            flags: 0,
        }
    }
}

/// Shaders of one hit group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HitGroup {
    pub closest_hit: Option<Shader>,
    pub any_hit: Option<Shader>,
}

/// A ray tracing dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRays {
    pub ray_generation: Shader,
    pub miss: Vec<Shader>,
    pub hit_groups: Vec<HitGroup>,
    pub max_recursion_depth: u32,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub bindings: ResourceBindings,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl TraceRays {
    pub fn new(ray_generation: Shader, width: u32, height: u32) -> Self {
        Self {
            ray_generation,
            miss: Vec::new(),
            hit_groups: Vec::new(),
            max_recursion_depth: 1,
            max_payload_size: 16,
            max_attribute_size: 8,
            bindings: ResourceBindings::new(),
            width,
            height,
            depth: 1,
        }
    }

    pub fn with_miss(mut self, shader: Shader) -> Self {
        self.miss.push(shader);
        self
    }

    pub fn with_hit_group(mut self, closest_hit: Option<Shader>, any_hit: Option<Shader>) -> Self {
        self.hit_groups.push(HitGroup {
            closest_hit,
            any_hit,
        });
        self
    }

    pub fn with_bindings(mut self, bindings: ResourceBindings) -> Self {
        self.bindings = bindings;
        self
    }
}

// ============================================================================
// Commands
// ============================================================================

/// One command of a queue's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueCommand {
    CopyBuffer {
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    },
    /// Copy tightly packed rows into a whole image mip.
    CopyBufferToImage {
        source: BufferId,
        source_offset: u64,
        row_pitch: u32,
        destination: ImageId,
        mip: u32,
    },
    BuildBlas {
        target: AccelerationStructureId,
        geometry: Vec<BlasGeometryDesc>,
    },
    BuildTlas {
        target: AccelerationStructureId,
        instances: Vec<TlasInstance>,
    },
    BeginPass {
        size: Extent2d,
        color: Vec<ColorTarget>,
        depth_stencil: Option<DepthStencilTarget>,
    },
    DrawInstanced(Box<DrawInstanced>),
    DispatchCompute(Box<DispatchCompute>),
    TraceRays(Box<TraceRays>),
    EndPass,
    Present { swap_chain: SwapChainId },
}

impl QueueCommand {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CopyBuffer { .. } => "copy_buffer",
            Self::CopyBufferToImage { .. } => "copy_buffer_to_image",
            Self::BuildBlas { .. } => "build_blas",
            Self::BuildTlas { .. } => "build_tlas",
            Self::BeginPass { .. } => "begin_pass",
            Self::DrawInstanced(_) => "draw_instanced",
            Self::DispatchCompute(_) => "dispatch_compute",
            Self::TraceRays(_) => "trace_rays",
            Self::EndPass => "end_pass",
            Self::Present { .. } => "present",
        }
    }
}

/// A command with its batch-global recording order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub sequence: u64,
    pub command: QueueCommand,
}
