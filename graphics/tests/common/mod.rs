//! Common utilities for execution integration tests.
//!
//! Every test drives an [`ExecutionContext`] over a [`DummyBackend`] and
//! inspects what the simulated device executed.

#![allow(dead_code)]

use std::sync::Arc;

use tessera_graphics::backend::{DummyCommand, ExecutedSubmission};
use tessera_graphics::types::{InputBufferLayout, InputElement, VertexFormat};
use tessera_graphics::{
    BufferDescriptor, BufferId, BufferUsage, DrawInstanced, DummyBackend, ExecutionConfig,
    ExecutionContext, Extent2d, GpuBackend, ImageDescriptor, ImageId, ImageUsage, QueueIndex,
    Shader, ShaderStage, SwapChainDescriptor, SwapChainId, TextureFormat,
};

pub const GRAPHICS: QueueIndex = QueueIndex(0);
pub const COMPUTE: QueueIndex = QueueIndex(1);
pub const COPY: QueueIndex = QueueIndex(2);

/// Initialize logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test Context
// ============================================================================

/// An execution context with direct access to its simulated device.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub context: ExecutionContext,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(ExecutionConfig::new().with_label("test"))
    }

    pub fn with_config(config: ExecutionConfig) -> Self {
        init_logging();
        let backend = Arc::new(DummyBackend::new());
        let context = ExecutionContext::new(backend.clone(), config)
            .expect("Failed to create execution context");
        Self { backend, context }
    }

    /// Create a device-local buffer.
    pub fn buffer(&mut self, size: u64, usage: BufferUsage) -> BufferId {
        self.context
            .registry_mut()
            .create_buffer(&BufferDescriptor::new(size, usage))
            .expect("Failed to create buffer")
    }

    /// Create a host-visible buffer holding `data`.
    pub fn upload(&mut self, data: &[u8]) -> BufferId {
        let id = self
            .context
            .registry_mut()
            .create_buffer(&BufferDescriptor::upload(
                data.len() as u64,
                BufferUsage::COPY_SRC,
            ))
            .expect("Failed to create upload buffer");
        let handle = self.context.registry().buffer_handle(id);
        self.backend
            .write_buffer(handle, 0, data)
            .expect("Failed to write upload buffer");
        id
    }

    pub fn readback(&mut self, size: u64) -> BufferId {
        self.context
            .registry_mut()
            .create_buffer(&BufferDescriptor::readback(size))
            .expect("Failed to create readback buffer")
    }

    /// Current bytes of a registry buffer.
    pub fn read(&self, buffer: BufferId) -> Vec<u8> {
        self.backend
            .buffer_contents(self.context.registry().buffer_handle(buffer))
    }

    pub fn render_target(&mut self, width: u32, height: u32) -> ImageId {
        self.context
            .registry_mut()
            .create_image(&ImageDescriptor::new_2d(
                width,
                height,
                TextureFormat::Rgba8Unorm,
                ImageUsage::COLOR_RENDER_TARGET | ImageUsage::SHADER_READ,
            ))
            .expect("Failed to create render target")
    }

    pub fn swap_chain(&mut self, width: u32, height: u32) -> SwapChainId {
        self.context
            .registry_mut()
            .create_swap_chain(&SwapChainDescriptor {
                size: Extent2d::new(width, height),
                format: TextureFormat::Bgra8Unorm,
                image_count: 2,
            })
            .expect("Failed to create swap chain")
    }

    /// Every submission the device has executed so far.
    pub fn log(&self) -> Vec<ExecutedSubmission> {
        self.backend.execution_log()
    }

    /// Executed commands of one queue, in order.
    pub fn commands_on(&self, queue: QueueIndex) -> Vec<DummyCommand> {
        self.log()
            .into_iter()
            .filter(|submission| submission.queue == queue)
            .flat_map(|submission| submission.commands)
            .collect()
    }
}

// ============================================================================
// Shaders and Draws
// ============================================================================

pub fn vertex_shader() -> Shader {
    Shader::from_binary(ShaderStage::Vertex, "vs_main", vec![0x03, 0x02, 0x23, 0x07])
}

pub fn pixel_shader() -> Shader {
    Shader::from_binary(ShaderStage::Pixel, "ps_main", vec![0x03, 0x02, 0x23, 0x07])
}

pub fn compute_shader() -> Shader {
    Shader::from_binary(ShaderStage::Compute, "cs_main", vec![0x03, 0x02, 0x23, 0x07])
}

/// Position-only vertex layout with the given stride.
pub fn position_layout(stride: u32) -> InputBufferLayout {
    InputBufferLayout::new(0, stride).with_element(InputElement::new(
        "POSITION",
        0,
        VertexFormat::Float3,
        0,
    ))
}

/// A triangle reading `vertices` with a position-only layout.
pub fn triangle(vertices: BufferId, stride: u32) -> DrawInstanced {
    DrawInstanced::new(vertex_shader(), pixel_shader())
        .with_vertex_count(3)
        .with_vertex_buffer(vertices, 0, position_layout(stride))
}

/// Generate a deterministic byte pattern.
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 + 13) as u8).collect()
}
