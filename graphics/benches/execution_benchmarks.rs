use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tessera_graphics::cache::{GraphicsPipelineKey, PipelineResourcesKey};
use tessera_graphics::types::{
    InputBufferLayout, InputElement, PipelineState, PrimitiveTopology, VertexFormat,
};
use tessera_graphics::{
    BufferAccess, BufferDescriptor, BufferId, BufferUsage, DummyBackend, ExecutionConfig,
    ExecutionContext, PipelineCache, QueueIndex, Shader, ShaderStage, TextureFormat,
    TransitionBuffer,
};

fn create_buffers(context: &mut ExecutionContext, count: usize) -> Vec<BufferId> {
    (0..count)
        .map(|_| {
            context
                .registry_mut()
                .create_buffer(&BufferDescriptor::new(
                    4096,
                    BufferUsage::COPY_SRC
                        | BufferUsage::COPY_DST
                        | BufferUsage::SHADER_READ
                        | BufferUsage::SHADER_READ_WRITE,
                ))
                .unwrap()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Transition tracking
// ---------------------------------------------------------------------------

fn bench_transition_collection(c: &mut Criterion) {
    let backend = Arc::new(DummyBackend::new());
    let mut context = ExecutionContext::new(backend, ExecutionConfig::new()).unwrap();
    let buffers = create_buffers(&mut context, 64);
    let mut transitions = TransitionBuffer::new();
    let mut flip = false;

    c.bench_function("transition_collect_64_buffers", |b| {
        b.iter(|| {
            flip = !flip;
            let access = if flip {
                BufferAccess::COPY_DESTINATION
            } else {
                BufferAccess::SHADER_READ
            };
            for &buffer in &buffers {
                transitions.stage_buffer(buffer, access);
            }
            transitions.prepare(context.registry());
            let barriers = transitions.collect_transitions(context.registry_mut());
            black_box(barriers.len());
        });
    });
}

fn bench_transition_redundant(c: &mut Criterion) {
    let backend = Arc::new(DummyBackend::new());
    let mut context = ExecutionContext::new(backend, ExecutionConfig::new()).unwrap();
    let buffers = create_buffers(&mut context, 64);
    let mut transitions = TransitionBuffer::new();

    c.bench_function("transition_collect_64_redundant", |b| {
        b.iter(|| {
            for &buffer in &buffers {
                transitions.stage_buffer(buffer, BufferAccess::SHADER_READ);
            }
            transitions.prepare(context.registry());
            let barriers = transitions.collect_transitions(context.registry_mut());
            black_box(barriers.is_empty());
        });
    });
}

// ---------------------------------------------------------------------------
// Pipeline cache
// ---------------------------------------------------------------------------

fn bench_cache_hit(c: &mut Criterion) {
    let backend = Arc::new(DummyBackend::new());
    let mut cache = PipelineCache::new(backend);
    let resources = cache
        .get_pipeline_resources(&PipelineResourcesKey::new(Vec::new()))
        .unwrap();
    let key = GraphicsPipelineKey {
        resources,
        vertex_shader: Shader::from_binary(ShaderStage::Vertex, "vs_main", vec![0u8; 64]),
        pixel_shader: Shader::from_binary(ShaderStage::Pixel, "ps_main", vec![1u8; 64]),
        input_buffers: vec![
            InputBufferLayout::new(0, 32)
                .with_element(InputElement::new("POSITION", 0, VertexFormat::Float3, 0))
                .with_element(InputElement::new("NORMAL", 0, VertexFormat::Float3, 12))
                .with_element(InputElement::new("TEXCOORD", 0, VertexFormat::Float2, 24)),
        ],
        color_formats: vec![TextureFormat::Rgba16Float, TextureFormat::Rgba8Unorm],
        depth_stencil_format: Some(TextureFormat::Depth32Float),
        state: PipelineState::default(),
        topology: PrimitiveTopology::TriangleList,
    };
    cache.get_graphics_pipeline_state(&key).unwrap();

    c.bench_function("pipeline_cache_graphics_hit", |b| {
        b.iter(|| black_box(cache.get_graphics_pipeline_state(black_box(&key)).unwrap()));
    });
}

// ---------------------------------------------------------------------------
// Batch replay
// ---------------------------------------------------------------------------

fn bench_batch_replay(c: &mut Criterion) {
    let backend = Arc::new(DummyBackend::new());
    let mut context = ExecutionContext::new(backend, ExecutionConfig::new()).unwrap();
    let buffers = create_buffers(&mut context, 16);

    c.bench_function("batch_replay_16_copies_3_queues", |b| {
        b.iter(|| {
            for (i, pair) in buffers.chunks(2).enumerate() {
                let queue = QueueIndex((i % 3) as u32);
                context.queue(queue).copy_buffer(pair[0], 0, pair[1], 0, 4096);
                context.queue(QueueIndex(0)).copy_buffer(pair[1], 0, pair[0], 0, 4096);
            }
            black_box(context.execute_batch().unwrap());
        });
    });
}

criterion_group!(transitions, bench_transition_collection, bench_transition_redundant);
criterion_group!(cache, bench_cache_hit);
criterion_group!(replay, bench_batch_replay);
criterion_main!(transitions, cache, replay);
