//! Execution integration tests for the graphics crate.
//!
//! Each test records work on one or more queues, executes the batch on the
//! dummy backend and checks what the simulated device ran.
//!
//! # Test Categories
//!
//! - **Cross-queue tests**: semaphore waits between producers and consumers
//! - **Pipeline cache tests**: pipeline creation and rebinding across draws
//! - **Immediate constant tests**: staged bytes reach the bound constant buffer
//! - **Lifetime tests**: released resources are destroyed once, after the GPU
//! - **Presentation tests**: present statuses and skipped presents
//! - **Descriptor array tests**: slot writes wait for readers in flight
//! - **Timestamp tests**: labelled GPU timings of retired batches
//! - **Contract tests**: misuse panics with a contract violation
//!
//! ```bash
//! cargo test --test execution_tests
//! ```

mod common;

use rstest::rstest;

use common::{
    COMPUTE, COPY, GRAPHICS, TestContext, compute_shader, generate_test_pattern, triangle,
};
use tessera_graphics::backend::{DescriptorResource, DummyCommand};
use tessera_graphics::resources::ImageSlot;
use tessera_graphics::types::DescriptorType;
use tessera_graphics::{
    BackendObject, BoundResource, BufferUsage, ColorTarget, DescriptorSetBinding, DispatchCompute,
    ExecutionConfig, Extent2d, GraphicsError, ImageDescriptor, ImageUsage, MipRange, QueueIndex,
    RenderTarget, ResourceBindings, SwapChainStatus, TextureFormat,
};

// ============================================================================
// Cross-Queue Tests
// ============================================================================

/// Upload on the copy queue, then copy the result out on `consumer`.
#[rstest]
#[case::graphics(GRAPHICS, 1)]
#[case::compute(COMPUTE, 1)]
#[case::same_queue(COPY, 0)]
fn test_consumer_waits_for_copy_queue(#[case] consumer: QueueIndex, #[case] expected_waits: usize) {
    let mut ctx = TestContext::new();
    let pattern = generate_test_pattern(256);
    let staging = ctx.upload(&pattern);
    let shared = ctx.buffer(256, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
    let readback = ctx.readback(256);

    ctx.context.queue(COPY).copy_buffer(staging, 0, shared, 0, 256);
    ctx.context.queue(consumer).copy_buffer(shared, 0, readback, 0, 256);
    let submission = ctx.context.execute_batch().unwrap();

    assert_eq!(submission.queue(consumer).waits, expected_waits);
    assert_eq!(submission.queue(COPY).waits, 0);
    assert_eq!(ctx.read(readback), pattern);

    if expected_waits > 0 {
        let log = ctx.log();
        let producer = log
            .iter()
            .find(|s| {
                s.queue == COPY
                    && s.commands.iter().any(|c| matches!(c, DummyCommand::CopyBuffer { .. }))
            })
            .unwrap();
        let waiting = log
            .iter()
            .find(|s| {
                s.queue == consumer
                    && s.commands.iter().any(|c| matches!(c, DummyCommand::CopyBuffer { .. }))
            })
            .unwrap();
        assert_eq!(waiting.waits.len(), 1);
        assert!(producer.signals.contains(&waiting.waits[0]));
        assert!(producer.sequence < waiting.sequence);
    }
}

#[test]
fn test_next_batch_waits_for_previous_producer() {
    let mut ctx = TestContext::new();
    let pattern = generate_test_pattern(64);
    let staging = ctx.upload(&pattern);
    let shared = ctx.buffer(64, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
    let readback = ctx.readback(64);

    ctx.context.queue(COPY).copy_buffer(staging, 0, shared, 0, 64);
    ctx.context.execute_batch().unwrap();

    ctx.context.queue(GRAPHICS).copy_buffer(shared, 0, readback, 0, 64);
    let second = ctx.context.execute_batch().unwrap();

    assert_eq!(second.queue(GRAPHICS).waits, 1);
    assert_eq!(ctx.read(readback), pattern);
}

#[test]
fn test_queue_replays_in_recorded_order() {
    let mut ctx = TestContext::new();
    let pattern = generate_test_pattern(64);
    let staging = ctx.upload(&pattern);
    let first = ctx.buffer(64, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
    let second = ctx.buffer(64, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
    let image = ctx
        .context
        .registry_mut()
        .create_image(&ImageDescriptor::new_2d(
            4,
            4,
            TextureFormat::Rgba8Unorm,
            ImageUsage::COPY_DST | ImageUsage::SHADER_READ,
        ))
        .unwrap();

    {
        let mut copy = ctx.context.queue(COPY);
        copy.copy_buffer(staging, 0, first, 0, 64);
        copy.copy_buffer(first, 0, second, 0, 64);
        copy.copy_buffer_to_image(second, 0, 16, image, 0);
    }
    ctx.context.execute_batch().unwrap();

    let registry = ctx.context.registry();
    let (staging, first, second, image) = (
        registry.buffer_handle(staging),
        registry.buffer_handle(first),
        registry.buffer_handle(second),
        registry.image_handle(image),
    );
    let copies: Vec<_> = ctx
        .commands_on(COPY)
        .into_iter()
        .filter_map(|c| match c {
            DummyCommand::CopyBuffer {
                source,
                destination,
                ..
            } => Some((source, Some(destination), None)),
            DummyCommand::CopyBufferToImage(copy) => Some((copy.buffer, None, Some(copy.image))),
            _ => None,
        })
        .collect();
    assert_eq!(
        copies,
        [
            (staging, Some(first), None),
            (first, Some(second), None),
            (second, None, Some(image)),
        ]
    );

    assert_eq!(ctx.backend.buffer_contents(second), pattern);
    assert_eq!(ctx.backend.image_contents(image, 0), pattern);
}

// ============================================================================
// Pipeline Cache Tests
// ============================================================================

#[rstest]
#[case::same_stride(12, 1)]
#[case::different_stride(16, 2)]
fn test_draws_share_cached_pipeline(#[case] second_stride: u32, #[case] expected_pipelines: u64) {
    let mut ctx = TestContext::new();
    let target = ctx.render_target(64, 64);
    let vertices = ctx.buffer(256, BufferUsage::VERTEX);

    {
        let mut graphics = ctx.context.queue(GRAPHICS);
        graphics.begin_pass(
            Extent2d::new(64, 64),
            vec![ColorTarget::clear(
                RenderTarget::Image {
                    image: target,
                    mip: 0,
                },
                0.0,
                0.0,
                0.0,
                1.0,
            )],
            None,
        );
        graphics.draw(triangle(vertices, 12));
        graphics.draw(triangle(vertices, second_stride));
        graphics.end_pass();
    }
    ctx.context.execute_batch().unwrap();

    assert_eq!(ctx.backend.statistics().graphics_pipelines_created, expected_pipelines);
    let lookups = ctx.context.cache().statistics().graphics_pipelines;
    assert_eq!(lookups.misses, expected_pipelines);
    assert_eq!(lookups.hits, 2 - expected_pipelines);
    let binds = ctx
        .commands_on(GRAPHICS)
        .iter()
        .filter(|c| matches!(c, DummyCommand::BindPipelineState { .. }))
        .count();
    assert_eq!(binds as u64, expected_pipelines);
}

#[test]
fn test_pipeline_cache_survives_batches_until_invalidated() {
    let mut ctx = TestContext::new();
    let target = ctx.render_target(32, 32);
    let vertices = ctx.buffer(256, BufferUsage::VERTEX);

    let record = |ctx: &mut TestContext| {
        let mut graphics = ctx.context.queue(GRAPHICS);
        graphics.begin_pass(
            Extent2d::new(32, 32),
            vec![ColorTarget::load(RenderTarget::Image { image: target, mip: 0 })],
            None,
        );
        graphics.draw(triangle(vertices, 12));
        graphics.end_pass();
    };

    record(&mut ctx);
    ctx.context.execute_batch().unwrap();
    record(&mut ctx);
    ctx.context.execute_batch().unwrap();
    assert_eq!(ctx.backend.statistics().graphics_pipelines_created, 1);

    ctx.context.invalidate_pipeline_cache();
    record(&mut ctx);
    ctx.context.execute_batch().unwrap();
    assert_eq!(ctx.backend.statistics().graphics_pipelines_created, 2);
}

#[test]
fn test_failed_pipeline_creation_abandons_only_that_batch() {
    let mut ctx = TestContext::new();
    let target = ctx.render_target(16, 16);
    let vertices = ctx.buffer(128, BufferUsage::VERTEX);

    let record = |ctx: &mut TestContext| {
        let mut graphics = ctx.context.queue(GRAPHICS);
        graphics.begin_pass(
            Extent2d::new(16, 16),
            vec![ColorTarget::load(RenderTarget::Image { image: target, mip: 0 })],
            None,
        );
        graphics.draw(triangle(vertices, 12));
        graphics.end_pass();
    };

    ctx.backend.fail_next_pipeline_creation("driver rejected the pipeline");
    record(&mut ctx);
    assert!(matches!(
        ctx.context.execute_batch(),
        Err(GraphicsError::PipelineCreationFailed(_))
    ));

    record(&mut ctx);
    ctx.context.execute_batch().unwrap();
    ctx.context.wait_idle().unwrap();
    assert_eq!(ctx.backend.statistics().graphics_pipelines_created, 1);
    assert_eq!(ctx.backend.pending_submissions(), 0);
}

// ============================================================================
// Immediate Constant Tests
// ============================================================================

#[test]
fn test_immediate_constants_reach_the_bound_buffer() {
    let mut ctx = TestContext::new();
    let constants: [f32; 4] = [1.0, 2.0, 3.0, 4.0];

    {
        let mut compute = ctx.context.queue(COMPUTE);
        let view = compute.write_immediate_constants(&constants);
        assert_eq!(view.offset() % 256, 0);
        compute.dispatch(
            DispatchCompute::new(compute_shader(), 8, 8, 1).with_bindings(
                ResourceBindings::new().with_set(
                    DescriptorSetBinding::new(0)
                        .with(0, BoundResource::ImmediateConstants(view)),
                ),
            ),
        );
    }
    ctx.context.execute_batch().unwrap();

    let sets: Vec<_> = ctx
        .commands_on(COMPUTE)
        .into_iter()
        .filter_map(|c| match c {
            DummyCommand::BindDescriptorSets { sets, .. } => Some(sets),
            _ => None,
        })
        .flatten()
        .collect();
    let (buffer, offset, size) = sets
        .iter()
        .flat_map(|set| ctx.backend.descriptor_set_contents(*set))
        .find_map(|write| match write.resource {
            DescriptorResource::ConstantBuffer {
                buffer,
                offset,
                size,
            } => Some((buffer, offset, size)),
            _ => None,
        })
        .expect("no constant buffer was bound");

    let contents = ctx.backend.buffer_contents(buffer);
    let bound = &contents[offset as usize..(offset + size) as usize];
    assert_eq!(bound, bytemuck::bytes_of(&constants));
}

#[test]
fn test_immediate_constants_on_two_queues_do_not_overlap() {
    let mut ctx = TestContext::new();
    let first = ctx.context.queue(GRAPHICS).write_immediate_constants(&[7u32; 4]);
    let second = ctx.context.queue(COMPUTE).write_immediate_constants(&[9u32; 4]);

    assert_eq!(first.batch(), second.batch());
    assert!(first.offset() + first.size() <= second.offset());
    ctx.context.execute_batch().unwrap();
}

#[test]
#[should_panic(expected = "immediate constant buffer exhausted")]
fn test_immediate_constants_overflow_panics() {
    let mut ctx = TestContext::with_config(
        ExecutionConfig::new().with_immediate_constant_buffer_size(512),
    );
    let mut graphics = ctx.context.queue(GRAPHICS);
    graphics.stage_immediate_constant_buffer(256);
    graphics.stage_immediate_constant_buffer(256);
    graphics.stage_immediate_constant_buffer(256);
}

#[test]
#[should_panic(expected = "immediate constants staged on queue#2 bound on queue#1")]
fn test_immediate_constants_bound_on_another_queue_panics() {
    let mut ctx = TestContext::new();
    let view = ctx.context.queue(COPY).write_immediate_constants(&[3u32; 4]);
    assert_eq!(view.queue(), COPY);

    ctx.context.queue(COMPUTE).dispatch(
        DispatchCompute::new(compute_shader(), 1, 1, 1).with_bindings(
            ResourceBindings::new().with_set(
                DescriptorSetBinding::new(0).with(0, BoundResource::ImmediateConstants(view)),
            ),
        ),
    );
}

// ============================================================================
// Lifetime Tests
// ============================================================================

#[test]
fn test_released_buffer_is_destroyed_after_its_batch() {
    let mut ctx = TestContext::new();
    let source = ctx.upload(&generate_test_pattern(64));
    let destination = ctx.buffer(64, BufferUsage::COPY_DST);
    let handle = ctx.context.registry().buffer_handle(destination);

    ctx.context.queue(COPY).copy_buffer(source, 0, destination, 0, 64);
    ctx.context.execute_batch().unwrap();

    ctx.context.registry_mut().release_buffer(destination);
    ctx.context.execute_batch().unwrap();
    assert!(ctx.backend.is_alive(BackendObject::from(handle)));

    ctx.context.wait_idle().unwrap();
    assert!(!ctx.backend.is_alive(BackendObject::from(handle)));
}

#[test]
fn test_dropping_the_context_destroys_each_object_once() {
    let backend = {
        let mut ctx = TestContext::new();
        let target = ctx.render_target(32, 32);
        let vertices = ctx.buffer(256, BufferUsage::VERTEX);
        {
            let mut graphics = ctx.context.queue(GRAPHICS);
            graphics.begin_pass(
                Extent2d::new(32, 32),
                vec![ColorTarget::load(RenderTarget::Image { image: target, mip: 0 })],
                None,
            );
            graphics.draw(triangle(vertices, 12));
            graphics.end_pass();
        }
        ctx.context.execute_batch().unwrap();
        ctx.context.registry_mut().release_image(target);
        ctx.context.execute_batch().unwrap();
        ctx.backend.clone()
    };
    // A second destroy of any object would have panicked in the backend.
    assert_eq!(backend.live_object_count(), 0);
}

// ============================================================================
// Presentation Tests
// ============================================================================

#[rstest]
#[case::ok(SwapChainStatus::Ok)]
#[case::suboptimal(SwapChainStatus::Suboptimal)]
#[case::out_of_date(SwapChainStatus::OutOfDate)]
fn test_present_reports_status(#[case] status: SwapChainStatus) {
    let mut ctx = TestContext::new();
    let window = ctx.swap_chain(320, 240);
    ctx.backend
        .script_present_status(ctx.context.registry().swap_chain_handle(window), status);

    {
        let mut graphics = ctx.context.queue(GRAPHICS);
        graphics.begin_pass(
            Extent2d::new(320, 240),
            vec![ColorTarget::clear(RenderTarget::SwapChain(window), 0.1, 0.2, 0.3, 1.0)],
            None,
        );
        graphics.end_pass();
        graphics.present(window);
    }
    let submission = ctx.context.execute_batch().unwrap();

    assert_eq!(submission.presents.len(), 1);
    assert_eq!(submission.presents[0].swap_chain, window);
    assert_eq!(submission.presents[0].status, status);
    assert_eq!(ctx.context.registry().acquired_image(window), None);
    assert_eq!(ctx.backend.statistics().presents, 1);
}

#[test]
fn test_present_without_rendering_is_skipped() {
    let mut ctx = TestContext::new();
    let window = ctx.swap_chain(320, 240);

    ctx.context.queue(GRAPHICS).present(window);
    let submission = ctx.context.execute_batch().unwrap();

    assert!(submission.presents.is_empty());
    assert_eq!(submission.queue(GRAPHICS).presents, 0);
    assert_eq!(ctx.backend.statistics().presents, 0);
}

#[test]
fn test_resize_recreates_back_buffers() {
    let mut ctx = TestContext::new();
    let window = ctx.swap_chain(320, 240);
    {
        let mut graphics = ctx.context.queue(GRAPHICS);
        graphics.begin_pass(
            Extent2d::new(320, 240),
            vec![ColorTarget::load(RenderTarget::SwapChain(window))],
            None,
        );
        graphics.end_pass();
        graphics.present(window);
    }
    ctx.context.execute_batch().unwrap();

    ctx.context.resize_swap_chain(window, Extent2d::new(640, 480)).unwrap();
    assert_eq!(ctx.context.batches_in_flight(), 0);
    assert_eq!(ctx.context.registry().swap_chain_size(window), Extent2d::new(640, 480));

    {
        let mut graphics = ctx.context.queue(GRAPHICS);
        graphics.begin_pass(
            Extent2d::new(640, 480),
            vec![ColorTarget::load(RenderTarget::SwapChain(window))],
            None,
        );
        graphics.end_pass();
        graphics.present(window);
    }
    let submission = ctx.context.execute_batch().unwrap();
    assert_eq!(submission.presents.len(), 1);
}

// ============================================================================
// Descriptor Array Tests
// ============================================================================

#[test]
fn test_descriptor_array_write_waits_for_reader_in_flight() {
    let mut ctx = TestContext::new();
    ctx.backend.set_deferred_execution(true);

    let texture = ctx.render_target(16, 16);
    let array = ctx
        .context
        .registry_mut()
        .create_image_descriptor_array(DescriptorType::ReadOnlyImage, 4)
        .unwrap();
    let slot = ImageSlot {
        image: texture,
        mips: MipRange::all(),
    };
    ctx.context.write_image_descriptor(array, 0, Some(slot));

    ctx.context.queue(COMPUTE).dispatch(
        DispatchCompute::new(compute_shader(), 1, 1, 1).with_bindings(
            ResourceBindings::new()
                .with_set(DescriptorSetBinding::new(0).with(0, BoundResource::ImageArray(array))),
        ),
    );
    ctx.context.execute_batch().unwrap();
    assert_eq!(ctx.context.descriptor_array_waits(), 0);

    // The GPU has not run the dispatch yet, so the rewrite must wait for it.
    ctx.context.write_image_descriptor(array, 1, Some(slot));
    assert_eq!(ctx.context.flush_descriptor_array_writes().unwrap(), 1);
    assert_eq!(ctx.context.descriptor_array_waits(), 1);

    ctx.backend.set_deferred_execution(false);
    ctx.context.wait_idle().unwrap();
    ctx.context.write_image_descriptor(array, 2, None);
    assert_eq!(ctx.context.flush_descriptor_array_writes().unwrap(), 1);
    assert_eq!(ctx.context.descriptor_array_waits(), 1);
}

// ============================================================================
// Timestamp Tests
// ============================================================================

#[rstest]
#[case::enabled(true, 2)]
#[case::disabled(false, 0)]
fn test_timestamps_resolve_when_batch_retires(#[case] enabled: bool, #[case] expected: usize) {
    let mut ctx = TestContext::with_config(ExecutionConfig::new().with_timestamps(enabled));
    let source = ctx.upload(&generate_test_pattern(64));
    let destination = ctx.buffer(64, BufferUsage::COPY_DST);

    {
        let mut copy = ctx.context.queue(COPY);
        copy.mark_timestamp("upload_begin");
        copy.copy_buffer(source, 0, destination, 0, 64);
        copy.mark_timestamp("upload_end");
    }
    let submission = ctx.context.execute_batch().unwrap();
    assert_eq!(submission.queue(COPY).timestamps, expected);

    ctx.context.wait_idle().unwrap();
    let statistics = ctx.context.take_batch_statistics();
    if enabled {
        assert_eq!(statistics.len(), 1);
        assert_eq!(statistics[0].timestamps.len(), expected);
        let elapsed = statistics[0].elapsed(COPY, "upload_begin", "upload_end").unwrap();
        assert!(elapsed > 0.0);
    } else {
        assert!(statistics.is_empty());
    }
}

// ============================================================================
// Contract Tests
// ============================================================================

#[test]
#[should_panic(expected = "contract violation: begin_pass called while already within a pass")]
fn test_nested_pass_panics() {
    let mut ctx = TestContext::new();
    let target = ctx.render_target(16, 16);
    {
        let mut graphics = ctx.context.queue(GRAPHICS);
        let color = vec![ColorTarget::load(RenderTarget::Image { image: target, mip: 0 })];
        graphics.begin_pass(Extent2d::new(16, 16), color.clone(), None);
        graphics.begin_pass(Extent2d::new(16, 16), color, None);
        graphics.end_pass();
        graphics.end_pass();
    }
    let _ = ctx.context.execute_batch();
}

#[test]
#[should_panic(expected = "contract violation: render target")]
fn test_render_target_size_mismatch_panics() {
    let mut ctx = TestContext::new();
    let target = ctx.render_target(64, 64);
    {
        let mut graphics = ctx.context.queue(GRAPHICS);
        graphics.begin_pass(
            Extent2d::new(32, 32),
            vec![ColorTarget::load(RenderTarget::Image { image: target, mip: 0 })],
            None,
        );
        graphics.end_pass();
    }
    let _ = ctx.context.execute_batch();
}

#[test]
#[should_panic(expected = "contract violation: draw recorded on queue#1")]
fn test_draw_on_compute_queue_panics() {
    let mut ctx = TestContext::new();
    let vertices = ctx.buffer(64, BufferUsage::VERTEX);
    ctx.context.queue(COMPUTE).draw(triangle(vertices, 12));
}
