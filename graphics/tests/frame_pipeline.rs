//! End-to-end tests of the frame pipeline on the dummy backend.
//!
//! Every test drives `begin_frame` / `declare_pass` / `end_frame` and then
//! inspects the backend's call log, so no GPU is required.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rstest::rstest;

use common::{ForwardTargets, default_config, pipeline, submit_count};
use cyclonite_graphics::backend::dummy::{BackendCall, RecordedCommand, SubmitRecord};
use cyclonite_graphics::backend::{GpuBackend, GpuCommandBuffer, GpuSemaphore};
use cyclonite_graphics::graph::{FrameGraphBuilder, PassDeclaration, ResourceAccess};
use cyclonite_graphics::sync::ResourceBarrier;
use cyclonite_graphics::types::{
    BufferDescriptor, ImageDescriptor, ImageFormat, ImageLayout, PipelineStages, QueueType,
    ResourceKind,
};
use cyclonite_graphics::{FrameState, GraphicsError, ResourceRegistry, ResourceState};

// ============================================================================
// Graph construction
// ============================================================================

#[test]
fn test_forward_frame_edges() {
    let mut registry = ResourceRegistry::new();
    let depth = registry.register_image(ImageDescriptor::new_2d(512, 512, ImageFormat::Depth32Float));
    let color = registry.register_image(ImageDescriptor::new_2d(640, 480, ImageFormat::Rgba16Float));
    let particles = registry.register_buffer(BufferDescriptor::new(4096));

    let mut builder = FrameGraphBuilder::new();
    let shadow = builder.add_pass(
        PassDeclaration::new("shadow").writes(depth, ResourceAccess::DepthStencilWrite),
    );
    let simulate = builder.add_pass(
        PassDeclaration::new("simulate").writes(particles, ResourceAccess::ComputeShaderWrite),
    );
    let lighting = builder.add_pass(
        PassDeclaration::new("lighting")
            .reads(depth, ResourceAccess::FragmentShaderRead)
            .writes(color, ResourceAccess::ColorAttachmentWrite),
    );
    let present =
        builder.add_pass(PassDeclaration::new("present").reads(color, ResourceAccess::FragmentShaderRead));

    let graph = builder.build(&registry).unwrap();

    let edges: Vec<_> = graph.edges().collect();
    assert_eq!(edges, vec![(shadow, lighting), (lighting, present)]);
    assert!(graph.has_path(shadow, present));
    assert!(!graph.are_independent(shadow, present));
    assert!(graph.are_independent(shadow, simulate));
    assert!(graph.are_independent(simulate, present));
    assert_eq!(
        graph.topological_order(),
        &[shadow, simulate, lighting, present]
    );
}

#[test]
fn test_ambiguous_writer_aborts_frame_without_gpu_calls() {
    let (backend, mut pipeline) = pipeline(default_config());
    let color = pipeline
        .registry_mut()
        .register_image(ImageDescriptor::new_2d(64, 64, ImageFormat::Rgba8Unorm));

    let mut frame = pipeline.begin_frame().unwrap();
    for name in ["first", "second"] {
        pipeline
            .declare_pass(
                &mut frame,
                PassDeclaration::new(name).writes(color, ResourceAccess::ColorAttachmentWrite),
            )
            .unwrap();
    }

    backend.clear_calls();
    let err = pipeline.end_frame(frame).unwrap_err();
    assert!(matches!(err, GraphicsError::AmbiguousWriter { .. }));
    assert!(!err.is_pipeline_fatal());
    assert_eq!(submit_count(&backend.calls()), 0);
    assert_eq!(pipeline.state(), FrameState::Idle);

    // The registry was not touched and the next frame runs normally.
    assert_eq!(pipeline.registry().current_state(color).unwrap(), ResourceState::UNDEFINED);
    let frame = pipeline.begin_frame().unwrap();
    pipeline.end_frame(frame).unwrap();
}

// ============================================================================
// Recording
// ============================================================================

#[test]
fn test_independent_passes_record_concurrently() {
    let (_backend, mut pipeline) = pipeline(default_config().with_worker_count(2));
    let a = pipeline
        .registry_mut()
        .register_buffer(BufferDescriptor::new(256));
    let b = pipeline
        .registry_mut()
        .register_buffer(BufferDescriptor::new(256));

    let started = Arc::new([AtomicBool::new(false), AtomicBool::new(false)]);
    let overlapped = Arc::new(AtomicUsize::new(0));

    let mut frame = pipeline.begin_frame().unwrap();
    for (index, buffer) in [a, b].into_iter().enumerate() {
        let started = Arc::clone(&started);
        let overlapped = Arc::clone(&overlapped);
        pipeline
            .declare_pass(
                &mut frame,
                PassDeclaration::new(format!("upload_{index}"))
                    .writes(buffer, ResourceAccess::TransferWrite)
                    .with_work(move |_| {
                        started[index].store(true, Ordering::SeqCst);
                        let deadline = Instant::now() + Duration::from_secs(5);
                        while Instant::now() < deadline {
                            if started[1 - index].load(Ordering::SeqCst) {
                                overlapped.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                            std::thread::yield_now();
                        }
                        Ok(())
                    }),
            )
            .unwrap();
    }
    pipeline.end_frame(frame).unwrap();

    assert_eq!(overlapped.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.last_frame_stats().unwrap().max_recording_concurrency, 2);
}

#[test]
fn test_dependent_passes_record_in_order() {
    let (_backend, mut pipeline) = pipeline(default_config().with_worker_count(4));
    let targets = ForwardTargets::register(&mut pipeline);

    let mut frame = pipeline.begin_frame().unwrap();
    targets.declare(&pipeline, &mut frame).unwrap();
    pipeline.end_frame(frame).unwrap();

    let stats = pipeline.last_frame_stats().unwrap();
    assert_eq!(stats.pass_count, 3);
    assert_eq!(stats.edge_count, 2);
    assert_eq!(stats.command_count, 3);
    assert_eq!(stats.max_recording_concurrency, 1);
}

#[test]
fn test_failed_work_aborts_frame() {
    let (backend, mut pipeline) = pipeline(default_config());
    let color = pipeline
        .registry_mut()
        .register_image(ImageDescriptor::new_2d(64, 64, ImageFormat::Rgba8Unorm));

    let mut frame = pipeline.begin_frame().unwrap();
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("broken")
                .writes(color, ResourceAccess::ColorAttachmentWrite)
                .with_work(|_| {
                    Err(GraphicsError::Recording {
                        pass: "broken".into(),
                        reason: "missing pipeline".into(),
                    })
                }),
        )
        .unwrap();

    let err = pipeline.end_frame(frame).unwrap_err();
    assert!(matches!(err, GraphicsError::Recording { ref pass, .. } if pass == "broken"));
    assert_eq!(submit_count(&backend.calls()), 0);
    assert!(!pipeline.is_device_lost());

    let frame = pipeline.begin_frame().unwrap();
    pipeline.end_frame(frame).unwrap();
}

// ============================================================================
// Synchronization and submission
// ============================================================================

#[test]
fn test_final_states_committed() {
    let (_backend, mut pipeline) = pipeline(default_config());
    let targets = ForwardTargets::register(&mut pipeline);

    let mut frame = pipeline.begin_frame().unwrap();
    targets.declare(&pipeline, &mut frame).unwrap();
    pipeline.end_frame(frame).unwrap();

    let registry = pipeline.registry();
    assert_eq!(
        registry.current_state(targets.depth_map).unwrap(),
        ResourceAccess::FragmentShaderRead.required_state(ResourceKind::Image, QueueType::Graphics)
    );
    assert_eq!(
        registry.current_state(targets.output).unwrap(),
        ResourceAccess::ColorAttachmentWrite.required_state(ResourceKind::Image, QueueType::Graphics)
    );
}

#[test]
fn test_second_frame_starts_from_committed_state() {
    let (_backend, mut pipeline) = pipeline(default_config());
    let targets = ForwardTargets::register(&mut pipeline);

    let mut barrier_counts = Vec::new();
    for _ in 0..3 {
        let mut frame = pipeline.begin_frame().unwrap();
        targets.declare(&pipeline, &mut frame).unwrap();
        pipeline.end_frame(frame).unwrap();
        barrier_counts.push(pipeline.last_frame_stats().unwrap().barrier_count);
    }

    // Later frames transition back from last frame's final layouts, so they
    // need as many barriers as the first one but never more.
    assert!(barrier_counts[1] <= barrier_counts[0]);
    assert_eq!(barrier_counts[1], barrier_counts[2]);
}

#[test]
fn test_swapchain_wait_and_present() {
    let (backend, mut pipeline) = pipeline(default_config());
    let registry = pipeline.registry_mut();
    let color = registry.register_image(ImageDescriptor::new_2d(640, 480, ImageFormat::Rgba16Float));
    let swapchain = registry.register_external(
        ImageDescriptor::new_2d(640, 480, ImageFormat::Bgra8UnormSrgb),
        ResourceState::acquired_swapchain(),
    );
    let image_acquired = backend.create_semaphore().unwrap();

    let mut frame = pipeline.begin_frame().unwrap();
    frame.set_swapchain_target(
        swapchain,
        Some(image_acquired),
        ResourceState::acquired_swapchain(),
    );
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("lighting").writes(color, ResourceAccess::ColorAttachmentWrite),
        )
        .unwrap();
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("present")
                .reads(color, ResourceAccess::FragmentShaderRead)
                .writes(swapchain, ResourceAccess::ColorAttachmentWrite),
        )
        .unwrap();
    let fence = pipeline.end_frame(frame).unwrap();

    let acquired_id = semaphore_id(image_acquired);
    let submissions = backend.submissions();
    assert!(submissions.iter().any(|s| s.waits.contains(&acquired_id)));
    let last = submissions.last().unwrap();
    assert!(last.fence.is_some());
    assert!(!last.signals.is_empty());
    assert!(fence.render_finished().is_some());

    assert_eq!(
        pipeline.registry().current_state(swapchain).unwrap(),
        ResourceState::present()
    );
}

#[test]
fn test_swapchain_reacquired_every_frame() {
    let (backend, mut pipeline) = pipeline(default_config().with_frames_in_flight(2));
    let registry = pipeline.registry_mut();
    let color = registry.register_image(ImageDescriptor::new_2d(640, 480, ImageFormat::Rgba16Float));
    let swapchain = registry.register_external(
        ImageDescriptor::new_2d(640, 480, ImageFormat::Bgra8UnormSrgb),
        ResourceState::acquired_swapchain(),
    );
    let image_acquired = backend.create_semaphore().unwrap();

    let mut first_frame_submissions = 0;
    for frame_index in 0..2 {
        if frame_index == 1 {
            first_frame_submissions = backend.submissions().len();
        }
        let mut frame = pipeline.begin_frame().unwrap();
        frame.set_swapchain_target(
            swapchain,
            Some(image_acquired),
            ResourceState::acquired_swapchain(),
        );
        pipeline
            .declare_pass(
                &mut frame,
                PassDeclaration::new("lighting").writes(color, ResourceAccess::ColorAttachmentWrite),
            )
            .unwrap();
        pipeline
            .declare_pass(
                &mut frame,
                PassDeclaration::new("present")
                    .reads(color, ResourceAccess::FragmentShaderRead)
                    .writes(swapchain, ResourceAccess::ColorAttachmentWrite),
            )
            .unwrap();
        pipeline.end_frame(frame).unwrap();
        // The registry is never refreshed by hand between frames.
        assert_eq!(
            pipeline.registry().current_state(swapchain).unwrap(),
            ResourceState::present()
        );
    }

    let second_frame = &backend.submissions()[first_frame_submissions..];
    let entry: Vec<_> = recorded_barriers(&backend, second_frame)
        .into_iter()
        .filter(|b| b.resource == swapchain && b.new.layout == ImageLayout::ColorAttachment)
        .collect();
    assert_eq!(entry.len(), 1);
    assert_eq!(entry[0].old.layout, ImageLayout::Undefined);
    assert_eq!(entry[0].src_stages(), PipelineStages::COLOR_ATTACHMENT_OUTPUT);
}

#[test]
fn test_cross_queue_semaphore_pair() {
    let (backend, mut pipeline) = pipeline(default_config().with_cross_queue(true));
    let particles = pipeline
        .registry_mut()
        .register_buffer(BufferDescriptor::new(4096));

    let mut frame = pipeline.begin_frame().unwrap();
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("simulate")
                .on_queue(QueueType::Compute)
                .writes(particles, ResourceAccess::ComputeShaderWrite)
                .with_work(|recorder| recorder.dispatch(64, 1, 1)),
        )
        .unwrap();
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("draw_particles")
                .reads(particles, ResourceAccess::VertexBuffer)
                .with_work(|recorder| recorder.draw(4, 1024)),
        )
        .unwrap();
    pipeline.end_frame(frame).unwrap();

    let submissions = backend.submissions();
    let compute = submissions
        .iter()
        .find(|s| s.queue == QueueType::Compute)
        .expect("compute submission");
    let graphics = submissions
        .iter()
        .find(|s| s.queue == QueueType::Graphics && !s.waits.is_empty())
        .expect("graphics submission waiting on compute");
    assert!(compute.signals.iter().any(|s| graphics.waits.contains(s)));
    // The fence goes on the graphics queue's final batch.
    assert_eq!(submissions.last().map(|s| s.queue), Some(QueueType::Graphics));
    assert!(submissions.last().unwrap().fence.is_some());
}

#[test]
fn test_persistent_transfer_upload_feeds_graphics() {
    let (backend, mut pipeline) = pipeline(default_config().with_cross_queue(true));
    let instances = pipeline
        .registry_mut()
        .register_buffer(BufferDescriptor::new(4096));
    let upload = pipeline
        .record_persistent_commands("instance_upload", QueueType::Transfer, |recorder| {
            recorder.update_buffer(9, 0, &[0u8; 256])
        })
        .unwrap();
    assert_eq!(upload.queue(), QueueType::Transfer);

    let mut frame = pipeline.begin_frame().unwrap();
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("instance_upload")
                .on_queue(QueueType::Transfer)
                .with_persistent_commands(upload)
                .writes(instances, ResourceAccess::TransferWrite),
        )
        .unwrap();
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("draw")
                .reads(instances, ResourceAccess::VertexBuffer)
                .with_work(|recorder| recorder.draw(36, 64)),
        )
        .unwrap();
    pipeline.end_frame(frame).unwrap();

    let upload_id = match upload {
        GpuCommandBuffer::Dummy { id, .. } => id,
        #[allow(unreachable_patterns)]
        _ => unreachable!(),
    };
    let submissions = backend.submissions();
    let transfer = submissions
        .iter()
        .find(|s| s.command_buffers.contains(&upload_id))
        .expect("upload submission");
    assert_eq!(transfer.queue, QueueType::Transfer);

    let graphics = submissions
        .iter()
        .find(|s| {
            s.queue == QueueType::Graphics && s.waits.iter().any(|w| transfer.signals.contains(w))
        })
        .expect("graphics submission waiting on the upload");
    let index = graphics
        .waits
        .iter()
        .position(|w| transfer.signals.contains(w))
        .unwrap();
    assert!(graphics.wait_stages[index].contains(PipelineStages::VERTEX_INPUT));
    // The upload was not re-recorded.
    assert_eq!(backend.recorded_commands(upload).unwrap().len(), 1);
}

#[test]
fn test_external_upload_semaphore_is_waited_on() {
    let (backend, mut pipeline) = pipeline(default_config());
    let instances = pipeline
        .registry_mut()
        .register_buffer(BufferDescriptor::new(4096));
    let uploaded = backend.create_semaphore().unwrap();

    let mut frame = pipeline.begin_frame().unwrap();
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("draw")
                .waits_on(uploaded, PipelineStages::VERTEX_INPUT)
                .waits_on(uploaded, PipelineStages::DRAW_INDIRECT)
                .reads(instances, ResourceAccess::VertexBuffer)
                .with_work(|recorder| recorder.draw(36, 64)),
        )
        .unwrap();
    pipeline.end_frame(frame).unwrap();

    let uploaded_id = semaphore_id(uploaded);
    let submissions = backend.submissions();
    let draw = submissions
        .iter()
        .find(|s| s.waits.contains(&uploaded_id))
        .expect("submission waiting on the upload");
    assert_eq!(draw.waits, vec![uploaded_id]);
    assert_eq!(
        draw.wait_stages,
        vec![PipelineStages::VERTEX_INPUT | PipelineStages::DRAW_INDIRECT]
    );
}

// ============================================================================
// Frames in flight
// ============================================================================

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn test_slot_reuse_waits_for_fence(#[case] frames_in_flight: usize) {
    let (backend, mut pipeline) = pipeline(default_config().with_frames_in_flight(frames_in_flight));
    let targets = ForwardTargets::register(&mut pipeline);

    for _ in 0..(frames_in_flight * 3 + 1) {
        let mut frame = pipeline.begin_frame().unwrap();
        targets.declare(&pipeline, &mut frame).unwrap();
        pipeline.end_frame(frame).unwrap();
    }

    let calls = backend.calls();
    let mut recycled = 0;
    for (index, call) in calls.iter().enumerate() {
        if let BackendCall::ResetFence(fence) = call {
            assert!(index > 0);
            assert_eq!(calls[index - 1], BackendCall::WaitFence(*fence));
            recycled += 1;
        }
        if let BackendCall::ResetCommandBuffers { .. } = call {
            assert!(matches!(calls[index - 1], BackendCall::ResetFence(_)));
        }
    }
    assert_eq!(recycled, frames_in_flight * 2 + 1);
}

#[test]
fn test_frame_fence_tracks_completion() {
    let (backend, mut pipeline) = pipeline(default_config());
    backend.set_auto_signal(false);

    let frame = pipeline.begin_frame().unwrap();
    let fence = pipeline.end_frame(frame).unwrap();
    assert!(!fence.is_signaled().unwrap());
    assert!(!pipeline.is_slot_ready(fence.slot()).unwrap());

    backend.signal_all_fences();
    fence.wait(Duration::from_secs(1)).unwrap();
    assert!(pipeline.is_slot_ready(fence.slot()).unwrap());
    assert!(pipeline.poll().unwrap());
    assert_eq!(pipeline.state(), FrameState::Idle);
}

#[test]
fn test_deferred_release_waits_for_slot() {
    let (_backend, mut pipeline) = pipeline(default_config().with_frames_in_flight(2));
    let color = pipeline
        .registry_mut()
        .register_image(ImageDescriptor::new_2d(64, 64, ImageFormat::Rgba8Unorm));

    let mut frame = pipeline.begin_frame().unwrap();
    pipeline
        .declare_pass(
            &mut frame,
            PassDeclaration::new("draw").writes(color, ResourceAccess::ColorAttachmentWrite),
        )
        .unwrap();
    pipeline.end_frame(frame).unwrap();

    pipeline.release_resource(color).unwrap();
    assert!(pipeline.registry().contains(color));

    // Frame 2 uses the other slot, frame 1 is not waited on yet.
    let frame = pipeline.begin_frame().unwrap();
    pipeline.end_frame(frame).unwrap();
    assert!(pipeline.registry().contains(color));

    // Frame 3 reuses slot 0 and observes frame 1's fence.
    let frame = pipeline.begin_frame().unwrap();
    assert!(!pipeline.registry().contains(color));
    pipeline.abort_frame(frame).unwrap();
}

#[test]
fn test_release_without_frames_in_flight_is_immediate() {
    let (_backend, mut pipeline) = pipeline(default_config());
    let buffer = pipeline
        .registry_mut()
        .register_buffer(BufferDescriptor::new(64));
    pipeline.release_resource(buffer).unwrap();
    assert!(!pipeline.registry().contains(buffer));
    assert_eq!(
        pipeline.release_resource(buffer),
        Err(GraphicsError::UnknownResource(buffer))
    );
}

// ============================================================================
// Cancellation and fatal errors
// ============================================================================

#[test]
fn test_abort_frame_issues_no_gpu_calls() {
    let (backend, mut pipeline) = pipeline(default_config());
    let targets = ForwardTargets::register(&mut pipeline);

    let mut frame = pipeline.begin_frame().unwrap();
    targets.declare(&pipeline, &mut frame).unwrap();

    backend.clear_calls();
    pipeline.abort_frame(frame).unwrap();
    assert!(backend.calls().is_empty());
    assert_eq!(pipeline.state(), FrameState::Idle);
    assert_eq!(
        pipeline.registry().current_state(targets.depth_map).unwrap(),
        ResourceState::UNDEFINED
    );
}

#[test]
fn test_device_lost_is_sticky_until_reset() {
    let (backend, mut pipeline) = pipeline(default_config());
    let targets = ForwardTargets::register(&mut pipeline);

    let mut frame = pipeline.begin_frame().unwrap();
    targets.declare(&pipeline, &mut frame).unwrap();
    backend.set_device_lost(true);

    assert_eq!(pipeline.end_frame(frame).unwrap_err(), GraphicsError::DeviceLost);
    assert!(pipeline.is_device_lost());
    assert_eq!(pipeline.begin_frame().unwrap_err(), GraphicsError::DeviceLost);
    assert_eq!(pipeline.wait_idle().unwrap_err(), GraphicsError::DeviceLost);

    backend.set_device_lost(false);
    pipeline.reset().unwrap();
    assert!(!pipeline.is_device_lost());
    assert_eq!(
        pipeline.registry().current_state(targets.color_buffer).unwrap(),
        ResourceState::UNDEFINED
    );

    let mut frame = pipeline.begin_frame().unwrap();
    targets.declare(&pipeline, &mut frame).unwrap();
    pipeline.end_frame(frame).unwrap();
}

#[test]
fn test_fence_timeout_escalates() {
    let config = default_config()
        .with_frames_in_flight(1)
        .with_fence_timeout(Duration::from_millis(20));
    let (backend, mut pipeline) = pipeline(config);
    backend.set_auto_signal(false);

    let frame = pipeline.begin_frame().unwrap();
    pipeline.end_frame(frame).unwrap();

    let err = pipeline.begin_frame().unwrap_err();
    assert!(matches!(err, GraphicsError::FenceTimeout(_)));
    assert!(err.is_pipeline_fatal());
    assert_eq!(pipeline.begin_frame().unwrap_err(), GraphicsError::DeviceLost);

    backend.set_auto_signal(true);
    pipeline.reset().unwrap();
    let frame = pipeline.begin_frame().unwrap();
    pipeline.end_frame(frame).unwrap();
}

#[test]
fn test_reset_with_frames_in_flight() {
    let (backend, mut pipeline) = pipeline(default_config().with_frames_in_flight(2));
    let scratch = pipeline
        .registry_mut()
        .register_buffer(BufferDescriptor::new(256));
    backend.set_auto_signal(false);

    let mut fences = Vec::new();
    for _ in 0..2 {
        let mut frame = pipeline.begin_frame().unwrap();
        pipeline
            .declare_pass(
                &mut frame,
                PassDeclaration::new("fill").writes(scratch, ResourceAccess::TransferWrite),
            )
            .unwrap();
        fences.push(pipeline.end_frame(frame).unwrap());
    }
    pipeline.release_resource(scratch).unwrap();
    assert!(pipeline.registry().contains(scratch));

    // Neither frame was observed complete.
    pipeline.reset().unwrap();
    assert!(!pipeline.registry().contains(scratch));
    for fence in &fences {
        assert_eq!(
            fence.wait(Duration::from_millis(10)),
            Err(GraphicsError::DeviceLost)
        );
    }
    assert!(!pipeline.is_device_lost());

    backend.set_auto_signal(true);
    let frame = pipeline.begin_frame().unwrap();
    pipeline.end_frame(frame).unwrap();
    pipeline.wait_idle().unwrap();
}

#[test]
fn test_frame_fence_timeout_requires_reset() {
    let (backend, mut pipeline) = pipeline(default_config());
    backend.set_auto_signal(false);
    let frame = pipeline.begin_frame().unwrap();
    let fence = pipeline.end_frame(frame).unwrap();

    let err = fence.wait(Duration::from_millis(10)).unwrap_err();
    assert!(err.is_pipeline_fatal());
    assert!(pipeline.is_device_lost());
    assert_eq!(pipeline.wait_idle().unwrap_err(), GraphicsError::DeviceLost);

    backend.set_auto_signal(true);
    pipeline.reset().unwrap();
    let frame = pipeline.begin_frame().unwrap();
    pipeline
        .end_frame(frame)
        .unwrap()
        .wait(Duration::from_secs(1))
        .unwrap();
}

#[test]
fn test_stale_context_after_reset_rejected() {
    let (_backend, mut pipeline) = pipeline(default_config());
    let frame = pipeline.begin_frame().unwrap();
    pipeline.reset().unwrap();
    assert!(matches!(
        pipeline.end_frame(frame),
        Err(GraphicsError::InvalidState(_))
    ));
}

#[test]
fn test_sync_objects_released_on_drop() {
    let (backend, pipeline) = pipeline(default_config().with_frames_in_flight(3));
    assert!(backend.live_sync_objects() > 0);
    drop(pipeline);
    assert_eq!(backend.live_sync_objects(), 0);
}

fn semaphore_id(semaphore: GpuSemaphore) -> u64 {
    match semaphore {
        GpuSemaphore::Dummy(id) => id,
        #[allow(unreachable_patterns)]
        _ => unreachable!(),
    }
}

/// Every barrier recorded into the command buffers of `submissions`.
fn recorded_barriers(
    backend: &cyclonite_graphics::backend::dummy::DummyBackend,
    submissions: &[SubmitRecord],
) -> Vec<ResourceBarrier> {
    let mut barriers = Vec::new();
    for submission in submissions {
        for &id in &submission.command_buffers {
            let cmd = GpuCommandBuffer::Dummy {
                id,
                queue: submission.queue,
            };
            for command in backend.recorded_commands(cmd).unwrap_or_default() {
                if let RecordedCommand::Barriers(batch) = command {
                    barriers.extend(batch);
                }
            }
        }
    }
    barriers
}
