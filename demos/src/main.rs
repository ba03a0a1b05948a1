//! Headless frame loop over the dummy backend.
//!
//! Spawns a grid of renderables in an ECS world, extracts it every frame and
//! pushes the standard forward frame (shadow, lighting, present) through the
//! pipeline with several frames in flight. Instance data is uploaded every
//! frame; indirect draw arguments are recorded once and resubmitted.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p cyclonite-demos -- --frames 240 --gpu-latency-ms 4
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::{Quat, Vec3};

use cyclonite_ecs::World;
use cyclonite_ecs::components::{AlphaMode, Camera, Material, Mesh, MeshHandle, Transform};
use cyclonite_graphics::backend::{GpuBackend, GpuSemaphore};
use cyclonite_graphics::backend::dummy::DummyBackend;
use cyclonite_graphics::types::{ImageDescriptor, ImageFormat};
use cyclonite_graphics::{
    ExtractedScene, FrameFence, FramePipeline, GraphicsError, PipelineConfig, ResourceState,
    ScenePasses, SceneUploads,
};

/// Cyclonite headless frame pipeline demo.
#[derive(Parser, Debug)]
#[command(
    name = "headless_frames",
    about = "Drive the Cyclonite frame pipeline without a GPU",
    long_about = "Renders an ECS scene through the frame pipeline on the dummy backend.\n\n\
        EXAMPLES:\n\
          # Three frames in flight with a slow simulated GPU\n\
          ./headless_frames --frames-in-flight 3 --gpu-latency-ms 8\n\
        \n\
          # Load the pipeline settings from a RON file\n\
          ./headless_frames --config pipeline.ron",
    version
)]
struct Args {
    /// Pipeline configuration file (RON). Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of frames to render.
    #[arg(long, default_value = "120")]
    frames: u64,

    /// Frames the CPU may run ahead of the GPU.
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// Recording worker threads.
    #[arg(long)]
    workers: Option<usize>,

    /// Allow compute and transfer passes on their own queues.
    #[arg(long)]
    cross_queue: bool,

    /// Simulated GPU execution time per submission.
    #[arg(long, default_value = "0")]
    gpu_latency_ms: u64,

    /// Side length of the grid of renderables.
    #[arg(long, default_value = "8")]
    grid: u32,

    /// Simulate a device loss at this frame and recover with a reset.
    #[arg(long)]
    lose_device_at: Option<u64>,

    /// Output width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Output height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig, GraphicsError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_ron_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(frames) = self.frames_in_flight {
            config = config.with_frames_in_flight(frames);
        }
        if let Some(workers) = self.workers {
            config = config.with_worker_count(workers);
        }
        if self.cross_queue {
            config = config.with_cross_queue(true);
        }
        Ok(config)
    }
}

fn populate(world: &mut World, grid: u32) -> Result<(), cyclonite_ecs::EcsError> {
    let half = grid as f32 * 0.5;
    for x in 0..grid {
        for z in 0..grid {
            let entity = world.spawn();
            let position = Vec3::new(x as f32 - half, 0.0, z as f32 - half) * 2.0;
            let alpha = if (x + z) % 5 == 0 {
                AlphaMode::Blend
            } else {
                AlphaMode::Opaque
            };
            world.insert(entity, Transform::from_translation(position))?;
            world.insert(entity, Mesh::new(MeshHandle::new((x + z) % 3), 36))?;
            world.insert(
                entity,
                Material::default()
                    .with_roughness(x as f32 / grid.max(1) as f32)
                    .with_alpha_mode(alpha),
            )?;
        }
    }

    let camera = world.spawn();
    world.insert(
        camera,
        Transform::from_xyz(0.0, half * 2.0, half * 3.0).looking_at(Vec3::ZERO, Vec3::Y),
    )?;
    world.insert(camera, Camera::perspective(60.0, 0.1, 500.0))?;
    Ok(())
}

fn animate(world: &mut World, frame: u64) {
    let spin = Quat::from_rotation_y(frame as f32 * 0.01);
    let entities: Vec<_> = world
        .query2::<Transform, Mesh>()
        .map(|(entity, _, _)| entity)
        .collect();
    for entity in entities {
        if let Some(transform) = world.get_mut::<Transform>(entity) {
            transform.rotation = spin;
        }
    }
}

fn render_frame(
    pipeline: &mut FramePipeline,
    uploads: &mut SceneUploads,
    passes: &ScenePasses,
    scene: &Arc<ExtractedScene>,
    image_acquired: &[GpuSemaphore],
) -> Result<FrameFence, GraphicsError> {
    // The grid only changes layout when renderables come or go.
    uploads.prepare(pipeline, scene, scene.len() as u64)?;

    let mut frame = pipeline.begin_frame()?;
    frame.set_swapchain_target(
        passes.swapchain,
        Some(image_acquired[frame.slot()]),
        ResourceState::acquired_swapchain(),
    );
    uploads.declare(pipeline, &mut frame, scene)?;
    passes.declare(pipeline, &mut frame, scene)?;
    pipeline.end_frame(frame)
}

fn run(args: &Args) -> Result<(), GraphicsError> {
    let config = args.pipeline_config()?;
    let backend = Arc::new(DummyBackend::new());
    backend.set_latency(Duration::from_millis(args.gpu_latency_ms));

    let mut pipeline = FramePipeline::new(backend.clone(), config)?;

    let swapchain = pipeline.registry_mut().register_external(
        ImageDescriptor::new_2d(args.width, args.height, ImageFormat::Bgra8UnormSrgb)
            .with_label("swapchain"),
        ResourceState::acquired_swapchain(),
    );
    let capacity = (args.grid as usize).pow(2);
    let mut uploads = SceneUploads::create(pipeline.registry_mut(), capacity);
    let passes = ScenePasses::create(pipeline.registry_mut(), args.width, args.height, swapchain)
        .with_uploads(&uploads);

    let image_acquired = (0..pipeline.frames_in_flight())
        .map(|_| backend.create_semaphore())
        .collect::<Result<Vec<_>, _>>()?;

    let mut world = World::new();
    populate(&mut world, args.grid)
        .map_err(|e| GraphicsError::InvalidState(format!("scene setup failed: {}", e)))?;

    let aspect = args.width as f32 / args.height.max(1) as f32;
    let start = Instant::now();
    let mut rendered = 0u64;
    let mut recoveries = 0u32;

    for index in 0..args.frames {
        if args.lose_device_at == Some(index) {
            log::warn!("Simulating device loss at frame {}", index);
            backend.set_device_lost(true);
        }

        animate(&mut world, index);
        let scene = Arc::new(ExtractedScene::extract(&world, aspect));

        match render_frame(&mut pipeline, &mut uploads, &passes, &scene, &image_acquired) {
            Ok(_) => rendered += 1,
            Err(err) if err.is_pipeline_fatal() || pipeline.is_device_lost() => {
                log::error!("Frame {} failed: {}; resetting the pipeline", index, err);
                backend.set_device_lost(false);
                pipeline.reset()?;
                recoveries += 1;
            }
            Err(err) => log::warn!("Frame {} dropped: {}", index, err),
        }

        if let Some(stats) = pipeline.last_frame_stats()
            && stats.frame_number % 60 == 0
        {
            log::info!(
                "frame {}: {} passes, {} barriers, {} batches, fence wait {:?}",
                stats.frame_number,
                stats.pass_count,
                stats.barrier_count,
                stats.batch_count,
                stats.fence_wait
            );
        }
    }

    uploads.release(&mut pipeline)?;
    pipeline.wait_idle()?;
    for semaphore in image_acquired {
        backend.destroy_semaphore(semaphore);
    }

    let elapsed = start.elapsed();
    log::info!(
        "Rendered {} of {} frames in {:.2?} ({:.1} fps), {} recoveries",
        rendered,
        args.frames,
        elapsed,
        rendered as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        recoveries
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    cyclonite_core::init();
    cyclonite_graphics::init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
