//! noisepatch - samples layered noise on the GPU and turns it into a terrain patch
//!
//! Runs the patch controller for a number of ticks, optionally walking the
//! patch across the noise domain, and can save a rendered preview of the
//! final tick.

use std::time::Instant;

use clap::Parser;
use glam::{Mat4, Vec3};

use noisepatch::cli::{Args, Backend};
use noisepatch::rendering::PreviewRenderer;
use noisepatch::sampler::{CpuKernel, GpuContext, GpuKernel, NoiseFieldSampler, NoiseKernel};
use noisepatch::surface::{GridSurfaceMesh, MeshSink, SurfacePatch};

/// Sink that only reports what it was given
struct LogSink;

impl MeshSink for LogSink {
    fn draw_mesh(&mut self, mesh: &GridSurfaceMesh, transform: Mat4) {
        if let Some(bounds) = mesh.bounds() {
            let min = transform.transform_point3(bounds.min);
            let max = transform.transform_point3(bounds.max);
            log::debug!(
                "Mesh '{}': {} vertices, bounds ({:.1}, {:.1}, {:.1}) - ({:.1}, {:.1}, {:.1})",
                mesh.name(),
                mesh.vertices().len(),
                min.x,
                min.y,
                min.z,
                max.x,
                max.y,
                max.z
            );
        }
    }
}

fn run<K: NoiseKernel, S: MeshSink>(
    args: &Args,
    sampler: &mut NoiseFieldSampler<K>,
    sink: &mut S,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut patch = SurfacePatch::new(args.patch_params());
    log::info!(
        "Patch: {}x{} cells of {}m, height scale {}m",
        patch.params().edge_count,
        patch.params().edge_count,
        patch.params().edge_size_m,
        patch.params().height_scale_m
    );

    for tick in 0..args.ticks {
        let position = Vec3::new(args.origin_x + tick as f32 * args.step, 0.0, args.origin_z);
        let start = Instant::now();

        let field = patch.tick(Mat4::from_translation(position), sampler, sink)?;

        let (lo, hi) = field.min_max();
        log::info!(
            "Tick {}: origin ({:.1}, {:.1}), noise [{:.3}, {:.3}], {:.2}ms",
            tick,
            position.x,
            position.z,
            lo,
            hi,
            start.elapsed().as_secs_f64() * 1000.0
        );
        if let Some(bounds) = patch.mesh().bounds() {
            log::info!("  elevation [{:.1}m, {:.1}m]", bounds.min.y, bounds.max.y);
        }
    }

    patch.release();
    sampler.release();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.parse_backend() {
        Backend::Gpu => {
            let context = GpuContext::new_blocking()?;
            let mut sampler = NoiseFieldSampler::new(GpuKernel::new(&context)?);

            match &args.preview {
                Some(path) => {
                    let mut renderer = PreviewRenderer::new(&context, args.render_config());
                    run(&args, &mut sampler, &mut renderer)?;
                    renderer.save_png(path)?;
                }
                None => run(&args, &mut sampler, &mut LogSink)?,
            }
        }
        Backend::Cpu => {
            if args.preview.is_some() {
                log::warn!("--preview needs the gpu backend, skipping");
            }
            let mut sampler = NoiseFieldSampler::new(CpuKernel::new());
            run(&args, &mut sampler, &mut LogSink)?;
        }
    }

    Ok(())
}
