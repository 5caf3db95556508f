//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::params::{FractalType, NoiseLayerParams, NoiseType, PatchParams, RenderConfig};

/// Compute backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// wgpu compute pipeline
    Gpu,
    /// Host reference kernel
    Cpu,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "noisepatch")]
#[command(about = "GPU-sampled procedural terrain patch", long_about = None)]
pub struct Args {
    /// Compute backend: gpu (default), cpu
    #[arg(long, value_name = "BACKEND", default_value = "gpu")]
    pub backend: String,

    /// Cells per patch edge
    #[arg(long, value_name = "CELLS", default_value = "64")]
    pub edge_count: u32,

    /// Size of one cell (meters)
    #[arg(long, value_name = "METERS", default_value = "1.0", allow_hyphen_values = true)]
    pub edge_size: f32,

    /// Elevation per unit of noise (meters)
    #[arg(long, value_name = "METERS", default_value = "150.0")]
    pub height_scale: f32,

    /// Noise seed
    #[arg(long, default_value = "1337")]
    pub seed: i32,

    /// Spatial frequency (cycles per meter)
    #[arg(long, default_value = "0.005")]
    pub frequency: f32,

    /// Noise type: opensimplex2, opensimplex2s, cellular, perlin, valuecubic, value
    #[arg(long, value_name = "TYPE", default_value = "opensimplex2")]
    pub noise_type: String,

    /// Fractal type: none, fbm, ridged, pingpong, domainwarpprogressive, domainwarpindependent
    #[arg(long, value_name = "TYPE", default_value = "fbm")]
    pub fractal_type: String,

    /// Fractal octaves (1-20)
    #[arg(long, default_value = "5")]
    pub octaves: i32,

    /// Number of patch updates to run
    #[arg(long, default_value = "1")]
    pub ticks: u32,

    /// Starting world X position (meters)
    #[arg(long, value_name = "METERS", default_value = "0.0", allow_hyphen_values = true)]
    pub origin_x: f32,

    /// Starting world Z position (meters)
    #[arg(long, value_name = "METERS", default_value = "0.0", allow_hyphen_values = true)]
    pub origin_z: f32,

    /// Distance moved along +X between ticks (meters)
    #[arg(long, value_name = "METERS", default_value = "0.0", allow_hyphen_values = true)]
    pub step: f32,

    /// Render the last tick and save it as PNG (gpu backend only)
    #[arg(long, value_name = "PNG")]
    pub preview: Option<PathBuf>,
}

impl Args {
    /// Parse backend from command-line arguments
    pub fn parse_backend(&self) -> Backend {
        match self.backend.to_lowercase().as_str() {
            "gpu" => Backend::Gpu,
            "cpu" => Backend::Cpu,
            other => {
                log::warn!("Unknown backend '{}', using gpu", other);
                Backend::Gpu
            }
        }
    }

    /// Build the single-layer noise stack described by the flags
    pub fn noise_layer(&self) -> NoiseLayerParams {
        let noise_type = self.noise_type.parse().unwrap_or_else(|e| {
            log::warn!("{}, using {}", e, NoiseType::default());
            NoiseType::default()
        });
        let fractal_type = self.fractal_type.parse().unwrap_or_else(|e| {
            log::warn!("{}, using {}", e, FractalType::FBm);
            FractalType::FBm
        });

        NoiseLayerParams::new(noise_type)
            .with_seed(self.seed)
            .with_frequency(self.frequency)
            .with_fractal(fractal_type, self.octaves)
    }

    pub fn patch_params(&self) -> PatchParams {
        let defaults = PatchParams::default();
        let edge_size_m = if self.edge_size > 0.0 {
            self.edge_size
        } else {
            log::warn!(
                "Edge size must be positive (got {}), using {}",
                self.edge_size,
                defaults.edge_size_m
            );
            defaults.edge_size_m
        };

        PatchParams {
            edge_count: self.edge_count.max(1),
            edge_size_m,
            height_scale_m: self.height_scale,
            layers: vec![self.noise_layer()],
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig::default()
    }
}
