//! Terrain patch parameters.

use super::noise::{FractalType, NoiseLayerParams, NoiseType};

/// Patch geometry and the noise stack sampled for it
#[derive(Debug, Clone)]
pub struct PatchParams {
    /// Cells per patch edge (grid width = edge_count + 1 vertices)
    pub edge_count: u32,

    /// Size of one cell in world units (meters)
    pub edge_size_m: f32,

    /// Multiplier applied to sampled noise to get elevation (meters per unit noise)
    pub height_scale_m: f32,

    /// Noise layers, combined in order by the kernel
    pub layers: Vec<NoiseLayerParams>,
}

impl PatchParams {
    /// Vertices per patch edge
    pub fn grid_width(&self) -> u32 {
        self.edge_count + 1
    }

    /// World-space width covered by the patch (meters)
    pub fn sample_width_m(&self) -> f32 {
        self.edge_count as f32 * self.edge_size_m
    }
}

impl Default for PatchParams {
    fn default() -> Self {
        Self {
            edge_count: 64,
            edge_size_m: 1.0,
            height_scale_m: 150.0,
            // Rolling hills: low-frequency fBm
            layers: vec![NoiseLayerParams::new(NoiseType::OpenSimplex2)
                .with_frequency(0.005)
                .with_fractal(FractalType::FBm, 5)],
        }
    }
}
