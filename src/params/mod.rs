//! Parameter definitions with physical units and documented semantics.

mod noise;
mod patch;
mod render;

// Re-export all types
pub use noise::{FractalType, NoiseLayerParams, NoiseType, MAX_OCTAVES, NOISE_LAYER_STRIDE};
pub use patch::PatchParams;
pub use render::RenderConfig;
