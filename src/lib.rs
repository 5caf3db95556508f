//! noisepatch library - GPU-sampled layered noise terrain patches

pub mod cli;
pub mod params;
pub mod rendering;
pub mod sampler;
pub mod surface;
