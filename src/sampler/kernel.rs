//! Device seam between the sampler's dispatch protocol and a concrete backend.

use bytemuck::{Pod, Zeroable};

use super::error::SamplerResult;
use crate::params::NoiseLayerParams;

/// Name of the compute entry point every kernel source must export
pub const KERNEL_ENTRY_POINT: &str = "CSNoiseArray";

/// Per-dispatch scalar inputs (`PatchUniforms` in `noise_array.wgsl`)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PatchUniforms {
    /// Vertices per grid side
    pub array_width: u32,
    /// Logical number of layers in the layer buffer
    pub layer_count: u32,
    /// World-space width covered by the grid
    pub sample_width: f32,
    pub _padding: f32, // Align sample_origin to 8 bytes
    pub sample_origin: [f32; 2],
    pub noise_origin: [f32; 2],
}

/// A compute backend able to run the noise-array kernel.
///
/// The sampler owns the buffers it gets back and hands each one to
/// `release_buffer` exactly once.
pub trait NoiseKernel {
    type Buffer;

    /// Threads per workgroup on each axis
    fn workgroup_size(&self) -> [u32; 3];

    /// Allocate a layer buffer holding `count` records
    fn create_layer_buffer(&mut self, count: usize) -> SamplerResult<Self::Buffer>;

    fn write_layers(&mut self, buffer: &mut Self::Buffer, layers: &[NoiseLayerParams]);

    /// Allocate a zeroed result buffer holding `len` floats
    fn create_result_buffer(&mut self, len: usize) -> SamplerResult<Self::Buffer>;

    /// Run the kernel over `groups` workgroups
    fn dispatch(
        &mut self,
        layers: &Self::Buffer,
        result: &mut Self::Buffer,
        uniforms: &PatchUniforms,
        groups: [u32; 3],
    ) -> SamplerResult<()>;

    /// Copy the result buffer into host memory, blocking until done
    fn read_result(&mut self, result: &Self::Buffer, out: &mut [f32]) -> SamplerResult<()>;

    fn release_buffer(&mut self, buffer: Self::Buffer);
}

/// Workgroups needed to cover a `grid_width` x `grid_width` grid
pub fn dispatch_groups(grid_width: u32, workgroup_size: [u32; 3]) -> [u32; 3] {
    [
        grid_width.div_ceil(workgroup_size[0]),
        grid_width.div_ceil(workgroup_size[1]),
        1,
    ]
}
