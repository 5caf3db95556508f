//! Layered noise sampling on a compute device into flat height arrays.

mod cpu;
mod error;
mod gpu;
mod kernel;

pub use cpu::{CpuKernel, HostBuffer};
pub use error::{SamplerError, SamplerResult};
pub use gpu::{reflect_entry_point, GpuBuffer, GpuContext, GpuKernel, NOISE_ARRAY_WGSL};
pub use kernel::{dispatch_groups, NoiseKernel, PatchUniforms, KERNEL_ENTRY_POINT};

use glam::Vec2;

use crate::params::NoiseLayerParams;

/// Inputs of a single dispatch, built fresh each tick
#[derive(Debug, Clone)]
pub struct SampleRequest {
    /// Vertices per grid side
    pub grid_width: u32,
    /// World-space origin of the noise domain
    pub noise_origin: Vec2,
    /// Origin of the sample window relative to `noise_origin`
    pub sample_origin: Vec2,
    /// World-space width covered by the grid
    pub sample_extent: f32,
    pub layers: Vec<NoiseLayerParams>,
}

/// Sampled scalar heights for a `width` x `width` grid, indexed `x + y * width`
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    width: u32,
    values: Vec<f32>,
}

impl HeightField {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(x + y * self.width) as usize]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// Smallest and largest sample (`(inf, -inf)` for an empty field)
    pub fn min_max(&self) -> (f32, f32) {
        self.values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

struct LayerBuffer<B> {
    buffer: B,
    count: usize,
}

/// Drives a `NoiseKernel`: owns its layer and result buffers and implements
/// the allocation, dispatch and read-back protocol.
pub struct NoiseFieldSampler<K: NoiseKernel> {
    kernel: K,
    layer_buffer: Option<LayerBuffer<K::Buffer>>,
    result_buffer: Option<K::Buffer>,
}

impl<K: NoiseKernel> NoiseFieldSampler<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            layer_buffer: None,
            result_buffer: None,
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Record count of the live layer buffer, if any
    pub fn layer_buffer_len(&self) -> Option<usize> {
        self.layer_buffer.as_ref().map(|slot| slot.count)
    }

    pub fn has_result_buffer(&self) -> bool {
        self.result_buffer.is_some()
    }

    pub fn sample_request(&mut self, request: &SampleRequest) -> SamplerResult<HeightField> {
        self.sample(
            request.grid_width,
            request.noise_origin,
            request.sample_origin,
            request.sample_extent,
            &request.layers,
        )
    }

    /// Sample `layers` over a `grid_width` x `grid_width` grid.
    ///
    /// Blocks until the whole field has been read back. Fails without a partial
    /// result if any device buffer cannot be allocated.
    pub fn sample(
        &mut self,
        grid_width: u32,
        noise_origin: Vec2,
        sample_origin: Vec2,
        sample_extent: f32,
        layers: &[NoiseLayerParams],
    ) -> SamplerResult<HeightField> {
        // Layer buffer: only reallocated when the layer count changes
        let layer_buffer = match self.layer_buffer.take() {
            Some(slot) if slot.count == layers.len() => slot,
            stale => {
                if let Some(old) = stale {
                    self.kernel.release_buffer(old.buffer);
                }
                log::debug!("Allocating layer buffer for {} layers", layers.len());
                LayerBuffer {
                    buffer: self.kernel.create_layer_buffer(layers.len())?,
                    count: layers.len(),
                }
            }
        };
        let layer_buffer = self.layer_buffer.insert(layer_buffer);
        self.kernel.write_layers(&mut layer_buffer.buffer, layers);

        // Result buffer: always recreated so a changed grid width never sees stale data
        let len = (grid_width as usize)
            .checked_mul(grid_width as usize)
            .ok_or(SamplerError::allocation("result buffer", u64::MAX))?;
        if let Some(old) = self.result_buffer.take() {
            self.kernel.release_buffer(old);
        }
        let result = self
            .result_buffer
            .insert(self.kernel.create_result_buffer(len)?);

        let uniforms = PatchUniforms {
            array_width: grid_width,
            layer_count: layers.len() as u32,
            sample_width: sample_extent,
            _padding: 0.0,
            sample_origin: sample_origin.to_array(),
            noise_origin: noise_origin.to_array(),
        };
        let groups = dispatch_groups(grid_width, self.kernel.workgroup_size());
        log::trace!(
            "Dispatching {}x{} workgroups for a {}x{} grid",
            groups[0],
            groups[1],
            grid_width,
            grid_width
        );

        self.kernel
            .dispatch(&layer_buffer.buffer, result, &uniforms, groups)?;

        let mut values = vec![0.0; len];
        self.kernel.read_result(result, &mut values)?;

        Ok(HeightField {
            width: grid_width,
            values,
        })
    }

    /// Free both device buffers. Safe to call any number of times.
    pub fn release(&mut self) {
        if let Some(slot) = self.layer_buffer.take() {
            log::debug!("Releasing layer buffer ({} layers)", slot.count);
            self.kernel.release_buffer(slot.buffer);
        }
        if let Some(buffer) = self.result_buffer.take() {
            log::debug!("Releasing result buffer");
            self.kernel.release_buffer(buffer);
        }
    }
}

impl<K: NoiseKernel> Drop for NoiseFieldSampler<K> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::NoiseType;
    use std::cell::Cell;
    use std::rc::Rc;

    struct StubBuffer {
        id: u32,
        words: Vec<u32>,
    }

    /// Kernel that writes each invocation's flattened index as its value
    #[derive(Default)]
    struct IndexKernel {
        next_id: u32,
        live: Vec<u32>,
        released: Rc<Cell<usize>>,
        layer_allocs: usize,
        result_allocs: usize,
        invocations: usize,
        last_groups: Option<[u32; 3]>,
        last_uniforms: Option<PatchUniforms>,
        last_layers: Vec<NoiseLayerParams>,
        max_result_len: Option<usize>,
    }

    impl IndexKernel {
        fn alloc(&mut self, words: usize) -> StubBuffer {
            self.next_id += 1;
            self.live.push(self.next_id);
            StubBuffer {
                id: self.next_id,
                words: vec![0; words],
            }
        }
    }

    impl NoiseKernel for IndexKernel {
        type Buffer = StubBuffer;

        fn workgroup_size(&self) -> [u32; 3] {
            [8, 8, 1]
        }

        fn create_layer_buffer(&mut self, count: usize) -> SamplerResult<StubBuffer> {
            self.layer_allocs += 1;
            Ok(self.alloc(count * 10))
        }

        fn write_layers(&mut self, buffer: &mut StubBuffer, layers: &[NoiseLayerParams]) {
            buffer.words = bytemuck::cast_slice(layers).to_vec();
        }

        fn create_result_buffer(&mut self, len: usize) -> SamplerResult<StubBuffer> {
            if self.max_result_len.is_some_and(|max| len > max) {
                return Err(SamplerError::allocation("result buffer", len as u64 * 4));
            }
            self.result_allocs += 1;
            Ok(self.alloc(len))
        }

        fn dispatch(
            &mut self,
            layers: &StubBuffer,
            result: &mut StubBuffer,
            uniforms: &PatchUniforms,
            groups: [u32; 3],
        ) -> SamplerResult<()> {
            self.last_groups = Some(groups);
            self.last_uniforms = Some(*uniforms);
            self.last_layers = bytemuck::cast_slice(&layers.words).to_vec();

            let width = uniforms.array_width;
            for gy in 0..groups[1] * 8 {
                for gx in 0..groups[0] * 8 {
                    self.invocations += 1;
                    if gx < width && gy < width {
                        let index = gx + gy * width;
                        result.words[index as usize] = (index as f32).to_bits();
                    }
                }
            }
            Ok(())
        }

        fn read_result(&mut self, result: &StubBuffer, out: &mut [f32]) -> SamplerResult<()> {
            for (value, word) in out.iter_mut().zip(&result.words) {
                *value = f32::from_bits(*word);
            }
            Ok(())
        }

        fn release_buffer(&mut self, buffer: StubBuffer) {
            self.live.retain(|id| *id != buffer.id);
            self.released.set(self.released.get() + 1);
        }
    }

    fn layers(n: usize) -> Vec<NoiseLayerParams> {
        (0..n)
            .map(|i| NoiseLayerParams::new(NoiseType::Perlin).with_seed(i as i32))
            .collect()
    }

    #[test]
    fn test_index_kernel_round_trip() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());
        let width = 13;

        let field = sampler
            .sample(width, Vec2::ZERO, Vec2::ZERO, 12.0, &layers(1))
            .unwrap();

        assert_eq!(field.width(), width);
        assert_eq!(field.as_slice().len(), (width * width) as usize);
        for y in 0..width {
            for x in 0..width {
                assert_eq!(field.get(x, y), (x + y * width) as f32);
            }
        }
    }

    #[test]
    fn test_dispatch_covers_grid_with_whole_groups() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());
        sampler
            .sample(13, Vec2::ZERO, Vec2::ZERO, 12.0, &layers(1))
            .unwrap();

        assert_eq!(sampler.kernel().last_groups, Some([2, 2, 1]));
        // Invocations past the grid edge run but write nothing
        assert_eq!(sampler.kernel().invocations, 16 * 16);
    }

    #[test]
    fn test_uniforms_and_layers_reach_kernel() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());
        let stack = layers(3);
        sampler
            .sample(
                9,
                Vec2::new(100.0, -40.0),
                Vec2::new(1.0, 2.0),
                64.0,
                &stack,
            )
            .unwrap();

        let uniforms = sampler.kernel().last_uniforms.unwrap();
        assert_eq!(uniforms.array_width, 9);
        assert_eq!(uniforms.layer_count, 3);
        assert_eq!(uniforms.sample_width, 64.0);
        assert_eq!(uniforms.sample_origin, [1.0, 2.0]);
        assert_eq!(uniforms.noise_origin, [100.0, -40.0]);
        assert_eq!(sampler.kernel().last_layers, stack);
    }

    #[test]
    fn test_layer_buffer_reallocated_only_on_count_change() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());

        sampler.sample(5, Vec2::ZERO, Vec2::ZERO, 4.0, &layers(2)).unwrap();
        sampler.sample(5, Vec2::ZERO, Vec2::ZERO, 4.0, &layers(2)).unwrap();
        assert_eq!(sampler.kernel().layer_allocs, 1);
        assert_eq!(sampler.layer_buffer_len(), Some(2));

        sampler.sample(5, Vec2::ZERO, Vec2::ZERO, 4.0, &layers(3)).unwrap();
        assert_eq!(sampler.kernel().layer_allocs, 2);
        assert_eq!(sampler.layer_buffer_len(), Some(3));

        // Result buffer is recreated on every call
        assert_eq!(sampler.kernel().result_allocs, 3);
        // One layer buffer and one result buffer alive
        assert_eq!(sampler.kernel().live.len(), 2);
    }

    #[test]
    fn test_grid_width_change_resizes_result() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());

        let small = sampler.sample(3, Vec2::ZERO, Vec2::ZERO, 2.0, &layers(1)).unwrap();
        let large = sampler.sample(17, Vec2::ZERO, Vec2::ZERO, 16.0, &layers(1)).unwrap();

        assert_eq!(small.as_slice().len(), 9);
        assert_eq!(large.as_slice().len(), 289);
        assert_eq!(large.get(16, 16), 288.0);
    }

    #[test]
    fn test_empty_layer_list_is_legal() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());
        let field = sampler.sample(4, Vec2::ZERO, Vec2::ZERO, 3.0, &[]).unwrap();

        assert_eq!(field.as_slice().len(), 16);
        assert_eq!(sampler.layer_buffer_len(), Some(0));
        assert_eq!(sampler.kernel().last_uniforms.unwrap().layer_count, 0);
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let kernel = IndexKernel {
            max_result_len: Some(100),
            ..Default::default()
        };
        let mut sampler = NoiseFieldSampler::new(kernel);

        let err = sampler
            .sample(11, Vec2::ZERO, Vec2::ZERO, 10.0, &layers(1))
            .unwrap_err();
        assert!(matches!(err, SamplerError::Allocation { .. }));
        assert!(!sampler.has_result_buffer());

        // A later call with a smaller grid still works
        assert!(sampler.sample(10, Vec2::ZERO, Vec2::ZERO, 9.0, &layers(1)).is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());
        sampler.sample(5, Vec2::ZERO, Vec2::ZERO, 4.0, &layers(2)).unwrap();

        sampler.release();
        sampler.release();

        assert!(sampler.kernel().live.is_empty());
        assert_eq!(sampler.kernel().released.get(), 2);
        assert_eq!(sampler.layer_buffer_len(), None);
        assert!(!sampler.has_result_buffer());
    }

    #[test]
    fn test_sample_after_release_reacquires_buffers() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());
        sampler.release();

        let field = sampler.sample(3, Vec2::ZERO, Vec2::ZERO, 2.0, &layers(1)).unwrap();
        assert_eq!(field.get(2, 2), 8.0);

        sampler.release();
        assert!(sampler.kernel().live.is_empty());
    }

    #[test]
    fn test_drop_releases_buffers() {
        let released = Rc::new(Cell::new(0));
        let kernel = IndexKernel {
            released: Rc::clone(&released),
            ..Default::default()
        };

        {
            let mut sampler = NoiseFieldSampler::new(kernel);
            sampler.sample(5, Vec2::ZERO, Vec2::ZERO, 4.0, &layers(1)).unwrap();
        }

        assert_eq!(released.get(), 2);
    }

    #[test]
    fn test_height_field_min_max() {
        let mut sampler = NoiseFieldSampler::new(IndexKernel::default());
        let field = sampler.sample(4, Vec2::ZERO, Vec2::ZERO, 3.0, &layers(1)).unwrap();

        assert_eq!(field.min_max(), (0.0, 15.0));
    }
}
