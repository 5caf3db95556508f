//! Host reference backend: runs the noise-array dispatch on the CPU.
//!
//! Every workgroup invocation of the dispatch grid is executed, including the
//! ones past the grid edge, and layer records are decoded from the raw layer
//! buffer words just like the device kernel decodes them.

use glam::Vec2;
use noise::{
    Fbm, MultiFractal, NoiseFn, OpenSimplex, Perlin, RidgedMulti, Seedable, SuperSimplex, Value,
    Worley,
};

use super::error::{SamplerError, SamplerResult};
use super::kernel::{NoiseKernel, PatchUniforms};
use crate::params::{FractalType, NoiseLayerParams, NoiseType, MAX_OCTAVES, NOISE_LAYER_STRIDE};

const PING_PONG_STRENGTH: f64 = 2.0;
const DOMAIN_WARP_AMP: f64 = 1.0;
/// Seed offset of the second warp axis
const WARP_SEED_OFFSET: u32 = 7919;

/// Host memory standing in for a device buffer
pub struct HostBuffer {
    words: Vec<u32>,
}

/// Reference kernel evaluating layers with the `noise` crate
#[derive(Debug, Clone)]
pub struct CpuKernel {
    workgroup_size: [u32; 3],
}

impl CpuKernel {
    pub fn new() -> Self {
        Self {
            workgroup_size: [8, 8, 1],
        }
    }

    pub fn with_workgroup_size(workgroup_size: [u32; 3]) -> Self {
        Self { workgroup_size }
    }
}

impl Default for CpuKernel {
    fn default() -> Self {
        Self::new()
    }
}

fn allocate_words(label: &'static str, count: Option<usize>) -> SamplerResult<HostBuffer> {
    let Some(count) = count else {
        return Err(SamplerError::allocation(label, u64::MAX));
    };
    let mut words = Vec::new();
    words
        .try_reserve_exact(count)
        .map_err(|_| SamplerError::allocation(label, (count as u64).saturating_mul(4)))?;
    words.resize(count, 0);
    Ok(HostBuffer { words })
}

impl NoiseKernel for CpuKernel {
    type Buffer = HostBuffer;

    fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    fn create_layer_buffer(&mut self, count: usize) -> SamplerResult<HostBuffer> {
        let words_per_layer = NOISE_LAYER_STRIDE / std::mem::size_of::<u32>();
        allocate_words("noise layer buffer", count.checked_mul(words_per_layer))
    }

    fn write_layers(&mut self, buffer: &mut HostBuffer, layers: &[NoiseLayerParams]) {
        buffer.words.clear();
        buffer.words.extend_from_slice(bytemuck::cast_slice(layers));
    }

    fn create_result_buffer(&mut self, len: usize) -> SamplerResult<HostBuffer> {
        allocate_words("noise result buffer", Some(len))
    }

    fn dispatch(
        &mut self,
        layers: &HostBuffer,
        result: &mut HostBuffer,
        uniforms: &PatchUniforms,
        groups: [u32; 3],
    ) -> SamplerResult<()> {
        let records: &[NoiseLayerParams] = bytemuck::cast_slice(&layers.words);
        let count = (uniforms.layer_count as usize).min(records.len());
        let evaluators: Vec<LayerEvaluator> =
            records[..count].iter().map(LayerEvaluator::new).collect();

        let width = uniforms.array_width;
        let spacing = uniforms.sample_width / (width.max(2) - 1) as f32;
        let origin = Vec2::from(uniforms.noise_origin) + Vec2::from(uniforms.sample_origin);
        let [group_x, group_y, _] = self.workgroup_size;

        for gy in 0..groups[1] {
            for gx in 0..groups[0] {
                for ly in 0..group_y {
                    for lx in 0..group_x {
                        let x = gx * group_x + lx;
                        let y = gy * group_y + ly;
                        if x >= width || y >= width {
                            continue;
                        }

                        let base = origin + Vec2::new(x as f32, y as f32) * spacing;
                        let total: f64 = evaluators.iter().map(|layer| layer.eval(base)).sum();
                        result.words[(x + y * width) as usize] = (total as f32).to_bits();
                    }
                }
            }
        }

        Ok(())
    }

    fn read_result(&mut self, result: &HostBuffer, out: &mut [f32]) -> SamplerResult<()> {
        for (value, word) in out.iter_mut().zip(&result.words) {
            *value = f32::from_bits(*word);
        }
        Ok(())
    }

    fn release_buffer(&mut self, buffer: HostBuffer) {
        drop(buffer);
    }
}

/// One decoded layer with its noise source built once per dispatch
struct LayerEvaluator {
    weight: f64,
    offset: Vec2,
    source: Box<dyn NoiseFn<f64, 2>>,
}

impl LayerEvaluator {
    fn new(layer: &NoiseLayerParams) -> Self {
        // Out-of-range discriminants fall back the same way the device kernel does
        let source = match layer.noise().unwrap_or_default() {
            NoiseType::OpenSimplex2 => build_source::<OpenSimplex>(layer),
            NoiseType::OpenSimplex2S => build_source::<SuperSimplex>(layer),
            NoiseType::Cellular => build_source::<Worley>(layer),
            NoiseType::Perlin => build_source::<Perlin>(layer),
            NoiseType::ValueCubic | NoiseType::Value => build_source::<Value>(layer),
        };

        Self {
            weight: f64::from(layer.weight),
            offset: Vec2::from(layer.offset),
            source,
        }
    }

    fn eval(&self, base: Vec2) -> f64 {
        let p = base + self.offset;
        self.source.get([f64::from(p.x), f64::from(p.y)]) * self.weight
    }
}

/// Shape of a fractal sum, shared by the hand-rolled fractals
#[derive(Debug, Clone, Copy)]
struct Octaves {
    frequency: f64,
    lacunarity: f64,
    gain: f64,
    /// Normalises the amplitude sum to roughly [-1, 1]
    bounding: f64,
}

impl Octaves {
    fn new(layer: &NoiseLayerParams, octaves: usize) -> Self {
        let gain = f64::from(layer.gain);
        let mut amp = gain;
        let mut amp_fractal = 1.0;
        for _ in 1..octaves {
            amp_fractal += amp;
            amp *= gain;
        }

        Self {
            frequency: f64::from(layer.frequency),
            lacunarity: f64::from(layer.lacunarity),
            gain,
            bounding: 1.0 / amp_fractal,
        }
    }
}

fn build_source<T>(layer: &NoiseLayerParams) -> Box<dyn NoiseFn<f64, 2>>
where
    T: NoiseFn<f64, 2> + Seedable + Default + 'static,
{
    let seed = layer.seed as u32;
    let octave_count = layer.octaves.clamp(1, MAX_OCTAVES) as usize;
    let octaves = Octaves::new(layer, octave_count);
    let per_octave = || -> Vec<T> {
        (0..octave_count as u32)
            .map(|i| T::default().set_seed(seed.wrapping_add(i)))
            .collect()
    };

    match layer.fractal().unwrap_or_default() {
        FractalType::None => Box::new(Single {
            source: T::default().set_seed(seed),
            frequency: octaves.frequency,
        }),
        FractalType::FBm => Box::new(
            Fbm::<T>::new(seed)
                .set_octaves(octave_count)
                .set_frequency(octaves.frequency)
                .set_lacunarity(octaves.lacunarity)
                .set_persistence(octaves.gain),
        ),
        FractalType::Ridged => Box::new(
            RidgedMulti::<T>::new(seed)
                .set_octaves(octave_count)
                .set_frequency(octaves.frequency)
                .set_lacunarity(octaves.lacunarity)
                .set_persistence(octaves.gain),
        ),
        FractalType::PingPong => Box::new(PingPong {
            sources: per_octave(),
            octaves,
        }),
        FractalType::DomainWarpProgressive | FractalType::DomainWarpIndependent => {
            Box::new(DomainWarp {
                base: T::default().set_seed(seed),
                warp_x: per_octave(),
                warp_y: (0..octave_count as u32)
                    .map(|i| {
                        T::default().set_seed(seed.wrapping_add(i).wrapping_add(WARP_SEED_OFFSET))
                    })
                    .collect(),
                octaves,
                progressive: layer.fractal() == Some(FractalType::DomainWarpProgressive),
            })
        }
    }
}

/// Base noise at the layer frequency, no fractal
struct Single<T> {
    source: T,
    frequency: f64,
}

impl<T: NoiseFn<f64, 2>> NoiseFn<f64, 2> for Single<T> {
    fn get(&self, point: [f64; 2]) -> f64 {
        self.source
            .get([point[0] * self.frequency, point[1] * self.frequency])
    }
}

fn ping_pong(t: f64) -> f64 {
    let t = t - (t * 0.5).trunc() * 2.0;
    if t < 1.0 {
        t
    } else {
        2.0 - t
    }
}

/// Fractal sum folding each octave through a triangle wave
struct PingPong<T> {
    sources: Vec<T>,
    octaves: Octaves,
}

impl<T: NoiseFn<f64, 2>> NoiseFn<f64, 2> for PingPong<T> {
    fn get(&self, point: [f64; 2]) -> f64 {
        let mut x = point[0] * self.octaves.frequency;
        let mut y = point[1] * self.octaves.frequency;
        let mut amp = self.octaves.bounding;
        let mut sum = 0.0;

        for source in &self.sources {
            let n = ping_pong((source.get([x, y]) + 1.0) * PING_PONG_STRENGTH);
            sum += (n - 0.5) * 2.0 * amp;
            x *= self.octaves.lacunarity;
            y *= self.octaves.lacunarity;
            amp *= self.octaves.gain;
        }
        sum
    }
}

/// Base noise sampled at a position displaced by fractal warp noise.
///
/// Progressive warping feeds each octave the already-warped position;
/// independent warping displaces the original position by the sum of all octaves.
struct DomainWarp<T> {
    base: T,
    warp_x: Vec<T>,
    warp_y: Vec<T>,
    octaves: Octaves,
    progressive: bool,
}

impl<T: NoiseFn<f64, 2>> NoiseFn<f64, 2> for DomainWarp<T> {
    fn get(&self, point: [f64; 2]) -> f64 {
        let origin = [
            point[0] * self.octaves.frequency,
            point[1] * self.octaves.frequency,
        ];
        let mut warped = origin;
        let mut offset = [0.0, 0.0];
        let mut amp = self.octaves.bounding * DOMAIN_WARP_AMP;
        let mut freq = 1.0;

        for (wx, wy) in self.warp_x.iter().zip(&self.warp_y) {
            let src = if self.progressive { warped } else { origin };
            let q = [src[0] * freq, src[1] * freq];
            let d = [wx.get(q) * amp, wy.get(q) * amp];
            if self.progressive {
                warped = [warped[0] + d[0], warped[1] + d[1]];
            } else {
                offset = [offset[0] + d[0], offset[1] + d[1]];
            }
            freq *= self.octaves.lacunarity;
            amp *= self.octaves.gain;
        }

        let p = if self.progressive {
            warped
        } else {
            [origin[0] + offset[0], origin[1] + offset[1]]
        };
        self.base.get(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::NoiseFieldSampler;

    fn hills() -> NoiseLayerParams {
        NoiseLayerParams::new(NoiseType::Perlin)
            .with_seed(42)
            .with_frequency(0.05)
            .with_fractal(FractalType::FBm, 4)
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let mut a = NoiseFieldSampler::new(CpuKernel::new());
        let mut b = NoiseFieldSampler::new(CpuKernel::new());
        let origin = Vec2::new(12.5, -30.0);

        let fa = a.sample(17, origin, Vec2::ZERO, 16.0, &[hills()]).unwrap();
        let fb = b.sample(17, origin, Vec2::ZERO, 16.0, &[hills()]).unwrap();
        let fa_again = a.sample(17, origin, Vec2::ZERO, 16.0, &[hills()]).unwrap();

        assert_eq!(fa, fb);
        assert_eq!(fa, fa_again);
    }

    #[test]
    fn test_empty_stack_is_flat() {
        let mut sampler = NoiseFieldSampler::new(CpuKernel::new());
        let field = sampler.sample(9, Vec2::ZERO, Vec2::ZERO, 8.0, &[]).unwrap();

        assert!(field.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_layers_sum_by_weight() {
        let mut sampler = NoiseFieldSampler::new(CpuKernel::new());
        let full = sampler
            .sample(9, Vec2::ZERO, Vec2::ZERO, 8.0, &[hills()])
            .unwrap();
        let halves = sampler
            .sample(
                9,
                Vec2::ZERO,
                Vec2::ZERO,
                8.0,
                &[hills().with_weight(0.5), hills().with_weight(0.5)],
            )
            .unwrap();

        for (a, b) in full.as_slice().iter().zip(halves.as_slice()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_layer_offset_shifts_domain() {
        let mut sampler = NoiseFieldSampler::new(CpuKernel::new());
        let shifted_origin = sampler
            .sample(5, Vec2::new(10.0, 0.0), Vec2::ZERO, 4.0, &[hills()])
            .unwrap();
        let shifted_layer = sampler
            .sample(
                5,
                Vec2::ZERO,
                Vec2::ZERO,
                4.0,
                &[hills().with_offset([10.0, 0.0])],
            )
            .unwrap();

        assert_eq!(shifted_origin, shifted_layer);
    }

    #[test]
    fn test_adjacent_patches_share_edge() {
        let mut sampler = NoiseFieldSampler::new(CpuKernel::new());
        let width = 65;
        let extent = 64.0;

        let left = sampler
            .sample(width, Vec2::ZERO, Vec2::ZERO, extent, &[hills()])
            .unwrap();
        let right = sampler
            .sample(width, Vec2::new(extent, 0.0), Vec2::ZERO, extent, &[hills()])
            .unwrap();

        for y in 0..width {
            assert_eq!(left.get(width - 1, y), right.get(0, y));
        }
    }

    #[test]
    fn test_every_noise_and_fractal_is_finite() {
        let mut sampler = NoiseFieldSampler::new(CpuKernel::new());

        for noise_type in NoiseType::ALL {
            for fractal_type in FractalType::ALL {
                let layer = NoiseLayerParams::new(noise_type)
                    .with_frequency(0.1)
                    .with_fractal(fractal_type, 3);
                let field = sampler
                    .sample(6, Vec2::new(3.0, 7.0), Vec2::ZERO, 5.0, &[layer])
                    .unwrap();

                assert!(
                    field.as_slice().iter().all(|v| v.is_finite()),
                    "{} / {} produced a non-finite sample",
                    noise_type,
                    fractal_type
                );
            }
        }
    }

    #[test]
    fn test_unknown_discriminants_fall_back() {
        let mut sampler = NoiseFieldSampler::new(CpuKernel::new());
        let known = NoiseLayerParams::new(NoiseType::OpenSimplex2).with_frequency(0.2);
        let unknown = NoiseLayerParams {
            noise_type: 99,
            fractal_type: -3,
            ..known
        };

        let a = sampler.sample(4, Vec2::ZERO, Vec2::ZERO, 3.0, &[known]).unwrap();
        let b = sampler.sample(4, Vec2::ZERO, Vec2::ZERO, 3.0, &[unknown]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_out_of_range_octaves_are_clamped() {
        let mut sampler = NoiseFieldSampler::new(CpuKernel::new());
        let one = hills().with_fractal(FractalType::FBm, 1);
        let zero = NoiseLayerParams { octaves: 0, ..one };

        let a = sampler.sample(6, Vec2::ZERO, Vec2::ZERO, 5.0, &[one]).unwrap();
        let b = sampler.sample(6, Vec2::ZERO, Vec2::ZERO, 5.0, &[zero]).unwrap();
        assert_eq!(a, b);
        assert!(b.as_slice().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_odd_workgroup_size_covers_grid() {
        let mut wide = NoiseFieldSampler::new(CpuKernel::with_workgroup_size([16, 4, 1]));
        let mut square = NoiseFieldSampler::new(CpuKernel::new());

        let a = wide.sample(11, Vec2::ZERO, Vec2::ZERO, 10.0, &[hills()]).unwrap();
        let b = square.sample(11, Vec2::ZERO, Vec2::ZERO, 10.0, &[hills()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_oversized_grid_fails_to_allocate() {
        let mut kernel = CpuKernel::new();
        assert!(matches!(
            kernel.create_layer_buffer(usize::MAX),
            Err(SamplerError::Allocation { .. })
        ));
        assert!(matches!(
            kernel.create_result_buffer(usize::MAX),
            Err(SamplerError::Allocation { .. })
        ));
    }
}
