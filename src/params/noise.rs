//! Noise layer parameters shared between host and compute kernel.

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};

/// Base noise algorithm evaluated by a layer
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoiseType {
    #[default]
    OpenSimplex2 = 0,
    OpenSimplex2S = 1,
    Cellular = 2,
    Perlin = 3,
    ValueCubic = 4,
    Value = 5,
}

/// Fractal combination applied on top of the base noise
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FractalType {
    #[default]
    None = 0,
    FBm = 1,
    Ridged = 2,
    PingPong = 3,
    DomainWarpProgressive = 4,
    DomainWarpIndependent = 5,
}

impl NoiseType {
    pub const ALL: [NoiseType; 6] = [
        NoiseType::OpenSimplex2,
        NoiseType::OpenSimplex2S,
        NoiseType::Cellular,
        NoiseType::Perlin,
        NoiseType::ValueCubic,
        NoiseType::Value,
    ];

    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(raw).ok()?).copied()
    }

    fn name(self) -> &'static str {
        match self {
            NoiseType::OpenSimplex2 => "opensimplex2",
            NoiseType::OpenSimplex2S => "opensimplex2s",
            NoiseType::Cellular => "cellular",
            NoiseType::Perlin => "perlin",
            NoiseType::ValueCubic => "valuecubic",
            NoiseType::Value => "value",
        }
    }
}

impl FractalType {
    pub const ALL: [FractalType; 6] = [
        FractalType::None,
        FractalType::FBm,
        FractalType::Ridged,
        FractalType::PingPong,
        FractalType::DomainWarpProgressive,
        FractalType::DomainWarpIndependent,
    ];

    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(raw).ok()?).copied()
    }

    fn name(self) -> &'static str {
        match self {
            FractalType::None => "none",
            FractalType::FBm => "fbm",
            FractalType::Ridged => "ridged",
            FractalType::PingPong => "pingpong",
            FractalType::DomainWarpProgressive => "domainwarpprogressive",
            FractalType::DomainWarpIndependent => "domainwarpindependent",
        }
    }
}

impl fmt::Display for NoiseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for FractalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NoiseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| format!("Unknown noise type '{}'", s))
    }
}

impl FromStr for FractalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| format!("Unknown fractal type '{}'", s))
    }
}

/// One weighted noise contribution, laid out exactly as the compute kernel reads it.
///
/// 6 floats + 4 ints, 4-byte aligned, no padding. The field order is part of the
/// GPU contract (`struct NoiseLayer` in `noise_array.wgsl`); do not reorder.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct NoiseLayerParams {
    pub seed: i32,
    /// Contribution weight in [0, 1]
    pub weight: f32,
    /// Domain offset added to the sample position (world units)
    pub offset: [f32; 2],
    /// Raw `NoiseType` discriminant
    pub noise_type: i32,
    /// Spatial frequency (cycles per world unit)
    pub frequency: f32,
    /// Raw `FractalType` discriminant
    pub fractal_type: i32,
    /// Octave count in [1, 20]
    pub octaves: i32,
    pub lacunarity: f32,
    pub gain: f32,
}

/// Byte stride of one `NoiseLayerParams` element in the layer buffer
pub const NOISE_LAYER_STRIDE: usize =
    6 * std::mem::size_of::<f32>() + 4 * std::mem::size_of::<i32>();

const _: () = assert!(std::mem::size_of::<NoiseLayerParams>() == NOISE_LAYER_STRIDE);
const _: () = assert!(std::mem::align_of::<NoiseLayerParams>() == 4);

pub const MAX_OCTAVES: i32 = 20;

impl NoiseLayerParams {
    pub fn new(noise_type: NoiseType) -> Self {
        Self {
            noise_type: noise_type as i32,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: i32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_offset(mut self, offset: [f32; 2]) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_frequency(mut self, frequency: f32) -> Self {
        self.frequency = frequency.max(0.0);
        self
    }

    pub fn with_fractal(mut self, fractal_type: FractalType, octaves: i32) -> Self {
        self.fractal_type = fractal_type as i32;
        self.octaves = octaves.clamp(1, MAX_OCTAVES);
        self
    }

    pub fn with_lacunarity(mut self, lacunarity: f32) -> Self {
        self.lacunarity = lacunarity.max(0.0);
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain.max(0.0);
        self
    }

    /// Decoded noise type (`None` for an out-of-range discriminant)
    pub fn noise(&self) -> Option<NoiseType> {
        NoiseType::from_raw(self.noise_type)
    }

    /// Decoded fractal type (`None` for an out-of-range discriminant)
    pub fn fractal(&self) -> Option<FractalType> {
        FractalType::from_raw(self.fractal_type)
    }
}

impl Default for NoiseLayerParams {
    fn default() -> Self {
        Self {
            seed: 1337,
            weight: 1.0,
            offset: [0.0, 0.0],
            noise_type: NoiseType::OpenSimplex2 as i32,
            frequency: 0.01,
            fractal_type: FractalType::None as i32,
            octaves: 3,
            lacunarity: 2.0,
            gain: 0.5,
        }
    }
}
