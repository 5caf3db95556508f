//! wgpu compute backend for the noise-array kernel.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::error::{SamplerError, SamplerResult};
use super::kernel::{NoiseKernel, PatchUniforms, KERNEL_ENTRY_POINT};
use crate::params::{NoiseLayerParams, NOISE_LAYER_STRIDE};

/// WGSL source of the bundled noise-array kernel
pub const NOISE_ARRAY_WGSL: &str = include_str!("noise_array.wgsl");

/// Headless wgpu device shared by the sampler and the preview renderer
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    pub async fn new() -> SamplerResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(SamplerError::Adapter)?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Using adapter '{}' ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Noise Patch Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| SamplerError::Device(e.to_string()))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
        })
    }

    pub fn new_blocking() -> SamplerResult<Self> {
        pollster::block_on(Self::new())
    }
}

/// Parse `source` and return the workgroup size of its `CSNoiseArray` entry point
pub fn reflect_entry_point(source: &str) -> SamplerResult<[u32; 3]> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| SamplerError::ShaderParse(e.emit_to_string(source)))?;

    module
        .entry_points
        .iter()
        .find(|ep| ep.name == KERNEL_ENTRY_POINT && ep.stage == naga::ShaderStage::Compute)
        .map(|ep| ep.workgroup_size)
        .ok_or_else(|| SamplerError::KernelNotFound(KERNEL_ENTRY_POINT.to_string()))
}

/// Device buffer plus, for result buffers, the mappable copy used for read-back
pub struct GpuBuffer {
    storage: wgpu::Buffer,
    staging: Option<wgpu::Buffer>,
}

/// Runs `CSNoiseArray` through a wgpu compute pipeline
pub struct GpuKernel {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    workgroup_size: [u32; 3],
}

impl GpuKernel {
    /// Build the pipeline from the bundled kernel source
    pub fn new(context: &GpuContext) -> SamplerResult<Self> {
        Self::from_source(context, NOISE_ARRAY_WGSL)
    }

    /// Build the pipeline from custom WGSL. The source must export `CSNoiseArray`
    /// with the binding layout of `noise_array.wgsl`.
    pub fn from_source(context: &GpuContext, source: &str) -> SamplerResult<Self> {
        let workgroup_size = reflect_entry_point(source)?;
        let device = Arc::clone(&context.device);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Noise Array Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Noise Array Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Noise Array Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Noise Array Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(KERNEL_ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });

        log::debug!(
            "Noise kernel ready, workgroup size {}x{}x{}",
            workgroup_size[0],
            workgroup_size[1],
            workgroup_size[2]
        );

        Ok(Self {
            device,
            queue: Arc::clone(&context.queue),
            pipeline,
            bind_group_layout,
            workgroup_size,
        })
    }

    /// Create a buffer, failing instead of panicking when it exceeds device limits
    /// or the device runs out of memory.
    fn allocate(
        &self,
        label: &'static str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> SamplerResult<wgpu::Buffer> {
        let limits = self.device.limits();
        let over_binding_limit = usage.contains(wgpu::BufferUsages::STORAGE)
            && size > u64::from(limits.max_storage_buffer_binding_size);
        if size > limits.max_buffer_size || over_binding_limit {
            return Err(SamplerError::allocation(label, size));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("Allocating {} failed: {}", label, error);
            buffer.destroy();
            return Err(SamplerError::allocation(label, size));
        }

        Ok(buffer)
    }
}

impl NoiseKernel for GpuKernel {
    type Buffer = GpuBuffer;

    fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    fn create_layer_buffer(&mut self, count: usize) -> SamplerResult<GpuBuffer> {
        // Zero-sized storage bindings are invalid; an empty stack keeps one zeroed record
        let size = (count.max(1) as u64).saturating_mul(NOISE_LAYER_STRIDE as u64);
        let storage = self.allocate(
            "Noise Layer Buffer",
            size,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        )?;
        Ok(GpuBuffer {
            storage,
            staging: None,
        })
    }

    fn write_layers(&mut self, buffer: &mut GpuBuffer, layers: &[NoiseLayerParams]) {
        if !layers.is_empty() {
            self.queue
                .write_buffer(&buffer.storage, 0, bytemuck::cast_slice(layers));
        }
    }

    fn create_result_buffer(&mut self, len: usize) -> SamplerResult<GpuBuffer> {
        let size = (len as u64).saturating_mul(std::mem::size_of::<f32>() as u64);
        let storage = self.allocate(
            "Noise Result Buffer",
            size,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        )?;
        let staging = match self.allocate(
            "Noise Staging Buffer",
            size,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        ) {
            Ok(staging) => staging,
            Err(e) => {
                storage.destroy();
                return Err(e);
            }
        };
        Ok(GpuBuffer {
            storage,
            staging: Some(staging),
        })
    }

    fn dispatch(
        &mut self,
        layers: &GpuBuffer,
        result: &mut GpuBuffer,
        uniforms: &PatchUniforms,
        groups: [u32; 3],
    ) -> SamplerResult<()> {
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Patch Uniform Buffer"),
                contents: bytemuck::bytes_of(uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Noise Array Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: layers.storage.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: result.storage.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Noise Array Encoder"),
            });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Noise Array Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }

        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_result(&mut self, result: &GpuBuffer, out: &mut [f32]) -> SamplerResult<()> {
        let staging = result
            .staging
            .as_ref()
            .ok_or_else(|| SamplerError::Readback("buffer has no staging copy".to_string()))?;
        let size = (std::mem::size_of_val(out) as u64).min(staging.size());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Noise Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&result.storage, 0, staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging.slice(..size);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |status| {
            let _ = sender.send(status);
        });

        self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver)
            .map_err(|e| SamplerError::Readback(e.to_string()))?
            .map_err(|e| SamplerError::Readback(e.to_string()))?;

        {
            let data = buffer_slice.get_mapped_range();
            let values: &[f32] = bytemuck::cast_slice(&data);
            out[..values.len()].copy_from_slice(values);
        }
        staging.unmap();

        Ok(())
    }

    fn release_buffer(&mut self, buffer: GpuBuffer) {
        buffer.storage.destroy();
        if let Some(staging) = buffer.staging {
            staging.destroy();
        }
    }
}
