//! Headless preview renderer: draws submitted patch meshes offscreen and saves PNG screenshots.

use std::path::Path;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::params::RenderConfig;
use crate::sampler::GpuContext;
use crate::surface::{Aabb, GridSurfaceMesh, MeshSink, Vertex};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const SKY_COLOR: wgpu::Color = wgpu::Color {
    r: 0.55,
    g: 0.70,
    b: 0.90,
    a: 1.0,
};

/// Errors from the preview capture path
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Nothing has been drawn yet")]
    NothingDrawn,

    #[error("Frame read-back failed: {0}")]
    Readback(String),

    #[error("Failed to save screenshot: {0}")]
    Image(#[from] image::ImageError),
}

/// Uniform buffer for the preview shader
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PreviewUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub light_dir: [f32; 4],
    /// x = min height, y = max height
    pub height_range: [f32; 4],
}

/// Camera looking down at a patch from its -X/-Z corner, framing the whole mesh
pub fn preview_camera(bounds: &Aabb, transform: Mat4, config: &RenderConfig) -> Mat4 {
    let target = transform.transform_point3(bounds.center());
    let size = bounds.size();
    let reach = size.x.max(size.z) * 0.75;
    let eye = target + Vec3::new(-reach, config.camera_height_m + size.y * 0.5, -reach);

    let view = Mat4::look_at_rh(eye, target, Vec3::Y);
    let proj = Mat4::perspective_rh(
        config.fov_degrees.to_radians(),
        config.aspect_ratio(),
        config.near_plane_m,
        config.far_plane_m,
    );
    proj * view
}

/// Strip the per-row padding wgpu requires for texture-to-buffer copies
fn unpad_rows(
    data: &[u8],
    unpadded_bytes_per_row: usize,
    padded_bytes_per_row: usize,
) -> Vec<u8> {
    data.chunks(padded_bytes_per_row)
        .flat_map(|row| &row[..unpadded_bytes_per_row])
        .copied()
        .collect()
}

/// Offscreen renderer implementing `MeshSink`
pub struct PreviewRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: RenderConfig,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    frames_drawn: usize,
}

impl PreviewRenderer {
    pub fn new(context: &GpuContext, config: RenderConfig) -> Self {
        let device = Arc::clone(&context.device);
        let size = wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        };

        let color_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Preview Color Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Preview Depth Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Preview Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let uniforms = PreviewUniforms {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            model: Mat4::IDENTITY.to_cols_array_2d(),
            light_dir: [0.0, -1.0, 0.0, 0.0],
            height_range: [0.0, 1.0, 0.0, 0.0],
        };

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Preview Uniform Buffer"),
            contents: bytemuck::cast_slice(&[uniforms]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Preview Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Preview Bind Group"),
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Preview Pipeline Layout"),
            bind_group_layouts: &[&uniform_bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Preview Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[Vertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                // Grid triangles wind clockwise seen from above
                front_face: wgpu::FrontFace::Cw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            device,
            queue: Arc::clone(&context.queue),
            config,
            pipeline,
            uniform_buffer,
            uniform_bind_group,
            color_texture,
            color_view,
            depth_view,
            frames_drawn: 0,
        }
    }

    pub fn frames_drawn(&self) -> usize {
        self.frames_drawn
    }

    /// Read the last drawn frame back and write it to `path` as PNG
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), RenderError> {
        if self.frames_drawn == 0 {
            return Err(RenderError::NothingDrawn);
        }

        let (width, height) = (self.config.width, self.config.height);
        let bytes_per_pixel = 4; // RGBA8
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Preview Capture Buffer"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Preview Capture Encoder"),
            });

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.color_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |status| {
            let _ = sender.send(status);
        });
        self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver)
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let image_data = {
            let data = buffer_slice.get_mapped_range();
            unpad_rows(
                &data,
                unpadded_bytes_per_row as usize,
                padded_bytes_per_row as usize,
            )
        };
        buffer.unmap();

        image::save_buffer(
            path.as_ref(),
            &image_data,
            width,
            height,
            image::ColorType::Rgba8,
        )?;
        log::info!("Saved preview to {}", path.as_ref().display());
        Ok(())
    }
}

impl MeshSink for PreviewRenderer {
    fn draw_mesh(&mut self, mesh: &GridSurfaceMesh, transform: Mat4) {
        let (Some(indices), Some(bounds)) = (mesh.indices(), mesh.bounds()) else {
            log::warn!("Skipping released mesh '{}'", mesh.name());
            return;
        };

        let light = Vec3::from_array(self.config.light_direction);
        let uniforms = PreviewUniforms {
            view_proj: preview_camera(&bounds, transform, &self.config).to_cols_array_2d(),
            model: transform.to_cols_array_2d(),
            light_dir: light.extend(0.0).to_array(),
            height_range: [bounds.min.y, bounds.max.y, 0.0, 0.0],
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Preview Vertex Buffer"),
                contents: bytemuck::cast_slice(mesh.vertices()),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Preview Index Buffer"),
                contents: indices.as_bytes(),
                usage: wgpu::BufferUsages::INDEX,
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Preview Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Preview Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(SKY_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            render_pass.set_index_buffer(index_buffer.slice(..), mesh.index_format());
            render_pass.draw_indexed(0..indices.len() as u32, 0, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.frames_drawn += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_uniforms_layout() {
        // Two mat4 + two vec4, no padding
        assert_eq!(std::mem::size_of::<PreviewUniforms>(), 160);
    }

    #[test]
    fn test_preview_shader_validates() {
        let source = include_str!("shader.wgsl");
        let module = naga::front::wgsl::parse_str(source)
            .unwrap_or_else(|e| panic!("{}", e.emit_to_string(source)));

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        );
        assert!(validator.validate(&module).is_ok());
        assert!(module.entry_points.iter().any(|ep| ep.name == "vs_main"));
        assert!(module.entry_points.iter().any(|ep| ep.name == "fs_main"));
    }

    #[test]
    fn test_camera_centres_patch() {
        let bounds = Aabb {
            min: Vec3::new(0.0, -10.0, 0.0),
            max: Vec3::new(64.0, 30.0, 64.0),
        };
        let transform = Mat4::from_translation(Vec3::new(500.0, 0.0, -200.0));
        let view_proj = preview_camera(&bounds, transform, &RenderConfig::default());

        let centre = transform.transform_point3(bounds.center());
        let ndc = view_proj.project_point3(centre);
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "{:?}", ndc);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_unpad_rows() {
        // 2 rows of 3 bytes padded to 8
        let data = [1, 2, 3, 0, 0, 0, 0, 0, 4, 5, 6, 0, 0, 0, 0, 0];
        assert_eq!(unpad_rows(&data, 3, 8), vec![1, 2, 3, 4, 5, 6]);
    }
}
