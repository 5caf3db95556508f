//! Terrain patch that resamples its noise field around a moving world position.

use glam::{Mat4, Vec2, Vec3};

use super::mesh::GridSurfaceMesh;
use crate::params::PatchParams;
use crate::sampler::{HeightField, NoiseFieldSampler, NoiseKernel, SampleRequest, SamplerResult};

/// Receives the finished mesh once per tick
pub trait MeshSink {
    fn draw_mesh(&mut self, mesh: &GridSurfaceMesh, transform: Mat4);
}

/// Square terrain patch following a world transform.
///
/// Every tick the noise is sampled at the transform's XZ position, so moving
/// the transform scrolls the terrain under a fixed-topology mesh.
pub struct SurfacePatch {
    params: PatchParams,
    mesh: GridSurfaceMesh,
}

impl SurfacePatch {
    pub fn new(params: PatchParams) -> Self {
        let mesh = Self::build_mesh(&params);
        Self { params, mesh }
    }

    fn build_mesh(params: &PatchParams) -> GridSurfaceMesh {
        GridSurfaceMesh::with_name("Surface Patch", params.edge_count, params.edge_size_m)
    }

    pub fn params(&self) -> &PatchParams {
        &self.params
    }

    /// Mutable parameters; geometry changes apply on the next update
    pub fn params_mut(&mut self) -> &mut PatchParams {
        &mut self.params
    }

    pub fn mesh(&self) -> &GridSurfaceMesh {
        &self.mesh
    }

    /// Noise window for a patch whose corner sits at `world_pos`
    pub fn sample_window(&self, world_pos: Vec3) -> SampleRequest {
        SampleRequest {
            grid_width: self.params.grid_width(),
            noise_origin: Vec2::new(world_pos.x, world_pos.z),
            sample_origin: Vec2::ZERO,
            sample_extent: self.params.sample_width_m(),
            layers: self.params.layers.clone(),
        }
    }

    /// Resample the field at `world_pos` and rewrite the mesh heights
    pub fn update<K: NoiseKernel>(
        &mut self,
        world_pos: Vec3,
        sampler: &mut NoiseFieldSampler<K>,
    ) -> SamplerResult<HeightField> {
        if self.mesh.is_released() || self.mesh.edge_count() != self.params.edge_count {
            log::info!(
                "Rebuilding patch mesh: {} -> {} cells per edge",
                self.mesh.edge_count(),
                self.params.edge_count
            );
            self.mesh.release();
            self.mesh = Self::build_mesh(&self.params);
        }

        let field = sampler.sample_request(&self.sample_window(world_pos))?;

        let height_scale = self.params.height_scale_m;
        self.mesh.set_edge_size(self.params.edge_size_m);
        self.mesh.set_heights(|x, y| field.get(x, y) * height_scale);
        self.mesh.recalculate_normals();
        self.mesh.recalculate_bounds();

        Ok(field)
    }

    /// One frame: sample at the transform's translation, then hand the mesh to `sink`
    pub fn tick<K: NoiseKernel, S: MeshSink>(
        &mut self,
        transform: Mat4,
        sampler: &mut NoiseFieldSampler<K>,
        sink: &mut S,
    ) -> SamplerResult<HeightField> {
        let world_pos = transform.w_axis.truncate();
        let field = self.update(world_pos, sampler)?;
        sink.draw_mesh(&self.mesh, transform);
        Ok(field)
    }

    /// Free the mesh; the next update rebuilds it
    pub fn release(&mut self) {
        self.mesh.release();
    }
}
