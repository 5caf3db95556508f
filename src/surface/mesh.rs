//! Regular square grid mesh whose heights are rewritten every tick.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Above this vertex count indices switch to 32 bits
pub const MAX_U16_VERTICES: usize = 65000;

/// Vertex data for the surface mesh (position + normal + UV coordinates)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

const _: () = assert!(std::mem::size_of::<Vertex>() == 32);

impl Vertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Triangle list indices, 16-bit when the vertex count allows it
#[derive(Debug, Clone, PartialEq)]
pub enum MeshIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl MeshIndices {
    fn for_grid(edge_count: u32) -> Self {
        let row = edge_count + 1;
        let vertex_count = (row as usize) * (row as usize);
        let mut indices = Vec::with_capacity(edge_count as usize * edge_count as usize * 6);

        for y in 0..edge_count {
            for x in 0..edge_count {
                let v = x + y * row;
                indices.extend_from_slice(&[v, v + 1, v + row, v + 1, v + row + 1, v + row]);
            }
        }

        if vertex_count > MAX_U16_VERTICES {
            MeshIndices::U32(indices)
        } else {
            MeshIndices::U16(indices.into_iter().map(|i| i as u16).collect())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MeshIndices::U16(indices) => indices.len(),
            MeshIndices::U32(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> u32 {
        match self {
            MeshIndices::U16(indices) => u32::from(indices[i]),
            MeshIndices::U32(indices) => indices[i],
        }
    }

    pub fn format(&self) -> wgpu::IndexFormat {
        match self {
            MeshIndices::U16(_) => wgpu::IndexFormat::Uint16,
            MeshIndices::U32(_) => wgpu::IndexFormat::Uint32,
        }
    }

    /// Raw index data for upload to an index buffer
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MeshIndices::U16(indices) => bytemuck::cast_slice(indices),
            MeshIndices::U32(indices) => bytemuck::cast_slice(indices),
        }
    }

    /// Iterate triangles as vertex index triples
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        (0..self.len() / 3).map(move |t| {
            let i = t * 3;
            [self.get(i), self.get(i + 1), self.get(i + 2)]
        })
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(
            Aabb {
                min: Vec3::splat(f32::INFINITY),
                max: Vec3::splat(f32::NEG_INFINITY),
            },
            |aabb, p| Aabb {
                min: aabb.min.min(p),
                max: aabb.max.max(p),
            },
        )
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

struct MeshData {
    vertices: Vec<Vertex>,
    indices: MeshIndices,
    bounds: Aabb,
}

/// Grid of `edge_count` x `edge_count` cells in the XZ plane.
///
/// Vertex `(x, y)` lives at index `x + y * (edge_count + 1)`. Topology, UVs
/// and index width are fixed at construction; only positions and normals
/// change afterwards.
pub struct GridSurfaceMesh {
    name: String,
    edge_count: u32,
    edge_size: f32,
    data: Option<MeshData>,
}

impl GridSurfaceMesh {
    pub fn new(edge_count: u32, edge_size: f32) -> Self {
        Self::with_name("New Mesh", edge_count, edge_size)
    }

    pub fn with_name(name: impl Into<String>, edge_count: u32, edge_size: f32) -> Self {
        assert!(edge_count >= 1, "grid mesh needs at least one cell per side");
        assert!(edge_size > 0.0, "grid cell size must be positive");

        let row = edge_count + 1;
        let mut vertices = Vec::with_capacity(row as usize * row as usize);

        // Flat XZ plane, UVs never change after this
        for y in 0..row {
            for x in 0..row {
                vertices.push(Vertex {
                    position: [x as f32 * edge_size, 0.0, y as f32 * edge_size],
                    normal: [0.0, 1.0, 0.0],
                    uv: [x as f32 / edge_count as f32, y as f32 / edge_count as f32],
                });
            }
        }

        let bounds = Aabb::from_points(vertices.iter().map(|v| Vec3::from_array(v.position)));
        let name = name.into();
        log::debug!(
            "Created mesh '{}' with {} vertices ({}x{} cells)",
            name,
            vertices.len(),
            edge_count,
            edge_count
        );

        Self {
            name,
            edge_count,
            edge_size,
            data: Some(MeshData {
                vertices,
                indices: MeshIndices::for_grid(edge_count),
                bounds,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn edge_count(&self) -> u32 {
        self.edge_count
    }

    pub fn edge_size(&self) -> f32 {
        self.edge_size
    }

    /// Vertices per grid side
    pub fn row_len(&self) -> u32 {
        self.edge_count + 1
    }

    /// Change the cell size, rescaling X and Z in place
    pub fn set_edge_size(&mut self, edge_size: f32) {
        if edge_size <= 0.0 {
            log::warn!("Ignoring non-positive edge size {} for '{}'", edge_size, self.name);
            return;
        }
        if edge_size == self.edge_size {
            return;
        }
        self.edge_size = edge_size;

        let row = self.row_len() as usize;
        if let Some(data) = &mut self.data {
            for (i, vertex) in data.vertices.iter_mut().enumerate() {
                vertex.position[0] = (i % row) as f32 * edge_size;
                vertex.position[2] = (i / row) as f32 * edge_size;
            }
        }
    }

    /// Rewrite every vertex as `(x * edge_size, height(x, y), y * edge_size)`.
    ///
    /// `height` is called exactly once per grid coordinate. Normals and bounds
    /// are left untouched; see `recalculate_normals` and `recalculate_bounds`.
    pub fn set_heights<F>(&mut self, height: F)
    where
        F: Fn(u32, u32) -> f32,
    {
        let row = self.row_len();
        let edge_size = self.edge_size;
        let Some(data) = &mut self.data else {
            log::warn!("set_heights on released mesh '{}'", self.name);
            return;
        };

        for y in 0..row {
            for x in 0..row {
                data.vertices[(x + y * row) as usize].position =
                    [x as f32 * edge_size, height(x, y), y as f32 * edge_size];
            }
        }
    }

    /// Area-weighted vertex normals. Triangles wind clockwise seen from +Y,
    /// so the face normal is `(c - a) x (b - a)`.
    pub fn recalculate_normals(&mut self) {
        let Some(data) = &mut self.data else {
            log::warn!("recalculate_normals on released mesh '{}'", self.name);
            return;
        };

        let mut normals = vec![Vec3::ZERO; data.vertices.len()];
        for [a, b, c] in data.indices.triangles() {
            let pa = Vec3::from_array(data.vertices[a as usize].position);
            let pb = Vec3::from_array(data.vertices[b as usize].position);
            let pc = Vec3::from_array(data.vertices[c as usize].position);
            let face = (pc - pa).cross(pb - pa);

            normals[a as usize] += face;
            normals[b as usize] += face;
            normals[c as usize] += face;
        }

        for (vertex, normal) in data.vertices.iter_mut().zip(normals) {
            vertex.normal = normal.try_normalize().unwrap_or(Vec3::Y).to_array();
        }
    }

    pub fn recalculate_bounds(&mut self) {
        let Some(data) = &mut self.data else {
            log::warn!("recalculate_bounds on released mesh '{}'", self.name);
            return;
        };
        data.bounds = Aabb::from_points(data.vertices.iter().map(|v| Vec3::from_array(v.position)));
    }

    /// Index width chosen at construction
    pub fn index_format(&self) -> wgpu::IndexFormat {
        if (self.row_len() as usize).pow(2) > MAX_U16_VERTICES {
            wgpu::IndexFormat::Uint32
        } else {
            wgpu::IndexFormat::Uint16
        }
    }

    /// Vertex data (empty once released)
    pub fn vertices(&self) -> &[Vertex] {
        self.data
            .as_ref()
            .map_or(&[][..], |data| data.vertices.as_slice())
    }

    pub fn indices(&self) -> Option<&MeshIndices> {
        self.data.as_ref().map(|data| &data.indices)
    }

    /// Bounds as of the last `recalculate_bounds`
    pub fn bounds(&self) -> Option<Aabb> {
        self.data.as_ref().map(|data| data.bounds)
    }

    pub fn vertex(&self, x: u32, y: u32) -> Option<&Vertex> {
        self.vertices().get((x + y * self.row_len()) as usize)
    }

    /// Free the mesh data. Safe to call any number of times.
    pub fn release(&mut self) {
        if self.data.take().is_some() {
            log::debug!("Released mesh '{}'", self.name);
        }
    }

    pub fn is_released(&self) -> bool {
        self.data.is_none()
    }
}

impl Drop for GridSurfaceMesh {
    fn drop(&mut self) {
        self.release();
    }
}
