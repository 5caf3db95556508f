//! Terrain surface: grid mesh plus the patch controller that feeds it.

mod mesh;
mod patch;

pub use mesh::{Aabb, GridSurfaceMesh, MeshIndices, Vertex, MAX_U16_VERTICES};
pub use patch::{MeshSink, SurfacePatch};
