use glam::{Vec2, Vec3};

use crate::{
  chunky_mesh::ChunkyTriMesh,
  geometry::{intersect_segment_aabb, intersect_segment_triangle},
  mesh_data::{GeometryError, MeshData, MeshSource},
  util::BoundingBox,
};

/// The static world geometry that navigation meshes are built from. Once
/// created it is never modified, so it can be shared between every
/// navigation mesh and every agent.
pub struct InputGeometry {
  mesh: MeshData,
  chunky_mesh: ChunkyTriMesh,
}

impl InputGeometry {
  /// Collects the triangles of `source` and indexes them.
  pub fn from_source(source: &impl MeshSource) -> Result<Self, GeometryError> {
    MeshData::accumulate(source).map(Self::new)
  }

  pub fn new(mesh: MeshData) -> Self {
    let chunky_mesh = ChunkyTriMesh::new(&mesh);
    Self { mesh, chunky_mesh }
  }

  pub fn mesh(&self) -> &MeshData {
    &self.mesh
  }

  pub fn bounds(&self) -> BoundingBox {
    self.mesh.bounds
  }

  /// Collects the indices of triangles whose chunk overlaps the XZ rectangle.
  /// Triangles near the rectangle may also be included.
  pub(crate) fn triangles_in_rect(&self, min: Vec2, max: Vec2) -> Vec<usize> {
    self
      .chunky_mesh
      .chunks_overlapping_rect(min, max)
      .into_iter()
      .flat_map(|chunk| chunk.triangles.iter().copied())
      .collect()
  }

  /// Casts the segment from `start` to `end` against the front faces of the
  /// geometry. Returns the fraction along the segment of the nearest hit.
  pub fn raycast(&self, start: Vec3, end: Vec3) -> Option<f32> {
    let BoundingBox::Box { min, max } = self.mesh.bounds else {
      return None;
    };
    let (t_enter, t_exit) = intersect_segment_aabb(start, end, (min, max))?;
    // Only the part of the segment inside the mesh bounds can hit anything.
    let clipped_start = start.lerp(end, t_enter);
    let clipped_end = start.lerp(end, t_exit);

    let mut nearest: Option<f32> = None;
    for chunk in
      self.chunky_mesh.chunks_overlapping_segment(clipped_start, clipped_end)
    {
      for &triangle in chunk.triangles.iter() {
        let Some(t) =
          intersect_segment_triangle(start, end, self.mesh.triangle(triangle))
        else {
          continue;
        };
        if nearest.map_or(true, |nearest| t < nearest) {
          nearest = Some(t);
        }
      }
    }
    nearest
  }

  /// Drops `point` onto the geometry by casting a vertical segment from
  /// `height` above it to `height` below it.
  pub fn snap_to_surface(&self, point: Vec3, height: f32) -> Option<Vec3> {
    let start = point + Vec3::Y * height;
    let end = point - Vec3::Y * height;
    self.raycast(start, end).map(|t| start.lerp(end, t))
  }
}

#[cfg(test)]
#[path = "input_geometry_test.rs"]
mod test;
