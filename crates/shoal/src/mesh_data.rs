use glam::{Affine3A, Vec3};
use log::{debug, warn};
use thiserror::Error;

use crate::util::BoundingBox;

/// How the vertices (or indices) of a [`Surface`] are assembled into
/// primitives. Only [`PrimitiveType::Triangles`] contributes to navigation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveType {
  Points,
  Lines,
  LineStrip,
  Triangles,
  TriangleStrip,
}

/// One sub-surface of a mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct Surface {
  pub primitive: PrimitiveType,
  /// The vertices of the surface in mesh-local space.
  pub vertices: Vec<Vec3>,
  /// The triangle indices into `vertices`. When `None`, every three
  /// consecutive vertices form a triangle.
  pub indices: Option<Vec<u32>>,
}

/// Something that can provide triangle geometry for navigation, such as a
/// mesh extracted from a scene.
pub trait MeshSource {
  /// The surfaces making up the mesh.
  fn surfaces(&self) -> &[Surface];

  /// The transform from mesh-local space to world space.
  fn transform(&self) -> Affine3A {
    Affine3A::IDENTITY
  }
}

/// A plain [`MeshSource`] holding its surfaces directly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceMesh {
  pub surfaces: Vec<Surface>,
  pub transform: Affine3A,
}

impl SourceMesh {
  /// Creates a mesh made of a single indexed triangle surface.
  pub fn from_triangles(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
    Self {
      surfaces: vec![Surface {
        primitive: PrimitiveType::Triangles,
        vertices,
        indices: Some(indices),
      }],
      transform: Affine3A::IDENTITY,
    }
  }
}

impl MeshSource for SourceMesh {
  fn surfaces(&self) -> &[Surface] {
    &self.surfaces
  }

  fn transform(&self) -> Affine3A {
    self.transform
  }
}

/// An error while collecting geometry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
  #[error("The mesh does not contain any triangles.")]
  NoTriangles,
  #[error("Triangle {triangle} references vertex {vertex}, but there are only {vertex_count} vertices.")]
  IndexOutOfRange { triangle: usize, vertex: u32, vertex_count: usize },
  #[error("Expected one normal per triangle ({triangles}), got {normals}.")]
  NormalCountMismatch { triangles: usize, normals: usize },
}

/// Flat world-space triangle data, accumulated from one or more mesh
/// surfaces.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
  pub(crate) vertices: Vec<Vec3>,
  pub(crate) triangles: Vec<[u32; 3]>,
  /// One unit normal per triangle.
  pub(crate) normals: Vec<Vec3>,
  pub(crate) bounds: BoundingBox,
}

impl MeshData {
  /// Collects every triangle surface of `source` into world space. Surfaces
  /// that are not triangles, or whose indices are malformed, are skipped.
  pub fn accumulate(source: &impl MeshSource) -> Result<Self, GeometryError> {
    let transform = source.transform();
    let mut vertices = Vec::new();
    let mut triangles = Vec::new();

    for (surface_index, surface) in source.surfaces().iter().enumerate() {
      if surface.primitive != PrimitiveType::Triangles {
        warn!(
          "Surface {} is {:?}, not triangles. Skipping.",
          surface_index, surface.primitive
        );
        continue;
      }
      if surface.vertices.is_empty() {
        warn!("Surface {} has no vertices. Skipping.", surface_index);
        continue;
      }

      let vertex_count = surface.vertices.len();
      let sequential;
      let indices = match &surface.indices {
        Some(indices) if !indices.is_empty() => indices.as_slice(),
        _ => {
          if vertex_count % 3 != 0 {
            warn!(
              "Surface {} has no indices and {} vertices, which is not a multiple of 3. Skipping.",
              surface_index, vertex_count
            );
            continue;
          }
          sequential = (0..vertex_count as u32).collect::<Vec<_>>();
          sequential.as_slice()
        }
      };
      if indices.len() % 3 != 0 {
        warn!(
          "Surface {} has {} indices, which is not a multiple of 3. Skipping.",
          surface_index,
          indices.len()
        );
        continue;
      }
      if let Some(&bad) =
        indices.iter().find(|&&index| index as usize >= vertex_count)
      {
        warn!(
          "Surface {} references vertex {} of {}. Skipping.",
          surface_index, bad, vertex_count
        );
        continue;
      }

      let offset = vertices.len() as u32;
      vertices.extend(
        surface.vertices.iter().map(|&vertex| transform.transform_point3(vertex)),
      );
      triangles.extend(indices.chunks_exact(3).map(|triangle| {
        [triangle[0] + offset, triangle[1] + offset, triangle[2] + offset]
      }));
    }

    debug!(
      "Accumulated {} vertices and {} triangles.",
      vertices.len(),
      triangles.len()
    );
    Self::from_raw_parts(vertices, triangles)
  }

  /// Creates mesh data from world-space `vertices` and `triangles`,
  /// computing normals and bounds.
  pub fn from_raw_parts(
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
  ) -> Result<Self, GeometryError> {
    let normals = compute_normals(&vertices, &triangles)?;
    Self::from_parts_with_normals(vertices, triangles, normals)
  }

  pub(crate) fn from_parts_with_normals(
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    normals: Vec<Vec3>,
  ) -> Result<Self, GeometryError> {
    if triangles.is_empty() {
      return Err(GeometryError::NoTriangles);
    }
    validate_indices(&vertices, &triangles)?;
    if normals.len() != triangles.len() {
      return Err(GeometryError::NormalCountMismatch {
        triangles: triangles.len(),
        normals: normals.len(),
      });
    }

    let bounds = BoundingBox::from_points(vertices.iter().copied());
    Ok(Self { vertices, triangles, normals, bounds })
  }

  pub fn vertices(&self) -> &[Vec3] {
    &self.vertices
  }

  pub fn triangles(&self) -> &[[u32; 3]] {
    &self.triangles
  }

  pub fn normals(&self) -> &[Vec3] {
    &self.normals
  }

  pub fn bounds(&self) -> BoundingBox {
    self.bounds
  }

  /// The corners of triangle `index` in world space.
  pub(crate) fn triangle(&self, index: usize) -> (Vec3, Vec3, Vec3) {
    let [a, b, c] = self.triangles[index];
    (
      self.vertices[a as usize],
      self.vertices[b as usize],
      self.vertices[c as usize],
    )
  }
}

fn validate_indices(
  vertices: &[Vec3],
  triangles: &[[u32; 3]],
) -> Result<(), GeometryError> {
  for (triangle_index, triangle) in triangles.iter().enumerate() {
    for &vertex in triangle {
      if vertex as usize >= vertices.len() {
        return Err(GeometryError::IndexOutOfRange {
          triangle: triangle_index,
          vertex,
          vertex_count: vertices.len(),
        });
      }
    }
  }
  Ok(())
}

fn compute_normals(
  vertices: &[Vec3],
  triangles: &[[u32; 3]],
) -> Result<Vec<Vec3>, GeometryError> {
  validate_indices(vertices, triangles)?;
  Ok(
    triangles
      .iter()
      .map(|&[a, b, c]| {
        let (a, b, c) =
          (vertices[a as usize], vertices[b as usize], vertices[c as usize]);
        (b - a).cross(c - a).normalize_or_zero()
      })
      .collect(),
  )
}

#[cfg(test)]
#[path = "mesh_data_test.rs"]
mod test;
