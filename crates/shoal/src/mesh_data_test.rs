use glam::{Affine3A, Vec3};

use crate::util::BoundingBox;

use super::{GeometryError, MeshData, PrimitiveType, SourceMesh, Surface};

fn triangle_vertices() -> Vec<Vec3> {
  vec![
    Vec3::new(0.0, 0.0, 0.0),
    Vec3::new(0.0, 0.0, 1.0),
    Vec3::new(1.0, 0.0, 0.0),
  ]
}

#[test]
fn accumulates_indexed_surface() {
  let mesh = MeshData::accumulate(&SourceMesh::from_triangles(
    triangle_vertices(),
    vec![0, 1, 2],
  ))
  .expect("mesh has triangles");

  assert_eq!(mesh.vertices(), triangle_vertices().as_slice());
  assert_eq!(mesh.triangles(), &[[0, 1, 2]]);
  assert_eq!(mesh.normals(), &[Vec3::Y]);
  assert_eq!(
    mesh.bounds(),
    BoundingBox::new_box(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0))
  );
}

#[test]
fn missing_indices_are_sequential() {
  let source = SourceMesh {
    surfaces: vec![Surface {
      primitive: PrimitiveType::Triangles,
      vertices: triangle_vertices(),
      indices: None,
    }],
    transform: Affine3A::IDENTITY,
  };
  let mesh = MeshData::accumulate(&source).expect("mesh has triangles");
  assert_eq!(mesh.triangles(), &[[0, 1, 2]]);
}

#[test]
fn surfaces_are_concatenated_with_offset_indices() {
  let surface = Surface {
    primitive: PrimitiveType::Triangles,
    vertices: triangle_vertices(),
    indices: Some(vec![0, 1, 2]),
  };
  let source = SourceMesh {
    surfaces: vec![surface.clone(), surface],
    transform: Affine3A::from_translation(Vec3::new(0.0, 2.0, 0.0)),
  };
  let mesh = MeshData::accumulate(&source).expect("mesh has triangles");

  assert_eq!(mesh.triangles(), &[[0, 1, 2], [3, 4, 5]]);
  assert_eq!(mesh.vertices()[4], Vec3::new(0.0, 2.0, 1.0));
}

#[test]
fn skips_bad_surfaces() {
  let source = SourceMesh {
    surfaces: vec![
      Surface {
        primitive: PrimitiveType::Lines,
        vertices: triangle_vertices(),
        indices: None,
      },
      Surface {
        primitive: PrimitiveType::Triangles,
        vertices: triangle_vertices(),
        indices: Some(vec![0, 1]),
      },
      Surface {
        primitive: PrimitiveType::Triangles,
        vertices: triangle_vertices(),
        indices: Some(vec![0, 1, 7]),
      },
      Surface {
        primitive: PrimitiveType::Triangles,
        vertices: triangle_vertices(),
        indices: Some(vec![2, 1, 0]),
      },
    ],
    transform: Affine3A::IDENTITY,
  };
  let mesh = MeshData::accumulate(&source).expect("one surface is good");
  assert_eq!(mesh.triangles(), &[[2, 1, 0]]);
  assert_eq!(mesh.normals(), &[Vec3::NEG_Y]);
}

#[test]
fn no_triangles_is_an_error() {
  let source = SourceMesh {
    surfaces: vec![Surface {
      primitive: PrimitiveType::Points,
      vertices: triangle_vertices(),
      indices: None,
    }],
    transform: Affine3A::IDENTITY,
  };
  assert_eq!(MeshData::accumulate(&source), Err(GeometryError::NoTriangles));
  assert_eq!(
    MeshData::accumulate(&SourceMesh::default()),
    Err(GeometryError::NoTriangles)
  );
}

#[test]
fn raw_parts_validate_indices() {
  assert_eq!(
    MeshData::from_raw_parts(triangle_vertices(), vec![[0, 1, 3]]),
    Err(GeometryError::IndexOutOfRange {
      triangle: 0,
      vertex: 3,
      vertex_count: 3
    })
  );
}
