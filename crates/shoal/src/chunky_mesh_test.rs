use glam::{Vec2, Vec3};
use googletest::{expect_that, matchers::*};

use crate::{mesh_data::MeshData, test_util::floor_grid};

use super::{ChunkyTriMesh, TRIANGLES_PER_CHUNK};

fn grid_mesh() -> MeshData {
  // 20 * 20 quads = 800 triangles.
  let (vertices, triangles) = floor_grid(Vec3::ZERO, 20, 1.0);
  MeshData::from_raw_parts(vertices, triangles).expect("grid is valid")
}

#[googletest::test]
fn every_triangle_lands_in_exactly_one_chunk() {
  let mesh = grid_mesh();
  let chunky = ChunkyTriMesh::new(&mesh);

  expect_that!(chunky.chunks().len(), gt(1));
  for chunk in chunky.chunks() {
    expect_that!(chunk.triangles.len(), le(TRIANGLES_PER_CHUNK));
  }

  let mut all_triangles = chunky
    .chunks()
    .iter()
    .flat_map(|chunk| chunk.triangles.iter().copied())
    .collect::<Vec<_>>();
  all_triangles.sort();
  expect_that!(all_triangles, eq(&(0..800).collect::<Vec<_>>()));
}

#[test]
fn rect_query_finds_only_nearby_chunks() {
  let mesh = grid_mesh();
  let chunky = ChunkyTriMesh::new(&mesh);

  let chunks =
    chunky.chunks_overlapping_rect(Vec2::new(0.2, 0.2), Vec2::new(0.8, 0.8));
  assert!(!chunks.is_empty());
  assert!(chunks.len() < chunky.chunks().len());
  // The triangles of the first quad are in the result.
  assert!(chunks.iter().any(|chunk| chunk.triangles.contains(&0)));
  assert!(chunks.iter().any(|chunk| chunk.triangles.contains(&1)));

  assert!(chunky
    .chunks_overlapping_rect(Vec2::new(30.0, 30.0), Vec2::new(31.0, 31.0))
    .is_empty());
}

#[test]
fn segment_query_follows_the_segment() {
  let mesh = grid_mesh();
  let chunky = ChunkyTriMesh::new(&mesh);

  // A vertical segment only touches the chunks under it.
  let chunks = chunky.chunks_overlapping_segment(
    Vec3::new(0.5, 10.0, 0.5),
    Vec3::new(0.5, -10.0, 0.5),
  );
  assert!(chunks.iter().any(|chunk| chunk.triangles.contains(&0)));
  assert!(chunks.len() < chunky.chunks().len());

  // The grid splits into quadrants, and a line across the near half touches
  // two of them.
  assert_eq!(chunky.chunks().len(), 4);
  assert_eq!(
    chunky
      .chunks_overlapping_segment(
        Vec3::new(-1.0, 0.0, 5.0),
        Vec3::new(21.0, 0.0, 5.0)
      )
      .len(),
    2
  );
}
