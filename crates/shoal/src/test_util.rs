use glam::{Vec2, Vec3};

use crate::{
  area::{AreaType, PolyFlags},
  convex_volume::OffMeshConnection,
  mesh_data::MeshData,
  nav_mesh::{NavMesh, RefLayout},
  tile_mesh::{TileMesh, TilePolygon},
};

/// Builds an upward-facing square floor at height `y`, split into
/// `cells * cells` quads of `cell_size`, starting at `origin`.
pub(crate) fn floor_grid(
  origin: Vec3,
  cells: u32,
  cell_size: f32,
) -> (Vec<Vec3>, Vec<[u32; 3]>) {
  let mut vertices = Vec::new();
  let mut triangles = Vec::new();
  for i in 0..cells {
    for j in 0..cells {
      let corner =
        origin + Vec3::new(i as f32 * cell_size, 0.0, j as f32 * cell_size);
      let base = vertices.len() as u32;
      vertices.extend([
        corner,
        corner + Vec3::new(0.0, 0.0, cell_size),
        corner + Vec3::new(cell_size, 0.0, cell_size),
        corner + Vec3::new(cell_size, 0.0, 0.0),
      ]);
      triangles.push([base, base + 1, base + 2]);
      triangles.push([base, base + 2, base + 3]);
    }
  }
  (vertices, triangles)
}

/// A flat square floor `size` wide at height `y`, starting at the origin.
pub(crate) fn flat_floor(size: f32, y: f32) -> MeshData {
  let (vertices, triangles) = floor_grid(Vec3::new(0.0, y, 0.0), 1, size);
  MeshData::from_raw_parts(vertices, triangles).expect("floor is valid")
}

/// Two stacked floors of `size`, the upper one `gap` above the lower one.
pub(crate) fn two_storeys(size: f32, gap: f32) -> MeshData {
  storeys(2, size, gap)
}

/// `count` stacked floors of `size`, each `gap` above the one below.
pub(crate) fn storeys(count: u32, size: f32, gap: f32) -> MeshData {
  let mut vertices = Vec::new();
  let mut triangles = Vec::new();
  for storey in 0..count {
    let (storey_vertices, storey_triangles) =
      floor_grid(Vec3::new(0.0, storey as f32 * gap, 0.0), 1, size);
    let offset = vertices.len() as u32;
    vertices.extend(storey_vertices);
    triangles.extend(
      storey_triangles
        .into_iter()
        .map(|[a, b, c]| [a + offset, b + offset, c + offset]),
    );
  }
  MeshData::from_raw_parts(vertices, triangles).expect("floors are valid")
}

/// A tile mesh made of axis-aligned ground rectangles at height `y`. Each
/// rectangle is given by its (min, max) corners on the XZ plane.
pub(crate) fn rectangles_mesh(rectangles: &[(Vec2, Vec2)], y: f32) -> TileMesh {
  let mut mesh = TileMesh::default();
  for &(min, max) in rectangles {
    let base = mesh.vertices.len();
    mesh.vertices.extend([
      Vec3::new(min.x, y, min.y),
      Vec3::new(max.x, y, min.y),
      Vec3::new(max.x, y, max.y),
      Vec3::new(min.x, y, max.y),
    ]);
    mesh.polygons.push(TilePolygon {
      vertices: vec![base, base + 1, base + 2, base + 3],
      area: AreaType::Ground,
      flags: PolyFlags::WALK,
    });
  }
  mesh
}

/// A navigation mesh with a single 100x100 tile made of `rectangles`.
pub(crate) fn rectangles_nav_mesh(rectangles: &[(Vec2, Vec2)]) -> NavMesh {
  let mut nav_mesh = NavMesh::new(
    RefLayout::for_tile_count(1).expect("one tile fits"),
    Vec3::ZERO,
    /* tile_world_size= */ 100.0,
    /* walkable_climb= */ 0.5,
  );
  nav_mesh
    .add_tile(0, 0, 0, &rectangles_mesh(rectangles, 0.0))
    .expect("tile is valid");
  nav_mesh
}

/// A unit square at the origin and an island at (5, 0) to (6, 1), joined by
/// a one-way off-mesh connection from (0.9, 0, 0.5) to (5.1, 0, 0.5).
pub(crate) fn off_mesh_nav_mesh() -> NavMesh {
  let mut nav_mesh = NavMesh::new(
    RefLayout::for_tile_count(1).expect("one tile fits"),
    Vec3::ZERO,
    /* tile_world_size= */ 100.0,
    /* walkable_climb= */ 0.5,
  );
  nav_mesh.set_off_mesh_connections(&[OffMeshConnection::new(
    Vec3::new(0.9, 0.0, 0.5),
    Vec3::new(5.1, 0.0, 0.5),
    /* radius= */ 0.5,
    /* bidirectional= */ false,
  )]);
  nav_mesh
    .add_tile(
      0,
      0,
      0,
      &rectangles_mesh(
        &[
          (Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0)),
          (Vec2::new(5.0, 0.0), Vec2::new(6.0, 1.0)),
        ],
        0.0,
      ),
    )
    .expect("tile is valid");
  nav_mesh
}
