use glam::Vec3;

use crate::{
  area::{voxel_area, AreaType, PolyFlags, NULL_AREA, WALKABLE_AREA},
  config::{NavMeshParameters, VoxelConfig},
  tile_layer::{TileLayer, TileLayerHeader, EMPTY_HEIGHT},
  util::BoundingBox,
};

use super::build_tile_mesh;

/// Builds a layer from rows of cells: `#` is ground, `w` is water and `.` is
/// empty. Every pair of neighbouring filled cells is connected.
fn grid_layer(rows: &[&str]) -> TileLayer {
  let height = rows.len();
  let width = rows[0].len();
  let cell = |x: i32, z: i32| -> Option<u8> {
    if x < 0 || z < 0 || x >= width as i32 || z >= height as i32 {
      return None;
    }
    match rows[z as usize].as_bytes()[x as usize] {
      b'#' => Some(WALKABLE_AREA),
      b'w' => Some(voxel_area(AreaType::Water)),
      _ => None,
    }
  };

  let mut heights = Vec::new();
  let mut areas = Vec::new();
  let mut connections = Vec::new();
  let offsets = [(-1, 0), (0, 1), (1, 0), (0, -1)];
  for z in 0..height as i32 {
    for x in 0..width as i32 {
      let Some(area) = cell(x, z) else {
        heights.push(EMPTY_HEIGHT);
        areas.push(NULL_AREA);
        connections.push(0);
        continue;
      };
      heights.push(0);
      areas.push(area);
      let mut bits = 0;
      for (direction, (dx, dz)) in offsets.iter().enumerate() {
        if cell(x + dx, z + dz).is_some() {
          bits |= 1 << direction;
        }
      }
      connections.push(bits);
    }
  }

  TileLayer {
    header: TileLayerHeader {
      tile_x: 0,
      tile_z: 0,
      layer: 0,
      bmin: Vec3::new(0.0, 1.0, 0.0),
      bmax: Vec3::new(width as f32, 1.0, height as f32),
      hmin: 0,
      hmax: 0,
      width: width as u8,
      height: height as u8,
      min_x: 0,
      max_x: width as u8 - 1,
      min_z: 0,
      max_z: height as u8 - 1,
    },
    heights,
    areas,
    connections,
  }
}

fn config() -> VoxelConfig {
  let mut config = VoxelConfig::new(
    &NavMeshParameters::default(),
    BoundingBox::new_box(Vec3::ZERO, Vec3::ONE),
  )
  .expect("parameters are valid");
  config.cell_size = 1.0;
  config.cell_height = 0.5;
  config.walkable_climb = 2;
  config.max_edge_len = 0;
  config.min_region_area = 0;
  config.max_verts_per_poly = 6;
  config
}

fn polygon_points(
  mesh: &super::TileMesh,
  polygon: usize,
) -> Vec<Vec3> {
  mesh.polygons[polygon]
    .vertices
    .iter()
    .map(|&vertex| mesh.vertices[vertex])
    .collect()
}

#[test]
fn full_layer_is_one_polygon() {
  let layer = grid_layer(&["####", "####", "####", "####"]);
  let mesh = build_tile_mesh(&layer, &config());

  assert_eq!(mesh.polygons.len(), 1);
  assert_eq!(mesh.vertices.len(), 4);
  assert_eq!(
    polygon_points(&mesh, 0),
    [
      Vec3::new(0.0, 1.0, 0.0),
      Vec3::new(4.0, 1.0, 0.0),
      Vec3::new(4.0, 1.0, 4.0),
      Vec3::new(0.0, 1.0, 4.0),
    ]
  );
  assert_eq!(mesh.polygons[0].area, AreaType::Ground);
  assert_eq!(mesh.polygons[0].flags, PolyFlags::WALK);
}

#[test]
fn edges_are_limited_in_length() {
  let layer = grid_layer(&["####", "####", "####", "####"]);
  let mut config = config();
  config.max_edge_len = 2;
  let mesh = build_tile_mesh(&layer, &config);

  assert_eq!(mesh.polygons.len(), 4);
  // Corners are shared between neighbouring polygons.
  assert_eq!(mesh.vertices.len(), 9);
}

#[test]
fn areas_are_split_into_polygons() {
  let layer = grid_layer(&["ww##", "ww##", "ww##", "ww##"]);
  let mesh = build_tile_mesh(&layer, &config());

  assert_eq!(mesh.polygons.len(), 2);
  assert_eq!(mesh.polygons[0].area, AreaType::Water);
  assert_eq!(mesh.polygons[0].flags, PolyFlags::SWIM);
  assert_eq!(mesh.polygons[1].area, AreaType::Ground);
  assert_eq!(
    polygon_points(&mesh, 1),
    [
      Vec3::new(2.0, 1.0, 0.0),
      Vec3::new(4.0, 1.0, 0.0),
      Vec3::new(4.0, 1.0, 4.0),
      Vec3::new(2.0, 1.0, 4.0),
    ]
  );
}

#[test]
fn empty_cells_split_polygons() {
  let layer = grid_layer(&["###", "#.#", "###"]);
  let mesh = build_tile_mesh(&layer, &config());

  // The top row, the two columns beside the hole and the cell below it.
  assert_eq!(mesh.polygons.len(), 4);
}

#[test]
fn small_inner_islands_are_removed() {
  let layer =
    grid_layer(&["#....", ".....", "..#..", ".....", "....."]);
  let mut config = config();
  config.min_region_area = 2;
  let mesh = build_tile_mesh(&layer, &config);

  // The corner cell touches the tile edge, so it may continue into the
  // neighbouring tile.
  assert_eq!(mesh.polygons.len(), 1);
  assert_eq!(
    polygon_points(&mesh, 0)[0],
    Vec3::new(0.0, 1.0, 0.0)
  );
}

#[test]
fn triangles_when_quads_are_not_allowed() {
  let layer = grid_layer(&["##", "##"]);
  let mut config = config();
  config.max_verts_per_poly = 3;
  let mesh = build_tile_mesh(&layer, &config);

  assert_eq!(mesh.polygons.len(), 2);
  assert!(mesh.polygons.iter().all(|polygon| polygon.vertices.len() == 3));
}

#[test]
fn steps_split_polygons() {
  let mut layer = grid_layer(&["####"]);
  layer.heights[2] = 5;
  layer.heights[3] = 5;
  let mesh = build_tile_mesh(&layer, &config());

  assert_eq!(mesh.polygons.len(), 2);
  assert_eq!(polygon_points(&mesh, 1)[0], Vec3::new(2.0, 3.5, 0.0));
}
