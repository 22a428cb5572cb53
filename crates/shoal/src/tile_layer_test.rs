use std::f32::consts::FRAC_PI_2;

use glam::Vec3;

use crate::area::{NULL_AREA, WALKABLE_AREA};

use super::{
  decode_header, TileLayer, TileLayerError, TileLayerHeader, EMPTY_HEIGHT,
};

fn square_layer() -> TileLayer {
  let mut heights = vec![0; 16];
  heights[15] = EMPTY_HEIGHT;
  let mut areas = vec![WALKABLE_AREA; 16];
  areas[15] = NULL_AREA;
  TileLayer {
    header: TileLayerHeader {
      tile_x: 3,
      tile_z: -2,
      layer: 1,
      bmin: Vec3::new(0.0, 0.0, 0.0),
      bmax: Vec3::new(4.0, 1.0, 4.0),
      hmin: 2,
      hmax: 2,
      width: 4,
      height: 4,
      min_x: 0,
      max_x: 3,
      min_z: 0,
      max_z: 3,
    },
    heights,
    areas,
    connections: vec![0b1111; 16],
  }
}

fn carved_cells(layer: &TileLayer) -> Vec<(i32, i32)> {
  let mut cells = Vec::new();
  for z in 0..4 {
    for x in 0..4 {
      let index = layer.cell_index(x, z).expect("in bounds");
      if layer.heights[index] != EMPTY_HEIGHT && layer.areas[index] == NULL_AREA
      {
        cells.push((x, z));
      }
    }
  }
  cells
}

#[test]
fn encoded_layer_decodes_to_same_layer() {
  let layer = square_layer();
  let data = layer.encode();

  assert_eq!(decode_header(&data).expect("valid header"), layer.header);
  assert_eq!(TileLayer::decode(&data).expect("valid layer"), layer);
}

#[test]
fn rejects_bad_data() {
  let mut data = square_layer().encode();

  assert!(matches!(
    TileLayer::decode(&data[..10]),
    Err(TileLayerError::Truncated)
  ));

  data[4] = 7;
  assert!(matches!(
    TileLayer::decode(&data),
    Err(TileLayerError::WrongVersion(7))
  ));

  data[0] = 0;
  assert!(matches!(
    TileLayer::decode(&data),
    Err(TileLayerError::WrongMagic(_))
  ));
}

#[test]
fn rejects_grid_of_wrong_size() {
  let mut layer = square_layer();
  layer.header.width = 5;
  let data = layer.encode();
  assert!(matches!(
    TileLayer::decode(&data),
    Err(TileLayerError::WrongGridSize { expected: 60, actual: 48 })
  ));
}

#[test]
fn cylinder_carves_cells_inside() {
  let mut layer = square_layer();
  assert!(layer.carve_cylinder(
    Vec3::new(2.0, 0.0, 2.0),
    /* radius= */ 1.0,
    /* height= */ 2.0,
    /* cell_size= */ 1.0,
    /* cell_height= */ 0.5,
  ));
  assert_eq!(carved_cells(&layer), [(1, 1), (2, 1), (1, 2), (2, 2)]);
}

#[test]
fn cylinder_above_floor_carves_nothing() {
  let mut layer = square_layer();
  assert!(!layer.carve_cylinder(
    Vec3::new(2.0, 5.0, 2.0),
    /* radius= */ 1.0,
    /* height= */ 2.0,
    /* cell_size= */ 1.0,
    /* cell_height= */ 0.5,
  ));
  assert!(carved_cells(&layer).is_empty());
}

#[test]
fn box_carving_follows_rotation() {
  let mut layer = square_layer();
  assert!(layer.carve_box(
    Vec3::new(2.0, 0.0, 2.0),
    Vec3::new(1.6, 1.0, 0.6),
    /* rotation= */ 0.0,
    /* cell_size= */ 1.0,
    /* cell_height= */ 0.5,
  ));
  assert_eq!(
    carved_cells(&layer),
    [(0, 1), (1, 1), (2, 1), (3, 1), (0, 2), (1, 2), (2, 2), (3, 2)]
  );

  let mut layer = square_layer();
  assert!(layer.carve_box(
    Vec3::new(2.0, 0.0, 2.0),
    Vec3::new(1.6, 1.0, 0.6),
    /* rotation= */ FRAC_PI_2,
    /* cell_size= */ 1.0,
    /* cell_height= */ 0.5,
  ));
  assert_eq!(
    carved_cells(&layer),
    [(1, 0), (2, 0), (1, 1), (2, 1), (1, 2), (2, 2), (1, 3), (2, 3)]
  );
}
