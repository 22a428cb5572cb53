use glam::Vec3;

use crate::{
  build_context::BuildContext,
  config::{NavMeshParameters, VoxelConfig},
  convex_volume::ConvexVolumes,
  input_geometry::InputGeometry,
  nav_mesh::{NavMesh, RefLayout},
  rasterizer::TileRasterizer,
  test_util::flat_floor,
  tile_layer::TileLayer,
};

use super::{ObstacleShape, ObstacleState, TileCache, TileCacheError};

/// A 16x16 floor split into 2x2 tiles of 8 units, cached and built.
fn built_cache(max_obstacles: usize) -> (TileCache, NavMesh) {
  let parameters = NavMeshParameters {
    cell_size: 0.5,
    cell_height: 0.25,
    max_agent_height: 2.0,
    max_agent_climb: 0.5,
    max_agent_radius: 0.5,
    tile_size: 16,
    ..Default::default()
  };
  let geometry = InputGeometry::new(flat_floor(16.0, 0.0));
  let config =
    VoxelConfig::new(&parameters, geometry.bounds()).expect("parameters are valid");
  let volumes = ConvexVolumes::new();
  let rasterizer =
    TileRasterizer { geometry: &geometry, volumes: &volumes, config: &config };

  let mut context = BuildContext::without_timing();
  let mut cache = TileCache::new(config.clone(), /* carve_margin= */ 0.5, max_obstacles);
  let mut nav_mesh = NavMesh::new(
    RefLayout::for_tile_count(16).expect("fits"),
    config.bmin,
    config.tile_world_size(),
    parameters.max_agent_climb,
  );
  let (tiles_x, tiles_z) = config.tile_counts();
  for z in 0..tiles_z {
    for x in 0..tiles_x {
      for layer in rasterizer.rasterize_tile(x, z, &mut context) {
        cache.add_tile_layer(&layer, &mut context).expect("layer is new");
      }
      cache.build_tiles_at(x, z, &mut nav_mesh, &mut context).expect("tile builds");
    }
  }
  (cache, nav_mesh)
}

fn on_mesh(nav_mesh: &NavMesh, x: f32, z: f32) -> bool {
  nav_mesh
    .find_nearest_poly(Vec3::new(x, 0.0, z), Vec3::new(0.1, 1.0, 0.1), None)
    .is_some()
}

fn cylinder(x: f32, z: f32) -> ObstacleShape {
  ObstacleShape::Cylinder {
    position: Vec3::new(x, 0.0, z),
    radius: 1.0,
    height: 2.0,
  }
}

#[test]
fn cached_layers_are_unique() {
  let (mut cache, nav_mesh) = built_cache(4);
  assert_eq!(cache.layer_count(), 4);
  assert_eq!(nav_mesh.tile_count(), 4);
  assert_eq!(cache.layers_at(1, 0), [0]);

  let data = cache.encoded_layers().next().expect("has layers").to_vec();
  assert!(matches!(
    cache.add_layer(data),
    Err(TileCacheError::LayerExists { x: 0, z: 0, layer: 0 })
  ));

  assert!(cache.remove_layer(0, 0, 0).is_some());
  assert!(cache.layers_at(0, 0).is_empty());
  assert!(cache.remove_layer(0, 0, 0).is_none());
}

#[test]
fn layers_past_the_column_limit_are_refused() {
  let (mut cache, _) = built_cache(4);
  let data = cache.remove_layer(1, 1, 0).expect("layer is cached");
  let mut layer = TileLayer::decode(&data).expect("layer decodes");
  layer.header.layer = cache.config().max_layers as u8;

  assert!(matches!(
    cache.add_layer(layer.encode()),
    Err(TileCacheError::LayerOutOfRange { layer: 4, max_layers: 4 })
  ));
  assert!(cache.layers_at(1, 1).is_empty());
}

#[test]
fn obstacle_is_carved_then_removed() {
  let (mut cache, mut nav_mesh) = built_cache(4);
  let mut context = BuildContext::without_timing();
  assert!(on_mesh(&nav_mesh, 4.0, 4.0));

  let obstacle = cache.add_obstacle(cylinder(4.0, 4.0)).expect("room for obstacle");
  assert_eq!(cache.obstacle_state(obstacle), Some(ObstacleState::Processing));
  assert!(!cache.is_up_to_date());

  assert!(cache.update(&mut nav_mesh, &mut context));
  assert_eq!(cache.obstacle_state(obstacle), Some(ObstacleState::Processed));
  assert!(!on_mesh(&nav_mesh, 4.0, 4.0));
  assert!(on_mesh(&nav_mesh, 4.0, 6.5));

  cache.remove_obstacle(obstacle).expect("obstacle exists");
  assert!(cache.update(&mut nav_mesh, &mut context));
  assert_eq!(cache.obstacle_state(obstacle), None);
  assert_eq!(cache.obstacle_count(), 0);
  assert!(on_mesh(&nav_mesh, 4.0, 4.0));
}

#[test]
fn rebuilds_one_tile_column_per_update() {
  let (mut cache, mut nav_mesh) = built_cache(4);
  let mut context = BuildContext::without_timing();

  let obstacle = cache.add_obstacle(cylinder(8.0, 8.0)).expect("room for obstacle");
  for _ in 0..3 {
    assert!(!cache.update(&mut nav_mesh, &mut context));
    assert_eq!(cache.obstacle_state(obstacle), Some(ObstacleState::Processing));
  }
  assert!(cache.update(&mut nav_mesh, &mut context));
  assert_eq!(cache.obstacle_state(obstacle), Some(ObstacleState::Processed));
  assert_eq!(nav_mesh.tile_count(), 4);
  for (x, z) in [(7.6, 7.6), (8.4, 7.6), (7.6, 8.4), (8.4, 8.4)] {
    assert!(!on_mesh(&nav_mesh, x, z));
  }
}

#[test]
fn removal_waits_for_the_tiles() {
  let (mut cache, mut nav_mesh) = built_cache(4);
  let mut context = BuildContext::without_timing();
  let obstacle = cache.add_obstacle(cylinder(8.0, 8.0)).expect("room for obstacle");
  while !cache.update(&mut nav_mesh, &mut context) {}

  cache.remove_obstacle(obstacle).expect("obstacle exists");
  // A second request before the first is handled is ignored.
  cache.remove_obstacle(obstacle).expect("removal is not handled yet");
  assert!(!cache.update(&mut nav_mesh, &mut context));
  assert_eq!(cache.obstacle_state(obstacle), Some(ObstacleState::Removing));
  assert!(matches!(
    cache.remove_obstacle(obstacle),
    Err(TileCacheError::UnknownObstacle)
  ));
  while !cache.update(&mut nav_mesh, &mut context) {}
  assert_eq!(cache.obstacle_state(obstacle), None);
  assert!(on_mesh(&nav_mesh, 8.4, 8.4));
}

#[test]
fn obstacle_count_is_limited() {
  let (mut cache, _) = built_cache(1);
  cache.add_obstacle(cylinder(4.0, 4.0)).expect("room for obstacle");
  assert!(matches!(
    cache.add_obstacle(cylinder(12.0, 12.0)),
    Err(TileCacheError::TooManyObstacles(1))
  ));
}

#[test]
fn rotated_box_is_carved() {
  let (mut cache, mut nav_mesh) = built_cache(4);
  let mut context = BuildContext::without_timing();
  cache
    .add_obstacle(ObstacleShape::Box {
      center: Vec3::new(4.0, 1.0, 4.0),
      half_extents: Vec3::new(2.0, 1.0, 0.25),
      rotation: std::f32::consts::FRAC_PI_2,
    })
    .expect("room for obstacle");
  while !cache.update(&mut nav_mesh, &mut context) {}

  // Rotated a quarter turn, the long side runs along Z.
  assert!(!on_mesh(&nav_mesh, 4.0, 5.9));
  assert!(on_mesh(&nav_mesh, 5.9, 4.0));
}
