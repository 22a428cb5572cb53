use glam::Vec3;

use crate::util::BoundingBox;

use super::{ConfigError, NavMeshParameters, NavigationParameters, VoxelConfig};

fn parameters() -> NavMeshParameters {
  NavMeshParameters {
    cell_size: 0.5,
    cell_height: 0.25,
    max_agent_height: 2.0,
    max_agent_climb: 0.6,
    max_agent_radius: 0.6,
    max_edge_length: 12.0,
    tile_size: 16,
    detail_sample_distance: 6.0,
    detail_sample_max_error: 1.0,
    ..Default::default()
  }
}

#[test]
fn derives_voxel_units() {
  let config = VoxelConfig::new(
    &parameters(),
    BoundingBox::new_box(Vec3::ZERO, Vec3::new(20.0, 3.0, 9.0)),
  )
  .expect("parameters are valid");

  assert_eq!(config.walkable_height, 8);
  assert_eq!(config.walkable_climb, 2);
  assert_eq!(config.walkable_radius, 2);
  assert_eq!(config.border_size, 5);
  assert_eq!(config.width, 26);
  assert_eq!(config.height, 26);
  assert_eq!(config.max_edge_len, 24);
  assert_eq!(config.detail_sample_dist, 3.0);
  assert_eq!(config.detail_sample_max_error, 0.25);

  assert_eq!(config.grid_size(), (40, 18));
  assert_eq!(config.tile_counts(), (3, 2));
  assert_eq!(config.tile_world_size(), 8.0);
  assert_eq!(
    config.tile_bounds(1, 1),
    (Vec3::new(8.0, 0.0, 8.0), Vec3::new(16.0, 3.0, 16.0))
  );
}

#[test]
fn small_detail_distance_disables_detail() {
  let config = VoxelConfig::new(
    &NavMeshParameters { detail_sample_distance: 0.5, ..parameters() },
    BoundingBox::new_box(Vec3::ZERO, Vec3::ONE),
  )
  .expect("parameters are valid");
  assert_eq!(config.detail_sample_dist, 0.0);
}

#[test]
fn finds_overlapping_tiles() {
  let config = VoxelConfig::new(
    &parameters(),
    BoundingBox::new_box(Vec3::ZERO, Vec3::new(20.0, 3.0, 9.0)),
  )
  .expect("parameters are valid");

  assert_eq!(
    config.tiles_overlapping(Vec3::new(7.0, 0.0, 1.0), Vec3::new(9.0, 0.0, 2.0)),
    Some(((0, 0), (1, 0)))
  );
  assert_eq!(
    config
      .tiles_overlapping(Vec3::new(-5.0, 0.0, -5.0), Vec3::new(50.0, 0.0, 50.0)),
    Some(((0, 0), (2, 1)))
  );
  assert_eq!(
    config.tiles_overlapping(
      Vec3::new(30.0, 0.0, 1.0),
      Vec3::new(31.0, 0.0, 2.0)
    ),
    None
  );
}

#[test]
fn rejects_invalid_parameters() {
  let bounds = BoundingBox::new_box(Vec3::ZERO, Vec3::ONE);
  assert_eq!(
    VoxelConfig::new(&NavMeshParameters { cell_size: 0.0, ..parameters() }, bounds),
    Err(ConfigError::NotPositive("cell_size"))
  );
  assert_eq!(
    VoxelConfig::new(&NavMeshParameters { tile_size: 0, ..parameters() }, bounds),
    Err(ConfigError::InvalidTileSize(0))
  );
  assert_eq!(
    VoxelConfig::new(&NavMeshParameters { tile_size: 256, ..parameters() }, bounds),
    Err(ConfigError::InvalidTileSize(256))
  );
  assert_eq!(
    VoxelConfig::new(
      &NavMeshParameters { max_verts_per_poly: 7, ..parameters() },
      bounds
    ),
    Err(ConfigError::InvalidMaxVertsPerPoly(7))
  );
  assert_eq!(
    VoxelConfig::new(
      &NavMeshParameters { layers_per_tile: 0, ..parameters() },
      bounds
    ),
    Err(ConfigError::InvalidLayersPerTile(0))
  );
  assert_eq!(
    VoxelConfig::new(&parameters(), BoundingBox::Empty),
    Err(ConfigError::EmptyBounds)
  );
  assert_eq!(
    NavigationParameters { nav_meshes: vec![], ..Default::default() }
      .validate(),
    Err(ConfigError::NoNavMeshes)
  );
}
