use std::collections::BTreeSet;

use glam::Vec3;
use log::{debug, info, warn};
use slotmap::new_key_type;
use thiserror::Error;

use crate::{
  agent::CrowdAgentParameters,
  build_context::BuildContext,
  config::{ConfigError, NavMeshParameters, VoxelConfig},
  convex_volume::{ConvexVolumes, OffMeshConnection},
  crowd::{Crowd, CrowdAgentId, CrowdError},
  input_geometry::InputGeometry,
  nav_mesh::{NavMesh, NavMeshError, RefLayout},
  query_filter::QueryFilters,
  rasterizer::TileRasterizer,
  tile_cache::{ObstacleRef, ObstacleShape, TileCache, TileCacheError},
  util::BoundingBox,
};

/// The most times the tile cache is polled in a single tick.
pub(crate) const MAX_CACHE_UPDATE_ROUNDS: usize = 64;

new_key_type! {
  /// The id of one navigation mesh (one agent size class).
  pub struct NavMeshId;
}

/// An error while building a navigation mesh.
#[derive(Debug, Error)]
pub enum NavigationMeshError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  NavMesh(#[from] NavMeshError),
  #[error(transparent)]
  TileCache(#[from] TileCacheError),
}

/// Everything needed to move agents of one size class: the tile cache, the
/// navigation mesh built from it, and the crowd walking on it.
#[derive(Debug)]
pub(crate) struct NavigationMesh {
  pub(crate) parameters: NavMeshParameters,
  pub(crate) nav_mesh: NavMesh,
  pub(crate) tile_cache: TileCache,
  pub(crate) crowd: Crowd,
}

impl NavigationMesh {
  /// Creates an empty navigation mesh over the grid of `config`.
  fn empty(
    parameters: NavMeshParameters,
    config: VoxelConfig,
    off_mesh_connections: &[OffMeshConnection],
    max_obstacles: usize,
  ) -> Result<Self, NavigationMeshError> {
    parameters.validate()?;
    let (tiles_x, tiles_z) = config.tile_counts();
    let max_tiles =
      tiles_x as u32 * tiles_z as u32 * parameters.layers_per_tile;
    let layout = RefLayout::for_tile_count(max_tiles)?;

    let mut nav_mesh = NavMesh::new(
      layout,
      config.bmin,
      config.tile_world_size(),
      parameters.max_agent_climb,
    );
    nav_mesh.set_off_mesh_connections(off_mesh_connections);
    let tile_cache =
      TileCache::new(config, parameters.max_agent_radius, max_obstacles);
    let crowd = Crowd::new(
      parameters.max_agents as usize,
      parameters.max_query_nodes as usize,
    );
    Ok(Self { parameters, nav_mesh, tile_cache, crowd })
  }

  /// Rasterizes every tile of `geometry` and builds the navigation mesh from
  /// the resulting layers.
  pub(crate) fn initialize(
    geometry: &InputGeometry,
    volumes: &ConvexVolumes,
    off_mesh_connections: &[OffMeshConnection],
    parameters: NavMeshParameters,
    max_obstacles: usize,
  ) -> Result<Self, NavigationMeshError> {
    let config = VoxelConfig::new(&parameters, geometry.bounds())?;
    let mut navigation_mesh =
      Self::empty(parameters, config, off_mesh_connections, max_obstacles)?;

    let mut context = BuildContext::new();
    let config = navigation_mesh.tile_cache.config().clone();
    let rasterizer = TileRasterizer { geometry, volumes, config: &config };
    let (tiles_x, tiles_z) = config.tile_counts();
    for z in 0..tiles_z {
      for x in 0..tiles_x {
        for layer in rasterizer.rasterize_tile(x, z, &mut context) {
          if let Err(err) =
            navigation_mesh.tile_cache.add_tile_layer(&layer, &mut context)
          {
            context.log_error(format!(
              "Failed to cache a layer of tile ({}, {}): {}",
              x, z, err
            ));
          }
        }
      }
    }
    navigation_mesh.build_all_tiles(&mut context);

    info!(
      "Built a navigation mesh for radius {} height {}: {} tiles from {} layers.",
      navigation_mesh.parameters.max_agent_radius,
      navigation_mesh.parameters.max_agent_height,
      navigation_mesh.nav_mesh.tile_count(),
      navigation_mesh.tile_cache.layer_count()
    );
    context.log_timings();
    Ok(navigation_mesh)
  }

  /// Recreates a navigation mesh from previously cached layers.
  pub(crate) fn from_layers(
    parameters: NavMeshParameters,
    config: VoxelConfig,
    layers: Vec<Vec<u8>>,
    off_mesh_connections: &[OffMeshConnection],
    max_obstacles: usize,
  ) -> Result<Self, NavigationMeshError> {
    let mut navigation_mesh =
      Self::empty(parameters, config, off_mesh_connections, max_obstacles)?;
    for layer in layers {
      navigation_mesh.tile_cache.add_layer(layer)?;
    }
    navigation_mesh.build_all_tiles(&mut BuildContext::without_timing());
    Ok(navigation_mesh)
  }

  /// Builds the navigation mesh tiles of every column in the tile cache.
  fn build_all_tiles(&mut self, context: &mut BuildContext) {
    let (tiles_x, tiles_z) = self.tile_cache.config().tile_counts();
    for z in 0..tiles_z {
      for x in 0..tiles_x {
        if let Err(err) =
          self.tile_cache.build_tiles_at(x, z, &mut self.nav_mesh, context)
        {
          context.log_error(format!(
            "Failed to build tile ({}, {}): {}",
            x, z, err
          ));
        }
      }
    }
  }

  pub(crate) fn config(&self) -> &VoxelConfig {
    self.tile_cache.config()
  }

  pub(crate) fn set_off_mesh_connections(
    &mut self,
    connections: &[OffMeshConnection],
  ) {
    self.nav_mesh.set_off_mesh_connections(connections);
  }

  /// Applies pending obstacle changes and, once every tile is up to date,
  /// advances the crowd by `delta_time`.
  pub(crate) fn update(&mut self, delta_time: f32, filters: &QueryFilters) {
    let mut context = BuildContext::without_timing();
    let mut up_to_date = false;
    for _ in 0..MAX_CACHE_UPDATE_ROUNDS {
      if self.tile_cache.update(&mut self.nav_mesh, &mut context) {
        up_to_date = true;
        break;
      }
    }
    if !up_to_date {
      debug!(
        "Obstacle changes are still being applied. Skipping the crowd update."
      );
      return;
    }
    self.crowd.update(delta_time, &self.nav_mesh, filters);
  }

  /// Re-rasterizes the layers touched by `changes` and rebuilds their tiles.
  /// Navigation mesh tiles of layers no change reaches keep their polygon
  /// references. Returns how many tile columns were rebuilt.
  pub(crate) fn rebuild_changed_tiles(
    &mut self,
    geometry: &InputGeometry,
    volumes: &ConvexVolumes,
    changes: &[BoundingBox],
  ) -> usize {
    // The tile range and height range of each change.
    let mut reaches = Vec::new();
    let mut columns = BTreeSet::new();
    for change in changes {
      let BoundingBox::Box { min, max } = *change else {
        continue;
      };
      let Some(tiles) = self.config().tiles_overlapping(min, max) else {
        continue;
      };
      let ((min_x, min_z), (max_x, max_z)) = tiles;
      for z in min_z..=max_z {
        for x in min_x..=max_x {
          columns.insert((x, z));
        }
      }
      reaches.push((tiles, (min.y, max.y)));
    }

    let mut context = BuildContext::new();
    let config = self.tile_cache.config().clone();
    let rasterizer = TileRasterizer { geometry, volumes, config: &config };
    for &(x, z) in columns.iter() {
      let ranges = reaches
        .iter()
        .filter(|(((min_x, min_z), (max_x, max_z)), _)| {
          (*min_x..=*max_x).contains(&x) && (*min_z..=*max_z).contains(&z)
        })
        .map(|&(_, range)| range)
        .collect::<Vec<_>>();
      let layers = self
        .tile_cache
        .layers_at(x, z)
        .into_iter()
        .filter_map(|layer| {
          Some((layer, self.tile_cache.layer_height_range(x, z, layer)?))
        })
        .collect::<Vec<_>>();

      match layers_to_rebuild(&layers, &ranges) {
        None => self.rebuild_column(x, z, &rasterizer, &mut context),
        Some(selected) => {
          for (layer, range) in
            layers.iter().filter(|(layer, _)| selected.contains(layer))
          {
            self.rebuild_layer(x, z, *layer, *range, &rasterizer, &mut context);
          }
        }
      }
    }

    if !columns.is_empty() {
      debug!("Rebuilt {} tile columns.", columns.len());
      context.log_timings();
    }
    columns.len()
  }

  /// Re-rasterizes every layer of column `(x, z)` and rebuilds its tiles.
  fn rebuild_column(
    &mut self,
    x: i32,
    z: i32,
    rasterizer: &TileRasterizer,
    context: &mut BuildContext,
  ) {
    for layer in self.tile_cache.layers_at(x, z) {
      self.tile_cache.remove_layer(x, z, layer);
    }
    for layer in rasterizer.rasterize_tile(x, z, context) {
      if let Err(err) = self.tile_cache.add_tile_layer(&layer, context) {
        context.log_error(format!(
          "Failed to cache a layer of tile ({}, {}): {}",
          x, z, err
        ));
      }
    }
    if let Err(err) =
      self.tile_cache.build_tiles_at(x, z, &mut self.nav_mesh, context)
    {
      context.log_error(format!("Failed to build tile ({}, {}): {}", x, z, err));
    }
  }

  /// Re-rasterizes the floors of `layer` in column `(x, z)` between the
  /// heights `range` and rebuilds that tile alone.
  fn rebuild_layer(
    &mut self,
    x: i32,
    z: i32,
    layer: u8,
    range: (f32, f32),
    rasterizer: &TileRasterizer,
    context: &mut BuildContext,
  ) {
    self.tile_cache.remove_layer(x, z, layer);
    if let Some(rebuilt) =
      rasterizer.rasterize_single_layer(x, z, layer, range, context)
    {
      if let Err(err) = self.tile_cache.add_tile_layer(&rebuilt, context) {
        context.log_error(format!(
          "Failed to cache layer {} of tile ({}, {}): {}",
          layer, x, z, err
        ));
      }
    }
    if let Err(err) =
      self.tile_cache.build_tile(x, z, layer, &mut self.nav_mesh, context)
    {
      context.log_error(format!(
        "Failed to build layer {} of tile ({}, {}): {}",
        layer, x, z, err
      ));
    }
  }

  /// How well an agent of `radius` and `height` suits this mesh. Lower is a
  /// closer fit; -1 means the agent does not fit at all.
  pub(crate) fn actor_fit_factor(&self, radius: f32, height: f32) -> f32 {
    let max_radius = self.parameters.max_agent_radius;
    let max_height = self.parameters.max_agent_height;
    if radius > max_radius || height > max_height {
      return -1.0;
    }
    2.0 * (max_radius - radius) / max_radius + (max_height - height) / max_height
  }

  /// Adds an agent to the crowd. Followers only mirror an agent simulated
  /// in another mesh.
  pub(crate) fn add_agent(
    &mut self,
    parameters: &CrowdAgentParameters,
    filter: usize,
    follower: bool,
    filters: &QueryFilters,
  ) -> Result<CrowdAgentId, CrowdError> {
    self.crowd.add_agent(
      parameters.position,
      parameters.to_crowd_params(filter, follower),
      &self.nav_mesh,
      filters,
    )
  }

  pub(crate) fn add_obstacle(
    &mut self,
    shape: ObstacleShape,
  ) -> Result<ObstacleRef, TileCacheError> {
    self.tile_cache.add_obstacle(shape)
  }

  pub(crate) fn remove_obstacle(&mut self, obstacle: ObstacleRef) {
    if let Err(err) = self.tile_cache.remove_obstacle(obstacle) {
      warn!("Failed to remove obstacle {:?}: {}", obstacle, err);
    }
  }

  /// The walkable point nearest to `point` within `half_extents`.
  pub(crate) fn sample_point(
    &self,
    point: Vec3,
    half_extents: Vec3,
    filters: &QueryFilters,
  ) -> Option<Vec3> {
    let filter = filters.get_or_default(0);
    self
      .nav_mesh
      .find_nearest_poly(point, half_extents, Some(&filter))
      .map(|(_, nearest)| nearest)
  }
}

/// Picks which of a column's `layers` (index and height range) to rebuild
/// for the changes reaching that column, spanning the height `ranges`. `None`
/// means the column has no layers yet and is rasterized whole.
/// Every layer a change overlaps is rebuilt along with the layers directly
/// above and below it.
pub(crate) fn layers_to_rebuild(
  layers: &[(u8, (f32, f32))],
  ranges: &[(f32, f32)],
) -> Option<Vec<u8>> {
  if layers.is_empty() {
    return None;
  }
  let mut selected = BTreeSet::new();
  for (index, (_, (layer_min, layer_max))) in layers.iter().enumerate() {
    let touched = ranges
      .iter()
      .any(|&(min, max)| min <= *layer_max && max >= *layer_min);
    if !touched {
      continue;
    }
    selected.insert(index.saturating_sub(1));
    selected.insert(index);
    selected.insert((index + 1).min(layers.len() - 1));
  }
  Some(selected.into_iter().map(|index| layers[index].0).collect())
}

#[cfg(test)]
#[path = "navigation_mesh_test.rs"]
mod test;
