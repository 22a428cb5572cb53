use glam::Vec3;
use thiserror::Error;

use crate::util::BoundingBox;

/// Parameters for building one navigation mesh (one size class of agents).
///
/// Internally the geometry is turned into a voxel field. Values marked
/// "cells" are in multiples of `cell_size`; everything else is in world
/// units.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParameters {
  /// The width and depth of a single voxel.
  pub cell_size: f32,
  /// The height of a single voxel.
  pub cell_height: f32,
  /// The steepest walkable slope, in degrees.
  pub max_agent_slope: f32,
  /// The tallest agent this mesh supports.
  pub max_agent_height: f32,
  /// The highest step an agent can climb.
  pub max_agent_climb: f32,
  /// The widest agent this mesh supports.
  pub max_agent_radius: f32,
  /// The longest polygon edge along the border of the mesh.
  pub max_edge_length: f32,
  /// How far a simplified border may deviate from the voxel outline, in
  /// cells.
  pub max_simplification_error: f32,
  /// Islands with fewer cells than this are dropped.
  pub min_num_cells_per_island: u32,
  /// Regions smaller than this are merged into their neighbours if possible.
  pub min_cell_span_count: u32,
  /// The most vertices a polygon may have.
  pub max_verts_per_poly: u32,
  /// The width and depth of a tile, in cells.
  pub tile_size: u32,
  /// The most vertical layers a tile column may have. Floors above the
  /// lowest `layers_per_tile` are left out of the mesh.
  pub layers_per_tile: u32,
  /// The sampling distance of the height detail.
  pub detail_sample_distance: f32,
  /// How far the height detail may deviate from the source geometry.
  pub detail_sample_max_error: f32,
  /// The most agents in this mesh's crowd, including followers.
  pub max_agents: u32,
  /// The most polygons a single path search may visit.
  pub max_query_nodes: u32,
}

impl Default for NavMeshParameters {
  fn default() -> Self {
    Self {
      cell_size: 0.3,
      cell_height: 0.2,
      max_agent_slope: 45.0,
      max_agent_height: 2.0,
      max_agent_climb: 0.9,
      max_agent_radius: 0.6,
      max_edge_length: 12.0,
      max_simplification_error: 1.3,
      min_num_cells_per_island: 8,
      min_cell_span_count: 20,
      max_verts_per_poly: 6,
      tile_size: 48,
      layers_per_tile: 4,
      detail_sample_distance: 6.0,
      detail_sample_max_error: 1.0,
      max_agents: 256,
      max_query_nodes: 2048,
    }
  }
}

/// An invalid parameter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("The parameter {0} must be positive.")]
  NotPositive(&'static str),
  #[error("The tile size {0} must be in 1..=255.")]
  InvalidTileSize(u32),
  #[error("The layers per tile {0} must be in 1..=255.")]
  InvalidLayersPerTile(u32),
  #[error("The max vertices per polygon {0} must be in 3..=6.")]
  InvalidMaxVertsPerPoly(u32),
  #[error("The geometry bounds are empty.")]
  EmptyBounds,
  #[error("At least one navigation mesh must be configured.")]
  NoNavMeshes,
}

impl NavMeshParameters {
  pub fn validate(&self) -> Result<(), ConfigError> {
    let positive = [
      ("cell_size", self.cell_size),
      ("cell_height", self.cell_height),
      ("max_agent_slope", self.max_agent_slope),
      ("max_agent_height", self.max_agent_height),
      ("max_agent_climb", self.max_agent_climb),
      ("max_agent_radius", self.max_agent_radius),
    ];
    for (name, value) in positive {
      if !(value > 0.0) {
        return Err(ConfigError::NotPositive(name));
      }
    }
    if self.max_agents == 0 {
      return Err(ConfigError::NotPositive("max_agents"));
    }
    if self.max_query_nodes == 0 {
      return Err(ConfigError::NotPositive("max_query_nodes"));
    }
    if !(1..=255).contains(&self.tile_size) {
      return Err(ConfigError::InvalidTileSize(self.tile_size));
    }
    if !(1..=255).contains(&self.layers_per_tile) {
      return Err(ConfigError::InvalidLayersPerTile(self.layers_per_tile));
    }
    if !(3..=6).contains(&self.max_verts_per_poly) {
      return Err(ConfigError::InvalidMaxVertsPerPoly(self.max_verts_per_poly));
    }
    Ok(())
  }
}

/// Parameters for the whole navigation setup.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NavigationParameters {
  /// One entry per agent size class, each producing its own navigation mesh.
  pub nav_meshes: Vec<NavMeshParameters>,
  /// How often the background thread ticks. Zero disables the thread, and
  /// the host must call `step` itself.
  pub ticks_per_second: u32,
  /// The most obstacles each navigation mesh can carve at once.
  pub max_obstacles: u32,
}

impl Default for NavigationParameters {
  fn default() -> Self {
    Self {
      nav_meshes: vec![NavMeshParameters::default()],
      ticks_per_second: 60,
      max_obstacles: 256,
    }
  }
}

impl NavigationParameters {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.nav_meshes.is_empty() {
      return Err(ConfigError::NoNavMeshes);
    }
    for nav_mesh in self.nav_meshes.iter() {
      nav_mesh.validate()?;
    }
    Ok(())
  }
}

/// The voxel-space configuration of one navigation mesh, derived from its
/// [`NavMeshParameters`] and the bounds of the input geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelConfig {
  pub cell_size: f32,
  pub cell_height: f32,
  /// The steepest walkable slope, in degrees.
  pub walkable_slope_angle: f32,
  /// The agent height, in cell heights.
  pub walkable_height: i32,
  /// The agent climb, in cell heights.
  pub walkable_climb: i32,
  /// The agent radius, in cells.
  pub walkable_radius: i32,
  /// The longest polygon edge, in cells.
  pub max_edge_len: i32,
  pub max_simplification_error: f32,
  pub min_region_area: i32,
  pub merge_region_area: i32,
  pub max_verts_per_poly: i32,
  /// The width and depth of a tile, in cells.
  pub tile_size: i32,
  /// The padding around each tile, in cells.
  pub border_size: i32,
  /// The width of the rasterized area of a tile, including the border.
  pub width: i32,
  /// The depth of the rasterized area of a tile, including the border.
  pub height: i32,
  /// The most layers kept in one tile column.
  pub max_layers: i32,
  pub detail_sample_dist: f32,
  pub detail_sample_max_error: f32,
  /// The minimum corner of the geometry bounds.
  pub bmin: Vec3,
  /// The maximum corner of the geometry bounds.
  pub bmax: Vec3,
}

impl VoxelConfig {
  pub fn new(
    parameters: &NavMeshParameters,
    bounds: BoundingBox,
  ) -> Result<Self, ConfigError> {
    parameters.validate()?;
    let BoundingBox::Box { min: bmin, max: bmax } = bounds else {
      return Err(ConfigError::EmptyBounds);
    };

    let walkable_radius =
      (parameters.max_agent_radius / parameters.cell_size).ceil() as i32;
    let border_size = walkable_radius + 3;
    let tile_size = parameters.tile_size as i32;
    Ok(Self {
      cell_size: parameters.cell_size,
      cell_height: parameters.cell_height,
      walkable_slope_angle: parameters.max_agent_slope,
      walkable_height: (parameters.max_agent_height / parameters.cell_height)
        .ceil() as i32,
      walkable_climb: (parameters.max_agent_climb / parameters.cell_height)
        .floor() as i32,
      walkable_radius,
      max_edge_len: (parameters.max_edge_length / parameters.cell_size) as i32,
      max_simplification_error: parameters.max_simplification_error,
      min_region_area: parameters.min_num_cells_per_island as i32,
      merge_region_area: parameters.min_cell_span_count as i32,
      max_verts_per_poly: parameters.max_verts_per_poly as i32,
      tile_size,
      border_size,
      width: tile_size + border_size * 2,
      height: tile_size + border_size * 2,
      max_layers: parameters.layers_per_tile as i32,
      detail_sample_dist: if parameters.detail_sample_distance < 0.9 {
        0.0
      } else {
        parameters.cell_size * parameters.detail_sample_distance
      },
      detail_sample_max_error: parameters.cell_height
        * parameters.detail_sample_max_error,
      bmin,
      bmax,
    })
  }

  /// The number of cells covering the bounds along X and Z.
  pub fn grid_size(&self) -> (i32, i32) {
    (
      ((self.bmax.x - self.bmin.x) / self.cell_size).ceil() as i32,
      ((self.bmax.z - self.bmin.z) / self.cell_size).ceil() as i32,
    )
  }

  /// The number of tiles covering the bounds along X and Z.
  pub fn tile_counts(&self) -> (i32, i32) {
    let (grid_width, grid_height) = self.grid_size();
    (
      ((grid_width + self.tile_size - 1) / self.tile_size).max(1),
      ((grid_height + self.tile_size - 1) / self.tile_size).max(1),
    )
  }

  /// The world-space width of a tile.
  pub fn tile_world_size(&self) -> f32 {
    self.tile_size as f32 * self.cell_size
  }

  /// The world-space bounds of tile `(tile_x, tile_z)`, without the border.
  /// Vertically the bounds span the whole geometry.
  pub fn tile_bounds(&self, tile_x: i32, tile_z: i32) -> (Vec3, Vec3) {
    let size = self.tile_world_size();
    let min = Vec3::new(
      self.bmin.x + tile_x as f32 * size,
      self.bmin.y,
      self.bmin.z + tile_z as f32 * size,
    );
    let max = Vec3::new(min.x + size, self.bmax.y, min.z + size);
    (min, max)
  }

  /// The range of tiles whose footprint overlaps the XZ rectangle, clamped to
  /// the grid. Returns `None` if the rectangle is off the grid.
  pub fn tiles_overlapping(
    &self,
    min: Vec3,
    max: Vec3,
  ) -> Option<((i32, i32), (i32, i32))> {
    let size = self.tile_world_size();
    let (tiles_x, tiles_z) = self.tile_counts();
    let min_tile = (
      ((min.x - self.bmin.x) / size).floor() as i32,
      ((min.z - self.bmin.z) / size).floor() as i32,
    );
    let max_tile = (
      ((max.x - self.bmin.x) / size).floor() as i32,
      ((max.z - self.bmin.z) / size).floor() as i32,
    );
    if max_tile.0 < 0 || max_tile.1 < 0 || min_tile.0 >= tiles_x || min_tile.1 >= tiles_z
    {
      return None;
    }
    Some((
      (min_tile.0.max(0), min_tile.1.max(0)),
      (max_tile.0.min(tiles_x - 1), max_tile.1.min(tiles_z - 1)),
    ))
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod test;
