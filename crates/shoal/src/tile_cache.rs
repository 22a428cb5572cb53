use std::collections::{BTreeMap, VecDeque};

use glam::{Vec3, Vec3Swizzles};
use log::{debug, warn};
use slotmap::{new_key_type, HopSlotMap};
use thiserror::Error;

use crate::{
  build_context::{BuildContext, BuildTimer},
  config::VoxelConfig,
  nav_mesh::{NavMesh, NavMeshError},
  tile_layer::{decode_header, TileLayer, TileLayerError},
  tile_mesh::build_tile_mesh,
};

/// The most tile columns rebuilt by a single [`TileCache::update`].
pub(crate) const MAX_TILE_UPDATES_PER_CALL: usize = 1;

new_key_type! {
  /// The id of an obstacle carved by one tile cache.
  pub(crate) struct ObstacleRef;
}

/// The volume an obstacle removes from the walkable surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ObstacleShape {
  /// A vertical cylinder. `position` is the centre of its base.
  Cylinder { position: Vec3, radius: f32, height: f32 },
  /// A box rotated by `rotation` radians about Y. `center` is the centre of
  /// the box.
  Box { center: Vec3, half_extents: Vec3, rotation: f32 },
}

impl ObstacleShape {
  /// The shape grown sideways by `margin`.
  pub(crate) fn expanded(self, margin: f32) -> Self {
    match self {
      Self::Cylinder { position, radius, height } => {
        Self::Cylinder { position, radius: radius + margin, height }
      }
      Self::Box { center, half_extents, rotation } => Self::Box {
        center,
        half_extents: half_extents + Vec3::new(margin, 0.0, margin),
        rotation,
      },
    }
  }

  /// The axis-aligned (min, max) corners holding the shape.
  pub(crate) fn bounds(&self) -> (Vec3, Vec3) {
    match *self {
      Self::Cylinder { position, radius, height } => (
        position - Vec3::new(radius, 0.0, radius),
        position + Vec3::new(radius, height, radius),
      ),
      Self::Box { center, half_extents, .. } => {
        let reach = half_extents.xz().length();
        let extents = Vec3::new(reach, half_extents.y, reach);
        (center - extents, center + extents)
      }
    }
  }

  fn carve(&self, layer: &mut TileLayer, cell_size: f32, cell_height: f32) -> bool {
    match *self {
      Self::Cylinder { position, radius, height } => {
        layer.carve_cylinder(position, radius, height, cell_size, cell_height)
      }
      Self::Box { center, half_extents, rotation } => layer.carve_box(
        center,
        half_extents,
        rotation,
        cell_size,
        cell_height,
      ),
    }
  }
}

/// Where an obstacle is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObstacleState {
  /// The obstacle is being carved into the tiles it touches.
  Processing,
  /// Every tile the obstacle touches has been rebuilt around it.
  Processed,
  /// The tiles the obstacle touches are being rebuilt without it.
  Removing,
}

#[derive(Clone, Debug)]
struct CachedObstacle {
  /// The carved shape, already grown by the agent radius.
  shape: ObstacleShape,
  state: ObstacleState,
  /// The tile columns the shape touches.
  columns: Vec<(i32, i32)>,
  /// The columns still to be rebuilt for the current state. `None` until
  /// the request for the current state is handled.
  pending: Option<Vec<(i32, i32)>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Request {
  Add(ObstacleRef),
  Remove(ObstacleRef),
}

/// An error while managing cached tiles or obstacles.
#[derive(Debug, Error)]
pub enum TileCacheError {
  #[error("The tile cache already holds its maximum of {0} obstacles.")]
  TooManyObstacles(usize),
  #[error("The obstacle does not exist or is already being removed.")]
  UnknownObstacle,
  #[error("Tile ({x}, {z}) layer {layer} is already cached.")]
  LayerExists { x: i32, z: i32, layer: u8 },
  #[error("Layer {layer} is past the {max_layers} layers a tile may have.")]
  LayerOutOfRange { layer: u8, max_layers: i32 },
  #[error(transparent)]
  Layer(#[from] TileLayerError),
  #[error(transparent)]
  NavMesh(#[from] NavMeshError),
}

/// The compressed tile layers of one navigation mesh, and the obstacles
/// carved into them. Tiles touched by obstacle changes are rebuilt
/// incrementally by [`TileCache::update`].
#[derive(Debug)]
pub(crate) struct TileCache {
  config: VoxelConfig,
  /// How far obstacles are grown before carving, so agents keep clear.
  carve_margin: f32,
  max_obstacles: usize,
  layers: BTreeMap<(i32, i32, u8), Vec<u8>>,
  obstacles: HopSlotMap<ObstacleRef, CachedObstacle>,
  requests: VecDeque<Request>,
  dirty_columns: VecDeque<(i32, i32)>,
}

impl TileCache {
  pub(crate) fn new(
    config: VoxelConfig,
    carve_margin: f32,
    max_obstacles: usize,
  ) -> Self {
    Self {
      config,
      carve_margin,
      max_obstacles,
      layers: BTreeMap::new(),
      obstacles: HopSlotMap::with_key(),
      requests: VecDeque::new(),
      dirty_columns: VecDeque::new(),
    }
  }

  pub(crate) fn config(&self) -> &VoxelConfig {
    &self.config
  }

  /// Stores an encoded layer. Fails if that layer is already cached or its
  /// index is past the layers a column may have.
  pub(crate) fn add_layer(
    &mut self,
    data: Vec<u8>,
  ) -> Result<(i32, i32, u8), TileCacheError> {
    let header = decode_header(&data)?;
    if i32::from(header.layer) >= self.config.max_layers {
      return Err(TileCacheError::LayerOutOfRange {
        layer: header.layer,
        max_layers: self.config.max_layers,
      });
    }
    let key = (header.tile_x, header.tile_z, header.layer);
    if self.layers.contains_key(&key) {
      return Err(TileCacheError::LayerExists {
        x: key.0,
        z: key.1,
        layer: key.2,
      });
    }
    self.layers.insert(key, data);
    Ok(key)
  }

  /// Compresses and stores `layer`.
  pub(crate) fn add_tile_layer(
    &mut self,
    layer: &TileLayer,
    context: &mut BuildContext,
  ) -> Result<(i32, i32, u8), TileCacheError> {
    context.start_timer(BuildTimer::Compression);
    let data = layer.encode();
    context.stop_timer(BuildTimer::Compression);
    self.add_layer(data)
  }

  pub(crate) fn remove_layer(&mut self, x: i32, z: i32, layer: u8) -> Option<Vec<u8>> {
    self.layers.remove(&(x, z, layer))
  }

  /// The indices of the layers cached for column `(x, z)`, in order.
  pub(crate) fn layers_at(&self, x: i32, z: i32) -> Vec<u8> {
    self
      .layers
      .range((x, z, 0)..=(x, z, u8::MAX))
      .map(|(&(_, _, layer), _)| layer)
      .collect()
  }

  /// The encoded bytes of a cached layer.
  pub(crate) fn layer(&self, x: i32, z: i32, layer: u8) -> Option<&[u8]> {
    self.layers.get(&(x, z, layer)).map(Vec::as_slice)
  }

  /// The world heights spanned by a cached layer.
  pub(crate) fn layer_height_range(
    &self,
    x: i32,
    z: i32,
    layer: u8,
  ) -> Option<(f32, f32)> {
    let header = decode_header(self.layer(x, z, layer)?).ok()?;
    Some((header.bmin.y, header.bmax.y))
  }

  /// Every cached layer in encoded form, ordered by tile and layer.
  pub(crate) fn encoded_layers(&self) -> impl Iterator<Item = &[u8]> + '_ {
    self.layers.values().map(Vec::as_slice)
  }

  pub(crate) fn layer_count(&self) -> usize {
    self.layers.len()
  }

  /// Replaces every tile of column `(x, z)` in `nav_mesh` with tiles built
  /// from the cached layers, carving in the current obstacles. Returns how
  /// many tiles were added.
  pub(crate) fn build_tiles_at(
    &self,
    x: i32,
    z: i32,
    nav_mesh: &mut NavMesh,
    context: &mut BuildContext,
  ) -> Result<usize, TileCacheError> {
    nav_mesh.remove_tiles_at(x, z);
    let mut added = 0;
    for (&(_, _, layer), data) in self.layers.range((x, z, 0)..=(x, z, u8::MAX))
    {
      if self.add_nav_mesh_tile(x, z, layer, data, nav_mesh, context)? {
        added += 1;
      }
    }
    Ok(added)
  }

  /// Replaces tile `(x, z, layer)` in `nav_mesh` with one built from the
  /// cached layer, leaving the other layers of the column alone. The tile is
  /// only removed if the layer is no longer cached. Returns whether a tile
  /// was added.
  pub(crate) fn build_tile(
    &self,
    x: i32,
    z: i32,
    layer: u8,
    nav_mesh: &mut NavMesh,
    context: &mut BuildContext,
  ) -> Result<bool, TileCacheError> {
    if nav_mesh.has_tile(x, z, layer) {
      nav_mesh.remove_tile(x, z, layer)?;
    }
    match self.layers.get(&(x, z, layer)) {
      Some(data) => {
        self.add_nav_mesh_tile(x, z, layer, data, nav_mesh, context)
      }
      None => Ok(false),
    }
  }

  fn add_nav_mesh_tile(
    &self,
    x: i32,
    z: i32,
    layer_index: u8,
    data: &[u8],
    nav_mesh: &mut NavMesh,
    context: &mut BuildContext,
  ) -> Result<bool, TileCacheError> {
    let mut layer = TileLayer::decode(data)?;

    context.start_timer(BuildTimer::ObstacleCarving);
    for obstacle in self.obstacles.values() {
      if obstacle.state != ObstacleState::Removing
        && obstacle.columns.contains(&(x, z))
      {
        obstacle.shape.carve(
          &mut layer,
          self.config.cell_size,
          self.config.cell_height,
        );
      }
    }
    context.stop_timer(BuildTimer::ObstacleCarving);

    context.start_timer(BuildTimer::TileMesh);
    let mesh = build_tile_mesh(&layer, &self.config);
    context.stop_timer(BuildTimer::TileMesh);
    if mesh.polygons.is_empty() {
      return Ok(false);
    }
    nav_mesh.add_tile(x, z, layer_index, &mesh)?;
    Ok(true)
  }

  /// Queues `shape` to be carved into the tiles it touches.
  pub(crate) fn add_obstacle(
    &mut self,
    shape: ObstacleShape,
  ) -> Result<ObstacleRef, TileCacheError> {
    if self.obstacle_count() >= self.max_obstacles {
      warn!("Rejected obstacle: already at {} obstacles.", self.max_obstacles);
      return Err(TileCacheError::TooManyObstacles(self.max_obstacles));
    }
    let shape = shape.expanded(self.carve_margin);
    let columns = self.columns_touching(&shape);
    let obstacle = self.obstacles.insert(CachedObstacle {
      shape,
      state: ObstacleState::Processing,
      columns,
      pending: None,
    });
    self.requests.push_back(Request::Add(obstacle));
    Ok(obstacle)
  }

  /// Queues the obstacle to be removed from the tiles it touches.
  pub(crate) fn remove_obstacle(
    &mut self,
    obstacle: ObstacleRef,
  ) -> Result<(), TileCacheError> {
    match self.obstacles.get(obstacle) {
      Some(cached) if cached.state != ObstacleState::Removing => {
        self.requests.push_back(Request::Remove(obstacle));
        Ok(())
      }
      _ => Err(TileCacheError::UnknownObstacle),
    }
  }

  pub(crate) fn obstacle_state(&self, obstacle: ObstacleRef) -> Option<ObstacleState> {
    self.obstacles.get(obstacle).map(|cached| cached.state)
  }

  pub(crate) fn obstacle_count(&self) -> usize {
    self.obstacles.len()
  }

  /// Whether every obstacle change has been applied to the tiles.
  pub(crate) fn is_up_to_date(&self) -> bool {
    self.requests.is_empty() && self.dirty_columns.is_empty()
  }

  /// Turns queued obstacle changes into tile work and rebuilds at most
  /// [`MAX_TILE_UPDATES_PER_CALL`] tile columns. Returns whether the cache is
  /// up to date afterwards.
  pub(crate) fn update(
    &mut self,
    nav_mesh: &mut NavMesh,
    context: &mut BuildContext,
  ) -> bool {
    if self.dirty_columns.is_empty() {
      self.schedule_requests();
    }

    for _ in 0..MAX_TILE_UPDATES_PER_CALL {
      let Some((x, z)) = self.dirty_columns.pop_front() else {
        break;
      };
      if let Err(err) = self.build_tiles_at(x, z, nav_mesh, context) {
        warn!("Failed to rebuild tile ({}, {}): {}", x, z, err);
      }
      for obstacle in self.obstacles.values_mut() {
        if let Some(pending) = obstacle.pending.as_mut() {
          pending.retain(|&column| column != (x, z));
        }
      }
    }

    self.finish_obstacles();
    self.is_up_to_date()
  }

  fn schedule_requests(&mut self) {
    while let Some(request) = self.requests.pop_front() {
      let (obstacle, removing) = match request {
        Request::Add(obstacle) => (obstacle, false),
        Request::Remove(obstacle) => (obstacle, true),
      };
      let Some(cached) = self.obstacles.get_mut(obstacle) else {
        continue;
      };
      if removing {
        if cached.state == ObstacleState::Removing {
          continue;
        }
        cached.state = ObstacleState::Removing;
      }
      cached.pending = Some(cached.columns.clone());
      for &column in cached.columns.iter() {
        if !self.dirty_columns.contains(&column) {
          self.dirty_columns.push_back(column);
        }
      }
    }
  }

  /// Settles obstacles whose tiles have all been rebuilt.
  fn finish_obstacles(&mut self) {
    self.obstacles.retain(|_, cached| {
      let done = cached.pending.as_ref().is_some_and(Vec::is_empty);
      !(done && cached.state == ObstacleState::Removing)
    });
    for cached in self.obstacles.values_mut() {
      if cached.state == ObstacleState::Processing
        && cached.pending.as_ref().is_some_and(Vec::is_empty)
      {
        debug!("Obstacle carved into {} tile columns.", cached.columns.len());
        cached.state = ObstacleState::Processed;
      }
    }
  }

  /// The tile columns whose footprint overlaps `shape`.
  fn columns_touching(&self, shape: &ObstacleShape) -> Vec<(i32, i32)> {
    let (min, max) = shape.bounds();
    let Some(((min_x, min_z), (max_x, max_z))) =
      self.config.tiles_overlapping(min, max)
    else {
      return Vec::new();
    };
    let mut columns = Vec::new();
    for z in min_z..=max_z {
      for x in min_x..=max_x {
        columns.push((x, z));
      }
    }
    columns
  }
}

#[cfg(test)]
#[path = "tile_cache_test.rs"]
mod test;
