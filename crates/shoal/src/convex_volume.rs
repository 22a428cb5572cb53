use geo::{ConvexHull, MultiPoint, Point};
use glam::{Vec2, Vec3};
use log::warn;
use thiserror::Error;

use crate::{
  area::{AreaType, PolyFlags},
  util::BoundingBox,
};

/// The most area markers that can exist at once.
pub const MAX_VOLUMES: usize = 256;
/// The most vertices in the outline of an area marker.
pub const MAX_VOLUME_VERTICES: usize = 12;
/// The most off-mesh connections that can exist at once.
pub const MAX_OFFMESH_CONNECTIONS: usize = 256;
/// The user id of the first off-mesh connection. Later connections count up
/// from here.
pub const OFFMESH_CONNECTION_BASE_ID: u32 = 1000;

/// A vertical prism that tags the walkable surface inside it with an area
/// type.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvexVolume {
  pub(crate) id: u32,
  /// The convex outline, counter-clockwise in (x, z), at height `hmin`.
  pub(crate) vertices: Vec<Vec3>,
  pub(crate) hmin: f32,
  pub(crate) hmax: f32,
  pub(crate) area: AreaType,
  /// The outline's footprint on the XZ plane as (min, max).
  pub(crate) footprint: (Vec2, Vec2),
  /// Whether the volume has not been baked into the navigation meshes yet.
  pub(crate) is_new: bool,
}

impl ConvexVolume {
  pub fn id(&self) -> u32 {
    self.id
  }

  pub fn vertices(&self) -> &[Vec3] {
    &self.vertices
  }

  pub fn area(&self) -> AreaType {
    self.area
  }

  pub fn height_range(&self) -> (f32, f32) {
    (self.hmin, self.hmax)
  }

  pub fn is_new(&self) -> bool {
    self.is_new
  }

  /// The world-space box holding the volume.
  pub(crate) fn bounds(&self) -> BoundingBox {
    BoundingBox::new_box(
      Vec3::new(self.footprint.0.x, self.hmin, self.footprint.0.y),
      Vec3::new(self.footprint.1.x, self.hmax, self.footprint.1.y),
    )
  }
}

/// An error while marking an area.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum MarkAreaError {
  #[error("There are already {0} marked areas.")]
  TooManyVolumes(usize),
  #[error("The marked area needs at least 3 points that are not collinear.")]
  Degenerate,
  #[error("The outline of the marked area has {0} vertices, more than the 12 allowed.")]
  TooManyVertices(usize),
  #[error("The marked area height must be positive.")]
  InvalidHeight,
}

/// The registry of area markers.
#[derive(Clone, Debug, Default)]
pub struct ConvexVolumes {
  volumes: Vec<ConvexVolume>,
  next_id: u32,
  /// Regions whose area markings changed other than by adding a volume.
  dirty_regions: Vec<BoundingBox>,
}

impl ConvexVolumes {
  pub fn new() -> Self {
    Self::default()
  }

  /// Marks the convex hull (on the XZ plane) of `points` as `area`. The
  /// volume spans from the lowest point up by `height`. Returns the id of the
  /// new marker.
  pub fn mark_area(
    &mut self,
    points: &[Vec3],
    height: f32,
    area: AreaType,
  ) -> Result<u32, MarkAreaError> {
    if self.volumes.len() >= MAX_VOLUMES {
      warn!("Rejected marked area: already at {} areas.", MAX_VOLUMES);
      return Err(MarkAreaError::TooManyVolumes(self.volumes.len()));
    }
    if !(height > 0.0) {
      return Err(MarkAreaError::InvalidHeight);
    }

    let hmin = points.iter().map(|point| point.y).fold(f32::INFINITY, f32::min);
    let hull = MultiPoint::from(
      points.iter().map(|point| Point::new(point.x, point.z)).collect::<Vec<_>>(),
    )
    .convex_hull();
    let mut outline = hull
      .exterior()
      .points()
      .map(|point| Vec3::new(point.x(), hmin, point.y()))
      .collect::<Vec<_>>();
    // The exterior ring repeats its first point at the end.
    if outline.len() > 1 && outline.first() == outline.last() {
      outline.pop();
    }
    if outline.len() < 3 {
      return Err(MarkAreaError::Degenerate);
    }
    if outline.len() > MAX_VOLUME_VERTICES {
      warn!("Rejected marked area with {} vertices.", outline.len());
      return Err(MarkAreaError::TooManyVertices(outline.len()));
    }

    self.insert(ConvexVolume {
      id: 0,
      footprint: footprint_of(&outline),
      vertices: outline,
      hmin,
      hmax: hmin + height,
      area,
      is_new: true,
    })
  }

  /// Adds an already-built volume, assigning it the next id.
  fn insert(
    &mut self,
    mut volume: ConvexVolume,
  ) -> Result<u32, MarkAreaError> {
    if self.volumes.len() >= MAX_VOLUMES {
      return Err(MarkAreaError::TooManyVolumes(self.volumes.len()));
    }
    volume.id = self.next_id;
    self.next_id += 1;
    let id = volume.id;
    self.volumes.push(volume);
    Ok(id)
  }

  /// Removes the marker with `id`. Returns false if there is no such marker.
  /// A marker that was already baked leaves behind a dirty region, so the next
  /// rebuild restores the surface underneath it.
  pub fn remove(&mut self, id: u32) -> bool {
    let Some(index) = self.volumes.iter().position(|volume| volume.id == id)
    else {
      return false;
    };
    let volume = self.volumes.swap_remove(index);
    if !volume.is_new {
      self.dirty_regions.push(volume.bounds());
    }
    true
  }

  /// Records that the navigation inside `bounds` must be rebuilt.
  pub(crate) fn mark_dirty(&mut self, bounds: BoundingBox) {
    if !bounds.is_empty() {
      self.dirty_regions.push(bounds);
    }
  }

  pub fn get(&self, id: u32) -> Option<&ConvexVolume> {
    self.volumes.iter().find(|volume| volume.id == id)
  }

  pub fn iter(&self) -> impl ExactSizeIterator<Item = &ConvexVolume> + '_ {
    self.volumes.iter()
  }

  pub fn ids(&self) -> Vec<u32> {
    self.volumes.iter().map(|volume| volume.id).collect()
  }

  pub fn len(&self) -> usize {
    self.volumes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.volumes.is_empty()
  }

  /// The regions that changed since the last bake: every new volume and
  /// every dirty region.
  pub(crate) fn pending_changes(&self) -> Vec<BoundingBox> {
    self
      .volumes
      .iter()
      .filter(|volume| volume.is_new)
      .map(ConvexVolume::bounds)
      .chain(self.dirty_regions.iter().copied())
      .collect()
  }

  /// Marks every volume as baked and forgets the dirty regions.
  pub(crate) fn mark_baked(&mut self) {
    for volume in self.volumes.iter_mut() {
      volume.is_new = false;
    }
    self.dirty_regions.clear();
  }

  pub(crate) fn next_id(&self) -> u32 {
    self.next_id
  }

  /// Restores the registry from saved volumes. Ids are kept as saved.
  pub(crate) fn from_saved(volumes: Vec<ConvexVolume>, next_id: u32) -> Self {
    Self { volumes, next_id, dirty_regions: Vec::new() }
  }
}

pub(crate) fn footprint_of(outline: &[Vec3]) -> (Vec2, Vec2) {
  outline.iter().fold(
    (Vec2::splat(f32::INFINITY), Vec2::splat(f32::NEG_INFINITY)),
    |(min, max), vertex| {
      (min.min(Vec2::new(vertex.x, vertex.z)), max.max(Vec2::new(vertex.x, vertex.z)))
    },
  )
}

/// A link between two points on the navigation mesh that are not connected
/// by walkable surface, such as a jump down a ledge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OffMeshConnection {
  pub start: Vec3,
  pub end: Vec3,
  /// How far from each endpoint the link can attach to the mesh.
  pub radius: f32,
  pub bidirectional: bool,
  pub area: AreaType,
  pub flags: PolyFlags,
  pub(crate) user_id: u32,
}

impl OffMeshConnection {
  pub fn new(start: Vec3, end: Vec3, radius: f32, bidirectional: bool) -> Self {
    Self {
      start,
      end,
      radius,
      bidirectional,
      area: AreaType::Ground,
      flags: PolyFlags::JUMP,
      user_id: 0,
    }
  }

  pub fn user_id(&self) -> u32 {
    self.user_id
  }

  /// The box around both endpoints, expanded by the radius.
  pub(crate) fn bounds(&self) -> BoundingBox {
    BoundingBox::from_points([self.start, self.end])
      .expand_by_size(Vec3::splat(self.radius))
  }
}

/// The registry of off-mesh connections.
#[derive(Clone, Debug, Default)]
pub struct OffMeshConnections {
  connections: Vec<OffMeshConnection>,
  added: u32,
}

/// There is no room for another off-mesh connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("There are already {0} off-mesh connections.")]
pub struct TooManyOffMeshConnections(pub usize);

impl OffMeshConnections {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds `connection`, returning its user id.
  pub fn add(
    &mut self,
    mut connection: OffMeshConnection,
  ) -> Result<u32, TooManyOffMeshConnections> {
    if self.connections.len() >= MAX_OFFMESH_CONNECTIONS {
      warn!(
        "Rejected off-mesh connection: already at {} connections.",
        MAX_OFFMESH_CONNECTIONS
      );
      return Err(TooManyOffMeshConnections(self.connections.len()));
    }
    connection.user_id = OFFMESH_CONNECTION_BASE_ID + self.added;
    self.added += 1;
    self.connections.push(connection);
    Ok(connection.user_id)
  }

  /// Removes the connection with `user_id`, moving the last connection into
  /// its place.
  pub fn remove(&mut self, user_id: u32) -> Option<OffMeshConnection> {
    let index = self
      .connections
      .iter()
      .position(|connection| connection.user_id == user_id)?;
    Some(self.connections.swap_remove(index))
  }

  pub fn as_slice(&self) -> &[OffMeshConnection] {
    &self.connections
  }

  pub fn len(&self) -> usize {
    self.connections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.connections.is_empty()
  }

  pub(crate) fn from_saved(connections: Vec<OffMeshConnection>) -> Self {
    let added = connections
      .iter()
      .map(|connection| {
        connection.user_id.saturating_sub(OFFMESH_CONNECTION_BASE_ID) + 1
      })
      .max()
      .unwrap_or(0);
    Self { connections, added }
  }
}

#[cfg(test)]
#[path = "convex_volume_test.rs"]
mod test;
