use std::collections::HashMap;

use glam::{Vec2, Vec3, Vec3Swizzles};
use log::{debug, warn};
use thiserror::Error;

use crate::{
  area::{AreaType, PolyFlags},
  convex_volume::OffMeshConnection,
  geometry::{
    closest_point_on_polygon, closest_point_on_segment, polygon_height,
    shared_edge_portal,
  },
  query_filter::QueryFilter,
  tile_mesh::TileMesh,
  util::BoundingBox,
};

/// The largest number of bits a polygon reference may spend on the tile.
pub(crate) const MAX_TILE_BITS: u32 = 14;
/// The bits of a polygon reference shared by the tile and polygon indices.
/// The rest hold the salt.
const TILE_AND_POLY_BITS: u32 = 22;
const SALT_BITS: u32 = u32::BITS - TILE_AND_POLY_BITS;
/// How far apart (on the XZ plane) two edges may be and still be considered
/// the same edge.
const PORTAL_TOLERANCE: f32 = 1e-3;

/// A reference to a polygon of a navigation mesh. References to polygons of a
/// removed tile become invalid, even if another tile takes its place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolyRef(pub(crate) u32);

/// How the bits of a [`PolyRef`] are split between salt, tile and polygon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RefLayout {
  tile_bits: u32,
  poly_bits: u32,
}

impl RefLayout {
  /// Picks the layout for a mesh holding up to `max_tiles` tiles.
  pub(crate) fn for_tile_count(max_tiles: u32) -> Result<Self, NavMeshError> {
    let limit = 1 << MAX_TILE_BITS;
    if max_tiles > limit {
      return Err(NavMeshError::TooManyTiles { requested: max_tiles, limit });
    }
    let tile_bits = u32::BITS - max_tiles.max(1).saturating_sub(1).leading_zeros();
    Ok(Self { tile_bits, poly_bits: TILE_AND_POLY_BITS - tile_bits })
  }

  pub(crate) fn max_tiles(&self) -> u32 {
    1 << self.tile_bits
  }

  pub(crate) fn max_polys_per_tile(&self) -> u32 {
    1 << self.poly_bits
  }

  fn encode(&self, salt: u32, tile: u32, poly: u32) -> PolyRef {
    PolyRef(
      (salt << (self.tile_bits + self.poly_bits))
        | (tile << self.poly_bits)
        | poly,
    )
  }

  /// Splits `poly_ref` into (salt, tile, poly).
  fn decode(&self, poly_ref: PolyRef) -> (u32, u32, u32) {
    let salt = poly_ref.0 >> (self.tile_bits + self.poly_bits);
    let tile = (poly_ref.0 >> self.poly_bits) & ((1 << self.tile_bits) - 1);
    let poly = poly_ref.0 & ((1 << self.poly_bits) - 1);
    (salt, tile, poly)
  }
}

/// An error while building or editing a navigation mesh.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum NavMeshError {
  #[error(
    "The navigation mesh needs {requested} tiles, but at most {limit} are supported."
  )]
  TooManyTiles { requested: u32, limit: u32 },
  #[error("There is already a tile at ({x}, {z}) layer {layer}.")]
  TileExists { x: i32, z: i32, layer: u8 },
  #[error("There is no tile at ({x}, {z}) layer {layer}.")]
  TileNotFound { x: i32, z: i32, layer: u8 },
  #[error("The tile has {count} polygons, but at most {limit} are supported.")]
  TooManyPolygons { count: usize, limit: u32 },
  #[error("Every tile slot is in use.")]
  NoFreeTileSlots,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum PolyKind {
  /// A polygon of walkable surface.
  Ground,
  /// A two-vertex polygon from the start to the end of an off-mesh
  /// connection.
  OffMeshConnection { user_id: u32, radius: f32, bidirectional: bool },
}

/// A connection from one polygon to another.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Link {
  pub(crate) target: PolyRef,
  /// The edge of the owning polygon the link crosses. For off-mesh
  /// polygons, edge 0 is the start and edge 1 the end. `None` for links from
  /// ground into an off-mesh connection.
  pub(crate) edge: Option<usize>,
  /// The shared part of the edge as (left, right), looking from the owning
  /// polygon into the target.
  pub(crate) portal: (Vec3, Vec3),
}

#[derive(Clone, Debug)]
pub(crate) struct Poly {
  /// Counter-clockwise (in x, z) world-space vertices.
  pub(crate) vertices: Vec<Vec3>,
  pub(crate) center: Vec3,
  pub(crate) bounds: BoundingBox,
  pub(crate) area: AreaType,
  pub(crate) flags: PolyFlags,
  pub(crate) kind: PolyKind,
  pub(crate) links: Vec<Link>,
}

impl Poly {
  fn new(
    vertices: Vec<Vec3>,
    area: AreaType,
    flags: PolyFlags,
    kind: PolyKind,
  ) -> Self {
    let center = vertices.iter().sum::<Vec3>() / vertices.len().max(1) as f32;
    Self {
      bounds: BoundingBox::from_points(vertices.iter().copied()),
      vertices,
      center,
      area,
      flags,
      kind,
      links: Vec::new(),
    }
  }

  pub(crate) fn is_off_mesh_connection(&self) -> bool {
    matches!(self.kind, PolyKind::OffMeshConnection { .. })
  }

  /// The point on the polygon closest to `point`.
  pub(crate) fn closest_point(&self, point: Vec3) -> Vec3 {
    match self.kind {
      PolyKind::Ground => closest_point_on_polygon(point, &self.vertices),
      PolyKind::OffMeshConnection { .. } => {
        closest_point_on_segment(point, self.vertices[0], self.vertices[1])
      }
    }
  }

  /// The link from this polygon into `target`.
  pub(crate) fn link_to(&self, target: PolyRef) -> Option<&Link> {
    self.links.iter().find(|link| link.target == target)
  }
}

/// The polygons built from one tile layer.
#[derive(Clone, Debug)]
pub(crate) struct MeshTile {
  pub(crate) x: i32,
  pub(crate) z: i32,
  pub(crate) layer: u8,
  pub(crate) polys: Vec<Poly>,
  pub(crate) bounds: BoundingBox,
}

/// A tiled navigation mesh. Tiles are keyed by (x, z, layer) and linked to
/// the tiles of their neighbouring columns wherever their edges meet.
#[derive(Clone, Debug)]
pub(crate) struct NavMesh {
  layout: RefLayout,
  /// The world-space corner of tile (0, 0).
  origin: Vec3,
  tile_world_size: f32,
  /// The largest step between the edges of two linked polygons.
  walkable_climb: f32,
  slots: Vec<Option<MeshTile>>,
  salts: Vec<u32>,
  free_slots: Vec<u32>,
  tile_lookup: HashMap<(i32, i32, u8), u32>,
  columns: HashMap<(i32, i32), Vec<u32>>,
  off_mesh_connections: Vec<OffMeshConnection>,
}

impl NavMesh {
  pub(crate) fn new(
    layout: RefLayout,
    origin: Vec3,
    tile_world_size: f32,
    walkable_climb: f32,
  ) -> Self {
    let max_tiles = layout.max_tiles();
    Self {
      layout,
      origin,
      tile_world_size,
      walkable_climb,
      slots: (0..max_tiles).map(|_| None).collect(),
      salts: vec![1; max_tiles as usize],
      free_slots: (0..max_tiles).rev().collect(),
      tile_lookup: HashMap::new(),
      columns: HashMap::new(),
      off_mesh_connections: Vec::new(),
    }
  }

  /// Sets the off-mesh connections joined into tiles added from now on.
  pub(crate) fn set_off_mesh_connections(
    &mut self,
    connections: &[OffMeshConnection],
  ) {
    self.off_mesh_connections = connections.to_vec();
  }

  pub(crate) fn walkable_climb(&self) -> f32 {
    self.walkable_climb
  }

  /// The XZ rectangle covered by tile column `(x, z)`.
  pub(crate) fn tile_rect(&self, x: i32, z: i32) -> (Vec2, Vec2) {
    let min = self.origin.xz()
      + Vec2::new(x as f32, z as f32) * self.tile_world_size;
    (min, min + Vec2::splat(self.tile_world_size))
  }

  /// The tile column containing `point`.
  pub(crate) fn tile_at(&self, point: Vec3) -> (i32, i32) {
    let local = (point.xz() - self.origin.xz()) / self.tile_world_size;
    (local.x.floor() as i32, local.y.floor() as i32)
  }

  pub(crate) fn has_tile(&self, x: i32, z: i32, layer: u8) -> bool {
    self.tile_lookup.contains_key(&(x, z, layer))
  }

  pub(crate) fn tile_count(&self) -> usize {
    self.tile_lookup.len()
  }

  pub(crate) fn tiles(&self) -> impl Iterator<Item = &MeshTile> + '_ {
    self.slots.iter().flatten()
  }

  /// The layers present in tile column `(x, z)`.
  pub(crate) fn layers_at(&self, x: i32, z: i32) -> Vec<u8> {
    let mut layers = self
      .columns
      .get(&(x, z))
      .into_iter()
      .flatten()
      .filter_map(|&slot| self.slots[slot as usize].as_ref())
      .map(|tile| tile.layer)
      .collect::<Vec<_>>();
    layers.sort_unstable();
    layers
  }

  /// Adds the polygons of `mesh` as tile `(x, z, layer)`, linking them to
  /// the neighbouring tiles and to any off-mesh connection starting inside
  /// the tile.
  pub(crate) fn add_tile(
    &mut self,
    x: i32,
    z: i32,
    layer: u8,
    mesh: &TileMesh,
  ) -> Result<(), NavMeshError> {
    if self.has_tile(x, z, layer) {
      return Err(NavMeshError::TileExists { x, z, layer });
    }

    let mut polys = mesh
      .polygons
      .iter()
      .map(|polygon| {
        Poly::new(
          polygon.vertices.iter().map(|&vertex| mesh.vertices[vertex]).collect(),
          polygon.area,
          polygon.flags,
          PolyKind::Ground,
        )
      })
      .collect::<Vec<_>>();

    let (rect_min, rect_max) = self.tile_rect(x, z);
    let mut off_mesh_starts = Vec::new();
    for connection in &self.off_mesh_connections {
      let start = connection.start;
      if start.x < rect_min.x
        || start.z < rect_min.y
        || start.x >= rect_max.x
        || start.z >= rect_max.y
      {
        continue;
      }
      let Some(ground) =
        nearest_ground(&polys, start, connection.radius, self.walkable_climb)
      else {
        continue;
      };
      off_mesh_starts.push((polys.len(), ground, connection.bidirectional));
      polys.push(Poly::new(
        vec![start, connection.end],
        connection.area,
        connection.flags,
        PolyKind::OffMeshConnection {
          user_id: connection.user_id,
          radius: connection.radius,
          bidirectional: connection.bidirectional,
        },
      ));
    }

    if polys.len() > self.layout.max_polys_per_tile() as usize {
      return Err(NavMeshError::TooManyPolygons {
        count: polys.len(),
        limit: self.layout.max_polys_per_tile(),
      });
    }
    let slot = self.free_slots.pop().ok_or(NavMeshError::NoFreeTileSlots)?;
    let salt = self.salts[slot as usize];
    let layout = self.layout;
    let poly_ref = |poly: usize| layout.encode(salt, slot, poly as u32);

    for (from, link) in
      edge_links(&polys, &polys, poly_ref, true, self.walkable_climb)
    {
      polys[from].links.push(link);
    }
    for (off_mesh, ground, bidirectional) in off_mesh_starts {
      let start = polys[off_mesh].vertices[0];
      polys[ground].links.push(Link {
        target: poly_ref(off_mesh),
        edge: None,
        portal: (start, start),
      });
      if bidirectional {
        polys[off_mesh].links.push(Link {
          target: poly_ref(ground),
          edge: Some(0),
          portal: (start, start),
        });
      }
    }

    let bounds = polys.iter().fold(BoundingBox::Empty, |bounds, poly| {
      bounds.expand_to_bounds(&poly.bounds)
    });
    debug!(
      "Adding tile ({}, {}) layer {} with {} polygons.",
      x,
      z,
      layer,
      polys.len()
    );
    self.slots[slot as usize] = Some(MeshTile { x, z, layer, polys, bounds });
    self.tile_lookup.insert((x, z, layer), slot);
    self.columns.entry((x, z)).or_default().push(slot);

    self.link_neighbours(slot);
    self.connect_off_mesh_ends();
    Ok(())
  }

  /// Removes tile `(x, z, layer)` and every link into it. References to its
  /// polygons become invalid.
  pub(crate) fn remove_tile(
    &mut self,
    x: i32,
    z: i32,
    layer: u8,
  ) -> Result<(), NavMeshError> {
    let slot = self
      .tile_lookup
      .remove(&(x, z, layer))
      .ok_or(NavMeshError::TileNotFound { x, z, layer })?;
    self.slots[slot as usize] = None;
    if let Some(column) = self.columns.get_mut(&(x, z)) {
      column.retain(|&other| other != slot);
      if column.is_empty() {
        self.columns.remove(&(x, z));
      }
    }

    let salt_mask = (1 << SALT_BITS) - 1;
    let salt = &mut self.salts[slot as usize];
    *salt = (*salt + 1) & salt_mask;
    if *salt == 0 {
      *salt = 1;
    }
    self.free_slots.push(slot);

    let layout = self.layout;
    for tile in self.slots.iter_mut().flatten() {
      for poly in tile.polys.iter_mut() {
        poly.links.retain(|link| layout.decode(link.target).1 != slot);
      }
    }
    Ok(())
  }

  /// Removes every tile of column `(x, z)`.
  pub(crate) fn remove_tiles_at(&mut self, x: i32, z: i32) {
    for layer in self.layers_at(x, z) {
      if let Err(err) = self.remove_tile(x, z, layer) {
        warn!("Failed to remove tile: {}", err);
      }
    }
  }

  /// Finds the tile and polygon referenced by `poly_ref`. Returns `None` for
  /// stale or out-of-range references.
  pub(crate) fn tile_and_poly(
    &self,
    poly_ref: PolyRef,
  ) -> Option<(&MeshTile, &Poly)> {
    let (salt, slot, poly) = self.layout.decode(poly_ref);
    if *self.salts.get(slot as usize)? != salt {
      return None;
    }
    let tile = self.slots.get(slot as usize)?.as_ref()?;
    Some((tile, tile.polys.get(poly as usize)?))
  }

  pub(crate) fn poly(&self, poly_ref: PolyRef) -> Option<&Poly> {
    self.tile_and_poly(poly_ref).map(|(_, poly)| poly)
  }

  pub(crate) fn is_valid_ref(&self, poly_ref: PolyRef) -> bool {
    self.poly(poly_ref).is_some()
  }

  /// Whether `poly_ref` is valid and passes `filter`.
  pub(crate) fn passes_filter(
    &self,
    poly_ref: PolyRef,
    filter: &QueryFilter,
  ) -> bool {
    self
      .poly(poly_ref)
      .is_some_and(|poly| filter.passes(poly.flags, poly.area))
  }

  /// The walkable polygons overlapping the box around `center`, optionally
  /// limited to those passing `filter`.
  pub(crate) fn polys_in_box(
    &self,
    center: Vec3,
    half_extents: Vec3,
    filter: Option<&QueryFilter>,
  ) -> Vec<PolyRef> {
    let query =
      BoundingBox::new_box(center - half_extents, center + half_extents);
    let (min_x, min_z) = self.tile_at(center - half_extents);
    let (max_x, max_z) = self.tile_at(center + half_extents);

    let mut result = Vec::new();
    for z in min_z..=max_z {
      for x in min_x..=max_x {
        for &slot in self.columns.get(&(x, z)).into_iter().flatten() {
          let Some(tile) = self.slots[slot as usize].as_ref() else {
            continue;
          };
          if !tile.bounds.intersects_bounds(&query) {
            continue;
          }
          let salt = self.salts[slot as usize];
          for (index, poly) in tile.polys.iter().enumerate() {
            if poly.is_off_mesh_connection()
              || !poly.bounds.intersects_bounds(&query)
              || filter.is_some_and(|filter| !filter.passes(poly.flags, poly.area))
            {
              continue;
            }
            result.push(self.layout.encode(salt, slot, index as u32));
          }
        }
      }
    }
    result
  }

  /// Finds the walkable polygon nearest to `center` within the box of
  /// `half_extents`, and the closest point on it. Points standing on a
  /// polygon (within the climb height) count as on it.
  pub(crate) fn find_nearest_poly(
    &self,
    center: Vec3,
    half_extents: Vec3,
    filter: Option<&QueryFilter>,
  ) -> Option<(PolyRef, Vec3)> {
    let mut best: Option<(f32, PolyRef, Vec3)> = None;
    for poly_ref in self.polys_in_box(center, half_extents, filter) {
      let Some(poly) = self.poly(poly_ref) else {
        continue;
      };
      let (distance, closest) =
        distance_to_poly(poly, center, self.walkable_climb);
      if best.map_or(true, |(best_distance, _, _)| distance < best_distance) {
        best = Some((distance, poly_ref, closest));
      }
    }
    best.map(|(_, poly_ref, closest)| (poly_ref, closest))
  }

  /// The point on polygon `poly_ref` closest to `point`.
  pub(crate) fn closest_point_on_poly(
    &self,
    poly_ref: PolyRef,
    point: Vec3,
  ) -> Option<Vec3> {
    Some(self.poly(poly_ref)?.closest_point(point))
  }

  /// The height of polygon `poly_ref` under `point`, if `point` is over it.
  pub(crate) fn poly_height(&self, poly_ref: PolyRef, point: Vec3) -> Option<f32> {
    let poly = self.poly(poly_ref)?;
    if poly.is_off_mesh_connection() {
      return None;
    }
    polygon_height(point, &poly.vertices)
  }

  /// The (entry, exit) points of off-mesh polygon `off_mesh` when entered
  /// from `previous`.
  pub(crate) fn off_mesh_connection_endpoints(
    &self,
    previous: PolyRef,
    off_mesh: PolyRef,
  ) -> Option<(Vec3, Vec3)> {
    let poly = self.poly(off_mesh)?;
    if !poly.is_off_mesh_connection() {
      return None;
    }
    let entry = self.poly(previous)?.link_to(off_mesh)?.portal.0;
    let (start, end) = (poly.vertices[0], poly.vertices[1]);
    if entry.distance_squared(start) <= entry.distance_squared(end) {
      Some((start, end))
    } else {
      Some((end, start))
    }
  }

  /// Links tile `slot` with every tile in its own and the eight surrounding
  /// columns.
  fn link_neighbours(&mut self, slot: u32) {
    let Some(tile) = self.slots[slot as usize].as_ref() else {
      return;
    };
    let layout = self.layout;
    let salts = &self.salts;
    let poly_ref = |slot: u32, poly: usize| {
      layout.encode(salts[slot as usize], slot, poly as u32)
    };

    let mut new_links = Vec::new();
    for dz in -1..=1 {
      for dx in -1..=1 {
        let column = (tile.x + dx, tile.z + dz);
        for &other_slot in self.columns.get(&column).into_iter().flatten() {
          if other_slot == slot {
            continue;
          }
          let Some(other) = self.slots[other_slot as usize].as_ref() else {
            continue;
          };
          let near = tile
            .bounds
            .expand_by_size(Vec3::new(
              PORTAL_TOLERANCE,
              self.walkable_climb,
              PORTAL_TOLERANCE,
            ))
            .intersects_bounds(&other.bounds);
          if !near {
            continue;
          }
          for (from, link) in edge_links(
            &tile.polys,
            &other.polys,
            |poly| poly_ref(other_slot, poly),
            false,
            self.walkable_climb,
          ) {
            new_links.push((slot, from, link));
          }
          for (from, link) in edge_links(
            &other.polys,
            &tile.polys,
            |poly| poly_ref(slot, poly),
            false,
            self.walkable_climb,
          ) {
            new_links.push((other_slot, from, link));
          }
        }
      }
    }

    for (slot, poly, link) in new_links {
      if let Some(tile) = self.slots[slot as usize].as_mut() {
        tile.polys[poly].links.push(link);
      }
    }
  }

  /// Joins the end of every off-mesh connection that is not yet joined to
  /// the polygon nearest to it.
  fn connect_off_mesh_ends(&mut self) {
    let mut unconnected = Vec::new();
    for (slot, tile) in self.slots.iter().enumerate() {
      let Some(tile) = tile else {
        continue;
      };
      for (index, poly) in tile.polys.iter().enumerate() {
        let PolyKind::OffMeshConnection { radius, bidirectional, .. } =
          poly.kind
        else {
          continue;
        };
        if poly.links.iter().any(|link| link.edge == Some(1)) {
          continue;
        }
        let off_mesh_ref = self.layout.encode(
          self.salts[slot],
          slot as u32,
          index as u32,
        );
        unconnected.push((off_mesh_ref, poly.vertices[1], radius, bidirectional));
      }
    }

    for (off_mesh_ref, end, radius, bidirectional) in unconnected {
      let Some((ground_ref, _)) = self.find_nearest_poly(
        end,
        Vec3::new(radius, self.walkable_climb, radius),
        None,
      ) else {
        continue;
      };
      let Some(ground) = self.poly(ground_ref) else {
        continue;
      };
      if distance_to_poly(ground, end, self.walkable_climb).0 > radius * radius {
        continue;
      }
      self.push_link(
        off_mesh_ref,
        Link { target: ground_ref, edge: Some(1), portal: (end, end) },
      );
      if bidirectional {
        self.push_link(
          ground_ref,
          Link { target: off_mesh_ref, edge: None, portal: (end, end) },
        );
      }
    }
  }

  fn push_link(&mut self, from: PolyRef, link: Link) {
    let (_, slot, poly) = self.layout.decode(from);
    if let Some(poly) = self
      .slots
      .get_mut(slot as usize)
      .and_then(Option::as_mut)
      .and_then(|tile| tile.polys.get_mut(poly as usize))
    {
      poly.links.push(link);
    }
  }
}

/// The squared distance used to rank polygons near `point`, and the closest
/// point on the polygon.
fn distance_to_poly(poly: &Poly, point: Vec3, walkable_climb: f32) -> (f32, Vec3) {
  let closest = poly.closest_point(point);
  let over_poly = !poly.is_off_mesh_connection()
    && polygon_height(point, &poly.vertices).is_some();
  let distance = if over_poly {
    ((point.y - closest.y).abs() - walkable_climb).max(0.0).powi(2)
  } else {
    point.distance_squared(closest)
  };
  (distance, closest)
}

/// The index of the ground polygon in `polys` nearest to `point`, within
/// `radius` horizontally and `walkable_climb` vertically.
fn nearest_ground(
  polys: &[Poly],
  point: Vec3,
  radius: f32,
  walkable_climb: f32,
) -> Option<usize> {
  polys
    .iter()
    .enumerate()
    .filter(|(_, poly)| !poly.is_off_mesh_connection())
    .map(|(index, poly)| {
      let closest = poly.closest_point(point);
      (index, closest.xz().distance(point.xz()), (closest.y - point.y).abs())
    })
    .filter(|&(_, horizontal, vertical)| {
      horizontal <= radius && vertical <= walkable_climb
    })
    .min_by(|a, b| a.1.total_cmp(&b.1))
    .map(|(index, _, _)| index)
}

/// Finds every edge of a ground polygon in `from` that meets an edge of a
/// ground polygon in `to`. Returns the index of the polygon in `from` and the
/// link to create.
fn edge_links(
  from: &[Poly],
  to: &[Poly],
  to_ref: impl Fn(usize) -> PolyRef,
  same_tile: bool,
  walkable_climb: f32,
) -> Vec<(usize, Link)> {
  let mut links = Vec::new();
  for (from_index, from_poly) in from.iter().enumerate() {
    if from_poly.is_off_mesh_connection() {
      continue;
    }
    let search_bounds = from_poly.bounds.expand_by_size(Vec3::new(
      PORTAL_TOLERANCE,
      walkable_climb,
      PORTAL_TOLERANCE,
    ));
    for (to_index, to_poly) in to.iter().enumerate() {
      if (same_tile && from_index == to_index)
        || to_poly.is_off_mesh_connection()
        || !search_bounds.intersects_bounds(&to_poly.bounds)
      {
        continue;
      }
      for edge in 0..from_poly.vertices.len() {
        let from_edge = (
          from_poly.vertices[edge],
          from_poly.vertices[(edge + 1) % from_poly.vertices.len()],
        );
        for other_edge in 0..to_poly.vertices.len() {
          let to_edge = (
            to_poly.vertices[other_edge],
            to_poly.vertices[(other_edge + 1) % to_poly.vertices.len()],
          );
          if let Some(portal) = shared_edge_portal(
            from_edge,
            to_edge,
            PORTAL_TOLERANCE,
            walkable_climb,
          ) {
            links.push((
              from_index,
              Link { target: to_ref(to_index), edge: Some(edge), portal },
            ));
          }
        }
      }
    }
  }
  links
}

#[cfg(test)]
#[path = "nav_mesh_test.rs"]
mod test;
