use std::collections::{HashMap, VecDeque};

use bitflags::bitflags;
use glam::Vec3;
use log::debug;
use thiserror::Error;

use crate::{
  astar::{self, AStarProblem},
  geometry::{
    clip_segment_to_polygon_xz, closest_on_segment_xz, point_in_polygon_xz,
    tri_area2,
  },
  nav_mesh::{Link, NavMesh, Poly, PolyRef},
  query_filter::QueryFilter,
};

/// Scales the straight-line distance used as the A* heuristic, so that it
/// never overestimates paths of unit cost.
const HEURISTIC_SCALE: f32 = 0.999;
/// The most polygons a single move along the surface may visit.
const MAX_MOVE_POLYS: usize = 48;
/// How far a point may be from a portal and still count as crossing it.
const PORTAL_CROSSING_TOLERANCE: f32 = 1e-2;

/// An error while querying a navigation mesh.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FindPathError {
  #[error("The polygon reference {0:?} is stale or invalid.")]
  InvalidPolyRef(PolyRef),
  #[error("The path has no polygons.")]
  EmptyPath,
  #[error("There is no walkable surface near {0}.")]
  NoPolygonNear(Vec3),
}

/// A corridor of polygons found by [`NavMesh::find_path`].
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PolyPath {
  pub(crate) polys: Vec<PolyRef>,
  /// Whether the path ends at the polygon closest to the goal rather than
  /// the goal polygon.
  pub(crate) is_partial: bool,
}

bitflags! {
  /// Describes a point of a straight path.
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub(crate) struct StraightPathFlags: u8 {
    const START = 0x01;
    const END = 0x02;
    /// The point is the start of an off-mesh connection.
    const OFF_MESH_CONNECTION = 0x04;
  }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct StraightPathPoint {
  pub(crate) position: Vec3,
  pub(crate) flags: StraightPathFlags,
  /// The polygon entered at this point. `None` for the end of the path.
  pub(crate) poly: Option<PolyRef>,
}

/// The result of casting a ray along the surface of the mesh.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RaycastHit {
  /// The fraction along the ray where it hit a wall, or `f32::MAX` if it
  /// reached the end.
  pub(crate) t: f32,
  /// The normal of the wall that was hit, pointing back towards the walkable
  /// surface. Zero if nothing was hit.
  pub(crate) normal: Vec3,
  /// The polygons the ray passed through.
  pub(crate) path: Vec<PolyRef>,
}

/// A concrete A* problem for paths between polygons.
struct PolyPathProblem<'a> {
  nav_mesh: &'a NavMesh,
  filter: &'a QueryFilter,
  start: PolyRef,
  start_point: Vec3,
  end: PolyRef,
  end_point: Vec3,
}

impl AStarProblem for PolyPathProblem<'_> {
  type ActionType = PolyRef;
  type StateType = PolyRef;

  fn initial_state(&self) -> PolyRef {
    self.start
  }

  fn successors(&self, state: &PolyRef) -> Vec<(f32, PolyRef, PolyRef)> {
    let Some(poly) = self.nav_mesh.poly(*state) else {
      return Vec::new();
    };
    let from = if *state == self.start { self.start_point } else { poly.center };
    let cost = self.filter.area_cost(poly.area);

    poly
      .links
      .iter()
      .filter_map(|link| {
        let target = self.nav_mesh.poly(link.target)?;
        if !self.filter.passes(target.flags, target.area) {
          return None;
        }
        let crossing = (link.portal.0 + link.portal.1) * 0.5;
        let to =
          if link.target == self.end { self.end_point } else { target.center };
        let action_cost = from.distance(crossing) * cost
          + crossing.distance(to) * self.filter.area_cost(target.area);
        Some((action_cost, link.target, link.target))
      })
      .collect()
  }

  fn heuristic(&self, state: &PolyRef) -> f32 {
    if *state == self.end {
      return 0.0;
    }
    self
      .nav_mesh
      .poly(*state)
      .map_or(0.0, |poly| poly.center.distance(self.end_point) * HEURISTIC_SCALE)
  }

  fn is_goal_state(&self, state: &PolyRef) -> bool {
    *state == self.end
  }
}

impl NavMesh {
  /// Finds a corridor of polygons from `start` to `end`, exploring at most
  /// `max_nodes` polygons. If `end` cannot be reached, the corridor leads to
  /// the reachable polygon closest to `end_point`.
  pub(crate) fn find_path(
    &self,
    (start, start_point): (PolyRef, Vec3),
    (end, end_point): (PolyRef, Vec3),
    filter: &QueryFilter,
    max_nodes: usize,
  ) -> Result<PolyPath, FindPathError> {
    if !self.is_valid_ref(start) {
      return Err(FindPathError::InvalidPolyRef(start));
    }
    if !self.is_valid_ref(end) {
      return Err(FindPathError::InvalidPolyRef(end));
    }

    let problem =
      PolyPathProblem { nav_mesh: self, filter, start, start_point, end, end_point };
    let result = astar::find_path(&problem, max_nodes);
    if result.is_partial {
      debug!(
        "Found a partial path after exploring {} polygons (out of nodes: {}).",
        result.stats.explored_nodes, result.stats.out_of_nodes
      );
    }

    let mut polys = Vec::with_capacity(result.path.len() + 1);
    polys.push(start);
    polys.extend(result.path);
    Ok(PolyPath { polys, is_partial: result.is_partial })
  }

  /// The portals crossed when following `path`, followed by the degenerate
  /// portal at `end_point`.
  fn path_portals(
    &self,
    path: &[PolyRef],
    end_point: Vec3,
  ) -> Result<Vec<(Vec3, Vec3)>, FindPathError> {
    let mut portals = Vec::with_capacity(path.len());
    for pair in path.windows(2) {
      let link = self
        .poly(pair[0])
        .ok_or(FindPathError::InvalidPolyRef(pair[0]))?
        .link_to(pair[1])
        .ok_or(FindPathError::InvalidPolyRef(pair[1]))?;
      portals.push(link.portal);
    }
    portals.push((end_point, end_point));
    Ok(portals)
  }

  /// Finds the corners of the shortest line from `start_point` to `end_point`
  /// through the corridor `path`, returning at most `max_points` points
  /// (including the start).
  pub(crate) fn find_straight_path(
    &self,
    start_point: Vec3,
    end_point: Vec3,
    path: &[PolyRef],
    max_points: usize,
  ) -> Result<Vec<StraightPathPoint>, FindPathError> {
    let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
      return Err(FindPathError::EmptyPath);
    };
    let start = self
      .closest_point_on_poly(first, start_point)
      .ok_or(FindPathError::InvalidPolyRef(first))?;
    let end = self
      .closest_point_on_poly(last, end_point)
      .ok_or(FindPathError::InvalidPolyRef(last))?;
    let portals = self.path_portals(path, end)?;
    let last_index = portals.len() - 1;
    // Both ends of an off-mesh connection are always corners, so the funnel
    // is split at the portals into and out of them.
    let off_mesh = path
      .iter()
      .map(|&poly| self.poly(poly).is_some_and(Poly::is_off_mesh_connection))
      .collect::<Vec<_>>();
    let touches_off_mesh =
      |portal: usize| off_mesh[portal] || off_mesh[portal + 1];

    let mut points = vec![StraightPathPoint {
      position: start,
      flags: StraightPathFlags::START,
      poly: Some(first),
    }];
    let (mut apex, mut apex_index, mut search_from) = (start, 0, 0);
    while points.len() < max_points.max(2) {
      let segment_end = (search_from..last_index)
        .find(|&portal| touches_off_mesh(portal))
        .unwrap_or(last_index);
      let (corner_index, corner) =
        next_corner(&portals[..=segment_end], apex_index, apex);
      search_from = corner_index + 1;
      if corner_index == last_index {
        points.push(StraightPathPoint {
          position: corner,
          flags: StraightPathFlags::END,
          poly: None,
        });
        break;
      }
      let entered = path[corner_index + 1];
      let flags = if off_mesh[corner_index + 1] {
        StraightPathFlags::OFF_MESH_CONNECTION
      } else {
        StraightPathFlags::empty()
      };
      points.push(StraightPathPoint { position: corner, flags, poly: Some(entered) });
      apex = corner;
      apex_index = corner_index;
    }
    Ok(points)
  }

  /// Casts a ray along the surface from `start_point` (on `start`) towards
  /// `end_point`, stopping at the first wall or after `max_polys` polygons.
  pub(crate) fn raycast(
    &self,
    (start, start_point): (PolyRef, Vec3),
    end_point: Vec3,
    filter: &QueryFilter,
    max_polys: usize,
  ) -> Result<RaycastHit, FindPathError> {
    let mut hit = RaycastHit { t: 0.0, normal: Vec3::ZERO, path: Vec::new() };
    let mut current = start;
    loop {
      let poly =
        self.poly(current).ok_or(FindPathError::InvalidPolyRef(current))?;
      if poly.is_off_mesh_connection() || hit.path.len() >= max_polys {
        return Ok(hit);
      }
      let Some(clip) =
        clip_segment_to_polygon_xz(start_point, end_point, &poly.vertices)
      else {
        return Ok(hit);
      };
      hit.path.push(current);

      let Some(exit_edge) = clip.exit_edge else {
        hit.t = f32::MAX;
        return Ok(hit);
      };
      hit.t = clip.t_exit;
      let exit_point = start_point.lerp(end_point, clip.t_exit);
      let next = poly.links.iter().find(|link| {
        link.edge == Some(exit_edge)
          && self.passes_filter(link.target, filter)
          && portal_contains(link, exit_point)
      });
      match next {
        Some(link) => current = link.target,
        None => {
          let a = poly.vertices[exit_edge];
          let b = poly.vertices[(exit_edge + 1) % poly.vertices.len()];
          let direction = b - a;
          hit.normal =
            Vec3::new(-direction.z, 0.0, direction.x).normalize_or_zero();
          return Ok(hit);
        }
      }
    }
  }

  /// Moves from `start_point` (on `start`) towards `end_point`, sliding
  /// along walls. Returns the reached position and the polygons from `start`
  /// to the polygon containing it.
  pub(crate) fn move_along_surface(
    &self,
    (start, start_point): (PolyRef, Vec3),
    end_point: Vec3,
    filter: &QueryFilter,
  ) -> Result<(Vec3, Vec<PolyRef>), FindPathError> {
    let start_poly =
      self.poly(start).ok_or(FindPathError::InvalidPolyRef(start))?;
    if start_poly.is_off_mesh_connection() {
      return Ok((start_point, vec![start]));
    }

    let search_center = (start_point + end_point) * 0.5;
    let search_radius = start_point.distance(end_point) * 0.5 + 1e-3;
    let mut parents = HashMap::from([(start, None)]);
    let mut queue = VecDeque::from([start]);
    let (mut best_node, mut best_point, mut best_distance) =
      (start, start_point, f32::MAX);

    while let Some(current) = queue.pop_front() {
      let Some(poly) = self.poly(current) else {
        continue;
      };
      if point_in_polygon_xz(end_point, &poly.vertices) {
        best_node = current;
        best_point = end_point;
        break;
      }

      for edge in 0..poly.vertices.len() {
        let neighbours = self.passable_links(poly, edge, filter);
        if neighbours.is_empty() {
          let a = poly.vertices[edge];
          let b = poly.vertices[(edge + 1) % poly.vertices.len()];
          let (t, distance) = closest_on_segment_xz(end_point, a, b);
          if distance < best_distance {
            best_distance = distance;
            best_point = a.lerp(b, t);
            best_node = current;
          }
          continue;
        }
        for link in neighbours {
          if parents.contains_key(&link.target) || parents.len() >= MAX_MOVE_POLYS
          {
            continue;
          }
          let (_, distance) =
            closest_on_segment_xz(search_center, link.portal.1, link.portal.0);
          if distance > search_radius * search_radius {
            continue;
          }
          parents.insert(link.target, Some(current));
          queue.push_back(link.target);
        }
      }
    }

    let mut visited = vec![best_node];
    let mut node = best_node;
    while let Some(&Some(parent)) = parents.get(&node) {
      visited.push(parent);
      node = parent;
    }
    visited.reverse();

    let height = self.poly_height(best_node, best_point).unwrap_or(best_point.y);
    Ok((Vec3::new(best_point.x, height, best_point.z), visited))
  }

  /// Collects the wall segments within `radius` of `center`, searching the
  /// polygons reachable from `start` through portals within `radius`. Also
  /// returns the searched polygons.
  pub(crate) fn find_local_walls(
    &self,
    start: PolyRef,
    center: Vec3,
    radius: f32,
    filter: &QueryFilter,
    max_polys: usize,
  ) -> (Vec<(Vec3, Vec3)>, Vec<PolyRef>) {
    let radius_squared = radius * radius;
    let mut visited = Vec::new();
    let mut walls = Vec::new();
    if !self.is_valid_ref(start) {
      return (walls, visited);
    }

    let mut queue = VecDeque::from([start]);
    visited.push(start);
    while let Some(current) = queue.pop_front() {
      let Some(poly) = self.poly(current) else {
        continue;
      };
      if poly.is_off_mesh_connection() {
        continue;
      }

      for edge in 0..poly.vertices.len() {
        let a = poly.vertices[edge];
        let b = poly.vertices[(edge + 1) % poly.vertices.len()];
        let neighbours = self.passable_links(poly, edge, filter);

        let mut covered = neighbours
          .iter()
          .map(|link| {
            let t0 = closest_on_segment_xz(link.portal.1, a, b).0;
            let t1 = closest_on_segment_xz(link.portal.0, a, b).0;
            (t0.min(t1), t0.max(t1))
          })
          .collect::<Vec<_>>();
        covered.sort_by(|x, y| x.0.total_cmp(&y.0));
        for (t_start, t_end) in uncovered_intervals(&covered) {
          let wall = (a.lerp(b, t_start), a.lerp(b, t_end));
          if closest_on_segment_xz(center, wall.0, wall.1).1 <= radius_squared {
            walls.push(wall);
          }
        }

        for link in neighbours {
          if visited.len() >= max_polys || visited.contains(&link.target) {
            continue;
          }
          let (_, distance) =
            closest_on_segment_xz(center, link.portal.1, link.portal.0);
          if distance > radius_squared {
            continue;
          }
          visited.push(link.target);
          queue.push_back(link.target);
        }
      }
    }
    (walls, visited)
  }

  /// The links across `edge` of `poly` into ground polygons passing `filter`.
  fn passable_links<'a>(
    &self,
    poly: &'a Poly,
    edge: usize,
    filter: &QueryFilter,
  ) -> Vec<&'a Link> {
    poly
      .links
      .iter()
      .filter(|link| {
        link.edge == Some(edge)
          && self.poly(link.target).is_some_and(|target| {
            !target.is_off_mesh_connection()
              && filter.passes(target.flags, target.area)
          })
      })
      .collect()
  }
}

/// Determines whether `point` lies on the portal of `link`.
fn portal_contains(link: &Link, point: Vec3) -> bool {
  let (_, distance) = closest_on_segment_xz(point, link.portal.1, link.portal.0);
  distance <= PORTAL_CROSSING_TOLERANCE * PORTAL_CROSSING_TOLERANCE
}

/// The parts of [0, 1] not covered by the sorted `covered` intervals.
fn uncovered_intervals(covered: &[(f32, f32)]) -> Vec<(f32, f32)> {
  const EPSILON: f32 = 1e-3;
  let mut result = Vec::new();
  let mut cursor = 0.0;
  for &(start, end) in covered {
    if start > cursor + EPSILON {
      result.push((cursor, start));
    }
    cursor = f32::max(cursor, end);
  }
  if cursor < 1.0 - EPSILON {
    result.push((cursor, 1.0));
  }
  result
}

/// Finds the next corner of the funnel through `portals` seen from `apex`,
/// starting at the portal at `start_index`. The last portal must be the
/// degenerate portal at the end point. Returns the index of the portal the
/// corner belongs to, and the corner.
pub(crate) fn next_corner(
  portals: &[(Vec3, Vec3)],
  start_index: usize,
  apex: Vec3,
) -> (usize, Vec3) {
  let last_index = portals.len() - 1;
  let (mut left_index, mut right_index) = (start_index, start_index);
  let (mut current_left, mut current_right) = portals[start_index];

  for portal_index in start_index + 1..=last_index {
    let (portal_left, portal_right) = portals[portal_index];

    if tri_area2(apex, current_right, portal_right) >= 0.0 {
      if tri_area2(apex, current_left, portal_right) <= 0.0 {
        right_index = portal_index;
        current_right = portal_right;
      } else {
        return (left_index, current_left);
      }
    }

    if tri_area2(apex, current_left, portal_left) <= 0.0 {
      if tri_area2(apex, current_right, portal_left) >= 0.0 {
        left_index = portal_index;
        current_left = portal_left;
      } else {
        return (right_index, current_right);
      }
    }
  }

  (last_index, portals[last_index].0)
}

#[cfg(test)]
#[path = "query_test.rs"]
mod test;
