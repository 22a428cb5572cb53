use glam::{Vec3, Vec3Swizzles};

use crate::{
  nav_mesh::{NavMesh, PolyRef},
  query::{StraightPathFlags, StraightPathPoint},
  query_filter::QueryFilter,
};

/// Corners closer than this to the agent are considered reached.
const MIN_TARGET_DISTANCE: f32 = 0.01;
/// The most polygons the visibility shortcut may raycast through.
const MAX_SHORTCUT_POLYS: usize = 32;
/// The node budget of the search used to shorten the start of the corridor.
const TOPOLOGY_SEARCH_NODES: usize = 32;

/// The corridor of polygons an agent follows from its position to its
/// target. The first polygon contains the position, the last contains the
/// target.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct PathCorridor {
  position: Vec3,
  target: Vec3,
  path: Vec<PolyRef>,
}

impl PathCorridor {
  /// Resets the corridor to a single polygon with the target at `position`.
  pub(crate) fn reset(&mut self, poly: PolyRef, position: Vec3) {
    self.position = position;
    self.target = position;
    self.path = vec![poly];
  }

  /// Empties the corridor. Used for agents that are off the mesh.
  pub(crate) fn clear(&mut self, position: Vec3) {
    self.position = position;
    self.target = position;
    self.path.clear();
  }

  /// Replaces the corridor with `path`, which must start at the polygon of
  /// the current position.
  pub(crate) fn set_corridor(&mut self, target: Vec3, path: Vec<PolyRef>) {
    self.target = target;
    self.path = path;
  }

  pub(crate) fn position(&self) -> Vec3 {
    self.position
  }

  pub(crate) fn target(&self) -> Vec3 {
    self.target
  }

  pub(crate) fn path(&self) -> &[PolyRef] {
    &self.path
  }

  pub(crate) fn first_poly(&self) -> Option<PolyRef> {
    self.path.first().copied()
  }

  pub(crate) fn last_poly(&self) -> Option<PolyRef> {
    self.path.last().copied()
  }

  /// Finds up to `max_corners` upcoming corners of the straight path to the
  /// target. Corners already reached are skipped, and the corners stop at the
  /// first off-mesh connection.
  pub(crate) fn find_corners(
    &self,
    nav_mesh: &NavMesh,
    max_corners: usize,
  ) -> Vec<StraightPathPoint> {
    let Ok(points) = nav_mesh.find_straight_path(
      self.position,
      self.target,
      &self.path,
      max_corners + 1,
    ) else {
      return Vec::new();
    };

    let mut corners = points.into_iter().skip(1).collect::<Vec<_>>();
    let reached = corners
      .iter()
      .position(|corner| {
        corner.flags.contains(StraightPathFlags::OFF_MESH_CONNECTION)
          || corner.position.xz().distance_squared(self.position.xz())
            > MIN_TARGET_DISTANCE * MIN_TARGET_DISTANCE
      })
      .unwrap_or(corners.len());
    corners.drain(..reached);

    if let Some(off_mesh) = corners.iter().position(|corner| {
      corner.flags.contains(StraightPathFlags::OFF_MESH_CONNECTION)
    }) {
      corners.truncate(off_mesh + 1);
    }
    corners
  }

  /// Shortcuts the start of the corridor if `next` (usually the second
  /// corner) is directly visible. The ray is extended towards `next` up to
  /// `range`.
  pub(crate) fn optimize_path_visibility(
    &mut self,
    next: Vec3,
    range: f32,
    nav_mesh: &NavMesh,
    filter: &QueryFilter,
  ) {
    let Some(first) = self.first_poly() else {
      return;
    };
    let distance = self.position.xz().distance(next.xz());
    if distance < MIN_TARGET_DISTANCE {
      return;
    }
    let distance = (distance + MIN_TARGET_DISTANCE).min(range);
    let goal = self.position + (next - self.position) * (range / distance);

    let Ok(hit) = nav_mesh.raycast(
      (first, self.position),
      goal,
      filter,
      MAX_SHORTCUT_POLYS,
    ) else {
      return;
    };
    if hit.path.len() > 1 && hit.t > 0.99 {
      self.path = merge_start_shortcut(&self.path, &hit.path);
    }
  }

  /// Searches for a shorter route through the start of the corridor with a
  /// small node budget. Returns whether the corridor changed.
  pub(crate) fn optimize_path_topology(
    &mut self,
    nav_mesh: &NavMesh,
    filter: &QueryFilter,
  ) -> bool {
    let (Some(first), Some(last)) = (self.first_poly(), self.last_poly())
    else {
      return false;
    };
    if self.path.len() < 3 {
      return false;
    }

    let Ok(result) = nav_mesh.find_path(
      (first, self.position),
      (last, self.target),
      filter,
      TOPOLOGY_SEARCH_NODES,
    ) else {
      return false;
    };
    let merged = merge_start_shortcut(&self.path, &result.polys);
    let changed = merged != self.path;
    self.path = merged;
    changed
  }

  /// Moves the position towards `new_position` along the surface, updating
  /// the start of the corridor to the polygons moved through. Returns
  /// whether the move succeeded.
  pub(crate) fn move_position(
    &mut self,
    new_position: Vec3,
    nav_mesh: &NavMesh,
    filter: &QueryFilter,
  ) -> bool {
    let Some(first) = self.first_poly() else {
      return false;
    };
    let Ok((position, visited)) =
      nav_mesh.move_along_surface((first, self.position), new_position, filter)
    else {
      return false;
    };
    self.path = merge_start_moved(&self.path, &visited);
    self.position = position;
    true
  }

  /// Moves the target to `new_target` if it lies on the last polygon.
  pub(crate) fn move_target(&mut self, new_target: Vec3, nav_mesh: &NavMesh) {
    if let Some(point) = self
      .last_poly()
      .and_then(|last| nav_mesh.closest_point_on_poly(last, new_target))
    {
      self.target = point;
    }
  }

  /// Whether the first `look_ahead` polygons are still valid and pass
  /// `filter`.
  pub(crate) fn is_valid(
    &self,
    look_ahead: usize,
    nav_mesh: &NavMesh,
    filter: &QueryFilter,
  ) -> bool {
    !self.path.is_empty()
      && self
        .path
        .iter()
        .take(look_ahead)
        .all(|&poly| nav_mesh.passes_filter(poly, filter))
  }

  /// Restarts the corridor at `safe_poly` after the first polygon became
  /// invalid, keeping the target. The caller must replan.
  pub(crate) fn fix_path_start(&mut self, safe_poly: PolyRef, safe_position: Vec3) {
    self.position = safe_position;
    self.path = vec![safe_poly];
  }

  /// Cuts the corridor at the first invalid polygon, clamping the target to
  /// the last valid one. Falls back to `safe_poly` if nothing is valid.
  pub(crate) fn trim_invalid_path(
    &mut self,
    safe_poly: PolyRef,
    safe_position: Vec3,
    nav_mesh: &NavMesh,
    filter: &QueryFilter,
  ) {
    let valid = self
      .path
      .iter()
      .position(|&poly| !nav_mesh.passes_filter(poly, filter))
      .unwrap_or(self.path.len());
    if valid == 0 {
      self.reset(safe_poly, safe_position);
      return;
    }
    self.path.truncate(valid);
    let target = self.target;
    self.move_target(target, nav_mesh);
  }

  /// Advances the corridor over the off-mesh connection `off_mesh`, leaving
  /// the position at its far end. Returns the (entry, exit) points of the
  /// connection.
  pub(crate) fn move_over_off_mesh_connection(
    &mut self,
    off_mesh: PolyRef,
    nav_mesh: &NavMesh,
  ) -> Option<(Vec3, Vec3)> {
    let index = self.path.iter().position(|&poly| poly == off_mesh)?;
    if index == 0 || index + 1 >= self.path.len() {
      return None;
    }
    let endpoints =
      nav_mesh.off_mesh_connection_endpoints(self.path[index - 1], off_mesh)?;
    self.path.drain(..=index);
    self.position = endpoints.1;
    Some(endpoints)
  }
}

/// Finds the last polygon of `path` that also appears in `other`, searching
/// both from the back. Returns (index in `path`, index in `other`).
fn furthest_common(path: &[PolyRef], other: &[PolyRef]) -> Option<(usize, usize)> {
  path.iter().enumerate().rev().find_map(|(path_index, poly)| {
    other
      .iter()
      .rposition(|other_poly| other_poly == poly)
      .map(|other_index| (path_index, other_index))
  })
}

/// Replaces the start of `path` after moving through `visited`, which starts
/// at the first polygon of `path` and ends at the polygon reached.
pub(crate) fn merge_start_moved(
  path: &[PolyRef],
  visited: &[PolyRef],
) -> Vec<PolyRef> {
  let Some((path_index, visited_index)) = furthest_common(path, visited) else {
    return path.to_vec();
  };
  // The polygons moved through after leaving the corridor lead back to it
  // in reverse.
  visited[visited_index..]
    .iter()
    .rev()
    .chain(&path[path_index + 1..])
    .copied()
    .collect()
}

/// Replaces the start of `path` with `shortcut`, which starts at the first
/// polygon of `path` and rejoins it later.
pub(crate) fn merge_start_shortcut(
  path: &[PolyRef],
  shortcut: &[PolyRef],
) -> Vec<PolyRef> {
  let Some((path_index, shortcut_index)) = furthest_common(path, shortcut)
  else {
    return path.to_vec();
  };
  if shortcut_index == 0 {
    return path.to_vec();
  }
  shortcut[..shortcut_index]
    .iter()
    .chain(&path[path_index..])
    .copied()
    .collect()
}

#[cfg(test)]
#[path = "path_corridor_test.rs"]
mod test;
