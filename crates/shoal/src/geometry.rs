use glam::{FloatExt, Vec2, Vec3, Vec3Swizzles};

const EPSILON: f32 = 1e-6;

/// Twice the signed area of the triangle `(a, b, c)` projected onto the XZ
/// plane. Positive when the triangle winds counter-clockwise in (x, z).
pub(crate) fn tri_area2(a: Vec3, b: Vec3, c: Vec3) -> f32 {
  (b - a).xz().perp_dot((c - a).xz())
}

/// Finds where the segment from `start` to `end` crosses the front face of
/// the triangle `(a, b, c)`. Front faces are those whose normal points
/// against the segment direction. Returns the fraction along the segment.
pub(crate) fn intersect_segment_triangle(
  start: Vec3,
  end: Vec3,
  (a, b, c): (Vec3, Vec3, Vec3),
) -> Option<f32> {
  let ab = b - a;
  let ac = c - a;
  let segment_back = start - end;

  let normal = ab.cross(ac);
  let denominator = segment_back.dot(normal);
  if denominator <= 0.0 {
    return None;
  }

  let a_to_start = start - a;
  let t = a_to_start.dot(normal);
  if t < 0.0 || t > denominator {
    return None;
  }

  let e = segment_back.cross(a_to_start);
  let v = ac.dot(e);
  if v < 0.0 || v > denominator {
    return None;
  }
  let w = -ab.dot(e);
  if w < 0.0 || v + w > denominator {
    return None;
  }

  Some(t / denominator)
}

/// Clips the segment from `start` to `end` against the box `(min, max)`.
/// Returns the entry and exit fractions along the segment.
pub(crate) fn intersect_segment_aabb(
  start: Vec3,
  end: Vec3,
  (min, max): (Vec3, Vec3),
) -> Option<(f32, f32)> {
  let delta = end - start;
  let mut t_min: f32 = 0.0;
  let mut t_max: f32 = 1.0;
  for axis in 0..3 {
    if delta[axis].abs() < EPSILON {
      if start[axis] < min[axis] || start[axis] > max[axis] {
        return None;
      }
      continue;
    }
    let inverse = 1.0 / delta[axis];
    let t1 = (min[axis] - start[axis]) * inverse;
    let t2 = (max[axis] - start[axis]) * inverse;
    t_min = t_min.max(t1.min(t2));
    t_max = t_max.min(t1.max(t2));
    if t_min > t_max {
      return None;
    }
  }
  Some((t_min, t_max))
}

/// Determines whether the 2D segment `(start, end)` touches the rectangle
/// `(min, max)`.
pub(crate) fn segment_overlaps_rect(
  start: Vec2,
  end: Vec2,
  (min, max): (Vec2, Vec2),
) -> bool {
  let delta = end - start;
  let mut t_min: f32 = 0.0;
  let mut t_max: f32 = 1.0;
  for axis in 0..2 {
    if delta[axis].abs() < EPSILON {
      if start[axis] < min[axis] || start[axis] > max[axis] {
        return false;
      }
      continue;
    }
    let inverse = 1.0 / delta[axis];
    let t1 = (min[axis] - start[axis]) * inverse;
    let t2 = (max[axis] - start[axis]) * inverse;
    t_min = t_min.max(t1.min(t2));
    t_max = t_max.min(t1.max(t2));
    if t_min > t_max {
      return false;
    }
  }
  true
}

/// Determines whether `point` lies inside `polygon` on the XZ plane. Works for
/// either winding.
pub(crate) fn point_in_polygon_xz(point: Vec3, polygon: &[Vec3]) -> bool {
  let mut inside = false;
  let mut j = polygon.len().wrapping_sub(1);
  for i in 0..polygon.len() {
    let (vi, vj) = (polygon[i], polygon[j]);
    if (vi.z > point.z) != (vj.z > point.z)
      && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
    {
      inside = !inside;
    }
    j = i;
  }
  inside
}

/// Projects `point` onto the segment `(a, b)` on the XZ plane. Returns the
/// fraction along the segment and the squared XZ distance to it.
pub(crate) fn closest_on_segment_xz(point: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
  let segment = b.xz() - a.xz();
  let length_squared = segment.length_squared();
  let t = if length_squared < EPSILON {
    0.0
  } else {
    (segment.dot(point.xz() - a.xz()) / length_squared).clamp(0.0, 1.0)
  };
  let closest = a.xz() + segment * t;
  (t, closest.distance_squared(point.xz()))
}

/// Projects `point` onto the segment `(a, b)` in 3D.
pub(crate) fn closest_point_on_segment(point: Vec3, a: Vec3, b: Vec3) -> Vec3 {
  let segment = b - a;
  let length_squared = segment.length_squared();
  if length_squared < EPSILON {
    return a;
  }
  let t = (segment.dot(point - a) / length_squared).clamp(0.0, 1.0);
  a + segment * t
}

/// Computes the height of the triangle `(a, b, c)` above `point` on the XZ
/// plane. Returns `None` if `point` is outside the triangle.
pub(crate) fn triangle_height(
  point: Vec2,
  (a, b, c): (Vec3, Vec3, Vec3),
) -> Option<f32> {
  const TOLERANCE: f32 = 1e-4;

  let v0 = b.xz() - a.xz();
  let v1 = c.xz() - a.xz();
  let v2 = point - a.xz();
  let denominator = v0.perp_dot(v1);
  if denominator.abs() < EPSILON {
    return None;
  }
  let s = v2.perp_dot(v1) / denominator;
  let t = v0.perp_dot(v2) / denominator;
  if s < -TOLERANCE || t < -TOLERANCE || s + t > 1.0 + TOLERANCE {
    return None;
  }
  Some(a.y + s * (b.y - a.y) + t * (c.y - a.y))
}

/// Computes the height of the convex `polygon` above `point`. Returns `None`
/// if `point` is outside the polygon on the XZ plane.
pub(crate) fn polygon_height(point: Vec3, polygon: &[Vec3]) -> Option<f32> {
  if polygon.len() < 3 {
    return None;
  }
  (1..polygon.len() - 1).find_map(|i| {
    triangle_height(point.xz(), (polygon[0], polygon[i], polygon[i + 1]))
  })
}

/// Finds the point on the convex `polygon` closest to `point` when viewed from
/// above. Points inside the polygon are dropped onto its surface; points
/// outside snap to the nearest boundary edge.
pub(crate) fn closest_point_on_polygon(point: Vec3, polygon: &[Vec3]) -> Vec3 {
  if let Some(height) = polygon_height(point, polygon) {
    return Vec3::new(point.x, height, point.z);
  }

  let mut best = (f32::INFINITY, point);
  let mut previous = polygon.len().wrapping_sub(1);
  for current in 0..polygon.len() {
    let (a, b) = (polygon[previous], polygon[current]);
    let (t, distance_squared) = closest_on_segment_xz(point, a, b);
    if distance_squared < best.0 {
      best = (distance_squared, a.lerp(b, t));
    }
    previous = current;
  }
  best.1
}

/// The result of clipping a segment against a polygon on the XZ plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SegmentClip {
  /// The fraction along the segment where it enters the polygon.
  pub(crate) t_enter: f32,
  /// The fraction along the segment where it leaves the polygon.
  pub(crate) t_exit: f32,
  /// The edge crossed when entering, if the segment starts outside.
  pub(crate) enter_edge: Option<usize>,
  /// The edge crossed when leaving, if the segment ends outside.
  pub(crate) exit_edge: Option<usize>,
}

/// Clips the segment `(start, end)` to the convex, counter-clockwise (in x, z)
/// `polygon` on the XZ plane. Edge `i` runs from vertex `i` to vertex `i + 1`.
pub(crate) fn clip_segment_to_polygon_xz(
  start: Vec3,
  end: Vec3,
  polygon: &[Vec3],
) -> Option<SegmentClip> {
  let direction = (end - start).xz();
  let mut clip =
    SegmentClip { t_enter: 0.0, t_exit: 1.0, enter_edge: None, exit_edge: None };

  for edge_index in 0..polygon.len() {
    let a = polygon[edge_index];
    let b = polygon[(edge_index + 1) % polygon.len()];
    let edge = (b - a).xz();
    let distance = edge.perp_dot(start.xz() - a.xz());
    let rate = edge.perp_dot(direction);
    if rate.abs() < EPSILON {
      if distance < 0.0 {
        return None;
      }
      continue;
    }
    let t = -distance / rate;
    if rate > 0.0 {
      if t > clip.t_enter {
        clip.t_enter = t;
        clip.enter_edge = Some(edge_index);
      }
    } else if t < clip.t_exit {
      clip.t_exit = t;
      clip.exit_edge = Some(edge_index);
    }
    if clip.t_enter > clip.t_exit {
      return None;
    }
  }
  Some(clip)
}

/// Finds the portal shared by an edge of one polygon and an edge of its
/// neighbour. The edges must be collinear on the XZ plane (within
/// `tolerance`), run in opposite directions, overlap by more than
/// `tolerance`, and be within `max_vertical_gap` of each other along the
/// overlap.
///
/// Returns the overlap as `(left, right)` as seen when walking from the
/// polygon owning `edge` (counter-clockwise in x, z) into the neighbour.
pub(crate) fn shared_edge_portal(
  edge: (Vec3, Vec3),
  other_edge: (Vec3, Vec3),
  tolerance: f32,
  max_vertical_gap: f32,
) -> Option<(Vec3, Vec3)> {
  let edge_dir = (edge.1 - edge.0).xz();
  let length_squared = edge_dir.length_squared();
  if length_squared < tolerance * tolerance {
    return None;
  }
  let length = length_squared.sqrt();

  let offset_0 = edge_dir.perp_dot(other_edge.0.xz() - edge.0.xz()) / length;
  let offset_1 = edge_dir.perp_dot(other_edge.1.xz() - edge.0.xz()) / length;
  if offset_0.abs() > tolerance || offset_1.abs() > tolerance {
    return None;
  }
  if (other_edge.1 - other_edge.0).xz().dot(edge_dir) >= 0.0 {
    return None;
  }

  // `other_edge` runs backwards, so its end projects before its start.
  let other_t = (
    edge_dir.dot(other_edge.1.xz() - edge.0.xz()) / length_squared,
    edge_dir.dot(other_edge.0.xz() - edge.0.xz()) / length_squared,
  );
  let t_min = other_t.0.max(0.0);
  let t_max = other_t.1.min(1.0);
  if (t_max - t_min) * length <= tolerance {
    return None;
  }

  let other_height_at = |t: f32| {
    let span = other_t.1 - other_t.0;
    let s = if span.abs() < EPSILON { 0.0 } else { (t - other_t.0) / span };
    other_edge.1.y.lerp(other_edge.0.y, s)
  };
  let right = edge.0.lerp(edge.1, t_min);
  let left = edge.0.lerp(edge.1, t_max);
  if (right.y - other_height_at(t_min)).abs() > max_vertical_gap
    || (left.y - other_height_at(t_max)).abs() > max_vertical_gap
  {
    return None;
  }

  Some((left, right))
}

#[cfg(test)]
#[path = "geometry_test.rs"]
mod test;
