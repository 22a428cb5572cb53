use glam::Vec3;

use crate::area::{NULL_AREA, WALKABLE_AREA};

/// The largest span height. Used as the top of the open space above the
/// highest span in a column.
pub(crate) const MAX_HEIGHT: u16 = 0xffff;

/// The grid offsets of the four neighbours of a cell, indexed by direction.
pub(crate) const DIRECTION_OFFSETS: [(i32, i32); 4] =
  [(-1, 0), (0, 1), (1, 0), (0, -1)];

/// A solid run of voxels in a column. Heights are in cell heights above the
/// bottom of the heightfield.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Span {
  pub(crate) min: u16,
  pub(crate) max: u16,
  pub(crate) area: u8,
}

/// A voxelized piece of geometry. Each column holds its spans sorted from the
/// bottom up, never overlapping.
#[derive(Clone, Debug)]
pub(crate) struct Heightfield {
  pub(crate) width: i32,
  pub(crate) height: i32,
  pub(crate) bmin: Vec3,
  pub(crate) bmax: Vec3,
  pub(crate) cell_size: f32,
  pub(crate) cell_height: f32,
  pub(crate) columns: Vec<Vec<Span>>,
}

impl Heightfield {
  pub(crate) fn new(
    width: i32,
    height: i32,
    bmin: Vec3,
    bmax: Vec3,
    cell_size: f32,
    cell_height: f32,
  ) -> Self {
    Self {
      width,
      height,
      bmin,
      bmax,
      cell_size,
      cell_height,
      columns: vec![Vec::new(); (width * height) as usize],
    }
  }

  pub(crate) fn column_index(&self, x: i32, z: i32) -> Option<usize> {
    if x < 0 || z < 0 || x >= self.width || z >= self.height {
      return None;
    }
    Some((x + z * self.width) as usize)
  }

  #[cfg(test)]
  pub(crate) fn span_count(&self) -> usize {
    self.columns.iter().map(Vec::len).sum()
  }

  /// Adds a span to column `(x, z)`, merging it with every span it touches.
  /// When the tops of merged spans are within `flag_merge_threshold`, the
  /// higher area code wins.
  pub(crate) fn add_span(
    &mut self,
    x: i32,
    z: i32,
    min: u16,
    max: u16,
    area: u8,
    flag_merge_threshold: i32,
  ) {
    let Some(column_index) = self.column_index(x, z) else {
      return;
    };
    let column = &mut self.columns[column_index];

    let mut new_span = Span { min, max, area };
    let mut index = 0;
    while index < column.len() {
      let current = column[index];
      if current.min > new_span.max {
        break;
      }
      if current.max < new_span.min {
        index += 1;
        continue;
      }

      new_span.min = new_span.min.min(current.min);
      new_span.max = new_span.max.max(current.max);
      if (new_span.max as i32 - current.max as i32).abs() <= flag_merge_threshold
      {
        new_span.area = new_span.area.max(current.area);
      }
      column.remove(index);
    }
    column.insert(index, new_span);
  }

  /// Rasterizes the triangle `(a, b, c)` into the heightfield, tagging the
  /// resulting spans with `area`.
  pub(crate) fn rasterize_triangle(
    &mut self,
    (a, b, c): (Vec3, Vec3, Vec3),
    area: u8,
    flag_merge_threshold: i32,
  ) {
    let triangle_min = a.min(b).min(c);
    let triangle_max = a.max(b).max(c);
    if triangle_min.x > self.bmax.x
      || triangle_max.x < self.bmin.x
      || triangle_min.y > self.bmax.y
      || triangle_max.y < self.bmin.y
      || triangle_min.z > self.bmax.z
      || triangle_max.z < self.bmin.z
    {
      return;
    }

    let inverse_cell_size = 1.0 / self.cell_size;
    let inverse_cell_height = 1.0 / self.cell_height;
    let field_height = self.bmax.y - self.bmin.y;

    let z0 = (((triangle_min.z - self.bmin.z) * inverse_cell_size).floor()
      as i32)
      .clamp(-1, self.height - 1);
    let z1 = (((triangle_max.z - self.bmin.z) * inverse_cell_size).floor()
      as i32)
      .clamp(-1, self.height - 1);

    let mut remaining = vec![a, b, c];
    for z in z0..=z1 {
      let row_max_z = self.bmin.z + (z + 1) as f32 * self.cell_size;
      let (row, rest) = divide_polygon(&remaining, row_max_z, 2);
      remaining = rest;
      if row.len() < 3 || z < 0 {
        continue;
      }

      let (row_min_x, row_max_x) = row
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
          (min.min(v.x), max.max(v.x))
        });
      let x0 = (((row_min_x - self.bmin.x) * inverse_cell_size).floor() as i32)
        .max(-1);
      let x1 = (((row_max_x - self.bmin.x) * inverse_cell_size).floor() as i32)
        .min(self.width - 1);
      if x1 < 0 || x0 > self.width - 1 {
        continue;
      }

      let mut row_remaining = row;
      for x in x0..=x1 {
        let cell_max_x = self.bmin.x + (x + 1) as f32 * self.cell_size;
        let (cell, rest) = divide_polygon(&row_remaining, cell_max_x, 0);
        row_remaining = rest;
        if cell.len() < 3 || x < 0 {
          continue;
        }

        let (mut span_min, mut span_max) = cell
          .iter()
          .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
            (min.min(v.y), max.max(v.y))
          });
        span_min -= self.bmin.y;
        span_max -= self.bmin.y;
        if span_max < 0.0 || span_min > field_height {
          continue;
        }
        span_min = span_min.max(0.0);
        span_max = span_max.min(field_height);

        let min = ((span_min * inverse_cell_height).floor() as i32)
          .clamp(0, MAX_HEIGHT as i32);
        let max = ((span_max * inverse_cell_height).ceil() as i32)
          .clamp(min + 1, MAX_HEIGHT as i32);
        self.add_span(x, z, min as u16, max as u16, area, flag_merge_threshold);
      }
    }
  }

  /// Lets agents step over small obstacles: an unwalkable span whose top is
  /// within `walkable_climb` of a walkable span directly below becomes
  /// walkable.
  pub(crate) fn filter_low_hanging_obstacles(&mut self, walkable_climb: i32) {
    for column in self.columns.iter_mut() {
      let mut previous: Option<Span> = None;
      let mut previous_walkable = false;
      for span in column.iter_mut() {
        let walkable = span.area != NULL_AREA;
        if let Some(previous) = previous {
          if !walkable
            && previous_walkable
            && (span.max as i32 - previous.max as i32).abs() <= walkable_climb
          {
            span.area = previous.area;
          }
        }
        // The original walkability is carried so obstacles do not stack.
        previous_walkable = walkable;
        previous = Some(*span);
      }
    }
  }

  /// Marks spans at the edge of a drop (higher than `walkable_climb`) as
  /// unwalkable, as well as spans on steep, stair-like neighbourhoods.
  pub(crate) fn filter_ledge_spans(
    &mut self,
    walkable_height: i32,
    walkable_climb: i32,
  ) {
    let mut ledges = Vec::new();
    for z in 0..self.height {
      for x in 0..self.width {
        let column_index = (x + z * self.width) as usize;
        let column = &self.columns[column_index];
        for (span_index, span) in column.iter().enumerate() {
          if span.area == NULL_AREA {
            continue;
          }
          let bottom = span.max as i32;
          let top = column
            .get(span_index + 1)
            .map_or(MAX_HEIGHT as i32, |next| next.min as i32);

          let mut min_neighbour_height = MAX_HEIGHT as i32;
          let mut accessible_min = bottom;
          let mut accessible_max = bottom;

          for (dx, dz) in DIRECTION_OFFSETS {
            let Some(neighbour_index) = self.column_index(x + dx, z + dz)
            else {
              min_neighbour_height =
                min_neighbour_height.min(-walkable_climb - bottom);
              continue;
            };
            let neighbour_column = &self.columns[neighbour_index];

            // The open space below the lowest neighbour span.
            let neighbour_bottom = -walkable_climb;
            let neighbour_top = neighbour_column
              .first()
              .map_or(MAX_HEIGHT as i32, |first| first.min as i32);
            if top.min(neighbour_top) - bottom.max(neighbour_bottom)
              >= walkable_height
            {
              min_neighbour_height =
                min_neighbour_height.min(neighbour_bottom - bottom);
            }

            for (neighbour_span_index, neighbour_span) in
              neighbour_column.iter().enumerate()
            {
              let neighbour_bottom = neighbour_span.max as i32;
              let neighbour_top = neighbour_column
                .get(neighbour_span_index + 1)
                .map_or(MAX_HEIGHT as i32, |next| next.min as i32);
              if top.min(neighbour_top) - bottom.max(neighbour_bottom)
                < walkable_height
              {
                continue;
              }
              min_neighbour_height =
                min_neighbour_height.min(neighbour_bottom - bottom);
              if (neighbour_bottom - bottom).abs() <= walkable_climb {
                accessible_min = accessible_min.min(neighbour_bottom);
                accessible_max = accessible_max.max(neighbour_bottom);
              }
            }
          }

          if min_neighbour_height < -walkable_climb
            || accessible_max - accessible_min > walkable_climb
          {
            ledges.push((column_index, span_index));
          }
        }
      }
    }

    for (column_index, span_index) in ledges {
      self.columns[column_index][span_index].area = NULL_AREA;
    }
  }

  /// Marks spans without `walkable_height` of open space above them as
  /// unwalkable.
  pub(crate) fn filter_low_height_spans(&mut self, walkable_height: i32) {
    for column in self.columns.iter_mut() {
      for span_index in 0..column.len() {
        let top = column
          .get(span_index + 1)
          .map_or(MAX_HEIGHT as i32, |next| next.min as i32);
        if top - (column[span_index].max as i32) < walkable_height {
          column[span_index].area = NULL_AREA;
        }
      }
    }
  }
}

/// Marks each triangle as walkable if its slope is shallower than
/// `walkable_slope_angle` (in degrees).
pub(crate) fn mark_walkable_triangles(
  walkable_slope_angle: f32,
  normals: impl Iterator<Item = Vec3>,
) -> Vec<u8> {
  let threshold = walkable_slope_angle.to_radians().cos();
  normals
    .map(|normal| if normal.y > threshold { WALKABLE_AREA } else { NULL_AREA })
    .collect()
}

/// Splits the convex `polygon` along the plane where coordinate `axis` equals
/// `offset`. Returns the parts below and above the plane.
fn divide_polygon(
  polygon: &[Vec3],
  offset: f32,
  axis: usize,
) -> (Vec<Vec3>, Vec<Vec3>) {
  let mut below = Vec::with_capacity(polygon.len() + 1);
  let mut above = Vec::with_capacity(polygon.len() + 1);
  if polygon.is_empty() {
    return (below, above);
  }

  let distances =
    polygon.iter().map(|vertex| offset - vertex[axis]).collect::<Vec<_>>();
  let mut previous = polygon.len() - 1;
  for current in 0..polygon.len() {
    let previous_below = distances[previous] >= 0.0;
    let current_below = distances[current] >= 0.0;
    if previous_below != current_below {
      let t = distances[previous] / (distances[previous] - distances[current]);
      // Offsets from the previous vertex keep flat edges exactly flat.
      let crossing =
        polygon[previous] + (polygon[current] - polygon[previous]) * t;
      below.push(crossing);
      above.push(crossing);
    }
    if distances[current] > 0.0 {
      below.push(polygon[current]);
    } else if distances[current] < 0.0 {
      above.push(polygon[current]);
    } else {
      below.push(polygon[current]);
      above.push(polygon[current]);
    }
    previous = current;
  }
  (below, above)
}

#[cfg(test)]
#[path = "heightfield_test.rs"]
mod test;
