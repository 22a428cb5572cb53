use glam::{Vec3, Vec3Swizzles};

use crate::{
  area::NULL_AREA,
  geometry::point_in_polygon_xz,
  heightfield::{Heightfield, DIRECTION_OFFSETS, MAX_HEIGHT},
};

/// The range of spans belonging to one column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct CompactCell {
  pub(crate) first: u32,
  pub(crate) count: u32,
}

/// The open space above a walkable span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CompactSpan {
  /// The floor of the open space, in cell heights.
  pub(crate) y: u16,
  /// The height of the open space.
  pub(crate) clearance: u16,
  /// The index of the span reachable in each direction.
  pub(crate) neighbours: [Option<u32>; 4],
}

/// The walkable surface of a heightfield, stored as the open space above
/// each walkable span, with links to reachable neighbouring spans.
#[derive(Clone, Debug)]
pub(crate) struct CompactHeightfield {
  pub(crate) width: i32,
  pub(crate) height: i32,
  pub(crate) border_size: i32,
  pub(crate) walkable_height: i32,
  pub(crate) walkable_climb: i32,
  pub(crate) bmin: Vec3,
  pub(crate) bmax: Vec3,
  pub(crate) cell_size: f32,
  pub(crate) cell_height: f32,
  pub(crate) cells: Vec<CompactCell>,
  pub(crate) spans: Vec<CompactSpan>,
  pub(crate) areas: Vec<u8>,
}

impl CompactHeightfield {
  /// Collects the walkable spans of `heightfield`. Two spans are linked when
  /// an agent fits through the opening between them and the step between
  /// their floors is at most `walkable_climb`.
  pub(crate) fn new(
    heightfield: &Heightfield,
    border_size: i32,
    walkable_height: i32,
    walkable_climb: i32,
  ) -> Self {
    let mut cells = Vec::with_capacity(heightfield.columns.len());
    let mut spans = Vec::new();
    let mut areas = Vec::new();

    for column in heightfield.columns.iter() {
      let first = spans.len() as u32;
      for (span_index, span) in column.iter().enumerate() {
        if span.area == NULL_AREA {
          continue;
        }
        let floor = span.max as i32;
        let ceiling = column
          .get(span_index + 1)
          .map_or(MAX_HEIGHT as i32, |next| next.min as i32);
        spans.push(CompactSpan {
          y: span.max,
          clearance: (ceiling - floor).clamp(0, MAX_HEIGHT as i32) as u16,
          neighbours: [None; 4],
        });
        areas.push(span.area);
      }
      cells.push(CompactCell { first, count: spans.len() as u32 - first });
    }

    let mut compact = Self {
      width: heightfield.width,
      height: heightfield.height,
      border_size,
      walkable_height,
      walkable_climb,
      bmin: heightfield.bmin,
      bmax: heightfield.bmax,
      cell_size: heightfield.cell_size,
      cell_height: heightfield.cell_height,
      cells,
      spans,
      areas,
    };
    compact.link_neighbours();
    compact
  }

  fn link_neighbours(&mut self) {
    for z in 0..self.height {
      for x in 0..self.width {
        let cell = self.cells[(x + z * self.width) as usize];
        for span_index in cell.first..cell.first + cell.count {
          let span = self.spans[span_index as usize];
          let mut neighbours = [None; 4];
          for (direction, (dx, dz)) in DIRECTION_OFFSETS.into_iter().enumerate()
          {
            let Some(neighbour_cell) = self.cell(x + dx, z + dz) else {
              continue;
            };
            neighbours[direction] = (neighbour_cell.first
              ..neighbour_cell.first + neighbour_cell.count)
              .find(|&neighbour_index| {
                let neighbour = self.spans[neighbour_index as usize];
                let bottom = span.y.max(neighbour.y) as i32;
                let top = (span.y as i32 + span.clearance as i32)
                  .min(neighbour.y as i32 + neighbour.clearance as i32);
                top - bottom >= self.walkable_height
                  && (neighbour.y as i32 - span.y as i32).abs()
                    <= self.walkable_climb
              });
          }
          self.spans[span_index as usize].neighbours = neighbours;
        }
      }
    }
  }

  pub(crate) fn cell(&self, x: i32, z: i32) -> Option<CompactCell> {
    if x < 0 || z < 0 || x >= self.width || z >= self.height {
      return None;
    }
    Some(self.cells[(x + z * self.width) as usize])
  }

  /// The index of the span linked to `span_index` in `direction`, if it is
  /// still walkable.
  pub(crate) fn walkable_neighbour(
    &self,
    span_index: usize,
    direction: usize,
  ) -> Option<usize> {
    let neighbour = self.spans[span_index].neighbours[direction]? as usize;
    (self.areas[neighbour] != NULL_AREA).then_some(neighbour)
  }

  /// Shrinks the walkable area by `radius` cells, so agents of that radius
  /// keep clear of walls and drops.
  pub(crate) fn erode_walkable_area(&mut self, radius: i32) {
    let mut distances = vec![u8::MAX; self.spans.len()];

    // Spans at the boundary of the walkable area start at zero.
    for span_index in 0..self.spans.len() {
      if self.areas[span_index] == NULL_AREA {
        distances[span_index] = 0;
        continue;
      }
      let all_neighbours_walkable = (0..4).all(|direction| {
        self.walkable_neighbour(span_index, direction).is_some()
      });
      if !all_neighbours_walkable {
        distances[span_index] = 0;
      }
    }

    // Two chamfer passes: orthogonal steps cost 2, diagonal steps cost 3.
    let relax = |distances: &mut [u8],
                 span_index: usize,
                 first: usize,
                 second: usize| {
      let Some(neighbour) = self.spans[span_index].neighbours[first] else {
        return;
      };
      let neighbour = neighbour as usize;
      distances[span_index] =
        distances[span_index].min(distances[neighbour].saturating_add(2));
      if let Some(diagonal) = self.spans[neighbour].neighbours[second] {
        distances[span_index] = distances[span_index]
          .min(distances[diagonal as usize].saturating_add(3));
      }
    };

    for z in 0..self.height {
      for x in 0..self.width {
        let cell = self.cells[(x + z * self.width) as usize];
        for span_index in cell.first..cell.first + cell.count {
          relax(&mut distances, span_index as usize, 0, 3);
          relax(&mut distances, span_index as usize, 3, 2);
        }
      }
    }
    for z in (0..self.height).rev() {
      for x in (0..self.width).rev() {
        let cell = self.cells[(x + z * self.width) as usize];
        for span_index in cell.first..cell.first + cell.count {
          relax(&mut distances, span_index as usize, 2, 1);
          relax(&mut distances, span_index as usize, 1, 0);
        }
      }
    }

    let threshold = (radius * 2).clamp(0, u8::MAX as i32) as u8;
    for (area, distance) in self.areas.iter_mut().zip(distances) {
      if distance < threshold {
        *area = NULL_AREA;
      }
    }
  }

  /// Tags every walkable span inside the prism formed by `polygon` and the
  /// height range `[hmin, hmax]` with `area`.
  pub(crate) fn mark_convex_poly_area(
    &mut self,
    polygon: &[Vec3],
    hmin: f32,
    hmax: f32,
    area: u8,
  ) {
    let (Some(min), Some(max)) = (
      polygon.iter().map(|vertex| vertex.xz()).reduce(|a, b| a.min(b)),
      polygon.iter().map(|vertex| vertex.xz()).reduce(|a, b| a.max(b)),
    ) else {
      return;
    };

    let min_x = ((min.x - self.bmin.x) / self.cell_size).floor() as i32;
    let max_x = ((max.x - self.bmin.x) / self.cell_size).floor() as i32;
    let min_z = ((min.y - self.bmin.z) / self.cell_size).floor() as i32;
    let max_z = ((max.y - self.bmin.z) / self.cell_size).floor() as i32;
    if max_x < 0 || max_z < 0 || min_x >= self.width || min_z >= self.height {
      return;
    }
    let min_y = ((hmin - self.bmin.y) / self.cell_height).floor() as i32;
    let max_y = ((hmax - self.bmin.y) / self.cell_height).floor() as i32;

    for z in min_z.max(0)..=max_z.min(self.height - 1) {
      for x in min_x.max(0)..=max_x.min(self.width - 1) {
        let cell = self.cells[(x + z * self.width) as usize];
        let center = Vec3::new(
          self.bmin.x + (x as f32 + 0.5) * self.cell_size,
          0.0,
          self.bmin.z + (z as f32 + 0.5) * self.cell_size,
        );
        if !point_in_polygon_xz(center, polygon) {
          continue;
        }
        for span_index in cell.first..cell.first + cell.count {
          let span_index = span_index as usize;
          if self.areas[span_index] == NULL_AREA {
            continue;
          }
          let y = self.spans[span_index].y as i32;
          if y >= min_y && y <= max_y {
            self.areas[span_index] = area;
          }
        }
      }
    }
  }

  /// The lowest and highest walkable floor, or `None` if nothing is walkable.
  #[cfg(test)]
  pub(crate) fn walkable_height_range(&self) -> Option<(u16, u16)> {
    self
      .spans
      .iter()
      .zip(self.areas.iter())
      .filter(|(_, area)| **area != NULL_AREA)
      .map(|(span, _)| span.y)
      .fold(None, |range, y| match range {
        None => Some((y, y)),
        Some((min, max)) => Some((y.min(min), y.max(max))),
      })
  }
}

#[cfg(test)]
#[path = "compact_heightfield_test.rs"]
mod test;
