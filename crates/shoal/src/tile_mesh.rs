use std::collections::HashMap;

use disjoint::DisjointSet;
use glam::Vec3;

use crate::{
  area::{area_from_voxel, AreaType, PolyFlags},
  config::VoxelConfig,
  tile_layer::TileLayer,
};

/// A polygon of a tile before it is added to a navigation mesh.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TilePolygon {
  /// Indices into the tile's vertices, counter-clockwise in (x, z).
  pub(crate) vertices: Vec<usize>,
  pub(crate) area: AreaType,
  pub(crate) flags: PolyFlags,
}

/// The polygons covering the walkable cells of one tile layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct TileMesh {
  pub(crate) vertices: Vec<Vec3>,
  pub(crate) polygons: Vec<TilePolygon>,
}

/// Covers the walkable cells of `layer` with convex polygons. Cells of the
/// same area are grouped into rectangles no longer than the maximum edge
/// length. Small islands of cells that do not reach the edge of the tile are
/// dropped.
pub(crate) fn build_tile_mesh(layer: &TileLayer, config: &VoxelConfig) -> TileMesh {
  let width = layer.header.width as i32;
  let height = layer.header.height as i32;
  let mut usable = (0..layer.heights.len())
    .map(|index| {
      layer.is_walkable(index) && area_from_voxel(layer.areas[index]).is_some()
    })
    .collect::<Vec<_>>();
  remove_small_islands(layer, &mut usable, config.min_region_area);

  let max_extent = if config.max_edge_len > 0 {
    config.max_edge_len
  } else {
    i32::MAX
  };
  let max_height_step = config.walkable_climb.max(0) as i32;

  let mut builder = MeshBuilder {
    layer,
    cell_size: config.cell_size,
    cell_height: config.cell_height,
    vertex_lookup: HashMap::new(),
    mesh: TileMesh::default(),
  };
  let mut used = vec![false; layer.heights.len()];

  for z in 0..height {
    for x in 0..width {
      let start = (x + z * width) as usize;
      if !usable[start] || used[start] {
        continue;
      }
      let area = layer.areas[start];
      let base_height = layer.heights[start] as i32;
      let fits = |index: usize| {
        usable[index]
          && !used[index]
          && layer.areas[index] == area
          && (layer.heights[index] as i32 - base_height).abs() <= max_height_step
      };

      let mut rect_width = 1;
      while rect_width < max_extent && x + rect_width < width {
        let previous = start + rect_width as usize - 1;
        let next = start + rect_width as usize;
        if !fits(next) || !layer.is_connected(previous, 2) {
          break;
        }
        rect_width += 1;
      }

      let mut rect_depth = 1;
      'grow: while rect_depth < max_extent && z + rect_depth < height {
        for offset in 0..rect_width {
          let above = (x + offset + (z + rect_depth - 1) * width) as usize;
          let next = (x + offset + (z + rect_depth) * width) as usize;
          if !fits(next) || !layer.is_connected(above, 1) {
            break 'grow;
          }
          if offset > 0 && !layer.is_connected(next - 1, 2) {
            break 'grow;
          }
        }
        rect_depth += 1;
      }

      for dz in 0..rect_depth {
        for dx in 0..rect_width {
          used[(x + dx + (z + dz) * width) as usize] = true;
        }
      }
      builder.add_rectangle(
        (x, z),
        (x + rect_width, z + rect_depth),
        area,
        config.max_verts_per_poly,
      );
    }
  }
  builder.mesh
}

/// Clears `usable` for every island of connected cells smaller than
/// `min_cells` that does not touch the edge of the tile.
fn remove_small_islands(layer: &TileLayer, usable: &mut [bool], min_cells: i32) {
  if min_cells <= 1 {
    return;
  }
  let width = layer.header.width as i32;
  let height = layer.header.height as i32;

  let mut islands = DisjointSet::with_len(usable.len());
  for z in 0..height {
    for x in 0..width {
      let index = (x + z * width) as usize;
      if !usable[index] {
        continue;
      }
      if x + 1 < width && usable[index + 1] && layer.is_connected(index, 2) {
        islands.join(index, index + 1);
      }
      let below = index + width as usize;
      if z + 1 < height && usable[below] && layer.is_connected(index, 1) {
        islands.join(index, below);
      }
    }
  }

  let mut sizes = HashMap::<usize, (i32, bool)>::new();
  for z in 0..height {
    for x in 0..width {
      let index = (x + z * width) as usize;
      if !usable[index] {
        continue;
      }
      let on_edge = x == 0 || z == 0 || x == width - 1 || z == height - 1;
      let entry = sizes.entry(islands.root_of(index)).or_insert((0, false));
      entry.0 += 1;
      entry.1 |= on_edge;
    }
  }

  for index in 0..usable.len() {
    if !usable[index] {
      continue;
    }
    let (size, on_edge) = sizes[&islands.root_of(index)];
    if size < min_cells && !on_edge {
      usable[index] = false;
    }
  }
}

struct MeshBuilder<'a> {
  layer: &'a TileLayer,
  cell_size: f32,
  cell_height: f32,
  vertex_lookup: HashMap<(i32, i32, u8), usize>,
  mesh: TileMesh,
}

impl MeshBuilder<'_> {
  /// Adds the rectangle of cells from `min` (inclusive) to `max` (exclusive).
  fn add_rectangle(
    &mut self,
    min: (i32, i32),
    max: (i32, i32),
    area_code: u8,
    max_verts_per_poly: i32,
  ) {
    // Each corner takes its height from the cell of the rectangle touching
    // it.
    let corners = [
      ((min.0, min.1), (min.0, min.1)),
      ((max.0, min.1), (max.0 - 1, min.1)),
      ((max.0, max.1), (max.0 - 1, max.1 - 1)),
      ((min.0, max.1), (min.0, max.1 - 1)),
    ];
    let vertices =
      corners.map(|(corner, cell)| self.vertex(corner, cell)).to_vec();

    let Some(area) = area_from_voxel(area_code) else {
      return;
    };
    let flags = area.poly_flags();
    if max_verts_per_poly >= 4 {
      self.mesh.polygons.push(TilePolygon { vertices, area, flags });
    } else {
      self.mesh.polygons.push(TilePolygon {
        vertices: vec![vertices[0], vertices[1], vertices[2]],
        area,
        flags,
      });
      self.mesh.polygons.push(TilePolygon {
        vertices: vec![vertices[0], vertices[2], vertices[3]],
        area,
        flags,
      });
    }
  }

  fn vertex(&mut self, corner: (i32, i32), cell: (i32, i32)) -> usize {
    let layer = self.layer;
    let cell_index = layer
      .cell_index(cell.0, cell.1)
      .expect("rectangle corners belong to cells of the layer");
    let cell_height = layer.heights[cell_index];
    let key = (corner.0, corner.1, cell_height);
    if let Some(&index) = self.vertex_lookup.get(&key) {
      return index;
    }
    let index = self.mesh.vertices.len();
    self.mesh.vertices.push(Vec3::new(
      layer.header.bmin.x + corner.0 as f32 * self.cell_size,
      layer.floor_height(cell_index, self.cell_height),
      layer.header.bmin.z + corner.1 as f32 * self.cell_size,
    ));
    self.vertex_lookup.insert(key, index);
    index
  }
}

#[cfg(test)]
#[path = "tile_mesh_test.rs"]
mod test;
