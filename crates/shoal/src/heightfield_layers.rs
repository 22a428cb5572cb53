use std::collections::{BTreeSet, HashSet, VecDeque};

use disjoint::DisjointSet;
use glam::Vec3;
use log::warn;

use crate::{
  area::NULL_AREA,
  compact_heightfield::CompactHeightfield,
  tile_layer::{TileLayer, TileLayerHeader, EMPTY_HEIGHT},
};

/// The largest height difference within one layer, in cell heights.
const MAX_LAYER_HEIGHT_RANGE: u16 = EMPTY_HEIGHT as u16 - 1;

/// A connected set of spans with at most one span per column.
#[derive(Debug)]
struct Region {
  columns: HashSet<usize>,
  y_min: u16,
  y_max: u16,
}

impl Region {
  fn accepts(&self, column: usize, y: u16) -> bool {
    !self.columns.contains(&column)
      && self.y_max.max(y) - self.y_min.min(y) <= MAX_LAYER_HEIGHT_RANGE
  }

  fn can_merge(&self, other: &Region) -> bool {
    self.columns.is_disjoint(&other.columns)
      && self.y_max.max(other.y_max) - self.y_min.min(other.y_min)
        <= MAX_LAYER_HEIGHT_RANGE
  }
}

/// Splits the walkable surface of `compact` into layers, where each layer
/// holds at most one floor per column, and crops each layer to the tile
/// (excluding the border). Layers are ordered from the bottom up, and only the
/// lowest `max_layers` are kept.
pub(crate) fn build_heightfield_layers(
  compact: &CompactHeightfield,
  tile_x: i32,
  tile_z: i32,
  max_layers: usize,
) -> Vec<TileLayer> {
  let span_columns = span_columns(compact);
  let (regions, region_of) = flood_regions(compact, &span_columns);
  let (regions, region_of) = merge_regions(compact, regions, region_of);

  let mut order = (0..regions.len()).collect::<Vec<_>>();
  order.sort_by_key(|&region| regions[region].y_min);

  let mut layers = Vec::new();
  for region in order {
    if layers.len() >= max_layers {
      warn!(
        "Tile ({}, {}) has more than {} layers. The rest are dropped.",
        tile_x, tile_z, max_layers
      );
      break;
    }
    if let Some(layer) = crop_layer(
      compact,
      &span_columns,
      &region_of,
      region,
      &regions[region],
      (tile_x, tile_z, layers.len() as u8),
    ) {
      layers.push(layer);
    }
  }
  layers
}

/// The column index of every span.
fn span_columns(compact: &CompactHeightfield) -> Vec<usize> {
  let mut columns = vec![0; compact.spans.len()];
  for (column, cell) in compact.cells.iter().enumerate() {
    for span in cell.first..cell.first + cell.count {
      columns[span as usize] = column;
    }
  }
  columns
}

fn flood_regions(
  compact: &CompactHeightfield,
  span_columns: &[usize],
) -> (Vec<Region>, Vec<Option<usize>>) {
  let mut regions = Vec::<Region>::new();
  let mut region_of = vec![None; compact.spans.len()];

  for seed in 0..compact.spans.len() {
    if region_of[seed].is_some() || compact.areas[seed] == NULL_AREA {
      continue;
    }
    let region_index = regions.len();
    let mut region = Region {
      columns: HashSet::from([span_columns[seed]]),
      y_min: compact.spans[seed].y,
      y_max: compact.spans[seed].y,
    };
    region_of[seed] = Some(region_index);

    let mut queue = VecDeque::from([seed]);
    while let Some(current) = queue.pop_front() {
      for direction in 0..4 {
        let Some(neighbour) = compact.walkable_neighbour(current, direction)
        else {
          continue;
        };
        if region_of[neighbour].is_some() {
          continue;
        }
        let y = compact.spans[neighbour].y;
        if !region.accepts(span_columns[neighbour], y) {
          continue;
        }
        region.columns.insert(span_columns[neighbour]);
        region.y_min = region.y_min.min(y);
        region.y_max = region.y_max.max(y);
        region_of[neighbour] = Some(region_index);
        queue.push_back(neighbour);
      }
    }
    regions.push(region);
  }
  (regions, region_of)
}

/// Merges neighbouring regions that do not overlap, so a floor split by the
/// flood fill ends up in as few layers as possible.
fn merge_regions(
  compact: &CompactHeightfield,
  regions: Vec<Region>,
  region_of: Vec<Option<usize>>,
) -> (Vec<Region>, Vec<Option<usize>>) {
  let mut adjacent = BTreeSet::new();
  for span in 0..compact.spans.len() {
    let Some(region) = region_of[span] else {
      continue;
    };
    for direction in 0..4 {
      let Some(neighbour) = compact.walkable_neighbour(span, direction) else {
        continue;
      };
      if let Some(neighbour_region) = region_of[neighbour] {
        if neighbour_region != region {
          adjacent.insert((
            region.min(neighbour_region),
            region.max(neighbour_region),
          ));
        }
      }
    }
  }

  let mut sets = DisjointSet::with_len(regions.len());
  let mut merged = regions.into_iter().map(Some).collect::<Vec<_>>();
  for (a, b) in adjacent {
    let (root_a, root_b) = (sets.root_of(a), sets.root_of(b));
    if root_a == root_b {
      continue;
    }
    let (Some(region_a), Some(region_b)) = (&merged[root_a], &merged[root_b])
    else {
      continue;
    };
    if !region_a.can_merge(region_b) {
      continue;
    }

    let (Some(mut region_a), Some(region_b)) =
      (merged[root_a].take(), merged[root_b].take())
    else {
      continue;
    };
    region_a.columns.extend(region_b.columns);
    region_a.y_min = region_a.y_min.min(region_b.y_min);
    region_a.y_max = region_a.y_max.max(region_b.y_max);
    sets.join(root_a, root_b);
    merged[sets.root_of(root_a)] = Some(region_a);
  }

  // Renumber the surviving regions densely.
  let mut new_index = vec![None; merged.len()];
  let mut regions = Vec::new();
  for (index, region) in merged.into_iter().enumerate() {
    if let Some(region) = region {
      new_index[index] = Some(regions.len());
      regions.push(region);
    }
  }
  let region_of = region_of
    .into_iter()
    .map(|region| region.and_then(|region| new_index[sets.root_of(region)]))
    .collect();
  (regions, region_of)
}

fn crop_layer(
  compact: &CompactHeightfield,
  span_columns: &[usize],
  region_of: &[Option<usize>],
  region_index: usize,
  region: &Region,
  (tile_x, tile_z, layer): (i32, i32, u8),
) -> Option<TileLayer> {
  let border = compact.border_size;
  let width = compact.width - border * 2;
  let height = compact.height - border * 2;
  let cell_count = (width * height) as usize;

  let mut heights = vec![EMPTY_HEIGHT; cell_count];
  let mut areas = vec![NULL_AREA; cell_count];
  let mut connections = vec![0; cell_count];
  let mut used: Option<(i32, i32, i32, i32)> = None;

  for span in 0..compact.spans.len() {
    if region_of[span] != Some(region_index) {
      continue;
    }
    let column = span_columns[span] as i32;
    let x = column % compact.width - border;
    let z = column / compact.width - border;
    if x < 0 || z < 0 || x >= width || z >= height {
      continue;
    }
    let index = (x + z * width) as usize;
    heights[index] = (compact.spans[span].y - region.y_min) as u8;
    areas[index] = compact.areas[span];
    for direction in 0..4 {
      let same_layer = compact
        .walkable_neighbour(span, direction)
        .is_some_and(|neighbour| region_of[neighbour] == Some(region_index));
      if same_layer {
        connections[index] |= 1 << direction;
      }
    }
    used = Some(match used {
      None => (x, x, z, z),
      Some((min_x, max_x, min_z, max_z)) => {
        (min_x.min(x), max_x.max(x), min_z.min(z), max_z.max(z))
      }
    });
  }

  let (min_x, max_x, min_z, max_z) = used?;
  let border_offset = border as f32 * compact.cell_size;
  let origin = compact.bmin + Vec3::new(border_offset, 0.0, border_offset);
  Some(TileLayer {
    header: TileLayerHeader {
      tile_x,
      tile_z,
      layer,
      bmin: Vec3::new(
        origin.x,
        compact.bmin.y + region.y_min as f32 * compact.cell_height,
        origin.z,
      ),
      bmax: Vec3::new(
        origin.x + width as f32 * compact.cell_size,
        compact.bmin.y + region.y_max as f32 * compact.cell_height,
        origin.z + height as f32 * compact.cell_size,
      ),
      hmin: region.y_min,
      hmax: region.y_max,
      width: width as u8,
      height: height as u8,
      min_x: min_x as u8,
      max_x: max_x as u8,
      min_z: min_z as u8,
      max_z: max_z as u8,
    },
    heights,
    areas,
    connections,
  })
}

#[cfg(test)]
#[path = "heightfield_layers_test.rs"]
mod test;
