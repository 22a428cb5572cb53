use glam::{Vec3, Vec3Swizzles};
use log::debug;

use crate::{
  area::{voxel_area, NULL_AREA},
  build_context::{BuildContext, BuildTimer},
  compact_heightfield::CompactHeightfield,
  config::VoxelConfig,
  convex_volume::ConvexVolumes,
  heightfield::{mark_walkable_triangles, Heightfield},
  heightfield_layers::build_heightfield_layers,
  input_geometry::InputGeometry,
  tile_layer::TileLayer,
};

/// Turns the input geometry under one tile into tile layers.
pub(crate) struct TileRasterizer<'a> {
  pub(crate) geometry: &'a InputGeometry,
  pub(crate) volumes: &'a ConvexVolumes,
  pub(crate) config: &'a VoxelConfig,
}

impl TileRasterizer<'_> {
  /// Builds every layer of tile `(tile_x, tile_z)`. Returns no layers if the
  /// tile holds no walkable surface.
  pub(crate) fn rasterize_tile(
    &self,
    tile_x: i32,
    tile_z: i32,
    context: &mut BuildContext,
  ) -> Vec<TileLayer> {
    context.start_timer(BuildTimer::Total);
    let layers = match self.build_compact_heightfield(tile_x, tile_z, context) {
      Some(compact) => {
        context.start_timer(BuildTimer::Layers);
        let layers = build_heightfield_layers(
          &compact,
          tile_x,
          tile_z,
          self.config.max_layers as usize,
        );
        context.stop_timer(BuildTimer::Layers);
        layers
      }
      None => Vec::new(),
    };
    context.stop_timer(BuildTimer::Total);
    layers
  }

  /// Rebuilds only the floors of tile `(tile_x, tile_z)` between the world
  /// heights `min_y` and `max_y`, producing a single layer numbered
  /// `layer_index`. When the range holds several floors, the largest one is
  /// kept.
  pub(crate) fn rasterize_single_layer(
    &self,
    tile_x: i32,
    tile_z: i32,
    layer_index: u8,
    (min_y, max_y): (f32, f32),
    context: &mut BuildContext,
  ) -> Option<TileLayer> {
    context.start_timer(BuildTimer::Total);
    let mut compact = self.build_compact_heightfield(tile_x, tile_z, context);
    let layer = compact.as_mut().and_then(|compact| {
      let lowest = ((min_y - compact.bmin.y) / compact.cell_height).floor();
      let highest = ((max_y - compact.bmin.y) / compact.cell_height).ceil();
      for (span, area) in compact.spans.iter().zip(compact.areas.iter_mut()) {
        let y = span.y as f32;
        if y < lowest || y > highest {
          *area = NULL_AREA;
        }
      }

      context.start_timer(BuildTimer::Layers);
      let layers = build_heightfield_layers(
        compact,
        tile_x,
        tile_z,
        self.config.max_layers as usize,
      );
      context.stop_timer(BuildTimer::Layers);
      if layers.len() > 1 {
        debug!(
          "Tile ({}, {}) has {} floors between {} and {}. Keeping the largest.",
          tile_x,
          tile_z,
          layers.len(),
          min_y,
          max_y
        );
      }
      let mut layer = layers.into_iter().max_by_key(|layer| {
        (0..layer.heights.len()).filter(|&cell| layer.is_walkable(cell)).count()
      })?;
      layer.header.layer = layer_index;
      Some(layer)
    });
    context.stop_timer(BuildTimer::Total);
    layer
  }

  fn build_compact_heightfield(
    &self,
    tile_x: i32,
    tile_z: i32,
    context: &mut BuildContext,
  ) -> Option<CompactHeightfield> {
    let config = self.config;
    let (tile_min, tile_max) = config.tile_bounds(tile_x, tile_z);
    let border = config.border_size as f32 * config.cell_size;
    let field_min = tile_min - Vec3::new(border, 0.0, border);
    let field_max = tile_max + Vec3::new(border, 0.0, border);

    let triangles =
      self.geometry.triangles_in_rect(field_min.xz(), field_max.xz());
    if triangles.is_empty() {
      return None;
    }

    context.start_timer(BuildTimer::Rasterization);
    let mut heightfield = Heightfield::new(
      config.width,
      config.height,
      field_min,
      field_max,
      config.cell_size,
      config.cell_height,
    );
    let mesh = self.geometry.mesh();
    let areas = mark_walkable_triangles(
      config.walkable_slope_angle,
      triangles.iter().map(|&triangle| mesh.normals[triangle]),
    );
    for (&triangle, area) in triangles.iter().zip(areas) {
      heightfield.rasterize_triangle(
        mesh.triangle(triangle),
        area,
        config.walkable_climb,
      );
    }
    context.stop_timer(BuildTimer::Rasterization);

    context.start_timer(BuildTimer::Filtering);
    heightfield.filter_low_hanging_obstacles(config.walkable_climb);
    heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    heightfield.filter_low_height_spans(config.walkable_height);
    context.stop_timer(BuildTimer::Filtering);

    context.start_timer(BuildTimer::CompactHeightfield);
    let mut compact = CompactHeightfield::new(
      &heightfield,
      config.border_size,
      config.walkable_height,
      config.walkable_climb,
    );
    context.stop_timer(BuildTimer::CompactHeightfield);

    context.start_timer(BuildTimer::Erosion);
    compact.erode_walkable_area(config.walkable_radius);
    context.stop_timer(BuildTimer::Erosion);

    context.start_timer(BuildTimer::MarkAreas);
    for volume in self.volumes.iter() {
      let (min, max) = volume.footprint;
      if max.x < field_min.x
        || max.y < field_min.z
        || min.x > field_max.x
        || min.y > field_max.z
      {
        continue;
      }
      compact.mark_convex_poly_area(
        &volume.vertices,
        volume.hmin,
        volume.hmax,
        voxel_area(volume.area),
      );
    }
    context.stop_timer(BuildTimer::MarkAreas);

    Some(compact)
  }
}

#[cfg(test)]
#[path = "rasterizer_test.rs"]
mod test;
