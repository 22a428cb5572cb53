use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{Quat, Vec2, Vec3, Vec3Swizzles};
use lz4_flex::block::{
  compress_prepend_size, decompress_size_prepended, DecompressError,
};
use thiserror::Error;

use crate::area::NULL_AREA;

/// Identifies an encoded tile layer ("TLYR").
pub(crate) const TILE_LAYER_MAGIC: u32 = 0x544C_5952;
pub(crate) const TILE_LAYER_VERSION: u16 = 1;
/// The height of a cell that holds no walkable surface.
pub(crate) const EMPTY_HEIGHT: u8 = 0xff;

/// Where a tile layer sits in the world and which of its cells are used.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct TileLayerHeader {
  pub(crate) tile_x: i32,
  pub(crate) tile_z: i32,
  pub(crate) layer: u8,
  /// The world bounds of the layer. `bmin.y` is the height of a cell with
  /// height 0.
  pub(crate) bmin: Vec3,
  pub(crate) bmax: Vec3,
  /// The range of floor heights, in cell heights above the heightfield.
  pub(crate) hmin: u16,
  pub(crate) hmax: u16,
  pub(crate) width: u8,
  pub(crate) height: u8,
  /// The rectangle of cells holding walkable surface.
  pub(crate) min_x: u8,
  pub(crate) max_x: u8,
  pub(crate) min_z: u8,
  pub(crate) max_z: u8,
}

/// An error while decoding a tile layer.
#[derive(Debug, Error)]
pub enum TileLayerError {
  #[error("The tile layer data ends early.")]
  Truncated,
  #[error("The tile layer data has the wrong magic number {0:#x}.")]
  WrongMagic(u32),
  #[error("The tile layer data has version {0}, expected version 1.")]
  WrongVersion(u16),
  #[error("The tile layer grid could not be decompressed: {0}")]
  Decompress(#[from] DecompressError),
  #[error("The tile layer grid has {actual} bytes, expected {expected}.")]
  WrongGridSize { expected: usize, actual: usize },
}

/// One vertical layer of a tile: a grid of floor heights, areas and
/// neighbour connections.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TileLayer {
  pub(crate) header: TileLayerHeader,
  /// The floor height of each cell relative to `hmin`, or [`EMPTY_HEIGHT`].
  pub(crate) heights: Vec<u8>,
  pub(crate) areas: Vec<u8>,
  /// Bit `d` is set when the cell connects to its neighbour in direction
  /// `d` within this layer.
  pub(crate) connections: Vec<u8>,
}

impl TileLayer {
  pub(crate) fn cell_index(&self, x: i32, z: i32) -> Option<usize> {
    let (width, height) =
      (self.header.width as i32, self.header.height as i32);
    if x < 0 || z < 0 || x >= width || z >= height {
      return None;
    }
    Some((x + z * width) as usize)
  }

  pub(crate) fn is_walkable(&self, index: usize) -> bool {
    self.heights[index] != EMPTY_HEIGHT && self.areas[index] != NULL_AREA
  }

  pub(crate) fn is_connected(&self, index: usize, direction: usize) -> bool {
    self.connections[index] & (1 << direction) != 0
  }

  /// The world-space floor height of the cell at `index`.
  pub(crate) fn floor_height(&self, index: usize, cell_height: f32) -> f32 {
    self.header.bmin.y + self.heights[index] as f32 * cell_height
  }

  /// Serializes the layer: the header followed by the LZ4-compressed grids.
  pub(crate) fn encode(&self) -> Vec<u8> {
    let mut data = Vec::new();
    write_header(&mut data, &self.header)
      .expect("writing to a Vec never fails");

    let mut grid = Vec::with_capacity(self.heights.len() * 3);
    grid.extend_from_slice(&self.heights);
    grid.extend_from_slice(&self.areas);
    grid.extend_from_slice(&self.connections);
    data.extend(compress_prepend_size(&grid));
    data
  }

  pub(crate) fn decode(data: &[u8]) -> Result<Self, TileLayerError> {
    let mut cursor = Cursor::new(data);
    let header = read_header(&mut cursor)?;
    let mut compressed = Vec::new();
    cursor
      .read_to_end(&mut compressed)
      .map_err(|_| TileLayerError::Truncated)?;
    let mut grid = decompress_size_prepended(&compressed)?;

    let cell_count = header.width as usize * header.height as usize;
    if grid.len() != cell_count * 3 {
      return Err(TileLayerError::WrongGridSize {
        expected: cell_count * 3,
        actual: grid.len(),
      });
    }
    let connections = grid.split_off(cell_count * 2);
    let areas = grid.split_off(cell_count);
    Ok(Self { header, heights: grid, areas, connections })
  }

  /// Marks walkable cells inside a vertical cylinder as unwalkable.
  /// `position` is the centre of the cylinder's base. Returns whether any
  /// cell changed.
  pub(crate) fn carve_cylinder(
    &mut self,
    position: Vec3,
    radius: f32,
    height: f32,
    cell_size: f32,
    cell_height: f32,
  ) -> bool {
    let radius_squared = radius * radius;
    self.carve(
      position.xz() - radius,
      position.xz() + radius,
      (position.y, position.y + height),
      cell_size,
      cell_height,
      |point| point.xz().distance_squared(position.xz()) <= radius_squared,
    )
  }

  /// Marks walkable cells inside a box rotated by `rotation` radians about
  /// Y as unwalkable. `center` is the centre of the box. Returns whether any
  /// cell changed.
  pub(crate) fn carve_box(
    &mut self,
    center: Vec3,
    half_extents: Vec3,
    rotation: f32,
    cell_size: f32,
    cell_height: f32,
  ) -> bool {
    let inverse_rotation = Quat::from_rotation_y(-rotation);
    let reach = half_extents.xz().length();
    self.carve(
      center.xz() - reach,
      center.xz() + reach,
      (center.y - half_extents.y, center.y + half_extents.y),
      cell_size,
      cell_height,
      |point| {
        let local = inverse_rotation * (point - center);
        local.x.abs() <= half_extents.x && local.z.abs() <= half_extents.z
      },
    )
  }

  fn carve(
    &mut self,
    rect_min: Vec2,
    rect_max: Vec2,
    (bottom, top): (f32, f32),
    cell_size: f32,
    cell_height: f32,
    contains: impl Fn(Vec3) -> bool,
  ) -> bool {
    let origin = self.header.bmin;
    let min_x = ((rect_min.x - origin.x) / cell_size).floor() as i32;
    let max_x = ((rect_max.x - origin.x) / cell_size).floor() as i32;
    let min_z = ((rect_min.y - origin.z) / cell_size).floor() as i32;
    let max_z = ((rect_max.y - origin.z) / cell_size).floor() as i32;

    let mut changed = false;
    for z in min_z.max(0)..=max_z.min(self.header.height as i32 - 1) {
      for x in min_x.max(0)..=max_x.min(self.header.width as i32 - 1) {
        let Some(index) = self.cell_index(x, z) else {
          continue;
        };
        if !self.is_walkable(index) {
          continue;
        }
        let floor = self.floor_height(index, cell_height);
        if floor < bottom - cell_height || floor > top {
          continue;
        }
        let center = Vec3::new(
          origin.x + (x as f32 + 0.5) * cell_size,
          floor,
          origin.z + (z as f32 + 0.5) * cell_size,
        );
        if contains(center) {
          self.areas[index] = NULL_AREA;
          changed = true;
        }
      }
    }
    changed
  }
}

fn write_header(
  writer: &mut impl Write,
  header: &TileLayerHeader,
) -> std::io::Result<()> {
  writer.write_u32::<LittleEndian>(TILE_LAYER_MAGIC)?;
  writer.write_u16::<LittleEndian>(TILE_LAYER_VERSION)?;
  writer.write_i32::<LittleEndian>(header.tile_x)?;
  writer.write_i32::<LittleEndian>(header.tile_z)?;
  writer.write_u8(header.layer)?;
  for value in header.bmin.to_array().into_iter().chain(header.bmax.to_array())
  {
    writer.write_f32::<LittleEndian>(value)?;
  }
  writer.write_u16::<LittleEndian>(header.hmin)?;
  writer.write_u16::<LittleEndian>(header.hmax)?;
  writer.write_all(&[
    header.width,
    header.height,
    header.min_x,
    header.max_x,
    header.min_z,
    header.max_z,
  ])
}

fn read_header(
  reader: &mut impl Read,
) -> Result<TileLayerHeader, TileLayerError> {
  let truncated = |_| TileLayerError::Truncated;
  let magic = reader.read_u32::<LittleEndian>().map_err(truncated)?;
  if magic != TILE_LAYER_MAGIC {
    return Err(TileLayerError::WrongMagic(magic));
  }
  let version = reader.read_u16::<LittleEndian>().map_err(truncated)?;
  if version != TILE_LAYER_VERSION {
    return Err(TileLayerError::WrongVersion(version));
  }
  let tile_x = reader.read_i32::<LittleEndian>().map_err(truncated)?;
  let tile_z = reader.read_i32::<LittleEndian>().map_err(truncated)?;
  let layer = reader.read_u8().map_err(truncated)?;
  let mut bounds = [0.0; 6];
  reader.read_f32_into::<LittleEndian>(&mut bounds).map_err(truncated)?;
  let hmin = reader.read_u16::<LittleEndian>().map_err(truncated)?;
  let hmax = reader.read_u16::<LittleEndian>().map_err(truncated)?;
  let mut sizes = [0; 6];
  reader.read_exact(&mut sizes).map_err(truncated)?;
  Ok(TileLayerHeader {
    tile_x,
    tile_z,
    layer,
    bmin: Vec3::new(bounds[0], bounds[1], bounds[2]),
    bmax: Vec3::new(bounds[3], bounds[4], bounds[5]),
    hmin,
    hmax,
    width: sizes[0],
    height: sizes[1],
    min_x: sizes[2],
    max_x: sizes[3],
    min_z: sizes[4],
    max_z: sizes[5],
  })
}

/// Reads just the header of an encoded tile layer.
pub(crate) fn decode_header(
  data: &[u8],
) -> Result<TileLayerHeader, TileLayerError> {
  read_header(&mut Cursor::new(data))
}

#[cfg(test)]
#[path = "tile_layer_test.rs"]
mod test;
