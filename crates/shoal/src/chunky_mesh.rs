use glam::{Vec2, Vec3, Vec3Swizzles};
use ord_subset::OrdVar;

use crate::{
  geometry::segment_overlaps_rect,
  mesh_data::MeshData,
  util::{BoundingBox, BoundingBoxHierarchy},
};

/// The most triangles stored in a single chunk.
pub(crate) const TRIANGLES_PER_CHUNK: usize = 256;

/// A group of nearby triangles.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Chunk {
  pub(crate) bounds: BoundingBox,
  pub(crate) triangles: Vec<usize>,
}

/// Buckets the triangles of a mesh into spatially coherent chunks, so tile
/// rasterization and ray casts only visit triangles near the area of interest.
pub(crate) struct ChunkyTriMesh {
  chunks: Vec<Chunk>,
  hierarchy: Option<BoundingBoxHierarchy<usize>>,
}

impl ChunkyTriMesh {
  pub(crate) fn new(mesh: &MeshData) -> Self {
    let mut items = (0..mesh.triangles.len())
      .map(|index| {
        let (a, b, c) = mesh.triangle(index);
        (index, BoundingBox::from_points([a, b, c]))
      })
      .collect::<Vec<_>>();

    let mut chunks = Vec::new();
    split_into_chunks(&mut items, &mut chunks);

    let mut hierarchy_values = chunks
      .iter()
      .enumerate()
      .map(|(index, chunk)| (chunk.bounds, Some(index)))
      .collect::<Vec<_>>();
    let hierarchy = BoundingBoxHierarchy::new(&mut hierarchy_values);

    Self { chunks, hierarchy }
  }

  pub(crate) fn chunks(&self) -> &[Chunk] {
    &self.chunks
  }

  /// Finds the chunks whose footprint overlaps the XZ rectangle.
  pub(crate) fn chunks_overlapping_rect(
    &self,
    min: Vec2,
    max: Vec2,
  ) -> Vec<&Chunk> {
    let Some(hierarchy) = &self.hierarchy else {
      return Vec::new();
    };
    hierarchy
      .query_by(|bounds| match bounds.footprint() {
        None => false,
        Some((bounds_min, bounds_max)) => {
          bounds_min.x <= max.x
            && min.x <= bounds_max.x
            && bounds_min.y <= max.y
            && min.y <= bounds_max.y
        }
      })
      .into_iter()
      .map(|&index| &self.chunks[index])
      .collect()
  }

  /// Finds the chunks whose footprint is crossed by the segment projected onto
  /// the XZ plane.
  pub(crate) fn chunks_overlapping_segment(
    &self,
    start: Vec3,
    end: Vec3,
  ) -> Vec<&Chunk> {
    let Some(hierarchy) = &self.hierarchy else {
      return Vec::new();
    };
    hierarchy
      .query_by(|bounds| match bounds.footprint() {
        None => false,
        Some(rect) => segment_overlaps_rect(start.xz(), end.xz(), rect),
      })
      .into_iter()
      .map(|&index| &self.chunks[index])
      .collect()
  }
}

fn split_into_chunks(
  items: &mut [(usize, BoundingBox)],
  chunks: &mut Vec<Chunk>,
) {
  let bounds = items
    .iter()
    .fold(BoundingBox::Empty, |acc, (_, bounds)| acc.expand_to_bounds(bounds));
  if items.len() <= TRIANGLES_PER_CHUNK {
    if !items.is_empty() {
      chunks.push(Chunk {
        bounds,
        triangles: items.iter().map(|(index, _)| *index).collect(),
      });
    }
    return;
  }

  let size = bounds.size();
  let center = |bounds: &BoundingBox| bounds.center().unwrap_or(Vec3::ZERO);
  if size.x >= size.z {
    items.sort_by_key(|(_, bounds)| OrdVar::new_unchecked(center(bounds).x));
  } else {
    items.sort_by_key(|(_, bounds)| OrdVar::new_unchecked(center(bounds).z));
  }

  let split_index = items.len() / 2;
  let (left, right) = items.split_at_mut(split_index);
  split_into_chunks(left, chunks);
  split_into_chunks(right, chunks);
}

#[cfg(test)]
#[path = "chunky_mesh_test.rs"]
mod test;
