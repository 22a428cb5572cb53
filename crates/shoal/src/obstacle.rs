use std::collections::HashMap;

use glam::Vec3;
use log::warn;
use slotmap::{new_key_type, SlotMap};

use crate::{
  navigation_mesh::{NavMeshId, NavigationMesh},
  tile_cache::{ObstacleRef, ObstacleShape, TileCacheError},
};

new_key_type! {
  /// The ID of an obstacle.
  pub struct ObstacleId;
}

/// The shape of an obstacle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ObstacleKind {
  /// A vertical cylinder standing on its position.
  Cylinder = 0,
  /// A box centred on its position.
  Box = 1,
}

/// An obstacle as the host placed it.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObstacleInfo {
  pub kind: ObstacleKind,
  /// The centre of the base of a cylinder, or the centre of a box.
  pub position: Vec3,
  /// For a cylinder, (radius, height, radius). For a box, its full size.
  pub dimensions: Vec3,
  /// The rotation of a box about Y, in radians. Unused for cylinders.
  pub rotation: f32,
}

impl ObstacleInfo {
  pub fn cylinder(position: Vec3, radius: f32, height: f32) -> Self {
    Self {
      kind: ObstacleKind::Cylinder,
      position,
      dimensions: Vec3::new(radius, height, radius),
      rotation: 0.0,
    }
  }

  pub fn cuboid(position: Vec3, dimensions: Vec3, rotation: f32) -> Self {
    Self { kind: ObstacleKind::Box, position, dimensions, rotation }
  }

  pub(crate) fn shape(&self) -> ObstacleShape {
    match self.kind {
      ObstacleKind::Cylinder => ObstacleShape::Cylinder {
        position: self.position,
        radius: self.dimensions.x,
        height: self.dimensions.y,
      },
      ObstacleKind::Box => ObstacleShape::Box {
        center: self.position,
        half_extents: self.dimensions * 0.5,
        rotation: self.rotation,
      },
    }
  }
}

/// An obstacle carved into every navigation mesh.
#[derive(Debug)]
pub(crate) struct Obstacle {
  info: ObstacleInfo,
  /// The obstacle's id in each mesh's tile cache.
  references: HashMap<NavMeshId, ObstacleRef>,
  destroyed: bool,
}

impl Obstacle {
  pub(crate) fn new(info: ObstacleInfo) -> Self {
    Self { info, references: HashMap::new(), destroyed: false }
  }

  pub(crate) fn info(&self) -> &ObstacleInfo {
    &self.info
  }

  pub(crate) fn references(&self) -> &HashMap<NavMeshId, ObstacleRef> {
    &self.references
  }

  pub(crate) fn is_destroyed(&self) -> bool {
    self.destroyed
  }

  /// Carves the obstacle into every mesh. If any mesh refuses it, the
  /// obstacle is taken out of the others again.
  pub(crate) fn add_to_nav_meshes(
    &mut self,
    nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>,
  ) -> Result<(), TileCacheError> {
    let shape = self.info.shape();
    let mut failure = None;
    for (id, navigation_mesh) in nav_meshes.iter_mut() {
      match navigation_mesh.add_obstacle(shape) {
        Ok(reference) => {
          self.references.insert(id, reference);
        }
        Err(err) => {
          failure = Some(err);
          break;
        }
      }
    }
    match failure {
      Some(err) => {
        self.remove_from_nav_meshes(nav_meshes);
        Err(err)
      }
      None => Ok(()),
    }
  }

  fn remove_from_nav_meshes(
    &mut self,
    nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>,
  ) {
    for (id, reference) in self.references.drain() {
      match nav_meshes.get_mut(id) {
        Some(navigation_mesh) => navigation_mesh.remove_obstacle(reference),
        None => warn!("Obstacle refers to a missing navigation mesh {:?}.", id),
      }
    }
  }

  /// Moves the obstacle to `position` in every mesh.
  pub(crate) fn move_to(
    &mut self,
    position: Vec3,
    nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>,
  ) -> Result<(), TileCacheError> {
    self.remove_from_nav_meshes(nav_meshes);
    self.info.position = position;
    self.add_to_nav_meshes(nav_meshes)
  }

  /// Takes the obstacle out of every mesh. It is dropped on the next tick.
  pub(crate) fn destroy(
    &mut self,
    nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>,
  ) {
    self.remove_from_nav_meshes(nav_meshes);
    self.destroyed = true;
  }
}

#[cfg(test)]
#[path = "obstacle_test.rs"]
mod test;
