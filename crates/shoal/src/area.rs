use bitflags::bitflags;
use thiserror::Error;

/// The kind of surface a polygon represents. Area types affect the cost of
/// travelling over a polygon and which agents may use it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AreaType {
  Ground = 0,
  Grass = 1,
  Road = 2,
  Water = 3,
  Door = 4,
}

/// The area type index did not name an [`AreaType`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("{0} is not a valid area type.")]
pub struct InvalidAreaType(pub u8);

impl AreaType {
  /// The number of area types.
  pub const COUNT: usize = 5;

  /// Every area type, in index order.
  pub const ALL: [AreaType; Self::COUNT] =
    [Self::Ground, Self::Grass, Self::Road, Self::Water, Self::Door];

  pub fn index(self) -> usize {
    self as usize
  }

  /// The polygon flags assigned to polygons of this area type.
  pub fn poly_flags(self) -> PolyFlags {
    match self {
      Self::Ground | Self::Grass | Self::Road => PolyFlags::WALK,
      Self::Water => PolyFlags::SWIM,
      Self::Door => PolyFlags::WALK | PolyFlags::DOOR,
    }
  }

  /// The flag that excludes this area type from queries, if it has one.
  pub(crate) fn exclusion_flag(self) -> Option<PolyFlags> {
    match self {
      Self::Water => Some(PolyFlags::SWIM),
      Self::Door => Some(PolyFlags::DOOR),
      _ => None,
    }
  }
}

impl TryFrom<u8> for AreaType {
  type Error = InvalidAreaType;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    Self::ALL.get(value as usize).copied().ok_or(InvalidAreaType(value))
  }
}

bitflags! {
  /// Abilities required to traverse a polygon.
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
  #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
  pub struct PolyFlags: u16 {
    const WALK = 0x01;
    const SWIM = 0x02;
    const DOOR = 0x04;
    const JUMP = 0x08;
    const DISABLED = 0x10;
    const ALL = 0xffff;
  }
}

/// The voxel area of cells that cannot be walked on.
pub(crate) const NULL_AREA: u8 = 0;
/// The voxel area of walkable cells that no marker has claimed.
pub(crate) const WALKABLE_AREA: u8 = 63;

/// The voxel area code burned in for `area`.
pub(crate) fn voxel_area(area: AreaType) -> u8 {
  area as u8 + 1
}

/// The area type of a walkable voxel area code. Returns `None` for
/// unwalkable or unknown codes.
pub(crate) fn area_from_voxel(code: u8) -> Option<AreaType> {
  match code {
    NULL_AREA => None,
    WALKABLE_AREA => Some(AreaType::Ground),
    code => AreaType::try_from(code - 1).ok(),
  }
}

#[cfg(test)]
#[path = "area_test.rs"]
mod test;
