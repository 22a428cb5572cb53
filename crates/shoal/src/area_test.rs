use super::{
  area_from_voxel, voxel_area, AreaType, InvalidAreaType, PolyFlags, NULL_AREA,
  WALKABLE_AREA,
};

#[test]
fn areas_map_to_flags() {
  assert_eq!(AreaType::Ground.poly_flags(), PolyFlags::WALK);
  assert_eq!(AreaType::Grass.poly_flags(), PolyFlags::WALK);
  assert_eq!(AreaType::Road.poly_flags(), PolyFlags::WALK);
  assert_eq!(AreaType::Water.poly_flags(), PolyFlags::SWIM);
  assert_eq!(AreaType::Door.poly_flags(), PolyFlags::WALK | PolyFlags::DOOR);
}

#[test]
fn area_from_index() {
  assert_eq!(AreaType::try_from(3), Ok(AreaType::Water));
  assert_eq!(AreaType::try_from(5), Err(InvalidAreaType(5)));
  for area in AreaType::ALL {
    assert_eq!(AreaType::try_from(area.index() as u8), Ok(area));
  }
}

#[test]
fn voxel_codes_round_trip() {
  assert_eq!(area_from_voxel(NULL_AREA), None);
  assert_eq!(area_from_voxel(WALKABLE_AREA), Some(AreaType::Ground));
  for area in AreaType::ALL {
    assert_eq!(area_from_voxel(voxel_area(area)), Some(area));
  }
  assert_eq!(area_from_voxel(40), None);
}
