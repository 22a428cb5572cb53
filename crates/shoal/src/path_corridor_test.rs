use glam::{Vec2, Vec3};

use crate::{
  nav_mesh::{NavMesh, PolyRef, RefLayout},
  query::StraightPathFlags,
  query_filter::QueryFilter,
  test_util::{off_mesh_nav_mesh, rectangles_mesh, rectangles_nav_mesh},
};

use super::{merge_start_moved, merge_start_shortcut, PathCorridor};

fn poly_at(nav_mesh: &NavMesh, x: f32, z: f32) -> PolyRef {
  nav_mesh
    .find_nearest_poly(Vec3::new(x, 0.0, z), Vec3::splat(0.05), None)
    .expect("point is over a polygon")
    .0
}

/// Two rows of three unit squares.
fn two_rows() -> NavMesh {
  let mut rectangles = Vec::new();
  for z in 0..2 {
    for x in 0..3 {
      let min = Vec2::new(x as f32, z as f32);
      rectangles.push((min, min + Vec2::ONE));
    }
  }
  rectangles_nav_mesh(&rectangles)
}

#[test]
fn merging_a_move_forward_drops_passed_polygons() {
  let path = [PolyRef(1), PolyRef(2), PolyRef(3)];
  assert_eq!(merge_start_moved(&path, &[PolyRef(1), PolyRef(2)]), [
    PolyRef(2),
    PolyRef(3)
  ]);
  assert_eq!(merge_start_moved(&path, &[PolyRef(1)]), path);
}

#[test]
fn merging_a_move_off_the_corridor_leads_back_to_it() {
  let path = [PolyRef(1), PolyRef(2), PolyRef(3)];
  assert_eq!(merge_start_moved(&path, &[PolyRef(1), PolyRef(9)]), [
    PolyRef(9),
    PolyRef(1),
    PolyRef(2),
    PolyRef(3)
  ]);
  // Nothing in common keeps the corridor.
  assert_eq!(merge_start_moved(&path, &[PolyRef(7)]), path);
}

#[test]
fn merging_a_shortcut_replaces_the_detour() {
  let path = [PolyRef(1), PolyRef(4), PolyRef(5), PolyRef(6), PolyRef(3)];
  assert_eq!(
    merge_start_shortcut(&path, &[PolyRef(1), PolyRef(2), PolyRef(3)]),
    [PolyRef(1), PolyRef(2), PolyRef(3)]
  );
  assert_eq!(merge_start_shortcut(&path, &[PolyRef(8), PolyRef(9)]), path);
}

#[test]
fn corners_skip_reached_points() {
  let nav_mesh = rectangles_nav_mesh(&[
    (Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0)),
    (Vec2::new(1.0, 0.0), Vec2::new(2.0, 1.0)),
    (Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0)),
  ]);
  let (a, b, c) =
    (poly_at(&nav_mesh, 0.5, 0.5), poly_at(&nav_mesh, 1.5, 0.5), poly_at(&nav_mesh, 1.5, 1.5));

  let mut corridor = PathCorridor::default();
  corridor.reset(a, Vec3::new(0.5, 0.0, 0.5));
  corridor.set_corridor(Vec3::new(1.2, 0.0, 1.8), vec![a, b, c]);
  let corners = corridor.find_corners(&nav_mesh, 4);
  assert_eq!(
    corners.iter().map(|corner| corner.position).collect::<Vec<_>>(),
    [Vec3::new(1.0, 0.0, 1.0), Vec3::new(1.2, 0.0, 1.8)]
  );
  assert_eq!(corners[1].flags, StraightPathFlags::END);

  // Standing on the corner skips it.
  assert!(corridor.move_position(
    Vec3::new(1.0, 0.0, 1.0),
    &nav_mesh,
    &QueryFilter::default()
  ));
  let corners = corridor.find_corners(&nav_mesh, 4);
  assert_eq!(corners.len(), 1);
  assert_eq!(corners[0].position, Vec3::new(1.2, 0.0, 1.8));
}

#[test]
fn moving_updates_the_corridor_start() {
  let nav_mesh = two_rows();
  let polys = [(0.5, 0.5), (1.5, 0.5), (2.5, 0.5)]
    .map(|(x, z)| poly_at(&nav_mesh, x, z));

  let mut corridor = PathCorridor::default();
  corridor.reset(polys[0], Vec3::new(0.5, 0.0, 0.5));
  corridor.set_corridor(Vec3::new(2.5, 0.0, 0.5), polys.to_vec());

  assert!(corridor.move_position(
    Vec3::new(1.5, 0.0, 0.5),
    &nav_mesh,
    &QueryFilter::default()
  ));
  assert_eq!(corridor.position(), Vec3::new(1.5, 0.0, 0.5));
  assert_eq!(corridor.path(), &polys[1..]);
}

#[test]
fn visibility_shortcut_straightens_detours() {
  let nav_mesh = two_rows();
  let bottom = [(0.5, 0.5), (1.5, 0.5), (2.5, 0.5)]
    .map(|(x, z)| poly_at(&nav_mesh, x, z));
  let top = [(0.5, 1.5), (1.5, 1.5), (2.5, 1.5)]
    .map(|(x, z)| poly_at(&nav_mesh, x, z));

  let mut corridor = PathCorridor::default();
  corridor.reset(bottom[0], Vec3::new(0.5, 0.0, 0.5));
  corridor.set_corridor(
    Vec3::new(2.5, 0.0, 0.5),
    vec![bottom[0], top[0], top[1], top[2], bottom[2]],
  );
  corridor.optimize_path_visibility(
    Vec3::new(2.5, 0.0, 0.5),
    /* range= */ 2.0,
    &nav_mesh,
    &QueryFilter::default(),
  );
  assert_eq!(corridor.path(), &bottom);
}

#[test]
fn topology_optimisation_finds_shorter_corridors() {
  let nav_mesh = two_rows();
  let bottom = [(0.5, 0.5), (1.5, 0.5), (2.5, 0.5)]
    .map(|(x, z)| poly_at(&nav_mesh, x, z));
  let top = [(0.5, 1.5), (1.5, 1.5), (2.5, 1.5)]
    .map(|(x, z)| poly_at(&nav_mesh, x, z));

  let mut corridor = PathCorridor::default();
  corridor.reset(bottom[0], Vec3::new(0.5, 0.0, 0.5));
  corridor.set_corridor(
    Vec3::new(2.5, 0.0, 0.5),
    vec![bottom[0], top[0], top[1], top[2], bottom[2]],
  );
  assert!(corridor.optimize_path_topology(&nav_mesh, &QueryFilter::default()));
  assert_eq!(corridor.path(), &bottom);
  assert!(!corridor.optimize_path_topology(&nav_mesh, &QueryFilter::default()));
}

#[test]
fn removed_tiles_invalidate_and_trim_the_corridor() {
  let mut nav_mesh = NavMesh::new(
    RefLayout::for_tile_count(4).expect("fits"),
    Vec3::ZERO,
    /* tile_world_size= */ 1.0,
    /* walkable_climb= */ 0.5,
  );
  for x in 0..3 {
    let min = Vec2::new(x as f32, 0.0);
    nav_mesh
      .add_tile(x, 0, 0, &rectangles_mesh(&[(min, min + Vec2::ONE)], 0.0))
      .expect("tile is valid");
  }
  let polys = [(0.5, 0.5), (1.5, 0.5), (2.5, 0.5)]
    .map(|(x, z)| poly_at(&nav_mesh, x, z));
  let filter = QueryFilter::default();

  let mut corridor = PathCorridor::default();
  corridor.reset(polys[0], Vec3::new(0.5, 0.0, 0.5));
  corridor.set_corridor(Vec3::new(2.5, 0.0, 0.5), polys.to_vec());
  assert!(corridor.is_valid(10, &nav_mesh, &filter));

  nav_mesh.remove_tile(2, 0, 0).expect("tile exists");
  assert!(!corridor.is_valid(10, &nav_mesh, &filter));
  assert!(corridor.is_valid(2, &nav_mesh, &filter));

  corridor.trim_invalid_path(polys[0], Vec3::new(0.5, 0.0, 0.5), &nav_mesh, &filter);
  assert_eq!(corridor.path(), &polys[..2]);
  assert_eq!(corridor.target(), Vec3::new(2.0, 0.0, 0.5));
}

#[test]
fn crosses_off_mesh_connections() {
  let nav_mesh = off_mesh_nav_mesh();
  let (start, island) =
    (poly_at(&nav_mesh, 0.5, 0.5), poly_at(&nav_mesh, 5.5, 0.5));
  let path = nav_mesh
    .find_path(
      (start, Vec3::new(0.5, 0.0, 0.5)),
      (island, Vec3::new(5.5, 0.0, 0.5)),
      &QueryFilter::default(),
      100,
    )
    .expect("refs are valid")
    .polys;

  let mut corridor = PathCorridor::default();
  corridor.reset(start, Vec3::new(0.5, 0.0, 0.5));
  corridor.set_corridor(Vec3::new(5.5, 0.0, 0.5), path.clone());

  let corners = corridor.find_corners(&nav_mesh, 4);
  assert_eq!(corners.len(), 1);
  assert_eq!(corners[0].flags, StraightPathFlags::OFF_MESH_CONNECTION);
  assert_eq!(corners[0].poly, Some(path[1]));

  assert_eq!(
    corridor.move_over_off_mesh_connection(path[1], &nav_mesh),
    Some((Vec3::new(0.9, 0.0, 0.5), Vec3::new(5.1, 0.0, 0.5)))
  );
  assert_eq!(corridor.path(), [island]);
  assert_eq!(corridor.position(), Vec3::new(5.1, 0.0, 0.5));
}
