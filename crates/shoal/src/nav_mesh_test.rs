use glam::{Vec2, Vec3};
use googletest::{expect_that, matchers::*};

use crate::{
  area::{AreaType, PolyFlags},
  convex_volume::OffMeshConnection,
  query_filter::QueryFilter,
  test_util::{rectangles_mesh, rectangles_nav_mesh},
  tile_mesh::TileMesh,
};

use super::{NavMesh, NavMeshError, PolyKind, PolyRef, RefLayout};

fn four_tile_mesh() -> NavMesh {
  NavMesh::new(
    RefLayout::for_tile_count(4).expect("four tiles fit"),
    Vec3::ZERO,
    /* tile_world_size= */ 4.0,
    /* walkable_climb= */ 0.5,
  )
}

fn square(min_x: f32, min_z: f32, size: f32) -> (Vec2, Vec2) {
  (Vec2::new(min_x, min_z), Vec2::new(min_x + size, min_z + size))
}

fn only_poly(nav_mesh: &NavMesh, x: i32, z: i32) -> PolyRef {
  let (min, max) = nav_mesh.tile_rect(x, z);
  let center = (min + max) * 0.5;
  nav_mesh
    .find_nearest_poly(
      Vec3::new(center.x, 0.0, center.y),
      Vec3::new(0.1, 1.0, 0.1),
      None,
    )
    .expect("tile has a polygon")
    .0
}

#[test]
fn layout_splits_bits_by_tile_count() {
  let single = RefLayout::for_tile_count(1).expect("fits");
  assert_eq!(single.max_tiles(), 1);
  assert_eq!(single.max_polys_per_tile(), 1 << 22);

  let hundred = RefLayout::for_tile_count(100).expect("fits");
  assert_eq!(hundred.max_tiles(), 128);
  assert_eq!(hundred.max_polys_per_tile(), 1 << 15);

  let most = RefLayout::for_tile_count(1 << 14).expect("fits");
  assert_eq!(most.max_polys_per_tile(), 256);

  assert_eq!(
    RefLayout::for_tile_count((1 << 14) + 1),
    Err(NavMeshError::TooManyTiles { requested: (1 << 14) + 1, limit: 1 << 14 })
  );
}

#[test]
fn layout_round_trips_refs() {
  let layout = RefLayout::for_tile_count(100).expect("fits");
  let poly_ref = layout.encode(5, 77, 1234);
  assert_eq!(layout.decode(poly_ref), (5, 77, 1234));
}

#[test]
fn neighbouring_tiles_are_linked() {
  let mut nav_mesh = four_tile_mesh();
  nav_mesh
    .add_tile(0, 0, 0, &rectangles_mesh(&[square(0.0, 0.0, 4.0)], 0.0))
    .expect("tile is new");
  nav_mesh
    .add_tile(1, 0, 0, &rectangles_mesh(&[square(4.0, 0.0, 4.0)], 0.0))
    .expect("tile is new");

  let left = only_poly(&nav_mesh, 0, 0);
  let right = only_poly(&nav_mesh, 1, 0);
  let link = nav_mesh
    .poly(left)
    .and_then(|poly| poly.link_to(right))
    .expect("left links to right");
  assert_eq!(link.edge, Some(1));
  assert_eq!(
    link.portal,
    (Vec3::new(4.0, 0.0, 4.0), Vec3::new(4.0, 0.0, 0.0))
  );
  assert!(nav_mesh
    .poly(right)
    .is_some_and(|poly| poly.link_to(left).is_some()));
}

#[test]
fn polygons_within_a_tile_are_linked() {
  let nav_mesh = rectangles_nav_mesh(&[
    square(0.0, 0.0, 2.0),
    (Vec2::new(2.0, 0.0), Vec2::new(4.0, 1.0)),
  ]);
  let big = nav_mesh
    .find_nearest_poly(Vec3::new(1.0, 0.0, 1.0), Vec3::splat(0.1), None)
    .expect("over the big square")
    .0;
  let small = nav_mesh
    .find_nearest_poly(Vec3::new(3.0, 0.0, 0.5), Vec3::splat(0.1), None)
    .expect("over the small rectangle")
    .0;

  // The portal is clipped to the shorter edge.
  let link = nav_mesh
    .poly(big)
    .and_then(|poly| poly.link_to(small))
    .expect("polygons share an edge");
  assert_eq!(
    link.portal,
    (Vec3::new(2.0, 0.0, 1.0), Vec3::new(2.0, 0.0, 0.0))
  );
}

#[test]
fn removing_tile_invalidates_refs_and_links() {
  let mut nav_mesh = four_tile_mesh();
  nav_mesh
    .add_tile(0, 0, 0, &rectangles_mesh(&[square(0.0, 0.0, 4.0)], 0.0))
    .expect("tile is new");
  nav_mesh
    .add_tile(1, 0, 0, &rectangles_mesh(&[square(4.0, 0.0, 4.0)], 0.0))
    .expect("tile is new");
  let left = only_poly(&nav_mesh, 0, 0);
  let right = only_poly(&nav_mesh, 1, 0);

  nav_mesh.remove_tile(1, 0, 0).expect("tile exists");
  assert!(!nav_mesh.is_valid_ref(right));
  assert!(nav_mesh.poly(left).is_some_and(|poly| poly.links.is_empty()));

  // The slot is reused with a new salt, so the old ref stays invalid.
  nav_mesh
    .add_tile(1, 0, 0, &rectangles_mesh(&[square(4.0, 0.0, 4.0)], 0.0))
    .expect("tile was removed");
  let new_right = only_poly(&nav_mesh, 1, 0);
  assert_ne!(new_right, right);
  assert!(!nav_mesh.is_valid_ref(right));
  assert!(nav_mesh
    .poly(left)
    .is_some_and(|poly| poly.link_to(new_right).is_some()));
}

#[test]
fn tiles_are_unique_per_position() {
  let mut nav_mesh = four_tile_mesh();
  let mesh = rectangles_mesh(&[square(0.0, 0.0, 4.0)], 0.0);
  nav_mesh.add_tile(0, 0, 0, &mesh).expect("tile is new");
  assert_eq!(
    nav_mesh.add_tile(0, 0, 0, &mesh),
    Err(NavMeshError::TileExists { x: 0, z: 0, layer: 0 })
  );
  nav_mesh.add_tile(0, 0, 1, &mesh).expect("other layer is new");
  assert_eq!(nav_mesh.layers_at(0, 0), [0, 1]);
  assert_eq!(
    nav_mesh.remove_tile(1, 1, 0),
    Err(NavMeshError::TileNotFound { x: 1, z: 1, layer: 0 })
  );

  nav_mesh.remove_tiles_at(0, 0);
  assert_eq!(nav_mesh.tile_count(), 0);
}

#[test]
fn runs_out_of_tile_slots() {
  let mut nav_mesh = NavMesh::new(
    RefLayout::for_tile_count(1).expect("fits"),
    Vec3::ZERO,
    4.0,
    0.5,
  );
  let mesh = rectangles_mesh(&[square(0.0, 0.0, 4.0)], 0.0);
  nav_mesh.add_tile(0, 0, 0, &mesh).expect("one slot is free");
  assert_eq!(
    nav_mesh.add_tile(1, 0, 0, &mesh),
    Err(NavMeshError::NoFreeTileSlots)
  );
}

#[test]
fn rejects_tiles_with_too_many_polygons() {
  let mut nav_mesh = NavMesh::new(
    RefLayout::for_tile_count(1 << 14).expect("fits"),
    Vec3::ZERO,
    100.0,
    0.5,
  );
  let rectangles = (0..257)
    .map(|index| square((index % 20) as f32, (index / 20) as f32, 1.0))
    .collect::<Vec<_>>();
  let mesh: TileMesh = rectangles_mesh(&rectangles, 0.0);
  assert_eq!(
    nav_mesh.add_tile(0, 0, 0, &mesh),
    Err(NavMeshError::TooManyPolygons { count: 257, limit: 256 })
  );
  assert_eq!(nav_mesh.tile_count(), 0);
}

#[googletest::test]
fn nearest_poly_snaps_onto_surface() {
  let nav_mesh = rectangles_nav_mesh(&[square(0.0, 0.0, 4.0)]);

  let (_, on_top) = nav_mesh
    .find_nearest_poly(Vec3::new(1.0, 0.3, 2.0), Vec3::splat(1.0), None)
    .expect("point is over the polygon");
  expect_that!(on_top.x, near(1.0, 1e-5));
  expect_that!(on_top.y, near(0.0, 1e-5));
  expect_that!(on_top.z, near(2.0, 1e-5));

  let (_, beside) = nav_mesh
    .find_nearest_poly(Vec3::new(4.5, 0.0, 2.0), Vec3::splat(1.0), None)
    .expect("point is near the polygon");
  expect_that!(beside.x, near(4.0, 1e-5));
  expect_that!(beside.z, near(2.0, 1e-5));

  expect_that!(
    nav_mesh.find_nearest_poly(
      Vec3::new(10.0, 0.0, 10.0),
      Vec3::splat(1.0),
      None
    ),
    none()
  );
}

#[test]
fn filters_hide_excluded_polygons() {
  let mut mesh = rectangles_mesh(&[square(0.0, 0.0, 4.0)], 0.0);
  mesh.polygons[0].area = AreaType::Water;
  mesh.polygons[0].flags = PolyFlags::SWIM;
  let mut nav_mesh = four_tile_mesh();
  nav_mesh.add_tile(0, 0, 0, &mesh).expect("tile is new");

  let mut filter = QueryFilter::default();
  assert_eq!(
    nav_mesh
      .polys_in_box(Vec3::new(2.0, 0.0, 2.0), Vec3::ONE, Some(&filter))
      .len(),
    1
  );
  filter.set_area_cost(AreaType::Water, 10001.0);
  assert!(nav_mesh
    .polys_in_box(Vec3::new(2.0, 0.0, 2.0), Vec3::ONE, Some(&filter))
    .is_empty());
}

#[test]
fn off_mesh_connection_joins_separate_floors() {
  let mut nav_mesh = NavMesh::new(
    RefLayout::for_tile_count(1).expect("fits"),
    Vec3::ZERO,
    16.0,
    0.5,
  );
  nav_mesh.set_off_mesh_connections(&[OffMeshConnection::new(
    Vec3::new(3.5, 0.0, 2.0),
    Vec3::new(6.5, 0.0, 2.0),
    /* radius= */ 1.0,
    /* bidirectional= */ false,
  )]);
  nav_mesh
    .add_tile(
      0,
      0,
      0,
      &rectangles_mesh(&[square(0.0, 0.0, 4.0), square(6.0, 0.0, 4.0)], 0.0),
    )
    .expect("tile is new");

  let near = |x: f32| {
    nav_mesh
      .find_nearest_poly(Vec3::new(x, 0.0, 2.0), Vec3::splat(0.1), None)
      .expect("over a square")
      .0
  };
  let (start, end) = (near(1.0), near(8.0));
  let start_poly = nav_mesh.poly(start).expect("valid");
  assert_eq!(start_poly.links.len(), 1);
  let off_mesh = start_poly.links[0].target;

  let link_poly = nav_mesh.poly(off_mesh).expect("valid");
  assert!(matches!(link_poly.kind, PolyKind::OffMeshConnection { .. }));
  assert_eq!(link_poly.links.len(), 1);
  assert_eq!(link_poly.links[0].target, end);
  assert_eq!(link_poly.links[0].edge, Some(1));
  // The connection only goes one way.
  assert!(nav_mesh.poly(end).is_some_and(|poly| poly.links.is_empty()));
}

#[test]
fn bidirectional_connection_links_both_ends() {
  let mut nav_mesh = four_tile_mesh();
  nav_mesh.set_off_mesh_connections(&[OffMeshConnection::new(
    Vec3::new(3.5, 0.0, 2.0),
    Vec3::new(4.5, 2.0, 2.0),
    /* radius= */ 1.0,
    /* bidirectional= */ true,
  )]);
  nav_mesh
    .add_tile(0, 0, 0, &rectangles_mesh(&[square(0.0, 0.0, 4.0)], 0.0))
    .expect("tile is new");
  let start = only_poly(&nav_mesh, 0, 0);
  let off_mesh = nav_mesh.poly(start).expect("valid").links[0].target;
  // The end tile is missing, so only the start is joined.
  assert_eq!(nav_mesh.poly(off_mesh).expect("valid").links.len(), 1);

  nav_mesh
    .add_tile(1, 0, 0, &rectangles_mesh(&[square(4.0, 0.0, 4.0)], 2.0))
    .expect("tile is new");
  let end = nav_mesh
    .find_nearest_poly(Vec3::new(6.0, 2.0, 2.0), Vec3::splat(0.1), None)
    .expect("over the raised square")
    .0;
  let link_poly = nav_mesh.poly(off_mesh).expect("valid");
  assert_eq!(link_poly.links.len(), 2);
  assert!(link_poly.link_to(start).is_some());
  assert!(link_poly.link_to(end).is_some());
  assert!(nav_mesh
    .poly(end)
    .is_some_and(|poly| poly.link_to(off_mesh).is_some()));
}
