use glam::{Vec2, Vec3};
use googletest::{expect_that, matchers::*};

use super::{
  clip_segment_to_polygon_xz, closest_point_on_polygon, intersect_segment_aabb,
  intersect_segment_triangle, point_in_polygon_xz, polygon_height,
  segment_overlaps_rect, shared_edge_portal, tri_area2, SegmentClip,
};

fn unit_square(y: f32) -> Vec<Vec3> {
  vec![
    Vec3::new(0.0, y, 0.0),
    Vec3::new(1.0, y, 0.0),
    Vec3::new(1.0, y, 1.0),
    Vec3::new(0.0, y, 1.0),
  ]
}

#[test]
fn square_winds_counter_clockwise() {
  let square = unit_square(0.0);
  assert!(tri_area2(square[0], square[1], square[2]) > 0.0);
  assert!(tri_area2(square[0], square[2], square[1]) < 0.0);
}

#[test]
fn segment_hits_front_face_only() {
  let triangle = (
    Vec3::new(0.0, 0.0, 0.0),
    Vec3::new(0.0, 0.0, 1.0),
    Vec3::new(1.0, 0.0, 0.0),
  );

  assert_eq!(
    intersect_segment_triangle(
      Vec3::new(0.2, 1.0, 0.2),
      Vec3::new(0.2, -1.0, 0.2),
      triangle
    ),
    Some(0.5)
  );
  // Coming from below hits the back face.
  assert_eq!(
    intersect_segment_triangle(
      Vec3::new(0.2, -1.0, 0.2),
      Vec3::new(0.2, 1.0, 0.2),
      triangle
    ),
    None
  );
  assert_eq!(
    intersect_segment_triangle(
      Vec3::new(2.0, 1.0, 2.0),
      Vec3::new(2.0, -1.0, 2.0),
      triangle
    ),
    None
  );
  // Stops short of the triangle.
  assert_eq!(
    intersect_segment_triangle(
      Vec3::new(0.2, 1.0, 0.2),
      Vec3::new(0.2, 0.5, 0.2),
      triangle
    ),
    None
  );
}

#[test]
fn segment_clips_to_box() {
  let bounds = (Vec3::ZERO, Vec3::ONE);
  assert_eq!(
    intersect_segment_aabb(
      Vec3::new(-1.0, 0.5, 0.5),
      Vec3::new(3.0, 0.5, 0.5),
      bounds
    ),
    Some((0.25, 0.5))
  );
  assert_eq!(
    intersect_segment_aabb(
      Vec3::new(-1.0, 2.0, 0.5),
      Vec3::new(3.0, 2.0, 0.5),
      bounds
    ),
    None
  );
}

#[test]
fn segment_overlaps_rect_in_2d() {
  let rect = (Vec2::ZERO, Vec2::ONE);
  assert!(segment_overlaps_rect(
    Vec2::new(-1.0, 0.5),
    Vec2::new(0.5, 0.5),
    rect
  ));
  assert!(segment_overlaps_rect(
    Vec2::new(0.5, 0.5),
    Vec2::new(0.5, 0.5),
    rect
  ));
  assert!(!segment_overlaps_rect(
    Vec2::new(-1.0, 0.5),
    Vec2::new(-0.5, 0.5),
    rect
  ));
  assert!(!segment_overlaps_rect(
    Vec2::new(-1.0, 1.0),
    Vec2::new(1.0, 3.0),
    rect
  ));
}

#[test]
fn point_in_polygon_ignores_height() {
  let square = unit_square(5.0);
  assert!(point_in_polygon_xz(Vec3::new(0.5, 0.0, 0.5), &square));
  assert!(!point_in_polygon_xz(Vec3::new(1.5, 5.0, 0.5), &square));

  let mut reversed = square.clone();
  reversed.reverse();
  assert!(point_in_polygon_xz(Vec3::new(0.5, 0.0, 0.5), &reversed));
}

#[googletest::test]
fn polygon_height_interpolates_slope() {
  let ramp = [
    Vec3::new(0.0, 0.0, 0.0),
    Vec3::new(1.0, 1.0, 0.0),
    Vec3::new(0.0, 0.0, 1.0),
  ];
  expect_that!(
    polygon_height(Vec3::new(0.5, 100.0, 0.25), &ramp),
    some(near(0.5, 1e-5))
  );
  expect_that!(polygon_height(Vec3::new(1.0, 0.0, 1.0), &ramp), none());
}

#[test]
fn closest_point_on_polygon_drops_or_snaps() {
  let square = unit_square(1.0);
  assert_eq!(
    closest_point_on_polygon(Vec3::new(0.5, 5.0, 0.5), &square),
    Vec3::new(0.5, 1.0, 0.5)
  );
  assert_eq!(
    closest_point_on_polygon(Vec3::new(2.0, 0.0, 0.5), &square),
    Vec3::new(1.0, 1.0, 0.5)
  );
}

#[googletest::test]
fn segment_clips_through_polygon() {
  let square = unit_square(0.0);
  let clip = clip_segment_to_polygon_xz(
    Vec3::new(-1.0, 0.0, 0.5),
    Vec3::new(2.0, 0.0, 0.5),
    &square,
  )
  .expect("segment crosses the square");

  expect_that!(clip.t_enter, near(1.0 / 3.0, 1e-5));
  expect_that!(clip.t_exit, near(2.0 / 3.0, 1e-5));
  expect_that!(clip.enter_edge, some(eq(3)));
  expect_that!(clip.exit_edge, some(eq(1)));
}

#[test]
fn segment_inside_polygon_is_unclipped() {
  assert_eq!(
    clip_segment_to_polygon_xz(
      Vec3::new(0.2, 0.0, 0.2),
      Vec3::new(0.8, 0.0, 0.8),
      &unit_square(0.0)
    ),
    Some(SegmentClip {
      t_enter: 0.0,
      t_exit: 1.0,
      enter_edge: None,
      exit_edge: None
    })
  );
  assert_eq!(
    clip_segment_to_polygon_xz(
      Vec3::new(-1.0, 0.0, -1.0),
      Vec3::new(-1.0, 0.0, 2.0),
      &unit_square(0.0)
    ),
    None
  );
}

#[test]
fn adjacent_squares_share_portal() {
  // Edge 1 of the square at x in [0, 1] against edge 3 of the square at x in
  // [1, 2].
  assert_eq!(
    shared_edge_portal(
      /* edge= */ (Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0)),
      /* other_edge= */
      (Vec3::new(1.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0)),
      /* tolerance= */ 0.01,
      /* max_vertical_gap= */ 0.5,
    ),
    Some((Vec3::new(1.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0)))
  );
}

#[test]
fn portal_is_clipped_to_overlap() {
  assert_eq!(
    shared_edge_portal(
      /* edge= */ (Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0)),
      /* other_edge= */
      (Vec3::new(1.0, 0.0, 1.5), Vec3::new(1.0, 0.0, 0.5)),
      /* tolerance= */ 0.01,
      /* max_vertical_gap= */ 0.5,
    ),
    Some((Vec3::new(1.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.5)))
  );
}

#[test]
fn no_portal_between_misaligned_edges() {
  let edge = (Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0));
  // Too far apart vertically.
  assert_eq!(
    shared_edge_portal(
      edge,
      (Vec3::new(1.0, 1.0, 1.0), Vec3::new(1.0, 1.0, 0.0)),
      0.01,
      0.5
    ),
    None
  );
  // Same direction.
  assert_eq!(
    shared_edge_portal(
      edge,
      (Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0)),
      0.01,
      0.5
    ),
    None
  );
  // Parallel but offset.
  assert_eq!(
    shared_edge_portal(
      edge,
      (Vec3::new(1.5, 0.0, 1.0), Vec3::new(1.5, 0.0, 0.0)),
      0.01,
      0.5
    ),
    None
  );
  // Only touching at a corner.
  assert_eq!(
    shared_edge_portal(
      edge,
      (Vec3::new(1.0, 0.0, 2.0), Vec3::new(1.0, 0.0, 1.0)),
      0.01,
      0.5
    ),
    None
  );
}
