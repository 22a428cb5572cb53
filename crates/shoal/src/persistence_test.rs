use std::{collections::HashMap, io::Cursor};

use glam::Vec3;
use googletest::{expect_that, matchers::*};

use crate::{
  agent::{AgentSnapshot, CrowdAgentParameters},
  area::AreaType,
  config::{NavMeshParameters, NavigationParameters},
  convex_volume::OffMeshConnection,
  input_geometry::InputGeometry,
  navigation::Navigation,
  query_filter::IMPASSABLE_COST,
  test_util::flat_floor,
};

use super::{read_bytes, PersistenceError, SAVE_VERSION};

fn parameters() -> NavigationParameters {
  let small = NavMeshParameters {
    cell_size: 0.5,
    cell_height: 0.25,
    max_agent_height: 2.0,
    max_agent_climb: 0.5,
    max_agent_radius: 0.5,
    tile_size: 16,
    ..Default::default()
  };
  let large = NavMeshParameters {
    max_agent_height: 3.0,
    max_agent_radius: 1.0,
    ..small.clone()
  };
  NavigationParameters {
    nav_meshes: vec![small, large],
    ticks_per_second: 0,
    max_obstacles: 8,
  }
}

/// A navigation with a bit of everything, after a few ticks.
fn populated_navigation() -> Navigation {
  let mut navigation = Navigation::new();
  navigation
    .initialize_with_geometry(
      InputGeometry::new(flat_floor(16.0, 0.0)),
      parameters(),
    )
    .expect("floor builds");
  navigation
    .mark_convex_area(
      &[
        Vec3::new(4.0, -0.5, 10.0),
        Vec3::new(7.0, -0.5, 10.0),
        Vec3::new(7.0, -0.5, 13.0),
        Vec3::new(4.0, -0.5, 13.0),
      ],
      2.0,
      AreaType::Water,
    )
    .expect("area is valid");
  navigation
    .add_off_mesh_connection(OffMeshConnection::new(
      Vec3::new(1.0, 0.0, 1.0),
      Vec3::new(3.0, 0.0, 1.0),
      0.5,
      true,
    ))
    .expect("room for connection");
  navigation.rebuild_changed_tiles().expect("initialized");
  navigation
    .set_query_filter(
      1,
      "dry",
      &HashMap::from([
        (AreaType::Water, IMPASSABLE_COST * 2.0),
        (AreaType::Grass, 3.0),
      ]),
    )
    .expect("slot exists");

  let walker = navigation
    .add_agent(CrowdAgentParameters {
      position: Vec3::new(2.0, 0.0, 4.0),
      filter_name: "dry".to_string(),
      ..Default::default()
    })
    .expect("agent fits");
  navigation
    .add_agent(CrowdAgentParameters {
      position: Vec3::new(13.0, 0.0, 8.0),
      radius: 0.8,
      height: 2.5,
      ..Default::default()
    })
    .expect("agent fits");
  navigation
    .add_cylinder_obstacle(Vec3::new(10.0, 0.0, 14.0), 1.0, 2.0)
    .expect("room for obstacle");
  navigation
    .add_box_obstacle(Vec3::new(4.0, 0.5, 8.0), Vec3::new(1.0, 3.0, 2.0), 0.5)
    .expect("room for obstacle");

  walker.move_towards(Vec3::new(14.0, 0.0, 4.0));
  for _ in 0..5 {
    navigation.step(0.1);
  }
  navigation
}

fn snapshots(navigation: &Navigation) -> Vec<AgentSnapshot> {
  navigation.agents().iter().map(|agent| agent.snapshot()).collect()
}

fn tile_bytes(navigation: &Navigation) -> Vec<Vec<Vec<u8>>> {
  navigation
    .lock()
    .nav_meshes
    .values()
    .map(|navigation_mesh| {
      navigation_mesh.tile_cache.encoded_layers().map(<[u8]>::to_vec).collect()
    })
    .collect()
}

#[googletest::test]
fn loading_a_save_restores_everything() {
  let original = populated_navigation();
  for compressed in [false, true] {
    let mut bytes = Vec::new();
    original.save_to_writer(&mut bytes, compressed).expect("save succeeds");

    let mut loaded = Navigation::new();
    loaded
      .load_from_reader(&mut Cursor::new(bytes), compressed)
      .expect("load succeeds");
    assert!(loaded.is_initialized());

    let expected = snapshots(&original);
    let actual = snapshots(&loaded);
    assert_eq!(actual.len(), expected.len());
    for (actual, expected) in actual.iter().zip(expected.iter()) {
      expect_that!(actual.position.distance(expected.position), lt(1e-3));
      expect_that!(actual.velocity.distance(expected.velocity), lt(1e-5));
      expect_that!(actual.target.distance(expected.target), lt(1e-5));
      assert_eq!(actual.state, expected.state);
      assert_eq!(actual.is_moving(), expected.is_moving());
    }
    assert!(expected.iter().any(AgentSnapshot::is_moving));

    let obstacle_infos = |navigation: &Navigation| {
      navigation
        .obstacles()
        .into_iter()
        .filter_map(|id| navigation.obstacle(id))
        .collect::<Vec<_>>()
    };
    assert_eq!(obstacle_infos(&loaded), obstacle_infos(&original));
    assert_eq!(obstacle_infos(&loaded).len(), 2);

    assert_eq!(tile_bytes(&loaded), tile_bytes(&original));
    assert_eq!(loaded.marked_area_ids(), original.marked_area_ids());
    assert_eq!(loaded.query_filters(), original.query_filters());
    assert_eq!(loaded.off_mesh_connections(), original.off_mesh_connections());
    assert_eq!(loaded.nav_mesh_ids().len(), 2);
    assert_eq!(loaded.lock().parameters, parameters());
  }
}

#[test]
fn loaded_agents_keep_walking() {
  let original = populated_navigation();
  let mut bytes = Vec::new();
  original.save_to_writer(&mut bytes, true).expect("save succeeds");
  let mut loaded = Navigation::new();
  loaded
    .load_from_reader(&mut Cursor::new(bytes), true)
    .expect("load succeeds");

  let walker = loaded
    .agents()
    .into_iter()
    .find(|agent| agent.is_moving())
    .expect("walker was saved moving");
  let start = walker.position();
  for _ in 0..10 {
    loaded.step(0.1);
  }
  assert!(walker.position().x > start.x + 0.5);
}

#[test]
fn later_off_mesh_connections_get_fresh_ids() {
  let original = populated_navigation();
  let mut bytes = Vec::new();
  original.save_to_writer(&mut bytes, false).expect("save succeeds");
  let mut loaded = Navigation::new();
  loaded
    .load_from_reader(&mut Cursor::new(bytes), false)
    .expect("load succeeds");

  let saved_id = original.off_mesh_connections()[0].user_id();
  let new_id = loaded
    .add_off_mesh_connection(OffMeshConnection::new(
      Vec3::new(9.0, 0.0, 1.0),
      Vec3::new(11.0, 0.0, 1.0),
      0.5,
      false,
    ))
    .expect("room for connection");
  assert_eq!(new_id, saved_id + 1);
}

#[test]
fn mismatched_version_is_rejected() {
  let original = populated_navigation();
  let mut bytes = Vec::new();
  original.save_to_writer(&mut bytes, false).expect("save succeeds");
  bytes[0] = 2;

  let mut other = populated_navigation();
  let before = snapshots(&other);
  assert!(matches!(
    other.load_from_reader(&mut Cursor::new(bytes), false),
    Err(PersistenceError::VersionMismatch { found: 2, expected: SAVE_VERSION })
  ));
  assert!(other.is_initialized());
  assert_eq!(snapshots(&other), before);
}

#[test]
fn truncated_save_leaves_navigation_untouched() {
  let original = populated_navigation();
  let mut bytes = Vec::new();
  original.save_to_writer(&mut bytes, false).expect("save succeeds");
  bytes.truncate(bytes.len() / 2);

  let mut loaded = Navigation::new();
  assert!(matches!(
    loaded.load_from_reader(&mut Cursor::new(bytes), false),
    Err(PersistenceError::Io(_))
  ));
  assert!(!loaded.is_initialized());
}

#[test]
fn uninitialized_navigation_cannot_be_saved() {
  let navigation = Navigation::new();
  assert!(matches!(
    navigation.save_to_writer(&mut Vec::new(), false),
    Err(PersistenceError::NotInitialized)
  ));
}

#[test]
fn save_file_round_trips() {
  let path = std::env::temp_dir()
    .join(format!("shoal-persistence-{}.bin", std::process::id()));
  let original = populated_navigation();
  original.save(&path, true).expect("save succeeds");

  let mut loaded = Navigation::new();
  let result = loaded.load(&path, true);
  std::fs::remove_file(&path).expect("save file exists");
  result.expect("load succeeds");
  assert_eq!(tile_bytes(&loaded), tile_bytes(&original));
  assert_eq!(loaded.agents().len(), 2);
}

#[test]
fn overlong_byte_string_fails_at_the_end_of_the_save() {
  let mut bytes = u32::MAX.to_le_bytes().to_vec();
  bytes.extend([1, 2, 3]);
  let err = read_bytes(&mut Cursor::new(bytes)).expect_err("save is short");
  assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);

  let mut bytes = 3u32.to_le_bytes().to_vec();
  bytes.extend([1, 2, 3, 4]);
  assert_eq!(read_bytes(&mut Cursor::new(bytes)).expect("fits"), [1, 2, 3]);
}

#[test]
fn compressed_save_claiming_too_much_is_rejected() {
  let mut bytes = SAVE_VERSION.to_le_bytes().to_vec();
  bytes.extend(0x7fff_ffffu32.to_le_bytes());
  bytes.extend([0x10, 0x61]);

  let mut loaded = Navigation::new();
  assert!(matches!(
    loaded.load_from_reader(&mut Cursor::new(bytes), true),
    Err(PersistenceError::Invalid(_))
  ));
  assert!(!loaded.is_initialized());
}
