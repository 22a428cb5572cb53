use std::{borrow::Cow, collections::HashMap};

use bitflags::bitflags;
use glam::{Vec3, Vec3Swizzles};
use kdtree::{distance::squared_euclidean, KdTree};
use log::debug;
use slotmap::{new_key_type, HopSlotMap};
use thiserror::Error;

use crate::{
  nav_mesh::{NavMesh, PolyRef},
  path_corridor::PathCorridor,
  query::{StraightPathFlags, StraightPathPoint},
  query_filter::{QueryFilter, QueryFilters},
};

/// The most neighbours an agent considers for separation and avoidance.
pub(crate) const MAX_NEIGHBOURS: usize = 6;
/// The most upcoming corners an agent steers by.
const MAX_CORNERS: usize = 4;
/// How many polygons ahead the corridor is checked each update.
const CHECK_LOOK_AHEAD: usize = 10;
/// Seconds between attempts to shorten a corridor with a new search.
const TOPOLOGY_OPTIMIZATION_INTERVAL: f32 = 0.5;
const COLLISION_RESOLVE_ITERATIONS: usize = 4;
/// How much of the overlap between two agents is resolved per iteration.
const COLLISION_RESOLVE_FACTOR: f32 = 0.7;
/// The most polygons searched for walls around an agent.
const MAX_LOCAL_WALL_POLYS: usize = 16;
/// Agents trigger an off-mesh connection this many radii away from it.
const OFF_MESH_TRIGGER_RADII: f32 = 2.25;
/// Agents start slowing down this many radii from their goal.
const SLOW_DOWN_RADII: f32 = 2.0;

new_key_type! {
  /// The id of an agent within one crowd.
  pub(crate) struct CrowdAgentId;
}

bitflags! {
  /// The steering behaviours an agent uses.
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub(crate) struct UpdateFlags: u8 {
    /// Steer towards a blend of the next two corners.
    const ANTICIPATE_TURNS = 0x01;
    /// Avoid walls and other agents by adjusting the velocity.
    const OBSTACLE_AVOIDANCE = 0x02;
    /// Keep some distance from other agents.
    const SEPARATION = 0x04;
    /// Shortcut the corridor when the next corners are visible.
    const OPTIMIZE_VIS = 0x08;
    /// Periodically search for a shorter corridor.
    const OPTIMIZE_TOPO = 0x10;
  }
}

/// How an agent behaves in its crowd.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct CrowdAgentParams {
  pub(crate) radius: f32,
  pub(crate) height: f32,
  pub(crate) max_acceleration: f32,
  pub(crate) max_speed: f32,
  /// How far away neighbours and walls are noticed.
  pub(crate) collision_query_range: f32,
  /// How far ahead the visibility shortcut looks.
  pub(crate) path_optimization_range: f32,
  pub(crate) separation_weight: f32,
  pub(crate) update_flags: UpdateFlags,
  /// From 0 (cheapest) to 3 (best).
  pub(crate) obstacle_avoidance: u8,
  /// The index of the query filter the agent uses.
  pub(crate) filter: usize,
  /// Whether the agent only mirrors movement computed elsewhere.
  pub(crate) follower: bool,
}

impl CrowdAgentParams {
  /// Parameters for an agent of `radius` and `height` with the usual
  /// behaviours enabled.
  pub(crate) fn new(radius: f32, height: f32, max_speed: f32) -> Self {
    Self {
      radius,
      height,
      max_acceleration: 8.0,
      max_speed,
      collision_query_range: radius * 12.0,
      path_optimization_range: radius * 30.0,
      separation_weight: 2.0,
      update_flags: UpdateFlags::ANTICIPATE_TURNS
        | UpdateFlags::OBSTACLE_AVOIDANCE
        | UpdateFlags::SEPARATION
        | UpdateFlags::OPTIMIZE_VIS
        | UpdateFlags::OPTIMIZE_TOPO,
      obstacle_avoidance: 3,
      filter: 0,
      follower: false,
    }
  }
}

/// The state of an agent's move request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TargetState {
  None,
  /// The last request could not be planned.
  Failed,
  /// A path is waiting to be planned.
  Requesting,
  Valid,
}

/// An agent moving over an off-mesh connection: first to its entry point,
/// then to its exit point, at the agent's full speed.
#[derive(Clone, Copy, Debug, PartialEq)]
struct OffMeshTraversal {
  from: Vec3,
  entry: Vec3,
  exit: Vec3,
  elapsed: f32,
}

impl OffMeshTraversal {
  /// The position `elapsed` seconds into the traversal, and whether the
  /// traversal is complete.
  fn sample(&self, speed: f32) -> (Vec3, bool) {
    let approach = self.from.distance(self.entry);
    let crossing = self.entry.distance(self.exit);
    let travelled = self.elapsed * speed;
    if travelled >= approach + crossing {
      (self.exit, true)
    } else if travelled < approach {
      (self.from.lerp(self.entry, travelled / approach), false)
    } else {
      let t = if crossing > 0.0 { (travelled - approach) / crossing } else { 1.0 };
      (self.entry.lerp(self.exit, t), false)
    }
  }
}

/// A nearby agent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Neighbour {
  pub(crate) id: CrowdAgentId,
  pub(crate) distance_squared: f32,
}

/// An agent simulated by a [`Crowd`].
#[derive(Clone, Debug)]
pub(crate) struct CrowdAgent {
  pub(crate) params: CrowdAgentParams,
  corridor: PathCorridor,
  position: Vec3,
  velocity: Vec3,
  desired_velocity: Vec3,
  new_velocity: Vec3,
  displacement: Vec3,
  target_state: TargetState,
  target_poly: Option<PolyRef>,
  target_position: Vec3,
  topology_time: f32,
  corners: Vec<StraightPathPoint>,
  neighbours: Vec<Neighbour>,
  walls: Vec<(Vec3, Vec3)>,
  wall_polys: Vec<PolyRef>,
  walls_center: Vec3,
  traversal: Option<OffMeshTraversal>,
  /// Inactive agents are skipped and dropped on the next update.
  active: bool,
}

impl CrowdAgent {
  pub(crate) fn position(&self) -> Vec3 {
    self.position
  }

  pub(crate) fn velocity(&self) -> Vec3 {
    self.velocity
  }

  pub(crate) fn desired_velocity(&self) -> Vec3 {
    self.desired_velocity
  }

  pub(crate) fn target_state(&self) -> TargetState {
    self.target_state
  }

  pub(crate) fn corridor(&self) -> &PathCorridor {
    &self.corridor
  }

  pub(crate) fn corners(&self) -> &[StraightPathPoint] {
    &self.corners
  }

  pub(crate) fn neighbours(&self) -> &[Neighbour] {
    &self.neighbours
  }

  pub(crate) fn walls(&self) -> &[(Vec3, Vec3)] {
    &self.walls
  }

  #[cfg(test)]
  pub(crate) fn is_traversing_off_mesh(&self) -> bool {
    self.traversal.is_some()
  }

  /// Whether the crowd moves this agent itself.
  fn is_steered(&self) -> bool {
    !self.params.follower && self.traversal.is_none()
  }

  /// How far to search around the agent when placing it on the mesh.
  fn placement_extents(&self) -> Vec3 {
    placement_extents(self.params.radius)
  }
}

fn placement_extents(radius: f32) -> Vec3 {
  Vec3::new(radius * 2.0, radius * 1.5, radius * 2.0)
}

/// The time horizons (agents, obstacles) used for each avoidance quality.
fn avoidance_horizons(quality: u8) -> (f32, f32) {
  match quality {
    0 => (1.0, 0.25),
    1 => (1.5, 0.5),
    2 => (2.0, 0.75),
    _ => (2.5, 1.0),
  }
}

/// An error while adding an agent to a crowd.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CrowdError {
  #[error("The crowd already holds its maximum of {max} agents.")]
  Full { max: usize },
  #[error("There is no navigation mesh near {0}.")]
  NotOnNavMesh(Vec3),
}

/// Moves a set of agents over one navigation mesh, keeping them apart and
/// away from walls.
#[derive(Debug)]
pub(crate) struct Crowd {
  max_agents: usize,
  max_query_nodes: usize,
  agents: HopSlotMap<CrowdAgentId, CrowdAgent>,
}

impl Crowd {
  pub(crate) fn new(max_agents: usize, max_query_nodes: usize) -> Self {
    Self { max_agents, max_query_nodes, agents: HopSlotMap::with_key() }
  }

  pub(crate) fn len(&self) -> usize {
    self.agents.len()
  }

  pub(crate) fn agent(&self, id: CrowdAgentId) -> Option<&CrowdAgent> {
    self.agents.get(id).filter(|agent| agent.active)
  }

  pub(crate) fn agents(
    &self,
  ) -> impl Iterator<Item = (CrowdAgentId, &CrowdAgent)> + '_ {
    self.agents.iter().filter(|(_, agent)| agent.active)
  }

  /// Adds an agent at the walkable point nearest to `position`.
  pub(crate) fn add_agent(
    &mut self,
    position: Vec3,
    params: CrowdAgentParams,
    nav_mesh: &NavMesh,
    filters: &QueryFilters,
  ) -> Result<CrowdAgentId, CrowdError> {
    if self.agents.len() >= self.max_agents {
      return Err(CrowdError::Full { max: self.max_agents });
    }
    let filter = filters.get_or_default(params.filter);
    let (poly, nearest) = nav_mesh
      .find_nearest_poly(position, placement_extents(params.radius), Some(&filter))
      .ok_or(CrowdError::NotOnNavMesh(position))?;

    let mut corridor = PathCorridor::default();
    corridor.reset(poly, nearest);
    Ok(self.agents.insert(CrowdAgent {
      params,
      corridor,
      position: nearest,
      velocity: Vec3::ZERO,
      desired_velocity: Vec3::ZERO,
      new_velocity: Vec3::ZERO,
      displacement: Vec3::ZERO,
      target_state: TargetState::None,
      target_poly: None,
      target_position: nearest,
      topology_time: 0.0,
      corners: Vec::new(),
      neighbours: Vec::new(),
      walls: Vec::new(),
      wall_polys: Vec::new(),
      walls_center: nearest,
      traversal: None,
      active: true,
    }))
  }

  /// Marks agent `id` inactive. It stops taking part in the simulation and
  /// its slot is freed on the next update.
  pub(crate) fn remove_agent(&mut self, id: CrowdAgentId) -> bool {
    match self.agents.get_mut(id) {
      Some(agent) if agent.active => {
        agent.active = false;
        true
      }
      _ => false,
    }
  }

  /// Asks for agent `id` to move to `position` on `poly`. The path is
  /// planned on the next update.
  pub(crate) fn request_move_target(
    &mut self,
    id: CrowdAgentId,
    poly: PolyRef,
    position: Vec3,
  ) -> bool {
    let Some(agent) = self.agents.get_mut(id).filter(|agent| agent.active)
    else {
      return false;
    };
    agent.target_poly = Some(poly);
    agent.target_position = position;
    agent.target_state = TargetState::Requesting;
    true
  }

  /// Stops agent `id` where it stands.
  pub(crate) fn reset_move_target(&mut self, id: CrowdAgentId) -> bool {
    let Some(agent) = self.agents.get_mut(id).filter(|agent| agent.active)
    else {
      return false;
    };
    agent.target_state = TargetState::None;
    agent.target_poly = None;
    agent.target_position = agent.position;
    agent.desired_velocity = Vec3::ZERO;
    agent.corners.clear();
    if let Some(first) = agent.corridor.first_poly() {
      agent.corridor.reset(first, agent.position);
    }
    true
  }

  /// Places follower `id` at the walkable point nearest to `position`,
  /// moving with `velocity`.
  pub(crate) fn mirror_agent(
    &mut self,
    id: CrowdAgentId,
    position: Vec3,
    velocity: Vec3,
    nav_mesh: &NavMesh,
    filters: &QueryFilters,
  ) -> bool {
    let Some(agent) = self.agents.get_mut(id).filter(|agent| agent.active)
    else {
      return false;
    };
    let filter = filters.get_or_default(agent.params.filter);
    match nav_mesh.find_nearest_poly(
      position,
      agent.placement_extents(),
      Some(&filter),
    ) {
      Some((poly, nearest)) => {
        agent.corridor.reset(poly, nearest);
        agent.position = nearest;
      }
      None => {
        agent.corridor.clear(position);
        agent.position = position;
      }
    }
    agent.velocity = velocity;
    agent.desired_velocity = velocity;
    true
  }

  pub(crate) fn set_velocity(&mut self, id: CrowdAgentId, velocity: Vec3) {
    if let Some(agent) = self.agents.get_mut(id) {
      agent.velocity = velocity;
    }
  }

  /// Advances every agent by `delta_time` seconds.
  pub(crate) fn update(
    &mut self,
    delta_time: f32,
    nav_mesh: &NavMesh,
    filters: &QueryFilters,
  ) {
    self.agents.retain(|_, agent| agent.active);
    self.check_path_validity(nav_mesh, filters);
    self.update_move_requests(nav_mesh, filters);
    self.update_topology_optimization(delta_time, nav_mesh, filters);
    self.find_neighbours();
    self.update_walls(nav_mesh, filters);
    self.steer(nav_mesh, filters);
    self.apply_separation();
    self.apply_avoidance(delta_time);
    self.integrate(delta_time);
    self.resolve_collisions();
    self.move_along_surface(nav_mesh, filters);
    self.advance_traversals(delta_time);
  }

  /// Repairs corridors whose polygons were removed or became excluded.
  fn check_path_validity(&mut self, nav_mesh: &NavMesh, filters: &QueryFilters) {
    for agent in self.agents.values_mut() {
      if !agent.is_steered() {
        continue;
      }
      let filter = filters.get_or_default(agent.params.filter);
      let mut replan = false;

      let first_valid = agent
        .corridor
        .first_poly()
        .is_some_and(|first| nav_mesh.passes_filter(first, &filter));
      if !first_valid {
        match nav_mesh.find_nearest_poly(
          agent.position,
          agent.placement_extents(),
          Some(&filter),
        ) {
          Some((poly, nearest)) => {
            agent.corridor.fix_path_start(poly, nearest);
            agent.position = nearest;
            replan = true;
          }
          None => {
            agent.corridor.clear(agent.position);
            agent.target_state = TargetState::None;
            agent.corners.clear();
            continue;
          }
        }
      }

      if matches!(agent.target_state, TargetState::Requesting | TargetState::Valid)
        && !agent
          .target_poly
          .is_some_and(|target| nav_mesh.passes_filter(target, &filter))
      {
        match nav_mesh.find_nearest_poly(
          agent.target_position,
          agent.placement_extents(),
          Some(&filter),
        ) {
          Some((poly, nearest)) => {
            agent.target_poly = Some(poly);
            agent.target_position = nearest;
            replan = true;
          }
          None => {
            agent.target_state = TargetState::None;
            agent.target_poly = None;
            if let Some(first) = agent.corridor.first_poly() {
              agent.corridor.reset(first, agent.position);
            }
            continue;
          }
        }
      }

      if agent.target_state == TargetState::Valid
        && !agent.corridor.is_valid(CHECK_LOOK_AHEAD, nav_mesh, &filter)
      {
        if let Some(first) = agent.corridor.first_poly() {
          agent.corridor.trim_invalid_path(first, agent.position, nav_mesh, &filter);
        }
        replan = true;
      }

      if replan && agent.target_state == TargetState::Valid {
        agent.target_state = TargetState::Requesting;
      }
    }
  }

  /// Plans paths for agents that asked to move.
  fn update_move_requests(&mut self, nav_mesh: &NavMesh, filters: &QueryFilters) {
    for agent in self.agents.values_mut() {
      if agent.target_state != TargetState::Requesting || !agent.is_steered() {
        continue;
      }
      let filter = filters.get_or_default(agent.params.filter);
      let (Some(start), Some(target)) =
        (agent.corridor.first_poly(), agent.target_poly)
      else {
        agent.target_state = TargetState::Failed;
        continue;
      };

      match nav_mesh.find_path(
        (start, agent.position),
        (target, agent.target_position),
        &filter,
        self.max_query_nodes,
      ) {
        Ok(result) => {
          let end = if result.is_partial {
            result
              .polys
              .last()
              .and_then(|&last| {
                nav_mesh.closest_point_on_poly(last, agent.target_position)
              })
              .unwrap_or(agent.target_position)
          } else {
            agent.target_position
          };
          agent.corridor.set_corridor(end, result.polys);
          agent.target_state = TargetState::Valid;
          agent.topology_time = 0.0;
        }
        Err(err) => {
          debug!("Could not plan a path to {}: {}", agent.target_position, err);
          agent.target_state = TargetState::Failed;
          agent.corridor.reset(start, agent.position);
        }
      }
    }
  }

  fn update_topology_optimization(
    &mut self,
    delta_time: f32,
    nav_mesh: &NavMesh,
    filters: &QueryFilters,
  ) {
    for agent in self.agents.values_mut() {
      if agent.target_state != TargetState::Valid
        || !agent.is_steered()
        || !agent.params.update_flags.contains(UpdateFlags::OPTIMIZE_TOPO)
      {
        continue;
      }
      agent.topology_time += delta_time;
      if agent.topology_time >= TOPOLOGY_OPTIMIZATION_INTERVAL {
        let filter = filters.get_or_default(agent.params.filter);
        agent.corridor.optimize_path_topology(nav_mesh, &filter);
        agent.topology_time = 0.0;
      }
    }
  }

  /// Collects the closest agents within each agent's query range, ignoring
  /// agents on other floors.
  fn find_neighbours(&mut self) {
    let mut tree = KdTree::new(/* dimensions= */ 3);
    for (id, agent) in self.agents.iter() {
      let position = agent.position;
      tree
        .add([position.x, position.y, position.z], id)
        .expect("Agent position is finite");
    }
    let heights = self
      .agents
      .iter()
      .map(|(id, agent)| (id, (agent.position.y, agent.params.height)))
      .collect::<HashMap<_, _>>();

    for (id, agent) in self.agents.iter_mut() {
      let range = agent.params.collision_query_range;
      let position = agent.position;
      let mut neighbours = tree
        .within(
          &[position.x, position.y, position.z],
          range * range,
          &squared_euclidean,
        )
        .unwrap_or_default()
        .into_iter()
        .filter(|&(_, &other)| other != id)
        .filter(|&(_, other)| {
          let (y, height) = heights[other];
          (position.y - y).abs() < (agent.params.height + height) * 0.5
        })
        .map(|(distance_squared, &other)| Neighbour {
          id: other,
          distance_squared,
        })
        .collect::<Vec<_>>();
      neighbours.sort_by(|a, b| a.distance_squared.total_cmp(&b.distance_squared));
      neighbours.truncate(MAX_NEIGHBOURS);
      agent.neighbours = neighbours;
    }
  }

  /// Refreshes the walls around agents that moved far enough, or whose
  /// surroundings changed.
  fn update_walls(&mut self, nav_mesh: &NavMesh, filters: &QueryFilters) {
    for agent in self.agents.values_mut() {
      if !agent.is_steered() {
        continue;
      }
      let Some(first) = agent.corridor.first_poly() else {
        agent.walls.clear();
        agent.wall_polys.clear();
        continue;
      };
      let range = agent.params.collision_query_range;
      let refresh_distance = range * 0.25;
      let stale = agent.position.distance_squared(agent.walls_center)
        > refresh_distance * refresh_distance
        || !agent.wall_polys.contains(&first)
        || agent.wall_polys.iter().any(|&poly| !nav_mesh.is_valid_ref(poly));
      if !stale {
        continue;
      }
      let filter = filters.get_or_default(agent.params.filter);
      let (walls, polys) = nav_mesh.find_local_walls(
        first,
        agent.position,
        range,
        &filter,
        MAX_LOCAL_WALL_POLYS,
      );
      agent.walls = walls;
      agent.wall_polys = polys;
      agent.walls_center = agent.position;
    }
  }

  /// Finds each agent's next corners and the velocity it wants to move at.
  /// Agents close to an off-mesh connection start traversing it.
  fn steer(&mut self, nav_mesh: &NavMesh, filters: &QueryFilters) {
    for agent in self.agents.values_mut() {
      if !agent.is_steered() {
        continue;
      }
      if agent.target_state != TargetState::Valid {
        agent.corners.clear();
        agent.desired_velocity = Vec3::ZERO;
        continue;
      }

      let filter = filters.get_or_default(agent.params.filter);
      agent.corners = agent.corridor.find_corners(nav_mesh, MAX_CORNERS);
      if agent.params.update_flags.contains(UpdateFlags::OPTIMIZE_VIS)
        && !agent.corners.is_empty()
      {
        let next = agent.corners[1.min(agent.corners.len() - 1)].position;
        agent.corridor.optimize_path_visibility(
          next,
          agent.params.path_optimization_range,
          nav_mesh,
          &filter,
        );
      }

      if let Some(off_mesh) = off_mesh_trigger(agent) {
        if let Some((entry, exit)) =
          agent.corridor.move_over_off_mesh_connection(off_mesh, nav_mesh)
        {
          agent.traversal =
            Some(OffMeshTraversal { from: agent.position, entry, exit, elapsed: 0.0 });
          agent.corners.clear();
          agent.desired_velocity = Vec3::ZERO;
          agent.new_velocity = Vec3::ZERO;
          continue;
        }
      }

      agent.desired_velocity = desired_velocity(agent);
    }
  }

  /// Pushes the desired velocity of each agent away from its neighbours.
  fn apply_separation(&mut self) {
    let positions = self
      .agents
      .iter()
      .map(|(id, agent)| (id, agent.position))
      .collect::<HashMap<_, _>>();

    for agent in self.agents.values_mut() {
      if !agent.is_steered()
        || !agent.params.update_flags.contains(UpdateFlags::SEPARATION)
        || agent.params.separation_weight <= 0.0
      {
        continue;
      }
      let separation_distance = agent.params.collision_query_range;
      let mut displacement = Vec3::ZERO;
      let mut weight_count = 0.0;
      for neighbour in agent.neighbours.iter() {
        let mut difference = agent.position - positions[&neighbour.id];
        difference.y = 0.0;
        let distance_squared = difference.length_squared();
        if distance_squared < 1e-5
          || distance_squared > separation_distance * separation_distance
        {
          continue;
        }
        let distance = distance_squared.sqrt();
        let weight = agent.params.separation_weight
          * (1.0 - (distance / separation_distance).powi(2));
        displacement += difference * (weight / distance);
        weight_count += 1.0;
      }
      if weight_count < 1e-4 {
        continue;
      }

      let desired_speed = agent.desired_velocity.length();
      let velocity = agent.desired_velocity + displacement / weight_count;
      let speed_squared = velocity.length_squared();
      agent.desired_velocity = if speed_squared > desired_speed * desired_speed {
        velocity * (desired_speed * desired_speed / speed_squared)
      } else {
        velocity
      };
    }
  }

  /// Picks a collision-free velocity close to the desired one.
  fn apply_avoidance(&mut self, mut delta_time: f32) {
    if delta_time == 0.0 {
      delta_time = 1.0;
    }
    let dodgy_agents = self
      .agents
      .iter()
      .map(|(id, agent)| {
        (
          id,
          dodgy_2d::Agent {
            position: to_dodgy_vec2(agent.position.xz()),
            velocity: to_dodgy_vec2(agent.velocity.xz()),
            radius: agent.params.radius,
            avoidance_responsibility: if agent.params.follower { 0.0 } else { 1.0 },
          },
        )
      })
      .collect::<HashMap<_, _>>();

    for (id, agent) in self.agents.iter_mut() {
      if !agent.is_steered() {
        continue;
      }
      if !agent.params.update_flags.contains(UpdateFlags::OBSTACLE_AVOIDANCE) {
        agent.new_velocity = agent.desired_velocity;
        continue;
      }

      let neighbours = agent
        .neighbours
        .iter()
        .map(|neighbour| Cow::Borrowed(&dodgy_agents[&neighbour.id]))
        .collect::<Vec<_>>();
      let obstacles = agent
        .walls
        .iter()
        .map(|&(start, end)| {
          Cow::Owned(dodgy_2d::Obstacle::Open {
            vertices: vec![to_dodgy_vec2(start.xz()), to_dodgy_vec2(end.xz())],
          })
        })
        .collect::<Vec<_>>();
      let (time_horizon, obstacle_time_horizon) =
        avoidance_horizons(agent.params.obstacle_avoidance);
      let avoidance_options = dodgy_2d::AvoidanceOptions {
        obstacle_margin: 0.0,
        time_horizon,
        obstacle_time_horizon,
      };

      let velocity = dodgy_agents[&id].compute_avoiding_velocity(
        &neighbours,
        &obstacles,
        to_dodgy_vec2(agent.desired_velocity.xz()),
        agent.params.max_speed,
        delta_time,
        &avoidance_options,
      );
      agent.new_velocity = Vec3::new(velocity.x, 0.0, velocity.y);
    }
  }

  /// Accelerates each agent towards its new velocity and moves it.
  fn integrate(&mut self, delta_time: f32) {
    for agent in self.agents.values_mut() {
      if !agent.is_steered() {
        continue;
      }
      let max_delta = agent.params.max_acceleration * delta_time;
      let mut delta = agent.new_velocity - agent.velocity;
      let delta_length = delta.length();
      if delta_length > max_delta {
        delta *= max_delta / delta_length;
      }
      agent.velocity += delta;

      if agent.velocity.length_squared() > 1e-8 {
        agent.position += agent.velocity * delta_time;
      } else {
        agent.velocity = Vec3::ZERO;
      }
    }
  }

  /// Pushes overlapping agents apart. Followers push others but are never
  /// moved.
  fn resolve_collisions(&mut self) {
    let order = self
      .agents
      .keys()
      .enumerate()
      .map(|(index, id)| (id, index))
      .collect::<HashMap<_, _>>();

    for _ in 0..COLLISION_RESOLVE_ITERATIONS {
      let positions = self
        .agents
        .iter()
        .map(|(id, agent)| (id, (agent.position, agent.params.radius)))
        .collect::<HashMap<_, _>>();

      for (id, agent) in self.agents.iter_mut() {
        agent.displacement = Vec3::ZERO;
        if !agent.is_steered() {
          continue;
        }
        let mut weight_count = 0.0;
        for neighbour in agent.neighbours.iter() {
          let (other_position, other_radius) = positions[&neighbour.id];
          let mut difference = agent.position - other_position;
          difference.y = 0.0;
          let combined_radius = agent.params.radius + other_radius;
          let distance_squared = difference.length_squared();
          if distance_squared > combined_radius * combined_radius {
            continue;
          }
          let distance = distance_squared.sqrt();
          let penetration = if distance < 1e-4 {
            // Agents on top of each other separate sideways to their motion,
            // in opposite directions.
            let velocity = agent.desired_velocity;
            difference = if order[&id] > order[&neighbour.id] {
              Vec3::new(-velocity.z, 0.0, velocity.x)
            } else {
              Vec3::new(velocity.z, 0.0, -velocity.x)
            };
            0.01
          } else {
            (combined_radius - distance) * 0.5 * COLLISION_RESOLVE_FACTOR
              / distance
          };
          agent.displacement += difference * penetration;
          weight_count += 1.0;
        }
        if weight_count > 1e-4 {
          agent.displacement /= weight_count;
        }
      }

      for agent in self.agents.values_mut() {
        agent.position += agent.displacement;
      }
    }
  }

  /// Keeps each agent on the surface, updating its corridor.
  fn move_along_surface(&mut self, nav_mesh: &NavMesh, filters: &QueryFilters) {
    for agent in self.agents.values_mut() {
      if !agent.is_steered() || agent.corridor.path().is_empty() {
        continue;
      }
      let filter: QueryFilter = filters.get_or_default(agent.params.filter);
      if agent.corridor.move_position(agent.position, nav_mesh, &filter) {
        agent.position = agent.corridor.position();
      }
      if agent.target_state != TargetState::Valid {
        if let Some(first) = agent.corridor.first_poly() {
          agent.corridor.reset(first, agent.position);
        }
      }
    }
  }

  fn advance_traversals(&mut self, delta_time: f32) {
    for agent in self.agents.values_mut() {
      let Some(traversal) = agent.traversal.as_mut() else {
        continue;
      };
      traversal.elapsed += delta_time;
      let (position, done) = traversal.sample(agent.params.max_speed);
      let exit = traversal.exit;
      if done {
        agent.traversal = None;
        agent.position = exit;
        agent.velocity = Vec3::ZERO;
      } else {
        let direction = (position - agent.position).normalize_or_zero();
        agent.velocity = direction * agent.params.max_speed;
        agent.position = position;
      }
    }
  }
}

/// The off-mesh connection the agent is close enough to start traversing.
fn off_mesh_trigger(agent: &CrowdAgent) -> Option<PolyRef> {
  let last = agent.corners.last()?;
  if !last.flags.contains(StraightPathFlags::OFF_MESH_CONNECTION) {
    return None;
  }
  let trigger_radius = agent.params.radius * OFF_MESH_TRIGGER_RADII;
  if last.position.xz().distance_squared(agent.position.xz())
    > trigger_radius * trigger_radius
  {
    return None;
  }
  last.poly
}

/// The velocity the agent wants to move at to follow its corners, slowing
/// down near the goal.
fn desired_velocity(agent: &CrowdAgent) -> Vec3 {
  let Some(first) = agent.corners.first() else {
    return Vec3::ZERO;
  };
  let direction = if agent.params.update_flags.contains(UpdateFlags::ANTICIPATE_TURNS)
  {
    let second = agent.corners[1.min(agent.corners.len() - 1)];
    let to_first = flatten(first.position - agent.position);
    let to_second = flatten(second.position - agent.position).normalize_or_zero();
    to_first - to_second * (to_first.length() * 0.5)
  } else {
    flatten(first.position - agent.position)
  }
  .normalize_or_zero();

  let slow_down_radius = agent.params.radius * SLOW_DOWN_RADII;
  let distance_to_goal = match agent.corners.last() {
    Some(last) if last.flags.contains(StraightPathFlags::END) => last
      .position
      .xz()
      .distance(agent.position.xz())
      .min(slow_down_radius),
    _ => slow_down_radius,
  };
  direction * agent.params.max_speed * (distance_to_goal / slow_down_radius)
}

fn flatten(v: Vec3) -> Vec3 {
  Vec3::new(v.x, 0.0, v.z)
}

fn to_dodgy_vec2(v: glam::Vec2) -> dodgy_2d::Vec2 {
  dodgy_2d::Vec2 { x: v.x, y: v.y }
}

#[cfg(test)]
#[path = "crowd_test.rs"]
mod test;
