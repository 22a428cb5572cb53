use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use glam::Vec3;
use log::debug;
use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::{
  crowd::{CrowdAgentId, CrowdAgentParams, UpdateFlags},
  input_geometry::InputGeometry,
  navigation::NavigationEvent,
  navigation_mesh::{NavMeshId, NavigationMesh},
  query_filter::{QueryFilters, DEFAULT_FILTER_NAME},
};

/// An agent within this distance of its target has arrived.
pub const ARRIVAL_DISTANCE: f32 = 0.1;
/// The length of the window over which movement is measured, in seconds.
const MOVEMENT_WINDOW: f32 = 1.0;
/// Moving less than this fraction of the max speed over the movement window
/// counts as not moving.
const MOVEMENT_FRACTION: f32 = 0.01;
/// The length of the window over which progress is measured, in seconds.
const PROGRESS_WINDOW: f32 = 5.0;
/// Getting closer by less than this fraction of the max speed over the
/// progress window counts as not progressing.
const PROGRESS_FRACTION: f32 = 0.03;

new_key_type! {
  /// The ID of an agent.
  pub struct AgentId;
}

/// How an agent is simulated.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CrowdAgentParameters {
  /// Where the agent starts. It is placed at the nearest walkable point.
  pub position: Vec3,
  pub radius: f32,
  pub height: f32,
  pub max_acceleration: f32,
  pub max_speed: f32,
  /// The name of the query filter the agent paths with.
  pub filter_name: String,
  /// Whether the agent starts turning before reaching a corner.
  pub anticipate_turns: bool,
  /// Whether the agent shortcuts its path when it can see further ahead.
  pub optimize_visibility: bool,
  /// Whether the agent periodically searches for a shorter corridor.
  pub optimize_topology: bool,
  /// Whether the agent steers around other agents and walls.
  pub avoid_obstacles: bool,
  /// Whether the agent keeps its distance from other agents.
  pub avoid_other_agents: bool,
  /// The quality of obstacle avoidance, from 0 (lowest) to 3 (highest).
  pub obstacle_avoidance: u8,
  /// How strongly the agent keeps away from other agents.
  pub separation_weight: f32,
}

impl Default for CrowdAgentParameters {
  fn default() -> Self {
    Self {
      position: Vec3::ZERO,
      radius: 0.5,
      height: 2.0,
      max_acceleration: 8.0,
      max_speed: 3.5,
      filter_name: DEFAULT_FILTER_NAME.to_string(),
      anticipate_turns: true,
      optimize_visibility: true,
      optimize_topology: true,
      avoid_obstacles: true,
      avoid_other_agents: true,
      obstacle_avoidance: 3,
      separation_weight: 2.0,
    }
  }
}

impl CrowdAgentParameters {
  /// The simulation parameters of the agent. Followers never push other
  /// agents, so they have no separation.
  pub(crate) fn to_crowd_params(
    &self,
    filter: usize,
    follower: bool,
  ) -> CrowdAgentParams {
    let mut update_flags = UpdateFlags::empty();
    update_flags.set(UpdateFlags::ANTICIPATE_TURNS, self.anticipate_turns);
    update_flags.set(UpdateFlags::OPTIMIZE_VIS, self.optimize_visibility);
    update_flags.set(UpdateFlags::OPTIMIZE_TOPO, self.optimize_topology);
    update_flags.set(UpdateFlags::OBSTACLE_AVOIDANCE, self.avoid_obstacles);
    update_flags.set(UpdateFlags::SEPARATION, self.avoid_other_agents);
    CrowdAgentParams {
      radius: self.radius,
      height: self.height,
      max_acceleration: self.max_acceleration,
      max_speed: self.max_speed,
      collision_query_range: self.radius * 12.0,
      path_optimization_range: self.radius * 30.0,
      separation_weight: if follower { 0.0 } else { self.separation_weight },
      update_flags,
      obstacle_avoidance: self.obstacle_avoidance.min(3),
      filter,
      follower,
    }
  }
}

/// The state of an agent.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AgentState {
  /// The agent has no target. It may still be pushed around by other agents.
  Idle,
  /// The agent is moving towards its target.
  GoingToTarget,
}

/// The public state of an agent, refreshed every tick.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct AgentSnapshot {
  pub position: Vec3,
  pub velocity: Vec3,
  /// The last target the agent accepted.
  pub target: Vec3,
  pub state: AgentState,
}

impl AgentSnapshot {
  pub fn is_moving(&self) -> bool {
    self.state == AgentState::GoingToTarget
  }
}

/// The state shared between an agent's handles and the tick thread.
#[derive(Debug)]
pub(crate) struct AgentShared {
  /// Set by [`AgentHandle::move_towards`], cleared by the tick thread.
  has_new_target: AtomicBool,
  /// Set by [`AgentHandle::stop`], cleared by the tick thread.
  stop_requested: AtomicBool,
  requested_target: Mutex<Vec3>,
  snapshot: Mutex<AgentSnapshot>,
}

impl AgentShared {
  fn new(position: Vec3) -> Self {
    Self {
      has_new_target: AtomicBool::new(false),
      stop_requested: AtomicBool::new(false),
      requested_target: Mutex::new(position),
      snapshot: Mutex::new(AgentSnapshot {
        position,
        velocity: Vec3::ZERO,
        target: position,
        state: AgentState::Idle,
      }),
    }
  }
}

/// A handle to an agent, usable from any thread. Move requests are picked up
/// on the next tick; if several are made before then, the last one wins.
#[derive(Clone)]
pub struct AgentHandle {
  id: AgentId,
  height: f32,
  geometry: Arc<InputGeometry>,
  shared: Arc<AgentShared>,
}

impl AgentHandle {
  pub fn id(&self) -> AgentId {
    self.id
  }

  /// Asks the agent to move to `position`. The target is first dropped onto
  /// the input geometry below (or just above) it.
  pub fn move_towards(&self, position: Vec3) {
    let target =
      self.geometry.snap_to_surface(position, self.height).unwrap_or(position);
    *self.shared.requested_target.lock() = target;
    self.shared.stop_requested.store(false, Ordering::Release);
    self.shared.has_new_target.store(true, Ordering::Release);
  }

  /// Stops the agent where it stands on the next tick. A move request made
  /// before the stop is dropped then.
  pub fn stop(&self) {
    self.shared.stop_requested.store(true, Ordering::Release);
  }

  /// Whether a move request is waiting for the next tick.
  pub fn has_new_target(&self) -> bool {
    self.shared.has_new_target.load(Ordering::Acquire)
  }

  pub fn snapshot(&self) -> AgentSnapshot {
    *self.shared.snapshot.lock()
  }

  pub fn position(&self) -> Vec3 {
    self.snapshot().position
  }

  pub fn velocity(&self) -> Vec3 {
    self.snapshot().velocity
  }

  pub fn target(&self) -> Vec3 {
    self.snapshot().target
  }

  pub fn state(&self) -> AgentState {
    self.snapshot().state
  }

  pub fn is_moving(&self) -> bool {
    self.snapshot().is_moving()
  }

  /// The requested target not yet applied, if any.
  pub(crate) fn pending_target(&self) -> Option<Vec3> {
    self.has_new_target().then(|| *self.shared.requested_target.lock())
  }

  /// Queues `target` exactly as given, skipping the surface snap.
  pub(crate) fn set_pending_target(&self, target: Vec3) {
    *self.shared.requested_target.lock() = target;
    self.shared.has_new_target.store(true, Ordering::Release);
  }
}

/// Where one of an agent's simulated copies lives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct AgentBinding {
  pub(crate) nav_mesh: NavMeshId,
  pub(crate) crowd_agent: CrowdAgentId,
}

/// Accumulates an amount over a fixed window of time.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
struct StallWindow {
  elapsed: f32,
  amount: f32,
}

impl StallWindow {
  /// Adds `amount` over `delta_time`. Once `length` seconds have passed,
  /// returns the total and starts a new window.
  fn accumulate(
    &mut self,
    delta_time: f32,
    amount: f32,
    length: f32,
  ) -> Option<f32> {
    self.elapsed += delta_time;
    self.amount += amount;
    if self.elapsed < length {
      return None;
    }
    let total = self.amount;
    *self = Self::default();
    Some(total)
  }
}

/// An agent simulated in one navigation mesh (its main binding) and mirrored
/// into every other mesh it fits (its shadows).
pub(crate) struct Agent {
  pub(crate) parameters: CrowdAgentParameters,
  pub(crate) filter: usize,
  pub(crate) main: AgentBinding,
  pub(crate) shadows: Vec<AgentBinding>,
  handle: AgentHandle,
  state: AgentState,
  target: Vec3,
  position: Vec3,
  velocity: Vec3,
  distance_to_target: f32,
  movement: StallWindow,
  progress: StallWindow,
}

impl Agent {
  pub(crate) fn new(
    id: AgentId,
    parameters: CrowdAgentParameters,
    filter: usize,
    main: AgentBinding,
    shadows: Vec<AgentBinding>,
    geometry: Arc<InputGeometry>,
    position: Vec3,
  ) -> Self {
    let handle = AgentHandle {
      id,
      height: parameters.height,
      geometry,
      shared: Arc::new(AgentShared::new(position)),
    };
    Self {
      parameters,
      filter,
      main,
      shadows,
      handle,
      state: AgentState::Idle,
      target: position,
      position,
      velocity: Vec3::ZERO,
      distance_to_target: 0.0,
      movement: StallWindow::default(),
      progress: StallWindow::default(),
    }
  }

  pub(crate) fn handle(&self) -> &AgentHandle {
    &self.handle
  }

  pub(crate) fn state(&self) -> AgentState {
    self.state
  }

  pub(crate) fn target(&self) -> Vec3 {
    self.target
  }

  fn reset_counters(&mut self) {
    self.movement = StallWindow::default();
    self.progress = StallWindow::default();
  }

  /// Handles the stop and move requests made since the last tick. A target
  /// away from the navigation mesh is retried on the next tick.
  pub(crate) fn apply_new_target(
    &mut self,
    nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>,
    filters: &QueryFilters,
  ) {
    let shared = Arc::clone(&self.handle.shared);
    if shared.stop_requested.swap(false, Ordering::AcqRel) {
      shared.has_new_target.store(false, Ordering::Release);
      self.stop(nav_meshes);
      return;
    }
    if !shared.has_new_target.swap(false, Ordering::AcqRel) {
      return;
    }
    let requested = *shared.requested_target.lock();
    let Some(navigation_mesh) = nav_meshes.get_mut(self.main.nav_mesh) else {
      return;
    };

    let filter = filters.get_or_default(self.filter);
    let extents = Vec3::new(
      self.parameters.radius * 4.0,
      self.parameters.height,
      self.parameters.radius * 4.0,
    );
    let Some((poly, target)) = navigation_mesh.nav_mesh.find_nearest_poly(
      requested,
      extents,
      Some(&filter),
    ) else {
      debug!(
        "No walkable surface near target {} of agent {:?}. Retrying next tick.",
        requested, self.handle.id
      );
      shared.has_new_target.store(true, Ordering::Release);
      return;
    };
    navigation_mesh.crowd.request_move_target(
      self.main.crowd_agent,
      poly,
      target,
    );
    self.target = target;
    self.state = AgentState::GoingToTarget;
    self.distance_to_target = self.position.distance(target);
    self.reset_counters();
  }

  fn stop(&mut self, nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>) {
    self.state = AgentState::Idle;
    self.reset_counters();
    if let Some(navigation_mesh) = nav_meshes.get_mut(self.main.nav_mesh) {
      navigation_mesh.crowd.reset_move_target(self.main.crowd_agent);
    }
  }

  /// Reads back the simulated state, mirrors it into the shadows and
  /// reports arrival or stalls.
  pub(crate) fn update(
    &mut self,
    delta_time: f32,
    nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>,
    filters: &QueryFilters,
    events: &mut Vec<NavigationEvent>,
  ) {
    let Some(crowd_agent) = nav_meshes
      .get(self.main.nav_mesh)
      .and_then(|mesh| mesh.crowd.agent(self.main.crowd_agent))
    else {
      return;
    };
    let (position, velocity) = (crowd_agent.position(), crowd_agent.velocity());
    let moved = position.distance(self.position);
    self.position = position;
    self.velocity = velocity;

    for shadow in self.shadows.iter() {
      let Some(NavigationMesh { nav_mesh, crowd, .. }) =
        nav_meshes.get_mut(shadow.nav_mesh)
      else {
        continue;
      };
      crowd.mirror_agent(
        shadow.crowd_agent,
        position,
        velocity,
        nav_mesh,
        filters,
      );
    }

    if self.state == AgentState::GoingToTarget {
      let id = self.handle.id;
      let distance = position.distance(self.target);
      if distance <= ARRIVAL_DISTANCE {
        self.stop(nav_meshes);
        events.push(NavigationEvent::AgentArrived(id));
      } else {
        let max_speed = self.parameters.max_speed;
        if let Some(total) =
          self.movement.accumulate(delta_time, moved, MOVEMENT_WINDOW)
        {
          if total < MOVEMENT_FRACTION * max_speed * MOVEMENT_WINDOW {
            events.push(NavigationEvent::AgentNoMovement(id));
          }
        }
        let improvement = self.distance_to_target - distance;
        if let Some(total) =
          self.progress.accumulate(delta_time, improvement, PROGRESS_WINDOW)
        {
          if total < PROGRESS_FRACTION * max_speed * PROGRESS_WINDOW {
            events.push(NavigationEvent::AgentNoProgress(id));
          }
        }
      }
      self.distance_to_target = distance;
    }
    self.publish();
  }

  /// Restores the motion of a loaded agent.
  pub(crate) fn restore(
    &mut self,
    velocity: Vec3,
    target: Vec3,
    state: AgentState,
    nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>,
  ) {
    self.velocity = velocity;
    self.target = target;
    if let Some(navigation_mesh) = nav_meshes.get_mut(self.main.nav_mesh) {
      navigation_mesh.crowd.set_velocity(self.main.crowd_agent, velocity);
    }
    if state == AgentState::GoingToTarget {
      self.handle.set_pending_target(target);
    }
    self.state = state;
    self.distance_to_target = self.position.distance(target);
    self.publish();
  }

  fn publish(&self) {
    *self.handle.shared.snapshot.lock() = AgentSnapshot {
      position: self.position,
      velocity: self.velocity,
      target: self.target,
      state: self.state,
    };
  }

  /// Takes the agent out of every crowd it is in.
  pub(crate) fn destroy(
    &mut self,
    nav_meshes: &mut SlotMap<NavMeshId, NavigationMesh>,
  ) {
    for binding in std::iter::once(self.main).chain(self.shadows.drain(..)) {
      if let Some(navigation_mesh) = nav_meshes.get_mut(binding.nav_mesh) {
        navigation_mesh.crowd.remove_agent(binding.crowd_agent);
      }
    }
  }
}

#[cfg(test)]
#[path = "agent_test.rs"]
mod test;
