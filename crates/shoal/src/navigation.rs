use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use glam::Vec3;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use slotmap::{HopSlotMap, SlotMap};
use thiserror::Error;

use crate::{
  agent::{Agent, AgentBinding, AgentHandle, AgentId, CrowdAgentParameters},
  area::AreaType,
  config::{ConfigError, NavigationParameters},
  convex_volume::{
    ConvexVolumes, MarkAreaError, OffMeshConnection, OffMeshConnections,
    TooManyOffMeshConnections,
  },
  crowd::CrowdError,
  input_geometry::InputGeometry,
  mesh_data::{GeometryError, MeshSource},
  navigation_mesh::{NavMeshId, NavigationMesh, NavigationMeshError},
  obstacle::{Obstacle, ObstacleId, ObstacleInfo},
  query::FindPathError,
  query_filter::{QueryFilterError, QueryFilters},
  tile_cache::{ObstacleState, TileCacheError},
};

/// How many events may wait in the channel before new ones are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// The most points returned by [`Navigation::find_path`].
const MAX_PATH_POINTS: usize = 256;

/// A notification from the tick loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NavigationEvent {
  /// A tick finished, taking `execution_time`.
  Tick { execution_time: Duration },
  /// The agent reached its target and is now idle.
  AgentArrived(AgentId),
  /// The agent barely moved over the last second.
  AgentNoMovement(AgentId),
  /// The agent barely got closer to its target over the last five seconds.
  AgentNoProgress(AgentId),
}

/// An error from the navigation orchestrator.
#[derive(Debug, Error)]
pub enum NavigationError {
  #[error("The navigation is already initialized.")]
  AlreadyInitialized,
  #[error("The navigation is not initialized.")]
  NotInitialized,
  #[error("There is no navigation mesh {0:?}.")]
  UnknownNavMesh(NavMeshId),
  #[error("There is no obstacle {0:?}.")]
  UnknownObstacle(ObstacleId),
  #[error("There is no query filter named {0:?}.")]
  UnknownFilter(String),
  #[error(transparent)]
  Geometry(#[from] GeometryError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  NavigationMesh(#[from] NavigationMeshError),
  #[error(transparent)]
  TileCache(#[from] TileCacheError),
  #[error(transparent)]
  FindPath(#[from] FindPathError),
  #[error("Failed to start the tick thread: {0}")]
  Thread(#[from] std::io::Error),
}

/// An error while adding an agent.
#[derive(Debug, PartialEq, Error)]
pub enum AddAgentError {
  #[error("The navigation is not initialized.")]
  NotInitialized,
  #[error("No navigation mesh fits an agent of radius {radius} and height {height}.")]
  NoFittingNavMesh { radius: f32, height: f32 },
  #[error("There is no query filter named {0:?}.")]
  UnknownFilter(String),
  #[error(transparent)]
  Crowd(#[from] CrowdError),
}

/// Everything guarded by the navigation's lock.
#[derive(Default)]
pub(crate) struct NavigationState {
  pub(crate) parameters: NavigationParameters,
  /// `None` until initialized.
  pub(crate) geometry: Option<Arc<InputGeometry>>,
  pub(crate) nav_meshes: SlotMap<NavMeshId, NavigationMesh>,
  pub(crate) agents: HopSlotMap<AgentId, Agent>,
  pub(crate) obstacles: HopSlotMap<ObstacleId, Obstacle>,
  pub(crate) volumes: ConvexVolumes,
  pub(crate) off_mesh_connections: OffMeshConnections,
  pub(crate) filters: QueryFilters,
}

impl NavigationState {
  /// Builds one navigation mesh per size class. Nothing changes on failure.
  pub(crate) fn initialize(
    &mut self,
    geometry: InputGeometry,
    parameters: NavigationParameters,
  ) -> Result<(), NavigationError> {
    parameters.validate()?;
    let mut nav_meshes = SlotMap::with_key();
    for nav_mesh_parameters in parameters.nav_meshes.iter() {
      nav_meshes.insert(NavigationMesh::initialize(
        &geometry,
        &self.volumes,
        self.off_mesh_connections.as_slice(),
        nav_mesh_parameters.clone(),
        parameters.max_obstacles as usize,
      )?);
    }
    self.volumes.mark_baked();
    self.nav_meshes = nav_meshes;
    self.geometry = Some(Arc::new(geometry));
    self.parameters = parameters;
    Ok(())
  }

  fn geometry(&self) -> Result<&Arc<InputGeometry>, NavigationError> {
    self.geometry.as_ref().ok_or(NavigationError::NotInitialized)
  }

  /// Adds an agent to the mesh that fits it best, with shadows in every
  /// other mesh it fits.
  pub(crate) fn add_agent(
    &mut self,
    parameters: CrowdAgentParameters,
  ) -> Result<AgentHandle, AddAgentError> {
    let geometry =
      self.geometry.clone().ok_or(AddAgentError::NotInitialized)?;
    let filter = self.filters.index_of(&parameters.filter_name).ok_or_else(
      || AddAgentError::UnknownFilter(parameters.filter_name.clone()),
    )?;

    let (radius, height) = (parameters.radius, parameters.height);
    let mut best: Option<(NavMeshId, f32)> = None;
    for (id, navigation_mesh) in self.nav_meshes.iter() {
      let fit = navigation_mesh.actor_fit_factor(radius, height);
      if fit >= 0.0 && best.map_or(true, |(_, best_fit)| fit < best_fit) {
        best = Some((id, fit));
      }
    }
    let Some((main_id, _)) = best else {
      warn!(
        "Rejected agent of radius {} and height {}: no navigation mesh fits it.",
        radius, height
      );
      return Err(AddAgentError::NoFittingNavMesh { radius, height });
    };

    let main_mesh = &mut self.nav_meshes[main_id];
    let crowd_agent =
      main_mesh.add_agent(&parameters, filter, false, &self.filters)?;
    let position = main_mesh
      .crowd
      .agent(crowd_agent)
      .map_or(parameters.position, |agent| agent.position());

    let shadow_parameters =
      CrowdAgentParameters { position, ..parameters.clone() };
    let mut shadows = Vec::new();
    for (id, navigation_mesh) in self.nav_meshes.iter_mut() {
      if id == main_id
        || navigation_mesh.actor_fit_factor(radius, height) < 0.0
      {
        continue;
      }
      match navigation_mesh.add_agent(
        &shadow_parameters,
        filter,
        /* follower= */ true,
        &self.filters,
      ) {
        Ok(crowd_agent) => {
          shadows.push(AgentBinding { nav_mesh: id, crowd_agent })
        }
        Err(err) => debug!("Skipped a shadow agent in {:?}: {}", id, err),
      }
    }

    let main = AgentBinding { nav_mesh: main_id, crowd_agent };
    let id = self.agents.insert_with_key(|id| {
      Agent::new(id, parameters, filter, main, shadows, geometry, position)
    });
    Ok(self.agents[id].handle().clone())
  }

  pub(crate) fn remove_agent(&mut self, id: AgentId) -> bool {
    let Some(mut agent) = self.agents.remove(id) else {
      return false;
    };
    agent.destroy(&mut self.nav_meshes);
    true
  }

  pub(crate) fn add_obstacle(
    &mut self,
    info: ObstacleInfo,
  ) -> Result<ObstacleId, NavigationError> {
    self.geometry()?;
    let mut obstacle = Obstacle::new(info);
    obstacle.add_to_nav_meshes(&mut self.nav_meshes)?;
    Ok(self.obstacles.insert(obstacle))
  }

  /// Runs one tick: applies pending requests, advances every mesh and
  /// refreshes the agents. Returns the events raised.
  pub(crate) fn tick(&mut self, delta_time: f32) -> Vec<NavigationEvent> {
    let mut events = Vec::new();
    if self.geometry.is_none() {
      return events;
    }
    self.obstacles.retain(|_, obstacle| !obstacle.is_destroyed());
    for agent in self.agents.values_mut() {
      agent.apply_new_target(&mut self.nav_meshes, &self.filters);
    }
    for navigation_mesh in self.nav_meshes.values_mut() {
      navigation_mesh.update(delta_time, &self.filters);
    }
    for agent in self.agents.values_mut() {
      agent.update(delta_time, &mut self.nav_meshes, &self.filters, &mut events);
    }
    events
  }
}

/// Runs a tick under the lock and sends its events. Returns how long the
/// tick took.
fn run_tick(
  state: &Mutex<NavigationState>,
  delta_time: f32,
  events: &Sender<NavigationEvent>,
) -> Duration {
  let start = Instant::now();
  let raised = state.lock().tick(delta_time);
  let execution_time = start.elapsed();
  for event in raised
    .into_iter()
    .chain(std::iter::once(NavigationEvent::Tick { execution_time }))
  {
    if let Err(TrySendError::Full(event)) = events.try_send(event) {
      debug!("Event channel is full. Dropped {:?}.", event);
    }
  }
  execution_time
}

/// Builds navigation meshes for several agent sizes from one piece of input
/// geometry, and moves crowds of agents over them on a background thread.
///
/// Every operation takes the same lock as the tick, so calls never observe a
/// half-finished tick.
pub struct Navigation {
  state: Arc<Mutex<NavigationState>>,
  running: Arc<AtomicBool>,
  tick_thread: Option<JoinHandle<()>>,
  event_sender: Sender<NavigationEvent>,
  event_receiver: Receiver<NavigationEvent>,
}

impl Default for Navigation {
  fn default() -> Self {
    Self::new()
  }
}

impl Navigation {
  pub fn new() -> Self {
    let (event_sender, event_receiver) =
      channel::bounded(EVENT_CHANNEL_CAPACITY);
    Self {
      state: Arc::new(Mutex::new(NavigationState::default())),
      running: Arc::new(AtomicBool::new(false)),
      tick_thread: None,
      event_sender,
      event_receiver,
    }
  }

  pub(crate) fn lock(&self) -> MutexGuard<'_, NavigationState> {
    self.state.lock()
  }

  /// Builds the navigation meshes from `source` and starts ticking. Fails if
  /// already initialized; on failure the navigation stays uninitialized.
  pub fn initialize(
    &mut self,
    source: &impl MeshSource,
    parameters: NavigationParameters,
  ) -> Result<(), NavigationError> {
    if self.is_initialized() {
      warn!("Rejected initialize: the navigation is already initialized.");
      return Err(NavigationError::AlreadyInitialized);
    }
    let geometry = InputGeometry::from_source(source)?;
    self.initialize_with_geometry(geometry, parameters)
  }

  /// Like [`Self::initialize`], from already accumulated geometry.
  pub fn initialize_with_geometry(
    &mut self,
    geometry: InputGeometry,
    parameters: NavigationParameters,
  ) -> Result<(), NavigationError> {
    let ticks_per_second = parameters.ticks_per_second;
    {
      let mut state = self.state.lock();
      if state.geometry.is_some() {
        warn!("Rejected initialize: the navigation is already initialized.");
        return Err(NavigationError::AlreadyInitialized);
      }
      if let Err(err) = state.initialize(geometry, parameters) {
        error!("Failed to initialize the navigation: {}", err);
        return Err(err);
      }
      info!("Initialized {} navigation meshes.", state.nav_meshes.len());
    }
    self.start_tick_thread(ticks_per_second)
  }

  pub fn is_initialized(&self) -> bool {
    self.state.lock().geometry.is_some()
  }

  /// Stops ticking and drops every mesh, agent, obstacle, marked area,
  /// off-mesh connection and query filter.
  pub fn clear(&mut self) {
    self.stop_tick_thread();
    *self.state.lock() = NavigationState::default();
    info!("Cleared the navigation.");
  }

  pub(crate) fn start_tick_thread(
    &mut self,
    ticks_per_second: u32,
  ) -> Result<(), NavigationError> {
    if ticks_per_second == 0 || self.tick_thread.is_some() {
      return Ok(());
    }
    let period = Duration::from_secs_f64(1.0 / ticks_per_second as f64);
    let state = Arc::clone(&self.state);
    let running = Arc::clone(&self.running);
    let events = self.event_sender.clone();
    self.running.store(true, Ordering::Release);

    let handle = thread::Builder::new()
      .name("shoal-tick".to_string())
      .spawn(move || {
        info!("Tick loop started at {} ticks per second.", ticks_per_second);
        let mut last_execution = Duration::ZERO;
        while running.load(Ordering::Acquire) {
          thread::sleep(period.saturating_sub(last_execution));
          if !running.load(Ordering::Acquire) {
            break;
          }
          last_execution = run_tick(&state, period.as_secs_f32(), &events);
        }
        info!("Tick loop stopped.");
      });
    match handle {
      Ok(handle) => {
        self.tick_thread = Some(handle);
        Ok(())
      }
      Err(err) => {
        self.running.store(false, Ordering::Release);
        error!("Failed to start the tick thread: {}", err);
        Err(err.into())
      }
    }
  }

  pub(crate) fn stop_tick_thread(&mut self) {
    self.running.store(false, Ordering::Release);
    if let Some(handle) = self.tick_thread.take() {
      if handle.join().is_err() {
        error!("The tick thread panicked.");
      }
    }
  }

  /// Runs one tick of `delta_time` seconds on this thread. Returns how long
  /// it took.
  pub fn step(&self, delta_time: f32) -> Duration {
    run_tick(&self.state, delta_time, &self.event_sender)
  }

  /// The channel of tick, arrival and stall notifications.
  pub fn events(&self) -> Receiver<NavigationEvent> {
    self.event_receiver.clone()
  }

  /// Marks the convex hull of `points` as `area` up to `height` above the
  /// lowest point. Takes effect on the next [`Self::rebuild_changed_tiles`].
  pub fn mark_convex_area(
    &self,
    points: &[Vec3],
    height: f32,
    area: AreaType,
  ) -> Result<u32, MarkAreaError> {
    self.state.lock().volumes.mark_area(points, height, area)
  }

  pub fn remove_convex_area_marker(&self, id: u32) -> bool {
    self.state.lock().volumes.remove(id)
  }

  pub fn marked_area_ids(&self) -> Vec<u32> {
    self.state.lock().volumes.ids()
  }

  /// Rebuilds the tiles under every marked area and off-mesh connection
  /// changed since the last rebuild. Returns how many tile columns were
  /// rebuilt across all meshes.
  pub fn rebuild_changed_tiles(&self) -> Result<usize, NavigationError> {
    let mut guard = self.state.lock();
    let state = &mut *guard;
    let geometry = Arc::clone(state.geometry()?);
    let changes = state.volumes.pending_changes();
    if changes.is_empty() {
      return Ok(0);
    }
    let mut rebuilt = 0;
    for navigation_mesh in state.nav_meshes.values_mut() {
      navigation_mesh
        .set_off_mesh_connections(state.off_mesh_connections.as_slice());
      rebuilt +=
        navigation_mesh.rebuild_changed_tiles(&geometry, &state.volumes, &changes);
    }
    state.volumes.mark_baked();
    info!("Rebuilt {} tile columns for {} changes.", rebuilt, changes.len());
    Ok(rebuilt)
  }

  /// Adds an off-mesh connection. Takes effect on the next
  /// [`Self::rebuild_changed_tiles`].
  pub fn add_off_mesh_connection(
    &self,
    connection: OffMeshConnection,
  ) -> Result<u32, TooManyOffMeshConnections> {
    let mut state = self.state.lock();
    let user_id = state.off_mesh_connections.add(connection)?;
    state.volumes.mark_dirty(connection.bounds());
    Ok(user_id)
  }

  pub fn remove_off_mesh_connection(&self, user_id: u32) -> bool {
    let mut state = self.state.lock();
    let Some(connection) = state.off_mesh_connections.remove(user_id) else {
      return false;
    };
    state.volumes.mark_dirty(connection.bounds());
    true
  }

  pub fn off_mesh_connections(&self) -> Vec<OffMeshConnection> {
    self.state.lock().off_mesh_connections.as_slice().to_vec()
  }

  /// Sets query filter slot `index` to `name`, with the given area costs.
  pub fn set_query_filter(
    &self,
    index: usize,
    name: &str,
    costs: &HashMap<AreaType, f32>,
  ) -> Result<(), QueryFilterError> {
    self.state.lock().filters.set(index, name, costs)
  }

  pub fn query_filters(&self) -> QueryFilters {
    self.state.lock().filters.clone()
  }

  pub fn add_agent(
    &self,
    parameters: CrowdAgentParameters,
  ) -> Result<AgentHandle, AddAgentError> {
    self.state.lock().add_agent(parameters)
  }

  pub fn remove_agent(&self, id: AgentId) -> bool {
    self.state.lock().remove_agent(id)
  }

  pub fn agent(&self, id: AgentId) -> Option<AgentHandle> {
    self.state.lock().agents.get(id).map(|agent| agent.handle().clone())
  }

  pub fn agents(&self) -> Vec<AgentHandle> {
    let state = self.state.lock();
    state.agents.values().map(|agent| agent.handle().clone()).collect()
  }

  /// The navigation mesh simulating agent `id`, and how many meshes mirror
  /// it.
  pub fn agent_nav_meshes(&self, id: AgentId) -> Option<(NavMeshId, usize)> {
    self
      .state
      .lock()
      .agents
      .get(id)
      .map(|agent| (agent.main.nav_mesh, agent.shadows.len()))
  }

  /// Adds a vertical cylinder standing at `position`.
  pub fn add_cylinder_obstacle(
    &self,
    position: Vec3,
    radius: f32,
    height: f32,
  ) -> Result<ObstacleId, NavigationError> {
    self
      .state
      .lock()
      .add_obstacle(ObstacleInfo::cylinder(position, radius, height))
  }

  /// Adds a box of size `dimensions` centred at `position`, rotated by
  /// `rotation` radians about Y.
  pub fn add_box_obstacle(
    &self,
    position: Vec3,
    dimensions: Vec3,
    rotation: f32,
  ) -> Result<ObstacleId, NavigationError> {
    self
      .state
      .lock()
      .add_obstacle(ObstacleInfo::cuboid(position, dimensions, rotation))
  }

  pub fn move_obstacle(
    &self,
    id: ObstacleId,
    position: Vec3,
  ) -> Result<(), NavigationError> {
    let mut guard = self.state.lock();
    let state = &mut *guard;
    let obstacle = state
      .obstacles
      .get_mut(id)
      .filter(|obstacle| !obstacle.is_destroyed())
      .ok_or(NavigationError::UnknownObstacle(id))?;
    obstacle.move_to(position, &mut state.nav_meshes)?;
    Ok(())
  }

  /// Removes the obstacle from every mesh. Returns false if there is no such
  /// obstacle.
  pub fn destroy_obstacle(&self, id: ObstacleId) -> bool {
    let mut guard = self.state.lock();
    let state = &mut *guard;
    match state.obstacles.get_mut(id) {
      Some(obstacle) if !obstacle.is_destroyed() => {
        obstacle.destroy(&mut state.nav_meshes);
        true
      }
      _ => false,
    }
  }

  pub fn obstacle(&self, id: ObstacleId) -> Option<ObstacleInfo> {
    self
      .state
      .lock()
      .obstacles
      .get(id)
      .filter(|obstacle| !obstacle.is_destroyed())
      .map(|obstacle| *obstacle.info())
  }

  /// Whether the obstacle is carved into every mesh yet. `Processed` only
  /// once all meshes are done with it.
  pub fn obstacle_state(&self, id: ObstacleId) -> Option<ObstacleState> {
    let state = self.state.lock();
    let obstacle = state.obstacles.get(id)?;
    if obstacle.is_destroyed() {
      return Some(ObstacleState::Removing);
    }
    let processing =
      obstacle.references().iter().any(|(&nav_mesh, &reference)| {
        state.nav_meshes.get(nav_mesh).is_some_and(|navigation_mesh| {
          navigation_mesh.tile_cache.obstacle_state(reference)
            != Some(ObstacleState::Processed)
        })
      });
    Some(if processing {
      ObstacleState::Processing
    } else {
      ObstacleState::Processed
    })
  }

  pub fn obstacles(&self) -> Vec<ObstacleId> {
    self
      .state
      .lock()
      .obstacles
      .iter()
      .filter(|(_, obstacle)| !obstacle.is_destroyed())
      .map(|(id, _)| id)
      .collect()
  }

  /// The ids of the navigation meshes, in configuration order.
  pub fn nav_mesh_ids(&self) -> Vec<NavMeshId> {
    self.state.lock().nav_meshes.keys().collect()
  }

  /// How well an agent of `radius` and `height` fits navigation mesh
  /// `nav_mesh`. Lower is better; -1 means it does not fit.
  pub fn actor_fit_factor(
    &self,
    nav_mesh: NavMeshId,
    radius: f32,
    height: f32,
  ) -> Option<f32> {
    self
      .state
      .lock()
      .nav_meshes
      .get(nav_mesh)
      .map(|navigation_mesh| navigation_mesh.actor_fit_factor(radius, height))
  }

  /// The walkable point of `nav_mesh` nearest to `point`, searching within
  /// `half_extents`.
  pub fn sample_point(
    &self,
    nav_mesh: NavMeshId,
    point: Vec3,
    half_extents: Vec3,
  ) -> Option<Vec3> {
    let state = self.state.lock();
    state.nav_meshes.get(nav_mesh)?.sample_point(
      point,
      half_extents,
      &state.filters,
    )
  }

  /// Finds the corners of a path from `start` to `end` over `nav_mesh`,
  /// using the query filter named `filter_name`. If `end` cannot be reached,
  /// the path ends as close to it as possible.
  pub fn find_path(
    &self,
    nav_mesh: NavMeshId,
    start: Vec3,
    end: Vec3,
    half_extents: Vec3,
    filter_name: &str,
  ) -> Result<Vec<Vec3>, NavigationError> {
    let state = self.state.lock();
    let navigation_mesh = state
      .nav_meshes
      .get(nav_mesh)
      .ok_or(NavigationError::UnknownNavMesh(nav_mesh))?;
    let filter = state
      .filters
      .index_of(filter_name)
      .map(|index| state.filters.get_or_default(index))
      .ok_or_else(|| NavigationError::UnknownFilter(filter_name.to_string()))?;

    let nav_mesh = &navigation_mesh.nav_mesh;
    let start = nav_mesh
      .find_nearest_poly(start, half_extents, Some(&filter))
      .ok_or(FindPathError::NoPolygonNear(start))?;
    let end = nav_mesh
      .find_nearest_poly(end, half_extents, Some(&filter))
      .ok_or(FindPathError::NoPolygonNear(end))?;
    let path = nav_mesh.find_path(
      start,
      end,
      &filter,
      navigation_mesh.parameters.max_query_nodes as usize,
    )?;
    let points =
      nav_mesh.find_straight_path(start.1, end.1, &path.polys, MAX_PATH_POINTS)?;
    Ok(points.into_iter().map(|point| point.position).collect())
  }
}

impl Drop for Navigation {
  fn drop(&mut self) {
    self.stop_tick_thread();
  }
}

#[cfg(test)]
#[path = "navigation_test.rs"]
mod test;
