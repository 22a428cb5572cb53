use std::{
  fs::File,
  io::{BufReader, BufWriter, Cursor, Read, Write},
  path::Path,
  sync::Arc,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use log::{info, warn};
use lz4_flex::block::{
  compress_prepend_size, decompress_size_prepended, DecompressError,
};
use slotmap::SlotMap;
use thiserror::Error;

use crate::{
  agent::{AgentState, CrowdAgentParameters},
  area::{AreaType, PolyFlags},
  config::{NavMeshParameters, NavigationParameters, VoxelConfig},
  convex_volume::{
    footprint_of, ConvexVolume, ConvexVolumes, OffMeshConnection,
    OffMeshConnections,
  },
  input_geometry::InputGeometry,
  mesh_data::{GeometryError, MeshData},
  navigation::{AddAgentError, Navigation, NavigationError, NavigationState},
  navigation_mesh::{NavigationMesh, NavigationMeshError},
  obstacle::{ObstacleInfo, ObstacleKind},
  query_filter::{QueryFilter, QueryFilters},
};

/// The version written at the start of every save.
pub const SAVE_VERSION: u16 = 1;
/// The most an LZ4 block can expand by.
const MAX_COMPRESSION_RATIO: usize = 255;

/// An error while saving or loading the navigation.
#[derive(Debug, Error)]
pub enum PersistenceError {
  #[error("The save has version {found}, expected version {expected}.")]
  VersionMismatch { found: u16, expected: u16 },
  #[error("The navigation is not initialized.")]
  NotInitialized,
  #[error("Failed to read or write the save: {0}")]
  Io(#[from] std::io::Error),
  #[error("The save could not be decompressed: {0}")]
  Decompress(#[from] DecompressError),
  #[error("The save is invalid: {0}")]
  Invalid(String),
  #[error(transparent)]
  Geometry(#[from] GeometryError),
  #[error(transparent)]
  NavigationMesh(#[from] NavigationMeshError),
  #[error(transparent)]
  Navigation(#[from] NavigationError),
  #[error(transparent)]
  AddAgent(#[from] AddAgentError),
}

impl Navigation {
  /// Writes the whole navigation to the file at `path`. With `compressed`,
  /// everything after the version is one LZ4 block.
  pub fn save(
    &self,
    path: impl AsRef<Path>,
    compressed: bool,
  ) -> Result<(), PersistenceError> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    self.save_to_writer(&mut writer, compressed)?;
    writer.flush()?;
    info!("Saved the navigation to {}.", path.as_ref().display());
    Ok(())
  }

  /// Replaces the navigation with the one saved in the file at `path`.
  pub fn load(
    &mut self,
    path: impl AsRef<Path>,
    compressed: bool,
  ) -> Result<(), PersistenceError> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    self.load_from_reader(&mut reader, compressed)?;
    info!("Loaded the navigation from {}.", path.as_ref().display());
    Ok(())
  }

  pub fn save_to_writer(
    &self,
    writer: &mut impl Write,
    compressed: bool,
  ) -> Result<(), PersistenceError> {
    let mut body = Vec::new();
    write_state(&mut body, &self.lock())?;
    writer.write_u16::<LittleEndian>(SAVE_VERSION)?;
    if compressed {
      writer.write_all(&compress_prepend_size(&body))?;
    } else {
      writer.write_all(&body)?;
    }
    Ok(())
  }

  /// Replaces the navigation with a saved one. On failure the navigation is
  /// left untouched.
  pub fn load_from_reader(
    &mut self,
    reader: &mut impl Read,
    compressed: bool,
  ) -> Result<(), PersistenceError> {
    let version = reader.read_u16::<LittleEndian>()?;
    if version != SAVE_VERSION {
      warn!(
        "Rejected save with version {}, expected version {}.",
        version, SAVE_VERSION
      );
      return Err(PersistenceError::VersionMismatch {
        found: version,
        expected: SAVE_VERSION,
      });
    }
    let state = if compressed {
      read_compressed_state(reader)
    } else {
      read_state(reader)
    };
    let state = match state {
      Ok(state) => state,
      Err(err) => {
        warn!("Failed to load the navigation: {}", err);
        return Err(err);
      }
    };

    let ticks_per_second = state.parameters.ticks_per_second;
    self.stop_tick_thread();
    *self.lock() = state;
    self.start_tick_thread(ticks_per_second)?;
    Ok(())
  }
}

/// Reads a state stored as one LZ4 block with its size prepended. Blocks
/// claiming a size LZ4 could not have expanded them to are refused.
fn read_compressed_state(
  reader: &mut impl Read,
) -> Result<NavigationState, PersistenceError> {
  let mut block = Vec::new();
  reader.read_to_end(&mut block)?;
  let claimed = Cursor::new(&block).read_u32::<LittleEndian>()? as usize;
  if claimed > block.len().saturating_mul(MAX_COMPRESSION_RATIO) {
    return Err(PersistenceError::Invalid(format!(
      "a {} byte block cannot hold {} bytes",
      block.len(),
      claimed
    )));
  }
  read_state(&mut Cursor::new(decompress_size_prepended(&block)?))
}

fn write_state(
  writer: &mut impl Write,
  state: &NavigationState,
) -> Result<(), PersistenceError> {
  let geometry =
    state.geometry.as_ref().ok_or(PersistenceError::NotInitialized)?;
  write_mesh(writer, geometry.mesh())?;

  writer.write_u32::<LittleEndian>(state.volumes.next_id())?;
  write_count(writer, state.volumes.len())?;
  for volume in state.volumes.iter() {
    writer.write_u32::<LittleEndian>(volume.id)?;
    writer.write_u8(volume.area as u8)?;
    writer.write_f32::<LittleEndian>(volume.hmin)?;
    writer.write_f32::<LittleEndian>(volume.hmax)?;
    writer.write_u8(volume.is_new as u8)?;
    write_count(writer, volume.vertices.len())?;
    for &vertex in volume.vertices.iter() {
      write_vec3(writer, vertex)?;
    }
  }

  write_count(writer, state.off_mesh_connections.len())?;
  for connection in state.off_mesh_connections.as_slice() {
    write_vec3(writer, connection.start)?;
    write_vec3(writer, connection.end)?;
    writer.write_f32::<LittleEndian>(connection.radius)?;
    writer.write_u8(connection.bidirectional as u8)?;
    writer.write_u8(connection.area as u8)?;
    writer.write_u16::<LittleEndian>(connection.flags.bits())?;
    writer.write_u32::<LittleEndian>(connection.user_id)?;
  }

  writer.write_u32::<LittleEndian>(state.parameters.ticks_per_second)?;
  writer.write_u32::<LittleEndian>(state.parameters.max_obstacles)?;
  write_count(writer, state.nav_meshes.len())?;
  for navigation_mesh in state.nav_meshes.values() {
    write_nav_mesh_parameters(writer, &navigation_mesh.parameters)?;
    write_voxel_config(writer, navigation_mesh.config())?;
    write_count(writer, navigation_mesh.tile_cache.layer_count())?;
    for layer in navigation_mesh.tile_cache.encoded_layers() {
      write_count(writer, layer.len())?;
      writer.write_all(layer)?;
    }
  }

  let filters = state.filters.iter().collect::<Vec<_>>();
  write_count(writer, filters.len())?;
  for (index, name, filter) in filters {
    write_count(writer, index)?;
    write_string(writer, name)?;
    writer.write_u16::<LittleEndian>(filter.include_flags().bits())?;
    writer.write_u16::<LittleEndian>(filter.exclude_flags().bits())?;
    for &cost in filter.area_costs() {
      writer.write_f32::<LittleEndian>(cost)?;
    }
  }

  write_count(writer, state.agents.len())?;
  for agent in state.agents.values() {
    let handle = agent.handle();
    write_agent_parameters(writer, &agent.parameters)?;
    write_vec3(writer, handle.position())?;
    write_vec3(writer, handle.velocity())?;
    write_vec3(writer, agent.target())?;
    writer.write_u8(match agent.state() {
      AgentState::Idle => 0,
      AgentState::GoingToTarget => 1,
    })?;
    match handle.pending_target() {
      Some(target) => {
        writer.write_u8(1)?;
        write_vec3(writer, target)?;
      }
      None => writer.write_u8(0)?,
    }
  }

  let obstacles = state
    .obstacles
    .values()
    .filter(|obstacle| !obstacle.is_destroyed())
    .collect::<Vec<_>>();
  write_count(writer, obstacles.len())?;
  for obstacle in obstacles {
    let info = obstacle.info();
    writer.write_u8(info.kind as u8)?;
    write_vec3(writer, info.position)?;
    write_vec3(writer, info.dimensions)?;
    writer.write_f32::<LittleEndian>(info.rotation)?;
  }

  let marked = state.volumes.ids();
  write_count(writer, marked.len())?;
  for id in marked {
    writer.write_u32::<LittleEndian>(id)?;
  }
  Ok(())
}

fn read_state(
  reader: &mut impl Read,
) -> Result<NavigationState, PersistenceError> {
  let geometry = Arc::new(InputGeometry::new(read_mesh(reader)?));

  let next_volume_id = reader.read_u32::<LittleEndian>()?;
  let mut volumes = Vec::new();
  for _ in 0..read_count(reader)? {
    let id = reader.read_u32::<LittleEndian>()?;
    let area = read_area(reader)?;
    let hmin = reader.read_f32::<LittleEndian>()?;
    let hmax = reader.read_f32::<LittleEndian>()?;
    let is_new = read_bool(reader)?;
    let vertices = (0..read_count(reader)?)
      .map(|_| read_vec3(reader))
      .collect::<Result<Vec<_>, _>>()?;
    volumes.push(ConvexVolume {
      id,
      footprint: footprint_of(&vertices),
      vertices,
      hmin,
      hmax,
      area,
      is_new,
    });
  }
  let volumes = ConvexVolumes::from_saved(volumes, next_volume_id);

  let mut connections = Vec::new();
  for _ in 0..read_count(reader)? {
    let start = read_vec3(reader)?;
    let end = read_vec3(reader)?;
    let radius = reader.read_f32::<LittleEndian>()?;
    let bidirectional = read_bool(reader)?;
    let area = read_area(reader)?;
    let flags = PolyFlags::from_bits_retain(reader.read_u16::<LittleEndian>()?);
    let user_id = reader.read_u32::<LittleEndian>()?;
    connections.push(OffMeshConnection {
      start,
      end,
      radius,
      bidirectional,
      area,
      flags,
      user_id,
    });
  }
  let off_mesh_connections = OffMeshConnections::from_saved(connections);

  let ticks_per_second = reader.read_u32::<LittleEndian>()?;
  let max_obstacles = reader.read_u32::<LittleEndian>()?;
  let mut parameters = NavigationParameters {
    nav_meshes: Vec::new(),
    ticks_per_second,
    max_obstacles,
  };
  let mut nav_meshes = SlotMap::with_key();
  for _ in 0..read_count(reader)? {
    let nav_mesh_parameters = read_nav_mesh_parameters(reader)?;
    let config = read_voxel_config(reader)?;
    let layers = (0..read_count(reader)?)
      .map(|_| read_bytes(reader))
      .collect::<Result<Vec<_>, _>>()?;
    parameters.nav_meshes.push(nav_mesh_parameters.clone());
    nav_meshes.insert(NavigationMesh::from_layers(
      nav_mesh_parameters,
      config,
      layers,
      off_mesh_connections.as_slice(),
      max_obstacles as usize,
    )?);
  }
  parameters.validate().map_err(NavigationError::from)?;

  let mut filters = QueryFilters::new();
  for _ in 0..read_count(reader)? {
    let index = read_count(reader)?;
    let name = read_string(reader)?;
    let include = PolyFlags::from_bits_retain(reader.read_u16::<LittleEndian>()?);
    let exclude = PolyFlags::from_bits_retain(reader.read_u16::<LittleEndian>()?);
    let mut costs = [0.0; AreaType::COUNT];
    reader.read_f32_into::<LittleEndian>(&mut costs)?;
    filters
      .set_filter(index, name, QueryFilter::from_parts(costs, include, exclude))
      .map_err(|err| PersistenceError::Invalid(err.to_string()))?;
  }

  let mut state = NavigationState {
    parameters,
    geometry: Some(geometry),
    nav_meshes,
    volumes,
    off_mesh_connections,
    filters,
    ..Default::default()
  };

  for _ in 0..read_count(reader)? {
    let agent_parameters = read_agent_parameters(reader)?;
    let position = read_vec3(reader)?;
    let velocity = read_vec3(reader)?;
    let target = read_vec3(reader)?;
    let agent_state = match reader.read_u8()? {
      0 => AgentState::Idle,
      1 => AgentState::GoingToTarget,
      other => {
        return Err(PersistenceError::Invalid(format!(
          "{} is not an agent state",
          other
        )))
      }
    };
    let pending_target =
      if read_bool(reader)? { Some(read_vec3(reader)?) } else { None };

    let handle = state
      .add_agent(CrowdAgentParameters { position, ..agent_parameters })?;
    if let Some(agent) = state.agents.get_mut(handle.id()) {
      agent.restore(velocity, target, agent_state, &mut state.nav_meshes);
    }
    if let Some(target) = pending_target {
      handle.set_pending_target(target);
    }
  }

  for _ in 0..read_count(reader)? {
    let kind = match reader.read_u8()? {
      0 => ObstacleKind::Cylinder,
      1 => ObstacleKind::Box,
      other => {
        return Err(PersistenceError::Invalid(format!(
          "{} is not an obstacle kind",
          other
        )))
      }
    };
    let position = read_vec3(reader)?;
    let dimensions = read_vec3(reader)?;
    let rotation = reader.read_f32::<LittleEndian>()?;
    state.add_obstacle(ObstacleInfo { kind, position, dimensions, rotation })?;
  }

  let marked = (0..read_count(reader)?)
    .map(|_| reader.read_u32::<LittleEndian>())
    .collect::<Result<Vec<_>, _>>()?;
  if marked != state.volumes.ids() {
    return Err(PersistenceError::Invalid(
      "the marked area ids do not match the marked areas".to_string(),
    ));
  }
  Ok(state)
}

fn write_mesh(
  writer: &mut impl Write,
  mesh: &MeshData,
) -> std::io::Result<()> {
  write_count(writer, mesh.vertices().len())?;
  for &vertex in mesh.vertices() {
    write_vec3(writer, vertex)?;
  }
  write_count(writer, mesh.triangles().len())?;
  for triangle in mesh.triangles() {
    for &index in triangle {
      writer.write_u32::<LittleEndian>(index)?;
    }
  }
  for &normal in mesh.normals() {
    write_vec3(writer, normal)?;
  }
  Ok(())
}

fn read_mesh(reader: &mut impl Read) -> Result<MeshData, PersistenceError> {
  let vertices = (0..read_count(reader)?)
    .map(|_| read_vec3(reader))
    .collect::<Result<Vec<_>, _>>()?;
  let triangle_count = read_count(reader)?;
  let mut triangles = Vec::new();
  for _ in 0..triangle_count {
    let mut triangle = [0; 3];
    reader.read_u32_into::<LittleEndian>(&mut triangle)?;
    triangles.push(triangle);
  }
  let normals = (0..triangle_count)
    .map(|_| read_vec3(reader))
    .collect::<Result<Vec<_>, _>>()?;
  Ok(MeshData::from_parts_with_normals(vertices, triangles, normals)?)
}

fn write_nav_mesh_parameters(
  writer: &mut impl Write,
  parameters: &NavMeshParameters,
) -> std::io::Result<()> {
  for value in [
    parameters.cell_size,
    parameters.cell_height,
    parameters.max_agent_slope,
    parameters.max_agent_height,
    parameters.max_agent_climb,
    parameters.max_agent_radius,
    parameters.max_edge_length,
    parameters.max_simplification_error,
    parameters.detail_sample_distance,
    parameters.detail_sample_max_error,
  ] {
    writer.write_f32::<LittleEndian>(value)?;
  }
  for value in [
    parameters.min_num_cells_per_island,
    parameters.min_cell_span_count,
    parameters.max_verts_per_poly,
    parameters.tile_size,
    parameters.layers_per_tile,
    parameters.max_agents,
    parameters.max_query_nodes,
  ] {
    writer.write_u32::<LittleEndian>(value)?;
  }
  Ok(())
}

fn read_nav_mesh_parameters(
  reader: &mut impl Read,
) -> std::io::Result<NavMeshParameters> {
  let mut floats = [0.0; 10];
  reader.read_f32_into::<LittleEndian>(&mut floats)?;
  let mut integers = [0; 7];
  reader.read_u32_into::<LittleEndian>(&mut integers)?;
  Ok(NavMeshParameters {
    cell_size: floats[0],
    cell_height: floats[1],
    max_agent_slope: floats[2],
    max_agent_height: floats[3],
    max_agent_climb: floats[4],
    max_agent_radius: floats[5],
    max_edge_length: floats[6],
    max_simplification_error: floats[7],
    detail_sample_distance: floats[8],
    detail_sample_max_error: floats[9],
    min_num_cells_per_island: integers[0],
    min_cell_span_count: integers[1],
    max_verts_per_poly: integers[2],
    tile_size: integers[3],
    layers_per_tile: integers[4],
    max_agents: integers[5],
    max_query_nodes: integers[6],
  })
}

fn write_voxel_config(
  writer: &mut impl Write,
  config: &VoxelConfig,
) -> std::io::Result<()> {
  for value in [
    config.cell_size,
    config.cell_height,
    config.walkable_slope_angle,
    config.max_simplification_error,
    config.detail_sample_dist,
    config.detail_sample_max_error,
  ] {
    writer.write_f32::<LittleEndian>(value)?;
  }
  for value in [
    config.walkable_height,
    config.walkable_climb,
    config.walkable_radius,
    config.max_edge_len,
    config.min_region_area,
    config.merge_region_area,
    config.max_verts_per_poly,
    config.tile_size,
    config.border_size,
    config.width,
    config.height,
    config.max_layers,
  ] {
    writer.write_i32::<LittleEndian>(value)?;
  }
  write_vec3(writer, config.bmin)?;
  write_vec3(writer, config.bmax)
}

fn read_voxel_config(reader: &mut impl Read) -> std::io::Result<VoxelConfig> {
  let mut floats = [0.0; 6];
  reader.read_f32_into::<LittleEndian>(&mut floats)?;
  let mut integers = [0; 12];
  reader.read_i32_into::<LittleEndian>(&mut integers)?;
  Ok(VoxelConfig {
    cell_size: floats[0],
    cell_height: floats[1],
    walkable_slope_angle: floats[2],
    max_simplification_error: floats[3],
    detail_sample_dist: floats[4],
    detail_sample_max_error: floats[5],
    walkable_height: integers[0],
    walkable_climb: integers[1],
    walkable_radius: integers[2],
    max_edge_len: integers[3],
    min_region_area: integers[4],
    merge_region_area: integers[5],
    max_verts_per_poly: integers[6],
    tile_size: integers[7],
    border_size: integers[8],
    width: integers[9],
    height: integers[10],
    max_layers: integers[11],
    bmin: read_vec3(reader)?,
    bmax: read_vec3(reader)?,
  })
}

fn write_agent_parameters(
  writer: &mut impl Write,
  parameters: &CrowdAgentParameters,
) -> std::io::Result<()> {
  for value in [
    parameters.radius,
    parameters.height,
    parameters.max_acceleration,
    parameters.max_speed,
    parameters.separation_weight,
  ] {
    writer.write_f32::<LittleEndian>(value)?;
  }
  write_string(writer, &parameters.filter_name)?;
  writer.write_all(&[
    parameters.anticipate_turns as u8,
    parameters.optimize_visibility as u8,
    parameters.optimize_topology as u8,
    parameters.avoid_obstacles as u8,
    parameters.avoid_other_agents as u8,
    parameters.obstacle_avoidance,
  ])
}

/// Reads agent parameters saved by [`write_agent_parameters`]. The position
/// is saved separately.
fn read_agent_parameters(
  reader: &mut impl Read,
) -> Result<CrowdAgentParameters, PersistenceError> {
  let mut floats = [0.0; 5];
  reader.read_f32_into::<LittleEndian>(&mut floats)?;
  let filter_name = read_string(reader)?;
  let mut options = [0; 6];
  reader.read_exact(&mut options)?;
  Ok(CrowdAgentParameters {
    position: Vec3::ZERO,
    radius: floats[0],
    height: floats[1],
    max_acceleration: floats[2],
    max_speed: floats[3],
    separation_weight: floats[4],
    filter_name,
    anticipate_turns: options[0] != 0,
    optimize_visibility: options[1] != 0,
    optimize_topology: options[2] != 0,
    avoid_obstacles: options[3] != 0,
    avoid_other_agents: options[4] != 0,
    obstacle_avoidance: options[5],
  })
}

fn write_vec3(writer: &mut impl Write, value: Vec3) -> std::io::Result<()> {
  for component in value.to_array() {
    writer.write_f32::<LittleEndian>(component)?;
  }
  Ok(())
}

fn read_vec3(reader: &mut impl Read) -> std::io::Result<Vec3> {
  let mut components = [0.0; 3];
  reader.read_f32_into::<LittleEndian>(&mut components)?;
  Ok(Vec3::from_array(components))
}

fn write_count(writer: &mut impl Write, count: usize) -> std::io::Result<()> {
  let count = u32::try_from(count).map_err(|_| {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, "count exceeds u32")
  })?;
  writer.write_u32::<LittleEndian>(count)
}

fn read_count(reader: &mut impl Read) -> std::io::Result<usize> {
  Ok(reader.read_u32::<LittleEndian>()? as usize)
}

fn read_bool(reader: &mut impl Read) -> std::io::Result<bool> {
  Ok(reader.read_u8()? != 0)
}

fn read_area(reader: &mut impl Read) -> Result<AreaType, PersistenceError> {
  AreaType::try_from(reader.read_u8()?)
    .map_err(|err| PersistenceError::Invalid(err.to_string()))
}

fn write_string(writer: &mut impl Write, value: &str) -> std::io::Result<()> {
  write_count(writer, value.len())?;
  writer.write_all(value.as_bytes())
}

/// Reads a length-prefixed byte string. The buffer only grows as bytes
/// arrive, so a corrupt length fails at the end of the save.
fn read_bytes(reader: &mut impl Read) -> std::io::Result<Vec<u8>> {
  let len = read_count(reader)?;
  let mut bytes = Vec::new();
  reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
  if bytes.len() != len {
    return Err(std::io::Error::new(
      std::io::ErrorKind::UnexpectedEof,
      "the save ends inside a byte string",
    ));
  }
  Ok(bytes)
}

fn read_string(reader: &mut impl Read) -> Result<String, PersistenceError> {
  String::from_utf8(read_bytes(reader)?)
    .map_err(|err| PersistenceError::Invalid(err.to_string()))
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod test;
