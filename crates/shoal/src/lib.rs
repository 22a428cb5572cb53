#![doc = include_str!("../README.md")]

mod agent;
mod area;
mod astar;
mod build_context;
mod chunky_mesh;
mod compact_heightfield;
mod config;
mod convex_volume;
mod crowd;
mod geometry;
mod heightfield;
mod heightfield_layers;
mod input_geometry;
mod mesh_data;
mod nav_mesh;
mod navigation;
mod navigation_mesh;
mod obstacle;
mod path_corridor;
mod persistence;
mod query;
mod query_filter;
mod rasterizer;
mod tile_cache;
mod tile_layer;
mod tile_mesh;
mod util;

#[cfg(test)]
mod test_util;

pub use glam::Vec3;

pub use agent::{
  AgentHandle, AgentId, AgentSnapshot, AgentState, CrowdAgentParameters,
  ARRIVAL_DISTANCE,
};
pub use area::{AreaType, InvalidAreaType, PolyFlags};
pub use build_context::{BuildContext, BuildTimer};
pub use config::{
  ConfigError, NavMeshParameters, NavigationParameters, VoxelConfig,
};
pub use convex_volume::{
  ConvexVolume, ConvexVolumes, MarkAreaError, OffMeshConnection,
  OffMeshConnections, TooManyOffMeshConnections, MAX_OFFMESH_CONNECTIONS,
  MAX_VOLUMES, MAX_VOLUME_VERTICES, OFFMESH_CONNECTION_BASE_ID,
};
pub use crowd::CrowdError;
pub use input_geometry::InputGeometry;
pub use mesh_data::{
  GeometryError, MeshData, MeshSource, PrimitiveType, SourceMesh, Surface,
};
pub use nav_mesh::{NavMeshError, PolyRef};
pub use navigation::{
  AddAgentError, Navigation, NavigationError, NavigationEvent,
  EVENT_CHANNEL_CAPACITY,
};
pub use navigation_mesh::{NavMeshId, NavigationMeshError};
pub use obstacle::{ObstacleId, ObstacleInfo, ObstacleKind};
pub use persistence::{PersistenceError, SAVE_VERSION};
pub use query::FindPathError;
pub use query_filter::{
  QueryFilter, QueryFilterError, QueryFilters, DEFAULT_FILTER_NAME,
  IMPASSABLE_COST, MAX_QUERY_FILTERS,
};
pub use tile_cache::{ObstacleState, TileCacheError};
pub use tile_layer::TileLayerError;
pub use util::BoundingBox;
