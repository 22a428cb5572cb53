use std::collections::HashMap;

use log::debug;
use thiserror::Error;

use crate::area::{AreaType, PolyFlags};

/// The number of query filter slots.
pub const MAX_QUERY_FILTERS: usize = 16;
/// Any area cost above this makes the area impassable.
pub const IMPASSABLE_COST: f32 = 10000.0;
/// The name of the filter in slot 0.
pub const DEFAULT_FILTER_NAME: &str = "default";

/// Decides which polygons a path query may use and how expensive each is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueryFilter {
  area_costs: [f32; AreaType::COUNT],
  include_flags: PolyFlags,
  exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
  fn default() -> Self {
    Self {
      area_costs: [1.0; AreaType::COUNT],
      include_flags: PolyFlags::ALL ^ PolyFlags::DISABLED,
      exclude_flags: PolyFlags::empty(),
    }
  }
}

impl QueryFilter {
  pub(crate) fn from_parts(
    area_costs: [f32; AreaType::COUNT],
    include_flags: PolyFlags,
    exclude_flags: PolyFlags,
  ) -> Self {
    Self { area_costs, include_flags, exclude_flags }
  }

  /// Sets the cost multiplier of travelling over `area`. Costs above
  /// [`IMPASSABLE_COST`] exclude the area entirely: areas with their own flag
  /// are excluded by flag, others by an infinite cost.
  pub fn set_area_cost(&mut self, area: AreaType, cost: f32) {
    let exclusion_flag = area.exclusion_flag();
    if cost > IMPASSABLE_COST {
      match exclusion_flag {
        Some(flag) => {
          self.exclude_flags.insert(flag);
          self.area_costs[area.index()] = cost;
        }
        None => self.area_costs[area.index()] = f32::INFINITY,
      }
    } else {
      if let Some(flag) = exclusion_flag {
        self.exclude_flags.remove(flag);
      }
      self.area_costs[area.index()] = cost;
    }
  }

  pub fn area_cost(&self, area: AreaType) -> f32 {
    self.area_costs[area.index()]
  }

  pub(crate) fn area_costs(&self) -> &[f32; AreaType::COUNT] {
    &self.area_costs
  }

  pub fn include_flags(&self) -> PolyFlags {
    self.include_flags
  }

  pub fn exclude_flags(&self) -> PolyFlags {
    self.exclude_flags
  }

  pub fn set_include_flags(&mut self, flags: PolyFlags) {
    self.include_flags = flags;
  }

  pub fn set_exclude_flags(&mut self, flags: PolyFlags) {
    self.exclude_flags = flags;
  }

  /// Determines whether a polygon with `flags` and `area` may be used.
  pub fn passes(&self, flags: PolyFlags, area: AreaType) -> bool {
    flags.intersects(self.include_flags)
      && !flags.intersects(self.exclude_flags)
      && self.area_cost(area).is_finite()
  }
}

/// An error while setting a query filter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum QueryFilterError {
  #[error("Query filter index {0} is out of range (there are 16 slots).")]
  IndexOutOfRange(usize),
}

/// The table of named query filters shared by every navigation mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryFilters {
  slots: Vec<Option<(String, QueryFilter)>>,
}

impl Default for QueryFilters {
  fn default() -> Self {
    let mut slots = vec![None; MAX_QUERY_FILTERS];
    slots[0] = Some((DEFAULT_FILTER_NAME.to_string(), QueryFilter::default()));
    Self { slots }
  }
}

impl QueryFilters {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replaces slot `index` with a filter called `name` using `costs`. Areas
  /// missing from `costs` keep the default cost of 1.
  pub fn set(
    &mut self,
    index: usize,
    name: &str,
    costs: &HashMap<AreaType, f32>,
  ) -> Result<(), QueryFilterError> {
    let slot = self
      .slots
      .get_mut(index)
      .ok_or(QueryFilterError::IndexOutOfRange(index))?;

    let mut filter = QueryFilter::default();
    let mut costs = costs.iter().collect::<Vec<_>>();
    costs.sort_by_key(|(area, _)| **area);
    for (&area, &cost) in costs {
      filter.set_area_cost(area, cost);
    }
    debug!("Set query filter {} to {:?}: {:?}", index, name, filter);
    *slot = Some((name.to_string(), filter));
    Ok(())
  }

  /// Stores an already-built filter in slot `index`.
  pub(crate) fn set_filter(
    &mut self,
    index: usize,
    name: String,
    filter: QueryFilter,
  ) -> Result<(), QueryFilterError> {
    let slot = self
      .slots
      .get_mut(index)
      .ok_or(QueryFilterError::IndexOutOfRange(index))?;
    *slot = Some((name, filter));
    Ok(())
  }

  /// Finds the slot of the filter called `name`.
  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.slots.iter().position(|slot| {
      slot.as_ref().is_some_and(|(slot_name, _)| slot_name == name)
    })
  }

  pub fn get(&self, index: usize) -> Option<&QueryFilter> {
    self.slots.get(index)?.as_ref().map(|(_, filter)| filter)
  }

  /// The filter in slot `index`, or the default filter if the slot is empty.
  pub(crate) fn get_or_default(&self, index: usize) -> QueryFilter {
    self.get(index).copied().unwrap_or_default()
  }

  /// Every filled slot as (index, name, filter).
  pub fn iter(&self) -> impl Iterator<Item = (usize, &str, &QueryFilter)> + '_ {
    self.slots.iter().enumerate().filter_map(|(index, slot)| {
      slot.as_ref().map(|(name, filter)| (index, name.as_str(), filter))
    })
  }
}

#[cfg(test)]
#[path = "query_filter_test.rs"]
mod test;
