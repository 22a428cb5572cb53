use std::{
  collections::HashMap,
  time::{Duration, Instant},
};

use log::{debug, error, info, warn};

const LOG_TARGET: &str = "build";

/// The phases of building navigation tiles that can be timed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildTimer {
  Total,
  Rasterization,
  Filtering,
  CompactHeightfield,
  Erosion,
  MarkAreas,
  Layers,
  Compression,
  TileMesh,
  ObstacleCarving,
}

/// Collects diagnostics while building navigation data. Messages are
/// forwarded to the `log` facade under the "build" target, and phase timings
/// are accumulated across repeated phases.
#[derive(Debug)]
pub struct BuildContext {
  timing_enabled: bool,
  running: HashMap<BuildTimer, Instant>,
  accumulated: HashMap<BuildTimer, Duration>,
  warnings: u32,
  errors: u32,
}

impl Default for BuildContext {
  fn default() -> Self {
    Self::new()
  }
}

impl BuildContext {
  pub fn new() -> Self {
    Self {
      timing_enabled: true,
      running: HashMap::new(),
      accumulated: HashMap::new(),
      warnings: 0,
      errors: 0,
    }
  }

  /// Creates a context that does not measure time.
  pub fn without_timing() -> Self {
    Self { timing_enabled: false, ..Self::new() }
  }

  pub fn log_progress(&mut self, message: impl AsRef<str>) {
    info!(target: LOG_TARGET, "{}", message.as_ref());
  }

  pub fn log_warning(&mut self, message: impl AsRef<str>) {
    self.warnings += 1;
    warn!(target: LOG_TARGET, "{}", message.as_ref());
  }

  pub fn log_error(&mut self, message: impl AsRef<str>) {
    self.errors += 1;
    error!(target: LOG_TARGET, "{}", message.as_ref());
  }

  pub fn warning_count(&self) -> u32 {
    self.warnings
  }

  pub fn error_count(&self) -> u32 {
    self.errors
  }

  pub fn start_timer(&mut self, timer: BuildTimer) {
    if self.timing_enabled {
      self.running.insert(timer, Instant::now());
    }
  }

  /// Stops `timer`, adding the time since it started to its total. Stopping
  /// a timer that was never started does nothing.
  pub fn stop_timer(&mut self, timer: BuildTimer) {
    let Some(start) = self.running.remove(&timer) else {
      return;
    };
    *self.accumulated.entry(timer).or_default() += start.elapsed();
  }

  /// The total time spent in `timer`. `None` if it never completed.
  pub fn accumulated_time(&self, timer: BuildTimer) -> Option<Duration> {
    self.accumulated.get(&timer).copied()
  }

  /// Adds the totals and counts of `other` into this context.
  pub fn merge(&mut self, other: &BuildContext) {
    for (&timer, &duration) in other.accumulated.iter() {
      *self.accumulated.entry(timer).or_default() += duration;
    }
    self.warnings += other.warnings;
    self.errors += other.errors;
  }

  /// Logs every accumulated timer at debug level.
  pub fn log_timings(&self) {
    let mut timers = self.accumulated.iter().collect::<Vec<_>>();
    timers.sort();
    for (timer, duration) in timers {
      debug!(target: LOG_TARGET, "{:?}: {:.3}ms", timer, duration.as_secs_f64() * 1000.0);
    }
  }
}

#[cfg(test)]
#[path = "build_context_test.rs"]
mod test;
