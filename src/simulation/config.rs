//! Runtime configuration of a simulation run

use std::time::Duration;

use super::types::DEFAULT_VIEW_RADIUS;
use super::units::UnitConfig;

/// Default pause between two ticks in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

/// Settings shared by the environment and the scheduler
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Sleep between two ticks
    pub tick_interval: Duration,
    /// Number of events buffered before new ones are dropped
    pub event_capacity: usize,
    /// Seed for reproducible runs; `None` uses the thread RNG
    pub seed: Option<u64>,
    /// Physical scale of the grid
    pub units: UnitConfig,
    /// Perception radius in cells for vehicles created without one
    pub view_radius: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            seed: None,
            units: UnitConfig::default(),
            view_radius: DEFAULT_VIEW_RADIUS,
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}
