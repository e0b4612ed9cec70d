//! Lane traffic simulation core
//!
//! A discrete lane x cell grid shared by concurrently acting vehicles, with
//! speed-restricted zones on top and a tick scheduler driving everything.
//! Runs headless; visualization only needs to drain the event channel.

pub mod actions;
mod config;
mod context;
pub mod direction;
mod environment;
mod error;
mod events;
pub mod geometry;
mod grid;
mod perception;
mod runner;
mod types;
mod units;
mod vehicle;
mod zone;

pub use actions::{ActionArg, ActionTable, ActionValue};
pub use config::{SimConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_TICK_INTERVAL_MS};
pub use context::SimContext;
pub use direction::Direction;
pub use environment::{Environment, EnvironmentStats};
pub use error::{SimError, SimResult};
pub use events::{
    EnvironmentSnapshot, NotifyTarget, PerceptionSummary, SimEvent, VehicleSnapshot, ZoneSnapshot,
};
pub use perception::{Neighbor, Perception};
pub use runner::{Element, RunHandle, SimulationRunner, TickReport};
pub use types::{
    Cell, CellOffset, ElementStatus, Position, SimId, VehicleId, VehicleKind, ZoneId,
    DEFAULT_VIEW_RADIUS, MIN_ACCELERATION, RANDOM_MAX_SPEED_RANGE,
};
pub use units::UnitConfig;
pub use vehicle::{Vehicle, VehicleParams};
pub use zone::{Zone, ZoneBounds};
