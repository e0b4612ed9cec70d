//! Typed events emitted by the simulation core
//!
//! The core only pushes onto a bounded channel; draining and forwarding the
//! events to a transport is left to whoever holds a receiver.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::debug;

use super::direction::Direction;
use super::types::{ElementStatus, VehicleId, VehicleKind, ZoneId};

/// Per-tick record of a vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSnapshot {
    pub kind: VehicleKind,
    pub status: ElementStatus,
    pub id: VehicleId,
    pub lane: usize,
    pub column: usize,
    pub goal_column: usize,
    pub speed: f64,
    pub max_speed: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub penalty: f64,
    /// Kilometers moved along the lane since placement
    pub distance_travelled: f64,
    pub perception: PerceptionSummary,
}

/// Short form of a perception snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PerceptionSummary {
    pub neighbors: usize,
    /// Closest neighbor with its distance in cells and relative direction
    pub nearest: Option<(VehicleId, f64, Direction)>,
}

/// Per-tick record of the environment
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSnapshot {
    pub status: ElementStatus,
    pub id: &'static str,
    /// Track length in cells
    pub length: usize,
    pub lanes_forward: usize,
    pub lanes_backward: usize,
    /// Track length in kilometers
    pub distance_km: f64,
}

/// Per-tick record of a zone
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSnapshot {
    pub status: ElementStatus,
    pub id: ZoneId,
    pub allowed_speed: f64,
    pub lanes: (usize, usize),
    pub cells: (usize, usize),
    pub members: usize,
}

/// Receiver of a collision notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget {
    /// Reported system-wide, used for user vehicles
    Environment,
    /// Reported back to the vehicle that collided
    Vehicle(VehicleId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Lifecycle(EnvironmentSnapshot),
    Environment(EnvironmentSnapshot),
    Vehicle(VehicleSnapshot),
    Zone(ZoneSnapshot),
    Collision {
        vehicle: VehicleId,
        target: NotifyTarget,
    },
    ZoneEntered {
        zone: ZoneId,
        vehicle: VehicleId,
    },
    ZoneExited {
        zone: ZoneId,
        vehicle: VehicleId,
    },
    /// A vehicle left the track at either end
    VehicleFinished {
        vehicle: VehicleId,
        kind: VehicleKind,
    },
    PenaltyRecorded(f64),
    TickCompleted(u64),
}

/// Bounded fan-out point for simulation events
pub struct EventBus {
    sender: Sender<SimEvent>,
    receiver: Receiver<SimEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Emits without blocking; drops the event when the channel is full
    pub fn emit(&self, event: SimEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!("event channel full; dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn subscribe(&self) -> Receiver<SimEvent> {
        self.receiver.clone()
    }
}
