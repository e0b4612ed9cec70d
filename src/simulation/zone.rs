//! Speed-restricted zones overlaid on the grid

use log::debug;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::environment::Environment;
use super::error::{SimError, SimResult};
use super::events::{SimEvent, ZoneSnapshot};
use super::geometry::line_clip;
use super::types::{AtomicF64, ElementStatus, Position, VehicleId, ZoneId};
use super::vehicle::Vehicle;

/// Inclusive lane/cell rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneBounds {
    pub lane_from: usize,
    pub lane_to: usize,
    pub cell_from: usize,
    pub cell_to: usize,
}

impl ZoneBounds {
    pub fn new(lane_from: usize, lane_to: usize, cell_from: usize, cell_to: usize) -> Self {
        Self {
            lane_from,
            lane_to,
            cell_from,
            cell_to,
        }
    }

    fn min(&self) -> Position {
        Position::new(self.lane_from as f64, self.cell_from as f64)
    }

    fn max(&self) -> Position {
        Position::new(self.lane_to as f64, self.cell_to as f64)
    }
}

pub struct Zone {
    id: ZoneId,
    allowed_speed: AtomicF64,
    bounds: ZoneBounds,
    members: Mutex<BTreeSet<VehicleId>>,
}

impl Zone {
    /// Creates a zone on a grid of `lanes` x `length` cells
    pub fn new(
        id: ZoneId,
        allowed_speed: f64,
        bounds: ZoneBounds,
        lanes: usize,
        length: usize,
    ) -> SimResult<Self> {
        validate_speed(allowed_speed)?;
        if bounds.lane_from > bounds.lane_to || bounds.cell_from > bounds.cell_to {
            return Err(SimError::InvalidZone(format!(
                "lanes {}..={} / cells {}..={} are reversed",
                bounds.lane_from, bounds.lane_to, bounds.cell_from, bounds.cell_to
            )));
        }
        if bounds.lane_to >= lanes || bounds.cell_to >= length {
            return Err(SimError::InvalidZone(format!(
                "lanes {}..={} / cells {}..={} exceed the {lanes} x {length} grid",
                bounds.lane_from, bounds.lane_to, bounds.cell_from, bounds.cell_to
            )));
        }

        Ok(Self {
            id,
            allowed_speed: AtomicF64::new(allowed_speed),
            bounds,
            members: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }

    pub fn bounds(&self) -> ZoneBounds {
        self.bounds
    }

    /// Speed cap in km/h
    pub fn allowed_speed(&self) -> f64 {
        self.allowed_speed.load()
    }

    pub fn set_allowed_speed(&self, speed: f64) -> SimResult<()> {
        validate_speed(speed)?;
        self.allowed_speed.store(speed);
        Ok(())
    }

    fn members_guard(&self) -> MutexGuard<'_, BTreeSet<VehicleId>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn members(&self) -> Vec<VehicleId> {
        self.members_guard().iter().copied().collect()
    }

    pub fn is_member(&self, vehicle: VehicleId) -> bool {
        self.members_guard().contains(&vehicle)
    }

    /// Boundary-inclusive test on `(lane, column)`
    pub fn contains(&self, position: Position) -> bool {
        let min = self.bounds.min();
        let max = self.bounds.max();
        min.lane <= position.lane
            && min.cell <= position.cell
            && max.lane >= position.lane
            && max.cell >= position.cell
    }

    /// Speed cap applying to a move from `start` to `target`
    ///
    /// `Some(allowed)` when the path touches the zone.
    pub fn speed_cap(&self, start: Position, target: Position) -> Option<f64> {
        line_clip(self.bounds.min(), self.bounds.max(), start, target).map(|_| self.allowed_speed())
    }

    /// Adds the vehicle if it now lies inside; fires the entry event once
    pub fn admit(&self, vehicle: &Vehicle, env: &Environment) -> bool {
        if !self.contains(vehicle.position()) {
            return false;
        }

        let entered = self.members_guard().insert(vehicle.id());
        if entered {
            debug!("{} entered {}", vehicle.id(), self.id);
            env.emit(SimEvent::ZoneEntered {
                zone: self.id,
                vehicle: vehicle.id(),
            });
        }
        entered
    }

    /// Per-tick action: drops members that left the rectangle or the track
    pub fn step(&self, env: &Environment) -> SimResult<()> {
        let exited: Vec<VehicleId> = {
            let mut members = self.members_guard();
            let exited: Vec<VehicleId> = members
                .iter()
                .copied()
                .filter(|id| {
                    env.vehicle(*id)
                        .map_or(true, |vehicle| !self.contains(vehicle.position()))
                })
                .collect();
            for id in &exited {
                members.remove(id);
            }
            exited
        };

        for vehicle in exited {
            debug!("{} left {}", vehicle, self.id);
            env.emit(SimEvent::ZoneExited {
                zone: self.id,
                vehicle,
            });
        }

        env.emit(SimEvent::Zone(self.snapshot(ElementStatus::Execute)));
        Ok(())
    }

    /// Adds a penalty to a vehicle, e.g. for speeding inside the zone
    pub fn penalize(&self, vehicle: &Vehicle, value: f64) -> SimResult<f64> {
        vehicle.add_penalty(value)
    }

    pub fn snapshot(&self, status: ElementStatus) -> ZoneSnapshot {
        ZoneSnapshot {
            status,
            id: self.id,
            allowed_speed: self.allowed_speed(),
            lanes: (self.bounds.lane_from, self.bounds.lane_to),
            cells: (self.bounds.cell_from, self.bounds.cell_to),
            members: self.members_guard().len(),
        }
    }

    pub(crate) fn release(&self) {
        self.members_guard().clear();
    }
}

fn validate_speed(speed: f64) -> SimResult<()> {
    if speed.is_finite() && speed >= 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidZone(format!(
            "allowed speed {speed} must be a non-negative number"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::SimId;

    fn zone() -> Zone {
        Zone::new(ZoneId(SimId(0)), 30.0, ZoneBounds::new(0, 1, 4, 6), 2, 10).unwrap()
    }

    #[test]
    fn bounds_are_inclusive() {
        let zone = zone();
        assert!(zone.contains(Position::new(0.0, 4.0)));
        assert!(zone.contains(Position::new(1.0, 6.0)));
        assert!(!zone.contains(Position::new(0.0, 7.0)));
        assert!(!zone.contains(Position::new(2.0, 5.0)));
    }

    #[test]
    fn reversed_or_oversized_bounds_are_rejected() {
        let id = ZoneId(SimId(1));
        assert!(Zone::new(id, 30.0, ZoneBounds::new(1, 0, 4, 6), 2, 10).is_err());
        assert!(Zone::new(id, 30.0, ZoneBounds::new(0, 1, 6, 4), 2, 10).is_err());
        assert!(Zone::new(id, 30.0, ZoneBounds::new(0, 2, 4, 6), 2, 10).is_err());
        assert!(Zone::new(id, 30.0, ZoneBounds::new(0, 1, 4, 10), 2, 10).is_err());
        assert!(Zone::new(id, -5.0, ZoneBounds::new(0, 1, 4, 6), 2, 10).is_err());
    }

    #[test]
    fn cap_applies_to_paths_crossing_the_zone() {
        let zone = zone();
        assert_eq!(
            zone.speed_cap(Position::new(0.0, 1.0), Position::new(0.0, 9.0)),
            Some(30.0)
        );
        assert_eq!(
            zone.speed_cap(Position::new(0.0, 0.0), Position::new(0.0, 3.0)),
            None
        );
    }

    #[test]
    fn allowed_speed_is_mutable() {
        let zone = zone();
        zone.set_allowed_speed(50.0).unwrap();
        assert_eq!(zone.allowed_speed(), 50.0);
        assert!(zone.set_allowed_speed(f64::NAN).is_err());
        assert_eq!(zone.allowed_speed(), 50.0);
    }
}
