//! Perception snapshots of nearby vehicles
//!
//! A vehicle rebuilds its snapshot every tick and publishes it as a fresh
//! `Arc`; readers keep whatever snapshot they loaded, so a rebuild can never
//! be observed half-done.

use ordered_float::OrderedFloat;
use std::sync::{Arc, PoisonError, RwLock};

use super::direction::Direction;
use super::events::PerceptionSummary;
use super::geometry::distance;
use super::types::{Position, VehicleId};

/// One sensed vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: VehicleId,
    pub position: Position,
    /// Euclidean distance in cells
    pub distance: f64,
    /// Bucketed direction relative to the observer's heading
    pub direction: Direction,
}

/// Neighbors ranked by ascending distance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Perception {
    neighbors: Vec<Neighbor>,
}

impl Perception {
    /// Builds a snapshot from grid occupants given in query order
    ///
    /// `heading` is `+1.0` for vehicles travelling towards higher columns and
    /// `-1.0` otherwise. Equal distances keep their query order.
    pub fn build<I>(observer: VehicleId, origin: Position, heading: f64, occupants: I) -> Self
    where
        I: IntoIterator<Item = (Position, VehicleId)>,
    {
        let mut neighbors: Vec<Neighbor> = occupants
            .into_iter()
            .filter(|(_, id)| *id != observer)
            .map(|(position, id)| {
                let relative = position - origin;
                let angle = (heading * relative.lane)
                    .atan2(heading * relative.cell)
                    .to_degrees();
                Neighbor {
                    id,
                    position,
                    distance: distance(origin, position),
                    direction: Direction::from_angle(angle),
                }
            })
            .collect();

        neighbors.sort_by_key(|neighbor| OrderedFloat(neighbor.distance));
        Self { neighbors }
    }

    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    pub fn nearest(&self) -> Option<&Neighbor> {
        self.neighbors.first()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn summary(&self) -> PerceptionSummary {
        PerceptionSummary {
            neighbors: self.neighbors.len(),
            nearest: self
                .nearest()
                .map(|neighbor| (neighbor.id, neighbor.distance, neighbor.direction)),
        }
    }
}

/// Copy-on-publish holder for the current snapshot
#[derive(Debug, Default)]
pub struct PerceptionCell {
    current: RwLock<Arc<Perception>>,
}

impl PerceptionCell {
    pub fn load(&self) -> Arc<Perception> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn publish(&self, perception: Perception) {
        let fresh = Arc::new(perception);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }
}
