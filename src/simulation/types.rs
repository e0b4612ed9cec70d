//! Core types for the lane simulation
//!
//! Identifiers, grid positions and the shared constants.

use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimId(pub usize);

/// A wrapper type for vehicle IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(pub SimId);

/// A wrapper type for zone IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(pub SimId);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle {}", self.0 .0)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone {}", self.0 .0)
    }
}

/// Who drives a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleKind {
    /// Autonomous vehicle generated by the environment
    Default,
    /// Vehicle steered by the user
    User,
}

impl fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleKind::Default => write!(f, "default"),
            VehicleKind::User => write!(f, "user"),
        }
    }
}

/// Lifecycle status attached to element snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStatus {
    Create,
    Initialize,
    Execute,
    Release,
}

/// A position in lane/cell space
///
/// Stored as floating point so the direction math can work on it directly;
/// placed elements always hold whole numbers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub lane: f64,
    pub cell: f64,
}

impl Position {
    pub fn new(lane: f64, cell: f64) -> Self {
        Self { lane, cell }
    }

    pub fn from_cell(cell: Cell) -> Self {
        Self::new(cell.lane as f64, cell.column as f64)
    }

    pub fn dot(&self, other: &Position) -> f64 {
        self.lane * other.lane + self.cell * other.cell
    }

    /// Euclidean length
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn round(&self) -> Position {
        Position::new(self.lane.round(), self.cell.round())
    }

    /// Converts to a grid cell when both components are non-negative
    pub fn to_cell(&self) -> Option<Cell> {
        let rounded = self.round();
        if rounded.lane < 0.0 || rounded.cell < 0.0 || !rounded.lane.is_finite() || !rounded.cell.is_finite() {
            return None;
        }
        Some(Cell::new(rounded.lane as usize, rounded.cell as usize))
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.lane + rhs.lane, self.cell + rhs.cell)
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.lane - rhs.lane, self.cell - rhs.cell)
    }
}

impl Mul<f64> for Position {
    type Output = Position;

    fn mul(self, rhs: f64) -> Position {
        Position::new(self.lane * rhs, self.cell * rhs)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lane, self.cell)
    }
}

/// An addressable grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub lane: usize,
    pub column: usize,
}

impl Cell {
    pub fn new(lane: usize, column: usize) -> Self {
        Self { lane, column }
    }
}

/// Integer offset relative to a cell, `(lane, cell)` order
pub type CellOffset = (i64, i64);

/// `f64` stored in an `AtomicU64` bit pattern
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Applies `update` atomically; `None` from the closure rejects the
    /// change and hands back the current value as the error
    pub fn fetch_update<F>(&self, mut update: F) -> Result<f64, f64>
    where
        F: FnMut(f64) -> Option<f64>,
    {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                update(f64::from_bits(bits)).map(f64::to_bits)
            })
            .map(f64::from_bits)
            .map_err(f64::from_bits)
    }
}

/// Default number of cells a vehicle can see around itself
pub const DEFAULT_VIEW_RADIUS: u32 = 5;

/// Lower bound for vehicle acceleration and deceleration in m/s²
pub const MIN_ACCELERATION: f64 = 2.0;

/// Range of maximum speeds (km/h) drawn by the random vehicle generator
pub const RANDOM_MAX_SPEED_RANGE: std::ops::Range<f64> = 100.0..250.0;
