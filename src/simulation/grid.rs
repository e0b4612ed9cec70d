//! Lane x cell occupancy table
//!
//! Cells are read without locking; every write goes through a
//! [`GridGuard`], which holds the grid-wide writer lock. A cell stores
//! `id + 1` of its vehicle, `0` when empty.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::{SimError, SimResult};
use super::types::{Cell, SimId, VehicleId};

const EMPTY: usize = 0;

fn encode(vehicle: Option<VehicleId>) -> usize {
    vehicle.map_or(EMPTY, |id| id.0 .0 + 1)
}

fn decode(raw: usize) -> Option<VehicleId> {
    (raw != EMPTY).then(|| VehicleId(SimId(raw - 1)))
}

pub struct Grid {
    lanes: usize,
    length: usize,
    cells: Vec<AtomicUsize>,
    writer: Mutex<()>,
}

impl Grid {
    pub fn new(lanes: usize, length: usize) -> SimResult<Self> {
        let size = lanes
            .checked_mul(length)
            .filter(|size| *size > 0)
            .ok_or(SimError::InvalidDimensions { lanes, cells: length })?;

        Ok(Self {
            lanes,
            length,
            cells: (0..size).map(|_| AtomicUsize::new(EMPTY)).collect(),
            writer: Mutex::new(()),
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Bounds check on signed coordinates
    pub fn contains(&self, lane: i64, column: i64) -> bool {
        lane >= 0 && column >= 0 && (lane as usize) < self.lanes && (column as usize) < self.length
    }

    fn slot(&self, cell: Cell) -> Option<&AtomicUsize> {
        if cell.lane >= self.lanes || cell.column >= self.length {
            return None;
        }
        self.cells.get(cell.lane * self.length + cell.column)
    }

    /// Lock-free read; may be stale against a concurrent writer
    pub fn occupant(&self, cell: Cell) -> Option<VehicleId> {
        self.slot(cell)
            .and_then(|slot| decode(slot.load(Ordering::Acquire)))
    }

    /// Enters the grid-wide critical section
    pub fn lock(&self) -> GridGuard<'_> {
        GridGuard {
            grid: self,
            _writer: self.writer.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// All occupied cells, row-major
    pub fn occupied(&self) -> Vec<(Cell, VehicleId)> {
        (0..self.lanes)
            .flat_map(|lane| (0..self.length).map(move |column| Cell::new(lane, column)))
            .filter_map(|cell| self.occupant(cell).map(|id| (cell, id)))
            .collect()
    }
}

/// Exclusive write access to the grid
pub struct GridGuard<'a> {
    grid: &'a Grid,
    _writer: MutexGuard<'a, ()>,
}

impl GridGuard<'_> {
    pub fn occupant(&self, cell: Cell) -> Option<VehicleId> {
        self.grid.occupant(cell)
    }

    pub fn set(&self, cell: Cell, vehicle: Option<VehicleId>) {
        if let Some(slot) = self.grid.slot(cell) {
            slot.store(encode(vehicle), Ordering::Release);
        }
    }

    /// Empties the cell only if it still holds `vehicle`
    pub fn vacate(&self, cell: Cell, vehicle: VehicleId) -> bool {
        match self.grid.slot(cell) {
            Some(slot) if decode(slot.load(Ordering::Acquire)) == Some(vehicle) => {
                slot.store(EMPTY, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// True if any cell of `lane` between the two columns (inclusive) holds
    /// a vehicle other than `vehicle`
    pub fn lane_span_blocked(&self, lane: usize, from: i64, to: i64, vehicle: VehicleId) -> bool {
        let last = self.grid.length as i64 - 1;
        let start = from.min(to).max(0);
        let end = from.max(to).min(last);

        (start..=end).any(|column| {
            self.occupant(Cell::new(lane, column as usize))
                .is_some_and(|other| other != vehicle)
        })
    }

    /// True if any lane between the two lanes (inclusive) at `column` holds
    /// a vehicle other than `vehicle`
    pub fn column_span_blocked(&self, column: usize, from: usize, to: usize, vehicle: VehicleId) -> bool {
        (from.min(to)..=from.max(to)).any(|lane| {
            self.occupant(Cell::new(lane, column))
                .is_some_and(|other| other != vehicle)
        })
    }

    pub fn clear(&self) {
        for slot in &self.grid.cells {
            slot.store(EMPTY, Ordering::Release);
        }
    }
}
