//! Conversion between physical quantities and grid cells

/// Physical scale of the grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConfig {
    /// Length of one cell in meters
    pub cell_size_m: f64,
    /// Simulated seconds per tick
    pub tick_seconds: f64,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            cell_size_m: 7.5,
            tick_seconds: 1.0,
        }
    }
}

impl UnitConfig {
    /// Number of cells covering the given distance in kilometers
    pub fn kilometers_to_cells(&self, kilometers: f64) -> usize {
        let cells = (kilometers * 1000.0 / self.cell_size_m).round();
        if cells.is_finite() && cells > 0.0 {
            cells as usize
        } else {
            0
        }
    }

    pub fn cells_to_kilometers(&self, cells: f64) -> f64 {
        cells * self.cell_size_m / 1000.0
    }

    pub fn meters_to_cells(&self, meters: f64) -> f64 {
        meters / self.cell_size_m
    }

    /// Cells covered in one tick at the given speed in km/h
    pub fn speed_to_cells(&self, speed_kmh: f64) -> f64 {
        self.meters_to_cells(speed_kmh / 3.6 * self.tick_seconds)
    }

    /// Speed gained in one tick (km/h) under the given acceleration in m/s²
    pub fn acceleration_to_speed(&self, acceleration: f64) -> f64 {
        acceleration * self.tick_seconds * 3.6
    }
}
