//! Vehicle state, actions and the per-tick advance
//!
//! Every field the reasoning layer or the environment may touch while other
//! vehicles are acting is atomic; the position is only written by the
//! environment inside the grid's critical section.

use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::context::SimContext;
use super::direction::Direction;
use super::environment::Environment;
use super::error::{SimError, SimResult};
use super::events::{NotifyTarget, SimEvent, VehicleSnapshot};
use super::geometry::{cells_in_circle, cells_in_view};
use super::perception::{Perception, PerceptionCell};
use super::types::{
    AtomicF64, Cell, CellOffset, ElementStatus, Position, VehicleId, VehicleKind, MIN_ACCELERATION,
};
use super::units::UnitConfig;

/// Creation parameters of a vehicle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleParams {
    /// Maximum speed in km/h
    pub max_speed: f64,
    /// Acceleration in m/s²
    pub acceleration: f64,
    /// Deceleration in m/s²
    pub deceleration: f64,
    /// Speed at placement in km/h
    pub initial_speed: f64,
    /// Perception radius in cells; the configured default when `None`
    pub view_radius: Option<u32>,
    /// Restricts perception to a view cone of this many degrees
    pub view_angle: Option<f64>,
}

impl VehicleParams {
    pub fn new(max_speed: f64, acceleration: f64, deceleration: f64) -> Self {
        Self {
            max_speed,
            acceleration,
            deceleration,
            initial_speed: 0.0,
            view_radius: None,
            view_angle: None,
        }
    }

    pub fn with_initial_speed(mut self, speed: f64) -> Self {
        self.initial_speed = speed;
        self
    }

    pub fn with_view_radius(mut self, radius: u32) -> Self {
        self.view_radius = Some(radius);
        self
    }

    pub fn with_view_angle(mut self, degrees: f64) -> Self {
        self.view_angle = Some(degrees);
        self
    }

    fn validate(&self, units: &UnitConfig) -> SimResult<()> {
        let values = [self.max_speed, self.acceleration, self.deceleration, self.initial_speed];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(SimError::InvalidVehicle(
                "vehicle parameters must be finite".into(),
            ));
        }
        if self.acceleration < MIN_ACCELERATION {
            return Err(SimError::InvalidVehicle(format!(
                "acceleration {} must be at least {MIN_ACCELERATION}",
                self.acceleration
            )));
        }
        if self.deceleration < MIN_ACCELERATION {
            return Err(SimError::InvalidVehicle(format!(
                "deceleration {} must be at least {MIN_ACCELERATION}",
                self.deceleration
            )));
        }
        if self.deceleration <= self.acceleration {
            return Err(SimError::InvalidVehicle(format!(
                "deceleration {} must be greater than acceleration {}",
                self.deceleration, self.acceleration
            )));
        }
        if units.acceleration_to_speed(self.acceleration) > self.max_speed {
            return Err(SimError::InvalidVehicle(format!(
                "acceleration {} exceeds maximum speed {} within one tick",
                self.acceleration, self.max_speed
            )));
        }
        if self.initial_speed < 0.0 || self.initial_speed > self.max_speed {
            return Err(SimError::InvalidVehicle(format!(
                "initial speed {} is outside of [0, {}]",
                self.initial_speed, self.max_speed
            )));
        }
        Ok(())
    }
}

fn pack(cell: Cell) -> u64 {
    ((cell.lane as u64) << 32) | (cell.column as u64 & 0xFFFF_FFFF)
}

fn unpack(raw: u64) -> Cell {
    Cell::new((raw >> 32) as usize, (raw & 0xFFFF_FFFF) as usize)
}

pub struct Vehicle {
    id: VehicleId,
    kind: VehicleKind,
    acceleration: f64,
    deceleration: f64,
    max_speed: f64,
    speed: AtomicF64,
    penalty: AtomicF64,
    /// Current cell, lane in the upper and column in the lower 32 bits
    cell: AtomicU64,
    goal_column: usize,
    /// `+1` towards higher columns, `-1` towards column 0
    heading: f64,
    view: Vec<CellOffset>,
    perception: PerceptionCell,
    /// Cells moved along the lane
    travelled: AtomicU64,
    released: AtomicBool,
    units: UnitConfig,
}

impl Vehicle {
    /// Creates an unplaced vehicle starting at `start` heading for `goal_column`
    ///
    /// Fails when the acceleration, deceleration and speed limits do not fit
    /// together; such a vehicle is never placed.
    pub fn new(
        ctx: &SimContext,
        kind: VehicleKind,
        params: VehicleParams,
        start: Cell,
        goal_column: usize,
    ) -> SimResult<Self> {
        let units = ctx.units();
        params.validate(&units)?;

        let radius = params.view_radius.unwrap_or(ctx.config().view_radius);
        let view = match params.view_angle {
            Some(angle) => cells_in_view(radius, angle),
            None => cells_in_circle(radius),
        };

        let heading = if goal_column > start.column || (goal_column == start.column && goal_column > 0) {
            1.0
        } else {
            -1.0
        };

        Ok(Self {
            id: ctx.next_vehicle_id(),
            kind,
            acceleration: params.acceleration,
            deceleration: params.deceleration,
            max_speed: params.max_speed,
            speed: AtomicF64::new(params.initial_speed),
            penalty: AtomicF64::new(0.0),
            cell: AtomicU64::new(pack(start)),
            goal_column,
            heading,
            view,
            perception: PerceptionCell::default(),
            travelled: AtomicU64::new(0),
            released: AtomicBool::new(false),
            units,
        })
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn kind(&self) -> VehicleKind {
        self.kind
    }

    pub fn is_user(&self) -> bool {
        self.kind == VehicleKind::User
    }

    /// Current speed in km/h
    pub fn speed(&self) -> f64 {
        self.speed.load()
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    pub fn deceleration(&self) -> f64 {
        self.deceleration
    }

    pub fn penalty(&self) -> f64 {
        self.penalty.load()
    }

    /// Adds to the penalty accumulator, which never decreases
    pub fn add_penalty(&self, value: f64) -> SimResult<f64> {
        if !value.is_finite() || value < 0.0 {
            return Err(SimError::InvalidPenalty(value));
        }
        let previous = self
            .penalty
            .fetch_update(|current| Some(current + value))
            .unwrap_or_else(|current| current);
        Ok(previous + value)
    }

    pub fn cell(&self) -> Cell {
        unpack(self.cell.load(Ordering::Acquire))
    }

    pub fn position(&self) -> Position {
        Position::from_cell(self.cell())
    }

    pub fn lane(&self) -> usize {
        self.cell().lane
    }

    pub fn goal_column(&self) -> usize {
        self.goal_column
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    /// Latest perception snapshot
    pub fn perception(&self) -> Arc<Perception> {
        self.perception.load()
    }

    pub fn distance_travelled_km(&self) -> f64 {
        self.units
            .cells_to_kilometers(self.travelled.load(Ordering::Relaxed) as f64)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Marks the vehicle as gone; returns false if it already was
    pub(crate) fn release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    /// Only called by the environment while it holds the grid lock
    pub(crate) fn set_cell(&self, cell: Cell) {
        self.cell.store(pack(cell), Ordering::Release);
    }

    pub(crate) fn record_travel(&self, cells: u64) {
        self.travelled.fetch_add(cells, Ordering::Relaxed);
    }

    /// Cell reached after one tick at the current speed
    pub fn next_position(&self) -> Position {
        self.next_position_at(self.speed())
    }

    /// Cell reached after one tick at `speed` km/h
    ///
    /// A vehicle standing on its goal column keeps going in its heading so
    /// it leaves the track.
    pub fn next_position_at(&self, speed: f64) -> Position {
        let cells = self.units.speed_to_cells(speed);
        let position = self.position();
        let goal = Position::new(position.lane, self.goal_column as f64);

        if position.cell == goal.cell {
            return Position::new(position.lane, position.cell + self.heading * cells.max(1.0)).round();
        }
        Direction::Forward.position(position, goal, cells)
    }

    /// Raises speed by `acceleration * strength`, strength in `[0, 1]`
    pub fn accelerate(&self, strength: f64) -> SimResult<f64> {
        check_strength(strength)?;
        let delta = self.units.acceleration_to_speed(self.acceleration * strength);
        let limit = self.max_speed;

        self.speed
            .fetch_update(|speed| {
                let next = speed + delta;
                (next <= limit).then_some(next)
            })
            .map(|previous| previous + delta)
            .map_err(|current| SimError::SpeedAboveMaximum {
                vehicle: self.id,
                requested: current + delta,
                limit,
            })
    }

    /// Lowers speed by `deceleration * strength`, strength in `[0, 1]`
    pub fn decelerate(&self, strength: f64) -> SimResult<f64> {
        check_strength(strength)?;
        let delta = self.units.acceleration_to_speed(self.deceleration * strength);

        self.speed
            .fetch_update(|speed| {
                let next = speed - delta;
                (next >= 0.0).then_some(next)
            })
            .map(|previous| previous - delta)
            .map_err(|current| SimError::SpeedBelowZero {
                vehicle: self.id,
                requested: current - delta,
            })
    }

    /// Changes one lane away from the travel side
    pub fn pull_out(&self, env: &Environment) -> bool {
        self.change_lane(env, self.heading as i64)
    }

    /// Changes one lane back towards the travel side
    pub fn pull_in(&self, env: &Environment) -> bool {
        self.change_lane(env, -(self.heading as i64))
    }

    fn change_lane(&self, env: &Environment, offset: i64) -> bool {
        let target = self.lane() as i64 + offset;
        let changed = env.lane_change(self, target);
        if !changed {
            self.notify_collision(env);
        }
        changed
    }

    /// Rebuilds the perception snapshot from the grid
    pub fn perceive(&self, env: &Environment) -> Arc<Perception> {
        let origin = self.position();
        let positions = self
            .view
            .iter()
            .map(|(lane, cell)| Position::new(origin.lane + *lane as f64, origin.cell + *cell as f64))
            .filter(|position| env.is_inside(*position));

        let perception = Perception::build(self.id, origin, self.heading, env.query(positions));
        self.perception.publish(perception);
        self.perception.load()
    }

    /// Per-tick action: perceive, then try to move
    pub fn advance(&self, env: &Environment) -> SimResult<()> {
        if self.is_released() {
            return Ok(());
        }

        self.perceive(env);
        if !env.move_vehicle(self) {
            self.notify_collision(env);
        }

        if !self.is_released() {
            env.emit(SimEvent::Vehicle(self.snapshot(ElementStatus::Execute)));
        }
        Ok(())
    }

    /// User collisions go to the environment, all others to the vehicle
    fn notify_collision(&self, env: &Environment) {
        let target = if self.is_user() {
            NotifyTarget::Environment
        } else {
            NotifyTarget::Vehicle(self.id)
        };
        debug!("{} collided at {}", self.id, self.position());
        env.report_collision(self.id, target);
    }

    pub fn snapshot(&self, status: ElementStatus) -> VehicleSnapshot {
        let cell = self.cell();
        VehicleSnapshot {
            kind: self.kind,
            status,
            id: self.id,
            lane: cell.lane,
            column: cell.column,
            goal_column: self.goal_column,
            speed: self.speed(),
            max_speed: self.max_speed,
            acceleration: self.acceleration,
            deceleration: self.deceleration,
            penalty: self.penalty(),
            distance_travelled: self.distance_travelled_km(),
            perception: self.perception().summary(),
        }
    }
}

fn check_strength(strength: f64) -> SimResult<()> {
    if (0.0..=1.0).contains(&strength) {
        Ok(())
    } else {
        Err(SimError::InvalidStrength(strength))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn build(params: VehicleParams) -> SimResult<Vehicle> {
        Vehicle::new(&SimContext::default(), VehicleKind::Default, params, Cell::new(0, 5), 9)
    }

    #[test]
    fn creation_rejects_weak_acceleration() {
        assert!(build(VehicleParams::new(100.0, 1.0, 5.0)).is_err());
        assert!(build(VehicleParams::new(100.0, 3.0, 1.5)).is_err());
    }

    #[test]
    fn creation_requires_stronger_braking() {
        assert!(build(VehicleParams::new(100.0, 4.0, 4.0)).is_err());
        assert!(build(VehicleParams::new(100.0, 4.0, 3.0)).is_err());
        assert!(build(VehicleParams::new(100.0, 3.0, 4.0)).is_ok());
    }

    #[test]
    fn creation_rejects_acceleration_above_max_speed() {
        // 3 m/s² gains 10.8 km/h per tick
        assert!(build(VehicleParams::new(10.0, 3.0, 4.0)).is_err());
        assert!(build(VehicleParams::new(11.0, 3.0, 4.0)).is_ok());
    }

    #[test]
    fn creation_rejects_initial_speed_out_of_range() {
        assert!(build(VehicleParams::new(100.0, 3.0, 4.0).with_initial_speed(120.0)).is_err());
        assert!(build(VehicleParams::new(100.0, 3.0, 4.0).with_initial_speed(-1.0)).is_err());
    }

    #[test]
    fn accelerate_stops_at_max_speed() {
        let vehicle = build(VehicleParams::new(20.0, 2.0, 3.0)).unwrap();
        assert_relative_eq!(vehicle.accelerate(1.0).unwrap(), 7.2, epsilon = 1e-9);
        assert_relative_eq!(vehicle.accelerate(1.0).unwrap(), 14.4, epsilon = 1e-9);
        assert!(matches!(
            vehicle.accelerate(1.0),
            Err(SimError::SpeedAboveMaximum { .. })
        ));
        assert_relative_eq!(vehicle.speed(), 14.4, epsilon = 1e-9);
    }

    #[test]
    fn decelerate_stops_at_zero() {
        let vehicle = build(VehicleParams::new(100.0, 2.0, 3.0).with_initial_speed(12.0)).unwrap();
        assert_relative_eq!(vehicle.decelerate(0.5).unwrap(), 6.6, epsilon = 1e-9);
        assert!(matches!(
            vehicle.decelerate(1.0),
            Err(SimError::SpeedBelowZero { .. })
        ));
        assert_relative_eq!(vehicle.speed(), 6.6, epsilon = 1e-9);
    }

    #[test]
    fn strength_must_be_a_fraction() {
        let vehicle = build(VehicleParams::new(100.0, 2.0, 3.0)).unwrap();
        assert_eq!(vehicle.accelerate(1.5), Err(SimError::InvalidStrength(1.5)));
        assert_eq!(vehicle.decelerate(-0.1), Err(SimError::InvalidStrength(-0.1)));
    }

    #[test]
    fn penalty_only_grows() {
        let vehicle = build(VehicleParams::new(100.0, 2.0, 3.0)).unwrap();
        assert_relative_eq!(vehicle.add_penalty(2.5).unwrap(), 2.5);
        assert_relative_eq!(vehicle.add_penalty(1.0).unwrap(), 3.5);
        assert!(vehicle.add_penalty(-1.0).is_err());
        assert_relative_eq!(vehicle.penalty(), 3.5);
    }

    #[test]
    fn next_position_follows_speed() {
        let vehicle = build(VehicleParams::new(100.0, 2.0, 3.0).with_initial_speed(27.0)).unwrap();
        assert_eq!(vehicle.next_position(), Position::new(0.0, 6.0));
        assert_eq!(vehicle.next_position_at(54.0), Position::new(0.0, 7.0));
        assert_eq!(vehicle.next_position_at(0.0), Position::new(0.0, 5.0));
    }

    #[test]
    fn vehicle_on_goal_column_leaves() {
        let vehicle = Vehicle::new(
            &SimContext::default(),
            VehicleKind::Default,
            VehicleParams::new(100.0, 2.0, 3.0),
            Cell::new(0, 9),
            9,
        )
        .unwrap();
        assert_eq!(vehicle.next_position(), Position::new(0.0, 10.0));
    }

    #[test]
    fn backward_heading_towards_column_zero() {
        let vehicle = Vehicle::new(
            &SimContext::default(),
            VehicleKind::Default,
            VehicleParams::new(100.0, 2.0, 3.0).with_initial_speed(27.0),
            Cell::new(1, 4),
            0,
        )
        .unwrap();
        assert_relative_eq!(vehicle.heading(), -1.0);
        assert_eq!(vehicle.next_position(), Position::new(1.0, 3.0));
    }

    #[test]
    fn packed_cell_round_trips_wide_columns() {
        let cell = Cell::new(3, 70_000);
        assert_eq!(unpack(pack(cell)), cell);
    }
}
