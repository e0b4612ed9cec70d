//! The environment: track grid, zones, active vehicles and the staging cache
//!
//! All grid mutations (`place`, `move_vehicle`, `lane_change`, exit removal and
//! release) run inside the grid's critical section. Locks are always taken in
//! the order grid, vehicles map, staging cache; zone membership is only ever
//! touched after the grid lock has been dropped.

use log::{debug, info};
use ordered_float::OrderedFloat;
use sorted_vec::SortedVec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crossbeam::channel::Receiver;

use super::context::SimContext;
use super::error::{SimError, SimResult};
use super::events::{EnvironmentSnapshot, EventBus, NotifyTarget, SimEvent};
use super::grid::Grid;
use super::runner::Element;
use super::types::{
    Cell, ElementStatus, Position, VehicleId, VehicleKind, ZoneId, MIN_ACCELERATION,
    RANDOM_MAX_SPEED_RANGE,
};
use super::vehicle::{Vehicle, VehicleParams};
use super::zone::{Zone, ZoneBounds};

const ENVIRONMENT_ID: &str = "environment";

/// Fixed track layout, set once by `initialize`
struct Track {
    grid: Grid,
    lanes_forward: usize,
    lanes_backward: usize,
    distance_km: f64,
}

impl Track {
    fn last_column(&self) -> usize {
        self.grid.length() - 1
    }

    fn is_forward(&self, lane: usize) -> bool {
        lane < self.lanes_forward
    }

    /// Entry column and goal column for a lane's travel direction
    fn route(&self, lane: usize) -> (usize, usize) {
        if self.is_forward(lane) {
            (0, self.last_column())
        } else {
            (self.last_column(), 0)
        }
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvironmentStats {
    pub spawned: usize,
    pub finished: usize,
    pub active: usize,
    pub staged: usize,
    pub zones: usize,
    pub collisions: usize,
    pub max_penalty: Option<f64>,
}

pub struct Environment {
    ctx: Arc<SimContext>,
    track: OnceLock<Track>,
    zones: RwLock<Vec<Arc<Zone>>>,
    vehicles: RwLock<HashMap<VehicleId, Arc<Vehicle>>>,
    /// Created vehicles waiting for their start cell
    staged: Mutex<Vec<Arc<Vehicle>>>,
    penalties: Mutex<SortedVec<OrderedFloat<f64>>>,
    events: EventBus,
    released: AtomicBool,
    spawned: AtomicUsize,
    finished: AtomicUsize,
    collisions: AtomicUsize,
}

impl Environment {
    pub fn new(ctx: Arc<SimContext>) -> Arc<Self> {
        let events = EventBus::new(ctx.config().event_capacity);
        Arc::new(Self {
            ctx,
            track: OnceLock::new(),
            zones: RwLock::new(Vec::new()),
            vehicles: RwLock::new(HashMap::new()),
            staged: Mutex::new(Vec::new()),
            penalties: Mutex::new(SortedVec::new()),
            events,
            released: AtomicBool::new(false),
            spawned: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            collisions: AtomicUsize::new(0),
        })
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    fn track(&self) -> Option<&Track> {
        self.track.get()
    }

    fn initialized_track(&self) -> SimResult<&Track> {
        if self.is_released() {
            return Err(SimError::Released);
        }
        self.track().ok_or(SimError::NotInitialized)
    }

    fn vehicles_read(&self) -> RwLockReadGuard<'_, HashMap<VehicleId, Arc<Vehicle>>> {
        self.vehicles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn vehicles_write(&self) -> RwLockWriteGuard<'_, HashMap<VehicleId, Arc<Vehicle>>> {
        self.vehicles.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn staged_guard(&self) -> MutexGuard<'_, Vec<Arc<Vehicle>>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn penalties_guard(&self) -> MutexGuard<'_, SortedVec<OrderedFloat<f64>>> {
        self.penalties.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds the track: `length_km` long with lanes for both directions
    pub fn initialize(&self, length_km: f64, lanes_forward: usize, lanes_backward: usize) -> SimResult<()> {
        if self.is_released() {
            return Err(SimError::Released);
        }
        if self.track().is_some() {
            return Err(SimError::AlreadyInitialized);
        }

        let lanes = lanes_forward + lanes_backward;
        let length = self.ctx.units().kilometers_to_cells(length_km);
        let grid = Grid::new(lanes, length)?;
        let track = Track {
            grid,
            lanes_forward,
            lanes_backward,
            distance_km: self.ctx.units().cells_to_kilometers(length as f64),
        };
        self.track
            .set(track)
            .map_err(|_| SimError::AlreadyInitialized)?;

        info!(
            "Initialized track: {} cells ({:.3} km), {} forward / {} backward lanes",
            length,
            self.ctx.units().cells_to_kilometers(length as f64),
            lanes_forward,
            lanes_backward
        );
        self.emit(SimEvent::Lifecycle(self.snapshot(ElementStatus::Initialize)));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.track().is_some()
    }

    pub fn lanes(&self) -> usize {
        self.track().map_or(0, |track| track.grid.lanes())
    }

    pub fn length(&self) -> usize {
        self.track().map_or(0, |track| track.grid.length())
    }

    pub fn lanes_forward(&self) -> usize {
        self.track().map_or(0, |track| track.lanes_forward)
    }

    pub fn lanes_backward(&self) -> usize {
        self.track().map_or(0, |track| track.lanes_backward)
    }

    /// Bounds check against `[0, lanes) x [0, length)`
    pub fn is_inside(&self, position: Position) -> bool {
        self.track().is_some_and(|track| {
            position.lane >= 0.0
                && position.cell >= 0.0
                && position.lane < track.grid.lanes() as f64
                && position.cell < track.grid.length() as f64
        })
    }

    pub fn occupant(&self, cell: Cell) -> Option<VehicleId> {
        self.track().and_then(|track| track.grid.occupant(cell))
    }

    /// Every occupied cell with its vehicle, lane by lane
    pub fn occupied_cells(&self) -> Vec<(Cell, VehicleId)> {
        self.track().map_or_else(Vec::new, |track| track.grid.occupied())
    }

    /// Occupants of the given positions, in input order, empties skipped
    pub fn query<I>(&self, positions: I) -> Vec<(Position, VehicleId)>
    where
        I: IntoIterator<Item = Position>,
    {
        let Some(track) = self.track() else {
            return Vec::new();
        };
        positions
            .into_iter()
            .filter(|position| self.is_inside(*position))
            .filter_map(|position| {
                let cell = position.to_cell()?;
                track.grid.occupant(cell).map(|id| (position, id))
            })
            .collect()
    }

    /// Puts a vehicle on `cell` and makes it active
    ///
    /// Fails without touching the grid when the cell is taken.
    pub fn place(&self, vehicle: Arc<Vehicle>, cell: Cell) -> bool {
        let Some(track) = self.track() else {
            return false;
        };
        if !track.grid.contains(cell.lane as i64, cell.column as i64) {
            return false;
        }

        let placed = {
            let guard = track.grid.lock();
            if self.is_released() || vehicle.is_released() || guard.occupant(cell).is_some() {
                false
            } else {
                guard.set(cell, Some(vehicle.id()));
                vehicle.set_cell(cell);
                self.vehicles_write().insert(vehicle.id(), Arc::clone(&vehicle));
                true
            }
        };

        if placed {
            self.spawned.fetch_add(1, Ordering::Relaxed);
            debug!("Placed {} at ({}, {})", vehicle.id(), cell.lane, cell.column);
            self.emit(SimEvent::Vehicle(vehicle.snapshot(ElementStatus::Initialize)));
            self.admit(&vehicle);
        }
        placed
    }

    /// Advances a vehicle one tick along its lane
    ///
    /// Zones crossed by the path cap the speed for this move. A target
    /// outside the track removes the vehicle, which counts as success.
    pub fn move_vehicle(&self, vehicle: &Vehicle) -> bool {
        let Some(track) = self.track() else {
            return false;
        };

        let origin = vehicle.cell();
        let start = Position::from_cell(origin);
        let mut target = vehicle.next_position();
        let cap = self
            .zones()
            .iter()
            .filter_map(|zone| zone.speed_cap(start, target))
            .min_by(f64::total_cmp);
        if let Some(cap) = cap {
            if cap < vehicle.speed() {
                target = vehicle.next_position_at(cap);
                // a capped vehicle that is still rolling creeps one cell
                if cap > 0.0 && target == start {
                    target = Position::new(start.lane, start.cell + vehicle.heading());
                }
            }
        }

        if !track.grid.contains(target.lane as i64, target.cell as i64) {
            return self.remove_exiting(track, vehicle);
        }
        let Some(destination) = target.to_cell() else {
            return false;
        };

        let id = vehicle.id();
        let moved = {
            let guard = track.grid.lock();
            // cells only change under the grid lock, so this read is current
            let current = vehicle.cell();
            if self.is_released() || guard.occupant(current) != Some(id) {
                false
            } else if current != origin || destination.lane != current.lane {
                debug!("{} changed cell while its move was computed", id);
                false
            } else if guard.lane_span_blocked(current.lane, current.column as i64, destination.column as i64, id) {
                false
            } else {
                guard.vacate(current, id);
                guard.set(destination, Some(id));
                vehicle.set_cell(destination);
                true
            }
        };

        if moved {
            vehicle.record_travel(origin.column.abs_diff(destination.column) as u64);
            self.admit(vehicle);
        }
        moved
    }

    /// Removes a vehicle whose next column lies off the track
    fn remove_exiting(&self, track: &Track, vehicle: &Vehicle) -> bool {
        let removed = {
            let guard = track.grid.lock();
            guard.vacate(vehicle.cell(), vehicle.id());
            self.vehicles_write().remove(&vehicle.id()).is_some()
        };

        if removed && vehicle.release() {
            self.finished.fetch_add(1, Ordering::Relaxed);
            if vehicle.is_user() {
                info!("User {} reached the end of the track", vehicle.id());
            } else {
                debug!("{} left the track", vehicle.id());
            }
            self.emit(SimEvent::Vehicle(vehicle.snapshot(ElementStatus::Release)));
            self.emit(SimEvent::VehicleFinished {
                vehicle: vehicle.id(),
                kind: vehicle.kind(),
            });
        }
        removed
    }

    /// Moves a vehicle sideways to `target_lane` at its current column
    pub fn lane_change(&self, vehicle: &Vehicle, target_lane: i64) -> bool {
        let Some(track) = self.track() else {
            return false;
        };
        if target_lane < 0 || target_lane as usize >= track.grid.lanes() {
            return false;
        }

        let current = vehicle.cell();
        let destination = Cell::new(target_lane as usize, current.column);
        let id = vehicle.id();
        let changed = {
            let guard = track.grid.lock();
            if self.is_released() || guard.occupant(current) != Some(id) {
                false
            } else if guard.column_span_blocked(current.column, current.lane, destination.lane, id) {
                false
            } else {
                guard.vacate(current, id);
                guard.set(destination, Some(id));
                vehicle.set_cell(destination);
                true
            }
        };

        if changed {
            self.admit(vehicle);
        }
        changed
    }

    fn admit(&self, vehicle: &Vehicle) {
        for zone in self.zones() {
            zone.admit(vehicle, self);
        }
    }

    /// Per-tick action: places staged vehicles whose start cell is free
    pub fn step(&self) -> SimResult<()> {
        if self.is_released() || !self.is_initialized() {
            return Ok(());
        }

        let pending: Vec<Arc<Vehicle>> = self.staged_guard().drain(..).collect();
        let waiting: Vec<Arc<Vehicle>> = pending
            .into_iter()
            .filter(|vehicle| !self.place(Arc::clone(vehicle), vehicle.cell()))
            .collect();
        if !waiting.is_empty() {
            debug!("{} vehicles still waiting for a free start cell", waiting.len());
            self.staged_guard().splice(0..0, waiting);
        }

        self.emit(SimEvent::Environment(self.snapshot(ElementStatus::Execute)));
        Ok(())
    }

    fn stage(&self, vehicle: Vehicle) -> VehicleId {
        let id = vehicle.id();
        self.emit(SimEvent::Vehicle(vehicle.snapshot(ElementStatus::Create)));
        self.staged_guard().push(Arc::new(vehicle));
        id
    }

    /// Adds a speed-restricted zone over the inclusive lane/cell rectangle
    pub fn create_zone(
        &self,
        allowed_speed: f64,
        lane_from: usize,
        lane_to: usize,
        cell_from: usize,
        cell_to: usize,
    ) -> SimResult<ZoneId> {
        let track = self.initialized_track()?;
        let zone = Zone::new(
            self.ctx.next_zone_id(),
            allowed_speed,
            ZoneBounds::new(lane_from, lane_to, cell_from, cell_to),
            track.grid.lanes(),
            track.grid.length(),
        )?;
        let id = zone.id();

        info!(
            "Created {} limited to {} km/h over lanes {}..={} and cells {}..={}",
            id, allowed_speed, lane_from, lane_to, cell_from, cell_to
        );
        self.emit(SimEvent::Zone(zone.snapshot(ElementStatus::Create)));
        self.zones
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(zone));
        Ok(id)
    }

    /// Stages a default vehicle at the start of `lane`
    pub fn create_default_vehicle(&self, params: VehicleParams, lane: usize) -> SimResult<VehicleId> {
        let track = self.initialized_track()?;
        if lane >= track.grid.lanes() {
            return Err(SimError::LaneOutOfRange {
                lane: lane as i64,
                lanes: track.grid.lanes(),
            });
        }

        let vehicle = Vehicle::new(
            &self.ctx,
            VehicleKind::Default,
            params,
            Cell::new(lane, 0),
            track.last_column(),
        )?;
        Ok(self.stage(vehicle))
    }

    /// Stages a default vehicle at a lane and column, both clamped to the track
    ///
    /// The goal is the far end of the lane's travel direction.
    pub fn create_default_vehicle_at(
        &self,
        params: VehicleParams,
        lane: usize,
        column: usize,
    ) -> SimResult<VehicleId> {
        let track = self.initialized_track()?;
        let lane = lane.min(track.grid.lanes() - 1);
        let column = column.min(track.last_column());
        let (_, goal) = track.route(lane);

        let vehicle = Vehicle::new(&self.ctx, VehicleKind::Default, params, Cell::new(lane, column), goal)?;
        Ok(self.stage(vehicle))
    }

    /// Stages the user vehicle at the start of the last lane
    pub fn create_user_vehicle(&self, params: VehicleParams) -> SimResult<VehicleId> {
        let track = self.initialized_track()?;
        if self.user_vehicle_active() {
            return Err(SimError::UserVehicleActive);
        }

        let vehicle = Vehicle::new(
            &self.ctx,
            VehicleKind::User,
            params,
            Cell::new(track.grid.lanes() - 1, 0),
            track.last_column(),
        )?;
        info!("Created user {}", vehicle.id());
        Ok(self.stage(vehicle))
    }

    fn user_vehicle_active(&self) -> bool {
        let active = self.vehicles_read().values().any(|vehicle| vehicle.is_user());
        active || self.staged_guard().iter().any(|vehicle| vehicle.is_user())
    }

    /// Stages a default vehicle with random limits on a random lane
    pub fn spawn_random_vehicle(&self) -> SimResult<VehicleId> {
        let track = self.initialized_track()?;
        let lane = self.ctx.random_index(track.grid.lanes());
        let (start, goal) = track.route(lane);

        let max_speed = self.ctx.random_range(RANDOM_MAX_SPEED_RANGE);
        let acceleration = self.ctx.random_range(MIN_ACCELERATION..MIN_ACCELERATION + 3.0);
        let deceleration = acceleration + self.ctx.random_range(1.0..4.0);
        let initial_speed = self.ctx.random_range(0.0..max_speed / 2.0);
        let params = VehicleParams::new(max_speed, acceleration, deceleration).with_initial_speed(initial_speed);

        let vehicle = Vehicle::new(&self.ctx, VehicleKind::Default, params, Cell::new(lane, start), goal)?;
        Ok(self.stage(vehicle))
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<Arc<Vehicle>> {
        self.vehicles_read().get(&id).cloned()
    }

    /// Active vehicles ordered by id
    pub fn vehicles(&self) -> Vec<Arc<Vehicle>> {
        let mut vehicles: Vec<Arc<Vehicle>> = self.vehicles_read().values().cloned().collect();
        vehicles.sort_by_key(|vehicle| vehicle.id());
        vehicles
    }

    pub fn staged_count(&self) -> usize {
        self.staged_guard().len()
    }

    pub fn zones(&self) -> Vec<Arc<Zone>> {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn zone(&self, id: ZoneId) -> Option<Arc<Zone>> {
        self.zones().into_iter().find(|zone| zone.id() == id)
    }

    /// Everything that acts once per tick: the environment, zones, vehicles
    pub fn active_elements(self: &Arc<Self>) -> Vec<Element> {
        let mut elements = vec![Element::Environment(Arc::clone(self))];
        elements.extend(self.zones().into_iter().map(Element::Zone));
        elements.extend(self.vehicles().into_iter().map(Element::Vehicle));
        elements
    }

    /// Records a penalty value into the run statistic
    pub fn record_penalty(&self, value: f64) -> SimResult<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(SimError::InvalidPenalty(value));
        }
        self.penalties_guard().insert(OrderedFloat(value));
        self.emit(SimEvent::PenaltyRecorded(value));
        Ok(())
    }

    /// Largest recorded or currently held penalty, `None` when there is none
    pub fn max_observed_penalty(&self) -> Option<f64> {
        let recorded = self.penalties_guard().last().map(|value| value.0);
        let held = self
            .vehicles_read()
            .values()
            .map(|vehicle| OrderedFloat(vehicle.penalty()))
            .max()
            .map(|value| value.0);

        match (recorded, held) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn emit(&self, event: SimEvent) {
        self.events.emit(event);
    }

    /// A receiver for the event stream
    pub fn events(&self) -> Receiver<SimEvent> {
        self.events.subscribe()
    }

    /// Counts a rejected move or lane change and forwards the notification
    pub fn report_collision(&self, vehicle: VehicleId, target: NotifyTarget) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
        if target == NotifyTarget::Environment {
            info!("User {} collided", vehicle);
        }
        self.emit(SimEvent::Collision { vehicle, target });
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Removes every element and stops the scheduler; repeated calls are no-ops
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let vehicles: Vec<Arc<Vehicle>> = match self.track() {
            Some(track) => {
                let guard = track.grid.lock();
                let drained: Vec<Arc<Vehicle>> =
                    self.vehicles_write().drain().map(|(_, vehicle)| vehicle).collect();
                guard.clear();
                drained
            }
            None => self.vehicles_write().drain().map(|(_, vehicle)| vehicle).collect(),
        };
        let staged: Vec<Arc<Vehicle>> = self.staged_guard().drain(..).collect();
        let zones: Vec<Arc<Zone>> = self
            .zones
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for vehicle in vehicles.iter().chain(staged.iter()) {
            if vehicle.release() {
                self.emit(SimEvent::Vehicle(vehicle.snapshot(ElementStatus::Release)));
            }
        }
        for zone in &zones {
            zone.release();
            self.emit(SimEvent::Zone(zone.snapshot(ElementStatus::Release)));
        }

        info!(
            "Environment released ({} vehicles, {} staged, {} zones)",
            vehicles.len(),
            staged.len(),
            zones.len()
        );
        self.emit(SimEvent::Lifecycle(self.snapshot(ElementStatus::Release)));
    }

    /// The shutdown action
    pub fn shutdown(&self) {
        self.release();
    }

    pub fn snapshot(&self, status: ElementStatus) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            status,
            id: ENVIRONMENT_ID,
            length: self.length(),
            lanes_forward: self.lanes_forward(),
            lanes_backward: self.lanes_backward(),
            distance_km: self.track().map_or(0.0, |track| track.distance_km),
        }
    }

    pub fn stats(&self) -> EnvironmentStats {
        EnvironmentStats {
            spawned: self.spawned.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            active: self.vehicles_read().len(),
            staged: self.staged_count(),
            zones: self.zones().len(),
            collisions: self.collisions.load(Ordering::Relaxed),
            max_penalty: self.max_observed_penalty(),
        }
    }

    /// ASCII map of the lanes
    ///
    /// `>` and `<` are default vehicles by travel direction, `U` the user
    /// vehicle, `-` a free cell inside a zone and `.` any other free cell.
    pub fn render_lanes(&self) -> String {
        let Some(track) = self.track() else {
            return String::new();
        };
        let vehicles = self.vehicles_read();
        let zones = self.zones();

        (0..track.grid.lanes())
            .map(|lane| {
                (0..track.grid.length())
                    .map(|column| {
                        let cell = Cell::new(lane, column);
                        match track.grid.occupant(cell) {
                            Some(id) if vehicles.get(&id).is_some_and(|vehicle| vehicle.is_user()) => 'U',
                            Some(_) if track.is_forward(lane) => '>',
                            Some(_) => '<',
                            None if zones.iter().any(|zone| zone.contains(Position::from_cell(cell))) => '-',
                            None => '.',
                        }
                    })
                    .collect::<String>()
            })
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn print_summary(&self) {
        let stats = self.stats();
        println!("=== Lane Traffic Summary ===");
        println!(
            "Track: {} cells, {} forward / {} backward lanes",
            self.length(),
            self.lanes_forward(),
            self.lanes_backward()
        );
        println!("Vehicles: {} active, {} staged", stats.active, stats.staged);
        println!("Spawned: {}, finished: {}", stats.spawned, stats.finished);
        println!("Collisions: {}", stats.collisions);
        println!("Zones: {}", stats.zones);

        let vehicles = self.vehicles();
        if !vehicles.is_empty() {
            println!("--- Active Vehicles ---");
            for vehicle in vehicles {
                let cell = vehicle.cell();
                println!(
                    "  {} ({}): lane {} column {} -> {}, speed {:.1}/{:.1} km/h, travelled {:.3} km",
                    vehicle.id(),
                    vehicle.kind(),
                    cell.lane,
                    cell.column,
                    vehicle.goal_column(),
                    vehicle.speed(),
                    vehicle.max_speed(),
                    vehicle.distance_travelled_km()
                );
            }
        }
    }
}
