//! Tick scheduler
//!
//! A tick collects the active elements, advances all of them on the rayon
//! pool and waits for every one to finish before the next tick starts.
//! Shutdown is only observed between ticks.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::environment::Environment;
use super::error::SimResult;
use super::events::SimEvent;
use super::vehicle::Vehicle;
use super::zone::Zone;

/// Something that acts once per tick
#[derive(Clone)]
pub enum Element {
    Environment(Arc<Environment>),
    Zone(Arc<Zone>),
    Vehicle(Arc<Vehicle>),
}

impl Element {
    pub fn step(&self, env: &Environment) -> SimResult<()> {
        match self {
            Element::Environment(environment) => environment.step(),
            Element::Zone(zone) => zone.step(env),
            Element::Vehicle(vehicle) => vehicle.advance(env),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Element::Environment(_) => "environment".to_string(),
            Element::Zone(zone) => zone.id().to_string(),
            Element::Vehicle(vehicle) => vehicle.id().to_string(),
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub elements: usize,
    pub failures: usize,
}

pub struct SimulationRunner {
    env: Arc<Environment>,
    interval: Duration,
    ticks: AtomicU64,
}

impl SimulationRunner {
    pub fn new(env: Arc<Environment>) -> Self {
        let interval = env.context().config().tick_interval;
        Self {
            env,
            interval,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Advances every active element once
    ///
    /// A failing element is logged and does not stop the others.
    pub fn tick(&self) -> TickReport {
        let elements = self.env.active_elements();
        let env = self.env.as_ref();

        let failures = elements
            .par_iter()
            .filter(|element| match element.step(env) {
                Ok(()) => false,
                Err(err) => {
                    warn!("{} failed its tick: {}", element.label(), err);
                    true
                }
            })
            .count();

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        self.env.emit(SimEvent::TickCompleted(tick));
        debug!("tick {} advanced {} elements ({} failed)", tick, elements.len(), failures);

        TickReport {
            tick,
            elements: elements.len(),
            failures,
        }
    }

    /// Runs until the environment is released or `max_ticks` ticks are done
    ///
    /// The environment is released when the loop ends, whatever stopped it.
    /// Returns the number of ticks run by this call.
    pub fn run(&self, max_ticks: Option<u64>) -> u64 {
        let mut completed = 0;
        while !self.env.is_released() && max_ticks.map_or(true, |limit| completed < limit) {
            self.tick();
            completed += 1;

            if self.env.is_released() || max_ticks == Some(completed) {
                break;
            }
            thread::sleep(self.interval);
        }

        info!("Scheduler stopped after {} ticks", completed);
        self.env.release();
        completed
    }

    /// Runs on a dedicated thread until stopped
    pub fn spawn(self, max_ticks: Option<u64>) -> std::io::Result<RunHandle> {
        let env = Arc::clone(&self.env);
        let handle = thread::Builder::new()
            .name("lane-traffic-scheduler".into())
            .spawn(move || self.run(max_ticks))?;

        Ok(RunHandle {
            env,
            handle: Some(handle),
        })
    }
}

/// Handle to a scheduler running on its own thread
pub struct RunHandle {
    env: Arc<Environment>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl RunHandle {
    /// Releases the environment; the scheduler exits at the next tick boundary
    pub fn stop(&self) {
        self.env.shutdown();
    }

    /// Waits for the scheduler and returns the ticks it ran
    pub fn join(mut self) -> u64 {
        match self.handle.take().map(thread::JoinHandle::join) {
            Some(Ok(ticks)) => ticks,
            Some(Err(_)) => {
                warn!("scheduler thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.env.shutdown();
            if handle.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::SimConfig;
    use crate::simulation::context::SimContext;
    use crate::simulation::types::Cell;
    use crate::simulation::vehicle::VehicleParams;

    fn environment() -> Arc<Environment> {
        let config = SimConfig::default()
            .with_seed(5)
            .with_tick_interval(Duration::from_millis(1));
        let env = Environment::new(Arc::new(SimContext::new(config)));
        env.initialize(0.075, 1, 1).unwrap();
        env
    }

    #[test]
    fn tick_places_then_advances() {
        let env = environment();
        let params = VehicleParams::new(100.0, 2.0, 3.0).with_initial_speed(27.0);
        let id = env.create_default_vehicle(params, 0).unwrap();
        let runner = SimulationRunner::new(Arc::clone(&env));

        // environment only; the vehicle is placed during this tick
        assert_eq!(runner.tick().elements, 1);
        assert_eq!(env.vehicle(id).unwrap().cell(), Cell::new(0, 0));

        let report = runner.tick();
        assert_eq!(report.elements, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(env.vehicle(id).unwrap().cell(), Cell::new(0, 1));
        assert_eq!(runner.ticks(), 2);
    }

    #[test]
    fn run_stops_at_tick_limit() {
        let env = environment();
        let runner = SimulationRunner::new(env);
        assert_eq!(runner.run(Some(3)), 3);
        assert_eq!(runner.ticks(), 3);
        assert!(runner.environment().is_released());
    }

    #[test]
    fn dropping_a_panicked_run_does_not_panic() {
        let env = environment();
        let handle = thread::Builder::new()
            .spawn(|| -> u64 { panic!("scheduler failure") })
            .unwrap();
        drop(RunHandle {
            env: Arc::clone(&env),
            handle: Some(handle),
        });
        assert!(env.is_released());
    }

    #[test]
    fn released_environment_does_not_tick() {
        let env = environment();
        env.release();
        let runner = SimulationRunner::new(env);
        assert_eq!(runner.run(Some(3)), 0);
    }

    #[test]
    fn stop_ends_a_spawned_run() {
        let env = environment();
        let handle = SimulationRunner::new(Arc::clone(&env)).spawn(None).unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.stop();
        assert!(handle.join() >= 1);
        assert!(env.is_released());
    }

    #[test]
    fn vehicles_reach_the_end() {
        let env = environment();
        let params = VehicleParams::new(100.0, 2.0, 3.0).with_initial_speed(54.0);
        env.create_default_vehicle(params, 0).unwrap();
        let runner = SimulationRunner::new(Arc::clone(&env));

        runner.run(Some(8));
        let stats = env.stats();
        assert_eq!(stats.spawned, 1);
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.active, 0);
    }
}
