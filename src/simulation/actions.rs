//! Named command table for the external reasoning layer
//!
//! Every action has a fixed arity and typed arguments. The reasoning layer
//! looks actions up by name and invokes them generically; a rejected action
//! comes back as a [`SimError`] and leaves the simulation running.

use log::debug;
use std::collections::HashMap;

use super::environment::Environment;
use super::error::{SimError, SimResult};
use super::types::{VehicleId, ZoneId};
use super::vehicle::{Vehicle, VehicleParams};
use super::zone::Zone;

/// An argument passed to an action
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionArg {
    Number(f64),
    Vehicle(VehicleId),
}

/// Result of a successful action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionValue {
    Unit,
    Number(f64),
    Bool(bool),
    Vehicle(VehicleId),
    Zone(ZoneId),
    Vehicles(Vec<VehicleId>),
}

pub type EnvironmentHandler = fn(&Environment, &[ActionArg]) -> SimResult<ActionValue>;
pub type VehicleHandler = fn(&Vehicle, &Environment, &[ActionArg]) -> SimResult<ActionValue>;
pub type ZoneHandler = fn(&Zone, &Environment, &[ActionArg]) -> SimResult<ActionValue>;

/// A registered action
#[derive(Clone, Copy)]
pub struct ActionSpec<H> {
    pub name: &'static str,
    pub arity: usize,
    pub handler: H,
}

impl<H> ActionSpec<H> {
    fn check_arity(&self, args: &[ActionArg]) -> SimResult<()> {
        if args.len() == self.arity {
            Ok(())
        } else {
            Err(SimError::Arity {
                name: self.name,
                expected: self.arity,
                actual: args.len(),
            })
        }
    }
}

/// Lookup tables of the actions offered by each element kind
pub struct ActionTable {
    environment: HashMap<&'static str, ActionSpec<EnvironmentHandler>>,
    vehicle: HashMap<&'static str, ActionSpec<VehicleHandler>>,
    zone: HashMap<&'static str, ActionSpec<ZoneHandler>>,
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionTable {
    pub fn new() -> Self {
        let env_spec = spec::<EnvironmentHandler>;
        let vehicle_spec = spec::<VehicleHandler>;
        let zone_spec = spec::<ZoneHandler>;

        let environment = [
            env_spec("simulation/initialize", 3, simulation_initialize),
            env_spec("simulation/shutdown", 0, simulation_shutdown),
            env_spec("simulation/maxpenalty", 0, simulation_max_penalty),
            env_spec("simulation/penalty", 1, simulation_penalty),
            env_spec("vehicle/penalty", 1, environment_vehicle_penalty),
            env_spec("area/initialize", 5, area_initialize),
            env_spec("vehicle/default/left", 4, vehicle_default_left),
            env_spec("vehicle/default/position", 5, vehicle_default_position),
            env_spec("vehicle/user", 3, vehicle_user),
            env_spec("vehicle/random", 0, vehicle_random),
        ];
        let vehicle = [
            vehicle_spec("accelerate", 1, vehicle_accelerate),
            vehicle_spec("decelerate", 1, vehicle_decelerate),
            vehicle_spec("pullout", 0, vehicle_pull_out),
            vehicle_spec("pullin", 0, vehicle_pull_in),
        ];
        let zone = [
            zone_spec("element/list", 0, zone_list),
            zone_spec("vehicle/speed", 1, zone_vehicle_speed),
            zone_spec("vehicle/penalty", 2, zone_vehicle_penalty),
        ];

        Self {
            environment: environment.into_iter().map(|spec| (spec.name, spec)).collect(),
            vehicle: vehicle.into_iter().map(|spec| (spec.name, spec)).collect(),
            zone: zone.into_iter().map(|spec| (spec.name, spec)).collect(),
        }
    }

    /// Sorted names of the environment actions
    pub fn environment_actions(&self) -> Vec<&'static str> {
        sorted_names(self.environment.keys())
    }

    pub fn vehicle_actions(&self) -> Vec<&'static str> {
        sorted_names(self.vehicle.keys())
    }

    pub fn zone_actions(&self) -> Vec<&'static str> {
        sorted_names(self.zone.keys())
    }

    pub fn invoke_environment(&self, env: &Environment, name: &str, args: &[ActionArg]) -> SimResult<ActionValue> {
        let spec = self
            .environment
            .get(name)
            .ok_or_else(|| SimError::UnknownAction(name.to_string()))?;
        spec.check_arity(args)?;
        debug!("environment action {name} {args:?}");
        (spec.handler)(env, args)
    }

    pub fn invoke_vehicle(
        &self,
        env: &Environment,
        vehicle: VehicleId,
        name: &str,
        args: &[ActionArg],
    ) -> SimResult<ActionValue> {
        let spec = self
            .vehicle
            .get(name)
            .ok_or_else(|| SimError::UnknownAction(name.to_string()))?;
        spec.check_arity(args)?;
        let target = env.vehicle(vehicle).ok_or(SimError::UnknownVehicle(vehicle))?;
        debug!("{vehicle} action {name} {args:?}");
        (spec.handler)(&target, env, args)
    }

    pub fn invoke_zone(&self, env: &Environment, zone: ZoneId, name: &str, args: &[ActionArg]) -> SimResult<ActionValue> {
        let spec = self
            .zone
            .get(name)
            .ok_or_else(|| SimError::UnknownAction(name.to_string()))?;
        spec.check_arity(args)?;
        let target = env.zone(zone).ok_or(SimError::UnknownZone(zone))?;
        debug!("{zone} action {name} {args:?}");
        (spec.handler)(&target, env, args)
    }
}

fn spec<H>(name: &'static str, arity: usize, handler: H) -> ActionSpec<H> {
    ActionSpec { name, arity, handler }
}

fn sorted_names<'a>(names: impl Iterator<Item = &'a &'static str>) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = names.copied().collect();
    names.sort_unstable();
    names
}

fn number(name: &'static str, args: &[ActionArg], index: usize) -> SimResult<f64> {
    match args.get(index) {
        Some(ActionArg::Number(value)) => Ok(*value),
        _ => Err(SimError::ArgumentType { name, index }),
    }
}

/// A non-negative whole number
fn count(name: &'static str, args: &[ActionArg], index: usize) -> SimResult<usize> {
    let value = number(name, args, index)?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(SimError::ArgumentType { name, index })
    }
}

fn vehicle_arg(name: &'static str, args: &[ActionArg], index: usize) -> SimResult<VehicleId> {
    match args.get(index) {
        Some(ActionArg::Vehicle(id)) => Ok(*id),
        _ => Err(SimError::ArgumentType { name, index }),
    }
}

fn vehicle_params(name: &'static str, args: &[ActionArg]) -> SimResult<VehicleParams> {
    Ok(VehicleParams::new(
        number(name, args, 0)?,
        number(name, args, 1)?,
        number(name, args, 2)?,
    ))
}

fn simulation_initialize(env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    const NAME: &str = "simulation/initialize";
    env.initialize(number(NAME, args, 0)?, count(NAME, args, 1)?, count(NAME, args, 2)?)?;
    Ok(ActionValue::Unit)
}

fn simulation_shutdown(env: &Environment, _args: &[ActionArg]) -> SimResult<ActionValue> {
    env.shutdown();
    Ok(ActionValue::Unit)
}

fn simulation_max_penalty(env: &Environment, _args: &[ActionArg]) -> SimResult<ActionValue> {
    Ok(env
        .max_observed_penalty()
        .map_or(ActionValue::Unit, ActionValue::Number))
}

fn simulation_penalty(env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    env.record_penalty(number("simulation/penalty", args, 0)?)?;
    Ok(ActionValue::Unit)
}

fn environment_vehicle_penalty(env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    let id = vehicle_arg("vehicle/penalty", args, 0)?;
    let vehicle = env.vehicle(id).ok_or(SimError::UnknownVehicle(id))?;
    Ok(ActionValue::Number(vehicle.penalty()))
}

fn area_initialize(env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    const NAME: &str = "area/initialize";
    let zone = env.create_zone(
        number(NAME, args, 0)?,
        count(NAME, args, 1)?,
        count(NAME, args, 2)?,
        count(NAME, args, 3)?,
        count(NAME, args, 4)?,
    )?;
    Ok(ActionValue::Zone(zone))
}

/// Lanes are numbered from 1
fn vehicle_default_left(env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    const NAME: &str = "vehicle/default/left";
    let params = vehicle_params(NAME, args)?;
    let lane = count(NAME, args, 3)?;
    if lane == 0 {
        return Err(SimError::LaneOutOfRange {
            lane: -1,
            lanes: env.lanes(),
        });
    }
    Ok(ActionValue::Vehicle(env.create_default_vehicle(params, lane - 1)?))
}

/// Lane and position are numbered from 1 and clamped to the track
fn vehicle_default_position(env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    const NAME: &str = "vehicle/default/position";
    let params = vehicle_params(NAME, args)?;
    let lane = count(NAME, args, 3)?.saturating_sub(1);
    let column = count(NAME, args, 4)?.saturating_sub(1);
    Ok(ActionValue::Vehicle(env.create_default_vehicle_at(params, lane, column)?))
}

fn vehicle_user(env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    let params = vehicle_params("vehicle/user", args)?;
    Ok(ActionValue::Vehicle(env.create_user_vehicle(params)?))
}

fn vehicle_random(env: &Environment, _args: &[ActionArg]) -> SimResult<ActionValue> {
    Ok(ActionValue::Vehicle(env.spawn_random_vehicle()?))
}

fn vehicle_accelerate(vehicle: &Vehicle, _env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    let speed = vehicle.accelerate(number("accelerate", args, 0)?)?;
    Ok(ActionValue::Number(speed))
}

fn vehicle_decelerate(vehicle: &Vehicle, _env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    let speed = vehicle.decelerate(number("decelerate", args, 0)?)?;
    Ok(ActionValue::Number(speed))
}

fn vehicle_pull_out(vehicle: &Vehicle, env: &Environment, _args: &[ActionArg]) -> SimResult<ActionValue> {
    Ok(ActionValue::Bool(vehicle.pull_out(env)))
}

fn vehicle_pull_in(vehicle: &Vehicle, env: &Environment, _args: &[ActionArg]) -> SimResult<ActionValue> {
    Ok(ActionValue::Bool(vehicle.pull_in(env)))
}

fn zone_list(zone: &Zone, _env: &Environment, _args: &[ActionArg]) -> SimResult<ActionValue> {
    Ok(ActionValue::Vehicles(zone.members()))
}

fn zone_vehicle_speed(_zone: &Zone, env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    let id = vehicle_arg("vehicle/speed", args, 0)?;
    let vehicle = env.vehicle(id).ok_or(SimError::UnknownVehicle(id))?;
    Ok(ActionValue::Number(vehicle.speed()))
}

fn zone_vehicle_penalty(zone: &Zone, env: &Environment, args: &[ActionArg]) -> SimResult<ActionValue> {
    const NAME: &str = "vehicle/penalty";
    let id = vehicle_arg(NAME, args, 0)?;
    let value = number(NAME, args, 1)?;
    let vehicle = env.vehicle(id).ok_or(SimError::UnknownVehicle(id))?;
    Ok(ActionValue::Number(zone.penalize(&vehicle, value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::SimConfig;
    use crate::simulation::context::SimContext;
    use crate::simulation::types::{Cell, SimId};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn setup() -> (ActionTable, Arc<Environment>) {
        let table = ActionTable::new();
        let env = Environment::new(Arc::new(SimContext::new(SimConfig::default().with_seed(3))));
        table
            .invoke_environment(
                &env,
                "simulation/initialize",
                &[ActionArg::Number(0.075), ActionArg::Number(2.0), ActionArg::Number(1.0)],
            )
            .unwrap();
        (table, env)
    }

    fn default_left(table: &ActionTable, env: &Environment, lane: f64) -> SimResult<ActionValue> {
        table.invoke_environment(
            env,
            "vehicle/default/left",
            &[
                ActionArg::Number(120.0),
                ActionArg::Number(2.0),
                ActionArg::Number(4.0),
                ActionArg::Number(lane),
            ],
        )
    }

    fn vehicle_id(value: ActionValue) -> VehicleId {
        match value {
            ActionValue::Vehicle(id) => id,
            other => panic!("expected a vehicle, got {other:?}"),
        }
    }

    #[test]
    fn unknown_names_and_wrong_arity_are_rejected() {
        let (table, env) = setup();
        assert_eq!(
            table.invoke_environment(&env, "simulation/explode", &[]),
            Err(SimError::UnknownAction("simulation/explode".into()))
        );
        assert!(matches!(
            table.invoke_environment(&env, "simulation/penalty", &[]),
            Err(SimError::Arity { expected: 1, actual: 0, .. })
        ));
    }

    #[test]
    fn initialize_twice_is_rejected() {
        let (table, env) = setup();
        let again = table.invoke_environment(
            &env,
            "simulation/initialize",
            &[ActionArg::Number(1.0), ActionArg::Number(1.0), ActionArg::Number(1.0)],
        );
        assert_eq!(again, Err(SimError::AlreadyInitialized));
        assert_eq!(env.lanes(), 3);
    }

    #[test]
    fn lanes_must_be_whole_numbers() {
        let table = ActionTable::new();
        let env = Environment::new(Arc::new(SimContext::default()));
        let result = table.invoke_environment(
            &env,
            "simulation/initialize",
            &[ActionArg::Number(1.0), ActionArg::Number(1.5), ActionArg::Number(1.0)],
        );
        assert!(matches!(result, Err(SimError::ArgumentType { index: 1, .. })));
    }

    #[test]
    fn default_vehicle_lanes_start_at_one() {
        let (table, env) = setup();
        assert!(matches!(
            default_left(&table, &env, 0.0),
            Err(SimError::LaneOutOfRange { .. })
        ));
        let id = vehicle_id(default_left(&table, &env, 2.0).unwrap());
        env.step().unwrap();
        assert_eq!(env.vehicle(id).unwrap().cell(), Cell::new(1, 0));
    }

    #[test]
    fn default_vehicle_position_is_clamped() {
        let (table, env) = setup();
        let id = vehicle_id(
            table
                .invoke_environment(
                    &env,
                    "vehicle/default/position",
                    &[
                        ActionArg::Number(120.0),
                        ActionArg::Number(2.0),
                        ActionArg::Number(4.0),
                        ActionArg::Number(9.0),
                        ActionArg::Number(40.0),
                    ],
                )
                .unwrap(),
        );
        env.step().unwrap();
        let vehicle = env.vehicle(id).unwrap();
        assert_eq!(vehicle.cell(), Cell::new(2, 9));
        assert_eq!(vehicle.goal_column(), 0);
    }

    #[test]
    fn vehicle_actions_change_speed() {
        let (table, env) = setup();
        let id = vehicle_id(default_left(&table, &env, 1.0).unwrap());
        env.step().unwrap();

        let speed = table
            .invoke_vehicle(&env, id, "accelerate", &[ActionArg::Number(0.5)])
            .unwrap();
        assert!(matches!(speed, ActionValue::Number(value) if (value - 3.6).abs() < 1e-9));
        assert!(matches!(
            table.invoke_vehicle(&env, id, "decelerate", &[ActionArg::Number(1.0)]),
            Err(SimError::SpeedBelowZero { .. })
        ));
        assert_eq!(
            table.invoke_vehicle(&env, id, "pullout", &[]),
            Ok(ActionValue::Bool(true))
        );
        assert_eq!(env.vehicle(id).unwrap().lane(), 1);
    }

    #[test]
    fn unplaced_vehicle_is_unknown() {
        let (table, env) = setup();
        let id = vehicle_id(default_left(&table, &env, 1.0).unwrap());
        assert_eq!(
            table.invoke_vehicle(&env, id, "pullin", &[]),
            Err(SimError::UnknownVehicle(id))
        );
    }

    #[test]
    fn zone_actions_read_and_penalize_members() {
        let (table, env) = setup();
        let zone = match table
            .invoke_environment(
                &env,
                "area/initialize",
                &[
                    ActionArg::Number(50.0),
                    ActionArg::Number(0.0),
                    ActionArg::Number(1.0),
                    ActionArg::Number(0.0),
                    ActionArg::Number(3.0),
                ],
            )
            .unwrap()
        {
            ActionValue::Zone(zone) => zone,
            other => panic!("expected a zone, got {other:?}"),
        };
        let id = vehicle_id(default_left(&table, &env, 1.0).unwrap());
        env.step().unwrap();

        assert_eq!(
            table.invoke_zone(&env, zone, "element/list", &[]),
            Ok(ActionValue::Vehicles(vec![id]))
        );
        assert_eq!(
            table.invoke_zone(&env, zone, "vehicle/speed", &[ActionArg::Vehicle(id)]),
            Ok(ActionValue::Number(0.0))
        );
        table
            .invoke_zone(
                &env,
                zone,
                "vehicle/penalty",
                &[ActionArg::Vehicle(id), ActionArg::Number(2.5)],
            )
            .unwrap();

        let penalty = table
            .invoke_environment(&env, "vehicle/penalty", &[ActionArg::Vehicle(id)])
            .unwrap();
        assert_eq!(penalty, ActionValue::Number(2.5));
        assert_eq!(
            table.invoke_environment(&env, "simulation/maxpenalty", &[]),
            Ok(ActionValue::Number(2.5))
        );
        assert_eq!(
            table.invoke_zone(&env, ZoneId(SimId(999)), "element/list", &[]),
            Err(SimError::UnknownZone(ZoneId(SimId(999))))
        );
    }

    #[test]
    fn penalty_record_feeds_max_penalty() {
        let (table, env) = setup();
        assert_eq!(
            table.invoke_environment(&env, "simulation/maxpenalty", &[]),
            Ok(ActionValue::Unit)
        );
        table
            .invoke_environment(&env, "simulation/penalty", &[ActionArg::Number(12.0)])
            .unwrap();
        let max = table
            .invoke_environment(&env, "simulation/maxpenalty", &[])
            .unwrap();
        assert!(matches!(max, ActionValue::Number(value) if value == 12.0));
        assert_relative_eq!(env.max_observed_penalty().unwrap_or_default(), 12.0);
    }

    #[test]
    fn shutdown_releases_the_environment() {
        let (table, env) = setup();
        table.invoke_environment(&env, "simulation/shutdown", &[]).unwrap();
        assert!(env.is_released());
        assert_eq!(
            table.invoke_environment(&env, "vehicle/random", &[]),
            Err(SimError::Released)
        );
    }

    #[test]
    fn every_action_is_listed() {
        let table = ActionTable::new();
        assert_eq!(table.environment_actions().len(), 10);
        assert_eq!(
            table.vehicle_actions(),
            vec!["accelerate", "decelerate", "pullin", "pullout"]
        );
        assert_eq!(
            table.zone_actions(),
            vec!["element/list", "vehicle/penalty", "vehicle/speed"]
        );
    }
}
