use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lane_traffic::simulation::{
    ActionArg, ActionTable, ActionValue, Direction, Environment, SimConfig, SimContext,
    SimulationRunner, DEFAULT_TICK_INTERVAL_MS,
};

#[derive(Parser)]
#[command(name = "lane_traffic")]
#[command(about = "Multi-lane traffic simulation on a discrete cell grid")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value_t = 200)]
    ticks: u64,

    /// Pause between two ticks in milliseconds
    #[arg(long, default_value_t = DEFAULT_TICK_INTERVAL_MS)]
    interval_ms: u64,

    /// Track length in kilometers
    #[arg(long, default_value_t = 1.0)]
    length_km: f64,

    /// Lanes travelling towards the far end
    #[arg(long, default_value_t = 2)]
    lanes_forward: usize,

    /// Lanes travelling back towards the start
    #[arg(long, default_value_t = 1)]
    lanes_backward: usize,

    /// Probability of a new random vehicle per tick
    #[arg(long, default_value_t = 0.3, value_parser = parse_probability)]
    spawn_rate: f64,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Adds a speed zone over the middle third of the track (km/h)
    #[arg(long)]
    zone_speed: Option<f64>,

    /// Adds a user vehicle on the first lane
    #[arg(long)]
    user: bool,

    /// Print the lane map after every tick
    #[arg(long)]
    map: bool,
}

fn parse_probability(value: &str) -> Result<f64, String> {
    let rate: f64 = value.parse().map_err(|err| format!("{}", err))?;
    if rate.is_finite() && (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{} is not a probability in [0, 1]", value))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let interval = Duration::from_millis(cli.interval_ms);
    let mut config = SimConfig::default().with_tick_interval(interval);
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    let ctx = Arc::new(SimContext::new(config));
    let env = Environment::new(Arc::clone(&ctx));
    let table = ActionTable::new();

    table
        .invoke_environment(
            &env,
            "simulation/initialize",
            &[
                ActionArg::Number(cli.length_km),
                ActionArg::Number(cli.lanes_forward as f64),
                ActionArg::Number(cli.lanes_backward as f64),
            ],
        )
        .context("failed to initialize the track")?;

    if let Some(speed) = cli.zone_speed {
        let length = env.length();
        table
            .invoke_environment(
                &env,
                "area/initialize",
                &[
                    ActionArg::Number(speed),
                    ActionArg::Number(0.0),
                    ActionArg::Number((env.lanes() - 1) as f64),
                    ActionArg::Number((length / 3) as f64),
                    ActionArg::Number((2 * length / 3) as f64),
                ],
            )
            .context("failed to create the speed zone")?;
    }

    if cli.user {
        table
            .invoke_environment(
                &env,
                "vehicle/user",
                &[
                    ActionArg::Number(160.0),
                    ActionArg::Number(3.0),
                    ActionArg::Number(6.0),
                ],
            )
            .context("failed to create the user vehicle")?;
    }

    info!(
        "Running {} ticks on a {} km track ({} + {} lanes)",
        cli.ticks, cli.length_km, cli.lanes_forward, cli.lanes_backward
    );

    let runner = SimulationRunner::new(Arc::clone(&env));
    for _ in 0..cli.ticks {
        if env.is_released() {
            break;
        }
        if ctx.random_bool(cli.spawn_rate) {
            table
                .invoke_environment(&env, "vehicle/random", &[])
                .context("failed to spawn a vehicle")?;
        }

        drive(&table, &env);
        runner.tick();

        if cli.map {
            println!("{}\n", env.render_lanes());
        }
        thread::sleep(interval);
    }

    env.print_summary();
    let stats = env.stats();
    info!("=== SIMULATION COMPLETE ===");
    info!("Ticks: {}", runner.ticks());
    info!("Total vehicles spawned: {}", stats.spawned);
    info!("Total vehicles finished: {}", stats.finished);
    info!("Active vehicles: {}", stats.active);
    info!("Collisions: {}", stats.collisions);
    match stats.max_penalty {
        Some(penalty) => info!("Max penalty: {:.2}", penalty),
        None => info!("Max penalty: none"),
    }

    table
        .invoke_environment(&env, "simulation/shutdown", &[])
        .context("failed to shut down")?;
    Ok(())
}

/// Minimal stand-in for the reasoning layer
///
/// Vehicles brake or overtake when something is close ahead and speed up
/// otherwise; zones penalize members above the allowed speed.
fn drive(table: &ActionTable, env: &Environment) {
    let units = env.context().units();

    for vehicle in env.vehicles() {
        let id = vehicle.id();
        let lookahead = units.speed_to_cells(vehicle.speed()) + 1.0;
        let blocked = vehicle
            .perception()
            .neighbors()
            .iter()
            .any(|neighbor| neighbor.direction == Direction::Forward && neighbor.distance <= lookahead);

        // only overtake on lanes of the same travel direction
        let overtake_lane = vehicle.lane() as i64 + vehicle.heading() as i64;
        let can_overtake = if vehicle.heading() > 0.0 {
            overtake_lane < env.lanes_forward() as i64
        } else {
            overtake_lane >= env.lanes_forward() as i64
        };

        let result = if blocked && can_overtake {
            match table.invoke_vehicle(env, id, "pullout", &[]) {
                Ok(ActionValue::Bool(true)) => Ok(ActionValue::Bool(true)),
                _ => table.invoke_vehicle(env, id, "decelerate", &[ActionArg::Number(1.0)]),
            }
        } else if blocked {
            table.invoke_vehicle(env, id, "decelerate", &[ActionArg::Number(1.0)])
        } else {
            table.invoke_vehicle(env, id, "accelerate", &[ActionArg::Number(0.5)])
        };
        if let Err(err) = result {
            debug!("{} rejected: {}", id, err);
        }
    }

    for zone in env.zones() {
        for member in zone.members() {
            let speed = match table.invoke_zone(env, zone.id(), "vehicle/speed", &[ActionArg::Vehicle(member)]) {
                Ok(ActionValue::Number(speed)) => speed,
                _ => continue,
            };
            let excess = speed - zone.allowed_speed();
            if excess > 0.0 {
                let penalty = [ActionArg::Vehicle(member), ActionArg::Number(excess)];
                if let Err(err) = table.invoke_zone(env, zone.id(), "vehicle/penalty", &penalty) {
                    debug!("{} penalty for {} rejected: {}", zone.id(), member, err);
                }
            }
        }
    }
}
