use std::process::{Command, Output};

fn run_headless(extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lane_traffic"))
        .args(["--ticks", "120", "--interval-ms", "0", "--seed", "42"])
        .args(extra)
        .env("RUST_LOG", "warn,lane_traffic=info")
        .output()
        .expect("Failed to execute simulation")
}

/// Parses the number following `label` in the logged statistics block
fn statistic(stderr: &str, label: &str) -> u64 {
    let line = stderr
        .lines()
        .find(|line| line.contains(label))
        .unwrap_or_else(|| panic!("Could not find '{}' line", label));

    let parts: Vec<&str> = line.split(label).collect();
    parts
        .get(1)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or_else(|| panic!("Could not parse '{}' from line: {}", label, line))
}

/// Test that the simulation runs in headless mode without crashing
#[test]
fn test_headless_simulation_runs() {
    let output = run_headless(&[]);

    assert!(
        output.status.success(),
        "Simulation failed to run. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("SIMULATION COMPLETE"),
        "Simulation did not complete properly. stderr: {}",
        stderr
    );
}

/// Test that simulation statistics are logged
#[test]
fn test_simulation_statistics_logged() {
    let output = run_headless(&[]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    for label in [
        "Total vehicles spawned:",
        "Total vehicles finished:",
        "Active vehicles:",
        "Collisions:",
        "Max penalty:",
    ] {
        assert!(stderr.contains(label), "Missing '{}' statistic", label);
    }
}

/// Test that vehicles enter the track and some of them leave it again
#[test]
fn test_vehicles_spawn_and_finish() {
    // 150 m track so vehicles reach the end within the run
    let output = run_headless(&["--length-km", "0.15"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    let spawned = statistic(&stderr, "Total vehicles spawned:");
    let finished = statistic(&stderr, "Total vehicles finished:");
    let active = statistic(&stderr, "Active vehicles:");

    assert!(spawned > 0, "No vehicles were spawned during simulation");
    assert!(finished > 0, "No vehicle reached the end of the track");
    assert!(finished + active <= spawned);
}

/// Test that a speed zone makes fast vehicles collect penalties
#[test]
fn test_speed_zone_penalizes() {
    let output = run_headless(&["--length-km", "0.3", "--zone-speed", "5", "--spawn-rate", "0.5"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr
        .lines()
        .find(|line| line.contains("Max penalty:"))
        .expect("Could not find 'Max penalty' line");
    assert!(
        !line.contains("none"),
        "No penalty was recorded inside the zone: {}",
        line
    );
}

/// Test that an invalid track is rejected with an error exit
#[test]
fn test_empty_track_fails() {
    let output = run_headless(&["--lanes-forward", "0", "--lanes-backward", "0"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to initialize the track"),
        "Missing error context. stderr: {}",
        stderr
    );
}

/// Test that a spawn rate outside [0, 1] is rejected by the CLI
#[test]
fn test_invalid_spawn_rate_rejected() {
    for rate in ["NaN", "inf", "1.5"] {
        let output = run_headless(&["--spawn-rate", rate]);
        assert!(!output.status.success(), "Spawn rate {} was accepted", rate);

        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            stderr.contains("not a probability"),
            "Missing rate error for {}. stderr: {}",
            rate,
            stderr
        );
    }
}
