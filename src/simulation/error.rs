//! Error types for configuration and command failures
//!
//! Contention (an occupied cell, a blocked lane) is not an error; those
//! outcomes are reported as `bool` by the grid operations.

use thiserror::Error;

use super::types::{VehicleId, ZoneId};

/// Errors produced when a command or configuration is rejected
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error("world is already initialized")]
    AlreadyInitialized,
    #[error("world is not initialized")]
    NotInitialized,
    #[error("environment has been released")]
    Released,
    #[error("invalid grid dimensions: {lanes} lanes x {cells} cells")]
    InvalidDimensions { lanes: usize, cells: usize },
    #[error("{0}")]
    InvalidVehicle(String),
    #[error("invalid zone bounds: {0}")]
    InvalidZone(String),
    #[error("lane {lane} is outside of [0, {lanes})")]
    LaneOutOfRange { lane: i64, lanes: usize },
    #[error("cannot increment speed of {vehicle}: {requested:.2} exceeds {limit:.2}")]
    SpeedAboveMaximum {
        vehicle: VehicleId,
        requested: f64,
        limit: f64,
    },
    #[error("cannot decrement speed of {vehicle}: {requested:.2} is below zero")]
    SpeedBelowZero { vehicle: VehicleId, requested: f64 },
    #[error("strength {0} is outside of [0, 1]")]
    InvalidStrength(f64),
    #[error("penalty value {0} must be a non-negative number")]
    InvalidPenalty(f64),
    #[error("a user vehicle is already active")]
    UserVehicleActive,
    #[error("unknown {0}")]
    UnknownVehicle(VehicleId),
    #[error("unknown {0}")]
    UnknownZone(ZoneId),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("action {name} expects {expected} arguments, got {actual}")]
    Arity {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("action {name} argument {index} has the wrong type")]
    ArgumentType { name: &'static str, index: usize },
}

pub type SimResult<T> = Result<T, SimError>;
