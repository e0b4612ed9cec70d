//! Lane Traffic Simulation Library
//!
//! A multi-lane traffic simulation that runs headless; see [`simulation`].

pub mod simulation;
