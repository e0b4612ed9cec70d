//! Simulation context passed explicitly into every constructor
//!
//! Owns what would otherwise be process-wide: the random source, the unit
//! scale and the id counter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::config::SimConfig;
use super::types::{SimId, VehicleId, ZoneId};
use super::units::UnitConfig;

pub struct SimContext {
    config: SimConfig,
    /// Optional seeded RNG for reproducible simulations
    rng: Option<Mutex<StdRng>>,
    next_id: AtomicUsize,
}

impl SimContext {
    pub fn new(config: SimConfig) -> Self {
        let rng = config.seed.map(|seed| Mutex::new(StdRng::seed_from_u64(seed)));
        Self {
            config,
            rng,
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn units(&self) -> UnitConfig {
        self.config.units
    }

    fn next_sim_id(&self) -> SimId {
        SimId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_vehicle_id(&self) -> VehicleId {
        VehicleId(self.next_sim_id())
    }

    pub fn next_zone_id(&self) -> ZoneId {
        ZoneId(self.next_sim_id())
    }

    /// Get a random value in the given range, using seeded RNG if available
    pub fn random_range(&self, range: std::ops::Range<f64>) -> f64 {
        match &self.rng {
            Some(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    /// Get a random index below `bound`
    pub fn random_index(&self, bound: usize) -> usize {
        match &self.rng {
            Some(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .random_range(0..bound),
            None => rand::rng().random_range(0..bound),
        }
    }

    /// Bernoulli draw with probability `p`; NaN never fires
    pub fn random_bool(&self, p: f64) -> bool {
        if p.is_nan() {
            return false;
        }
        let p = p.clamp(0.0, 1.0);
        match &self.rng {
            Some(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .random_bool(p),
            None => rand::rng().random_bool(p),
        }
    }
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_contexts_agree() {
        let a = SimContext::new(SimConfig::default().with_seed(7));
        let b = SimContext::new(SimConfig::default().with_seed(7));
        let first: Vec<f64> = (0..5).map(|_| a.random_range(0.0..1.0)).collect();
        let second: Vec<f64> = (0..5).map(|_| b.random_range(0.0..1.0)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn ids_are_unique_across_kinds() {
        let ctx = SimContext::default();
        let vehicle = ctx.next_vehicle_id();
        let zone = ctx.next_zone_id();
        assert_ne!(vehicle.0, zone.0);
    }

    #[test]
    fn random_bool_tolerates_bad_probabilities() {
        let ctx = SimContext::new(SimConfig::default().with_seed(3));
        assert!(!ctx.random_bool(f64::NAN));
        assert!(ctx.random_bool(f64::INFINITY));
        assert!(!ctx.random_bool(-1.0));
    }
}
