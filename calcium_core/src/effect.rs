//! Deterministic effect-size sampling.
//!
//! Two levels of uncertainty are drawn:
//! - a single population-level mean, from `Normal(population_mean,
//!   population_sd)` evaluated at one uniform seeded by the purpose key
//! - one value per simulant, from `Normal(population-level draw,
//!   individual_sd)` evaluated at that simulant's uniform for the same key
//!
//! Effect sizes cannot be negative: every result is clamped at zero.

use crate::randomness::RandomnessStream;
use crate::stats::Normal;
use crate::{Result, SimulantId};
use std::collections::BTreeMap;

/// Draw the population-level mean effect for `key`
pub fn population_effect(
    stream: &RandomnessStream,
    mean: f64,
    sd: f64,
    key: &str,
) -> Result<f64> {
    let distribution = Normal::new(mean, sd)?;
    let draw = stream.uniform(key);
    Ok(clamp_effect(distribution.ppf(draw)))
}

/// Draw one effect per simulant around the population-level mean
pub fn individual_effects(
    stream: &RandomnessStream,
    population_mean: f64,
    individual_sd: f64,
    key: &str,
    index: &[SimulantId],
) -> Result<BTreeMap<SimulantId, f64>> {
    let distribution = Normal::new(population_mean, individual_sd)?;

    if individual_sd == 0.0 {
        let effect = clamp_effect(population_mean);
        return Ok(index.iter().map(|id| (*id, effect)).collect());
    }

    let draws = stream.get_draw(index, key);
    Ok(index
        .iter()
        .zip(draws)
        .map(|(id, draw)| (*id, clamp_effect(distribution.ppf(draw))))
        .collect())
}

fn clamp_effect(value: f64) -> f64 {
    if value > 0.0 {
        value
    } else {
        0.0
    }
}
