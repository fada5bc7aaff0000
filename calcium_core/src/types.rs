//! Core domain types for the calcium supplementation simulation.
//!
//! This module defines the fundamental types shared by the host and the
//! components:
//! - Simulant identifiers and enumerated column values
//! - Cell values read back from the population table
//! - Effect-size parameters for the supplementation shifts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Simulant Identity
// ============================================================================

/// Opaque identifier of one simulated individual
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulantId(pub u64);

impl fmt::Display for SimulantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Enumerated Columns
// ============================================================================

/// Calcium supplementation treatment status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentStatus {
    #[default]
    NotTreated,
    Treated,
}

impl TreatmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentStatus::NotTreated => "not_treated",
            TreatmentStatus::Treated => "treated",
        }
    }

    pub fn is_treated(&self) -> bool {
        matches!(self, TreatmentStatus::Treated)
    }
}

/// Sex of a simulant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Female => "Female",
            Sex::Male => "Male",
        }
    }
}

// ============================================================================
// Cell Values
// ============================================================================

/// A single value read from a population column or a pipeline output
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Float(f64),
    Bool(bool),
    Text(String),
    Time(Option<DateTime<Utc>>),
}

impl Cell {
    /// Render the cell the way it is written to tabular output
    pub fn render(&self) -> String {
        match self {
            Cell::Float(v) => v.to_string(),
            Cell::Bool(v) => v.to_string(),
            Cell::Text(v) => v.clone(),
            Cell::Time(Some(t)) => t.to_rfc3339(),
            Cell::Time(None) => String::new(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(v) => Some(*v),
            _ => None,
        }
    }
}

// ============================================================================
// Effect-Size Parameters
// ============================================================================

/// Population-level uncertainty around a shift
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationShift {
    #[serde(default = "default_shift_mean")]
    pub mean: f64,
    #[serde(default = "default_shift_sd")]
    pub sd: f64,
}

impl Default for PopulationShift {
    fn default() -> Self {
        Self {
            mean: default_shift_mean(),
            sd: default_shift_sd(),
        }
    }
}

/// Individual-level variation around the population-level draw
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndividualShift {
    #[serde(default = "default_shift_sd")]
    pub sd: f64,
}

impl Default for IndividualShift {
    fn default() -> Self {
        Self {
            sd: default_shift_sd(),
        }
    }
}

/// Parameters of one exposure channel's effect size
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectShift {
    #[serde(default)]
    pub population: PopulationShift,
    #[serde(default)]
    pub individual: IndividualShift,
}

fn default_shift_mean() -> f64 {
    0.5
}

fn default_shift_sd() -> f64 {
    0.25
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_treatment_status_strings() {
        assert_eq!(TreatmentStatus::default(), TreatmentStatus::NotTreated);
        assert_eq!(TreatmentStatus::Treated.as_str(), "treated");
        assert!(TreatmentStatus::Treated.is_treated());
        assert!(!TreatmentStatus::NotTreated.is_treated());
    }

    #[test]
    fn test_effect_shift_fills_missing_fields() {
        let shift: EffectShift = toml::from_str("[population]\nmean = 10.0\n").unwrap();
        assert_eq!(shift.population.mean, 10.0);
        assert_eq!(shift.population.sd, 0.25);
        assert_eq!(shift.individual, IndividualShift { sd: 0.25 });

        let shift: EffectShift = toml::from_str("").unwrap();
        assert_eq!(shift, EffectShift::default());
        assert_eq!(shift.population.mean, 0.5);
    }

    #[test]
    fn test_cell_render() {
        assert_eq!(Cell::Float(1.5).render(), "1.5");
        assert_eq!(Cell::Bool(true).render(), "true");
        assert_eq!(Cell::Time(None).render(), "");
        assert_eq!(Cell::Text("treated".into()).render(), "treated");
    }
}
