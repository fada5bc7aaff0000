#![forbid(unsafe_code)]

//! Core domain model and simulation logic for calcium supplementation.
//!
//! This crate provides:
//! - Domain types and configuration
//! - Deterministic randomness streams and effect-size sampling
//! - A fixed-step simulation host (population table, value pipelines, events)
//! - The baseline, intervention and sample history components
//! - Artifact storage and the artifact builder

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod randomness;
pub mod stats;
pub mod effect;
pub mod population;
pub mod pipeline;
pub mod simulation;
pub mod components;
pub mod artifact;
pub mod catalog;
pub mod data_source;
pub mod artifact_builder;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use population::{PopulationTable, Simulant};
pub use pipeline::PipelineValue;
pub use simulation::{Component, RunSummary, Simulation};
pub use artifact::{Artifact, EntityKey};
pub use artifact_builder::{build_artifact, patch_artifact, ReversionedData, WriteSummary};

/// The standard component set: baseline demography, the intervention and
/// the sample history observer
pub fn default_components() -> Vec<Box<dyn Component>> {
    vec![
        Box::new(components::BaselinePopulation::new()),
        Box::new(components::CalciumSupplementationIntervention::new()),
        Box::new(components::SampleHistoryObserver::new()),
    ]
}
