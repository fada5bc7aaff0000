//! Components plugged into the simulation host.
//!
//! - [`baseline`]: demography, mortality and the baseline exposure pipelines
//! - [`intervention`]: calcium supplementation enrollment and exposure shifts
//! - [`observer`]: sample history recording

pub mod baseline;
pub mod intervention;
pub mod observer;

pub use baseline::BaselinePopulation;
pub use intervention::CalciumSupplementationIntervention;
pub use observer::SampleHistoryObserver;

/// Pipeline names shared between components
pub mod pipelines {
    pub const LBWSG_RAW_EXPOSURE: &str = "low_birth_weight_and_short_gestation.raw_exposure";
    pub const LBWSG_EXPOSURE: &str = "low_birth_weight_and_short_gestation.exposure";
    pub const CHILD_STUNTING_EXPOSURE: &str = "child_stunting.exposure";
    pub const CHILD_WASTING_EXPOSURE: &str = "child_wasting.exposure";
    pub const CHILD_UNDERWEIGHT_EXPOSURE: &str = "child_underweight.exposure";
    pub const MORTALITY_RATE: &str = "mortality_rate";
    pub const DISABILITY_WEIGHT: &str = "disability_weight";

    /// Sub-values of the LBWSG exposure table
    pub const BIRTH_WEIGHT: &str = "birth_weight";
    pub const GESTATION_TIME: &str = "gestation_time";

    pub fn incidence_rate(cause: &str) -> String {
        format!("{}.incidence_rate", cause)
    }
}
