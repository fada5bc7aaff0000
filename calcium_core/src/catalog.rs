//! Catalog of the artifact keys a calcium supplementation artifact holds.
//!
//! Key lists are built once and reused across builds.

use crate::artifact::EntityKey;
use once_cell::sync::Lazy;

pub const LBWSG_RISK: &str = "low_birth_weight_and_short_gestation";

const DEMOGRAPHIC_MEASURES: &[&str] = &[
    "structure",
    "age_bins",
    "theoretical_minimum_risk_life_expectancy",
    "demographic_dimensions",
];

const COVARIATES: &[&str] = &[
    "live_births_by_sex",
    "antenatal_care_1_visit_coverage_proportion",
];
const COVARIATE_MEASURES: &[&str] = &["estimate"];

const DIARRHEAL_MEASURES: &[&str] = &[
    "cause_specific_mortality_rate",
    "excess_mortality_rate",
    "disability_weight",
    "incidence_rate",
    "prevalence",
    "remission_rate",
    "restrictions",
];
const MEASLES_MEASURES: &[&str] = &[
    "cause_specific_mortality_rate",
    "excess_mortality_rate",
    "disability_weight",
    "incidence_rate",
    "prevalence",
    "restrictions",
];
const NEONATAL_MEASURES: &[&str] = &[
    "cause_specific_mortality_rate",
    "excess_mortality_rate",
    "disability_weight",
    "birth_prevalence",
    "prevalence",
    "restrictions",
];

/// Measures written for each modeled cause, in build order
pub const CAUSE_MEASURES: &[(&str, &[&str])] = &[
    ("all_causes", &["cause_specific_mortality_rate"]),
    ("diarrheal_diseases", DIARRHEAL_MEASURES),
    ("lower_respiratory_infections", DIARRHEAL_MEASURES),
    ("measles", MEASLES_MEASURES),
    ("neonatal_sepsis_and_other_neonatal_infections", NEONATAL_MEASURES),
    (
        "neonatal_encephalopathy_due_to_birth_asphyxia_and_trauma",
        NEONATAL_MEASURES,
    ),
    ("hemolytic_disease_and_other_neonatal_jaundice", NEONATAL_MEASURES),
    (
        "neonatal_preterm_birth",
        &[
            "cause_specific_mortality_rate",
            "excess_mortality_rate",
            "disability_weight",
            "restrictions",
        ],
    ),
];

const ALTERNATIVE_RISKS: &[&str] = &["child_wasting", "child_underweight", "child_stunting"];
const ALTERNATIVE_MEASURES: &[&str] = &[
    "exposure",
    "exposure_distribution_weights",
    "exposure_standard_deviation",
];
const RISK_MEASURES: &[&str] = &["relative_risk", "population_attributable_fraction"];

const LBWSG_MEASURES: &[&str] = &["exposure", "population_attributable_fraction", "relative_risk"];
/// LBWSG measures that do not depend on the data's storage version
const LBWSG_METADATA_MEASURES: &[&str] = &["categories", "distribution"];

fn product(entity_type: &str, names: &[&str], measures: &[&str]) -> Vec<EntityKey> {
    names
        .iter()
        .flat_map(move |name| {
            measures
                .iter()
                .map(move |measure| EntityKey::new(entity_type, Some(*name), measure))
        })
        .collect()
}

pub static LOCATIONS_KEY: Lazy<EntityKey> =
    Lazy::new(|| EntityKey::new("metadata", None, "locations"));

pub static DEMOGRAPHIC_KEYS: Lazy<Vec<EntityKey>> = Lazy::new(|| {
    DEMOGRAPHIC_MEASURES
        .iter()
        .map(|measure| EntityKey::new("population", None, measure))
        .collect()
});

pub static COVARIATE_KEYS: Lazy<Vec<EntityKey>> =
    Lazy::new(|| product("covariate", COVARIATES, COVARIATE_MEASURES));

pub static DISEASE_KEYS: Lazy<Vec<EntityKey>> = Lazy::new(|| {
    CAUSE_MEASURES
        .iter()
        .flat_map(|(cause, measures)| product("cause", &[*cause], measures))
        .collect()
});

pub static ALTERNATIVE_RISK_KEYS: Lazy<Vec<EntityKey>> = Lazy::new(|| {
    let mut keys = product("alternative_risk_factor", ALTERNATIVE_RISKS, ALTERNATIVE_MEASURES);
    keys.extend(product("risk_factor", ALTERNATIVE_RISKS, RISK_MEASURES));
    keys
});

/// Version-dependent LBWSG keys
pub static LBWSG_KEYS: Lazy<Vec<EntityKey>> =
    Lazy::new(|| product("risk_factor", &[LBWSG_RISK], LBWSG_MEASURES));

pub static LBWSG_METADATA_KEYS: Lazy<Vec<EntityKey>> =
    Lazy::new(|| product("risk_factor", &[LBWSG_RISK], LBWSG_METADATA_MEASURES));

/// Every data key a complete artifact holds, excluding `metadata.locations`
pub fn data_keys() -> Vec<EntityKey> {
    [
        &*DEMOGRAPHIC_KEYS,
        &*COVARIATE_KEYS,
        &*DISEASE_KEYS,
        &*ALTERNATIVE_RISK_KEYS,
        &*LBWSG_KEYS,
        &*LBWSG_METADATA_KEYS,
    ]
    .into_iter()
    .flatten()
    .cloned()
    .collect()
}
