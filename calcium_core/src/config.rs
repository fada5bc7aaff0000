//! Configuration file support for calsup.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/calsup/config.toml`. Every
//! field has a default so partial files are accepted; [`Config::validate`]
//! must pass before any component is set up.

use crate::types::EffectShift;
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub time: TimeConfig,

    #[serde(default)]
    pub randomness: RandomnessConfig,

    #[serde(default)]
    pub population: PopulationConfig,

    #[serde(default)]
    pub baseline: BaselineConfig,

    #[serde(default, rename = "calcium_supplementation_intervention")]
    pub intervention: InterventionConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub artifact: ArtifactConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Simulation clock configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(default = "default_start")]
    pub start: NaiveDate,

    #[serde(default = "default_end")]
    pub end: NaiveDate,

    #[serde(default = "default_step_size_days")]
    pub step_size_days: i64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            step_size_days: default_step_size_days(),
        }
    }
}

impl TimeConfig {
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn step_size(&self) -> Result<Duration> {
        Duration::try_days(self.step_size_days).ok_or_else(|| {
            Error::Config(format!(
                "step_size_days {} is out of range",
                self.step_size_days
            ))
        })
    }
}

/// Randomness configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RandomnessConfig {
    #[serde(default)]
    pub seed: u64,
}

/// Population size configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PopulationConfig {
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,

    #[serde(default = "default_births_per_step")]
    pub births_per_step: usize,

    /// Upper bound (years) of the uniform age of the initial population
    #[serde(default = "default_initial_age_max")]
    pub initial_age_max: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            births_per_step: default_births_per_step(),
            initial_age_max: default_initial_age_max(),
        }
    }
}

/// Mean and standard deviation of a normally distributed quantity
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct NormalParams {
    pub mean: f64,
    pub sd: f64,
}

/// Baseline exposures and rates supplied by the host-side components
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// grams
    #[serde(default = "default_birth_weight")]
    pub birth_weight: NormalParams,

    /// weeks
    #[serde(default = "default_gestation_time")]
    pub gestation_time: NormalParams,

    /// Annual cause-specific mortality rates
    #[serde(default = "default_mortality_rates")]
    pub mortality_rates: BTreeMap<String, f64>,

    /// Annual cause-specific incidence rates
    #[serde(default = "default_incidence_rates")]
    pub incidence_rates: BTreeMap<String, f64>,

    #[serde(default = "default_disability_weight")]
    pub disability_weight: f64,

    /// Theoretical minimum risk life expectancy used for years of life lost
    #[serde(default = "default_life_expectancy")]
    pub life_expectancy: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            birth_weight: default_birth_weight(),
            gestation_time: default_gestation_time(),
            mortality_rates: default_mortality_rates(),
            incidence_rates: default_incidence_rates(),
            disability_weight: default_disability_weight(),
            life_expectancy: default_life_expectancy(),
        }
    }
}

/// Antenatal care coverage estimate (proportions)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoverageEstimate {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Who is eligible to be drawn into treatment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EnrollmentPolicy {
    /// Every simulant created after the start time is eligible
    #[default]
    Proportion,
    /// Only simulants whose mother had an antenatal care visit are eligible
    AntenatalCare { coverage: CoverageEstimate },
}

/// Calcium supplementation intervention parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterventionConfig {
    #[serde(default = "default_proportion")]
    pub proportion: f64,

    /// grams
    #[serde(default)]
    pub birth_weight_shift: EffectShift,

    /// weeks
    #[serde(default)]
    pub gestation_time_shift: EffectShift,

    /// z-score
    #[serde(default)]
    pub stunting_shift: f64,

    /// z-score
    #[serde(default)]
    pub wasting_shift: f64,

    /// z-score
    #[serde(default)]
    pub underweight_shift: f64,

    #[serde(default)]
    pub enrollment: EnrollmentPolicy,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            proportion: default_proportion(),
            birth_weight_shift: EffectShift::default(),
            gestation_time_shift: EffectShift::default(),
            stunting_shift: 0.0,
            wasting_shift: 0.0,
            underweight_shift: 0.0,
            enrollment: EnrollmentPolicy::default(),
        }
    }
}

impl InterventionConfig {
    /// Reject out-of-range proportions and negative shift parameters
    pub fn validate(&self) -> Result<()> {
        if !self.proportion.is_finite() || !(0.0..=1.0).contains(&self.proportion) {
            return Err(Error::Config(format!(
                "The proportion for calcium supplementation intervention must be between 0 and 1. You specified {}.",
                self.proportion
            )));
        }

        for (name, shift) in [
            ("birth_weight_shift", &self.birth_weight_shift),
            ("gestation_time_shift", &self.gestation_time_shift),
        ] {
            let params = [
                ("population.mean", shift.population.mean),
                ("population.sd", shift.population.sd),
                ("individual.sd", shift.individual.sd),
            ];
            for (field, value) in params {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::Config(format!(
                        "{}.{} must be non-negative, got {}",
                        name, field, value
                    )));
                }
            }
        }

        for (name, value) in [
            ("stunting_shift", self.stunting_shift),
            ("wasting_shift", self.wasting_shift),
            ("underweight_shift", self.underweight_shift),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "Additive shift for {} must be positive, got {}",
                    name, value
                )));
            }
        }

        if let EnrollmentPolicy::AntenatalCare { coverage } = &self.enrollment {
            let ordered = 0.0 <= coverage.lower
                && coverage.lower <= coverage.mean
                && coverage.mean <= coverage.upper
                && coverage.upper <= 1.0;
            if !ordered {
                return Err(Error::Config(format!(
                    "Antenatal care coverage must satisfy 0 <= lower <= mean <= upper <= 1, got {:?}",
                    coverage
                )));
            }
        }

        Ok(())
    }
}

/// A pipeline recorded by the sample history observer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ObservedPipeline {
    /// Output column name
    pub column: String,
    /// Pipeline to read
    pub pipeline: String,
}

/// Sample history observer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleHistoryConfig {
    /// `0` samples the whole initial population
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Defaults to `<data_dir>/sample_history.csv`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Top-level key of a `.json` output. A CSV file holds the single
    /// history table, so the key is not written there.
    #[serde(default = "default_history_key")]
    pub key: String,

    #[serde(default = "default_observed_pipelines")]
    pub pipelines: Vec<ObservedPipeline>,

    /// Columns whose table-valued pipeline output is summed into one value
    #[serde(default = "default_summed_pipelines")]
    pub summed_pipelines: Vec<String>,

    #[serde(default = "default_observed_columns")]
    pub columns: Vec<String>,
}

impl Default for SampleHistoryConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            path: None,
            key: default_history_key(),
            pipelines: default_observed_pipelines(),
            summed_pipelines: default_summed_pipelines(),
            columns: default_observed_columns(),
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub sample_history_observer: SampleHistoryConfig,
}

/// Artifact building configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Defaults to `<data_dir>/artifacts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Defaults to `<data_dir>/inputs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_dir: Option<PathBuf>,

    /// Locations whose LBWSG data must come from a reversioned artifact
    #[serde(default = "default_reversioned_locations")]
    pub reversioned_locations: Vec<String>,

    /// Defaults to `<data_dir>/lbwsg`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversioned_dir: Option<PathBuf>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            input_dir: None,
            reversioned_locations: default_reversioned_locations(),
            reversioned_dir: None,
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|_| PathBuf::from("."))
    });
    base.join("calsup")
}

fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default()
}

fn default_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 12, 31).unwrap_or_default()
}

fn default_step_size_days() -> i64 {
    1
}

fn default_initial_size() -> usize {
    1000
}

fn default_births_per_step() -> usize {
    10
}

fn default_initial_age_max() -> f64 {
    5.0
}

fn default_birth_weight() -> NormalParams {
    NormalParams {
        mean: 3000.0,
        sd: 500.0,
    }
}

fn default_gestation_time() -> NormalParams {
    NormalParams {
        mean: 39.0,
        sd: 2.0,
    }
}

fn default_mortality_rates() -> BTreeMap<String, f64> {
    [
        ("diarrheal_diseases", 0.02),
        ("lower_respiratory_infections", 0.03),
        ("measles", 0.005),
        ("other_causes", 0.01),
    ]
    .into_iter()
    .map(|(cause, rate)| (cause.to_string(), rate))
    .collect()
}

fn default_incidence_rates() -> BTreeMap<String, f64> {
    [
        ("diarrheal_diseases", 2.5),
        ("lower_respiratory_infections", 0.4),
        ("measles", 0.01),
    ]
    .into_iter()
    .map(|(cause, rate)| (cause.to_string(), rate))
    .collect()
}

fn default_disability_weight() -> f64 {
    0.01
}

fn default_life_expectancy() -> f64 {
    86.6
}

fn default_proportion() -> f64 {
    0.5
}

fn default_sample_size() -> usize {
    1000
}

fn default_history_key() -> String {
    "histories".into()
}

fn default_observed_pipelines() -> Vec<ObservedPipeline> {
    [
        ("mortality_rate", "mortality_rate"),
        ("disability_weight", "disability_weight"),
        (
            "low_birth_weight_and_short_gestation_exposure",
            "low_birth_weight_and_short_gestation.exposure",
        ),
        (
            "diarrheal_diseases_incidence_rate",
            "diarrheal_diseases.incidence_rate",
        ),
        (
            "lower_respiratory_infections_incidence_rate",
            "lower_respiratory_infections.incidence_rate",
        ),
        ("measles_incidence_rate", "measles.incidence_rate"),
    ]
    .into_iter()
    .map(|(column, pipeline)| ObservedPipeline {
        column: column.into(),
        pipeline: pipeline.into(),
    })
    .collect()
}

fn default_summed_pipelines() -> Vec<String> {
    vec!["mortality_rate".into()]
}

fn default_observed_columns() -> Vec<String> {
    vec![
        "alive".into(),
        "age".into(),
        "sex".into(),
        "entrance_time".into(),
        "exit_time".into(),
        "cause_of_death".into(),
        "years_lived_with_disability".into(),
        "years_of_life_lost".into(),
        "calcium_supplementation_treatment_status".into(),
    ]
}

fn default_reversioned_locations() -> Vec<String> {
    vec!["Mali".into()]
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        base.join("calsup").join("config.toml")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Precondition check run before any component setup
    pub fn validate(&self) -> Result<()> {
        if self.time.step_size_days <= 0 {
            return Err(Error::Config(format!(
                "step_size_days must be positive, got {}",
                self.time.step_size_days
            )));
        }
        if self.time.end < self.time.start {
            return Err(Error::Config(format!(
                "Simulation end {} is before start {}",
                self.time.end, self.time.start
            )));
        }
        // The last step is tested against the end time, so end + step must exist
        let step_size = self.time.step_size()?;
        if self
            .time
            .end_time()
            .checked_add_signed(step_size)
            .is_none()
        {
            return Err(Error::Config(format!(
                "step_size_days {} overflows the calendar after {}",
                self.time.step_size_days, self.time.end
            )));
        }

        let baseline = &self.baseline;
        for (name, params) in [
            ("birth_weight", baseline.birth_weight),
            ("gestation_time", baseline.gestation_time),
        ] {
            if !params.sd.is_finite() || params.sd < 0.0 {
                return Err(Error::Config(format!(
                    "baseline.{}.sd must be non-negative, got {}",
                    name, params.sd
                )));
            }
        }
        for (cause, rate) in baseline
            .mortality_rates
            .iter()
            .chain(baseline.incidence_rates.iter())
        {
            if !rate.is_finite() || *rate < 0.0 {
                return Err(Error::Config(format!(
                    "Rate for {} must be non-negative, got {}",
                    cause, rate
                )));
            }
        }

        self.intervention.validate()
    }

    /// Output path of the sample history observer
    pub fn sample_history_path(&self) -> PathBuf {
        self.metrics
            .sample_history_observer
            .path
            .clone()
            .unwrap_or_else(|| self.data.data_dir.join("sample_history.csv"))
    }

    pub fn artifact_output_dir(&self) -> PathBuf {
        self.artifact
            .output_dir
            .clone()
            .unwrap_or_else(|| self.data.data_dir.join("artifacts"))
    }

    pub fn artifact_input_dir(&self) -> PathBuf {
        self.artifact
            .input_dir
            .clone()
            .unwrap_or_else(|| self.data.data_dir.join("inputs"))
    }

    pub fn reversioned_dir(&self) -> PathBuf {
        self.artifact
            .reversioned_dir
            .clone()
            .unwrap_or_else(|| self.data.data_dir.join("lbwsg"))
    }
}
