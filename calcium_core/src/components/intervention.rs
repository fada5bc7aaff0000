//! Calcium supplementation during pregnancy.
//!
//! At creation time each batch is split into treated and untreated
//! simulants. Treated simulants have their birth weight and gestation time
//! exposures shifted by a per-simulant effect size, and the stunting,
//! wasting and underweight exposures shifted by fixed amounts.
//!
//! Batches created at or before the simulation start time are never
//! enrolled. Per-simulant effect sizes are stored in population columns
//! keyed by simulant id and never rewritten.

use super::pipelines::*;
use crate::config::{EnrollmentPolicy, InterventionConfig};
use crate::effect::{individual_effects, population_effect};
use crate::pipeline::PipelineValue;
use crate::population::{
    PopulationTable, PopulationView, SimulantData, ANTENATAL_CARE_VISIT, BIRTH_WEIGHT_EFFECT,
    GESTATION_TIME_EFFECT, TREATMENT_STATUS,
};
use crate::randomness::RandomnessStream;
use crate::simulation::{Builder, Component};
use crate::stats::Triangular;
use crate::{Cell, Error, Result, SimulantId, TreatmentStatus};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub const NAME: &str = "calcium_supplementation_intervention";

const CREATED_COLUMNS: &[&str] = &[
    TREATMENT_STATUS,
    ANTENATAL_CARE_VISIT,
    BIRTH_WEIGHT_EFFECT,
    GESTATION_TIME_EFFECT,
];

struct InterventionState {
    config: InterventionConfig,
    start_time: DateTime<Utc>,
    enrollment_randomness: RandomnessStream,
    effect_randomness: RandomnessStream,
    view: PopulationView,
    population_birth_weight_mean: f64,
    population_gestation_time_mean: f64,
    /// Drawn once when enrollment is gated on an antenatal care visit
    antenatal_care_coverage: Option<f64>,
}

/// The calcium supplementation intervention component
#[derive(Default)]
pub struct CalciumSupplementationIntervention {
    state: Option<InterventionState>,
}

impl CalciumSupplementationIntervention {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<&InterventionState> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::Simulation(format!("{} used before setup", NAME)))
    }
}

impl Component for CalciumSupplementationIntervention {
    fn name(&self) -> &str {
        NAME
    }

    fn setup(&mut self, builder: &mut Builder<'_>) -> Result<()> {
        let config = builder.configuration.intervention.clone();
        config.validate()?;

        let enrollment_randomness =
            builder.get_stream("calcium_supplementation_intervention_enrollment")?;
        let effect_randomness = builder.get_stream("effect_draw")?;

        builder.initializes_simulants(CREATED_COLUMNS)?;
        let view = builder.get_view(CREATED_COLUMNS)?;

        let lbwsg_view = view.clone();
        builder.register_value_modifier(
            LBWSG_RAW_EXPOSURE,
            Box::new(move |index, ctx, exposure| {
                adjust_lbwsg(index, ctx.population, &lbwsg_view, exposure)
            }),
        );
        for (pipeline, shift) in [
            (CHILD_STUNTING_EXPOSURE, config.stunting_shift),
            (CHILD_WASTING_EXPOSURE, config.wasting_shift),
            (CHILD_UNDERWEIGHT_EXPOSURE, config.underweight_shift),
        ] {
            let shift_view = view.clone();
            builder.register_value_modifier(
                pipeline,
                Box::new(move |index, ctx, exposure| {
                    shift_exposure(index, ctx.population, &shift_view, shift, exposure)
                }),
            );
        }

        let population_birth_weight_mean = population_effect(
            &effect_randomness,
            config.birth_weight_shift.population.mean,
            config.birth_weight_shift.population.sd,
            "population_birth_weight",
        )?;
        let population_gestation_time_mean = population_effect(
            &effect_randomness,
            config.gestation_time_shift.population.mean,
            config.gestation_time_shift.population.sd,
            "population_gestation_time",
        )?;

        let antenatal_care_coverage = match &config.enrollment {
            EnrollmentPolicy::Proportion => None,
            EnrollmentPolicy::AntenatalCare { coverage } => {
                let distribution = Triangular::new(coverage.lower, coverage.mean, coverage.upper)?;
                Some(distribution.ppf(enrollment_randomness.uniform("antenatal_care_coverage")))
            }
        };

        tracing::info!(
            "Calcium supplementation: proportion {}, population birth weight shift {:.4}, gestation time shift {:.4}",
            config.proportion,
            population_birth_weight_mean,
            population_gestation_time_mean
        );
        if let Some(coverage) = antenatal_care_coverage {
            tracing::info!("Antenatal care coverage drawn as {:.4}", coverage);
        }

        self.state = Some(InterventionState {
            config,
            start_time: builder.start_time(),
            enrollment_randomness,
            effect_randomness,
            view,
            population_birth_weight_mean,
            population_gestation_time_mean,
            antenatal_care_coverage,
        });
        Ok(())
    }

    fn on_initialize_simulants(
        &mut self,
        pop_data: &SimulantData,
        population: &mut PopulationTable,
    ) -> Result<()> {
        let state = self.state()?;
        let index = &pop_data.index;

        let visited: Vec<bool> = match state.antenatal_care_coverage {
            Some(coverage) => state
                .enrollment_randomness
                .get_draw(index, "antenatal_care_visit")
                .into_iter()
                .map(|d| d < coverage)
                .collect(),
            None => vec![false; index.len()],
        };

        let treated = if pop_data.creation_time > state.start_time {
            let eligible: Vec<SimulantId> = match state.config.enrollment {
                EnrollmentPolicy::Proportion => index.clone(),
                EnrollmentPolicy::AntenatalCare { .. } => index
                    .iter()
                    .zip(&visited)
                    .filter(|(_, v)| **v)
                    .map(|(id, _)| *id)
                    .collect(),
            };
            state
                .enrollment_randomness
                .filter_for_probability(&eligible, state.config.proportion, "enrollment")
                .into_iter()
                .collect()
        } else {
            HashSet::new()
        };

        let statuses = index
            .iter()
            .map(|id| {
                let status = if treated.contains(id) {
                    TreatmentStatus::Treated
                } else {
                    TreatmentStatus::NotTreated
                };
                Cell::Text(status.as_str().into())
            })
            .collect();

        let birth_weight_effects = individual_effects(
            &state.effect_randomness,
            state.population_birth_weight_mean,
            state.config.birth_weight_shift.individual.sd,
            "individual_birth_weight",
            index,
        )?;
        let gestation_time_effects = individual_effects(
            &state.effect_randomness,
            state.population_gestation_time_mean,
            state.config.gestation_time_shift.individual.sd,
            "individual_gestation_time",
            index,
        )?;

        state
            .view
            .update(population, index, TREATMENT_STATUS, statuses)?;
        state.view.update(
            population,
            index,
            ANTENATAL_CARE_VISIT,
            visited.into_iter().map(Cell::Bool).collect(),
        )?;
        state.view.update(
            population,
            index,
            BIRTH_WEIGHT_EFFECT,
            index
                .iter()
                .map(|id| Cell::Float(birth_weight_effects[id]))
                .collect(),
        )?;
        state.view.update(
            population,
            index,
            GESTATION_TIME_EFFECT,
            index
                .iter()
                .map(|id| Cell::Float(gestation_time_effects[id]))
                .collect(),
        )?;

        tracing::debug!(
            "Enrolled {} of {} simulants created at {}",
            treated.len(),
            index.len(),
            pop_data.creation_time
        );
        Ok(())
    }
}

fn treated_mask(
    view: &PopulationView,
    population: &PopulationTable,
    index: &[SimulantId],
) -> Result<Vec<bool>> {
    let treated = TreatmentStatus::Treated.as_str();
    Ok(view
        .column(population, index, TREATMENT_STATUS)?
        .iter()
        .map(|cell| matches!(cell, Cell::Text(status) if status == treated))
        .collect())
}

fn effect_column(
    view: &PopulationView,
    population: &PopulationTable,
    index: &[SimulantId],
    column: &str,
) -> Result<Vec<f64>> {
    view.column(population, index, column)?
        .iter()
        .map(|cell| {
            cell.as_f64()
                .ok_or_else(|| Error::Population(format!("{} holds {:?}", column, cell)))
        })
        .collect()
}

/// Shift birth weight and gestation time by each treated simulant's effect
pub fn adjust_lbwsg(
    index: &[SimulantId],
    population: &PopulationTable,
    view: &PopulationView,
    exposure: PipelineValue,
) -> Result<PipelineValue> {
    let mut table = match exposure {
        PipelineValue::Table(table) => table,
        PipelineValue::Scalar(_) => {
            return Err(Error::Pipeline(format!(
                "{} must have {} and {} sub-values",
                LBWSG_RAW_EXPOSURE, BIRTH_WEIGHT, GESTATION_TIME
            )));
        }
    };

    let treated = treated_mask(view, population, index)?;
    for (column, effect) in [
        (BIRTH_WEIGHT, BIRTH_WEIGHT_EFFECT),
        (GESTATION_TIME, GESTATION_TIME_EFFECT),
    ] {
        let effects = effect_column(view, population, index, effect)?;
        let values = table.get_mut(column).ok_or_else(|| {
            Error::Pipeline(format!("{} is missing {}", LBWSG_RAW_EXPOSURE, column))
        })?;
        for ((value, effect), treated) in values.iter_mut().zip(effects).zip(&treated) {
            if *treated {
                *value += effect;
            }
        }
    }
    Ok(PipelineValue::Table(table))
}

/// Add a fixed shift to each treated simulant's exposure
pub fn shift_exposure(
    index: &[SimulantId],
    population: &PopulationTable,
    view: &PopulationView,
    shift: f64,
    exposure: PipelineValue,
) -> Result<PipelineValue> {
    let treated = treated_mask(view, population, index)?;
    match exposure {
        PipelineValue::Scalar(values) => Ok(PipelineValue::Scalar(
            values
                .into_iter()
                .zip(treated)
                .map(|(v, t)| if t { v + shift } else { v })
                .collect(),
        )),
        PipelineValue::Table(_) => Err(Error::Pipeline(
            "Fixed exposure shifts apply to scalar exposures only".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::BaselinePopulation;
    use crate::config::CoverageEstimate;
    use crate::{Config, Simulation};
    use chrono::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.time.end = config.time.start + Duration::days(30);
        config.population.births_per_step = 0;
        config
    }

    fn simulation(config: Config) -> Simulation {
        Simulation::new(
            config,
            vec![
                Box::new(BaselinePopulation::new()),
                Box::new(CalciumSupplementationIntervention::new()),
            ],
        )
        .unwrap()
    }

    fn after_start(sim: &Simulation) -> DateTime<Utc> {
        sim.clock() + Duration::days(1)
    }

    fn count_treated(sim: &Simulation, index: &[SimulantId]) -> usize {
        sim.population()
            .treated_mask(index)
            .unwrap()
            .into_iter()
            .filter(|t| *t)
            .count()
    }

    #[test]
    fn test_batch_at_start_is_never_treated() {
        let mut config = config();
        config.intervention.proportion = 1.0;
        let mut sim = simulation(config);
        let index = sim.initialize_population(500).unwrap();
        assert_eq!(count_treated(&sim, &index), 0);
    }

    #[test]
    fn test_proportion_zero_and_one() {
        let mut config = config();
        config.intervention.proportion = 0.0;
        let mut sim = simulation(config.clone());
        let when = after_start(&sim);
        let index = sim.create_simulants(500, when).unwrap();
        assert_eq!(count_treated(&sim, &index), 0);

        config.intervention.proportion = 1.0;
        let mut sim = simulation(config);
        let index = sim.create_simulants(500, when).unwrap();
        assert_eq!(count_treated(&sim, &index), 500);
    }

    #[test]
    fn test_half_enrollment_within_binomial_band() {
        let mut sim = simulation(config());
        let when = after_start(&sim);
        let index = sim.create_simulants(10_000, when).unwrap();
        let treated = count_treated(&sim, &index) as f64;
        // 99% band: 5000 +/- 2.576 * sqrt(10000 * 0.5 * 0.5)
        let half_width = 2.576 * 50.0;
        assert!(
            (treated - 5000.0).abs() <= half_width,
            "treated = {}",
            treated
        );
    }

    #[test]
    fn test_antenatal_care_gates_enrollment() {
        let mut config = config();
        config.intervention.proportion = 1.0;
        config.intervention.enrollment = EnrollmentPolicy::AntenatalCare {
            coverage: CoverageEstimate {
                mean: 0.6,
                lower: 0.5,
                upper: 0.7,
            },
        };
        let mut sim = simulation(config);
        let when = after_start(&sim);
        let index = sim.create_simulants(2000, when).unwrap();

        let mut visited = 0;
        for id in &index {
            let simulant = sim.population().get(*id).unwrap();
            if simulant.treatment_status.is_treated() {
                assert!(simulant.antenatal_care_visit);
            }
            if simulant.antenatal_care_visit {
                visited += 1;
                assert!(simulant.treatment_status.is_treated());
            }
        }
        let share = visited as f64 / 2000.0;
        assert!((0.45..0.75).contains(&share), "share = {}", share);
    }

    #[test]
    fn test_effect_columns_assigned_once() {
        let mut sim = simulation(config());
        let when = after_start(&sim);
        let first = sim.create_simulants(50, when).unwrap();
        let before: Vec<f64> = first
            .iter()
            .map(|id| sim.population().get(*id).unwrap().birth_weight_effect)
            .collect();

        sim.create_simulants(50, when + Duration::days(1)).unwrap();
        let after: Vec<f64> = first
            .iter()
            .map(|id| sim.population().get(*id).unwrap().birth_weight_effect)
            .collect();
        assert_eq!(before, after);
        assert!(after.iter().all(|e| *e >= 0.0));
    }

    #[test]
    fn test_lbwsg_shift_applies_only_to_treated() {
        let mut sim = simulation(config());
        let when = after_start(&sim);
        let index = sim.create_simulants(400, when).unwrap();

        let source = sim
            .pipelines()
            .source_value(LBWSG_RAW_EXPOSURE, &index, sim.population(), sim.clock())
            .unwrap();
        let adjusted = sim.get_value(LBWSG_RAW_EXPOSURE, &index).unwrap();
        let (source, adjusted) = match (source, adjusted) {
            (PipelineValue::Table(s), PipelineValue::Table(a)) => (s, a),
            _ => panic!("Expected tables"),
        };

        for (i, id) in index.iter().enumerate() {
            let simulant = sim.population().get(*id).unwrap();
            let expected_bw = if simulant.treatment_status.is_treated() {
                source[BIRTH_WEIGHT][i] + simulant.birth_weight_effect
            } else {
                source[BIRTH_WEIGHT][i]
            };
            let expected_gt = if simulant.treatment_status.is_treated() {
                source[GESTATION_TIME][i] + simulant.gestation_time_effect
            } else {
                source[GESTATION_TIME][i]
            };
            assert_eq!(adjusted[BIRTH_WEIGHT][i], expected_bw);
            assert_eq!(adjusted[GESTATION_TIME][i], expected_gt);
        }
    }

    #[test]
    fn test_fixed_shift_on_stunting() {
        let mut config = config();
        config.intervention.stunting_shift = 0.3;
        config.intervention.proportion = 1.0;
        let mut sim = simulation(config);
        let when = after_start(&sim);
        let treated = sim.create_simulants(10, when).unwrap();
        let untreated = sim.initialize_population(10).unwrap();

        for (index, shift) in [(treated, 0.3), (untreated, 0.0)] {
            let source = sim
                .pipelines()
                .source_value(CHILD_STUNTING_EXPOSURE, &index, sim.population(), sim.clock())
                .unwrap()
                .sum_columns(index.len());
            let adjusted = sim
                .get_value(CHILD_STUNTING_EXPOSURE, &index)
                .unwrap()
                .sum_columns(index.len());
            for (s, a) in source.iter().zip(&adjusted) {
                assert!((a - s - shift).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_zero_individual_sd_gives_uniform_effects() {
        let mut config = config();
        config.intervention.gestation_time_shift.individual.sd = 0.0;
        let mut sim = simulation(config);
        let when = after_start(&sim);
        let index = sim.create_simulants(100, when).unwrap();
        let effects: HashSet<u64> = index
            .iter()
            .map(|id| sim.population().get(*id).unwrap().gestation_time_effect.to_bits())
            .collect();
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_same_seed_reproduces_enrollment() {
        let run = || {
            let mut sim = simulation(config());
            let when = after_start(&sim);
            let index = sim.create_simulants(300, when).unwrap();
            sim.population().treated_mask(&index).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_shift_exposure_rejects_tables() {
        let population = PopulationTable::new();
        let view = PopulationView::new(CREATED_COLUMNS).unwrap();
        let result = shift_exposure(
            &[],
            &population,
            &view,
            0.1,
            PipelineValue::Table(Default::default()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_modifiers_read_only_through_their_view() {
        let mut population = PopulationTable::new();
        let index = population.add_simulants(2, Utc::now());
        let full = PopulationView::new(CREATED_COLUMNS).unwrap();
        full.update(
            &mut population,
            &index,
            TREATMENT_STATUS,
            vec![
                Cell::Text(TreatmentStatus::Treated.as_str().into()),
                Cell::Text(TreatmentStatus::NotTreated.as_str().into()),
            ],
        )
        .unwrap();
        full.update(
            &mut population,
            &index,
            BIRTH_WEIGHT_EFFECT,
            vec![Cell::Float(40.0), Cell::Float(60.0)],
        )
        .unwrap();

        let shifted = shift_exposure(
            &index,
            &population,
            &full,
            0.5,
            PipelineValue::Scalar(vec![1.0, 1.0]),
        )
        .unwrap();
        assert_eq!(shifted, PipelineValue::Scalar(vec![1.5, 1.0]));

        let exposure = PipelineValue::Table(
            [
                (BIRTH_WEIGHT.to_string(), vec![3000.0, 3000.0]),
                (GESTATION_TIME.to_string(), vec![39.0, 39.0]),
            ]
            .into_iter()
            .collect(),
        );
        let adjusted = adjust_lbwsg(&index, &population, &full, exposure.clone()).unwrap();
        assert_eq!(
            adjusted,
            PipelineValue::Table(
                [
                    (BIRTH_WEIGHT.to_string(), vec![3040.0, 3000.0]),
                    (GESTATION_TIME.to_string(), vec![39.0, 39.0]),
                ]
                .into_iter()
                .collect(),
            )
        );

        let status_only = PopulationView::new(&[TREATMENT_STATUS]).unwrap();
        assert!(matches!(
            adjust_lbwsg(&index, &population, &status_only, exposure),
            Err(Error::Population(_))
        ));
    }
}
