//! Baseline demography and exposures.
//!
//! Supplies the pipelines the intervention and the observer depend on and
//! owns the demographic columns. Mortality is a simple competing-risks draw
//! per step: a simulant dies with probability `1 - exp(-rate * dt)` and the
//! cause is chosen in proportion to the cause-specific rates.

use super::pipelines::*;
use crate::config::{BaselineConfig, NormalParams};
use crate::pipeline::PipelineValue;
use crate::population::{
    PopulationTable, PopulationView, SimulantData, AGE, ALIVE, CAUSE_OF_DEATH, ENTRANCE_TIME,
    EXIT_TIME, SEX, YEARS_LIVED_WITH_DISABILITY, YEARS_OF_LIFE_LOST,
};
use crate::randomness::RandomnessStream;
use crate::simulation::{Builder, Component, Event, EventContext, EventKind};
use crate::stats::{standard_normal_ppf, Normal};
use crate::{Cell, Error, Result, SimulantId};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

const CREATED_COLUMNS: &[&str] = &[
    ALIVE,
    AGE,
    SEX,
    ENTRANCE_TIME,
    EXIT_TIME,
    CAUSE_OF_DEATH,
    YEARS_LIVED_WITH_DISABILITY,
    YEARS_OF_LIFE_LOST,
];

const DAYS_PER_YEAR: f64 = 365.25;

struct BaselineState {
    config: BaselineConfig,
    start_time: DateTime<Utc>,
    initial_age_max: f64,
    randomness: RandomnessStream,
    view: PopulationView,
}

/// Demography, mortality and baseline exposure pipelines
#[derive(Default)]
pub struct BaselinePopulation {
    state: Option<BaselineState>,
}

impl BaselinePopulation {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<&BaselineState> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::Simulation("baseline_population used before setup".into()))
    }
}

impl Component for BaselinePopulation {
    fn name(&self) -> &str {
        "baseline_population"
    }

    fn setup(&mut self, builder: &mut Builder<'_>) -> Result<()> {
        let config = builder.configuration.baseline.clone();
        let randomness = builder.get_stream("baseline_population")?;

        builder.initializes_simulants(CREATED_COLUMNS)?;
        let view = builder.get_view(CREATED_COLUMNS)?;
        builder.register_listener(EventKind::TimeStep);

        builder.register_value_producer(
            LBWSG_RAW_EXPOSURE,
            lbwsg_source(randomness.clone(), config.birth_weight, config.gestation_time)?,
        )?;
        builder.register_value_producer(
            LBWSG_EXPOSURE,
            Box::new(|index, ctx| ctx.value(LBWSG_RAW_EXPOSURE, index)),
        )?;
        for risk in [
            CHILD_STUNTING_EXPOSURE,
            CHILD_WASTING_EXPOSURE,
            CHILD_UNDERWEIGHT_EXPOSURE,
        ] {
            let stream = randomness.clone();
            builder.register_value_producer(
                risk,
                Box::new(move |index, _| {
                    let z_scores = stream
                        .get_draw(index, risk)
                        .into_iter()
                        .map(standard_normal_ppf)
                        .collect();
                    Ok(PipelineValue::Scalar(z_scores))
                }),
            )?;
        }

        let mortality_rates = config.mortality_rates.clone();
        builder.register_value_producer(
            MORTALITY_RATE,
            Box::new(move |index, ctx| {
                let alive = alive_mask(ctx.population, index)?;
                let table = mortality_rates
                    .iter()
                    .map(|(cause, rate)| {
                        let values = alive.iter().map(|a| if *a { *rate } else { 0.0 }).collect();
                        (cause.clone(), values)
                    })
                    .collect();
                Ok(PipelineValue::Table(table))
            }),
        )?;

        let disability_weight = config.disability_weight;
        builder.register_value_producer(
            DISABILITY_WEIGHT,
            Box::new(move |index, ctx| {
                let alive = alive_mask(ctx.population, index)?;
                Ok(PipelineValue::Scalar(
                    alive
                        .iter()
                        .map(|a| if *a { disability_weight } else { 0.0 })
                        .collect(),
                ))
            }),
        )?;

        for (cause, rate) in &config.incidence_rates {
            let rate = *rate;
            builder.register_value_producer(
                &incidence_rate(cause),
                Box::new(move |index, _| Ok(PipelineValue::Scalar(vec![rate; index.len()]))),
            )?;
        }

        self.state = Some(BaselineState {
            config,
            start_time: builder.start_time(),
            initial_age_max: builder.configuration.population.initial_age_max,
            randomness,
            view,
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

        // The initial population spans a range of ages; later batches are births
        let ages: Vec<Cell> = if pop_data.creation_time <= state.start_time {
            state
                .randomness
                .get_draw(index, "initial_age")
                .into_iter()
                .map(|d| Cell::Float(d * state.initial_age_max))
                .collect()
        } else {
            vec![Cell::Float(0.0); index.len()]
        };
        let sexes: Vec<Cell> = state
            .randomness
            .get_draw(index, "sex")
            .into_iter()
            .map(|d| Cell::Text(if d < 0.5 { "Female" } else { "Male" }.into()))
            .collect();

        state.view.update(population, index, AGE, ages)?;
        state.view.update(population, index, SEX, sexes)?;
        state.view.update(
            population,
            index,
            ENTRANCE_TIME,
            vec![Cell::Time(Some(pop_data.creation_time)); index.len()],
        )?;
        Ok(())
    }

    fn on_event(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<()> {
        if event.kind != EventKind::TimeStep || event.index.is_empty() {
            return Ok(());
        }
        let state = self.state()?;
        let index = &event.index;
        let dt = years(event.step_size);

        let rates = match ctx.value(MORTALITY_RATE, index)? {
            PipelineValue::Table(rates) => rates,
            PipelineValue::Scalar(_) => {
                return Err(Error::Pipeline(format!(
                    "{} must be a per-cause table",
                    MORTALITY_RATE
                )));
            }
        };
        let disability = ctx.value(DISABILITY_WEIGHT, index)?.sum_columns(index.len());

        let step_key = event.time.timestamp().to_string();
        let death_draws = state
            .randomness
            .get_draw(index, &format!("mortality_{}", step_key));
        let cause_draws = state
            .randomness
            .get_draw(index, &format!("cause_of_death_{}", step_key));

        let mut ages = Vec::with_capacity(index.len());
        let mut ylds = Vec::with_capacity(index.len());
        let mut dead = Vec::new();
        let mut causes = Vec::new();
        let mut ylls = Vec::new();

        for (i, id) in index.iter().enumerate() {
            let simulant = ctx.population.get(*id)?;
            let total: f64 = rates.values().map(|r| r[i]).sum();
            ages.push(Cell::Float(simulant.age + dt));
            ylds.push(Cell::Float(
                simulant.years_lived_with_disability + disability[i] * dt,
            ));

            if death_draws[i] < 1.0 - (-total * dt).exp() {
                dead.push(*id);
                causes.push(Cell::Text(choose_cause(&rates, i, total, cause_draws[i])));
                ylls.push(Cell::Float(
                    (state.config.life_expectancy - simulant.age).max(0.0),
                ));
            }
        }

        state.view.update(ctx.population, index, AGE, ages)?;
        state
            .view
            .update(ctx.population, index, YEARS_LIVED_WITH_DISABILITY, ylds)?;

        if !dead.is_empty() {
            let exit_time = event.time + event.step_size;
            state
                .view
                .update(ctx.population, &dead, ALIVE, vec![Cell::Bool(false); dead.len()])?;
            state.view.update(
                ctx.population,
                &dead,
                EXIT_TIME,
                vec![Cell::Time(Some(exit_time)); dead.len()],
            )?;
            state
                .view
                .update(ctx.population, &dead, CAUSE_OF_DEATH, causes)?;
            state
                .view
                .update(ctx.population, &dead, YEARS_OF_LIFE_LOST, ylls)?;
            tracing::debug!("{} simulants died at {}", dead.len(), event.time);
        }
        Ok(())
    }
}

fn lbwsg_source(
    randomness: RandomnessStream,
    birth_weight: NormalParams,
    gestation_time: NormalParams,
) -> Result<crate::pipeline::ValueSource> {
    let birth_weight = Normal::new(birth_weight.mean, birth_weight.sd)?;
    let gestation_time = Normal::new(gestation_time.mean, gestation_time.sd)?;
    Ok(Box::new(move |index, _| {
        let mut table = BTreeMap::new();
        table.insert(
            BIRTH_WEIGHT.to_string(),
            randomness
                .get_draw(index, BIRTH_WEIGHT)
                .into_iter()
                .map(|d| birth_weight.ppf(d))
                .collect(),
        );
        table.insert(
            GESTATION_TIME.to_string(),
            randomness
                .get_draw(index, GESTATION_TIME)
                .into_iter()
                .map(|d| gestation_time.ppf(d))
                .collect(),
        );
        Ok(PipelineValue::Table(table))
    }))
}

fn alive_mask(population: &PopulationTable, index: &[SimulantId]) -> Result<Vec<bool>> {
    index
        .iter()
        .map(|id| Ok(population.get(*id)?.alive))
        .collect()
}

fn choose_cause(rates: &BTreeMap<String, Vec<f64>>, row: usize, total: f64, draw: f64) -> String {
    let target = draw * total;
    let mut cumulative = 0.0;
    let mut last = "other_causes";
    for (cause, values) in rates {
        cumulative += values[row];
        last = cause.as_str();
        if target < cumulative {
            return cause.clone();
        }
    }
    last.to_string()
}

fn years(step: Duration) -> f64 {
    step.num_seconds() as f64 / (DAYS_PER_YEAR * 86_400.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, Simulation};

    fn config(days: i64) -> Config {
        let mut config = Config::default();
        config.time.end = config.time.start + Duration::days(days);
        config.population.initial_size = 200;
        config.population.births_per_step = 5;
        config
    }

    #[test]
    fn test_initial_population_ages_within_bounds() {
        let mut sim = Simulation::new(config(1), vec![Box::new(BaselinePopulation::new())]).unwrap();
        let index = sim.initialize_population(200).unwrap();
        for id in index {
            let simulant = sim.population().get(id).unwrap();
            assert!((0.0..5.0).contains(&simulant.age));
            assert!(simulant.alive);
        }
    }

    #[test]
    fn test_lbwsg_exposure_reads_raw_pipeline() {
        let mut sim = Simulation::new(config(1), vec![Box::new(BaselinePopulation::new())]).unwrap();
        let index = sim.initialize_population(10).unwrap();
        let raw = sim.get_value(LBWSG_RAW_EXPOSURE, &index).unwrap();
        let exposure = sim.get_value(LBWSG_EXPOSURE, &index).unwrap();
        assert_eq!(raw, exposure);
        match exposure {
            PipelineValue::Table(table) => {
                assert!(table.contains_key(BIRTH_WEIGHT));
                assert!(table.contains_key(GESTATION_TIME));
            }
            PipelineValue::Scalar(_) => panic!("Expected a table"),
        }
    }

    #[test]
    fn test_high_mortality_kills_and_records_cause() {
        let mut config = config(30);
        config.baseline.mortality_rates = [("measles".to_string(), 50.0)].into_iter().collect();
        let mut sim = Simulation::new(config, vec![Box::new(BaselinePopulation::new())]).unwrap();
        let summary = sim.run().unwrap();
        assert!(summary.alive < summary.population_size);

        let dead: Vec<_> = sim
            .population()
            .index()
            .into_iter()
            .filter_map(|id| sim.population().get(id).ok().cloned())
            .filter(|s| !s.alive)
            .collect();
        assert!(!dead.is_empty());
        for simulant in dead {
            assert_eq!(simulant.cause_of_death.as_deref(), Some("measles"));
            assert!(simulant.exit_time.is_some());
            assert!(simulant.years_of_life_lost > 0.0);
        }
    }

    #[test]
    fn test_no_mortality_keeps_everyone_alive() {
        let mut config = config(10);
        config.baseline.mortality_rates.clear();
        let mut sim = Simulation::new(config, vec![Box::new(BaselinePopulation::new())]).unwrap();
        let summary = sim.run().unwrap();
        assert_eq!(summary.alive, summary.population_size);
    }

    #[test]
    fn test_choose_cause_proportional() {
        let mut rates = BTreeMap::new();
        rates.insert("a".to_string(), vec![1.0]);
        rates.insert("b".to_string(), vec![3.0]);
        assert_eq!(choose_cause(&rates, 0, 4.0, 0.1), "a");
        assert_eq!(choose_cause(&rates, 0, 4.0, 0.5), "b");
    }
}
