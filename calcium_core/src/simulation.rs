//! Fixed-step simulation host.
//!
//! Components are registered once, set up through a [`Builder`], and then
//! driven by the [`Simulation`] loop:
//!
//! 1. Setup: each component claims randomness streams, population columns,
//!    pipeline sources/modifiers and event listeners.
//! 2. The initial population is created at the start time.
//! 3. Each step emits `time_step`, creates a birth batch at the end of the
//!    step, advances the clock and emits `collect_metrics`.
//! 4. `finalize` emits `simulation_end` exactly once.

use crate::pipeline::{PipelineValue, ValueModifier, ValuePipelines, ValueSource};
use crate::population::{PopulationTable, PopulationView, SimulantData};
use crate::randomness::{RandomnessManager, RandomnessStream};
use crate::{Config, Error, Result, SimulantId};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Events a component can listen for
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    TimeStep,
    CollectMetrics,
    SimulationEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TimeStep => "time_step",
            EventKind::CollectMetrics => "collect_metrics",
            EventKind::SimulationEnd => "simulation_end",
        }
    }
}

/// An emitted event
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub time: DateTime<Utc>,
    pub step_size: Duration,
    /// Living simulants at emission time
    pub index: Vec<SimulantId>,
}

/// Mutable population access plus read access to pipelines
pub struct EventContext<'a> {
    pub population: &'a mut PopulationTable,
    pub pipelines: &'a ValuePipelines,
    pub clock: DateTime<Utc>,
}

impl<'a> EventContext<'a> {
    pub fn value(&self, name: &str, index: &[SimulantId]) -> Result<PipelineValue> {
        self.pipelines
            .get_value(name, index, self.population, self.clock)
    }
}

/// A plugin driven by the simulation host
pub trait Component {
    fn name(&self) -> &str;

    fn setup(&mut self, builder: &mut Builder<'_>) -> Result<()>;

    /// Called once per creation batch if the component registered via
    /// [`Builder::initializes_simulants`]
    fn on_initialize_simulants(
        &mut self,
        _pop_data: &SimulantData,
        _population: &mut PopulationTable,
    ) -> Result<()> {
        Ok(())
    }

    /// Called for every event kind the component registered for
    fn on_event(&mut self, _event: &Event, _ctx: &mut EventContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Registry {
    initializers: Vec<usize>,
    column_owners: BTreeMap<String, String>,
    listeners: BTreeMap<EventKind, Vec<usize>>,
}

/// Setup-time handle given to each component
pub struct Builder<'a> {
    pub configuration: &'a Config,
    randomness: &'a mut RandomnessManager,
    pipelines: &'a mut ValuePipelines,
    registry: &'a mut Registry,
    component: usize,
    component_name: String,
}

impl<'a> Builder<'a> {
    pub fn start_time(&self) -> DateTime<Utc> {
        self.configuration.time.start_time()
    }

    pub fn get_stream(&mut self, name: &str) -> Result<RandomnessStream> {
        self.randomness.get_stream(name)
    }

    pub fn get_view(&self, columns: &[&str]) -> Result<PopulationView> {
        PopulationView::new(columns)
    }

    /// Register for creation-batch callbacks, claiming `creates_columns`
    pub fn initializes_simulants(&mut self, creates_columns: &[&str]) -> Result<()> {
        for column in creates_columns {
            if let Some(owner) = self.registry.column_owners.get(*column) {
                return Err(Error::Population(format!(
                    "Column {} is already created by {}",
                    column, owner
                )));
            }
        }
        // Validates the names
        PopulationView::new(creates_columns)?;
        for column in creates_columns {
            self.registry
                .column_owners
                .insert(column.to_string(), self.component_name.clone());
        }
        self.registry.initializers.push(self.component);
        Ok(())
    }

    pub fn register_listener(&mut self, kind: EventKind) {
        let listeners = self.registry.listeners.entry(kind).or_default();
        if !listeners.contains(&self.component) {
            listeners.push(self.component);
        }
    }

    pub fn register_value_producer(&mut self, name: &str, source: ValueSource) -> Result<()> {
        self.pipelines
            .register_value_producer(name, &self.component_name, source)
    }

    pub fn register_value_modifier(&mut self, name: &str, modifier: ValueModifier) {
        self.pipelines
            .register_value_modifier(name, &self.component_name, modifier)
    }
}

/// Outcome of a full run
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub population_size: usize,
    pub alive: usize,
    pub treated: usize,
}

/// The simulation host
pub struct Simulation {
    config: Config,
    clock: DateTime<Utc>,
    step_size: Duration,
    population: PopulationTable,
    pipelines: ValuePipelines,
    components: Vec<Box<dyn Component>>,
    registry: Registry,
    steps_taken: u64,
    finished: bool,
}

impl Simulation {
    /// Validate the configuration and set up every component in order
    pub fn new(config: Config, mut components: Vec<Box<dyn Component>>) -> Result<Self> {
        config.validate()?;

        let mut randomness = RandomnessManager::new(config.randomness.seed);
        let mut pipelines = ValuePipelines::new();
        let mut registry = Registry::default();

        for (i, component) in components.iter_mut().enumerate() {
            let component_name = component.name().to_string();
            let mut builder = Builder {
                configuration: &config,
                randomness: &mut randomness,
                pipelines: &mut pipelines,
                registry: &mut registry,
                component: i,
                component_name: component_name.clone(),
            };
            component.setup(&mut builder)?;
            tracing::info!("Set up component {}", component_name);
        }

        let missing = pipelines.missing_sources();
        if !missing.is_empty() {
            return Err(Error::Pipeline(format!(
                "Pipelines modified without a source: {}",
                missing.join(", ")
            )));
        }

        let clock = config.time.start_time();
        let step_size = config.time.step_size()?;
        Ok(Self {
            config,
            clock,
            step_size,
            population: PopulationTable::new(),
            pipelines,
            components,
            registry,
            steps_taken: 0,
            finished: false,
        })
    }

    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    pub fn population(&self) -> &PopulationTable {
        &self.population
    }

    pub fn pipelines(&self) -> &ValuePipelines {
        &self.pipelines
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Evaluate a pipeline at the current clock
    pub fn get_value(&self, name: &str, index: &[SimulantId]) -> Result<PipelineValue> {
        self.pipelines
            .get_value(name, index, &self.population, self.clock)
    }

    /// Create the initial population at the current clock
    pub fn initialize_population(&mut self, count: usize) -> Result<Vec<SimulantId>> {
        let creation_time = self.clock;
        self.create_simulants(count, creation_time)
    }

    /// Create a batch of simulants and run every initializer over it
    pub fn create_simulants(
        &mut self,
        count: usize,
        creation_time: DateTime<Utc>,
    ) -> Result<Vec<SimulantId>> {
        let index = self.population.add_simulants(count, creation_time);
        let pop_data = SimulantData {
            index: index.clone(),
            creation_time,
        };
        for &i in &self.registry.initializers {
            self.components[i].on_initialize_simulants(&pop_data, &mut self.population)?;
        }
        tracing::debug!("Created {} simulants at {}", count, creation_time);
        Ok(index)
    }

    /// Advance one step
    pub fn step(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Simulation("Simulation has already ended".into()));
        }
        let next = self.next_clock()?;

        self.emit(EventKind::TimeStep)?;

        let births = self.config.population.births_per_step;
        if births > 0 {
            self.create_simulants(births, next)?;
        }

        self.clock = next;
        self.steps_taken += 1;

        self.emit(EventKind::CollectMetrics)?;
        Ok(())
    }

    /// Emit the terminal event
    pub fn finalize(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Simulation("Simulation has already ended".into()));
        }
        self.emit(EventKind::SimulationEnd)?;
        self.finished = true;
        tracing::info!(
            "Simulation ended at {} after {} steps",
            self.clock,
            self.steps_taken
        );
        Ok(())
    }

    /// Initialize, step until the end time, and finalize
    pub fn run(&mut self) -> Result<RunSummary> {
        self.initialize_population(self.config.population.initial_size)?;

        let end = self.config.time.end_time();
        while self.next_clock()? <= end {
            self.step()?;
        }
        self.finalize()?;

        let index = self.population.index();
        let treated = self
            .population
            .treated_mask(&index)?
            .into_iter()
            .filter(|t| *t)
            .count();
        Ok(RunSummary {
            steps: self.steps_taken,
            population_size: self.population.len(),
            alive: self.population.alive_index().len(),
            treated,
        })
    }

    fn next_clock(&self) -> Result<DateTime<Utc>> {
        self.clock.checked_add_signed(self.step_size).ok_or_else(|| {
            Error::Simulation(format!(
                "Clock overflow stepping {} days from {}",
                self.step_size.num_days(),
                self.clock
            ))
        })
    }

    fn emit(&mut self, kind: EventKind) -> Result<()> {
        let listeners = self
            .registry
            .listeners
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        if listeners.is_empty() {
            return Ok(());
        }

        let event = Event {
            kind,
            time: self.clock,
            step_size: self.step_size,
            index: self.population.alive_index(),
        };
        for i in listeners {
            let mut ctx = EventContext {
                population: &mut self.population,
                pipelines: &self.pipelines,
                clock: self.clock,
            };
            self.components[i].on_event(&event, &mut ctx)?;
        }
        tracing::trace!("Emitted {} at {}", kind.as_str(), self.clock);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{AGE, ALIVE};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records which hooks fired
    struct HookRecorder {
        name: String,
        creates: Vec<&'static str>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Component for HookRecorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn setup(&mut self, builder: &mut Builder<'_>) -> Result<()> {
            builder.initializes_simulants(&self.creates)?;
            builder.register_listener(EventKind::CollectMetrics);
            builder.register_listener(EventKind::SimulationEnd);
            Ok(())
        }

        fn on_initialize_simulants(
            &mut self,
            pop_data: &SimulantData,
            _population: &mut PopulationTable,
        ) -> Result<()> {
            self.log
                .borrow_mut()
                .push(format!("init:{}", pop_data.index.len()));
            Ok(())
        }

        fn on_event(&mut self, event: &Event, _ctx: &mut EventContext<'_>) -> Result<()> {
            self.log.borrow_mut().push(event.kind.as_str().to_string());
            Ok(())
        }
    }

    fn short_config() -> Config {
        let mut config = Config::default();
        config.time.end = config.time.start + Duration::days(3);
        config.population.initial_size = 5;
        config.population.births_per_step = 2;
        config
    }

    #[test]
    fn test_run_drives_hooks_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let recorder = HookRecorder {
            name: "recorder".into(),
            creates: vec![AGE],
            log: log.clone(),
        };
        let mut sim = Simulation::new(short_config(), vec![Box::new(recorder)]).unwrap();
        let summary = sim.run().unwrap();

        assert_eq!(summary.steps, 3);
        assert_eq!(summary.population_size, 5 + 3 * 2);
        let log = log.borrow();
        assert_eq!(log[0], "init:5");
        assert_eq!(log[1], "init:2");
        assert_eq!(log[2], "collect_metrics");
        assert_eq!(log.last().map(String::as_str), Some("simulation_end"));
    }

    #[test]
    fn test_duplicate_column_creator_rejected() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = HookRecorder {
            name: "a".into(),
            creates: vec![ALIVE],
            log: log.clone(),
        };
        let b = HookRecorder {
            name: "b".into(),
            creates: vec![ALIVE],
            log,
        };
        let result = Simulation::new(short_config(), vec![Box::new(a), Box::new(b)]);
        assert!(matches!(result, Err(Error::Population(_))));
    }

    #[test]
    fn test_invalid_config_aborts_setup() {
        let mut config = short_config();
        config.intervention.proportion = 2.0;
        assert!(matches!(
            Simulation::new(config, vec![]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_oversized_step_rejected_before_setup() {
        let mut config = short_config();
        config.time.step_size_days = 100_000_000;
        assert!(matches!(
            Simulation::new(config, vec![]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_step_past_calendar_end_is_an_error() {
        let last_day = chrono::NaiveDate::MAX.pred_opt().unwrap();
        let mut config = short_config();
        config.time.start = last_day;
        config.time.end = last_day;

        let mut sim = Simulation::new(config, vec![]).unwrap();
        let summary = sim.run().unwrap();
        assert_eq!(summary.steps, 0);

        let mut sim = Simulation::new(sim.config().clone(), vec![]).unwrap();
        sim.initialize_population(1).unwrap();
        sim.step().unwrap();
        assert!(matches!(sim.step(), Err(Error::Simulation(_))));
    }

    #[test]
    fn test_finalize_only_once() {
        let mut sim = Simulation::new(short_config(), vec![]).unwrap();
        sim.finalize().unwrap();
        assert!(sim.finalize().is_err());
        assert!(sim.step().is_err());
    }
}
