//! Sample history observer.
//!
//! A fixed random sample of the initial population is followed through the
//! whole run. Every `collect_metrics` event appends one snapshot of the
//! sample; `simulation_end` writes all snapshots to a single file.

use crate::config::SampleHistoryConfig;
use crate::population::{PopulationTable, PopulationView, SimulantData};
use crate::randomness::RandomnessStream;
use crate::simulation::{Builder, Component, Event, EventContext, EventKind};
use crate::{Cell, Error, PipelineValue, Result, SimulantId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const NAME: &str = "sample_history_observer";

/// Lifecycle of the observer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverState {
    Uninitialized,
    SamplingIndexFixed,
    Recording,
    Dumped,
}

#[derive(Debug)]
struct Snapshot {
    time: DateTime<Utc>,
    rows: Vec<(SimulantId, Vec<Cell>)>,
}

/// Accumulated snapshots of a frozen sample
#[derive(Debug)]
pub struct SampleHistory {
    state: ObserverState,
    sample_index: Vec<SimulantId>,
    header: Vec<String>,
    snapshots: Vec<Snapshot>,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self {
            state: ObserverState::Uninitialized,
            sample_index: Vec::new(),
            header: Vec::new(),
            snapshots: Vec::new(),
        }
    }
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ObserverState {
        self.state
    }

    pub fn sample_index(&self) -> &[SimulantId] {
        &self.sample_index
    }

    /// Total rows across all snapshots
    pub fn len(&self) -> usize {
        self.snapshots.iter().map(|s| s.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the sample: the `sample_size` simulants with the smallest draws.
    ///
    /// Only the first call has an effect. Returns whether the index was fixed
    /// by this call.
    pub fn fix_sample_index(
        &mut self,
        index: &[SimulantId],
        draws: &[f64],
        sample_size: Option<usize>,
    ) -> bool {
        if self.state != ObserverState::Uninitialized {
            return false;
        }
        let size = sample_size.map_or(index.len(), |s| s.min(index.len()));

        let mut ranked: Vec<(f64, SimulantId)> =
            draws.iter().copied().zip(index.iter().copied()).collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        self.sample_index = ranked.into_iter().take(size).map(|(_, id)| id).collect();
        self.state = ObserverState::SamplingIndexFixed;
        true
    }

    /// Append one snapshot; `rows` are aligned with the sample index
    pub fn append(
        &mut self,
        time: DateTime<Utc>,
        header: Vec<String>,
        rows: Vec<Vec<Cell>>,
    ) -> Result<()> {
        match self.state {
            ObserverState::Uninitialized => {
                return Err(Error::Simulation(
                    "Sample history recorded before the sample index was fixed".into(),
                ));
            }
            ObserverState::Dumped => {
                return Err(Error::Simulation(
                    "Sample history recorded after it was written".into(),
                ));
            }
            ObserverState::SamplingIndexFixed => self.header = header,
            ObserverState::Recording => {
                if header != self.header {
                    return Err(Error::Simulation(format!(
                        "Sample history columns changed at {}",
                        time
                    )));
                }
            }
        }
        if rows.len() != self.sample_index.len() {
            return Err(Error::Simulation(format!(
                "Snapshot has {} rows for a sample of {}",
                rows.len(),
                self.sample_index.len()
            )));
        }

        let rows = self.sample_index.iter().copied().zip(rows).collect();
        self.snapshots.push(Snapshot { time, rows });
        self.state = ObserverState::Recording;
        Ok(())
    }

    /// Write every snapshot to `path` once.
    ///
    /// A `.json` path gets an object `{ key: [row, ...] }`; anything else is
    /// written as CSV with `simulant` and `time` leading columns.
    pub fn dump(&mut self, path: &Path, key: &str) -> Result<usize> {
        if self.state == ObserverState::Dumped {
            return Err(Error::Simulation(format!(
                "Sample history was already written to {:?}",
                path
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            self.write_json(path, key)?;
        } else {
            self.write_csv(path)?;
        }

        self.state = ObserverState::Dumped;
        let rows = self.len();
        tracing::info!(
            "Wrote {} sample history rows from {} snapshots to {:?}",
            rows,
            self.snapshots.len(),
            path
        );
        Ok(rows)
    }

    fn write_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);

        let mut header = vec!["simulant".to_string(), "time".to_string()];
        header.extend(self.header.iter().cloned());
        writer.write_record(&header)?;

        for snapshot in &self.snapshots {
            let time = snapshot.time.to_rfc3339();
            for (id, cells) in &snapshot.rows {
                let mut record = vec![id.to_string(), time.clone()];
                record.extend(cells.iter().map(Cell::render));
                writer.write_record(&record)?;
            }
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;
        Ok(())
    }

    fn write_json(&self, path: &Path, key: &str) -> Result<()> {
        let mut rows = Vec::with_capacity(self.len());
        for snapshot in &self.snapshots {
            for (id, cells) in &snapshot.rows {
                let mut row = serde_json::Map::new();
                row.insert("simulant".into(), serde_json::json!(id.0));
                row.insert("time".into(), serde_json::json!(snapshot.time.to_rfc3339()));
                for (column, cell) in self.header.iter().zip(cells) {
                    row.insert(column.clone(), serde_json::to_value(cell)?);
                }
                rows.push(serde_json::Value::Object(row));
            }
        }

        let mut document = serde_json::Map::new();
        document.insert(key.to_string(), serde_json::Value::Array(rows));

        let file = File::create(path)?;
        serde_json::to_writer_pretty(&file, &document)?;
        file.sync_all()?;
        Ok(())
    }
}

/// One row read back from a CSV sample history
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRow {
    pub simulant: SimulantId,
    pub time: DateTime<Utc>,
    pub values: BTreeMap<String, String>,
}

/// Read a CSV sample history
pub fn read_sample_history(path: &Path) -> Result<Vec<HistoryRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut simulant = None;
        let mut time = None;
        let mut values = BTreeMap::new();

        for (column, field) in headers.iter().zip(record.iter()) {
            match column {
                "simulant" => {
                    let id = field.parse::<u64>().map_err(|e| {
                        Error::Other(format!("Invalid simulant id {:?}: {}", field, e))
                    })?;
                    simulant = Some(SimulantId(id));
                }
                "time" => {
                    let parsed = DateTime::parse_from_rfc3339(field).map_err(|e| {
                        Error::Other(format!("Invalid time {:?}: {}", field, e))
                    })?;
                    time = Some(parsed.with_timezone(&Utc));
                }
                _ => {
                    values.insert(column.to_string(), field.to_string());
                }
            }
        }

        match (simulant, time) {
            (Some(simulant), Some(time)) => rows.push(HistoryRow {
                simulant,
                time,
                values,
            }),
            _ => {
                return Err(Error::Other(format!(
                    "{:?} is missing the simulant or time column",
                    path
                )));
            }
        }
    }
    Ok(rows)
}

struct ObserverSetup {
    config: SampleHistoryConfig,
    path: PathBuf,
    randomness: RandomnessStream,
    view: PopulationView,
}

/// Records a fixed sample of simulants at every metrics collection
#[derive(Default)]
pub struct SampleHistoryObserver {
    setup: Option<ObserverSetup>,
    history: SampleHistory,
}

impl SampleHistoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn setup_state(&self) -> Result<&ObserverSetup> {
        self.setup
            .as_ref()
            .ok_or_else(|| Error::Simulation(format!("{} used before setup", NAME)))
    }

    fn record(&mut self, event: &Event, ctx: &EventContext<'_>) -> Result<()> {
        let setup = self.setup_state()?;
        let index = self.history.sample_index().to_vec();

        let mut header = Vec::new();
        let mut columns: Vec<Vec<Cell>> = Vec::new();
        for observed in &setup.config.pipelines {
            match ctx.value(&observed.pipeline, &index)? {
                PipelineValue::Scalar(values) => {
                    header.push(observed.column.clone());
                    columns.push(values.into_iter().map(Cell::Float).collect());
                }
                value @ PipelineValue::Table(_)
                    if setup.config.summed_pipelines.contains(&observed.column) =>
                {
                    header.push(observed.column.clone());
                    columns.push(
                        value
                            .sum_columns(index.len())
                            .into_iter()
                            .map(Cell::Float)
                            .collect(),
                    );
                }
                PipelineValue::Table(table) => {
                    for (sub, values) in table {
                        header.push(format!("{}.{}", observed.column, sub));
                        columns.push(values.into_iter().map(Cell::Float).collect());
                    }
                }
            }
        }
        header.extend(setup.view.columns().iter().cloned());

        let population_rows = setup.view.get(ctx.population, &index)?;
        let rows = population_rows
            .into_iter()
            .enumerate()
            .map(|(i, population_cells)| {
                let mut row: Vec<Cell> = columns.iter().map(|c| c[i].clone()).collect();
                row.extend(population_cells);
                row
            })
            .collect();

        self.history.append(event.time, header, rows)
    }
}

impl Component for SampleHistoryObserver {
    fn name(&self) -> &str {
        NAME
    }

    fn setup(&mut self, builder: &mut Builder<'_>) -> Result<()> {
        let config = builder.configuration.metrics.sample_history_observer.clone();
        let path = builder.configuration.sample_history_path();
        let randomness = builder.get_stream("sample_history")?;

        builder.initializes_simulants(&[])?;
        let view = PopulationView::from_names(config.columns.clone())?;
        builder.register_listener(EventKind::CollectMetrics);
        builder.register_listener(EventKind::SimulationEnd);

        self.setup = Some(ObserverSetup {
            config,
            path,
            randomness,
            view,
        });
        Ok(())
    }

    fn on_initialize_simulants(
        &mut self,
        pop_data: &SimulantData,
        _population: &mut PopulationTable,
    ) -> Result<()> {
        if self.history.state() != ObserverState::Uninitialized {
            return Ok(());
        }
        let setup = self.setup_state()?;
        let draws = setup.randomness.get_draw(&pop_data.index, "");
        let sample_size = match setup.config.sample_size {
            0 => None,
            size => Some(size),
        };
        self.history
            .fix_sample_index(&pop_data.index, &draws, sample_size);
        tracing::debug!(
            "Fixed a sample of {} from {} simulants",
            self.history.sample_index().len(),
            pop_data.index.len()
        );
        Ok(())
    }

    fn on_event(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<()> {
        match event.kind {
            EventKind::CollectMetrics => self.record(event, ctx),
            EventKind::SimulationEnd => {
                let setup = self.setup_state()?;
                let path = setup.path.clone();
                let key = setup.config.key.clone();
                self.history.dump(&path, &key)?;
                Ok(())
            }
            EventKind::TimeStep => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BaselinePopulation, CalciumSupplementationIntervention};
    use crate::{Config, Simulation};
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn config(dir: &Path, file: &str) -> Config {
        let mut config = Config::default();
        config.data.data_dir = dir.to_path_buf();
        config.time.end = config.time.start + Duration::days(5);
        config.population.initial_size = 50;
        config.population.births_per_step = 3;
        config.metrics.sample_history_observer.sample_size = 20;
        config.metrics.sample_history_observer.path = Some(dir.join("results").join(file));
        config
    }

    fn run(config: Config) {
        let mut sim = Simulation::new(
            config,
            vec![
                Box::new(BaselinePopulation::new()),
                Box::new(CalciumSupplementationIntervention::new()),
                Box::new(SampleHistoryObserver::new()),
            ],
        )
        .unwrap();
        sim.run().unwrap();
    }

    #[test]
    fn test_history_has_one_row_per_sample_per_step() {
        crate::logging::init_test();
        let dir = TempDir::new().unwrap();
        run(config(dir.path(), "history.csv"));

        let rows = read_sample_history(&dir.path().join("results/history.csv")).unwrap();
        assert_eq!(rows.len(), 5 * 20);

        let keys: HashSet<(SimulantId, DateTime<Utc>)> =
            rows.iter().map(|r| (r.simulant, r.time)).collect();
        assert_eq!(keys.len(), rows.len());

        // Same 20 simulants at every timestamp, all from the initial batch
        let mut by_time: BTreeMap<DateTime<Utc>, HashSet<SimulantId>> = BTreeMap::new();
        for row in &rows {
            by_time.entry(row.time).or_default().insert(row.simulant);
        }
        assert_eq!(by_time.len(), 5);
        let first = by_time.values().next().unwrap().clone();
        assert_eq!(first.len(), 20);
        assert!(by_time.values().all(|ids| *ids == first));
        assert!(first.iter().all(|id| id.0 < 50));
    }

    #[test]
    fn test_mortality_rate_is_summed_into_one_column() {
        let dir = TempDir::new().unwrap();
        run(config(dir.path(), "history.csv"));

        let rows = read_sample_history(&dir.path().join("results/history.csv")).unwrap();
        let expected: f64 = Config::default().baseline.mortality_rates.values().sum();
        for row in &rows {
            let rate: f64 = row.values["mortality_rate"].parse().unwrap();
            if row.values["alive"] == "true" {
                assert!((rate - expected).abs() < 1e-12);
            } else {
                assert_eq!(rate, 0.0);
            }
            assert!(row.values.contains_key("calcium_supplementation_treatment_status"));
            assert!(row
                .values
                .contains_key("low_birth_weight_and_short_gestation_exposure.birth_weight"));
        }
    }

    #[test]
    fn test_json_output_under_key() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path(), "history.json");
        config.metrics.sample_history_observer.key = "histories".into();
        run(config);

        let contents = std::fs::read_to_string(dir.path().join("results/history.json")).unwrap();
        let document: serde_json::Value = serde_json::from_str(&contents).unwrap();
        let rows = document["histories"].as_array().unwrap();
        assert_eq!(rows.len(), 100);
        assert!(rows[0]["simulant"].is_u64());
        assert!(rows[0]["disability_weight"].is_f64());
    }

    #[test]
    fn test_csv_output_is_one_table_regardless_of_key() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path(), "history.csv");
        config.metrics.sample_history_observer.key = "trial_arm_a".into();
        run(config);

        let path = dir.path().join("results/history.csv");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("simulant,time,"));
        assert!(!contents.contains("trial_arm_a"));
        assert_eq!(read_sample_history(&path).unwrap().len(), 100);
    }

    #[test]
    fn test_sample_size_capped_by_population() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path(), "history.csv");
        config.metrics.sample_history_observer.sample_size = 500;
        run(config);

        let rows = read_sample_history(&dir.path().join("results/history.csv")).unwrap();
        assert_eq!(rows.len(), 5 * 50);
    }

    #[test]
    fn test_zero_sample_size_takes_whole_initial_population() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path(), "history.csv");
        config.metrics.sample_history_observer.sample_size = 0;
        run(config);

        let rows = read_sample_history(&dir.path().join("results/history.csv")).unwrap();
        let ids: HashSet<SimulantId> = rows.iter().map(|r| r.simulant).collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn test_sample_index_fixed_once() {
        let mut history = SampleHistory::new();
        let index: Vec<SimulantId> = (0..4).map(SimulantId).collect();
        assert!(history.fix_sample_index(&index, &[0.9, 0.1, 0.5, 0.1], Some(3)));
        assert_eq!(
            history.sample_index(),
            &[SimulantId(1), SimulantId(3), SimulantId(2)]
        );

        let later: Vec<SimulantId> = (4..8).map(SimulantId).collect();
        assert!(!history.fix_sample_index(&later, &[0.0; 4], Some(3)));
        assert_eq!(history.sample_index().len(), 3);
        assert_eq!(history.state(), ObserverState::SamplingIndexFixed);
    }

    #[test]
    fn test_state_transitions_and_single_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.csv");
        let time = Utc.with_ymd_and_hms(2019, 1, 2, 0, 0, 0).unwrap();
        let header = vec!["age".to_string()];

        let mut history = SampleHistory::new();
        assert!(history
            .append(time, header.clone(), vec![])
            .is_err());

        history.fix_sample_index(&[SimulantId(7)], &[0.3], Some(1));
        history
            .append(time, header.clone(), vec![vec![Cell::Float(1.5)]])
            .unwrap();
        assert_eq!(history.state(), ObserverState::Recording);

        // Wrong number of rows
        assert!(history.append(time, header.clone(), vec![]).is_err());

        assert_eq!(history.dump(&path, "histories").unwrap(), 1);
        assert_eq!(history.state(), ObserverState::Dumped);
        assert!(history.dump(&path, "histories").is_err());
        assert!(history
            .append(time, header, vec![vec![Cell::Float(2.0)]])
            .is_err());

        let rows = read_sample_history(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].simulant, SimulantId(7));
        assert_eq!(rows[0].time, time);
        assert_eq!(rows[0].values["age"], "1.5");
    }

    #[test]
    fn test_unknown_observed_pipeline_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path(), "history.csv");
        config
            .metrics
            .sample_history_observer
            .pipelines
            .push(crate::config::ObservedPipeline {
                column: "shoe_size".into(),
                pipeline: "shoe_size".into(),
            });
        let mut sim = Simulation::new(
            config,
            vec![
                Box::new(BaselinePopulation::new()),
                Box::new(SampleHistoryObserver::new()),
            ],
        )
        .unwrap();
        assert!(matches!(sim.run(), Err(Error::Pipeline(_))));
    }
}
