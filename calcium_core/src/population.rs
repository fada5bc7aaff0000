//! Population table and column-scoped views.
//!
//! Rows are keyed by [`SimulantId`]. Every row carries the full column set;
//! which component owns (initializes) a column is tracked by the simulation
//! host, and components read and write through a [`PopulationView`] that is
//! checked against the known column names when it is created.

use crate::{Cell, Error, Result, Sex, SimulantId, TreatmentStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub const ALIVE: &str = "alive";
pub const AGE: &str = "age";
pub const SEX: &str = "sex";
pub const ENTRANCE_TIME: &str = "entrance_time";
pub const EXIT_TIME: &str = "exit_time";
pub const CAUSE_OF_DEATH: &str = "cause_of_death";
pub const YEARS_LIVED_WITH_DISABILITY: &str = "years_lived_with_disability";
pub const YEARS_OF_LIFE_LOST: &str = "years_of_life_lost";
pub const TREATMENT_STATUS: &str = "calcium_supplementation_treatment_status";
pub const ANTENATAL_CARE_VISIT: &str = "antenatal_care_visit";
pub const BIRTH_WEIGHT_EFFECT: &str = "birth_weight_effect";
pub const GESTATION_TIME_EFFECT: &str = "gestation_time_effect";

/// Every column the table knows about
pub const COLUMNS: &[&str] = &[
    ALIVE,
    AGE,
    SEX,
    ENTRANCE_TIME,
    EXIT_TIME,
    CAUSE_OF_DEATH,
    YEARS_LIVED_WITH_DISABILITY,
    YEARS_OF_LIFE_LOST,
    TREATMENT_STATUS,
    ANTENATAL_CARE_VISIT,
    BIRTH_WEIGHT_EFFECT,
    GESTATION_TIME_EFFECT,
];

/// One row of the population table
#[derive(Clone, Debug, PartialEq)]
pub struct Simulant {
    pub alive: bool,
    /// years
    pub age: f64,
    pub sex: Sex,
    pub entrance_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub cause_of_death: Option<String>,
    pub years_lived_with_disability: f64,
    pub years_of_life_lost: f64,
    pub treatment_status: TreatmentStatus,
    pub antenatal_care_visit: bool,
    pub birth_weight_effect: f64,
    pub gestation_time_effect: f64,
}

impl Simulant {
    fn new(entrance_time: DateTime<Utc>) -> Self {
        Self {
            alive: true,
            age: 0.0,
            sex: Sex::Female,
            entrance_time,
            exit_time: None,
            cause_of_death: None,
            years_lived_with_disability: 0.0,
            years_of_life_lost: 0.0,
            treatment_status: TreatmentStatus::NotTreated,
            antenatal_care_visit: false,
            birth_weight_effect: 0.0,
            gestation_time_effect: 0.0,
        }
    }

    /// Read a column by name
    pub fn column(&self, name: &str) -> Option<Cell> {
        let cell = match name {
            ALIVE => Cell::Bool(self.alive),
            AGE => Cell::Float(self.age),
            SEX => Cell::Text(self.sex.as_str().into()),
            ENTRANCE_TIME => Cell::Time(Some(self.entrance_time)),
            EXIT_TIME => Cell::Time(self.exit_time),
            CAUSE_OF_DEATH => Cell::Text(
                self.cause_of_death
                    .clone()
                    .unwrap_or_else(|| "not_dead".into()),
            ),
            YEARS_LIVED_WITH_DISABILITY => Cell::Float(self.years_lived_with_disability),
            YEARS_OF_LIFE_LOST => Cell::Float(self.years_of_life_lost),
            TREATMENT_STATUS => Cell::Text(self.treatment_status.as_str().into()),
            ANTENATAL_CARE_VISIT => Cell::Bool(self.antenatal_care_visit),
            BIRTH_WEIGHT_EFFECT => Cell::Float(self.birth_weight_effect),
            GESTATION_TIME_EFFECT => Cell::Float(self.gestation_time_effect),
            _ => return None,
        };
        Some(cell)
    }

    /// Write a column by name, rejecting values of the wrong shape
    pub fn set_column(&mut self, name: &str, cell: Cell) -> Result<()> {
        match (name, cell) {
            (ALIVE, Cell::Bool(v)) => self.alive = v,
            (AGE, Cell::Float(v)) => self.age = v,
            (SEX, Cell::Text(v)) => {
                self.sex = match v.as_str() {
                    "Female" => Sex::Female,
                    "Male" => Sex::Male,
                    other => {
                        return Err(Error::Population(format!("Unknown sex {}", other)));
                    }
                }
            }
            (ENTRANCE_TIME, Cell::Time(Some(t))) => self.entrance_time = t,
            (EXIT_TIME, Cell::Time(t)) => self.exit_time = t,
            (CAUSE_OF_DEATH, Cell::Text(v)) => {
                self.cause_of_death = if v == "not_dead" { None } else { Some(v) }
            }
            (YEARS_LIVED_WITH_DISABILITY, Cell::Float(v)) => self.years_lived_with_disability = v,
            (YEARS_OF_LIFE_LOST, Cell::Float(v)) => self.years_of_life_lost = v,
            (TREATMENT_STATUS, Cell::Text(v)) => {
                self.treatment_status = match v.as_str() {
                    "treated" => TreatmentStatus::Treated,
                    "not_treated" => TreatmentStatus::NotTreated,
                    other => {
                        return Err(Error::Population(format!(
                            "Unknown treatment status {}",
                            other
                        )));
                    }
                }
            }
            (ANTENATAL_CARE_VISIT, Cell::Bool(v)) => self.antenatal_care_visit = v,
            (BIRTH_WEIGHT_EFFECT, Cell::Float(v)) => self.birth_weight_effect = v,
            (GESTATION_TIME_EFFECT, Cell::Float(v)) => self.gestation_time_effect = v,
            (name, cell) => {
                return Err(Error::Population(format!(
                    "Cannot write {:?} to column {}",
                    cell, name
                )));
            }
        }
        Ok(())
    }
}

/// A batch of simulants created at one instant
#[derive(Clone, Debug)]
pub struct SimulantData {
    pub index: Vec<SimulantId>,
    pub creation_time: DateTime<Utc>,
}

/// The population state table
#[derive(Debug, Default)]
pub struct PopulationTable {
    rows: BTreeMap<SimulantId, Simulant>,
    next_id: u64,
}

impl PopulationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `count` fresh rows entering at `creation_time`
    pub fn add_simulants(&mut self, count: usize, creation_time: DateTime<Utc>) -> Vec<SimulantId> {
        let index: Vec<SimulantId> = (self.next_id..self.next_id + count as u64)
            .map(SimulantId)
            .collect();
        for id in &index {
            self.rows.insert(*id, Simulant::new(creation_time));
        }
        self.next_id += count as u64;
        index
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All simulant ids in ascending order
    pub fn index(&self) -> Vec<SimulantId> {
        self.rows.keys().copied().collect()
    }

    pub fn alive_index(&self) -> Vec<SimulantId> {
        self.rows
            .iter()
            .filter(|(_, s)| s.alive)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn get(&self, id: SimulantId) -> Result<&Simulant> {
        self.rows
            .get(&id)
            .ok_or_else(|| Error::Population(format!("Unknown simulant {}", id)))
    }

    pub fn get_mut(&mut self, id: SimulantId) -> Result<&mut Simulant> {
        self.rows
            .get_mut(&id)
            .ok_or_else(|| Error::Population(format!("Unknown simulant {}", id)))
    }

    /// Treatment status of each simulant in `index`, aligned with it
    pub fn treated_mask(&self, index: &[SimulantId]) -> Result<Vec<bool>> {
        index
            .iter()
            .map(|id| Ok(self.get(*id)?.treatment_status.is_treated()))
            .collect()
    }
}

/// Column-scoped access to the population table
#[derive(Clone, Debug)]
pub struct PopulationView {
    columns: Vec<String>,
}

impl PopulationView {
    pub fn new(columns: &[&str]) -> Result<Self> {
        Self::from_names(columns.iter().map(|c| c.to_string()).collect())
    }

    pub fn from_names(columns: Vec<String>) -> Result<Self> {
        if let Some(unknown) = columns.iter().find(|c| !COLUMNS.contains(&c.as_str())) {
            return Err(Error::Population(format!("Unknown column {}", unknown)));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Read the view's columns for each simulant, in column order
    pub fn get(&self, table: &PopulationTable, index: &[SimulantId]) -> Result<Vec<Vec<Cell>>> {
        index
            .iter()
            .map(|id| {
                let simulant = table.get(*id)?;
                self.columns
                    .iter()
                    .map(|c| {
                        simulant
                            .column(c)
                            .ok_or_else(|| Error::Population(format!("Unknown column {}", c)))
                    })
                    .collect()
            })
            .collect()
    }

    /// Read one of the view's columns for each simulant in `index`
    pub fn column(
        &self,
        table: &PopulationTable,
        index: &[SimulantId],
        column: &str,
    ) -> Result<Vec<Cell>> {
        self.require(column)?;
        index
            .iter()
            .map(|id| {
                table
                    .get(*id)?
                    .column(column)
                    .ok_or_else(|| Error::Population(format!("Unknown column {}", column)))
            })
            .collect()
    }

    fn require(&self, column: &str) -> Result<()> {
        if self.columns.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(Error::Population(format!(
                "Column {} is not part of this view",
                column
            )))
        }
    }

    /// Write one column for each simulant in `index`
    pub fn update(
        &self,
        table: &mut PopulationTable,
        index: &[SimulantId],
        column: &str,
        values: Vec<Cell>,
    ) -> Result<()> {
        self.require(column)?;
        if index.len() != values.len() {
            return Err(Error::Population(format!(
                "Update of {} has {} values for {} simulants",
                column,
                values.len(),
                index.len()
            )));
        }
        for (id, value) in index.iter().zip(values) {
            table.get_mut(*id)?.set_column(column, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_add_simulants_assigns_fresh_ids() {
        let mut table = PopulationTable::new();
        let first = table.add_simulants(3, start());
        let second = table.add_simulants(2, start());
        assert_eq!(first, vec![SimulantId(0), SimulantId(1), SimulantId(2)]);
        assert_eq!(second, vec![SimulantId(3), SimulantId(4)]);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_view_rejects_unknown_columns() {
        assert!(PopulationView::new(&[AGE, "shoe_size"]).is_err());
        assert!(PopulationView::new(&[AGE, TREATMENT_STATUS]).is_ok());
    }

    #[test]
    fn test_view_get_and_update() {
        let mut table = PopulationTable::new();
        let index = table.add_simulants(2, start());
        let view = PopulationView::new(&[TREATMENT_STATUS, AGE]).unwrap();

        view.update(
            &mut table,
            &index,
            TREATMENT_STATUS,
            vec![Cell::Text("treated".into()), Cell::Text("not_treated".into())],
        )
        .unwrap();

        let rows = view.get(&table, &index).unwrap();
        assert_eq!(rows[0][0], Cell::Text("treated".into()));
        assert_eq!(rows[1][0], Cell::Text("not_treated".into()));
        assert_eq!(rows[0][1], Cell::Float(0.0));
        assert_eq!(table.treated_mask(&index).unwrap(), vec![true, false]);
    }

    #[test]
    fn test_update_outside_view_fails() {
        let mut table = PopulationTable::new();
        let index = table.add_simulants(1, start());
        let view = PopulationView::new(&[AGE]).unwrap();
        let result = view.update(&mut table, &index, ALIVE, vec![Cell::Bool(false)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_column_type_mismatch() {
        let mut table = PopulationTable::new();
        let index = table.add_simulants(1, start());
        let simulant = table.get_mut(index[0]).unwrap();
        assert!(simulant.set_column(AGE, Cell::Bool(true)).is_err());
        assert!(simulant
            .set_column(TREATMENT_STATUS, Cell::Text("maybe".into()))
            .is_err());
    }

    #[test]
    fn test_alive_index() {
        let mut table = PopulationTable::new();
        let index = table.add_simulants(3, start());
        table.get_mut(index[1]).unwrap().alive = false;
        assert_eq!(table.alive_index(), vec![index[0], index[2]]);
    }
}
