//! Named value pipelines.
//!
//! A pipeline has one source producing a base value for a set of simulants
//! and an ordered list of modifiers, applied in registration order. Every
//! modifier receives and must return a value of the same shape.

use crate::{Error, PopulationTable, Result, SimulantId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A pipeline output aligned with the requested simulant index
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineValue {
    /// One value per simulant
    Scalar(Vec<f64>),
    /// Several named sub-values per simulant (e.g. per-cause rates)
    Table(BTreeMap<String, Vec<f64>>),
}

impl PipelineValue {
    /// Number of simulants the value covers
    pub fn len(&self) -> usize {
        match self {
            PipelineValue::Scalar(values) => values.len(),
            PipelineValue::Table(columns) => columns.values().next().map_or(0, Vec::len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-wise sum of a table over `rows` simulants, or the scalar values
    /// unchanged. An empty table sums to zero.
    pub fn sum_columns(&self, rows: usize) -> Vec<f64> {
        match self {
            PipelineValue::Scalar(values) => values.clone(),
            PipelineValue::Table(columns) => {
                let mut totals = vec![0.0; rows];
                for values in columns.values() {
                    for (total, v) in totals.iter_mut().zip(values) {
                        *total += v;
                    }
                }
                totals
            }
        }
    }

    fn has_shape_of(&self, other: &PipelineValue) -> bool {
        match (self, other) {
            (PipelineValue::Scalar(a), PipelineValue::Scalar(b)) => a.len() == b.len(),
            (PipelineValue::Table(a), PipelineValue::Table(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                        ka == kb && va.len() == vb.len()
                    })
            }
            _ => false,
        }
    }

    fn has_consistent_rows(&self, expected: usize) -> bool {
        match self {
            PipelineValue::Scalar(values) => values.len() == expected,
            PipelineValue::Table(columns) => columns.values().all(|v| v.len() == expected),
        }
    }
}

/// What a source or modifier can see when it is evaluated
pub struct ValueContext<'a> {
    pub population: &'a PopulationTable,
    pub pipelines: &'a ValuePipelines,
    pub clock: DateTime<Utc>,
}

impl<'a> ValueContext<'a> {
    /// Evaluate another pipeline from inside a source or modifier
    pub fn value(&self, name: &str, index: &[SimulantId]) -> Result<PipelineValue> {
        self.pipelines
            .get_value(name, index, self.population, self.clock)
    }
}

pub type ValueSource = Box<dyn Fn(&[SimulantId], &ValueContext<'_>) -> Result<PipelineValue>>;
pub type ValueModifier =
    Box<dyn Fn(&[SimulantId], &ValueContext<'_>, PipelineValue) -> Result<PipelineValue>>;

#[derive(Default)]
struct Pipeline {
    source: Option<(String, ValueSource)>,
    modifiers: Vec<(String, ValueModifier)>,
}

/// Registry of all pipelines in a simulation
#[derive(Default)]
pub struct ValuePipelines {
    pipelines: BTreeMap<String, Pipeline>,
}

impl ValuePipelines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the source of `name`. A pipeline has exactly one source.
    pub fn register_value_producer(
        &mut self,
        name: &str,
        owner: &str,
        source: ValueSource,
    ) -> Result<()> {
        let pipeline = self.pipelines.entry(name.to_string()).or_default();
        if let Some((existing, _)) = &pipeline.source {
            return Err(Error::Pipeline(format!(
                "Pipeline {} already has a source registered by {}",
                name, existing
            )));
        }
        pipeline.source = Some((owner.to_string(), source));
        tracing::debug!("{} registered source for pipeline {}", owner, name);
        Ok(())
    }

    /// Append a modifier to `name`. The source may be registered later.
    pub fn register_value_modifier(&mut self, name: &str, owner: &str, modifier: ValueModifier) {
        self.pipelines
            .entry(name.to_string())
            .or_default()
            .modifiers
            .push((owner.to_string(), modifier));
        tracing::debug!("{} registered modifier for pipeline {}", owner, name);
    }

    /// Names of pipelines that were modified but never given a source
    pub fn missing_sources(&self) -> Vec<String> {
        self.pipelines
            .iter()
            .filter(|(_, p)| p.source.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Evaluate a pipeline's source only, without modifiers
    pub fn source_value(
        &self,
        name: &str,
        index: &[SimulantId],
        population: &PopulationTable,
        clock: DateTime<Utc>,
    ) -> Result<PipelineValue> {
        let ctx = ValueContext {
            population,
            pipelines: self,
            clock,
        };
        self.evaluate_source(name, index, &ctx)
    }

    /// Evaluate a pipeline: source, then each modifier in registration order
    pub fn get_value(
        &self,
        name: &str,
        index: &[SimulantId],
        population: &PopulationTable,
        clock: DateTime<Utc>,
    ) -> Result<PipelineValue> {
        let ctx = ValueContext {
            population,
            pipelines: self,
            clock,
        };
        let mut value = self.evaluate_source(name, index, &ctx)?;

        let pipeline = self.lookup(name)?;
        for (owner, modifier) in &pipeline.modifiers {
            let modified = modifier(index, &ctx, value.clone())?;
            if !modified.has_shape_of(&value) {
                return Err(Error::Pipeline(format!(
                    "Modifier from {} changed the shape of pipeline {}",
                    owner, name
                )));
            }
            value = modified;
        }
        Ok(value)
    }

    fn evaluate_source(
        &self,
        name: &str,
        index: &[SimulantId],
        ctx: &ValueContext<'_>,
    ) -> Result<PipelineValue> {
        let pipeline = self.lookup(name)?;
        let (owner, source) = pipeline
            .source
            .as_ref()
            .ok_or_else(|| Error::Pipeline(format!("Pipeline {} has no source", name)))?;
        let value = source(index, ctx)?;
        if !value.has_consistent_rows(index.len()) {
            return Err(Error::Pipeline(format!(
                "Source of {} from {} returned a value not aligned with {} simulants",
                name,
                owner,
                index.len()
            )));
        }
        Ok(value)
    }

    fn lookup(&self, name: &str) -> Result<&Pipeline> {
        self.pipelines
            .get(name)
            .ok_or_else(|| Error::Pipeline(format!("Unknown pipeline {}", name)))
    }
}
