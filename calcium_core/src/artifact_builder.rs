//! Building and patching location artifacts.
//!
//! Every key is written independently and only if absent, so a build can
//! be re-run (or run alongside another build of the same artifact) and only
//! the missing keys are filled in.

use crate::artifact::{location_term, Artifact, EntityKey};
use crate::catalog::{
    ALTERNATIVE_RISK_KEYS, COVARIATE_KEYS, DEMOGRAPHIC_KEYS, DISEASE_KEYS, LBWSG_KEYS,
    LBWSG_METADATA_KEYS, LOCATIONS_KEY,
};
use crate::data_source::{location_slug, ArtifactSource, DataSource};
use crate::{Config, Error, Result};
use serde_json::Value;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

/// Counts of what a batch of writes did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub skipped: usize,
    pub conflicts: usize,
}

impl AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
    }
}

/// Write each key that is not yet in the artifact.
///
/// Present keys are skipped. A key that appears between the check and the
/// write (another builder got there first) is logged and counted as a
/// conflict. Any other failure stops the batch.
pub fn safe_write<F>(artifact: &Artifact, keys: &[EntityKey], getter: F) -> Result<WriteSummary>
where
    F: Fn(&EntityKey) -> Result<Value>,
{
    let mut summary = WriteSummary::default();
    for key in keys {
        if artifact.contains(key)? {
            tracing::info!("{} found in artifact.", key);
            summary.skipped += 1;
            continue;
        }

        tracing::info!(">>> writing {}.", key);
        let data = getter(key)?;
        match artifact.write(key, data) {
            Ok(()) => summary.written += 1,
            Err(Error::ArtifactConflict { key }) => {
                tracing::warn!("{} was written by another builder, leaving it in place", key);
                summary.conflicts += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}

/// Artifact file for `location` inside `output_dir`
pub fn artifact_path(output_dir: &Path, location: &str) -> PathBuf {
    output_dir.join(format!("{}.json", location_slug(location)))
}

/// Open (or create) the artifact and record its location
pub fn create_new_artifact(path: &Path, location: &str) -> Result<(Artifact, WriteSummary)> {
    tracing::info!("Creating artifact at {:?}.", path);
    let artifact = Artifact::open(path, vec![location_term(location)])?;
    let summary = safe_write(&artifact, std::slice::from_ref(&*LOCATIONS_KEY), |_| {
        Ok(Value::from(vec![location.to_string()]))
    })?;
    Ok((artifact, summary))
}

fn write_from_source(
    artifact: &Artifact,
    keys: &[EntityKey],
    source: &dyn DataSource,
    location: &str,
) -> Result<WriteSummary> {
    safe_write(artifact, keys, |key| source.load(key, location))
}

pub fn write_demographic_data(
    artifact: &Artifact,
    source: &dyn DataSource,
    location: &str,
) -> Result<WriteSummary> {
    tracing::info!("Writing demographic data...");
    write_from_source(artifact, &DEMOGRAPHIC_KEYS, source, location)
}

pub fn write_covariate_data(
    artifact: &Artifact,
    source: &dyn DataSource,
    location: &str,
) -> Result<WriteSummary> {
    tracing::info!("Writing covariate data...");
    write_from_source(artifact, &COVARIATE_KEYS, source, location)
}

pub fn write_disease_data(
    artifact: &Artifact,
    source: &dyn DataSource,
    location: &str,
) -> Result<WriteSummary> {
    tracing::info!("Writing disease data...");
    write_from_source(artifact, &DISEASE_KEYS, source, location)
}

pub fn write_alternative_risk_data(
    artifact: &Artifact,
    source: &dyn DataSource,
    location: &str,
) -> Result<WriteSummary> {
    tracing::info!("Writing risk data...");
    write_from_source(artifact, &ALTERNATIVE_RISK_KEYS, source, location)
}

/// Locations whose LBWSG data was saved in an incompatible version and is
/// read from a separately prepared artifact instead
#[derive(Clone, Debug, Default)]
pub struct ReversionedData {
    pub locations: Vec<String>,
    pub dir: PathBuf,
}

impl ReversionedData {
    pub fn from_config(config: &Config) -> Self {
        Self {
            locations: config.artifact.reversioned_locations.clone(),
            dir: config.reversioned_dir(),
        }
    }

    pub fn applies_to(&self, location: &str) -> bool {
        self.locations.iter().any(|l| l == location)
    }

    /// `<dir>/<Location_With_Underscores>.json`
    pub fn artifact_path(&self, location: &str) -> PathBuf {
        self.dir.join(format!("{}.json", location.replace(' ', "_")))
    }
}

pub fn write_lbwsg_data(
    artifact: &Artifact,
    source: &dyn DataSource,
    location: &str,
    reversioned: &ReversionedData,
) -> Result<WriteSummary> {
    tracing::info!("Writing low birth weight and short gestation data...");

    let mut summary = if reversioned.applies_to(location) {
        let path = reversioned.artifact_path(location);
        tracing::info!("Reading {} LBWSG data from {:?}", location, path);
        let reversioned_source = ArtifactSource::open(&path)?;
        write_from_source(artifact, &LBWSG_KEYS, &reversioned_source, location)?
    } else {
        write_from_source(artifact, &LBWSG_KEYS, source, location)?
    };

    summary += write_from_source(artifact, &LBWSG_METADATA_KEYS, source, location)?;
    Ok(summary)
}

/// Result of a full artifact build
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildReport {
    pub path: PathBuf,
    pub summary: WriteSummary,
}

/// Build the artifact for `location` in `output_dir`.
///
/// With `erase`, an existing artifact file is removed first.
pub fn build_artifact(
    location: &str,
    output_dir: &Path,
    erase: bool,
    source: &dyn DataSource,
    reversioned: &ReversionedData,
) -> Result<BuildReport> {
    let path = artifact_path(output_dir, location);
    if erase && path.is_file() {
        tracing::info!("Erasing existing artifact at {:?}", path);
        std::fs::remove_file(&path)?;
    }

    let (artifact, mut summary) = create_new_artifact(&path, location)?;
    summary += write_demographic_data(&artifact, source, location)?;
    summary += write_covariate_data(&artifact, source, location)?;
    summary += write_disease_data(&artifact, source, location)?;
    summary += write_alternative_risk_data(&artifact, source, location)?;
    summary += write_lbwsg_data(&artifact, source, location, reversioned)?;

    tracing::info!(
        "!!! Done !!! {:?}: {} written, {} skipped, {} conflicts",
        artifact.path(),
        summary.written,
        summary.skipped,
        summary.conflicts
    );
    Ok(BuildReport { path, summary })
}

/// Fill in any missing LBWSG keys of an existing artifact for its own
/// location
pub fn patch_artifact(path: &Path, source: &dyn DataSource) -> Result<WriteSummary> {
    if !path.is_file() {
        return Err(Error::Artifact(format!("No artifact at {:?}", path)));
    }
    let artifact = Artifact::open(path, vec![])?;
    let locations = artifact.load(&LOCATIONS_KEY)?;
    let location = locations
        .as_array()
        .and_then(|l| l.first())
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::Artifact(format!("{:?} has no location in {}", path, *LOCATIONS_KEY))
        })?
        .to_string();

    tracing::info!("Patching {:?} for {}", path, location);
    let mut summary = write_from_source(&artifact, &LBWSG_KEYS, source, &location)?;
    summary += write_from_source(&artifact, &LBWSG_METADATA_KEYS, source, &location)?;
    Ok(summary)
}
