//! Where artifact data comes from.

use crate::artifact::{Artifact, EntityKey};
use crate::{Error, Result};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};

/// Lowercase, underscored form of a location name
pub fn location_slug(location: &str) -> String {
    location.replace(' ', "_").to_lowercase()
}

/// A provider of data for artifact keys
pub trait DataSource {
    fn load(&self, key: &EntityKey, location: &str) -> Result<Value>;
}

/// Prepared input files laid out as `<root>/<location_slug>/<key>.json` or
/// `<key>.csv`
#[derive(Clone, Debug)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_path(&self, key: &EntityKey, location: &str, extension: &str) -> PathBuf {
        self.root
            .join(location_slug(location))
            .join(format!("{}.{}", key, extension))
    }
}

impl DataSource for DirectorySource {
    fn load(&self, key: &EntityKey, location: &str) -> Result<Value> {
        let json_path = self.file_path(key, location, "json");
        if json_path.is_file() {
            let contents = std::fs::read_to_string(&json_path)?;
            tracing::debug!("Loaded {} from {:?}", key, json_path);
            return Ok(serde_json::from_str(&contents)?);
        }

        let csv_path = self.file_path(key, location, "csv");
        if csv_path.is_file() {
            tracing::debug!("Loaded {} from {:?}", key, csv_path);
            return read_csv_records(&csv_path);
        }

        Err(Error::MissingKey(format!(
            "{} for {} under {:?}",
            key, location, self.root
        )))
    }
}

/// Reads keys from an existing artifact, ignoring the location
#[derive(Clone, Debug)]
pub struct ArtifactSource {
    artifact: Artifact,
}

impl ArtifactSource {
    pub fn new(artifact: Artifact) -> Self {
        Self { artifact }
    }

    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Artifact(format!("No artifact at {:?}", path)));
        }
        Ok(Self::new(Artifact::open(path, vec![])?))
    }
}

impl DataSource for ArtifactSource {
    fn load(&self, key: &EntityKey, _location: &str) -> Result<Value> {
        self.artifact.load(key)
    }
}

/// CSV rows as JSON records; numeric fields become numbers
fn read_csv_records(path: &Path) -> Result<Value> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(column, field)| (column.to_string(), csv_field(field)))
            .collect();
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

fn csv_field(field: &str) -> Value {
    field
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(s: &str) -> EntityKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_location_slug() {
        assert_eq!(location_slug("Central African Republic"), "central_african_republic");
        assert_eq!(location_slug("Mali"), "mali");
    }

    #[test]
    fn test_directory_source_reads_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("burkina_faso");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("population.age_bins.json"), r#"[{"age_start": 0.0}]"#).unwrap();

        let source = DirectorySource::new(temp_dir.path());
        let data = source
            .load(&key("population.age_bins"), "Burkina Faso")
            .unwrap();
        assert_eq!(data, json!([{"age_start": 0.0}]));
    }

    #[test]
    fn test_directory_source_reads_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("mali");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("cause.measles.incidence_rate.csv"),
            "location,sex,value\nMali,Female,0.25\nMali,Male,0.5\n",
        )
        .unwrap();

        let source = DirectorySource::new(temp_dir.path());
        let data = source
            .load(&key("cause.measles.incidence_rate"), "Mali")
            .unwrap();
        assert_eq!(
            data,
            json!([
                {"location": "Mali", "sex": "Female", "value": 0.25},
                {"location": "Mali", "sex": "Male", "value": 0.5}
            ])
        );
    }

    #[test]
    fn test_directory_source_missing_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(temp_dir.path());
        assert!(matches!(
            source.load(&key("population.structure"), "Mali"),
            Err(Error::MissingKey(_))
        ));
    }

    #[test]
    fn test_artifact_source_ignores_location() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("Mali.json");
        let artifact = Artifact::open(&path, vec![]).unwrap();
        let k = key("risk_factor.low_birth_weight_and_short_gestation.exposure");
        artifact.write(&k, json!({"cat1": 0.1})).unwrap();

        let source = ArtifactSource::open(&path).unwrap();
        assert_eq!(source.load(&k, "anywhere").unwrap(), json!({"cat1": 0.1}));
        assert!(ArtifactSource::open(&temp_dir.path().join("Sudan.json")).is_err());
    }
}
