//! Key-addressed artifact store.
//!
//! An artifact is a single JSON file of entries keyed by [`EntityKey`]
//! strings. Every key is written at most once. Writers serialize on an
//! exclusive lock over a sidecar `.lock` file, reload the artifact, insert
//! the new entry and replace the file atomically, so concurrent builders
//! never lose each other's keys.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use uuid::Uuid;

const FORMAT_VERSION: u32 = 1;

// ============================================================================
// Entity Keys
// ============================================================================

/// `type.measure` or `type.name.measure`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub entity_type: String,
    pub name: Option<String>,
    pub measure: String,
}

impl EntityKey {
    pub fn new(entity_type: &str, name: Option<&str>, measure: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            name: name.map(str::to_string),
            measure: measure.to_string(),
        }
    }
}

impl FromStr for EntityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidKey(s.to_string()));
        }
        match parts.as_slice() {
            [entity_type, measure] => Ok(Self::new(entity_type, None, measure)),
            [entity_type, name, measure] => Ok(Self::new(entity_type, Some(name), measure)),
            _ => Err(Error::InvalidKey(s.to_string())),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}.{}.{}", self.entity_type, name, self.measure),
            None => write!(f, "{}.{}", self.entity_type, self.measure),
        }
    }
}

// ============================================================================
// Filter Terms
// ============================================================================

/// Filter term keeping rows for `location` plus global rows
pub fn location_term(location: &str) -> String {
    format!("location == {} | location == Global", location)
}

/// Whether a record passes every term.
///
/// A term is `column == value` clauses joined by `|`. Records without the
/// term's column pass it.
fn matches_terms(record: &serde_json::Map<String, Value>, terms: &[String]) -> bool {
    terms.iter().all(|term| {
        let clauses: Vec<(&str, &str)> = term
            .split('|')
            .filter_map(|clause| {
                let (column, value) = clause.split_once("==")?;
                Some((column.trim(), value.trim().trim_matches(|c: char| c == '\'' || c == '"')))
            })
            .collect();

        let applicable: Vec<&(&str, &str)> = clauses
            .iter()
            .filter(|(column, _)| record.contains_key(*column))
            .collect();
        if applicable.is_empty() {
            return true;
        }
        applicable.iter().any(|(column, value)| match &record[*column] {
            Value::String(s) => s == value,
            other => other.to_string() == *value,
        })
    })
}

fn apply_filter_terms(data: Value, terms: &[String]) -> Value {
    if terms.is_empty() {
        return data;
    }
    match data {
        Value::Array(rows) => Value::Array(
            rows.into_iter()
                .filter(|row| match row {
                    Value::Object(record) => matches_terms(record, terms),
                    _ => true,
                })
                .collect(),
        ),
        other => other,
    }
}

// ============================================================================
// Artifact File
// ============================================================================

/// A stored value with its write provenance
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArtifactEntry {
    pub data: Value,
    pub written_at: DateTime<Utc>,
    pub write_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactFile {
    version: u32,
    entries: BTreeMap<String, ArtifactEntry>,
}

impl Default for ArtifactFile {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Handle to an artifact file
#[derive(Clone, Debug)]
pub struct Artifact {
    path: PathBuf,
    filter_terms: Vec<String>,
}

impl Artifact {
    /// Open the artifact at `path`, creating an empty one if needed.
    ///
    /// `filter_terms` apply to tabular data on [`Artifact::load`].
    pub fn open(path: impl Into<PathBuf>, filter_terms: Vec<String>) -> Result<Self> {
        let artifact = Self {
            path: path.into(),
            filter_terms,
        };
        let lock = artifact.lock_exclusive()?;
        if artifact.path.exists() {
            artifact.read_file()?;
        } else {
            artifact.persist(&ArtifactFile::default())?;
            tracing::debug!("Created empty artifact at {:?}", artifact.path);
        }
        lock.unlock()?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.read_locked()?.entries.contains_key(&key.to_string()))
    }

    pub fn keys(&self) -> Result<Vec<EntityKey>> {
        self.read_locked()?
            .entries
            .keys()
            .map(|k| k.parse())
            .collect()
    }

    /// Load a key's data with the filter terms applied
    pub fn load(&self, key: &EntityKey) -> Result<Value> {
        let entry = self.entry(key)?;
        Ok(apply_filter_terms(entry.data, &self.filter_terms))
    }

    /// Load a key's stored entry, unfiltered
    pub fn entry(&self, key: &EntityKey) -> Result<ArtifactEntry> {
        self.read_locked()?
            .entries
            .remove(&key.to_string())
            .ok_or_else(|| Error::MissingKey(key.to_string()))
    }

    /// Write `data` under `key`. Existing keys are never overwritten.
    pub fn write(&self, key: &EntityKey, data: Value) -> Result<()> {
        let lock = self.lock_exclusive()?;
        let mut file = self.read_file()?;

        let name = key.to_string();
        if file.entries.contains_key(&name) {
            lock.unlock()?;
            return Err(Error::ArtifactConflict { key: name });
        }
        file.entries.insert(
            name,
            ArtifactEntry {
                data,
                written_at: Utc::now(),
                write_id: Uuid::new_v4(),
            },
        );
        self.persist(&file)?;
        lock.unlock()?;

        tracing::debug!("Wrote {} to {:?}", key, self.path);
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn open_lock_file(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(self.lock_path())?)
    }

    fn lock_exclusive(&self) -> Result<File> {
        let file = self.open_lock_file()?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn read_locked(&self) -> Result<ArtifactFile> {
        let lock = self.open_lock_file()?;
        lock.lock_shared()?;
        let file = self.read_file();
        lock.unlock()?;
        file
    }

    fn read_file(&self) -> Result<ArtifactFile> {
        if !self.path.exists() {
            return Ok(ArtifactFile::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let file: ArtifactFile = serde_json::from_str(&contents)
            .map_err(|e| Error::Artifact(format!("{:?} is not a valid artifact: {}", self.path, e)))?;
        if file.version != FORMAT_VERSION {
            return Err(Error::Artifact(format!(
                "{:?} has format version {}, expected {}",
                self.path, file.version, FORMAT_VERSION
            )));
        }
        Ok(file)
    }

    /// Replace the artifact file atomically
    fn persist(&self, file: &ArtifactFile) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&parent)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, file)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}
