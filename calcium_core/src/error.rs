//! Error types for the calcium_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for calcium_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed artifact key
    #[error("Invalid entity key: {0}")]
    InvalidKey(String),

    /// Attempt to overwrite a key that already exists in an artifact
    #[error("Artifact already contains key {key}")]
    ArtifactConflict { key: String },

    /// Key not present in an artifact or data source
    #[error("Key not found: {0}")]
    MissingKey(String),

    /// Artifact store error
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Population table error
    #[error("Population error: {0}")]
    Population(String),

    /// Value pipeline error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Simulation lifecycle error
    #[error("Simulation error: {0}")]
    Simulation(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
