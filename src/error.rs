// file: src/error.rs
// version: 1.2.0
// guid: 8f2c41d7-95ab-4e06-b3c1-d84a20f7e519

use thiserror::Error;

/// Result type alias for the image builder
pub type Result<T> = std::result::Result<T, ImageBuildError>;

/// Error types for the Ubuntu image builder
#[derive(Debug, Error)]
pub enum ImageBuildError {
    #[error("{0}")]
    FlagConflict(String),

    #[error("Schema validation failed: {0}")]
    SchemaError(String),

    #[error("{0}")]
    DomainRule(String),

    #[error("Workspace error: {0}")]
    WorkspaceIO(String),

    #[error("Command not found: {0}")]
    ToolNotFound(String),

    #[error("Error running command \"{command}\" (exit code {code}). Full output below:\n{output}")]
    ToolFailure {
        command: String,
        output: String,
        code: i32,
    },

    #[error("Content missing: {0}")]
    ContentMissing(String),

    #[error("The structure \"{0}\" overlaps GPT header or GPT partition table")]
    GeometryViolation(String),

    #[error("Failed to generate unique disk ID. Random generator failure?")]
    RandomnessExhausted,

    #[error("{primary}; additionally, cleanup failed: {cleanup}")]
    PartialFailure { primary: String, cleanup: String },

    #[error("Error in step \"{step}\": {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<ImageBuildError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl ImageBuildError {
    /// Wrap an error with the name of the step it occurred in.
    pub fn in_step(self, step: &str) -> Self {
        ImageBuildError::StepFailed {
            step: step.to_string(),
            source: Box::new(self),
        }
    }
}
