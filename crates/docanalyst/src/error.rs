use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum AnalystError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Submission rejected: {0}")]
    Submit(#[from] SubmitError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to start scheduler threads: {0}")]
    Runtime(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Environment variable '{name}' is not set")]
    MissingEnv { name: String },
}

/// Errors from the job record store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing database could not be reached or failed mid-operation.
    #[error("Job store unavailable: {0}")]
    Unavailable(#[from] crate::db::DatabaseError),

    #[error("Job not found: {0}")]
    NotFound(String),

    /// The precondition of a conditional transition did not hold.
    #[error("Invalid transition for job {job_id}: {current} -> {requested}")]
    InvalidTransition {
        job_id: String,
        current: JobStatus,
        requested: JobStatus,
    },

    /// A transition carried fields that would break the record invariants.
    #[error("Invalid fields for transition of job {job_id} to {requested}: {reason}")]
    InvalidFields {
        job_id: String,
        requested: JobStatus,
        reason: String,
    },

    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}

impl StoreError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, StoreError::InvalidTransition { .. })
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse PDF: {0}")]
    PdfParse(String),

    #[error("No text could be extracted from '{0}'")]
    NoText(String),
}

impl ExtractionError {
    /// IO errors may clear up on their own; everything else describes the document itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::ReadDocument { .. })
    }
}

/// Input errors rejected before a job is created.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to stage upload: {0}")]
    Staging(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AnalystError>;
