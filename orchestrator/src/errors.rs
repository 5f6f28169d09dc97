//! Error types for the app orchestrator

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the app orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Malformed identifier, or one that resolves outside both app roots
    #[error("invalid app id: {0}")]
    InvalidId(String),

    #[error("app not found: {}", .0.display())]
    AppNotFound(PathBuf),

    /// The app directory exists but is missing a descriptor or a main file
    #[error("invalid app: {0}")]
    InvalidApp(String),

    #[error("brick {0:?} not found")]
    BrickNotFound(String),

    #[error("model {0:?} not found")]
    ModelNotFound(String),

    #[error("{0}")]
    VariableValidation(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("compose assembly failed: {0}")]
    ComposeAssemblyFailed(String),

    #[error("runtime operation failed: {0}")]
    RuntimeOperationFailed(String),

    #[error("operation canceled")]
    OperationCanceled,

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, OrchestratorError::OperationCanceled)
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
