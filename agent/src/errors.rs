//! Error types for the deployment agent

use thiserror::Error;

/// Main error type for the deployment agent
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A credential could not be written to its scratch key file
    #[error("Failed to materialize credential: {0}")]
    Materialization(String),

    #[error("No playbook content or valid playbook path found for template {0}")]
    NoPlaybook(String),

    #[error("No target hosts resolved for deployment {0}")]
    NoTargets(String),

    #[error("Failed to start process: {0}")]
    ProcessSpawn(String),

    /// The job infrastructure aborted the attempt outside the engine
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
