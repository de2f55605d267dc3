//! Error types for parallel spec execution

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid execution request: {0}")]
    InvalidRequest(String),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Failed to clone repository {repository}: {reason}")]
    Clone { repository: String, reason: String },

    #[error("Config file {path} is missing or not a regular file")]
    ConfigFile { path: String },

    #[error("Failed to prepare runner environment: {0}")]
    Environment(String),

    #[error("Failed to determine runner version: {0}")]
    RunnerVersion(String),

    #[error("Display server {display} failed to start: {reason}")]
    DisplayStartup { display: String, reason: String },

    #[error("Failed to launch runner: {0}")]
    Launch(String),

    #[error("Report file {path} not found: {source}")]
    ArtifactMissing {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Report file {path} is unreadable: {reason}")]
    ArtifactUnreadable { path: String, reason: String },

    #[error("Execution deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Failed to report result: {0}")]
    Report(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RunError {
    /// Errors raised before fan-out that fail the whole batch.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            RunError::Clone { .. }
                | RunError::ConfigFile { .. }
                | RunError::Environment(_)
                | RunError::RunnerVersion(_)
        )
    }
}

pub type RunResult<T> = Result<T, RunError>;
