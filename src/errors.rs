//! Error types for reqplan

use thiserror::Error;

use crate::template::TemplateError;

/// Main error type for reqplan
#[derive(Error, Debug)]
pub enum ReqplanError {
    /// No plan file was provided, or none of the provided paths exist.
    #[error("{0}")]
    NoPlan(String),

    /// Parsing or validating a plan failed.
    #[error("{0}")]
    InvalidPlan(String),

    /// Loading a plan dependency failed, e.g. a variable file could not be
    /// read or plan variables could not be resolved.
    #[error("{0}")]
    Dependency(String),

    /// The run was interrupted by the user.
    #[error("Interrupted")]
    Interrupted,

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ReqplanError>;
