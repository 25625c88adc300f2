//! Errors raised while loading a program

use super::validate::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("cannot read program {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON program: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML program: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("program failed validation: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
