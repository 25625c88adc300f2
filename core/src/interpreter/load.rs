//! Reading programs from JSON or TOML

use super::ast::Program;
use super::errors::ProgramError;
use super::validate::validate_program;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    /// Guess from the file extension; anything but `.toml` is JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

/// Parse and validate a program
pub fn parse_program(source: &str, format: Format) -> Result<Program, ProgramError> {
    let program: Program = match format {
        Format::Json => serde_json::from_str(source)?,
        Format::Toml => toml::from_str(source)?,
    };
    validate_program(&program).map_err(ProgramError::Invalid)?;
    Ok(program)
}

/// Read, parse and validate a program file
pub fn load_program(path: &Path) -> Result<Program, ProgramError> {
    let source = std::fs::read_to_string(path).map_err(|source| ProgramError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded program source");
    parse_program(&source, Format::from_path(path))
}
