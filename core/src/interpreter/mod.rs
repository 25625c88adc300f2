//! # Block Interpreter
//!
//! Runs serde-described programs on top of the phase scheduler.
//!
//! ## Core Principles
//!
//! 1. **Programs are data**: `Program`/`Stmt` deserialize from JSON or TOML
//! 2. **Validate first**: nothing runs until `validate_program` is happy
//! 3. **Frames are contexts**: one `BlockContext` per active block, searched innermost first
//! 4. **Observable**: everything a program emits ends up in its trace

pub mod ast;
pub mod errors;
pub mod load;
pub mod validate;
pub mod vm;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use ast::{HandlerSpec, PhaserDecl, Program, Stmt};
pub use errors::ProgramError;
pub use load::{load_program, parse_program, Format};
pub use validate::{validate_program, ValidationError};
pub use vm::{RunReport, Trace, Vm};
