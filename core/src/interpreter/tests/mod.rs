//! Tests for the interpreter
//!
//! Organized by feature area

mod helpers;
mod validate_tests;
